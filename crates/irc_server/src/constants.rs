//! Numeric reply codes and their fixed text, as assigned by RFC 1459 / RFC 2812.
//! Only the subset this server actually emits is defined here.

pub const RPL_WELCOME_NB: u16 = 1;
pub const RPL_WELCOME_STR: &str = "Welcome to the Internet Relay Network";

pub const RPL_YOURHOST_NB: u16 = 2;
pub const RPL_CREATED_NB: u16 = 3;
pub const RPL_MYINFO_NB: u16 = 4;

pub const RPL_UMODEIS_NB: u16 = 221;

pub const RPL_CHANNELMODEIS_NB: u16 = 324;
pub const RPL_NOTOPIC_NB: u16 = 331;
pub const RPL_NOTOPIC_STR: &str = "No topic is set";
pub const RPL_TOPIC_NB: u16 = 332;

pub const RPL_INVITING_NB: u16 = 341;

pub const RPL_NAMREPLY_NB: u16 = 353;
pub const RPL_ENDOFNAMES_NB: u16 = 366;
pub const RPL_ENDOFNAMES_STR: &str = "End of /NAMES list";

pub const RPL_WHOREPLY_NB: u16 = 352;
pub const RPL_ENDOFWHO_NB: u16 = 315;
pub const RPL_ENDOFWHO_STR: &str = "End of /WHO list";

pub const ERR_NOSUCHNICK_NB: u16 = 401;
pub const ERR_NOSUCHNICK_STR: &str = "No such nick/channel";

pub const ERR_NOSUCHCHANNEL_NB: u16 = 403;
pub const ERR_NOSUCHCHANNEL_STR: &str = "No such channel";

pub const ERR_CANNOTSENDTOCHAN_NB: u16 = 404;
pub const ERR_CANNOTSENDTOCHAN_STR: &str = "Cannot send to channel";

pub const ERR_NORECIPIENT_NB: u16 = 411;
pub const ERR_NORECIPIENT_STR: &str = "No recipient given";

pub const ERR_NOTEXTTOSEND_NB: u16 = 412;
pub const ERR_NOTEXTTOSEND_STR: &str = "No text to send";

pub const ERR_UNKNOWNCOMMAND_NB: u16 = 421;
pub const ERR_UNKNOWNCOMMAND_STR: &str = "Unknown command";

pub const ERR_NONICKNAMEGIVEN_NB: u16 = 431;
pub const ERR_NONICKNAMEGIVEN_STR: &str = "No nickname given";

pub const ERR_NICKNAMEINUSE_NB: u16 = 433;
pub const ERR_NICKNAMEINUSE_STR: &str = "Nickname is already in use";

pub const ERR_USERNOTINCHANNEL_NB: u16 = 441;
pub const ERR_USERNOTINCHANNEL_STR: &str = "They aren't on that channel";

pub const ERR_NOTONCHANNEL_NB: u16 = 442;
pub const ERR_NOTONCHANNEL_STR: &str = "You're not on that channel";

pub const ERR_USERONCHANNEL_NB: u16 = 443;
pub const ERR_USERONCHANNEL_STR: &str = "is already on channel";

pub const ERR_NOTREGISTERED_NB: u16 = 451;
pub const ERR_NOTREGISTERED_STR: &str = "You have not registered";

pub const ERR_NEEDMOREPARAMS_NB: u16 = 461;
pub const ERR_NEEDMOREPARAMS_STR: &str = "Not enough parameters";

pub const ERR_ALREADYREGISTRED_NB: u16 = 462;
pub const ERR_ALREADYREGISTRED_STR: &str = "You may not reregister";

pub const ERR_CHANNELISFULL_NB: u16 = 471;
pub const ERR_CHANNELISFULL_STR: &str = "Cannot join channel (+l)";

pub const ERR_UNKNOWNMODE_NB: u16 = 472;
pub const ERR_UNKNOWNMODE_STR: &str = "is unknown mode char to me";

pub const ERR_INVITEONLYCHAN_NB: u16 = 473;
pub const ERR_INVITEONLYCHAN_STR: &str = "Cannot join channel (+i)";

pub const ERR_BANNEDFROMCHAN_NB: u16 = 474;
pub const ERR_BANNEDFROMCHAN_STR: &str = "Cannot join channel (+b)";

pub const ERR_BADCHANNELKEY_NB: u16 = 475;
pub const ERR_BADCHANNELKEY_STR: &str = "Cannot join channel (+k)";

pub const ERR_CHANOPRIVSNEEDED_NB: u16 = 482;
pub const ERR_CHANOPRIVSNEEDED_STR: &str = "You're not channel operator";

/// Not a standard RFC 1459 code but assigned the same numeric IRCv3/modern
/// servers use for an over-length input line.
pub const ERR_INPUTTOOLONG_NB: u16 = 417;
pub const ERR_INPUTTOOLONG_STR: &str = "Input line was too long";

/// Hard wire-protocol ceiling: a line including its trailing CRLF may never
/// exceed this many bytes. `limits.max_line_len` in the config may lower it,
/// never raise it.
pub const MAX_LINE_LEN: usize = 512;

/// Default per-client outbound backpressure cap.
pub const DEFAULT_OUTBOUND_CAP_BYTES: usize = 64 * 1024;

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
