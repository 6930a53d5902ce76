//! Reply Formatter (§4.3, §6): byte-exact rendering of the numeric and
//! textual reply templates this server emits. Every variant is a pure
//! function of its fields — formatting never touches the registries.

use crate::constants::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcReply {
    // Registration burst
    Welcome { nick: String, user: String, host: String },
    YourHost { nick: String, servername: String, version: String },
    Created { nick: String, date: String },
    MyInfo { nick: String, servername: String, version: String },
    Motd { nick: String, text: String },

    // Relayed, not server-numeric: rendered with a user prefix rather than the server name.
    Nick { old_prefix: String, new_nick: String },
    Join { prefix: String, channel: String },
    Part { prefix: String, channel: String, reason: Option<String> },
    Quit { prefix: String, reason: Option<String> },
    PrivMsg { prefix: String, target: String, text: String },
    TopicChanged { prefix: String, channel: String, topic: String },
    Invite { prefix: String, target_nick: String, channel: String },
    Kick { prefix: String, channel: String, kicked_nick: String, reason: Option<String> },
    ModeChanged { prefix: String, channel: String, change: String },
    Pong { servername: String, token: String },

    // Channel query replies
    Topic { nick: String, channel: String, topic: String },
    NoTopic { nick: String, channel: String },
    ChannelModeIs { nick: String, channel: String, modes: String },
    Names { nick: String, channel: String, names: Vec<String> },
    EndOfNames { nick: String, channel: String },
    WhoReply { nick: String, channel: String, member_nick: String, username: String, host: String, servername: String, flags: String, realname: String },
    EndOfWho { nick: String, channel: String },
    Inviting { nick: String, target_nick: String, channel: String },

    // Errors
    ErrNoSuchNick { nick: String, target: String },
    ErrNoSuchChannel { nick: String, channel: String },
    ErrCannotSendToChan { nick: String, channel: String },
    ErrNoRecipient { nick: String, command: String },
    ErrNoTextToSend { nick: String },
    ErrUnknownCommand { nick: String, command: String },
    ErrNoNicknameGiven { nick: String },
    ErrNicknameInUse { nick: String, attempted: String },
    ErrUserNotInChannel { nick: String, target: String, channel: String },
    ErrNotOnChannel { nick: String, channel: String },
    ErrUserOnChannel { nick: String, target: String, channel: String },
    ErrNotRegistered { nick: String },
    ErrNeedMoreParams { nick: String, command: String },
    ErrAlreadyRegistred { nick: String },
    ErrChannelIsFull { nick: String, channel: String },
    ErrUnknownMode { nick: String, modechar: char },
    ErrInviteOnlyChan { nick: String, channel: String },
    ErrBannedFromChan { nick: String, channel: String },
    ErrBadChannelKey { nick: String, channel: String },
    ErrChanOPrivsNeeded { nick: String, channel: String },
    ErrInputTooLong { nick: String },
}

impl IrcReply {
    /// Renders the reply as a complete line, CRLF included, ready to be
    /// queued on a client's outbound buffer.
    pub fn render(&self, server_name: &str) -> String {
        format!("{}\r\n", self.format(server_name))
    }

    fn format(&self, srv: &str) -> String {
        match self {
            IrcReply::Welcome { nick, user, host } => format!(
                ":{srv} {RPL_WELCOME_NB:03} {nick} :{RPL_WELCOME_STR} {nick}!{user}@{host}"
            ),
            IrcReply::YourHost { nick, servername, version } => format!(
                ":{srv} {RPL_YOURHOST_NB:03} {nick} :Your host is {servername}, running version {version}"
            ),
            IrcReply::Created { nick, date } => format!(
                ":{srv} {RPL_CREATED_NB:03} {nick} :This server was created {date}"
            ),
            IrcReply::MyInfo { nick, servername, version } => format!(
                ":{srv} {RPL_MYINFO_NB:03} {nick} {servername} {version} o itkl"
            ),
            IrcReply::Motd { nick, text } => format!(":{srv} NOTICE {nick} :{text}"),

            IrcReply::Nick { old_prefix, new_nick } => format!(":{old_prefix} NICK :{new_nick}"),
            IrcReply::Join { prefix, channel } => format!(":{prefix} JOIN {channel}"),
            IrcReply::Part { prefix, channel, reason } => match reason {
                Some(r) => format!(":{prefix} PART {channel} :{r}"),
                None => format!(":{prefix} PART {channel}"),
            },
            IrcReply::Quit { prefix, reason } => match reason {
                Some(r) => format!(":{prefix} QUIT :{r}"),
                None => format!(":{prefix} QUIT :Client Quit"),
            },
            IrcReply::PrivMsg { prefix, target, text } => {
                format!(":{prefix} PRIVMSG {target} :{text}")
            }
            IrcReply::TopicChanged { prefix, channel, topic } => {
                format!(":{prefix} TOPIC {channel} :{topic}")
            }
            IrcReply::Invite { prefix, target_nick, channel } => {
                format!(":{prefix} INVITE {target_nick} {channel}")
            }
            IrcReply::Kick { prefix, channel, kicked_nick, reason } => match reason {
                Some(r) => format!(":{prefix} KICK {channel} {kicked_nick} :{r}"),
                None => format!(":{prefix} KICK {channel} {kicked_nick} :{kicked_nick}"),
            },
            IrcReply::ModeChanged { prefix, channel, change } => {
                format!(":{prefix} MODE {channel} {change}")
            }
            IrcReply::Pong { servername, token } => format!("PONG {servername} :{token}"),

            IrcReply::Topic { nick, channel, topic } => {
                format!(":{srv} {RPL_TOPIC_NB:03} {nick} {channel} :{topic}")
            }
            IrcReply::NoTopic { nick, channel } => {
                format!(":{srv} {RPL_NOTOPIC_NB:03} {nick} {channel} :{RPL_NOTOPIC_STR}")
            }
            IrcReply::ChannelModeIs { nick, channel, modes } => {
                format!(":{srv} {RPL_CHANNELMODEIS_NB:03} {nick} {channel} {modes}")
            }
            IrcReply::Names { nick, channel, names } => {
                format!(":{srv} {RPL_NAMREPLY_NB:03} {nick} = {channel} :{}", names.join(" "))
            }
            IrcReply::EndOfNames { nick, channel } => format!(
                ":{srv} {RPL_ENDOFNAMES_NB:03} {nick} {channel} :{RPL_ENDOFNAMES_STR}"
            ),
            IrcReply::WhoReply {
                nick, channel, member_nick, username, host, servername, flags, realname,
            } => format!(
                ":{srv} {RPL_WHOREPLY_NB:03} {nick} {channel} {username} {host} {servername} {member_nick} {flags} :0 {realname}"
            ),
            IrcReply::EndOfWho { nick, channel } => format!(
                ":{srv} {RPL_ENDOFWHO_NB:03} {nick} {channel} :{RPL_ENDOFWHO_STR}"
            ),
            IrcReply::Inviting { nick, target_nick, channel } => format!(
                ":{srv} {RPL_INVITING_NB:03} {nick} {target_nick} {channel}"
            ),

            IrcReply::ErrNoSuchNick { nick, target } => format!(
                ":{srv} {ERR_NOSUCHNICK_NB:03} {nick} {target} :{ERR_NOSUCHNICK_STR}"
            ),
            IrcReply::ErrNoSuchChannel { nick, channel } => format!(
                ":{srv} {ERR_NOSUCHCHANNEL_NB:03} {nick} {channel} :{ERR_NOSUCHCHANNEL_STR}"
            ),
            IrcReply::ErrCannotSendToChan { nick, channel } => format!(
                ":{srv} {ERR_CANNOTSENDTOCHAN_NB:03} {nick} {channel} :{ERR_CANNOTSENDTOCHAN_STR}"
            ),
            IrcReply::ErrNoRecipient { nick, command } => format!(
                ":{srv} {ERR_NORECIPIENT_NB:03} {nick} :{ERR_NORECIPIENT_STR} ({command})"
            ),
            IrcReply::ErrNoTextToSend { nick } => format!(
                ":{srv} {ERR_NOTEXTTOSEND_NB:03} {nick} :{ERR_NOTEXTTOSEND_STR}"
            ),
            IrcReply::ErrUnknownCommand { nick, command } => format!(
                ":{srv} {ERR_UNKNOWNCOMMAND_NB:03} {nick} {command} :{ERR_UNKNOWNCOMMAND_STR}"
            ),
            IrcReply::ErrNoNicknameGiven { nick } => format!(
                ":{srv} {ERR_NONICKNAMEGIVEN_NB:03} {nick} :{ERR_NONICKNAMEGIVEN_STR}"
            ),
            IrcReply::ErrNicknameInUse { nick, attempted } => format!(
                ":{srv} {ERR_NICKNAMEINUSE_NB:03} {nick} {attempted} :{ERR_NICKNAMEINUSE_STR}"
            ),
            IrcReply::ErrUserNotInChannel { nick, target, channel } => format!(
                ":{srv} {ERR_USERNOTINCHANNEL_NB:03} {nick} {target} {channel} :{ERR_USERNOTINCHANNEL_STR}"
            ),
            IrcReply::ErrNotOnChannel { nick, channel } => format!(
                ":{srv} {ERR_NOTONCHANNEL_NB:03} {nick} {channel} :{ERR_NOTONCHANNEL_STR}"
            ),
            IrcReply::ErrUserOnChannel { nick, target, channel } => format!(
                ":{srv} {ERR_USERONCHANNEL_NB:03} {nick} {target} {channel} :{ERR_USERONCHANNEL_STR}"
            ),
            IrcReply::ErrNotRegistered { nick } => format!(
                ":{srv} {ERR_NOTREGISTERED_NB:03} {nick} :{ERR_NOTREGISTERED_STR}"
            ),
            IrcReply::ErrNeedMoreParams { nick, command } => format!(
                ":{srv} {ERR_NEEDMOREPARAMS_NB:03} {nick} {command} :{ERR_NEEDMOREPARAMS_STR}"
            ),
            IrcReply::ErrAlreadyRegistred { nick } => format!(
                ":{srv} {ERR_ALREADYREGISTRED_NB:03} {nick} :{ERR_ALREADYREGISTRED_STR}"
            ),
            IrcReply::ErrChannelIsFull { nick, channel } => format!(
                ":{srv} {ERR_CHANNELISFULL_NB:03} {nick} {channel} :{ERR_CHANNELISFULL_STR}"
            ),
            IrcReply::ErrUnknownMode { nick, modechar } => format!(
                ":{srv} {ERR_UNKNOWNMODE_NB:03} {nick} {modechar} :{ERR_UNKNOWNMODE_STR}"
            ),
            IrcReply::ErrInviteOnlyChan { nick, channel } => format!(
                ":{srv} {ERR_INVITEONLYCHAN_NB:03} {nick} {channel} :{ERR_INVITEONLYCHAN_STR}"
            ),
            IrcReply::ErrBannedFromChan { nick, channel } => format!(
                ":{srv} {ERR_BANNEDFROMCHAN_NB:03} {nick} {channel} :{ERR_BANNEDFROMCHAN_STR}"
            ),
            IrcReply::ErrBadChannelKey { nick, channel } => format!(
                ":{srv} {ERR_BADCHANNELKEY_NB:03} {nick} {channel} :{ERR_BADCHANNELKEY_STR}"
            ),
            IrcReply::ErrChanOPrivsNeeded { nick, channel } => format!(
                ":{srv} {ERR_CHANOPRIVSNEEDED_NB:03} {nick} {channel} :{ERR_CHANOPRIVSNEEDED_STR}"
            ),
            IrcReply::ErrInputTooLong { nick } => format!(
                ":{srv} {ERR_INPUTTOOLONG_NB:03} {nick} :{ERR_INPUTTOOLONG_STR}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_matches_the_wire_template() {
        let reply = IrcReply::Welcome {
            nick: "alice".into(),
            user: "a".into(),
            host: "host".into(),
        };
        assert_eq!(
            reply.render("localhost"),
            ":localhost 001 alice :Welcome to the Internet Relay Network alice!a@host\r\n"
        );
    }

    #[test]
    fn bad_channel_key_matches_rfc_numeric() {
        let reply = IrcReply::ErrBadChannelKey {
            nick: "bob".into(),
            channel: "#hmeftah".into(),
        };
        assert_eq!(
            reply.render("localhost"),
            ":localhost 475 bob #hmeftah :Cannot join channel (+k)\r\n"
        );
    }

    #[test]
    fn privmsg_preserves_internal_spaces() {
        let reply = IrcReply::PrivMsg {
            prefix: "alice!a@host".into(),
            target: "#general".into(),
            text: "hello   there".into(),
        };
        assert_eq!(
            reply.render("localhost"),
            ":alice!a@host PRIVMSG #general :hello   there\r\n"
        );
    }

    #[test]
    fn names_joins_with_prefix_chars() {
        let reply = IrcReply::Names {
            nick: "alice".into(),
            channel: "#general".into(),
            names: vec!["~alice".into(), "bob".into()],
        };
        assert_eq!(
            reply.render("localhost"),
            ":localhost 353 alice = #general :~alice bob\r\n"
        );
    }

    #[test]
    fn every_rendered_line_ends_in_crlf() {
        let reply = IrcReply::ErrNotRegistered { nick: "*".into() };
        let rendered = reply.render("localhost");
        assert!(rendered.ends_with("\r\n"));
        assert_eq!(rendered.matches("\r\n").count(), 1);
    }
}
