//! Command Dispatcher (§4.2) and the registration sub-state machine (§4.6,
//! §9). This is where a parsed line actually changes server state and where
//! every outbound reply originates.

use crate::channels::{ChannelRegistry, Role};
use crate::config::Config;
use crate::message::{parse_line, ParsedMessage};
use crate::replies::IrcReply;
use crate::users::{Client, ClientHandle, ClientRegistry, PendingRegistration, RegistrationState, RenameError};
use log::{debug, info, warn};

/// Everything a command needs to read or mutate. Owned by the reactor loop;
/// never shared, never locked (§5).
pub struct ServerState {
    pub config: Config,
    pub password: String,
    pub clients: ClientRegistry,
    pub channels: ChannelRegistry,
}

impl ServerState {
    pub fn new(config: Config, password: String) -> Self {
        ServerState {
            config,
            password,
            clients: ClientRegistry::new(),
            channels: ChannelRegistry::with_seed_channels(),
        }
    }
}

fn current_nick(client: &Client) -> String {
    if client.nick.is_empty() {
        "*".to_owned()
    } else {
        client.nick.clone()
    }
}

fn send_reply(state: &mut ServerState, handle: ClientHandle, reply: &IrcReply) {
    let server_name = state.config.server.name.clone();
    if let Some(client) = state.clients.get_mut(handle) {
        let line = reply.render(&server_name);
        if client.enqueue(line.as_bytes()).is_err() {
            warn!(
                "outbound queue overflow for {}, dropping reply",
                current_nick(client)
            );
        }
    }
}

fn broadcast_reply(state: &mut ServerState, channel: &str, reply: &IrcReply, exclude: Option<ClientHandle>) {
    let server_name = state.config.server.name.clone();
    let line = reply.render(&server_name);
    let members: Vec<ClientHandle> = match state.channels.get(channel) {
        Some(c) => c.members.keys().copied().collect(),
        None => return,
    };
    for h in members {
        if Some(h) == exclude {
            continue;
        }
        if let Some(client) = state.clients.get_mut(h) {
            if client.enqueue(line.as_bytes()).is_err() {
                warn!(
                    "outbound queue overflow for {}, dropping broadcast",
                    current_nick(client)
                );
            }
        }
    }
}

/// Feeds one already-framed line (CRLF stripped) through the registration
/// gate and, once registered, the command table. Never blocks, never
/// panics — every branch either mutates state, enqueues a reply, or both.
pub fn dispatch_line(state: &mut ServerState, handle: ClientHandle, line: &str) {
    let Some(msg) = parse_line(line) else {
        debug!("dropping malformed line from handle {handle}");
        return;
    };

    let is_registered = match state.clients.get(handle) {
        Some(c) => c.is_registered(),
        None => return,
    };

    if is_registered {
        dispatch_registered(state, handle, msg);
    } else {
        dispatch_registration(state, handle, msg);
    }
}

fn dispatch_registration(state: &mut ServerState, handle: ClientHandle, msg: ParsedMessage) {
    match msg.command.as_str() {
        "PASS" | "NICK" | "USER" => {}
        other => {
            let nick = state
                .clients
                .get(handle)
                .map(current_nick)
                .unwrap_or_else(|| "*".to_owned());
            debug!("ignoring {other} from unregistered handle {handle}");
            send_reply(state, handle, &IrcReply::ErrNotRegistered { nick });
            return;
        }
    }

    let params = msg.all_params();
    let Some(client) = state.clients.get_mut(handle) else {
        return;
    };
    let RegistrationState::JustConnected(pending) = &mut client.state else {
        return;
    };

    match msg.command.as_str() {
        "PASS" => {
            if let Some(pass) = params.first() {
                pending.pass = Some((*pass).to_owned());
            }
        }
        "NICK" => {
            if let Some(nick) = params.first() {
                pending.nick = Some((*nick).to_owned());
            }
        }
        "USER" => {
            if params.len() >= 3 {
                let username = params[0].to_owned();
                let hostname = client.addr.ip().to_string();
                let realname = msg.trailing.clone().unwrap_or_default();
                pending.user = Some((username, hostname, realname));
            }
        }
        _ => unreachable!(),
    }

    maybe_complete_registration(state, handle);
}

fn maybe_complete_registration(state: &mut ServerState, handle: ClientHandle) {
    let Some(client) = state.clients.get(handle) else {
        return;
    };
    let RegistrationState::JustConnected(pending) = &client.state else {
        return;
    };
    if !pending.is_complete() {
        return;
    }
    let pending: PendingRegistration = pending.clone();
    let password_correct = pending.pass.as_deref() == Some(state.password.as_str());

    if !password_correct {
        info!("handle {handle} failed authentication, disconnecting silently");
        if let Some(client) = state.clients.get_mut(handle) {
            client.should_kick = true;
        }
        return;
    }

    let (username, hostname, realname) = pending.user.clone().unwrap();
    let new_nick = pending.nick.clone().unwrap();

    match state.clients.rename(handle, &new_nick) {
        Ok(()) => {}
        Err(RenameError::InUse) => {
            send_reply(
                state,
                handle,
                &IrcReply::ErrNicknameInUse {
                    nick: "*".to_owned(),
                    attempted: new_nick,
                },
            );
            // stay JustConnected; reset the nick slot so NICK can be retried
            if let Some(client) = state.clients.get_mut(handle) {
                if let RegistrationState::JustConnected(pending) = &mut client.state {
                    pending.nick = None;
                }
            }
            return;
        }
        Err(RenameError::NoSuchClient) => return,
    }

    let server_name = state.config.server.name.clone();
    let motd = state.config.server.motd.clone();
    if let Some(client) = state.clients.get_mut(handle) {
        client.username = username;
        client.hostname = hostname;
        client.realname = realname;
        client.servername = server_name.clone();
        client.state = RegistrationState::Registered;
    }

    let nick = new_nick;
    let (user, host) = {
        let client = state.clients.get(handle).unwrap();
        (client.username.clone(), client.hostname.clone())
    };
    send_reply(
        state,
        handle,
        &IrcReply::Welcome {
            nick: nick.clone(),
            user: user.clone(),
            host: host.clone(),
        },
    );
    send_reply(
        state,
        handle,
        &IrcReply::YourHost {
            nick: nick.clone(),
            servername: server_name.clone(),
            version: crate::constants::SERVER_VERSION.to_owned(),
        },
    );
    send_reply(
        state,
        handle,
        &IrcReply::Created {
            nick: nick.clone(),
            date: "at server start".to_owned(),
        },
    );
    send_reply(
        state,
        handle,
        &IrcReply::MyInfo {
            nick: nick.clone(),
            servername: server_name,
            version: crate::constants::SERVER_VERSION.to_owned(),
        },
    );
    if !motd.is_empty() {
        send_reply(state, handle, &IrcReply::Motd { nick, text: motd });
    }
}

fn dispatch_registered(state: &mut ServerState, handle: ClientHandle, msg: ParsedMessage) {
    match msg.command.as_str() {
        "NICK" => handle_nick(state, handle, &msg),
        "JOIN" => handle_join(state, handle, &msg),
        "PART" => handle_part(state, handle, &msg),
        "WHO" => handle_who(state, handle, &msg),
        "MODE" => handle_mode(state, handle, &msg),
        "PRIVMSG" => handle_privmsg(state, handle, &msg),
        "TOPIC" => handle_topic(state, handle, &msg),
        "INVITE" => handle_invite(state, handle, &msg),
        "KICK" => handle_kick(state, handle, &msg),
        "PING" => handle_ping(state, handle, &msg),
        "QUIT" => handle_quit(state, handle, &msg),
        other => {
            let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
            send_reply(
                state,
                handle,
                &IrcReply::ErrUnknownCommand {
                    nick,
                    command: other.to_owned(),
                },
            );
        }
    }
}

/// Called by the reactor when a client's frame buffer rejects a line for
/// exceeding the wire length ceiling (§4.1).
pub fn notify_input_too_long(state: &mut ServerState, handle: ClientHandle) {
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    send_reply(state, handle, &IrcReply::ErrInputTooLong { nick });
}

fn need_more_params(state: &mut ServerState, handle: ClientHandle, command: &str) {
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    send_reply(
        state,
        handle,
        &IrcReply::ErrNeedMoreParams {
            nick,
            command: command.to_owned(),
        },
    );
}

fn handle_nick(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(new_nick) = params.first() else {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        send_reply(state, handle, &IrcReply::ErrNoNicknameGiven { nick });
        return;
    };
    let new_nick = new_nick.to_string();

    let old_prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
    let channels_to_notify = state.channels.member_channels(handle);

    match state.clients.rename(handle, &new_nick) {
        Ok(()) => {
            let reply = IrcReply::Nick {
                old_prefix,
                new_nick,
            };
            send_reply(state, handle, &reply);
            for channel in channels_to_notify {
                broadcast_reply(state, &channel, &reply, Some(handle));
            }
        }
        Err(RenameError::InUse) => {
            let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
            send_reply(
                state,
                handle,
                &IrcReply::ErrNicknameInUse {
                    nick,
                    attempted: new_nick,
                },
            );
        }
        Err(RenameError::NoSuchClient) => {}
    }
}

fn handle_join(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(chan_list) = params.first() else {
        need_more_params(state, handle, "JOIN");
        return;
    };
    let channels: Vec<&str> = chan_list.split(',').collect();
    let keys: Vec<&str> = params.get(1).map(|k| k.split(',').collect()).unwrap_or_default();

    for (i, chan_name) in channels.iter().enumerate() {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        let Some(channel) = state.channels.get(chan_name) else {
            send_reply(
                state,
                handle,
                &IrcReply::ErrNoSuchChannel {
                    nick,
                    channel: (*chan_name).to_owned(),
                },
            );
            continue;
        };
        let already_member = channel.is_member(handle);
        let blocked_by_invite = channel.modes.invite_only && !channel.invited.contains(&handle);
        let required_key = channel.modes.key.clone();
        let is_full = channel.is_full();

        if already_member {
            continue;
        }
        if blocked_by_invite {
            send_reply(
                state,
                handle,
                &IrcReply::ErrInviteOnlyChan {
                    nick,
                    channel: (*chan_name).to_owned(),
                },
            );
            continue;
        }
        if let Some(required) = &required_key {
            let supplied = keys.get(i).copied();
            if supplied != Some(required.as_str()) {
                send_reply(
                    state,
                    handle,
                    &IrcReply::ErrBadChannelKey {
                        nick,
                        channel: (*chan_name).to_owned(),
                    },
                );
                continue;
            }
        }
        if is_full {
            send_reply(
                state,
                handle,
                &IrcReply::ErrChannelIsFull {
                    nick,
                    channel: (*chan_name).to_owned(),
                },
            );
            continue;
        }

        state.channels.get_mut(chan_name).unwrap().add_member(handle);

        let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
        broadcast_reply(
            state,
            chan_name,
            &IrcReply::Join {
                prefix,
                channel: (*chan_name).to_owned(),
            },
            None,
        );

        let topic = state.channels.get(chan_name).unwrap().topic.clone();
        if topic.is_empty() {
            send_reply(
                state,
                handle,
                &IrcReply::NoTopic {
                    nick: nick.clone(),
                    channel: (*chan_name).to_owned(),
                },
            );
        } else {
            send_reply(
                state,
                handle,
                &IrcReply::Topic {
                    nick: nick.clone(),
                    channel: (*chan_name).to_owned(),
                    topic,
                },
            );
        }

        send_names(state, handle, chan_name);
    }
}

fn send_names(state: &mut ServerState, handle: ClientHandle, chan_name: &str) {
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    let Some(channel) = state.channels.get(chan_name) else {
        return;
    };
    let mut names: Vec<String> = channel
        .members
        .iter()
        .filter_map(|(h, role)| {
            state
                .clients
                .get(*h)
                .map(|c| format!("{}{}", role.prefix_char(), c.nick))
        })
        .collect();
    names.sort();
    send_reply(
        state,
        handle,
        &IrcReply::Names {
            nick: nick.clone(),
            channel: chan_name.to_owned(),
            names,
        },
    );
    send_reply(
        state,
        handle,
        &IrcReply::EndOfNames {
            nick,
            channel: chan_name.to_owned(),
        },
    );
}

fn handle_part(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(chan_list) = params.first() else {
        need_more_params(state, handle, "PART");
        return;
    };
    let reason = msg.trailing.clone();
    let channels: Vec<String> = chan_list.split(',').map(str::to_owned).collect();

    for chan_name in channels {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        let Some(channel) = state.channels.get(&chan_name) else {
            send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
            continue;
        };
        if !channel.is_member(handle) {
            send_reply(state, handle, &IrcReply::ErrNotOnChannel { nick, channel: chan_name });
            continue;
        }
        let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
        broadcast_reply(
            state,
            &chan_name,
            &IrcReply::Part {
                prefix,
                channel: chan_name.clone(),
                reason: reason.clone(),
            },
            None,
        );
        state.channels.get_mut(&chan_name).unwrap().remove_member(handle);
    }
}

fn handle_who(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(chan_name) = params.first().map(|s| s.to_string()) else {
        need_more_params(state, handle, "WHO");
        return;
    };
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    let Some(channel) = state.channels.get(&chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
        return;
    };

    let server_name = state.config.server.name.clone();
    let members: Vec<(ClientHandle, Role)> = channel.members.iter().map(|(h, r)| (*h, *r)).collect();
    for (member_handle, role) in members {
        let Some(member) = state.clients.get(member_handle) else {
            continue;
        };
        let reply = IrcReply::WhoReply {
            nick: nick.clone(),
            channel: chan_name.clone(),
            member_nick: member.nick.clone(),
            username: member.username.clone(),
            host: member.hostname.clone(),
            servername: server_name.clone(),
            flags: format!("H{}", role.prefix_char()),
            realname: member.realname.clone(),
        };
        send_reply(state, handle, &reply);
    }
    send_reply(state, handle, &IrcReply::EndOfWho { nick, channel: chan_name });
}

/// Parses a MODE change string like `+itk-l` into `(sign, flag)` pairs.
fn parse_mode_changes(modes: &str) -> Vec<(char, char)> {
    let mut out = Vec::new();
    let mut sign = '+';
    for c in modes.chars() {
        match c {
            '+' | '-' => sign = c,
            other => out.push((sign, other)),
        }
    }
    out
}

fn handle_mode(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(chan_name) = params.first().map(|s| s.to_string()) else {
        need_more_params(state, handle, "MODE");
        return;
    };
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    let Some(channel) = state.channels.get(&chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
        return;
    };

    if params.len() < 2 {
        let modes = channel.modes.flags_string();
        send_reply(state, handle, &IrcReply::ChannelModeIs { nick, channel: chan_name, modes });
        return;
    }

    let role = channel.role_of(handle);
    if !role.is_some_and(Role::is_privileged) {
        send_reply(state, handle, &IrcReply::ErrChanOPrivsNeeded { nick, channel: chan_name });
        return;
    }

    let changes = parse_mode_changes(params[1]);
    let mut extra_params = params[2..].iter();
    let mut applied = String::new();
    let mut current_sign = '\0';

    for (sign, flag) in changes {
        match flag {
            'i' | 't' | 'k' | 'l' | 'o' => {}
            unknown => {
                send_reply(state, handle, &IrcReply::ErrUnknownMode { nick: nick.clone(), modechar: unknown });
                continue;
            }
        }

        let channel = state.channels.get_mut(&chan_name).unwrap();
        match flag {
            'i' => channel.modes.invite_only = sign == '+',
            't' => channel.modes.topic_locked = sign == '+',
            'k' => {
                if sign == '+' {
                    channel.modes.key = extra_params.next().map(|s| (*s).to_owned());
                } else {
                    channel.modes.key = None;
                }
            }
            'l' => {
                if sign == '+' {
                    channel.modes.limit = extra_params
                        .next()
                        .and_then(|s| s.parse::<usize>().ok());
                } else {
                    channel.modes.limit = None;
                }
            }
            'o' => {
                if let Some(target_nick) = extra_params.next() {
                    if let Some(target_handle) = state.clients.find_by_nick(target_nick) {
                        let channel = state.channels.get_mut(&chan_name).unwrap();
                        if channel.is_member(target_handle) {
                            let new_role = if sign == '+' { Role::Operator } else { Role::Plain };
                            channel.set_role(target_handle, new_role);
                        }
                    }
                }
            }
            _ => unreachable!(),
        }

        if sign != current_sign {
            applied.push(sign);
            current_sign = sign;
        }
        applied.push(flag);
    }

    if !applied.is_empty() {
        let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
        broadcast_reply(
            state,
            &chan_name,
            &IrcReply::ModeChanged { prefix, channel: chan_name, change: applied },
            None,
        );
    }
}

fn handle_privmsg(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(target_list) = params.first() else {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        send_reply(state, handle, &IrcReply::ErrNoRecipient { nick, command: "PRIVMSG".to_owned() });
        return;
    };
    let Some(text) = msg.trailing.clone().filter(|t| !t.is_empty()) else {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        send_reply(state, handle, &IrcReply::ErrNoTextToSend { nick });
        return;
    };

    let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();

    for target in target_list.split(',') {
        let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
        if let Some(chan_name) = target.strip_prefix(['@', '~']) {
            deliver_channel_privmsg(state, handle, &prefix, target, chan_name, &text, true);
        } else if target.starts_with('#') {
            deliver_channel_privmsg(state, handle, &prefix, target, target, &text, false);
        } else {
            let Some(target_handle) = state.clients.find_by_nick(target) else {
                send_reply(state, handle, &IrcReply::ErrNoSuchNick { nick, target: target.to_owned() });
                continue;
            };
            let reply = IrcReply::PrivMsg {
                prefix: prefix.clone(),
                target: target.to_owned(),
                text: text.clone(),
            };
            send_reply(state, target_handle, &reply);
        }
    }
}

fn deliver_channel_privmsg(
    state: &mut ServerState,
    handle: ClientHandle,
    prefix: &str,
    wire_target: &str,
    chan_name: &str,
    text: &str,
    restrict_to_operators: bool,
) {
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    let Some(channel) = state.channels.get(chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name.to_owned() });
        return;
    };
    if !channel.is_member(handle) {
        send_reply(state, handle, &IrcReply::ErrCannotSendToChan { nick, channel: chan_name.to_owned() });
        return;
    }

    let recipients: Vec<ClientHandle> = channel
        .members
        .iter()
        .filter(|(h, role)| **h != handle && (!restrict_to_operators || role.is_privileged()))
        .map(|(h, _)| *h)
        .collect();

    let reply = IrcReply::PrivMsg {
        prefix: prefix.to_owned(),
        target: wire_target.to_owned(),
        text: text.to_owned(),
    };
    for recipient in recipients {
        send_reply(state, recipient, &reply);
    }
}

fn handle_topic(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let Some(chan_name) = params.first().map(|s| s.to_string()) else {
        need_more_params(state, handle, "TOPIC");
        return;
    };
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();
    let Some(channel) = state.channels.get(&chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
        return;
    };

    if msg.trailing.is_none() && params.len() < 2 {
        if channel.topic.is_empty() {
            send_reply(state, handle, &IrcReply::NoTopic { nick, channel: chan_name });
        } else {
            let topic = channel.topic.clone();
            send_reply(state, handle, &IrcReply::Topic { nick, channel: chan_name, topic });
        }
        return;
    }

    let role = channel.role_of(handle);
    if channel.modes.topic_locked && !role.is_some_and(Role::is_privileged) {
        send_reply(state, handle, &IrcReply::ErrChanOPrivsNeeded { nick, channel: chan_name });
        return;
    }

    let new_topic = msg.trailing.clone().unwrap_or_default();
    state.channels.get_mut(&chan_name).unwrap().topic = new_topic.clone();

    let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
    broadcast_reply(
        state,
        &chan_name,
        &IrcReply::TopicChanged { prefix, channel: chan_name, topic: new_topic },
        None,
    );
}

fn handle_invite(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    if params.len() < 2 {
        need_more_params(state, handle, "INVITE");
        return;
    }
    let target_nick = params[0].to_string();
    let chan_name = params[1].to_string();
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();

    let Some(channel) = state.channels.get(&chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
        return;
    };
    if !channel.is_member(handle) {
        send_reply(state, handle, &IrcReply::ErrNotOnChannel { nick, channel: chan_name });
        return;
    }
    let role = channel.role_of(handle);
    if channel.modes.invite_only && !role.is_some_and(Role::is_privileged) {
        send_reply(state, handle, &IrcReply::ErrChanOPrivsNeeded { nick, channel: chan_name });
        return;
    }
    let Some(target_handle) = state.clients.find_by_nick(&target_nick) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchNick { nick, target: target_nick });
        return;
    };
    if channel.is_member(target_handle) {
        send_reply(state, handle, &IrcReply::ErrUserOnChannel { nick, target: target_nick, channel: chan_name });
        return;
    }

    state.channels.get_mut(&chan_name).unwrap().invited.insert(target_handle);

    let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
    send_reply(
        state,
        target_handle,
        &IrcReply::Invite { prefix, target_nick: target_nick.clone(), channel: chan_name.clone() },
    );
    send_reply(state, handle, &IrcReply::Inviting { nick, target_nick, channel: chan_name });
}

fn handle_kick(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    if params.len() < 2 {
        need_more_params(state, handle, "KICK");
        return;
    }
    let chan_name = params[0].to_string();
    let target_nick = params[1].to_string();
    let reason = msg.trailing.clone();
    let nick = state.clients.get(handle).map(current_nick).unwrap_or_default();

    let Some(channel) = state.channels.get(&chan_name) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchChannel { nick, channel: chan_name });
        return;
    };
    let role = channel.role_of(handle);
    if !role.is_some_and(Role::is_privileged) {
        send_reply(state, handle, &IrcReply::ErrChanOPrivsNeeded { nick, channel: chan_name });
        return;
    }
    let Some(target_handle) = state.clients.find_by_nick(&target_nick) else {
        send_reply(state, handle, &IrcReply::ErrNoSuchNick { nick, target: target_nick });
        return;
    };
    if !channel.is_member(target_handle) {
        send_reply(state, handle, &IrcReply::ErrUserNotInChannel { nick, target: target_nick, channel: chan_name });
        return;
    }

    let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
    broadcast_reply(
        state,
        &chan_name,
        &IrcReply::Kick { prefix, channel: chan_name.clone(), kicked_nick: target_nick, reason },
        None,
    );
    state.channels.get_mut(&chan_name).unwrap().remove_member(target_handle);
}

fn handle_ping(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let params = msg.all_params();
    let token = params.first().map(|s| (*s).to_owned()).unwrap_or_default();
    let servername = state.config.server.name.clone();
    send_reply(state, handle, &IrcReply::Pong { servername, token });
}

fn handle_quit(state: &mut ServerState, handle: ClientHandle, msg: &ParsedMessage) {
    let reason = msg.trailing.clone();
    let prefix = state.clients.get(handle).map(Client::prefix).unwrap_or_default();
    let channels_left = state.channels.remove_member_everywhere(handle);

    let reply = IrcReply::Quit { prefix, reason };
    for channel in channels_left {
        broadcast_reply(state, &channel, &reply, None);
    }

    if let Some(client) = state.clients.get_mut(handle) {
        let line = format!("ERROR :Closing Link: {}\r\n", client.hostname);
        let _ = client.enqueue(line.as_bytes());
        client.should_kick = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000)
    }

    fn fresh_state() -> ServerState {
        ServerState::new(Config::default(), "secret".to_owned())
    }

    fn connect(state: &mut ServerState, handle: ClientHandle) {
        state.clients.insert(Client::new(handle, addr(), 512, 65536));
    }

    fn register(state: &mut ServerState, handle: ClientHandle, nick: &str) {
        dispatch_line(state, handle, "PASS secret");
        dispatch_line(state, handle, &format!("NICK {nick}"));
        dispatch_line(state, handle, &format!("USER {nick} 0 * :{nick} Realname"));
    }

    fn drain_outbound(state: &mut ServerState, handle: ClientHandle) -> String {
        let client = state.clients.get_mut(handle).unwrap();
        let text = String::from_utf8_lossy(&client.outbound).into_owned();
        client.outbound.clear();
        text
    }

    #[test]
    fn scenario_basic_registration() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        let out = drain_outbound(&mut state, 1);
        assert!(out.contains(" 001 alice :Welcome"));
        assert!(state.clients.get(1).unwrap().is_registered());
    }

    #[test]
    fn scenario_bad_password_disconnects_silently() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        dispatch_line(&mut state, 1, "PASS wrong");
        dispatch_line(&mut state, 1, "NICK bob");
        dispatch_line(&mut state, 1, "USER b 0 * :B");
        let out = drain_outbound(&mut state, 1);
        assert!(out.is_empty());
        assert!(state.clients.get(1).unwrap().should_kick);
    }

    #[test]
    fn scenario_join_with_key() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);

        dispatch_line(&mut state, 1, "JOIN #hmeftah wrong");
        assert!(drain_outbound(&mut state, 1).contains("475"));

        dispatch_line(&mut state, 1, "JOIN #hmeftah hmeftah");
        let out = drain_outbound(&mut state, 1);
        assert!(out.contains("JOIN #hmeftah"));
        assert!(out.contains("353"));
        assert!(out.contains("366"));
    }

    #[test]
    fn scenario_channel_privmsg_fanout_excludes_sender() {
        let mut state = fresh_state();
        for (h, nick) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            connect(&mut state, h);
            register(&mut state, h, nick);
            drain_outbound(&mut state, h);
            dispatch_line(&mut state, h, "JOIN #general");
            drain_outbound(&mut state, h);
        }

        dispatch_line(&mut state, 1, "PRIVMSG #general :hello all");
        assert_eq!(drain_outbound(&mut state, 1), "");
        let bob_out = drain_outbound(&mut state, 2);
        assert!(bob_out.contains("PRIVMSG #general :hello all"));
        assert!(drain_outbound(&mut state, 3).contains("PRIVMSG #general :hello all"));
    }

    #[test]
    fn scenario_kick_by_operator() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        dispatch_line(&mut state, 1, "JOIN #general");
        drain_outbound(&mut state, 1);

        connect(&mut state, 2);
        register(&mut state, 2, "bob");
        drain_outbound(&mut state, 2);
        dispatch_line(&mut state, 2, "JOIN #general");
        drain_outbound(&mut state, 1);
        drain_outbound(&mut state, 2);

        dispatch_line(&mut state, 1, "KICK #general bob :bye");
        let alice_out = drain_outbound(&mut state, 1);
        let bob_out = drain_outbound(&mut state, 2);
        assert!(alice_out.contains("KICK #general bob :bye"));
        assert!(bob_out.contains("KICK #general bob :bye"));
        assert!(!state.channels.get("#general").unwrap().is_member(2));
    }

    #[test]
    fn scenario_quit_broadcast_to_all_member_channels() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        dispatch_line(&mut state, 1, "JOIN #general");
        dispatch_line(&mut state, 1, "JOIN #random");
        drain_outbound(&mut state, 1);

        connect(&mut state, 2);
        register(&mut state, 2, "bob");
        drain_outbound(&mut state, 2);
        dispatch_line(&mut state, 2, "JOIN #general");
        drain_outbound(&mut state, 2);

        dispatch_line(&mut state, 1, "QUIT :later");
        let bob_out = drain_outbound(&mut state, 2);
        assert!(bob_out.contains("QUIT :later"));
        assert!(state.clients.get(1).unwrap().should_kick);
        assert!(!state.channels.get("#general").unwrap().is_member(1));
    }

    #[test]
    fn nick_uniqueness_is_enforced_post_registration() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        connect(&mut state, 2);
        register(&mut state, 2, "bob");
        drain_outbound(&mut state, 2);

        dispatch_line(&mut state, 2, "NICK alice");
        assert!(drain_outbound(&mut state, 2).contains("433"));
        assert_eq!(state.clients.get(2).unwrap().nick, "bob");
    }

    #[test]
    fn mode_invite_only_round_trips_to_original_value() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        dispatch_line(&mut state, 1, "JOIN #general");
        drain_outbound(&mut state, 1);

        dispatch_line(&mut state, 1, "MODE #general +i");
        assert!(state.channels.get("#general").unwrap().modes.invite_only);
        drain_outbound(&mut state, 1);
        dispatch_line(&mut state, 1, "MODE #general -i");
        assert!(!state.channels.get("#general").unwrap().modes.invite_only);
    }

    #[test]
    fn join_then_part_leaves_membership_unchanged() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        let before = state.channels.get("#general").unwrap().member_count();
        dispatch_line(&mut state, 1, "JOIN #general");
        dispatch_line(&mut state, 1, "PART #general");
        let after = state.channels.get("#general").unwrap().member_count();
        assert_eq!(before, after);
    }

    #[test]
    fn privmsg_with_spaces_preserves_them() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        connect(&mut state, 2);
        register(&mut state, 2, "bob");
        drain_outbound(&mut state, 2);

        dispatch_line(&mut state, 1, "PRIVMSG bob :hi   there   friend");
        assert!(drain_outbound(&mut state, 2).contains("hi   there   friend"));
    }

    #[test]
    fn overlong_line_notification_reaches_the_client() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);

        notify_input_too_long(&mut state, 1);
        assert!(drain_outbound(&mut state, 1).contains("417"));
    }

    #[test]
    fn privmsg_restricted_to_operators_excludes_plain_members() {
        let mut state = fresh_state();
        connect(&mut state, 1);
        register(&mut state, 1, "alice");
        drain_outbound(&mut state, 1);
        dispatch_line(&mut state, 1, "JOIN #general");
        drain_outbound(&mut state, 1);

        connect(&mut state, 2);
        register(&mut state, 2, "bob");
        drain_outbound(&mut state, 2);
        dispatch_line(&mut state, 2, "JOIN #general");
        drain_outbound(&mut state, 1);
        drain_outbound(&mut state, 2);

        dispatch_line(&mut state, 1, "PRIVMSG @#general :ops only");
        assert_eq!(drain_outbound(&mut state, 2), "");
    }
}
