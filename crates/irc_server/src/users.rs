//! Client records and the Client Registry (§3, §4.5).
//!
//! Everything here is owned exclusively by the reactor loop (§5): there is no
//! locking because there is no concurrent access. A `ClientHandle` is the one
//! stable identity channels and other clients refer to a client by — never a
//! direct reference to the `Client` struct itself (§3, "Ownership in design
//! terms").

use crate::message::FrameBuffer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

pub type ClientHandle = usize;

/// Which of PASS/NICK/USER have been seen so far, explicit rather than a
/// boolean plus implicit ordering (§9). `pass` records the submitted
/// password itself — whether it's *correct* is checked once, separately,
/// when the batch completes (§7 "Authentication failure").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRegistration {
    pub pass: Option<String>,
    pub nick: Option<String>,
    pub user: Option<(String, String, String)>, // (username, hostname, realname)
}

impl PendingRegistration {
    pub fn is_complete(&self) -> bool {
        self.pass.is_some() && self.nick.is_some() && self.user.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    JustConnected(PendingRegistration),
    Registered,
}

pub struct Client {
    pub handle: ClientHandle,
    pub addr: SocketAddr,
    pub state: RegistrationState,

    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub servername: String,
    pub realname: String,

    pub inbound: FrameBuffer,
    pub outbound: Vec<u8>,
    pub outbound_cap: usize,

    pub should_kick: bool,
    pub connected_at: Instant,
}

impl Client {
    pub fn new(handle: ClientHandle, addr: SocketAddr, max_line_len: usize, outbound_cap: usize) -> Self {
        Client {
            handle,
            addr,
            state: RegistrationState::JustConnected(PendingRegistration::default()),
            nick: String::new(),
            username: String::new(),
            hostname: String::new(),
            servername: String::new(),
            realname: String::new(),
            inbound: FrameBuffer::new(max_line_len),
            outbound: Vec::new(),
            outbound_cap,
            should_kick: false,
            connected_at: Instant::now(),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, RegistrationState::Registered)
    }

    /// Prefix used when this client's own actions are relayed to others:
    /// `nick!user@host`.
    pub fn prefix(&self) -> String {
        format!("{}!{}@{}", self.nick, self.username, self.hostname)
    }

    /// Queues bytes for the reactor to flush on the next writable event.
    /// Drops (and reports) the write if it would exceed the per-client
    /// backpressure cap (§4.7) — the connection itself is left open.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<(), ()> {
        if self.outbound.len() + bytes.len() > self.outbound_cap {
            return Err(());
        }
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }

    pub fn enqueue_line(&mut self, line: &str) -> Result<(), ()> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.enqueue(&bytes)
    }
}

/// Owns every live client, keyed by handle, with a secondary case-sensitive
/// nick index rebuilt on every successful NICK (§4.5). This is the only
/// place a `Client` is stored; every other structure in the server refers to
/// clients by `ClientHandle`.
#[derive(Default)]
pub struct ClientRegistry {
    by_handle: HashMap<ClientHandle, Client>,
    by_nick: HashMap<String, ClientHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    pub fn insert(&mut self, client: Client) {
        self.by_handle.insert(client.handle, client);
    }

    pub fn get(&self, handle: ClientHandle) -> Option<&Client> {
        self.by_handle.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ClientHandle) -> Option<&mut Client> {
        self.by_handle.get_mut(&handle)
    }

    pub fn find_by_nick(&self, nick: &str) -> Option<ClientHandle> {
        self.by_nick.get(nick).copied()
    }

    /// Removes a client entirely. Returns the removed record so callers (the
    /// dispatcher, on QUIT/KICK) can still read its nick/prefix to announce
    /// the departure before it disappears. Does not touch channel membership
    /// — that is the Channel Registry's job, driven by the same handle.
    pub fn remove(&mut self, handle: ClientHandle) -> Option<Client> {
        let client = self.by_handle.remove(&handle)?;
        if !client.nick.is_empty() {
            // only drop the index entry if it still points at this handle —
            // a stale rename could otherwise clobber a newer owner of the nick
            if self.by_nick.get(&client.nick) == Some(&handle) {
                self.by_nick.remove(&client.nick);
            }
        }
        Some(client)
    }

    /// Renames a Registered client's nick, enforcing P3 (nick uniqueness)
    /// unconditionally — see the Open Questions decision in DESIGN.md.
    pub fn rename(&mut self, handle: ClientHandle, new_nick: &str) -> Result<(), RenameError> {
        if let Some(owner) = self.by_nick.get(new_nick) {
            if *owner != handle {
                return Err(RenameError::InUse);
            }
        }
        let old_nick = {
            let client = self.by_handle.get(&handle).ok_or(RenameError::NoSuchClient)?;
            client.nick.clone()
        };
        if !old_nick.is_empty() {
            self.by_nick.remove(&old_nick);
        }
        self.by_nick.insert(new_nick.to_owned(), handle);
        self.by_handle.get_mut(&handle).unwrap().nick = new_nick.to_owned();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.by_handle.values()
    }

    pub fn handles_pending_kick(&self) -> Vec<ClientHandle> {
        self.by_handle
            .values()
            .filter(|c| c.should_kick)
            .map(|c| c.handle)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameError {
    InUse,
    NoSuchClient,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345)
    }

    #[test]
    fn insert_and_find_by_handle() {
        let mut reg = ClientRegistry::new();
        reg.insert(Client::new(1, addr(), 512, 65536));
        assert!(reg.get(1).is_some());
        assert!(reg.get(2).is_none());
    }

    #[test]
    fn rename_builds_nick_index_and_rejects_conflicts() {
        let mut reg = ClientRegistry::new();
        reg.insert(Client::new(1, addr(), 512, 65536));
        reg.insert(Client::new(2, addr(), 512, 65536));
        reg.rename(1, "alice").unwrap();
        assert_eq!(reg.find_by_nick("alice"), Some(1));
        assert_eq!(reg.rename(2, "alice"), Err(RenameError::InUse));
        reg.rename(2, "bob").unwrap();
        reg.rename(2, "alice2").unwrap();
        assert_eq!(reg.find_by_nick("bob"), None);
        assert_eq!(reg.find_by_nick("alice2"), Some(2));
    }

    #[test]
    fn remove_clears_nick_index() {
        let mut reg = ClientRegistry::new();
        reg.insert(Client::new(1, addr(), 512, 65536));
        reg.rename(1, "alice").unwrap();
        reg.remove(1);
        assert_eq!(reg.find_by_nick("alice"), None);
        assert!(reg.get(1).is_none());
    }

    #[test]
    fn enqueue_respects_backpressure_cap() {
        let mut client = Client::new(1, addr(), 512, 8);
        assert!(client.enqueue(b"1234").is_ok());
        assert!(client.enqueue(b"1234").is_ok());
        assert!(client.enqueue(b"x").is_err());
        assert_eq!(client.outbound.len(), 8);
    }
}
