//! Channel state and the Channel Registry (§3, §4.4).

use crate::users::ClientHandle;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Plain,
    Operator,
    Founder,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Operator | Role::Founder)
    }

    /// The prefix shown in RPL_NAMREPLY / WHO output.
    pub fn prefix_char(self) -> &'static str {
        match self {
            Role::Founder => "~",
            Role::Operator => "@",
            Role::Plain => "",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelModes {
    pub invite_only: bool,  // +i
    pub topic_locked: bool, // +t, topic changes restricted to operators
    pub key: Option<String>,
    pub limit: Option<usize>,
}

impl ChannelModes {
    /// Renders the currently-set flags as a MODE string, e.g. `+itk`.
    pub fn flags_string(&self) -> String {
        let mut flags = String::from("+");
        if self.invite_only {
            flags.push('i');
        }
        if self.topic_locked {
            flags.push('t');
        }
        if self.key.is_some() {
            flags.push('k');
        }
        if self.limit.is_some() {
            flags.push('l');
        }
        flags
    }
}

pub struct Channel {
    pub name: String,
    pub topic: String,
    pub members: HashMap<ClientHandle, Role>,
    pub invited: std::collections::HashSet<ClientHandle>,
    pub modes: ChannelModes,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Channel {
            name: name.into(),
            topic: String::new(),
            members: HashMap::new(),
            invited: std::collections::HashSet::new(),
            modes: ChannelModes::default(),
        }
    }

    pub fn role_of(&self, handle: ClientHandle) -> Option<Role> {
        self.members.get(&handle).copied()
    }

    pub fn is_member(&self, handle: ClientHandle) -> bool {
        self.members.contains_key(&handle)
    }

    /// Adds a member. The very first member of an otherwise-empty channel
    /// becomes Founder; everyone after joins as Plain (operator status is
    /// then granted explicitly via MODE +o).
    pub fn add_member(&mut self, handle: ClientHandle) {
        let role = if self.members.is_empty() {
            Role::Founder
        } else {
            Role::Plain
        };
        self.members.insert(handle, role);
        self.invited.remove(&handle);
    }

    pub fn remove_member(&mut self, handle: ClientHandle) {
        self.members.remove(&handle);
    }

    pub fn set_role(&mut self, handle: ClientHandle, role: Role) {
        if let Some(r) = self.members.get_mut(&handle) {
            *r = role;
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        matches!(self.modes.limit, Some(limit) if self.members.len() >= limit)
    }
}

/// Owns every channel, keyed by a case-insensitive form of its name. Runtime
/// creation via JOIN is intentionally not supported (§9 Open Questions):
/// only the fixed seed set from [`ChannelRegistry::with_seed_channels`]
/// exists for the lifetime of the server.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

fn fold_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry::default()
    }

    /// Seeds the registry the way the original server ships with a small
    /// fixed set of rooms rather than allowing ad hoc creation (§4.4, §9).
    pub fn with_seed_channels() -> Self {
        let mut reg = ChannelRegistry::new();
        reg.seed("#general", None);
        reg.seed("#random", None);
        reg.seed("#hmeftah", Some("hmeftah"));
        reg
    }

    fn seed(&mut self, name: &str, key: Option<&str>) {
        let mut channel = Channel::new(name);
        channel.modes.key = key.map(str::to_owned);
        self.channels.insert(fold_key(name), channel);
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&fold_key(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&fold_key(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    /// Names of every channel `handle` currently belongs to.
    pub fn member_channels(&self, handle: ClientHandle) -> Vec<String> {
        self.channels
            .values()
            .filter(|c| c.is_member(handle))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Removes `handle` from every channel's membership — called when a
    /// client disconnects or quits (§4.6 deferred deletion). Returns the
    /// names of channels the client was actually a member of, in no
    /// particular order, so the dispatcher can broadcast a QUIT per channel.
    pub fn remove_member_everywhere(&mut self, handle: ClientHandle) -> Vec<String> {
        let mut left = Vec::new();
        for channel in self.channels.values_mut() {
            if channel.members.remove(&handle).is_some() {
                left.push(channel.name.clone());
            }
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_member_becomes_founder() {
        let mut ch = Channel::new("#x");
        ch.add_member(1);
        ch.add_member(2);
        assert_eq!(ch.role_of(1), Some(Role::Founder));
        assert_eq!(ch.role_of(2), Some(Role::Plain));
    }

    #[test]
    fn membership_is_idempotent_in_count() {
        // P1: a handle appears at most once — HashMap enforces this by
        // construction, re-adding just overwrites the role.
        let mut ch = Channel::new("#x");
        ch.add_member(1);
        ch.add_member(1);
        assert_eq!(ch.member_count(), 1);
    }

    #[test]
    fn seed_channels_exist_and_are_case_insensitive() {
        let reg = ChannelRegistry::with_seed_channels();
        assert!(reg.get("#general").is_some());
        assert!(reg.get("#GENERAL").is_some());
        assert!(reg.get("#nonexistent").is_none());
    }

    #[test]
    fn keyed_seed_channel_carries_its_key() {
        let reg = ChannelRegistry::with_seed_channels();
        let ch = reg.get("#hmeftah").unwrap();
        assert_eq!(ch.modes.key.as_deref(), Some("hmeftah"));
    }

    #[test]
    fn remove_member_everywhere_reports_every_channel_left() {
        let mut reg = ChannelRegistry::with_seed_channels();
        reg.get_mut("#general").unwrap().add_member(7);
        reg.get_mut("#random").unwrap().add_member(7);
        let mut left = reg.remove_member_everywhere(7);
        left.sort();
        assert_eq!(left, vec!["#general".to_owned(), "#random".to_owned()]);
        assert!(!reg.get("#general").unwrap().is_member(7));
    }

    #[test]
    fn full_channel_reports_full() {
        let mut ch = Channel::new("#x");
        ch.modes.limit = Some(1);
        ch.add_member(1);
        assert!(ch.is_full());
    }
}
