//! Capability-based permission system for the script sandbox
//!
//! A script starts with nothing but the core language. Every built-in it can
//! reach comes from a capability granted here. There is no capability for
//! files, network, environment or processes, so those cannot be granted.

use serde::{Deserialize, Serialize};

/// Built-in families a script can be granted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Numeric operators, comparisons and boolean logic
    Arithmetic,

    /// Math functions (sqrt, floor, sin, parse_float, ...)
    Math,

    /// String construction and manipulation
    Strings,

    /// Arrays, object maps, ranges and iteration
    Collections,

    /// Timestamps plus a `now()` function returning RFC 3339 UTC time
    Time,

    /// `print` and `debug`, surfaced to the conversation as observations
    Logging,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Arithmetic,
        Capability::Math,
        Capability::Strings,
        Capability::Collections,
        Capability::Time,
        Capability::Logging,
    ];
}

/// A set of capabilities granted to the script sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    /// An empty set: core language only
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability the sandbox knows about
    pub fn standard() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn grant(&mut self, cap: Capability) {
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
    }

    pub fn revoke(&mut self, cap: Capability) {
        self.capabilities.retain(|c| *c != cap);
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::new();
        for cap in iter {
            set.grant(cap);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_is_idempotent() {
        let mut set = CapabilitySet::new();
        set.grant(Capability::Math);
        set.grant(Capability::Math);
        assert_eq!(set.iter().count(), 1);
        assert!(set.has(Capability::Math));
    }

    #[test]
    fn test_revoke() {
        let mut set = CapabilitySet::standard();
        set.revoke(Capability::Logging);
        assert!(!set.has(Capability::Logging));
        assert!(set.has(Capability::Strings));
    }

    #[test]
    fn test_deserialize_names() {
        let caps: Vec<Capability> = serde_json::from_str(r#"["math", "logging"]"#).unwrap();
        let set: CapabilitySet = caps.into_iter().collect();
        assert!(set.has(Capability::Math));
        assert!(set.has(Capability::Logging));
        assert!(!set.has(Capability::Time));
    }
}
