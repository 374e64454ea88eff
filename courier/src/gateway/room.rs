//! Room addressing.

use std::fmt;

use crate::{Error, Result};

/// A group of connections that can be addressed at once.
///
/// Every connection is implicitly a member of its user's room, which lives in
/// a namespace of its own so client-chosen room names cannot collide with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Named(String),
}

impl Room {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::User(user_id.into())
    }

    /// A client-chosen room. Blank names are rejected.
    pub fn named(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Room name must not be empty"));
        }
        Ok(Self::Named(name.to_string()))
    }

    /// Name as reported to clients.
    pub fn name(&self) -> &str {
        match self {
            Self::User(id) | Self::Named(id) => id,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_room_does_not_collide_with_named() {
        let user = Room::for_user("42");
        let named = Room::named("42").unwrap();
        assert_ne!(user, named);
        assert_eq!(user.name(), named.name());
    }

    #[test]
    fn test_named_room_trims_and_rejects_blank() {
        assert_eq!(Room::named("  team-a ").unwrap(), Room::Named("team-a".to_string()));
        assert!(Room::named("   ").is_err());
    }
}
