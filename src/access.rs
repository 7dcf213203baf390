//! Shared vocabulary for access control.
//!
//! An ACE stores the minimum role a user must hold to perform the access it
//! guards. Roles are ordered: a manager can do anything a user can.

use std::fmt;

/// Minimum user role required by an access control entry.
///
/// The on-disk encoding is the discriminant byte. `any` is accepted as an
/// input alias for `none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum UserRole {
    None = 0,
    Guest = 1,
    User = 2,
    Manager = 3,
    Admin = 4,
}

impl UserRole {
    /// Parse a role name as it appears in config rules.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "any" => Some(UserRole::None),
            "guest" => Some(UserRole::Guest),
            "user" => Some(UserRole::User),
            "manager" => Some(UserRole::Manager),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::None => "none",
            UserRole::Guest => "guest",
            UserRole::User => "user",
            UserRole::Manager => "manager",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_roles() {
        assert_eq!(UserRole::parse("guest"), Some(UserRole::Guest));
        assert_eq!(UserRole::parse("admin"), Some(UserRole::Admin));
        assert_eq!(UserRole::parse("none"), Some(UserRole::None));
    }

    #[test]
    fn any_aliases_none() {
        assert_eq!(UserRole::parse("any"), Some(UserRole::None));
    }

    #[test]
    fn unknown_role_rejected() {
        assert_eq!(UserRole::parse("root"), None);
        assert_eq!(UserRole::parse("Guest"), None);
    }

    #[test]
    fn roles_are_ordered() {
        assert!(UserRole::Guest < UserRole::Admin);
        assert!(UserRole::None < UserRole::Guest);
    }
}
