// src/capability/tags.rs
//! Capability tags and the [`Transferable`] contract

use crate::capability::identity::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sharing / ownership rights of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    /// Unique; the sender loses access once sent
    Isolated,

    /// Read-only and reference counted
    ImmutableShared,

    /// Owned by exactly one agent, never sent
    MutableLocal,

    /// Addresses an agent without granting data access
    IdentityOnly,
}

impl CapabilityTag {
    /// Whether a value with this tag may appear in a message at all
    #[inline]
    pub const fn is_transferable(self) -> bool {
        !matches!(self, Self::MutableLocal)
    }

    /// Whether sending invalidates the sender's binding
    #[inline]
    pub const fn invalidates_sender(self) -> bool {
        matches!(self, Self::Isolated)
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Isolated => "isolated",
            Self::ImmutableShared => "immutable-shared",
            Self::MutableLocal => "mutable-local",
            Self::IdentityOnly => "identity-only",
        };
        f.write_str(name)
    }
}

/// A value that may be placed in a message
///
/// Owned plain values are isolated by default: moving them into a message
/// moves them out of the sender. Types that must never leave their agent
/// simply do not implement this trait.
pub trait Transferable: Send + 'static {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::Isolated
    }
}

macro_rules! isolated_by_move {
    ($($ty:ty),* $(,)?) => {
        $(impl Transferable for $ty {})*
    };
}

isolated_by_move!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

// Containers move with their contents, so they are as transferable as what
// they hold. `Vec<Local<_>>` stays unsendable.
impl<T: Transferable> Transferable for Vec<T> {}

impl<T: Transferable> Transferable for Box<T> {}

impl<A: Transferable, B: Transferable> Transferable for (A, B) {}

impl Transferable for AgentId {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::IdentityOnly
    }
}

impl<T: Transferable> Transferable for Option<T> {
    fn capability(&self) -> CapabilityTag {
        self.as_ref()
            .map(Transferable::capability)
            .unwrap_or(CapabilityTag::Isolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transferability() {
        assert!(CapabilityTag::Isolated.is_transferable());
        assert!(CapabilityTag::ImmutableShared.is_transferable());
        assert!(CapabilityTag::IdentityOnly.is_transferable());
        assert!(!CapabilityTag::MutableLocal.is_transferable());
    }

    #[test]
    fn test_only_isolated_invalidates_sender() {
        assert!(CapabilityTag::Isolated.invalidates_sender());
        assert!(!CapabilityTag::ImmutableShared.invalidates_sender());
        assert!(!CapabilityTag::IdentityOnly.invalidates_sender());
    }

    #[test]
    fn test_default_tags() {
        assert_eq!("ping".capability(), CapabilityTag::Isolated);
        assert_eq!(String::from("x").capability(), CapabilityTag::Isolated);
        assert_eq!(
            AgentId::from_raw(1).capability(),
            CapabilityTag::IdentityOnly
        );
        assert_eq!(CapabilityTag::MutableLocal.to_string(), "mutable-local");
    }

    #[test]
    fn test_containers_are_isolated() {
        assert_eq!(vec![1u32, 2].capability(), CapabilityTag::Isolated);
        assert_eq!(Box::new(7u8).capability(), CapabilityTag::Isolated);
        assert_eq!(
            (String::from("k"), 1u64).capability(),
            CapabilityTag::Isolated
        );
    }
}
