//! Strongly-typed identifiers used across the workspace.
//!
//! Downstream crates (planner, exec, cli) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $label, self.0)
            }
        }
    };
}

// Party ids are chosen by the workflow author and are stable across peers.
new_id!(PartyId, "p");

// Node ids are arena indices assigned in insertion order by `DagBuilder`.
new_id!(NodeId, "n");

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
