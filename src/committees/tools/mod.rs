//! Capabilities the synchronisation is composed from: identity tracking,
//! contact groups and find-or-create lookups.

pub mod groups;
pub mod id_tracker;
pub mod lookup;

pub use groups::{CrmGroups, GroupMembership};
pub use id_tracker::{CrmIdTracker, IdTracker};
