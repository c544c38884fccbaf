use std::collections::{HashMap, HashSet};

use crate::committees::model::CrmId;
use crate::committees::roles::RoleMapping;

/// Lookups memoized for the duration of one synchronisation run.
///
/// A fresh context is created per run and passed by `&mut` to every step that
/// resolves or creates shared CRM definitions.
#[derive(Debug, Default)]
pub struct SyncContext {
    /// Relationship type IDs keyed by `name_a_b`.
    pub(crate) relationship_types: HashMap<String, CrmId>,
    pub(crate) role_mapping: Option<RoleMapping>,
    /// Group IDs keyed by title.
    pub(crate) groups: HashMap<String, CrmId>,
    /// Option values keyed by (option group, label).
    pub(crate) option_values: HashMap<(String, String), String>,
    pub(crate) committee_subtype_ready: bool,
    /// Names for which an ambiguity warning was already logged.
    pub(crate) ambiguous_names: HashSet<String>,
    /// Roles for which the fallback warning was already logged.
    pub(crate) unmapped_roles: HashSet<String>,
    /// Shared work address of the parliament, once resolved.
    pub(crate) parliament_address: Option<CrmId>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names that resolved to more than one organization during this run.
    pub fn ambiguous_names(&self) -> impl Iterator<Item = &str> {
        self.ambiguous_names.iter().map(String::as_str)
    }

    /// Roles that fell back to the default relationship type during this run.
    pub fn unmapped_roles(&self) -> impl Iterator<Item = &str> {
        self.unmapped_roles.iter().map(String::as_str)
    }

    pub fn parliament_address(&self) -> Option<CrmId> {
        self.parliament_address
    }

    pub fn role_mapping(&self) -> Option<&RoleMapping> {
        self.role_mapping.as_ref()
    }
}
