use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::committees::config::{ContactSettings, RoleSettings};
use crate::committees::context::SyncContext;
use crate::committees::crm::CrmApi;
use crate::committees::error::{Result, SyncError};
use crate::committees::model::{CrmId, Membership};
use crate::committees::tools::lookup::{committee_subtype, ensure_relationship_type};

/// Maps free-text role labels to relationship type IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapping {
    by_role: HashMap<String, CrmId>,
    default_type: CrmId,
}

impl RoleMapping {
    pub fn new(by_role: HashMap<String, CrmId>, default_type: CrmId) -> Self {
        Self {
            by_role,
            default_type,
        }
    }

    /// Relationship type for `role`. Unknown and empty roles fall back to the
    /// default type; see [`warn_unmapped_roles`] for the warning.
    pub fn resolve(&self, role: &str) -> CrmId {
        self.by_role
            .get(role.trim())
            .copied()
            .unwrap_or(self.default_type)
    }

    pub fn is_mapped(&self, role: &str) -> bool {
        self.by_role.contains_key(role.trim())
    }

    pub fn default_type(&self) -> CrmId {
        self.default_type
    }

    /// Every relationship type a membership can be stored as.
    pub fn relationship_type_ids(&self) -> Vec<CrmId> {
        let ids: BTreeSet<CrmId> = self
            .by_role
            .values()
            .copied()
            .chain(std::iter::once(self.default_type))
            .collect();
        ids.into_iter().collect()
    }
}

/// Returns the run's role mapping, building it on first use. Building it
/// makes sure every configured relationship type exists in the CRM.
pub fn role_mapping<'c>(
    api: &dyn CrmApi,
    roles: &RoleSettings,
    contacts: &ContactSettings,
    ctx: &'c mut SyncContext,
) -> Result<&'c RoleMapping> {
    if ctx.role_mapping.is_none() {
        let mapping = build_role_mapping(api, roles, contacts, ctx)?;
        ctx.role_mapping = Some(mapping);
    }
    ctx.role_mapping
        .as_ref()
        .ok_or_else(|| SyncError::InvalidConfig("role mapping unavailable".into()))
}

/// Logs one warning per unmapped role and run, with the number of
/// memberships holding it. Returns the roles warned about in this call.
pub fn warn_unmapped_roles<'m>(
    mapping: &RoleMapping,
    memberships: impl IntoIterator<Item = &'m Membership>,
    ctx: &mut SyncContext,
) -> Vec<String> {
    let mut unmapped: BTreeMap<&str, usize> = BTreeMap::new();
    for membership in memberships {
        let role = membership.role.trim();
        if !role.is_empty() && !mapping.is_mapped(role) {
            *unmapped.entry(role).or_default() += 1;
        }
    }

    let mut warned = Vec::new();
    for (role, memberships) in unmapped {
        if ctx.unmapped_roles.insert(role.to_string()) {
            warn!(role, memberships, "couldn't map role to a relationship type, using member");
            warned.push(role.to_string());
        }
    }
    warned
}

fn build_role_mapping(
    api: &dyn CrmApi,
    roles: &RoleSettings,
    contacts: &ContactSettings,
    ctx: &mut SyncContext,
) -> Result<RoleMapping> {
    if !roles
        .types
        .iter()
        .any(|spec| spec.name_a_b == roles.default_type)
    {
        return Err(SyncError::InvalidConfig(format!(
            "default relationship type '{}' is not listed in [roles] types",
            roles.default_type
        )));
    }

    let subtype = committee_subtype(api, contacts, ctx)?;
    let mut by_role = HashMap::new();
    let mut default_type = None;

    for spec in &roles.types {
        let id = ensure_relationship_type(api, spec, &subtype, ctx)?;
        if spec.name_a_b == roles.default_type {
            default_type = Some(id);
        }
        for role in &spec.roles {
            if let Some(previous) = by_role.insert(role.trim().to_string(), id) {
                if previous != id {
                    warn!(role = %role, "role listed for several relationship types, last one wins");
                }
            }
        }
    }

    let default_type = default_type.ok_or_else(|| {
        SyncError::InvalidConfig(format!("default type '{}' not resolved", roles.default_type))
    })?;
    debug!(roles = by_role.len(), "role mapping ready");
    Ok(RoleMapping::new(by_role, default_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committees::crm::memory::InMemoryCrm;
    use crate::committees::crm::{Entity, RecordExt};

    #[test]
    fn aliases_share_a_relationship_type() {
        let crm = InMemoryCrm::new();
        let mut ctx = SyncContext::new();
        let mapping = role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx)
            .unwrap()
            .clone();

        assert_eq!(mapping.resolve("Obmann"), mapping.resolve("Obfrau"));
        assert_eq!(mapping.resolve("Chairperson"), mapping.resolve("Vorsitzende"));
        assert_ne!(mapping.resolve("stellv. Mitglied"), mapping.resolve("Mitglied"));
        assert_eq!(mapping.relationship_type_ids().len(), 5);
        assert_eq!(crm.records(Entity::RelationshipType).len(), 5);
        assert_eq!(crm.records(Entity::ContactType).len(), 1);
    }

    #[test]
    fn unmapped_roles_fall_back_to_member() {
        let crm = InMemoryCrm::new();
        let mut ctx = SyncContext::new();
        let mapping = role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx)
            .unwrap();

        let member = mapping.resolve("Mitglied");
        assert_eq!(mapping.resolve("Schriftführerin"), member);
        assert_eq!(mapping.resolve(""), member);
        assert!(!mapping.is_mapped("Schriftführerin"));
        let member_type = crm
            .records(Entity::RelationshipType)
            .into_iter()
            .find(|record| record.id() == Some(member))
            .unwrap();
        assert_eq!(member_type.text_field("name_a_b").as_deref(), Some("is_committee_member_of"));
    }

    #[test]
    fn unmapped_roles_are_reported_once_per_run() {
        let mapping = RoleMapping::new(HashMap::from([("Mitglied".to_string(), 1)]), 1);
        let memberships = vec![
            Membership::new("P1", "C1", "Schriftführer"),
            Membership::new("P2", "C1", " Schriftführer "),
            Membership::new("P3", "C1", "Mitglied"),
            Membership::new("P4", "C1", ""),
            Membership::new("P5", "C2", "Gast"),
        ];
        let mut ctx = SyncContext::new();

        let first = warn_unmapped_roles(&mapping, &memberships, &mut ctx);
        let second = warn_unmapped_roles(&mapping, &memberships, &mut ctx);

        assert_eq!(first, vec!["Gast", "Schriftführer"]);
        assert!(second.is_empty());
        assert_eq!(ctx.unmapped_roles().count(), 2);
    }

    #[test]
    fn mapping_is_built_once_per_run() {
        let crm = InMemoryCrm::new();
        let mut ctx = SyncContext::new();
        role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx).unwrap();
        crm.clear_writes();
        role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx).unwrap();
        assert!(crm.writes().is_empty());
    }

    #[test]
    fn default_type_must_be_configured() {
        let crm = InMemoryCrm::new();
        let roles = RoleSettings {
            default_type: "is_committee_guest_of".into(),
            ..RoleSettings::default()
        };
        let result = role_mapping(&crm, &roles, &ContactSettings::default(), &mut SyncContext::new());
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
