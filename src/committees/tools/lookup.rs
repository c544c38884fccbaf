//! Find-or-create helpers for organizations and shared CRM definitions.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::committees::config::{ContactSettings, RelationshipTypeSpec};
use crate::committees::context::SyncContext;
use crate::committees::crm::{CrmApi, Entity, Params, Record, RecordExt, params};
use crate::committees::error::{Result, SyncError};
use crate::committees::model::CrmId;

/// Outcome of [`resolve_organization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: CrmId,
    pub created: bool,
}

/// Looks up an organization by exact name. With several hits the lowest ID
/// wins and a warning is logged, once per name and run.
pub fn find_organization(
    api: &dyn CrmApi,
    name: &str,
    ctx: &mut SyncContext,
) -> Result<Option<CrmId>> {
    let hits = api.get(
        Entity::Contact,
        params(json!({
            "organization_name": name,
            "contact_type": "Organization",
            "option.limit": 0,
        })),
    )?;

    let mut ids: Vec<CrmId> = hits.iter().filter_map(RecordExt::id).collect();
    ids.sort_unstable();
    ids.dedup();

    if ids.len() > 1 && ctx.ambiguous_names.insert(name.to_string()) {
        warn!(
            organization = name,
            matches = ids.len(),
            using = ids[0],
            "organization name not unique, using the first match"
        );
    }
    Ok(ids.first().copied())
}

/// Finds an organization by name or creates it from `create` (which receives
/// `organization_name` and `contact_type`).
pub fn resolve_organization(
    api: &dyn CrmApi,
    name: &str,
    create: Params,
    ctx: &mut SyncContext,
) -> Result<Resolved> {
    if let Some(id) = find_organization(api, name, ctx)? {
        return Ok(Resolved { id, created: false });
    }

    let mut create = create;
    create.insert("organization_name".into(), json!(name));
    create.insert("contact_type".into(), json!("Organization"));
    let record = api.create(Entity::Contact, create)?;
    Ok(Resolved {
        id: require_id(Entity::Contact, &record)?,
        created: true,
    })
}

/// Makes sure a contact (sub)type exists.
pub fn ensure_contact_type(api: &dyn CrmApi, name: &str, label: &str, parent: &str) -> Result<()> {
    let count = api.get_count(Entity::ContactType, params(json!({"name": name})))?;
    match count {
        0 => {
            api.create(
                Entity::ContactType,
                params(json!({"name": name, "label": label, "parent_id": parent})),
            )?;
            info!(contact_type = name, "created contact type");
            Ok(())
        }
        1 => Ok(()),
        _ => Err(SyncError::DuplicateDefinition {
            kind: "contact type",
            name: name.to_string(),
        }),
    }
}

/// The organization subtype for committees, created on first use.
pub fn committee_subtype(
    api: &dyn CrmApi,
    contacts: &ContactSettings,
    ctx: &mut SyncContext,
) -> Result<String> {
    if !ctx.committee_subtype_ready {
        ensure_contact_type(
            api,
            &contacts.committee_subtype_name,
            &contacts.committee_subtype_label,
            "Organization",
        )?;
        ctx.committee_subtype_ready = true;
    }
    Ok(contacts.committee_subtype_name.clone())
}

/// Returns the ID of the relationship type described by `spec`, creating the
/// type (both directions) when no type with the same `name_a_b` exists.
pub fn ensure_relationship_type(
    api: &dyn CrmApi,
    spec: &RelationshipTypeSpec,
    committee_subtype: &str,
    ctx: &mut SyncContext,
) -> Result<CrmId> {
    if let Some(id) = ctx.relationship_types.get(&spec.name_a_b) {
        return Ok(*id);
    }

    let existing = api.get(Entity::RelationshipType, params(json!({"name_a_b": spec.name_a_b})))?;
    let id = match existing.iter().filter_map(RecordExt::id).min() {
        Some(id) => id,
        None => {
            let record = api.create(
                Entity::RelationshipType,
                params(json!({
                    "name_a_b": spec.name_a_b,
                    "name_b_a": spec.name_b_a,
                    "label_a_b": spec.label_a_b,
                    "label_b_a": spec.label_b_a,
                    "description": spec.description,
                    "contact_type_a": "Individual",
                    "contact_type_b": "Organization",
                    "contact_sub_type_b": committee_subtype,
                    "is_active": 1,
                })),
            )?;
            let id = require_id(Entity::RelationshipType, &record)?;
            info!(name = %spec.name_a_b, id, "created relationship type");
            id
        }
    };

    ctx.relationship_types.insert(spec.name_a_b.clone(), id);
    Ok(id)
}

/// Resolves the value of an option (prefix, suffix, gender, ...) by label,
/// creating the option when it does not exist yet.
pub fn option_value(
    api: &dyn CrmApi,
    option_group: &str,
    label: &str,
    ctx: &mut SyncContext,
) -> Result<String> {
    let key = (option_group.to_string(), label.to_string());
    if let Some(value) = ctx.option_values.get(&key) {
        return Ok(value.clone());
    }

    let existing = api.get(
        Entity::OptionValue,
        params(json!({"option_group_id": option_group, "label": label, "option.limit": 1})),
    )?;
    let record = match existing.into_iter().next() {
        Some(record) => record,
        None => {
            debug!(option_group, label, "creating option value");
            api.create(
                Entity::OptionValue,
                params(json!({"option_group_id": option_group, "label": label, "name": label})),
            )?
        }
    };

    let value = record
        .text_field("value")
        .or_else(|| record.id().map(|id| id.to_string()))
        .ok_or_else(|| SyncError::UnexpectedResponse {
            entity: Entity::OptionValue.to_string(),
            action: "get".into(),
            message: format!("option '{label}' has no value"),
        })?;
    ctx.option_values.insert(key, value.clone());
    Ok(value)
}

pub(crate) fn require_id(entity: Entity, record: &Record) -> Result<CrmId> {
    record.id().ok_or_else(|| SyncError::UnexpectedResponse {
        entity: entity.to_string(),
        action: "create".into(),
        message: "record has no id".into(),
    })
}
