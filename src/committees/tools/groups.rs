use serde_json::{Value, json};
use tracing::info;

use crate::committees::crm::{CrmApi, Entity, Params, RecordExt, params};
use crate::committees::error::{Result, SyncError};
use crate::committees::model::CrmId;

/// Static contact groups. Both operations are idempotent.
pub trait GroupMembership {
    /// Returns the ID of the group with the given attributes, creating it when
    /// no group with the same `title` exists.
    fn ensure_group(&self, attributes: Params) -> Result<CrmId>;

    fn add_to_group(&self, contact_id: CrmId, group_id: CrmId, is_active: bool) -> Result<()>;
}

/// [`GroupMembership`] backed by the `Group` and `GroupContact` entities.
pub struct CrmGroups<A> {
    api: A,
}

impl<A: CrmApi> CrmGroups<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: CrmApi> GroupMembership for CrmGroups<A> {
    fn ensure_group(&self, attributes: Params) -> Result<CrmId> {
        let title = attributes
            .text_field("title")
            .ok_or_else(|| SyncError::InvalidConfig("contact group needs a title".into()))?;

        let existing = self
            .api
            .get(Entity::Group, params(json!({"title": title, "option.sort": "id asc"})))?;
        if let Some(id) = existing.iter().filter_map(RecordExt::id).min() {
            return Ok(id);
        }

        let mut create = attributes;
        create
            .entry("name")
            .or_insert_with(|| Value::from(title.clone()));
        create.entry("is_active").or_insert(Value::from(1));
        let created = self.api.create(Entity::Group, create)?;
        let id = created.id().ok_or_else(|| SyncError::UnexpectedResponse {
            entity: Entity::Group.to_string(),
            action: "create".into(),
            message: "created group has no id".into(),
        })?;
        info!(%title, group_id = id, "created contact group");
        Ok(id)
    }

    fn add_to_group(&self, contact_id: CrmId, group_id: CrmId, is_active: bool) -> Result<()> {
        let status = if is_active { "Added" } else { "Removed" };
        let existing = self.api.get(
            Entity::GroupContact,
            params(json!({"contact_id": contact_id, "group_id": group_id})),
        )?;

        match existing.first() {
            Some(record) if record.text_field("status").as_deref() == Some(status) => Ok(()),
            Some(record) => {
                let mut update = params(json!({"status": status}));
                if let Some(id) = record.id() {
                    update.insert("id".into(), Value::from(id));
                }
                self.api.create(Entity::GroupContact, update)?;
                Ok(())
            }
            None => {
                self.api.create(
                    Entity::GroupContact,
                    params(json!({
                        "contact_id": contact_id,
                        "group_id": group_id,
                        "status": status,
                    })),
                )?;
                Ok(())
            }
        }
    }
}
