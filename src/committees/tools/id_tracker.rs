use std::collections::{BTreeMap, HashMap};

use serde_json::json;
use tracing::{debug, info};

use crate::committees::config::TrackerSettings;
use crate::committees::crm::{CrmApi, Entity, RecordExt, params};
use crate::committees::error::{Result, SyncError};
use crate::committees::model::{CrmId, ExternalId};

/// Option group holding the known identity tracker types.
pub const TRACKER_TYPE_OPTION_GROUP: &str = "contact_id_history_type";

/// Persistent binding between roster identifiers and CRM contact IDs.
///
/// An external ID has at most one active binding per tracker type; a contact
/// may be bound to any number of external IDs.
pub trait IdTracker {
    /// Fails with [`SyncError::MissingDependency`] when the tracker is not
    /// available in the CRM.
    fn check_available(&self) -> Result<()>;

    /// Registers the tracker type, creating it when absent.
    fn ensure_type(&self) -> Result<()>;

    fn lookup(&self, external_id: &str) -> Result<Option<CrmId>>;

    fn bind(&self, external_id: &str, contact_id: CrmId) -> Result<()>;

    /// Contact ID to the external IDs currently bound to it.
    fn reverse_map(&self) -> Result<HashMap<CrmId, Vec<ExternalId>>>;
}

/// [`IdTracker`] stored in the CRM's `IdentityTracker` entity. Identifiers are
/// stored with the configured prefix; the most recent record for an
/// identifier is the active binding.
pub struct CrmIdTracker<A> {
    api: A,
    settings: TrackerSettings,
}

impl<A: CrmApi> CrmIdTracker<A> {
    pub fn new(api: A, settings: TrackerSettings) -> Self {
        Self { api, settings }
    }

    fn prefixed(&self, external_id: &str) -> String {
        format!("{}{}", self.settings.prefix, external_id)
    }
}

impl<A: CrmApi> IdTracker for CrmIdTracker<A> {
    fn check_available(&self) -> Result<()> {
        let probe = params(json!({
            "identifier_type": self.settings.tracker_type,
            "option.limit": 1,
        }));
        match self.api.get_count(Entity::IdentityTracker, probe) {
            Ok(_) => Ok(()),
            Err(SyncError::Api { message, .. }) => Err(SyncError::MissingDependency {
                name: "identity tracker".into(),
                hint: format!("install the identity tracker extension ({message})"),
            }),
            Err(other) => Err(other),
        }
    }

    fn ensure_type(&self) -> Result<()> {
        let key = &self.settings.tracker_type;
        let existing = self.api.get_count(
            Entity::OptionValue,
            params(json!({"option_group_id": TRACKER_TYPE_OPTION_GROUP, "value": key})),
        )?;
        match existing {
            0 => {
                self.api.create(
                    Entity::OptionValue,
                    params(json!({
                        "option_group_id": TRACKER_TYPE_OPTION_GROUP,
                        "value": key,
                        "name": key,
                        "label": self.settings.label,
                        "is_reserved": 1,
                        "description": "committee-sync",
                    })),
                )?;
                info!(tracker_type = %key, "registered identity tracker type");
                Ok(())
            }
            1 => Ok(()),
            _ => Err(SyncError::DuplicateDefinition {
                kind: "identity tracker type",
                name: key.clone(),
            }),
        }
    }

    fn lookup(&self, external_id: &str) -> Result<Option<CrmId>> {
        let found = self.api.get(
            Entity::IdentityTracker,
            params(json!({
                "identifier_type": self.settings.tracker_type,
                "identifier": self.prefixed(external_id),
                "option.sort": "id desc",
                "option.limit": 1,
            })),
        )?;
        Ok(found.first().and_then(|record| record.int_field("contact_id")))
    }

    fn bind(&self, external_id: &str, contact_id: CrmId) -> Result<()> {
        if self.lookup(external_id)? == Some(contact_id) {
            return Ok(());
        }
        self.api.create(
            Entity::IdentityTracker,
            params(json!({
                "contact_id": contact_id,
                "identifier_type": self.settings.tracker_type,
                "identifier": self.prefixed(external_id),
            })),
        )?;
        debug!(external_id, contact_id, "bound identity");
        Ok(())
    }

    fn reverse_map(&self) -> Result<HashMap<CrmId, Vec<ExternalId>>> {
        let mut records = self.api.get(
            Entity::IdentityTracker,
            params(json!({
                "identifier_type": self.settings.tracker_type,
                "option.limit": 0,
            })),
        )?;
        records.sort_by_key(|record| record.id());

        let mut active: BTreeMap<ExternalId, CrmId> = BTreeMap::new();
        for record in &records {
            let (Some(identifier), Some(contact_id)) =
                (record.text_field("identifier"), record.int_field("contact_id"))
            else {
                continue;
            };
            if let Some(external_id) = identifier.strip_prefix(&self.settings.prefix) {
                active.insert(external_id.to_string(), contact_id);
            }
        }

        let mut reverse: HashMap<CrmId, Vec<ExternalId>> = HashMap::new();
        for (external_id, contact_id) in active {
            reverse.entry(contact_id).or_default().push(external_id);
        }
        Ok(reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committees::crm::memory::InMemoryCrm;

    fn tracker(crm: &InMemoryCrm) -> CrmIdTracker<&InMemoryCrm> {
        CrmIdTracker::new(crm, TrackerSettings::default())
    }

    #[test]
    fn bind_then_lookup() {
        let crm = InMemoryCrm::new();
        let tracker = tracker(&crm);

        assert_eq!(tracker.lookup("123").unwrap(), None);
        tracker.bind("123", 40).unwrap();
        tracker.bind("123", 40).unwrap();

        assert_eq!(tracker.lookup("123").unwrap(), Some(40));
        assert_eq!(crm.records(Entity::IdentityTracker).len(), 1);
        assert_eq!(
            crm.records(Entity::IdentityTracker)[0].text_field("identifier").as_deref(),
            Some("SES-123")
        );
    }

    #[test]
    fn rebinding_replaces_the_active_binding() {
        let crm = InMemoryCrm::new();
        let tracker = tracker(&crm);
        tracker.bind("7", 40).unwrap();
        tracker.bind("7", 41).unwrap();

        assert_eq!(tracker.lookup("7").unwrap(), Some(41));
        let reverse = tracker.reverse_map().unwrap();
        assert_eq!(reverse.get(&41), Some(&vec!["7".to_string()]));
        assert_eq!(reverse.get(&40), None);
    }

    #[test]
    fn reverse_map_groups_external_ids_per_contact() {
        let crm = InMemoryCrm::new();
        let tracker = tracker(&crm);
        tracker.bind("1", 50).unwrap();
        tracker.bind("2", 50).unwrap();
        crm.seed(
            Entity::IdentityTracker,
            params(json!({"contact_id": 50, "identifier_type": "other", "identifier": "SES-3"})),
        );

        let reverse = tracker.reverse_map().unwrap();
        assert_eq!(reverse.get(&50), Some(&vec!["1".to_string(), "2".to_string()]));
    }

    #[test]
    fn ensure_type_registers_once_and_rejects_duplicates() {
        let crm = InMemoryCrm::new();
        let tracker = tracker(&crm);
        tracker.ensure_type().unwrap();
        tracker.ensure_type().unwrap();
        assert_eq!(crm.records(Entity::OptionValue).len(), 1);

        crm.seed(
            Entity::OptionValue,
            params(json!({"option_group_id": TRACKER_TYPE_OPTION_GROUP, "value": "session"})),
        );
        assert!(matches!(
            tracker.ensure_type(),
            Err(SyncError::DuplicateDefinition { .. })
        ));
    }

    #[test]
    fn missing_tracker_is_a_missing_dependency() {
        let crm = InMemoryCrm::new().without_entity(Entity::IdentityTracker);
        assert!(matches!(
            tracker(&crm).check_available(),
            Err(SyncError::MissingDependency { .. })
        ));
    }
}
