//! Writes a [`MembershipDiff`] back to the CRM.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::committees::crm::{CrmApi, Entity, params};
use crate::committees::diff::MembershipDiff;
use crate::committees::error::Result;
use crate::committees::model::{CrmId, ExternalId, Membership};
use crate::committees::roles::RoleMapping;
use crate::committees::tools::IdTracker;

/// Counts of what [`apply_diff`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub deactivated: usize,
    pub created: usize,
    pub skipped: usize,
    /// Creates dropped because an identical relationship was already written
    /// in the same run.
    pub collapsed: usize,
}

/// Identity of a relationship record in the CRM: both contacts, the type,
/// the description and the dates.
type RelationshipKey = (CrmId, CrmId, CrmId, String, Option<NaiveDate>, Option<NaiveDate>);

enum Outcome {
    Created,
    Skipped,
    Collapsed,
}

/// Contact IDs needed to write relationships.
///
/// `persons` holds contacts resolved earlier in the run; anything else is
/// looked up through the tracker.
pub struct ContactIds<'a> {
    pub tracker: &'a dyn IdTracker,
    pub persons: &'a HashMap<ExternalId, CrmId>,
    pub committees: &'a BTreeMap<ExternalId, CrmId>,
}

impl ContactIds<'_> {
    fn person(&self, external_id: &str) -> Result<Option<CrmId>> {
        match self.persons.get(external_id) {
            Some(id) => Ok(Some(*id)),
            None => self.tracker.lookup(external_id),
        }
    }
}

/// Deactivates obsolete relationships, then creates the new ones.
///
/// Memberships that resolve to the same relationship record (two committees
/// sharing an organization, or one contact bound to several persons) are
/// written once. Relationships are never deleted. A failing call aborts; writes made before
/// it stay in place.
#[instrument(level = "info", skip_all, fields(changes = diff.total_changes()))]
pub fn apply_diff(
    api: &dyn CrmApi,
    diff: &MembershipDiff,
    contacts: &ContactIds<'_>,
    mapping: &RoleMapping,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for relationship_id in diff.relationships_to_deactivate() {
        api.create(
            Entity::Relationship,
            params(json!({"id": relationship_id, "is_active": 0})),
        )?;
        debug!(relationship_id, "deactivated relationship");
        report.deactivated += 1;
    }

    let mut written = HashSet::new();
    for membership in diff.memberships_to_create() {
        match create_relationship(api, membership, contacts, mapping, &mut written)? {
            Outcome::Created => report.created += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Collapsed => report.collapsed += 1,
        }
    }

    info!(
        deactivated = report.deactivated,
        created = report.created,
        skipped = report.skipped,
        collapsed = report.collapsed,
        "applied membership changes"
    );
    Ok(report)
}

fn create_relationship(
    api: &dyn CrmApi,
    membership: &Membership,
    contacts: &ContactIds<'_>,
    mapping: &RoleMapping,
    written: &mut HashSet<RelationshipKey>,
) -> Result<Outcome> {
    let Some(person) = contacts.person(&membership.person_id)? else {
        warn!(
            person = %membership.person_id,
            committee = %membership.committee_id,
            "no contact for person, skipping membership"
        );
        return Ok(Outcome::Skipped);
    };
    let Some(committee) = contacts.committees.get(&membership.committee_id).copied() else {
        warn!(
            person = %membership.person_id,
            committee = %membership.committee_id,
            "no organization for committee, skipping membership"
        );
        return Ok(Outcome::Skipped);
    };

    let relationship_type = mapping.resolve(&membership.role);
    let key = (
        person,
        committee,
        relationship_type,
        membership.role.clone(),
        membership.start_date,
        membership.end_date,
    );
    if !written.insert(key) {
        debug!(
            person = %membership.person_id,
            committee = %membership.committee_id,
            contact_id = person,
            organization_id = committee,
            "relationship already written in this run"
        );
        return Ok(Outcome::Collapsed);
    }

    let mut relationship = params(json!({
        "contact_id_a": person,
        "contact_id_b": committee,
        "relationship_type_id": relationship_type,
        "is_active": 1,
        "description": membership.role,
    }));
    if let Some(start) = membership.start_date {
        relationship.insert("start_date".into(), Value::from(start.to_string()));
    }
    if let Some(end) = membership.end_date {
        relationship.insert("end_date".into(), Value::from(end.to_string()));
    }

    let created = api.create(Entity::Relationship, relationship)?;
    debug!(
        person = %membership.person_id,
        committee = %membership.committee_id,
        relationship = ?created.get("id"),
        "created relationship"
    );
    Ok(Outcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committees::config::TrackerSettings;
    use crate::committees::crm::RecordExt;
    use crate::committees::crm::memory::InMemoryCrm;
    use crate::committees::diff::ChangedMembership;
    use crate::committees::tools::CrmIdTracker;
    use chrono::NaiveDate;

    const MEMBER: CrmId = 900;
    const CHAIR: CrmId = 901;

    fn mapping() -> RoleMapping {
        RoleMapping::new(
            HashMap::from([("Mitglied".to_string(), MEMBER), ("Chairperson".to_string(), CHAIR)]),
            MEMBER,
        )
    }

    fn relationship(crm: &InMemoryCrm, person: CrmId, committee: CrmId) -> CrmId {
        crm.seed(
            Entity::Relationship,
            params(json!({
                "contact_id_a": person,
                "contact_id_b": committee,
                "relationship_type_id": MEMBER,
                "is_active": 1,
            })),
        )
    }

    #[test]
    fn deactivates_before_creating() {
        let crm = InMemoryCrm::new();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());
        let old = relationship(&crm, 10, 20);
        let persons = HashMap::from([("P1".to_string(), 10)]);
        let committees = BTreeMap::from([("C1".to_string(), 20)]);

        let diff = MembershipDiff {
            changed: vec![ChangedMembership {
                current: Membership {
                    relationship_id: Some(old),
                    ..Membership::new("P1", "C1", "Mitglied")
                },
                imported: Membership {
                    start_date: NaiveDate::from_ymd_opt(2021, 10, 26),
                    ..Membership::new("P1", "C1", "Chairperson")
                },
            }],
            ..MembershipDiff::default()
        };

        let contacts = ContactIds {
            tracker: &tracker,
            persons: &persons,
            committees: &committees,
        };
        let report = apply_diff(&crm, &diff, &contacts, &mapping()).unwrap();

        assert_eq!(report, ApplyReport {
                deactivated: 1,
                created: 1,
                skipped: 0,
                collapsed: 0
            });
        let writes = crm.writes_to(Entity::Relationship);
        assert_eq!(writes[0].id, old);
        assert_eq!(writes[0].params.int_field("is_active"), Some(0));

        let created = &writes[1].params;
        assert_eq!(created.int_field("relationship_type_id"), Some(CHAIR));
        assert_eq!(created.text_field("description").as_deref(), Some("Chairperson"));
        assert_eq!(created.text_field("start_date").as_deref(), Some("2021-10-26"));
        assert_eq!(crm.records(Entity::Relationship).len(), 2);
    }

    #[test]
    fn unknown_contacts_are_skipped() {
        let crm = InMemoryCrm::new();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());
        tracker.bind("P2", 11).unwrap();
        let persons = HashMap::new();
        let committees = BTreeMap::from([("C1".to_string(), 20)]);

        let diff = MembershipDiff {
            new: vec![
                Membership::new("P1", "C1", "Mitglied"),
                Membership::new("P2", "C9", "Mitglied"),
                Membership::new("P2", "C1", "Schriftführer"),
            ],
            ..MembershipDiff::default()
        };
        let contacts = ContactIds {
            tracker: &tracker,
            persons: &persons,
            committees: &committees,
        };
        let report = apply_diff(&crm, &diff, &contacts, &mapping()).unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 2);
        let created = &crm.records(Entity::Relationship)[0];
        assert_eq!(created.int_field("contact_id_a"), Some(11));
        assert_eq!(created.int_field("relationship_type_id"), Some(MEMBER));
    }

    #[test]
    fn shared_endpoints_are_written_once() {
        let crm = InMemoryCrm::new();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());
        let persons = HashMap::from([("P1".to_string(), 10), ("P2".to_string(), 10)]);
        let committees = BTreeMap::from([("C1".to_string(), 20), ("C9".to_string(), 20)]);

        let diff = MembershipDiff {
            new: vec![
                Membership::new("P1", "C1", "Mitglied"),
                Membership::new("P1", "C9", "Mitglied"),
                Membership::new("P2", "C1", "Mitglied"),
                Membership::new("P2", "C9", "Chairperson"),
            ],
            ..MembershipDiff::default()
        };
        let contacts = ContactIds {
            tracker: &tracker,
            persons: &persons,
            committees: &committees,
        };
        let report = apply_diff(&crm, &diff, &contacts, &mapping()).unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.collapsed, 2);
        let types: Vec<_> = crm
            .records(Entity::Relationship)
            .iter()
            .filter_map(|record| record.int_field("relationship_type_id"))
            .collect();
        assert_eq!(types, vec![MEMBER, CHAIR]);
    }

    #[test]
    fn empty_diff_writes_nothing() {
        let crm = InMemoryCrm::new();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());
        let contacts = ContactIds {
            tracker: &tracker,
            persons: &HashMap::new(),
            committees: &BTreeMap::new(),
        };
        let report = apply_diff(&crm, &MembershipDiff::default(), &contacts, &mapping()).unwrap();

        assert_eq!(report, ApplyReport::default());
        assert!(crm.writes().is_empty());
    }
}
