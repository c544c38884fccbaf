//! Reads the memberships currently stored in the CRM for the committees of a
//! roster.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::committees::config::ContactSettings;
use crate::committees::context::SyncContext;
use crate::committees::crm::{CrmApi, Entity, Record, RecordExt, params};
use crate::committees::error::Result;
use crate::committees::model::{Committee, CommitteeType, CrmId, ExternalId, Membership, Roster};
use crate::committees::roles::RoleMapping;
use crate::committees::tools::IdTracker;
use crate::committees::tools::lookup::find_organization;

/// Name under which a committee is stored as an organization.
pub fn crm_committee_name(committee: &Committee, contacts: &ContactSettings) -> String {
    match committee.committee_type {
        CommitteeType::ParliamentaryGroup => contacts.parliamentary_group_name(&committee.name),
        CommitteeType::ParliamentaryCommittee => committee.name.clone(),
    }
}

/// Looks up the organization of every roster committee. Committees without an
/// organization are left out.
pub fn resolve_current_committees(
    api: &dyn CrmApi,
    roster: &Roster,
    contacts: &ContactSettings,
    ctx: &mut SyncContext,
) -> Result<BTreeMap<ExternalId, CrmId>> {
    let mut resolved = BTreeMap::new();
    for committee in roster.committees() {
        let name = crm_committee_name(committee, contacts);
        match find_organization(api, &name, ctx)? {
            Some(id) => {
                resolved.insert(committee.id.clone(), id);
            }
            None => debug!(committee = %committee.id, %name, "committee not in the CRM yet"),
        }
    }
    info!(
        "Found {} of {} committees",
        resolved.len(),
        roster.committee_count()
    );
    Ok(resolved)
}

/// Rebuilds the active memberships of the given committees from their
/// relationships.
///
/// A relationship produces one membership per external ID bound to its
/// person contact and per roster committee resolving to its organization.
/// Relationships of persons without a binding are not part of the roster's
/// world and are ignored.
pub fn extract_current_memberships(
    api: &dyn CrmApi,
    roster: &Roster,
    tracker: &dyn IdTracker,
    mapping: &RoleMapping,
    committees: &BTreeMap<ExternalId, CrmId>,
) -> Result<Vec<Membership>> {
    let mut committees_by_contact: HashMap<CrmId, Vec<&ExternalId>> = HashMap::new();
    for (external_id, contact_id) in committees {
        committees_by_contact
            .entry(*contact_id)
            .or_default()
            .push(external_id);
    }
    if committees_by_contact.is_empty() {
        return Ok(Vec::new());
    }

    let mut organization_ids: Vec<CrmId> = committees_by_contact.keys().copied().collect();
    organization_ids.sort_unstable();

    let relationships = api.get(
        Entity::Relationship,
        params(json!({
            "relationship_type_id": {"IN": mapping.relationship_type_ids()},
            "contact_id_b": {"IN": organization_ids},
            "is_active": 1,
            "option.limit": 0,
        })),
    )?;
    let persons = tracker.reverse_map()?;

    let mut memberships = Vec::new();
    let mut unbound = 0usize;
    for relationship in &relationships {
        let (Some(relationship_id), Some(person), Some(organization)) = (
            relationship.id(),
            relationship.int_field("contact_id_a"),
            relationship.int_field("contact_id_b"),
        ) else {
            warn!(?relationship, "skipping incomplete relationship record");
            continue;
        };
        let Some(external_persons) = persons.get(&person) else {
            unbound += 1;
            continue;
        };
        let Some(external_committees) = committees_by_contact.get(&organization) else {
            continue;
        };

        for committee_id in external_committees {
            for person_id in external_persons {
                memberships.push(Membership {
                    represents: None,
                    start_date: relationship_date(relationship, "start_date"),
                    end_date: relationship_date(relationship, "end_date"),
                    committee_name: roster.committee(committee_id).map(|c| c.name.clone()),
                    relationship_id: Some(relationship_id),
                    ..Membership::new(
                        person_id.clone(),
                        (*committee_id).clone(),
                        relationship.text_field("description").unwrap_or_default(),
                    )
                });
            }
        }
    }

    info!(
        relationships = relationships.len(),
        memberships = memberships.len(),
        unbound,
        "read current memberships"
    );
    Ok(memberships)
}

fn relationship_date(record: &Record, key: &str) -> Option<NaiveDate> {
    let text = record.text_field(key)?;
    let day = text.get(..10).unwrap_or(&text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committees::config::{RoleSettings, TrackerSettings};
    use crate::committees::crm::memory::InMemoryCrm;
    use crate::committees::roles::role_mapping;
    use crate::committees::tools::CrmIdTracker;

    fn organization(crm: &InMemoryCrm, name: &str) -> CrmId {
        crm.seed(
            Entity::Contact,
            params(json!({"organization_name": name, "contact_type": "Organization"})),
        )
    }

    fn roster() -> Roster {
        let mut roster = Roster::new();
        roster.add_committee(Committee::new("C1", "Haushaltsausschuss"));
        roster.add_committee(Committee::new("C2", "SPD").with_type(CommitteeType::ParliamentaryGroup));
        roster.add_committee(Committee::new("C3", "Petitionsausschuss"));
        roster
    }

    #[test]
    fn group_names_follow_the_template() {
        let contacts = ContactSettings::default();
        let roster = roster();
        assert_eq!(
            crm_committee_name(roster.committee("C2").unwrap(), &contacts),
            "Fraktion SPD im Deutschen Bundestag"
        );
        assert_eq!(
            crm_committee_name(roster.committee("C1").unwrap(), &contacts),
            "Haushaltsausschuss"
        );
    }

    #[test]
    fn unknown_committees_are_left_out() {
        let crm = InMemoryCrm::new();
        let budget = organization(&crm, "Haushaltsausschuss");
        let group = organization(&crm, "Fraktion SPD im Deutschen Bundestag");

        let resolved = resolve_current_committees(
            &crm,
            &roster(),
            &ContactSettings::default(),
            &mut SyncContext::new(),
        )
        .unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["C1"], budget);
        assert_eq!(resolved["C2"], group);
        assert!(!resolved.contains_key("C3"));
    }

    #[test]
    fn relationships_are_mapped_back_to_roster_ids() {
        let crm = InMemoryCrm::new();
        let mut ctx = SyncContext::new();
        let mapping = role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx)
            .unwrap()
            .clone();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());

        let budget = organization(&crm, "Haushaltsausschuss");
        let person = crm.seed(Entity::Contact, params(json!({"contact_type": "Individual"})));
        let stranger = crm.seed(Entity::Contact, params(json!({"contact_type": "Individual"})));
        tracker.bind("P1", person).unwrap();
        tracker.bind("P9", person).unwrap();

        let chair = mapping.resolve("Vorsitzende");
        let active = crm.seed(
            Entity::Relationship,
            params(json!({
                "contact_id_a": person,
                "contact_id_b": budget,
                "relationship_type_id": chair,
                "is_active": 1,
                "description": "Vorsitzende",
                "start_date": "2021-12-08 00:00:00",
            })),
        );
        crm.seed(
            Entity::Relationship,
            params(json!({
                "contact_id_a": person,
                "contact_id_b": budget,
                "relationship_type_id": chair,
                "is_active": 0,
            })),
        );
        crm.seed(
            Entity::Relationship,
            params(json!({
                "contact_id_a": stranger,
                "contact_id_b": budget,
                "relationship_type_id": chair,
                "is_active": 1,
            })),
        );

        let committees = BTreeMap::from([("C1".to_string(), budget)]);
        let mut memberships =
            extract_current_memberships(&crm, &roster(), &tracker, &mapping, &committees).unwrap();
        memberships.sort_by(|a, b| a.person_id.cmp(&b.person_id));

        assert_eq!(memberships.len(), 2);
        assert_eq!(memberships[0].person_id, "P1");
        assert_eq!(memberships[1].person_id, "P9");
        for membership in &memberships {
            assert_eq!(membership.committee_id, "C1");
            assert_eq!(membership.role, "Vorsitzende");
            assert_eq!(membership.relationship_id, Some(active));
            assert_eq!(membership.start_date, NaiveDate::from_ymd_opt(2021, 12, 8));
            assert_eq!(membership.committee_name.as_deref(), Some("Haushaltsausschuss"));
        }
    }

    #[test]
    fn committees_sharing_an_organization_each_get_the_membership() {
        let crm = InMemoryCrm::new();
        let mut ctx = SyncContext::new();
        let mapping = role_mapping(&crm, &RoleSettings::default(), &ContactSettings::default(), &mut ctx)
            .unwrap()
            .clone();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());

        let budget = organization(&crm, "Haushaltsausschuss");
        let person = crm.seed(Entity::Contact, params(json!({"contact_type": "Individual"})));
        tracker.bind("P1", person).unwrap();
        crm.seed(
            Entity::Relationship,
            params(json!({
                "contact_id_a": person,
                "contact_id_b": budget,
                "relationship_type_id": mapping.default_type(),
                "is_active": 1,
                "description": "Mitglied",
            })),
        );

        let committees = BTreeMap::from([("C1".to_string(), budget), ("C3".to_string(), budget)]);
        let memberships =
            extract_current_memberships(&crm, &roster(), &tracker, &mapping, &committees).unwrap();
        assert_eq!(memberships.len(), 2);
    }

    #[test]
    fn no_committees_means_no_query() {
        let crm = InMemoryCrm::new();
        let tracker = CrmIdTracker::new(&crm, TrackerSettings::default());
        let mapping = RoleMapping::new(HashMap::new(), 1);

        let memberships =
            extract_current_memberships(&crm, &roster(), &tracker, &mapping, &BTreeMap::new()).unwrap();
        assert!(memberships.is_empty());
    }
}
