use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{CrmId, ExternalId};

/// Attributes of a [`Membership`] that take part in equality checks unless
/// they are explicitly ignored. The person and committee identifiers are
/// always compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAttribute {
    Role,
    Represents,
    StartDate,
    EndDate,
    CommitteeName,
    RelationshipId,
}

impl MembershipAttribute {
    pub const ALL: [MembershipAttribute; 6] = [
        MembershipAttribute::Role,
        MembershipAttribute::Represents,
        MembershipAttribute::StartDate,
        MembershipAttribute::EndDate,
        MembershipAttribute::CommitteeName,
        MembershipAttribute::RelationshipId,
    ];

    /// The ignore list used when nothing else is configured: the committee
    /// name is derived, the relationship ID is CRM-internal, and the
    /// "represents" label is not stored on the relationship.
    pub fn default_ignored() -> Vec<MembershipAttribute> {
        vec![
            MembershipAttribute::CommitteeName,
            MembershipAttribute::RelationshipId,
            MembershipAttribute::Represents,
        ]
    }
}

/// A person holding a role in a committee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub person_id: ExternalId,
    pub committee_id: ExternalId,
    pub role: String,
    pub represents: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Display name of the committee, filled for reporting only.
    pub committee_name: Option<String>,
    /// Backing relationship; only set on memberships read from the CRM.
    pub relationship_id: Option<CrmId>,
}

impl Membership {
    pub fn new(
        person_id: impl Into<ExternalId>,
        committee_id: impl Into<ExternalId>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            person_id: person_id.into(),
            committee_id: committee_id.into(),
            role: role.into(),
            represents: None,
            start_date: None,
            end_date: None,
            committee_name: None,
            relationship_id: None,
        }
    }

    /// The (person, committee) pair identifying whom and where the membership
    /// is about.
    pub fn key(&self) -> (&str, &str) {
        (&self.person_id, &self.committee_id)
    }

    /// Returns the value of the given attribute rendered as text, `None` when
    /// it is unset.
    pub fn attribute(&self, attribute: MembershipAttribute) -> Option<String> {
        match attribute {
            MembershipAttribute::Role => Some(self.role.clone()).filter(|role| !role.is_empty()),
            MembershipAttribute::Represents => self.represents.clone(),
            MembershipAttribute::StartDate => self.start_date.map(|date| date.to_string()),
            MembershipAttribute::EndDate => self.end_date.map(|date| date.to_string()),
            MembershipAttribute::CommitteeName => self.committee_name.clone(),
            MembershipAttribute::RelationshipId => self.relationship_id.map(|id| id.to_string()),
        }
    }

    /// Two memberships match when they share person and committee and agree on
    /// every attribute not listed in `ignored`.
    pub fn matches(&self, other: &Membership, ignored: &[MembershipAttribute]) -> bool {
        self.key() == other.key()
            && MembershipAttribute::ALL
                .iter()
                .filter(|attribute| !ignored.contains(attribute))
                .all(|attribute| self.attribute(*attribute) == other.attribute(*attribute))
    }
}
