use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::committees::error::{Result, SyncError};

mod membership;

pub use membership::{Membership, MembershipAttribute};

/// Identifier used by the external roster. It is kept as the plain string
/// found in the spreadsheet so numeric and alphanumeric sources behave alike.
pub type ExternalId = String;

/// Identifier of a record inside the CRM.
pub type CrmId = i64;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("static email pattern compiles")
});

/// Kind of body a committee represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeType {
    /// A working committee of the parliament.
    #[default]
    ParliamentaryCommittee,
    /// A parliamentary group, i.e. the faction of one party.
    ParliamentaryGroup,
}

impl std::fmt::Display for CommitteeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitteeType::ParliamentaryCommittee => write!(f, "parliamentary_committee"),
            CommitteeType::ParliamentaryGroup => write!(f, "parliamentary_group"),
        }
    }
}

/// A committee (or parliamentary group) from the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub id: ExternalId,
    pub name: String,
    pub name_short: Option<String>,
    pub handle: Option<String>,
    pub committee_type: CommitteeType,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Committee {
    /// Creates a plain parliamentary committee.
    pub fn new(id: impl Into<ExternalId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            name_short: None,
            handle: None,
            committee_type: CommitteeType::ParliamentaryCommittee,
            start_date: None,
            end_date: None,
        }
    }

    /// Builder style setter for the committee type.
    pub fn with_type(mut self, committee_type: CommitteeType) -> Self {
        self.committee_type = committee_type;
        self
    }
}

/// An individual from the roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: ExternalId,
    pub prefix: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub formal_title: Option<String>,
    pub gender: Option<String>,
}

impl Person {
    pub fn new(
        id: impl Into<ExternalId>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    /// Human readable name used in log lines.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A postal address attached to a person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub person_id: ExternalId,
    pub id: ExternalId,
    pub street_address: String,
    pub supplemental_address_1: Option<String>,
    pub postal_code: String,
    pub city: String,
}

/// An email address attached to a person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub person_id: ExternalId,
    pub id: ExternalId,
    pub email: String,
}

impl Email {
    /// Checks that the address is present and well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(self.invalid("attribute 'email' is empty"));
        }
        if !EMAIL_PATTERN.is_match(self.email.trim()) {
            return Err(self.invalid("attribute 'email' is not a valid email"));
        }
        Ok(())
    }

    fn invalid(&self, message: &str) -> SyncError {
        SyncError::Validation {
            entity: "email",
            id: self.id.clone(),
            message: message.to_string(),
        }
    }
}

/// A phone number attached to a person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phone {
    pub person_id: ExternalId,
    pub id: ExternalId,
    pub phone: String,
}

/// The imported data set: committees, persons, their contact details, and the
/// memberships linking persons to committees.
///
/// The same structure is used for the partial view of the CRM produced by the
/// current-state extractor, in which case only memberships are populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    committees: BTreeMap<ExternalId, Committee>,
    persons: BTreeMap<ExternalId, Person>,
    addresses: Vec<Address>,
    emails: Vec<Email>,
    phones: Vec<Phone>,
    memberships: Vec<Membership>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a committee, replacing an earlier entry with the same identifier.
    pub fn add_committee(&mut self, committee: Committee) -> Option<Committee> {
        self.committees.insert(committee.id.clone(), committee)
    }

    /// Adds a person, replacing an earlier entry with the same identifier.
    pub fn add_person(&mut self, person: Person) -> Option<Person> {
        self.persons.insert(person.id.clone(), person)
    }

    pub fn add_address(&mut self, address: Address) {
        self.addresses.push(address);
    }

    pub fn add_email(&mut self, email: Email) {
        self.emails.push(email);
    }

    pub fn add_phone(&mut self, phone: Phone) {
        self.phones.push(phone);
    }

    /// Adds a membership. When the committee is already known its display name
    /// is copied onto the membership for reporting.
    pub fn add_membership(&mut self, mut membership: Membership) {
        if membership.committee_name.is_none() {
            if let Some(committee) = self.committees.get(&membership.committee_id) {
                membership.committee_name = Some(committee.name.clone());
            }
        }
        self.memberships.push(membership);
    }

    pub fn committee(&self, id: &str) -> Option<&Committee> {
        self.committees.get(id)
    }

    pub fn person(&self, id: &str) -> Option<&Person> {
        self.persons.get(id)
    }

    pub fn committees(&self) -> impl Iterator<Item = &Committee> {
        self.committees.values()
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    pub fn committee_count(&self) -> usize {
        self.committees.len()
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn addresses_of<'a>(&'a self, person_id: &'a str) -> impl Iterator<Item = &'a Address> {
        self.addresses
            .iter()
            .filter(move |address| address.person_id == person_id)
    }

    pub fn emails_of<'a>(&'a self, person_id: &'a str) -> impl Iterator<Item = &'a Email> {
        self.emails
            .iter()
            .filter(move |email| email.person_id == person_id)
    }

    pub fn phones_of<'a>(&'a self, person_id: &'a str) -> impl Iterator<Item = &'a Phone> {
        self.phones
            .iter()
            .filter(move |phone| phone.person_id == person_id)
    }

    /// Memberships referring to a person or committee that is not part of the
    /// roster.
    pub fn dangling_memberships(&self) -> impl Iterator<Item = &Membership> {
        self.memberships.iter().filter(|membership| {
            !self.persons.contains_key(&membership.person_id)
                || !self.committees.contains_key(&membership.committee_id)
        })
    }
}
