use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::committees::error::Result;
use crate::committees::model::MembershipAttribute;

/// Top-level configuration, usually read from a TOML file. Every section and
/// every value has a default so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub crm: CrmSettings,
    pub tracker: TrackerSettings,
    pub contacts: ContactSettings,
    pub roles: RoleSettings,
    pub diff: DiffSettings,
}

impl SyncConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// Where and how to reach the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmSettings {
    pub url: String,
    pub api_key: String,
    pub site_key: String,
    pub timeout_secs: u64,
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            site_key: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Identity tracker type used to bind roster IDs to CRM contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    #[serde(rename = "type")]
    pub tracker_type: String,
    pub prefix: String,
    pub label: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tracker_type: "session".into(),
            prefix: "SES-".into(),
            label: "Session".into(),
        }
    }
}

/// How imported persons and committees are represented as CRM contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSettings {
    /// Value of the contact `source` field for created individuals.
    pub source: String,
    /// Title of the group every synchronised contact is added to.
    pub group_title: String,
    pub committee_subtype_name: String,
    pub committee_subtype_label: String,
    /// Display name for parliamentary groups; `{name}` is replaced by the
    /// name from the roster.
    pub parliamentary_group_template: String,
    /// Organization whose work address imported addresses are shared with.
    /// Taken from the first address supplement in the roster when unset.
    pub parliament_name: Option<String>,
    /// Spelling fixes applied to prefixes before looking up option values.
    pub prefix_aliases: BTreeMap<String, String>,
    pub gender_aliases: BTreeMap<String, String>,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            source: "committee_sync".into(),
            group_title: "Lobby-Kontakte".into(),
            committee_subtype_name: "Committee".into(),
            committee_subtype_label: "Gremium".into(),
            parliamentary_group_template: "Fraktion {name} im Deutschen Bundestag".into(),
            parliament_name: None,
            prefix_aliases: BTreeMap::from([
                ("Frau".to_string(), "Frau".to_string()),
                ("Herrn".to_string(), "Herr".to_string()),
            ]),
            gender_aliases: BTreeMap::from([
                ("m".to_string(), "männlich".to_string()),
                ("w".to_string(), "weiblich".to_string()),
            ]),
        }
    }
}

impl ContactSettings {
    pub fn parliamentary_group_name(&self, name: &str) -> String {
        self.parliamentary_group_template.replace("{name}", name)
    }
}

/// One relationship type between a person (A) and a committee (B), together
/// with the role labels that map onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeSpec {
    pub name_a_b: String,
    pub name_b_a: String,
    pub label_a_b: String,
    pub label_b_a: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RelationshipTypeSpec {
    fn new(name: &str, label: &str, roles: &[&str]) -> Self {
        Self {
            name_a_b: format!("is_committee_{name}_of"),
            name_b_a: format!("has_committee_{name}"),
            label_a_b: format!("{label} von"),
            label_b_a: format!("{label} ist"),
            description: String::new(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
        }
    }
}

/// Role to relationship type table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    /// `name_a_b` of the type used for roles without a mapping.
    pub default_type: String,
    pub types: Vec<RelationshipTypeSpec>,
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self {
            default_type: "is_committee_member_of".into(),
            types: vec![
                RelationshipTypeSpec::new(
                    "chairperson",
                    "Vorsitzende*r",
                    &["Vorsitzender", "Vorsitzende", "Chairperson"],
                ),
                RelationshipTypeSpec::new(
                    "deputy_chairperson",
                    "stellv. Vorsitzende*r",
                    &["stellv. Vorsitzender", "stellv. Vorsitzende", "Deputy Chairperson"],
                ),
                RelationshipTypeSpec::new(
                    "obperson",
                    "Obperson",
                    &["Obmann", "Obfrau", "Obperson", "Spokesperson"],
                ),
                RelationshipTypeSpec::new("member", "Mitglied", &["Mitglied", "Member"]),
                RelationshipTypeSpec::new(
                    "deputy_member",
                    "stellv. Mitglied",
                    &["stellv. Mitglied", "Deputy Member"],
                ),
            ],
        }
    }
}

/// Membership comparison settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffSettings {
    pub ignored_attributes: Vec<MembershipAttribute>,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            ignored_attributes: MembershipAttribute::default_ignored(),
        }
    }
}
