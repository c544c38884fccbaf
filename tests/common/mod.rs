#![allow(dead_code)]

use std::path::Path;

use committee_sync::config::SyncConfig;
use committee_sync::context::SyncContext;
use committee_sync::crm::memory::InMemoryCrm;
use committee_sync::crm::{CrmApi, Entity, RecordExt};
use committee_sync::model::{Committee, Membership, Person, Roster};
use committee_sync::sync::{SyncReport, Syncer};
use committee_sync::tools::{CrmGroups, CrmIdTracker};
use rust_xlsxwriter::Workbook;

/// Rows of a Session export; the header row is added when writing.
#[derive(Default)]
pub struct SessionSheets {
    pub committees: Option<Vec<Vec<&'static str>>>,
    pub persons: Option<Vec<Vec<&'static str>>>,
    pub details: Option<Vec<Vec<&'static str>>>,
    pub memberships: Option<Vec<Vec<&'static str>>>,
}

impl SessionSheets {
    /// Two committees, three persons, contact details and four memberships.
    pub fn sample() -> Self {
        Self {
            committees: Some(vec![
                vec!["7", "A07", "Haushalt", "Haushaltsausschuss", "2459514", ""],
                vec!["8", "A08", "Inneres", "Ausschuss für Inneres und Heimat", "2459514", "2460000"],
            ]),
            persons: Some(vec![
                vec!["123", "Frau", "Erika", "Mustermann", "Dr."],
                vec!["124", "Herrn", "Max", "Beispiel", ""],
                vec!["125", "Frau", "Anna", "Probe", ""],
                vec!["", "Herrn", "Ohne", "Kennung", ""],
            ]),
            details: Some(vec![
                vec![
                    "123", "900", "Deutscher Bundestag", "Platz der Republik", "1", "11011", "Berlin",
                    "+49 30 227-0", "", "erika.mustermann@bundestag.de",
                ],
                vec!["124", "901", "", "", "", "", "", "", "", "max.beispiel@bundestag.de"],
                vec!["125", "902", "", "", "", "", "", "", "", "anna.probe(at)bundestag"],
            ]),
            memberships: Some(vec![
                vec!["7", "123", "Vorsitzende", "CDU/CSU", "2459514", ""],
                vec!["7", "124", "Mitglied", "SPD", "", ""],
                vec!["8", "124", "stellv. Mitglied", "SPD", "", ""],
                vec!["8", "125", "Obfrau", "", "26.10.2021", ""],
            ]),
        }
    }

    pub fn write(&self, path: &Path) {
        let mut workbook = Workbook::new();
        let sheets = [
            ("Session_Gremien", &self.committees, 6),
            ("Session_Personen", &self.persons, 5),
            ("Session_PersAdressen", &self.details, 10),
            ("Session_GrMitgl", &self.memberships, 6),
        ];
        for (name, rows, columns) in sheets {
            let Some(rows) = rows else { continue };
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(name).expect("sheet name");
            for column in 0..columns {
                worksheet
                    .write_string(0, column, &format!("column {}", column + 1))
                    .expect("header");
            }
            for (row_idx, row) in rows.iter().enumerate() {
                for (col_idx, cell) in row.iter().enumerate() {
                    let (row, col) = ((row_idx + 1) as u32, col_idx as u16);
                    if cell.is_empty() {
                        continue;
                    }
                    // numeric cells are stored as numbers, like the real export does
                    match cell.parse::<f64>() {
                        Ok(number) => worksheet.write_number(row, col, number),
                        Err(_) => worksheet.write_string(row, col, *cell),
                    }
                    .expect("cell written");
                }
            }
        }
        workbook.save(path).expect("workbook saved");
    }
}

/// A small roster built in code.
pub fn roster(committees: &[(&str, &str)], memberships: &[(&str, &str, &str)]) -> Roster {
    let mut roster = Roster::new();
    for (id, name) in committees {
        roster.add_committee(Committee::new(*id, *name));
    }
    for (person, _, _) in memberships {
        if roster.person(person).is_none() {
            roster.add_person(Person::new(*person, "Vorname", format!("Nachname {person}")));
        }
    }
    for (person, committee, role) in memberships {
        roster.add_membership(Membership::new(*person, *committee, *role));
    }
    roster
}

pub fn sync(api: &dyn CrmApi, roster: &Roster) -> SyncReport {
    sync_with_context(api, roster, &mut SyncContext::new())
}

pub fn sync_with_context(api: &dyn CrmApi, roster: &Roster, ctx: &mut SyncContext) -> SyncReport {
    let config = SyncConfig::default();
    let tracker = CrmIdTracker::new(api, config.tracker.clone());
    let groups = CrmGroups::new(api);
    Syncer::new(api, &tracker, &groups, &config)
        .sync(roster, ctx)
        .expect("sync succeeds")
}

pub fn relationship_type(crm: &InMemoryCrm, name_a_b: &str) -> i64 {
    crm.records(Entity::RelationshipType)
        .into_iter()
        .find(|record| record.text_field("name_a_b").as_deref() == Some(name_a_b))
        .and_then(|record| record.id())
        .expect("relationship type exists")
}

pub fn organization(crm: &InMemoryCrm, name: &str) -> i64 {
    crm.records(Entity::Contact)
        .into_iter()
        .filter(|record| record.text_field("organization_name").as_deref() == Some(name))
        .filter_map(|record| record.id())
        .min()
        .expect("organization exists")
}

pub fn contact_of(crm: &InMemoryCrm, external_id: &str) -> i64 {
    let identifier = format!("SES-{external_id}");
    crm.records(Entity::IdentityTracker)
        .into_iter()
        .rev()
        .find(|record| record.text_field("identifier").as_deref() == Some(identifier.as_str()))
        .and_then(|record| record.int_field("contact_id"))
        .expect("contact is tracked")
}

pub fn active_relationships(crm: &InMemoryCrm) -> Vec<committee_sync::crm::Record> {
    crm.records(Entity::Relationship)
        .into_iter()
        .filter(|record| record.flag("is_active"))
        .collect()
}
