//! Reader for the "Session" spreadsheet export.
//!
//! The export consists of four sheets with a header row and fixed column
//! positions. Column numbers below are 1-based, as they appear in Excel.

use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx, open_workbook};
use chrono::{Duration, NaiveDate};
use tracing::{debug, info, instrument, warn};

use crate::committees::error::{Result, SyncError};
use crate::committees::model::{Address, Committee, Email, Membership, Person, Phone, Roster};

pub const COMMITTEE_SHEET: &str = "Session_Gremien";
pub const PERSON_SHEET: &str = "Session_Personen";
pub const DETAIL_SHEET: &str = "Session_PersAdressen";
pub const MEMBERSHIP_SHEET: &str = "Session_GrMitgl";

pub const REQUIRED_SHEETS: [&str; 2] = [COMMITTEE_SHEET, PERSON_SHEET];
pub const OPTIONAL_SHEETS: [&str; 2] = [DETAIL_SHEET, MEMBERSHIP_SHEET];

mod committee_col {
    pub const ID: u32 = 1;
    pub const HANDLE: u32 = 2;
    pub const NAME_SHORT: u32 = 3;
    pub const NAME: u32 = 4;
    pub const START_DATE: u32 = 5;
    pub const END_DATE: u32 = 6;
}

mod person_col {
    pub const ID: u32 = 1;
    pub const PREFIX: u32 = 2;
    pub const FIRST_NAME: u32 = 3;
    pub const LAST_NAME: u32 = 4;
    pub const FORMAL_TITLE: u32 = 5;
}

mod detail_col {
    pub const CONTACT_ID: u32 = 1;
    pub const ID: u32 = 2;
    pub const SUPPLEMENTAL_ADDRESS: u32 = 3;
    pub const STREET: u32 = 4;
    pub const HOUSE_NUMBER: u32 = 5;
    pub const POSTAL_CODE: u32 = 6;
    pub const CITY: u32 = 7;
    pub const PHONE: u32 = 8;
    pub const EMAIL: u32 = 10;
}

mod membership_col {
    pub const COMMITTEE_ID: u32 = 1;
    pub const CONTACT_ID: u32 = 2;
    pub const TITLE: u32 = 3;
    pub const REPRESENTS: u32 = 4;
    pub const START_DATE: u32 = 5;
    pub const END_DATE: u32 = 6;
}

/// Julian day number of 0001-01-01 (proleptic Gregorian) minus one, matching
/// chrono's "days from CE" count.
const JULIAN_DAY_OFFSET: i64 = 1_721_425;

/// Numbers from this value on are read as Julian day numbers, smaller ones as
/// Excel serial dates.
const JULIAN_DAY_THRESHOLD: f64 = 1_000_000.0;

/// Outcome of [`probe_workbook`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub sheets: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
}

impl ProbeReport {
    pub fn is_importable(&self) -> bool {
        self.missing_required.is_empty()
    }
}

/// Checks which of the expected sheets a workbook contains without importing
/// it.
pub fn probe_workbook(path: &Path) -> Result<ProbeReport> {
    if !path.exists() {
        return Err(SyncError::MissingInput(path.to_path_buf()));
    }
    let workbook: Xlsx<_> = open_workbook(path)?;
    let sheets = workbook.sheet_names().to_vec();
    let missing = |names: &[&str]| -> Vec<String> {
        names
            .iter()
            .filter(|name| !sheets.iter().any(|sheet| sheet.as_str() == **name))
            .map(|name| name.to_string())
            .collect()
    };

    let report = ProbeReport {
        missing_required: missing(&REQUIRED_SHEETS),
        missing_optional: missing(&OPTIONAL_SHEETS),
        sheets,
    };
    for sheet in &report.missing_required {
        warn!(%sheet, "required sheet missing");
    }
    Ok(report)
}

/// Reads a complete roster from a Session workbook.
#[instrument(level = "info", skip_all, fields(input = %path.display()))]
pub fn read_roster(path: &Path) -> Result<Roster> {
    if !path.exists() {
        return Err(SyncError::MissingInput(path.to_path_buf()));
    }
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let mut roster = Roster::new();

    let committees = read_required_sheet(&mut workbook, COMMITTEE_SHEET)?;
    read_committees(&committees, &mut roster);

    let persons = read_required_sheet(&mut workbook, PERSON_SHEET)?;
    read_persons(&persons, &mut roster);

    if let Some(details) = read_optional_sheet(&mut workbook, DETAIL_SHEET)? {
        read_details(&details, &mut roster);
    }
    if let Some(memberships) = read_optional_sheet(&mut workbook, MEMBERSHIP_SHEET)? {
        read_memberships(&memberships, &mut roster);
    }

    info!(
        committees = roster.committee_count(),
        persons = roster.person_count(),
        memberships = roster.memberships().len(),
        "read roster from workbook"
    );
    Ok(roster)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<Range<DataType>> {
    let range = workbook
        .worksheet_range(name)
        .ok_or_else(|| SyncError::InvalidWorkbook(format!("missing sheet '{name}'")))?;
    Ok(range?)
}

fn read_optional_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<Option<Range<DataType>>> {
    match workbook.worksheet_range(name) {
        Some(range) => Ok(Some(range?)),
        None => {
            warn!(sheet = name, "sheet missing, skipping");
            Ok(None)
        }
    }
}

/// Data rows of a sheet, addressed by 1-based column numbers.
struct SheetRows<'a> {
    range: &'a Range<DataType>,
}

impl<'a> SheetRows<'a> {
    fn new(range: &'a Range<DataType>) -> Self {
        Self { range }
    }

    /// Absolute indices of the rows below the header.
    fn data_rows(&self) -> std::ops::Range<u32> {
        let end = self.range.end().map_or(0, |(last, _)| last + 1);
        1..end.max(1)
    }

    fn text(&self, row: u32, column: u32) -> String {
        cell_to_string(self.range.get_value((row, column - 1)))
            .trim()
            .to_string()
    }

    fn optional(&self, row: u32, column: u32) -> Option<String> {
        Some(self.text(row, column)).filter(|value| !value.is_empty())
    }

    fn date(&self, row: u32, column: u32) -> Option<NaiveDate> {
        let text = self.text(row, column);
        if text.is_empty() {
            return None;
        }
        let parsed = parse_date(&text);
        if parsed.is_none() {
            warn!(row = row + 1, column, value = %text, "unreadable date, ignoring");
        }
        parsed
    }
}

fn read_committees(range: &Range<DataType>, roster: &mut Roster) {
    let rows = SheetRows::new(range);
    for row in rows.data_rows() {
        let id = rows.text(row, committee_col::ID);
        if id.is_empty() {
            continue;
        }
        let committee = Committee {
            name_short: rows.optional(row, committee_col::NAME_SHORT),
            handle: rows.optional(row, committee_col::HANDLE),
            start_date: rows.date(row, committee_col::START_DATE),
            end_date: rows.date(row, committee_col::END_DATE),
            ..Committee::new(id, rows.text(row, committee_col::NAME))
        };
        if let Some(previous) = roster.add_committee(committee) {
            warn!(committee = %previous.id, "duplicate committee row, keeping the last one");
        }
    }
    debug!(count = roster.committee_count(), "read committees");
}

fn read_persons(range: &Range<DataType>, roster: &mut Roster) {
    let rows = SheetRows::new(range);
    for row in rows.data_rows() {
        let id = rows.text(row, person_col::ID);
        if id.is_empty() {
            continue;
        }
        let person = Person {
            prefix: rows.optional(row, person_col::PREFIX),
            formal_title: rows.optional(row, person_col::FORMAL_TITLE),
            ..Person::new(
                id,
                rows.text(row, person_col::FIRST_NAME),
                rows.text(row, person_col::LAST_NAME),
            )
        };
        if let Some(previous) = roster.add_person(person) {
            warn!(person = %previous.id, "duplicate person row, keeping the last one");
        }
    }
    debug!(count = roster.person_count(), "read persons");
}

/// Each detail row may carry an address, a phone number and an email address.
fn read_details(range: &Range<DataType>, roster: &mut Roster) {
    let rows = SheetRows::new(range);
    for row in rows.data_rows() {
        let person_id = rows.text(row, detail_col::CONTACT_ID);
        if person_id.is_empty() {
            continue;
        }
        let id = rows.text(row, detail_col::ID);

        let street = format!(
            "{} {}",
            rows.text(row, detail_col::STREET),
            rows.text(row, detail_col::HOUSE_NUMBER)
        );
        let address = Address {
            person_id: person_id.clone(),
            id: id.clone(),
            street_address: street.trim().to_string(),
            supplemental_address_1: rows.optional(row, detail_col::SUPPLEMENTAL_ADDRESS),
            postal_code: rows.text(row, detail_col::POSTAL_CODE),
            city: rows.text(row, detail_col::CITY),
        };
        if !address.street_address.is_empty()
            || address.supplemental_address_1.is_some()
            || !address.postal_code.is_empty()
            || !address.city.is_empty()
        {
            roster.add_address(address);
        }

        if let Some(phone) = rows.optional(row, detail_col::PHONE) {
            roster.add_phone(Phone {
                person_id: person_id.clone(),
                id: id.clone(),
                phone,
            });
        }
        if let Some(email) = rows.optional(row, detail_col::EMAIL) {
            roster.add_email(Email {
                person_id,
                id,
                email,
            });
        }
    }
}

fn read_memberships(range: &Range<DataType>, roster: &mut Roster) {
    let rows = SheetRows::new(range);
    for row in rows.data_rows() {
        let committee_id = rows.text(row, membership_col::COMMITTEE_ID);
        let person_id = rows.text(row, membership_col::CONTACT_ID);
        if committee_id.is_empty() || person_id.is_empty() {
            continue;
        }
        roster.add_membership(Membership {
            represents: rows.optional(row, membership_col::REPRESENTS),
            start_date: rows.date(row, membership_col::START_DATE),
            end_date: rows.date(row, membership_col::END_DATE),
            ..Membership::new(person_id, committee_id, rows.text(row, membership_col::TITLE))
        });
    }
    debug!(count = roster.memberships().len(), "read memberships");
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) if value.fract() == 0.0 => format!("{value:.0}"),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Parses a date given as Julian day number, Excel serial number, ISO date
/// (optionally followed by a time) or German `dd.mm.yyyy`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(number) = text.parse::<f64>() {
        return date_from_number(number);
    }
    let day = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d.%m.%Y"))
        .ok()
}

fn date_from_number(number: f64) -> Option<NaiveDate> {
    if !number.is_finite() || number <= 0.0 {
        return None;
    }
    let days = number.trunc() as i64;
    if number >= JULIAN_DAY_THRESHOLD {
        let days_from_ce = i32::try_from(days - JULIAN_DAY_OFFSET).ok()?;
        NaiveDate::from_num_days_from_ce_opt(days_from_ce)
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn julian_day_numbers_convert_to_dates() {
        assert_eq!(parse_date("2440588"), NaiveDate::from_ymd_opt(1970, 1, 1));
        assert_eq!(parse_date("2459514"), NaiveDate::from_ymd_opt(2021, 10, 26));
    }

    #[test]
    fn excel_serials_and_strings_convert_to_dates() {
        assert_eq!(parse_date("44495"), NaiveDate::from_ymd_opt(2021, 10, 26));
        assert_eq!(parse_date("2021-10-26"), NaiveDate::from_ymd_opt(2021, 10, 26));
        assert_eq!(parse_date("2021-10-26 00:00:00"), NaiveDate::from_ymd_opt(2021, 10, 26));
        assert_eq!(parse_date("26.10.2021"), NaiveDate::from_ymd_opt(2021, 10, 26));
    }

    #[test]
    fn garbage_is_not_a_date() {
        assert_eq!(parse_date("soon"), None);
        assert_eq!(parse_date("0"), None);
        assert_eq!(parse_date("-5"), None);
    }

    #[test]
    fn whole_floats_render_without_fraction() {
        assert_eq!(cell_to_string(Some(&DataType::Float(4711.0))), "4711");
        assert_eq!(cell_to_string(Some(&DataType::Float(1.5))), "1.5");
        assert_eq!(cell_to_string(None), "");
    }
}
