use std::path::Path;

use rust_xlsxwriter::{Table, Workbook, Worksheet};

use crate::committees::diff::MembershipDiff;
use crate::committees::error::Result;
use crate::committees::model::Membership;

const MEMBERSHIP_COLUMNS: [&str; 7] = [
    "person_id",
    "committee_id",
    "committee_name",
    "role",
    "start_date",
    "end_date",
    "relationship_id",
];

const CHANGED_COLUMNS: [&str; 9] = [
    "person_id",
    "committee_id",
    "committee_name",
    "current_role",
    "new_role",
    "current_start_date",
    "new_start_date",
    "current_end_date",
    "new_end_date",
];

/// Writes the planned membership changes as a workbook with one sheet per
/// category: `New`, `Changed` and `Obsolete`.
pub fn write_plan(path: &Path, diff: &MembershipDiff) -> Result<()> {
    let mut workbook = Workbook::new();

    let rows: Vec<Vec<String>> = diff.new.iter().map(membership_row).collect();
    write_sheet(workbook.add_worksheet(), "New", &MEMBERSHIP_COLUMNS, &rows)?;

    let rows: Vec<Vec<String>> = diff
        .changed
        .iter()
        .map(|change| {
            let (current, imported) = (&change.current, &change.imported);
            vec![
                imported.person_id.clone(),
                imported.committee_id.clone(),
                committee_name(imported).or_else(|| committee_name(current)).unwrap_or_default(),
                current.role.clone(),
                imported.role.clone(),
                date(current.start_date),
                date(imported.start_date),
                date(current.end_date),
                date(imported.end_date),
            ]
        })
        .collect();
    write_sheet(workbook.add_worksheet(), "Changed", &CHANGED_COLUMNS, &rows)?;

    let rows: Vec<Vec<String>> = diff.obsolete.iter().map(membership_row).collect();
    write_sheet(workbook.add_worksheet(), "Obsolete", &MEMBERSHIP_COLUMNS, &rows)?;

    workbook.save(path)?;
    Ok(())
}

fn write_sheet(
    worksheet: &mut Worksheet,
    name: &str,
    columns: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    worksheet.set_name(name)?;
    for (col_idx, header) in columns.iter().enumerate() {
        worksheet.write_string(0, col_idx as u16, *header)?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            worksheet.write_string((row_idx + 1) as u32, col_idx as u16, cell)?;
        }
    }

    let table = Table::new().set_autofilter(true);
    let col_end = (columns.len() as u16).saturating_sub(1);
    // a table needs at least one data row
    let row_end = rows.len().max(1) as u32;
    worksheet.add_table(0, 0, row_end, col_end, &table)?;
    Ok(())
}

fn membership_row(membership: &Membership) -> Vec<String> {
    vec![
        membership.person_id.clone(),
        membership.committee_id.clone(),
        committee_name(membership).unwrap_or_default(),
        membership.role.clone(),
        date(membership.start_date),
        date(membership.end_date),
        membership
            .relationship_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    ]
}

fn committee_name(membership: &Membership) -> Option<String> {
    membership.committee_name.clone()
}

fn date(value: Option<chrono::NaiveDate>) -> String {
    value.map(|date| date.to_string()).unwrap_or_default()
}
