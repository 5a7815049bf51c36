use chrono::NaiveDate;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

use crate::models::{Follower, UserExportRow};

/// Date formatter for the export: `DD/MM/YYYY`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Content type of the produced file, set by the download handler.
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn write_header(sheet: &mut Worksheet, columns: &[&str]) -> Result<(), XlsxError> {
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }
    Ok(())
}

fn write_follower_rows(
    sheet: &mut Worksheet,
    followers: &[Follower],
    with_kol: bool,
) -> Result<(), XlsxError> {
    for (index, f) in followers.iter().enumerate() {
        let row = (index + 1) as u32;
        sheet.write_number(row, 0, (index + 1) as f64)?;
        sheet.write_string(row, 1, &f.fullname)?;
        sheet.write_string(row, 2, &f.phone_number)?;
        sheet.write_string(row, 3, &format_date(f.arrival_date))?;
        if with_kol {
            if let Some(member) = &f.member_fullname {
                sheet.write_string(row, 4, member)?;
            }
        }
    }
    Ok(())
}

/// build_workbook
///
/// Serializes the three row sets into a three-sheet workbook and returns the
/// xlsx bytes. Sheet names are part of the external contract:
/// - `Followers`: registrants attributed to a member, with the member name.
/// - `KOL`: the member/user list (seed administrator already excluded).
/// - `Public Followers`: unattributed registrants.
pub fn build_workbook(
    followers: &[Follower],
    users: &[UserExportRow],
    public_followers: &[Follower],
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet().set_name("Followers")?;
    write_header(sheet, &["no", "name", "phone", "joinDate", "kol"])?;
    write_follower_rows(sheet, followers, true)?;

    let sheet = workbook.add_worksheet().set_name("KOL")?;
    write_header(sheet, &["no", "username", "fullname"])?;
    for (index, u) in users.iter().enumerate() {
        let row = (index + 1) as u32;
        sheet.write_number(row, 0, (index + 1) as f64)?;
        sheet.write_string(row, 1, &u.username)?;
        sheet.write_string(row, 2, &u.fullname)?;
    }

    let sheet = workbook.add_worksheet().set_name("Public Followers")?;
    write_header(sheet, &["no", "name", "phone", "joinDate"])?;
    write_follower_rows(sheet, public_followers, false)?;

    workbook.save_to_buffer()
}
