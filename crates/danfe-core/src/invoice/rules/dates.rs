//! Issue date parsing.

use chrono::{Datelike, NaiveDate};

/// Electronic invoices exist from 2006 on; anything outside this window is noise.
pub const MIN_PLAUSIBLE_YEAR: i32 = 2006;
pub const MAX_PLAUSIBLE_YEAR: i32 = 2035;

/// Accepted date layouts, tried in order.
pub const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%d/%m/%y"];

/// Parse a date against the accepted formats.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // %Y happily reads "24" as year 24, so short years must fall through to %y
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .filter(|d| d.year() >= 1000)
    })
}

/// Year falls inside the electronic-invoice window.
pub fn is_plausible(date: NaiveDate) -> bool {
    (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(&date.year())
}

/// Parse and check plausibility in one step.
pub fn parse_plausible_date(s: &str) -> Option<NaiveDate> {
    parse_date(s).filter(|d| is_plausible(*d))
}
