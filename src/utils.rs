use crate::error::{Result, SalesEngineError};
use chrono::{Datelike, NaiveDate};

/// First month of the business fiscal year (August).
pub const DEFAULT_FISCAL_YEAR_START_MONTH: u32 = 8;

pub fn validate_fiscal_year_start_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(SalesEngineError::Config(format!(
            "fiscal year start month {} must be between 1 and 12",
            month
        )));
    }
    Ok(())
}

/// Fiscal year a date belongs to, labeled by the calendar year the fiscal
/// year ends in.
///
/// With an August start, 2024-07-31 is FY2024 and 2024-08-01 is FY2025.
pub fn fiscal_year_for(date: NaiveDate, start_month: u32) -> i32 {
    if start_month > 1 && date.month() >= start_month {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Returns the 0-based index of the month within the fiscal year.
///
/// # Examples
/// - FY starts Aug (8): Aug=0, Dec=4, Jan=5, Jul=11
/// - FY starts Jan (1): Jan=0, ..., Dec=11
pub fn fiscal_month_index(calendar_month: u32, start_month: u32) -> u32 {
    if calendar_month >= start_month {
        calendar_month - start_month
    } else {
        calendar_month + 12 - start_month
    }
}

/// Fiscal quarter (1-4) a date falls in. Returns `None` for an invalid
/// start month.
pub fn fiscal_quarter_for(date: NaiveDate, start_month: u32) -> Option<u8> {
    if !(1..=12).contains(&start_month) {
        return None;
    }
    let index = fiscal_month_index(date.month(), start_month);
    u8::try_from(index / 3 + 1).ok()
}

/// First and last calendar day of a fiscal year.
pub fn fiscal_year_bounds(fiscal_year: i32, start_month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start_year = if start_month > 1 {
        fiscal_year - 1
    } else {
        fiscal_year
    };
    let start = NaiveDate::from_ymd_opt(start_year, start_month, 1)?;
    let end = NaiveDate::from_ymd_opt(start_year + 1, start_month, 1)?.pred_opt()?;
    Some((start, end))
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
