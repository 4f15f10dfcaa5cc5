use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the synthetic summary row appended to the dept/LOB view.
pub const TOTAL_LOB: &str = "Total";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum SalesStatus {
    /// A completion date has been recorded.
    Completed,
    /// No completion date, but commission has been booked.
    Booked,
    /// No completion date and no commission yet.
    InProgress,
}

impl fmt::Display for SalesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SalesStatus::Completed => "Completed",
            SalesStatus::Booked => "Booked",
            SalesStatus::InProgress => "InProgress",
        };
        f.write_str(label)
    }
}

/// One valid row of the primary worksheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    /// 1-based worksheet row this record was read from
    pub source_row: usize,
    pub received_date: NaiveDate,
    pub completion_date: Option<NaiveDate>,
    pub sales_rep: String,
    pub product_type: String,
    pub department: String,
    pub po_value: f64,
    pub vertiv_value: f64,
    pub buy_resell_value: f64,
    pub agency_margin: f64,
    pub total_commission: f64,
    pub commission_percentage: f64,
    pub status: SalesStatus,
    pub fiscal_year: i32,
    /// Fiscal quarter of the completion date; `None` while the sale is pending
    pub quarter: Option<u8>,
}

impl SalesRecord {
    pub fn is_remaining(&self) -> bool {
        self.completion_date.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        self.completion_date.is_none() && self.total_commission == 0.0
    }

    /// Quarter as a plain number, 0 when unassigned.
    pub fn quarter_number(&self) -> u8 {
        self.quarter.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub product_type: String,
    pub agency_margin: f64,
    pub buy_resell_margin: f64,
    pub total_margin: f64,
    pub vertiv_value: f64,
    pub po_value: f64,
    pub record_count: usize,
    /// Share of the chosen value column, in percent
    pub percentage_of_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepAggregate {
    pub sales_rep: String,
    pub agency_margin: f64,
    pub buy_resell_margin: f64,
    pub total_margin: f64,
    pub vertiv_value: f64,
    pub po_value: f64,
    pub record_count: usize,
    pub rank: usize,
}

impl RepAggregate {
    pub fn empty(sales_rep: impl Into<String>) -> Self {
        Self {
            sales_rep: sales_rep.into(),
            agency_margin: 0.0,
            buy_resell_margin: 0.0,
            total_margin: 0.0,
            vertiv_value: 0.0,
            po_value: 0.0,
            record_count: 0,
            rank: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeptLobAggregate {
    pub lob: String,
    pub margin_target: f64,
    pub margin_ytd: f64,
    /// 1-based position among the non-Total rows; always 0 for the Total row
    pub rank: usize,
}

impl DeptLobAggregate {
    pub fn is_total(&self) -> bool {
        self.lob == TOTAL_LOB
    }

    /// YTD as a percentage of target, 0 when no target is set.
    pub fn achievement_percentage(&self) -> f64 {
        if self.margin_target == 0.0 {
            0.0
        } else {
            self.margin_ytd / self.margin_target * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterSummary {
    pub fiscal_year: i32,
    pub quarter: u8,
    pub total_margin: f64,
    pub vertiv_value: f64,
    pub record_count: usize,
}

/// Counters describing what happened to each worksheet row during a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub sheet_name: String,
    pub used_fallback_sheet: bool,
    pub total_rows: usize,
    pub loaded: usize,
    pub skipped_blank: usize,
    pub skipped_cancelled: usize,
    pub skipped_invalid_received_date: usize,
    pub skipped_missing_rep: usize,
    /// Unparseable numeric cells on counted rows; each was read as zero
    pub invalid_numeric_cells: usize,
    /// Completion cells that held something other than a date; those rows
    /// were treated as pending
    pub invalid_completion_dates: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.skipped_blank
            + self.skipped_cancelled
            + self.skipped_invalid_received_date
            + self.skipped_missing_rep
    }
}
