use crate::cell::{read_date, read_decimal, read_string, CellParse};
use crate::config::ColumnLayout;
use crate::schema::{SalesRecord, SalesStatus};
use crate::utils::{fiscal_quarter_for, fiscal_year_for};
use calamine::Data;
use chrono::NaiveDate;
use std::fmt;

static EMPTY: Data = Data::Empty;

/// Raw field values pulled out of one worksheet row by the cell reader.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFields {
    pub source_row: usize,
    pub received_date: CellParse<NaiveDate>,
    pub completion_date: CellParse<NaiveDate>,
    pub sales_rep: String,
    pub status_text: String,
    pub product_type: String,
    pub department: String,
    pub po_value: f64,
    pub vertiv_value: f64,
    pub buy_resell_value: f64,
    pub agency_margin: f64,
    pub total_commission: f64,
    pub commission_percentage: f64,
    /// Numeric cells that held text which could not be parsed; each was
    /// read as zero
    pub invalid_numeric: Vec<InvalidCell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCell {
    pub field: &'static str,
    /// 1-based worksheet column
    pub column: usize,
    pub reason: String,
}

impl fmt::Display for InvalidCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (column {}): {}", self.field, self.column, self.reason)
    }
}

impl RowFields {
    /// Extracts the configured columns from a row slice. `column_offset` is
    /// the absolute index of the slice's first cell.
    pub fn extract(
        cells: &[Data],
        column_offset: usize,
        source_row: usize,
        layout: &ColumnLayout,
    ) -> Self {
        let cell = |column: usize| cell_at(cells, column_offset, column);

        let mut invalid_numeric = Vec::new();
        let mut decimal = |field: &'static str, column: usize| match read_decimal(cell(column)) {
            CellParse::Invalid(reason) => {
                invalid_numeric.push(InvalidCell {
                    field,
                    column,
                    reason,
                });
                0.0
            }
            parsed => parsed.or_zero(),
        };
        let po_value = decimal("po_value", layout.po_value);
        let vertiv_value = decimal("vertiv_value", layout.vertiv_value);
        let buy_resell_value = decimal("buy_resell_value", layout.buy_resell_value);
        let agency_margin = decimal("agency_margin", layout.agency_margin);
        let total_commission = decimal("total_commission", layout.total_commission);
        let commission_percentage = decimal("commission_percentage", layout.commission_percentage);

        Self {
            source_row,
            received_date: read_date(cell(layout.received_date)),
            completion_date: read_date(cell(layout.completion_date)),
            sales_rep: read_string(cell(layout.sales_rep)).or_zero(),
            status_text: read_string(cell(layout.status)).or_zero(),
            product_type: read_string(cell(layout.product_type)).or_zero(),
            department: read_string(cell(layout.department)).or_zero(),
            po_value,
            vertiv_value,
            buy_resell_value,
            agency_margin,
            total_commission,
            commission_percentage,
            invalid_numeric,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        is_cancelled_text(&self.status_text)
    }

    /// Completion date if one parsed; garbled completion cells count as absent.
    pub fn completion(&self) -> Option<NaiveDate> {
        self.completion_date.clone().value()
    }
}

fn cell_at(cells: &[Data], column_offset: usize, column: usize) -> &Data {
    column
        .checked_sub(1 + column_offset)
        .and_then(|idx| cells.get(idx))
        .unwrap_or(&EMPTY)
}

/// Both spellings of "cancelled", case-insensitive.
pub fn is_cancelled_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("cancelled") || lowered.contains("canceled")
}

pub fn classify_status(completion: Option<NaiveDate>, total_commission: f64) -> SalesStatus {
    match completion {
        Some(_) => SalesStatus::Completed,
        None if total_commission == 0.0 => SalesStatus::InProgress,
        None => SalesStatus::Booked,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Cancelled,
    InvalidReceivedDate(String),
    MissingSalesRep,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cancelled => write!(f, "order cancelled"),
            SkipReason::InvalidReceivedDate(reason) => {
                write!(f, "invalid received date: {}", reason)
            }
            SkipReason::MissingSalesRep => write!(f, "missing sales rep"),
        }
    }
}

pub struct RowClassifier {
    fiscal_year_start_month: u32,
}

impl RowClassifier {
    pub fn new(fiscal_year_start_month: u32) -> Self {
        Self {
            fiscal_year_start_month,
        }
    }

    /// Validates the received date and cancellation state. Rows passing this
    /// check are real transactions even if they later fail [`Self::classify`].
    pub fn received_date(&self, fields: &RowFields) -> Result<NaiveDate, SkipReason> {
        if fields.is_cancelled() {
            return Err(SkipReason::Cancelled);
        }
        match &fields.received_date {
            CellParse::Value(date) => Ok(*date),
            CellParse::Blank => Err(SkipReason::InvalidReceivedDate("blank".to_string())),
            CellParse::Invalid(reason) => Err(SkipReason::InvalidReceivedDate(reason.clone())),
        }
    }

    pub fn classify(&self, fields: &RowFields) -> Result<SalesRecord, SkipReason> {
        let received_date = self.received_date(fields)?;

        if fields.sales_rep.trim().is_empty() {
            return Err(SkipReason::MissingSalesRep);
        }

        let completion_date = fields.completion();
        let status = classify_status(completion_date, fields.total_commission);
        let quarter =
            completion_date.and_then(|d| fiscal_quarter_for(d, self.fiscal_year_start_month));

        Ok(SalesRecord {
            source_row: fields.source_row,
            received_date,
            completion_date,
            sales_rep: fields.sales_rep.trim().to_string(),
            product_type: fields.product_type.clone(),
            department: fields.department.clone(),
            po_value: fields.po_value,
            vertiv_value: fields.vertiv_value,
            buy_resell_value: fields.buy_resell_value,
            agency_margin: fields.agency_margin,
            total_commission: fields.total_commission,
            commission_percentage: fields.commission_percentage,
            status,
            fiscal_year: fiscal_year_for(received_date, self.fiscal_year_start_month),
            quarter,
        })
    }
}
