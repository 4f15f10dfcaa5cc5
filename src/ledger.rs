use crate::cell::CellParse;
use crate::classifier::{RowClassifier, RowFields, SkipReason};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::schema::{DeptLobAggregate, LoadReport, RepAggregate, SalesRecord};
use crate::source::{FileStamp, RawWorkbook, WorkbookSource, XlsxFileSource};
use crate::summary_sheets::{find_sheet, parse_dept_lob, parse_leaderboard};
use calamine::{Data, Range};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::Path;

/// The canonical record list plus the scalars accumulated while building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    pub records: Vec<SalesRecord>,
    /// Commission on every row without a completion date
    pub pending_amount: f64,
    /// Estimated revenue on rows with neither completion date nor commission
    pub in_progress_amount: f64,
    pub report: LoadReport,
}

/// Everything one pass over a workbook produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedWorkbook {
    pub ledger: Ledger,
    /// Rows of the leaderboard sheet, when the workbook has one
    pub leaderboard: Option<Vec<RepAggregate>>,
    /// Rows of the dept/LOB sheet, when the workbook has one
    pub dept_lob: Option<Vec<DeptLobAggregate>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub source_stamp: Option<FileStamp>,
}

pub struct LedgerLoader<'a> {
    config: &'a EngineConfig,
    classifier: RowClassifier,
}

impl<'a> LedgerLoader<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            classifier: RowClassifier::new(config.fiscal_year_start_month),
        }
    }

    /// Builds the ledger from the primary worksheet's cells in one pass.
    pub fn load_range(&self, sheet_name: &str, range: &Range<Data>) -> Ledger {
        let mut ledger = Ledger {
            report: LoadReport {
                sheet_name: sheet_name.to_string(),
                ..LoadReport::default()
            },
            ..Ledger::default()
        };

        let (row_offset, column_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        for (idx, cells) in range.rows().enumerate() {
            let absolute_row = row_offset + idx;
            if absolute_row < self.config.header_rows {
                continue;
            }
            self.load_row(&mut ledger, cells, column_offset, absolute_row + 1);
        }

        debug!("Load counters for '{}': {:?}", sheet_name, ledger.report);
        ledger
    }

    fn load_row(&self, ledger: &mut Ledger, cells: &[Data], column_offset: usize, source_row: usize) {
        let report = &mut ledger.report;
        report.total_rows += 1;

        if cells.iter().all(crate::cell::is_blank) {
            report.skipped_blank += 1;
            return;
        }

        let fields = RowFields::extract(cells, column_offset, source_row, &self.config.columns);

        if let Err(reason) = self.classifier.received_date(&fields) {
            debug!("Skipping row {}: {}", source_row, reason);
            if reason == SkipReason::Cancelled {
                report.skipped_cancelled += 1;
            } else {
                report.skipped_invalid_received_date += 1;
            }
            return;
        }

        for invalid in &fields.invalid_numeric {
            debug!("Row {}: {}; read as 0", source_row, invalid);
        }
        report.invalid_numeric_cells += fields.invalid_numeric.len();
        if let CellParse::Invalid(reason) = &fields.completion_date {
            debug!(
                "Row {}: invalid completion date ({}); treating as pending",
                source_row, reason
            );
            report.invalid_completion_dates += 1;
        }

        // Scalars cover every real transaction, including rows dropped
        // below for a missing rep.
        if fields.completion().is_none() {
            ledger.pending_amount += fields.total_commission;
            if fields.total_commission == 0.0 {
                ledger.in_progress_amount += fields.vertiv_value * self.config.in_progress_rate;
            }
        }

        match self.classifier.classify(&fields) {
            Ok(record) => {
                ledger.records.push(record);
                report.loaded += 1;
            }
            Err(reason) => {
                debug!("Skipping row {}: {}", source_row, reason);
                match reason {
                    SkipReason::Cancelled => report.skipped_cancelled += 1,
                    SkipReason::InvalidReceivedDate(_) => report.skipped_invalid_received_date += 1,
                    SkipReason::MissingSalesRep => report.skipped_missing_rep += 1,
                }
            }
        }
    }

    /// Resolves the primary and summary sheets and loads them. A missing
    /// primary sheet falls back to the first sheet; missing summary sheets
    /// are reported as `None`.
    pub fn load_workbook(&self, workbook: &RawWorkbook) -> LoadedWorkbook {
        let names = workbook.sheet_names();

        let primary = workbook
            .sheet(&self.config.worksheet_name)
            .map(|(name, range)| (name, range, false))
            .or_else(|| {
                let (name, range) = workbook.first_sheet()?;
                warn!(
                    "Worksheet '{}' not found in {}; falling back to first sheet '{}'",
                    self.config.worksheet_name, workbook.name, name
                );
                Some((name, range, true))
            });

        let ledger = match primary {
            Some((name, range, fallback)) => {
                let mut ledger = self.load_range(name, range);
                ledger.report.used_fallback_sheet = fallback;
                ledger
            }
            None => {
                warn!("Workbook {} has no worksheets", workbook.name);
                Ledger::default()
            }
        };

        let leaderboard =
            self.summary_sheet(workbook, &names, &self.config.leaderboard_sheet, parse_leaderboard);
        let dept_lob =
            self.summary_sheet(workbook, &names, &self.config.dept_lob_sheet, parse_dept_lob);

        LoadedWorkbook {
            ledger,
            leaderboard,
            dept_lob,
            last_modified: workbook.last_modified,
            source_stamp: workbook.stamp,
        }
    }

    fn summary_sheet<T>(
        &self,
        workbook: &RawWorkbook,
        names: &[String],
        wanted: &str,
        parse: impl Fn(&Range<Data>) -> Option<T>,
    ) -> Option<T> {
        let Some(name) = find_sheet(names, wanted) else {
            debug!("No '{}' sheet in {}", wanted, workbook.name);
            return None;
        };
        // The primary sheet can fuzzy-match a short summary name; never
        // read the ledger itself as a summary.
        if name.eq_ignore_ascii_case(self.config.worksheet_name.trim()) {
            return None;
        }
        let parsed = workbook.sheet(name).and_then(|(_, range)| parse(range));
        if parsed.is_none() {
            warn!("Sheet '{}' has no recognizable header row; ignoring it", name);
        }
        parsed
    }
}

/// Reads and loads a workbook from any source.
pub fn load_from_source(source: &dyn WorkbookSource, config: &EngineConfig) -> Result<LoadedWorkbook> {
    info!("Loading sales workbook from {}", source.describe());
    let workbook = source.read_workbook()?;
    let loaded = LedgerLoader::new(config).load_workbook(&workbook);
    info!(
        "Loaded {} records from '{}' ({} rows skipped)",
        loaded.ledger.records.len(),
        loaded.ledger.report.sheet_name,
        loaded.ledger.report.skipped()
    );
    Ok(loaded)
}

/// Loads the ledger from a workbook file. Fails only when the file itself
/// cannot be opened or parsed.
pub fn load_ledger(path: &Path, config: &EngineConfig) -> Result<LoadedWorkbook> {
    load_from_source(&XlsxFileSource::new(path), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SalesStatus;
    use crate::source::range_from_rows;
    use chrono::NaiveDate;

    const WIDTH: usize = 30;

    struct Row {
        cells: Vec<Data>,
    }

    impl Row {
        fn new() -> Self {
            Self {
                cells: vec![Data::Empty; WIDTH],
            }
        }

        fn set(mut self, column: usize, value: Data) -> Self {
            self.cells[column - 1] = value;
            self
        }

        fn text(self, column: usize, value: &str) -> Self {
            self.set(column, Data::String(value.to_string()))
        }

        fn num(self, column: usize, value: f64) -> Self {
            self.set(column, Data::Float(value))
        }
    }

    fn header() -> Vec<Data> {
        (1..=WIDTH)
            .map(|c| Data::String(format!("Col{}", c)))
            .collect()
    }

    fn sale(received: &str, completed: Option<&str>, rep: &str, commission: f64, vertiv: f64) -> Vec<Data> {
        let mut row = Row::new()
            .text(1, received)
            .text(26, rep)
            .num(14, commission)
            .num(8, vertiv)
            .text(29, "Thermal")
            .text(30, "Thermal Unit");
        if let Some(done) = completed {
            row = row.text(25, done);
        }
        row.cells
    }

    fn load(rows: Vec<Vec<Data>>) -> Ledger {
        let config = EngineConfig::default();
        let mut all = vec![header()];
        all.extend(rows);
        LedgerLoader::new(&config).load_range("Sales Data", &range_from_rows(all))
    }

    #[test]
    fn test_scalars_accumulate_in_single_pass() {
        let ledger = load(vec![
            sale("2024-09-01", Some("2024-09-15"), "X", 1000.0, 5000.0),
            sale("2024-09-02", None, "Y", 0.0, 10000.0),
            sale("2024-09-03", None, "Z", 250.0, 4000.0),
        ]);

        assert_eq!(ledger.records.len(), 3);
        assert_eq!(ledger.pending_amount, 250.0);
        assert!((ledger.in_progress_amount - 1200.0).abs() < 1e-9);

        let statuses: Vec<SalesStatus> = ledger.records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![SalesStatus::Completed, SalesStatus::InProgress, SalesStatus::Booked]
        );
    }

    #[test]
    fn test_missing_rep_still_counts_toward_scalars() {
        let ledger = load(vec![sale("2024-09-02", None, "", 75.0, 100.0)]);
        assert!(ledger.records.is_empty());
        assert_eq!(ledger.pending_amount, 75.0);
        assert_eq!(ledger.report.skipped_missing_rep, 1);
    }

    #[test]
    fn test_row_level_failures_are_counted_not_fatal() {
        let mut cancelled = sale("2024-09-05", None, "Q", 500.0, 100.0);
        cancelled[26] = Data::String("CANCELLED".to_string());

        let ledger = load(vec![
            sale("not a date", None, "X", 10.0, 10.0),
            vec![Data::Empty; WIDTH],
            cancelled,
            sale("2024-09-01", Some("garbage"), "X", 10.0, 10.0),
        ]);

        assert_eq!(ledger.report.total_rows, 4);
        assert_eq!(ledger.report.skipped_invalid_received_date, 1);
        assert_eq!(ledger.report.skipped_blank, 1);
        assert_eq!(ledger.report.skipped_cancelled, 1);
        assert_eq!(ledger.report.loaded, 1);

        // Garbled completion dates read as absent, so the row is pending
        assert_eq!(ledger.records[0].completion_date, None);
        assert_eq!(ledger.pending_amount, 10.0);
        assert_eq!(ledger.report.invalid_completion_dates, 1);
    }

    #[test]
    fn test_unparseable_cells_are_counted() {
        let garbled = Row::new()
            .text(1, "2024-09-01")
            .text(26, "X")
            .text(14, "$1,2x0")
            .text(8, "n/a")
            .text(25, "sometime in Q3")
            .cells;
        let cancelled = Row::new()
            .text(1, "2024-09-01")
            .text(26, "X")
            .text(14, "junk")
            .text(27, "Cancelled")
            .cells;

        let ledger = load(vec![garbled, cancelled, sale("2024-09-02", None, "Y", 5.0, 0.0)]);

        assert_eq!(ledger.report.invalid_numeric_cells, 2);
        assert_eq!(ledger.report.invalid_completion_dates, 1);
        assert_eq!(ledger.report.skipped(), 1);
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.records[0].total_commission, 0.0);
        assert!(ledger.records[0].is_remaining());
    }

    #[test]
    fn test_source_row_numbers_are_one_based() {
        let ledger = load(vec![
            vec![Data::Empty; WIDTH],
            sale("2024-09-01", None, "X", 1.0, 1.0),
        ]);
        assert_eq!(ledger.records[0].source_row, 3);
    }

    #[test]
    fn test_native_numeric_dates() {
        let row = Row::new()
            .num(1, 45536.0)
            .num(25, 45549.0)
            .text(26, "X")
            .num(14, 10.0);
        let ledger = load(vec![row.cells]);
        let record = &ledger.records[0];
        assert_eq!(record.received_date, NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
        assert_eq!(record.completion_date, NaiveDate::from_ymd_opt(2024, 9, 14));
        assert_eq!(record.quarter, Some(1));
    }

    #[test]
    fn test_fallback_to_first_sheet() {
        let config = EngineConfig::default();
        let range = range_from_rows(vec![header(), sale("2024-09-01", None, "X", 5.0, 0.0)]);
        let workbook = RawWorkbook::new("book").with_sheet("Orders", range);

        let loaded = LedgerLoader::new(&config).load_workbook(&workbook);
        assert!(loaded.ledger.report.used_fallback_sheet);
        assert_eq!(loaded.ledger.report.sheet_name, "Orders");
        assert_eq!(loaded.ledger.records.len(), 1);
        assert!(loaded.leaderboard.is_none());
        assert!(loaded.dept_lob.is_none());
    }

    #[test]
    fn test_summary_sheets_are_picked_up() {
        let config = EngineConfig::default();
        let s = |t: &str| Data::String(t.to_string());
        let workbook = RawWorkbook::new("book")
            .with_sheet(
                "Sales Data",
                range_from_rows(vec![header(), sale("2024-09-01", None, "X", 5.0, 0.0)]),
            )
            .with_sheet(
                "Rep Leaderboard",
                range_from_rows(vec![
                    vec![s("Rep"), s("Total Margin")],
                    vec![s("X"), Data::Float(42.0)],
                ]),
            )
            .with_sheet(
                "DEPT LOB",
                range_from_rows(vec![
                    vec![s("LOB"), s("Target"), s("YTD")],
                    vec![s("Power"), Data::Float(10.0), Data::Float(4.0)],
                ]),
            );

        let loaded = LedgerLoader::new(&config).load_workbook(&workbook);
        assert!(!loaded.ledger.report.used_fallback_sheet);
        assert_eq!(loaded.leaderboard.unwrap()[0].total_margin, 42.0);
        let lob = loaded.dept_lob.unwrap();
        assert_eq!(lob.len(), 2);
        assert_eq!(lob[1].lob, "Total");
    }
}
