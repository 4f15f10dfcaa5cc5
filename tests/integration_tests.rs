use calamine::Data;
use chrono::NaiveDate;
use sales_ledger_engine::source::range_from_rows;
use rust_xlsxwriter::{Format, Workbook};
use sales_ledger_engine::*;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

const WIDTH: usize = 30;

/// One worksheet row, addressed by 1-based column like the workbook itself.
struct SaleRow {
    cells: Vec<Data>,
}

impl SaleRow {
    fn new(received: &str, rep: &str) -> Self {
        let mut row = Self {
            cells: vec![Data::Empty; WIDTH],
        };
        row.cells[0] = Data::String(received.to_string());
        row.cells[25] = Data::String(rep.to_string());
        row
    }

    fn text(mut self, column: usize, value: &str) -> Self {
        self.cells[column - 1] = Data::String(value.to_string());
        self
    }

    fn amount(mut self, column: usize, value: f64) -> Self {
        self.cells[column - 1] = Data::Float(value);
        self
    }

    fn completed(self, date: &str) -> Self {
        self.text(25, date)
    }

    fn product(self, product: &str) -> Self {
        self.text(30, product)
    }

    fn department(self, department: &str) -> Self {
        self.text(29, department)
    }

    fn commission(self, value: f64) -> Self {
        self.amount(14, value)
    }

    fn vertiv(self, value: f64) -> Self {
        self.amount(8, value)
    }
}

fn sales_workbook(rows: Vec<SaleRow>) -> RawWorkbook {
    let header: Vec<Data> = (1..=WIDTH)
        .map(|c| Data::String(format!("Column {}", c)))
        .collect();
    let mut all = vec![header];
    all.extend(rows.into_iter().map(|r| r.cells));
    RawWorkbook::new("fixture").with_sheet("Sales Data", range_from_rows(all))
}

fn engine_for(workbook: RawWorkbook) -> (SalesEngine, Arc<MemoryWorkbookSource>) {
    let source = Arc::new(MemoryWorkbookSource::new(workbook));
    let engine = SalesEngine::with_source(EngineConfig::default(), source.clone()).unwrap();
    (engine, source)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_two_row_scenario() {
    let (engine, _) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-09-01", "X")
            .completed("2024-09-15")
            .product("Thermal Unit")
            .department("Thermal")
            .commission(1000.0)
            .vertiv(5000.0),
        SaleRow::new("2024-09-02", "Y")
            .product("power-module")
            .department("Power")
            .commission(0.0)
            .vertiv(10000.0),
    ]));

    assert_eq!(engine.pending_amount().unwrap(), 0.0);
    assert!((engine.in_progress_amount().unwrap() - 1200.0).abs() < 1e-9);

    let products = engine.product_sales().unwrap();
    let thermal = products
        .iter()
        .find(|p| p.product_type == "Thermal")
        .expect("Thermal row");
    assert_eq!(thermal.total_margin, 1000.0);
    assert!(products.iter().any(|p| p.product_type == "Power"));

    let records = engine.records().unwrap();
    let a = records.iter().find(|r| r.sales_rep == "X").unwrap();
    assert_eq!(a.fiscal_year, 2025);
    assert_eq!(a.quarter, Some(1));
    assert_eq!(a.status, SalesStatus::Completed);

    let b = records.iter().find(|r| r.sales_rep == "Y").unwrap();
    assert_eq!(b.quarter, None);
    assert_eq!(b.quarter_number(), 0);
    assert_eq!(b.status, SalesStatus::InProgress);
    assert!(b.is_in_progress());

    println!("Products:");
    for product in &products {
        println!(
            "  {:<12} total {:>10.2}  share {:>6.2}%",
            product.product_type, product.total_margin, product.percentage_of_total
        );
    }
}

/// Writes the two-row scenario as a real .xlsx, dates stored as serials
/// with a date format the way Excel saves them.
fn write_two_row_xlsx(path: &Path) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet().set_name("Sales Data")?;

    for column in 0..WIDTH as u16 {
        sheet.write_string(0, column, format!("Column {}", column + 1))?;
    }

    // 45536 = 2024-09-01, 45550 = 2024-09-15
    sheet.write_number_with_format(1, 0, 45536.0, &date_format)?;
    sheet.write_number(1, 7, 5000.0)?;
    sheet.write_number(1, 13, 1000.0)?;
    sheet.write_number_with_format(1, 24, 45550.0, &date_format)?;
    sheet.write_string(1, 25, "X")?;
    sheet.write_string(1, 28, "Thermal")?;
    sheet.write_string(1, 29, "Thermal Unit")?;

    // 45537 = 2024-09-02
    sheet.write_number_with_format(2, 0, 45537.0, &date_format)?;
    sheet.write_number(2, 7, 10000.0)?;
    sheet.write_number(2, 13, 0.0)?;
    sheet.write_string(2, 25, "Y")?;
    sheet.write_string(2, 28, "Power")?;
    sheet.write_string(2, 29, "power-module")?;

    workbook.save(path)?;
    Ok(())
}

#[test]
fn test_two_row_scenario_from_xlsx_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sales.xlsx");
    write_two_row_xlsx(&path)?;

    let loaded = load_ledger(&path, &EngineConfig::default())?;
    assert_eq!(loaded.ledger.report.sheet_name, "Sales Data");
    assert!(!loaded.ledger.report.used_fallback_sheet);
    assert_eq!(loaded.ledger.records.len(), 2);
    assert_eq!(loaded.ledger.report.invalid_completion_dates, 0);
    assert!(loaded.last_modified.is_some());
    assert!(loaded.source_stamp.is_some());

    let engine = SalesEngine::new(EngineConfig::for_workbook(&path))?;
    assert_eq!(engine.pending_amount()?, 0.0);
    assert!((engine.in_progress_amount()? - 1200.0).abs() < 1e-9);

    let products = engine.product_sales()?;
    let thermal = products.iter().find(|p| p.product_type == "Thermal").expect("Thermal row");
    assert_eq!(thermal.total_margin, 1000.0);

    let records = engine.records()?;
    let a = records.iter().find(|r| r.sales_rep == "X").expect("row for X");
    assert_eq!(a.received_date, date(2024, 9, 1));
    assert_eq!(a.completion_date, Some(date(2024, 9, 15)));
    assert_eq!(a.fiscal_year, 2025);
    assert_eq!(a.quarter, Some(1));

    let b = records.iter().find(|r| r.sales_rep == "Y").expect("row for Y");
    assert_eq!(b.quarter, None);
    assert_eq!(b.status, SalesStatus::InProgress);

    assert!(engine.last_modified().is_some());
    assert_eq!(engine.state(), CacheState::Ready { stale: false });
    Ok(())
}

#[test]
fn test_fiscal_year_boundaries() {
    let (engine, _) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-07-31", "A").completed("2024-12-03").commission(10.0),
        SaleRow::new("2024-08-01", "B").completed("2025-04-30").commission(10.0),
        SaleRow::new("2025-01-15", "C").commission(10.0),
    ]));

    let records = engine.records().unwrap();
    let by_rep = |rep: &str| records.iter().find(|r| r.sales_rep == rep).unwrap().clone();

    assert_eq!(by_rep("A").fiscal_year, 2024);
    assert_eq!(by_rep("A").quarter, Some(2));
    assert_eq!(by_rep("B").fiscal_year, 2025);
    assert_eq!(by_rep("B").quarter, Some(3));
    assert_eq!(by_rep("C").fiscal_year, 2025);
    assert_eq!(by_rep("C").quarter, None);

    assert_eq!(fiscal_year_bounds(2025, 8), Some((date(2024, 8, 1), date(2025, 7, 31))));
}

#[test]
fn test_cancelled_rows_never_aggregate() {
    let (engine, _) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-09-01", "Avery")
            .product("Thermal")
            .department("Thermal")
            .commission(500.0),
        SaleRow::new("2024-09-02", "Blake")
            .product("Thermal")
            .department("Thermal")
            .commission(9000.0)
            .text(27, "Cancelled - customer withdrew"),
    ]));

    assert_eq!(engine.pending_amount().unwrap(), 500.0);
    assert_eq!(engine.all_sales_reps().unwrap(), vec!["Avery"]);
    assert_eq!(engine.product_sales().unwrap()[0].total_margin, 500.0);
    assert_eq!(engine.last_report().unwrap().skipped_cancelled, 1);
    let board = engine.sales_leaderboard().unwrap();
    assert!(board.iter().all(|r| r.sales_rep != "Blake"));
}

#[test]
fn test_product_percentages_sum_to_hundred() {
    let (engine, _) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-09-01", "A").product("Thermal Unit").commission(333.33),
        SaleRow::new("2024-09-01", "A").product("UPS power").commission(333.33),
        SaleRow::new("2024-09-01", "B").product("Channel partner").commission(333.34),
        SaleRow::new("2024-09-01", "B").product("Racks").commission(120.0),
    ]));

    let products = engine.product_sales().unwrap();
    let total: f64 = products.iter().map(|p| p.percentage_of_total).sum();
    assert!((total - 100.0).abs() < 0.05, "percentages summed to {}", total);
    assert!(products.iter().any(|p| p.product_type == "Racks"));

    let (zero, _) = engine_for(sales_workbook(vec![SaleRow::new("2024-09-01", "A").product("Thermal")]));
    assert!(zero
        .product_sales()
        .unwrap()
        .iter()
        .all(|p| p.percentage_of_total == 0.0));
}

#[test]
fn test_department_lob_total_is_last() {
    let (engine, _) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-09-01", "A").department("Thermal Mgmt").commission(300.0),
        SaleRow::new("2024-09-01", "A").department("SaskPower").commission(700.0),
        SaleRow::new("2024-09-01", "B").department("Racks & Cabinets").commission(50.0),
    ]));

    let rows = engine.department_lob().unwrap();
    let total = rows.last().unwrap();
    assert!(total.is_total());
    assert_eq!(total.rank, 0);
    assert_eq!(total.margin_ytd, 1050.0);
    assert_eq!(rows.iter().filter(|r| r.is_total()).count(), 1);

    assert_eq!(rows[0].lob, "Power");
    assert_eq!(rows[0].rank, 1);
    assert!(rows.iter().any(|r| r.lob == "Other" && r.margin_ytd == 50.0));

    let lobs = engine.all_lobs().unwrap();
    assert_eq!(lobs, vec!["Other", "Power", "Thermal"]);
}

#[test]
fn test_unchanged_reload_is_identical() {
    let (engine, source) = engine_for(sales_workbook(vec![
        SaleRow::new("2024-09-01", "A").completed("2024-10-01").commission(10.0),
        SaleRow::new("2024-09-01", "B").commission(20.0),
    ]));

    let first = engine.reload().unwrap();
    let second = engine.reload().unwrap();
    assert!(first.same_data(&second));
    assert_eq!(source.read_count(), 2);

    source.replace(sales_workbook(vec![SaleRow::new("2024-09-01", "A").commission(5.0)]));
    let third = engine.reload().unwrap();
    assert!(!second.same_data(&third));
    assert_eq!(engine.pending_amount().unwrap(), 5.0);
}

#[test]
fn test_missing_primary_sheet_falls_back_to_first() {
    let rows = sales_workbook(vec![SaleRow::new("2024-09-01", "A").commission(10.0)]);
    let (_, range) = rows.sheets.into_iter().next().unwrap();
    let workbook = RawWorkbook::new("renamed").with_sheet("Orders 2025", range);

    let loaded = LedgerLoader::new(&EngineConfig::default()).load_workbook(&workbook);
    assert!(loaded.ledger.report.used_fallback_sheet);
    assert_eq!(loaded.ledger.report.sheet_name, "Orders 2025");
    assert_eq!(loaded.ledger.records.len(), 1);
}

#[test]
fn test_load_ledger_file_failures() {
    let config = EngineConfig::default();
    let missing = load_ledger(std::path::Path::new("/no/such/sales.xlsx"), &config);
    assert!(matches!(missing, Err(SalesEngineError::WorkbookNotFound(_))));

    let mut corrupt = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
    corrupt.write_all(b"definitely not a workbook").unwrap();
    let err = load_ledger(corrupt.path(), &config).unwrap_err();
    assert!(matches!(err, SalesEngineError::Workbook(_)));

    let engine = SalesEngine::new(EngineConfig::for_workbook(corrupt.path())).unwrap();
    assert!(engine.product_sales().is_err());
    assert_eq!(engine.state(), CacheState::Empty);
    assert!(engine.last_error().is_some());
}

#[test]
fn test_config_round_trip_through_json_file() -> anyhow::Result<()> {
    let config = EngineConfig {
        worksheet_name: "FY25".to_string(),
        in_progress_rate: 0.1,
        rep_margin_mode: RepMarginMode::LegacySplit,
        ..EngineConfig::default()
    };

    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(config.to_json()?.as_bytes())?;
    let loaded = EngineConfig::from_json_file(file.path())?;
    assert_eq!(loaded, config);

    let bad = EngineConfig::from_json_str(r#"{ "fiscal_year_start_month": 13 }"#);
    assert!(matches!(bad, Err(SalesEngineError::Config(_))));
    Ok(())
}

#[test]
fn test_legacy_split_rep_margins() {
    let source = Arc::new(MemoryWorkbookSource::new(sales_workbook(vec![
        SaleRow::new("2024-09-01", "A").commission(1000.0).amount(13, 1.0),
    ])));
    let config = EngineConfig {
        rep_margin_mode: RepMarginMode::LegacySplit,
        ..EngineConfig::default()
    };
    let engine = SalesEngine::with_source(config, source).unwrap();

    let board = engine.sales_leaderboard().unwrap();
    assert!((board[0].agency_margin - 700.0).abs() < 1e-9);
    assert!((board[0].buy_resell_margin - 300.0).abs() < 1e-9);
    assert_eq!(board[0].total_margin, 1000.0);
}
