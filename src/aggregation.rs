//! Pure aggregations over the canonical record list.
//!
//! Every function rebuilds its output from scratch; nothing here holds state
//! between calls.

use crate::config::{LobTargets, RepMarginMode, ValueColumn};
use crate::normalizer::{normalize_department, normalize_product_type, OTHER};
use crate::schema::{
    DeptLobAggregate, ProductAggregate, QuarterSummary, RepAggregate, SalesRecord, SalesStatus,
    TOTAL_LOB,
};
use crate::utils::round_to;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeMap;

const LEGACY_AGENCY_SHARE: f64 = 0.7;
const LEGACY_BUY_RESELL_SHARE: f64 = 0.3;

/// Selection applied to records before aggregating. An empty filter keeps
/// every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Inclusive bounds on the received date
    pub received_from: Option<NaiveDate>,
    pub received_to: Option<NaiveDate>,
    pub statuses: Option<Vec<SalesStatus>>,
    pub fiscal_year: Option<i32>,
    /// Matches only records whose completion falls in this fiscal quarter
    pub quarter: Option<u8>,
    pub sales_reps: Option<Vec<String>>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &SalesRecord) -> bool {
        if self.received_from.is_some_and(|from| record.received_date < from) {
            return false;
        }
        if self.received_to.is_some_and(|to| record.received_date > to) {
            return false;
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&record.status) {
                return false;
            }
        }
        if self.fiscal_year.is_some_and(|fy| record.fiscal_year != fy) {
            return false;
        }
        if let Some(quarter) = self.quarter {
            if record.quarter != Some(quarter) {
                return false;
            }
        }
        if let Some(reps) = &self.sales_reps {
            if !reps.iter().any(|r| r.trim() == record.sales_rep) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, records: &'a [SalesRecord]) -> Vec<&'a SalesRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

#[derive(Default)]
struct MarginTotals {
    agency_margin: f64,
    buy_resell_margin: f64,
    total_margin: f64,
    vertiv_value: f64,
    po_value: f64,
    record_count: usize,
}

impl MarginTotals {
    fn add(&mut self, record: &SalesRecord, mode: RepMarginMode) {
        match mode {
            RepMarginMode::Columns => {
                self.agency_margin += record.agency_margin;
                self.buy_resell_margin += record.buy_resell_value;
            }
            RepMarginMode::LegacySplit => {
                self.agency_margin += record.total_commission * LEGACY_AGENCY_SHARE;
                self.buy_resell_margin += record.total_commission * LEGACY_BUY_RESELL_SHARE;
            }
        }
        self.total_margin += record.total_commission;
        self.vertiv_value += record.vertiv_value;
        self.po_value += record.po_value;
        self.record_count += 1;
    }
}

fn product_value(row: &ProductAggregate, column: ValueColumn) -> f64 {
    match column {
        ValueColumn::TotalMargin => row.total_margin,
        ValueColumn::AgencyMargin => row.agency_margin,
        ValueColumn::BuyResellMargin => row.buy_resell_margin,
        ValueColumn::VertivValue => row.vertiv_value,
        ValueColumn::PoValue => row.po_value,
    }
}

/// Groups by normalized product type, sorted descending by `column`.
pub fn aggregate_by_product<'a>(
    records: impl IntoIterator<Item = &'a SalesRecord>,
    column: ValueColumn,
) -> Vec<ProductAggregate> {
    let mut groups: BTreeMap<String, MarginTotals> = BTreeMap::new();
    for record in records {
        groups
            .entry(normalize_product_type(&record.product_type))
            .or_default()
            .add(record, RepMarginMode::Columns);
    }

    let mut rows: Vec<ProductAggregate> = groups
        .into_iter()
        .map(|(product_type, totals)| ProductAggregate {
            product_type,
            agency_margin: totals.agency_margin,
            buy_resell_margin: totals.buy_resell_margin,
            total_margin: totals.total_margin,
            vertiv_value: totals.vertiv_value,
            po_value: totals.po_value,
            record_count: totals.record_count,
            percentage_of_total: 0.0,
        })
        .collect();

    rows.sort_by(|a, b| {
        product_value(b, column)
            .total_cmp(&product_value(a, column))
            .then_with(|| a.product_type.cmp(&b.product_type))
    });

    // Percentages are computed only once every row has been summed
    let denominator: f64 = rows.iter().map(|r| product_value(r, column)).sum();
    for row in &mut rows {
        row.percentage_of_total = if denominator == 0.0 {
            0.0
        } else {
            round_to(product_value(row, column) / denominator * 100.0, 2)
        };
    }

    rows
}

/// Groups by rep name and ranks by descending total margin.
///
/// Every name in `selected_reps` gets a row, zero-valued if the rep has no
/// matching records, so callers can show "no data" instead of dropping the
/// rep.
pub fn aggregate_by_rep<'a>(
    records: impl IntoIterator<Item = &'a SalesRecord>,
    mode: RepMarginMode,
    selected_reps: Option<&[String]>,
) -> Vec<RepAggregate> {
    let mut groups: BTreeMap<String, MarginTotals> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.sales_rep.trim().to_string())
            .or_default()
            .add(record, mode);
    }

    if let Some(selected) = selected_reps {
        groups.retain(|rep, _| selected.iter().any(|s| s.trim() == rep));
        for rep in selected {
            let rep = rep.trim();
            if !rep.is_empty() {
                groups.entry(rep.to_string()).or_default();
            }
        }
    }

    let mut rows: Vec<RepAggregate> = groups
        .into_iter()
        .map(|(sales_rep, totals)| RepAggregate {
            sales_rep,
            agency_margin: totals.agency_margin,
            buy_resell_margin: totals.buy_resell_margin,
            total_margin: totals.total_margin,
            vertiv_value: totals.vertiv_value,
            po_value: totals.po_value,
            record_count: totals.record_count,
            rank: 0,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_margin
            .total_cmp(&a.total_margin)
            .then_with(|| a.sales_rep.cmp(&b.sales_rep))
    });
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx + 1;
    }

    rows
}

/// Accumulates commission by normalized department against the target
/// table, then appends the Total row.
pub fn aggregate_by_dept_lob<'a>(
    records: impl IntoIterator<Item = &'a SalesRecord>,
    targets: &LobTargets,
) -> Vec<DeptLobAggregate> {
    let mut rows: Vec<DeptLobAggregate> = Vec::new();
    for target in &targets.targets {
        let lob = target.lob.trim();
        if lob.is_empty() || lob.eq_ignore_ascii_case(TOTAL_LOB) {
            continue;
        }
        match rows.iter_mut().find(|r| r.lob.eq_ignore_ascii_case(lob)) {
            Some(existing) => existing.margin_target = target.target,
            None => rows.push(DeptLobAggregate {
                lob: lob.to_string(),
                margin_target: target.target,
                margin_ytd: 0.0,
                rank: 0,
            }),
        }
    }

    for record in records {
        let lob = normalize_department(&record.department);
        // Departments without a row in the target table (including
        // taxonomy labels the table leaves out) are bucketed into "Other".
        let lob = if rows.iter().any(|r| r.lob.eq_ignore_ascii_case(&lob)) {
            lob
        } else {
            OTHER.to_string()
        };
        match rows.iter_mut().find(|r| r.lob.eq_ignore_ascii_case(&lob)) {
            Some(row) => row.margin_ytd += record.total_commission,
            None => rows.push(DeptLobAggregate {
                lob,
                margin_target: targets.target_for(OTHER).unwrap_or(targets.other_target),
                margin_ytd: record.total_commission,
                rank: 0,
            }),
        }
    }

    finalize_dept_lob(rows)
}

/// Appends the Total row, orders Total last then YTD descending, and ranks
/// the non-Total rows from 1. Any Total row already present is replaced.
pub fn finalize_dept_lob(mut rows: Vec<DeptLobAggregate>) -> Vec<DeptLobAggregate> {
    rows.retain(|r| !r.is_total());

    let total = DeptLobAggregate {
        lob: TOTAL_LOB.to_string(),
        margin_target: rows.iter().map(|r| r.margin_target).sum(),
        margin_ytd: rows.iter().map(|r| r.margin_ytd).sum(),
        rank: 0,
    };
    rows.push(total);

    rows.sort_by(|a, b| match (a.is_total(), b.is_total()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => b
            .margin_ytd
            .total_cmp(&a.margin_ytd)
            .then_with(|| a.lob.cmp(&b.lob)),
    });

    let mut rank = 0;
    for row in &mut rows {
        if row.is_total() {
            row.rank = 0;
        } else {
            rank += 1;
            row.rank = rank;
        }
    }

    rows
}

/// Commission realized per fiscal quarter of `fiscal_year`. Records without
/// a quarter (still pending) never count toward any quarter.
pub fn quarterly_summary<'a>(
    records: impl IntoIterator<Item = &'a SalesRecord>,
    fiscal_year: i32,
) -> Vec<QuarterSummary> {
    let mut quarters: Vec<QuarterSummary> = (1..=4)
        .map(|quarter| QuarterSummary {
            fiscal_year,
            quarter,
            total_margin: 0.0,
            vertiv_value: 0.0,
            record_count: 0,
        })
        .collect();

    for record in records {
        if record.fiscal_year != fiscal_year {
            continue;
        }
        let Some(quarter) = record.quarter else {
            continue;
        };
        if let Some(slot) = quarters.iter_mut().find(|q| q.quarter == quarter) {
            slot.total_margin += record.total_commission;
            slot.vertiv_value += record.vertiv_value;
            slot.record_count += 1;
        }
    }

    quarters
}

/// Distinct rep names, sorted.
pub fn distinct_reps(records: &[SalesRecord]) -> Vec<String> {
    let mut reps: Vec<String> = records.iter().map(|r| r.sales_rep.clone()).collect();
    reps.sort();
    reps.dedup();
    reps
}

/// Distinct normalized LOBs present in the records, sorted.
pub fn distinct_lobs(records: &[SalesRecord]) -> Vec<String> {
    let mut lobs: Vec<String> = records
        .iter()
        .map(|r| normalize_department(&r.department))
        .collect();
    lobs.sort();
    lobs.dedup();
    lobs
}
