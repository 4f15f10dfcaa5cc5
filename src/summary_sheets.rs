//! Optional pre-summarized worksheets (rep leaderboard and dept/LOB targets).
//!
//! Columns are located by header text rather than position, since these
//! sheets are maintained by hand and drift between workbook revisions.

use crate::aggregation::finalize_dept_lob;
use crate::cell::{read_decimal, read_string};
use crate::normalizer::normalize_department;
use crate::schema::{DeptLobAggregate, RepAggregate, TOTAL_LOB};
use calamine::{Data, Range};
use log::debug;

/// How many rows from the top are searched for a header row.
const HEADER_SEARCH_ROWS: usize = 10;

/// Finds a sheet by exact (case-insensitive) name, falling back to the first
/// sheet whose name contains the wanted name or vice versa.
pub fn find_sheet<'a>(sheet_names: &'a [String], wanted: &str) -> Option<&'a str> {
    let wanted = wanted.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    sheet_names
        .iter()
        .find(|name| name.trim().to_lowercase() == wanted)
        .or_else(|| {
            sheet_names.iter().find(|name| {
                let lowered = name.trim().to_lowercase();
                !lowered.is_empty() && (lowered.contains(&wanted) || wanted.contains(&lowered))
            })
        })
        .map(String::as_str)
}

fn header_text(cell: &Data) -> String {
    read_string(cell).or_zero().to_lowercase()
}

/// Locates the header row: the first row (within the search window) for
/// which `key_column` finds a column. Returns the row index relative to the
/// range and the lower-cased headers.
fn find_header_row(
    range: &Range<Data>,
    key_column: impl Fn(&[String]) -> Option<usize>,
) -> Option<(usize, Vec<String>)> {
    range
        .rows()
        .take(HEADER_SEARCH_ROWS)
        .enumerate()
        .find_map(|(idx, row)| {
            let headers: Vec<String> = row.iter().map(header_text).collect();
            key_column(&headers).map(|_| (idx, headers))
        })
}

fn position(headers: &[String], predicate: impl Fn(&str) -> bool) -> Option<usize> {
    headers.iter().position(|h| predicate(h))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaderboardColumns {
    rep: usize,
    agency_margin: Option<usize>,
    buy_resell: Option<usize>,
    total_margin: Option<usize>,
    vertiv_value: Option<usize>,
}

fn rep_column(headers: &[String]) -> Option<usize> {
    position(headers, |h| h.contains("rep"))
}

fn leaderboard_columns(headers: &[String]) -> Option<LeaderboardColumns> {
    Some(LeaderboardColumns {
        rep: rep_column(headers)?,
        agency_margin: position(headers, |h| h.contains("agency") && h.contains("margin")),
        buy_resell: position(headers, |h| h.contains("buy")),
        total_margin: position(headers, |h| h.contains("total") && h.contains("margin")),
        vertiv_value: position(headers, |h| h.contains("vertiv"))
            .or_else(|| position(headers, |h| h.contains("value"))),
    })
}

fn value_at(row: &[Data], column: Option<usize>) -> f64 {
    column
        .and_then(|c| row.get(c))
        .map(|cell| read_decimal(cell).or_zero())
        .unwrap_or(0.0)
}

fn text_at(row: &[Data], column: usize) -> String {
    row.get(column)
        .map(|cell| read_string(cell).or_zero())
        .unwrap_or_default()
}

/// Parses a leaderboard sheet into ranked rep rows. Returns `None` when no
/// header row with a rep column can be found.
pub fn parse_leaderboard(range: &Range<Data>) -> Option<Vec<RepAggregate>> {
    let (header_idx, headers) = find_header_row(range, rep_column)?;
    let columns = leaderboard_columns(&headers)?;
    debug!("Leaderboard columns resolved: {:?}", columns);

    let mut rows: Vec<RepAggregate> = range
        .rows()
        .skip(header_idx + 1)
        .filter_map(|row| {
            let rep = text_at(row, columns.rep);
            if rep.is_empty() || rep.eq_ignore_ascii_case(TOTAL_LOB) {
                return None;
            }
            let agency_margin = value_at(row, columns.agency_margin);
            let buy_resell_margin = value_at(row, columns.buy_resell);
            let total_margin = match columns.total_margin {
                Some(_) => value_at(row, columns.total_margin),
                None => agency_margin + buy_resell_margin,
            };
            Some(RepAggregate {
                sales_rep: rep,
                agency_margin,
                buy_resell_margin,
                total_margin,
                vertiv_value: value_at(row, columns.vertiv_value),
                po_value: 0.0,
                record_count: 0,
                rank: 0,
            })
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
    Some(rows)
}

fn lob_column(headers: &[String]) -> Option<usize> {
    position(headers, |h| h.contains("lob"))
}

/// Parses a dept/LOB sheet. Any "Total" row in the sheet is ignored and
/// recomputed; ranks are reassigned.
pub fn parse_dept_lob(range: &Range<Data>) -> Option<Vec<DeptLobAggregate>> {
    let (header_idx, headers) = find_header_row(range, lob_column)?;
    let lob = lob_column(&headers)?;
    let target = position(&headers, |h| h.contains("target"));
    let ytd = position(&headers, |h| h.contains("ytd"));

    let mut rows: Vec<DeptLobAggregate> = Vec::new();
    for row in range.rows().skip(header_idx + 1) {
        let raw = text_at(row, lob);
        if raw.is_empty() || raw.eq_ignore_ascii_case(TOTAL_LOB) {
            continue;
        }
        let key = normalize_department(&raw);
        let margin_target = value_at(row, target);
        let margin_ytd = value_at(row, ytd);

        match rows.iter_mut().find(|r| r.lob == key) {
            Some(existing) => {
                existing.margin_target += margin_target;
                existing.margin_ytd += margin_ytd;
            }
            None => rows.push(DeptLobAggregate {
                lob: key,
                margin_target,
                margin_ytd,
                rank: 0,
            }),
        }
    }

    Some(finalize_dept_lob(rows))
}
