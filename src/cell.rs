//! Best-effort typed extraction from raw worksheet cells.
//!
//! Every reader returns a [`CellParse`] instead of failing, so a garbled cell
//! never aborts a load. Callers decide whether a blank or invalid cell means
//! "use zero" or "skip the row".

use calamine::Data;
use chrono::{Days, NaiveDate, NaiveDateTime};

/// Largest serial Excel can represent (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y", "%b %d, %Y",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

#[derive(Debug, Clone, PartialEq)]
pub enum CellParse<T> {
    Value(T),
    Blank,
    Invalid(String),
}

impl<T> CellParse<T> {
    pub fn value(self) -> Option<T> {
        match self {
            CellParse::Value(v) => Some(v),
            CellParse::Blank | CellParse::Invalid(_) => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, CellParse::Invalid(_))
    }
}

impl<T: Default> CellParse<T> {
    /// The parsed value, or the type's zero value.
    pub fn or_zero(self) -> T {
        self.value().unwrap_or_default()
    }
}

pub fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn read_string(cell: &Data) -> CellParse<String> {
    match cell {
        Data::Empty => CellParse::Blank,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                CellParse::Blank
            } else {
                CellParse::Value(trimmed.to_string())
            }
        }
        Data::Int(i) => CellParse::Value(i.to_string()),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                CellParse::Value(format!("{}", *f as i64))
            } else {
                CellParse::Value(f.to_string())
            }
        }
        Data::Bool(b) => CellParse::Value(b.to_string()),
        Data::DateTime(dt) => CellParse::Value(dt.as_f64().to_string()),
        Data::Error(e) => CellParse::Invalid(format!("cell error {:?}", e)),
    }
}

pub fn read_decimal(cell: &Data) -> CellParse<f64> {
    match cell {
        Data::Empty => CellParse::Blank,
        Data::Float(f) if f.is_finite() => CellParse::Value(*f),
        Data::Float(f) => CellParse::Invalid(format!("non-finite number {}", f)),
        Data::Int(i) => CellParse::Value(*i as f64),
        Data::Bool(b) => CellParse::Value(if *b { 1.0 } else { 0.0 }),
        Data::String(s) => parse_decimal_str(s),
        Data::DateTime(_) | Data::DateTimeIso(_) | Data::DurationIso(_) => {
            CellParse::Invalid("date value in numeric column".to_string())
        }
        Data::Error(e) => CellParse::Invalid(format!("cell error {:?}", e)),
    }
}

/// Parses currency-formatted text such as `"$1,234.50"`, `"(300)"` or `"12%"`.
pub fn parse_decimal_str(raw: &str) -> CellParse<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellParse::Blank;
    }

    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return CellParse::Blank;
    }

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => CellParse::Value(if negative { -v } else { v }),
        Ok(_) | Err(_) => CellParse::Invalid(format!("unparseable number '{}'", trimmed)),
    }
}

pub fn read_date(cell: &Data) -> CellParse<NaiveDate> {
    match cell {
        Data::Empty => CellParse::Blank,
        Data::DateTime(dt) => {
            if dt.is_duration() {
                return CellParse::Invalid("duration value in date column".to_string());
            }
            match dt.as_datetime() {
                Some(datetime) => CellParse::Value(datetime.date()),
                None => CellParse::Invalid(format!("date serial {} out of range", dt.as_f64())),
            }
        }
        Data::Float(f) => from_excel_serial(*f),
        Data::Int(i) => from_excel_serial(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_date_str(s),
        Data::Bool(_) | Data::DurationIso(_) => {
            CellParse::Invalid("non-date value in date column".to_string())
        }
        Data::Error(e) => CellParse::Invalid(format!("cell error {:?}", e)),
    }
}

pub fn parse_date_str(raw: &str) -> CellParse<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellParse::Blank;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return CellParse::Value(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return CellParse::Value(datetime.date());
        }
    }
    // RFC 3339 timestamps with an offset, e.g. from CSV exports
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return CellParse::Value(datetime.date_naive());
    }

    CellParse::Invalid(format!("unparseable date '{}'", trimmed))
}

/// Converts an Excel serial day number (1900 date system) to a date.
pub fn from_excel_serial(serial: f64) -> CellParse<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_EXCEL_SERIAL {
        return CellParse::Invalid(format!("serial {} is outside the Excel date range", serial));
    }

    // Day 0 is 1899-12-30 once the fictitious 1900-02-29 is accounted for.
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return CellParse::Invalid("invalid Excel epoch".to_string());
    };
    let mut days = serial.floor() as u64;
    if days < 61 {
        days += 1;
    }
    match epoch.checked_add_days(Days::new(days)) {
        Some(date) => CellParse::Value(date),
        None => CellParse::Invalid(format!("serial {} overflowed", serial)),
    }
}
