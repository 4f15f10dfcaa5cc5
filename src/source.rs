use crate::error::{Result, SalesEngineError};
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Every worksheet of a workbook, in workbook order.
#[derive(Debug, Clone, Default)]
pub struct RawWorkbook {
    pub name: String,
    pub sheets: Vec<(String, Range<Data>)>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Stamp of the backing file when it was read
    pub stamp: Option<FileStamp>,
}

impl RawWorkbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_sheet(mut self, name: impl Into<String>, range: Range<Data>) -> Self {
        self.sheets.push((name.into(), range));
        self
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Case-insensitive lookup returning the sheet's actual name.
    pub fn sheet(&self, name: &str) -> Option<(&str, &Range<Data>)> {
        self.sheets
            .iter()
            .find(|(sheet_name, _)| sheet_name.eq_ignore_ascii_case(name.trim()))
            .map(|(sheet_name, range)| (sheet_name.as_str(), range))
    }

    pub fn first_sheet(&self) -> Option<(&str, &Range<Data>)> {
        self.sheets
            .first()
            .map(|(name, range)| (name.as_str(), range))
    }
}

/// Builds a range anchored at A1 from row-major cells.
pub fn range_from_rows(rows: Vec<Vec<Data>>) -> Range<Data> {
    let height = rows.len();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if height == 0 || width == 0 {
        return Range::empty();
    }

    let last_row = u32::try_from(height - 1).unwrap_or(u32::MAX);
    let last_col = u32::try_from(width - 1).unwrap_or(u32::MAX);
    let mut range = Range::new((0, 0), (last_row, last_col));
    for (r, row) in rows.into_iter().enumerate() {
        for (c, cell) in row.into_iter().enumerate() {
            if let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) {
                range.set_value((r, c), cell);
            }
        }
    }
    range
}

/// Modification time and size of a file, used to tell real changes apart
/// from spurious file system events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    pub fn modified_utc(&self) -> Option<DateTime<Utc>> {
        self.modified.map(DateTime::<Utc>::from)
    }
}

/// Where the engine gets its workbook from.
pub trait WorkbookSource: Send + Sync {
    /// Human readable description used in logs.
    fn describe(&self) -> String;

    /// File backing this source, if any. The change watcher observes it.
    fn watch_path(&self) -> Option<&Path>;

    /// Reads the whole workbook. Errors here are file-level failures.
    fn read_workbook(&self) -> Result<RawWorkbook>;
}

/// `.xlsx`/`.xlsm`/`.xls`/`.ods` file read with calamine.
#[derive(Debug, Clone)]
pub struct XlsxFileSource {
    path: PathBuf,
}

impl XlsxFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkbookSource for XlsxFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn read_workbook(&self) -> Result<RawWorkbook> {
        if !self.path.is_file() {
            return Err(SalesEngineError::WorkbookNotFound(self.path.clone()));
        }

        // Stamp before opening: a write racing the read then shows up as a
        // newer stamp on the next check.
        let stamp = FileStamp::read(&self.path);
        let mut workbook = open_workbook_auto(&self.path)?;

        let mut raw = RawWorkbook::new(self.describe());
        raw.last_modified = stamp.and_then(|s| s.modified_utc());
        raw.stamp = stamp;

        for name in workbook.sheet_names() {
            match workbook.worksheet_range(&name) {
                Ok(range) => {
                    debug!("Read sheet '{}' ({} x {})", name, range.height(), range.width());
                    raw.sheets.push((name, range));
                }
                Err(e) => warn!("Skipping unreadable sheet '{}' in {}: {}", name, raw.name, e),
            }
        }

        if raw.sheets.is_empty() {
            return Err(SalesEngineError::EmptyWorkbook(raw.name));
        }
        Ok(raw)
    }
}

/// In-memory workbook, for embedding callers that already hold the cells.
/// Replacing the contents simulates an edited file; clearing them
/// simulates a file that has gone missing.
pub struct MemoryWorkbookSource {
    workbook: Mutex<Option<RawWorkbook>>,
    watch_path: Option<PathBuf>,
    reads: AtomicUsize,
}

impl MemoryWorkbookSource {
    pub fn new(workbook: RawWorkbook) -> Self {
        Self {
            workbook: Mutex::new(Some(workbook)),
            watch_path: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Associates a file whose changes should trigger reloads.
    pub fn with_watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_path = Some(path.into());
        self
    }

    pub fn replace(&self, workbook: RawWorkbook) {
        *self.workbook.lock().unwrap_or_else(PoisonError::into_inner) = Some(workbook);
    }

    pub fn clear(&self) {
        *self.workbook.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of times the workbook has been read.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl WorkbookSource for MemoryWorkbookSource {
    fn describe(&self) -> String {
        "in-memory workbook".to_string()
    }

    fn watch_path(&self) -> Option<&Path> {
        self.watch_path.as_deref()
    }

    fn read_workbook(&self) -> Result<RawWorkbook> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let guard = self.workbook.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(workbook) if !workbook.sheets.is_empty() => {
                let mut workbook = workbook.clone();
                if let Some(path) = &self.watch_path {
                    workbook.stamp = FileStamp::read(path);
                }
                Ok(workbook)
            }
            Some(workbook) => Err(SalesEngineError::EmptyWorkbook(workbook.name.clone())),
            None => Err(SalesEngineError::WorkbookNotFound(
                self.watch_path.clone().unwrap_or_default(),
            )),
        }
    }
}
