//! Cached query facade over the sales workbook.
//!
//! The engine owns one immutable [`EngineSnapshot`] at a time. Loads build a
//! complete new snapshot off to the side and swap it in with a single
//! assignment, so readers never see a half-built cache. A failed load keeps
//! the previous snapshot and marks it stale.

use crate::aggregation::{
    aggregate_by_dept_lob, aggregate_by_product, aggregate_by_rep, distinct_lobs, distinct_reps,
    quarterly_summary, RecordFilter,
};
use crate::config::EngineConfig;
use crate::error::{Result, SalesEngineError};
use crate::ledger::{load_from_source, Ledger, LoadedWorkbook};
use crate::schema::{
    DeptLobAggregate, LoadReport, ProductAggregate, QuarterSummary, RepAggregate, SalesRecord,
};
use crate::source::{FileStamp, WorkbookSource, XlsxFileSource};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    /// Nothing loaded yet, or the cache was cleared
    Empty,
    Loading,
    /// `stale` is set when the most recent load failed and the data shown
    /// comes from an earlier successful load
    Ready { stale: bool },
}

/// The most recent load failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Everything a successful load produced. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    /// Increases by one with every published snapshot
    pub generation: u64,
    pub ledger: Ledger,
    pub product_sales: Vec<ProductAggregate>,
    pub leaderboard: Vec<RepAggregate>,
    pub department_lob: Vec<DeptLobAggregate>,
    /// The leaderboard came from a summary sheet rather than the ledger
    pub leaderboard_from_sheet: bool,
    pub dept_lob_from_sheet: bool,
    pub sales_reps: Vec<String>,
    pub lobs: Vec<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Stamp of the file this snapshot was read from
    pub source_stamp: Option<FileStamp>,
}

impl EngineSnapshot {
    /// True when both snapshots hold the same data, whatever their
    /// generation.
    pub fn same_data(&self, other: &EngineSnapshot) -> bool {
        Self {
            generation: other.generation,
            source_stamp: other.source_stamp,
            ..self.clone()
        } == *other
    }
}

/// Clears the loading flag when a load attempt ends, however it ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bookkeeping for the last published load.
#[derive(Debug, Default)]
struct LoadGate {
    generation: u64,
    /// Highest reload ticket issued before that load started reading; every
    /// caller holding a ticket up to this one is satisfied by it
    covered_request: u64,
}

pub struct SalesEngine {
    config: EngineConfig,
    source: Arc<dyn WorkbookSource>,
    snapshot: RwLock<Option<Arc<EngineSnapshot>>>,
    /// Serializes loads
    load_gate: Mutex<LoadGate>,
    /// Tickets handed to reload callers, in arrival order
    requests: AtomicU64,
    loading: AtomicBool,
    stale: AtomicBool,
    shut_down: AtomicBool,
    last_error: Mutex<Option<LoadFailure>>,
}

impl SalesEngine {
    /// Engine over the workbook file named in `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let source = Arc::new(XlsxFileSource::new(config.workbook_path.clone()));
        Self::with_source(config, source)
    }

    pub fn with_source(config: EngineConfig, source: Arc<dyn WorkbookSource>) -> Result<Self> {
        config.validate()?;
        debug!("Creating sales engine over {}", source.describe());
        Ok(Self {
            config,
            source,
            snapshot: RwLock::new(None),
            load_gate: Mutex::new(LoadGate::default()),
            requests: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// File the change watcher should observe, if the source has one.
    pub fn watch_path(&self) -> Option<PathBuf> {
        self.source.watch_path().map(|p| p.to_path_buf())
    }

    pub fn state(&self) -> CacheState {
        if self.loading.load(Ordering::SeqCst) {
            return CacheState::Loading;
        }
        match self.current_snapshot() {
            None => CacheState::Empty,
            Some(_) => CacheState::Ready {
                stale: self.stale.load(Ordering::SeqCst),
            },
        }
    }

    /// The published snapshot, without triggering a load.
    pub fn current_snapshot(&self) -> Option<Arc<EngineSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The published snapshot, loading synchronously first if the cache is
    /// empty.
    pub fn snapshot(&self) -> Result<Arc<EngineSnapshot>> {
        match self.current_snapshot() {
            Some(snapshot) => Ok(snapshot),
            None => self.reload(),
        }
    }

    /// Re-reads the source and publishes a fresh snapshot.
    ///
    /// Concurrent callers are serialized. A caller that waited while another
    /// load ran gets that load's snapshot back without reading the source
    /// again, but only if that load started reading after the caller asked;
    /// a load already in flight when the caller arrived may predate the
    /// change the caller is reacting to. On failure the previous snapshot
    /// stays in place, marked stale, and the error is recorded.
    pub fn reload(&self) -> Result<Arc<EngineSnapshot>> {
        self.ensure_running()?;
        let ticket = self.requests.fetch_add(1, Ordering::SeqCst) + 1;

        let mut gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.covered_request >= ticket {
            if let Some(snapshot) = self
                .current_snapshot()
                .filter(|s| s.generation == gate.generation)
            {
                debug!(
                    "Reload {} coalesced into generation {} published while waiting",
                    ticket, snapshot.generation
                );
                return Ok(snapshot);
            }
        }
        self.ensure_running()?;

        let _loading = LoadingGuard::enter(&self.loading);
        let covers = self.requests.load(Ordering::SeqCst);
        let loaded = load_from_source(self.source.as_ref(), &self.config);

        if self.is_shut_down() {
            debug!("Discarding load result: engine shut down while loading");
            return Err(SalesEngineError::ShutDown);
        }

        match loaded {
            Ok(loaded) => {
                let previous = self.current_snapshot();
                let snapshot =
                    Arc::new(self.build_snapshot(loaded, previous.as_deref(), gate.generation + 1));
                gate.generation = snapshot.generation;
                gate.covered_request = covers;
                self.publish(Some(Arc::clone(&snapshot)));
                self.stale.store(false, Ordering::SeqCst);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                info!(
                    "Published snapshot generation {} ({} records)",
                    snapshot.generation,
                    snapshot.ledger.records.len()
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Reload from {} failed: {}", self.source.describe(), e);
                if self.current_snapshot().is_some() {
                    self.stale.store(true, Ordering::SeqCst);
                }
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(LoadFailure {
                    message: e.to_string(),
                    occurred_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Drops the cache. The next query loads synchronously.
    pub fn clear_cache(&self) {
        info!("Clearing sales cache");
        self.publish(None);
        self.stale.store(false, Ordering::SeqCst);
    }

    /// Stops accepting loads. A load already running finishes reading but
    /// its result is thrown away.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Sales engine shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(SalesEngineError::ShutDown);
        }
        Ok(())
    }

    fn publish(&self, snapshot: Option<Arc<EngineSnapshot>>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn build_snapshot(
        &self,
        loaded: LoadedWorkbook,
        previous: Option<&EngineSnapshot>,
        generation: u64,
    ) -> EngineSnapshot {
        let LoadedWorkbook {
            ledger,
            leaderboard,
            dept_lob,
            last_modified,
            source_stamp,
        } = loaded;
        let records = &ledger.records;

        // Sheet rows win; a sheet that disappears keeps its last rows.
        let previous_leaderboard = previous
            .filter(|p| p.leaderboard_from_sheet)
            .map(|p| p.leaderboard.clone());
        let (leaderboard, leaderboard_from_sheet) = match leaderboard.or(previous_leaderboard) {
            Some(rows) => (rows, true),
            None => (
                aggregate_by_rep(records, self.config.rep_margin_mode, None),
                false,
            ),
        };

        let previous_dept_lob = previous
            .filter(|p| p.dept_lob_from_sheet)
            .map(|p| p.department_lob.clone());
        let (department_lob, dept_lob_from_sheet) = match dept_lob.or(previous_dept_lob) {
            Some(rows) => (rows, true),
            None => (aggregate_by_dept_lob(records, &self.config.lob_targets), false),
        };

        EngineSnapshot {
            generation,
            product_sales: aggregate_by_product(records, self.config.product_value_column),
            leaderboard,
            department_lob,
            leaderboard_from_sheet,
            dept_lob_from_sheet,
            sales_reps: distinct_reps(records),
            lobs: distinct_lobs(records),
            last_modified,
            source_stamp,
            ledger,
        }
    }

    pub fn product_sales(&self) -> Result<Vec<ProductAggregate>> {
        Ok(self.snapshot()?.product_sales.clone())
    }

    pub fn sales_leaderboard(&self) -> Result<Vec<RepAggregate>> {
        Ok(self.snapshot()?.leaderboard.clone())
    }

    pub fn department_lob(&self) -> Result<Vec<DeptLobAggregate>> {
        Ok(self.snapshot()?.department_lob.clone())
    }

    pub fn all_sales_reps(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.sales_reps.clone())
    }

    pub fn all_lobs(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.lobs.clone())
    }

    pub fn pending_amount(&self) -> Result<f64> {
        Ok(self.snapshot()?.ledger.pending_amount)
    }

    pub fn in_progress_amount(&self) -> Result<f64> {
        Ok(self.snapshot()?.ledger.in_progress_amount)
    }

    pub fn records(&self) -> Result<Vec<SalesRecord>> {
        Ok(self.snapshot()?.ledger.records.clone())
    }

    pub fn quarterly_summary(&self, fiscal_year: i32) -> Result<Vec<QuarterSummary>> {
        Ok(quarterly_summary(&self.snapshot()?.ledger.records, fiscal_year))
    }

    /// Product view over the records matching `filter`, computed on demand.
    pub fn product_sales_filtered(&self, filter: &RecordFilter) -> Result<Vec<ProductAggregate>> {
        let snapshot = self.snapshot()?;
        Ok(aggregate_by_product(
            filter.apply(&snapshot.ledger.records),
            self.config.product_value_column,
        ))
    }

    /// Rep view over the records matching `filter`. Always computed from the
    /// ledger, since summary sheets cannot be filtered. Every rep in
    /// `selected_reps` is listed, with zeros when they have no matching
    /// records.
    pub fn sales_leaderboard_filtered(
        &self,
        filter: &RecordFilter,
        selected_reps: Option<&[String]>,
    ) -> Result<Vec<RepAggregate>> {
        let snapshot = self.snapshot()?;
        Ok(aggregate_by_rep(
            filter.apply(&snapshot.ledger.records),
            self.config.rep_margin_mode,
            selected_reps,
        ))
    }

    pub fn department_lob_filtered(&self, filter: &RecordFilter) -> Result<Vec<DeptLobAggregate>> {
        let snapshot = self.snapshot()?;
        Ok(aggregate_by_dept_lob(
            filter.apply(&snapshot.ledger.records),
            &self.config.lob_targets,
        ))
    }

    pub fn last_error(&self) -> Option<LoadFailure> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_report(&self) -> Option<LoadReport> {
        self.current_snapshot().map(|s| s.ledger.report.clone())
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.current_snapshot().and_then(|s| s.last_modified)
    }
}
