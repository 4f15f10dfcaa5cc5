//! # Sales Ledger Engine
//!
//! Turns a loosely-typed sales workbook into a classified transaction ledger
//! and serves cached aggregates over it.
//!
//! ## Core Concepts
//!
//! - **Ledger**: every valid row of the primary worksheet as a [`SalesRecord`],
//!   plus the pending and in-progress amounts accumulated in the same pass
//! - **Fiscal calendar**: years start in August and are labeled by the year
//!   they end in; quarters follow the completion date
//! - **Normalization**: free-text product types and departments are mapped
//!   onto a small line-of-business taxonomy before grouping
//! - **Snapshots**: [`SalesEngine`] publishes an immutable snapshot per load
//!   and keeps the last good one when a reload fails
//!
//! ## Example
//!
//! ```rust,no_run
//! use sales_ledger_engine::*;
//!
//! let config = EngineConfig::for_workbook("sales.xlsx");
//! let engine = SalesEngine::new(config).unwrap();
//!
//! for product in engine.product_sales().unwrap() {
//!     println!("{}: {:.2} ({}%)", product.product_type, product.total_margin, product.percentage_of_total);
//! }
//! println!("Pending: {:.2}", engine.pending_amount().unwrap());
//! ```

pub mod aggregation;
pub mod cell;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod normalizer;
pub mod schema;
pub mod source;
pub mod summary_sheets;
pub mod utils;

#[cfg(feature = "watch")]
pub mod watcher;

pub use aggregation::{
    aggregate_by_dept_lob, aggregate_by_product, aggregate_by_rep, quarterly_summary, RecordFilter,
};
pub use cell::CellParse;
pub use classifier::{RowClassifier, SkipReason};
pub use config::{ColumnLayout, EngineConfig, LobTarget, LobTargets, RepMarginMode, ValueColumn};
pub use engine::{CacheState, EngineSnapshot, LoadFailure, SalesEngine};
pub use error::{Result, SalesEngineError};
pub use ledger::{load_from_source, load_ledger, Ledger, LedgerLoader, LoadedWorkbook};
pub use normalizer::{normalize_department, normalize_product_type};
pub use schema::*;
pub use source::{MemoryWorkbookSource, RawWorkbook, WorkbookSource, XlsxFileSource};
pub use utils::*;

#[cfg(feature = "watch")]
pub use watcher::{watch_for_changes, DataUpdated, WatchHandle};
