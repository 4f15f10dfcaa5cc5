use crate::error::{Result, SalesEngineError};
use crate::utils::{validate_fiscal_year_start_month, DEFAULT_FISCAL_YEAR_START_MONTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 1-based column positions in the primary worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub received_date: usize,
    pub po_value: usize,
    pub vertiv_value: usize,
    pub buy_resell_value: usize,
    pub agency_margin: usize,
    pub total_commission: usize,
    pub commission_percentage: usize,
    pub completion_date: usize,
    pub sales_rep: usize,
    /// Free-text order status; rows mentioning "cancelled" are dropped
    pub status: usize,
    pub department: usize,
    pub product_type: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            received_date: 1,
            po_value: 7,
            vertiv_value: 8,
            buy_resell_value: 10,
            agency_margin: 13,
            total_commission: 14,
            commission_percentage: 16,
            completion_date: 25,
            sales_rep: 26,
            status: 27,
            department: 29,
            product_type: 30,
        }
    }
}

impl ColumnLayout {
    fn all(&self) -> [(&'static str, usize); 12] {
        [
            ("received_date", self.received_date),
            ("po_value", self.po_value),
            ("vertiv_value", self.vertiv_value),
            ("buy_resell_value", self.buy_resell_value),
            ("agency_margin", self.agency_margin),
            ("total_commission", self.total_commission),
            ("commission_percentage", self.commission_percentage),
            ("completion_date", self.completion_date),
            ("sales_rep", self.sales_rep),
            ("status", self.status),
            ("department", self.department),
            ("product_type", self.product_type),
        ]
    }
}

/// Column used to order product rows and as the percentage denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ValueColumn {
    #[default]
    TotalMargin,
    AgencyMargin,
    BuyResellMargin,
    VertivValue,
    PoValue,
}

/// How the rep leaderboard decomposes margin when built from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RepMarginMode {
    /// Agency and buy-resell margins come straight from their columns.
    #[default]
    Columns,
    /// Legacy decomposition: 70% of total commission is agency margin and
    /// 30% buy-resell margin.
    LegacySplit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobTarget {
    pub lob: String,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobTargets {
    pub targets: Vec<LobTarget>,
    /// Target given to the "Other" bucket when it is created on demand
    pub other_target: f64,
}

impl Default for LobTargets {
    fn default() -> Self {
        let targets = ["Power", "Thermal", "Channel", "Service", "Batts & Caps"]
            .into_iter()
            .map(|lob| LobTarget {
                lob: lob.to_string(),
                target: 0.0,
            })
            .collect();
        Self {
            targets,
            other_target: 0.0,
        }
    }
}

impl LobTargets {
    pub fn target_for(&self, lob: &str) -> Option<f64> {
        self.targets
            .iter()
            .find(|t| t.lob.eq_ignore_ascii_case(lob))
            .map(|t| t.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workbook_path: PathBuf,
    pub worksheet_name: String,
    pub leaderboard_sheet: String,
    pub dept_lob_sheet: String,
    /// Rows at the top of the primary worksheet that hold headers
    pub header_rows: usize,
    pub columns: ColumnLayout,
    pub fiscal_year_start_month: u32,
    /// Fraction of Vertiv value counted as in-progress revenue
    pub in_progress_rate: f64,
    pub product_value_column: ValueColumn,
    pub rep_margin_mode: RepMarginMode,
    pub lob_targets: LobTargets,
    pub debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workbook_path: PathBuf::from("sales.xlsx"),
            worksheet_name: "Sales Data".to_string(),
            leaderboard_sheet: "Leaderboard".to_string(),
            dept_lob_sheet: "Dept LOB".to_string(),
            header_rows: 1,
            columns: ColumnLayout::default(),
            fiscal_year_start_month: DEFAULT_FISCAL_YEAR_START_MONTH,
            in_progress_rate: 0.12,
            product_value_column: ValueColumn::default(),
            rep_margin_mode: RepMarginMode::default(),
            lob_targets: LobTargets::default(),
            debounce_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn for_workbook(path: impl Into<PathBuf>) -> Self {
        Self {
            workbook_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_fiscal_year_start_month(self.fiscal_year_start_month)?;

        for (name, column) in self.columns.all() {
            if column == 0 {
                return Err(SalesEngineError::Config(format!(
                    "column '{}' must be 1-based, got 0",
                    name
                )));
            }
        }

        if !self.in_progress_rate.is_finite() || !(0.0..=1.0).contains(&self.in_progress_rate) {
            return Err(SalesEngineError::Config(format!(
                "in-progress rate {} must be between 0.0 and 1.0",
                self.in_progress_rate
            )));
        }

        if self.worksheet_name.trim().is_empty() {
            return Err(SalesEngineError::Config(
                "worksheet name must not be blank".to_string(),
            ));
        }

        Ok(())
    }
}
