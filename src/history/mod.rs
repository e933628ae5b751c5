/// History (audit trail)
///
/// The `HistoryManager` turns runtime changes into historic records. How much is kept
/// depends on the configured `HistoryLevel`.

pub mod manager;

pub use manager::HistoryManager;

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Amount of history recorded, ordered from least to most
///
/// - `Activity`: process, activity and variable instances
/// - `Audit`: plus task instances and identity links
/// - `Full`: plus every variable value change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryLevel {
    None,
    Activity,
    #[default]
    Audit,
    Full,
}

impl HistoryLevel {
    pub fn is_at_least(self, level: HistoryLevel) -> bool {
        self >= level
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HistoryLevel::None => "none",
            HistoryLevel::Activity => "activity",
            HistoryLevel::Audit => "audit",
            HistoryLevel::Full => "full",
        }
    }
}

impl FromStr for HistoryLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(HistoryLevel::None),
            "activity" => Ok(HistoryLevel::Activity),
            "audit" => Ok(HistoryLevel::Audit),
            "full" => Ok(HistoryLevel::Full),
            other => Err(EngineError::IllegalArgument(format!("unknown history level '{other}'"))),
        }
    }
}

impl fmt::Display for HistoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
