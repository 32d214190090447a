//! Run and logging sections

use serde::{Deserialize, Serialize};

use crate::types::Site;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Scored legs, JSON array
    pub legs_path: String,
    /// Only build this site's ladders
    pub site: Option<Site>,
    /// Payout ladders YAML; built-in ladders when unset
    pub payouts_path: Option<String>,
    /// Overrides `builder.seed`
    pub seed: Option<u64>,
    /// Pretty-print the JSON report
    pub pretty: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            legs_path: "data/legs.json".to_string(),
            site: None,
            payouts_path: None,
            seed: None,
            pretty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Used when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
