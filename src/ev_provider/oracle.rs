//! Remote EV oracle boundary
//!
//! One request carries every pending probability key; the response prices
//! each key for every structure the service knows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{EvQuote, ProbabilityKey};
use crate::payout::StructureId;

pub type OracleBatch = HashMap<ProbabilityKey, HashMap<StructureId, EvQuote>>;

/// Timeouts and rate limits are distinct so the breaker can count them
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("oracle request timed out")]
    Timeout,
    #[error("oracle rate limited the request")]
    RateLimited,
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("oracle response could not be decoded: {0}")]
    Decode(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvOracle: Send + Sync {
    async fn price_batch(&self, keys: Vec<ProbabilityKey>) -> Result<OracleBatch, OracleError>;
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    probabilities: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<KeyResult>,
}

#[derive(Debug, Deserialize)]
struct KeyResult {
    probability: f64,
    structures: HashMap<StructureId, EvQuote>,
}

/// JSON-over-HTTP oracle
pub struct HttpEvOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEvOracle {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EvOracle for HttpEvOracle {
    async fn price_batch(&self, keys: Vec<ProbabilityKey>) -> Result<OracleBatch, OracleError> {
        let request = BatchRequest {
            probabilities: keys.iter().map(|k| k.probability()).collect(),
        };
        debug!("POST {} with {} probabilities", self.endpoint, keys.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if status == reqwest::StatusCode::GATEWAY_TIMEOUT
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            return Err(OracleError::Timeout);
        }
        if !status.is_success() {
            return Err(OracleError::Transport(format!("HTTP {}", status)));
        }

        let body: BatchResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::Decode(e.to_string())
            }
        })?;

        Ok(body
            .results
            .into_iter()
            .map(|r| (ProbabilityKey::from_probability(r.probability), r.structures))
            .collect())
    }
}
