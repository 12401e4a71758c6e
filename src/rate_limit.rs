//! Per-exchange request budget shared by every worker and process.
//!
//! The limiter holds no counters of its own: each acquisition is one atomic
//! conditional update in the store, so concurrent callers can never push
//! `used` past `capacity` within a period.

use crate::error::StoreError;
use crate::models::ConnectorStatus;
use crate::store::{Store, TokenDecision};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Budget spent; the period rolls over after `retry_after`
    Exhausted { retry_after: Duration },
    /// Connector is paused or disabled
    ConnectorInactive(ConnectorStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Granted { remaining: u32 },
    Denied(DenyReason),
}

impl Acquisition {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquisition::Granted { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Try to spend `weight` units of the exchange's budget at `now`
    ///
    /// Store failures come back as `Err`, distinct from a grant or a denial.
    pub async fn acquire(
        &self,
        exchange: &str,
        weight: u32,
        now: DateTime<Utc>,
    ) -> Result<Acquisition, StoreError> {
        let decision = self
            .store
            .try_acquire_rate_limit_token(exchange, weight, now)
            .await?;

        let acquisition = match decision {
            TokenDecision::Granted { remaining } => {
                debug!("Rate limit granted for {} (weight {}, {} left)", exchange, weight, remaining);
                Acquisition::Granted { remaining }
            }
            TokenDecision::Exhausted { retry_after_ms } => {
                debug!("Rate limit exhausted for {}, retry in {} ms", exchange, retry_after_ms);
                Acquisition::Denied(DenyReason::Exhausted {
                    retry_after: Duration::milliseconds(retry_after_ms.max(1)),
                })
            }
            TokenDecision::Inactive(status) => {
                debug!("Connector {} is {}, denying request", exchange, status);
                Acquisition::Denied(DenyReason::ConnectorInactive(status))
            }
        };

        if weight == 0 {
            warn!("Zero-weight rate limit request for {}", exchange);
        }
        Ok(acquisition)
    }

    /// Report a request weight that can never fit in one period
    pub async fn check_weight(&self, exchange: &str, weight: u32) -> Result<bool, StoreError> {
        let connector = self
            .store
            .get_connector(exchange)
            .await?
            .ok_or_else(|| StoreError::not_found("connector", exchange))?;

        let fits = weight <= connector.rate_limit.capacity;
        if !fits {
            warn!(
                "Request weight {} exceeds {} capacity {}; requests will always be denied",
                weight, exchange, connector.rate_limit.capacity
            );
        }
        Ok(fits)
    }
}
