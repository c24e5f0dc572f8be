//! Adaptive Retention Mechanism (ARM)
//!
//! Every episode gets a time-to-live that doubles with each reuse:
//!
//! ```text
//! ttl_days(visits) = min(max_ttl_days, base_ttl_days * 2^visits)
//! ```
//!
//! With the defaults a fresh episode lives 7 days, one reused once 14 days,
//! twice 28 days, and so on until the 365 day cap. Expired episodes become
//! dormant and are reactivated by the next reuse; the visit counter never
//! resets, so a reactivated episode resumes the same backoff curve.

use crate::error::{MemoryError, Result};
use crate::types::{EpisodeStatus, EpisodicUnit};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Retention configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// TTL granted to a never-reused episode
    pub base_ttl_days: u64,
    /// Upper bound on any single TTL grant
    pub max_ttl_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            base_ttl_days: 7,
            max_ttl_days: 365,
        }
    }
}

/// Longest TTL grant accepted (100 years). Expiry instants have to fit the
/// signed nanosecond timestamps the SQLite store indexes on.
pub const MAX_TTL_DAYS_LIMIT: u64 = 36_500;

impl RetentionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_ttl_days == 0 {
            return Err(MemoryError::Configuration(
                "base_ttl_days must be positive".into(),
            ));
        }
        if self.max_ttl_days < self.base_ttl_days {
            return Err(MemoryError::Configuration(format!(
                "max_ttl_days ({}) is below base_ttl_days ({})",
                self.max_ttl_days, self.base_ttl_days
            )));
        }
        if self.max_ttl_days > MAX_TTL_DAYS_LIMIT {
            return Err(MemoryError::Configuration(format!(
                "max_ttl_days ({}) exceeds the limit of {} days",
                self.max_ttl_days, MAX_TTL_DAYS_LIMIT
            )));
        }
        Ok(())
    }
}

/// Builder for retention config
pub struct RetentionConfigBuilder {
    config: RetentionConfig,
}

impl RetentionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RetentionConfig::default(),
        }
    }

    pub fn base_ttl_days(mut self, days: u64) -> Self {
        self.config.base_ttl_days = days;
        self
    }

    pub fn max_ttl_days(mut self, days: u64) -> Self {
        self.config.max_ttl_days = days;
        self
    }

    pub fn build(self) -> Result<RetentionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RetentionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What a reuse did to an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseOutcome {
    pub visits: u32,
    pub granted_days: u64,
    pub reactivated: bool,
}

/// The ARM state machine. Pure: all transitions take `now` explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    config: RetentionConfig,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// TTL grant in days for a visit count, saturating at the configured cap
    pub fn ttl_days(&self, visits: u32) -> u64 {
        let factor = 1u64.checked_shl(visits).unwrap_or(u64::MAX);
        self.config
            .base_ttl_days
            .saturating_mul(factor)
            .min(self.config.max_ttl_days)
    }

    /// TTL grant as a duration
    pub fn ttl_for(&self, visits: u32) -> Duration {
        // max_ttl_days is a u64 but chrono caps durations well below that
        let days = i64::try_from(self.ttl_days(visits)).unwrap_or(i64::MAX);
        Duration::try_days(days).unwrap_or(Duration::MAX)
    }

    fn expiry_from(&self, now: DateTime<Utc>, visits: u32) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl_for(visits))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Reset a freshly confirmed unit to its first grant
    pub fn initialize(&self, unit: &mut EpisodicUnit, now: DateTime<Utc>) {
        unit.visits = 0;
        unit.ttl = self.expiry_from(now, 0);
        unit.status = EpisodeStatus::Active;
    }

    /// Record a reuse: bump visits, extend the TTL, reactivate if dormant
    pub fn on_reuse(&self, unit: &mut EpisodicUnit, now: DateTime<Utc>) -> ReuseOutcome {
        unit.visits = unit.visits.saturating_add(1);
        unit.ttl = self.expiry_from(now, unit.visits);

        let reactivated = unit.status == EpisodeStatus::Dormant;
        if reactivated {
            unit.status = EpisodeStatus::Active;
            tracing::info!(episode_id = %unit.episode_id, visits = unit.visits, "episode reactivated");
        } else {
            tracing::debug!(episode_id = %unit.episode_id, visits = unit.visits, ttl = %unit.ttl, "ttl renewed");
        }

        ReuseOutcome {
            visits: unit.visits,
            granted_days: self.ttl_days(unit.visits),
            reactivated,
        }
    }

    /// Soft-delete an active unit whose TTL has passed. Returns true on transition.
    pub fn check_lifecycle(&self, unit: &mut EpisodicUnit, now: DateTime<Utc>) -> bool {
        if unit.status == EpisodeStatus::Active && unit.is_expired(now) {
            unit.status = EpisodeStatus::Dormant;
            tracing::info!(episode_id = %unit.episode_id, "ttl expired, episode now dormant");
            true
        } else {
            false
        }
    }
}
