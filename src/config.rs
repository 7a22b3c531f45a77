use crate::error::{AppError, Result};

/// Organic validation passes once the point ledger reaches this total.
pub const PASS_THRESHOLD_POINTS: u32 = 15;

/// Raw upvotes convert to points by integer division: 1 point per 25 upvotes.
pub const UPVOTES_PER_POINT: u32 = 25;

/// Length of a validation window. Fixed by the rubric, not per-opportunity;
/// the manual "extend" override adds another full window.
pub const VALIDATION_WINDOW_DAYS: i64 = 7;

/// A failed opportunity may not be retried for this long.
pub const RETRY_BACKOFF_DAYS: i64 = 90;

/// Paid validation passes when cvr >= this AND signups >= PAID_PASS_MIN_SIGNUPS.
pub const PAID_PASS_MIN_CVR: f64 = 0.04;
pub const PAID_PASS_MIN_SIGNUPS: u32 = 2;

/// Deadline sweeper interval (seconds) — how often running sessions are
/// re-evaluated so deadline expiries commit without waiting for traffic.
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// Channel capacity for internal event routing.
pub const CHANNEL_CAPACITY: usize = 1024;

pub const NS_PER_DAY: i64 = 24 * 3_600 * 1_000_000_000;

/// Surfacing thresholds applied to the 0-100 opportunity score.
pub mod score_bands {
    pub const HIGH_MIN: f64 = 70.0;
    pub const GOOD_MIN: f64 = 60.0;
    pub const MARGINAL_MIN: f64 = 50.0;
}

/// Component weights and caps for the opportunity score.
/// Demand caps at 50, intent at 40, penalty floor at -20; the total is
/// clamped to [0, 100].
pub mod scoring {
    /// Reddit mentions: 1.5 pts per (decay-weighted) mention, 20 mentions saturate.
    pub const REDDIT_POINTS_PER_MENTION: f64 = 1.5;
    pub const REDDIT_CAP: f64 = 30.0;

    /// Twitter mentions: 0.5 pts per mention, 20 mentions saturate.
    pub const TWITTER_POINTS_PER_MENTION: f64 = 0.5;
    pub const TWITTER_CAP: f64 = 10.0;

    /// Normalized trend interest maps linearly onto 0-10.
    pub const TREND_CAP: f64 = 10.0;

    pub const DEMAND_CAP: f64 = 50.0;

    /// CPC ramp: $3+ CPC reads as high commercial intent and earns the full cap.
    pub const CPC_CAP: f64 = 20.0;
    pub const CPC_SATURATION_DOLLARS: f64 = 3.0;

    /// Competitor sales signal: 5 pts per competitor in a weak (non-dominant)
    /// market, 4 competitors saturate. Strong or absent markets earn nothing.
    pub const COMPETITOR_POINTS_EACH: f64 = 5.0;
    pub const COMPETITOR_CAP: f64 = 20.0;

    pub const INTENT_CAP: f64 = 40.0;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Deadline sweeper interval override (SWEEP_INTERVAL_SECS)
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "tracker.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(SWEEP_INTERVAL_SECS),
        })
    }
}
