use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{
    score_bands, PAID_PASS_MIN_CVR, PAID_PASS_MIN_SIGNUPS, PASS_THRESHOLD_POINTS,
    UPVOTES_PER_POINT,
};
use crate::error::{AppError, Result};

/// Nanosecond UTC epoch timestamp. All persisted timestamps use this unit.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ---------------------------------------------------------------------------
// RawOpportunity — discovery input
// ---------------------------------------------------------------------------

/// A candidate product idea with measured signal counts, as delivered by the
/// discovery service. Immutable; consumed once by the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOpportunity {
    pub id: String,
    pub topic: String,
    pub reddit_mentions: u32,
    /// Age in days of each timestamped reddit mention. Mentions beyond this
    /// list (or the whole count when None) carry full weight — the scouts do
    /// not always return timestamps.
    #[serde(default)]
    pub reddit_mention_ages_days: Option<Vec<f64>>,
    pub twitter_mentions: u32,
    /// Normalized Google-Trends-style interest, 0.0 to 1.0.
    pub trend_score: f64,
    /// Cost-per-click in dollars — proxy for commercial intent.
    pub cpc: f64,
    pub competitor_count: u32,
    pub competitor_strength: CompetitorStrength,
}

impl RawOpportunity {
    /// Boundary check for discovery data. Bad input is rejected here rather
    /// than clamped inside the scorer, so upstream scout bugs stay visible.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AppError::InvalidInput("opportunity id is empty".to_string()));
        }
        if !self.trend_score.is_finite() || !(0.0..=1.0).contains(&self.trend_score) {
            return Err(AppError::InvalidInput(format!(
                "trend_score must be within [0, 1], got {}",
                self.trend_score
            )));
        }
        if !self.cpc.is_finite() || self.cpc < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "cpc must be a non-negative number, got {}",
                self.cpc
            )));
        }
        if let Some(ages) = &self.reddit_mention_ages_days {
            if ages.len() > self.reddit_mentions as usize {
                return Err(AppError::InvalidInput(format!(
                    "{} mention ages supplied for {} mentions",
                    ages.len(),
                    self.reddit_mentions
                )));
            }
            if ages.iter().any(|a| !a.is_finite() || *a < 0.0) {
                return Err(AppError::InvalidInput(
                    "mention ages must be non-negative numbers".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitorStrength {
    /// No competing products found — unvalidated-market risk.
    None,
    /// Existing but non-dominant competitors — proven demand, room to compete.
    Weak,
    /// Saturated market.
    Strong,
}

impl std::fmt::Display for CompetitorStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompetitorStrength::None => "none",
            CompetitorStrength::Weak => "weak",
            CompetitorStrength::Strong => "strong",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// ScoredOpportunity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredOpportunity {
    pub raw: RawOpportunity,
    /// 0-50.
    pub demand_score: f64,
    /// 0-40.
    pub intent_score: f64,
    /// -20 to 0.
    pub competition_penalty: f64,
    /// clamp(demand + intent + penalty, 0, 100).
    pub opportunity_score: f64,
    pub confidence: Confidence,
    pub scored_at_ns: i64,
}

/// Surfacing band for a scored opportunity (caller policy, not the scorer's).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    /// score >= 70 — surfaced first.
    High,
    /// 60 <= score < 70.
    Good,
    /// 50 <= score < 60 — shown but flagged.
    Marginal,
    /// score < 50 — not surfaced to the reviewer.
    Ignore,
}

impl PriorityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= score_bands::HIGH_MIN {
            PriorityBand::High
        } else if score >= score_bands::GOOD_MIN {
            PriorityBand::Good
        } else if score >= score_bands::MARGINAL_MIN {
            PriorityBand::Marginal
        } else {
            PriorityBand::Ignore
        }
    }
}

impl std::fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriorityBand::High => "high",
            PriorityBand::Good => "good",
            PriorityBand::Marginal => "marginal",
            PriorityBand::Ignore => "ignore",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Validation signals
// ---------------------------------------------------------------------------

/// The closed set of organic validation signals. Closed by design — the point
/// table stays auditable; no dynamically named signal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    EmailSignup,
    Dm,
    BuyComment,
    DetailQuestion,
    Share,
    /// Raw upvotes; converted to points via integer division by 25.
    UpvoteUnit,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalType::EmailSignup => "email_signup",
            SignalType::Dm => "dm",
            SignalType::BuyComment => "buy_comment",
            SignalType::DetailQuestion => "detail_question",
            SignalType::Share => "share",
            SignalType::UpvoteUnit => "upvote_unit",
        };
        write!(f, "{s}")
    }
}

/// Per-type tallies for one session. Append-only — counts never decrement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalCounts {
    pub email_signups: u32,
    pub dms: u32,
    pub buy_comments: u32,
    pub detail_questions: u32,
    pub shares: u32,
    pub upvote_units: u32,
}

impl SignalCounts {
    pub fn record(&mut self, signal_type: SignalType, count: u32) {
        match signal_type {
            SignalType::EmailSignup => self.email_signups += count,
            SignalType::Dm => self.dms += count,
            SignalType::BuyComment => self.buy_comments += count,
            SignalType::DetailQuestion => self.detail_questions += count,
            SignalType::Share => self.shares += count,
            SignalType::UpvoteUnit => self.upvote_units += count,
        }
    }

    /// The validation point rubric:
    /// 3/signup, 4/dm, 3/buy comment, 2/question, 3/share, 1 per 25 upvotes.
    pub fn points(&self) -> u32 {
        3 * self.email_signups
            + 4 * self.dms
            + 3 * self.buy_comments
            + 2 * self.detail_questions
            + 3 * self.shares
            + self.upvote_units / UPVOTES_PER_POINT
    }
}

// ---------------------------------------------------------------------------
// Session status and evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Passed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Passed => "passed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    Organic,
    Paid,
}

impl std::fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationMethod::Organic => "organic",
            ValidationMethod::Paid => "paid",
        };
        write!(f, "{s}")
    }
}

/// Paid-validation tallies: ad clicks and resulting signups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdStats {
    pub clicks: u32,
    pub signups: u32,
}

impl AdStats {
    /// Conversion rate; 0.0 before any click arrives.
    pub fn cvr(&self) -> f64 {
        if self.clicks == 0 {
            0.0
        } else {
            f64::from(self.signups) / f64::from(self.clicks)
        }
    }
}

/// The metric a session is judged on. Organic and paid share one lifecycle
/// and differ only in this measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationOutcome {
    Organic { points: u32 },
    Paid { cvr: f64, signups: u32 },
}

impl ValidationOutcome {
    pub fn passes(&self) -> bool {
        match self {
            ValidationOutcome::Organic { points } => *points >= PASS_THRESHOLD_POINTS,
            ValidationOutcome::Paid { cvr, signups } => {
                *cvr >= PAID_PASS_MIN_CVR && *signups >= PAID_PASS_MIN_SIGNUPS
            }
        }
    }

    /// Points still needed to pass. None for paid sessions.
    pub fn points_needed(&self) -> Option<u32> {
        match self {
            ValidationOutcome::Organic { points } => {
                Some(PASS_THRESHOLD_POINTS.saturating_sub(*points))
            }
            ValidationOutcome::Paid { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationResult {
    Running {
        outcome: ValidationOutcome,
    },
    Passed {
        outcome: ValidationOutcome,
    },
    Failed {
        outcome: ValidationOutcome,
        retry_eligible_after_ns: i64,
    },
}

impl EvaluationResult {
    pub fn status(&self) -> SessionStatus {
        match self {
            EvaluationResult::Running { .. } => SessionStatus::Running,
            EvaluationResult::Passed { .. } => SessionStatus::Passed,
            EvaluationResult::Failed { .. } => SessionStatus::Failed,
        }
    }

    pub fn outcome(&self) -> ValidationOutcome {
        match self {
            EvaluationResult::Running { outcome }
            | EvaluationResult::Passed { outcome }
            | EvaluationResult::Failed { outcome, .. } => *outcome,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EvaluationResult::Running { .. })
    }
}

// ---------------------------------------------------------------------------
// Events — sent over the mpsc channel to the DB writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Scored(ScoredOpportunity),
    SessionOpened {
        opportunity_id: String,
        method: ValidationMethod,
        opened_at_ns: i64,
        deadline_ns: i64,
    },
    SignalLogged {
        opportunity_id: String,
        signal_type: SignalType,
        count: u32,
        /// Full tally snapshot after the increment; the writer mirrors it.
        counts: SignalCounts,
        logged_at_ns: i64,
    },
    AdResultLogged {
        opportunity_id: String,
        ads: AdStats,
    },
    SessionClosed {
        opportunity_id: String,
        status: SessionStatus,
        retry_eligible_after_ns: Option<i64>,
        closed_at_ns: i64,
        forced: bool,
    },
    DeadlineExtended {
        opportunity_id: String,
        deadline_ns: i64,
    },
}
