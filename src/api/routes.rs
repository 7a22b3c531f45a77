use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::api::health::HealthState;
use crate::db::models::{OpportunityRow, SignalLogRow, ValidationSessionRow};
use crate::error::AppError;
use crate::scorer::OpportunityScorer;
use crate::state::SessionStore;
use crate::types::{
    now_ns, Confidence, PriorityBand, RawOpportunity, SessionStatus, SignalCounts, SignalType,
    TrackerEvent, ValidationMethod, ValidationOutcome,
};
use crate::validation::ValidationSession;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub store: Arc<SessionStore>,
    pub scorer: Arc<OpportunityScorer>,
    pub event_tx: mpsc::Sender<TrackerEvent>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/opportunities", post(score_opportunity).get(get_opportunities))
        .route("/opportunities/:id", get(get_opportunity))
        .route(
            "/opportunities/:id/validation",
            post(open_validation).get(get_validation),
        )
        .route(
            "/opportunities/:id/validation/signals",
            post(record_signal).get(get_signal_log),
        )
        .route("/opportunities/:id/validation/ad-results", post(record_ad_result))
        .route("/opportunities/:id/validation/force", post(force_validation))
        .route("/opportunities/:id/validation/extend", post(extend_validation))
        .route("/validation/sessions", get(get_sessions))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    pub min_score: Option<f64>,
    pub band: Option<PriorityBand>,
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SignalLogQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct OpenValidationRequest {
    pub method: ValidationMethod,
}

#[derive(Deserialize)]
pub struct SignalRequest {
    pub signal_type: SignalType,
    pub count: Option<u32>,
}

#[derive(Deserialize)]
pub struct AdResultRequest {
    pub clicks: u32,
    pub signups: u32,
}

#[derive(Deserialize)]
pub struct ForceRequest {
    pub target: SessionStatus,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ScoredResponse {
    pub id: String,
    pub topic: String,
    pub demand_score: f64,
    pub intent_score: f64,
    pub competition_penalty: f64,
    pub opportunity_score: f64,
    pub confidence: Confidence,
    pub priority_band: PriorityBand,
}

#[derive(Serialize)]
pub struct OpportunityResponse {
    pub id: String,
    pub topic: String,
    pub reddit_mentions: i64,
    pub twitter_mentions: i64,
    pub trend_score: f64,
    pub cpc: f64,
    pub competitor_count: i64,
    pub competitor_strength: String,
    pub demand_score: f64,
    pub intent_score: f64,
    pub competition_penalty: f64,
    pub opportunity_score: f64,
    pub confidence: String,
    pub priority_band: PriorityBand,
    pub scored_at: i64,
}

impl From<OpportunityRow> for OpportunityResponse {
    fn from(row: OpportunityRow) -> Self {
        Self {
            priority_band: PriorityBand::from_score(row.opportunity_score),
            id: row.id,
            topic: row.topic,
            reddit_mentions: row.reddit_mentions,
            twitter_mentions: row.twitter_mentions,
            trend_score: row.trend_score,
            cpc: row.cpc,
            competitor_count: row.competitor_count,
            competitor_strength: row.competitor_strength,
            demand_score: row.demand_score,
            intent_score: row.intent_score,
            competition_penalty: row.competition_penalty,
            opportunity_score: row.opportunity_score,
            confidence: row.confidence,
            scored_at: row.scored_at,
        }
    }
}

#[derive(Serialize)]
pub struct OpportunityDetailResponse {
    #[serde(flatten)]
    pub opportunity: OpportunityResponse,
    pub validation: Option<ValidationStatusResponse>,
}

#[derive(Serialize)]
pub struct ValidationStatusResponse {
    pub opportunity_id: String,
    pub method: ValidationMethod,
    pub status: SessionStatus,
    pub opened_at_ns: i64,
    pub deadline_ns: i64,
    pub points: Option<u32>,
    pub points_needed: Option<u32>,
    pub signals: Option<SignalCounts>,
    pub cvr: Option<f64>,
    pub ad_signups: Option<u32>,
    pub retry_eligible_after_ns: Option<i64>,
}

impl ValidationStatusResponse {
    fn from_session(session: &ValidationSession) -> Self {
        let outcome = session.current_outcome();
        let (points, signals, cvr, ad_signups) = match outcome {
            ValidationOutcome::Organic { points } => {
                (Some(points), Some(session.signals), None, None)
            }
            ValidationOutcome::Paid { cvr, signups } => (None, None, Some(cvr), Some(signups)),
        };
        let points_needed = if session.is_running() {
            outcome.points_needed()
        } else {
            None
        };
        Self {
            opportunity_id: session.opportunity_id.clone(),
            method: session.method,
            status: session.status,
            opened_at_ns: session.opened_at_ns,
            deadline_ns: session.deadline_ns,
            points,
            points_needed,
            signals,
            cvr,
            ad_signups,
            retry_eligible_after_ns: session.retry_eligible_after_ns,
        }
    }
}

#[derive(Serialize)]
pub struct SignalLogResponse {
    pub opportunity_id: String,
    pub points: u32,
    pub points_needed: u32,
    pub signals: SignalCounts,
}

#[derive(Serialize)]
pub struct AdResultResponse {
    pub opportunity_id: String,
    pub clicks: u32,
    pub signups: u32,
    pub cvr: f64,
}

#[derive(Serialize)]
pub struct ExtendResponse {
    pub opportunity_id: String,
    pub deadline_ns: i64,
}

/// Persisted session row, reported with the stored string forms — the
/// durable record rather than the live in-memory view.
#[derive(Serialize)]
pub struct SessionRowResponse {
    pub opportunity_id: String,
    pub method: String,
    pub status: String,
    pub opened_at: i64,
    pub deadline: i64,
    pub points: u32,
    pub ad_clicks: i64,
    pub ad_signups: i64,
    pub closed_at: Option<i64>,
    pub retry_eligible_after: Option<i64>,
}

impl From<ValidationSessionRow> for SessionRowResponse {
    fn from(row: ValidationSessionRow) -> Self {
        let signals = SignalCounts {
            email_signups: row.email_signups as u32,
            dms: row.dms as u32,
            buy_comments: row.buy_comments as u32,
            detail_questions: row.detail_questions as u32,
            shares: row.shares as u32,
            upvote_units: row.upvote_units as u32,
        };
        Self {
            opportunity_id: row.opportunity_id,
            method: row.method,
            status: row.status,
            opened_at: row.opened_at,
            deadline: row.deadline,
            points: signals.points(),
            ad_clicks: row.ad_clicks,
            ad_signups: row.ad_signups,
            closed_at: row.closed_at,
            retry_eligible_after: row.retry_eligible_after,
        }
    }
}

#[derive(Serialize)]
pub struct SignalLogEntryResponse {
    pub id: i64,
    pub opportunity_id: String,
    pub signal_type: String,
    pub count: i64,
    pub logged_at: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions_total: usize,
    pub sessions_running: usize,
    pub events_written: u64,
    pub db_errors: u64,
    pub last_sweep_at_ns: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn score_opportunity(
    State(state): State<ApiState>,
    Json(raw): Json<RawOpportunity>,
) -> Result<Json<ScoredResponse>, AppError> {
    raw.validate()?;
    let scored = state.scorer.score(&raw);

    if let Err(e) = state.event_tx.try_send(TrackerEvent::Scored(scored.clone())) {
        warn!("event channel full, dropping scored event: {e}");
    }

    Ok(Json(ScoredResponse {
        id: scored.raw.id,
        topic: scored.raw.topic,
        demand_score: scored.demand_score,
        intent_score: scored.intent_score,
        competition_penalty: scored.competition_penalty,
        opportunity_score: scored.opportunity_score,
        confidence: scored.confidence,
        priority_band: PriorityBand::from_score(scored.opportunity_score),
    }))
}

async fn get_opportunities(
    State(state): State<ApiState>,
    Query(params): Query<OpportunitiesQuery>,
) -> Result<Json<Vec<OpportunityResponse>>, AppError> {
    let min_score = params.min_score.unwrap_or(0.0);

    let rows = sqlx::query_as::<_, OpportunityRow>(
        r#"
        SELECT id, topic, reddit_mentions, twitter_mentions, trend_score, cpc,
               competitor_count, competitor_strength,
               demand_score, intent_score, competition_penalty,
               opportunity_score, confidence, scored_at
        FROM opportunities
        WHERE opportunity_score >= ?
        ORDER BY opportunity_score DESC
        "#,
    )
    .bind(min_score)
    .fetch_all(&state.pool)
    .await?;

    let opportunities: Vec<OpportunityResponse> = rows
        .into_iter()
        .map(OpportunityResponse::from)
        .filter(|o| params.band.map_or(true, |b| o.priority_band == b))
        .collect();

    Ok(Json(opportunities))
}

async fn get_opportunity(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
) -> Result<Json<OpportunityDetailResponse>, AppError> {
    let row = fetch_opportunity(&state.pool, &opportunity_id).await?;
    let validation = state
        .store
        .get(&opportunity_id)
        .map(|s| ValidationStatusResponse::from_session(&s));

    Ok(Json(OpportunityDetailResponse {
        opportunity: OpportunityResponse::from(row),
        validation,
    }))
}

async fn open_validation(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
    Json(request): Json<OpenValidationRequest>,
) -> Result<Json<ValidationStatusResponse>, AppError> {
    // Sessions only open for opportunities discovery has actually delivered.
    fetch_opportunity(&state.pool, &opportunity_id).await?;

    let session = state
        .store
        .open_session(&opportunity_id, request.method, now_ns())?;
    Ok(Json(ValidationStatusResponse::from_session(&session)))
}

/// Evaluate a session at query time, committing any due transition, and
/// return the resulting status.
async fn get_validation(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
) -> Result<Json<ValidationStatusResponse>, AppError> {
    state.store.commit_evaluation(&opportunity_id, now_ns())?;
    let session = state
        .store
        .get(&opportunity_id)
        .ok_or_else(|| AppError::NotFound(opportunity_id.clone()))?;
    Ok(Json(ValidationStatusResponse::from_session(&session)))
}

async fn record_signal(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
    Json(request): Json<SignalRequest>,
) -> Result<Json<SignalLogResponse>, AppError> {
    let count = request.count.unwrap_or(1);
    if count == 0 {
        return Err(AppError::InvalidInput("signal count must be at least 1".to_string()));
    }

    let signals = state
        .store
        .record_signal(&opportunity_id, request.signal_type, count, now_ns())?;
    let points = signals.points();

    Ok(Json(SignalLogResponse {
        opportunity_id,
        points,
        points_needed: crate::config::PASS_THRESHOLD_POINTS.saturating_sub(points),
        signals,
    }))
}

async fn record_ad_result(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
    Json(request): Json<AdResultRequest>,
) -> Result<Json<AdResultResponse>, AppError> {
    if request.signups > request.clicks {
        return Err(AppError::InvalidInput(format!(
            "{} signups reported for {} clicks",
            request.signups, request.clicks
        )));
    }

    let ads = state
        .store
        .record_ad_result(&opportunity_id, request.clicks, request.signups, now_ns())?;

    Ok(Json(AdResultResponse {
        opportunity_id,
        clicks: ads.clicks,
        signups: ads.signups,
        cvr: ads.cvr(),
    }))
}

async fn force_validation(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
    Json(request): Json<ForceRequest>,
) -> Result<Json<ValidationStatusResponse>, AppError> {
    state
        .store
        .force_status(&opportunity_id, request.target, now_ns())?;
    let session = state
        .store
        .get(&opportunity_id)
        .ok_or_else(|| AppError::NotFound(opportunity_id.clone()))?;
    Ok(Json(ValidationStatusResponse::from_session(&session)))
}

async fn extend_validation(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
) -> Result<Json<ExtendResponse>, AppError> {
    let deadline_ns = state.store.extend_deadline(&opportunity_id)?;
    Ok(Json(ExtendResponse { opportunity_id, deadline_ns }))
}

/// Durable session listing from SQLite — survives restarts, unlike the
/// in-memory store view.
async fn get_sessions(
    State(state): State<ApiState>,
    Query(params): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionRowResponse>>, AppError> {
    let limit = params.limit.unwrap_or(100);

    let rows = sqlx::query_as::<_, ValidationSessionRow>(
        r#"
        SELECT opportunity_id, method, opened_at, deadline,
               email_signups, dms, buy_comments, detail_questions, shares, upvote_units,
               ad_clicks, ad_signups, status, closed_at, retry_eligible_after
        FROM validation_sessions
        ORDER BY opened_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let sessions: Vec<SessionRowResponse> = rows
        .into_iter()
        .map(SessionRowResponse::from)
        .filter(|s| params.status.as_ref().map_or(true, |want| &s.status == want))
        .collect();

    Ok(Json(sessions))
}

/// Append-only audit trail of recorded signals for one opportunity.
async fn get_signal_log(
    State(state): State<ApiState>,
    Path(opportunity_id): Path<String>,
    Query(params): Query<SignalLogQuery>,
) -> Result<Json<Vec<SignalLogEntryResponse>>, AppError> {
    let limit = params.limit.unwrap_or(100);

    let rows = sqlx::query_as::<_, SignalLogRow>(
        r#"
        SELECT id, opportunity_id, signal_type, count, logged_at
        FROM signal_log
        WHERE opportunity_id = ?
        ORDER BY logged_at DESC
        LIMIT ?
        "#,
    )
    .bind(&opportunity_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let entries = rows
        .into_iter()
        .map(|r| SignalLogEntryResponse {
            id: r.id,
            opportunity_id: r.opportunity_id,
            signal_type: r.signal_type,
            count: r.count,
            logged_at: r.logged_at,
        })
        .collect();

    Ok(Json(entries))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions_total: state.store.session_count(),
        sessions_running: state.store.running_count(),
        events_written: state.health.events_written(),
        db_errors: state.health.db_errors(),
        last_sweep_at_ns: state.health.last_sweep_at_ns(),
    })
}

async fn fetch_opportunity(
    pool: &sqlx::SqlitePool,
    opportunity_id: &str,
) -> Result<OpportunityRow, AppError> {
    sqlx::query_as::<_, OpportunityRow>(
        r#"
        SELECT id, topic, reddit_mentions, twitter_mentions, trend_score, cpc,
               competitor_count, competitor_strength,
               demand_score, intent_score, competition_penalty,
               opportunity_score, confidence, scored_at
        FROM opportunities
        WHERE id = ?
        "#,
    )
    .bind(opportunity_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))
}
