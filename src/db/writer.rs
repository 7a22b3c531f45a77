use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::types::{ScoredOpportunity, TrackerEvent};

/// Receives TrackerEvents from the store and API and persists them to
/// SQLite. Runs as a dedicated background task so the ingestion path never
/// waits on the database.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    event_rx: mpsc::Receiver<TrackerEvent>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(
        pool: sqlx::SqlitePool,
        event_rx: mpsc::Receiver<TrackerEvent>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pool, event_rx, health }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            match self.write(event).await {
                Ok(()) => self.health.inc_events_written(),
                Err(e) => {
                    self.health.inc_db_errors();
                    error!("DB write error: {e}");
                }
            }
        }
    }

    async fn write(&self, event: TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::Scored(scored) => self.write_scored(&scored).await,
            TrackerEvent::SessionOpened {
                opportunity_id,
                method,
                opened_at_ns,
                deadline_ns,
            } => {
                // Reopening after a terminal session resets the row wholesale.
                sqlx::query(
                    r#"
                    INSERT INTO validation_sessions (opportunity_id, method, opened_at, deadline)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(opportunity_id) DO UPDATE SET
                        method = excluded.method,
                        opened_at = excluded.opened_at,
                        deadline = excluded.deadline,
                        email_signups = 0,
                        dms = 0,
                        buy_comments = 0,
                        detail_questions = 0,
                        shares = 0,
                        upvote_units = 0,
                        ad_clicks = 0,
                        ad_signups = 0,
                        status = 'running',
                        closed_at = NULL,
                        retry_eligible_after = NULL
                    "#,
                )
                .bind(&opportunity_id)
                .bind(method.to_string())
                .bind(opened_at_ns)
                .bind(deadline_ns)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            TrackerEvent::SignalLogged {
                opportunity_id,
                signal_type,
                count,
                counts,
                logged_at_ns,
            } => {
                sqlx::query(
                    "INSERT INTO signal_log (opportunity_id, signal_type, count, logged_at)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&opportunity_id)
                .bind(signal_type.to_string())
                .bind(i64::from(count))
                .bind(logged_at_ns)
                .execute(&self.pool)
                .await?;

                // Mirror the in-memory tally snapshot; events arrive in order
                // on this channel, so the last snapshot always wins correctly.
                sqlx::query(
                    r#"
                    UPDATE validation_sessions SET
                        email_signups = ?, dms = ?, buy_comments = ?,
                        detail_questions = ?, shares = ?, upvote_units = ?
                    WHERE opportunity_id = ?
                    "#,
                )
                .bind(i64::from(counts.email_signups))
                .bind(i64::from(counts.dms))
                .bind(i64::from(counts.buy_comments))
                .bind(i64::from(counts.detail_questions))
                .bind(i64::from(counts.shares))
                .bind(i64::from(counts.upvote_units))
                .bind(&opportunity_id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            TrackerEvent::AdResultLogged { opportunity_id, ads } => {
                sqlx::query(
                    "UPDATE validation_sessions SET ad_clicks = ?, ad_signups = ?
                     WHERE opportunity_id = ?",
                )
                .bind(i64::from(ads.clicks))
                .bind(i64::from(ads.signups))
                .bind(&opportunity_id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            TrackerEvent::SessionClosed {
                opportunity_id,
                status,
                retry_eligible_after_ns,
                closed_at_ns,
                forced: _,
            } => {
                // Persistent compare-and-set: only a running row may close.
                let result = sqlx::query(
                    r#"
                    UPDATE validation_sessions SET
                        status = ?, closed_at = ?, retry_eligible_after = ?
                    WHERE opportunity_id = ? AND status = 'running'
                    "#,
                )
                .bind(status.to_string())
                .bind(closed_at_ns)
                .bind(retry_eligible_after_ns)
                .bind(&opportunity_id)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    warn!(
                        opportunity_id = %opportunity_id,
                        "session close skipped: row already terminal"
                    );
                }
                Ok(())
            }
            TrackerEvent::DeadlineExtended { opportunity_id, deadline_ns } => {
                sqlx::query(
                    "UPDATE validation_sessions SET deadline = ?
                     WHERE opportunity_id = ? AND status = 'running'",
                )
                .bind(deadline_ns)
                .bind(&opportunity_id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    async fn write_scored(&self, scored: &ScoredOpportunity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, topic, reddit_mentions, twitter_mentions, trend_score, cpc,
                competitor_count, competitor_strength,
                demand_score, intent_score, competition_penalty,
                opportunity_score, confidence, scored_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                topic = excluded.topic,
                reddit_mentions = excluded.reddit_mentions,
                twitter_mentions = excluded.twitter_mentions,
                trend_score = excluded.trend_score,
                cpc = excluded.cpc,
                competitor_count = excluded.competitor_count,
                competitor_strength = excluded.competitor_strength,
                demand_score = excluded.demand_score,
                intent_score = excluded.intent_score,
                competition_penalty = excluded.competition_penalty,
                opportunity_score = excluded.opportunity_score,
                confidence = excluded.confidence,
                scored_at = excluded.scored_at
            "#,
        )
        .bind(&scored.raw.id)
        .bind(&scored.raw.topic)
        .bind(i64::from(scored.raw.reddit_mentions))
        .bind(i64::from(scored.raw.twitter_mentions))
        .bind(scored.raw.trend_score)
        .bind(scored.raw.cpc)
        .bind(i64::from(scored.raw.competitor_count))
        .bind(scored.raw.competitor_strength.to_string())
        .bind(scored.demand_score)
        .bind(scored.intent_score)
        .bind(scored.competition_penalty)
        .bind(scored.opportunity_score)
        .bind(scored.confidence.to_string())
        .bind(scored.scored_at_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
