/// Database row types matching migrations/0001_init.sql.
/// Used by sqlx for typed fetches in the API layer.

#[derive(Debug, sqlx::FromRow)]
pub struct OpportunityRow {
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
    pub scored_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ValidationSessionRow {
    pub opportunity_id: String,
    pub method: String,
    pub opened_at: i64,
    pub deadline: i64,
    pub email_signups: i64,
    pub dms: i64,
    pub buy_comments: i64,
    pub detail_questions: i64,
    pub shares: i64,
    pub upvote_units: i64,
    pub ad_clicks: i64,
    pub ad_signups: i64,
    pub status: String,
    pub closed_at: Option<i64>,
    pub retry_eligible_after: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SignalLogRow {
    pub id: i64,
    pub opportunity_id: String,
    pub signal_type: String,
    pub count: i64,
    pub logged_at: i64,
}
