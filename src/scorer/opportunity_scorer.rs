use tracing::debug;

use crate::config::scoring::*;
use crate::scorer::strategy::{CpcCurve, DecayCurve, LinearDecay, LinearRamp};
use crate::types::{
    now_ns, CompetitorStrength, Confidence, RawOpportunity, ScoredOpportunity,
};

/// Maps raw discovery signal counts to a bounded 0-100 priority score and a
/// confidence label. Pure — no I/O, no hidden state; callers validate input
/// at the boundary before scoring.
pub struct OpportunityScorer {
    decay: Box<dyn DecayCurve>,
    cpc_curve: Box<dyn CpcCurve>,
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self {
            decay: Box::new(LinearDecay::default()),
            cpc_curve: Box::new(LinearRamp::default()),
        }
    }
}

impl OpportunityScorer {
    pub fn with_strategies(
        decay: Box<dyn DecayCurve>,
        cpc_curve: Box<dyn CpcCurve>,
    ) -> Self {
        Self { decay, cpc_curve }
    }

    pub fn score(&self, raw: &RawOpportunity) -> ScoredOpportunity {
        let demand_score = self.demand_score(raw);
        let intent_score = self.intent_score(raw);
        let competition_penalty = competition_penalty(raw.competitor_strength);

        // Intermediate sums can go negative; the total is clamped, not wrapped.
        let opportunity_score =
            (demand_score + intent_score + competition_penalty).clamp(0.0, 100.0);
        let confidence = confidence(raw);

        debug!(
            id = %raw.id,
            demand = demand_score,
            intent = intent_score,
            penalty = competition_penalty,
            total = opportunity_score,
            "scored opportunity"
        );

        ScoredOpportunity {
            raw: raw.clone(),
            demand_score,
            intent_score,
            competition_penalty,
            opportunity_score,
            confidence,
            scored_at_ns: now_ns(),
        }
    }

    /// Demand sub-score (0-50): reddit (capped 30, decay-weighted) +
    /// twitter (capped 10) + trend (capped 10), sum clamped.
    fn demand_score(&self, raw: &RawOpportunity) -> f64 {
        let reddit = (self.weighted_reddit_mentions(raw) * REDDIT_POINTS_PER_MENTION)
            .min(REDDIT_CAP);
        let twitter =
            (f64::from(raw.twitter_mentions) * TWITTER_POINTS_PER_MENTION).min(TWITTER_CAP);
        let trend = (raw.trend_score * TREND_CAP).min(TREND_CAP);

        (reddit + twitter + trend).clamp(0.0, DEMAND_CAP)
    }

    /// Effective reddit mention count after freshness decay. Mentions without
    /// a timestamp carry full weight.
    fn weighted_reddit_mentions(&self, raw: &RawOpportunity) -> f64 {
        match &raw.reddit_mention_ages_days {
            Some(ages) => {
                let timestamped: f64 = ages.iter().map(|&age| self.decay.weight(age)).sum();
                let untimestamped = (raw.reddit_mentions as usize).saturating_sub(ages.len());
                timestamped + untimestamped as f64
            }
            None => f64::from(raw.reddit_mentions),
        }
    }

    /// Intent sub-score (0-40): CPC ramp (capped 20) + competitor-sales
    /// signal (capped 20, weak markets only), sum clamped.
    fn intent_score(&self, raw: &RawOpportunity) -> f64 {
        let cpc = self.cpc_curve.points(raw.cpc).min(CPC_CAP);
        let competitor_sales = match raw.competitor_strength {
            // Existing, non-dominant competitors are evidence people pay.
            CompetitorStrength::Weak => {
                (f64::from(raw.competitor_count) * COMPETITOR_POINTS_EACH).min(COMPETITOR_CAP)
            }
            CompetitorStrength::None | CompetitorStrength::Strong => 0.0,
        };

        (cpc + competitor_sales).clamp(0.0, INTENT_CAP)
    }
}

/// Competition penalty (-20 to 0) selected by market saturation.
pub fn competition_penalty(strength: CompetitorStrength) -> f64 {
    match strength {
        CompetitorStrength::Strong => -20.0,
        CompetitorStrength::Weak => -5.0,
        // No competitors at all is its own risk: nobody has proven people pay.
        CompetitorStrength::None => -10.0,
    }
}

/// Confidence is monotone in the number of demand sources that returned
/// non-trivial data: all three -> high, two -> medium, fewer -> low.
fn confidence(raw: &RawOpportunity) -> Confidence {
    let sources = [
        raw.reddit_mentions > 0,
        raw.twitter_mentions > 0,
        raw.trend_score > 0.0,
    ]
    .iter()
    .filter(|&&present| present)
    .count();

    match sources {
        3 => Confidence::High,
        2 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::strategy::NoDecay;

    fn raw(reddit: u32, twitter: u32, trend: f64, cpc: f64) -> RawOpportunity {
        RawOpportunity {
            id: "opp1".to_string(),
            topic: "test".to_string(),
            reddit_mentions: reddit,
            reddit_mention_ages_days: None,
            twitter_mentions: twitter,
            trend_score: trend,
            cpc,
            competitor_count: 0,
            competitor_strength: CompetitorStrength::None,
        }
    }

    #[test]
    fn score_is_always_within_bounds() {
        let scorer = OpportunityScorer::default();
        let cases = [
            raw(0, 0, 0.0, 0.0),
            raw(1, 0, 0.0, 0.1),
            raw(1000, 1000, 1.0, 50.0),
            {
                let mut r = raw(1000, 1000, 1.0, 50.0);
                r.competitor_count = 100;
                r.competitor_strength = CompetitorStrength::Weak;
                r
            },
            {
                let mut r = raw(0, 0, 0.0, 0.0);
                r.competitor_strength = CompetitorStrength::Strong;
                r
            },
        ];
        for case in &cases {
            let scored = scorer.score(case);
            assert!(
                (0.0..=100.0).contains(&scored.opportunity_score),
                "score {} out of range for {case:?}",
                scored.opportunity_score
            );
            assert!((0.0..=50.0).contains(&scored.demand_score));
            assert!((0.0..=40.0).contains(&scored.intent_score));
            assert!((-20.0..=0.0).contains(&scored.competition_penalty));
        }
    }

    #[test]
    fn negative_raw_sum_clamps_to_zero() {
        let scorer = OpportunityScorer::default();
        let mut r = raw(0, 0, 0.0, 0.0);
        r.competitor_strength = CompetitorStrength::Strong;
        let scored = scorer.score(&r);
        // demand 0 + intent 0 - 20 would be negative
        assert_eq!(scored.opportunity_score, 0.0);
    }

    #[test]
    fn score_is_monotone_in_each_signal() {
        let scorer = OpportunityScorer::default();
        let base = raw(5, 5, 0.3, 1.0);
        let base_score = scorer.score(&base).opportunity_score;

        let mut more_reddit = base.clone();
        more_reddit.reddit_mentions = 15;
        assert!(scorer.score(&more_reddit).opportunity_score >= base_score);

        let mut more_twitter = base.clone();
        more_twitter.twitter_mentions = 15;
        assert!(scorer.score(&more_twitter).opportunity_score >= base_score);

        let mut more_trend = base.clone();
        more_trend.trend_score = 0.9;
        assert!(scorer.score(&more_trend).opportunity_score >= base_score);

        let mut more_cpc = base.clone();
        more_cpc.cpc = 4.0;
        assert!(scorer.score(&more_cpc).opportunity_score >= base_score);
    }

    #[test]
    fn strong_competition_never_beats_weak_or_none() {
        let scorer = OpportunityScorer::default();
        let mut r = raw(20, 10, 0.8, 2.5);
        r.competitor_count = 3;

        r.competitor_strength = CompetitorStrength::Strong;
        let strong = scorer.score(&r).opportunity_score;
        r.competitor_strength = CompetitorStrength::Weak;
        let weak = scorer.score(&r).opportunity_score;
        r.competitor_strength = CompetitorStrength::None;
        let none = scorer.score(&r).opportunity_score;

        assert!(strong <= weak);
        assert!(strong <= none);
    }

    #[test]
    fn worked_scenario_lands_in_good_band() {
        // reddit=47, twitter=23, trend=0.5, cpc=3.20, 3 weak competitors:
        // demand 30+10+5=45, intent 20+15=35, penalty -5 -> 75.
        let scorer = OpportunityScorer::default();
        let mut r = raw(47, 23, 0.5, 3.20);
        r.competitor_count = 3;
        r.competitor_strength = CompetitorStrength::Weak;
        let scored = scorer.score(&r);
        assert!((scored.opportunity_score - 75.0).abs() < 1e-9);
        assert!((60.0..=78.0).contains(&scored.opportunity_score));
        assert_eq!(scored.confidence, Confidence::High);
    }

    #[test]
    fn confidence_counts_contributing_sources() {
        let scorer = OpportunityScorer::default();
        assert_eq!(scorer.score(&raw(5, 5, 0.4, 1.0)).confidence, Confidence::High);
        assert_eq!(scorer.score(&raw(5, 5, 0.0, 1.0)).confidence, Confidence::Medium);
        assert_eq!(scorer.score(&raw(5, 0, 0.0, 1.0)).confidence, Confidence::Low);
        assert_eq!(scorer.score(&raw(0, 0, 0.0, 1.0)).confidence, Confidence::Low);
    }

    #[test]
    fn stale_mentions_score_below_fresh_ones() {
        let scorer = OpportunityScorer::default();
        let mut fresh = raw(10, 0, 0.0, 0.0);
        fresh.reddit_mention_ages_days = Some(vec![0.0; 10]);
        let mut stale = raw(10, 0, 0.0, 0.0);
        stale.reddit_mention_ages_days = Some(vec![90.0; 10]);

        let fresh_score = scorer.score(&fresh).opportunity_score;
        let stale_score = scorer.score(&stale).opportunity_score;
        assert!(stale_score < fresh_score);
    }

    #[test]
    fn missing_ages_carry_full_weight() {
        // 10 mentions, 4 timestamped at age zero: same as no timestamps at all.
        let scorer = OpportunityScorer::default();
        let mut partial = raw(10, 0, 0.0, 0.0);
        partial.reddit_mention_ages_days = Some(vec![0.0; 4]);
        let untimestamped = raw(10, 0, 0.0, 0.0);

        assert_eq!(
            scorer.score(&partial).opportunity_score,
            scorer.score(&untimestamped).opportunity_score
        );
    }

    #[test]
    fn decay_strategy_is_swappable() {
        let no_decay = OpportunityScorer::with_strategies(
            Box::new(NoDecay),
            Box::new(LinearRamp::default()),
        );
        let mut r = raw(10, 0, 0.0, 0.0);
        r.reddit_mention_ages_days = Some(vec![365.0; 10]);
        // Under NoDecay ancient mentions still count in full.
        let scored = no_decay.score(&r);
        assert_eq!(scored.demand_score, 15.0);
    }
}
