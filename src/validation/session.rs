use crate::config::{NS_PER_DAY, RETRY_BACKOFF_DAYS, VALIDATION_WINDOW_DAYS};
use crate::error::{AppError, Result};
use crate::types::{
    AdStats, EvaluationResult, SessionStatus, SignalCounts, SignalType, ValidationMethod,
    ValidationOutcome,
};

/// One opportunity's validation window: an append-only signal ledger plus a
/// single status transition. `running -> passed` and `running -> failed` are
/// the only transitions; both are terminal.
///
/// The struct itself is pure state — persistence and cross-task coordination
/// live in the session store.
#[derive(Debug, Clone)]
pub struct ValidationSession {
    pub opportunity_id: String,
    pub method: ValidationMethod,
    pub opened_at_ns: i64,
    pub deadline_ns: i64,
    pub signals: SignalCounts,
    pub ads: AdStats,
    pub status: SessionStatus,
    /// Outcome captured at the moment the session left `running`. Terminal
    /// evaluations return this, never a re-derivation.
    closed_outcome: Option<ValidationOutcome>,
    pub closed_at_ns: Option<i64>,
    pub retry_eligible_after_ns: Option<i64>,
}

impl ValidationSession {
    pub fn open(opportunity_id: &str, method: ValidationMethod, now_ns: i64) -> Self {
        Self {
            opportunity_id: opportunity_id.to_string(),
            method,
            opened_at_ns: now_ns,
            deadline_ns: now_ns + VALIDATION_WINDOW_DAYS * NS_PER_DAY,
            signals: SignalCounts::default(),
            ads: AdStats::default(),
            status: SessionStatus::Running,
            closed_outcome: None,
            closed_at_ns: None,
            retry_eligible_after_ns: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// The metric as it stands right now.
    pub fn current_outcome(&self) -> ValidationOutcome {
        match self.method {
            ValidationMethod::Organic => ValidationOutcome::Organic {
                points: self.signals.points(),
            },
            ValidationMethod::Paid => ValidationOutcome::Paid {
                cvr: self.ads.cvr(),
                signups: self.ads.signups,
            },
        }
    }

    /// Append a signal to the organic ledger. Rejected once the session is
    /// terminal and on paid sessions, whose ledger is the ad results.
    pub fn record_signal(&mut self, signal_type: SignalType, count: u32) -> Result<()> {
        if !self.is_running() {
            return Err(AppError::InvalidState(format!(
                "session for {} is {}, no further signals accepted",
                self.opportunity_id, self.status
            )));
        }
        if self.method != ValidationMethod::Organic {
            return Err(AppError::InvalidState(format!(
                "session for {} is a paid session, organic signals do not apply",
                self.opportunity_id
            )));
        }
        self.signals.record(signal_type, count);
        Ok(())
    }

    /// Fold an ad-platform report into a paid session's tallies.
    pub fn record_ad_result(&mut self, clicks: u32, signups: u32) -> Result<()> {
        if !self.is_running() {
            return Err(AppError::InvalidState(format!(
                "session for {} is {}, no further ad results accepted",
                self.opportunity_id, self.status
            )));
        }
        if self.method != ValidationMethod::Paid {
            return Err(AppError::InvalidState(format!(
                "session for {} is an organic session, ad results do not apply",
                self.opportunity_id
            )));
        }
        self.ads.clicks += clicks;
        self.ads.signups += signups;
        Ok(())
    }

    /// Pure pass/fail evaluation against the clock. No side effects; the
    /// caller persists the transition (once) via `commit`.
    ///
    /// A passing metric wins at any time — a session may clear the bar before
    /// its window ends. The deadline only decides failure.
    pub fn evaluate(&self, now_ns: i64) -> EvaluationResult {
        match self.status {
            // Terminal sessions answer with their recorded outcome.
            SessionStatus::Passed => EvaluationResult::Passed {
                outcome: self.closed_outcome.unwrap_or_else(|| self.current_outcome()),
            },
            SessionStatus::Failed => EvaluationResult::Failed {
                outcome: self.closed_outcome.unwrap_or_else(|| self.current_outcome()),
                retry_eligible_after_ns: self.retry_eligible_after_ns.unwrap_or(0),
            },
            SessionStatus::Running => {
                let outcome = self.current_outcome();
                if outcome.passes() {
                    EvaluationResult::Passed { outcome }
                } else if now_ns >= self.deadline_ns {
                    EvaluationResult::Failed {
                        outcome,
                        retry_eligible_after_ns: now_ns + RETRY_BACKOFF_DAYS * NS_PER_DAY,
                    }
                } else {
                    EvaluationResult::Running { outcome }
                }
            }
        }
    }

    /// Apply an evaluated transition. Compare-and-set on `running`: returns
    /// true only for the writer that actually performed the transition, so a
    /// racing sweeper and on-write evaluation cannot flip a terminal state.
    pub fn commit(&mut self, result: &EvaluationResult, now_ns: i64) -> bool {
        if !self.is_running() {
            return false;
        }
        match result {
            EvaluationResult::Running { .. } => false,
            EvaluationResult::Passed { outcome } => {
                self.status = SessionStatus::Passed;
                self.closed_outcome = Some(*outcome);
                self.closed_at_ns = Some(now_ns);
                true
            }
            EvaluationResult::Failed {
                outcome,
                retry_eligible_after_ns,
            } => {
                self.status = SessionStatus::Failed;
                self.closed_outcome = Some(*outcome);
                self.closed_at_ns = Some(now_ns);
                self.retry_eligible_after_ns = Some(*retry_eligible_after_ns);
                true
            }
        }
    }

    /// Manual override ("Mark Validated" / "Mark Failed"): a forced terminal
    /// transition that bypasses the point formula. Running sessions only.
    pub fn force(&mut self, target: SessionStatus, now_ns: i64) -> Result<EvaluationResult> {
        if !self.is_running() {
            return Err(AppError::InvalidState(format!(
                "session for {} is already {}",
                self.opportunity_id, self.status
            )));
        }
        let outcome = self.current_outcome();
        let result = match target {
            SessionStatus::Passed => EvaluationResult::Passed { outcome },
            SessionStatus::Failed => EvaluationResult::Failed {
                outcome,
                retry_eligible_after_ns: now_ns + RETRY_BACKOFF_DAYS * NS_PER_DAY,
            },
            SessionStatus::Running => {
                return Err(AppError::InvalidState(
                    "cannot force a session back to running".to_string(),
                ))
            }
        };
        self.commit(&result, now_ns);
        Ok(result)
    }

    /// Manual override ("Extend 7 Days"): push the deadline out one more
    /// window. Running sessions only. Returns the new deadline.
    pub fn extend_deadline(&mut self) -> Result<i64> {
        if !self.is_running() {
            return Err(AppError::InvalidState(format!(
                "session for {} is {}, deadline cannot be extended",
                self.opportunity_id, self.status
            )));
        }
        self.deadline_ns += VALIDATION_WINDOW_DAYS * NS_PER_DAY;
        Ok(self.deadline_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NS_PER_DAY;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn organic() -> ValidationSession {
        ValidationSession::open("opp1", ValidationMethod::Organic, T0)
    }

    fn paid() -> ValidationSession {
        ValidationSession::open("opp1", ValidationMethod::Paid, T0)
    }

    #[test]
    fn opens_running_with_seven_day_deadline() {
        let session = organic();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.deadline_ns, T0 + 7 * NS_PER_DAY);
        assert_eq!(session.signals, SignalCounts::default());
    }

    #[test]
    fn five_signups_hit_the_threshold_exactly() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 5).unwrap();
        // 15 points: >= wins, not >
        let result = session.evaluate(T0 + NS_PER_DAY);
        assert_eq!(
            result,
            EvaluationResult::Passed { outcome: ValidationOutcome::Organic { points: 15 } }
        );
    }

    #[test]
    fn signups_plus_dms_pass() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 2).unwrap();
        session.record_signal(SignalType::Dm, 3).unwrap();
        // 6 + 12 = 18
        let result = session.evaluate(T0 + NS_PER_DAY);
        assert_eq!(result.status(), SessionStatus::Passed);
        assert_eq!(result.outcome(), ValidationOutcome::Organic { points: 18 });
    }

    #[test]
    fn dms_alone_can_pass_without_signups() {
        // Links blocked but intent clear: 4 DMs = 16 points.
        let mut session = organic();
        session.record_signal(SignalType::Dm, 4).unwrap();
        assert_eq!(session.evaluate(T0 + NS_PER_DAY).status(), SessionStatus::Passed);
    }

    #[test]
    fn two_signups_keep_running_before_deadline() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 2).unwrap();
        let result = session.evaluate(T0 + NS_PER_DAY);
        assert_eq!(
            result,
            EvaluationResult::Running { outcome: ValidationOutcome::Organic { points: 6 } }
        );
        assert_eq!(result.outcome().points_needed(), Some(9));
    }

    #[test]
    fn upvotes_alone_fall_short() {
        let mut session = organic();
        session.record_signal(SignalType::UpvoteUnit, 100).unwrap();
        let result = session.evaluate(T0 + NS_PER_DAY);
        assert_eq!(
            result,
            EvaluationResult::Running { outcome: ValidationOutcome::Organic { points: 4 } }
        );
    }

    #[test]
    fn passes_early_before_the_window_ends() {
        let mut session = organic();
        session.record_signal(SignalType::Dm, 4).unwrap();
        // One hour in — well before the deadline.
        let result = session.evaluate(T0 + 3_600 * 1_000_000_000);
        assert_eq!(result.status(), SessionStatus::Passed);
    }

    #[test]
    fn fails_at_deadline_with_retry_marker() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 2).unwrap();
        let at_deadline = session.deadline_ns;
        let result = session.evaluate(at_deadline);
        match result {
            EvaluationResult::Failed { retry_eligible_after_ns, .. } => {
                assert_eq!(retry_eligible_after_ns, at_deadline + 90 * NS_PER_DAY);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn deadline_outcome_depends_only_on_the_clock() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 2).unwrap();
        assert_eq!(
            session.evaluate(session.deadline_ns - 1).status(),
            SessionStatus::Running
        );
        assert_eq!(
            session.evaluate(session.deadline_ns).status(),
            SessionStatus::Failed
        );
    }

    #[test]
    fn terminal_evaluation_is_idempotent() {
        let mut session = organic();
        session.record_signal(SignalType::EmailSignup, 2).unwrap();
        let deadline = session.deadline_ns;
        let first = session.evaluate(deadline);
        assert!(session.commit(&first, deadline));

        // Later evaluations return the recorded result, whatever the clock says.
        assert_eq!(session.evaluate(deadline), first);
        assert_eq!(session.evaluate(deadline + 30 * NS_PER_DAY), first);
    }

    #[test]
    fn commit_honors_only_the_first_writer() {
        let mut session = organic();
        session.record_signal(SignalType::Dm, 4).unwrap();
        let passed = session.evaluate(T0 + NS_PER_DAY);
        let failed = EvaluationResult::Failed {
            outcome: ValidationOutcome::Organic { points: 16 },
            retry_eligible_after_ns: 0,
        };

        assert!(session.commit(&passed, T0 + NS_PER_DAY));
        // A racing writer must not flip passed -> failed.
        assert!(!session.commit(&failed, T0 + 2 * NS_PER_DAY));
        assert_eq!(session.status, SessionStatus::Passed);
    }

    #[test]
    fn no_signals_accepted_after_terminal() {
        let mut session = organic();
        session.record_signal(SignalType::Dm, 4).unwrap();
        let result = session.evaluate(T0 + NS_PER_DAY);
        session.commit(&result, T0 + NS_PER_DAY);

        let err = session.record_signal(SignalType::EmailSignup, 1);
        assert!(matches!(err, Err(AppError::InvalidState(_))));
    }

    #[test]
    fn organic_session_rejects_ad_results() {
        let mut session = organic();
        assert!(matches!(
            session.record_ad_result(100, 5),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn paid_session_passes_on_cvr_and_signups() {
        let mut session = paid();
        session.record_ad_result(50, 2).unwrap();
        // cvr 0.04, signups 2: both bars met
        assert_eq!(session.evaluate(T0 + NS_PER_DAY).status(), SessionStatus::Passed);
    }

    #[test]
    fn paid_session_needs_both_bars() {
        let mut session = paid();
        session.record_ad_result(100, 1).unwrap();
        // cvr 0.01, signups 1
        assert_eq!(session.evaluate(T0 + NS_PER_DAY).status(), SessionStatus::Running);
        assert_eq!(
            session.evaluate(session.deadline_ns).status(),
            SessionStatus::Failed
        );
    }

    #[test]
    fn force_passed_bypasses_the_point_formula() {
        let mut session = organic();
        let result = session.force(SessionStatus::Passed, T0 + NS_PER_DAY).unwrap();
        assert_eq!(result.status(), SessionStatus::Passed);
        assert_eq!(result.outcome(), ValidationOutcome::Organic { points: 0 });
        assert_eq!(session.status, SessionStatus::Passed);
    }

    #[test]
    fn force_failed_sets_retry_marker() {
        let mut session = organic();
        let now = T0 + NS_PER_DAY;
        let result = session.force(SessionStatus::Failed, now).unwrap();
        match result {
            EvaluationResult::Failed { retry_eligible_after_ns, .. } => {
                assert_eq!(retry_eligible_after_ns, now + 90 * NS_PER_DAY);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn force_rejects_terminal_and_running_targets() {
        let mut session = organic();
        assert!(matches!(
            session.force(SessionStatus::Running, T0),
            Err(AppError::InvalidState(_))
        ));
        session.force(SessionStatus::Passed, T0).unwrap();
        assert!(matches!(
            session.force(SessionStatus::Failed, T0),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn extend_pushes_deadline_one_window() {
        let mut session = organic();
        let new_deadline = session.extend_deadline().unwrap();
        assert_eq!(new_deadline, T0 + 14 * NS_PER_DAY);
        // A session that would have failed now keeps running.
        assert_eq!(
            session.evaluate(T0 + 10 * NS_PER_DAY).status(),
            SessionStatus::Running
        );
    }

    #[test]
    fn extend_rejects_terminal_sessions() {
        let mut session = organic();
        session.force(SessionStatus::Failed, T0).unwrap();
        assert!(matches!(session.extend_deadline(), Err(AppError::InvalidState(_))));
    }
}
