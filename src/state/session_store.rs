use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::types::{
    AdStats, EvaluationResult, SessionStatus, SignalCounts, SignalType, TrackerEvent,
    ValidationMethod,
};
use crate::validation::ValidationSession;

/// In-memory authority for validation sessions, one per opportunity.
///
/// Per-opportunity mutation is serialized by the map's shard locks, so
/// concurrent signal writes for the same opportunity cannot lose increments;
/// different opportunities never contend. Every mutation is mirrored to the
/// DB writer through the event channel.
pub struct SessionStore {
    /// opportunity_id → session
    sessions: DashMap<String, ValidationSession>,
    event_tx: mpsc::Sender<TrackerEvent>,
}

impl SessionStore {
    pub fn new(event_tx: mpsc::Sender<TrackerEvent>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            event_tx,
        })
    }

    /// Open a validation window for an opportunity. At most one running
    /// session per opportunity; reopening after a terminal session is the
    /// retry policy's call, not ours, so it is allowed here.
    pub fn open_session(
        &self,
        opportunity_id: &str,
        method: ValidationMethod,
        now_ns: i64,
    ) -> Result<ValidationSession> {
        let session = match self.sessions.entry(opportunity_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_running() {
                    return Err(AppError::AlreadyOpen(opportunity_id.to_string()));
                }
                let session = ValidationSession::open(opportunity_id, method, now_ns);
                occupied.insert(session.clone());
                session
            }
            Entry::Vacant(vacant) => {
                let session = ValidationSession::open(opportunity_id, method, now_ns);
                vacant.insert(session.clone());
                session
            }
        };

        info!(
            opportunity_id,
            method = %method,
            deadline_ns = session.deadline_ns,
            "validation session opened"
        );
        self.emit(TrackerEvent::SessionOpened {
            opportunity_id: opportunity_id.to_string(),
            method,
            opened_at_ns: session.opened_at_ns,
            deadline_ns: session.deadline_ns,
        });
        Ok(session)
    }

    /// Append a signal to a running organic session.
    ///
    /// A signal arriving after the deadline settles the due transition first
    /// and is then rejected — the window's verdict is decided by what was in
    /// the ledger when the clock ran out, not by stragglers.
    pub fn record_signal(
        &self,
        opportunity_id: &str,
        signal_type: SignalType,
        count: u32,
        now_ns: i64,
    ) -> Result<SignalCounts> {
        let mut entry = self
            .sessions
            .get_mut(opportunity_id)
            .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))?;
        let session = entry.value_mut();

        if session.is_running() && now_ns >= session.deadline_ns {
            let result = session.evaluate(now_ns);
            if session.commit(&result, now_ns) {
                self.emit_closed(session, false, now_ns);
            }
        }

        session.record_signal(signal_type, count)?;
        let counts = session.signals;
        self.emit(TrackerEvent::SignalLogged {
            opportunity_id: opportunity_id.to_string(),
            signal_type,
            count,
            counts,
            logged_at_ns: now_ns,
        });
        Ok(counts)
    }

    /// Fold an ad report into a running paid session.
    pub fn record_ad_result(
        &self,
        opportunity_id: &str,
        clicks: u32,
        signups: u32,
        now_ns: i64,
    ) -> Result<AdStats> {
        let mut entry = self
            .sessions
            .get_mut(opportunity_id)
            .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))?;
        let session = entry.value_mut();

        if session.is_running() && now_ns >= session.deadline_ns {
            let result = session.evaluate(now_ns);
            if session.commit(&result, now_ns) {
                self.emit_closed(session, false, now_ns);
            }
        }

        session.record_ad_result(clicks, signups)?;
        let ads = session.ads;
        self.emit(TrackerEvent::AdResultLogged {
            opportunity_id: opportunity_id.to_string(),
            ads,
        });
        Ok(ads)
    }

    /// Evaluate a session and persist the transition if one is due.
    /// Compare-and-set on `running`: the sweeper and the on-read path may
    /// race here, but only the first writer's transition is honored and both
    /// observe the same terminal result.
    pub fn commit_evaluation(&self, opportunity_id: &str, now_ns: i64) -> Result<EvaluationResult> {
        let mut entry = self
            .sessions
            .get_mut(opportunity_id)
            .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))?;
        let session = entry.value_mut();

        let result = session.evaluate(now_ns);
        if session.commit(&result, now_ns) {
            self.emit_closed(session, false, now_ns);
        }
        Ok(result)
    }

    /// Forced terminal transition bypassing the point formula. Trusted
    /// callers only — the review dashboard's override buttons.
    pub fn force_status(
        &self,
        opportunity_id: &str,
        target: SessionStatus,
        now_ns: i64,
    ) -> Result<EvaluationResult> {
        let mut entry = self
            .sessions
            .get_mut(opportunity_id)
            .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))?;
        let session = entry.value_mut();

        let result = session.force(target, now_ns)?;
        self.emit_closed(session, true, now_ns);
        Ok(result)
    }

    /// Push a running session's deadline out one more window.
    pub fn extend_deadline(&self, opportunity_id: &str) -> Result<i64> {
        let mut entry = self
            .sessions
            .get_mut(opportunity_id)
            .ok_or_else(|| AppError::NotFound(opportunity_id.to_string()))?;
        let session = entry.value_mut();

        let deadline_ns = session.extend_deadline()?;
        info!(opportunity_id, deadline_ns, "validation deadline extended");
        self.emit(TrackerEvent::DeadlineExtended {
            opportunity_id: opportunity_id.to_string(),
            deadline_ns,
        });
        Ok(deadline_ns)
    }

    pub fn get(&self, opportunity_id: &str) -> Option<ValidationSession> {
        self.sessions.get(opportunity_id).map(|s| s.clone())
    }

    /// Opportunity ids with a running session — the sweeper's worklist.
    pub fn running_session_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn running_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_running()).count()
    }

    fn emit_closed(&self, session: &ValidationSession, forced: bool, now_ns: i64) {
        info!(
            opportunity_id = %session.opportunity_id,
            status = %session.status,
            forced,
            "validation session closed"
        );
        self.emit(TrackerEvent::SessionClosed {
            opportunity_id: session.opportunity_id.clone(),
            status: session.status,
            retry_eligible_after_ns: session.retry_eligible_after_ns,
            closed_at_ns: now_ns,
            forced,
        });
    }

    fn emit(&self, event: TrackerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("event channel full, dropping tracker event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NS_PER_DAY;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn store() -> (Arc<SessionStore>, mpsc::Receiver<TrackerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (SessionStore::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn second_open_for_running_session_is_rejected() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        let err = store.open_session("opp1", ValidationMethod::Organic, T0);
        assert!(matches!(err, Err(AppError::AlreadyOpen(_))));
    }

    #[test]
    fn reopen_is_allowed_after_terminal() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        store.force_status("opp1", SessionStatus::Failed, T0 + NS_PER_DAY).unwrap();

        let session = store
            .open_session("opp1", ValidationMethod::Paid, T0 + 2 * NS_PER_DAY)
            .unwrap();
        assert!(session.is_running());
        assert_eq!(session.method, ValidationMethod::Paid);
    }

    #[test]
    fn sessions_are_independent_across_opportunities() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        store.open_session("opp2", ValidationMethod::Organic, T0).unwrap();
        store.force_status("opp1", SessionStatus::Passed, T0).unwrap();

        assert_eq!(store.running_session_ids(), vec!["opp2".to_string()]);
        assert_eq!(store.session_count(), 2);
        assert_eq!(store.running_count(), 1);
    }

    #[test]
    fn late_signal_settles_the_session_then_is_rejected() {
        let (store, mut rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        store
            .record_signal("opp1", SignalType::EmailSignup, 2, T0 + NS_PER_DAY)
            .unwrap();

        // 8 days in: the window expired with 6 points on the ledger.
        let late = store.record_signal("opp1", SignalType::Dm, 5, T0 + 8 * NS_PER_DAY);
        assert!(matches!(late, Err(AppError::InvalidState(_))));

        let session = store.get("opp1").unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        // The rejected write must not have touched the ledger.
        assert_eq!(session.signals.dms, 0);

        let closed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::SessionClosed { .. }))
            .collect();
        assert_eq!(closed.len(), 1);
    }

    #[test]
    fn late_signal_on_a_cleared_ledger_settles_as_passed() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        store.record_signal("opp1", SignalType::Dm, 4, T0 + NS_PER_DAY).unwrap();

        // Past the deadline with 16 points already banked: the session passes
        // first, then the straggler is rejected.
        let late = store.record_signal("opp1", SignalType::Share, 1, T0 + 8 * NS_PER_DAY);
        assert!(matches!(late, Err(AppError::InvalidState(_))));
        assert_eq!(store.get("opp1").unwrap().status, SessionStatus::Passed);
    }

    #[test]
    fn redundant_evaluations_agree_and_emit_once() {
        let (store, mut rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        store.record_signal("opp1", SignalType::Dm, 4, T0 + NS_PER_DAY).unwrap();

        let first = store.commit_evaluation("opp1", T0 + NS_PER_DAY).unwrap();
        let second = store.commit_evaluation("opp1", T0 + 2 * NS_PER_DAY).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status(), SessionStatus::Passed);

        let closed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::SessionClosed { .. }))
            .collect();
        assert_eq!(closed.len(), 1);
    }

    #[test]
    fn evaluation_before_deadline_keeps_running() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Organic, T0).unwrap();
        let result = store.commit_evaluation("opp1", T0 + NS_PER_DAY).unwrap();
        assert_eq!(result.status(), SessionStatus::Running);
        assert!(store.get("opp1").unwrap().is_running());
    }

    #[test]
    fn unknown_opportunity_is_not_found() {
        let (store, _rx) = store();
        assert!(matches!(
            store.record_signal("ghost", SignalType::Dm, 1, T0),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            store.commit_evaluation("ghost", T0),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn paid_session_accumulates_ad_results() {
        let (store, _rx) = store();
        store.open_session("opp1", ValidationMethod::Paid, T0).unwrap();
        store.record_ad_result("opp1", 30, 1, T0 + NS_PER_DAY).unwrap();
        let ads = store.record_ad_result("opp1", 20, 1, T0 + 2 * NS_PER_DAY).unwrap();
        assert_eq!(ads, AdStats { clicks: 50, signups: 2 });

        let result = store.commit_evaluation("opp1", T0 + 3 * NS_PER_DAY).unwrap();
        assert_eq!(result.status(), SessionStatus::Passed);
    }
}
