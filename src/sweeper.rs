use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::api::health::HealthState;
use crate::state::SessionStore;
use crate::types::now_ns;

/// Background task that re-evaluates running sessions on an interval so
/// deadline expiries commit even when no signal traffic arrives. Transitions
/// go through the store's compare-and-set path, so racing an on-read
/// evaluation is harmless.
pub struct DeadlineSweeper {
    store: Arc<SessionStore>,
    health: Arc<HealthState>,
    interval_secs: u64,
}

impl DeadlineSweeper {
    pub fn new(store: Arc<SessionStore>, health: Arc<HealthState>, interval_secs: u64) -> Self {
        Self { store, health, interval_secs }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            self.sweep();
        }
    }

    fn sweep(&self) {
        let now = now_ns();
        let ids = self.store.running_session_ids();
        let mut transitioned = 0usize;

        for id in &ids {
            match self.store.commit_evaluation(id, now) {
                Ok(result) if result.is_terminal() => transitioned += 1,
                Ok(_) => {}
                Err(e) => error!("Sweep evaluation failed for {id}: {e}"),
            }
        }

        self.health.set_last_sweep_at_ns(now as u64);
        info!(
            swept = ids.len(),
            transitioned,
            "Sweeper evaluated running sessions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NS_PER_DAY;
    use crate::types::{SessionStatus, SignalType, TrackerEvent, ValidationMethod};
    use tokio::sync::mpsc;

    const T0: i64 = 1_700_000_000_000_000_000;

    #[test]
    fn sweep_commits_expired_sessions_only() {
        let (tx, _rx) = mpsc::channel::<TrackerEvent>(64);
        let store = SessionStore::new(tx);
        store.open_session("expired", ValidationMethod::Organic, T0 - 8 * NS_PER_DAY).unwrap();
        store.open_session("fresh", ValidationMethod::Organic, now_ns()).unwrap();
        store
            .record_signal("fresh", SignalType::EmailSignup, 1, now_ns())
            .unwrap();

        let health = Arc::new(HealthState::new());
        let sweeper = DeadlineSweeper::new(Arc::clone(&store), Arc::clone(&health), 60);
        sweeper.sweep();

        assert_eq!(store.get("expired").unwrap().status, SessionStatus::Failed);
        assert_eq!(store.get("fresh").unwrap().status, SessionStatus::Running);
        assert!(health.last_sweep_at_ns() > 0);
    }
}
