// Cancellation session - one flag and one tracked child process
//
// A session is owned by whoever starts downloads (one per UI window). The
// executor registers a kill switch for the process it is running; `cancel`
// sets the flag and fires the switch. Both live behind the same lock so a
// cancel can never slip between "flag checked" and "process registered".

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Handle the executor listens on to learn it must kill its child.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    notify: Arc<Notify>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the switch. A permit is stored if nobody is waiting yet.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Resolves once `trigger` has been called.
    pub async fn triggered(&self) {
        self.notify.notified().await;
    }

    fn same_as(&self, other: &KillSwitch) -> bool {
        Arc::ptr_eq(&self.notify, &other.notify)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    requested: bool,
    active: Option<KillSwitch>,
}

#[derive(Debug, Default)]
pub struct CancelSession {
    state: Mutex<SessionState>,
}

impl CancelSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A poisoned lock only means another worker panicked mid-update;
        // the two fields are still individually valid.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clears the flag at the start of a top-level download.
    pub fn reset(&self) {
        self.lock().requested = false;
    }

    pub fn is_requested(&self) -> bool {
        self.lock().requested
    }

    /// Idempotent. Terminates the registered process, if any.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.requested = true;
        if let Some(switch) = &state.active {
            tracing::info!("[cancel] terminating active process");
            switch.trigger();
        }
    }

    /// Tracks `switch` as the active process, replacing (not killing) the
    /// previous one. If cancellation is already requested the switch fires
    /// right away.
    pub fn register(self: &Arc<Self>, switch: KillSwitch) -> Registration {
        let mut state = self.lock();
        if state.active.is_some() {
            tracing::debug!("[cancel] releasing previously tracked process");
        }
        if state.requested {
            switch.trigger();
        }
        state.active = Some(switch.clone());
        Registration {
            session: Arc::clone(self),
            switch,
        }
    }

    fn release(&self, switch: &KillSwitch) {
        let mut state = self.lock();
        let owns_slot = state
            .active
            .as_ref()
            .is_some_and(|active| active.same_as(switch));
        if owns_slot {
            state.active = None;
        }
    }

    pub fn has_active_process(&self) -> bool {
        self.lock().active.is_some()
    }
}

/// Clears the slot on drop, unless a newer registration took it over.
#[derive(Debug)]
pub struct Registration {
    session: Arc<CancelSession>,
    switch: KillSwitch,
}

impl Registration {
    pub fn switch(&self) -> &KillSwitch {
        &self.switch
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.session.release(&self.switch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_fires_registered_switch() {
        let session = Arc::new(CancelSession::new());
        let registration = session.register(KillSwitch::new());
        session.cancel();
        tokio::time::timeout(Duration::from_secs(1), registration.switch().triggered())
            .await
            .expect("switch should fire");
        assert!(session.is_requested());
    }

    #[tokio::test]
    async fn test_cancel_before_registration_still_kills() {
        let session = Arc::new(CancelSession::new());
        session.cancel();
        let registration = session.register(KillSwitch::new());
        tokio::time::timeout(Duration::from_secs(1), registration.switch().triggered())
            .await
            .expect("late registration should be killed immediately");
    }

    #[test]
    fn test_reset_clears_flag_and_cancel_is_idempotent() {
        let session = CancelSession::new();
        session.cancel();
        session.cancel();
        assert!(session.is_requested());
        session.reset();
        assert!(!session.is_requested());
    }

    #[test]
    fn test_registration_drop_releases_slot() {
        let session = Arc::new(CancelSession::new());
        {
            let _registration = session.register(KillSwitch::new());
            assert!(session.has_active_process());
        }
        assert!(!session.has_active_process());
    }

    #[test]
    fn test_stale_registration_does_not_clear_newer_one() {
        let session = Arc::new(CancelSession::new());
        let first = session.register(KillSwitch::new());
        let _second = session.register(KillSwitch::new());
        drop(first);
        assert!(session.has_active_process());
    }
}
