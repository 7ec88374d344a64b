//! Shared test double for the resource adapter.
//!
//! `MockResource` records every adapter call in order and can be configured
//! to fail specific operations, which is how the propagation and lifecycle
//! tests observe what the manager actually drove against the resource.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::definition::Isolation;
use crate::resource::{ResourceAdapter, ResourceError, ResourceResult};

#[derive(Debug)]
pub(crate) struct MockSession {
    pub id: u64,
}

#[derive(Debug)]
pub(crate) struct MockToken {
    session: MockSession,
}

#[derive(Debug)]
pub(crate) struct MockSavepoint {
    pub session: u64,
    pub id: u64,
}

#[derive(Default)]
struct MockState {
    next_session: u64,
    next_savepoint: u64,
    begin_attempts: u64,
    log: Vec<String>,
    begin_specs: Vec<(Isolation, bool, Option<Duration>)>,
    fail_commit_sessions: HashSet<u64>,
    fail_begin_attempts: HashSet<u64>,
    fail_suspend: bool,
    fail_resume: bool,
}

/// Recording resource adapter for tests.
#[derive(Clone)]
pub(crate) struct MockResource {
    state: Arc<Mutex<MockState>>,
    savepoints: bool,
}

impl MockResource {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            savepoints: true,
        }
    }

    pub(crate) fn without_savepoints() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            savepoints: false,
        }
    }

    /// Make the commit of the given session id fail.
    pub(crate) fn fail_commit_of(&self, session_id: u64) {
        self.state.lock().fail_commit_sessions.insert(session_id);
    }

    /// Make the nth begin attempt (1-based) fail.
    pub(crate) fn fail_begin_attempt(&self, attempt: u64) {
        self.state.lock().fail_begin_attempts.insert(attempt);
    }

    pub(crate) fn fail_suspend(&self) {
        self.state.lock().fail_suspend = true;
    }

    pub(crate) fn fail_resume(&self) {
        self.state.lock().fail_resume = true;
    }

    /// Every adapter call, in order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Number of log entries starting with `prefix`.
    pub(crate) fn count_of(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    /// The (isolation, read_only, timeout) tuples passed to `begin`.
    pub(crate) fn begin_specs(&self) -> Vec<(Isolation, bool, Option<Duration>)> {
        self.state.lock().begin_specs.clone()
    }
}

impl ResourceAdapter for MockResource {
    type Session = MockSession;
    type SuspendToken = MockToken;
    type Savepoint = MockSavepoint;

    fn begin(
        &self,
        isolation: Isolation,
        read_only: bool,
        timeout: Option<Duration>,
    ) -> ResourceResult<MockSession> {
        let mut state = self.state.lock();
        state.begin_attempts += 1;
        if state.fail_begin_attempts.contains(&state.begin_attempts) {
            state.log.push("begin_failed".to_string());
            return Err(ResourceError::msg("begin refused by mock"));
        }
        state.next_session += 1;
        let id = state.next_session;
        state.log.push(format!("begin#{}", id));
        state.begin_specs.push((isolation, read_only, timeout));
        Ok(MockSession { id })
    }

    fn commit(&self, session: MockSession) -> ResourceResult<()> {
        let mut state = self.state.lock();
        if state.fail_commit_sessions.contains(&session.id) {
            state.log.push(format!("commit_failed#{}", session.id));
            return Err(ResourceError::msg("commit refused by mock"));
        }
        state.log.push(format!("commit#{}", session.id));
        Ok(())
    }

    fn rollback(&self, session: MockSession) -> ResourceResult<()> {
        self.state.lock().log.push(format!("rollback#{}", session.id));
        Ok(())
    }

    fn suspend(&self, session: MockSession) -> ResourceResult<MockToken> {
        let mut state = self.state.lock();
        if state.fail_suspend {
            state.log.push(format!("suspend_failed#{}", session.id));
            return Err(ResourceError::msg("suspend refused by mock"));
        }
        state.log.push(format!("suspend#{}", session.id));
        Ok(MockToken { session })
    }

    fn resume(&self, token: MockToken) -> ResourceResult<MockSession> {
        let mut state = self.state.lock();
        if state.fail_resume {
            state.log.push(format!("resume_failed#{}", token.session.id));
            return Err(ResourceError::msg("resume refused by mock"));
        }
        state.log.push(format!("resume#{}", token.session.id));
        Ok(token.session)
    }

    fn supports_savepoints(&self) -> bool {
        self.savepoints
    }

    fn create_savepoint(&self, session: &mut MockSession) -> ResourceResult<MockSavepoint> {
        if !self.savepoints {
            return Err(ResourceError::unsupported("savepoints"));
        }
        let mut state = self.state.lock();
        state.next_savepoint += 1;
        let id = state.next_savepoint;
        state.log.push(format!("savepoint#{}.{}", session.id, id));
        Ok(MockSavepoint {
            session: session.id,
            id,
        })
    }

    fn rollback_to_savepoint(
        &self,
        session: &mut MockSession,
        savepoint: MockSavepoint,
    ) -> ResourceResult<()> {
        self.state
            .lock()
            .log
            .push(format!("rollback_to_savepoint#{}.{}", session.id, savepoint.id));
        Ok(())
    }

    fn release_savepoint(
        &self,
        session: &mut MockSession,
        savepoint: MockSavepoint,
    ) -> ResourceResult<()> {
        self.state
            .lock()
            .log
            .push(format!("release_savepoint#{}.{}", session.id, savepoint.id));
        Ok(())
    }
}
