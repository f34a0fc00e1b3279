use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::engine::session::ExamSession;

/// Live sessions keyed by attempt id. One session per attempt: a second
/// activation for the same attempt returns the session that is already live
/// and leaves its clock alone.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ExamSession>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts the session and starts its clock, unless a session for the
    /// same attempt is already live, in which case that one wins.
    pub(crate) fn activate(&self, session: Arc<ExamSession>) -> Arc<ExamSession> {
        let mut sessions = self.sessions.lock().expect("registry lock");
        match sessions.entry(session.attempt_id().to_string()) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                session.teardown();
                Arc::clone(existing.get())
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                session.start_clock();
                slot.insert(Arc::clone(&session));
                session
            }
        }
    }

    pub(crate) fn get(&self, attempt_id: &str) -> Option<Arc<ExamSession>> {
        self.sessions.lock().expect("registry lock").get(attempt_id).cloned()
    }

    pub(crate) fn remove(&self, attempt_id: &str) {
        if let Some(session) = self.sessions.lock().expect("registry lock").remove(attempt_id) {
            session.teardown();
        }
    }

    /// Evicts every settled session so the registry only holds attempts that
    /// are still in play. Returns the number of sessions dropped.
    pub(crate) fn prune_settled(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("registry lock");
        let before = sessions.len();
        sessions.retain(|_, session| {
            if session.is_settled() {
                session.teardown();
                false
            } else {
                true
            }
        });
        before - sessions.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().expect("registry lock").len()
    }
}
