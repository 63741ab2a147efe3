use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::Session;

/// Live sessions of a server, keyed by connection.
///
/// Each connection registers the session it created on DESCRIBE and
/// removes it on disconnect; the registry never stops or releases a
/// session on its own except through [`stop_all`](Self::stop_all).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<u64, Session>>>,
    next_id: Arc<AtomicU64>,
    /// Aggregate streaming state last reported by
    /// [`streaming_transition`](Self::streaming_transition).
    reported: Arc<Mutex<bool>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a key for a new connection.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `session` under `id`, returning the session it replaces.
    pub fn insert(&self, id: u64, session: Session) -> Option<Session> {
        let previous = self.sessions.write().insert(id, session);
        let total = self.sessions.read().len();
        tracing::debug!(connection = id, total_sessions = total, "session registered");
        previous
    }

    pub fn remove(&self, id: u64) -> Option<Session> {
        let removed = self.sessions.write().remove(&id);
        if removed.is_some() {
            let total = self.sessions.read().len();
            tracing::debug!(connection = id, total_sessions = total, "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Whether any track of any live session is streaming.
    pub fn is_streaming(&self) -> bool {
        self.snapshot().iter().any(Session::is_streaming)
    }

    /// Sum of every live session's bitrate.
    pub fn bitrate(&self) -> u64 {
        self.snapshot().iter().map(Session::bitrate).sum()
    }

    /// The new aggregate streaming state if it changed since the last call.
    ///
    /// Check and update happen under one lock, so concurrent callers
    /// observe each transition exactly once.
    pub fn streaming_transition(&self) -> Option<bool> {
        let mut reported = self.reported.lock();
        let streaming = self.is_streaming();
        if streaming == *reported {
            return None;
        }
        *reported = streaming;
        Some(streaming)
    }

    /// Stop every streaming session.
    pub fn stop_all(&self) {
        for session in self.snapshot() {
            if session.is_streaming() {
                session.sync_stop();
            }
        }
    }

    // Session calls take the session lock; never hold the map lock across them.
    fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use crate::media::TestPatternFactory;
    use crate::session::SessionBuilder;

    #[test]
    fn aggregates_across_sessions() {
        let builder = SessionBuilder::new(Arc::new(TestPatternFactory), Arc::new(InlineExecutor::new()))
            .with_destination("127.0.0.1");
        let registry = SessionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);

        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        registry.insert(a, first.clone());
        registry.insert(b, second.clone());
        assert!(!registry.is_streaming());
        assert_eq!(registry.bitrate(), 0);

        first.sync_start().unwrap();
        second.sync_start().unwrap();
        assert!(registry.is_streaming());

        first.sync_stop();
        assert!(registry.is_streaming());
        registry.stop_all();
        assert!(!registry.is_streaming());

        registry.remove(a).unwrap().release();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn transition_is_reported_once() {
        let builder = SessionBuilder::new(Arc::new(TestPatternFactory), Arc::new(InlineExecutor::new()))
            .with_destination("127.0.0.1");
        let registry = SessionRegistry::new();
        let session = builder.build().unwrap();
        registry.insert(registry.next_id(), session.clone());
        assert_eq!(registry.streaming_transition(), None);

        session.sync_start().unwrap();
        let clones: Vec<_> = (0..4).map(|_| registry.clone()).collect();
        let seen: Vec<Option<bool>> = std::thread::scope(|scope| {
            let handles: Vec<_> = clones
                .iter()
                .map(|r| scope.spawn(move || r.streaming_transition()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(seen.iter().filter(|t| **t == Some(true)).count(), 1);
        assert_eq!(seen.iter().filter(|t| t.is_none()).count(), 3);

        session.sync_stop();
        assert_eq!(registry.streaming_transition(), Some(false));
        assert_eq!(registry.streaming_transition(), None);
        session.release();
    }
}
