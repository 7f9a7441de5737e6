//! Session directory: maps conversation threads to agent runtime sessions.

use crate::runtime::AgentRuntime;
use crate::store::SessionStore;
use codeask_common::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a get-or-create lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: String,
    /// True when this call minted the session
    pub is_new: bool,
}

/// Durable thread → session directory.
///
/// Creation is serialized per thread key so two concurrent first questions
/// in the same thread end up sharing one runtime session.
pub struct SessionDirectory {
    store: Arc<SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionDirectory {
    pub fn new(store: Arc<SessionStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            store,
            runtime,
            creation_locks: DashMap::new(),
        }
    }

    /// Look up the session bound to a thread.
    pub fn get(&self, thread_key: &str) -> Result<Option<String>> {
        Ok(self.store.get(thread_key)?.map(|s| s.session_id))
    }

    /// Return the thread's session, creating one through the runtime if needed.
    pub async fn get_or_create(&self, thread_key: &str) -> Result<SessionHandle> {
        if let Some(session_id) = self.get(thread_key)? {
            return Ok(SessionHandle {
                session_id,
                is_new: false,
            });
        }

        let lock = self
            .creation_locks
            .entry(thread_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = self.create_locked(thread_key).await;

        drop(_guard);
        // Only the last holder removes the entry; waiters still hold a clone.
        self.creation_locks
            .remove_if(thread_key, |_, l| Arc::strong_count(l) <= 2);

        result
    }

    async fn create_locked(&self, thread_key: &str) -> Result<SessionHandle> {
        // Another task may have created it while we waited.
        if let Some(session_id) = self.get(thread_key)? {
            return Ok(SessionHandle {
                session_id,
                is_new: false,
            });
        }

        let minted = self.runtime.create_session(thread_key).await?;
        let (session_id, inserted) = self.store.insert_if_absent(thread_key, &minted)?;

        if inserted {
            tracing::info!(thread_key = %thread_key, session_id = %session_id, "Created thread session");
        } else {
            tracing::warn!(
                thread_key = %thread_key,
                session_id = %session_id,
                discarded = %minted,
                "Thread session created concurrently elsewhere, using stored session"
            );
        }

        Ok(SessionHandle {
            session_id,
            is_new: inserted,
        })
    }

    pub fn is_compacted(&self, thread_key: &str) -> Result<bool> {
        self.store.is_compacted(thread_key)
    }

    pub fn set_compacted(&self, thread_key: &str, compacted: bool) -> Result<()> {
        self.store.set_compacted(thread_key, compacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EventSubscription, PromptPart};
    use async_trait::async_trait;
    use codeask_common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingRuntime {
        created: AtomicUsize,
        fail: bool,
    }

    impl CountingRuntime {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl AgentRuntime for CountingRuntime {
        async fn create_session(&self, _title: &str) -> Result<String> {
            if self.fail {
                return Err(Error::External("runtime down".into()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ses_{n}"))
        }

        async fn submit_question(
            &self,
            _session_id: &str,
            _agent: Option<&str>,
            _parts: &[PromptPart],
        ) -> Result<()> {
            Ok(())
        }

        async fn subscribe_events(&self) -> Result<EventSubscription> {
            Ok(EventSubscription::channel(1).1)
        }
    }

    fn directory(runtime: Arc<CountingRuntime>) -> SessionDirectory {
        SessionDirectory::new(Arc::new(SessionStore::open_in_memory().unwrap()), runtime)
    }

    #[tokio::test]
    async fn test_new_thread_is_new_exactly_once() {
        let runtime = Arc::new(CountingRuntime::new());
        let dir = directory(runtime.clone());

        let first = dir.get_or_create("C1:T1").await.unwrap();
        assert!(first.is_new);

        let second = dir.get_or_create("C1:T1").await.unwrap();
        assert!(!second.is_new);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(runtime.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_threads_get_distinct_sessions() {
        let dir = directory(Arc::new(CountingRuntime::new()));
        let a = dir.get_or_create("C1:T1").await.unwrap();
        let b = dir.get_or_create("C1:T2").await.unwrap();
        assert!(a.is_new && b.is_new);
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn test_concurrent_creation_is_serialized() {
        let runtime = Arc::new(CountingRuntime::new());
        let dir = Arc::new(directory(runtime.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                tokio::spawn(async move { dir.get_or_create("C1:race").await.unwrap() })
            })
            .collect();

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_new).count(), 1);
        assert!(results.iter().all(|r| r.session_id == results[0].session_id));
        assert_eq!(runtime.created.load(Ordering::SeqCst), 1);
        assert!(dir.creation_locks.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_failure_stores_nothing() {
        let runtime = Arc::new(CountingRuntime {
            created: AtomicUsize::new(0),
            fail: true,
        });
        let dir = directory(runtime);

        assert!(dir.get_or_create("C1:T1").await.is_err());
        assert!(dir.get("C1:T1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compacted_passthrough() {
        let dir = directory(Arc::new(CountingRuntime::new()));
        dir.get_or_create("k").await.unwrap();

        assert!(!dir.is_compacted("k").unwrap());
        dir.set_compacted("k", true).unwrap();
        assert!(dir.is_compacted("k").unwrap());
        dir.set_compacted("k", false).unwrap();
        assert!(!dir.is_compacted("k").unwrap());
    }
}
