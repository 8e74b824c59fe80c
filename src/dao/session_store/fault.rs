//! Test double wrapping the memory store with write counting and fault injection.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::time::sleep;
use uuid::Uuid;

use crate::dao::{
    models::{
        AnswerEntity, NewSession, PatchOutcome, PlayerEntity, PlayerFilter, SessionEntity,
        SessionLookup, SessionPatch,
    },
    session_store::{MemorySessionStore, SessionStore},
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
pub(crate) struct FaultStore {
    pub(crate) inner: MemorySessionStore,
    pub(crate) updates: AtomicUsize,
    pub(crate) changed_updates: std::sync::Arc<AtomicUsize>,
    pub(crate) fail_reads: AtomicBool,
    pub(crate) fail_writes: AtomicBool,
    pub(crate) stall_updates: AtomicBool,
    pub(crate) code_conflicts: AtomicUsize,
    pub(crate) latency_ms: AtomicU64,
}

impl FaultStore {
    pub(crate) fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub(crate) fn changed_updates(&self) -> usize {
        self.changed_updates.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fail_reads(&self, value: bool) {
        self.fail_reads.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_writes(&self, value: bool) {
        self.fail_writes.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_stall_updates(&self, value: bool) {
        self.stall_updates.store(value, Ordering::SeqCst);
    }

    /// Reject the next `count` creates as if their join code were taken.
    pub(crate) fn set_code_conflicts(&self, count: usize) {
        self.code_conflicts.store(count, Ordering::SeqCst);
    }

    /// Delay session reads, roster reads and session writes so that
    /// concurrent callers interleave.
    pub(crate) fn set_latency_ms(&self, millis: u64) {
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    fn paced<T: Send + 'static>(&self, work: BoxFuture<'static, T>) -> BoxFuture<'static, T> {
        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        if latency.is_zero() {
            return work;
        }
        Box::pin(async move {
            sleep(latency).await;
            work.await
        })
    }

    fn reads_fail(&self) -> bool {
        self.fail_reads.load(Ordering::SeqCst)
    }

    fn writes_fail(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
    }
}

fn refused(operation: &str) -> StorageError {
    StorageError::unavailable(
        format!("{operation} refused"),
        std::io::Error::other("connection reset"),
    )
}

impl SessionStore for FaultStore {
    fn create_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        if self.writes_fail() {
            return Box::pin(async { Err(refused("create session")) });
        }
        let conflicting = self
            .code_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if conflicting {
            let code = session.join_code;
            return Box::pin(async move {
                Err(StorageError::Conflict(format!("join code `{code}`")))
            });
        }
        self.inner.create_session(session)
    }

    fn read_session(
        &self,
        lookup: SessionLookup,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        if self.reads_fail() {
            return Box::pin(async { Err(refused("read session")) });
        }
        self.paced(self.inner.read_session(lookup))
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<PatchOutcome>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.writes_fail() {
            return Box::pin(async { Err(refused("update session")) });
        }
        if self.stall_updates.load(Ordering::SeqCst) {
            return Box::pin(futures::future::pending::<StorageResult<PatchOutcome>>());
        }
        let write = self.paced(self.inner.update_session(id, patch));
        let changed_updates = self.changed_updates.clone();
        Box::pin(async move {
            let outcome = write.await?;
            if outcome.changed {
                changed_updates.fetch_add(1, Ordering::SeqCst);
            }
            Ok(outcome)
        })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        if self.reads_fail() {
            return Box::pin(async { Err(refused("list players")) });
        }
        self.paced(self.inner.list_players(session_id))
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        if self.writes_fail() {
            return Box::pin(async { Err(refused("insert player")) });
        }
        self.inner.insert_player(player)
    }

    fn delete_players(
        &self,
        session_id: Uuid,
        filter: PlayerFilter,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        if self.writes_fail() {
            return Box::pin(async { Err(refused("delete players")) });
        }
        self.inner.delete_players(session_id, filter)
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        if self.writes_fail() {
            return Box::pin(async { Err(refused("insert answer")) });
        }
        self.inner.insert_answer(answer)
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        if self.reads_fail() {
            return Box::pin(async { Err(refused("list answers")) });
        }
        self.inner.list_answers(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}
