//! Progress Tracker: persists the last event id successfully processed by
//! each `(group, partition)` consumer so a restart resumes rather than
//! replays from the beginning (spec §4.8.1, §6 persisted-state layout).

use cqrs_es_core::{CoreError, EventId, NonTransientKind, TransientKind};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// The caller's own work to run against an already-open transaction, for
/// [`ProgressTracker::proceed_transactional`]. Takes the open connection
/// rather than returning one, since only the tracker itself begins/commits
/// the transaction — the caller only enlists in it.
pub type TxOperation<'a> = Box<
    dyn for<'c> FnOnce(
            &'c mut sqlx::PgConnection,
        ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'c>>
        + Send
        + 'a,
>;

/// Progress for one `(group, partition)` pair, or the sentinel for "nothing
/// processed yet".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// No event has been processed yet for this group/partition.
    None,
    /// The latest event id successfully processed.
    Success(EventId),
}

impl Progress {
    /// The event id to resume after, if any.
    #[must_use]
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::None => None,
            Self::Success(id) => Some(id),
        }
    }
}

/// What one processing-loop iteration decided to record as progress.
///
/// Returned by the closure passed to [`ProgressTracker::proceed`]: either the
/// event was handled (advance to its id) or it is being deliberately skipped
/// (still advance past it, without having dispatched it to any handler).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Advance progress to `event_id`.
    Advance(EventId),
    /// Leave progress unchanged (the step failed and should be retried).
    Unchanged,
}

/// Tracks and persists per-`(group, partition)` progress.
///
/// `proceed` takes the group/partition, loads current progress, invokes
/// `execute` with it, and — if `execute` returns `Advance` — persists the new
/// value before returning. This couples "did the step succeed" to "did
/// progress move" the same way a database transaction couples a write to its
/// commit, without requiring an actual external transaction for the
/// in-memory implementation.
pub trait ProgressTracker: Send + Sync {
    /// Read current progress for `(group, partition)`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the underlying store cannot be reached.
    fn load<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Progress, CoreError>> + Send + 'a>>;

    /// Run `execute` against the current progress and persist its outcome.
    ///
    /// # Errors
    ///
    /// Returns whatever `execute` returns, or a [`CoreError`] if persisting
    /// the new progress fails.
    fn proceed<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
        execute: Box<
            dyn FnOnce(Progress) -> Result<ProgressOutcome, CoreError> + Send + 'a,
        >,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;

    /// Advance progress to `event_id`, running `run_in_tx` against the same
    /// external transaction the advance itself commits through (spec §4.8.d,
    /// §5 "transactional participation").
    ///
    /// Unlike `proceed`, there is no `execute` closure deciding whether to
    /// advance: transactional participation only exists to let a handler's
    /// own write land atomically with a *known* advance, so the caller (the
    /// processor) has already decided `event_id` is the right value before
    /// calling this.
    ///
    /// The default implementation rejects every call; only a tracker with a
    /// real external transaction to offer (the `PostgreSQL` tracker) should
    /// override it.
    ///
    /// # Errors
    ///
    /// Returns `NonTransient(InvalidUsage)` if this tracker has no
    /// transactional backing, or whatever `run_in_tx`/the underlying store
    /// returns.
    fn proceed_transactional<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
        event_id: EventId,
        run_in_tx: TxOperation<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        let _ = (group, partition, event_id, run_in_tx);
        Box::pin(async {
            Err(CoreError::NonTransient(NonTransientKind::InvalidUsage(
                "this progress tracker has no transactional backing".to_string(),
            )))
        })
    }
}

/// An in-memory [`ProgressTracker`], for tests and single-process
/// deployments with no durability requirement.
#[derive(Default)]
pub struct InMemoryProgressTracker {
    state: Mutex<HashMap<(String, u64), EventId>>,
    lock: AsyncMutex<()>,
}

impl InMemoryProgressTracker {
    /// An empty tracker: every `(group, partition)` starts at `Progress::None`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for InMemoryProgressTracker {
    fn load<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Progress, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(state
                .get(&(group.to_string(), partition))
                .cloned()
                .map_or(Progress::None, Progress::Success))
        })
    }

    fn proceed<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
        execute: Box<
            dyn FnOnce(Progress) -> Result<ProgressOutcome, CoreError> + Send + 'a,
        >,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let current = self.load(group, partition).await?;
            let outcome = execute(current)?;
            if let ProgressOutcome::Advance(event_id) = outcome {
                let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                state.insert((group.to_string(), partition), event_id);
            }
            Ok(())
        })
    }
}

/// `PostgreSQL`-backed [`ProgressTracker`] against the `PROGRESS` table
/// defined by the wire contract: `PROGRESS(GROUP_KEY, PARTITION_ID,
/// EVENT_ID)` keyed by `(GROUP_KEY, PARTITION_ID)`.
pub struct PostgresProgressTracker {
    pool: sqlx::PgPool,
}

impl PostgresProgressTracker {
    /// Wrap an existing connection pool. The caller is responsible for
    /// having created the `PROGRESS` table (see module docs for the DDL).
    #[must_use]
    pub const fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool, for callers that also need other
    /// access to the same database.
    #[must_use]
    pub const fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

impl ProgressTracker for PostgresProgressTracker {
    fn load<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Progress, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)]
            let partition_i64 = partition as i64;

            let row: Option<(String,)> = sqlx::query_as(
                "SELECT EVENT_ID FROM PROGRESS WHERE GROUP_KEY = $1 AND PARTITION_ID = $2",
            )
            .bind(group)
            .bind(partition_i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error(&e))?;

            Ok(row.map_or(Progress::None, |(id,)| Progress::Success(EventId::new(id))))
        })
    }

    fn proceed<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
        execute: Box<
            dyn FnOnce(Progress) -> Result<ProgressOutcome, CoreError> + Send + 'a,
        >,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let current = self.load(group, partition).await?;
            let outcome = execute(current)?;

            if let ProgressOutcome::Advance(event_id) = outcome {
                #[allow(clippy::cast_possible_wrap)]
                let partition_i64 = partition as i64;

                sqlx::query(
                    "INSERT INTO PROGRESS (GROUP_KEY, PARTITION_ID, EVENT_ID)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (GROUP_KEY, PARTITION_ID) DO UPDATE
                     SET EVENT_ID = EXCLUDED.EVENT_ID",
                )
                .bind(group)
                .bind(partition_i64)
                .bind(event_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error(&e))?;
            }

            Ok(())
        })
    }

    fn proceed_transactional<'a>(
        &'a self,
        group: &'a str,
        partition: u64,
        event_id: EventId,
        run_in_tx: TxOperation<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|e| storage_error(&e))?;

            if let Err(error) = run_in_tx(&mut tx).await {
                let _ = tx.rollback().await;
                return Err(error);
            }

            #[allow(clippy::cast_possible_wrap)]
            let partition_i64 = partition as i64;

            let insert = sqlx::query(
                "INSERT INTO PROGRESS (GROUP_KEY, PARTITION_ID, EVENT_ID)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (GROUP_KEY, PARTITION_ID) DO UPDATE
                 SET EVENT_ID = EXCLUDED.EVENT_ID",
            )
            .bind(group)
            .bind(partition_i64)
            .bind(event_id.as_str())
            .execute(&mut *tx)
            .await;

            match insert {
                Ok(_) => {
                    tx.commit().await.map_err(|e| storage_error(&e))?;
                    Ok(())
                }
                Err(error) => {
                    let _ = tx.rollback().await;
                    Err(storage_error(&error))
                }
            }
        })
    }
}

fn storage_error(err: &sqlx::Error) -> CoreError {
    CoreError::Transient(TransientKind::TransportError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_group_partition_has_no_progress() {
        let tracker = InMemoryProgressTracker::new();
        assert_eq!(tracker.load("g", 0).await.unwrap(), Progress::None);
    }

    #[tokio::test]
    async fn proceed_advances_progress_on_success() {
        let tracker = InMemoryProgressTracker::new();
        tracker
            .proceed(
                "g",
                0,
                Box::new(|progress| {
                    assert_eq!(progress, Progress::None);
                    Ok(ProgressOutcome::Advance(EventId::new("e1")))
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            tracker.load("g", 0).await.unwrap(),
            Progress::Success(EventId::new("e1"))
        );
    }

    #[tokio::test]
    async fn unchanged_outcome_leaves_progress_untouched() {
        let tracker = InMemoryProgressTracker::new();
        tracker
            .proceed("g", 0, Box::new(|_| Ok(ProgressOutcome::Advance(EventId::new("e1")))))
            .await
            .unwrap();

        tracker
            .proceed("g", 0, Box::new(|_| Ok(ProgressOutcome::Unchanged)))
            .await
            .unwrap();

        assert_eq!(
            tracker.load("g", 0).await.unwrap(),
            Progress::Success(EventId::new("e1"))
        );
    }

    #[tokio::test]
    async fn trackers_without_transactional_backing_reject_proceed_transactional() {
        let tracker = InMemoryProgressTracker::new();
        let result = tracker
            .proceed_transactional(
                "g",
                0,
                EventId::new("e1"),
                Box::new(|_conn| Box::pin(async { Ok(()) })),
            )
            .await;

        assert!(matches!(
            result,
            Err(CoreError::NonTransient(NonTransientKind::InvalidUsage(_)))
        ));
    }

    #[tokio::test]
    async fn distinct_partitions_track_independently() {
        let tracker = InMemoryProgressTracker::new();
        tracker
            .proceed("g", 0, Box::new(|_| Ok(ProgressOutcome::Advance(EventId::new("e1")))))
            .await
            .unwrap();

        assert_eq!(tracker.load("g", 1).await.unwrap(), Progress::None);
    }
}
