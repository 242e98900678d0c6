//! Life-cycle Controller (spec §4.9): starts and stops a set of named
//! processors either alongside the hosting process (context-managed mode)
//! or only while this instance holds a distributed leadership lock
//! (leader-election mode).
//!
//! Grounded on `projections/src/manager.rs`'s `watch::channel(false)`
//! shutdown-signal pattern, generalized from one manager's single stream to
//! a set of independently-named runs sharing one shutdown broadcast.

use cqrs_es_core::CoreError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A boundary to an external leader-election mechanism (e.g. a database
/// advisory lock, a Kubernetes lease). Leader-election mode calls this
/// before starting a run and stops the run if leadership is lost.
pub trait DistributedLock: Send + Sync {
    /// Attempt to acquire or renew leadership for `key`.
    fn is_leader<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoreError>> + Send + 'a>>;
}

/// A named unit of work the controller can start and stop: typically an
/// [`crate::processor::EventHandlingProcessor`] or [`DistributedLock`]-
/// gated wrapper around one.
pub trait ManagedRun: Send + Sync + 'static {
    /// Run until `shutdown` signals true, or the run fails unrecoverably.
    fn run<'a>(
        &'a self,
        shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;
}

enum Mode {
    /// Started when the controller starts, stopped when it stops.
    ContextManaged,
    /// Started only while `lock.is_leader(key)` holds; polled at `poll_interval`.
    LeaderElection {
        lock: Arc<dyn DistributedLock>,
        key: String,
        poll_interval: std::time::Duration,
    },
}

struct Registration {
    run: Arc<dyn ManagedRun>,
    mode: Mode,
}

/// Coordinates start/stop of a named set of processor runs.
#[derive(Default)]
pub struct LifecycleController {
    registrations: HashMap<String, Registration>,
    handles: HashMap<String, JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl LifecycleController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `run` under `name` in context-managed mode: it starts when
    /// [`Self::start_all`] is called and stops when [`Self::stop_all`] is
    /// called (or the controller is dropped mid-run).
    pub fn register(&mut self, name: impl Into<String>, run: Arc<dyn ManagedRun>) {
        self.registrations.insert(
            name.into(),
            Registration {
                run,
                mode: Mode::ContextManaged,
            },
        );
    }

    /// Register `run` under `name` in leader-election mode: it only runs
    /// while `lock.is_leader(key)` returns true, re-checked every
    /// `poll_interval`.
    pub fn register_with_leader_election(
        &mut self,
        name: impl Into<String>,
        run: Arc<dyn ManagedRun>,
        lock: Arc<dyn DistributedLock>,
        key: impl Into<String>,
        poll_interval: std::time::Duration,
    ) {
        self.registrations.insert(
            name.into(),
            Registration {
                run,
                mode: Mode::LeaderElection {
                    lock,
                    key: key.into(),
                    poll_interval,
                },
            },
        );
    }

    /// Start every registered run. Context-managed runs start immediately;
    /// leader-election runs start a supervising task that acquires and
    /// relinquishes the underlying run as leadership changes.
    pub fn start_all(&mut self) {
        let (tx, rx) = watch::channel(false);
        self.shutdown_tx = Some(tx);

        for (name, registration) in &self.registrations {
            let shutdown = rx.clone();
            let run = Arc::clone(&registration.run);
            let name = name.clone();

            let handle = match &registration.mode {
                Mode::ContextManaged => tokio::spawn(async move {
                    if let Err(error) = run.run(shutdown).await {
                        tracing::error!(run = %name, %error, "managed run terminated");
                    }
                }),
                Mode::LeaderElection {
                    lock,
                    key,
                    poll_interval,
                } => {
                    let lock = Arc::clone(lock);
                    let key = key.clone();
                    let poll_interval = *poll_interval;
                    tokio::spawn(Self::supervise_leader_election(
                        name, run, shutdown, lock, key, poll_interval,
                    ))
                }
            };

            self.handles.insert(name.clone(), handle);
        }
    }

    async fn supervise_leader_election(
        name: String,
        run: Arc<dyn ManagedRun>,
        mut shutdown: watch::Receiver<bool>,
        lock: Arc<dyn DistributedLock>,
        key: String,
        poll_interval: std::time::Duration,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            match lock.is_leader(&key).await {
                Ok(true) => {
                    let (inner_tx, inner_rx) = watch::channel(false);
                    let run = Arc::clone(&run);
                    let mut run_handle = tokio::spawn(async move { run.run(inner_rx).await });

                    loop {
                        tokio::select! {
                            result = &mut run_handle => {
                                if let Ok(Err(error)) = result {
                                    tracing::error!(run = %name, %error, "leader-elected run terminated");
                                }
                                break;
                            }
                            _ = shutdown.changed() => {
                                let _ = inner_tx.send(true);
                            }
                            () = tokio::time::sleep(poll_interval) => {
                                match lock.is_leader(&key).await {
                                    Ok(true) => {}
                                    _ => {
                                        let _ = inner_tx.send(true);
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {
                    tokio::time::sleep(poll_interval).await;
                }
            }

            if *shutdown.borrow() {
                return;
            }
        }
    }

    /// Signal every run to stop and wait for them to finish.
    pub async fn stop_all(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for (_, handle) in self.handles.drain() {
            let _ = handle.await;
        }
    }
}
