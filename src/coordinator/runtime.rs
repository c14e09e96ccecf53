//! Bounded concurrent front end for the coordinator.
//!
//! [`ResolutionCoordinator::resolve`] is synchronous. Callers that want
//! parallelism without managing threads submit through a small bounded
//! worker pool instead; admission is explicit, so overload shows up as a
//! queue-full error rather than unbounded memory growth.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::coordinator::ResolutionCoordinator;
use crate::error::{ConfigurationError, FlagstickError, FlagstickResult, RuntimeError};
use crate::request::{ResolveRequest, ResolveResponse};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ResolveRuntimeConfig {
    /// Number of resolver workers.
    pub workers: usize,
    /// Maximum queued requests.
    pub queue_capacity: usize,
}

impl Default for ResolveRuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Resolve {
        request: ResolveRequest,
        reply: Sender<FlagstickResult<ResolveResponse>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Handle returned by `resolve_async`.
#[derive(Debug)]
pub struct ExecutionHandle {
    rx: Receiver<FlagstickResult<ResolveResponse>>,
}

impl ExecutionHandle {
    /// Waits for the resolution to complete.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Disconnected`] if the runtime shut down
    /// before the resolution finished; otherwise the resolution's own
    /// result.
    pub fn join(self) -> FlagstickResult<ResolveResponse> {
        self.rx
            .recv()
            .map_err(|_| FlagstickError::Runtime(RuntimeError::Disconnected))?
    }

    /// Waits for the resolution to complete with a timeout.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Timeout`] when `timeout` elapses first and
    /// [`RuntimeError::Disconnected`] if the runtime shut down.
    pub fn join_timeout(self, timeout: Duration) -> FlagstickResult<ResolveResponse> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                FlagstickError::Runtime(RuntimeError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                })
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                FlagstickError::Runtime(RuntimeError::Disconnected)
            }
        })?
    }
}

/// A bounded thread pool resolving requests against one coordinator.
#[derive(Debug)]
pub struct ResolveRuntime {
    coordinator: Arc<ResolutionCoordinator>,
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl ResolveRuntime {
    /// Starts the worker pool.
    ///
    /// # Errors
    /// Returns a configuration error when `config` asks for zero workers or
    /// a zero-capacity queue.
    pub fn start(
        coordinator: Arc<ResolutionCoordinator>,
        config: ResolveRuntimeConfig,
    ) -> FlagstickResult<Self> {
        if config.workers < 1 {
            return Err(ConfigurationError::InvalidWorkerCount {
                min: 1,
                actual: config.workers,
            }
            .into());
        }
        if config.queue_capacity < 1 {
            return Err(ConfigurationError::InvalidQueueCapacity {
                min: 1,
                actual: config.queue_capacity,
            }
            .into());
        }

        let (tx, rx) = bounded::<Job>(config.queue_capacity);

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx: Receiver<Job> = rx.clone();
            let coordinator = Arc::clone(&coordinator);
            let handle = thread::Builder::new()
                .name(format!("flagstick-resolve-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Resolve { request, reply }) => {
                            let result = coordinator.resolve(&request);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .expect("failed to spawn flagstick resolve worker");
            workers.push(handle);
        }

        Ok(Self {
            coordinator,
            tx,
            workers,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Submits a resolution without waiting for it.
    ///
    /// # Errors
    /// Returns [`RuntimeError::QueueFull`] when the queue is at capacity
    /// and [`RuntimeError::Disconnected`] after shutdown.
    pub fn resolve_async(&self, request: ResolveRequest) -> FlagstickResult<ExecutionHandle> {
        let (reply, rx) = bounded::<FlagstickResult<ResolveResponse>>(1);
        match self.tx.try_send(Job::Resolve { request, reply }) {
            Ok(()) => Ok(ExecutionHandle { rx }),
            Err(TrySendError::Full(_)) => Err(RuntimeError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::Disconnected.into()),
        }
    }

    /// Submits a resolution and waits for its result.
    ///
    /// # Errors
    /// Admission and shutdown errors as for `resolve_async`, plus the
    /// resolution's own result.
    pub fn resolve(&self, request: ResolveRequest) -> FlagstickResult<ResolveResponse> {
        self.resolve_async(request)?.join()
    }

    /// The coordinator the workers resolve against.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<ResolutionCoordinator> {
        &self.coordinator
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> FlagstickResult<Receiver<()>> {
        let (reply, rx) = bounded::<()>(1);
        match self.tx.try_send(Job::Sleep { duration, reply }) {
            Ok(()) => Ok(rx),
            Err(TrySendError::Full(_)) => Err(RuntimeError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::Disconnected.into()),
        }
    }
}

impl Drop for ResolveRuntime {
    fn drop(&mut self) {
        // Close the channel: workers drain queued jobs then exit.
        let tx = std::mem::replace(&mut self.tx, bounded::<Job>(1).0);
        drop(tx);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
