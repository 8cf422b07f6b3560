//! The coordinator: ticket allocation, dispatch fan-out and cancellation.
//!
//! This module defines [`Master`], the process-wide coordinator shared by
//! every client session. It owns the [`Registry`] of workers and the single
//! [`TicketAllocator`] and exposes the three operations the request layer
//! routes to.
//!
//! ## Responsibilities
//!
//! - `query`: reserve one block for a named worker, with no network I/O.
//! - `dispatch`: reserve one block per targeted worker and write a `start`
//!   frame to each, concurrently, reporting every outcome as a
//!   [`DispatchEvent`].
//! - `cancel`: write a `cancel` frame to every worker concurrently and wait
//!   for all attempts, each bounded by its own deadline.

use super::config::ServerConfig;
use crate::server::{
    pool::registry::Registry,
    telemetry::{increment_blocks_allocated, increment_cancels, increment_dispatch_errors},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::{sync::Arc, time::SystemTime};
use tokio::sync::mpsc;
use tranche_core::{
    CANCEL_BODY, CancelReport, Command, DispatchMessage, Error, Frame, JobState, Result,
    TicketAllocator, TicketBlock,
};

/// Outcome of delivering one dispatch message to one worker.
///
/// On failure the block stays consumed: ticket space may contain holes for
/// messages that never arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub worker: usize,
    pub result: Result<TicketBlock>,
}

/// Process-wide coordinator.
///
/// Cheap to clone; all clones share the same registry, counter and
/// last-dispatch timestamp.
#[derive(Clone)]
pub struct Master {
    registry: Arc<Registry>,
    allocator: Arc<TicketAllocator>,
    last_start: Arc<Mutex<Option<SystemTime>>>,
    dispatch_timeout: Duration,
    cancel_timeout: Duration,
}

impl Master {
    pub fn new(registry: Registry, config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            allocator: Arc::new(TicketAllocator::with_start(config.counter_start)),
            last_start: Arc::new(Mutex::new(None)),
            dispatch_timeout: config.dispatch_timeout,
            cancel_timeout: config.cancel_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The pointer the next allocation will receive.
    pub fn next_pointer(&self) -> u64 {
        self.allocator.current()
    }

    /// When the most recent dispatch began, if any.
    pub fn last_start(&self) -> Option<SystemTime> {
        *self.last_start.lock()
    }

    /// Reserves one block sized by the weight of worker `index`.
    fn allocate_for(&self, index: usize) -> Result<TicketBlock> {
        let worker = self.registry.get(index)?;
        let block = self.allocator.allocate(worker.weight())?;
        increment_blocks_allocated();
        Ok(block)
    }

    /// Reserves a block for worker `index` and returns it paired with `job`,
    /// without contacting the worker.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerOutOfRange`] for an unknown index; the counter is not
    /// touched in that case.
    #[tracing::instrument(level = "debug", skip(self, job), fields(hash = %job.hash))]
    pub fn query(&self, index: usize, job: JobState) -> Result<DispatchMessage> {
        let block = self.allocate_for(index)?;
        tracing::debug!(pointer = block.start, "Reserved block for query");
        Ok(DispatchMessage::new(block.start, job))
    }

    /// Fans `job` out to the workers selected by its mode.
    ///
    /// Blocks are reserved up front in worker order, so a single dispatch
    /// hands out ascending pointers by index. One task per target then encodes
    /// a `start` frame and writes it to its worker within the dispatch
    /// deadline, and emits exactly one [`DispatchEvent`] on `events`. This
    /// call returns as soon as the tasks are spawned, with the number of
    /// targets. Events for a receiver that has gone away are dropped.
    pub fn dispatch(&self, job: JobState, events: mpsc::Sender<DispatchEvent>) -> usize {
        *self.last_start.lock() = Some(SystemTime::now());

        let targets = job.fan_out().target_count(self.registry.len());
        tracing::info!(
            hash = %job.hash,
            mode = %job.mode,
            targets,
            "Dispatching job"
        );

        for worker in 0..targets {
            let block = self.allocate_for(worker);
            let master = self.clone();
            let job = job.clone();
            let events = events.clone();

            tokio::spawn(async move {
                let result = match block {
                    Ok(block) => master.deliver(worker, block, job).await,
                    Err(e) => Err(e),
                };

                match &result {
                    Ok(block) => {
                        tracing::debug!(worker, pointer = block.start, "Dispatch delivered");
                    }
                    Err(e) => {
                        increment_dispatch_errors();
                        tracing::warn!(worker, "Dispatch failed: {e}");
                    }
                }

                if events.send(DispatchEvent { worker, result }).await.is_err() {
                    tracing::debug!(worker, "Caller gone, dropping dispatch outcome");
                }
            });
        }

        targets
    }

    async fn deliver(
        &self,
        index: usize,
        block: TicketBlock,
        job: JobState,
    ) -> Result<TicketBlock> {
        let frame = DispatchMessage::new(block.start, job).to_frame()?;
        let connection = self
            .registry
            .connection(index)
            .ok_or(Error::WorkerUnavailable { index })?;
        connection.send(frame, self.dispatch_timeout).await?;
        Ok(block)
    }

    /// Signals every worker to stop and waits until each attempt has either
    /// finished or hit the cancel deadline.
    ///
    /// Individual failures are logged and otherwise ignored. Dispatches
    /// already in flight are not interrupted and the counter is not reset.
    pub async fn cancel(&self) -> CancelReport {
        increment_cancels();
        tracing::info!(
            workers = self.registry.len(),
            next_pointer = self.next_pointer(),
            last_start = ?self.last_start(),
            "Cancel broadcast started"
        );

        let attempts = self.registry.iter().map(|worker| {
            let index = worker.index();
            async move {
                let result = match self.registry.connection(index) {
                    Some(connection) => {
                        connection
                            .send(Frame::new(Command::Cancel, CANCEL_BODY), self.cancel_timeout)
                            .await
                    }
                    None => Err(Error::WorkerUnavailable { index }),
                };

                if let Err(e) = &result {
                    tracing::debug!(worker = index, "Cancel signal not delivered: {e}");
                }
                result.is_ok()
            }
        });

        let delivered = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        let report = CancelReport {
            workers: self.registry.len(),
            delivered,
        };
        tracing::info!(
            workers = report.workers,
            delivered = report.delivered,
            "Cancel broadcast finished"
        );
        report
    }
}

impl DispatchEvent {
    /// The failure, if the message never reached its worker.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}
