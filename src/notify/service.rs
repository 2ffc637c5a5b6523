//! Background dispatch worker
//!
//! Batches are evaluated on the caller's task; admitted notifications go
//! through a bounded queue to a single worker, so a slow endpoint never
//! stalls ingestion and sends stay strictly ordered.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::dispatcher::Dispatcher;
use super::engine::NotifyEngine;
use super::message::NotificationRequest;
use crate::observation::ObservationBatch;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Handle for feeding batches to the engine and its dispatch worker
pub struct NotifyService {
    engine: Arc<NotifyEngine>,
    queue: mpsc::Sender<NotificationRequest>,
    shutdown_tx: mpsc::Sender<()>,
}

impl NotifyService {
    /// Spawn the dispatch worker
    pub fn start(
        engine: Arc<NotifyEngine>,
        dispatcher: Dispatcher,
        queue_capacity: usize,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (queue, mut queue_rx) = mpsc::channel::<NotificationRequest>(queue_capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let worker_engine = Arc::clone(&engine);
        let handle = tokio::spawn(async move {
            tracing::info!("Dispatch worker started");

            loop {
                tokio::select! {
                    request = queue_rx.recv() => {
                        let Some(request) = request else {
                            break;
                        };
                        let outcome = dispatcher.dispatch(&request).await;
                        worker_engine.apply_outcome(&outcome);
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            tracing::info!("Dispatch worker stopped");
        });

        (
            Self {
                engine,
                queue,
                shutdown_tx,
            },
            handle,
        )
    }

    pub fn engine(&self) -> &Arc<NotifyEngine> {
        &self.engine
    }

    /// Evaluate a batch and queue whatever is admitted; returns the number queued
    pub fn submit(&self, batch: &ObservationBatch) -> usize {
        let mut queued = 0;

        for request in self.engine.process_batch(batch) {
            let rule = request.rule;
            match self.queue.try_send(request) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(rule = %rule, "Dispatch queue full, dropping notification");
                    self.engine.release(rule);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(rule = %rule, "Dispatch worker stopped, dropping notification");
                    self.engine.release(rule);
                }
            }
        }

        queued
    }

    /// Stop the worker; queued and in-flight sends are abandoned
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
