//! Single-consumer work queue in front of the [`Ingestor`].
//!
//! Admission reads the index and then writes it, so two scans running at the
//! same time could both miss each other's duplicate. Every event therefore
//! goes through one FIFO channel drained by one task.

use super::events::FsEvent;
use super::ingestor::{IngestError, Ingestor, ScanOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum IngestCommand {
    Event(FsEvent),
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
}

impl IngestHandle {
    /// Enqueues an event. Waits only while the queue is full.
    pub async fn submit(&self, event: FsEvent) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::Event(event))
            .await
            .map_err(|_| IngestError::QueueClosed)
    }

    /// Resolves once every event submitted before this call was processed.
    pub async fn flush(&self) -> Result<(), IngestError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Flush(ack_tx))
            .await
            .map_err(|_| IngestError::QueueClosed)?;
        ack_rx.await.map_err(|_| IngestError::QueueClosed)
    }
}

pub struct IngestPipeline;

impl IngestPipeline {
    /// Starts the worker. It stops when `shutdown` fires or every handle is
    /// dropped.
    pub fn spawn(
        ingestor: Ingestor,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (IngestHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(ingestor, rx, shutdown));
        (IngestHandle { tx }, worker)
    }
}

async fn run_worker(
    ingestor: Ingestor,
    mut rx: mpsc::Receiver<IngestCommand>,
    shutdown: CancellationToken,
) {
    info!("Ingest worker started");
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            IngestCommand::Event(event) => process_event(&ingestor, event).await,
            IngestCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    info!("Ingest worker stopped");
}

async fn process_event(ingestor: &Ingestor, event: FsEvent) {
    let path = event.path().to_path_buf();
    let result = match event {
        FsEvent::Removed(path) => ingestor.remove(&path).map(|removed| {
            if removed {
                info!("Removed {:?} from index", path);
            }
        }),
        FsEvent::Added(path) | FsEvent::Changed(path) => {
            ingestor.scan(&path).await.map(|outcome| log_outcome(&path, outcome))
        }
    };

    if let Err(err) = result {
        error!("Failed to ingest {:?}: {}", path, err);
    }
}

fn log_outcome(path: &std::path::Path, outcome: ScanOutcome) {
    match outcome {
        ScanOutcome::Admitted { superseded } if superseded.is_empty() => {
            info!("Admitted {:?}", path)
        }
        ScanOutcome::Admitted { superseded } => {
            info!("Admitted {:?}, superseding {}", path, superseded.join(", "))
        }
        ScanOutcome::DuplicateContent { existing } => {
            info!("Deleted {:?}: identical to {}", path, existing)
        }
        ScanOutcome::LostArbitration { winner } => {
            info!("Deleted {:?}: {} has a better or equal bitrate", path, winner)
        }
        ScanOutcome::Rejected => warn!("Rejected {:?}: signature check failed", path),
        ScanOutcome::Removed => debug!("{:?} vanished before scanning", path),
        ScanOutcome::Unchanged => debug!("{:?} unchanged", path),
    }
}
