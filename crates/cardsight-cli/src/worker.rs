use cardsight_core::{DetectionHandler, FrameError, InferenceEngine, InferenceResult, PixelBuffer};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("detector busy; frame dropped")]
    Busy,
    #[error("frame rejected: {0}")]
    Frame(#[from] FrameError),
    #[error("detector thread exited")]
    ChannelClosed,
    #[error("failed to spawn detector thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type Reply = oneshot::Sender<Result<InferenceResult, FrameError>>;

/// Messages sent to the detector thread.
enum DetectorRequest {
    Frame { frame: PixelBuffer, reply: Reply },
}

#[derive(Default)]
struct Counters {
    /// Frames accepted but not yet answered.
    pending: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Clone-safe handle to the detector thread.
#[derive(Clone)]
pub struct DetectorHandle {
    tx: mpsc::Sender<DetectorRequest>,
    counters: Arc<Counters>,
}

/// Receiver side of a frame accepted by [`DetectorHandle::try_detect`].
pub struct PendingDetection {
    rx: oneshot::Receiver<Result<InferenceResult, FrameError>>,
}

impl PendingDetection {
    pub async fn wait(self) -> Result<InferenceResult, WorkerError> {
        Ok(self.rx.await.map_err(|_| WorkerError::ChannelClosed)??)
    }
}

impl DetectorHandle {
    /// Queue a frame and wait for its result.
    ///
    /// The frame only counts as pending once its queue slot is reserved, so
    /// dropping this future while it waits for room leaves no trace.
    pub async fn detect(&self, frame: PixelBuffer) -> Result<InferenceResult, WorkerError> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(DetectorRequest::Frame {
            frame,
            reply: reply_tx,
        });
        Ok(reply_rx.await.map_err(|_| WorkerError::ChannelClosed)??)
    }

    /// Submit a frame only if no invocation is in flight.
    ///
    /// A busy detector drops the frame and returns [`WorkerError::Busy`]
    /// instead of queueing it, keeping end-to-end latency bounded.
    pub fn try_detect(&self, frame: PixelBuffer) -> Result<PendingDetection, WorkerError> {
        if self
            .counters
            .pending
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("detector busy; dropping frame");
            return Err(WorkerError::Busy);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        match self.tx.try_send(DetectorRequest::Frame {
            frame,
            reply: reply_tx,
        }) {
            Ok(()) => Ok(PendingDetection { rx: reply_rx }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.pending.fetch_sub(1, Ordering::AcqRel);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(WorkerError::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.pending.fetch_sub(1, Ordering::AcqRel);
                Err(WorkerError::ChannelClosed)
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Frames that produced a result.
    pub fn processed_frames(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Frames accepted but rejected by the handler.
    pub fn failed_frames(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

/// Spawn the detector on a dedicated OS thread.
///
/// The handler moves onto the thread and is the only thing touching the
/// model. The thread exits once every handle is dropped.
pub fn spawn_detector<E>(mut handler: DetectionHandler<E>) -> Result<DetectorHandle, WorkerError>
where
    E: InferenceEngine + 'static,
{
    let (tx, mut rx) = mpsc::channel::<DetectorRequest>(1);
    let counters = Arc::new(Counters::default());
    let thread_counters = Arc::clone(&counters);

    std::thread::Builder::new()
        .name("cardsight-detector".into())
        .spawn(move || {
            tracing::info!("detector thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    DetectorRequest::Frame { frame, reply } => {
                        let result = handler.try_run_model(&frame);
                        match &result {
                            Ok(r) => {
                                tracing::debug!(
                                    detections = r.detections.len(),
                                    elapsed_ms = r.elapsed_millis,
                                    "frame processed"
                                );
                                thread_counters.processed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "frame rejected");
                                thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        thread_counters.pending.fetch_sub(1, Ordering::AcqRel);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("detector thread exiting");
        })?;

    Ok(DetectorHandle { tx, counters })
}
