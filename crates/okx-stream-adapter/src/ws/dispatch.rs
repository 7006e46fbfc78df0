/*
[INPUT]:  Decoded deliveries produced by the read loop
[OUTPUT]: Handler execution inline or on a bounded worker queue
[POS]:    WebSocket layer - decouples slow handlers from the reader
[UPDATE]: When adding dispatch modes or overflow policies
*/

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::warn;

/// A decoded push bound to its handler, ready to run.
pub type Delivery = Box<dyn FnOnce() + Send + 'static>;

const DROP_LOG_LIMIT: usize = 5;
static DROP_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// What to do when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropNewest,
    Block,
}

/// Where handler callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the read loop; handlers must not block.
    #[default]
    Inline,
    /// On one worker task fed by a bounded queue.
    Queued {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

#[derive(Debug)]
pub struct Dispatcher {
    mode: DispatchMode,
    tx: Option<mpsc::Sender<Delivery>>,
    rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        let (tx, rx) = match mode {
            DispatchMode::Inline => (None, None),
            DispatchMode::Queued { capacity, .. } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(tx), Some(rx))
            }
        };
        Self {
            mode,
            tx,
            rx: Mutex::new(rx),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Start the queue worker. No-op for inline mode or if already started.
    pub fn spawn_worker(&self) -> Option<JoinHandle<()>> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                delivery();
            }
        }))
    }

    pub async fn dispatch(&self, delivery: Delivery) {
        let (DispatchMode::Queued { overflow, .. }, Some(tx)) = (self.mode, self.tx.as_ref()) else {
            delivery();
            return;
        };

        match overflow {
            OverflowPolicy::Block => {
                if tx.send(delivery).await.is_err() {
                    warn!("dispatch worker stopped; delivery discarded");
                }
            }
            OverflowPolicy::DropNewest => match tx.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    log_drop_sampled(total);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("dispatch worker stopped; delivery discarded");
                }
            },
        }
    }

    /// Deliveries discarded by the drop-newest policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn log_drop_sampled(total: u64) {
    let count = DROP_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < DROP_LOG_LIMIT {
        warn!(
            sample_index = count + 1,
            sample_limit = DROP_LOG_LIMIT,
            dropped_total = total,
            "dispatch queue full; delivery dropped"
        );
    }
}
