use crate::dispatcher::TurnDispatcher;
use parley_channels::InboundMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a sender worker waits for its next message before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

struct SenderQueue {
    tx: mpsc::UnboundedSender<InboundMessage>,
    worker: JoinHandle<()>,
    generation: u64,
}

type QueueMap = Mutex<HashMap<String, SenderQueue>>;

/// Routes inbound messages to one worker per sender.
///
/// Messages from the same sender are handled strictly in receipt order, one
/// exchange at a time, so each exchange sees the history committed by the
/// previous one. Different senders proceed concurrently. A worker that
/// stays idle for the configured timeout removes itself; the next message
/// from that sender starts a fresh one.
pub struct SessionRouter {
    dispatcher: Arc<TurnDispatcher>,
    queues: Arc<QueueMap>,
    idle_timeout: Duration,
    next_generation: AtomicU64,
}

impl SessionRouter {
    pub fn new(dispatcher: Arc<TurnDispatcher>) -> Self {
        Self {
            dispatcher,
            queues: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Overrides [`DEFAULT_IDLE_TIMEOUT`].
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Enqueues `msg` behind any exchange already pending for its sender.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn route(&self, msg: InboundMessage) {
        let mut queues = self.queues.lock();
        let sender_id = msg.sender_id.clone();

        let msg = match queues.get(&sender_id) {
            Some(queue) => match queue.tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => {
                    warn!(sender = %sender_id, "Sender worker stopped; restarting it");
                    msg
                }
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let worker = tokio::spawn(run_worker(
            Worker {
                dispatcher: self.dispatcher.clone(),
                queues: Arc::downgrade(&self.queues),
                sender_id: sender_id.clone(),
                generation,
                idle_timeout: self.idle_timeout,
            },
            rx,
        ));
        if tx.send(msg).is_err() {
            warn!(sender = %sender_id, "Dropped message for a worker that exited immediately");
        }
        queues.insert(
            sender_id,
            SenderQueue {
                tx,
                worker,
                generation,
            },
        );
    }

    /// Number of senders with a live worker.
    pub fn active_senders(&self) -> usize {
        self.queues.lock().len()
    }

    /// Stops accepting work for existing senders and waits until every
    /// queued exchange has finished.
    pub async fn drain(&self) {
        let workers: Vec<_> = self
            .queues
            .lock()
            .drain()
            .map(|(_, queue)| queue.worker)
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Sender worker ended abnormally");
            }
        }
    }
}

struct Worker {
    dispatcher: Arc<TurnDispatcher>,
    queues: Weak<QueueMap>,
    sender_id: String,
    generation: u64,
    idle_timeout: Duration,
}

impl Worker {
    /// Called after an idle timeout. Returns a message that raced in, or
    /// `None` once this worker has been unregistered and should exit.
    fn retire(&self, rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> Option<InboundMessage> {
        let Some(queues) = self.queues.upgrade() else {
            return None;
        };
        // `route` sends while holding this lock, so an empty queue seen
        // under it stays empty until the entry is gone.
        let mut queues = queues.lock();
        match rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(_) => {
                if queues
                    .get(&self.sender_id)
                    .is_some_and(|q| q.generation == self.generation)
                {
                    queues.remove(&self.sender_id);
                }
                None
            }
        }
    }
}

async fn run_worker(worker: Worker, mut rx: mpsc::UnboundedReceiver<InboundMessage>) {
    let sender_id = worker.sender_id.clone();
    debug!(sender = %sender_id, "Sender worker started");
    loop {
        let msg = match tokio::time::timeout(worker.idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => match worker.retire(&mut rx) {
                Some(msg) => msg,
                None => {
                    debug!(sender = %sender_id, "Sender worker idle; retiring");
                    break;
                }
            },
        };
        let outcome = worker.dispatcher.handle(msg).await;
        debug!(sender = %sender_id, ?outcome, "Exchange finished");
    }
    info!(sender = %sender_id, "Sender worker stopped");
}
