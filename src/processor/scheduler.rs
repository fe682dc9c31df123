//! The processor's single timer task.
//!
//! All timed work — reconnect attempts, throttled sends, delayed force
//! disconnects, the daily NAMES refresh — goes through one scheduler that
//! keeps a heap of `(fire-at, handle)` records. Scheduling returns a handle
//! that cancels the entry; shutting the scheduler down cancels everything.

use crate::processor::Processor;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

/// A deferred piece of work.
#[derive(Debug)]
pub enum ScheduledAction {
    /// Dial the next server of a profile.
    ReconnectAttempt {
        /// Profile to attempt.
        profile: String,
    },
    /// Emit a control line that was delayed by the send throttle.
    ThrottledSend {
        /// Complete control-port line (`send <id> <payload>`).
        line: Vec<u8>,
    },
    /// Force-close a connection that was asked to QUIT but lingered.
    ForceDisconnect {
        /// Target connection.
        connection_id: u64,
    },
    /// Issue NAMES on every joined channel, then reschedule itself.
    NamesRefresh,
}

enum SchedulerMsg {
    Schedule {
        id: u64,
        at: Instant,
        action: ScheduledAction,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

/// Cancellation handle for one scheduled entry.
#[derive(Debug)]
pub struct TimerHandle(u64);

/// Cloneable handle to the scheduler task.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<SchedulerMsg>,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Schedule `action` to fire at `at`.
    pub fn schedule(&self, at: Instant, action: ScheduledAction) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(SchedulerMsg::Schedule { id, at, action });
        TimerHandle(id)
    }

    /// Schedule `action` to fire after `delay`.
    pub fn schedule_after(&self, delay: Duration, action: ScheduledAction) -> TimerHandle {
        self.schedule(Instant::now() + delay, action)
    }

    /// Cancel a pending entry; firing already-fired entries is a no-op.
    pub fn cancel(&self, handle: TimerHandle) {
        let _ = self.tx.send(SchedulerMsg::Cancel { id: handle.0 });
    }

    /// Stop the task, cancelling all pending entries.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerMsg::Shutdown);
    }
}

/// Spawn the scheduler task for `processor`.
pub fn spawn_scheduler(processor: Arc<Processor>) -> Scheduler {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_scheduler(processor, rx));
    Scheduler {
        tx,
        next_id: Arc::new(AtomicU64::new(0)),
    }
}

async fn run_scheduler(processor: Arc<Processor>, mut rx: mpsc::UnboundedReceiver<SchedulerMsg>) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut actions: HashMap<u64, ScheduledAction> = HashMap::new();

    loop {
        // Skip heads whose entries were cancelled.
        while let Some(Reverse((_, id))) = heap.peek() {
            if actions.contains_key(id) {
                break;
            }
            heap.pop();
        }
        let next_at = heap.peek().map(|Reverse((at, _))| *at);

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(SchedulerMsg::Schedule { id, at, action }) => {
                    actions.insert(id, action);
                    heap.push(Reverse((at, id)));
                }
                Some(SchedulerMsg::Cancel { id }) => {
                    actions.remove(&id);
                }
                Some(SchedulerMsg::Shutdown) | None => {
                    debug!(pending = actions.len(), "Scheduler stopped");
                    return;
                }
            },
            _ = async { sleep_until(next_at.unwrap_or_else(Instant::now)).await },
                if next_at.is_some() =>
            {
                if let Some(Reverse((_, id))) = heap.pop() {
                    if let Some(action) = actions.remove(&id) {
                        processor.fire(action);
                    }
                }
            }
        }
    }
}
