//! Rendezvous barrier for the queue-status event burst.
//!
//! `QueueStatus` has no single response; the membership dump arrives
//! as a burst of `QueueMember` events closed by `QueueStatusComplete`.
//! The barrier buffers the burst in a per-cycle channel and hands the
//! receiver over only when the completion event lands, so the
//! reconciler sees either a complete dump or a timeout, never a
//! partial one.
//!
//! Bursts carry a generation number. A completion that arrives after
//! its cycle already timed out parks a receiver from an old
//! generation; the awaiter discards it instead of mistaking it for the
//! current dump.

use ami_client::{AmiClient, AmiFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::warn;

/// Upper bound on buffered membership events per burst.
const BURST_CAPACITY: usize = 4096;

pub struct StatusBarrier {
    /// Bumped by every `begin_burst`; stamps the burst it opens.
    generation: AtomicU64,
    /// Sender half of the current burst, present between begin and
    /// complete.
    burst_tx: Mutex<Option<mpsc::Sender<AmiFrame>>>,
    /// Receiver half of the current burst with its generation, parked
    /// until completion.
    burst_rx: Mutex<Option<(u64, mpsc::Receiver<AmiFrame>)>>,
    /// The finished burst, waiting for the awaiter to collect it.
    completed: Mutex<Option<(u64, mpsc::Receiver<AmiFrame>)>>,
    notify: Notify,
}

impl StatusBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(0),
            burst_tx: Mutex::new(None),
            burst_rx: Mutex::new(None),
            completed: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Install the barrier's event handlers on a client. Handlers run
    /// inline on the read loop and only do non-blocking channel sends.
    pub fn register(self: &Arc<Self>, client: &AmiClient) {
        let barrier = Arc::clone(self);
        client.register_event_handler("QueueMember", move |frame| barrier.on_member(frame));
        let barrier = Arc::clone(self);
        client.register_event_handler("QueueStatusComplete", move |_| barrier.on_complete());
    }

    /// Open a fresh burst. Any unfinished or uncollected previous
    /// burst is discarded here.
    pub fn begin_burst(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(BURST_CAPACITY);
        *self.burst_tx.lock().unwrap() = Some(tx);
        *self.burst_rx.lock().unwrap() = Some((generation, rx));
        self.completed.lock().unwrap().take();
    }

    pub fn on_member(&self, frame: &AmiFrame) {
        let guard = self.burst_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(frame.clone()).is_err() {
                warn!("Queue status burst overflow, membership event dropped");
            }
        }
        // Events outside a burst belong to someone else's QueueStatus.
    }

    pub fn on_complete(&self) {
        // Closing the sender marks the end of the dump; the parked
        // receiver then drains to completion.
        self.burst_tx.lock().unwrap().take();
        let parked = self.burst_rx.lock().unwrap().take();
        if let Some((generation, rx)) = parked {
            *self.completed.lock().unwrap() = Some((generation, rx));
            self.notify.notify_one();
        }
    }

    /// Wait for the current burst to finish. None on timeout. A late
    /// completion from an earlier generation is discarded, never
    /// returned as the current dump.
    pub async fn await_complete(&self, timeout: Duration) -> Option<mpsc::Receiver<AmiFrame>> {
        let current = self.generation.load(Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut slot = self.completed.lock().unwrap();
                if let Some((generation, rx)) = slot.take() {
                    if generation == current {
                        return Some(rx);
                    }
                    warn!(generation, current, "Discarding stale queue status burst");
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(queue: &str, name: &str) -> AmiFrame {
        AmiFrame::from_fields(vec![
            ("Event".to_string(), "QueueMember".to_string()),
            ("Queue".to_string(), queue.to_string()),
            ("Name".to_string(), name.to_string()),
        ])
    }

    async fn drain(mut rx: mpsc::Receiver<AmiFrame>) -> Vec<String> {
        let mut queues = Vec::new();
        while let Some(frame) = rx.recv().await {
            queues.push(frame.get_or_empty("Queue").to_string());
        }
        queues
    }

    #[tokio::test]
    async fn burst_is_handed_over_on_completion() {
        let barrier = StatusBarrier::new();
        barrier.begin_burst();
        barrier.on_member(&member("myqueue1", "SIP/6916ua"));
        barrier.on_member(&member("myqueue2", "SIP/1007kz"));
        barrier.on_complete();

        let rx = barrier
            .await_complete(Duration::from_millis(100))
            .await
            .expect("completed burst");
        assert_eq!(drain(rx).await, ["myqueue1", "myqueue2"]);
    }

    #[tokio::test]
    async fn missing_completion_times_out() {
        let barrier = StatusBarrier::new();
        barrier.begin_burst();
        barrier.on_member(&member("myqueue1", "SIP/6916ua"));

        assert!(barrier
            .await_complete(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn events_outside_a_burst_are_ignored() {
        let barrier = StatusBarrier::new();
        barrier.on_member(&member("myqueue1", "SIP/6916ua"));
        barrier.on_complete();

        assert!(barrier
            .await_complete(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn late_completion_does_not_leak_into_the_next_cycle() {
        let barrier = StatusBarrier::new();

        // First cycle: the dump stalls and the awaiter gives up.
        barrier.begin_burst();
        barrier.on_member(&member("oldqueue", "SIP/6916ua"));
        assert!(barrier
            .await_complete(Duration::from_millis(20))
            .await
            .is_none());

        // The completion event straggles in after the timeout.
        barrier.on_complete();

        // Second cycle must see its own dump, not the first one's.
        barrier.begin_burst();
        barrier.on_member(&member("newqueue", "SIP/6916ua"));
        barrier.on_complete();

        let rx = barrier
            .await_complete(Duration::from_millis(100))
            .await
            .expect("completed burst");
        assert_eq!(drain(rx).await, ["newqueue"]);

        // And the stale burst is gone for good.
        barrier.begin_burst();
        barrier.on_member(&member("thirdqueue", "SIP/6916ua"));
        barrier.on_complete();
        let rx = barrier
            .await_complete(Duration::from_millis(100))
            .await
            .expect("completed burst");
        assert_eq!(drain(rx).await, ["thirdqueue"]);
    }

    #[tokio::test]
    async fn stale_burst_parked_before_await_is_discarded() {
        let barrier = StatusBarrier::new();

        // Completion lands while nobody is awaiting; the receiver sits
        // in the parked slot until the next begin_burst clears it.
        barrier.begin_burst();
        barrier.on_member(&member("oldqueue", "SIP/6916ua"));
        barrier.on_complete();

        barrier.begin_burst();
        barrier.on_member(&member("newqueue", "SIP/6916ua"));
        barrier.on_complete();

        let rx = barrier
            .await_complete(Duration::from_millis(100))
            .await
            .expect("completed burst");
        assert_eq!(drain(rx).await, ["newqueue"]);
    }
}
