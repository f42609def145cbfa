//! Batches events before handing them to the exporter.
//!
//! Built on `tokio::sync::mpsc`: many producers (the listeners), one consumer (the exporter),
//! flushed on whichever comes first of `batch_size` or `flush_interval`. The channel is bounded
//! by `queue_size`; a listener that outruns the exporter drops the event rather than blocking
//! its read loop.

use crate::event::{Batch, Event};
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

/// The sending half, cloned into every listener task.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Event>,
    metrics: Arc<Metrics>,
}

impl QueueSender {
    /// Enqueues a single decoded event. Never blocks: a full queue drops the event and counts
    /// it, rather than backpressuring the listener's read loop.
    pub fn send(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            self.metrics.events_error_total.with_label_values(&["queue_full"]).inc();
        }
    }
}

/// The batching receiver, owned by the exporter task.
pub struct EventQueue {
    rx: mpsc::Receiver<Event>,
    batch_size: usize,
    flush_interval: Duration,
}

impl EventQueue {
    /// Creates a queue with a channel capacity of `queue_size`, that flushes whenever
    /// `batch_size` events have accumulated, or `flush_interval` has elapsed since the last
    /// flush — whichever comes first.
    pub fn new(queue_size: usize, batch_size: usize, flush_interval: Duration, metrics: Arc<Metrics>) -> (QueueSender, Self) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        (
            QueueSender { tx, metrics },
            Self {
                rx,
                batch_size: batch_size.max(1),
                flush_interval,
            },
        )
    }

    /// Waits for and returns the next batch. Returns an empty batch if `flush_interval`
    /// elapses with nothing queued, and `None`
    /// once the sender side has been dropped (process shutdown).
    pub async fn next_batch(&mut self) -> Option<Batch> {
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; consume it up front

        let mut batch = Vec::new();
        loop {
            tokio::select! {
                biased;
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= self.batch_size {
                                return Some(batch);
                            }
                        }
                        None => {
                            return if batch.is_empty() { None } else { Some(batch) };
                        }
                    }
                }
                _ = ticker.tick() => {
                    return Some(batch);
                }
            }
        }
    }

    /// Number of events currently buffered on the channel, for diagnostics.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::collections::BTreeMap;

    fn counter(name: &str) -> Event {
        Event::Counter {
            name: name.to_owned(),
            value: 1.0,
            labels: BTreeMap::new(),
        }
    }

    fn new_queue(batch_size: usize, flush_interval: Duration) -> (QueueSender, EventQueue) {
        EventQueue::new(1000, batch_size, flush_interval, crate::metrics::test_metrics())
    }

    #[tokio::test]
    async fn p7_flushes_on_threshold() {
        let (tx, mut queue) = new_queue(2, Duration::from_secs(60));
        tx.send(counter("a"));
        tx.send(counter("b"));
        tx.send(counter("c"));

        let batch = queue.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].name(), "a");
        assert_eq!(batch[1].name(), "b");
    }

    #[tokio::test]
    async fn p7_flushes_on_interval_even_if_empty() {
        let (_tx, mut queue) = new_queue(1000, Duration::from_millis(20));
        let batch = queue.next_batch().await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn p7_preserves_arrival_order_within_a_batch() {
        let (tx, mut queue) = new_queue(3, Duration::from_secs(60));
        tx.send(counter("one"));
        tx.send(counter("two"));
        tx.send(counter("three"));

        let batch = queue.next_batch().await.unwrap();
        let names: Vec<&str> = batch.iter().map(Event::name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn returns_none_after_sender_dropped_with_nothing_queued() {
        let (tx, mut queue) = new_queue(10, Duration::from_secs(60));
        drop(tx);
        assert!(queue.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts_the_event() {
        let metrics = crate::metrics::test_metrics();
        let (tx, mut queue) = EventQueue::new(1, 10, Duration::from_secs(60), Arc::clone(&metrics));
        tx.send(counter("kept"));
        tx.send(counter("dropped"));

        assert_eq!(metrics.events_error_total.with_label_values(&["queue_full"]).get(), 1);
        drop(tx);
        let batch = queue.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
