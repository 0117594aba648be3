use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Outcome of offering an item to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Buffered,
    /// The key's batch is mid-flush. The item is dropped, by policy: queueing
    /// behind a slow AI call would grow without bound.
    RejectedBusy,
}

struct PendingBatch<T> {
    items: Vec<T>,
    last_enqueued_at: Instant,
    flushing: bool,
}

/// Per-customer buffer that coalesces rapid-fire messages into one logical
/// turn. Each enqueue re-arms the debounce window; a batch becomes ready once
/// the window has passed with no further activity.
///
/// Readiness is poll-driven rather than timer-driven so the logic is testable
/// with explicit instants, the same way the gateway buffer in the inbound
/// loop works.
pub struct BurstAggregator<T> {
    batches: Mutex<HashMap<String, PendingBatch<T>>>,
    window: Duration,
}

impl<T> BurstAggregator<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn enqueue(&self, key: &str, item: T, now: Instant) -> EnqueueOutcome {
        let mut batches = self.batches.lock();
        let batch = batches.entry(key.to_string()).or_insert_with(|| PendingBatch {
            items: Vec::new(),
            last_enqueued_at: now,
            flushing: false,
        });
        if batch.flushing {
            return EnqueueOutcome::RejectedBusy;
        }
        batch.items.push(item);
        batch.last_enqueued_at = now;
        EnqueueOutcome::Buffered
    }

    /// Takes every batch whose debounce window has elapsed, marking those
    /// keys busy until `finish` is called for them.
    pub fn take_ready(&self, now: Instant) -> Vec<(String, Vec<T>)> {
        let mut batches = self.batches.lock();
        let mut ready = Vec::new();
        for (key, batch) in batches.iter_mut() {
            if !batch.flushing
                && !batch.items.is_empty()
                && now.duration_since(batch.last_enqueued_at) >= self.window
            {
                batch.flushing = true;
                ready.push((key.clone(), std::mem::take(&mut batch.items)));
            }
        }
        ready
    }

    /// Marks a key's flush as done. Must run on every exit path of the flush,
    /// success or failure, or the key stays busy forever.
    pub fn finish(&self, key: &str) {
        let mut batches = self.batches.lock();
        if let Some(batch) = batches.get_mut(key) {
            batch.flushing = false;
            if batch.items.is_empty() {
                batches.remove(key);
            }
        }
    }

    pub fn pending_keys(&self) -> usize {
        self.batches.lock().len()
    }
}

/// Arrival-order join with a blank line between bubbles, the shape one AI
/// turn receives.
pub fn join_batch(texts: &[String]) -> String {
    texts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(2);

    fn aggregator() -> BurstAggregator<String> {
        BurstAggregator::new(WINDOW)
    }

    #[test]
    fn burst_within_window_flushes_as_one_batch_in_order() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("cust", "hello".to_string(), t0);
        agg.enqueue("cust", "my light is broken".to_string(), t0 + Duration::from_secs(1));

        // window counts from the last enqueue
        assert!(agg.take_ready(t0 + Duration::from_millis(2500)).is_empty());

        let ready = agg.take_ready(t0 + Duration::from_secs(4));
        assert_eq!(ready.len(), 1);
        let (key, items) = &ready[0];
        assert_eq!(key, "cust");
        assert_eq!(items, &["hello".to_string(), "my light is broken".to_string()]);
        assert_eq!(join_batch(items), "hello\n\nmy light is broken");
    }

    #[test]
    fn each_enqueue_rearms_the_debounce_window() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("cust", "a".to_string(), t0);
        agg.enqueue("cust", "b".to_string(), t0 + Duration::from_millis(1900));
        agg.enqueue("cust", "c".to_string(), t0 + Duration::from_millis(3800));

        assert!(agg.take_ready(t0 + Duration::from_millis(4000)).is_empty());
        let ready = agg.take_ready(t0 + Duration::from_millis(5800));
        assert_eq!(ready[0].1.len(), 3);
    }

    #[test]
    fn enqueue_during_flush_is_dropped() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("cust", "a".to_string(), t0);
        let ready = agg.take_ready(t0 + Duration::from_secs(3));
        assert_eq!(ready.len(), 1);

        // flush in progress: new items are rejected, not queued
        let outcome = agg.enqueue("cust", "b".to_string(), t0 + Duration::from_secs(4));
        assert_eq!(outcome, EnqueueOutcome::RejectedBusy);

        agg.finish("cust");
        assert_eq!(
            agg.enqueue("cust", "c".to_string(), t0 + Duration::from_secs(5)),
            EnqueueOutcome::Buffered
        );
    }

    #[test]
    fn busy_key_is_not_taken_twice() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("cust", "a".to_string(), t0);
        assert_eq!(agg.take_ready(t0 + Duration::from_secs(3)).len(), 1);
        assert!(agg.take_ready(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn finish_removes_drained_keys() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("cust", "a".to_string(), t0);
        agg.take_ready(t0 + Duration::from_secs(3));
        agg.finish("cust");
        assert_eq!(agg.pending_keys(), 0);
    }

    #[test]
    fn customers_flush_independently() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.enqueue("a", "first".to_string(), t0);
        agg.enqueue("b", "second".to_string(), t0 + Duration::from_secs(1));

        let ready = agg.take_ready(t0 + Duration::from_millis(2100));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, "a");
    }
}
