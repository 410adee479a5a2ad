//! Per-engine batch queue of pending handler calls.
//!
//! Entries are grouped into one bucket per action name. Draining takes the
//! whole queue out before any handler runs, so a handler that enqueues more
//! work (directly or through a state notification) never lands in the batch
//! currently being iterated. That work is picked up by the next cycle, or by
//! a nested drain started from the notification path.

use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::types::{Args, Key};

/// A pending handler call. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct QueueEntry<H> {
    pub action: String,
    pub args: Args,
    pub key: Key,
    pub handler: H,
}

impl<H> QueueEntry<H> {
    /// Duplicates share deep-equal args and equal keys (two null keys match).
    pub fn duplicates(&self, other: &QueueEntry<H>) -> bool {
        self.args == other.args && self.key == other.key
    }
}

/// Entries taken out of the queue for one drain cycle, already deduplicated.
#[derive(Debug)]
pub struct Batch<H> {
    pub entries: Vec<QueueEntry<H>>,
    pub deduped: usize,
}

impl<H> Batch<H> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct DispatchQueue<H> {
    buckets: BTreeMap<String, Vec<QueueEntry<H>>>,
}

impl<H> DispatchQueue<H> {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    pub fn enqueue(&mut self, entry: QueueEntry<H>) {
        debug!(action = %entry.action, args = %entry.args, "enqueue");
        self.buckets
            .entry(entry.action.clone())
            .or_default()
            .push(entry);
    }

    /// Number of queued entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// Empty the queue and return its entries, bucket by bucket in action
    /// name order, keeping the first of any duplicates within a bucket.
    pub fn take_batch(&mut self) -> Batch<H> {
        let buckets = std::mem::take(&mut self.buckets);
        let mut entries = Vec::new();
        let mut deduped = 0;

        for (action, bucket) in buckets {
            let mut unique: Vec<QueueEntry<H>> = Vec::with_capacity(bucket.len());
            for entry in bucket {
                if unique.iter().any(|kept| kept.duplicates(&entry)) {
                    debug!(action = %action, args = %entry.args, "dropping duplicate entry");
                    deduped += 1;
                    continue;
                }
                unique.push(entry);
            }
            entries.extend(unique);
        }

        Batch { entries, deduped }
    }
}

impl<H> Default for DispatchQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler call that returned an error during drain.
#[derive(Debug)]
pub struct HandlerFailure {
    pub action: String,
    pub args: Args,
    pub error: anyhow::Error,
}

/// What a drain did.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Batches taken until the queue stayed empty.
    pub cycles: u32,
    /// Handlers invoked, failed ones included.
    pub invoked: usize,
    /// Entries dropped as duplicates.
    pub deduped: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DrainReport {
    pub fn merge(&mut self, other: DrainReport) {
        self.cycles += other.cycles;
        self.invoked += other.invoked;
        self.deduped += other.deduped;
        self.failures.extend(other.failures);
    }
}

/// Drain `queue` until it is empty, calling `invoke` once per surviving entry.
///
/// No borrow of `queue` is held while `invoke` runs, so handlers may enqueue
/// (or start a nested drain) freely. A failing handler is recorded and the
/// remaining entries still run. Draining an empty queue does nothing.
pub fn drain<H, F>(queue: &RefCell<DispatchQueue<H>>, mut invoke: F) -> DrainReport
where
    F: FnMut(&QueueEntry<H>) -> Result<()>,
{
    let mut report = DrainReport::default();
    loop {
        let batch = queue.borrow_mut().take_batch();
        if batch.is_empty() {
            break;
        }
        report.cycles += 1;
        report.deduped += batch.deduped;

        for entry in batch.entries {
            report.invoked += 1;
            if let Err(err) = invoke(&entry) {
                let error =
                    err.context(format!("action '{}' failed with args {}", entry.action, entry.args));
                warn!(action = %entry.action, args = %entry.args, err = %error, "handler failed");
                report.failures.push(HandlerFailure {
                    action: entry.action,
                    args: entry.args,
                    error,
                });
            }
        }
    }
    report
}
