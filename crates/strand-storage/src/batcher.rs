//! Write-coalescing batcher for gossip evidence
//!
//! Echo/Ready evidence arrives one key at a time from many RPC handlers;
//! writing each key in its own RocksDB transaction would serialize the whole
//! node on fsync. The batcher buffers puts and flushes them in one
//! `WriteBatch` at 100 entries or every 250 ms, whichever comes first.
//!
//! Evidence is advisory: a batch lost to a crash is reinstated by the
//! sender's next retry, so flush failures are logged and dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use strand_core::constants::{BATCH_FLUSH_INTERVAL, BATCH_MAX_ENTRIES};

use crate::kv::KvStore;

/// One buffered put
#[derive(Clone, Debug)]
pub struct BatchPut {
    /// Target bucket
    pub cf: &'static str,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Handle to the background flush task
pub struct Batcher {
    tx: Mutex<Option<mpsc::Sender<BatchPut>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    /// Spawn the flush task against an open KV store
    pub fn spawn(kv: Arc<KvStore>) -> Self {
        let (tx, rx) = mpsc::channel(BATCH_MAX_ENTRIES * 4);
        let handle = tokio::spawn(flush_loop(kv, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Buffer one put; returns once the put is queued, not flushed
    pub async fn put(&self, put: BatchPut) {
        // After shutdown the feed is gone; the evidence is advisory, so the
        // put is simply dropped.
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(put).await;
        }
    }

    /// Close the feed and wait for the final flush
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn flush_loop(kv: Arc<KvStore>, mut rx: mpsc::Receiver<BatchPut>) {
    let mut interval = tokio::time::interval(BATCH_FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buffer: Vec<BatchPut> = Vec::with_capacity(BATCH_MAX_ENTRIES);

    loop {
        tokio::select! {
            put = rx.recv() => match put {
                Some(put) => {
                    buffer.push(put);
                    if buffer.len() >= BATCH_MAX_ENTRIES {
                        flush(&kv, &mut buffer);
                    }
                }
                None => {
                    flush(&kv, &mut buffer);
                    break;
                }
            },
            _ = interval.tick() => {
                if !buffer.is_empty() {
                    flush(&kv, &mut buffer);
                }
            }
        }
    }
}

fn flush(kv: &KvStore, buffer: &mut Vec<BatchPut>) {
    if buffer.is_empty() {
        return;
    }

    let puts: Vec<(String, Vec<u8>, Vec<u8>)> = buffer
        .drain(..)
        .map(|p| (p.cf.to_string(), p.key, p.value))
        .collect();

    if let Err(e) = kv.write_batch(&puts) {
        tracing::warn!("evidence batch flush failed, {} puts dropped: {}", puts.len(), e);
    }
}
