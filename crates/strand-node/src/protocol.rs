//! # Per-object dispersal state machine
//!
//! Implements the verified-dispersal broadcast each storage node runs:
//!
//! 1. A Disperse pins the object's cross-checksum, verifies and persists the
//!    fragment, counts the node's own Echo, and gossips Echo to the peers.
//! 2. `m + f` distinct Echo senders trigger this node's Ready broadcast.
//! 3. `f + 1` distinct Ready senders also trigger it (amplification), so the
//!    cluster converges even when faulty peers suppress their Echos.
//! 4. `2f + 1` distinct Ready senders commit the object and wake every
//!    Disperse call waiting on it.
//!
//! Votes are deduplicated by the sender's configured identity. All state for
//! one object lives behind one mutex; different objects never contend.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use strand_core::{FragmentIndex, ObjectId, PeerId, QuorumParams, Result, StrandError};
use strand_crypto::Fpcc;
use strand_network::proto::{EchoRequest, ReadyRequest};
use strand_network::PeerClient;
use strand_storage::{
    BatchPut, Batcher, FragmentStore, KvStore, ObjectMeta, CF_ECHO_SEEN, CF_FPCCS, CF_META,
    CF_READY_SEEN,
};

/// In-memory record of one object's dispersal progress
struct ObjectEntry {
    inner: Mutex<ObjectInner>,
    /// Commit latch: fires once, every present and future waiter proceeds
    commit_tx: watch::Sender<bool>,
    commit_rx: watch::Receiver<bool>,
}

struct ObjectInner {
    /// The first cross-checksum accepted for this object, fixed once set
    fpcc: Fpcc,
    echo_senders: HashSet<PeerId>,
    ready_senders: HashSet<PeerId>,
    ready_sent: bool,
    committed: bool,
    created_at_ms: i64,
    blob_len: u64,
}

/// Counters exposed for logging and tests
#[derive(Clone, Debug, Default)]
pub struct ProtocolStats {
    pub disperses: u64,
    pub echoes: u64,
    pub readies: u64,
    pub commits: u64,
    pub integrity_failures: u64,
    pub fpcc_mismatches: u64,
}

/// The dispersal state machine of one storage node
pub struct DispersalProtocol {
    params: QuorumParams,
    self_id: PeerId,
    peers: Vec<PeerId>,
    disperse_timeout: Duration,

    objects: DashMap<ObjectId, Arc<ObjectEntry>>,
    kv: Arc<KvStore>,
    fragments: Arc<FragmentStore>,
    batcher: Batcher,
    client: PeerClient,
    stats: RwLock<ProtocolStats>,
}

impl DispersalProtocol {
    /// Build the state machine over open stores
    ///
    /// `peers` is the full cluster membership, this node included.
    pub fn new(
        params: QuorumParams,
        self_id: PeerId,
        peers: Vec<PeerId>,
        kv: Arc<KvStore>,
        fragments: Arc<FragmentStore>,
        disperse_timeout: Duration,
    ) -> Self {
        let batcher = Batcher::spawn(kv.clone());
        Self {
            params,
            self_id,
            peers,
            disperse_timeout,
            objects: DashMap::new(),
            kv,
            fragments,
            batcher,
            client: PeerClient::new(),
            stats: RwLock::new(ProtocolStats::default()),
        }
    }

    /// The quorum geometry this node runs
    pub fn params(&self) -> QuorumParams {
        self.params
    }

    /// Counter snapshot
    pub fn stats(&self) -> ProtocolStats {
        self.stats.read().clone()
    }

    /// Rebuild per-object state from the durable buckets after a restart
    ///
    /// Fragments on disk are discovered lazily by Retrieve.
    pub fn warm_up(&self) -> Result<usize> {
        let mut restored = 0;

        for (key, value) in self.kv.scan(CF_FPCCS)? {
            let Ok(id) = String::from_utf8(key) else {
                continue;
            };
            let Ok(object) = ObjectId::new(id) else {
                continue;
            };
            let Some(fpcc) = Fpcc::from_bytes(&value) else {
                tracing::warn!("skipping undecodable checksum for {}", object);
                continue;
            };

            let meta = match self.kv.get(CF_META, object.as_bytes())? {
                Some(bytes) => ObjectMeta::from_bytes(&bytes)?,
                None => ObjectMeta {
                    created_at_ms: chrono::Utc::now().timestamp_millis(),
                    blob_len: 0,
                },
            };

            let echo_senders = self.restore_senders(CF_ECHO_SEEN, &object)?;
            let ready_senders = self.restore_senders(CF_READY_SEEN, &object)?;
            let committed = ready_senders.len() >= self.params.ready_threshold();
            let ready_sent = ready_senders.contains(&self.self_id);

            let (commit_tx, commit_rx) = watch::channel(committed);
            let entry = Arc::new(ObjectEntry {
                inner: Mutex::new(ObjectInner {
                    fpcc,
                    echo_senders,
                    ready_senders,
                    ready_sent,
                    committed,
                    created_at_ms: meta.created_at_ms,
                    blob_len: meta.blob_len,
                }),
                commit_tx,
                commit_rx,
            });
            self.objects.insert(object, entry);
            restored += 1;
        }

        Ok(restored)
    }

    fn restore_senders(&self, cf: &'static str, object: &ObjectId) -> Result<HashSet<PeerId>> {
        let prefix = KvStore::evidence_prefix(object);
        let mut senders = HashSet::new();
        for (key, _) in self.kv.scan_prefix(cf, &prefix)? {
            if let Ok(peer) = String::from_utf8(key[prefix.len()..].to_vec()) {
                senders.insert(peer);
            }
        }
        Ok(senders)
    }

    /// Handle a client Disperse: pin, verify, persist, gossip, wait for commit
    pub async fn handle_disperse(
        &self,
        object: ObjectId,
        index: FragmentIndex,
        fragment: Vec<u8>,
        fpcc: Fpcc,
        blob_len: u64,
    ) -> Result<()> {
        self.check_shape(index, &fpcc)?;
        self.stats.write().disperses += 1;

        let entry = self.get_or_create(&object, &fpcc, true)?;

        // Pin check and self-Echo under the object lock
        {
            let mut inner = entry.inner.lock();
            if inner.fpcc != fpcc {
                drop(inner);
                self.stats.write().fpcc_mismatches += 1;
                return Err(StrandError::FpccMismatch(object.to_string()));
            }
            inner.echo_senders.insert(self.self_id.clone());
        }

        if !fpcc.verify(index as usize, &fragment) {
            self.stats.write().integrity_failures += 1;
            return Err(StrandError::IntegrityFailure {
                object: object.to_string(),
                index,
            });
        }

        // The checksum does not cover blob_len, so only a sender who proved
        // a verified fragment may record the object's length
        let meta_update = {
            let mut inner = entry.inner.lock();
            if inner.blob_len == 0 && blob_len > 0 {
                inner.blob_len = blob_len;
                Some(ObjectMeta {
                    created_at_ms: inner.created_at_ms,
                    blob_len,
                })
            } else {
                None
            }
        };
        if let Some(meta) = meta_update {
            self.kv.put(CF_META, object.as_bytes(), &meta.to_bytes())?;
        }

        self.fragments.put(&object, index, &fragment)?;

        self.spawn_echo_broadcast(&object, &fpcc);
        self.persist_evidence(CF_ECHO_SEEN, &object, &self.self_id).await;

        // Suspend until the cluster commits or the deadline passes. The
        // response is advisory: commit may still happen after a timeout.
        let mut commit_rx = entry.commit_rx.clone();
        match tokio::time::timeout(self.disperse_timeout, commit_rx.wait_for(|done| *done)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(StrandError::CommitTimeout(object.to_string())),
        }
    }

    /// Handle an Echo vote from `sender`
    pub async fn handle_echo(&self, object: ObjectId, fpcc: Fpcc, sender: PeerId) -> Result<()> {
        self.check_sender_shape(&sender, &fpcc)?;
        self.stats.write().echoes += 1;

        let entry = self.get_or_create(&object, &fpcc, false)?;

        let send_ready = {
            let mut inner = entry.inner.lock();
            if inner.fpcc != fpcc {
                drop(inner);
                self.stats.write().fpcc_mismatches += 1;
                return Err(StrandError::FpccMismatch(object.to_string()));
            }
            inner.echo_senders.insert(sender.clone());
            if inner.echo_senders.len() >= self.params.echo_threshold() && !inner.ready_sent {
                inner.ready_sent = true;
                true
            } else {
                false
            }
        };

        self.persist_evidence(CF_ECHO_SEEN, &object, &sender).await;

        if send_ready {
            self.send_own_ready(&entry, &object, &fpcc).await;
        }
        Ok(())
    }

    /// Handle a Ready vote from `sender`
    pub async fn handle_ready(&self, object: ObjectId, fpcc: Fpcc, sender: PeerId) -> Result<()> {
        self.check_sender_shape(&sender, &fpcc)?;
        self.stats.write().readies += 1;

        let entry = self.get_or_create(&object, &fpcc, false)?;

        let (amplify, commit) = {
            let mut inner = entry.inner.lock();
            if inner.fpcc != fpcc {
                drop(inner);
                self.stats.write().fpcc_mismatches += 1;
                return Err(StrandError::FpccMismatch(object.to_string()));
            }
            inner.ready_senders.insert(sender.clone());

            // Amplification: f + 1 Readies prove at least one correct node
            // passed the Echo threshold, so this node may vote too.
            let amplify = inner.ready_senders.len() >= self.params.amplify_threshold()
                && !inner.ready_sent;
            if amplify {
                inner.ready_sent = true;
            }

            let commit = inner.ready_senders.len() >= self.params.ready_threshold()
                && !inner.committed;
            if commit {
                inner.committed = true;
            }
            (amplify, commit)
        };

        self.persist_evidence(CF_READY_SEEN, &object, &sender).await;

        if commit {
            self.commit(&entry, &object);
        }
        if amplify {
            self.send_own_ready(&entry, &object, &fpcc).await;
        }
        Ok(())
    }

    /// Handle a Retrieve: fragment plus pinned checksum, read-only
    pub fn handle_retrieve(
        &self,
        object: &ObjectId,
        index: FragmentIndex,
    ) -> Result<(Vec<u8>, Fpcc, u64)> {
        let entry = self
            .objects
            .get(object)
            .map(|e| e.value().clone())
            .ok_or_else(|| StrandError::NotFound {
                object: object.to_string(),
                index,
            })?;

        let (fpcc, blob_len) = {
            let inner = entry.inner.lock();
            (inner.fpcc.clone(), inner.blob_len)
        };
        let fragment = self.fragments.get(object, index)?;
        Ok((fragment, fpcc, blob_len))
    }

    /// Tear down one object everywhere: fragments, checksum, evidence, meta
    pub fn evict(&self, object: &ObjectId) -> Result<()> {
        self.fragments.delete(object)?;
        self.kv.delete(CF_FPCCS, object.as_bytes())?;
        self.kv
            .delete_prefix(CF_ECHO_SEEN, &KvStore::evidence_prefix(object))?;
        self.kv
            .delete_prefix(CF_READY_SEEN, &KvStore::evidence_prefix(object))?;
        self.kv.delete(CF_META, object.as_bytes())?;
        self.objects.remove(object);
        Ok(())
    }

    /// Evict every object older than `ttl`; best-effort per object
    pub fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut evicted = 0;

        for (key, value) in self.kv.scan(CF_META)? {
            let Ok(id) = String::from_utf8(key) else {
                continue;
            };
            let Ok(object) = ObjectId::new(id) else {
                continue;
            };
            let meta = match ObjectMeta::from_bytes(&value) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("skipping undecodable meta for {}: {}", object, e);
                    continue;
                }
            };

            if now_ms - meta.created_at_ms > ttl.as_millis() as i64 {
                match self.evict(&object) {
                    Ok(()) => {
                        tracing::info!("evicted expired object {}", object);
                        evicted += 1;
                    }
                    Err(e) => {
                        tracing::warn!("eviction of {} failed, retrying next tick: {}", object, e);
                    }
                }
            }
        }

        Ok(evicted)
    }

    /// Flush buffered evidence and stop the batcher
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
    }

    fn check_shape(&self, index: FragmentIndex, fpcc: &Fpcc) -> Result<()> {
        if index as usize >= self.params.total {
            return Err(StrandError::InvalidParameters(format!(
                "fragment index {} outside [0, {})",
                index, self.params.total
            )));
        }
        if fpcc.fragment_count() != self.params.total {
            return Err(StrandError::InvalidParameters(format!(
                "checksum covers {} fragments, cluster uses {}",
                fpcc.fragment_count(),
                self.params.total
            )));
        }
        Ok(())
    }

    fn check_sender_shape(&self, sender: &PeerId, fpcc: &Fpcc) -> Result<()> {
        if sender.is_empty() {
            return Err(StrandError::InvalidParameters(
                "vote carries no sender identity".to_string(),
            ));
        }
        if fpcc.fragment_count() != self.params.total {
            return Err(StrandError::InvalidParameters(format!(
                "checksum covers {} fragments, cluster uses {}",
                fpcc.fragment_count(),
                self.params.total
            )));
        }
        Ok(())
    }

    /// Fetch the object's entry, creating and pinning it on first contact
    ///
    /// Entries start with an unknown blob length; only a Disperse whose
    /// fragment verified fills it in.
    fn get_or_create(
        &self,
        object: &ObjectId,
        fpcc: &Fpcc,
        count_self_echo: bool,
    ) -> Result<Arc<ObjectEntry>> {
        use dashmap::mapref::entry::Entry;

        match self.objects.entry(object.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let created_at_ms = chrono::Utc::now().timestamp_millis();
                let mut echo_senders = HashSet::new();
                if count_self_echo {
                    echo_senders.insert(self.self_id.clone());
                }

                let (commit_tx, commit_rx) = watch::channel(false);
                let entry = Arc::new(ObjectEntry {
                    inner: Mutex::new(ObjectInner {
                        fpcc: fpcc.clone(),
                        echo_senders,
                        ready_senders: HashSet::new(),
                        ready_sent: false,
                        committed: false,
                        created_at_ms,
                        blob_len: 0,
                    }),
                    commit_tx,
                    commit_rx,
                });

                // Pin durably before the entry becomes visible; both writes
                // are idempotent and a re-pin never overwrites.
                self.kv.put(CF_FPCCS, object.as_bytes(), &fpcc.to_bytes())?;
                self.kv.put(
                    CF_META,
                    object.as_bytes(),
                    &ObjectMeta {
                        created_at_ms,
                        blob_len: 0,
                    }
                    .to_bytes(),
                )?;

                vacant.insert(entry.clone());
                tracing::debug!("pinned checksum for new object {}", object);
                Ok(entry)
            }
        }
    }

    /// Record our own Ready vote and gossip it to the other peers
    async fn send_own_ready(&self, entry: &Arc<ObjectEntry>, object: &ObjectId, fpcc: &Fpcc) {
        // Count the local vote directly instead of dialing ourselves
        let commit = {
            let mut inner = entry.inner.lock();
            inner.ready_senders.insert(self.self_id.clone());
            let commit =
                inner.ready_senders.len() >= self.params.ready_threshold() && !inner.committed;
            if commit {
                inner.committed = true;
            }
            commit
        };

        self.persist_evidence(CF_READY_SEEN, object, &self.self_id).await;

        if commit {
            self.commit(entry, object);
        }
        self.spawn_ready_broadcast(object, fpcc);
    }

    fn commit(&self, entry: &Arc<ObjectEntry>, object: &ObjectId) {
        let _ = entry.commit_tx.send(true);
        self.stats.write().commits += 1;
        tracing::info!("object {} committed", object);
    }

    async fn persist_evidence(&self, cf: &'static str, object: &ObjectId, sender: &PeerId) {
        self.batcher
            .put(BatchPut {
                cf,
                key: KvStore::evidence_key(object, sender),
                value: vec![1],
            })
            .await;
    }

    /// Fire-and-forget Echo to every other peer
    fn spawn_echo_broadcast(&self, object: &ObjectId, fpcc: &Fpcc) {
        let request = EchoRequest {
            object_id: object.to_string(),
            fpcc: Some(fpcc.into()),
            sender: self.self_id.clone(),
        };
        for peer in self.peers.iter().filter(|p| **p != self.self_id) {
            let peer = peer.clone();
            let client = self.client.clone();
            let request = request.clone();
            tokio::spawn(async move {
                if let Err(e) = client.echo(&peer, request).await {
                    tracing::debug!("echo to {} dropped: {}", peer, e);
                }
            });
        }
    }

    /// Fire-and-forget Ready to every other peer
    fn spawn_ready_broadcast(&self, object: &ObjectId, fpcc: &Fpcc) {
        let request = ReadyRequest {
            object_id: object.to_string(),
            fpcc: Some(fpcc.into()),
            sender: self.self_id.clone(),
        };
        for peer in self.peers.iter().filter(|p| **p != self.self_id) {
            let peer = peer.clone();
            let client = self.client.clone();
            let request = request.clone();
            tokio::spawn(async move {
                if let Err(e) = client.ready(&peer, request).await {
                    tracing::debug!("ready to {} dropped: {}", peer, e);
                }
            });
        }
    }
}
