use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::cache::{CacheEntry, CacheKey, CacheStatus, MessageCache};
use crate::dns::DNSPacket;
use crate::resolver::RouteTables;
use crate::upstream::UpstreamClient;

/// Both pipeline channels are bounded here; producers drop instead of block.
pub const CHANNEL_CAPACITY: usize = 1024;

/// The insert worker amortizes GC onto write traffic.
const GC_EVERY_INSERTS: u64 = 100;

/// Producer handles for the two background workers. Sends are `try_send`
/// everywhere: a full or closed channel must never stall or panic the
/// query path.
#[derive(Clone)]
pub struct RefreshPipeline {
    expire_tx: mpsc::Sender<DNSPacket>,
    insert_tx: mpsc::Sender<CacheEntry>,
}

impl RefreshPipeline {
    /// Queue a request whose cached answer went stale. Dropped silently
    /// when the queue is full; the stale entry keeps serving.
    pub fn schedule_refresh(&self, req: DNSPacket) {
        if let Err(err) = self.expire_tx.try_send(req) {
            trace!("refresh queue rejected request: {}", err);
        }
    }

    /// Queue a freshly built entry for insertion.
    pub fn schedule_insert(&self, entry: CacheEntry) {
        if let Err(err) = self.insert_tx.try_send(entry) {
            trace!("insert queue rejected entry: {}", err);
        }
    }
}

/// Start the two singleton workers. They run until the shutdown broadcast
/// fires or every producer handle is gone.
pub fn spawn(
    cache: Arc<MessageCache>,
    upstream: Arc<UpstreamClient>,
    tables: Arc<RwLock<RouteTables>>,
    shutdown: &broadcast::Sender<()>,
) -> RefreshPipeline {
    let (expire_tx, expire_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (insert_tx, insert_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(refresh_worker(
        expire_rx,
        insert_tx.clone(),
        Arc::clone(&cache),
        upstream,
        tables,
        shutdown.subscribe(),
    ));
    tokio::spawn(insert_worker(insert_rx, cache, shutdown.subscribe()));

    RefreshPipeline {
        expire_tx,
        insert_tx,
    }
}

/// Re-resolves requests whose cached answer expired: one attempt against a
/// round-robin upstream, no race. Failures are logged and dropped; the
/// stale entry keeps serving until a later attempt lands.
async fn refresh_worker(
    mut expire_rx: mpsc::Receiver<DNSPacket>,
    insert_tx: mpsc::Sender<CacheEntry>,
    cache: Arc<MessageCache>,
    upstream: Arc<UpstreamClient>,
    tables: Arc<RwLock<RouteTables>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut next_index: usize = 0;

    loop {
        let req = tokio::select! {
            _ = shutdown_rx.recv() => break,
            req = expire_rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        let Some(question) = req.first_question() else {
            continue;
        };
        let key = CacheKey::from_question(question);

        // Another request may have refreshed the entry in the meantime
        let (_, status) = cache.get(&key);
        if status != CacheStatus::Expired {
            trace!("skipping refresh of {}, status {:?}", key, status);
            continue;
        }

        let servers = { tables.read().servers_for(&question.fqdn()) };
        if servers.is_empty() {
            continue;
        }
        let addr = servers[next_index % servers.len()];
        next_index = next_index.wrapping_add(1);

        match upstream.single(&req, addr).await {
            Ok(entry) => {
                debug!("refreshed {} via {}", key, addr);
                if let Err(err) = insert_tx.try_send(entry) {
                    trace!("insert queue rejected refreshed entry: {}", err);
                }
            }
            Err(err) => {
                debug!("refresh of {} via {} failed: {}", key, addr, err);
            }
        }
    }

    debug!("refresh worker stopped");
}

/// Stores entries built by races and refreshes, and runs the amortized GC.
async fn insert_worker(
    mut insert_rx: mpsc::Receiver<CacheEntry>,
    cache: Arc<MessageCache>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut inserted: u64 = 0;

    loop {
        let entry = tokio::select! {
            _ = shutdown_rx.recv() => break,
            entry = insert_rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        let Some(question) = entry.answer.first_question() else {
            continue;
        };
        let key = CacheKey::from_question(question);

        if cache.set(key, entry) {
            inserted += 1;
            if inserted % GC_EVERY_INSERTS == 0 {
                cache.gc();
            }
        }
    }

    debug!("insert worker stopped");
}
