use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use crate::dns::{DNSPacket, DNSQuestion, RecordType};

/// How long an expired entry may linger before `gc` removes it. Expired
/// entries are kept around on purpose: they are the stale answers served
/// while a background refresh is in flight.
const GC_RETENTION_SECS: u64 = 86_400;

/// Wall clock in whole seconds since the epoch.
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Identity of a cached answer: dot-terminated lowercased owner name plus
/// query type. The class is implicitly INET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub name: String,
    pub qtype: RecordType,
    /// Pre-computed hash for faster lookups
    hash: u64,
}

impl CacheKey {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        let mut name = name.to_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        u16::from(qtype).hash(&mut hasher);
        let hash = hasher.finish();

        Self { name, qtype, hash }
    }

    pub fn from_question(question: &DNSQuestion) -> Self {
        Self::new(&question.fqdn(), question.qtype)
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.name, self.qtype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Expired,
    Miss,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub answer: DNSPacket,
    /// Absolute expiry in epoch seconds; 0 means the entry never expires.
    pub expire_at: u64,
    pub hits: AtomicU64,
}

impl CacheEntry {
    pub fn new(answer: DNSPacket, expire_at: u64) -> Self {
        Self {
            answer,
            expire_at,
            hits: AtomicU64::new(0),
        }
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        self.expire_at == 0 || now < self.expire_at
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            answer: self.answer.clone(),
            expire_at: self.expire_at,
            hits: AtomicU64::new(self.hits.load(Ordering::Relaxed)),
        }
    }
}

/// Shared answer cache. Readers take the read side of the lock and hand out
/// deep copies so callers can restamp ids without racing the stored answer;
/// expired entries are only ever removed by `gc`, never on the read path.
pub struct MessageCache {
    max_count: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MessageCache {
    /// `max_count == 0` means unlimited.
    pub fn new(max_count: usize) -> Self {
        Self {
            max_count,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> (Option<DNSPacket>, CacheStatus) {
        let entries = self.entries.read();
        match entries.get(key) {
            None => (None, CacheStatus::Miss),
            Some(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                let status = if entry.is_fresh(epoch_now()) {
                    CacheStatus::Fresh
                } else {
                    CacheStatus::Expired
                };
                (Some(entry.answer.clone()), status)
            }
        }
    }

    /// Insert or replace. When the cache is at capacity, inserting a new key
    /// is refused; replacing an existing key is always allowed since it does
    /// not grow the map.
    pub fn set(&self, key: CacheKey, entry: CacheEntry) -> bool {
        let mut entries = self.entries.write();
        if self.max_count > 0 && entries.len() >= self.max_count && !entries.contains_key(&key) {
            debug!("cache full ({} entries), refusing insert of {}", entries.len(), key);
            return false;
        }
        entries.insert(key, entry);
        true
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.write().remove(key);
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn reset(&self) {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        debug!("cache reset, dropped {} entries", dropped);
    }

    /// Drop entries that expired more than `GC_RETENTION_SECS` ago. Called
    /// periodically by the insert worker, not per operation.
    pub fn gc(&self) {
        let cutoff = epoch_now().saturating_sub(GC_RETENTION_SECS);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expire_at == 0 || entry.expire_at >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("cache gc removed {} entries, {} remain", removed, entries.len());
        }
    }
}
