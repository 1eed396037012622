use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::cache::{CacheKey, CacheStatus, MessageCache};
use crate::config::ProxyConfig;
use crate::dns::DNSPacket;
use crate::error::{ConfigError, ProxyError, Result};
use crate::local::{registrable_domain, LocalOverrides, MapperTable, PtrTable};
use crate::refresh::{self, RefreshPipeline};
use crate::upstream::UpstreamClient;

/// Everything a query consults besides the cache: forwarder rules, parsed
/// upstream groups and the local override tables. Swapped wholesale on
/// reload; the lock is only ever held for in-memory reads.
pub struct RouteTables {
    rules: HashMap<String, String>,
    groups: HashMap<String, Vec<SocketAddr>>,
    overrides: LocalOverrides,
    access_log: bool,
}

impl RouteTables {
    pub fn from_config(config: &ProxyConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_ptr_table(config, PtrTable::from_interfaces())
    }

    pub fn with_ptr_table(
        config: &ProxyConfig,
        ptr: PtrTable,
    ) -> std::result::Result<Self, ConfigError> {
        let groups = config.upstream_groups()?;
        let mapper = MapperTable::from_rules(&config.mapper)?;
        Ok(Self {
            rules: config.rules.clone(),
            groups,
            overrides: LocalOverrides::new(ptr, mapper, config.name.clone(), config.min_ttl),
            access_log: config.logger.access,
        })
    }

    /// Rule lookup by registrable domain, falling back to the mandatory
    /// `default` rule.
    pub fn group_for(&self, name: &str) -> &str {
        if let Some(domain) = registrable_domain(name) {
            if let Some(group) = self.rules.get(&domain) {
                return group;
            }
        }
        self.rules
            .get("default")
            .map(String::as_str)
            .unwrap_or("normal")
    }

    /// Upstream addresses for a question name, cloned out so no lock is
    /// held anywhere near the network.
    pub fn servers_for(&self, name: &str) -> Vec<SocketAddr> {
        self.groups
            .get(self.group_for(name))
            .cloned()
            .unwrap_or_default()
    }
}

/// The query orchestrator: local overrides, then cache, then the upstream
/// race, with stale answers repaired through the refresh pipeline.
pub struct DnsResolver {
    cache: Arc<MessageCache>,
    upstream: Arc<UpstreamClient>,
    tables: Arc<RwLock<RouteTables>>,
    pipeline: RefreshPipeline,
    shutdown_tx: broadcast::Sender<()>,
}

impl DnsResolver {
    /// Validate the config, build the tables from the host's interfaces and
    /// start the refresh workers. Needs a running tokio runtime.
    pub async fn new(config: ProxyConfig) -> Result<Arc<Self>> {
        Self::build(config, PtrTable::from_interfaces())
    }

    /// Same as `new` with an explicit PTR table.
    pub async fn with_ptr_table(config: ProxyConfig, ptr: PtrTable) -> Result<Arc<Self>> {
        Self::build(config, ptr)
    }

    fn build(config: ProxyConfig, ptr: PtrTable) -> Result<Arc<Self>> {
        config.validate()?;

        let tables = Arc::new(RwLock::new(RouteTables::with_ptr_table(&config, ptr)?));
        let cache = Arc::new(MessageCache::new(config.cache));
        let upstream = Arc::new(UpstreamClient::new(
            config.upstream_timeout(),
            config.concurrency,
            config.min_ttl,
            config.max_ttl,
            config.honor_upstream_ttl,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let pipeline = refresh::spawn(
            Arc::clone(&cache),
            Arc::clone(&upstream),
            Arc::clone(&tables),
            &shutdown_tx,
        );

        Ok(Arc::new(Self {
            cache,
            upstream,
            tables,
            pipeline,
            shutdown_tx,
        }))
    }

    /// Resolve one request. Never panics out: an unexpected fault inside the
    /// query path is caught here, logged with the client address and turned
    /// into a generic error so the listener stays up.
    pub async fn query(&self, src: &str, req: &DNSPacket) -> Result<DNSPacket> {
        match AssertUnwindSafe(self.query_inner(src, req)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload);
                error!("client {} triggered panic in query path: {}", src, msg);
                Err(ProxyError::Internal(msg))
            }
        }
    }

    async fn query_inner(&self, src: &str, req: &DNSPacket) -> Result<DNSPacket> {
        let Some(question) = req.first_question() else {
            return Err(ProxyError::Parse("query has no question".to_string()));
        };

        let (local_answer, access_log) = {
            let tables = self.tables.read();
            (tables.overrides.answer(req), tables.access_log)
        };
        if let Some(mut answer) = local_answer {
            answer.header.id = req.header.id;
            if access_log {
                self.log_access(src, "local", req, &answer);
            }
            return Ok(answer);
        }

        let key = CacheKey::from_question(question);
        match self.cache.get(&key) {
            (Some(mut answer), CacheStatus::Fresh) => {
                answer.header.id = req.header.id;
                if access_log {
                    self.log_access(src, "cache", req, &answer);
                }
                Ok(answer)
            }
            (Some(mut answer), CacheStatus::Expired) => {
                // Serve the stale answer now, repair in the background
                answer.header.id = req.header.id;
                self.pipeline.schedule_refresh(req.clone());
                if access_log {
                    self.log_access(src, "stale", req, &answer);
                }
                Ok(answer)
            }
            _ => {
                let servers = { self.tables.read().servers_for(&question.fqdn()) };
                let entry = Arc::clone(&self.upstream).race(req, &servers).await?;

                let mut answer = entry.answer.clone();
                answer.header.id = req.header.id;
                self.pipeline.schedule_insert(entry);
                if access_log {
                    self.log_access(src, "remote", req, &answer);
                }
                Ok(answer)
            }
        }
    }

    fn log_access(&self, src: &str, source: &str, req: &DNSPacket, answer: &DNSPacket) {
        let question = serde_json::to_string(&req.questions).unwrap_or_default();
        let answers: Vec<String> = answer
            .answers
            .iter()
            .map(|record| format!("{} {} {}", record.name(), record.rtype, record.rdata_text()))
            .collect();
        info!(
            target: "access",
            "client {} query {} {} answers {:?}",
            src, source, question, answers
        );
    }

    /// Drop every cached answer.
    pub fn reset(&self) {
        self.cache.reset();
    }

    /// Swap in tables built from a fresh config and reset the cache.
    /// Listener addresses, the cache bound and channel capacities need a
    /// restart to change.
    pub fn reload(&self, config: ProxyConfig) -> Result<()> {
        config.validate()?;
        let tables = RouteTables::from_config(&config)?;
        *self.tables.write() = tables;
        self.cache.reset();
        info!("route tables reloaded, cache reset");
        Ok(())
    }

    /// Stop the refresh workers. Queries keep working; their refresh and
    /// insert sends become guarded no-ops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
