use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;
use crate::local::MapperTable;

/// Upstream groups synthesized when a config file does not define them.
const DEFAULT_NORMAL_GROUP: &[&str] = &[
    "223.5.5.5:53",
    "223.6.6.6:53",
    "119.29.29.29:53",
    "182.254.116.116:53",
    "101.226.4.6:53",
    "114.114.114.114:53",
    "114.114.115.115:53",
    "202.67.240.222:53",
    "203.80.96.10:53",
    "202.45.84.58:53",
];

const DEFAULT_GFW_GROUP: &[&str] = &[
    "74.82.42.42:53",
    "107.150.40.234:53",
    "162.211.64.20:53",
    "50.116.23.211:53",
    "50.116.40.226:53",
    "37.235.1.174:53",
    "37.235.1.177:53",
    "8.8.8.8:53",
    "8.8.4.4:53",
    "208.67.222.222:53",
    "208.67.220.220:53",
    "8.26.56.26:53",
    "84.200.69.80:53",
];

/// Declared for config compatibility; nothing consumes filters yet.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DnsFilter {
    pub host: String,
    pub qtype: u16,
    pub exact: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LoggerOptions {
    /// Emit one log line per answered query.
    pub access: bool,
    /// Runtime log filter, passed to the subscriber's env-filter.
    pub level: String,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            access: false,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Maximum number of cached answers; 0 removes the bound.
    pub cache: usize,
    /// Upstream attempts raced per cache miss.
    pub concurrency: usize,
    /// Server name answered for reverse lookups of our own addresses.
    pub name: String,
    /// Optional PID file path.
    pub pid: Option<String>,
    /// Floor applied to every cached entry's lifetime, in seconds.
    pub min_ttl: u64,
    /// Ceiling applied to every cached entry's lifetime, in seconds.
    pub max_ttl: u64,
    /// Per-attempt upstream deadline, also the whole race's deadline.
    pub upstream_timeout_ms: u64,
    /// Derive TTLs from upstream answers instead of the measured RTT.
    pub honor_upstream_ttl: bool,
    /// scheme ("udp", "tcp", "http") to listen address.
    pub bind: HashMap<String, String>,
    /// registrable domain to forwarder group; must contain "default".
    pub rules: HashMap<String, String>,
    /// group name to upstream "host:port" list.
    pub forwarders: HashMap<String, Vec<String>>,
    /// "domain:ipaddr" override rules.
    pub mapper: Vec<String>,
    pub filters: Vec<DnsFilter>,
    pub logger: LoggerOptions,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut config = Self {
            cache: 256 << 20,
            concurrency: 3,
            name: "dns.proxy.server.".to_string(),
            pid: None,
            min_ttl: 600,
            max_ttl: 86_400,
            upstream_timeout_ms: 600,
            honor_upstream_ttl: false,
            bind: HashMap::new(),
            rules: HashMap::new(),
            forwarders: HashMap::new(),
            mapper: Vec::new(),
            filters: Vec::new(),
            logger: LoggerOptions::default(),
        };
        config.normalize();
        config
    }
}

impl ProxyConfig {
    /// Load from a TOML file, or fall back to built-in defaults when no path
    /// is given. The result is always normalized and validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| ConfigError::Read(format!("{}: {}", path.display(), err)))?;
                let config: ProxyConfig =
                    toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?;
                info!("loaded config from {}", path.display());
                config
            }
            None => {
                info!("no config file given, using built-in defaults");
                ProxyConfig::default()
            }
        };

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Fill the gaps a partial file leaves behind.
    fn normalize(&mut self) {
        if self.bind.is_empty() {
            self.bind
                .insert("udp".to_string(), "0.0.0.0:53".to_string());
            self.bind
                .insert("http".to_string(), "0.0.0.0:8080".to_string());
        }

        if self.name.is_empty() {
            self.name = "dns.proxy.server.".to_string();
        }
        if !self.name.ends_with('.') {
            self.name.push('.');
        }

        self.forwarders.entry("normal".to_string()).or_insert_with(|| {
            DEFAULT_NORMAL_GROUP.iter().map(|s| s.to_string()).collect()
        });
        self.forwarders.entry("gfw".to_string()).or_insert_with(|| {
            DEFAULT_GFW_GROUP.iter().map(|s| s.to_string()).collect()
        });

        if self.rules.is_empty() {
            self.rules
                .insert("default".to_string(), "normal".to_string());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rules.contains_key("default") {
            return Err(ConfigError::MissingDefaultRule);
        }

        for (domain, group) in &self.rules {
            if domain != "default" && domain.split('.').count() != 2 {
                return Err(ConfigError::InvalidRuleDomain(domain.clone()));
            }
            if !self.forwarders.contains_key(group) {
                return Err(ConfigError::UnknownGroup {
                    domain: domain.clone(),
                    group: group.clone(),
                });
            }
        }

        self.upstream_groups()?;
        MapperTable::from_rules(&self.mapper)?;

        for addr in self.bind.values() {
            parse_bind_addr(addr)?;
        }

        if self.min_ttl > self.max_ttl {
            return Err(ConfigError::InvalidTtlBounds {
                min: self.min_ttl,
                max: self.max_ttl,
            });
        }

        Ok(())
    }

    /// Forwarder groups with every upstream parsed, validated non-empty.
    pub fn upstream_groups(&self) -> Result<HashMap<String, Vec<SocketAddr>>, ConfigError> {
        let mut groups = HashMap::with_capacity(self.forwarders.len());
        for (name, servers) in &self.forwarders {
            if servers.is_empty() {
                return Err(ConfigError::EmptyGroup(name.clone()));
            }
            let mut parsed = Vec::with_capacity(servers.len());
            for server in servers {
                parsed.push(
                    server
                        .parse::<SocketAddr>()
                        .map_err(|_| ConfigError::InvalidUpstream(server.clone()))?,
                );
            }
            groups.insert(name.clone(), parsed);
        }
        Ok(groups)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

/// Accept both full socket addresses and the ":53" shorthand.
pub fn parse_bind_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|_| ConfigError::InvalidBindAddress(addr.to_string()))
}
