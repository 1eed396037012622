use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Configuration failures. All of these are fatal at startup: the proxy
/// refuses to serve with a config it cannot fully validate.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Read(String),
    Parse(String),
    MissingDefaultRule,
    UnknownGroup { domain: String, group: String },
    EmptyGroup(String),
    InvalidUpstream(String),
    InvalidRuleDomain(String),
    InvalidMapper(String),
    InvalidBindAddress(String),
    InvalidTtlBounds { min: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(msg) => write!(f, "Cannot read config file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Cannot parse config file: {}", msg),
            ConfigError::MissingDefaultRule => {
                write!(f, "Rules must contain a 'default' forwarder group")
            }
            ConfigError::UnknownGroup { domain, group } => {
                write!(
                    f,
                    "Rule for '{}' names forwarder group '{}' which does not exist",
                    domain, group
                )
            }
            ConfigError::EmptyGroup(group) => {
                write!(f, "Forwarder group '{}' has no upstream servers", group)
            }
            ConfigError::InvalidUpstream(addr) => {
                write!(f, "Invalid upstream address: {}", addr)
            }
            ConfigError::InvalidRuleDomain(domain) => {
                write!(f, "Rule domain must be of the form xxx.xx, got '{}'", domain)
            }
            ConfigError::InvalidMapper(rule) => {
                write!(f, "Mapper rule must be domain:ipaddr, got '{}'", rule)
            }
            ConfigError::InvalidBindAddress(addr) => {
                write!(f, "Invalid bind address: {}", addr)
            }
            ConfigError::InvalidTtlBounds { min, max } => {
                write!(f, "min_ttl {} must not exceed max_ttl {}", min, max)
            }
        }
    }
}

impl StdError for ConfigError {}

/// Errors that can leave the resolver. Only `UpstreamTimeout` and
/// `Internal` ever reach a front-end; everything else is confined to
/// startup or logged and swallowed on the refresh path.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// The whole upstream race elapsed without a single success.
    UpstreamTimeout,
    /// A single upstream exchange failed.
    Upstream(String),
    Io(std::sync::Arc<std::io::Error>),
    Parse(String),
    Config(ConfigError),
    /// A panic recovered at the query boundary.
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::UpstreamTimeout => write!(f, "Upstream query timed out"),
            ProxyError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ProxyError::Config(err) => write!(f, "Configuration error: {}", err),
            ProxyError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for ProxyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ProxyError::Config(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(std::sync::Arc::new(err))
    }
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::Config(err)
    }
}

impl From<crate::dns::ParseError> for ProxyError {
    fn from(err: crate::dns::ParseError) -> Self {
        ProxyError::Parse(err.to_string())
    }
}
