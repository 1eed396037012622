use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

use crate::dns::{DNSPacket, DNSQuestion, DNSRecord, RecordClass, RecordType};
use crate::error::ConfigError;

/// Right-trim over a character *set*, then strip surrounding dots. The trim
/// removes any trailing run of characters drawn from `dhcp\ host.`, not a
/// literal suffix, so "myhost." becomes "my". Historical behavior, kept:
/// routing and the mapper walk both normalize through here, so lookups stay
/// consistent with each other.
pub fn trim_host_name(name: &str) -> String {
    const TRIM_SET: &str = "dhcp\\ host.";
    name.to_lowercase()
        .trim_end_matches(|c| TRIM_SET.contains(c))
        .trim_matches('.')
        .to_string()
}

/// Last two labels of a name, the approximation of the registrable domain
/// used by both the mapper and the forwarder rules.
pub fn registrable_domain(name: &str) -> Option<String> {
    let host = trim_host_name(name);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(format!(
        "{}.{}",
        labels[labels.len() - 2],
        labels[labels.len() - 1]
    ))
}

/// Reverse-pointer names for the host's own IPv4 interface addresses.
/// Read-only after construction; rebuilt on reload.
#[derive(Debug, Default, Clone)]
pub struct PtrTable {
    names: Vec<String>,
}

impl PtrTable {
    pub fn from_interfaces() -> Self {
        let addrs = match get_if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter_map(|interface| match interface.ip() {
                    IpAddr::V4(addr) => Some(addr),
                    // IPv6 interfaces are skipped
                    IpAddr::V6(_) => None,
                })
                .collect(),
            Err(err) => {
                warn!("cannot enumerate interface addresses: {}", err);
                Vec::new()
            }
        };
        Self::from_addrs(addrs)
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        let names = addrs
            .into_iter()
            .map(|addr| {
                let [a, b, c, d] = addr.octets();
                format!("{}.{}.{}.{}.in-addr.arpa.", d, c, b, a)
            })
            .collect();
        Self { names }
    }

    pub fn contains(&self, fqdn: &str) -> bool {
        self.names.iter().any(|name| name == fqdn)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Static domain-to-address overrides: outer key is the registrable domain,
/// inner keys are either full names or dot-prefixed suffix anchors.
#[derive(Debug, Default, Clone)]
pub struct MapperTable {
    entries: HashMap<String, HashMap<String, IpAddr>>,
}

impl MapperTable {
    /// Build from `domain:ipaddr` rules.
    pub fn from_rules(rules: &[String]) -> Result<Self, ConfigError> {
        let mut entries: HashMap<String, HashMap<String, IpAddr>> = HashMap::new();

        for rule in rules {
            let (domain, value) = rule
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidMapper(rule.clone()))?;
            let domain = domain.to_lowercase();

            let labels: Vec<&str> = domain.split('.').collect();
            if labels.len() < 2 {
                return Err(ConfigError::InvalidMapper(rule.clone()));
            }

            let addr: IpAddr = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidMapper(rule.clone()))?;

            let outer = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
            entries.entry(outer).or_default().insert(domain, addr);
        }

        Ok(Self { entries })
    }

    /// Walk prefixes of increasing generality, trying the bare form and the
    /// dot-prefixed suffix form at each step.
    pub fn lookup(&self, name: &str) -> Option<IpAddr> {
        let host = trim_host_name(name);
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return None;
        }

        let outer = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
        let items = self.entries.get(&outer)?;

        let mut idx = 0;
        loop {
            let candidate = labels[idx..].join(".");
            if let Some(addr) = items.get(&candidate) {
                return Some(*addr);
            }
            if let Some(addr) = items.get(&format!(".{}", candidate)) {
                return Some(*addr);
            }

            idx += 1;
            if idx + 1 == labels.len() {
                return None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// PTR self-answers plus mapper overrides. A hit here short-circuits the
/// cache and the upstream race entirely.
#[derive(Debug, Default, Clone)]
pub struct LocalOverrides {
    ptr: PtrTable,
    mapper: MapperTable,
    server_name: String,
    min_ttl: u64,
}

impl LocalOverrides {
    pub fn new(ptr: PtrTable, mapper: MapperTable, server_name: String, min_ttl: u64) -> Self {
        Self {
            ptr,
            mapper,
            server_name,
            min_ttl,
        }
    }

    pub fn answer(&self, req: &DNSPacket) -> Option<DNSPacket> {
        let question = req.first_question()?;
        if question.qclass != RecordClass::IN {
            return None;
        }

        match question.qtype {
            RecordType::PTR => self.answer_ptr(req, question),
            RecordType::A | RecordType::AAAA => self.answer_mapped(req, question),
            _ => None,
        }
    }

    fn answer_ptr(&self, req: &DNSPacket, question: &DNSQuestion) -> Option<DNSPacket> {
        let fqdn = question.fqdn();
        if !self.ptr.contains(&fqdn) {
            return None;
        }

        let record = match DNSRecord::ptr(&fqdn, self.min_ttl as u32, &self.server_name) {
            Ok(record) => record,
            Err(err) => {
                warn!("cannot synthesize PTR answer for {}: {}", fqdn, err);
                return None;
            }
        };

        debug!("ptr self-answer for {}", fqdn);
        let mut response = DNSPacket::response_to(req);
        response.answers.push(record);
        Some(response)
    }

    fn answer_mapped(&self, req: &DNSPacket, question: &DNSQuestion) -> Option<DNSPacket> {
        let fqdn = question.fqdn();
        let addr = self.mapper.lookup(&fqdn)?;

        let mut response = DNSPacket::response_to(req);
        // Only an A query with a mapped IPv4 address yields a record. AAAA
        // hits (and A hits mapped to IPv6) answer NOERROR with an empty
        // answer section, which callers use to park a host on one family.
        if question.qtype == RecordType::A {
            if let IpAddr::V4(v4) = addr {
                let owner = format!("{}.", trim_host_name(&fqdn));
                response
                    .answers
                    .push(DNSRecord::a(&owner, self.min_ttl as u32, v4));
            }
        }

        debug!("mapper answer for {} {}: {}", fqdn, question.qtype, addr);
        Some(response)
    }
}
