use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{epoch_now, CacheEntry};
use crate::dns::DNSPacket;
use crate::error::{ProxyError, Result};

/// Receive buffer: twice the classic 512-byte DNS payload, room for the
/// EDNS answers public resolvers send.
const UDP_BUFFER_SIZE: usize = 1024;

/// Idle sockets kept per upstream address.
const POOL_DEPTH: usize = 8;

/// Shared DNS client: pooled UDP sockets per upstream, one `exchange` per
/// attempt, and the N-way race used on cache misses.
pub struct UpstreamClient {
    attempt_timeout: Duration,
    concurrency: usize,
    min_ttl: u64,
    max_ttl: u64,
    honor_upstream_ttl: bool,
    pool: Mutex<HashMap<SocketAddr, Vec<UdpSocket>>>,
}

impl UpstreamClient {
    pub fn new(
        attempt_timeout: Duration,
        concurrency: usize,
        min_ttl: u64,
        max_ttl: u64,
        honor_upstream_ttl: bool,
    ) -> Self {
        Self {
            attempt_timeout,
            concurrency: concurrency.max(1),
            min_ttl,
            max_ttl,
            honor_upstream_ttl,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Race `concurrency` attempts across the group, starting at a random
    /// index. The first successful answer wins; the rest are aborted, which
    /// closes their sockets. Attempt errors are logged and suppressed as
    /// long as a sibling succeeds.
    pub async fn race(self: Arc<Self>, req: &DNSPacket, servers: &[SocketAddr]) -> Result<CacheEntry> {
        if servers.is_empty() {
            // A race with zero attempts can never produce a success
            warn!("race started with an empty upstream group");
            return Err(ProxyError::UpstreamTimeout);
        }

        let query = Arc::new(req.serialize()?);
        let start = rand::rng().random_range(0..servers.len());
        let (tx, mut rx) = mpsc::channel::<CacheEntry>(self.concurrency);

        let mut attempts = Vec::with_capacity(self.concurrency);
        for i in 0..self.concurrency {
            // A group shorter than the concurrency gets duplicate attempts
            let addr = servers[(start + i) % servers.len()];
            let client = Arc::clone(&self);
            let query = Arc::clone(&query);
            let tx = tx.clone();

            attempts.push(tokio::spawn(async move {
                match client.exchange(&query, addr).await {
                    Ok((answer, rtt)) => {
                        debug!("upstream {} answered in {:?}", addr, rtt);
                        let _ = tx.try_send(client.build_entry(answer, rtt));
                    }
                    Err(err) => {
                        warn!("upstream {} attempt failed: {}", addr, err);
                    }
                }
            }));
        }
        drop(tx);

        let outcome = timeout(self.attempt_timeout, rx.recv()).await;
        for attempt in &attempts {
            attempt.abort();
        }

        match outcome {
            Ok(Some(entry)) => Ok(entry),
            // Either the deadline fired or every attempt already failed;
            // the caller sees the same timeout outcome for both.
            Ok(None) | Err(_) => Err(ProxyError::UpstreamTimeout),
        }
    }

    /// Single refresh attempt against one upstream.
    pub async fn single(&self, req: &DNSPacket, addr: SocketAddr) -> Result<CacheEntry> {
        let query = req.serialize()?;
        let (answer, rtt) = self.exchange(&query, addr).await?;
        Ok(self.build_entry(answer, rtt))
    }

    /// One UDP exchange with the per-attempt deadline, returning the parsed
    /// answer and the measured round-trip time.
    async fn exchange(&self, query: &[u8], addr: SocketAddr) -> Result<(DNSPacket, Duration)> {
        let started = Instant::now();
        let socket = self.checkout(addr).await?;

        match timeout(self.attempt_timeout, Self::exchange_on(&socket, query)).await {
            Ok(Ok(answer)) => {
                let rtt = started.elapsed();
                self.checkin(addr, socket).await;
                Ok((answer, rtt))
            }
            // The socket is dropped (closed) instead of returned: it may
            // still have a late answer in flight.
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProxyError::UpstreamTimeout),
        }
    }

    async fn exchange_on(socket: &UdpSocket, query: &[u8]) -> Result<DNSPacket> {
        if query.len() < 2 {
            return Err(ProxyError::Parse("query shorter than a header id".to_string()));
        }
        let query_id = u16::from_be_bytes([query[0], query[1]]);

        socket
            .send(query)
            .await
            .map_err(|err| ProxyError::Upstream(format!("send: {}", err)))?;

        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            let read = socket
                .recv(&mut buf)
                .await
                .map_err(|err| ProxyError::Upstream(format!("recv: {}", err)))?;
            match DNSPacket::parse(&buf[..read]) {
                Ok(answer) if answer.header.qr && answer.header.id == query_id => {
                    return Ok(answer);
                }
                Ok(stale) => {
                    // Leftover answer from an earlier checkout of this socket
                    debug!("discarding mismatched answer id={}", stale.header.id);
                }
                Err(err) => return Err(ProxyError::Parse(err.to_string())),
            }
        }
    }

    async fn checkout(&self, addr: SocketAddr) -> Result<UdpSocket> {
        if let Some(socket) = self.pool.lock().await.get_mut(&addr).and_then(Vec::pop) {
            return Ok(socket);
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(socket)
    }

    async fn checkin(&self, addr: SocketAddr, socket: UdpSocket) {
        let mut pool = self.pool.lock().await;
        let sockets = pool.entry(addr).or_default();
        if sockets.len() < POOL_DEPTH {
            sockets.push(socket);
        }
    }

    /// TTL comes from the measured RTT in whole seconds unless the operator
    /// opted into honoring upstream TTLs; either way the operator's bounds
    /// win over whatever the upstream advertised.
    fn build_entry(&self, answer: DNSPacket, rtt: Duration) -> CacheEntry {
        let ttl = if self.honor_upstream_ttl {
            answer.min_answer_ttl().unwrap_or(self.min_ttl)
        } else {
            rtt.as_secs()
        };
        let ttl = ttl.clamp(self.min_ttl, self.max_ttl);
        CacheEntry::new(answer, epoch_now() + ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::RecordType;

    fn client(honor: bool) -> UpstreamClient {
        UpstreamClient::new(Duration::from_millis(600), 3, 600, 86_400, honor)
    }

    #[test]
    fn test_rtt_ttl_is_clamped_up_to_min() {
        let answer = DNSPacket::query(1, "example.com.", RecordType::A);
        let entry = client(false).build_entry(answer, Duration::from_millis(20));
        let lifetime = entry.expire_at - epoch_now();
        assert!((599..=601).contains(&lifetime), "lifetime {}", lifetime);
    }

    #[test]
    fn test_honored_ttl_still_clamped() {
        let query = DNSPacket::query(1, "example.com.", RecordType::A);
        let mut answer = DNSPacket::response_to(&query);
        answer.answers.push(crate::dns::DNSRecord::a(
            "example.com.",
            7,
            std::net::Ipv4Addr::new(1, 2, 3, 4),
        ));

        let entry = client(true).build_entry(answer, Duration::from_millis(20));
        let lifetime = entry.expire_at - epoch_now();
        // Advertised 7s is below the floor, so the floor wins
        assert!((599..=601).contains(&lifetime), "lifetime {}", lifetime);
    }
}
