use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use ratatosk::cache::{epoch_now, CacheEntry, CacheKey, CacheStatus};
use ratatosk::config::ProxyConfig;
use ratatosk::dns::{DNSPacket, DNSRecord, RecordType};
use ratatosk::error::ProxyError;
use ratatosk::local::PtrTable;
use ratatosk::resolver::DnsResolver;

/// Mock upstream answering every A query with `answer` after `delay`.
async fn mock_upstream(answer: Ipv4Addr, delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        while let Ok((read, src)) = socket.recv_from(&mut buf).await {
            counter.fetch_add(1, Ordering::SeqCst);
            let req = match DNSPacket::parse(&buf[..read]) {
                Ok(req) => req,
                Err(_) => continue,
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut response = DNSPacket::response_to(&req);
            let name = req.questions[0].fqdn();
            response.answers.push(DNSRecord::a(&name, 60, answer));
            let _ = socket.send_to(&response.serialize().unwrap(), src).await;
        }
    });

    (addr, hits)
}

/// Mock upstream that counts queries but never answers.
async fn silent_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        while socket.recv_from(&mut buf).await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    (addr, hits)
}

fn test_config(servers: &[SocketAddr], timeout_ms: u64) -> ProxyConfig {
    ProxyConfig {
        forwarders: HashMap::from([(
            "normal".to_string(),
            servers.iter().map(|addr| addr.to_string()).collect(),
        )]),
        rules: HashMap::from([("default".to_string(), "normal".to_string())]),
        upstream_timeout_ms: timeout_ms,
        ..ProxyConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
    let give_up = Instant::now() + deadline;
    while !check() {
        assert!(Instant::now() < give_up, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_cache_miss_races_upstreams_and_caches_the_answer() {
    let (u1, _) = silent_upstream().await;
    let (u2, _) = mock_upstream(Ipv4Addr::new(93, 184, 216, 34), Duration::from_millis(20)).await;
    let (u3, _) = silent_upstream().await;

    let resolver = DnsResolver::new(test_config(&[u1, u2, u3], 600))
        .await
        .unwrap();

    let req = DNSPacket::query(0x1111, "example.com.", RecordType::A);
    let answer = resolver.query("127.0.0.1:9999", &req).await.unwrap();

    assert_eq!(answer.header.id, 0x1111);
    assert_eq!(answer.header.rcode, 0);
    assert_eq!(answer.answers[0].rdata_text(), "93.184.216.34");

    // The insert worker stores the entry shortly after the race
    let key = CacheKey::new("example.com.", RecordType::A);
    wait_for("entry to appear in cache", Duration::from_millis(500), || {
        resolver.cache().exists(&key)
    })
    .await;

    let (cached, status) = resolver.cache().get(&key);
    assert_eq!(status, CacheStatus::Fresh);
    assert_eq!(cached.unwrap().answers[0].rdata_text(), "93.184.216.34");
}

#[tokio::test]
async fn test_fresh_cache_hit_skips_upstreams() {
    let (upstream, hits) = mock_upstream(Ipv4Addr::new(5, 6, 7, 8), Duration::ZERO).await;
    let resolver = DnsResolver::new(test_config(&[upstream], 600)).await.unwrap();

    // Preload under a different request id than the one we query with
    let seed = DNSPacket::query(0x9999, "example.com.", RecordType::A);
    let mut stored = DNSPacket::response_to(&seed);
    stored
        .answers
        .push(DNSRecord::a("example.com.", 3600, Ipv4Addr::new(1, 2, 3, 4)));
    let key = CacheKey::new("example.com.", RecordType::A);
    assert!(resolver
        .cache()
        .set(key, CacheEntry::new(stored, epoch_now() + 3600)));

    let req = DNSPacket::query(7, "example.com.", RecordType::A);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.header.id, 7);
    assert_eq!(answer.answers[0].rdata_text(), "1.2.3.4");
    assert_eq!(hits.load(Ordering::SeqCst), 0, "no upstream attempt expected");
}

#[tokio::test]
async fn test_expired_hit_serves_stale_and_refreshes() {
    let (upstream, hits) = mock_upstream(Ipv4Addr::new(5, 6, 7, 8), Duration::ZERO).await;
    let resolver = DnsResolver::new(test_config(&[upstream], 600)).await.unwrap();

    let seed = DNSPacket::query(0x2222, "example.com.", RecordType::A);
    let mut stored = DNSPacket::response_to(&seed);
    stored
        .answers
        .push(DNSRecord::a("example.com.", 1, Ipv4Addr::new(1, 2, 3, 4)));
    let key = CacheKey::new("example.com.", RecordType::A);
    assert!(resolver
        .cache()
        .set(key.clone(), CacheEntry::new(stored, epoch_now() - 1)));

    // The stale answer comes back immediately
    let req = DNSPacket::query(0x2222, "example.com.", RecordType::A);
    let answer = resolver.query("test", &req).await.unwrap();
    assert_eq!(answer.answers[0].rdata_text(), "1.2.3.4");

    // Within a second the background refresh lands the new answer
    let resolver_ref = &resolver;
    wait_for("refresh to replace the entry", Duration::from_secs(1), || {
        let (cached, status) = resolver_ref.cache().get(&key);
        status == CacheStatus::Fresh
            && cached
                .map(|packet| packet.answers[0].rdata_text() == "5.6.7.8")
                .unwrap_or(false)
    })
    .await;

    assert_eq!(hits.load(Ordering::SeqCst), 1, "exactly one refresh attempt");
}

#[tokio::test]
async fn test_ptr_self_answer_never_reaches_upstreams() {
    let (upstream, hits) = silent_upstream().await;
    let config = test_config(&[upstream], 200);
    let resolver = DnsResolver::with_ptr_table(
        config,
        PtrTable::from_addrs([Ipv4Addr::new(192, 168, 1, 10)]),
    )
    .await
    .unwrap();

    let req = DNSPacket::query(5, "10.1.168.192.in-addr.arpa.", RecordType::PTR);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.header.id, 5);
    assert_eq!(answer.header.rcode, 0);
    assert_eq!(answer.answers[0].rdata_text(), "dns.proxy.server.");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mapper_hit_short_circuits_cache_and_upstreams() {
    let (upstream, hits) = silent_upstream().await;
    let config = ProxyConfig {
        mapper: vec!["api.internal:10.0.0.7".to_string()],
        ..test_config(&[upstream], 200)
    };
    let resolver = DnsResolver::new(config).await.unwrap();

    let req = DNSPacket::query(11, "api.internal.", RecordType::A);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.header.id, 11);
    assert_eq!(answer.answers[0].rdata_text(), "10.0.0.7");
    assert_eq!(answer.answers[0].ttl, 600);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(resolver.cache().len(), 0, "mapper answers bypass the cache");
}

#[tokio::test]
async fn test_mapper_aaaa_hit_answers_empty_noerror() {
    let (upstream, hits) = silent_upstream().await;
    let config = ProxyConfig {
        mapper: vec!["api.internal:10.0.0.7".to_string()],
        ..test_config(&[upstream], 200)
    };
    let resolver = DnsResolver::new(config).await.unwrap();

    let req = DNSPacket::query(12, "api.internal.", RecordType::AAAA);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.header.rcode, 0);
    assert!(answer.answers.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_race_timeout_when_all_upstreams_are_silent() {
    let (u1, _) = silent_upstream().await;
    let (u2, _) = silent_upstream().await;
    let resolver = DnsResolver::new(test_config(&[u1, u2], 200)).await.unwrap();

    let req = DNSPacket::query(3, "slow.test.", RecordType::A);
    let started = Instant::now();
    let err = resolver.query("test", &req).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ProxyError::UpstreamTimeout), "got {:?}", err);
    assert!(
        elapsed < Duration::from_millis(600),
        "race took {:?}, deadline was 200 ms",
        elapsed
    );
    assert_eq!(resolver.cache().len(), 0);
}

#[tokio::test]
async fn test_single_member_group_under_higher_concurrency() {
    let (upstream, hits) = mock_upstream(Ipv4Addr::new(9, 9, 9, 9), Duration::ZERO).await;
    let resolver = DnsResolver::new(test_config(&[upstream], 600)).await.unwrap();

    let req = DNSPacket::query(21, "example.net.", RecordType::A);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.answers[0].rdata_text(), "9.9.9.9");
    // Duplicate attempts at the same address are allowed; at least one lands
    assert!(hits.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_second_identical_query_is_served_from_cache() {
    let (upstream, hits) = mock_upstream(Ipv4Addr::new(4, 4, 4, 4), Duration::ZERO).await;
    let resolver = DnsResolver::new(test_config(&[upstream], 600)).await.unwrap();

    let req = DNSPacket::query(31, "repeat.example.com.", RecordType::A);
    resolver.query("test", &req).await.unwrap();

    let key = CacheKey::new("repeat.example.com.", RecordType::A);
    wait_for("first answer to be cached", Duration::from_millis(500), || {
        resolver.cache().exists(&key)
    })
    .await;

    let after_first = hits.load(Ordering::SeqCst);
    let answer = resolver.query("test", &req).await.unwrap();
    assert_eq!(answer.answers[0].rdata_text(), "4.4.4.4");
    assert_eq!(
        hits.load(Ordering::SeqCst),
        after_first,
        "second query must not touch upstreams"
    );
}

#[tokio::test]
async fn test_reset_forces_a_new_race() {
    let (upstream, hits) = mock_upstream(Ipv4Addr::new(4, 4, 4, 4), Duration::ZERO).await;
    let resolver = DnsResolver::new(test_config(&[upstream], 600)).await.unwrap();

    let req = DNSPacket::query(41, "reset.example.com.", RecordType::A);
    resolver.query("test", &req).await.unwrap();

    // Let the background insert land before resetting, so nothing can
    // repopulate the cache behind our back
    let key = CacheKey::new("reset.example.com.", RecordType::A);
    wait_for("first answer to be cached", Duration::from_millis(500), || {
        resolver.cache().exists(&key)
    })
    .await;
    let after_first = hits.load(Ordering::SeqCst);

    resolver.reset();
    assert_eq!(resolver.cache().len(), 0);

    resolver.query("test", &req).await.unwrap();
    assert!(
        hits.load(Ordering::SeqCst) > after_first,
        "reset must force an upstream race"
    );
}

#[tokio::test]
async fn test_rule_routes_domain_to_its_group() {
    // default group never answers; the routed group does
    let (silent, silent_hits) = silent_upstream().await;
    let (routed, routed_hits) = mock_upstream(Ipv4Addr::new(8, 8, 8, 8), Duration::ZERO).await;

    let config = ProxyConfig {
        forwarders: HashMap::from([
            ("normal".to_string(), vec![silent.to_string()]),
            ("special".to_string(), vec![routed.to_string()]),
        ]),
        rules: HashMap::from([
            ("default".to_string(), "normal".to_string()),
            ("example.com".to_string(), "special".to_string()),
        ]),
        upstream_timeout_ms: 600,
        ..ProxyConfig::default()
    };
    let resolver = DnsResolver::new(config).await.unwrap();

    let req = DNSPacket::query(51, "www.example.com.", RecordType::A);
    let answer = resolver.query("test", &req).await.unwrap();

    assert_eq!(answer.answers[0].rdata_text(), "8.8.8.8");
    assert!(routed_hits.load(Ordering::SeqCst) >= 1);
    assert_eq!(silent_hits.load(Ordering::SeqCst), 0);
}
