use std::net::Ipv4Addr;

use ratatosk::dns::{DNSPacket, RecordType};
use ratatosk::local::{LocalOverrides, MapperTable, PtrTable};

fn overrides(mapper_rules: &[&str]) -> LocalOverrides {
    let rules: Vec<String> = mapper_rules.iter().map(|r| r.to_string()).collect();
    LocalOverrides::new(
        PtrTable::from_addrs([Ipv4Addr::new(192, 168, 1, 10)]),
        MapperTable::from_rules(&rules).unwrap(),
        "dns.proxy.server.".to_string(),
        600,
    )
}

#[test]
fn test_ptr_answer_shape() {
    let local = overrides(&[]);
    let req = DNSPacket::query(0x77, "10.1.168.192.in-addr.arpa.", RecordType::PTR);

    let answer = local.answer(&req).expect("ptr table must answer");
    assert_eq!(answer.header.id, 0x77);
    assert!(answer.header.qr);
    assert_eq!(answer.header.rcode, 0);
    assert_eq!(answer.answers.len(), 1);

    let record = &answer.answers[0];
    assert_eq!(record.name(), "10.1.168.192.in-addr.arpa.");
    assert_eq!(record.ttl, 600);
    assert_eq!(record.rdata_text(), "dns.proxy.server.");
}

#[test]
fn test_ptr_misses_for_foreign_addresses() {
    let local = overrides(&[]);
    let req = DNSPacket::query(1, "1.1.168.192.in-addr.arpa.", RecordType::PTR);
    assert!(local.answer(&req).is_none());
}

#[test]
fn test_mapper_a_answer_uses_min_ttl() {
    let local = overrides(&["api.internal:10.0.0.7"]);
    let req = DNSPacket::query(2, "api.internal.", RecordType::A);

    let answer = local.answer(&req).unwrap();
    assert_eq!(answer.answers.len(), 1);
    assert_eq!(answer.answers[0].rdata_text(), "10.0.0.7");
    assert_eq!(answer.answers[0].ttl, 600);
}

#[test]
fn test_mapper_is_deterministic_across_request_ids() {
    let local = overrides(&["api.internal:10.0.0.7"]);

    let first = local
        .answer(&DNSPacket::query(1, "api.internal.", RecordType::A))
        .unwrap();
    let second = local
        .answer(&DNSPacket::query(0xFFFF, "api.internal.", RecordType::A))
        .unwrap();

    assert_eq!(first.answers, second.answers);
}

#[test]
fn test_mapper_aaaa_hit_is_empty_noerror() {
    let local = overrides(&["api.internal:10.0.0.7"]);
    let req = DNSPacket::query(3, "api.internal.", RecordType::AAAA);

    let answer = local.answer(&req).unwrap();
    assert_eq!(answer.header.rcode, 0);
    assert!(answer.answers.is_empty());
}

#[test]
fn test_mapper_a_hit_on_ipv6_mapping_is_empty_noerror() {
    let local = overrides(&["api.internal:fd00::7"]);
    let req = DNSPacket::query(4, "api.internal.", RecordType::A);

    let answer = local.answer(&req).unwrap();
    assert_eq!(answer.header.rcode, 0);
    assert!(answer.answers.is_empty());
}

#[test]
fn test_mapper_suffix_anchor_matches_subdomains() {
    let local = overrides(&[".internal.example.com:10.0.0.9"]);

    let hit = local
        .answer(&DNSPacket::query(5, "db.internal.example.com.", RecordType::A))
        .unwrap();
    assert_eq!(hit.answers[0].rdata_text(), "10.0.0.9");

    assert!(local
        .answer(&DNSPacket::query(6, "example.com.", RecordType::A))
        .is_none());
}

#[test]
fn test_mapper_miss_falls_through() {
    let local = overrides(&["api.internal:10.0.0.7"]);
    assert!(local
        .answer(&DNSPacket::query(7, "other.example.com.", RecordType::A))
        .is_none());
}

#[test]
fn test_unhandled_query_types_fall_through() {
    let local = overrides(&["api.internal:10.0.0.7"]);
    assert!(local
        .answer(&DNSPacket::query(8, "api.internal.", RecordType::MX))
        .is_none());
    assert!(local
        .answer(&DNSPacket::query(9, "api.internal.", RecordType::TXT))
        .is_none());
}

#[test]
fn test_query_name_case_is_ignored() {
    let local = overrides(&["api.internal:10.0.0.7"]);
    let answer = local
        .answer(&DNSPacket::query(10, "API.Internal.", RecordType::A))
        .unwrap();
    assert_eq!(answer.answers[0].rdata_text(), "10.0.0.7");
}
