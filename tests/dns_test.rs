//! DNS Resolution Tests
//!
//! Covers:
//! - `Resolver` over a real hickory upstream talking to a local UDP server
//! - Falling back to the next upstream after SERVFAIL
//! - ECH config extraction from HTTPS records, skipping malformed ones
//! - Overrides bypassing unreachable upstreams
//! - `Resolve` trait usage through `Arc<dyn Resolve>`

use echcurl::dns::{IpPreference, Name, Resolve, Resolver, UpstreamAddr};
use hickory_resolver::proto::op::{Message, MessageType, ResponseCode};
use hickory_resolver::proto::rr::rdata::svcb::{EchConfigList, SvcParamKey, SvcParamValue, SVCB};
use hickory_resolver::proto::rr::rdata::{A, AAAA, HTTPS};
use hickory_resolver::proto::rr::{Name as DnsName, RData, Record, RecordType};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Minimal wire ECHConfig (version 0xfe0d, X25519, HKDF-SHA256, AES-128-GCM).
fn ech_config(config_id: u8, public_name: &str) -> Vec<u8> {
    let mut body = vec![config_id];
    body.extend_from_slice(&0x0020u16.to_be_bytes());
    body.extend_from_slice(&32u16.to_be_bytes());
    body.extend_from_slice(&[0x42; 32]);
    body.extend_from_slice(&4u16.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.push(0);
    body.push(public_name.len() as u8);
    body.extend_from_slice(public_name.as_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());

    let mut out = 0xfe0du16.to_be_bytes().to_vec();
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn ech_list(configs: &[Vec<u8>]) -> Vec<u8> {
    let len: usize = configs.iter().map(Vec::len).sum();
    let mut out = (len as u16).to_be_bytes().to_vec();
    for c in configs {
        out.extend_from_slice(c);
    }
    out
}

fn https_record(name: &DnsName, ech: Vec<u8>) -> Record {
    let svcb = SVCB::new(
        1,
        DnsName::root(),
        vec![(
            SvcParamKey::EchConfigList,
            SvcParamValue::EchConfigList(EchConfigList(ech)),
        )],
    );
    Record::from_rdata(name.clone(), 60, RData::HTTPS(HTTPS(svcb)))
}

/// Local UDP DNS server answering from `answer`. Returns its address and a
/// query counter.
async fn spawn_dns_server<F>(answer: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&DnsName, RecordType) -> Vec<Record> + Send + 'static,
{
    spawn_dns_server_with(ResponseCode::NoError, answer).await
}

async fn spawn_dns_server_with<F>(rcode: ResponseCode, answer: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&DnsName, RecordType) -> Vec<Record> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = Message::from_vec(&buf[..n]) else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let mut response = Message::new();
            response
                .set_id(request.id())
                .set_message_type(MessageType::Response)
                .set_op_code(request.op_code())
                .set_recursion_desired(request.recursion_desired())
                .set_recursion_available(true)
                .set_response_code(rcode);
            response.add_queries(request.queries().to_vec());
            for query in request.queries() {
                response.add_answers(answer(query.name(), query.query_type()));
            }
            let bytes = response.to_vec().unwrap();
            let _ = socket.send_to(&bytes, peer).await;
        }
    });

    (addr, queries)
}

fn resolver_for(addr: SocketAddr) -> Resolver {
    let upstream: UpstreamAddr = format!("udp://{addr}").parse().unwrap();
    Resolver::from_addrs(&[upstream]).unwrap()
}

#[tokio::test]
async fn test_lookup_host_over_udp() {
    let (addr, _) = spawn_dns_server(|name, qtype| match qtype {
        RecordType::A => vec![Record::from_rdata(
            name.clone(),
            60,
            RData::A(A::new(10, 1, 2, 3)),
        )],
        RecordType::AAAA => vec![Record::from_rdata(
            name.clone(),
            60,
            RData::AAAA(AAAA::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 3)),
        )],
        _ => vec![],
    })
    .await;

    let resolver: Arc<dyn Resolve> = Arc::new(resolver_for(addr));
    let ips = resolver.lookup_host(Name::new("example.test")).await.unwrap();
    assert_eq!(
        ips,
        vec![
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            "2001:db8::3".parse::<IpAddr>().unwrap()
        ]
    );
}

#[tokio::test]
async fn test_servfail_falls_back_to_next_upstream() {
    let (failing, failing_queries) =
        spawn_dns_server_with(ResponseCode::ServFail, |_, _| vec![]).await;
    let (working, _) = spawn_dns_server(|name, qtype| match qtype {
        RecordType::A => vec![Record::from_rdata(
            name.clone(),
            60,
            RData::A(A::new(10, 9, 9, 9)),
        )],
        _ => vec![],
    })
    .await;

    let upstreams: Vec<UpstreamAddr> = [failing, working]
        .iter()
        .map(|a| format!("udp://{a}").parse().unwrap())
        .collect();
    let resolver = Resolver::from_addrs(&upstreams)
        .unwrap()
        .with_ip_preference(IpPreference::V4Only);

    let ips = resolver.lookup_host(Name::new("fallback.test")).await.unwrap();
    assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9))]);
    assert!(failing_queries.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_ipv6_only_queries_aaaa() {
    let (addr, queries) = spawn_dns_server(|name, qtype| match qtype {
        RecordType::AAAA => vec![Record::from_rdata(
            name.clone(),
            60,
            RData::AAAA(AAAA::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 6)),
        )],
        _ => vec![],
    })
    .await;

    let resolver = resolver_for(addr).with_ip_preference(IpPreference::V6Only);
    let ips = resolver.lookup_host(Name::new("v6.test")).await.unwrap();
    assert_eq!(ips, vec!["2001:db8::6".parse::<IpAddr>().unwrap()]);
    assert_eq!(queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_records_is_empty_response() {
    let (addr, _) = spawn_dns_server(|_, _| vec![]).await;
    let resolver = resolver_for(addr);
    let err = resolver
        .resolve_host(&Name::new("nothing.test"))
        .await
        .unwrap_err();
    assert!(err.is_empty_response());
    assert!(err.to_string().contains("no A resource records"));
}

#[tokio::test]
async fn test_ech_configs_from_https_records() {
    let good = ech_list(&[ech_config(5, "public.test")]);
    let (addr, _) = spawn_dns_server(move |name, qtype| match qtype {
        RecordType::HTTPS => vec![
            https_record(name, vec![0xde, 0xad]),
            https_record(name, good.clone()),
        ],
        _ => vec![],
    })
    .await;

    let resolver = resolver_for(addr);
    let configs = resolver
        .lookup_ech_configs(Name::new("ech.test"))
        .await
        .unwrap();
    assert_eq!(configs.len(), 1);
    let selected = configs.select().unwrap();
    assert_eq!(selected.config_id, 5);
    assert_eq!(selected.public_name, "public.test");
}

#[tokio::test]
async fn test_https_record_without_ech_is_empty_response() {
    let (addr, _) = spawn_dns_server(|name, qtype| match qtype {
        RecordType::HTTPS => vec![Record::from_rdata(
            name.clone(),
            60,
            RData::HTTPS(HTTPS(SVCB::new(1, DnsName::root(), vec![]))),
        )],
        _ => vec![],
    })
    .await;

    let err = resolver_for(addr)
        .resolve_ech_configs(&Name::new("plain.test"))
        .await
        .unwrap_err();
    assert!(err.is_empty_response());
}

#[tokio::test]
async fn test_override_bypasses_unreachable_upstream() {
    let (addr, queries) = spawn_dns_server(|_, _| vec![]).await;
    let mut overrides = HashMap::new();
    overrides.insert(
        "pinned.test".to_string(),
        vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))],
    );

    let resolver = resolver_for(addr).with_overrides(overrides);
    let ips = resolver.lookup_host(Name::new("pinned.test")).await.unwrap();
    assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))]);
    assert_eq!(queries.load(Ordering::SeqCst), 0);
}

#[test]
fn test_upstream_list_parsing() {
    let list = UpstreamAddr::parse_list("tls://1.1.1.1, https://dns.google/dns-query,8.8.8.8").unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[0].port, 853);
    assert_eq!(list[1].port, 443);
    assert_eq!(list[2].port, 53);
    assert!(UpstreamAddr::parse_list("gopher://x").is_err());
}
