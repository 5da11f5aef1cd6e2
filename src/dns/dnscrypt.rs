//! DNSCrypt v2 upstream.
//!
//! The resolver certificate is fetched once as a plain TXT record for the
//! provider name and checked against the provider's Ed25519 key. Queries are
//! then sealed in a NaCl box between a per-upstream X25519 key and the
//! resolver key from the certificate.
//!
//! ```text
//! query:    client-magic(8) client-pk(32) client-nonce(12) box(padded query)
//! response: resolver-magic(8) nonce(24) box(padded response)
//! ```
//!
//! UDP is used first; a truncated answer is retried over TCP.

use super::upstream::{DnsAnswer, DnsCryptProvider, Exchanging, Upstream, UpstreamAddr};
use super::Name;
use crate::base::neterror::ResolutionError;
use crypto_box::aead::{self, generic_array::GenericArray, AeadInPlace};
use crypto_box::{ChaChaBox, PublicKey, SalsaBox, SecretKey};
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query};
use hickory_resolver::proto::rr::{Name as DnsName, RData, RecordType};
use ring::signature::{UnparsedPublicKey, ED25519};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::OnceCell;

const CERT_MAGIC: &[u8; 4] = b"DNSC";
const RESOLVER_MAGIC: [u8; 8] = [0x72, 0x36, 0x66, 0x6e, 0x67, 0x47, 0x77, 0x6a];
/// Magic, version, minor, signature, resolver key, client magic, serial, validity.
const MIN_CERT_LEN: usize = 4 + 2 + 2 + 64 + 32 + 8 + 4 + 4 + 4;
const NONCE_LEN: usize = 24;
const HALF_NONCE: usize = NONCE_LEN / 2;
const TAG_LEN: usize = 16;
/// UDP queries are padded to at least this size.
const MIN_UDP_QUERY_LEN: usize = 256;
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Box construction named by the certificate's version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cipher {
    XSalsa20Poly1305,
    XChaCha20Poly1305,
}

impl Cipher {
    /// Returns `tag || ciphertext`.
    fn seal(
        self,
        peer: &[u8; 32],
        secret: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        mut body: Vec<u8>,
    ) -> Result<Vec<u8>, aead::Error> {
        let peer = PublicKey::from(*peer);
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            Cipher::XSalsa20Poly1305 => {
                SalsaBox::new(&peer, secret).encrypt_in_place_detached(nonce, b"", &mut body)?
            }
            Cipher::XChaCha20Poly1305 => {
                ChaChaBox::new(&peer, secret).encrypt_in_place_detached(nonce, b"", &mut body)?
            }
        };
        let mut out = Vec::with_capacity(TAG_LEN + body.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn open(
        self,
        peer: &[u8; 32],
        secret: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        sealed: &[u8],
    ) -> Result<Vec<u8>, aead::Error> {
        if sealed.len() < TAG_LEN {
            return Err(aead::Error);
        }
        let (tag, ciphertext) = sealed.split_at(TAG_LEN);
        let peer = PublicKey::from(*peer);
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(tag);
        let mut body = ciphertext.to_vec();
        match self {
            Cipher::XSalsa20Poly1305 => {
                SalsaBox::new(&peer, secret).decrypt_in_place_detached(nonce, b"", &mut body, tag)?
            }
            Cipher::XChaCha20Poly1305 => {
                ChaChaBox::new(&peer, secret).decrypt_in_place_detached(nonce, b"", &mut body, tag)?
            }
        }
        Ok(body)
    }
}

/// A verified resolver certificate.
#[derive(Debug, Clone)]
struct ResolverCert {
    cipher: Cipher,
    resolver_pk: [u8; 32],
    client_magic: [u8; 8],
    serial: u32,
}

impl ResolverCert {
    fn parse(bin: &[u8], provider_pk: &[u8; 32], now: u32) -> Result<Self, String> {
        if bin.len() < MIN_CERT_LEN {
            return Err(format!("certificate too short ({} bytes)", bin.len()));
        }
        if &bin[..4] != CERT_MAGIC {
            return Err("bad certificate magic".into());
        }
        let cipher = match u16::from_be_bytes([bin[4], bin[5]]) {
            1 => Cipher::XSalsa20Poly1305,
            2 => Cipher::XChaCha20Poly1305,
            other => return Err(format!("unsupported certificate version {other}")),
        };

        let (signature, signed) = (&bin[8..72], &bin[72..]);
        UnparsedPublicKey::new(&ED25519, provider_pk)
            .verify(signed, signature)
            .map_err(|_| "certificate signature does not match the provider key")?;

        let ts_start = u32::from_be_bytes(array(&bin[116..120]));
        let ts_end = u32::from_be_bytes(array(&bin[120..124]));
        if now < ts_start || now > ts_end {
            return Err(format!("certificate valid from {ts_start} to {ts_end}, now {now}"));
        }

        Ok(Self {
            cipher,
            resolver_pk: array(&bin[72..104]),
            client_magic: array(&bin[104..112]),
            serial: u32::from_be_bytes(array(&bin[112..116])),
        })
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// ISO/IEC 7816-4 padding to a multiple of 64 bytes.
fn pad(msg: &[u8], min_len: usize) -> Vec<u8> {
    let len = (msg.len() + 1).max(min_len).next_multiple_of(64);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(msg);
    out.push(0x80);
    out.resize(len, 0);
    out
}

fn unpad(padded: &[u8]) -> Option<&[u8]> {
    let end = padded.iter().rposition(|&b| b != 0)?;
    (padded[end] == 0x80).then(|| &padded[..end])
}

/// Client key pair bound to one resolver certificate.
struct Session {
    cert: ResolverCert,
    secret: SecretKey,
    public: [u8; 32],
}

impl Session {
    fn new(cert: ResolverCert) -> Result<Self, getrandom::Error> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed)?;
        let secret = SecretKey::from(seed);
        let public = *secret.public_key().as_bytes();
        Ok(Self { cert, secret, public })
    }

    /// Returns the packet and the client half of the nonce.
    fn encrypt(&self, wire: &[u8], min_len: usize) -> Result<(Vec<u8>, [u8; HALF_NONCE]), String> {
        let mut client_nonce = [0u8; HALF_NONCE];
        getrandom::fill(&mut client_nonce).map_err(|e| e.to_string())?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..HALF_NONCE].copy_from_slice(&client_nonce);

        let sealed = self
            .cert
            .cipher
            .seal(&self.cert.resolver_pk, &self.secret, &nonce, pad(wire, min_len))
            .map_err(|_| "query encryption failed")?;

        let mut packet = Vec::with_capacity(8 + 32 + HALF_NONCE + sealed.len());
        packet.extend_from_slice(&self.cert.client_magic);
        packet.extend_from_slice(&self.public);
        packet.extend_from_slice(&client_nonce);
        packet.extend_from_slice(&sealed);
        Ok((packet, client_nonce))
    }

    fn decrypt(&self, packet: &[u8], client_nonce: &[u8; HALF_NONCE]) -> Result<Message, String> {
        let header = RESOLVER_MAGIC.len() + NONCE_LEN;
        if packet.len() < header + TAG_LEN || packet[..RESOLVER_MAGIC.len()] != RESOLVER_MAGIC {
            return Err("not a DNSCrypt response".into());
        }
        let nonce: [u8; NONCE_LEN] = array(&packet[RESOLVER_MAGIC.len()..header]);
        if nonce[..HALF_NONCE] != client_nonce[..] {
            return Err("response nonce does not match the query".into());
        }

        let body = self
            .cert
            .cipher
            .open(&self.cert.resolver_pk, &self.secret, &nonce, &packet[header..])
            .map_err(|_| "response authentication failed")?;
        let wire = unpad(&body).ok_or("invalid response padding")?;
        Message::from_vec(wire).map_err(|e| e.to_string())
    }
}

/// A DNSCrypt resolver, as described by an `sdns://` stamp.
pub struct DnsCryptUpstream {
    server: SocketAddr,
    provider: DnsCryptProvider,
    display: String,
    session: OnceCell<Session>,
}

impl DnsCryptUpstream {
    pub fn new(addr: UpstreamAddr) -> Result<Self, ResolutionError> {
        let display = addr.to_string();
        let invalid = |reason: &str| ResolutionError::InvalidResolver {
            address: display.clone(),
            reason: reason.to_string(),
        };
        let provider = addr
            .provider
            .clone()
            .ok_or_else(|| invalid("missing DNSCrypt provider"))?;
        let ip = addr.ip().ok_or_else(|| invalid("DNSCrypt needs a resolver IP"))?;

        Ok(Self {
            server: SocketAddr::new(ip, addr.port),
            provider,
            display,
            session: OnceCell::new(),
        })
    }

    fn fail(&self, message: impl fmt::Display) -> ResolutionError {
        ResolutionError::Exchange {
            upstream: self.display.clone(),
            message: message.to_string(),
        }
    }

    async fn session(&self) -> Result<&Session, ResolutionError> {
        self.session.get_or_try_init(|| self.fetch_certificate()).await
    }

    async fn fetch_certificate(&self) -> Result<Session, ResolutionError> {
        let name = DnsName::from_ascii(format!("{}.", self.provider.name))
            .map_err(|e| self.fail(format!("invalid provider name: {e}")))?;
        let query = question(name, RecordType::TXT).map_err(|e| self.fail(e))?;
        let wire = query.to_vec().map_err(|e| self.fail(e))?;

        let reply = with_timeout(udp_exchange(self.server, &wire))
            .await
            .map_err(|e| self.fail(format!("certificate query: {e}")))?;
        let reply = Message::from_vec(&reply).map_err(|e| self.fail(e))?;
        if reply.id() != query.id() {
            return Err(self.fail("certificate response ID mismatch"));
        }

        let now = unix_now();
        let cert = reply
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::TXT(txt) => Some(txt.txt_data().concat()),
                _ => None,
            })
            .filter_map(|bin| match ResolverCert::parse(&bin, &self.provider.public_key, now) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    tracing::debug!(upstream = %self.display, error = %e, "skipping resolver certificate");
                    None
                }
            })
            .max_by_key(|cert| (cert.serial, cert.cipher == Cipher::XChaCha20Poly1305))
            .ok_or_else(|| self.fail("no valid resolver certificate"))?;

        tracing::debug!(
            upstream = %self.display,
            serial = cert.serial,
            cipher = ?cert.cipher,
            "DNSCrypt certificate accepted"
        );
        Session::new(cert).map_err(|e| self.fail(e))
    }

    async fn query(&self, name: &Name, qtype: RecordType) -> Result<DnsAnswer, ResolutionError> {
        let session = self.session().await?;
        let dns_name = DnsName::from_ascii(name.to_fqdn()).map_err(|e| self.fail(e))?;
        let query = question(dns_name, qtype).map_err(|e| self.fail(e))?;
        let wire = query.to_vec().map_err(|e| self.fail(e))?;
        tracing::debug!(upstream = %self.display, name = %name, %qtype, "sending DNSCrypt query");

        let (packet, nonce) = session.encrypt(&wire, MIN_UDP_QUERY_LEN).map_err(|e| self.fail(e))?;
        let reply = with_timeout(udp_exchange(self.server, &packet))
            .await
            .map_err(|e| self.fail(e))?;
        let mut response = session.decrypt(&reply, &nonce).map_err(|e| self.fail(e))?;

        if response.truncated() {
            tracing::debug!(upstream = %self.display, "truncated response, retrying over TCP");
            let (packet, nonce) = session.encrypt(&wire, 0).map_err(|e| self.fail(e))?;
            let reply = with_timeout(tcp_exchange(self.server, &packet))
                .await
                .map_err(|e| self.fail(e))?;
            response = session.decrypt(&reply, &nonce).map_err(|e| self.fail(e))?;
        }

        if response.id() != query.id() {
            return Err(self.fail("response ID mismatch"));
        }
        Ok(DnsAnswer::new(
            response.response_code(),
            response.answers().iter().map(|r| r.data().clone()).collect(),
        ))
    }
}

impl Upstream for DnsCryptUpstream {
    fn address(&self) -> &str {
        &self.display
    }

    fn exchange(&self, name: &Name, qtype: RecordType) -> Exchanging<'_> {
        let name = name.clone();
        Box::pin(async move { self.query(&name, qtype).await })
    }
}

impl fmt::Debug for DnsCryptUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsCryptUpstream")
            .field("address", &self.display)
            .field("has_certificate", &self.session.initialized())
            .finish_non_exhaustive()
    }
}

fn question(name: DnsName, qtype: RecordType) -> Result<Message, getrandom::Error> {
    let mut id = [0u8; 2];
    getrandom::fill(&mut id)?;
    let mut msg = Message::new();
    msg.set_id(u16::from_be_bytes(id))
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    msg.add_query(Query::query(name, qtype));
    Ok(msg)
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

async fn with_timeout<T>(fut: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()))
}

async fn udp_exchange(server: SocketAddr, packet: &[u8]) -> io::Result<Vec<u8>> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(packet).await?;

    let mut buf = vec![0u8; u16::MAX as usize];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

/// One length-prefixed exchange.
async fn tcp_exchange(server: SocketAddr, packet: &[u8]) -> io::Result<Vec<u8>> {
    let len = u16::try_from(packet.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query too large"))?;
    let mut framed = Vec::with_capacity(2 + packet.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(packet);

    let mut stream = TcpStream::connect(server).await?;
    stream.write_all(&framed).await?;

    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await?;
    let mut reply = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::UpstreamProtocol;
    use hickory_resolver::proto::op::ResponseCode;
    use hickory_resolver::proto::rr::rdata::{A, TXT};
    use hickory_resolver::proto::rr::Record;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CLIENT_MAGIC: [u8; 8] = *b"testmagc";

    fn signing_key() -> Ed25519KeyPair {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn certificate(signer: &Ed25519KeyPair, resolver_pk: &[u8; 32], valid: (u32, u32)) -> Vec<u8> {
        let mut signed = resolver_pk.to_vec();
        signed.extend_from_slice(&CLIENT_MAGIC);
        signed.extend_from_slice(&7u32.to_be_bytes());
        signed.extend_from_slice(&valid.0.to_be_bytes());
        signed.extend_from_slice(&valid.1.to_be_bytes());

        let mut cert = CERT_MAGIC.to_vec();
        cert.extend_from_slice(&2u16.to_be_bytes());
        cert.extend_from_slice(&0u16.to_be_bytes());
        cert.extend_from_slice(signer.sign(&signed).as_ref());
        cert.extend_from_slice(&signed);
        cert
    }

    fn respond(request: &Message, answers: Vec<Record>) -> Vec<u8> {
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(request.op_code())
            .set_response_code(ResponseCode::NoError);
        response.add_queries(request.queries().to_vec());
        response.add_answers(answers);
        response.to_vec().unwrap()
    }

    /// Local DNSCrypt resolver answering every A query with 10.0.0.53.
    /// Returns its address and the number of certificate queries served.
    async fn spawn_resolver(cert: Vec<u8>, secret: SecretKey) -> (SocketAddr, Arc<AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cert_queries = Arc::new(AtomicUsize::new(0));
        let counter = cert_queries.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let packet = &buf[..n];

                if !packet.starts_with(&CLIENT_MAGIC) {
                    let request = Message::from_vec(packet).unwrap();
                    counter.fetch_add(1, Ordering::SeqCst);
                    let name = request.queries()[0].name().clone();
                    let txt = TXT::from_bytes(vec![&cert[..]]);
                    let reply = respond(&request, vec![Record::from_rdata(name, 60, RData::TXT(txt))]);
                    socket.send_to(&reply, peer).await.unwrap();
                    continue;
                }

                let client_pk: [u8; 32] = array(&packet[8..40]);
                let mut nonce = [0u8; NONCE_LEN];
                nonce[..HALF_NONCE].copy_from_slice(&packet[40..52]);
                let body = Cipher::XChaCha20Poly1305
                    .open(&client_pk, &secret, &nonce, &packet[52..])
                    .unwrap();
                assert_eq!(body.len() % 64, 0);
                assert!(body.len() >= MIN_UDP_QUERY_LEN);
                let request = Message::from_vec(unpad(&body).unwrap()).unwrap();

                let name = request.queries()[0].name().clone();
                let wire = respond(
                    &request,
                    vec![Record::from_rdata(name, 60, RData::A(A::new(10, 0, 0, 53)))],
                );
                nonce[HALF_NONCE..].copy_from_slice(&[7; HALF_NONCE]);
                let sealed = Cipher::XChaCha20Poly1305
                    .seal(&client_pk, &secret, &nonce, pad(&wire, 0))
                    .unwrap();

                let mut reply = RESOLVER_MAGIC.to_vec();
                reply.extend_from_slice(&nonce);
                reply.extend_from_slice(&sealed);
                socket.send_to(&reply, peer).await.unwrap();
            }
        });

        (addr, cert_queries)
    }

    fn upstream_for(addr: SocketAddr, provider_key: &Ed25519KeyPair) -> DnsCryptUpstream {
        let mut upstream = UpstreamAddr::new(UpstreamProtocol::DnsCrypt, "127.0.0.1", addr.port());
        upstream.provider = Some(DnsCryptProvider {
            name: "2.dnscrypt-cert.example.test".into(),
            public_key: array(provider_key.public_key().as_ref()),
        });
        DnsCryptUpstream::new(upstream).unwrap()
    }

    fn resolver_secret() -> SecretKey {
        SecretKey::from([0x5a; 32])
    }

    #[tokio::test]
    async fn test_exchange_with_local_resolver() {
        let provider = signing_key();
        let secret = resolver_secret();
        let cert = certificate(&provider, secret.public_key().as_bytes(), (0, u32::MAX));
        let (addr, cert_queries) = spawn_resolver(cert, secret).await;

        let upstream = upstream_for(addr, &provider);
        assert_eq!(
            upstream.address(),
            format!("dnscrypt://2.dnscrypt-cert.example.test@127.0.0.1:{}", addr.port())
        );

        for _ in 0..2 {
            let answer = upstream
                .exchange(&Name::new("example.test"), RecordType::A)
                .await
                .unwrap();
            assert_eq!(answer.rcode, ResponseCode::NoError);
            let ips: Vec<_> = answer
                .matching(RecordType::A)
                .filter_map(|r| match r {
                    RData::A(a) => Some(a.0),
                    _ => None,
                })
                .collect();
            assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 53)]);
        }
        assert_eq!(cert_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_certificate_from_other_provider_rejected() {
        let secret = resolver_secret();
        let cert = certificate(&signing_key(), secret.public_key().as_bytes(), (0, u32::MAX));
        let (addr, _) = spawn_resolver(cert, secret).await;

        let err = upstream_for(addr, &signing_key())
            .exchange(&Name::new("example.test"), RecordType::A)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Exchange { .. }));
        assert!(err.to_string().contains("no valid resolver certificate"));
    }

    #[test]
    fn test_certificate_validity_window() {
        let provider = signing_key();
        let pk: [u8; 32] = array(provider.public_key().as_ref());
        let cert = certificate(&provider, &[3; 32], (1_000, 2_000));

        let parsed = ResolverCert::parse(&cert, &pk, 1_500).unwrap();
        assert_eq!(parsed.cipher, Cipher::XChaCha20Poly1305);
        assert_eq!(parsed.resolver_pk, [3; 32]);
        assert_eq!(parsed.client_magic, CLIENT_MAGIC);
        assert_eq!(parsed.serial, 7);

        assert!(ResolverCert::parse(&cert, &pk, 2_001).unwrap_err().contains("valid from"));
        assert!(ResolverCert::parse(&cert[..100], &pk, 1_500).is_err());
    }

    #[test]
    fn test_padding() {
        let padded = pad(&[1; 10], MIN_UDP_QUERY_LEN);
        assert_eq!(padded.len(), 256);
        assert_eq!(padded[10], 0x80);
        assert_eq!(unpad(&padded), Some(&[1u8; 10][..]));

        assert_eq!(pad(&[1; 300], 0).len(), 320);
        assert_eq!(pad(&[1; 63], 0).len(), 64);
        assert_eq!(unpad(&[1, 0, 0]), None);
    }

    #[test]
    fn test_upstream_requires_provider_and_ip() {
        let addr = UpstreamAddr::new(UpstreamProtocol::DnsCrypt, "127.0.0.1", 443);
        assert!(matches!(
            DnsCryptUpstream::new(addr).unwrap_err(),
            ResolutionError::InvalidResolver { .. }
        ));
    }
}
