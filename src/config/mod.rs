//! Validated configuration built from the command line.
//!
//! [`Options`] is the raw clap surface; [`Config::from_options`] checks
//! every value once so the rest of the crate works with typed data only.

mod options;

pub use options::Options;

use crate::base::neterror::{HandshakeError, NetError, ProtocolError, ResolutionError};
use crate::dns::{normalize_ip, IpPreference, UpstreamAddr};
use crate::http::TransportKind;
use crate::socket::proxy::ProxySettings;
use crate::socket::splittls::TlsSplitConfig;
use crate::socket::tls::{TlsParams, TlsVersion};
use crate::tls::ech::EchConfigList;
use base64::{engine::general_purpose, Engine as _};
use http::{HeaderName, HeaderValue, Method};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Known `--experiment` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Experiment {
    PostQuantum,
}

impl Experiment {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pq" => Some(Experiment::PostQuantum),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub url: Url,
    pub method: Option<Method>,
    pub head: bool,
    pub data: Option<String>,
    /// In command-line order.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub proxy: Option<ProxySettings>,
    /// `host1:port1` → `host2:port2`.
    pub connect_to: HashMap<String, String>,
    pub resolve: HashMap<String, Vec<IpAddr>>,
    pub dns_servers: Vec<UpstreamAddr>,
    pub ip_preference: IpPreference,
    pub insecure: bool,
    pub tls_min: Option<TlsVersion>,
    pub tls_max: Option<TlsVersion>,
    pub ciphers: Option<String>,
    pub tls_server_name: Option<String>,
    pub transport: TransportKind,
    pub force_http11: bool,
    pub ech: bool,
    pub ech_grease: bool,
    pub ech_configs: Option<EchConfigList>,
    pub experiments: HashMap<Experiment, String>,
    pub tls_split: Option<TlsSplitConfig>,
    pub connect_timeout: Option<Duration>,
    pub json_output: bool,
    pub output_path: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    pub fn from_options(opts: Options) -> Result<Self, NetError> {
        let raw_url = opts
            .url_arg
            .as_deref()
            .or(opts.url.as_deref())
            .ok_or_else(|| NetError::InvalidConfig("no URL specified".into()))?;
        let url = parse_url(raw_url)?;

        let method = opts
            .method
            .as_deref()
            .map(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| NetError::InvalidConfig(format!("invalid method {m:?}")))
            })
            .transpose()?;

        let headers = opts
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<_, _>>()?;

        let proxy = opts
            .proxy
            .as_deref()
            .map(parse_proxy)
            .transpose()?
            .map(|p| p.with_insecure(opts.proxy_insecure));

        let ip_preference = match (opts.ipv4, opts.ipv6) {
            (true, true) => {
                return Err(NetError::InvalidConfig(
                    "--ipv4 and --ipv6 are mutually exclusive".into(),
                ))
            }
            (true, false) => IpPreference::V4Only,
            (false, true) => IpPreference::V6Only,
            (false, false) => IpPreference::Any,
        };

        let tls_min = if opts.tlsv13 {
            Some(TlsVersion::TLS_1_3)
        } else if opts.tlsv12 {
            Some(TlsVersion::TLS_1_2)
        } else {
            None
        };
        let tls_max = opts
            .tls_max
            .as_deref()
            .map(|v| {
                TlsVersion::parse(v)
                    .ok_or_else(|| NetError::InvalidConfig(format!("invalid --tls-max {v:?}")))
            })
            .transpose()?;

        let transport = if opts.http3 {
            TransportKind::Http3
        } else if opts.http2 {
            TransportKind::Http2
        } else {
            TransportKind::Auto
        };

        if let Some(raw) = opts.tls_random.as_deref() {
            parse_tls_random(raw)?;
            return Err(NetError::InvalidConfig(
                "--tls-random: BoringSSL does not let the client choose the ClientHello random"
                    .into(),
            ));
        }

        let ech_configs = opts.ech_config.as_deref().map(parse_ech_configs).transpose()?;
        let experiments = parse_experiments(&opts.experiments)?;

        Ok(Self {
            url,
            method,
            head: opts.head,
            data: opts.data,
            headers,
            proxy,
            connect_to: parse_connect_to(&opts.connect_to)?,
            resolve: parse_resolve(&opts.resolve)?,
            dns_servers: match opts.dns_servers.as_deref() {
                Some(list) => UpstreamAddr::parse_list(list)?,
                None => Vec::new(),
            },
            ip_preference,
            insecure: opts.insecure,
            tls_min,
            tls_max,
            ciphers: opts.ciphers.as_deref().map(normalize_ciphers),
            tls_server_name: opts.tls_server_name,
            transport,
            force_http11: opts.http11,
            ech: opts.ech || ech_configs.is_some(),
            ech_grease: opts.ech_grease,
            ech_configs,
            experiments,
            tls_split: opts
                .tls_split_hello
                .as_deref()
                .map(parse_tls_split)
                .transpose()?,
            connect_timeout: opts.connect_timeout.map(parse_timeout).transpose()?,
            json_output: opts.json_output,
            output_path: opts.output,
            verbose: opts.verbose,
        })
    }

    pub fn post_quantum(&self) -> bool {
        self.experiments.contains_key(&Experiment::PostQuantum)
    }

    /// Handshake template; the server name is filled in per request.
    pub fn tls_params(&self) -> TlsParams {
        let mut params = TlsParams::new("");
        params.min_version = self.tls_min;
        params.max_version = self.tls_max;
        params.cipher_list = self.ciphers.clone();
        params.ech = self.ech;
        params.ech_grease = self.ech_grease;
        params.post_quantum = self.post_quantum();
        params.insecure = self.insecure;
        params
    }
}

fn parse_url(raw: &str) -> Result<Url, NetError> {
    let url = Url::parse(raw).map_err(|e| NetError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(ProtocolError::UnsupportedScheme {
                scheme: other.to_string(),
                transport: "echcurl",
            }
            .into())
        }
    }
    if url.host_str().is_none() {
        return Err(NetError::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// `Name: value`; a header without a colon gets an empty value.
fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), NetError> {
    let (name, value) = raw.split_once(':').unwrap_or((raw, ""));
    let invalid = || NetError::InvalidConfig(format!("invalid header {raw:?}"));
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((name, value))
}

/// A proxy without a scheme is an HTTP proxy.
fn parse_proxy(raw: &str) -> Result<ProxySettings, NetError> {
    if raw.contains("://") {
        ProxySettings::new(raw)
    } else {
        ProxySettings::new(&format!("http://{raw}"))
    }
}

fn parse_connect_to(entries: &[String]) -> Result<HashMap<String, String>, NetError> {
    entries
        .iter()
        .map(|entry| {
            let parts: Vec<&str> = entry.splitn(4, ':').collect();
            match parts.as_slice() {
                [h1, p1, h2, p2] => Ok((format!("{h1}:{p1}"), format!("{h2}:{p2}"))),
                _ => Err(NetError::InvalidConfig(format!(
                    "invalid connect-to {entry:?}, expected HOST1:PORT1:HOST2:PORT2"
                ))),
            }
        })
        .collect()
}

/// `[+]HOST:PORT:ADDR[,ADDR...]`. The port is not used.
fn parse_resolve(entries: &[String]) -> Result<HashMap<String, Vec<IpAddr>>, NetError> {
    let mut map = HashMap::new();
    for entry in entries {
        let invalid = || ResolutionError::InvalidOverride(entry.clone());
        let trimmed = entry.strip_prefix('+').unwrap_or(entry);
        let parts: Vec<&str> = trimmed.splitn(3, ':').collect();
        let [host, _port, addrs] = parts.as_slice() else {
            return Err(invalid().into());
        };

        let ips = addrs
            .split(',')
            .map(|a| a.trim().trim_start_matches('[').trim_end_matches(']'))
            .filter(|a| !a.is_empty())
            .map(|a| a.parse::<IpAddr>().map(normalize_ip).map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        if ips.is_empty() || host.is_empty() {
            return Err(invalid().into());
        }
        map.insert(host.to_string(), ips);
    }
    Ok(map)
}

fn parse_tls_split(raw: &str) -> Result<TlsSplitConfig, NetError> {
    let invalid = || {
        NetError::InvalidConfig(format!(
            "invalid tls-split-hello {raw:?}, expected CHUNKSIZE:DELAY"
        ))
    };
    let (chunk, delay) = raw.split_once(':').ok_or_else(invalid)?;
    let chunk_size: usize = chunk.trim().parse().map_err(|_| invalid())?;
    let delay: u64 = delay.trim().parse().map_err(|_| invalid())?;
    if chunk_size == 0 {
        return Err(invalid());
    }
    Ok(TlsSplitConfig {
        chunk_size,
        delay: Duration::from_millis(delay),
    })
}

fn parse_ech_configs(raw: &str) -> Result<EchConfigList, NetError> {
    let bytes = general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| HandshakeError::InvalidEchConfig(format!("invalid base64: {e}")))?;
    let list = EchConfigList::parse(&bytes)
        .map_err(|e| HandshakeError::InvalidEchConfig(e.to_string()))?;
    if list.select().is_none() {
        return Err(HandshakeError::InvalidEchConfig(
            "no config with a supported cipher suite".into(),
        )
        .into());
    }
    Ok(list)
}

fn parse_tls_random(raw: &str) -> Result<[u8; 32], NetError> {
    let bytes = general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| NetError::InvalidConfig(format!("invalid tls-random: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        NetError::InvalidConfig(format!(
            "invalid tls-random: expected 32 bytes, got {}",
            bytes.len()
        ))
    })
}

fn parse_experiments(entries: &[String]) -> Result<HashMap<Experiment, String>, NetError> {
    entries
        .iter()
        .map(|entry| {
            let (name, value) = entry.split_once(':').unwrap_or((entry, ""));
            let experiment = Experiment::parse(name)
                .ok_or_else(|| NetError::InvalidConfig(format!("invalid experiment {entry:?}")))?;
            Ok((experiment, value.to_string()))
        })
        .collect()
}

fn normalize_ciphers(raw: &str) -> String {
    raw.split([' ', ',', ':'])
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_timeout(secs: f64) -> Result<Duration, NetError> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| NetError::InvalidConfig(format!("invalid connect-timeout {secs}")))
}
