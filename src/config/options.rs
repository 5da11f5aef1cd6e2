//! Command-line surface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "echcurl",
    version,
    about = "A curl-like HTTP client with Encrypted ClientHello, post-quantum TLS and HTTP/3"
)]
pub struct Options {
    /// Target URL (http, https, ws or wss)
    #[arg(value_name = "URL")]
    pub url_arg: Option<String>,

    /// Target URL, alternative to the positional argument
    #[arg(long = "url", value_name = "URL")]
    pub url: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long = "request", value_name = "METHOD")]
    pub method: Option<String>,

    /// Request body; sent as a text frame for WebSocket targets
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// Extra request header, `Name: value`
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Proxy URL: http, https, socks5 or socks5h
    #[arg(short = 'x', long = "proxy", value_name = "URL")]
    pub proxy: Option<String>,

    /// Skip certificate verification of an HTTPS proxy
    #[arg(long = "proxy-insecure")]
    pub proxy_insecure: bool,

    /// Connect to HOST2:PORT2 instead of HOST1:PORT1
    #[arg(long = "connect-to", value_name = "HOST1:PORT1:HOST2:PORT2")]
    pub connect_to: Vec<String>,

    /// Fetch headers only
    #[arg(short = 'I', long = "head")]
    pub head: bool,

    /// Skip certificate verification
    #[arg(short = 'k', long = "insecure")]
    pub insecure: bool,

    /// Use TLS 1.2 or newer
    #[arg(long = "tlsv1.2")]
    pub tlsv12: bool,

    /// Use TLS 1.3 or newer
    #[arg(long = "tlsv1.3")]
    pub tlsv13: bool,

    /// Maximum TLS version, 1.2 or 1.3
    #[arg(long = "tls-max", value_name = "VERSION")]
    pub tls_max: Option<String>,

    /// Cipher list, separated by spaces, commas or colons
    #[arg(long = "ciphers", value_name = "LIST")]
    pub ciphers: Option<String>,

    /// Server name for SNI and certificate checks
    #[arg(long = "tls-servername", value_name = "NAME")]
    pub tls_server_name: Option<String>,

    /// ClientHello random, base64 of 32 bytes. Rejected: BoringSSL picks its own
    #[arg(long = "tls-random", value_name = "BASE64")]
    pub tls_random: Option<String>,

    /// Force HTTP/1.1
    #[arg(long = "http1.1")]
    pub http11: bool,

    /// Force HTTP/2
    #[arg(long = "http2")]
    pub http2: bool,

    /// Force HTTP/3
    #[arg(long = "http3")]
    pub http3: bool,

    /// Use Encrypted ClientHello, looking the config up in DNS
    #[arg(long = "ech")]
    pub ech: bool,

    /// Send ECH GREASE when no ECH config is available
    #[arg(long = "echgrease")]
    pub ech_grease: bool,

    /// Base64 ECHConfigList; implies --ech
    #[arg(long = "echconfig", value_name = "BASE64")]
    pub ech_config: Option<String>,

    /// Resolve IPv4 addresses only
    #[arg(short = '4', long = "ipv4")]
    pub ipv4: bool,

    /// Resolve IPv6 addresses only
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Comma-separated DNS upstreams
    #[arg(long = "dns-servers", value_name = "LIST")]
    pub dns_servers: Option<String>,

    /// Fixed addresses for a host, `[+]HOST:PORT:ADDR[,ADDR...]`
    #[arg(long = "resolve", value_name = "HOST:PORT:ADDRS")]
    pub resolve: Vec<String>,

    /// Split the ClientHello, `CHUNKSIZE:DELAY_MS`
    #[arg(long = "tls-split-hello", value_name = "CHUNKSIZE:DELAY")]
    pub tls_split_hello: Option<String>,

    /// Connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECONDS")]
    pub connect_timeout: Option<f64>,

    /// Print the response as JSON
    #[arg(long = "json-output")]
    pub json_output: bool,

    /// Write the received data to a file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Experimental feature, `name[:value]`; known: pq
    #[arg(long = "experiment", value_name = "NAME[:VALUE]")]
    pub experiments: Vec<String>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
