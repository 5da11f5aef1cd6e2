//! Building the outgoing request from the configuration.

use crate::base::neterror::NetError;
use crate::config::Config;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, UPGRADE, USER_AGENT};
use http::{HeaderValue, Method, Request, Uri};
use url::Url;

/// `ws://` and `wss://` targets.
pub fn is_websocket(url: &Url) -> bool {
    matches!(url.scheme(), "ws" | "wss")
}

/// Method precedence: explicit, then HEAD for `-I`, then POST when there
/// is data, then GET. WebSocket upgrades are always GET.
pub fn request_method(cfg: &Config) -> Method {
    if is_websocket(&cfg.url) {
        Method::GET
    } else if let Some(method) = &cfg.method {
        method.clone()
    } else if cfg.head {
        Method::HEAD
    } else if cfg.data.is_some() {
        Method::POST
    } else {
        Method::GET
    }
}

/// Random 16-byte `Sec-WebSocket-Key`.
pub fn websocket_key() -> Result<String, NetError> {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key)
        .map_err(|e| NetError::Io(std::sync::Arc::new(std::io::Error::other(e.to_string()))))?;
    Ok(general_purpose::STANDARD.encode(key))
}

/// The URL as it goes on the wire: WebSocket schemes become HTTP schemes.
pub fn wire_url(url: &Url) -> Url {
    let mut url = url.clone();
    let scheme = match url.scheme() {
        "ws" => Some("http"),
        "wss" => Some("https"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        // ws/wss and http/https are all special schemes, so this cannot fail.
        let _ = url.set_scheme(scheme);
    }
    url
}

/// Build the request. The URI is absolute; transports rewrite it as their
/// protocol requires.
pub fn build_request(cfg: &Config) -> Result<Request<Bytes>, NetError> {
    let websocket = is_websocket(&cfg.url);
    let url = wire_url(&cfg.url);
    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;

    // WebSocket data is sent as a frame after the upgrade.
    let body = match (&cfg.data, websocket) {
        (Some(data), false) => Bytes::from(data.clone()),
        _ => Bytes::new(),
    };

    let mut req = Request::builder()
        .method(request_method(cfg))
        .uri(uri)
        .body(body)
        .map_err(|e| NetError::InvalidConfig(e.to_string()))?;

    let headers = req.headers_mut();
    for (name, value) in &cfg.headers {
        headers.append(name.clone(), value.clone());
    }

    if cfg.data.is_some() && !websocket && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
    }

    if websocket {
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("sec-websocket-version", HeaderValue::from_static("13"));
        let key = HeaderValue::from_str(&websocket_key()?)
            .map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        headers.insert("sec-websocket-key", key);
    }

    Ok(req)
}

/// Request line and headers for verbose logging.
pub fn describe_request<B>(req: &Request<B>) -> String {
    let mut out = format!("{} {} {:?}\r\n", req.method(), req.uri(), req.version());
    for (name, value) in req.headers() {
        out.push_str(&format!(
            "{}: {}\r\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    out
}
