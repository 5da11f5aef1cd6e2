use clap::Parser;
use echcurl::base::neterror::{NetError, ProtocolError};
use echcurl::config::{Config, Options};
use echcurl::http::{build_request, describe_request, is_websocket, Transport};
use echcurl::output::{log_response, Output};
use echcurl::ws;
use http::Method;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "echcurl=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .try_init();
}

async fn run(cfg: Config) -> Result<(), NetError> {
    let transport = Transport::from_config(&cfg)?;
    let req = build_request(&cfg)?;
    let ws_key = req
        .headers()
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let head_only = cfg.head || req.method() == Method::HEAD;

    for line in describe_request(&req).lines() {
        tracing::debug!("> {line}");
    }

    let mut resp = transport.round_trip(req).await?;
    let conn = transport.last_connection();
    log_response(&resp, conn.as_ref());

    let body = if is_websocket(&cfg.url) && ws::is_websocket_response(&resp) {
        if let Some(key) = &ws_key {
            ws::verify_accept(&resp, key)?;
        }
        let upgrade = transport
            .take_upgrade()
            .ok_or_else(|| ProtocolError::WebSocket("no upgraded connection".into()))?;
        Some(ws::exchange(upgrade, cfg.data.as_deref()).await?)
    } else if head_only {
        None
    } else {
        Some(resp.bytes().await?)
    };

    let mut output = Output::new(cfg.output_path.as_deref(), cfg.json_output)?;
    let tls = conn.as_ref().and_then(|c| c.tls.as_ref());
    output.write_response(&resp, body.as_deref(), tls)
}

#[tokio::main]
async fn main() {
    let opts = Options::parse();
    init_tracing(opts.verbose);

    let result = match Config::from_options(opts) {
        Ok(cfg) => run(cfg).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(e.exit_code());
    }
}
