//! Response body, either still streaming from hyper or already buffered
//! (HTTP/3 and WebSocket frames arrive complete).

use crate::base::neterror::{NetError, ProtocolError};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;

pub enum ResponseBody {
    Incoming(Incoming),
    Full(Bytes),
}

impl ResponseBody {
    /// Read the entire body.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        match self {
            ResponseBody::Incoming(body) => {
                let collected = body
                    .collect()
                    .await
                    .map_err(|e| ProtocolError::Body(e.to_string()))?;
                Ok(collected.to_bytes())
            }
            ResponseBody::Full(bytes) => Ok(bytes),
        }
    }

    /// Read the body as UTF-8, replacing invalid sequences.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Incoming(_) => f.write_str("ResponseBody::Incoming"),
            ResponseBody::Full(b) => write!(f, "ResponseBody::Full({} bytes)", b.len()),
        }
    }
}
