//! HTTP request building, responses and the protocol transport.

pub mod request;
pub mod response;
pub mod responsebody;
pub mod transport;

pub use request::{build_request, describe_request, is_websocket};
pub use response::HttpResponse;
pub use responsebody::ResponseBody;
pub use transport::{ConnectionInfo, Transport, TransportKind};
