use crate::base::neterror::{
    DialError, HandshakeError, NetError, ProtocolError, ResolutionError,
};
use std::time::Duration;

#[test]
fn test_bad_rcode_message() {
    let err = ResolutionError::BadRcode {
        qtype: "A".into(),
        upstream: "udp://10.0.0.1:53".into(),
        rcode: "SERVFAIL".into(),
    };
    assert_eq!(
        err.to_string(),
        "dns response A code from udp://10.0.0.1:53: SERVFAIL"
    );
    assert!(!err.is_empty_response());
}

#[test]
fn test_empty_response_detection() {
    let no_records = ResolutionError::NoRecords {
        qtype: "HTTPS".into(),
        upstream: "udp://10.0.0.1:53".into(),
    };
    assert!(no_records.is_empty_response());

    let exhausted = ResolutionError::Exhausted {
        host: "example.com".into(),
        errors: vec![
            ResolutionError::Exchange {
                upstream: "udp://10.0.0.1:53".into(),
                message: "timeout".into(),
            },
            no_records,
        ],
    };
    assert!(exhausted.is_empty_response());

    let exchange_only = ResolutionError::Exhausted {
        host: "example.com".into(),
        errors: vec![ResolutionError::Exchange {
            upstream: "udp://10.0.0.1:53".into(),
            message: "timeout".into(),
        }],
    };
    assert!(!exchange_only.is_empty_response());
}

#[test]
fn test_aggregated_message_lists_every_error() {
    let err = ResolutionError::Empty {
        host: "example.com".into(),
        errors: vec![
            ResolutionError::Exchange {
                upstream: "a".into(),
                message: "x".into(),
            },
            ResolutionError::Exchange {
                upstream: "b".into(),
                message: "y".into(),
            },
        ],
    };
    let msg = err.to_string();
    assert!(msg.starts_with("empty response for example.com"));
    assert!(msg.contains("with a failed: x"));
    assert!(msg.contains("with b failed: y"));
}

#[test]
fn test_exit_codes() {
    let resolve: NetError = ResolutionError::NoResolvers.into();
    assert_eq!(resolve.exit_code(), 6);

    let timeout: NetError = DialError::Timeout {
        host: "h".into(),
        port: 1,
        timeout: Duration::from_secs(1),
    }
    .into();
    assert_eq!(timeout.exit_code(), 28);

    let rejected: NetError = DialError::ProxyRejected {
        proxy: "p:80".into(),
        status: "407 Proxy Authentication Required".into(),
    }
    .into();
    assert_eq!(rejected.exit_code(), 5);

    let cert: NetError = HandshakeError::CertificateVerification {
        host: "h".into(),
        message: "self signed".into(),
    }
    .into();
    assert_eq!(cert.exit_code(), 60);

    let tls: NetError = HandshakeError::Failed {
        host: "h".into(),
        message: "alert".into(),
    }
    .into();
    assert_eq!(tls.exit_code(), 35);

    let h2: NetError = ProtocolError::Http2("preface".into()).into();
    assert_eq!(h2.exit_code(), 16);

    assert_eq!(NetError::InvalidUrl("x".into()).exit_code(), 3);
    assert_eq!(NetError::InvalidConfig("x".into()).exit_code(), 2);
}
