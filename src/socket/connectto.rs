//! Endpoint redirection (`--connect-to`).
//!
//! Only the dial target changes. The Host header and the TLS server name are
//! derived from the request URL by the layers above and never see the mapping.

use super::dialer::{Dial, DialStage, Dialing, HostAddr, Network};
use crate::base::neterror::NetError;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct ConnectToDialer {
    inner: Arc<dyn Dial>,
    /// Keyed by `host:port` as the request addresses it.
    map: HashMap<String, HostAddr>,
}

impl ConnectToDialer {
    /// Builds the stage from `host1:port1` → `host2:port2` pairs.
    pub fn new(inner: Arc<dyn Dial>, map: &HashMap<String, String>) -> Result<Self, NetError> {
        let map = map
            .iter()
            .map(|(from, to)| {
                let from = HostAddr::parse(Network::Tcp, from)?.to_string();
                let to = HostAddr::parse(Network::Tcp, to)?;
                Ok((from, to))
            })
            .collect::<Result<_, NetError>>()?;
        Ok(Self { inner, map })
    }

    /// The redirected address, keeping the requested network.
    pub fn rewrite(&self, addr: &HostAddr) -> Option<HostAddr> {
        self.map
            .get(&addr.to_string())
            .map(|to| to.clone().with_network(addr.network))
    }
}

impl Dial for ConnectToDialer {
    fn dial(&self, addr: HostAddr) -> Dialing<'_> {
        let target = match self.rewrite(&addr) {
            Some(to) => {
                tracing::debug!(from = %addr, to = %to, "connecting to a different endpoint");
                to
            }
            None => addr,
        };
        self.inner.dial(target)
    }

    fn stage(&self) -> DialStage {
        DialStage::ConnectTo
    }

    fn inner(&self) -> Option<&dyn Dial> {
        Some(self.inner.as_ref())
    }
}
