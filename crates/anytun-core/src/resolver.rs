// SPDX-License-Identifier: MIT

//! Async endpoint resolution for UDP/TCP targets, with address-family
//! filtering and a failure callback for startup-time errors.

use std::net::SocketAddr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    Any,
    Ipv4Only,
    Ipv6Only,
}

impl AddressFilter {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFilter::Any => true,
            AddressFilter::Ipv4Only => addr.is_ipv4(),
            AddressFilter::Ipv6Only => addr.is_ipv6(),
        }
    }
}

/// Resolve `host:port` to every matching candidate address, filtered
/// by `filter`. Callers take the first candidate or iterate for a
/// fallback strategy.
pub async fn resolve(host: &str, port: u16, filter: AddressFilter) -> Result<Vec<SocketAddr>> {
    let query = format!("{host}:{port}");
    let addrs = tokio::net::lookup_host(&query)
        .await
        .map_err(|e| Error::Resolve(format!("{query}: {e}")))?;

    let candidates: Vec<SocketAddr> = addrs.filter(|a| filter.accepts(a)).collect();
    if candidates.is_empty() {
        return Err(Error::Resolve(format!(
            "{query}: no addresses matched filter {filter:?}"
        )));
    }
    Ok(candidates)
}

/// Resolves `host:port` and invokes `on_failure` with the error
/// instead of returning it, for callers that want to inject a
/// startup-resolution failure into their own fatal-event path rather
/// than propagate a `Result`.
pub async fn resolve_or_notify<F>(host: &str, port: u16, filter: AddressFilter, on_failure: F) -> Option<Vec<SocketAddr>>
where
    F: FnOnce(Error),
{
    match resolve(host, port, filter).await {
        Ok(addrs) => Some(addrs),
        Err(e) => {
            on_failure(e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let addrs = resolve("localhost", 12345, AddressFilter::Any).await.unwrap();
        assert!(!addrs.is_empty());
    }

    #[tokio::test]
    async fn ipv4_only_filters_out_v6() {
        let addrs = resolve("127.0.0.1", 12345, AddressFilter::Ipv4Only).await.unwrap();
        assert!(addrs.iter().all(|a| a.is_ipv4()));
    }

    #[tokio::test]
    async fn failure_callback_invoked_on_unresolvable_host() {
        let mut called = false;
        let result = resolve_or_notify(
            "this.host.does.not.exist.invalid",
            1,
            AddressFilter::Any,
            |_e| called = true,
        )
        .await;
        assert!(result.is_none());
        assert!(called);
    }
}
