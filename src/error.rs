use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors that escape to the process boundary.
///
/// Everything recoverable (read timeouts, transient socket errors,
/// slow-subscriber drops, per-call send failures) is absorbed inside the
/// relay and surfaced as metrics and logs instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid multicast IP '{0}'")]
    InvalidMulticastIp(String),

    #[error("not a multicast address: {0}")]
    NotMulticast(Ipv4Addr),

    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("{context}: {source}")]
    Bind {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl Error {
    pub(crate) fn bind(context: &'static str, source: std::io::Error) -> Self {
        Error::Bind { context, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
