//! Error taxonomy shared by every relay crate.
//!
//! Configuration errors (bad address, wrong mode, duplicate id) come back
//! as `Err` immediately. Transient I/O failures on the data path never reach
//! this type: sends report 0 bytes and receives report an empty result.
//! Setup-time I/O (bind, connect, accept, multicast join) uses `Io`.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation}() is not supported in {mode} mode")]
    WrongMode {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("transport is not initialized")]
    NotInitialized,

    #[error("transport is already initialized")]
    AlreadyInitialized,

    #[error("transport is not listening")]
    NotListening,

    #[error("transport is closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("operation would block")]
    WouldBlock,

    #[error("peer with id {0} already exists")]
    DuplicatePeer(String),

    #[error("peer with id {0} not found")]
    PeerNotFound(String),

    #[error("could not deliver message to peer {0}")]
    DeliveryFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl RelayError {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors caused by misuse rather than by the network.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_)
                | Self::InvalidArgument(_)
                | Self::WrongMode { .. }
                | Self::NotInitialized
                | Self::AlreadyInitialized
                | Self::NotListening
                | Self::DuplicatePeer(_)
        )
    }
}
