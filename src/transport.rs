//! Module for the transport a logger connection talks to the ECU over
//!
//! The transport owns the physical connection and all of its timing. Every call
//! made by the logger connection is blocking; timeouts are enforced by the transport.

use std::sync::Arc;

use crate::{poll_state::PollState, query::Module};

/// Transport result
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone)]
/// Error produced by a transport
pub enum TransportError {
    /// Underlying IO Error with the transport
    IOError(Arc<std::io::Error>),
    /// Timeout when writing data to the transport
    WriteTimeout,
    /// Timeout when reading from the transport
    ReadTimeout,
    /// The transport is not open
    InterfaceNotOpen,
    /// Underlying API error with hardware
    APIError {
        /// Name of the API EG: 'serialport'
        api_name: String,
        /// Internal API error code
        code: u32,
        /// API error description
        desc: String,
    },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::IOError(e) => write!(f, "IO error: {e}"),
            TransportError::ReadTimeout => write!(f, "timeout reading from transport"),
            TransportError::WriteTimeout => write!(f, "timeout writing to transport"),
            TransportError::InterfaceNotOpen => write!(f, "transport is not open"),
            TransportError::APIError {
                api_name,
                code,
                desc,
            } => write!(f, "underlying {api_name} API error ({code}): {desc}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::IOError(io_err) = self {
            Some(io_err.as_ref())
        } else {
            None
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::ReadTimeout,
            _ => Self::IOError(Arc::new(err)),
        }
    }
}

/// Base trait for the connection to an ECU.
pub trait TransportManager: Send {
    /// Opens the connection to the target module
    fn open(&mut self, module: &Module) -> TransportResult<()>;

    /// Closes the connection
    fn close(&mut self) -> TransportResult<()>;

    /// Discards anything left in the transmit and receive buffers of the line
    fn clear_line(&mut self) -> TransportResult<()>;

    /// Writes a request, then returns whatever the ECU replied with
    fn send(&mut self, request: &[u8]) -> TransportResult<Vec<u8>>;

    /// Writes a request, then fills `response` with the ECU's reply.
    ///
    /// ## Parameters
    /// * request - The request frame
    /// * response - Buffer sized to the exact length of the expected reply
    /// * poll_state - Polling state of the current tick, some transports pace reads with it
    fn send_expecting(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        poll_state: &PollState,
    ) -> TransportResult<()>;
}
