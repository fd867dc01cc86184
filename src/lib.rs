#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which orchestrates ECU data logging sessions, turning a set of parameter
//! queries into the correct sequence of diagnostic requests for a logging protocol,
//! and turning the raw responses back into validated per-query data.
//!
//! ## Layers
//!
//! The crate sits between two collaborators which are supplied by the user:
//!
//! * A [protocol::LoggerProtocol] - Builds request frames and validates/decodes response
//!   frames for a specific diagnostic dialect. It owns all byte level encoding.
//! * A [transport::TransportManager] - Owns the physical connection to the vehicle
//!   (K-Line serial adapter, CAN interface).
//!
//! The [connection::LoggerConnection] owns the session policy: when addresses must be
//! (re)loaded, when identifier reads and memory reads have to be split into separate
//! round-trips, and when a request would exceed the transport's maximum frame size.
//!
//! ## Polling strategies
//!
//! ### Serial (K-Line)
//! Addresses are loaded into the ECU once per parameter selection, then read with a
//! single request on every poll.
//!
//! ### CAN slow poll
//! Every identifier query is read with its own request. This is inefficient, but
//! identifier reads cannot be combined in this mode.
//!
//! ### CAN fast poll
//! Identifier and memory queries are loaded as two separate groups, then each group
//! is read with one request. This path is only taken when
//! [connection::Capabilities::FAST_CAN_POLL] is enabled, otherwise fast poll requests
//! fall back to slow polling.
//!
//! ## Hardware
//!
//! * [hardware::serial] - Point to point serial adapters (Requires the `serial` feature)
//! * [hardware::simulation] - Scripted transport for unit testing logger sessions

pub mod connection;
pub mod ecu_init;
pub mod frame_guard;
pub mod hardware;
pub mod poll_state;
pub mod protocol;
pub mod query;
pub mod transport;

pub use connection::{BusClass, Capabilities, ConnectionOptions, LoggerConnection, PollStrategy};
pub use ecu_init::EcuIdentity;
pub use poll_state::{PollPhase, PollState};
pub use protocol::{EcuInitCallback, LoggerProtocol};
pub use query::{EcuQuery, Module};
pub use transport::{TransportError, TransportManager, TransportResult};

/// Logger connection result
pub type LoggerResult<T> = Result<T, LoggerError>;

#[derive(Clone, Debug, thiserror::Error)]
/// Logger connection error
pub enum LoggerError {
    /// The encoded load request for the current parameter selection is larger than
    /// the transport allows. The user has to deselect some parameters.
    #[error(
        "Parameter selection is too large ({} bytes, limit is {} bytes). Deselect some parameters",
        length,
        limit
    )]
    SelectionTooLarge {
        /// Computed length of the load request
        length: usize,
        /// Maximum length allowed by the dialect
        limit: usize,
    },
    /// Error with the underlying transport
    #[error("Logger transport error")]
    TransportError(
        #[from]
        #[source]
        TransportError,
    ),
    /// ECU Responded with a message, but the length was incorrect
    #[error("ECU response size was not the correct length")]
    InvalidResponseLength,
    /// ECU Responded but send a message that wasn't a reply for the sent message
    #[error("ECU response is out of order")]
    WrongMessage,
    /// Negative response code from the ECU
    #[error("ECU Negative response. Error 0x{:02X?}", code)]
    ECUError {
        /// Raw negative response code
        code: u8,
    },
    /// The protocol rejected a response for a dialect specific reason
    #[error("ECU response failed validation: {0}")]
    InvalidResponse(String),
    /// A query address could not be interpreted as a raw memory address
    #[error("Query address '{0}' is not a valid memory address")]
    InvalidAddress(String),
    /// The logger connection (or its protocol) does not support the request
    #[error("Logger connection does not support the request")]
    NotSupported,
}
