//! Module for the diagnostic dialect spoken by a logger connection
//!
//! A [LoggerProtocol] builds every request frame and validates/decodes every
//! response frame. It is stateless per call; all session policy lives in
//! [crate::connection::LoggerConnection].

use crate::{
    ecu_init::EcuIdentity,
    poll_state::PollState,
    query::{AddressRange, EcuQuery, Module},
    LoggerError, LoggerResult,
};

/// Receives the ECU identity once the init handshake completes
pub trait EcuInitCallback {
    /// Called with the identity read from the ECU
    fn callback(&mut self, ecu_init: EcuIdentity);
}

impl<F: FnMut(EcuIdentity)> EcuInitCallback for F {
    fn callback(&mut self, ecu_init: EcuIdentity) {
        self(ecu_init)
    }
}

/// Request/response codec of a logging dialect.
///
/// The elevated diagnostics and read memory functions are optional. Protocols which
/// do not support direct memory reads can leave the default implementations,
/// which return [LoggerError::NotSupported].
pub trait LoggerProtocol: Send {
    /// Name of the protocol
    fn get_protocol_name(&self) -> &'static str;

    /// Builds the request which tells the ECU which addresses will be read next
    fn build_load_address_request(&self, queries: &[&mut EcuQuery]) -> LoggerResult<Vec<u8>>;

    /// Validates the ECU's reply to a load address request
    fn validate_load_address_response(&self, response: &[u8]) -> LoggerResult<()>;

    /// Builds the request reading the (loaded) addresses of the queries
    fn build_read_address_request(
        &self,
        module: &Module,
        queries: &[&mut EcuQuery],
        poll_state: &PollState,
    ) -> LoggerResult<Vec<u8>>;

    /// Exact size of the raw reply to a read address request
    fn expected_read_address_response_size(
        &self,
        queries: &[&mut EcuQuery],
        poll_state: &PollState,
    ) -> usize;

    /// Validates a read address reply, and writes each query's bytes back into it
    fn decode_read_address_responses(
        &self,
        queries: &mut [&mut EcuQuery],
        response: &[u8],
        poll_state: &PollState,
    ) -> LoggerResult<()>;

    /// Builds the ECU identity (calibration ID) request
    fn build_identity_request(&self, module: &Module) -> LoggerResult<Vec<u8>>;

    /// Processes the normalised init record, and hands the identity to the callback
    fn decode_identity_response(
        &self,
        callback: &mut dyn EcuInitCallback,
        init_record: &[u8],
    ) -> LoggerResult<()> {
        callback.callback(EcuIdentity::new(init_record)?);
        Ok(())
    }

    /// Builds an ECU reset request
    fn build_reset_request(&self, module: &Module, reset_code: u8) -> LoggerResult<Vec<u8>>;

    /// Processes the ECU's reply to a reset request
    fn decode_reset_response(&self, response: &[u8]) -> LoggerResult<()>;

    /// Unwraps a raw reply (strips echo, headers, checksums) before it is decoded
    fn preprocess_response(
        &self,
        request: &[u8],
        response: &[u8],
        poll_state: &PollState,
    ) -> LoggerResult<Vec<u8>>;

    /// Builds the request elevating the ECU into a diagnostic session allowing memory reads
    fn build_elevated_diag_request(&self, _module: &Module) -> LoggerResult<Vec<u8>> {
        Err(LoggerError::NotSupported)
    }

    /// Builds a request reading a block of ECU memory
    fn build_read_memory_request(
        &self,
        _module: &Module,
        _range: AddressRange,
    ) -> LoggerResult<Vec<u8>> {
        Err(LoggerError::NotSupported)
    }

    /// Exact size of the raw reply to a read memory request
    fn expected_read_memory_response_size(&self, range: AddressRange) -> usize {
        range.length
    }

    /// Validates a read memory reply, and writes each query's bytes back into it
    fn decode_read_memory_responses(
        &self,
        _queries: &mut [&mut EcuQuery],
        _range: AddressRange,
        _response: &[u8],
    ) -> LoggerResult<()> {
        Err(LoggerError::NotSupported)
    }
}
