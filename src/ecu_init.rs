//! ECU identity handshake record
//!
//! The identity response carries a NUL terminated calibration ID starting at byte 7.
//! It is rebuilt into a fixed 46 byte init record, with the calibration ID
//! (truncated or zero padded to 8 bytes) placed at byte 5, so logger definitions can
//! reference supported parameters with byte/bit offsets the same way on every protocol.

use crate::{LoggerError, LoggerResult};

/// Length of the normalised init record
pub const IDENTITY_RECORD_LEN: usize = 46;
/// Offset of the calibration ID field in the normalised record
pub const IDENTIFIER_OFFSET: usize = 5;
/// Offset in the raw response where the calibration ID string starts
pub const IDENTIFIER_SCAN_START: usize = 7;
/// Width of the calibration ID field in the normalised record
pub const IDENTIFIER_WIDTH: usize = 8;

const ECU_ID_OFFSET: usize = 2;
const ECU_ID_LEN: usize = 16;

/// Identity response rebuilt into the fixed init record layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIdentity {
    /// Calibration ID found in the raw response
    pub calibration_id: String,
    /// Normalised init record
    pub record: [u8; IDENTITY_RECORD_LEN],
}

/// Rebuilds a raw identity response into the fixed init record.
///
/// If no terminator is found, the calibration ID runs to the end of the response.
/// Bytes beyond the record length are dropped.
pub fn normalize_identity_response(response: &[u8]) -> NormalizedIdentity {
    let mut record = [0u8; IDENTITY_RECORD_LEN];
    let copied = response.len().min(IDENTITY_RECORD_LEN);
    record[..copied].copy_from_slice(&response[..copied]);

    let cal_id = response
        .get(IDENTIFIER_SCAN_START..)
        .map(|tail| {
            let end = tail.iter().position(|b| *b == 0x00).unwrap_or(tail.len());
            &tail[..end]
        })
        .unwrap_or_default();

    let mut field = [0u8; IDENTIFIER_WIDTH];
    let width = cal_id.len().min(IDENTIFIER_WIDTH);
    field[..width].copy_from_slice(&cal_id[..width]);
    record[IDENTIFIER_OFFSET..IDENTIFIER_OFFSET + IDENTIFIER_WIDTH].copy_from_slice(&field);

    NormalizedIdentity {
        calibration_id: String::from_utf8_lossy(cal_id).to_string(),
        record,
    }
}

/// Identity of the ECU read during the init handshake
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EcuIdentity {
    ecu_id: String,
    ecu_init_bytes: Vec<u8>,
}

impl EcuIdentity {
    /// Creates the identity from a normalised init record
    pub fn new(ecu_init_bytes: &[u8]) -> LoggerResult<Self> {
        let id_bytes = ecu_init_bytes
            .get(ECU_ID_OFFSET..ECU_ID_OFFSET + ECU_ID_LEN)
            .ok_or(LoggerError::InvalidResponseLength)?;
        Ok(Self {
            ecu_id: String::from_utf8_lossy(id_bytes).to_string(),
            ecu_init_bytes: ecu_init_bytes.to_vec(),
        })
    }

    /// ECU ID as found in the init record. Contains the calibration ID
    pub fn ecu_id(&self) -> &str {
        &self.ecu_id
    }

    /// The full init record
    pub fn ecu_init_bytes(&self) -> &[u8] {
        &self.ecu_init_bytes
    }
}
