//! Frame size limits for load address requests
//!
//! A load request which does not fit the transport's frame is a configuration
//! problem (too many parameters selected), not a communication problem, so these
//! checks run before anything is sent and are never retried.

use crate::{query::EcuQuery, LoggerError, LoggerResult};

/// K-Line max data bytes is 63 when the length is encoded into the format byte,
/// two of which are taken by the load request itself
pub const SERIAL_LOAD_FRAME_LIMIT: usize = 61;

/// Largest load request frame allowed over CAN
pub const CAN_LOAD_FRAME_LIMIT: usize = 99;

/// Number of bytes an address occupies in a serial load request.
/// Addresses in the low `0x2.....` range encode to 3 bytes, all others to 5
pub fn encoded_address_length(address: &str) -> usize {
    if address.to_ascii_lowercase().starts_with("0x2") {
        3
    } else {
        5
    }
}

/// Total encoded length of every address of the queries in a serial load request
pub fn serial_load_length<'q, I>(queries: I) -> usize
where
    I: IntoIterator<Item = &'q EcuQuery>,
{
    queries
        .into_iter()
        .flat_map(|q| q.addresses())
        .map(|a| encoded_address_length(a))
        .sum()
}

/// Checks that a serial load request for the queries fits the K-Line frame.
///
/// Returns the computed length
pub fn check_serial_load<'q, I>(queries: I) -> LoggerResult<usize>
where
    I: IntoIterator<Item = &'q EcuQuery>,
{
    let length = serial_load_length(queries);
    if length > SERIAL_LOAD_FRAME_LIMIT {
        log::error!("Serial load request is {length} bytes, limit is {SERIAL_LOAD_FRAME_LIMIT}");
        return Err(LoggerError::SelectionTooLarge {
            length,
            limit: SERIAL_LOAD_FRAME_LIMIT,
        });
    }
    Ok(length)
}

/// Checks that an encoded CAN load request fits the CAN frame limit
pub fn check_can_load_frame(request: &[u8]) -> LoggerResult<()> {
    if request.len() > CAN_LOAD_FRAME_LIMIT {
        log::error!(
            "CAN load request is {} bytes, limit is {CAN_LOAD_FRAME_LIMIT}",
            request.len()
        );
        return Err(LoggerError::SelectionTooLarge {
            length: request.len(),
            limit: CAN_LOAD_FRAME_LIMIT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries(addresses: &[&str]) -> Vec<EcuQuery> {
        addresses
            .iter()
            .enumerate()
            .map(|(i, a)| EcuQuery::new(format!("P{i}"), vec![a.to_string()], 1))
            .collect()
    }

    #[test]
    fn address_lengths() {
        assert_eq!(3, encoded_address_length("0x200010"));
        assert_eq!(3, encoded_address_length("0X22000C"));
        assert_eq!(5, encoded_address_length("0xFFFF8000"));
        assert_eq!(5, encoded_address_length("0x000010"));
    }

    #[test]
    fn serial_limit_boundary() {
        // 11 * 5 + 2 * 3 = 61
        let mut addrs = vec!["0xFFFF8000"; 11];
        addrs.extend(["0x200000", "0x200001"]);
        let at_limit = queries(&addrs);
        assert_eq!(61, check_serial_load(&at_limit).unwrap());

        addrs.push("0x200002");
        let over = queries(&addrs);
        match check_serial_load(&over) {
            Err(LoggerError::SelectionTooLarge { length, limit }) => {
                assert_eq!(64, length);
                assert_eq!(SERIAL_LOAD_FRAME_LIMIT, limit);
            }
            other => panic!("Expected SelectionTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn multi_address_queries_count_every_address() {
        let q = EcuQuery::new("P", vec!["0xFFFF8000".into(), "0xFFFF8001".into()], 2);
        assert_eq!(10, serial_load_length([&q]));
    }

    #[test]
    fn can_limit_boundary() {
        assert!(check_can_load_frame(&[0u8; 99]).is_ok());
        assert!(matches!(
            check_can_load_frame(&[0u8; 100]),
            Err(LoggerError::SelectionTooLarge { length: 100, limit: 99 })
        ));
    }
}
