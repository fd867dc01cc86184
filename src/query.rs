//! Parameter queries, target modules, and splitting a poll's queries by addressing scheme
//!
//! A query address is a hex string. Addresses prefixed with the ReadDataByIdentifier
//! service (`0x22....`) are parameter identifiers, everything else is a raw memory address.
//! The two schemes cannot share one request, so queries are split into
//! identifier queries and memory queries before being sent over CAN.

use automotive_diag::uds::UdsCommand;

/// Target ECU on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Name of the module, used for logging only
    pub name: String,
    /// Bus address of the module
    pub address: u32,
}

impl Module {
    /// Creates a new module
    pub fn new<S: Into<String>>(name: S, address: u32) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A single loggable parameter.
///
/// The query is owned by the logging session. The logger connection only reads its
/// addresses, and the protocol writes the raw response bytes back into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuQuery {
    id: String,
    addresses: Vec<String>,
    data_length: usize,
    response: Option<Vec<u8>>,
}

impl EcuQuery {
    /// Creates a new query
    ///
    /// ## Parameters
    /// * id - Parameter ID, used for logging only
    /// * addresses - One or more protocol addresses
    /// * data_length - Total number of bytes returned for this parameter
    pub fn new<S: Into<String>>(id: S, addresses: Vec<String>, data_length: usize) -> Self {
        Self {
            id: id.into(),
            addresses,
            data_length,
            response: None,
        }
    }

    /// Parameter ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol addresses of the parameter
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Number of bytes returned for the parameter
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Raw bytes of the last successful read
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    /// Stores the raw bytes of a read
    pub fn set_response(&mut self, bytes: &[u8]) {
        self.response = Some(bytes.to_vec())
    }

    /// Returns true if any address of the query uses the parameter identifier scheme
    pub fn is_identifier_query(&self) -> bool {
        self.addresses.iter().any(|a| is_identifier_address(a))
    }
}

/// Returns true if an address uses the parameter identifier scheme
pub fn is_identifier_address(address: &str) -> bool {
    let sid: u8 = UdsCommand::ReadDataByIdentifier.into();
    address
        .to_ascii_lowercase()
        .starts_with(&format!("0x{sid:02x}"))
}

/// Parses a raw memory address (`0xFFFF8000` or `FFFF8000`)
pub fn parse_address(address: &str) -> Option<u32> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    u32::from_str_radix(digits, 16).ok()
}

/// Queries of a single poll, split by addressing scheme.
///
/// Every input query lands in exactly one of the two groups
#[derive(Debug, Default)]
pub struct QueryPartition<'a> {
    /// Queries read via parameter identifiers
    pub identifier: Vec<&'a mut EcuQuery>,
    /// Queries read via raw memory addresses
    pub memory: Vec<&'a mut EcuQuery>,
}

/// Splits queries into identifier queries and memory queries.
///
/// While the ECU identity handshake is in progress, every query is treated as a
/// memory query, as identifier reads would produce frames that are too long.
pub fn split_queries(queries: &mut [EcuQuery], in_ecu_init: bool) -> QueryPartition<'_> {
    let mut partition = QueryPartition::default();
    for query in queries.iter_mut() {
        if !in_ecu_init && query.is_identifier_query() {
            partition.identifier.push(query);
        } else {
            partition.memory.push(query);
        }
    }
    partition
}

/// A contiguous block of ECU memory
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddressRange {
    /// First address of the block
    pub start: u32,
    /// Number of bytes in the block
    pub length: usize,
}

impl AddressRange {
    /// Computes the smallest block covering every address of the queries.
    ///
    /// A single address query spans its full data length, each address of a
    /// multi address query spans one byte.
    ///
    /// Returns [None] if there are no queries, if an address is not a memory address,
    /// or if the block would be longer than `max_length`
    pub fn covering(queries: &[&mut EcuQuery], max_length: usize) -> Option<Self> {
        let mut bounds: Option<(u64, u64)> = None;
        for query in queries {
            let span: u64 = if query.addresses().len() == 1 {
                query.data_length().max(1) as u64
            } else {
                1
            };
            for address in query.addresses() {
                let start = u64::from(parse_address(address)?);
                let end = start + span;
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(start), hi.max(end)),
                    None => (start, end),
                });
            }
        }
        let (lo, hi) = bounds?;
        let length = (hi - lo) as usize;
        if length > max_length {
            return None;
        }
        Some(Self {
            start: lo as u32,
            length,
        })
    }

    /// Block read for a single query: its data length starting at its first address.
    ///
    /// Returns [None] if the first address is not a memory address
    pub fn of_query(query: &EcuQuery) -> Option<Self> {
        let start = parse_address(query.addresses().first()?)?;
        Some(Self {
            start,
            length: query.data_length().max(1),
        })
    }

    /// Offset of an address within the block
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.start)? as usize;
        (offset < self.length).then_some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: &str, addresses: &[&str]) -> EcuQuery {
        EcuQuery::new(id, addresses.iter().map(|a| a.to_string()).collect(), 1)
    }

    fn sample() -> Vec<EcuQuery> {
        vec![
            query("P1", &["0x22000C"]),
            query("P2", &["0xFFFF8000"]),
            query("P3", &["0xFFFF8004", "0x22000D"]),
            query("P4", &["0x220010"]),
            query("P5", &["0xffff8010", "0xffff8011"]),
        ]
    }

    #[test]
    fn identifier_scheme() {
        assert!(is_identifier_address("0x22000C"));
        assert!(is_identifier_address("0X22f190"));
        assert!(!is_identifier_address("0x23000C"));
        assert!(!is_identifier_address("0xFFFF8000"));
        assert!(!is_identifier_address("22000C"));
    }

    #[test]
    fn split_keeps_every_query_exactly_once() {
        let mut queries = sample();
        let expected: Vec<String> = queries.iter().map(|q| q.id().to_string()).collect();
        let partition = split_queries(&mut queries, false);

        let ident: Vec<&str> = partition.identifier.iter().map(|q| q.id()).collect();
        let memory: Vec<&str> = partition.memory.iter().map(|q| q.id()).collect();
        assert_eq!(vec!["P1", "P3", "P4"], ident);
        assert_eq!(vec!["P2", "P5"], memory);

        let mut all: Vec<String> = ident.iter().chain(memory.iter()).map(|s| s.to_string()).collect();
        all.sort();
        assert_eq!(expected, all);
        assert!(ident.iter().all(|id| !memory.contains(id)));
    }

    #[test]
    fn split_during_ecu_init_has_no_identifier_queries() {
        let mut queries = sample();
        let partition = split_queries(&mut queries, true);
        assert!(partition.identifier.is_empty());
        assert_eq!(5, partition.memory.len());
    }

    #[test]
    fn split_empty() {
        let partition = split_queries(&mut [], false);
        assert!(partition.identifier.is_empty());
        assert!(partition.memory.is_empty());
    }

    #[test]
    fn parse_memory_addresses() {
        assert_eq!(Some(0xFFFF8000), parse_address("0xFFFF8000"));
        assert_eq!(Some(0x1234), parse_address("1234"));
        assert_eq!(None, parse_address("0xZZ"));
    }

    #[test]
    fn range_covers_all_memory_queries() {
        let mut a = EcuQuery::new("A", vec!["0xFFFF8000".into()], 2);
        let mut b = query("B", &["0xFFFF8010", "0xFFFF8011"]);
        let group = vec![&mut a, &mut b];
        let range = AddressRange::covering(&group, 63).unwrap();
        assert_eq!(0xFFFF8000, range.start);
        assert_eq!(0x12, range.length);
        assert_eq!(Some(0x10), range.offset_of(0xFFFF8010));
        assert_eq!(None, range.offset_of(0xFFFF8012));
        assert_eq!(None, AddressRange::covering(&group, 0x11));
    }

    #[test]
    fn single_query_range_uses_data_length() {
        let split = EcuQuery::new("SPLIT", vec!["0xFFFF8000".into(), "0xFFFF9000".into()], 2);
        assert_eq!(
            Some(AddressRange { start: 0xFFFF8000, length: 2 }),
            AddressRange::of_query(&split)
        );
        let far = EcuQuery::new("FAR", vec!["0x00000010".into(), "0xFFFF8000".into()], 2);
        assert_eq!(2, AddressRange::of_query(&far).unwrap().length);
        assert_eq!(None, AddressRange::of_query(&query("BAD", &["0xZZ"])));
        assert_eq!(None, AddressRange::of_query(&EcuQuery::new("EMPTY", vec![], 1)));
    }

    #[test]
    fn range_rejects_identifier_addresses() {
        let mut a = query("A", &["0x22G001"]);
        assert_eq!(None, AddressRange::covering(&[&mut a], 63));
        assert_eq!(None, AddressRange::covering(&[], 63));
    }
}
