//! Logger connection
//!
//! Owns the session state of a data logging session with one ECU, and decides on
//! every poll which load/read round-trips have to be made.

use crate::{
    ecu_init::normalize_identity_response,
    frame_guard,
    poll_state::{PollPhase, PollState},
    protocol::{EcuInitCallback, LoggerProtocol},
    query::{split_queries, AddressRange, EcuQuery, Module, QueryPartition},
    transport::TransportManager,
    LoggerError, LoggerResult,
};

/// Class of bus the transport talks over
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusClass {
    /// Point to point serial line (K-Line)
    Serial,
    /// CAN (ISO-TP)
    Can,
}

bitflags::bitflags! {
    /// Optional logging paths of a connection. Paths not enabled here are never taken
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Capabilities: u8 {
        /// Load and read CAN queries in two batches when fast poll is requested.
        /// Without this, fast poll requests use the slow CAN strategy
        const FAST_CAN_POLL = 0b0000_0001;
        /// Read memory queries over CAN using an elevated diagnostic session
        const MEMORY_READS = 0b0000_0010;
    }
}

/// Logger connection options
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionOptions {
    /// Bus the transport talks over
    pub bus: BusClass,
    /// Enabled optional paths
    pub capabilities: Capabilities,
    /// Largest block of memory read with a single request
    pub max_memory_range: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            bus: BusClass::Serial,
            capabilities: Capabilities::empty(),
            max_memory_range: 63,
        }
    }
}

/// Polling strategy used for one poll
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
pub enum PollStrategy {
    /// Load addresses once per selection, then read them all with one request
    Serial,
    /// Read every identifier query with its own request
    CanSlow,
    /// Load and read identifier and memory queries as two batches
    CanFast,
}

impl PollStrategy {
    /// Selects the strategy of a poll
    pub fn select(bus: BusClass, fast_poll: bool, capabilities: Capabilities) -> Self {
        match bus {
            BusClass::Serial => Self::Serial,
            BusClass::Can if fast_poll && capabilities.contains(Capabilities::FAST_CAN_POLL) => {
                Self::CanFast
            }
            BusClass::Can => Self::CanSlow,
        }
    }
}

/// Data logging connection to an ECU.
///
/// At most one poll may be in flight per connection. Errors are never retried here,
/// the caller decides whether to retry the whole poll.
#[derive(Debug)]
pub struct LoggerConnection<P: LoggerProtocol, T: TransportManager> {
    protocol: P,
    transport: T,
    options: ConnectionOptions,
    /// Number of queries last loaded into the ECU, [None] if nothing is loaded
    query_count: Option<usize>,
    comms_started: bool,
    elevated_diag: bool,
    in_ecu_init: bool,
}

impl<P: LoggerProtocol, T: TransportManager> LoggerConnection<P, T> {
    /// Creates a new logger connection. The transport is opened on the first poll,
    /// or by calling [LoggerConnection::open]
    pub fn new(protocol: P, transport: T, options: ConnectionOptions) -> Self {
        Self {
            protocol,
            transport,
            options,
            query_count: None,
            comms_started: false,
            elevated_diag: false,
            in_ecu_init: false,
        }
    }

    /// Protocol of the connection
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Transport of the connection
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Options of the connection
    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    /// Number of queries currently loaded into the ECU
    pub fn query_count(&self) -> Option<usize> {
        self.query_count
    }

    /// Returns true once the transport has been opened
    pub fn is_comms_started(&self) -> bool {
        self.comms_started
    }

    /// Returns true while the ECU identity handshake is running
    pub fn is_in_ecu_init(&self) -> bool {
        self.in_ecu_init
    }

    /// Opens the transport to the module
    pub fn open(&mut self, module: &Module) -> LoggerResult<()> {
        log::debug!("{module} Opening {} connection", self.protocol.get_protocol_name());
        self.transport.open(module)?;
        self.comms_started = true;
        Ok(())
    }

    /// Closes the transport. The next poll will reopen it and reload its addresses
    pub fn close(&mut self) -> LoggerResult<()> {
        self.comms_started = false;
        self.elevated_diag = false;
        self.clear_query_count();
        self.transport.close()?;
        Ok(())
    }

    /// Forgets the loaded addresses, so the next poll reloads them
    pub fn clear_query_count(&mut self) {
        self.query_count = None;
    }

    /// Discards anything left on the line
    pub fn clear_line(&mut self) -> LoggerResult<()> {
        self.clear_query_count();
        self.transport.clear_line()?;
        Ok(())
    }

    /// Reads every query from the ECU, storing the read bytes in each query
    pub fn send_address_reads(
        &mut self,
        queries: &mut [EcuQuery],
        module: &Module,
        poll_state: &mut PollState,
    ) -> LoggerResult<()> {
        if !self.comms_started {
            self.open(module)?;
        }
        if queries.is_empty() {
            return Ok(());
        }
        let strategy = PollStrategy::select(
            self.options.bus,
            poll_state.is_fast_poll(),
            self.options.capabilities,
        );
        if strategy == PollStrategy::CanSlow && poll_state.is_fast_poll() {
            log::debug!("Fast CAN polling is not enabled, using slow polling");
        }
        match strategy {
            PollStrategy::Serial => self.do_serial_queries(queries, module, poll_state),
            PollStrategy::CanSlow => self.do_slow_can_queries(queries, module, poll_state),
            PollStrategy::CanFast => self.do_fast_can_queries(queries, module, poll_state),
        }
    }

    /// Writing to the ECU is not supported, this always returns [LoggerError::NotSupported]
    pub fn send_address_writes(
        &mut self,
        _writes: &[(EcuQuery, Vec<u8>)],
        _module: &Module,
    ) -> LoggerResult<()> {
        Err(LoggerError::NotSupported)
    }

    /// Reads the ECU's calibration ID, and passes the ECU identity to the callback.
    /// Opens the transport if no poll has opened it yet.
    ///
    /// The identity is built into the same init record layout used by other
    /// protocols, so logger definitions can reference supported parameters by offset
    pub fn ecu_init(
        &mut self,
        callback: &mut dyn EcuInitCallback,
        module: &Module,
    ) -> LoggerResult<()> {
        if !self.comms_started {
            self.open(module)?;
        }
        self.in_ecu_init = true;
        let res = self.read_ecu_identity(callback, module);
        self.in_ecu_init = false;
        res
    }

    /// Sends a reset request to the ECU.
    ///
    /// What the reset does (if anything) is entirely up to the protocol's reset handlers
    pub fn ecu_reset(&mut self, module: &Module, reset_code: u8) -> LoggerResult<()> {
        if !self.comms_started {
            self.open(module)?;
        }
        let request = self.protocol.build_reset_request(module, reset_code)?;
        log::debug!("{module} Reset Request  ---> {request:02X?}");
        let response = self.transport.send(&request)?;
        let processed = self
            .protocol
            .preprocess_response(&request, &response, &PollState::new())?;
        log::debug!("{module} Reset Response <--- {processed:02X?}");
        self.protocol.decode_reset_response(&processed)
    }

    fn read_ecu_identity(
        &mut self,
        callback: &mut dyn EcuInitCallback,
        module: &Module,
    ) -> LoggerResult<()> {
        let request = self.protocol.build_identity_request(module)?;
        log::debug!("{module} Calibration ID Request  ---> {request:02X?}");
        let response = self.transport.send(&request)?;
        log::debug!("{module} Calibration ID Response <--- {response:02X?}");
        let identity = normalize_identity_response(&response);
        log::info!("{module} Calibration ID: {}", identity.calibration_id);
        log::debug!("{module} Init Response <--- {:02X?}", identity.record);
        self.protocol.decode_identity_response(callback, &identity.record)
    }

    fn do_serial_queries(
        &mut self,
        queries: &mut [EcuQuery],
        module: &Module,
        poll_state: &mut PollState,
    ) -> LoggerResult<()> {
        let reload = self.query_count != Some(queries.len()) || poll_state.is_new_query();
        if reload {
            // Notify the user to deselect some parameters if the load won't fit
            frame_guard::check_serial_load(queries.iter())?;
        }
        let mut group: Vec<&mut EcuQuery> = queries.iter_mut().collect();
        if reload {
            let request = self.protocol.build_load_address_request(&group)?;
            log::debug!(
                "Mode:{} {module} Load address request  ---> {request:02X?}",
                poll_state.current_state()
            );
            let response_len = match request.first() {
                Some(header) if header & 0x80 == 0x80 => 6, // Long header response
                _ => 4,
            };
            let response = self.send_recv(module, &request, response_len, poll_state)?;
            self.protocol.validate_load_address_response(&response)?;
            self.query_count = Some(group.len());
            poll_state.set_new_query(false);
        }
        self.read_group(&mut group, module, poll_state)
    }

    fn do_slow_can_queries(
        &mut self,
        queries: &mut [EcuQuery],
        module: &Module,
        poll_state: &mut PollState,
    ) -> LoggerResult<()> {
        // Nothing is ever loaded when reading queries one at a time
        poll_state.set_new_query(false);
        self.query_count = None;

        let QueryPartition { identifier, memory } = split_queries(queries, self.in_ecu_init);
        for query in identifier {
            let mut single = [query];
            let request = self
                .protocol
                .build_read_address_request(module, &single, poll_state)?;
            log::debug!("{module} CAN Request  ---> {request:02X?}");
            let response_len = self
                .protocol
                .expected_read_address_response_size(&single, poll_state);
            let response = self.send_recv(module, &request, response_len, poll_state)?;
            self.protocol
                .decode_read_address_responses(&mut single, &response, poll_state)?;
        }
        if !memory.is_empty() && self.options.capabilities.contains(Capabilities::MEMORY_READS) {
            self.do_memory_queries(memory, module, poll_state)?;
        }
        Ok(())
    }

    fn do_fast_can_queries(
        &mut self,
        queries: &mut [EcuQuery],
        module: &Module,
        poll_state: &mut PollState,
    ) -> LoggerResult<()> {
        if self.query_count != Some(queries.len()) || poll_state.is_new_query() {
            self.query_count = Some(queries.len());
            poll_state.set_new_query(true);
        }
        let new_query = poll_state.is_new_query();
        let QueryPartition {
            mut identifier,
            mut memory,
        } = split_queries(queries, self.in_ecu_init);

        // Identifier queries can't be combined with memory queries, so each group is
        // loaded separately. When both groups are present, each load replaces the other.
        let identifier_load = if !identifier.is_empty() && (new_query || !memory.is_empty()) {
            Some(self.build_can_load(&identifier)?)
        } else {
            None
        };
        let memory_load = if !memory.is_empty() && (new_query || !identifier.is_empty()) {
            Some(self.build_can_load(&memory)?)
        } else {
            None
        };

        if !identifier.is_empty() {
            if let Some(request) = identifier_load {
                self.send_can_load(module, &request, poll_state)?;
            }
            self.read_group(&mut identifier, module, poll_state)?;
        }
        if !memory.is_empty() {
            if let Some(request) = memory_load {
                self.send_can_load(module, &request, poll_state)?;
                poll_state.set_fast_poll(true);
            }
            self.read_group(&mut memory, module, poll_state)?;
        }
        poll_state.set_new_query(false);
        Ok(())
    }

    fn do_memory_queries(
        &mut self,
        mut memory: Vec<&mut EcuQuery>,
        module: &Module,
        poll_state: &PollState,
    ) -> LoggerResult<()> {
        if !self.elevated_diag {
            let request = self.protocol.build_elevated_diag_request(module)?;
            log::debug!("{module} Elevated Diagnostics Request  ---> {request:02X?}");
            let response = self.transport.send(&request)?;
            log::debug!("{module} Elevated Diagnostics Response <--- {response:02X?}");
            self.elevated_diag = true;
        }
        // One request for all queries if they sit close enough together,
        // otherwise one request per query
        if let Some(range) = AddressRange::covering(&memory, self.options.max_memory_range) {
            return self.read_memory(&mut memory, range, module, poll_state);
        }
        for query in memory {
            let range = AddressRange::of_query(query)
                .ok_or_else(|| LoggerError::InvalidAddress(query.addresses().join(",")))?;
            self.read_memory(&mut [query], range, module, poll_state)?;
        }
        Ok(())
    }

    fn read_memory(
        &mut self,
        group: &mut [&mut EcuQuery],
        range: AddressRange,
        module: &Module,
        poll_state: &PollState,
    ) -> LoggerResult<()> {
        let request = self.protocol.build_read_memory_request(module, range)?;
        log::debug!(
            "Mode:{} {module} Memory request  ---> {request:02X?}",
            poll_state.current_state()
        );
        let response_len = self.protocol.expected_read_memory_response_size(range);
        let response = self.send_recv(module, &request, response_len, poll_state)?;
        self.protocol
            .decode_read_memory_responses(group, range, &response)
    }

    fn build_can_load(&self, group: &[&mut EcuQuery]) -> LoggerResult<Vec<u8>> {
        let request = self.protocol.build_load_address_request(group)?;
        frame_guard::check_can_load_frame(&request)?;
        Ok(request)
    }

    fn send_can_load(
        &mut self,
        module: &Module,
        request: &[u8],
        poll_state: &PollState,
    ) -> LoggerResult<()> {
        log::debug!(
            "Mode:{} {module} Load address request  ---> {request:02X?}",
            poll_state.current_state()
        );
        let response = self.transport.send(request)?;
        log::debug!(
            "Mode:{} {module} Load address response  <--- {response:02X?}",
            poll_state.current_state()
        );
        self.protocol.validate_load_address_response(&response)
    }

    fn read_group(
        &mut self,
        group: &mut [&mut EcuQuery],
        module: &Module,
        poll_state: &mut PollState,
    ) -> LoggerResult<()> {
        let request = self
            .protocol
            .build_read_address_request(module, group, poll_state)?;
        if poll_state.current_state() == PollPhase::State0 {
            log::debug!(
                "Mode:{} {module} Read request  ---> {request:02X?}",
                poll_state.current_state()
            );
            poll_state.set_last_state(PollPhase::State0);
        }
        let response_len = self
            .protocol
            .expected_read_address_response_size(group, poll_state);
        let response = self.send_recv(module, &request, response_len, poll_state)?;
        self.protocol
            .decode_read_address_responses(group, &response, poll_state)
    }

    /// Sends a request, reads a reply of exactly `response_len` bytes,
    /// and unwraps it with the protocol
    fn send_recv(
        &mut self,
        module: &Module,
        request: &[u8],
        response_len: usize,
        poll_state: &PollState,
    ) -> LoggerResult<Vec<u8>> {
        let mut response = vec![0u8; response_len];
        self.transport
            .send_expecting(request, &mut response, poll_state)?;
        log::trace!("{module} Read Raw Response <--- {response:02X?}");
        let processed = self
            .protocol
            .preprocess_response(request, &response, poll_state)?;
        log::debug!(
            "Mode:{} {module} Response <--- {processed:02X?}",
            poll_state.current_state()
        );
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_bus_always_uses_serial_strategy() {
        for fast in [false, true] {
            for caps in [Capabilities::empty(), Capabilities::all()] {
                assert_eq!(PollStrategy::Serial, PollStrategy::select(BusClass::Serial, fast, caps));
            }
        }
    }

    #[test]
    fn fast_can_falls_back_to_slow_unless_enabled() {
        assert_eq!(
            PollStrategy::CanSlow,
            PollStrategy::select(BusClass::Can, false, Capabilities::all())
        );
        assert_eq!(
            PollStrategy::CanSlow,
            PollStrategy::select(BusClass::Can, true, Capabilities::empty())
        );
        assert_eq!(
            PollStrategy::CanSlow,
            PollStrategy::select(BusClass::Can, true, Capabilities::MEMORY_READS)
        );
        assert_eq!(
            PollStrategy::CanFast,
            PollStrategy::select(BusClass::Can, true, Capabilities::FAST_CAN_POLL)
        );
    }

    #[test]
    fn default_options() {
        let opts = ConnectionOptions::default();
        assert_eq!(BusClass::Serial, opts.bus);
        assert!(opts.capabilities.is_empty());
        assert_eq!(63, opts.max_memory_range);
    }
}
