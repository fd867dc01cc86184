//! Simulation transport for unit testing logger connections

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    poll_state::PollState,
    query::Module,
    transport::{TransportError, TransportManager, TransportResult},
};

/// A call made to a [SimulationTransport]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Transport was opened for the named module
    Open(String),
    /// Transport was closed
    Close,
    /// Line was cleared
    ClearLine,
    /// A request was sent with [TransportManager::send]
    Send(Vec<u8>),
    /// A request was sent with [TransportManager::send_expecting]
    SendExpecting {
        /// Request frame
        request: Vec<u8>,
        /// Size of the response buffer
        expected_len: usize,
    },
}

impl TransportCall {
    /// Request frame of the call, if it sent one
    pub fn request(&self) -> Option<&[u8]> {
        match self {
            TransportCall::Send(r) => Some(r.as_slice()),
            TransportCall::SendExpecting { request, .. } => Some(request.as_slice()),
            _ => None,
        }
    }
}

/// Transport which answers requests from a queue of scripted responses, and
/// records every call made to it.
///
/// Like a real line, requests are rejected with [TransportError::InterfaceNotOpen]
/// until the transport is opened, and a reply shorter than the expected length
/// fails with [TransportError::ReadTimeout].
///
/// Clones share the same queue and call log, so a clone can be kept by the test
/// while another is owned by the logger connection.
#[derive(Debug, Clone, Default)]
pub struct SimulationTransport {
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
    is_open: Arc<Mutex<bool>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulationTransport {
    /// Creates a new simulation transport with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next response the ECU will reply with
    pub fn add_response(&self, resp: &[u8]) {
        lock(&self.rx_queue).push_back(resp.to_vec());
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Every request sent so far, in order
    pub fn sent_requests(&self) -> Vec<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| c.request().map(|r| r.to_vec()))
            .collect()
    }

    /// Number of responses still queued
    pub fn pending_responses(&self) -> usize {
        lock(&self.rx_queue).len()
    }

    /// Returns true while the transport is open
    pub fn is_open(&self) -> bool {
        *lock(&self.is_open)
    }

    /// Forgets all queued responses and recorded calls
    pub fn clear(&self) {
        lock(&self.rx_queue).clear();
        lock(&self.calls).clear();
    }

    fn check_open(&self) -> TransportResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::InterfaceNotOpen)
        }
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }

    fn next_response(&self) -> TransportResult<Vec<u8>> {
        lock(&self.rx_queue)
            .pop_front()
            .ok_or(TransportError::ReadTimeout)
    }
}

impl TransportManager for SimulationTransport {
    fn open(&mut self, module: &Module) -> TransportResult<()> {
        self.record(TransportCall::Open(module.name.clone()));
        *lock(&self.is_open) = true;
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.record(TransportCall::Close);
        *lock(&self.is_open) = false;
        Ok(())
    }

    fn clear_line(&mut self) -> TransportResult<()> {
        self.record(TransportCall::ClearLine);
        Ok(())
    }

    fn send(&mut self, request: &[u8]) -> TransportResult<Vec<u8>> {
        self.check_open()?;
        self.record(TransportCall::Send(request.to_vec()));
        self.next_response()
    }

    fn send_expecting(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        _poll_state: &PollState,
    ) -> TransportResult<()> {
        self.check_open()?;
        self.record(TransportCall::SendExpecting {
            request: request.to_vec(),
            expected_len: response.len(),
        });
        let reply = self.next_response()?;
        let data = reply
            .get(..response.len())
            .ok_or(TransportError::ReadTimeout)?;
        response.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_call_log() {
        let sim = SimulationTransport::new();
        let mut owned = sim.clone();
        sim.add_response(&[0x6C, 0x01, 0x02, 0x03]);

        owned.open(&Module::new("ECM", 0x7E0)).unwrap();
        let mut buf = [0u8; 4];
        owned.send_expecting(&[0x2C, 0x01], &mut buf, &PollState::new()).unwrap();
        assert_eq!([0x6C, 0x01, 0x02, 0x03], buf);
        assert!(matches!(owned.send(&[0x3E]), Err(TransportError::ReadTimeout)));

        assert!(sim.is_open());
        assert_eq!(
            vec![
                TransportCall::Open("ECM".into()),
                TransportCall::SendExpecting { request: vec![0x2C, 0x01], expected_len: 4 },
                TransportCall::Send(vec![0x3E]),
            ],
            sim.calls()
        );
        assert_eq!(vec![vec![0x2C, 0x01], vec![0x3E]], sim.sent_requests());
    }

    #[test]
    fn closed_transport_rejects_requests() {
        let mut sim = SimulationTransport::new();
        sim.add_response(&[0x50]);
        assert!(matches!(sim.send(&[0x10]), Err(TransportError::InterfaceNotOpen)));
        assert!(sim.calls().is_empty());
        assert_eq!(1, sim.pending_responses());

        sim.open(&Module::new("ECM", 0x7E0)).unwrap();
        sim.close().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            sim.send_expecting(&[0x21, 0x01], &mut buf, &PollState::new()),
            Err(TransportError::InterfaceNotOpen)
        ));
    }

    #[test]
    fn short_reply_times_out() {
        let mut sim = SimulationTransport::new();
        sim.open(&Module::new("ECM", 0x7E0)).unwrap();
        sim.add_response(&[0x61]);
        sim.add_response(&[0x61, 0x01, 0x02, 0x03]);

        let mut buf = [0u8; 3];
        assert!(matches!(
            sim.send_expecting(&[0x21, 0x01], &mut buf, &PollState::new()),
            Err(TransportError::ReadTimeout)
        ));
        // Bytes past the expected length are dropped
        sim.send_expecting(&[0x21, 0x01], &mut buf, &PollState::new()).unwrap();
        assert_eq!([0x61, 0x01, 0x02], buf);
    }
}
