//! Point to point serial transport (K-Line adapters)

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::{
    poll_state::PollState,
    query::Module,
    transport::{TransportError, TransportManager, TransportResult},
};

const READ_CHUNK: usize = 64;

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialSettings {
    /// Port name, EG: `/dev/ttyUSB0` or `COM3`
    pub port_name: String,
    /// Baud rate of the line
    pub baud_rate: u32,
    /// Timeout for reading a reply
    pub read_timeout_ms: u32,
    /// Timeout for writing a request
    pub write_timeout_ms: u32,
    /// Once a reply of unknown length has started, it is complete after the line
    /// has been quiet for this long
    pub inter_byte_timeout_ms: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 10_400,
            read_timeout_ms: 2000,
            write_timeout_ms: 1000,
            inter_byte_timeout_ms: 50,
        }
    }
}

/// Transport over a serial port
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl Debug for SerialTransport {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "SerialTransport {} (open: {})", self.settings.port_name, self.port.is_some())
    }
}

fn convert_serial_error(error: serialport::Error) -> TransportError {
    match error.kind() {
        serialport::ErrorKind::Io(kind) => TransportError::from(std::io::Error::new(kind, error.description)),
        _ => TransportError::APIError {
            api_name: "serialport".into(),
            code: 0,
            desc: error.description,
        },
    }
}

fn convert_write_error(error: std::io::Error) -> TransportError {
    match error.kind() {
        ErrorKind::TimedOut => TransportError::WriteTimeout,
        _ => TransportError::from(error),
    }
}

/// Appends everything read to `response` until the reader times out or ends
fn read_until_quiet<R: Read + ?Sized>(
    reader: &mut R,
    response: &mut Vec<u8>,
) -> TransportResult<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

impl SerialTransport {
    /// Creates a new serial transport. The port is not opened until [TransportManager::open]
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    /// Settings of the transport
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port(&mut self) -> TransportResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::InterfaceNotOpen)
    }

    fn write_request(&mut self, request: &[u8]) -> TransportResult<()> {
        let write_timeout = Duration::from_millis(self.settings.write_timeout_ms.into());
        let read_timeout = Duration::from_millis(self.settings.read_timeout_ms.into());
        let port = self.port()?;
        port.set_timeout(write_timeout).map_err(convert_serial_error)?;
        port.write_all(request).map_err(convert_write_error)?;
        port.flush().map_err(convert_write_error)?;
        port.set_timeout(read_timeout).map_err(convert_serial_error)?;
        Ok(())
    }
}

impl TransportManager for SerialTransport {
    fn open(&mut self, module: &Module) -> TransportResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        log::debug!(
            "Opening serial port {} at {} baud for {module}",
            self.settings.port_name,
            self.settings.baud_rate
        );
        let port = serialport::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(self.settings.read_timeout_ms.into()))
            .open()
            .map_err(convert_serial_error)?;
        port.clear(ClearBuffer::All).map_err(convert_serial_error)?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.port.take().is_some() {
            log::debug!("Closed serial port {}", self.settings.port_name);
        }
        Ok(())
    }

    fn clear_line(&mut self) -> TransportResult<()> {
        self.port()?
            .clear(ClearBuffer::All)
            .map_err(convert_serial_error)
    }

    fn send(&mut self, request: &[u8]) -> TransportResult<Vec<u8>> {
        self.write_request(request)?;
        let read_timeout = Duration::from_millis(self.settings.read_timeout_ms.into());
        let inter_byte_timeout = Duration::from_millis(self.settings.inter_byte_timeout_ms.into());
        let port = self.port()?;

        // The full read timeout applies to the start of the reply only
        let mut buf = [0u8; READ_CHUNK];
        let n = port.read(&mut buf)?;
        if n == 0 {
            return Err(TransportError::ReadTimeout);
        }
        let mut response = buf[..n].to_vec();

        port.set_timeout(inter_byte_timeout).map_err(convert_serial_error)?;
        let res = read_until_quiet(port, &mut response);
        port.set_timeout(read_timeout).map_err(convert_serial_error)?;
        res?;
        Ok(response)
    }

    fn send_expecting(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        _poll_state: &PollState,
    ) -> TransportResult<()> {
        self.write_request(request)?;
        self.port()?.read_exact(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Reader returning one scripted chunk or error per call
    struct ChunkedReader(VecDeque<std::io::Result<Vec<u8>>>);

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => panic!("read past the end of the reply"),
            }
        }
    }

    #[test]
    fn reply_ends_when_the_line_goes_quiet() {
        let mut reader = ChunkedReader(VecDeque::from([
            Ok(vec![0x02, 0x03]),
            Err(ErrorKind::Interrupted.into()),
            Ok(vec![0x04]),
            Err(ErrorKind::TimedOut.into()),
        ]));
        let mut response = vec![0x01];
        read_until_quiet(&mut reader, &mut response).unwrap();
        assert_eq!(vec![0x01, 0x02, 0x03, 0x04], response);
        assert!(reader.0.is_empty());
    }

    #[test]
    fn reply_read_errors_propagate() {
        let mut reader = ChunkedReader(VecDeque::from([Err(ErrorKind::BrokenPipe.into())]));
        assert!(matches!(
            read_until_quiet(&mut reader, &mut Vec::new()),
            Err(TransportError::IOError(_))
        ));
    }

    #[test]
    fn write_timeouts_are_not_read_timeouts() {
        assert!(matches!(
            convert_write_error(ErrorKind::TimedOut.into()),
            TransportError::WriteTimeout
        ));
        assert!(matches!(
            convert_write_error(ErrorKind::BrokenPipe.into()),
            TransportError::IOError(_)
        ));
    }

    #[test]
    fn quiet_line_is_shorter_than_read_timeout() {
        let settings = SerialSettings::default();
        assert!(settings.inter_byte_timeout_ms < settings.read_timeout_ms);
    }

    #[test]
    fn closed_transport_rejects_requests() {
        let mut transport = SerialTransport::new(SerialSettings {
            port_name: "/dev/null-ecu".into(),
            ..Default::default()
        });
        assert!(matches!(
            transport.send(&[0x01]),
            Err(TransportError::InterfaceNotOpen)
        ));
        assert!(matches!(
            transport.clear_line(),
            Err(TransportError::InterfaceNotOpen)
        ));
        assert!(transport.close().is_ok());
    }
}
