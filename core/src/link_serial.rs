//! Serial-port transport for sensors bonded as RFCOMM or USB serial devices.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, trace};

use crate::config::{BondedPort, SurveyConfig};
use crate::error::LinkError;
use crate::link::{DeviceInfo, LinkTransport};

const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SerialSession {
    port: Box<dyn SerialPort>,
    address: String,
    buffer: Vec<u8>,
}

impl SerialSession {
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Maps bonded device addresses to serial endpoints taken from configuration.
pub struct SerialLinkTransport {
    bonded: Vec<BondedPort>,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialLinkTransport {
    pub fn new(bonded: Vec<BondedPort>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            bonded,
            baud_rate,
            read_timeout,
        }
    }

    pub fn from_config(config: &SurveyConfig) -> Self {
        Self::new(
            config.link.bonded.clone(),
            config.link.baud_rate,
            config.read_timeout(),
        )
    }

    fn endpoint(&self, address: &str) -> Option<&BondedPort> {
        self.bonded
            .iter()
            .find(|b| b.address.eq_ignore_ascii_case(address))
    }
}

impl LinkTransport for SerialLinkTransport {
    type Session = SerialSession;

    fn bonded_devices(&mut self) -> Result<Vec<DeviceInfo>, LinkError> {
        Ok(self
            .bonded
            .iter()
            .map(|b| DeviceInfo {
                address: b.address.clone(),
                name: b.name.clone(),
            })
            .collect())
    }

    fn connect(&mut self, device: &DeviceInfo) -> Result<SerialSession, LinkError> {
        let endpoint = self
            .endpoint(&device.address)
            .ok_or_else(|| LinkError::DeviceNotFound {
                address: device.address.clone(),
            })?;
        let port = serialport::new(&endpoint.path, self.baud_rate)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| LinkError::ConnectionFailed(format!("{}: {e}", endpoint.path)))?;
        debug!(path = %endpoint.path, baud = self.baud_rate, "serial port opened");
        Ok(SerialSession {
            port,
            address: device.address.clone(),
            buffer: Vec::new(),
        })
    }

    fn write(&mut self, session: &mut SerialSession, data: &[u8]) -> Result<(), LinkError> {
        trace!(bytes = data.len(), "serial write");
        session
            .port
            .write_all(data)
            .and_then(|_| session.port.flush())
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    fn read_line(&mut self, session: &mut SerialSession) -> Result<String, LinkError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = take_line(&mut session.buffer) {
                trace!(line = %line, "serial line received");
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
            match session.port.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Transport("port closed".to_string())),
                Ok(n) => session.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkError::Transport(e.to_string())),
            }
        }
    }

    fn disconnect(&mut self, session: SerialSession) -> Result<(), LinkError> {
        debug!(address = %session.address, "serial port closed");
        drop(session);
        Ok(())
    }
}

/// Remove and return the first complete line in `buffer`, without its terminator.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=end).collect();
    Some(
        String::from_utf8_lossy(&line[..end])
            .trim_end_matches('\r')
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bonded() -> Vec<BondedPort> {
        vec![BondedPort {
            address: "3C:8A:1F:9C:45:D4".to_string(),
            name: "EM sensor".to_string(),
            path: "/dev/does-not-exist".to_string(),
        }]
    }

    #[test]
    fn test_take_line_keeps_remainder() {
        let mut buffer = b"{\"current\":0.5}\r\n{\"cur".to_vec();
        assert_eq!(take_line(&mut buffer).as_deref(), Some("{\"current\":0.5}"));
        assert_eq!(buffer, b"{\"cur".to_vec());
        assert_eq!(take_line(&mut buffer), None);
    }

    #[test]
    fn test_bonded_devices_from_config() {
        let mut transport = SerialLinkTransport::new(bonded(), 9600, Duration::from_secs(1));
        let devices = transport.bonded_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "EM sensor");
    }

    #[test]
    fn test_unknown_or_missing_port() {
        let mut transport = SerialLinkTransport::new(bonded(), 9600, Duration::from_secs(1));
        let stranger = DeviceInfo {
            address: "00:00:00:00:00:00".to_string(),
            name: String::new(),
        };
        assert!(matches!(
            transport.connect(&stranger),
            Err(LinkError::DeviceNotFound { .. })
        ));

        let sensor = DeviceInfo {
            address: "3c:8a:1f:9c:45:d4".to_string(),
            name: String::new(),
        };
        assert!(matches!(
            transport.connect(&sensor),
            Err(LinkError::ConnectionFailed(_))
        ));
    }
}
