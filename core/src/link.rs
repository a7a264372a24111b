//! Point-to-point link to the survey sensor.
//!
//! The sensor speaks a line protocol: the host writes the excitation
//! frequency as decimal text followed by `\n`, and the sensor answers with a
//! single JSON line `{"current": <amps>, "voltage": <volts>}`. There is no
//! framing beyond the newline, so the client never lets two exchanges
//! overlap and drops the session on any failure.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::LinkError;

/// Hardware address of the one supported sensor.
pub const SENSOR_ADDRESS: &str = "3C:8A:1F:9C:45:D4";

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub address: String,
    pub name: String,
}

/// Raw sensor answer for one frequency.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct SensorReading {
    /// Transmit current, amps.
    pub current: f64,
    /// Receive voltage, volts.
    pub voltage: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Exchanging,
}

/// Byte-level access to paired devices. Implementations decide how long a
/// read may block and report an expired wait as [`LinkError::Timeout`].
pub trait LinkTransport {
    type Session;

    fn bonded_devices(&mut self) -> Result<Vec<DeviceInfo>, LinkError>;
    fn connect(&mut self, device: &DeviceInfo) -> Result<Self::Session, LinkError>;
    fn write(&mut self, session: &mut Self::Session, data: &[u8]) -> Result<(), LinkError>;
    fn read_line(&mut self, session: &mut Self::Session) -> Result<String, LinkError>;
    fn disconnect(&mut self, session: Self::Session) -> Result<(), LinkError>;
}

pub fn encode_command(frequency_hz: u32) -> String {
    format!("{frequency_hz}\n")
}

pub fn parse_response(line: &str) -> Result<SensorReading, LinkError> {
    serde_json::from_str(line.trim()).map_err(|e| LinkError::MalformedResponse(e.to_string()))
}

/// Owns the single session with the configured sensor.
pub struct LinkClient<T: LinkTransport> {
    transport: T,
    address: String,
    session: Option<T::Session>,
    state: LinkState,
}

impl<T: LinkTransport> LinkClient<T> {
    pub fn new(transport: T, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            session: None,
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Find the configured sensor among the bonded devices.
    pub fn discover(&mut self) -> Result<DeviceInfo, LinkError> {
        let devices = self.transport.bonded_devices()?;
        devices
            .into_iter()
            .find(|d| d.address.eq_ignore_ascii_case(&self.address))
            .ok_or_else(|| LinkError::DeviceNotFound {
                address: self.address.clone(),
            })
    }

    pub fn connect(&mut self, device: &DeviceInfo) -> Result<(), LinkError> {
        if self.session.is_some() {
            debug!(address = %device.address, "already connected");
            return Ok(());
        }
        self.state = LinkState::Connecting;
        match self.transport.connect(device) {
            Ok(session) => {
                self.session = Some(session);
                self.state = LinkState::Connected;
                info!(address = %device.address, name = %device.name, "sensor connected");
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn discover_and_connect(&mut self) -> Result<DeviceInfo, LinkError> {
        let device = self.discover()?;
        self.connect(&device)?;
        Ok(device)
    }

    /// One command/response round trip. Any failure releases the session;
    /// the caller has to connect again before the next exchange.
    pub fn exchange(&mut self, frequency_hz: u32) -> Result<SensorReading, LinkError> {
        let Some(mut session) = self.session.take() else {
            return Err(LinkError::NotConnected);
        };
        self.state = LinkState::Exchanging;

        match self.round_trip(&mut session, frequency_hz) {
            Ok(reading) => {
                self.session = Some(session);
                self.state = LinkState::Connected;
                debug!(
                    frequency_hz,
                    current = reading.current,
                    voltage = reading.voltage,
                    "exchange complete"
                );
                Ok(reading)
            }
            Err(e) => {
                warn!(frequency_hz, error = %e, "exchange failed, dropping session");
                self.release(session);
                Err(e)
            }
        }
    }

    fn round_trip(
        &mut self,
        session: &mut T::Session,
        frequency_hz: u32,
    ) -> Result<SensorReading, LinkError> {
        let command = encode_command(frequency_hz);
        self.transport.write(session, command.as_bytes())?;
        debug!(command = %command.escape_default(), "sent command");

        let line = self.transport.read_line(session)?;
        debug!(response = %line.escape_default(), "received response");
        parse_response(&line)
    }

    /// Best-effort teardown. Errors are logged and swallowed.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.release(session);
            info!(address = %self.address, "sensor disconnected");
        }
        self.state = LinkState::Disconnected;
    }

    fn release(&mut self, session: T::Session) {
        if let Err(e) = self.transport.disconnect(session) {
            warn!(address = %self.address, error = %e, "disconnect failed");
        }
        self.state = LinkState::Disconnected;
    }
}

impl<T: LinkTransport> Drop for LinkClient<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
