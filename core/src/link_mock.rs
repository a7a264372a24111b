use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::LinkError;
use crate::link::{DeviceInfo, LinkTransport, SENSOR_ADDRESS};

#[derive(Clone, Debug, Default)]
pub struct MockSession {
    pub connected_address: Option<String>,
}

/// What the mock sensor does when a response line is read.
#[derive(Clone, Debug, PartialEq)]
pub enum MockReply {
    Line(String),
    /// Never answers; surfaces as a timeout.
    Silent,
    /// The link breaks mid-read.
    Broken,
}

#[derive(Clone, Debug, Default)]
pub struct MockLinkTransport {
    pub devices: Vec<DeviceInfo>,
    pub replies: VecDeque<MockReply>,
    pub written: Vec<String>,
    pub refuse_connections: bool,
    pub fail_disconnect: bool,
    pub connects: u32,
    released: Rc<Cell<u32>>,
}

impl MockLinkTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor() -> Self {
        Self {
            devices: vec![
                DeviceInfo {
                    address: "00:11:22:33:44:55".to_string(),
                    name: "Headset".to_string(),
                },
                DeviceInfo {
                    address: SENSOR_ADDRESS.to_string(),
                    name: "EM Sensor".to_string(),
                },
            ],
            ..Self::default()
        }
    }

    pub fn queue_reading(&mut self, current: f64, voltage: f64) {
        self.replies.push_back(MockReply::Line(format!(
            "{{\"current\": {current}, \"voltage\": {voltage}}}\n"
        )));
    }

    /// Number of sessions handed back through `disconnect`.
    pub fn disconnects(&self) -> u32 {
        self.released.get()
    }

    /// Shared view of the disconnect count that outlives the transport.
    pub fn release_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.released)
    }
}

impl LinkTransport for MockLinkTransport {
    type Session = MockSession;

    fn bonded_devices(&mut self) -> Result<Vec<DeviceInfo>, LinkError> {
        Ok(self.devices.clone())
    }

    fn connect(&mut self, device: &DeviceInfo) -> Result<Self::Session, LinkError> {
        if self.refuse_connections {
            return Err(LinkError::ConnectionFailed(format!(
                "{} refused the connection",
                device.address
            )));
        }
        if !self.devices.iter().any(|d| d.address == device.address) {
            return Err(LinkError::DeviceNotFound {
                address: device.address.clone(),
            });
        }
        self.connects += 1;
        Ok(MockSession {
            connected_address: Some(device.address.clone()),
        })
    }

    fn write(&mut self, session: &mut Self::Session, data: &[u8]) -> Result<(), LinkError> {
        if session.connected_address.is_none() {
            return Err(LinkError::NotConnected);
        }
        self.written.push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn read_line(&mut self, session: &mut Self::Session) -> Result<String, LinkError> {
        if session.connected_address.is_none() {
            return Err(LinkError::NotConnected);
        }
        match self.replies.pop_front() {
            Some(MockReply::Line(line)) => Ok(line),
            Some(MockReply::Broken) => Err(LinkError::Transport("connection reset".to_string())),
            Some(MockReply::Silent) | None => Err(LinkError::Timeout),
        }
    }

    fn disconnect(&mut self, _session: Self::Session) -> Result<(), LinkError> {
        self.released.set(self.released.get() + 1);
        if self.fail_disconnect {
            return Err(LinkError::Transport("socket already closed".to_string()));
        }
        Ok(())
    }
}
