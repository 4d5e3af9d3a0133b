use std::{
    io::{ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::{
    backhaul::{Backhaul, BackhaulError},
    framing::{Command, FRAME_END},
    rcobs,
};

/// Serial link settings. The link is always 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UartConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Give up on a frame after this long. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// How long a single read on the port may block
    pub poll_interval: Duration,
}

impl UartConfig {
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            read_timeout: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Serial ports whose USB bridge matches `vendor_id`/`product_id`
pub fn find_ports(vendor_id: u16, product_id: u16) -> Result<Vec<String>, BackhaulError> {
    log::debug!("Searching serial ports for {:04x}:{:04x}", vendor_id, product_id);
    let ports = serialport::available_ports()?
        .into_iter()
        .filter(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.vid == vendor_id && usb.pid == product_id,
            _ => false,
        })
        .map(|port| port.port_name)
        .collect();
    Ok(ports)
}

/// Pulls rCOBS frames over a byte stream, usually a serial port.
#[derive(Debug)]
pub struct UartBackhaul<P: Read + Write> {
    port: P,
    pending: Vec<u8>,
    read_timeout: Option<Duration>,
    request_flush: bool,
}

impl UartBackhaul<Box<dyn SerialPort>> {
    pub fn open(config: &UartConfig) -> Result<Self, BackhaulError> {
        log::debug!(
            "Opening {} at {} baud",
            config.port_name,
            config.baud_rate
        );
        let mut port = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.poll_interval)
            .open()?;
        port.clear(ClearBuffer::All)?;

        let mut backhaul = Self::new(port);
        backhaul.read_timeout = config.read_timeout;
        Ok(backhaul)
    }

    /// Open the first serial port belonging to the given USB device
    pub fn discover(vendor_id: u16, product_id: u16, config: &UartConfig) -> Result<Self, BackhaulError> {
        let port_name = find_ports(vendor_id, product_id)?
            .into_iter()
            .next()
            .ok_or(BackhaulError::DeviceNotFound {
                vendor_id,
                product_id,
            })?;
        Self::open(&UartConfig {
            port_name,
            ..config.clone()
        })
    }
}

impl<P: Read + Write> UartBackhaul<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
            read_timeout: None,
            request_flush: true,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Don't send FLUSH before reading, for devices put in streaming mode
    pub fn passive(mut self) -> Self {
        self.request_flush = false;
        self
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn send_command(&mut self, command: Command) -> Result<(), BackhaulError> {
        log::debug!("Sending {:?}", command);
        self.port.write_all(&[command.as_byte()])?;
        self.port.flush()?;
        Ok(())
    }

    /// Read up to the next frame terminator and return the bytes before it.
    /// Anything received after the terminator is kept for the next call.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, BackhaulError> {
        let start = Instant::now();
        let mut buf = [0u8; 256];

        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == FRAME_END) {
                let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
                frame.pop();
                log::trace!("Received frame of {} bytes", frame.len());
                return Ok(frame);
            }

            match self.port.read(&mut buf) {
                Ok(0) => {
                    return Err(BackhaulError::ChannelClosed {
                        received: self.pending.len(),
                    })
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    match self.read_timeout {
                        Some(limit) if start.elapsed() >= limit => {
                            return Err(BackhaulError::Timeout {
                                elapsed: start.elapsed(),
                                received: self.pending.len(),
                            });
                        }
                        _ => {}
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<P: Read + Write> Backhaul for UartBackhaul<P> {
    #[tracing::instrument(skip(self), level = "debug")]
    fn ingest(&mut self) -> Result<Vec<u8>, BackhaulError> {
        if self.request_flush {
            self.send_command(Command::Flush)?;
        }
        let frame = self.read_frame()?;
        Ok(rcobs::decode(&frame)?)
    }
}
