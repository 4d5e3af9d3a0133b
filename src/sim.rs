//! Cycle-level model of the device side, for running the host code without
//! hardware.
//!
//! [`IlaDevice`] wires capture, stream and framing together. The simulated
//! links wrap a device and a probe closure that supplies the observed
//! signals on every clock, and expose the same interfaces the host side
//! talks to: `Read + Write` for the UART, [`BulkIn`] for USB.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, ErrorKind, Read, Write},
    time::Duration,
};

use crate::{
    backhaul::BackhaulError,
    bits::Bits,
    fifo::FifoReader,
    framing::FramingEngine,
    signal::{ConfigurationError, IlaConfig, SignalLayout},
    stream::{SamplingDomain, StreamAdapter, StreamBeat},
    usb::{BulkIn, BulkPacketizer, DeviceIdentity},
};

/// Signals seen by the analyzer on one clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
    pub sample: Bits,
    pub trigger: bool,
}

/// Produces the stimulus for a given clock cycle
pub type Probe = Box<dyn FnMut(u64) -> Stimulus + Send>;

/// Capture, stream adapter and framing engine on a single clock.
#[derive(Debug)]
pub struct IlaDevice {
    adapter: StreamAdapter,
    framing: FramingEngine,
    cycle: u64,
}

impl IlaDevice {
    pub fn new(layout: SignalLayout, config: &IlaConfig) -> Result<Self, ConfigurationError> {
        let framing = FramingEngine::new(layout.bytes_per_sample());
        Ok(Self {
            adapter: StreamAdapter::new(layout, config)?,
            framing,
            cycle: 0,
        })
    }

    pub fn adapter(&self) -> &StreamAdapter {
        &self.adapter
    }

    pub fn framing(&self) -> &FramingEngine {
        &self.framing
    }

    /// Clock cycles stepped so far
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn rx_ready(&self) -> bool {
        self.framing.rx_ready()
    }

    /// Advance one clock. Returns the byte put on the channel, if any.
    pub fn step(&mut self, stimulus: &Stimulus, rx: Option<u8>, tx_ready: bool) -> Result<Option<u8>, ConfigurationError> {
        let beat = self
            .adapter
            .step(&stimulus.sample, stimulus.trigger, self.framing.beat_ready())?;
        self.cycle += 1;
        Ok(self.framing.step(rx, beat, tx_ready))
    }
}

/// A device behind a serial link.
///
/// Reads advance the device until it has sent something, and fail with
/// [`ErrorKind::TimedOut`] after `idle_limit` quiet cycles, the way a serial
/// port with a read timeout does.
pub struct SimulatedSerial {
    device: IlaDevice,
    probe: Probe,
    to_device: VecDeque<u8>,
    to_host: VecDeque<u8>,
    cycles_per_byte: u64,
    idle_limit: u64,
}

impl SimulatedSerial {
    pub const DEFAULT_IDLE_LIMIT: u64 = 100_000;

    pub fn new(device: IlaDevice, probe: impl FnMut(u64) -> Stimulus + Send + 'static) -> Self {
        Self {
            device,
            probe: Box::new(probe),
            to_device: VecDeque::new(),
            to_host: VecDeque::new(),
            cycles_per_byte: 1,
            idle_limit: Self::DEFAULT_IDLE_LIMIT,
        }
    }

    /// The transmitter only takes a byte every `cycles` clocks
    pub fn with_cycles_per_byte(mut self, cycles: u64) -> Self {
        self.cycles_per_byte = cycles.max(1);
        self
    }

    pub fn with_idle_limit(mut self, cycles: u64) -> Self {
        self.idle_limit = cycles;
        self
    }

    pub fn device(&self) -> &IlaDevice {
        &self.device
    }

    /// Advance the device without reading anything
    pub fn run(&mut self, cycles: u64) -> Result<(), ConfigurationError> {
        for _ in 0..cycles {
            self.tick()?;
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), ConfigurationError> {
        let cycle = self.device.cycle();
        let stimulus = (self.probe)(cycle);
        let rx = if self.device.rx_ready() {
            self.to_device.pop_front()
        } else {
            None
        };
        let tx_ready = cycle % self.cycles_per_byte == 0;
        if let Some(byte) = self.device.step(&stimulus, rx, tx_ready)? {
            self.to_host.push_back(byte);
        }
        Ok(())
    }
}

impl fmt::Debug for SimulatedSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedSerial")
            .field("device", &self.device)
            .field("to_device", &self.to_device.len())
            .field("to_host", &self.to_host.len())
            .finish_non_exhaustive()
    }
}

impl Read for SimulatedSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut idle = 0;
        while self.to_host.is_empty() {
            if idle >= self.idle_limit {
                return Err(io::Error::new(ErrorKind::TimedOut, "simulated device sent nothing"));
            }
            self.tick().map_err(io::Error::other)?;
            idle += 1;
        }
        let n = buf.len().min(self.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(self.to_host.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.to_device.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A device behind a USB bulk endpoint, with the capture and the endpoint on
/// separate clocks joined by the CDC FIFO.
pub struct SimulatedUsb {
    sampling: SamplingDomain,
    output: FifoReader<StreamBeat>,
    packetizer: BulkPacketizer,
    identity: DeviceIdentity,
    probe: Probe,
    cycle: u64,
    sampling_per_output: u32,
    idle_limit: u64,
}

impl SimulatedUsb {
    pub const DEFAULT_IDLE_LIMIT: u64 = 100_000;

    pub fn new(
        layout: SignalLayout,
        config: &IlaConfig,
        identity: DeviceIdentity,
        probe: impl FnMut(u64) -> Stimulus + Send + 'static,
    ) -> Result<Self, ConfigurationError> {
        let packetizer = BulkPacketizer::new(identity.max_packet_size, layout.bytes_per_sample());
        let (sampling, output) = StreamAdapter::new(layout, config)?.split(config.fifo_depth);
        Ok(Self {
            sampling,
            output,
            packetizer,
            identity,
            probe: Box::new(probe),
            cycle: 0,
            sampling_per_output: 1,
            idle_limit: Self::DEFAULT_IDLE_LIMIT,
        })
    }

    /// Run the sampling clock `ratio` times faster than the endpoint clock
    pub fn with_clock_ratio(mut self, ratio: u32) -> Self {
        self.sampling_per_output = ratio.max(1);
        self
    }

    pub fn with_idle_limit(mut self, cycles: u64) -> Self {
        self.idle_limit = cycles;
        self
    }

    /// Sampling clock cycles stepped so far
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn tick(&mut self) -> Result<(), ConfigurationError> {
        for _ in 0..self.sampling_per_output {
            let stimulus = (self.probe)(self.cycle);
            self.sampling.step(&stimulus.sample, stimulus.trigger)?;
            self.cycle += 1;
        }
        if let Some(beat) = self.output.step(true) {
            self.packetizer.push(&beat);
        }
        Ok(())
    }
}

impl fmt::Debug for SimulatedUsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedUsb")
            .field("identity", &self.identity)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl BulkIn for SimulatedUsb {
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, BackhaulError> {
        if endpoint != self.identity.endpoint_address() {
            return Err(io::Error::new(ErrorKind::InvalidInput, format!("no IN endpoint {endpoint:#04x}")).into());
        }
        let mut filled = 0;
        let mut idle = 0;
        loop {
            if let Some(packet) = self.packetizer.pop_packet() {
                let end = filled + packet.len();
                if end > buf.len() {
                    return Err(io::Error::other("bulk transfer overflow").into());
                }
                buf[filled..end].copy_from_slice(&packet);
                filled = end;
                if packet.len() < self.packetizer.max_packet_size() || filled == buf.len() {
                    return Ok(filled);
                }
                continue;
            }
            if idle >= self.idle_limit {
                return Err(BackhaulError::Timeout {
                    elapsed: timeout,
                    received: filled,
                });
            }
            self.tick()?;
            idle += 1;
        }
    }
}
