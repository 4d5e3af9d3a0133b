//! Bulk-endpoint backhaul.
//!
//! Over USB the device streams raw samples, without rCOBS framing. The host
//! reads one capture as a single bulk IN transfer sized to the whole buffer.

use std::{collections::VecDeque, time::Duration};

use crate::{
    backhaul::{Backhaul, BackhaulError},
    signal::{IlaConfig, SignalLayout},
    stream::StreamBeat,
};

/// USB descriptors of an analyzer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: &'static str,
    /// Endpoint number, without the direction bit
    pub endpoint: u8,
    pub max_packet_size: usize,
}

impl DeviceIdentity {
    pub const DEFAULT: Self = Self {
        vendor_id: 0x1D50,
        product_id: 0x6190,
        manufacturer: "ila-rs",
        product: "Integrated Logic Analyzer",
        serial_number: "000000000",
        endpoint: 1,
        max_packet_size: 512,
    };

    /// Address of the bulk IN endpoint
    pub fn endpoint_address(&self) -> u8 {
        0x80 | self.endpoint
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A bulk IN endpoint. `timeout` of zero waits forever.
pub trait BulkIn {
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, BackhaulError>;
}

impl<T: BulkIn + ?Sized> BulkIn for Box<T> {
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, BackhaulError> {
        (**self).read_bulk(endpoint, buf, timeout)
    }
}

/// Reads whole captures from a bulk endpoint.
#[derive(Debug)]
pub struct UsbBackhaul<T: BulkIn> {
    transport: T,
    identity: DeviceIdentity,
    capture_len: usize,
    timeout: Duration,
}

impl<T: BulkIn> UsbBackhaul<T> {
    pub fn new(transport: T, identity: DeviceIdentity, layout: &SignalLayout, config: &IlaConfig) -> Self {
        Self {
            transport,
            identity,
            capture_len: config.sample_depth * layout.bytes_per_sample(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: BulkIn> Backhaul for UsbBackhaul<T> {
    #[tracing::instrument(skip(self), level = "debug")]
    fn ingest(&mut self) -> Result<Vec<u8>, BackhaulError> {
        let mut buf = vec![0u8; self.capture_len];
        let n = self
            .transport
            .read_bulk(self.identity.endpoint_address(), &mut buf, self.timeout)?;
        log::debug!("Bulk read returned {} of {} bytes", n, self.capture_len);
        if n != self.capture_len {
            return Err(BackhaulError::FrameLengthMismatch {
                expected: self.capture_len,
                actual: n,
            });
        }
        Ok(buf)
    }
}

/// Device side of the bulk endpoint: packs stream beats into packets of at
/// most `max_packet_size` bytes. The last beat of a capture closes the
/// current packet, so a capture ends with a short packet unless it fills
/// the last one exactly.
#[derive(Debug)]
pub struct BulkPacketizer {
    max_packet_size: usize,
    bytes_per_sample: usize,
    current: Vec<u8>,
    packets: VecDeque<Vec<u8>>,
}

impl BulkPacketizer {
    pub fn new(max_packet_size: usize, bytes_per_sample: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.max(1),
            bytes_per_sample,
            current: Vec::with_capacity(max_packet_size),
            packets: VecDeque::new(),
        }
    }

    pub fn push(&mut self, beat: &StreamBeat) {
        self.current
            .extend(beat.payload.to_le_bytes_padded(self.bytes_per_sample));
        while self.current.len() >= self.max_packet_size {
            let rest = self.current.split_off(self.max_packet_size);
            self.packets.push_back(std::mem::replace(&mut self.current, rest));
        }
        if beat.last && !self.current.is_empty() {
            self.packets.push_back(std::mem::take(&mut self.current));
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn pop_packet(&mut self) -> Option<Vec<u8>> {
        self.packets.pop_front()
    }

    pub fn has_packet(&self) -> bool {
        !self.packets.is_empty()
    }
}

#[cfg(feature = "usb")]
pub use self::device::RusbBulkIn;

#[cfg(feature = "usb")]
mod device {
    use std::time::Duration;

    use rusb::{DeviceHandle, GlobalContext};

    use super::{BulkIn, DeviceIdentity, UsbBackhaul};
    use crate::{
        backhaul::BackhaulError,
        signal::{IlaConfig, SignalLayout},
    };

    /// A bulk endpoint on real hardware, through libusb
    #[derive(Debug)]
    pub struct RusbBulkIn {
        handle: DeviceHandle<GlobalContext>,
    }

    impl RusbBulkIn {
        pub fn open(identity: &DeviceIdentity) -> Result<Self, BackhaulError> {
            let handle = rusb::open_device_with_vid_pid(identity.vendor_id, identity.product_id).ok_or(
                BackhaulError::DeviceNotFound {
                    vendor_id: identity.vendor_id,
                    product_id: identity.product_id,
                },
            )?;
            if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                log::debug!("Kernel driver auto-detach unavailable: {}", e);
            }
            handle.claim_interface(0)?;

            let descriptor = handle.device().device_descriptor()?;
            match handle.read_product_string_ascii(&descriptor) {
                Ok(product) => log::debug!("Opened {}", product),
                Err(e) => log::debug!("Opened device without product string: {}", e),
            }
            Ok(Self { handle })
        }
    }

    impl BulkIn for RusbBulkIn {
        fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, BackhaulError> {
            match self.handle.read_bulk(endpoint, buf, timeout) {
                Ok(n) => Ok(n),
                Err(rusb::Error::Timeout) => Err(BackhaulError::Timeout {
                    elapsed: timeout,
                    received: 0,
                }),
                Err(e) => Err(e.into()),
            }
        }
    }

    impl UsbBackhaul<RusbBulkIn> {
        pub fn open(identity: DeviceIdentity, layout: &SignalLayout, config: &IlaConfig) -> Result<Self, BackhaulError> {
            let transport = RusbBulkIn::open(&identity)?;
            Ok(Self::new(transport, identity, layout, config))
        }
    }
}
