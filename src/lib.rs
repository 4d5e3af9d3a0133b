//! # ILA RS
//!
//! An in-device logic analyzer and the host side that reads it back.
//!
//! On the device a capture engine records a fixed number of samples of a set
//! of named signals once triggered. A stream adapter replays the buffer over a
//! ready/valid handshake, and a framing engine sends it to the host as an
//! rCOBS frame when asked to. On the host a [`Capture`] pulls frames over a
//! [`Backhaul`], splits them back into named signals and exports them.
//!
//! ## Features
//!
//! - **Signal layout**: named fixed-width signals packed LSB first into one sample
//! - **Capture engine**: trigger, sample depth and pre-trigger prologue
//! - **rCOBS codec**: streaming encoder and backward decoder
//! - **UART backhaul**: command bytes up, zero-terminated rCOBS frames down
//! - **USB backhaul**: raw samples over a bulk endpoint (`usb` feature)
//! - **Export**: VCD files and `polars` DataFrames with a time column
//! - **Simulation**: cycle-level device model that plugs into the host side
//!
//! ## Examples
//!
//! ### Capturing from a serial device
//!
//! ```rust,no_run
//! use ila_rs::{Capture, IlaConfig, SignalDescriptor, SignalSetBuilder, UartBackhaul, UartConfig};
//!
//! let layout = SignalSetBuilder::new()
//!     .signal(SignalDescriptor::new("valid", 1))?
//!     .signal(SignalDescriptor::new("data", 8))?
//!     .finalize()?;
//! let config = IlaConfig::new().sample_depth(32).sample_rate(50e6);
//!
//! let backhaul = UartBackhaul::open(&UartConfig::new("/dev/ttyUSB0").baud_rate(115_200))?;
//! let mut capture = Capture::new(backhaul, layout, config)?;
//!
//! capture.refresh()?;
//! for (time, sample) in capture.enumerate()? {
//!     println!("{:>12.3e} s  data={:?}", time, sample.value("data"));
//! }
//! capture.write_vcd("capture.vcd", true, |_, _| {})?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Without hardware
//!
//! ```rust
//! use ila_rs::{
//!     Bits, Capture, IlaConfig, IlaDevice, SignalDescriptor, SignalSetBuilder, SimulatedSerial,
//!     Stimulus, UartBackhaul,
//! };
//! use std::time::Duration;
//!
//! let layout = SignalSetBuilder::new()
//!     .signal(SignalDescriptor::new("count", 8))?
//!     .finalize()?;
//! let config = IlaConfig::new().sample_depth(4).prologue_samples(0);
//!
//! let device = IlaDevice::new(layout.clone(), &config)?;
//! let link = SimulatedSerial::new(device, |cycle| Stimulus {
//!     sample: Bits::from_u64(cycle, 8),
//!     trigger: cycle % 64 == 10,
//! });
//! let backhaul = UartBackhaul::new(link).with_read_timeout(Duration::from_secs(5));
//!
//! let mut capture = Capture::new(backhaul, layout, config)?;
//! let counts: Vec<_> = capture.enumerate()?.map(|(_, s)| s.value("count")).collect();
//! assert_eq!(counts, vec![Some(10), Some(11), Some(12), Some(13)]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(feature = "cpu-profiling")]
macro_rules! profile_scope {
    ($name:literal) => {
        let _profile_span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!($name), 0));
    };
}

#[cfg(not(feature = "cpu-profiling"))]
macro_rules! profile_scope {
    ($name:literal) => {};
}

pub(crate) use profile_scope;

pub mod backhaul;
pub mod bits;
pub mod capture;
pub mod fifo;
pub mod framing;
pub mod rcobs;
pub mod signal;
pub mod sim;
pub mod stream;
pub mod uart;
pub mod usb;
pub mod vcd_export;

// Re-export the main types for convenience
pub use bits::Bits;

pub use signal::{ConfigurationError, IlaConfig, SignalDescriptor, SignalLayout, SignalSetBuilder};

pub use capture::{CaptureEngine, CaptureStatus};

pub use stream::{StreamAdapter, StreamBeat};

pub use framing::{Command, FramingEngine};

pub use rcobs::{EncodingError, RcobsEncoder};

pub use backhaul::{Backhaul, BackhaulError, Capture, ParsedSample, Timeline};

pub use uart::{UartBackhaul, UartConfig};

pub use usb::{BulkIn, DeviceIdentity, UsbBackhaul};

pub use sim::{IlaDevice, SimulatedSerial, SimulatedUsb, Stimulus};
