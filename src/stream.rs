use crate::{
    bits::Bits,
    capture::{CaptureEngine, CaptureStatus},
    fifo::{async_fifo, FifoReader, FifoWriter},
    signal::{ConfigurationError, IlaConfig, SignalLayout},
};

/// One sample travelling over a ready/valid stream.
///
/// A beat that exists is valid; the consumer's `ready` is an input of the
/// producer's `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBeat {
    pub payload: Bits,
    /// First sample of a capture
    pub first: bool,
    /// Last sample of a capture
    pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    Idle,
    Sampling,
    Sending { index: usize },
}

/// Runs a capture and then replays its buffer as a stream of beats.
#[derive(Debug)]
pub struct StreamAdapter {
    capture: CaptureEngine,
    state: AdapterState,
    status: CaptureStatus,
}

impl StreamAdapter {
    pub fn new(layout: SignalLayout, config: &IlaConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            capture: CaptureEngine::new(layout, config)?,
            state: AdapterState::Idle,
            status: CaptureStatus::default(),
        })
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn is_idle(&self) -> bool {
        self.state == AdapterState::Idle
    }

    /// Capture status from the most recent step
    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.state, AdapterState::Sending { .. })
    }

    /// The beat presented this step, before the clock edge
    pub fn peek(&self) -> Option<StreamBeat> {
        let AdapterState::Sending { index } = self.state else {
            return None;
        };
        let depth = self.capture.sample_depth();
        self.capture.sample(index).map(|payload| StreamBeat {
            payload: payload.clone(),
            first: index == 0,
            last: index + 1 == depth,
        })
    }

    /// Advance one clock.
    ///
    /// `trigger` only reaches the capture engine while idle. Returns the beat
    /// the consumer accepted this step, if any.
    pub fn step(
        &mut self,
        input: &Bits,
        trigger: bool,
        ready: bool,
    ) -> Result<Option<StreamBeat>, ConfigurationError> {
        let offered = self.peek();
        let idle = self.state == AdapterState::Idle;
        let status = self.capture.step(input, trigger && idle)?;
        self.status = status;

        let mut accepted = None;
        match self.state {
            AdapterState::Idle => {
                if trigger {
                    self.state = if status.complete {
                        AdapterState::Sending { index: 0 }
                    } else {
                        AdapterState::Sampling
                    };
                }
            }
            AdapterState::Sampling => {
                if status.complete {
                    self.state = AdapterState::Sending { index: 0 };
                }
            }
            AdapterState::Sending { index } => {
                if ready {
                    accepted = offered;
                    self.state = if index + 1 == self.capture.sample_depth() {
                        log::trace!("Last beat accepted");
                        AdapterState::Idle
                    } else {
                        AdapterState::Sending { index: index + 1 }
                    };
                }
            }
        }
        Ok(accepted)
    }

    /// Put a FIFO between the capture and its consumer so each side can run
    /// on its own clock.
    pub fn split(self, fifo_depth: usize) -> (SamplingDomain, FifoReader<StreamBeat>) {
        let (writer, reader) = async_fifo(fifo_depth);
        (
            SamplingDomain {
                adapter: self,
                writer,
            },
            reader,
        )
    }
}

/// The sampling-clock half of a split adapter.
#[derive(Debug)]
pub struct SamplingDomain {
    adapter: StreamAdapter,
    writer: FifoWriter<StreamBeat>,
}

impl SamplingDomain {
    pub fn adapter(&self) -> &StreamAdapter {
        &self.adapter
    }

    /// Advance one sampling clock, moving at most one beat into the FIFO.
    pub fn step(&mut self, input: &Bits, trigger: bool) -> Result<CaptureStatus, ConfigurationError> {
        let ready = self.writer.ready();
        if let Some(beat) = self.adapter.step(input, trigger, ready)? {
            if self.writer.push(beat).is_err() {
                log::warn!("Output domain is gone, dropping beat");
            }
        }
        Ok(self.adapter.status())
    }
}
