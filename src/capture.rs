use std::collections::VecDeque;

use crate::{
    bits::Bits,
    signal::{ConfigurationError, IlaConfig, SignalLayout},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Idle,
    Sampling { write_pos: usize },
}

/// What the capture engine did on one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatus {
    /// A sample was written to the buffer this step
    pub sampling: bool,
    /// The buffer holds a full capture. Cleared by the next trigger.
    pub complete: bool,
}

/// Records `sample_depth` consecutive samples once triggered.
///
/// Inputs pass through a delay line of `prologue_samples` entries first, so
/// the buffer starts that many steps before the trigger fired.
#[derive(Debug)]
pub struct CaptureEngine {
    layout: SignalLayout,
    buffer: Vec<Bits>,
    prologue: VecDeque<Bits>,
    state: CaptureState,
    complete: bool,
}

impl CaptureEngine {
    pub fn new(layout: SignalLayout, config: &IlaConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let reset = layout.reset_sample();
        Ok(Self {
            buffer: vec![reset.clone(); config.sample_depth],
            prologue: std::iter::repeat_n(reset, config.prologue_samples).collect(),
            layout,
            state: CaptureState::Idle,
            complete: false,
        })
    }

    pub fn layout(&self) -> &SignalLayout {
        &self.layout
    }

    pub fn sample_depth(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_idle(&self) -> bool {
        self.state == CaptureState::Idle
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Random read access into the buffer
    pub fn sample(&self, index: usize) -> Option<&Bits> {
        self.buffer.get(index)
    }

    pub fn samples(&self) -> &[Bits] {
        &self.buffer
    }

    /// Advance one clock. Triggers are ignored while a capture is running.
    pub fn step(&mut self, input: &Bits, trigger: bool) -> Result<CaptureStatus, ConfigurationError> {
        self.layout.check_width(input)?;
        let delayed = self.delay(input);

        let write_pos = match self.state {
            CaptureState::Idle if trigger => {
                log::trace!("Capture triggered");
                self.complete = false;
                Some(0)
            }
            CaptureState::Idle => None,
            CaptureState::Sampling { write_pos } => Some(write_pos + 1),
        };

        if let Some(pos) = write_pos {
            self.buffer[pos] = delayed;
            if pos + 1 == self.buffer.len() {
                log::debug!("Capture complete, {} samples", self.buffer.len());
                self.state = CaptureState::Idle;
                self.complete = true;
            } else {
                self.state = CaptureState::Sampling { write_pos: pos };
            }
        }

        Ok(CaptureStatus {
            sampling: write_pos.is_some(),
            complete: self.complete,
        })
    }

    fn delay(&mut self, input: &Bits) -> Bits {
        if self.prologue.is_empty() {
            return input.clone();
        }
        self.prologue.push_back(input.clone());
        self.prologue.pop_front().unwrap_or_else(|| input.clone())
    }
}
