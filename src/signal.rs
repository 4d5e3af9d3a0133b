use std::{collections::HashSet, fmt, sync::Arc};

use crate::bits::Bits;

/// Turns a raw signal value into a display string (enum names, opcodes, ...)
pub type ValueDecoder = Arc<dyn Fn(&Bits) -> String + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("No signals were added to the capture")]
    NoSignals,

    #[error("Signal names must not be empty")]
    EmptyName,

    #[error("Signal '{name}' has zero width")]
    ZeroWidth { name: String },

    #[error("Signal '{name}' is already part of the capture")]
    DuplicateSignal { name: String },

    #[error("Sample depth must be at least 1")]
    ZeroDepth,

    #[error("Sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("Sample width mismatch: expected {expected} bits, got {actual}")]
    SampleWidthMismatch { expected: usize, actual: usize },

    #[error("Expected one value per signal ({expected}), got {actual}")]
    ValueCountMismatch { expected: usize, actual: usize },
}

/// A named, fixed-width signal observed by the analyzer.
#[derive(Clone)]
pub struct SignalDescriptor {
    name: String,
    width: usize,
    reset: Bits,
    decoder: Option<ValueDecoder>,
}

impl SignalDescriptor {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            reset: Bits::zero(width),
            decoder: None,
        }
    }

    /// Value the signal holds before the first real sample (fills the
    /// prologue delay line)
    pub fn with_reset(mut self, value: u64) -> Self {
        self.reset = Bits::from_u64(value, self.width);
        self
    }

    pub fn with_decoder(mut self, decoder: impl Fn(&Bits) -> String + Send + Sync + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn reset(&self) -> &Bits {
        &self.reset
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Run the decoder on `value`, if the signal has one
    pub fn decode(&self, value: &Bits) -> Option<String> {
        self.decoder.as_ref().map(|decoder| decoder(value))
    }
}

impl fmt::Debug for SignalDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalDescriptor")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("reset", &self.reset)
            .field("decoder", &self.decoder.is_some())
            .finish()
    }
}

/// Collects signals before a capture is built. Order matters: the first
/// signal lands in the least significant bits of every sample.
#[derive(Debug, Default)]
pub struct SignalSetBuilder {
    signals: Vec<SignalDescriptor>,
}

impl SignalSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chaining form of [`Self::add_signal`]
    pub fn signal(mut self, descriptor: SignalDescriptor) -> Result<Self, ConfigurationError> {
        self.add_signal(descriptor)?;
        Ok(self)
    }

    pub fn add_signal(&mut self, descriptor: SignalDescriptor) -> Result<(), ConfigurationError> {
        if descriptor.name.is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        if descriptor.width == 0 {
            return Err(ConfigurationError::ZeroWidth {
                name: descriptor.name,
            });
        }
        if self.signals.iter().any(|s| s.name == descriptor.name) {
            return Err(ConfigurationError::DuplicateSignal {
                name: descriptor.name,
            });
        }
        self.signals.push(descriptor);
        Ok(())
    }

    pub fn append_signals(
        &mut self,
        descriptors: impl IntoIterator<Item = SignalDescriptor>,
    ) -> Result<(), ConfigurationError> {
        descriptors
            .into_iter()
            .try_for_each(|descriptor| self.add_signal(descriptor))
    }

    /// Freeze the signal set. The returned layout cannot be changed.
    pub fn finalize(self) -> Result<SignalLayout, ConfigurationError> {
        if self.signals.is_empty() {
            return Err(ConfigurationError::NoSignals);
        }
        let mut seen = HashSet::new();
        let mut offset = 0;
        let mut fields = Vec::with_capacity(self.signals.len());
        for descriptor in self.signals {
            if !seen.insert(descriptor.name.clone()) {
                return Err(ConfigurationError::DuplicateSignal {
                    name: descriptor.name,
                });
            }
            let width = descriptor.width;
            fields.push(Field { descriptor, offset });
            offset += width;
        }
        log::debug!("Finalized {} signals, {} bits per sample", fields.len(), offset);
        Ok(SignalLayout {
            fields: fields.into(),
            sample_width: offset,
        })
    }
}

/// A signal together with its bit position inside the sample vector.
#[derive(Debug, Clone)]
pub struct Field {
    descriptor: SignalDescriptor,
    offset: usize,
}

impl Field {
    pub fn descriptor(&self) -> &SignalDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn width(&self) -> usize {
        self.descriptor.width()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Immutable placement of every signal inside a sample. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalLayout {
    fields: Arc<[Field]>,
    sample_width: usize,
}

impl SignalLayout {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Sum of all signal widths
    pub fn sample_width(&self) -> usize {
        self.sample_width
    }

    /// Sample width rounded up to the next power of two
    pub fn bits_per_sample(&self) -> usize {
        self.sample_width.next_power_of_two()
    }

    /// Bytes one sample occupies on the wire
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample().div_ceil(8)
    }

    /// The sample made of every signal's reset value
    pub fn reset_sample(&self) -> Bits {
        let mut sample = Bits::zero(self.sample_width);
        for field in self.fields.iter() {
            sample.splice(field.offset, field.descriptor.reset());
        }
        sample
    }

    /// Build a sample from one integer per signal, in declaration order.
    /// Values wider than their signal are truncated.
    pub fn pack(&self, values: &[u64]) -> Result<Bits, ConfigurationError> {
        if values.len() != self.fields.len() {
            return Err(ConfigurationError::ValueCountMismatch {
                expected: self.fields.len(),
                actual: values.len(),
            });
        }
        let mut sample = Bits::zero(self.sample_width);
        for (field, &value) in self.fields.iter().zip(values) {
            sample.splice(field.offset, &Bits::from_u64(value, field.width()));
        }
        Ok(sample)
    }

    /// Split a sample into per-signal values, in declaration order
    pub fn unpack<'a>(&'a self, sample: &'a Bits) -> impl Iterator<Item = (&'a Field, Bits)> + 'a {
        self.fields
            .iter()
            .map(move |field| (field, sample.slice(field.offset, field.width())))
    }

    pub fn check_width(&self, sample: &Bits) -> Result<(), ConfigurationError> {
        if sample.width() == self.sample_width {
            Ok(())
        } else {
            Err(ConfigurationError::SampleWidthMismatch {
                expected: self.sample_width,
                actual: sample.width(),
            })
        }
    }
}

/// Sizing and timing of one analyzer instance.
#[derive(Debug, Clone, PartialEq)]
pub struct IlaConfig {
    pub sample_depth: usize,
    /// Samples per second
    pub sample_rate: f64,
    pub prologue_samples: usize,
    /// Entries in the clock-domain-crossing FIFO
    pub fifo_depth: usize,
}

impl IlaConfig {
    pub const DEFAULT_SAMPLE_DEPTH: usize = 32;
    pub const DEFAULT_SAMPLE_RATE: f64 = 50e6;
    pub const DEFAULT_PROLOGUE_SAMPLES: usize = 1;
    pub const DEFAULT_FIFO_DEPTH: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_depth(mut self, depth: usize) -> Self {
        self.sample_depth = depth;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn prologue_samples(mut self, samples: usize) -> Self {
        self.prologue_samples = samples;
        self
    }

    pub fn fifo_depth(mut self, depth: usize) -> Self {
        self.fifo_depth = depth;
        self
    }

    /// Seconds between two samples
    pub fn sample_period(&self) -> f64 {
        1.0 / self.sample_rate
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sample_depth == 0 {
            return Err(ConfigurationError::ZeroDepth);
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigurationError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }
}

impl Default for IlaConfig {
    fn default() -> Self {
        Self {
            sample_depth: Self::DEFAULT_SAMPLE_DEPTH,
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            prologue_samples: Self::DEFAULT_PROLOGUE_SAMPLES,
            fifo_depth: Self::DEFAULT_FIFO_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_signals() -> SignalLayout {
        SignalSetBuilder::new()
            .signal(SignalDescriptor::new("a", 1))
            .and_then(|b| b.signal(SignalDescriptor::new("b", 3)))
            .and_then(|b| b.signal(SignalDescriptor::new("c", 8)))
            .and_then(|b| b.signal(SignalDescriptor::new("d", 16)))
            .and_then(SignalSetBuilder::finalize)
            .unwrap()
    }

    #[test]
    fn test_layout_sizes() {
        let layout = four_signals();
        assert_eq!(layout.sample_width(), 28);
        assert_eq!(layout.bits_per_sample(), 32);
        assert_eq!(layout.bytes_per_sample(), 4);

        let offsets: Vec<_> = layout.fields().iter().map(Field::offset).collect();
        assert_eq!(offsets, vec![0, 1, 4, 12]);
    }

    #[test]
    fn test_odd_widths_round_up() {
        let layout = SignalSetBuilder::new()
            .signal(SignalDescriptor::new("x", 33))
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(layout.bits_per_sample(), 64);
        assert_eq!(layout.bytes_per_sample(), 8);

        let tiny = SignalSetBuilder::new()
            .signal(SignalDescriptor::new("x", 3))
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(tiny.bits_per_sample(), 4);
        assert_eq!(tiny.bytes_per_sample(), 1);
    }

    #[test]
    fn test_rejects_bad_signals() {
        let mut builder = SignalSetBuilder::new();
        assert!(matches!(
            builder.add_signal(SignalDescriptor::new("", 1)),
            Err(ConfigurationError::EmptyName)
        ));
        assert!(matches!(
            builder.add_signal(SignalDescriptor::new("z", 0)),
            Err(ConfigurationError::ZeroWidth { .. })
        ));
        builder.add_signal(SignalDescriptor::new("a", 1)).unwrap();
        assert!(matches!(
            builder.add_signal(SignalDescriptor::new("a", 2)),
            Err(ConfigurationError::DuplicateSignal { name }) if name == "a"
        ));
        assert!(matches!(
            SignalSetBuilder::new().finalize(),
            Err(ConfigurationError::NoSignals)
        ));
    }

    #[test]
    fn test_pack_unpack() {
        let layout = four_signals();
        let sample = layout.pack(&[1, 0b110, 0x5A, 0xC0DE]).unwrap();
        let values: Vec<_> = layout
            .unpack(&sample)
            .map(|(field, value)| (field.name().to_string(), value.to_u64().unwrap()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 0b110),
                ("c".to_string(), 0x5A),
                ("d".to_string(), 0xC0DE),
            ]
        );
        assert!(matches!(
            layout.pack(&[1, 2]),
            Err(ConfigurationError::ValueCountMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_reset_sample_and_decoder() {
        let layout = SignalSetBuilder::new()
            .signal(SignalDescriptor::new("valid", 1).with_reset(1))
            .unwrap()
            .signal(
                SignalDescriptor::new("state", 2)
                    .with_reset(2)
                    .with_decoder(|v| ["IDLE", "RUN", "DONE", "ERR"][v.low_u64() as usize].to_string()),
            )
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(layout.reset_sample().to_u64(), Some(0b101));

        let state = layout.field("state").unwrap().descriptor();
        assert!(state.has_decoder());
        assert_eq!(state.decode(&Bits::from_u64(1, 2)).as_deref(), Some("RUN"));
        assert_eq!(layout.field("valid").unwrap().descriptor().decode(&Bits::zero(1)), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(IlaConfig::default().validate().is_ok());
        assert!(matches!(
            IlaConfig::new().sample_depth(0).validate(),
            Err(ConfigurationError::ZeroDepth)
        ));
        assert!(matches!(
            IlaConfig::new().sample_rate(0.0).validate(),
            Err(ConfigurationError::InvalidSampleRate(_))
        ));
        assert!((IlaConfig::new().sample_rate(1e6).sample_period() - 1e-6).abs() < 1e-15);
    }
}
