use std::{collections::HashMap, io, time::Duration};

use polars::prelude::*;

use crate::{
    bits::Bits,
    rcobs::EncodingError,
    signal::{ConfigurationError, IlaConfig, SignalLayout},
};

#[derive(Debug, thiserror::Error)]
pub enum BackhaulError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed capture frame: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Capture length mismatch: expected {expected} bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    #[error("No frame terminator after {elapsed:?} ({received} bytes received)")]
    Timeout { elapsed: Duration, received: usize },

    #[error("Channel closed after {received} bytes without a frame terminator")]
    ChannelClosed { received: usize },

    #[error("No ILA device {vendor_id:04x}:{product_id:04x} found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Invalid capture configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("DataFrame error: {0}")]
    DataFrame(#[from] PolarsError),

    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// A transport that fetches one capture's worth of sample bytes from the
/// device, already stripped of any framing.
pub trait Backhaul {
    fn ingest(&mut self) -> Result<Vec<u8>, BackhaulError>;
}

impl<B: Backhaul + ?Sized> Backhaul for Box<B> {
    fn ingest(&mut self) -> Result<Vec<u8>, BackhaulError> {
        (**self).ingest()
    }
}

/// One reconstructed sample, keyed by signal name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSample {
    values: HashMap<String, Bits>,
}

impl ParsedSample {
    pub fn from_sample(layout: &SignalLayout, sample: &Bits) -> Self {
        Self {
            values: layout
                .unpack(sample)
                .map(|(field, value)| (field.name().to_string(), value))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Bits> {
        self.values.get(name)
    }

    /// Shorthand for signals up to 64 bits wide
    pub fn value(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Bits::to_u64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bits)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Split decoded capture bytes into samples.
///
/// Each sample takes `bytes_per_sample` bytes, least significant first.
/// Padding above the sample width is dropped.
pub fn parse_samples(
    layout: &SignalLayout,
    sample_depth: usize,
    raw: &[u8],
) -> Result<Vec<ParsedSample>, BackhaulError> {
    let bytes_per_sample = layout.bytes_per_sample();
    let expected = sample_depth * bytes_per_sample;
    if raw.len() != expected {
        return Err(BackhaulError::FrameLengthMismatch {
            expected,
            actual: raw.len(),
        });
    }
    Ok(raw
        .chunks_exact(bytes_per_sample)
        .map(|chunk| ParsedSample::from_sample(layout, &Bits::from_le_bytes(chunk, layout.sample_width())))
        .collect())
}

pub const TIME_COLUMN_NAME: &str = "time";
const ROW_INDEX_NAME: &str = "row_index";

/// Host-side view of an analyzer: pulls captures over a backhaul and turns
/// them into named, timestamped samples.
#[derive(Debug)]
pub struct Capture<B: Backhaul> {
    backhaul: B,
    layout: SignalLayout,
    config: IlaConfig,
    samples: Option<Vec<ParsedSample>>,
}

impl<B: Backhaul> Capture<B> {
    pub fn new(backhaul: B, layout: SignalLayout, config: IlaConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            backhaul,
            layout,
            config,
            samples: None,
        })
    }

    pub fn layout(&self) -> &SignalLayout {
        &self.layout
    }

    pub fn config(&self) -> &IlaConfig {
        &self.config
    }

    pub fn backhaul_mut(&mut self) -> &mut B {
        &mut self.backhaul
    }

    pub fn into_backhaul(self) -> B {
        self.backhaul
    }

    /// Samples from the last successful refresh
    pub fn samples(&self) -> Option<&[ParsedSample]> {
        self.samples.as_deref()
    }

    /// Fetch a new capture, replacing the previous one. On error the
    /// previous capture is kept.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn refresh(&mut self) -> Result<(), BackhaulError> {
        crate::profile_scope!("Capture::refresh");

        let raw = self.backhaul.ingest()?;
        let samples = parse_samples(&self.layout, self.config.sample_depth, &raw)?;
        log::debug!("Refreshed capture with {} samples", samples.len());
        self.samples = Some(samples);
        Ok(())
    }

    /// The current capture with timestamps, without fetching anything
    pub fn timeline(&self) -> Option<Timeline<'_>> {
        self.samples
            .as_deref()
            .map(|samples| Timeline::new(samples, self.config.sample_period()))
    }

    /// Timestamped samples, fetching a capture first if there is none yet.
    /// Call again to restart from the first sample.
    pub fn enumerate(&mut self) -> Result<Timeline<'_>, BackhaulError> {
        if self.samples.is_none() {
            self.refresh()?;
        }
        let period = self.config.sample_period();
        Ok(Timeline::new(self.samples.as_deref().unwrap_or(&[]), period))
    }

    /// The capture as a table with a `time` column and one column per signal.
    ///
    /// Signals up to 64 bits are `u64` columns, wider ones hex strings.
    /// Signals with a decoder get an extra `<name>_decoded` string column.
    pub fn to_dataframe(&mut self) -> Result<DataFrame, BackhaulError> {
        crate::profile_scope!("Capture::to_dataframe");

        let period = self.config.sample_period();
        let layout = self.layout.clone();
        let samples: Vec<&ParsedSample> = self.enumerate()?.map(|(_, sample)| sample).collect();

        let mut columns: Vec<Column> = Vec::new();
        let mut names = Vec::new();
        for field in layout.fields() {
            let values = samples.iter().map(|s| s.get(field.name()));
            let column: Column = if field.width() <= 64 {
                let values: Vec<u64> = values.map(|v| v.map_or(0, Bits::low_u64)).collect();
                Series::new(field.name().into(), values).into()
            } else {
                let values: Vec<String> = values.map(|v| v.map(Bits::to_string).unwrap_or_default()).collect();
                Series::new(field.name().into(), values).into()
            };
            columns.push(column);
            names.push(field.name().to_string());

            if field.descriptor().has_decoder() {
                let name = format!("{}_decoded", field.name());
                let decoded: Vec<String> = samples
                    .iter()
                    .map(|s| {
                        s.get(field.name())
                            .and_then(|v| field.descriptor().decode(v))
                            .unwrap_or_default()
                    })
                    .collect();
                columns.push(Series::new(name.as_str().into(), decoded).into());
                names.push(name);
            }
        }

        let mut selection = vec![col(TIME_COLUMN_NAME)];
        selection.extend(names.iter().map(|name| col(name.as_str())));

        let df = DataFrame::new(columns)?
            .lazy()
            .with_row_index(ROW_INDEX_NAME, Some(0))
            .with_columns([
                (col(ROW_INDEX_NAME).cast(DataType::Float64) * lit(period)).alias(TIME_COLUMN_NAME)
            ])
            .select(selection)
            .collect()?;
        Ok(df)
    }
}

/// Restartable iterator over `(timestamp, sample)` pairs. Timestamps are in
/// seconds from the first sample.
#[derive(Debug, Clone)]
pub struct Timeline<'a> {
    samples: &'a [ParsedSample],
    period: f64,
    index: usize,
}

impl<'a> Timeline<'a> {
    pub fn new(samples: &'a [ParsedSample], period: f64) -> Self {
        Self {
            samples,
            period,
            index: 0,
        }
    }

    pub fn period(&self) -> f64 {
        self.period
    }
}

impl<'a> Iterator for Timeline<'a> {
    type Item = (f64, &'a ParsedSample);

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.samples.get(self.index)?;
        let timestamp = self.index as f64 * self.period;
        self.index += 1;
        Some((timestamp, sample))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Timeline<'_> {}
