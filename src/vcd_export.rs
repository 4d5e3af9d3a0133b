//! Value change dump output for captured samples.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use vcd::{IdCode, TimescaleUnit, Value, VarType};

use crate::{
    backhaul::{Backhaul, BackhaulError, Capture, ParsedSample, Timeline},
    bits::Bits,
    signal::{Field, SignalLayout},
};

/// Name of the synthetic sample clock
pub const CLOCK_NAME: &str = "ila_clk";
const SCOPE_NAME: &str = "ila";

fn to_ns(seconds: f64) -> u64 {
    (seconds * 1e9).round().max(0.0) as u64
}

fn bit_value(bit: bool) -> Value {
    if bit {
        Value::V1
    } else {
        Value::V0
    }
}

struct Dump<W: Write> {
    writer: vcd::Writer<W>,
    now: Option<u64>,
}

impl<W: Write> Dump<W> {
    /// Move to time `ns`, skipping the timestamp if it is already current
    fn at(&mut self, ns: u64) -> io::Result<()> {
        if self.now != Some(ns) {
            self.writer.timestamp(ns)?;
            self.now = Some(ns);
        }
        Ok(())
    }

    fn change(&mut self, field: &Field, id: IdCode, value: &Bits) -> io::Result<()> {
        if let Some(text) = field.descriptor().decode(value) {
            return self.writer.change_string(id, &text.replace(' ', "_"));
        }
        if field.width() == 1 {
            self.writer.change_scalar(id, bit_value(value.bit(0)))
        } else {
            self.writer.change_vector(id, value.iter_msb_first().map(bit_value))
        }
    }
}

/// Write a timeline as VCD with a 1 ns timescale.
///
/// With `inject_clock` a clock toggling every half sample period is added,
/// high at each sample instant. `post_step` runs after each sample is written
/// with its index and timestamp in seconds.
pub fn write_timeline<W: Write>(
    out: W,
    layout: &SignalLayout,
    timeline: Timeline<'_>,
    inject_clock: bool,
    mut post_step: impl FnMut(usize, f64),
) -> io::Result<()> {
    let half_period = timeline.period() / 2.0;
    let mut dump = Dump {
        writer: vcd::Writer::new(out),
        now: None,
    };

    dump.writer.timescale(1, TimescaleUnit::NS)?;
    dump.writer.add_module(SCOPE_NAME)?;
    let clock = if inject_clock {
        Some(dump.writer.add_wire(1, CLOCK_NAME)?)
    } else {
        None
    };
    let mut vars = Vec::with_capacity(layout.fields().len());
    for field in layout.fields() {
        let id = if field.descriptor().has_decoder() {
            dump.writer.add_var(VarType::String, 1, field.name(), None)?
        } else {
            dump.writer.add_wire(field.width() as u32, field.name())?
        };
        vars.push((field, id));
    }
    dump.writer.upscope()?;
    dump.writer.enddefinitions()?;

    let mut edge = 0u64;
    let mut previous: Option<&ParsedSample> = None;
    let mut end = 0.0;
    for (index, (timestamp, sample)) in timeline.enumerate() {
        if let Some(clock) = clock {
            while (edge as f64) * half_period < timestamp {
                dump.at(to_ns(edge as f64 * half_period))?;
                dump.writer.change_scalar(clock, bit_value(edge % 2 == 0))?;
                edge += 1;
            }
        }

        dump.at(to_ns(timestamp))?;
        for (field, id) in &vars {
            let Some(value) = sample.get(field.name()) else {
                continue;
            };
            if previous.and_then(|p| p.get(field.name())) != Some(value) {
                dump.change(field, *id, value)?;
            }
        }
        previous = Some(sample);
        end = timestamp + 2.0 * half_period;
        post_step(index, timestamp);
    }

    if let Some(clock) = clock {
        while (edge as f64) * half_period < end {
            dump.at(to_ns(edge as f64 * half_period))?;
            dump.writer.change_scalar(clock, bit_value(edge % 2 == 0))?;
            edge += 1;
        }
    }
    dump.at(to_ns(end))?;
    Ok(())
}

impl<B: Backhaul> Capture<B> {
    /// Dump the capture to a VCD file, fetching one first if needed.
    #[tracing::instrument(skip(self, path, post_step), fields(path = %path.as_ref().display()), level = "debug")]
    pub fn write_vcd(
        &mut self,
        path: impl AsRef<Path>,
        inject_clock: bool,
        post_step: impl FnMut(usize, f64),
    ) -> Result<(), BackhaulError> {
        let mut file = BufWriter::new(File::create(path.as_ref())?);
        self.write_vcd_to(&mut file, inject_clock, post_step)?;
        file.flush()?;
        log::debug!("Wrote VCD to {}", path.as_ref().display());
        Ok(())
    }

    /// Dump the capture as VCD into any writer
    pub fn write_vcd_to<W: Write>(
        &mut self,
        out: W,
        inject_clock: bool,
        post_step: impl FnMut(usize, f64),
    ) -> Result<(), BackhaulError> {
        crate::profile_scope!("Capture::write_vcd");

        let layout = self.layout().clone();
        let timeline = self.enumerate()?;
        write_timeline(out, &layout, timeline, inject_clock, post_step)?;
        Ok(())
    }
}
