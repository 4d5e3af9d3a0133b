// Simulated capture example
//
// This example runs the device model of a small bus monitor behind a
// simulated serial link, reads captures with the regular host code and
// prints them as a DataFrame. Useful for trying the host side without
// hardware.

use clap::Parser;
use ila_rs::{
    Bits, Capture, Command, IlaConfig, IlaDevice, SignalDescriptor, SignalSetBuilder, SimulatedSerial, Stimulus,
    UartBackhaul,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "simulated_capture")]
#[command(version = "0.1")]
#[command(about = "Capture from a simulated ILA over a simulated serial link")]
struct Args {
    #[arg(short, long, default_value_t = 16)]
    depth: usize,

    #[arg(short, long, default_value_t = 2)]
    prologue: usize,

    /// Clock cycles the transmitter needs per byte
    #[arg(short, long, default_value_t = 4)]
    cycles_per_byte: u64,

    /// Use STREAM mode and read this many captures
    #[arg(short, long)]
    stream: Option<usize>,

    /// Write the last capture to this VCD file
    #[arg(long)]
    vcd: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

const STATES: [&str; 4] = ["IDLE", "ADDR", "DATA", "ACK"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let layout = SignalSetBuilder::new()
        .signal(SignalDescriptor::new("strobe", 1))?
        .signal(SignalDescriptor::new("state", 2).with_decoder(|v| STATES[(v.low_u64() & 3) as usize].to_string()))?
        .signal(SignalDescriptor::new("addr", 7))?
        .signal(SignalDescriptor::new("data", 8))?
        .finalize()?;
    let config = IlaConfig::new()
        .sample_depth(args.depth)
        .prologue_samples(args.prologue)
        .sample_rate(25e6);

    // A bus transaction every 200 cycles, triggering on its strobe
    let probe_layout = layout.clone();
    let probe = move |cycle: u64| {
        let phase = cycle % 200;
        let state = match phase {
            0..=2 => 1,
            3..=9 => 2,
            10 => 3,
            _ => 0,
        };
        let values = [
            u64::from(phase == 0),
            state,
            (cycle / 200) & 0x7F,
            (cycle * 37) & 0xFF,
        ];
        Stimulus {
            sample: probe_layout.pack(&values).unwrap_or_else(|_| Bits::zero(probe_layout.sample_width())),
            trigger: phase == 0,
        }
    };

    let device = IlaDevice::new(layout.clone(), &config)?;
    let link = SimulatedSerial::new(device, probe).with_cycles_per_byte(args.cycles_per_byte);
    let mut backhaul = UartBackhaul::new(link).with_read_timeout(Duration::from_secs(2));

    let captures = match args.stream {
        Some(count) => {
            backhaul.send_command(Command::Stream)?;
            backhaul = backhaul.passive();
            count
        }
        None => 1,
    };

    let mut capture = Capture::new(backhaul, layout, config)?;
    for n in 0..captures {
        capture.refresh()?;
        println!("Capture {}", n + 1);
        println!("{}", capture.to_dataframe()?);
    }

    if let Some(path) = args.vcd {
        capture.write_vcd(&path, true, |index, time| {
            log::debug!("Sample {} at {:.1} ns", index, time * 1e9);
        })?;
        println!("Wrote {}", path);
    }

    Ok(())
}
