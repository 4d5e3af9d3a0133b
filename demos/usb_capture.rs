// USB capture example
//
// This example reads captures from an ILA over its bulk endpoint and prints
// them as a DataFrame. Requires the `usb` feature.

use clap::Parser;
use ila_rs::{Capture, DeviceIdentity, IlaConfig, SignalDescriptor, SignalSetBuilder, UsbBackhaul};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "usb_capture")]
#[command(version = "0.1")]
#[command(about = "Read captures from an ILA over USB")]
struct Args {
    /// Signals as name:width, in the order the device packs them
    #[arg(short, long, value_delimiter = ',', required = true)]
    signals: Vec<String>,

    #[arg(short, long, default_value_t = IlaConfig::DEFAULT_SAMPLE_DEPTH)]
    depth: usize,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = IlaConfig::DEFAULT_SAMPLE_RATE)]
    rate: f64,

    /// Number of captures to read
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Bulk read timeout in milliseconds, 0 waits forever
    #[arg(short, long, default_value_t = 0)]
    timeout_ms: u64,

    /// Write the last capture to this VCD file
    #[arg(long)]
    vcd: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut builder = SignalSetBuilder::new();
    for arg in &args.signals {
        let (name, width) = arg
            .split_once(':')
            .ok_or_else(|| format!("Expected name:width, got '{}'", arg))?;
        builder.add_signal(SignalDescriptor::new(name, width.parse()?))?;
    }
    let layout = builder.finalize()?;
    let config = IlaConfig::new().sample_depth(args.depth).sample_rate(args.rate);

    let identity = DeviceIdentity::default();
    println!(
        "Opening {:04x}:{:04x}, endpoint {:#04x}",
        identity.vendor_id,
        identity.product_id,
        identity.endpoint_address()
    );
    let backhaul =
        UsbBackhaul::open(identity, &layout, &config)?.with_timeout(Duration::from_millis(args.timeout_ms));
    let mut capture = Capture::new(backhaul, layout, config)?;

    for n in 0..args.count {
        capture.refresh()?;
        println!("Capture {}", n + 1);
        println!("{}", capture.to_dataframe()?);
    }

    if let Some(path) = args.vcd {
        capture.write_vcd(&path, true, |_, _| {})?;
        println!("Wrote {}", path);
    }

    Ok(())
}
