// Serial capture example
//
// This example pulls one or more captures from an analyzer behind a serial
// port, prints the samples and optionally writes a VCD file.

use clap::Parser;
use ila_rs::{
    uart::find_ports, Capture, DeviceIdentity, IlaConfig, SignalDescriptor, SignalSetBuilder, UartBackhaul,
    UartConfig,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "uart_capture")]
#[command(version = "0.1")]
#[command(about = "Read captures from an ILA over a serial port")]
struct Args {
    /// Serial port, searched by USB id if omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value_t = UartConfig::DEFAULT_BAUD_RATE)]
    baud: u32,

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

    /// Write the last capture to this VCD file
    #[arg(long)]
    vcd: Option<String>,

    /// Give up on a frame after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_signal(arg: &str) -> Result<SignalDescriptor, String> {
    let (name, width) = arg
        .split_once(':')
        .ok_or_else(|| format!("Expected name:width, got '{}'", arg))?;
    let width = width
        .parse()
        .map_err(|e| format!("Invalid width in '{}': {}", arg, e))?;
    Ok(SignalDescriptor::new(name, width))
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
        builder.add_signal(parse_signal(arg)?)?;
    }
    let layout = builder.finalize()?;
    let config = IlaConfig::new().sample_depth(args.depth).sample_rate(args.rate);

    let port = match args.port {
        Some(port) => port,
        None => {
            let identity = DeviceIdentity::default();
            find_ports(identity.vendor_id, identity.product_id)?
                .into_iter()
                .next()
                .ok_or("No ILA serial port found, pass --port")?
        }
    };
    let mut uart = UartConfig::new(&port).baud_rate(args.baud);
    if let Some(ms) = args.timeout_ms {
        uart = uart.read_timeout(Duration::from_millis(ms));
    }

    println!("ILA serial capture");
    println!("==================");
    println!("Port: {} @ {} baud", port, args.baud);
    println!(
        "Sample: {} bits ({} bytes on the wire), depth {}",
        layout.sample_width(),
        layout.bytes_per_sample(),
        args.depth
    );

    let mut capture = Capture::new(UartBackhaul::open(&uart)?, layout.clone(), config)?;

    for n in 0..args.count {
        capture.refresh()?;
        println!("\nCapture {}", n + 1);
        for (time, sample) in capture.enumerate()? {
            let values: Vec<String> = layout
                .fields()
                .iter()
                .filter_map(|field| sample.get(field.name()).map(|v| format!("{}={}", field.name(), v)))
                .collect();
            println!("{:>12.1} ns  {}", time * 1e9, values.join("  "));
        }
    }

    if let Some(path) = args.vcd {
        capture.write_vcd(&path, true, |_, _| {})?;
        println!("\nWrote {}", path);
    }

    Ok(())
}
