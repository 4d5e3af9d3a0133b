use std::time::Duration;

use ila_rs::{
    Backhaul, BackhaulError, Bits, Capture, Command, DeviceIdentity, IlaConfig, IlaDevice, SignalDescriptor,
    SignalLayout, SignalSetBuilder, SimulatedSerial, SimulatedUsb, Stimulus, UartBackhaul, UsbBackhaul,
};

fn four_signals() -> SignalLayout {
    SignalSetBuilder::new()
        .signal(SignalDescriptor::new("a", 1))
        .unwrap()
        .signal(SignalDescriptor::new("b", 3))
        .unwrap()
        .signal(SignalDescriptor::new("c", 8))
        .unwrap()
        .signal(SignalDescriptor::new("d", 16))
        .unwrap()
        .finalize()
        .unwrap()
}

/// Value of each signal at a given cycle
fn pattern(cycle: u64) -> [u64; 4] {
    [cycle & 1, cycle % 8, (cycle * 3) & 0xFF, cycle & 0xFFFF]
}

/// Triggers every `period` cycles starting at `first`
fn probe(layout: SignalLayout, first: u64, period: u64) -> impl FnMut(u64) -> Stimulus + Send + 'static {
    move |cycle| Stimulus {
        sample: layout.pack(&pattern(cycle)).unwrap(),
        trigger: cycle >= first && (cycle - first) % period == 0,
    }
}

fn serial_capture(config: &IlaConfig, first: u64, period: u64) -> Capture<UartBackhaul<SimulatedSerial>> {
    let layout = four_signals();
    let device = IlaDevice::new(layout.clone(), config).unwrap();
    let link = SimulatedSerial::new(device, probe(layout.clone(), first, period)).with_cycles_per_byte(3);
    let backhaul = UartBackhaul::new(link).with_read_timeout(Duration::from_secs(5));
    Capture::new(backhaul, layout, config.clone()).unwrap()
}

fn values(capture: &mut Capture<impl Backhaul>) -> Vec<[u64; 4]> {
    capture
        .enumerate()
        .unwrap()
        .map(|(_, s)| {
            [
                s.value("a").unwrap(),
                s.value("b").unwrap(),
                s.value("c").unwrap(),
                s.value("d").unwrap(),
            ]
        })
        .collect()
}

#[test]
fn test_four_signals_over_uart() {
    let config = IlaConfig::new().sample_depth(4).prologue_samples(0).sample_rate(50e6);
    let mut capture = serial_capture(&config, 20, 1_000);

    assert_eq!(capture.layout().sample_width(), 28);
    assert_eq!(capture.layout().bytes_per_sample(), 4);

    let expected: Vec<_> = (20..24).map(pattern).collect();
    assert_eq!(values(&mut capture), expected);

    let times: Vec<f64> = capture.enumerate().unwrap().map(|(t, _)| t).collect();
    assert_eq!(times.len(), 4);
    for (i, t) in times.iter().enumerate() {
        assert!((t - i as f64 * 20e-9).abs() < 1e-15);
    }

    for sample in capture.samples().unwrap() {
        assert_eq!(sample.get("b").map(Bits::width), Some(3));
        assert_eq!(sample.get("d").map(Bits::width), Some(16));
    }
}

#[test]
fn test_prologue_samples_precede_trigger() {
    let config = IlaConfig::new().sample_depth(4).prologue_samples(1);
    let mut capture = serial_capture(&config, 50, 1_000);
    let expected: Vec<_> = (49..53).map(pattern).collect();
    assert_eq!(values(&mut capture), expected);
}

#[test]
fn test_each_refresh_fetches_a_new_capture() {
    let config = IlaConfig::new().sample_depth(4).prologue_samples(0);
    let mut capture = serial_capture(&config, 10, 300);

    capture.refresh().unwrap();
    let first = values(&mut capture);
    capture.refresh().unwrap();
    let second = values(&mut capture);

    // The second capture waited for the next trigger
    assert_eq!(first, (10..14).map(pattern).collect::<Vec<_>>());
    assert_eq!(second, (310..314).map(pattern).collect::<Vec<_>>());
}

#[test]
fn test_stream_mode_sends_until_stop() {
    let layout = four_signals();
    let config = IlaConfig::new().sample_depth(4).prologue_samples(0);
    let device = IlaDevice::new(layout.clone(), &config).unwrap();
    let link = SimulatedSerial::new(device, probe(layout.clone(), 5, 200)).with_idle_limit(5_000);
    let mut backhaul = UartBackhaul::new(link)
        .passive()
        .with_read_timeout(Duration::from_millis(500));

    backhaul.send_command(Command::Stream).unwrap();
    let mut capture = Capture::new(backhaul, layout.clone(), config.clone()).unwrap();

    let mut starts = Vec::new();
    for _ in 0..3 {
        capture.refresh().unwrap();
        starts.push(capture.samples().unwrap()[0].value("d").unwrap());
    }
    assert_eq!(starts, vec![5, 205, 405]);

    capture.backhaul_mut().send_command(Command::Stop).unwrap();
    // A capture already in flight still arrives, then the device goes quiet
    let mut delivered = 0;
    loop {
        match capture.refresh() {
            Ok(()) => delivered += 1,
            Err(err) => {
                assert!(
                    matches!(err, BackhaulError::Timeout { received: 0, .. }),
                    "unexpected error: {err}"
                );
                break;
            }
        }
        assert!(delivered <= 1, "device kept streaming after STOP");
    }
}

#[test]
fn test_four_signals_over_usb() {
    let layout = four_signals();
    let config = IlaConfig::new().sample_depth(4).prologue_samples(0).fifo_depth(2);
    let identity = DeviceIdentity::default();
    let device = SimulatedUsb::new(layout.clone(), &config, identity, probe(layout.clone(), 30, 100))
        .unwrap()
        .with_clock_ratio(2);
    let backhaul = UsbBackhaul::new(device, identity, &layout, &config);
    let mut capture = Capture::new(backhaul, layout, config).unwrap();

    assert_eq!(values(&mut capture), (30..34).map(pattern).collect::<Vec<_>>());
    capture.refresh().unwrap();
    assert_eq!(values(&mut capture), (130..134).map(pattern).collect::<Vec<_>>());
}

#[test]
fn test_exports() {
    let config = IlaConfig::new().sample_depth(4).prologue_samples(0);
    let mut capture = serial_capture(&config, 8, 1_000);

    let df = capture.to_dataframe().unwrap();
    assert_eq!(df.height(), 4);
    assert_eq!(df.width(), 5);

    let path = std::env::temp_dir().join(format!("ila_rs_end_to_end_{}.vcd", std::process::id()));
    let mut steps = 0;
    capture.write_vcd(&path, true, |_, _| steps += 1).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(steps, 4);
    assert!(text.contains("$enddefinitions"));
    assert!(text.contains("ila_clk"));
    assert!(text.lines().any(|l| l == "#60"));
}
