//! Command handling and frame transmission for a byte channel.
//!
//! The host sends single command bytes. Captured samples go back as one
//! rCOBS frame per capture, terminated by `0x00`.

use std::collections::VecDeque;

use crate::{
    rcobs::{EncoderInput, RcobsEncoder},
    stream::StreamBeat,
};

/// Frame terminator on the wire
pub const FRAME_END: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    None = 0x00,
    /// Send the next capture once
    Flush = 0x01,
    /// Send every capture until stopped
    Stream = 0x02,
    Stop = 0x03,
}

impl Command {
    /// Unknown bytes map to [`Command::None`]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Flush,
            0x02 => Self::Stream,
            0x03 => Self::Stop,
            _ => Self::None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Idle,
    Cmd(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransmitState {
    Idle,
    Transmit { pending: VecDeque<u8>, last: bool },
    Flush,
    Frame,
}

/// Device-side protocol engine between a sample stream and a byte channel.
#[derive(Debug)]
pub struct FramingEngine {
    bytes_per_sample: usize,
    encoder: RcobsEncoder,
    rx: ReceiveState,
    tx: TransmitState,
    send: bool,
    stream: bool,
}

impl FramingEngine {
    pub fn new(bytes_per_sample: usize) -> Self {
        Self {
            bytes_per_sample,
            encoder: RcobsEncoder::new(),
            rx: ReceiveState::Idle,
            tx: TransmitState::Idle,
            send: false,
            stream: false,
        }
    }

    /// Takes a beat this step
    pub fn beat_ready(&self) -> bool {
        self.send && self.tx == TransmitState::Idle
    }

    /// Takes a command byte this step
    pub fn rx_ready(&self) -> bool {
        self.rx == ReceiveState::Idle
    }

    pub fn send_enabled(&self) -> bool {
        self.send
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream
    }

    /// No frame is in flight
    pub fn is_idle(&self) -> bool {
        self.tx == TransmitState::Idle && !self.encoder.valid()
    }

    /// Advance one clock.
    ///
    /// `rx` is a byte from the host, `beat` the beat accepted from the stream
    /// this step (only offered while [`Self::beat_ready`]) and `tx_ready`
    /// whether the channel takes a byte. Returns the byte sent, if any.
    pub fn step(&mut self, rx: Option<u8>, beat: Option<StreamBeat>, tx_ready: bool) -> Option<u8> {
        self.receive(rx);

        let mut sent = None;
        let ack = self.encoder.valid() && tx_ready;
        if ack {
            sent = self.encoder.output();
        }

        let encoder_ready = self.encoder.ready();
        let mut input = EncoderInput {
            ack,
            ..Default::default()
        };

        match &mut self.tx {
            TransmitState::Idle => {
                if let Some(beat) = beat {
                    if self.send {
                        self.tx = TransmitState::Transmit {
                            pending: beat.payload.to_le_bytes_padded(self.bytes_per_sample).into(),
                            last: beat.last,
                        };
                    } else {
                        log::warn!("Beat offered while sending is disabled, ignoring it");
                    }
                }
            }
            TransmitState::Transmit { pending, last } => {
                if encoder_ready {
                    if let Some(byte) = pending.pop_front() {
                        input.strobe = Some(byte);
                    } else if *last {
                        self.tx = TransmitState::Flush;
                    } else {
                        self.tx = TransmitState::Idle;
                    }
                }
            }
            TransmitState::Flush => {
                if encoder_ready {
                    input.finish = true;
                    self.tx = TransmitState::Frame;
                }
            }
            TransmitState::Frame => {
                if encoder_ready && tx_ready && sent.is_none() {
                    sent = Some(FRAME_END);
                    if !self.stream {
                        self.send = false;
                    }
                    log::trace!("Frame terminated");
                    self.tx = TransmitState::Idle;
                }
            }
        }

        self.encoder.step(input);
        sent
    }

    fn receive(&mut self, rx: Option<u8>) {
        match self.rx {
            ReceiveState::Idle => {
                if let Some(byte) = rx {
                    self.rx = ReceiveState::Cmd(Command::from_byte(byte));
                }
            }
            ReceiveState::Cmd(command) => {
                match command {
                    Command::Flush => self.send = true,
                    Command::Stream => {
                        self.send = true;
                        self.stream = true;
                    }
                    Command::Stop => self.stream = false,
                    Command::None => {}
                }
                log::debug!("Applied command {:?}", command);
                self.rx = ReceiveState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bits::Bits, rcobs};

    fn beats(values: &[u64], width: usize) -> Vec<StreamBeat> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| StreamBeat {
                payload: Bits::from_u64(v, width),
                first: i == 0,
                last: i + 1 == values.len(),
            })
            .collect()
    }

    /// Drive the engine with a queue of beats and a channel that is ready on
    /// every `tx_every` step. Returns everything sent.
    fn run(engine: &mut FramingEngine, mut queue: VecDeque<StreamBeat>, tx_every: u64, steps: u64) -> Vec<u8> {
        let mut wire = Vec::new();
        for t in 0..steps {
            let beat = if engine.beat_ready() {
                queue.pop_front()
            } else {
                None
            };
            wire.extend(engine.step(None, beat, t % tx_every == 0));
        }
        wire
    }

    fn command(engine: &mut FramingEngine, command: Command) {
        engine.step(Some(command.as_byte()), None, true);
        engine.step(None, None, true);
    }

    #[test]
    fn test_unknown_bytes_are_noop() {
        assert_eq!(Command::from_byte(0x7F), Command::None);
        assert_eq!(Command::from(0x02), Command::Stream);
        let mut engine = FramingEngine::new(1);
        command(&mut engine, Command::from_byte(0x42));
        assert!(!engine.send_enabled());
        assert!(!engine.stream_enabled());
    }

    #[test]
    fn test_nothing_sent_without_flush() {
        let mut engine = FramingEngine::new(2);
        assert!(!engine.beat_ready());
        let wire = run(&mut engine, beats(&[1, 2, 3], 16).into(), 1, 50);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_flush_sends_one_frame() {
        let mut engine = FramingEngine::new(2);
        command(&mut engine, Command::Flush);
        assert!(engine.beat_ready());

        let values = [0x1234, 0x0000, 0xFF01];
        let wire = run(&mut engine, beats(&values, 16).into(), 1, 100);

        let payload = [0x34, 0x12, 0x00, 0x00, 0x01, 0xFF];
        let mut expected = rcobs::encode(&payload);
        expected.push(FRAME_END);
        assert_eq!(wire, expected);
        assert!(!engine.send_enabled());
        assert!(engine.is_idle());
    }

    #[test]
    fn test_slow_channel_gets_same_bytes() {
        let values = [0xAA, 0x00, 0x55, 0x01];
        let mut fast = FramingEngine::new(1);
        let mut slow = FramingEngine::new(1);
        command(&mut fast, Command::Flush);
        command(&mut slow, Command::Flush);
        let a = run(&mut fast, beats(&values, 8).into(), 1, 100);
        let b = run(&mut slow, beats(&values, 8).into(), 7, 500);
        assert_eq!(a, b);
        assert_eq!(a.iter().filter(|&&b| b == FRAME_END).count(), 1);
        assert_eq!(a.last(), Some(&FRAME_END));
    }

    #[test]
    fn test_stream_keeps_sending_until_stop() {
        let mut engine = FramingEngine::new(1);
        command(&mut engine, Command::Stream);
        assert!(engine.stream_enabled());

        let mut queue: VecDeque<StreamBeat> = beats(&[1, 2], 8).into();
        queue.extend(beats(&[3, 4], 8));
        let wire = run(&mut engine, queue, 1, 100);
        let frames: Vec<_> = wire.split(|&b| b == FRAME_END).filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(rcobs::decode(frames[0]).unwrap(), vec![1, 2]);
        assert_eq!(rcobs::decode(frames[1]).unwrap(), vec![3, 4]);
        assert!(engine.send_enabled());

        command(&mut engine, Command::Stop);
        assert!(!engine.stream_enabled());
        // Send stays armed for exactly one more frame
        let wire = run(&mut engine, beats(&[5], 8).into(), 1, 50);
        assert_eq!(wire, vec![0x05, 0x02, FRAME_END]);
        assert!(!engine.send_enabled());
    }

    #[test]
    fn test_wide_payload_is_little_endian() {
        let mut engine = FramingEngine::new(4);
        command(&mut engine, Command::Flush);
        let wire = run(&mut engine, beats(&[0x0BEE_F123], 28).into(), 1, 50);
        let frame = &wire[..wire.len() - 1];
        assert_eq!(rcobs::decode(frame).unwrap(), vec![0x23, 0xF1, 0xEE, 0x0B]);
    }
}
