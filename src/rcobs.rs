//! Reverse consistent-overhead byte stuffing.
//!
//! An rCOBS frame never contains `0x00`, so a single zero byte can terminate
//! it on the wire. Unlike plain COBS the length markers trail the data they
//! describe, which lets an encoder emit bytes as they arrive without
//! buffering a whole block. Decoding walks the frame from the end.

/// Marker for a full run of 254 non-zero bytes with no zero following it
pub const RUN_MARKER: u8 = 0xFF;
const MAX_RUN: u8 = 254;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unexpected zero byte at offset {offset}")]
    ZeroByte { offset: usize },

    #[error("Marker at offset {offset} claims {run} bytes but only {available} precede it")]
    RunTooLong {
        offset: usize,
        run: usize,
        available: usize,
    },
}

/// Encode a whole buffer. The terminating `0x00` is not included.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / usize::from(MAX_RUN) + 1);
    let mut run: u8 = 0;
    for &byte in data {
        run += 1;
        if byte == 0 {
            out.push(run);
            run = 0;
        } else {
            out.push(byte);
            if run == MAX_RUN {
                out.push(RUN_MARKER);
                run = 0;
            }
        }
    }
    out.push(run + 1);
    out
}

/// Decode one frame (without its terminator).
pub fn decode(data: &[u8]) -> Result<Vec<u8>, EncodingError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = vec![0u8; data.len()];
    // One past the last unread input byte and one past the lowest output
    // byte written so far. Output is filled from the back.
    let mut read = data.len();
    let mut write = data.len();

    while read > 0 {
        let offset = read - 1;
        let marker = data[offset];
        if marker == 0 {
            return Err(EncodingError::ZeroByte { offset });
        }
        read -= 1;
        // Every marker except the last one and full-run markers stands in
        // for a zero byte.
        if offset != data.len() - 1 && marker != RUN_MARKER {
            write -= 1;
            out[write] = 0;
        }
        let run = usize::from(marker) - 1;
        if run > read {
            return Err(EncodingError::RunTooLong {
                offset,
                run,
                available: read,
            });
        }
        let segment = &data[read - run..read];
        if let Some(pos) = segment.iter().position(|&b| b == 0) {
            return Err(EncodingError::ZeroByte {
                offset: read - run + pos,
            });
        }
        out[write - run..write].copy_from_slice(segment);
        write -= run;
        read -= run;
    }

    log::trace!("Decoded {} frame bytes into {}", data.len(), data.len() - write);
    Ok(out.split_off(write))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Idle,
    Encode,
    Finish,
    Delay,
}

/// Signals presented to the encoder for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderInput {
    /// Byte to encode; only taken while the encoder is ready
    pub strobe: Option<u8>,
    /// Close the frame by emitting the final run marker
    pub finish: bool,
    /// The consumer took the byte currently presented
    pub ack: bool,
}

/// Streaming rCOBS encoder, one byte in or out per step.
///
/// Every output byte is held until acknowledged. A byte that completes a
/// 254-long run of non-zero bytes is followed by [`RUN_MARKER`] before the
/// encoder is ready again.
#[derive(Debug, Clone)]
pub struct RcobsEncoder {
    state: EncoderState,
    run: u8,
    raw: u8,
    out: u8,
    overflow: bool,
}

impl Default for RcobsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RcobsEncoder {
    pub fn new() -> Self {
        Self {
            state: EncoderState::Idle,
            run: 0,
            raw: 0,
            out: 0,
            overflow: false,
        }
    }

    /// Can take a byte or a finish request this step
    pub fn ready(&self) -> bool {
        self.state == EncoderState::Idle
    }

    pub fn valid(&self) -> bool {
        matches!(self.state, EncoderState::Finish | EncoderState::Delay)
    }

    /// The byte currently presented to the consumer
    pub fn output(&self) -> Option<u8> {
        self.valid().then_some(self.out)
    }

    pub fn step(&mut self, input: EncoderInput) {
        match self.state {
            EncoderState::Idle => {
                if let Some(byte) = input.strobe {
                    self.run += 1;
                    self.raw = byte;
                    self.state = EncoderState::Encode;
                } else if input.finish {
                    self.out = self.run + 1;
                    self.run = 0;
                    self.state = EncoderState::Finish;
                }
            }
            EncoderState::Encode => {
                if self.raw == 0 {
                    self.out = self.run;
                    self.run = 0;
                } else {
                    self.out = self.raw;
                    if self.run == MAX_RUN {
                        self.run = 0;
                        self.overflow = true;
                    }
                }
                self.state = EncoderState::Finish;
            }
            EncoderState::Finish => {
                if input.ack {
                    if self.overflow {
                        self.overflow = false;
                        self.out = RUN_MARKER;
                        self.state = EncoderState::Delay;
                    } else {
                        self.state = EncoderState::Idle;
                    }
                }
            }
            EncoderState::Delay => {
                if input.ack {
                    self.state = EncoderState::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small xorshift so the property tests stay deterministic
    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }

        fn bytes(&mut self, len: usize, zero_every: u32) -> Vec<u8> {
            (0..len)
                .map(|_| {
                    let v = self.next();
                    if v % zero_every == 0 {
                        0
                    } else {
                        (v >> 8) as u8
                    }
                })
                .collect()
        }
    }

    fn encode_with_fsm(data: &[u8], stall_every: usize) -> Vec<u8> {
        let mut encoder = RcobsEncoder::new();
        let mut pending = data.iter().copied();
        let mut out = Vec::new();
        let mut finished = false;
        let mut step = 0usize;
        loop {
            step += 1;
            let ack = encoder.valid() && (stall_every == 0 || step % stall_every != 0);
            if ack {
                out.extend(encoder.output());
            }
            let mut input = EncoderInput {
                ack,
                ..Default::default()
            };
            if encoder.ready() {
                if finished {
                    break;
                }
                match pending.next() {
                    Some(byte) => input.strobe = Some(byte),
                    None => {
                        input.finish = true;
                        finished = true;
                    }
                }
            }
            encoder.step(input);
        }
        out
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(decode(&[0x01]).unwrap(), Vec::<u8>::new());
        assert_eq!(decode(&[0x01, 0x01]).unwrap(), vec![0x00]);
        assert_eq!(decode(&[0x01, 0x01, 0x01]).unwrap(), vec![0x00, 0x00]);
        assert_eq!(
            decode(&[0x11, 0x22, 0x03, 0x33, 0x02]).unwrap(),
            vec![0x11, 0x22, 0x00, 0x33]
        );
        assert_eq!(
            decode(&[0x11, 0x02, 0x01, 0x01, 0x01]).unwrap(),
            vec![0x11, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            decode(&[0x11, 0x22, 0x33, 0x44, 0x05]).unwrap(),
            vec![0x11, 0x22, 0x33, 0x44]
        );
        assert_eq!(encode(&[0x11, 0x22, 0x00, 0x33]), vec![0x11, 0x22, 0x03, 0x33, 0x02]);
        assert_eq!(encode(&[]), vec![0x01]);
    }

    #[test]
    fn test_empty_input_decodes_empty() {
        assert_eq!(decode(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_rejects_zero_bytes() {
        assert_eq!(
            decode(&[0x11, 0x00, 0x03]),
            Err(EncodingError::ZeroByte { offset: 1 })
        );
        assert_eq!(decode(&[0x00]), Err(EncodingError::ZeroByte { offset: 0 }));
    }

    #[test]
    fn test_rejects_overlong_run() {
        assert_eq!(
            decode(&[0x11, 0x05]),
            Err(EncodingError::RunTooLong {
                offset: 1,
                run: 4,
                available: 1
            })
        );
    }

    #[test]
    fn test_full_run_emits_marker() {
        let mut data = vec![0x42u8; 254];
        data.push(0);
        let encoded = encode(&data);
        assert_eq!(encoded.len(), 257);
        assert_eq!(&encoded[254..], &[RUN_MARKER, 0x01, 0x01]);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_round_trip() {
        let mut rng = XorShift(0x1234_5678);
        for len in [0, 1, 2, 253, 254, 255, 256, 508, 509, 1000, 4096] {
            for zero_every in [2, 7, 300, u32::MAX] {
                let data = rng.bytes(len, zero_every);
                let encoded = encode(&data);
                assert!(!encoded.contains(&0), "len {len}");
                assert_eq!(decode(&encoded).unwrap(), data, "len {len}");
            }
        }
    }

    #[test]
    fn test_streaming_encoder_matches_buffer_encoder() {
        let mut rng = XorShift(0xCAFE_F00D);
        for len in [0, 1, 17, 254, 255, 600] {
            let data = rng.bytes(len, 500);
            let expected = encode(&data);
            assert_eq!(encode_with_fsm(&data, 0), expected, "len {len}");
            assert_eq!(encode_with_fsm(&data, 3), expected, "len {len} with stalls");
        }
    }

    #[test]
    fn test_encoder_holds_output_until_ack() {
        let mut encoder = RcobsEncoder::new();
        encoder.step(EncoderInput {
            strobe: Some(0x7E),
            ..Default::default()
        });
        assert!(!encoder.ready());
        encoder.step(EncoderInput::default());
        assert_eq!(encoder.output(), Some(0x7E));
        for _ in 0..5 {
            encoder.step(EncoderInput {
                strobe: Some(0x55),
                ..Default::default()
            });
            assert_eq!(encoder.output(), Some(0x7E));
            assert!(!encoder.ready());
        }
        encoder.step(EncoderInput {
            ack: true,
            ..Default::default()
        });
        assert!(encoder.ready());
        assert_eq!(encoder.output(), None);
    }
}
