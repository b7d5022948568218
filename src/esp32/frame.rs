use serde::Serialize;

/// Bytes per streamed sample: `[channel][value_hi][value_lo]`.
pub const FRAME_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdcSample {
    pub channel: u8,
    pub value: u16,
}

pub fn decode_frame(frame: [u8; FRAME_LEN]) -> AdcSample {
    AdcSample {
        channel: frame[0],
        value: u16::from_be_bytes([frame[1], frame[2]]),
    }
}

/// Splits a raw byte stream into fixed-width frames, holding back a trailing partial frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    partial: Vec<u8>,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8], out: &mut Vec<AdcSample>) {
        self.partial.extend_from_slice(bytes);
        let complete = self.partial.len() - self.partial.len() % FRAME_LEN;
        out.extend(
            self.partial[..complete]
                .chunks_exact(FRAME_LEN)
                .map(|chunk| decode_frame([chunk[0], chunk[1], chunk[2]])),
        );
        self.partial.drain(..complete);
    }

    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

/// Legacy text-mode sample line: `CH<n>:<value>`.
pub fn parse_text_sample(line: &str) -> Option<AdcSample> {
    let (channel, value) = line.trim().strip_prefix("CH")?.split_once(':')?;
    Some(AdcSample {
        channel: channel.trim().parse().ok()?,
        value: value.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_big_endian_value() {
        assert_eq!(
            decode_frame([1, 0x0A, 0x8C]),
            AdcSample {
                channel: 1,
                value: 2700
            }
        );
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let mut decoder = FrameDecoder::default();
        let mut out = Vec::new();
        decoder.push(&[1, 0x00, 0x10, 2, 0x01], &mut out);
        assert_eq!(out, vec![AdcSample { channel: 1, value: 16 }]);
        assert_eq!(decoder.pending_len(), 2);

        decoder.push(&[0x00, 1], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], AdcSample { channel: 2, value: 256 });
        assert_eq!(decoder.pending_len(), 1);
    }

    #[test]
    fn byte_at_a_time_matches_bulk() {
        let stream: Vec<u8> = (0..30u8).collect();
        let mut bulk = Vec::new();
        FrameDecoder::default().push(&stream, &mut bulk);

        let mut decoder = FrameDecoder::default();
        let mut trickled = Vec::new();
        for byte in &stream {
            decoder.push(std::slice::from_ref(byte), &mut trickled);
        }
        assert_eq!(bulk, trickled);
        assert_eq!(bulk.len(), 10);
    }

    #[test]
    fn text_samples() {
        assert_eq!(
            parse_text_sample("CH2: 1942"),
            Some(AdcSample {
                channel: 2,
                value: 1942
            })
        );
        assert_eq!(parse_text_sample("CH1:70000"), None);
        assert_eq!(parse_text_sample("STREAM_START"), None);
    }
}
