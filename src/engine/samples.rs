//! Per-format sample counting.
//!
//! Voice timestamps advance by samples/8 ms, so the sender needs to know how
//! many samples a codec payload holds. Most formats derive it from the
//! payload length; Speex requires walking the bitstream frame by frame.

use log::warn;

use crate::wire::command::format;

/// Narrowband Speex submode sizes in bits, indexed by submode id.
const SPEEX_SUBMODE_BITS: [u32; 16] = [
    0, 43, 119, 160, 220, 300, 364, 492, 79, 0, 0, 0, 0, 0, 0, 0,
];

/// Wideband Speex submode sizes in bits.
const SPEEX_WB_SUBMODE_BITS: [u32; 8] = [0, 36, 112, 192, 352, 0, 0, 0];

/// In-band signal payload sizes in bits, indexed by the 4-bit signal id.
const SPEEX_INBAND_BITS: [u32; 16] = [1, 1, 4, 4, 4, 4, 4, 4, 8, 8, 16, 16, 32, 32, 64, 64];

/// Samples in one narrowband Speex frame.
const SPEEX_FRAME_SAMPLES: u32 = 160;

/// Read up to 8 bits starting at bit offset `bit`. Returns zero past the
/// end of the buffer; callers bound their loops on the remaining length.
fn bits_at(data: &[u8], count: u32, bit: u32) -> u32 {
    if count == 0 || count > 8 {
        return 0;
    }
    let byte = (bit / 8) as usize;
    if byte >= data.len() {
        return 0;
    }
    let rem = 8 - (bit % 8);
    if count <= rem {
        (u32::from(data[byte]) >> (rem - count)) & (0xFF >> (8 - count))
    } else {
        let high = (u32::from(data[byte]) & (0xFF >> (8 - rem))) << (count - rem);
        let low = if byte + 1 < data.len() {
            u32::from(data[byte + 1]) >> (8 - (count - rem))
        } else {
            0
        };
        high | low
    }
}

/// Skip up to two wideband sub-frames at bit offset `bit`.
///
/// Returns the number of bits skipped, or `None` when a third wideband
/// frame appears in a row (malformed stream).
fn speex_wideband_skip(data: &[u8], bit: u32) -> Option<u32> {
    let total = data.len() as u32 * 8;
    let mut off = bit;
    for _ in 0..2 {
        if total - off < 5 || bits_at(data, 1, off) == 0 {
            return Some(off - bit);
        }
        let submode = bits_at(data, 3, off + 1) as usize;
        off += SPEEX_WB_SUBMODE_BITS[submode];
        if off > total {
            return Some(off - bit);
        }
    }
    if total.saturating_sub(off) >= 5 && bits_at(data, 1, off) != 0 {
        // Three wideband frames in a row is out of spec.
        return None;
    }
    Some(off - bit)
}

/// Count the samples in a Speex payload by walking its bitstream.
pub fn speex_samples(data: &[u8]) -> u32 {
    let total = data.len() as u32 * 8;
    let mut bit = 0u32;
    let mut samples = 0u32;
    while total.saturating_sub(bit) >= 5 {
        match speex_wideband_skip(data, bit) {
            Some(skip) => bit += skip,
            None => break,
        }
        if total.saturating_sub(bit) < 5 {
            break;
        }
        let control = bits_at(data, 5, bit);
        bit += 5;
        match control {
            15 => break, // terminator
            14 => {
                // In-band signal: 4-bit id plus a table-driven payload.
                let id = bits_at(data, 4, bit) as usize;
                bit += 4;
                bit += SPEEX_INBAND_BITS[id];
            }
            13 => {
                // User in-band: 5-bit byte count follows.
                let count = bits_at(data, 5, bit);
                bit += 5;
                bit += count * 8;
            }
            c if c > 8 => break,
            c => {
                let frame_bits = SPEEX_SUBMODE_BITS[c as usize];
                if frame_bits == 0 {
                    break; // reserved submode
                }
                bit += frame_bits - 5;
                samples += SPEEX_FRAME_SAMPLES;
            }
        }
    }
    samples
}

/// Samples carried by a voice payload in the given format.
///
/// Returns `None` for formats the engine cannot size.
pub fn sample_count(fmt: u32, data: &[u8]) -> Option<u32> {
    let len = data.len() as u32;
    match fmt {
        format::SPEEX => Some(speex_samples(data)),
        format::G723_1 => Some(240), // one 30 ms frame
        format::ILBC => Some(240 * (len / 50)),
        format::GSM => Some(160 * (len / 33)),
        format::G729A => Some(160 * (len / 20)),
        format::SLINEAR => Some(len / 2),
        format::LPC10 => {
            let extra = data.get(7).map_or(0, |b| u32::from(b & 0x1) * 8);
            Some(22 * 8 + extra)
        }
        format::ULAW | format::ALAW => Some(len),
        format::ADPCM | format::G726 => Some(len * 2),
        _ => {
            warn!("cannot count samples for format 0x{fmt:x}");
            None
        }
    }
}

/// Interpolation frame length in milliseconds when a voice frame is lost.
pub fn interpolation_ms(fmt: u32) -> u32 {
    if fmt == format::ILBC { 30 } else { 20 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_at() {
        let data = [0b1011_0010, 0b0100_0000];
        assert_eq!(bits_at(&data, 1, 0), 1);
        assert_eq!(bits_at(&data, 3, 0), 0b101);
        assert_eq!(bits_at(&data, 5, 3), 0b10010);
        // Crossing the byte boundary.
        assert_eq!(bits_at(&data, 5, 6), 0b10_010);
        // Past the end reads as zero.
        assert_eq!(bits_at(&data, 8, 16), 0);
    }

    #[test]
    fn test_fixed_formats() {
        assert_eq!(sample_count(format::G723_1, &[0; 24]), Some(240));
        assert_eq!(sample_count(format::ULAW, &[0; 160]), Some(160));
        assert_eq!(sample_count(format::ALAW, &[0; 80]), Some(80));
        assert_eq!(sample_count(format::SLINEAR, &[0; 320]), Some(160));
        assert_eq!(sample_count(format::ADPCM, &[0; 80]), Some(160));
        assert_eq!(sample_count(format::GSM, &[0; 66]), Some(320));
        assert_eq!(sample_count(format::ILBC, &[0; 100]), Some(480));
        assert_eq!(sample_count(format::G729A, &[0; 20]), Some(160));
        assert_eq!(sample_count(format::JPEG, &[0; 10]), None);
    }

    #[test]
    fn test_lpc10_parity_sample() {
        assert_eq!(sample_count(format::LPC10, &[0u8; 7]), Some(176));
        let mut data = [0u8; 8];
        data[7] = 0x1;
        assert_eq!(sample_count(format::LPC10, &data), Some(184));
        data[7] = 0x0;
        assert_eq!(sample_count(format::LPC10, &data), Some(176));
    }

    #[test]
    fn test_speex_single_narrowband_frame() {
        // Five-bit control 00011 selects submode 3 (160 bits total); the
        // leading zero doubles as the wideband flag.
        let mut data = [0u8; 20]; // 160 bits
        data[0] = 0b00011_000;
        assert_eq!(speex_samples(&data), SPEEX_FRAME_SAMPLES);
    }

    #[test]
    fn test_speex_two_narrowband_frames() {
        // Submode 8 is 79 bits; two frames back to back fit in 158 of
        // 160 bits, the remainder reading as submode zero padding.
        let mut data = [0u8; 20];
        // First control 01000 at bit 0.
        data[0] = 0b01000_000;
        // Second control 01000 at bit 79.
        // Bit 79 is the last bit of byte 9; control spans bytes 9 and 10.
        data[9] |= 0b0000_0000; // leading 0 of the control
        data[10] = 0b1000_0000;
        assert_eq!(speex_samples(&data), 2 * SPEEX_FRAME_SAMPLES);
    }

    #[test]
    fn test_speex_terminator() {
        // Control 15 (01111) terminates immediately.
        let data = [0b01111_000];
        assert_eq!(speex_samples(&data), 0);
    }

    #[test]
    fn test_interpolation_length() {
        assert_eq!(interpolation_ms(format::ILBC), 30);
        assert_eq!(interpolation_ms(format::ULAW), 20);
        assert_eq!(interpolation_ms(format::GSM), 20);
    }
}
