#![cfg_attr(not(test), no_std)]

//! Hardware-independent half of the scopestream acquisition pipeline:
//! the wire framing, the capture configuration record and the frame
//! assembler that turns DMA chunk fills into fixed-length sample frames.
//!
//! Everything in here runs on the host as well as on the target, which
//! is where the tests live.

pub mod assembler;
pub mod config;
pub mod frame;

/// One ADC reading. The converter is 12 bits wide; the upper bits are
/// hardware padding and carry no information, but the full 16-bit word
/// goes out on the wire unchanged.
pub type Sample = u16;

/// Number of samples in one transmitted frame.
///
/// 64 DMA chunk fills of 800 conversions each. Known to both ends of
/// the link at build time; the receiver slices the byte stream into
/// frames of exactly this length.
pub const SAMPLES_PER_FRAME: usize = 800 * 64;

/// Payload size of one frame on the wire.
pub const FRAME_PAYLOAD_BYTES: usize = SAMPLES_PER_FRAME * core::mem::size_of::<Sample>();

/// Marker prepended to every frame so a receiver can locate frame
/// boundaries in the continuous byte stream.
pub const SYNC_MARKER: u16 = 0xA5A5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry() {
        assert_eq!(FRAME_PAYLOAD_BYTES, SAMPLES_PER_FRAME * 2);
        assert_eq!(SAMPLES_PER_FRAME, 51200);
        assert_eq!(FRAME_PAYLOAD_BYTES, 102400);
    }
}
