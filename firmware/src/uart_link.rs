//! TX half of the serial link to the host.

use scopestream_core::{frame::MARKER_BYTES, Sample};
use stm32f7xx_hal::{pac::USART3, prelude::*, serial::Tx};

/// Link bit rate. Far below the capture data rate on purpose: the host
/// display only needs occasional full frames, and the capture side
/// drops stale chunks when the link falls behind.
pub const BAUD_RATE: u32 = 921_600;

/// Streams frames over the serial link: sync marker first, then the
/// raw sample bytes in capture order. No buffering, no acknowledgment,
/// no timeout; if the host stops draining, transmission blocks here
/// and the capture ring overruns.
pub struct FrameTx {
    tx: Tx<USART3>,
}

impl FrameTx {
    pub fn new(tx: Tx<USART3>) -> Self {
        Self { tx }
    }

    pub fn send_frame(&mut self, samples: &[Sample]) {
        self.write_all(&MARKER_BYTES);
        // Samples are little-endian in memory, which is exactly the
        // wire order, so the frame goes out as a plain byte view.
        self.write_all(bytemuck::cast_slice(samples));
    }

    fn write_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            // Busy-wait on TXE; the TX half has no other failure mode.
            while self.tx.write(byte).is_err() {}
        }
    }
}
