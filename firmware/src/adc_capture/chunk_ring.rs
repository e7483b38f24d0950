use core::ops::{Deref, DerefMut};
use core::slice;

use scopestream_core::Sample;

use super::{CaptureRingBuffer, CHUNK_LEN, RING_LEN};

/// Exclusive handle to one chunk of the ring while the DMA engine is
/// filling it. Holds a raw pointer because the DMA controller writes
/// through the buffer behind the compiler's back; the ring's region
/// bookkeeping guarantees nobody else touches the chunk meanwhile.
pub struct ChunkGrant {
    ptr: *mut Sample,
}

impl ChunkGrant {
    pub fn as_mut_ptr(&mut self) -> *mut Sample {
        self.ptr
    }
}

unsafe impl Send for ChunkGrant {}

impl Deref for ChunkGrant {
    type Target = [Sample; CHUNK_LEN];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, CHUNK_LEN) }
            .try_into()
            .unwrap()
    }
}

impl DerefMut for ChunkGrant {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, CHUNK_LEN) }
            .try_into()
            .unwrap()
    }
}

/// A contiguous-modulo-`RING_LEN` span of the ring.
#[derive(Clone, Copy)]
struct Region {
    start: usize,
    len: usize,
}

impl Region {
    fn end(&self) -> usize {
        (self.start + self.len) % RING_LEN
    }

    /// Split `len` samples off the front.
    fn take_front(&mut self, len: usize) -> Option<Region> {
        if len > self.len {
            return None;
        }

        let taken = Region {
            start: self.start,
            len,
        };
        self.start = (self.start + len) % RING_LEN;
        self.len -= len;

        Some(taken)
    }

    /// Grow by a span that sits directly behind this region.
    fn absorb(&mut self, tail: Region) {
        assert_eq!(tail.start, self.end(), "span does not adjoin this region");
        self.len += tail.len;
        assert!(self.len <= RING_LEN);
    }
}

/// The capture ring: one statically allocated sample buffer split into
/// three regions that rotate ownership around it.
///
/// ```text
/// captured -> staged -> free -> captured ...
/// ```
///
/// `staged` chunks are programmed into the DMA memory banks, `captured`
/// chunks hold finished conversions waiting for the streaming task,
/// `free` is everything else. Chunks are claimed and retired in FIFO
/// order, which matches the strictly alternating completion order of
/// the two DMA banks.
pub struct DmaChunkRing {
    captured: Region,
    staged: Region,
    free: Region,
    /// Total samples ever released by the consumer, for throughput
    /// diagnostics.
    consumed_total: u64,
    buffer: *mut Sample,
}

unsafe impl Send for DmaChunkRing {}

impl DmaChunkRing {
    pub fn new(buffer: &'static mut CaptureRingBuffer) -> Self {
        Self {
            captured: Region { start: 0, len: 0 },
            staged: Region { start: 0, len: 0 },
            free: Region {
                start: 0,
                len: buffer.len(),
            },
            consumed_total: 0,
            buffer: buffer.as_mut_ptr(),
        }
    }

    fn is_consistent(&self) -> bool {
        self.captured.end() == self.staged.start
            && self.staged.end() == self.free.start
            && self.free.end() == self.captured.start
            && (self.captured.len + self.staged.len + self.free.len) == RING_LEN
    }

    /// Hand a free chunk to the DMA engine, or `None` if the ring is
    /// exhausted.
    pub fn claim_chunk(&mut self) -> Option<ChunkGrant> {
        let region = self.free.take_front(CHUNK_LEN)?;
        // Chunks divide the ring evenly, so a chunk never wraps.
        assert!(region.start + CHUNK_LEN <= RING_LEN);

        let grant = ChunkGrant {
            ptr: unsafe { self.buffer.add(region.start) },
        };
        self.staged.absorb(region);

        assert!(self.is_consistent());
        Some(grant)
    }

    /// Take back a chunk the DMA engine finished filling. Must be the
    /// oldest outstanding grant.
    pub fn retire_chunk(&mut self, grant: ChunkGrant) {
        let region = self
            .staged
            .take_front(CHUNK_LEN)
            .expect("retired a chunk that was never claimed");

        let expected = unsafe { self.buffer.add(region.start) };
        assert_eq!(grant.ptr, expected, "chunks retired out of order");

        self.captured.absorb(region);
        assert!(self.is_consistent());
    }

    /// Number of chunks still available to the DMA engine.
    pub fn free_chunks(&self) -> usize {
        self.free.len / CHUNK_LEN
    }

    /// Captured samples in capture order. The second slice is the part
    /// that wrapped around the end of the buffer, empty if none did.
    pub fn captured(&self) -> (&[Sample], &[Sample]) {
        assert!(self.is_consistent());

        if self.captured.len == 0 {
            (&[], &[])
        } else {
            let to_end = RING_LEN - self.captured.start;
            if self.captured.len <= to_end {
                (
                    unsafe { slice::from_raw_parts(self.buffer.add(self.captured.start), self.captured.len) },
                    &[],
                )
            } else {
                let wrapped = self.captured.len - to_end;
                unsafe {
                    (
                        slice::from_raw_parts(self.buffer.add(self.captured.start), to_end),
                        slice::from_raw_parts(self.buffer, wrapped),
                    )
                }
            }
        }
    }

    /// Release the oldest `len` captured samples back to the free
    /// region.
    pub fn consume(&mut self, len: usize) {
        let len = len.min(self.captured.len);
        if len == 0 {
            return;
        }

        let region = self.captured.take_front(len).unwrap();
        self.free.absorb(region);
        self.consumed_total = self.consumed_total.wrapping_add(len as u64);

        assert!(self.is_consistent());
    }

    pub fn samples_consumed(&self) -> u64 {
        self.consumed_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_cell::StaticCell;

    fn fill(mut grant: ChunkGrant, value: Sample) -> std::thread::JoinHandle<ChunkGrant> {
        // A thread stands in for the DMA engine writing concurrently.
        std::thread::spawn(move || {
            for slot in grant.iter_mut() {
                *slot = value;
            }
            grant
        })
    }

    const EMPTY: (&[Sample], &[Sample]) = (&[], &[]);

    #[test]
    fn grants_rotate_through_the_ring() {
        static BUFFER: StaticCell<CaptureRingBuffer> = StaticCell::new();
        let buffer = BUFFER.init([0; RING_LEN]);

        let mut ring = DmaChunkRing::new(buffer);
        assert_eq!(ring.captured(), EMPTY);
        assert_eq!(ring.free_chunks(), RING_LEN / CHUNK_LEN);

        // Two banks in flight, filled concurrently.
        let bank0 = fill(ring.claim_chunk().unwrap(), 1);
        let bank1 = fill(ring.claim_chunk().unwrap(), 2);
        assert_eq!(ring.free_chunks(), RING_LEN / CHUNK_LEN - 2);

        ring.retire_chunk(bank0.join().unwrap());
        let (head, tail) = ring.captured();
        assert_eq!(head.len(), CHUNK_LEN);
        assert!(tail.is_empty());
        assert!(head.iter().all(|&s| s == 1));

        ring.retire_chunk(bank1.join().unwrap());
        let (head, tail) = ring.captured();
        assert_eq!(head.len(), 2 * CHUNK_LEN);
        assert!(tail.is_empty());

        ring.consume(CHUNK_LEN);
        let (head, _) = ring.captured();
        assert_eq!(head.len(), CHUNK_LEN);
        assert!(head.iter().all(|&s| s == 2));
        assert_eq!(ring.samples_consumed(), CHUNK_LEN as u64);

        ring.consume(CHUNK_LEN);
        assert_eq!(ring.captured(), EMPTY);

        // Over-consuming is a no-op.
        ring.consume(CHUNK_LEN);
        assert_eq!(ring.captured(), EMPTY);
        assert_eq!(ring.free_chunks(), RING_LEN / CHUNK_LEN);
    }

    #[test]
    fn retiring_out_of_order_panics() {
        static BUFFER: StaticCell<CaptureRingBuffer> = StaticCell::new();
        let buffer = BUFFER.init([0; RING_LEN]);

        let mut ring = DmaChunkRing::new(buffer);
        let _bank0 = ring.claim_chunk().unwrap();
        let bank1 = ring.claim_chunk().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.retire_chunk(bank1);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn captured_data_wraps_around_the_buffer_end() {
        static BUFFER: StaticCell<CaptureRingBuffer> = StaticCell::new();
        let buffer = BUFFER.init([0; RING_LEN]);
        let chunks = RING_LEN / CHUNK_LEN;

        let mut ring = DmaChunkRing::new(buffer);

        // March the regions once around the ring so `captured` starts
        // near the end of the backing buffer.
        for _ in 0..chunks - 1 {
            let grant = ring.claim_chunk().unwrap();
            ring.retire_chunk(grant);
            ring.consume(CHUNK_LEN);
        }

        // Now fill three chunks without consuming; the third wraps.
        for value in 1..=3 {
            let grant = fill(ring.claim_chunk().unwrap(), value).join().unwrap();
            ring.retire_chunk(grant);
        }

        let (head, tail) = ring.captured();
        assert_eq!(head.len() + tail.len(), 3 * CHUNK_LEN);
        assert_eq!(head.len(), CHUNK_LEN);
        assert_eq!(tail.len(), 2 * CHUNK_LEN);
        assert!(head.iter().all(|&s| s == 1));
        assert!(tail[..CHUNK_LEN].iter().all(|&s| s == 2));
        assert!(tail[CHUNK_LEN..].iter().all(|&s| s == 3));
    }

    #[test]
    fn exhausted_ring_stops_handing_out_chunks() {
        static BUFFER: StaticCell<CaptureRingBuffer> = StaticCell::new();
        let buffer = BUFFER.init([0; RING_LEN]);
        let chunks = RING_LEN / CHUNK_LEN;

        let mut ring = DmaChunkRing::new(buffer);

        let mut grants = Vec::new();
        for _ in 0..chunks {
            grants.push(ring.claim_chunk().unwrap());
        }
        assert!(ring.claim_chunk().is_none());

        for grant in grants {
            ring.retire_chunk(grant);
        }
        assert!(ring.claim_chunk().is_none());

        // Dropping the oldest captured chunk makes room again, which is
        // exactly what the overrun path in the interrupt handler does.
        ring.consume(CHUNK_LEN);
        assert!(ring.claim_chunk().is_some());
    }
}
