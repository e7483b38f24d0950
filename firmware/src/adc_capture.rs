mod chunk_ring;

use fugit::HertzU32;
use hal::{
    pac,
    rcc::{self, Enable, Reset},
};
use stm32f7xx_hal as hal;

use scopestream_core::config::{CaptureConfig, ConfigError, Resolution};
use scopestream_core::Sample;

pub use chunk_ring::{ChunkGrant, DmaChunkRing};

/// Conversions per DMA chunk buffer.
pub const CHUNK_LEN: usize = CaptureConfig::DEFAULT.dma_buf_len;
/// Number of chunk buffers in the capture ring.
pub const NUM_CHUNKS: usize = CaptureConfig::DEFAULT.dma_buf_count;
pub const RING_LEN: usize = CHUNK_LEN * NUM_CHUNKS;

pub type CaptureRingBuffer = [Sample; RING_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum CaptureError {
    Config(ConfigError),
    /// The static ring buffer does not match the configured DMA
    /// geometry.
    GeometryMismatch,
    /// TIM2 cannot divide its bus clock evenly down to the requested
    /// sample rate.
    TriggerRate { bus_hz: u32, requested_hz: u32 },
}

/// What a DMA stream interrupt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum CaptureEvent {
    /// A chunk of conversions joined the captured region.
    ChunkReady,
    /// A chunk completed while the ring was full; the oldest captured
    /// chunk was dropped to keep acquisition running.
    Overrun,
    /// The DMA controller flagged a transfer or direct-mode error.
    TransferError,
    /// Interrupt fired with nothing for us to do.
    Spurious,
}

/// Owns the analog capture path: ADC1 converting under TIM2 trigger
/// pacing, DMA2 stream 0 moving the results into the chunk ring in
/// double-buffer mode.
///
/// The CPU never touches a sample until the DMA engine has retired the
/// chunk holding it, so the streaming task always reads settled data.
pub struct AdcCapture {
    adc1: pac::ADC1,
    tim2: pac::TIM2,
    dma2: pac::DMA2,
    ring: DmaChunkRing,
    /// Grants currently programmed into DMA memory bank 0 and 1.
    banks: [Option<ChunkGrant>; 2],
    dropped_chunks: u32,
    transfer_errors: u32,
}

impl AdcCapture {
    /// Bring up the whole capture path. Any rejected parameter is a
    /// fatal startup fault; nothing is left half-configured on error
    /// because the peripherals are only touched after validation.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        config: &CaptureConfig,
        buffer: &'static mut CaptureRingBuffer,
        adc1: pac::ADC1,
        tim2: pac::TIM2,
        dma2: pac::DMA2,
        tim_clk: HertzU32,
        apb1: &mut rcc::APB1,
        apb2: &mut rcc::APB2,
        ahb1: &mut rcc::AHB1,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::Config)?;

        if config.dma_buf_len != CHUNK_LEN || config.dma_buf_count != NUM_CHUNKS {
            return Err(CaptureError::GeometryMismatch);
        }

        if tim_clk.to_Hz() % config.sample_rate_hz != 0
            || tim_clk.to_Hz() / config.sample_rate_hz < 2
        {
            return Err(CaptureError::TriggerRate {
                bus_hz: tim_clk.to_Hz(),
                requested_hz: config.sample_rate_hz,
            });
        }
        let reload = tim_clk.to_Hz() / config.sample_rate_hz - 1;

        let mut this = Self {
            adc1,
            tim2,
            dma2,
            ring: DmaChunkRing::new(buffer),
            banks: [None, None],
            dropped_chunks: 0,
            transfer_errors: 0,
        };

        this.init_dma2(ahb1);
        this.init_adc1(config, apb2);
        this.init_tim2(reload, apb1);

        Ok(this)
    }

    /// DMA2 stream 0 channel 0: 16-bit transfers from the ADC1 data
    /// register into the ring, one chunk per bank, double-buffered so
    /// a bank switch costs no conversions.
    fn init_dma2(&mut self, ahb1: &mut rcc::AHB1) {
        <pac::DMA2 as Enable>::enable(ahb1);
        let stream = &self.dma2.st[0];

        stream.cr.modify(|_, w| w.en().disabled());

        stream.cr.modify(|_, w| {
            w.chsel()
                .bits(0)
                .dbm()
                .enabled()
                .circ()
                .disabled()
                .msize()
                .bits16()
                .psize()
                .bits16()
                .minc()
                .incremented()
                .pinc()
                .fixed()
                .dir()
                .peripheral_to_memory()
                .pfctrl()
                .dma()
                .tcie()
                .enabled()
                .teie()
                .enabled()
                .dmeie()
                .enabled()
                .ct()
                .memory0()
        });

        stream.ndtr.modify(|_, w| w.ndt().bits(CHUNK_LEN as u16));

        stream
            .par
            .write(|w| unsafe { w.pa().bits(self.adc1.dr.as_ptr() as u32) });

        // Stage the first two chunks; the interrupt handler keeps the
        // banks topped up from here on. A fresh ring cannot run out.
        let mut bank0 = self.ring.claim_chunk().unwrap();
        let mut bank1 = self.ring.claim_chunk().unwrap();
        stream
            .m0ar
            .write(|w| unsafe { w.m0a().bits(bank0.as_mut_ptr() as u32) });
        stream
            .m1ar
            .write(|w| unsafe { w.m1a().bits(bank1.as_mut_ptr() as u32) });
        self.banks = [Some(bank0), Some(bank1)];

        stream.cr.modify(|_, w| w.en().enabled());
    }

    /// ADC1: one conversion of the configured input per TIM2 TRGO
    /// edge, results drained by DMA.
    fn init_adc1(&mut self, config: &CaptureConfig, apb2: &mut rcc::APB2) {
        let adc1 = &self.adc1;
        <pac::ADC1 as Enable>::enable(apb2);

        adc1.cr2.modify(|_, w| w.adon().clear_bit());
        <pac::ADC1 as Reset>::reset(apb2);

        // The trigger sets the pace; continuous mode would free-run at
        // whatever the ADC clock allows instead of the configured rate.
        adc1.cr2.modify(|_, w| w.cont().single());
        adc1.cr1
            .modify(|_, w| w.scan().clear_bit().discen().clear_bit());

        // External trigger on TIM2 TRGO, rising edge.
        adc1.cr2
            .modify(|_, w| unsafe { w.exten().rising_edge().extsel().bits(0b1011) });

        adc1.cr1
            .modify(|_, w| w.res().bits(resolution_bits(config.resolution)));

        adc1.cr2.modify(|_, w| w.dma().enabled().dds().continuous());

        // Overrun is the one per-conversion fault worth an interrupt;
        // end-of-conversion would fire at the full sample rate.
        adc1.cr1
            .modify(|_, w| w.eocie().disabled().ovrie().enabled());

        adc1.sqr3
            .modify(|_, w| unsafe { w.sq1().bits(config.adc_channel) });

        adc1.cr2.modify(|_, w| w.adon().enabled());
    }

    /// TIM2 paces conversions: TRGO on every update event, one update
    /// every `reload + 1` bus cycles.
    fn init_tim2(&mut self, reload: u32, apb1: &mut rcc::APB1) {
        let tim2 = &self.tim2;
        <pac::TIM2 as Enable>::enable(apb1);

        tim2.cr2.modify(|_, w| w.mms().update());
        tim2.psc.write(|w| w.psc().bits(0));
        tim2.arr.write(|w| w.arr().bits(reload));

        // Latch PSC/ARR and start counting from a clean slate.
        tim2.egr.write(|w| w.ug().update());
        tim2.cr1.modify(|_, w| w.cen().enabled());
    }

    /// DMA2 stream 0 interrupt: rotate the completed memory bank out
    /// of the staged region and program a fresh chunk in its place.
    pub fn dma_interrupt_handler(&mut self) -> CaptureEvent {
        let lisr = self.dma2.lisr.read();

        if lisr.teif0().bit_is_set() || lisr.dmeif0().bit_is_set() {
            self.dma2
                .lifcr
                .write(|w| w.cteif0().set_bit().cdmeif0().set_bit());
            self.transfer_errors = self.transfer_errors.wrapping_add(1);
            return CaptureEvent::TransferError;
        }

        if !lisr.tcif0().bit_is_set() {
            return CaptureEvent::Spurious;
        }
        self.dma2.lifcr.write(|w| w.ctcif0().set_bit());

        // On completion the hardware flips CT to the other bank, so
        // the bank that just finished is the one CT does not point at.
        let done_bank = if self.dma2.st[0].cr.read().ct().bit_is_set() {
            0
        } else {
            1
        };
        let done = match self.banks[done_bank].take() {
            Some(grant) => grant,
            None => return CaptureEvent::Spurious,
        };

        // Ring full means the link is slower than the capture. Drop
        // the oldest captured chunk so acquisition keeps running; the
        // streaming task reports the count.
        let mut overrun = false;
        if self.ring.free_chunks() == 0 {
            self.ring.consume(CHUNK_LEN);
            self.dropped_chunks = self.dropped_chunks.wrapping_add(1);
            overrun = true;
        }

        self.ring.retire_chunk(done);
        let mut fresh = match self.ring.claim_chunk() {
            Some(grant) => grant,
            // Unreachable: a chunk was freed above if none was.
            None => return CaptureEvent::TransferError,
        };

        let stream = &self.dma2.st[0];
        match done_bank {
            0 => stream
                .m0ar
                .write(|w| unsafe { w.m0a().bits(fresh.as_mut_ptr() as u32) }),
            _ => stream
                .m1ar
                .write(|w| unsafe { w.m1a().bits(fresh.as_mut_ptr() as u32) }),
        }
        self.banks[done_bank] = Some(fresh);

        if overrun {
            CaptureEvent::Overrun
        } else {
            CaptureEvent::ChunkReady
        }
    }

    /// ADC global interrupt; only overrun is enabled. Returns whether
    /// an overrun was flagged.
    pub fn adc_interrupt_handler(&mut self) -> bool {
        let overrun = self.adc1.sr.read().ovr().bit_is_set();
        if overrun {
            self.adc1.sr.modify(|_, w| w.ovr().clear_bit());
        }
        overrun
    }

    /// Captured samples waiting to be streamed, oldest first; the
    /// second slice is the wrapped-around part.
    pub fn captured(&self) -> (&[Sample], &[Sample]) {
        self.ring.captured()
    }

    /// Release the oldest `len` captured samples.
    pub fn consume(&mut self, len: usize) {
        self.ring.consume(len);
    }

    pub fn dropped_chunks(&self) -> u32 {
        self.dropped_chunks
    }

    pub fn transfer_errors(&self) -> u32 {
        self.transfer_errors
    }

    pub fn samples_consumed(&self) -> u64 {
        self.ring.samples_consumed()
    }
}

fn resolution_bits(resolution: Resolution) -> u8 {
    match resolution {
        Resolution::Bits12 => 0b00,
        Resolution::Bits10 => 0b01,
        Resolution::Bits8 => 0b10,
        Resolution::Bits6 => 0b11,
    }
}
