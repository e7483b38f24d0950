use crate::SAMPLES_PER_FRAME;

/// ADC conversion resolution.
///
/// The converter pads every reading to 16 bits regardless of the
/// configured resolution, so this does not affect the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits6,
    Bits8,
    Bits10,
    Bits12,
}

impl Resolution {
    pub const fn bits(self) -> u8 {
        match self {
            Resolution::Bits6 => 6,
            Resolution::Bits8 => 8,
            Resolution::Bits10 => 10,
            Resolution::Bits12 => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// DMA chunk count or chunk length is zero.
    EmptyDmaGeometry,
    /// Only single-channel capture is supported.
    UnsupportedChannelCount(u8),
    /// The ADC mux has no such input.
    InvalidAdcChannel(u8),
    /// Zero or above what the converter can physically do.
    SampleRateOutOfRange(u32),
}

/// Everything the acquisition engine needs to know, fixed at build
/// time. There is no runtime configuration surface; changing any of
/// this means reflashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureConfig {
    /// Conversion trigger rate in Hz.
    pub sample_rate_hz: u32,
    pub resolution: Resolution,
    /// Number of ADC inputs sampled. Only 1 is supported.
    pub channels: u8,
    /// Number of DMA chunk buffers in the capture ring.
    pub dma_buf_count: usize,
    /// Conversions per DMA chunk buffer.
    pub dma_buf_len: usize,
    /// ADC input channel the front-end is wired to.
    pub adc_channel: u8,
}

impl CaptureConfig {
    /// Fastest rate the converter is rated for.
    pub const MAX_SAMPLE_RATE_HZ: u32 = 2_400_000;

    /// Highest input channel on the ADC mux.
    pub const MAX_ADC_CHANNEL: u8 = 15;

    /// 800 kHz single-channel capture on input 3, 64 chunks of 800
    /// conversions. Chunk count times chunk length equals one frame,
    /// but that is a convenience, not a requirement: frames are
    /// assembled from however many fills it takes.
    pub const DEFAULT: Self = Self {
        sample_rate_hz: 800_000,
        resolution: Resolution::Bits12,
        channels: 1,
        dma_buf_count: 64,
        dma_buf_len: 800,
        adc_channel: 3,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dma_buf_count == 0 || self.dma_buf_len == 0 {
            return Err(ConfigError::EmptyDmaGeometry);
        }
        if self.channels != 1 {
            return Err(ConfigError::UnsupportedChannelCount(self.channels));
        }
        if self.adc_channel > Self::MAX_ADC_CHANNEL {
            return Err(ConfigError::InvalidAdcChannel(self.adc_channel));
        }
        if self.sample_rate_hz == 0 || self.sample_rate_hz > Self::MAX_SAMPLE_RATE_HZ {
            return Err(ConfigError::SampleRateOutOfRange(self.sample_rate_hz));
        }
        Ok(())
    }

    /// Total samples the DMA ring holds.
    pub const fn dma_capacity(&self) -> usize {
        self.dma_buf_count * self.dma_buf_len
    }

    /// Chunk fills needed to complete one frame. When the ring is
    /// smaller than a frame this is simply larger than the chunk
    /// count; the assembler accumulates across fills either way.
    pub const fn fills_per_frame(&self) -> usize {
        (SAMPLES_PER_FRAME + self.dma_buf_len - 1) / self.dma_buf_len
    }

    /// How long one frame takes to capture at the configured rate.
    pub const fn frame_duration_micros(&self) -> u64 {
        SAMPLES_PER_FRAME as u64 * 1_000_000 / self.sample_rate_hz as u64
    }
}
