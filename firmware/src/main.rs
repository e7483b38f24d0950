#![no_main]
#![no_std]

use cortex_m::asm;
use defmt_rtt as _;
use panic_probe as _;
use rtic::{app, Mutex as _};
use rtic_monotonics::systick::{ExtU64, Systick};
use rtic_monotonics::Monotonic;
use rtic_sync::{
    channel::{Receiver, Sender},
    make_channel,
};
use static_cell::StaticCell;
use stm32f7xx_hal::{
    gpio::{Output, Pin},
    prelude::*,
    serial::{self, Serial},
};

use scopestream_core::{
    assembler::FrameAssembler, config::CaptureConfig, Sample, SAMPLES_PER_FRAME,
};
use scopestream_firmware::{
    adc_capture::{AdcCapture, CaptureEvent, CaptureRingBuffer, CHUNK_LEN, RING_LEN},
    uart_link::{FrameTx, BAUD_RATE},
};

defmt::timestamp!("{=u64:us}", {
    Systick::now().duration_since_epoch().to_micros()
});

#[app(device = stm32f7xx_hal::pac, dispatchers = [CAN1_RX0])]
mod app {
    use super::*;

    static CAPTURE_RING: StaticCell<CaptureRingBuffer> = StaticCell::new();
    static FRAME: StaticCell<[Sample; SAMPLES_PER_FRAME]> = StaticCell::new();

    /// Doorbell depth. The streaming task drains everything available
    /// per wakeup, so this only has to absorb scheduling jitter.
    const DOORBELL_DEPTH: usize = 8;

    #[shared]
    struct Shared {
        capture: AdcCapture,
    }

    #[local]
    struct Local {
        chunk_ready: Sender<'static, (), DOORBELL_DEPTH>,
        frame_tx: FrameTx,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        let p = cx.device;

        let mut rcc = p.RCC.constrain();
        let clocks = rcc.cfgr.sysclk(216.MHz()).hclk(216.MHz()).freeze();

        let systick_token = rtic_monotonics::create_systick_token!();
        Systick::start(cx.core.SYST, clocks.sysclk().to_Hz(), systick_token);

        let gpioa = p.GPIOA.split();
        let gpiob = p.GPIOB.split();
        let gpioc = p.GPIOC.split();
        let gpiod = p.GPIOD.split();

        // The analog front-end input (ADC1_IN3).
        let _adc1_in3 = gpioa.pa3.into_analog();

        // Every unconnected pin near the front-end gets a defined
        // level so it cannot float and couple noise into the
        // measurement.
        let _ = gpioa.pa0.into_pull_down_input();
        let _ = gpioa.pa1.into_pull_down_input();
        let _ = gpioa.pa2.into_pull_down_input();
        let _ = gpioa.pa4.into_pull_down_input();
        let _ = gpioa.pa5.into_pull_down_input();
        let _ = gpioa.pa6.into_pull_down_input();
        let _ = gpioa.pa7.into_pull_down_input();
        let _ = gpiob.pb0.into_pull_down_input();
        let _ = gpiob.pb1.into_pull_down_input();
        let _ = gpioc.pc0.into_pull_down_input();
        let _ = gpioc.pc1.into_pull_down_input();
        let _ = gpioc.pc2.into_pull_down_input();
        let _ = gpioc.pc3.into_pull_down_input();
        let _ = gpioc.pc4.into_pull_down_input();
        let _ = gpioc.pc5.into_pull_down_input();

        let led = gpiob.pb7.into_push_pull_output();

        let serial = Serial::new(
            p.USART3,
            (gpiod.pd8.into_alternate(), gpiod.pd9.into_alternate()),
            &clocks,
            serial::Config {
                baud_rate: BAUD_RATE.bps(),
                ..Default::default()
            },
        );
        let (tx, _rx) = serial.split();
        let frame_tx = FrameTx::new(tx);

        let config = CaptureConfig::DEFAULT;
        defmt::println!(
            "scopestream: {} samples per frame at {} Hz, link at {} baud",
            SAMPLES_PER_FRAME,
            config.sample_rate_hz,
            BAUD_RATE
        );

        // Give the supply and the analog front-end a second to settle
        // before the first conversion.
        asm::delay(clocks.sysclk().to_Hz());

        let ring = CAPTURE_RING.init_with(|| [0; RING_LEN]);
        let capture = AdcCapture::init(
            &config,
            ring,
            p.ADC1,
            p.TIM2,
            p.DMA2,
            clocks.timclk1(),
            &mut rcc.apb1,
            &mut rcc.apb2,
            &mut rcc.ahb1,
        )
        .unwrap_or_else(|e| defmt::panic!("capture init failed: {}", e));

        let (chunk_ready, chunk_rx) = make_channel!((), DOORBELL_DEPTH);

        let frame = FRAME.init_with(|| [0; SAMPLES_PER_FRAME]);
        stream_frames::spawn(chunk_rx, frame)
            .unwrap_or_else(|_| defmt::panic!("Failed to start stream_frames"));
        heartbeat::spawn(led).unwrap_or_else(|_| defmt::panic!("Failed to start heartbeat"));

        (
            Shared { capture },
            Local {
                chunk_ready,
                frame_tx,
            },
        )
    }

    /// The streaming loop: wait for capture to progress, assemble a
    /// full frame, push it out the link, forever.
    #[task(shared = [capture], local = [frame_tx], priority = 1)]
    async fn stream_frames(
        mut cx: stream_frames::Context,
        mut chunk_rx: Receiver<'static, (), DOORBELL_DEPTH>,
        frame: &'static mut [Sample; SAMPLES_PER_FRAME],
    ) {
        let mut assembler = FrameAssembler::new(frame);
        let mut frames_sent: u32 = 0;

        loop {
            if chunk_rx.recv().await.is_err() {
                // The sender lives in a hardware task and is never
                // dropped.
                continue;
            }

            loop {
                // Move at most one chunk per lock so the DMA interrupt
                // is never held out for a long copy.
                let moved = cx.shared.capture.lock(|capture| {
                    let (head, _) = capture.captured();
                    if head.is_empty() {
                        return 0;
                    }
                    let take = head.len().min(CHUNK_LEN).min(assembler.remaining());
                    let consumed = assembler.push(&head[..take]);
                    capture.consume(consumed);
                    consumed
                });

                if let Some(samples) = assembler.take() {
                    cx.local.frame_tx.send_frame(samples);
                    frames_sent = frames_sent.wrapping_add(1);

                    let (dropped, errors) = cx
                        .shared
                        .capture
                        .lock(|capture| (capture.dropped_chunks(), capture.transfer_errors()));
                    defmt::debug!(
                        "frame {} sent; dropped chunks: {}, transfer errors: {}",
                        frames_sent,
                        dropped,
                        errors
                    );
                }

                if moved == 0 {
                    break;
                }
            }
        }
    }

    /// Liveness blink; the data path has no other visible sign of life
    /// on the board itself.
    #[task(priority = 0)]
    async fn heartbeat(_cx: heartbeat::Context, mut led: Pin<'B', 7, Output>) {
        loop {
            led.set_high();
            Systick::delay(500u64.millis()).await;
            led.set_low();
            Systick::delay(500u64.millis()).await;
        }
    }

    #[task(binds = DMA2_STREAM0, shared = [capture], local = [chunk_ready], priority = 2)]
    fn on_dma2_stream0(mut cx: on_dma2_stream0::Context) {
        let event = cx
            .shared
            .capture
            .lock(|capture| capture.dma_interrupt_handler());

        match event {
            CaptureEvent::ChunkReady | CaptureEvent::Overrun => {
                // Doorbell only; a full queue means the streaming task
                // is already behind and will drain everything anyway.
                let _ = cx.local.chunk_ready.try_send(());
            }
            CaptureEvent::TransferError => defmt::error!("DMA transfer error on capture stream"),
            CaptureEvent::Spurious => {}
        }
    }

    #[task(binds = ADC, shared = [capture], priority = 2)]
    fn on_adc1(mut cx: on_adc1::Context) {
        if cx
            .shared
            .capture
            .lock(|capture| capture.adc_interrupt_handler())
        {
            defmt::warn!("ADC overrun; conversions were lost");
        }
    }
}
