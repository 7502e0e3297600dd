#![no_std]
#![no_main]

use defmt::{error, info, warn};
use defmt_rtt as _;
use dfplayer_firmware::{
    run_script, CommandHandler, FlashConfigStore, FrameQueue, HandlerConfig, Player, StreamRx,
    UartReader, UartWriter,
};
use dfplayer_proto::BAUD_RATE;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::UART0;
use embassy_rp::uart::{Config as UartConfig, Uart};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Delay, Timer};
use static_cell::StaticCell;

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    UART0_IRQ => embassy_rp::uart::InterruptHandler<UART0>;
});

/// Received frames waiting for the consumer.
const QUEUE_DEPTH: usize = 20;

/// Ack timeout and resend count on the target.
const ACK_TIMEOUT_MS: u32 = 1_000;
const ACK_RETRIES: u8 = 2;

type Queue = FrameQueue<CriticalSectionRawMutex, QUEUE_DEPTH>;
type Handler =
    CommandHandler<'static, CriticalSectionRawMutex, UartWriter<'static>, Delay, QUEUE_DEPTH>;

static QUEUE: StaticCell<Queue> = StaticCell::new();
static HANDLER: StaticCell<Handler> = StaticCell::new();

static DEMO_SCRIPT: &str = include_str!("../../scripts/demo.txt");

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("DFPlayer controller starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    // --- UART Setup ---
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = BAUD_RATE;

    let uart = Uart::new(
        p.UART0,
        p.PIN_0, // TX
        p.PIN_1, // RX
        Irqs,
        p.DMA_CH0,
        p.DMA_CH1,
        uart_config,
    );
    let (tx, rx) = uart.split();

    // --- Protocol engine ---
    let queue: &'static Queue = QUEUE.init(FrameQueue::new());
    let config = HandlerConfig {
        ack_timeout_ms: Some(ACK_TIMEOUT_MS),
        retries: ACK_RETRIES,
        ..HandlerConfig::default()
    };
    let handler: &'static Handler =
        HANDLER.init(CommandHandler::new(UartWriter::new(tx), Delay, queue, config));

    let store = FlashConfigStore::new(p.FLASH, p.DMA_CH2);
    let led = Output::new(p.PIN_25, Level::Low);

    // Spawn tasks (unwrap the SpawnToken, then spawn)
    spawner.spawn(rx_task(StreamRx::new(UartReader::new(rx)), queue).unwrap());
    spawner.spawn(consumer_task(handler).unwrap());
    spawner.spawn(led_task(handler, led).unwrap());
    spawner.spawn(player_task(handler, store).unwrap());

    info!("DFPlayer controller initialized");
}

/// RX task - moves frames from UART into the queue.
#[embassy_executor::task]
async fn rx_task(mut rx: StreamRx<UartReader<'static>>, queue: &'static Queue) {
    rx.run(queue).await
}

/// Consumer task - classifies queued frames and updates handler state.
#[embassy_executor::task]
async fn consumer_task(handler: &'static Handler) {
    handler.run_consumer().await
}

/// LED task - toggles the on-board LED on every device error report.
#[embassy_executor::task]
async fn led_task(handler: &'static Handler, mut led: Output<'static>) {
    loop {
        handler.error().wait().await;
        handler.error().clear();
        if let Some(code) = handler.last_error() {
            warn!("device error report: {=u16}", code);
        }
        led.toggle();
    }
}

/// Player task - restores settings, resets the module, then runs the script.
#[embassy_executor::task]
async fn player_task(handler: &'static Handler, store: FlashConfigStore<'static>) {
    let mut player = Player::new(handler, store);

    // The module needs a moment after power-up before it answers.
    Timer::after_millis(500).await;

    if let Err(e) = player.startup().await {
        error!("startup failed: {:?}", e);
        return;
    }
    info!(
        "{} tracks, volume {}/{}",
        handler.track_count(),
        player.volume(),
        dfplayer_firmware::USER_VOLUME_MAX
    );

    let mut delay = Delay;
    loop {
        if let Err(e) = run_script(&mut player, &mut delay, DEMO_SCRIPT).await {
            error!("script failed: {:?}", e);
        }
        Timer::after_secs(5).await;
    }
}
