#![no_std]
#![no_main]

extern crate alloc;

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use esp_backtrace as _;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull};
use esp_hal::handler;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode as SpiMode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_hal::Blocking;
use log::LevelFilter;
use static_cell::StaticCell;

use lora_mqtt_bridge::bridge::{Bridge, BridgeConfig, PollOutcome};
use lora_mqtt_bridge::config::{bridge as bridge_config, spi, uplink};
use lora_mqtt_bridge::radio::{HalChipFactory, RadioBus, RadioCell, RadioDriver, ReceiveSignal};
use lora_mqtt_bridge::serial::IoSerial;
use lora_mqtt_bridge::uplink::UplinkPublisher;

type RadioSpi = Spi<'static, Blocking>;
type Factory = HalChipFactory<RadioSpi, Output<'static>, Output<'static>, Input<'static>, Delay>;
type Uplink = UplinkPublisher<IoSerial<Uart<'static, Blocking>>>;

/// Radio driver shared by the IRQ handler and the bridge task
static RADIO: RadioCell<Factory> = RadioCell::new();

/// Raised from the IRQ handler when a packet is ready
static RECEIVE_SIGNAL: ReceiveSignal = ReceiveSignal::new();

/// IRQ input, kept here so the handler can acknowledge the GPIO interrupt
static IRQ_PIN: Mutex<CriticalSectionRawMutex, RefCell<Option<Input<'static>>>> =
    Mutex::new(RefCell::new(None));

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

#[handler]
fn radio_irq() {
    let fired = IRQ_PIN.lock(|cell| match cell.try_borrow_mut() {
        Ok(mut pin) => match pin.as_mut() {
            Some(pin) if pin.is_interrupt_set() => {
                pin.clear_interrupt();
                true
            }
            _ => false,
        },
        Err(_) => false,
    });

    if fired {
        RADIO.on_interrupt();
    }
}

#[esp_hal::main]
fn main() -> ! {
    // Heap for chip handles and discovery documents
    esp_alloc::heap_allocator!(size: 32 * 1024);

    // Logs go to the USB serial JTAG port; UART0 carries the uplink
    esp_println::logger::init_logger(LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Configure SPI for LoRa
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_hz(spi::FREQUENCY_HZ))
            .with_mode(SpiMode::_0),
    )
    .expect("Failed to configure SPI")
    .with_sck(peripherals.GPIO7)
    .with_miso(peripherals.GPIO8)
    .with_mosi(peripherals.GPIO9);

    // Configure LoRa control pins
    let nss = Output::new(peripherals.GPIO41, Level::High, OutputConfig::default());
    let nrst = Output::new(peripherals.GPIO42, Level::High, OutputConfig::default());
    let busy = Input::new(peripherals.GPIO40, InputConfig::default().with_pull(Pull::Down));
    let mut irq = Input::new(peripherals.GPIO39, InputConfig::default().with_pull(Pull::Down));

    let bus = RadioBus {
        spi: spi_bus,
        nss,
        nrst,
        busy,
        delay: Delay::new(),
    };
    RADIO.install(RadioDriver::new(Factory::new(), bus));

    // Radio IRQ on the rising edge of DIO0/DIO1
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(radio_irq);
    irq.listen(Event::RisingEdge);
    IRQ_PIN.lock(|cell| cell.replace(Some(irq)));

    // UART0 carries publish frames to the MQTT host
    let uart = Uart::new(
        peripherals.UART0,
        UartConfig::default().with_baudrate(uplink::BAUD_RATE),
    )
    .expect("Failed to configure UART")
    .with_tx(peripherals.GPIO43)
    .with_rx(peripherals.GPIO44);
    let publisher = UplinkPublisher::new(IoSerial::new(uart));

    let mut bridge = Bridge::new(&RADIO, &RECEIVE_SIGNAL, publisher, BridgeConfig::default());
    // A failed setup is logged and reported on every status interval
    let _ = bridge.setup();

    // Create and run the embassy executor
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(bridge_task(bridge));
    })
}

/// Task polling the bridge for received frames
#[embassy_executor::task]
async fn bridge_task(mut bridge: Bridge<Factory, Uplink>) {
    let mut ticker = Ticker::every(Duration::from_millis(bridge_config::POLL_INTERVAL_MS));

    loop {
        // Drain everything that arrived since the last tick
        while bridge.poll() != PollOutcome::Idle {}

        bridge.report_status(Instant::now().as_millis());
        ticker.next().await;
    }
}
