use cardbay::{
    drivers::{card_detect, CardDetectLine, Esp32SdHost},
    firmware::{self, SDIO_SIGNALS},
    MonitorConfig, PresenceMonitor, VolumeProbe,
};
use esp_hal::{gpio::Io, timer::timg::TimerGroup};
use sdio_block::{clock::EmbassyClock, BlockEngine, EngineConfig};
use static_cell::StaticCell;

pub(crate) fn run() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);
    let peripherals = esp_hal::init(esp_hal::Config::default());
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(card_detect::card_detect_handler);
    let line = CardDetectLine::install(peripherals.GPIO34);

    let host = Esp32SdHost::new(peripherals.SDHOST, &SDIO_SIGNALS);
    let engine = firmware::share_card_engine(BlockEngine::new(
        host,
        EmbassyClock,
        &SDIO_SIGNALS,
        EngineConfig::default(),
    ));
    let monitor = PresenceMonitor::new(
        line,
        EmbassyClock,
        engine,
        VolumeProbe::new(),
        MonitorConfig::default(),
    );

    static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(move |spawner| {
        firmware::monitor_init(spawner, monitor);
        spawner.must_spawn(firmware::telemetry_task());
    });
}
