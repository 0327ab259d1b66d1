//! ESP32 peripherals behind the engine and the monitor: the SDMMC host on
//! slot 1 and the card-detect switch.

pub mod card_detect;
pub mod sdhost;

pub use card_detect::CardDetectLine;
pub use sdhost::Esp32SdHost;
