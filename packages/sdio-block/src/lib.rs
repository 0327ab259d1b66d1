#![no_std]

pub mod card;
pub mod clock;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod host;
pub mod signal;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use card::CardInfo;
pub use clock::Clock;
pub use config::{EngineConfig, BLOCK_SIZE};
pub use device::BlockDevice;
pub use engine::{BlockEngine, CardHandle, EngineStats};
pub use error::{map_error_code, BlockError, HostError};
pub use host::{BusConfig, BusWidth, CardState, ClockEdge, Direction, SdioHost, TransferRequest};
pub use signal::{TransferEvent, TransferSignals};
