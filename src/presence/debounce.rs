use embedded_hal::digital::InputPin;
use sdio_block::{clock::elapsed_ms, Clock};

use crate::config::MonitorConfig;

/// Alternating pattern so neither stable state is reported before the
/// register has been refilled with real samples.
pub const DEBOUNCE_SEED: u32 = 0xAAAA_AAAA;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardPresence {
    Inserted,
    Removed,
    Unstable,
}

impl CardPresence {
    pub fn label(self) -> &'static str {
        match self {
            CardPresence::Inserted => "inserted",
            CardPresence::Removed => "removed",
            CardPresence::Unstable => "unstable",
        }
    }
}

/// Samples the active-low card-detect line until 32 consecutive samples
/// agree or the debounce window runs out.
pub async fn debounce<P, C>(pin: &mut P, clock: &C, config: &MonitorConfig) -> CardPresence
where
    P: InputPin,
    C: Clock,
{
    let started_ms = clock.now_ms();
    let mut samples = DEBOUNCE_SEED;
    loop {
        let high = match pin.is_high() {
            Ok(high) => high,
            Err(err) => {
                log::debug!("sdmon: card_detect_read_failed err={:?}", err);
                true
            }
        };
        samples = (samples << 1) | high as u32;
        match samples {
            0 => return CardPresence::Inserted,
            u32::MAX => return CardPresence::Removed,
            _ => {}
        }
        if elapsed_ms(clock, started_ms) >= config.debounce_timeout_ms {
            return CardPresence::Unstable;
        }
        clock.sleep_ms(config.poll_interval_ms).await;
    }
}
