/// Millisecond time source used for every bounded wait in the engine.
///
/// Firmware uses [`EmbassyClock`]; host tests substitute a clock whose
/// `sleep_ms` advances time without blocking.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&self, ms: u64);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        (**self).sleep_ms(ms).await
    }
}

pub fn elapsed_ms<C: Clock + ?Sized>(clock: &C, started_ms: u64) -> u64 {
    clock.now_ms().saturating_sub(started_ms)
}

#[cfg(feature = "embassy-clock")]
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyClock;

#[cfg(feature = "embassy-clock")]
impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }

    async fn sleep_ms(&self, ms: u64) {
        embassy_time::Timer::after_millis(ms).await;
    }
}
