use core::{cell::RefCell, convert::Infallible};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embedded_hal::digital::{ErrorType, InputPin};
use esp_hal::{
    gpio::{Event, Input, InputConfig, Pull},
    handler,
    peripherals::GPIO34,
};

use crate::firmware::CARD_DETECT;

static CARD_DETECT_PIN: Mutex<CriticalSectionRawMutex, RefCell<Option<Input<'static>>>> =
    Mutex::new(RefCell::new(None));

/// Active-low card-detect switch on GPIO34 (external pull-up).
///
/// The pin lives in a static so the GPIO interrupt can acknowledge edges;
/// this handle only samples it.
pub struct CardDetectLine {
    _private: (),
}

impl CardDetectLine {
    pub fn install(pin: GPIO34<'static>) -> Self {
        let mut input = Input::new(pin, InputConfig::default().with_pull(Pull::None));
        input.listen(Event::AnyEdge);
        CARD_DETECT_PIN.lock(|slot| slot.replace(Some(input)));
        Self { _private: () }
    }
}

pub fn set_listening(enabled: bool) {
    CARD_DETECT_PIN.lock(|slot| {
        if let Some(pin) = slot.borrow_mut().as_mut() {
            if enabled {
                pin.clear_interrupt();
                pin.listen(Event::AnyEdge);
            } else {
                pin.unlisten();
            }
        }
    });
}

impl ErrorType for CardDetectLine {
    type Error = Infallible;
}

impl InputPin for CardDetectLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(CARD_DETECT_PIN.lock(|slot| slot.borrow().as_ref().map_or(true, |pin| pin.is_high())))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

#[handler]
pub fn card_detect_handler() {
    let fired = CARD_DETECT_PIN.lock(|slot| match slot.borrow_mut().as_mut() {
        Some(pin) if pin.is_interrupt_set() => {
            pin.clear_interrupt();
            true
        }
        _ => false,
    });
    if fired {
        CARD_DETECT.notify_edge();
    }
}
