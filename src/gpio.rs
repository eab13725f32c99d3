//! Pin numbering, direction, and the capability traits shared by every backend.

use crate::consts;
use crate::error::{Error, Result};
use log::{debug, trace};
use std::time::Duration;

/// GPIO pin direction configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioDirection {
    /// Output driver disabled, the pin samples an external level.
    Input,
    /// Output driver enabled, the pin drives its DATA_OUT level.
    Output,
}

/// Location of a pin inside the register banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinAddress {
    /// Bank (GPIO controller) index, 0-3.
    pub bank: u8,
    /// Bit offset within the bank's 32-bit registers, 0-31.
    pub bit: u8,
}

/// Represents a valid GPIO pin number (0-127) in the flat Linux numbering
/// shared by the memory-mapped and sysfs backends.
/// Use `GpioPin::new(num)` to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpioPin(pub(crate) u8);

impl GpioPin {
    /// Creates a new GpioPin, returning an error if the number is out of range (0-127).
    pub fn new(pin_num: u32) -> Result<Self> {
        if pin_num < consts::PIN_COUNT as u32 {
            Ok(GpioPin(pin_num as u8))
        } else {
            Err(Error::PinArgumentOutOfRange {
                pin: pin_num,
                message: "Pin number must be 0-127 (4 banks of 32)".to_string(),
            })
        }
    }

    /// Returns the underlying Linux GPIO number.
    #[inline]
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Returns the bank index (0-3) the pin belongs to.
    #[inline]
    pub fn bank_index(&self) -> usize {
        (self.0 / consts::PINS_PER_BANK) as usize
    }

    /// Returns the bit index (0-31) within the bank's registers.
    #[inline]
    pub fn bit_index(&self) -> u8 {
        self.0 % consts::PINS_PER_BANK
    }

    /// Returns the bit mask (1 << bit_index) for register operations.
    #[inline]
    pub fn mask(&self) -> u32 {
        1u32 << self.bit_index()
    }

    #[inline]
    pub fn address(&self) -> PinAddress {
        PinAddress {
            bank: self.bank_index() as u8,
            bit: self.bit_index(),
        }
    }
}

/// The contract every pin backend fulfils.
///
/// All states are *logical*: when active-low is enabled, `true` means the
/// physical line is low. Implementations take `&self` so a pin can be shared
/// between threads.
pub trait GpioControllablePin {
    /// Sets the logical output state. Pins that belong to a recording
    /// collection buffer the write until the transaction is committed.
    fn set_state(&self, state: bool) -> Result<()>;

    /// Sets the logical output state right now, bypassing any pending transaction.
    fn set_state_immediate(&self, state: bool) -> Result<()>;

    /// Reads the current (committed) logical state.
    fn get_state(&self) -> Result<bool>;

    /// Reads the direction the pin is currently configured for.
    fn check_direction(&self) -> Result<GpioDirection>;

    /// Inverts the meaning of high and low.
    ///
    /// The logical state is read before the flip and written back afterwards,
    /// so an output keeps its logical value and never glitches.
    fn set_active_low(&self, active_low: bool) -> Result<()>;

    /// Returns the polarity last set with [`set_active_low`](Self::set_active_low).
    fn is_active_low(&self) -> bool;
}

/// Pins created by a [`GpioCollection`], whose writes can be deferred.
pub trait PinInCollection: GpioControllablePin {
    /// Records a future logical state, regardless of whether the collection is recording.
    fn set_future_state(&self, state: bool) -> Result<()>;

    /// Returns `(known, state)`: `known` is false when nothing has been
    /// buffered for this pin since the last commit.
    fn get_pending_state(&self) -> Result<(bool, bool)>;
}

/// A group of pins whose writes can be applied in the same instant.
pub trait GpioCollection {
    /// Starts buffering `set_state` calls. Calling it while already recording has no effect.
    fn begin_transaction(&self);

    /// Applies all buffered states and returns to immediate mode.
    fn commit_transaction(&self) -> Result<()>;

    /// True between `begin_transaction` and the next commit.
    fn is_recording(&self) -> bool;
}

/// Toggles `pin` for `steps` full periods, sleeping `delay` after every edge.
///
/// `abort` is polled once per period; the pin is restored to its initial state on return.
pub fn step(
    pin: &dyn GpioControllablePin,
    steps: u32,
    delay: Duration,
    abort: Option<&dyn Fn() -> bool>,
) -> Result<()> {
    let initial = pin.get_state()?;
    debug!("Stepping pin {} times (delay {:?})", steps, delay);
    let mut current = initial;
    let mut outcome = Ok(());
    for edge in 0..steps.saturating_mul(2) {
        current = !current;
        if let Err(e) = pin.set_state(current) {
            outcome = Err(e);
            break;
        }
        std::thread::sleep(delay);
        if edge % 2 == 0 && abort.is_some_and(|f| f()) {
            trace!("Step aborted after edge {}", edge);
            break;
        }
    }
    let restored = pin.set_state(initial);
    outcome.and(restored)
}
