//! One pin type over every backend.

use crate::collection::CollectionPin;
use crate::direct::DirectPin;
use crate::error::Result;
use crate::gpio::{GpioControllablePin, GpioDirection};
use crate::simulated::SimulatedPin;
use crate::sysfs::SysfsPin;

/// A GPIO pin on any backend.
///
/// Code that should run on the board and in tests alike can hold a `Pin`
/// and pick the variant at startup. `'c` is the lifetime of the collection a
/// [`Pin::DirectInCollection`] belongs to; other variants use `Pin<'static>`.
#[derive(Debug)]
pub enum Pin<'c> {
    Direct(DirectPin),
    Sysfs(SysfsPin),
    Simulated(SimulatedPin),
    DirectInCollection(CollectionPin<'c>),
}

impl<'c> Pin<'c> {
    fn backend(&self) -> &(dyn GpioControllablePin + 'c) {
        match self {
            Pin::Direct(p) => p,
            Pin::Sysfs(p) => p,
            Pin::Simulated(p) => p,
            Pin::DirectInCollection(p) => p,
        }
    }

    /// Short backend name for log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Pin::Direct(_) => "direct",
            Pin::Sysfs(_) => "sysfs",
            Pin::Simulated(_) => "simulated",
            Pin::DirectInCollection(_) => "direct-in-collection",
        }
    }
}

impl GpioControllablePin for Pin<'_> {
    fn set_state(&self, state: bool) -> Result<()> {
        self.backend().set_state(state)
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.backend().set_state_immediate(state)
    }

    fn get_state(&self) -> Result<bool> {
        self.backend().get_state()
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        self.backend().check_direction()
    }

    fn set_active_low(&self, active_low: bool) -> Result<()> {
        self.backend().set_active_low(active_low)
    }

    fn is_active_low(&self) -> bool {
        self.backend().is_active_low()
    }
}

impl From<DirectPin> for Pin<'_> {
    fn from(pin: DirectPin) -> Self {
        Pin::Direct(pin)
    }
}

impl From<SysfsPin> for Pin<'_> {
    fn from(pin: SysfsPin) -> Self {
        Pin::Sysfs(pin)
    }
}

impl From<SimulatedPin> for Pin<'_> {
    fn from(pin: SimulatedPin) -> Self {
        Pin::Simulated(pin)
    }
}

impl<'c> From<CollectionPin<'c>> for Pin<'c> {
    fn from(pin: CollectionPin<'c>) -> Self {
        Pin::DirectInCollection(pin)
    }
}
