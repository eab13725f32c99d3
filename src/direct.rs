//! Pins driven straight through the mapped GPIO registers.

use crate::consts::reg;
use crate::error::{self, Result};
use crate::gpio::{GpioControllablePin, GpioDirection, GpioPin};
use crate::regs::RegisterBankMap;
use crate::sysfs::PinExporter;
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A GPIO pin accessed through its bank's registers.
///
/// Writes go to the SET and CLEAR registers, which only affect bits written
/// as 1, so pins sharing a bank never clobber each other. Direction is taken
/// from the output-enable register on every read.
#[derive(Debug)]
pub struct DirectPin {
    map: Arc<RegisterBankMap>,
    pin: GpioPin,
    active_low: AtomicBool,
}

impl DirectPin {
    /// Exports `pin` through `exporter` (enabling its bank's clock), then
    /// binds it to `map`.
    pub fn new(
        map: Arc<RegisterBankMap>,
        pin: GpioPin,
        direction: GpioDirection,
        exporter: &dyn PinExporter,
    ) -> Result<Self> {
        exporter.export_pin(pin, direction)?;
        debug!(
            "Direct GPIO {} on bank {} bit {}",
            pin.number(),
            pin.bank_index(),
            pin.bit_index()
        );
        Ok(Self {
            map,
            pin,
            active_low: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn pin(&self) -> GpioPin {
        self.pin
    }

    pub fn bank_map(&self) -> &Arc<RegisterBankMap> {
        &self.map
    }

    pub(crate) fn store_active_low(&self, active_low: bool) {
        self.active_low.store(active_low, Ordering::Release);
        trace!("GPIO {} active_low -> {}", self.pin.number(), active_low);
    }

    #[inline]
    pub(crate) fn physical(&self, logical: bool) -> bool {
        logical != self.active_low.load(Ordering::Acquire)
    }

    fn write_physical(&self, high: bool) -> Result<()> {
        let offset = if high { reg::SET_DATA_OUT } else { reg::CLEAR_DATA_OUT };
        self.map
            .write_register(self.pin.bank_index(), offset, self.pin.mask())
    }

    fn read_physical(&self) -> Result<bool> {
        let offset = match self.check_direction()? {
            GpioDirection::Input => reg::DATA_IN,
            GpioDirection::Output => reg::DATA_OUT,
        };
        let value = self.map.read_register(self.pin.bank_index(), offset)?;
        Ok(value & self.pin.mask() != 0)
    }

    /// Enables or disables the hardware input filter. Only valid on inputs.
    pub fn set_debounce(&self, enable: bool) -> Result<()> {
        if self.check_direction()? != GpioDirection::Input {
            return Err(error::debounce_on_output(self.pin.number()));
        }
        let mask = self.pin.mask();
        self.map
            .modify_register(self.pin.bank_index(), reg::DEBOUNCE_ENABLE, |cur| {
                if enable {
                    cur | mask
                } else {
                    cur & !mask
                }
            })?;
        debug!("GPIO {} debounce {}", self.pin.number(), enable);
        Ok(())
    }

    pub fn is_debounced(&self) -> Result<bool> {
        let value = self
            .map
            .read_register(self.pin.bank_index(), reg::DEBOUNCE_ENABLE)?;
        Ok(value & self.pin.mask() != 0)
    }

    /// Sets the filter time of the whole bank this pin belongs to.
    pub fn set_debounce_time(&self, time: Duration) -> Result<()> {
        self.map.set_debounce_time(self.pin.bank_index(), time)
    }
}

impl GpioControllablePin for DirectPin {
    fn set_state(&self, state: bool) -> Result<()> {
        self.write_physical(self.physical(state))
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.set_state(state)
    }

    fn get_state(&self) -> Result<bool> {
        let high = self.read_physical()?;
        Ok(self.physical(high))
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        let oe = self
            .map
            .read_register(self.pin.bank_index(), reg::OUTPUT_ENABLE)?;
        Ok(if oe & self.pin.mask() != 0 {
            GpioDirection::Input
        } else {
            GpioDirection::Output
        })
    }

    fn set_active_low(&self, active_low: bool) -> Result<()> {
        if self.is_active_low() == active_low {
            return Ok(());
        }
        let logical = self.get_state()?;
        self.store_active_low(active_low);
        if self.check_direction()? == GpioDirection::Output {
            self.set_state(logical)?;
        }
        Ok(())
    }

    fn is_active_low(&self) -> bool {
        self.active_low.load(Ordering::Acquire)
    }
}
