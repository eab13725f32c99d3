//! In-memory GPIO register pages that behave like AM335x hardware.
//!
//! Used to drive [`DirectPin`](crate::DirectPin) and
//! [`DirectPinCollection`](crate::DirectPinCollection) without a BeagleBone:
//! SET/CLEAR writes modify DATA_OUT, DATA_IN reflects DATA_OUT for outputs
//! and an externally driven level for inputs. Every write is logged.

use crate::consts::{self, reg};
use crate::error::Result;
use crate::gpio::{GpioDirection, GpioPin};
use crate::regs::{RegisterBankMap, RegisterPage};
use crate::sysfs::PinExporter;
use log::trace;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
struct PageState {
    bytes: Vec<u8>,
    inputs: u32,
    writes: Vec<(usize, u32)>,
}

fn load(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn store(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A simulated GPIO controller page.
#[derive(Debug)]
pub struct SimulatedPage {
    state: Mutex<PageState>,
}

impl Default for SimulatedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPage {
    /// Creates a page in its reset state: every pin an input, all outputs low.
    pub fn new() -> Self {
        let mut bytes = vec![0u8; consts::GPIO_PAGE_SIZE];
        store(&mut bytes, reg::OUTPUT_ENABLE, u32::MAX);
        Self {
            state: Mutex::new(PageState {
                bytes,
                inputs: 0,
                writes: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drives the external level seen by input pins on `bit`.
    pub fn set_input_level(&self, bit: u8, high: bool) {
        let mut state = self.lock();
        let mask = 1u32 << (bit % consts::PINS_PER_BANK);
        if high {
            state.inputs |= mask;
        } else {
            state.inputs &= !mask;
        }
    }

    /// Configures the direction of `bit` the way the kernel does on export,
    /// without recording a register write.
    pub fn set_direction(&self, bit: u8, direction: GpioDirection) {
        let mut state = self.lock();
        let mask = 1u32 << (bit % consts::PINS_PER_BANK);
        let oe = load(&state.bytes, reg::OUTPUT_ENABLE);
        let oe = match direction {
            GpioDirection::Input => oe | mask,
            GpioDirection::Output => oe & !mask,
        };
        store(&mut state.bytes, reg::OUTPUT_ENABLE, oe);
    }

    /// Raw register content, bypassing the SET/CLEAR/DATA_IN behaviour.
    pub fn peek(&self, offset: usize) -> u32 {
        load(&self.lock().bytes, offset)
    }

    /// All `(offset, value)` writes since creation or the last clear.
    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.lock().writes.clone()
    }

    pub fn clear_write_log(&self) {
        self.lock().writes.clear();
    }
}

impl RegisterPage for SimulatedPage {
    fn read_word(&self, offset: usize) -> u32 {
        let state = self.lock();
        match offset {
            reg::DATA_IN => {
                let oe = load(&state.bytes, reg::OUTPUT_ENABLE);
                let out = load(&state.bytes, reg::DATA_OUT);
                (out & !oe) | (state.inputs & oe)
            }
            reg::SET_DATA_OUT | reg::CLEAR_DATA_OUT => load(&state.bytes, reg::DATA_OUT),
            _ => load(&state.bytes, offset),
        }
    }

    fn write_word(&self, offset: usize, value: u32) {
        let mut state = self.lock();
        state.writes.push((offset, value));
        match offset {
            reg::SET_DATA_OUT => {
                let out = load(&state.bytes, reg::DATA_OUT) | value;
                store(&mut state.bytes, reg::DATA_OUT, out);
            }
            reg::CLEAR_DATA_OUT => {
                let out = load(&state.bytes, reg::DATA_OUT) & !value;
                store(&mut state.bytes, reg::DATA_OUT, out);
            }
            reg::DATA_IN => {} // read-only
            _ => store(&mut state.bytes, offset, value),
        }
    }
}

/// Four simulated banks plus an exporter that plays the kernel's part.
#[derive(Debug, Clone)]
pub struct SimulatedBanks {
    pages: [Arc<SimulatedPage>; consts::BANK_COUNT],
}

impl Default for SimulatedBanks {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBanks {
    pub fn new() -> Self {
        Self {
            pages: std::array::from_fn(|_| Arc::new(SimulatedPage::new())),
        }
    }

    /// The simulated page of `bank`, if the index is valid.
    pub fn page(&self, bank: usize) -> Option<&SimulatedPage> {
        self.pages.get(bank).map(|p| p.as_ref())
    }

    /// A bank map backed by these pages.
    pub fn bank_map(&self) -> RegisterBankMap {
        RegisterBankMap::from_pages(std::array::from_fn(|i| {
            Arc::clone(&self.pages[i]) as Arc<dyn RegisterPage>
        }))
    }
}

impl PinExporter for SimulatedBanks {
    fn export_pin(&self, pin: GpioPin, direction: GpioDirection) -> Result<()> {
        trace!("Simulated export of GPIO {} as {:?}", pin.number(), direction);
        self.pages[pin.bank_index()].set_direction(pin.bit_index(), direction);
        Ok(())
    }
}
