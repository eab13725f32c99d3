//! # bbhw-gpio
//!
//! A Rust crate for driving the GPIO pins of BeagleBone-class boards
//! (TI AM335x SoC) through three interchangeable backends:
//!
//! *   **Direct** register access: the four GPIO controller pages are mapped
//!     out of `/dev/mem` and pins are switched with single 32-bit writes to
//!     the SET/CLEAR registers.
//! *   **Sysfs**: the portable `/sys/class/gpio` interface.
//! *   **Simulated**: in-memory pins that can be wired together, for testing
//!     code without hardware.
//!
//! ## Features
//!
//! *   Strongly-typed `GpioPin` (flat Linux numbering 0-127, `bank = n / 32`, `bit = n % 32`).
//! *   One capability trait (`GpioControllablePin`) implemented by every backend,
//!     plus the `Pin` enum to pick a backend at runtime.
//! *   Active-low polarity, applied consistently at the trait boundary.
//! *   Transactions (`DirectPinCollection`): buffer writes to many pins and
//!     apply them with one CLEAR and one SET write per bank, so all pins of a
//!     bank change in the same instant.
//! *   Hardware debounce (enable per input pin, filter time per bank).
//! *   Simulated register banks (`SimulatedBanks`) that behave like the
//!     AM335x GPIO module, for testing register-level code on any machine.
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! bbhw-gpio = "0.1.0"
//! log = "0.4"          # Optional, for logging
//!
//! [dev-dependencies]
//! env_logger = "0.11"
//! ```
//!
//! ## Basic Usage
//!
//! ```no_run
//! use bbhw_gpio::{
//!     DirectPin, DirectPinCollection, GpioControllablePin, GpioDirection, GpioPin,
//!     RegisterBankMap, Result, SysfsTree,
//! };
//!
//! fn main() -> Result<()> {
//!     // Optional: Initialize logging
//!     // env_logger::init();
//!
//!     // Fails with Error::HardwareIncompatible on anything but an AM335x.
//!     let map = RegisterBankMap::shared()?;
//!     let sysfs = SysfsTree::default();
//!
//!     // P8_8 (GPIO 67): exported through sysfs first to enable its bank clock.
//!     let led = DirectPin::new(map.clone(), GpioPin::new(67)?, GpioDirection::Output, &sysfs)?;
//!     led.set_state(true)?;
//!
//!     // Switch P8_7 and P8_8 in the same instant.
//!     let coll = DirectPinCollection::new(map);
//!     let a = coll.new_pin(GpioPin::new(66)?, GpioDirection::Output, &sysfs)?;
//!     let b = coll.new_pin(GpioPin::new(67)?, GpioDirection::Output, &sysfs)?;
//!     coll.begin_transaction();
//!     a.set_state(true)?;
//!     b.set_state(false)?;
//!     coll.commit_transaction()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Hardware Setup Notes
//!
//! *   **Permissions:** the direct backend needs read-write access to `/dev/mem`
//!     (usually root). The sysfs backend needs write access to `/sys/class/gpio`.
//! *   **Clock gating:** a GPIO bank whose clock is gated stalls the bus on the
//!     first register access. Every constructor of a register-backed pin exports
//!     the pin through a `PinExporter` first, which makes the kernel enable the
//!     bank. Keep it that way.
//! *   **Pinmux:** this crate does not configure pin multiplexing. Load the
//!     right device tree overlay or use `set_overlay_state` with the
//!     `ocp:<pin>_pinmux` helpers.
//! *   **GPIO Voltage Levels:** 3.3V logic, inputs are not 5V tolerant.
//!
//! ## License
//!
//! This project is licensed under the WTFPL - see the [LICENSE](LICENSE) file for details.

mod consts;
mod error;
pub mod collection;
pub mod direct;
pub mod gpio;
pub mod pin;
pub mod regs;
pub mod simregs;
pub mod simulated;
pub mod sysfs;

pub use collection::{CollectionPin, DirectPinCollection, TransactionBuffer};
pub use direct::DirectPin;
pub use error::{Error, Result};
pub use gpio::{
    step, GpioCollection, GpioControllablePin, GpioDirection, GpioPin, PinAddress,
    PinInCollection,
};
pub use pin::Pin;
pub use regs::{BankMapConfig, RegisterBankMap, RegisterPage};
pub use simregs::{SimulatedBanks, SimulatedPage};
pub use simulated::{SimulatedCollection, SimulatedCollectionPin, SimulatedPin};
pub use sysfs::{set_overlay_state, OverlayResolver, PinExporter, SysfsPin, SysfsTree};

/// Register offsets within a GPIO bank page, for use with
/// [`RegisterBankMap::read_register`] and friends.
pub mod registers {
    pub use crate::consts::reg::*;
    pub use crate::consts::{BANK_COUNT, GPIO_BANK_ADDRESSES, GPIO_PAGE_SIZE, PINS_PER_BANK};
}
