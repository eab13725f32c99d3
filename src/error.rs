use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when driving GPIO pins.
///
/// The variants fall into four classes: fatal hardware mismatch
/// (`HardwareIncompatible`), missing kernel resources (`ResourceUnavailable`),
/// misuse of a pin (`InvalidOperation`, argument errors) and transient
/// register or file failures (`BankUnmapped`, `Io`, `InvalidSysfsValue`).
#[derive(Error, Debug)]
pub enum Error {
    /// The GPIO controller at `address` does not identify as an AM335x/OMAP4 GPIO block.
    #[error(
        "GPIO controller at 0x{address:08X} is not compatible (found {found:?}). Looks like this is not an AM335x CPU; use the sysfs backend instead."
    )]
    HardwareIncompatible {
        /// Physical address of the controller that failed the check.
        address: u64,
        /// The identification text that was read, if any.
        found: Option<String>,
    },
    /// A kernel resource (export file, control file, memory device) could not be opened or written.
    #[error("Resource unavailable at '{}': {source}", path.display())]
    ResourceUnavailable {
        /// The path that could not be used.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The requested operation is not valid in the pin's current configuration.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// A register bank was accessed after the bank map was closed.
    #[error("GPIO bank {bank} is no longer mapped (register bank map closed)")]
    BankUnmapped {
        /// Index of the bank that was accessed.
        bank: usize,
    },
    /// General I/O error during a register or file operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Function argument is outside the valid range.
    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),
    /// GPIO pin number is outside the range covered by the register banks.
    #[error("GPIO pin {pin} argument out of range (0-127): {message}")]
    PinArgumentOutOfRange {
        /// The invalid pin number that was specified.
        pin: u32,
        /// Detailed error message explaining the constraint.
        message: String,
    },
    /// A sysfs control file contained an unexpected value.
    #[error("Unexpected value {value:?} in '{}'", path.display())]
    InvalidSysfsValue {
        /// The file that was read.
        path: PathBuf,
        /// The trimmed content.
        value: String,
    },
}

/// Result type alias for GPIO operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps an I/O error with the path it occurred on.
    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ResourceUnavailable {
            path: path.into(),
            source,
        }
    }
}

pub(crate) fn debounce_on_output(pin: u8) -> Error {
    Error::InvalidOperation(format!(
        "GPIO {} is not configured as input, setting debounce won't have an effect",
        pin
    ))
}
