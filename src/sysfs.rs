//! Kernel filesystem backend and the two collaborator operations the
//! register backend relies on: exporting a pin and locating an overlay's
//! state file.

use crate::consts;
use crate::error::{Error, Result};
use crate::gpio::{GpioControllablePin, GpioDirection, GpioPin};
use log::{debug, trace, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Makes a pin's kernel control files appear and configures its direction.
///
/// The register backend calls this before touching a bank: exporting a pin
/// enables the clock of its GPIO controller, and register access to a gated
/// bank stalls the bus.
pub trait PinExporter {
    fn export_pin(&self, pin: GpioPin, direction: GpioDirection) -> Result<()>;
}

/// Finds the `state` file of a loaded device tree overlay.
pub trait OverlayResolver {
    fn overlay_state_file(&self, name: &str) -> Result<PathBuf>;
}

/// Locations of the kernel GPIO and on-chip-peripheral directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsTree {
    /// Directory holding `export` and the `gpioN` directories.
    pub gpio_root: PathBuf,
    /// Directory searched for overlay pinmux helpers.
    pub ocp_root: PathBuf,
}

impl Default for SysfsTree {
    fn default() -> Self {
        Self {
            gpio_root: PathBuf::from(consts::DEFAULT_SYSFS_GPIO_ROOT),
            ocp_root: PathBuf::from(consts::DEFAULT_SYSFS_OCP_ROOT),
        }
    }
}

impl SysfsTree {
    /// A tree below `root`, laid out as `root/gpio` and `root/ocp`.
    pub fn at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            gpio_root: root.join("gpio"),
            ocp_root: root.join("ocp"),
        }
    }

    pub fn pin_dir(&self, pin: GpioPin) -> PathBuf {
        self.gpio_root.join(format!("gpio{}", pin.number()))
    }

    fn find_overlay_dir(&self, dir: &Path, names: &[String], depth: u8) -> Option<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        if let Some(hit) = entries.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| names.iter().any(|want| want == n))
        }) {
            return Some(hit.clone());
        }
        if depth == 0 {
            return None;
        }
        entries
            .iter()
            .find_map(|p| self.find_overlay_dir(p, names, depth - 1))
    }
}

impl PinExporter for SysfsTree {
    /// Exports `pin` unless its directory already exists, then writes its
    /// `direction` file.
    fn export_pin(&self, pin: GpioPin, direction: GpioDirection) -> Result<()> {
        let dir = self.pin_dir(pin);
        match fs::metadata(&dir) {
            Ok(_) => trace!("GPIO {} already exported", pin.number()),
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(Error::unavailable(dir, e));
            }
            Err(_) => {
                let export = self.gpio_root.join("export");
                debug!("Exporting GPIO {}", pin.number());
                let mut file = OpenOptions::new()
                    .write(true)
                    .open(&export)
                    .map_err(|e| Error::unavailable(&export, e))?;
                file.write_all(format!("{}\n", pin.number()).as_bytes())
                    .map_err(|e| Error::unavailable(&export, e))?;
            }
        }
        let path = dir.join("direction");
        debug!("GPIO {} direction -> {:?}", pin.number(), direction);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::unavailable(&path, e))?;
        file.write_all(direction_text(direction).as_bytes())
            .map_err(|e| Error::unavailable(&path, e))
    }
}

fn direction_text(direction: GpioDirection) -> &'static str {
    match direction {
        GpioDirection::Input => "in\n",
        GpioDirection::Output => "out\n",
    }
}

impl OverlayResolver for SysfsTree {
    fn overlay_state_file(&self, name: &str) -> Result<PathBuf> {
        let names = [
            name.to_string(),
            format!("ocp:{}", name),
            format!("{}_pinmux", name),
            format!("ocp:{}_pinmux", name),
        ];
        let state = self
            .find_overlay_dir(&self.ocp_root, &names, 2)
            .map(|dir| dir.join("state"))
            .filter(|p| p.is_file());
        state.ok_or_else(|| {
            Error::unavailable(
                self.ocp_root.join(name),
                io::Error::new(io::ErrorKind::NotFound, "overlay state file not found"),
            )
        })
    }
}

/// Writes `state` (for example `"gpio"` or `"default"`) into the state file
/// of overlay `name`.
pub fn set_overlay_state(resolver: &dyn OverlayResolver, name: &str, state: &str) -> Result<()> {
    let path = resolver.overlay_state_file(name)?;
    debug!("Setting overlay {} state to {:?}", name, state);
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| Error::unavailable(&path, e))?;
    file.write_all(format!("{}\n", state).as_bytes())
        .map_err(|e| Error::unavailable(&path, e))
}

#[derive(Debug)]
struct SysfsFiles {
    direction: File,
    value: File,
    active_low: File,
}

impl SysfsFiles {
    fn open(dir: &Path) -> Result<Self> {
        let open = |name: &str| {
            let path = dir.join(name);
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| Error::unavailable(path, e))
        };
        Ok(Self {
            direction: open("direction")?,
            value: open("value")?,
            active_low: open("active_low")?,
        })
    }
}

fn read_file(file: &mut File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(text.trim().to_string())
}

/// Replaces the content of a control file kept open across calls.
fn write_file(file: &mut File, text: &str) -> io::Result<()> {
    // sysfs attributes replace their value on each write and may refuse
    // truncation; only a regular file needs it.
    file.set_len(0).ok();
    file.seek(SeekFrom::Start(0))?;
    file.write_all(text.as_bytes())?;
    file.flush()
}

fn parse_bit(path: PathBuf, text: String) -> Result<bool> {
    match text.as_str() {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(Error::InvalidSysfsValue { path, value: text }),
    }
}

/// A pin driven through `/sys/class/gpio/gpioN`.
///
/// The `direction`, `value` and `active_low` files stay open for the life of
/// the pin. Polarity is applied by the kernel, so `value` already holds the
/// logical state.
#[derive(Debug)]
pub struct SysfsPin {
    pin: GpioPin,
    dir: PathBuf,
    files: Mutex<SysfsFiles>,
    active_low: AtomicBool,
}

impl SysfsPin {
    /// Exports `pin`, sets its direction and opens its control files.
    pub fn new(tree: &SysfsTree, pin: GpioPin, direction: GpioDirection) -> Result<Self> {
        tree.export_pin(pin, direction)?;
        let dir = tree.pin_dir(pin);
        let mut files = SysfsFiles::open(&dir)?;
        let active_low = read_file(&mut files.active_low)
            .map_err(|e| Error::unavailable(dir.join("active_low"), e))?;
        let active_low = parse_bit(dir.join("active_low"), active_low)?;
        Ok(Self {
            pin,
            dir,
            files: Mutex::new(files),
            active_low: AtomicBool::new(active_low),
        })
    }

    #[inline]
    pub fn number(&self) -> u8 {
        self.pin.number()
    }

    #[inline]
    pub fn pin(&self) -> GpioPin {
        self.pin
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SysfsFiles> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_direction(&self, direction: GpioDirection) -> Result<()> {
        debug!("GPIO {} direction -> {:?}", self.pin.number(), direction);
        write_file(&mut self.lock().direction, direction_text(direction))?;
        Ok(())
    }

    /// Closes and reopens the control files, for recovery after an I/O error.
    pub fn reopen(&self) -> Result<()> {
        let fresh = SysfsFiles::open(&self.dir)?;
        *self.lock() = fresh;
        debug!("Reopened control files of GPIO {}", self.pin.number());
        Ok(())
    }

    fn write_value(&self, files: &mut SysfsFiles, state: bool) -> Result<()> {
        trace!("GPIO {} value <- {}", self.pin.number(), state as u8);
        write_file(&mut files.value, if state { "1\n" } else { "0\n" })?;
        Ok(())
    }

    fn read_value(&self, files: &mut SysfsFiles) -> Result<bool> {
        let text = read_file(&mut files.value)?;
        trace!("GPIO {} value -> {:?}", self.pin.number(), text);
        parse_bit(self.dir.join("value"), text)
    }

    fn read_direction(&self, files: &mut SysfsFiles) -> Result<GpioDirection> {
        let text = read_file(&mut files.direction)?;
        match text.as_str() {
            "in" => Ok(GpioDirection::Input),
            // the kernel accepts high/low as "out with initial level"
            "out" | "high" | "low" => Ok(GpioDirection::Output),
            _ => Err(Error::InvalidSysfsValue {
                path: self.dir.join("direction"),
                value: text,
            }),
        }
    }
}

impl GpioControllablePin for SysfsPin {
    fn set_state(&self, state: bool) -> Result<()> {
        let mut files = self.lock();
        self.write_value(&mut files, state)
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.set_state(state)
    }

    fn get_state(&self) -> Result<bool> {
        let mut files = self.lock();
        self.read_value(&mut files)
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        let mut files = self.lock();
        self.read_direction(&mut files)
    }

    fn set_active_low(&self, active_low: bool) -> Result<()> {
        let mut files = self.lock();
        if self.active_low.load(Ordering::Acquire) == active_low {
            return Ok(());
        }
        let logical = self.read_value(&mut files)?;
        write_file(&mut files.active_low, if active_low { "1\n" } else { "0\n" })?;
        self.active_low.store(active_low, Ordering::Release);
        debug!("GPIO {} active_low -> {}", self.pin.number(), active_low);
        if self.read_direction(&mut files)? == GpioDirection::Output {
            self.write_value(&mut files, logical)?;
        } else if self.read_value(&mut files)? != logical {
            warn!(
                "GPIO {} is an input, its logical level changed with the polarity",
                self.pin.number()
            );
        }
        Ok(())
    }

    fn is_active_low(&self) -> bool {
        self.active_low.load(Ordering::Acquire)
    }
}
