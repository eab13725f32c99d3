//! Discovery, mapping and word-level access of the four AM335x GPIO register banks.

use crate::consts::{self, reg};
use crate::error::{Error, Result};
use log::{debug, trace, warn};
use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// A 4 KiB register page addressed by byte offset.
///
/// Every access is one whole 32-bit word in little-endian order, which is
/// what the hardware needs for the SET/CLEAR registers to act atomically on
/// all 32 bits at once. Offsets passed in by [`RegisterBankMap`] are always
/// word aligned and inside the page.
pub trait RegisterPage: fmt::Debug + Send + Sync {
    fn read_word(&self, offset: usize) -> u32;
    fn write_word(&self, offset: usize, value: u32);
}

/// One GPIO controller page mapped out of the physical memory device.
#[derive(Debug)]
pub(crate) struct MappedPage {
    address: u64,
    base: *mut u8,
    // Keeps the mapping alive; dropping it unmaps the page.
    _map: MmapMut,
}

// The mapping is plain device memory. Concurrent single-word volatile
// accesses are what the hardware expects.
unsafe impl Send for MappedPage {}
unsafe impl Sync for MappedPage {}

impl MappedPage {
    fn map(mem: &File, address: u64) -> std::io::Result<Self> {
        // SAFETY: the region is device memory owned by no other Rust object;
        // it is only ever touched through volatile word accesses below.
        let mut map = unsafe {
            MmapOptions::new()
                .offset(address)
                .len(consts::GPIO_PAGE_SIZE)
                .map_mut(mem)?
        };
        let base = map.as_mut_ptr();
        trace!("Mapped GPIO page 0x{:08X} at {:p}", address, base);
        Ok(Self {
            address,
            base,
            _map: map,
        })
    }
}

impl Drop for MappedPage {
    fn drop(&mut self) {
        trace!("Unmapping GPIO page 0x{:08X}", self.address);
    }
}

impl RegisterPage for MappedPage {
    fn read_word(&self, offset: usize) -> u32 {
        // SAFETY: offset is word aligned and below GPIO_PAGE_SIZE (checked by
        // RegisterBankMap), the page is mapped for as long as self lives.
        let raw = unsafe { std::ptr::read_volatile(self.base.add(offset).cast::<u32>()) };
        u32::from_le(raw)
    }

    fn write_word(&self, offset: usize, value: u32) {
        // SAFETY: see read_word.
        unsafe { std::ptr::write_volatile(self.base.add(offset).cast::<u32>(), value.to_le()) }
    }
}

/// Where the bank map looks for the hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankMapConfig {
    /// Whole-system physical memory device.
    pub mem_device: PathBuf,
    /// Directory holding one `gpio@<address>/compatible` entry per controller.
    pub device_tree_root: PathBuf,
}

impl Default for BankMapConfig {
    fn default() -> Self {
        Self {
            mem_device: PathBuf::from(consts::DEFAULT_MEM_DEVICE),
            device_tree_root: PathBuf::from(consts::DEFAULT_DEVICE_TREE_ROOT),
        }
    }
}

impl BankMapConfig {
    /// Path of the identification file for the controller at `address`.
    pub fn compatible_file(&self, address: u64) -> PathBuf {
        self.device_tree_root
            .join(format!("gpio@{:x}", address))
            .join("compatible")
    }
}

enum SharedState {
    Unopened,
    Open(Arc<RegisterBankMap>),
    Incompatible { address: u64, found: Option<String> },
}

static SHARED: Mutex<SharedState> = Mutex::new(SharedState::Unopened);

/// The four mapped GPIO controller pages.
///
/// Pins hold an `Arc` to the map. [`close`](Self::close) unmaps every page;
/// register access afterwards fails with [`Error::BankUnmapped`]. Closing
/// while other threads still drive pins is the caller's responsibility.
pub struct RegisterBankMap {
    banks: RwLock<Option<Vec<Arc<dyn RegisterPage>>>>,
    // Serializes read-modify-write cycles on shared registers.
    reglock: Mutex<()>,
}

impl fmt::Debug for RegisterBankMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterBankMap")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RegisterBankMap {
    /// Verifies the SoC and maps all four banks using the default paths.
    pub fn open() -> Result<Self> {
        Self::open_with(&BankMapConfig::default())
    }

    /// Verifies the SoC and maps all four banks using the paths in `config`.
    ///
    /// Any bank failing the compatibility check aborts with
    /// [`Error::HardwareIncompatible`] before anything is mapped.
    pub fn open_with(config: &BankMapConfig) -> Result<Self> {
        for &address in consts::GPIO_BANK_ADDRESSES.iter() {
            verify_compatible(config, address)?;
        }
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.mem_device)
            .map_err(|e| Error::unavailable(&config.mem_device, e))?;
        let mut pages: Vec<Arc<dyn RegisterPage>> = Vec::with_capacity(consts::BANK_COUNT);
        for &address in consts::GPIO_BANK_ADDRESSES.iter() {
            // Pages mapped so far are unmapped when `pages` drops on error.
            let page = MappedPage::map(&mem, address)
                .map_err(|e| Error::unavailable(&config.mem_device, e))?;
            pages.push(Arc::new(page));
        }
        debug!(
            "Mapped {} GPIO banks from {}",
            pages.len(),
            config.mem_device.display()
        );
        Ok(Self::with_pages(pages))
    }

    /// Builds a bank map over caller-provided pages (e.g. simulated ones).
    pub fn from_pages(pages: [Arc<dyn RegisterPage>; consts::BANK_COUNT]) -> Self {
        Self::with_pages(Vec::from(pages))
    }

    fn with_pages(pages: Vec<Arc<dyn RegisterPage>>) -> Self {
        Self {
            banks: RwLock::new(Some(pages)),
            reglock: Mutex::new(()),
        }
    }

    /// Returns the process-wide bank map, opening it on first use.
    ///
    /// Concurrent first calls create exactly one mapping. A hardware
    /// mismatch is remembered and returned again without re-probing.
    pub fn shared() -> Result<Arc<Self>> {
        let mut state = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            SharedState::Open(map) if !map.is_closed() => return Ok(Arc::clone(map)),
            SharedState::Incompatible { address, found } => {
                return Err(Error::HardwareIncompatible {
                    address: *address,
                    found: found.clone(),
                })
            }
            _ => {}
        }
        match Self::open() {
            Ok(map) => {
                let map = Arc::new(map);
                *state = SharedState::Open(Arc::clone(&map));
                Ok(map)
            }
            Err(Error::HardwareIncompatible { address, found }) => {
                *state = SharedState::Incompatible {
                    address,
                    found: found.clone(),
                };
                Err(Error::HardwareIncompatible { address, found })
            }
            Err(e) => Err(e),
        }
    }

    /// Unmaps all banks. Calling it again has no effect.
    pub fn close(&self) {
        let mut banks = self.banks.write().unwrap_or_else(PoisonError::into_inner);
        if banks.take().is_some() {
            debug!("Unmapped GPIO register banks");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.banks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn with_page<T>(
        &self,
        bank: usize,
        offset: usize,
        f: impl FnOnce(&dyn RegisterPage) -> T,
    ) -> Result<T> {
        if offset % 4 != 0 || offset > consts::GPIO_PAGE_SIZE - 4 {
            return Err(Error::ArgumentOutOfRange(format!(
                "Register offset 0x{:03X} is not a word inside the page",
                offset
            )));
        }
        let banks = self.banks.read().unwrap_or_else(PoisonError::into_inner);
        let pages = banks.as_ref().ok_or(Error::BankUnmapped { bank })?;
        let page = pages.get(bank).ok_or_else(|| {
            Error::ArgumentOutOfRange(format!(
                "Bank {} out of range (0-{})",
                bank,
                consts::BANK_COUNT - 1
            ))
        })?;
        Ok(f(page.as_ref()))
    }

    /// Reads one 32-bit register of `bank`.
    pub fn read_register(&self, bank: usize, offset: usize) -> Result<u32> {
        let value = self.with_page(bank, offset, |page| page.read_word(offset))?;
        trace!("Read bank {} reg 0x{:03X} = 0x{:08X}", bank, offset, value);
        Ok(value)
    }

    /// Writes one 32-bit register of `bank` in a single access.
    pub fn write_register(&self, bank: usize, offset: usize, value: u32) -> Result<()> {
        trace!("Write bank {} reg 0x{:03X} = 0x{:08X}", bank, offset, value);
        self.with_page(bank, offset, |page| page.write_word(offset, value))
    }

    /// Read-modify-write of one register, serialized against other RMW cycles.
    /// Returns the value written.
    pub fn modify_register(
        &self,
        bank: usize,
        offset: usize,
        f: impl FnOnce(u32) -> u32,
    ) -> Result<u32> {
        let _guard = self.reglock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.read_register(bank, offset)?;
        let new_val = f(current);
        if new_val != current {
            self.write_register(bank, offset, new_val)?;
        } else {
            trace!("Bank {} reg 0x{:03X} already 0x{:08X}", bank, offset, current);
        }
        Ok(new_val)
    }

    /// Sets the debounce filter time shared by all debounced inputs of `bank`.
    pub fn set_debounce_time(&self, bank: usize, time: Duration) -> Result<()> {
        let units = Self::debounce_units(time)?;
        debug!("Setting bank {} debounce time to {:?} ({} units)", bank, time, units);
        self.modify_register(bank, reg::DEBOUNCE_TIME, |cur| {
            (cur & !0xFF) | u32::from(units)
        })?;
        Ok(())
    }

    pub fn debounce_time(&self, bank: usize) -> Result<Duration> {
        let value = self.read_register(bank, reg::DEBOUNCE_TIME)?;
        Ok(Self::debounce_duration((value & 0xFF) as u8))
    }

    /// Converts a duration to the DEBOUNCINGTIME register value.
    pub fn debounce_units(time: Duration) -> Result<u8> {
        let steps = (time.as_secs_f64() * 1_000_000.0 / consts::DEBOUNCE_UNIT_US).round();
        if steps < 1.0 || steps > f64::from(consts::DEBOUNCE_MAX_UNITS + 1) {
            return Err(Error::ArgumentOutOfRange(format!(
                "Debounce time {:?} out of range ({}-{} us)",
                time,
                consts::DEBOUNCE_UNIT_US,
                consts::DEBOUNCE_UNIT_US * f64::from(consts::DEBOUNCE_MAX_UNITS + 1)
            )));
        }
        Ok((steps as u32 - 1) as u8)
    }

    /// Converts a DEBOUNCINGTIME register value back to a duration.
    pub fn debounce_duration(units: u8) -> Duration {
        Duration::from_secs_f64((f64::from(units) + 1.0) * consts::DEBOUNCE_UNIT_US / 1_000_000.0)
    }
}

fn verify_compatible(config: &BankMapConfig, address: u64) -> Result<()> {
    let path = config.compatible_file(address);
    let found = read_prefix(&path);
    match &found {
        Some(text) if text.as_bytes().starts_with(consts::COMPATIBLE_PREFIX) => {
            trace!("GPIO controller 0x{:08X} is {:?}", address, text);
            Ok(())
        }
        _ => {
            warn!(
                "GPIO controller 0x{:08X} failed compatibility check ({}): {:?}",
                address,
                path.display(),
                found
            );
            Err(Error::HardwareIncompatible { address, found })
        }
    }
}

fn read_prefix(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut buf = [0u8; consts::COMPATIBLE_READ_LEN];
    let n = file.read(&mut buf).ok()?;
    if n == 0 {
        return None;
    }
    // Device tree strings are NUL separated.
    let text = buf[..n].split(|&b| b == 0).next().unwrap_or(&[]);
    Some(String::from_utf8_lossy(text).into_owned())
}
