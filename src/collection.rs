//! Transactional writes across several register-mapped pins.
//!
//! While a [`DirectPinCollection`] is recording, `set_state` on its pins only
//! updates per-bank SET/CLEAR masks. Committing writes each bank's CLEAR and
//! SET register once, so every pin of a bank changes in the same bus cycle.

use crate::consts::{self, reg};
use crate::direct::DirectPin;
use crate::error::Result;
use crate::gpio::{GpioCollection, GpioControllablePin, GpioDirection, GpioPin, PinInCollection};
use crate::regs::RegisterBankMap;
use crate::sysfs::PinExporter;
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pending per-bank masks. A bit is never set in both masks of a bank.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionBuffer {
    pub pending_set: [u32; consts::BANK_COUNT],
    pub pending_clear: [u32; consts::BANK_COUNT],
    pub recording: bool,
}

impl TransactionBuffer {
    fn record(&mut self, pin: GpioPin, high: bool) {
        let bank = pin.bank_index();
        let mask = pin.mask();
        if high {
            self.pending_set[bank] |= mask;
            self.pending_clear[bank] &= !mask;
        } else {
            self.pending_clear[bank] |= mask;
            self.pending_set[bank] &= !mask;
        }
    }

    /// `(known, high)` for the physical level recorded for `pin`.
    fn pending(&self, pin: GpioPin) -> (bool, bool) {
        let bank = pin.bank_index();
        let mask = pin.mask();
        let high = self.pending_set[bank] & mask != 0;
        let known = high || self.pending_clear[bank] & mask != 0;
        (known, high)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A group of [`DirectPin`]s sharing one bank map and one transaction buffer.
///
/// Pins created with [`new_pin`](Self::new_pin) borrow the collection, so it
/// always outlives them.
#[derive(Debug)]
pub struct DirectPinCollection {
    map: Arc<RegisterBankMap>,
    inner: Mutex<TransactionBuffer>,
}

impl DirectPinCollection {
    pub fn new(map: Arc<RegisterBankMap>) -> Self {
        Self {
            map,
            inner: Mutex::new(TransactionBuffer::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exports `pin` and adds it to the collection.
    pub fn new_pin(
        &self,
        pin: GpioPin,
        direction: GpioDirection,
        exporter: &dyn PinExporter,
    ) -> Result<CollectionPin<'_>> {
        let direct = DirectPin::new(Arc::clone(&self.map), pin, direction, exporter)?;
        Ok(CollectionPin { coll: self, direct })
    }

    pub fn bank_map(&self) -> &Arc<RegisterBankMap> {
        &self.map
    }

    /// Starts recording. Has no effect while already recording.
    pub fn begin_transaction(&self) {
        let mut buf = self.lock();
        if !buf.recording {
            debug!("Transaction started");
        }
        buf.recording = true;
    }

    /// Writes all pending masks and returns to immediate mode.
    ///
    /// Each bank with pending changes gets at most one CLEAR and one SET
    /// write; untouched banks are not accessed at all. Returns the number of
    /// register writes. The buffer is emptied even if a write fails.
    pub fn commit_transaction(&self) -> Result<usize> {
        let mut buf = self.lock();
        let result = self.flush(&buf);
        buf.reset();
        match &result {
            Ok(writes) => debug!("Transaction committed ({} register writes)", writes),
            Err(e) => debug!("Transaction commit failed: {}", e),
        }
        result
    }

    fn flush(&self, buf: &TransactionBuffer) -> Result<usize> {
        let mut writes = 0;
        for bank in 0..consts::BANK_COUNT {
            let (set, clear) = (buf.pending_set[bank], buf.pending_clear[bank]);
            if clear != 0 {
                self.map.write_register(bank, reg::CLEAR_DATA_OUT, clear)?;
                writes += 1;
            }
            if set != 0 {
                self.map.write_register(bank, reg::SET_DATA_OUT, set)?;
                writes += 1;
            }
        }
        Ok(writes)
    }

    /// Drops everything recorded and returns to immediate mode without
    /// touching the hardware.
    pub fn discard_transaction(&self) {
        let mut buf = self.lock();
        if buf.recording {
            debug!("Transaction discarded");
        }
        buf.reset();
    }

    /// True between `begin_transaction` and the next commit or discard.
    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// `(pending_set, pending_clear)` of `bank`.
    pub fn pending_masks(&self, bank: usize) -> Option<(u32, u32)> {
        let buf = self.lock();
        Some((*buf.pending_set.get(bank)?, *buf.pending_clear.get(bank)?))
    }
}

impl GpioCollection for DirectPinCollection {
    fn begin_transaction(&self) {
        DirectPinCollection::begin_transaction(self)
    }

    fn commit_transaction(&self) -> Result<()> {
        DirectPinCollection::commit_transaction(self).map(drop)
    }

    fn is_recording(&self) -> bool {
        DirectPinCollection::is_recording(self)
    }
}

/// A [`DirectPin`] whose writes are buffered while its collection records.
#[derive(Debug)]
pub struct CollectionPin<'c> {
    coll: &'c DirectPinCollection,
    direct: DirectPin,
}

impl<'c> CollectionPin<'c> {
    pub fn direct(&self) -> &DirectPin {
        &self.direct
    }

    pub fn collection(&self) -> &'c DirectPinCollection {
        self.coll
    }

    fn record(&self, buf: &mut TransactionBuffer, logical: bool) {
        let high = self.direct.physical(logical);
        trace!(
            "GPIO {} pending {}",
            self.direct.pin().number(),
            if high { "SET" } else { "CLEAR" }
        );
        buf.record(self.direct.pin(), high);
    }
}

impl GpioControllablePin for CollectionPin<'_> {
    fn set_state(&self, state: bool) -> Result<()> {
        let mut buf = self.coll.lock();
        if buf.recording {
            self.record(&mut buf, state);
            Ok(())
        } else {
            self.direct.set_state(state)
        }
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.direct.set_state(state)
    }

    /// The committed state. Pending writes are only visible through
    /// [`get_pending_state`](PinInCollection::get_pending_state).
    fn get_state(&self) -> Result<bool> {
        self.direct.get_state()
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        self.direct.check_direction()
    }

    /// While recording, the preserved logical value is recorded as pending
    /// and reaches the pin at commit.
    fn set_active_low(&self, active_low: bool) -> Result<()> {
        let mut buf = self.coll.lock();
        if self.direct.is_active_low() == active_low {
            return Ok(());
        }
        let pending = if buf.recording {
            let (known, high) = buf.pending(self.direct.pin());
            known.then(|| self.direct.physical(high))
        } else {
            None
        };
        let logical = match pending {
            Some(logical) => logical,
            None => self.direct.get_state()?,
        };
        self.direct.store_active_low(active_low);
        if self.direct.check_direction()? == GpioDirection::Output {
            if buf.recording {
                self.record(&mut buf, logical);
            } else {
                self.direct.set_state(logical)?;
            }
        }
        Ok(())
    }

    fn is_active_low(&self) -> bool {
        self.direct.is_active_low()
    }
}

impl PinInCollection for CollectionPin<'_> {
    fn set_future_state(&self, state: bool) -> Result<()> {
        let mut buf = self.coll.lock();
        self.record(&mut buf, state);
        Ok(())
    }

    fn get_pending_state(&self) -> Result<(bool, bool)> {
        let buf = self.coll.lock();
        let (known, high) = buf.pending(self.direct.pin());
        Ok((known, self.direct.physical(high)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simregs::SimulatedBanks;

    fn setup() -> (SimulatedBanks, DirectPinCollection) {
        let banks = SimulatedBanks::new();
        let coll = DirectPinCollection::new(Arc::new(banks.bank_map()));
        (banks, coll)
    }

    fn out(n: u32) -> GpioPin {
        GpioPin::new(n).unwrap()
    }

    #[test]
    fn test_masks_stay_exclusive() {
        let (banks, coll) = setup();
        let p = coll.new_pin(out(5), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        p.set_state(true).unwrap();
        assert_eq!(coll.pending_masks(0), Some((1 << 5, 0)));
        p.set_state(false).unwrap();
        assert_eq!(coll.pending_masks(0), Some((0, 1 << 5)));
        assert_eq!(coll.pending_masks(4), None);
    }

    #[test]
    fn test_begin_is_not_reentrant() {
        let (banks, coll) = setup();
        let p = coll.new_pin(out(1), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        p.set_state(true).unwrap();
        coll.begin_transaction();
        assert!(coll.is_recording());
        assert_eq!(p.get_pending_state().unwrap(), (true, true));
    }

    #[test]
    fn test_commit_touches_only_dirty_banks() {
        let (banks, coll) = setup();
        let a = coll.new_pin(out(3), GpioDirection::Output, &banks).unwrap();
        let b = coll.new_pin(out(9), GpioDirection::Output, &banks).unwrap();
        let c = coll.new_pin(out(64), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        a.set_state(true).unwrap();
        b.set_state(true).unwrap();
        c.set_state(false).unwrap();
        assert_eq!(coll.commit_transaction().unwrap(), 2);
        assert_eq!(
            banks.page(0).unwrap().write_log(),
            vec![(reg::SET_DATA_OUT, (1 << 3) | (1 << 9))]
        );
        assert_eq!(
            banks.page(2).unwrap().write_log(),
            vec![(reg::CLEAR_DATA_OUT, 1)]
        );
        assert!(banks.page(1).unwrap().write_log().is_empty());
        assert!(!coll.is_recording());
        assert_eq!(coll.pending_masks(0), Some((0, 0)));
    }

    #[test]
    fn test_discard_leaves_hardware_alone() {
        let (banks, coll) = setup();
        let p = coll.new_pin(out(40), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        p.set_state(true).unwrap();
        coll.discard_transaction();
        assert!(!coll.is_recording());
        assert!(!p.get_pending_state().unwrap().0);
        assert_eq!(coll.commit_transaction().unwrap(), 0);
        assert!(banks.page(1).unwrap().write_log().is_empty());
    }

    #[test]
    fn test_active_low_while_recording() {
        let (banks, coll) = setup();
        let p = coll.new_pin(out(7), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        p.set_state(true).unwrap();
        p.set_active_low(true).unwrap();
        // pending logical value survives the flip, physical level inverted
        assert_eq!(p.get_pending_state().unwrap(), (true, true));
        assert_eq!(coll.pending_masks(0), Some((0, 1 << 7)));
        assert!(banks.page(0).unwrap().write_log().is_empty());
        coll.commit_transaction().unwrap();
        assert!(p.get_state().unwrap());
    }

    #[test]
    fn test_failed_commit_resets_buffer() {
        let (banks, coll) = setup();
        let p = coll.new_pin(out(8), GpioDirection::Output, &banks).unwrap();
        coll.begin_transaction();
        p.set_state(true).unwrap();
        coll.bank_map().close();
        assert!(coll.commit_transaction().is_err());
        assert!(!coll.is_recording());
        assert_eq!(coll.pending_masks(0), Some((0, 0)));
    }
}
