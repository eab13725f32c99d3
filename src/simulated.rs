//! In-memory pins for testing code that drives GPIOs, without hardware.
//!
//! A [`SimulatedPin`] can be wired to others: whenever an output changes
//! level, every connected input sees the new level immediately.

use crate::error::{Error, Result};
use crate::gpio::{GpioCollection, GpioControllablePin, GpioDirection, PinInCollection};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug)]
struct SimState {
    name: String,
    direction: GpioDirection,
    /// Physical level.
    level: bool,
    active_low: bool,
    connections: Vec<Weak<Mutex<SimState>>>,
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named, in-memory GPIO. Clones share the same pin.
#[derive(Debug, Clone)]
pub struct SimulatedPin {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPin {
    pub fn new(name: impl Into<String>, direction: GpioDirection) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                name: name.into(),
                direction,
                level: false,
                active_low: false,
                connections: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Wires this pin to `input`: level changes of this pin while it is an
    /// output are injected into `input`. The wire does not keep `input` alive.
    pub fn connect_to(&self, input: &SimulatedPin) {
        if Arc::ptr_eq(&self.state, &input.state) {
            warn!("Ignoring wire from {} to itself", self.name());
            return;
        }
        let target = Arc::downgrade(&input.state);
        let input_name = input.name();
        let mut state = self.lock();
        debug!("Wiring {} -> {}", state.name, input_name);
        state.connections.push(target);
    }

    pub fn set_direction(&self, direction: GpioDirection) -> Result<()> {
        let mut state = self.lock();
        debug!("{} direction -> {:?}", state.name, direction);
        state.direction = direction;
        Ok(())
    }

    /// Drives the physical level seen by this input, as an external source would.
    pub fn inject_input(&self, high: bool) -> Result<()> {
        let mut state = self.lock();
        if state.direction != GpioDirection::Input {
            return Err(Error::InvalidOperation(format!(
                "{} is an output, cannot inject an input level",
                state.name
            )));
        }
        trace!("{} input <- {}", state.name, high);
        state.level = high;
        Ok(())
    }

    /// Stores a new polarity without rewriting the level.
    fn store_active_low(&self, active_low: bool) {
        self.lock().active_low = active_low;
    }

    /// Sets the physical level and pushes it down every live wire.
    fn drive(&self, mut state: MutexGuard<'_, SimState>, high: bool) {
        state.level = high;
        trace!("{} level -> {}", state.name, high);
        state.connections.retain(|w| w.strong_count() > 0);
        let targets: Vec<_> = state.connections.iter().filter_map(Weak::upgrade).collect();
        let source = state.name.clone();
        // Release the source before locking any target.
        drop(state);
        for target in targets {
            let mut t = lock_state(&target);
            if t.direction == GpioDirection::Input {
                t.level = high;
            } else {
                warn!("{} drives {} which is an output, level not injected", source, t.name);
            }
        }
    }
}

impl GpioControllablePin for SimulatedPin {
    fn set_state(&self, state: bool) -> Result<()> {
        let guard = self.lock();
        if guard.direction != GpioDirection::Output {
            return Err(Error::InvalidOperation(format!(
                "{} is an input, cannot set its state",
                guard.name
            )));
        }
        let high = state != guard.active_low;
        self.drive(guard, high);
        Ok(())
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.set_state(state)
    }

    fn get_state(&self) -> Result<bool> {
        let state = self.lock();
        Ok(state.level != state.active_low)
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        Ok(self.lock().direction)
    }

    fn set_active_low(&self, active_low: bool) -> Result<()> {
        let mut state = self.lock();
        if state.active_low == active_low {
            return Ok(());
        }
        let logical = state.level != state.active_low;
        state.active_low = active_low;
        if state.direction == GpioDirection::Output {
            self.drive(state, logical != active_low);
        }
        Ok(())
    }

    fn is_active_low(&self) -> bool {
        self.lock().active_low
    }
}

#[derive(Debug, Default)]
struct SimTransaction {
    recording: bool,
    /// Pending logical states, keyed by pin id so commit order is creation order.
    pending: BTreeMap<usize, (SimulatedPin, bool)>,
    next_id: usize,
}

/// Transaction state machine over simulated pins.
#[derive(Debug, Default)]
pub struct SimulatedCollection {
    inner: Mutex<SimTransaction>,
}

impl SimulatedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimTransaction> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new_pin(
        &self,
        name: impl Into<String>,
        direction: GpioDirection,
    ) -> SimulatedCollectionPin<'_> {
        self.adopt(SimulatedPin::new(name, direction))
    }

    /// Adds an existing pin (and all its wiring) to the collection.
    pub fn adopt(&self, pin: SimulatedPin) -> SimulatedCollectionPin<'_> {
        let mut txn = self.lock();
        let id = txn.next_id;
        txn.next_id += 1;
        SimulatedCollectionPin {
            coll: self,
            pin,
            id,
        }
    }
}

impl GpioCollection for SimulatedCollection {
    fn begin_transaction(&self) {
        self.lock().recording = true;
    }

    fn commit_transaction(&self) -> Result<()> {
        let mut txn = self.lock();
        let pending = std::mem::take(&mut txn.pending);
        txn.recording = false;
        debug!("Applying {} simulated pending states", pending.len());
        // Every pending pin is applied; the first failure is reported.
        let mut outcome = Ok(());
        for (pin, state) in pending.into_values() {
            if let Err(e) = pin.set_state_immediate(state) {
                warn!("Pending state for {} not applied: {}", pin.name(), e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    fn is_recording(&self) -> bool {
        self.lock().recording
    }
}

/// A [`SimulatedPin`] that belongs to a [`SimulatedCollection`].
#[derive(Debug)]
pub struct SimulatedCollectionPin<'c> {
    coll: &'c SimulatedCollection,
    pin: SimulatedPin,
    id: usize,
}

impl SimulatedCollectionPin<'_> {
    /// The underlying pin, for wiring and input injection.
    pub fn pin(&self) -> &SimulatedPin {
        &self.pin
    }

    fn record(&self, txn: &mut SimTransaction, state: bool) -> Result<()> {
        if self.pin.check_direction()? != GpioDirection::Output {
            return Err(Error::InvalidOperation(format!(
                "{} is an input, cannot record a state for it",
                self.pin.name()
            )));
        }
        txn.pending.insert(self.id, (self.pin.clone(), state));
        Ok(())
    }
}

impl GpioControllablePin for SimulatedCollectionPin<'_> {
    fn set_state(&self, state: bool) -> Result<()> {
        let mut txn = self.coll.lock();
        if txn.recording {
            self.record(&mut txn, state)
        } else {
            drop(txn);
            self.pin.set_state(state)
        }
    }

    fn set_state_immediate(&self, state: bool) -> Result<()> {
        self.pin.set_state(state)
    }

    fn get_state(&self) -> Result<bool> {
        self.pin.get_state()
    }

    fn check_direction(&self) -> Result<GpioDirection> {
        self.pin.check_direction()
    }

    fn set_active_low(&self, active_low: bool) -> Result<()> {
        let mut txn = self.coll.lock();
        if !txn.recording {
            drop(txn);
            return self.pin.set_active_low(active_low);
        }
        if self.pin.is_active_low() == active_low {
            return Ok(());
        }
        let logical = match txn.pending.get(&self.id) {
            Some((_, state)) => *state,
            None => self.pin.get_state()?,
        };
        self.pin.store_active_low(active_low);
        if self.pin.check_direction()? == GpioDirection::Output {
            txn.pending.insert(self.id, (self.pin.clone(), logical));
        }
        Ok(())
    }

    fn is_active_low(&self) -> bool {
        self.pin.is_active_low()
    }
}

impl PinInCollection for SimulatedCollectionPin<'_> {
    fn set_future_state(&self, state: bool) -> Result<()> {
        let mut txn = self.coll.lock();
        self.record(&mut txn, state)
    }

    fn get_pending_state(&self) -> Result<(bool, bool)> {
        Ok(match self.coll.lock().pending.get(&self.id) {
            Some((_, state)) => (true, *state),
            None => (false, false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_follows_output() {
        let a = SimulatedPin::new("A", GpioDirection::Output);
        let b = SimulatedPin::new("B", GpioDirection::Input);
        a.connect_to(&b);
        a.set_state(true).unwrap();
        assert!(b.get_state().unwrap());
        a.set_state(false).unwrap();
        assert!(!b.get_state().unwrap());
    }

    #[test]
    fn test_wire_carries_physical_level() {
        let a = SimulatedPin::new("A", GpioDirection::Output);
        let b = SimulatedPin::new("B", GpioDirection::Input);
        a.connect_to(&b);
        a.set_active_low(true).unwrap();
        a.set_state(true).unwrap();
        // A is logically high but physically low
        assert!(!b.get_state().unwrap());
    }

    #[test]
    fn test_set_on_input_is_rejected() {
        let b = SimulatedPin::new("B", GpioDirection::Input);
        assert!(matches!(b.set_state(true), Err(Error::InvalidOperation(_))));
        let a = SimulatedPin::new("A", GpioDirection::Output);
        assert!(matches!(a.inject_input(true), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_dropped_target_is_pruned() {
        let a = SimulatedPin::new("A", GpioDirection::Output);
        {
            let b = SimulatedPin::new("B", GpioDirection::Input);
            a.connect_to(&b);
        }
        a.set_state(true).unwrap();
        assert!(a.lock().connections.is_empty());
    }

    #[test]
    fn test_wiring_cycle_does_not_deadlock() {
        let a = SimulatedPin::new("A", GpioDirection::Output);
        let b = SimulatedPin::new("B", GpioDirection::Output);
        a.connect_to(&b);
        b.connect_to(&a);
        a.connect_to(&a);
        a.set_state(true).unwrap();
        // outputs are never overwritten through a wire
        assert!(!b.get_state().unwrap());
    }

    #[test]
    fn test_recording_on_input_is_rejected() {
        let coll = SimulatedCollection::new();
        let a_in = coll.new_pin("a_in", GpioDirection::Input);
        let b_out = coll.new_pin("b_out", GpioDirection::Output);

        coll.begin_transaction();
        assert!(matches!(a_in.set_state(true), Err(Error::InvalidOperation(_))));
        assert!(matches!(
            a_in.set_future_state(true),
            Err(Error::InvalidOperation(_))
        ));
        assert!(!a_in.get_pending_state().unwrap().0);
        b_out.set_state(true).unwrap();

        coll.commit_transaction().unwrap();
        assert!(b_out.get_state().unwrap());
    }

    #[test]
    fn test_commit_applies_every_pending_state() {
        let coll = SimulatedCollection::new();
        let a = coll.new_pin("a", GpioDirection::Output);
        let b = coll.new_pin("b", GpioDirection::Output);

        coll.begin_transaction();
        a.set_state(true).unwrap();
        b.set_state(true).unwrap();
        // a turns into an input before the commit
        a.pin().set_direction(GpioDirection::Input).unwrap();

        assert!(matches!(
            coll.commit_transaction(),
            Err(Error::InvalidOperation(_))
        ));
        assert!(b.get_state().unwrap());
        assert!(!coll.is_recording());
        assert!(!b.get_pending_state().unwrap().0);
    }

    #[test]
    fn test_collection_defers_until_commit() {
        let coll = SimulatedCollection::new();
        let f1 = coll.new_pin("f1", GpioDirection::Output);
        let f2 = coll.new_pin("f2", GpioDirection::Input);
        f1.pin().connect_to(f2.pin());

        f1.set_state(false).unwrap();
        assert!(!f1.get_state().unwrap());
        assert!(!f2.get_state().unwrap());

        coll.begin_transaction();
        f1.set_state(true).unwrap();
        assert!(!f1.get_state().unwrap());
        assert!(!f2.get_state().unwrap());
        assert_eq!(f1.get_pending_state().unwrap(), (true, true));
        assert!(!f2.get_pending_state().unwrap().0);

        coll.commit_transaction().unwrap();
        assert!(!coll.is_recording());
        assert!(f1.get_state().unwrap());
        assert!(f2.get_state().unwrap());
        assert!(!f1.get_pending_state().unwrap().0);
    }
}
