//! Transaction tests for DirectPinCollection
//!
//! These tests run the collection against simulated register banks, so no
//! hardware is required.

use bbhw_gpio::registers::{CLEAR_DATA_OUT, SET_DATA_OUT};
use bbhw_gpio::{
    CollectionPin, DirectPinCollection, GpioControllablePin, GpioDirection, GpioPin,
    PinInCollection, SimulatedBanks,
};
use std::sync::Arc;

fn setup() -> (SimulatedBanks, DirectPinCollection) {
    let _ = env_logger::builder().is_test(true).try_init();
    let banks = SimulatedBanks::new();
    let coll = DirectPinCollection::new(Arc::new(banks.bank_map()));
    (banks, coll)
}

fn output<'c>(banks: &SimulatedBanks, coll: &'c DirectPinCollection, n: u32) -> CollectionPin<'c> {
    coll.new_pin(GpioPin::new(n).unwrap(), GpioDirection::Output, banks)
        .unwrap()
}

#[test]
fn test_commit_is_atomic() {
    let (banks, coll) = setup();
    let p1 = output(&banks, &coll, 3); // bank 0, bit 3
    let p2 = output(&banks, &coll, 9); // bank 0, bit 9
    p2.set_state(true).unwrap();
    banks.page(0).unwrap().clear_write_log();

    coll.begin_transaction();
    p1.set_state(true).unwrap();
    p2.set_state(false).unwrap();

    // Nothing visible before commit
    assert!(!p1.get_state().unwrap());
    assert!(p2.get_state().unwrap());
    assert!(banks.page(0).unwrap().write_log().is_empty());

    assert_eq!(coll.commit_transaction().unwrap(), 2);
    assert!(p1.get_state().unwrap());
    assert!(!p2.get_state().unwrap());

    // One write per register, each carrying every bit of the bank
    assert_eq!(
        banks.page(0).unwrap().write_log(),
        vec![(CLEAR_DATA_OUT, 1 << 9), (SET_DATA_OUT, 1 << 3)]
    );
}

#[test]
fn test_pending_state_query() {
    let (banks, coll) = setup();
    let p1 = output(&banks, &coll, 3);
    let p3 = output(&banks, &coll, 12);

    coll.begin_transaction();
    p1.set_state(true).unwrap();
    assert_eq!(p1.get_pending_state().unwrap(), (true, true));
    assert!(!p3.get_pending_state().unwrap().0);

    p1.set_state(false).unwrap();
    assert_eq!(p1.get_pending_state().unwrap(), (true, false));

    coll.commit_transaction().unwrap();
    assert!(!p1.get_pending_state().unwrap().0);
}

#[test]
fn test_pending_state_with_active_low() {
    let (banks, coll) = setup();
    let p = output(&banks, &coll, 20);
    p.set_active_low(true).unwrap();

    coll.begin_transaction();
    p.set_state(true).unwrap();
    // Logical high is a physical low: recorded in the clear mask
    assert_eq!(coll.pending_masks(0), Some((0, 1 << 20)));
    assert_eq!(p.get_pending_state().unwrap(), (true, true));
    coll.commit_transaction().unwrap();
    assert!(p.get_state().unwrap());
}

#[test]
fn test_banks_commit_independently() {
    let (banks, coll) = setup();
    let pins: Vec<_> = [0u32, 31, 32, 63, 64, 95, 96, 127]
        .iter()
        .map(|&n| output(&banks, &coll, n))
        .collect();

    coll.begin_transaction();
    for pin in &pins {
        pin.set_state(true).unwrap();
    }
    assert_eq!(coll.commit_transaction().unwrap(), 4);
    for bank in 0..4 {
        assert_eq!(
            banks.page(bank).unwrap().write_log(),
            vec![(SET_DATA_OUT, (1 << 31) | 1)],
            "bank {}",
            bank
        );
    }
    assert!(pins.iter().all(|p| p.get_state().unwrap()));
}

#[test]
fn test_future_state_outside_transaction() {
    let (banks, coll) = setup();
    let p = output(&banks, &coll, 40);

    // Recorded even though the collection is idle
    p.set_future_state(true).unwrap();
    assert!(!coll.is_recording());
    assert!(!p.get_state().unwrap());
    assert_eq!(p.get_pending_state().unwrap(), (true, true));

    coll.commit_transaction().unwrap();
    assert!(p.get_state().unwrap());
}

#[test]
fn test_immediate_write_bypasses_recording() {
    let (banks, coll) = setup();
    let p = output(&banks, &coll, 50);

    coll.begin_transaction();
    p.set_state_immediate(true).unwrap();
    assert!(p.get_state().unwrap());
    assert!(!p.get_pending_state().unwrap().0);
    assert_eq!(coll.commit_transaction().unwrap(), 0);
}

#[test]
fn test_concurrent_recording() {
    let (banks, coll) = setup();
    let pins: Vec<_> = (0..16u32).map(|n| output(&banks, &coll, n)).collect();

    coll.begin_transaction();
    std::thread::scope(|s| {
        for pin in &pins {
            s.spawn(move || pin.set_state(true).unwrap());
        }
    });
    assert_eq!(coll.pending_masks(0), Some((0xFFFF, 0)));
    assert_eq!(coll.commit_transaction().unwrap(), 1);
    assert_eq!(
        banks.page(0).unwrap().write_log(),
        vec![(SET_DATA_OUT, 0xFFFF)]
    );
}
