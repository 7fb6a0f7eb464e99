use crate as gr;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

#[test]
fn basic_test() {
    let mut reg = gr::Registry::new();
    let handle = reg.insert("Hola Granizo");

    assert_eq!(*reg.get(handle).unwrap(), "Hola Granizo");
    assert_eq!(reg.len(), 1);
    assert!(reg.is_consistent());
}

#[test]
fn handles_and_slots_stay_aligned() {
    let mut reg = gr::Registry::new();
    let handles: Vec<_> = (0..8).map(|i| reg.insert(i)).collect();

    assert_eq!(reg.handles().len(), reg.slots().len());
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(reg.handles()[i], *h);
        assert_eq!(reg.slots()[i], i);
        assert_eq!(reg.index_of(*h).unwrap(), i);
    }
}

#[test]
fn removal_renumbers_later_handles() {
    let mut reg = gr::Registry::new();
    let handles: Vec<_> = (0..5).map(|i| reg.insert(i * 10)).collect();

    let removed = reg.remove(handles[2]).unwrap();
    assert_eq!(removed, 20);

    // before the removed index nothing moved
    assert_eq!(reg.index_of(handles[0]).unwrap(), 0);
    assert_eq!(reg.index_of(handles[1]).unwrap(), 1);
    // after it everything moved down by exactly one
    assert_eq!(reg.index_of(handles[3]).unwrap(), 2);
    assert_eq!(reg.index_of(handles[4]).unwrap(), 3);

    assert_eq!(*reg.get(handles[3]).unwrap(), 30);
    assert_eq!(*reg.get(handles[4]).unwrap(), 40);
    assert!(reg.is_consistent());
}

#[test]
fn null_handle_is_rejected() {
    let mut reg: gr::Registry<u32> = gr::Registry::new();
    reg.insert(1);

    let null = gr::Handle::null();
    assert!(null.is_null());
    assert_eq!(reg.get(null).unwrap_err(), gr::RegistryError::NullHandle);
    assert_eq!(reg.remove(null).unwrap_err(), gr::RegistryError::NullHandle);
    assert_eq!(reg.len(), 1);
}

#[test]
fn stale_handle_is_rejected() {
    let mut reg = gr::Registry::new();
    let a = reg.insert("a");
    reg.remove(a).unwrap();

    // The id gets recycled, but the old handle must not alias the new value
    let b = reg.insert("b");
    assert_eq!(a.get_raw_id(), b.get_raw_id());
    assert_ne!(a, b);

    match reg.get(a) {
        Err(gr::RegistryError::StaleHandle { .. }) => {}
        other => panic!("Expected a stale handle error, got {:?}", other),
    }
    assert_eq!(*reg.get(b).unwrap(), "b");

    // removing twice is an error and changes nothing
    assert!(reg.remove(a).is_err());
    assert_eq!(reg.len(), 1);
}

#[test]
fn handle_from_another_registry_is_out_of_range() {
    let mut big = gr::Registry::new();
    let mut small = gr::Registry::new();
    small.insert(0u8);
    let mut last = big.insert(0u8);
    for _ in 0..4 {
        last = big.insert(0u8);
    }

    match small.get(last) {
        Err(gr::RegistryError::OutOfRange { id: 4, cells: 1 }) => {}
        other => panic!("Expected out of range, got {:?}", other),
    }
}

#[test]
fn failed_construction_rolls_back() {
    let mut reg: gr::Registry<u32> = gr::Registry::new();
    reg.insert(7);

    let res: Result<_, &str> = reg.try_insert(|| Err("shader failed to link"));
    assert!(res.is_err());
    assert_eq!(reg.len(), 1);
    assert!(reg.is_consistent());

    let ok: Result<_, &str> = reg.try_insert(|| Ok(8));
    assert_eq!(*reg.get(ok.unwrap()).unwrap(), 8);
}

#[test]
fn take_nulls_the_handle() {
    let mut reg = gr::Registry::new();
    let mut handle = reg.insert(());

    let old = handle.take();
    assert!(handle.is_null());
    assert!(reg.contains(old));
}

struct DropTracker(usize, Arc<Mutex<Vec<usize>>>);

impl Drop for DropTracker {
    fn drop(&mut self) {
        self.1.lock().unwrap().push(self.0);
    }
}

// clear drops newest first so later resources can depend on earlier ones
#[test]
fn clear_drops_in_reverse_order() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let mut reg = gr::Registry::new();
    for i in 0..4 {
        reg.insert(DropTracker(i, dropped.clone()));
    }

    reg.clear();
    assert!(reg.is_empty());
    assert_eq!(*dropped.lock().unwrap(), vec![3, 2, 1, 0]);
}

// Create a pile of resources and release a random subset in a random
// order. After every release the dense arrays must line up, the
// survivors must be renumbered exactly, and every survivor must still
// resolve to the value it was created with.
#[test]
fn random_release_order_keeps_renumbering_exact() {
    let mut rng = StdRng::seed_from_u64(0x6772_616e_697a_6f);

    for _round in 0..32 {
        let count = rng.gen_range(1..64);
        let mut reg = gr::Registry::new();
        let mut live: Vec<(gr::Handle<usize>, usize)> =
            (0..count).map(|v| (reg.insert(v), v)).collect();

        let mut order: Vec<usize> = (0..count).collect();
        order.shuffle(&mut rng);
        let release_count = rng.gen_range(0..=count);

        for victim in order.into_iter().take(release_count) {
            let pos = live.iter().position(|(_, v)| *v == victim).unwrap();
            let (handle, _) = live[pos];
            let k = reg.index_of(handle).unwrap();

            let before: Vec<usize> = live
                .iter()
                .map(|(h, _)| reg.index_of(*h).unwrap())
                .collect();

            assert_eq!(reg.remove(handle).unwrap(), victim);
            live.remove(pos);

            for (i, (h, v)) in live.iter().enumerate() {
                let old = before[if i < pos { i } else { i + 1 }];
                let new = reg.index_of(*h).unwrap();
                if old > k {
                    assert_eq!(new, old - 1);
                } else {
                    assert_eq!(new, old);
                }
                assert_eq!(*reg.get(*h).unwrap(), *v);
            }

            assert!(reg.get(handle).is_err());
            assert_eq!(reg.handles().len(), reg.slots().len());
            assert!(reg.is_consistent());
        }

        // no two survivors share a position
        let mut positions: Vec<usize> = live
            .iter()
            .map(|(h, _)| reg.index_of(*h).unwrap())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        assert_eq!(positions.len(), live.len());
    }
}
