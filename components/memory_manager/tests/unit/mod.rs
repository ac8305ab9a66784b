//! Unit tests for the heap, collector and safe-point coordinator

use core_types::{ObjectRef, Value, VmError};
use memory_manager::{
    Allocation, ArrayData, ElementKind, Heap, HeapConfig, ObjectBody, SafepointCoordinator,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn small_heap() -> Heap<u32> {
    Heap::new(
        HeapConfig::default()
            .with_block_size(1024)
            .with_initial_size(2048)
            .with_max_size(8192),
    )
}

fn instance(class: u32, fields: usize) -> Allocation<u32> {
    Allocation::Instance {
        class,
        fields: vec![Value::Null; fields],
    }
}

fn fill_budget(heap: &mut Heap<u32>) -> Vec<ObjectRef> {
    let mut refs = Vec::new();
    while let Ok(r) = heap.try_allocate(instance(0, 4)) {
        refs.push(r);
    }
    refs
}

// ============================================================================
// Allocation and growth
// ============================================================================

#[test]
fn test_try_allocate_fails_at_budget() {
    let mut heap = small_heap();
    let refs = fill_budget(&mut heap);
    assert!(!refs.is_empty());
    assert_eq!(heap.committed_bytes(), 2048);
    assert_eq!(heap.block_count(), 2);
}

#[test]
fn test_grow_by_whole_blocks() {
    let mut heap = small_heap();
    fill_budget(&mut heap);
    let request = instance(0, 4);
    let r = heap.grow_and_allocate(request).unwrap();
    assert!(heap.get(r).is_some());
    assert_eq!(heap.budget(), 3072);
    assert_eq!(heap.committed_bytes(), 3072);
}

#[test]
fn test_out_of_memory_at_max() {
    let mut heap = small_heap();
    loop {
        let request = match heap.try_allocate(instance(0, 4)) {
            Ok(_) => continue,
            Err(request) => request,
        };
        match heap.grow_and_allocate(request) {
            Ok(_) => continue,
            Err(e) => {
                assert!(matches!(e, VmError::OutOfMemory(_)));
                break;
            }
        }
    }
    assert!(heap.committed_bytes() <= 8192);
    assert_eq!(heap.budget(), 8192);
}

#[test]
fn test_huge_array_is_out_of_memory_without_allocating() {
    let mut heap = small_heap();
    let request = Allocation::array(1, ElementKind::Long, i32::MAX).unwrap();
    let request = heap.try_allocate(request).unwrap_err();
    let err = heap.grow_and_allocate(request).unwrap_err();
    assert!(matches!(err, VmError::OutOfMemory(_)));
    assert_eq!(heap.object_count(), 0);
}

#[test]
fn test_negative_array_length() {
    assert!(Allocation::array(1u32, ElementKind::Int, -1).is_err());
    assert!(Allocation::array(1u32, ElementKind::Int, 0).is_ok());
}

#[test]
fn test_oversized_object_gets_dedicated_block() {
    let mut heap = small_heap();
    let big = heap
        .try_allocate(Allocation::array(2, ElementKind::Int, 400).unwrap())
        .unwrap();
    assert_eq!(heap.array_length(big).unwrap(), 400);
    let size = heap.get(big).unwrap().size();
    assert!(size > 1024);
    assert_eq!(heap.committed_bytes(), size);

    let summary = heap.collect(&Vec::<ObjectRef>::new());
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.released_blocks, 1);
    assert_eq!(heap.committed_bytes(), 0);
}

#[test]
fn test_allocate_collects_before_growing() {
    let mut heap = small_heap();
    let garbage = fill_budget(&mut heap);
    assert!(!garbage.is_empty());
    let keep = heap.allocate(instance(3, 1), &Vec::<ObjectRef>::new()).unwrap();
    assert_eq!(heap.stats().collections, 1);
    assert_eq!(heap.budget(), 2048);
    assert_eq!(heap.object_count(), 1);
    assert_eq!(heap.class_of(keep).unwrap(), 3);
}

#[test]
fn test_freed_slots_are_reused() {
    let mut heap = small_heap();
    let a = heap.try_allocate(instance(0, 0)).unwrap();
    let b = heap.try_allocate(instance(0, 0)).unwrap();
    heap.collect(&vec![b]);
    let c = heap.try_allocate(instance(0, 0)).unwrap();
    assert_eq!(c, a);
}

#[test]
fn test_copy_array_overlapping() {
    let mut heap = small_heap();
    let arr = heap
        .try_allocate(Allocation::Body {
            class: 0,
            body: ObjectBody::Array {
                kind: ElementKind::Int,
                data: ArrayData::Int(vec![1, 2, 3, 4, 5]),
            },
        })
        .unwrap();
    assert!(heap.copy_array(arr, 0, arr, 1, 4).unwrap());
    assert_eq!(heap.array(arr).unwrap(), &ArrayData::Int(vec![1, 1, 2, 3, 4]));
    assert!(!heap.copy_array(arr, 3, arr, 0, 3).unwrap());
}

#[test]
fn test_copy_array_type_mismatch() {
    let mut heap = small_heap();
    let ints = heap
        .try_allocate(Allocation::array(0, ElementKind::Int, 2).unwrap())
        .unwrap();
    let longs = heap
        .try_allocate(Allocation::array(0, ElementKind::Long, 2).unwrap())
        .unwrap();
    assert!(!heap.copy_array(ints, 0, longs, 0, 1).unwrap());
}

// ============================================================================
// Mark-sweep
// ============================================================================

#[test]
fn test_reachable_through_reference_array() {
    let mut heap = small_heap();
    let target = heap.try_allocate(instance(0, 0)).unwrap();
    let arr = heap
        .try_allocate(Allocation::array(1, ElementKind::Reference, 3).unwrap())
        .unwrap();
    assert!(heap.array_mut(arr).unwrap().store(2, Value::Reference(target)));
    let summary = heap.collect(&vec![arr]);
    assert_eq!(summary.marked, 2);
    assert_eq!(summary.reclaimed, 0);
}

#[test]
fn test_long_chain_marks_iteratively() {
    let mut heap: Heap<u32> = Heap::new(HeapConfig::default());
    let mut head = None;
    for _ in 0..100_000 {
        let node = heap
            .try_allocate(Allocation::Instance {
                class: 0,
                fields: vec![Value::from_object(head)],
            })
            .unwrap();
        head = Some(node);
    }
    let garbage = heap.try_allocate(instance(0, 0)).unwrap();
    let head = head.unwrap();
    let summary = heap.collect(&vec![head]);
    assert_eq!(summary.marked, 100_000);
    assert_eq!(summary.reclaimed, 1);
    assert!(heap.get(garbage).is_none());
}

#[test]
fn test_repeated_cycles_reclaim_everything_unreachable() {
    let mut heap = small_heap();
    let root = heap.try_allocate(instance(9, 1)).unwrap();
    for round in 0..5 {
        let a = heap.try_allocate(instance(round, 1)).unwrap();
        let b = heap.try_allocate(instance(round, 1)).unwrap();
        heap.set_field(a, 0, Value::Reference(b)).unwrap();
        heap.set_field(b, 0, Value::Reference(a)).unwrap();
        heap.set_field(root, 0, Value::Reference(a)).unwrap();
        let summary = heap.collect(&vec![root]);
        assert_eq!(summary.marked, 3);
        assert_eq!(heap.object_count(), 3);
    }
    heap.set_field(root, 0, Value::Null).unwrap();
    heap.collect(&vec![root]);
    assert_eq!(heap.object_count(), 1);
    let stats = heap.stats();
    assert_eq!(stats.collections, 6);
    assert_eq!(stats.objects_reclaimed, 10);
    assert_eq!(stats.live_objects, 1);
}

#[test]
fn test_monitor_state_survives_collection() {
    let mut heap = small_heap();
    let obj = heap.try_allocate(instance(0, 0)).unwrap();
    assert!(heap.monitor_mut(obj).unwrap().try_enter(7));
    let hash = heap.identity_hash(obj).unwrap();
    heap.collect(&vec![obj]);
    assert_eq!(heap.monitor_mut(obj).unwrap().owner(), Some(7));
    assert_eq!(heap.identity_hash(obj).unwrap(), hash);
}

#[test]
fn test_dangling_handle_is_an_error() {
    let mut heap = small_heap();
    let obj = heap.try_allocate(instance(0, 1)).unwrap();
    heap.collect(&Vec::<ObjectRef>::new());
    assert!(matches!(heap.get_field(obj, 0), Err(VmError::Internal(_))));
}

// ============================================================================
// Safe points
// ============================================================================

#[test]
fn test_stop_the_world_gathers_all_roots() {
    let sp = Arc::new(SafepointCoordinator::new());
    let done = Arc::new(AtomicBool::new(false));
    sp.register(0);
    for id in 1..=3 {
        sp.register(id);
    }

    let workers: Vec<_> = (1..=3u64)
        .map(|id| {
            let sp = sp.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    sp.poll(|| vec![ObjectRef::from_index(id as usize)]);
                    thread::yield_now();
                }
                sp.unregister(id);
            })
        })
        .collect();

    {
        let stw = sp.stop_the_world(0).unwrap();
        let mut roots = stw.roots().to_vec();
        roots.sort();
        assert_eq!(
            roots,
            vec![
                ObjectRef::from_index(1),
                ObjectRef::from_index(2),
                ObjectRef::from_index(3)
            ]
        );
    }
    done.store(true, Ordering::SeqCst);
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(sp.thread_count(), 1);
    assert_eq!(sp.epoch(), 1);
}

#[test]
fn test_competing_collectors_take_turns() {
    let sp = Arc::new(SafepointCoordinator::new());
    let collections = Arc::new(AtomicUsize::new(0));
    sp.register(1);
    sp.register(2);

    let workers: Vec<_> = (1..=2u64)
        .map(|id| {
            let sp = sp.clone();
            let collections = collections.clone();
            thread::spawn(move || {
                let mut mine = 0;
                while mine < 10 {
                    match sp.stop_the_world(id) {
                        Some(_stw) => {
                            mine += 1;
                            collections.fetch_add(1, Ordering::SeqCst);
                        }
                        None => sp.park(Vec::new()),
                    }
                }
                sp.unregister(id);
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(collections.load(Ordering::SeqCst), 20);
    assert_eq!(sp.epoch(), 20);
}

#[test]
fn test_registration_waits_for_collection() {
    let sp = Arc::new(SafepointCoordinator::new());
    sp.register(1);
    let stw = sp.stop_the_world(1).unwrap();
    let late = {
        let sp = sp.clone();
        thread::spawn(move || {
            sp.register(2);
            sp.epoch()
        })
    };
    thread::sleep(std::time::Duration::from_millis(20));
    drop(stw);
    assert_eq!(late.join().unwrap(), 1);
}
