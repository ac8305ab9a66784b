//! Stop-the-world mark-sweep collection.
//!
//! Marking walks an explicit worklist from the root set through instance
//! fields and reference-array elements, setting each mark bit once. The sweep
//! then frees every unmarked slot, returns empty blocks and clears the marks
//! of the survivors. Objects never move, so handles held by roots stay valid.

use crate::heap::Heap;
use core_types::ObjectRef;
use std::time::Instant;

/// Anything that can enumerate GC roots.
pub trait RootSet {
    /// Calls `f` with every root reference.
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef));
}

impl RootSet for [ObjectRef] {
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef)) {
        self.iter().for_each(|r| f(*r));
    }
}

impl RootSet for Vec<ObjectRef> {
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef)) {
        self.as_slice().for_each_root(f);
    }
}

impl<T: RootSet + ?Sized> RootSet for &T {
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef)) {
        (**self).for_each_root(f);
    }
}

impl<A: RootSet, B: RootSet> RootSet for (A, B) {
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef)) {
        self.0.for_each_root(f);
        self.1.for_each_root(f);
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Objects found reachable
    pub marked: usize,
    /// Objects freed
    pub reclaimed: usize,
    /// Bytes freed
    pub reclaimed_bytes: usize,
    /// Blocks returned
    pub released_blocks: usize,
}

impl<C: Clone> Heap<C> {
    /// Collects every object not reachable from `roots`.
    ///
    /// The caller guarantees no other thread touches the heap until this
    /// returns.
    pub fn collect(&mut self, roots: &dyn RootSet) -> CollectionSummary {
        let start = Instant::now();
        let marked = self.mark(roots);
        let mut summary = self.sweep();
        summary.marked = marked;

        let pause = start.elapsed();
        self.stats.collections += 1;
        self.stats.objects_reclaimed += summary.reclaimed as u64;
        self.stats.bytes_reclaimed += summary.reclaimed_bytes as u64;
        self.stats.last_pause = pause;
        log::debug!(
            "gc #{}: {} live, {} reclaimed ({} bytes), {} blocks released, {:?}",
            self.stats.collections,
            summary.marked,
            summary.reclaimed,
            summary.reclaimed_bytes,
            summary.released_blocks,
            pause
        );
        summary
    }

    fn mark(&mut self, roots: &dyn RootSet) -> usize {
        let mut worklist = Vec::new();
        let mut marked = 0;
        roots.for_each_root(&mut |r| {
            match self.slots.get_mut(r.index()).and_then(Option::as_mut) {
                Some(object) if !object.marked => {
                    object.marked = true;
                    marked += 1;
                    worklist.push(r);
                }
                Some(_) => {}
                None => log::warn!("root {} does not name a live object", r),
            }
        });

        let mut children = Vec::new();
        while let Some(r) = worklist.pop() {
            if let Some(object) = self.slots[r.index()].as_ref() {
                object.body.for_each_reference(|child| children.push(child));
            }
            for child in children.drain(..) {
                if let Some(object) = self.slots.get_mut(child.index()).and_then(Option::as_mut) {
                    if !object.marked {
                        object.marked = true;
                        marked += 1;
                        worklist.push(child);
                    }
                }
            }
        }
        marked
    }

    fn sweep(&mut self) -> CollectionSummary {
        let mut summary = CollectionSummary::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let survives = match slot {
                Some(object) if object.marked => {
                    object.marked = false;
                    object.age = object.age.saturating_add(1);
                    true
                }
                Some(_) => false,
                None => continue,
            };
            if !survives {
                if let Some(object) = slot.take() {
                    self.blocks[object.block].live -= object.size;
                    summary.reclaimed += 1;
                    summary.reclaimed_bytes += object.size;
                    self.free.push(index as u32);
                }
            }
        }
        self.used -= summary.reclaimed_bytes;
        self.live_objects -= summary.reclaimed;

        for index in 0..self.blocks.len() {
            let block = &mut self.blocks[index];
            if block.released {
                continue;
            }
            // Space is not compacted; the bump pointer falls back to the
            // live byte count.
            block.used = block.live;
            let releasable = block.live == 0
                && (block.dedicated || self.committed - block.capacity >= self.config.initial_size);
            if releasable && self.current != Some(index) {
                block.released = true;
                self.committed -= block.capacity;
                summary.released_blocks += 1;
            }
        }
        summary
    }
}
