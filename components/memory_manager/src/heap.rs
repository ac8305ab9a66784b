//! Handle-indexed object heap.
//!
//! Objects live in an arena of slots addressed by [`ObjectRef`] handles;
//! freed slots go on a free list and are reused. Space is accounted by
//! bump-pointer into fixed-size blocks:
//! - objects that fit go into the current block, or any committed block
//!   with room left
//! - oversized objects get a dedicated block of their own size
//! - when the budget is exhausted the caller collects, then
//!   [`Heap::grow_and_allocate`] raises the budget by whole blocks up to the
//!   configured maximum
//!
//! The heap is generic over the class handle stored in each object header,
//! so it knows nothing about class loading.

use crate::gc::RootSet;
use crate::object::{
    array_bytes, instance_bytes, ArrayData, ElementKind, HeapObject, MonitorState, ObjectBody,
};
use core_types::{ObjectRef, Value, VmError, VmResult};
use std::time::Duration;

/// Default block size (256 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default initial heap budget (4 MiB)
pub const DEFAULT_INITIAL_SIZE: usize = 4 * 1024 * 1024;

/// Default maximum heap size (256 MiB)
pub const DEFAULT_MAX_SIZE: usize = 256 * 1024 * 1024;

/// Heap sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Size of a regular block in bytes
    pub block_size: usize,
    /// Budget before the first growth
    pub initial_size: usize,
    /// Hard limit on committed bytes
    pub max_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            initial_size: DEFAULT_INITIAL_SIZE,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl HeapConfig {
    /// Sets the block size.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes.max(64);
        self
    }

    /// Sets the initial budget.
    pub fn with_initial_size(mut self, bytes: usize) -> Self {
        self.initial_size = bytes;
        self
    }

    /// Sets the maximum heap size.
    pub fn with_max_size(mut self, bytes: usize) -> Self {
        self.max_size = bytes;
        self
    }
}

/// Collector statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
    /// Completed collections
    pub collections: u64,
    /// Objects reclaimed over all collections
    pub objects_reclaimed: u64,
    /// Bytes reclaimed over all collections
    pub bytes_reclaimed: u64,
    /// Bytes held by live objects
    pub used_bytes: usize,
    /// Bytes held by committed blocks
    pub committed_bytes: usize,
    /// Objects currently in the arena
    pub live_objects: usize,
    /// Duration of the most recent collection
    pub last_pause: Duration,
}

/// Array length rejected before allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeArraySize(pub i32);

/// An allocation request.
#[derive(Debug, Clone)]
pub enum Allocation<C> {
    /// Instance with its initial field values
    Instance {
        /// Class handle
        class: C,
        /// Field values in layout order
        fields: Vec<Value>,
    },
    /// Zero-filled array
    Array {
        /// Array class handle
        class: C,
        /// Element type
        kind: ElementKind,
        /// Element count
        length: usize,
    },
    /// Object with a ready-made body, for clones and string contents
    Body {
        /// Class handle
        class: C,
        /// Payload
        body: ObjectBody,
    },
}

impl<C> Allocation<C> {
    /// Array request, rejecting negative lengths.
    pub fn array(class: C, kind: ElementKind, length: i32) -> Result<Self, NegativeArraySize> {
        if length < 0 {
            return Err(NegativeArraySize(length));
        }
        Ok(Allocation::Array {
            class,
            kind,
            length: length as usize,
        })
    }

    /// Accounted size of the object this request creates.
    pub fn size(&self) -> usize {
        match self {
            Allocation::Instance { fields, .. } => instance_bytes(fields.len()),
            Allocation::Array { kind, length, .. } => array_bytes(*kind, *length),
            Allocation::Body { body, .. } => body.size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    pub(crate) capacity: usize,
    pub(crate) used: usize,
    pub(crate) live: usize,
    pub(crate) dedicated: bool,
    pub(crate) released: bool,
}

/// The object heap.
#[derive(Debug)]
pub struct Heap<C> {
    pub(crate) config: HeapConfig,
    pub(crate) slots: Vec<Option<HeapObject<C>>>,
    pub(crate) free: Vec<u32>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) current: Option<usize>,
    pub(crate) budget: usize,
    pub(crate) committed: usize,
    pub(crate) used: usize,
    pub(crate) live_objects: usize,
    pub(crate) stats: GcStats,
    hash_seed: u32,
}

impl<C: Clone> Heap<C> {
    /// Creates an empty heap.
    pub fn new(config: HeapConfig) -> Self {
        let budget = config.initial_size.min(config.max_size);
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            blocks: Vec::new(),
            current: None,
            budget,
            committed: 0,
            used: 0,
            live_objects: 0,
            stats: GcStats::default(),
            hash_seed: 0x9E37_79B9,
        }
    }

    /// Sizing in effect.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates within the current budget. The request is handed back when
    /// it does not fit, so the caller can collect and retry.
    pub fn try_allocate(&mut self, request: Allocation<C>) -> Result<ObjectRef, Allocation<C>> {
        let size = request.size();
        match self.reserve(size, self.budget) {
            Some(block) => Ok(self.place(request, size, block)),
            None => Err(request),
        }
    }

    /// Raises the budget by whole blocks, up to the maximum, until the
    /// request fits.
    pub fn grow_and_allocate(&mut self, request: Allocation<C>) -> VmResult<ObjectRef> {
        let size = request.size();
        let needed = if size > self.config.block_size {
            size
        } else {
            self.config.block_size
        };
        let target = self
            .committed
            .checked_add(needed)
            .filter(|t| *t <= self.config.max_size)
            .ok_or_else(|| {
                VmError::OutOfMemory(format!(
                    "cannot allocate {} bytes: {} of {} bytes committed",
                    size, self.committed, self.config.max_size
                ))
            })?;
        if target > self.budget {
            let blocks = (target - self.budget).div_ceil(self.config.block_size);
            let grown = self
                .budget
                .saturating_add(blocks.saturating_mul(self.config.block_size))
                .min(self.config.max_size);
            log::debug!("heap budget grows {} -> {} bytes", self.budget, grown);
            self.budget = grown;
        }
        match self.reserve(size, self.budget) {
            Some(block) => Ok(self.place(request, size, block)),
            None => Err(VmError::OutOfMemory(format!(
                "cannot allocate {} bytes",
                size
            ))),
        }
    }

    /// Allocates, collecting from `roots` and then growing when needed.
    /// Only usable when the caller can name every root by itself.
    pub fn allocate(&mut self, request: Allocation<C>, roots: &dyn RootSet) -> VmResult<ObjectRef> {
        let request = match self.try_allocate(request) {
            Ok(r) => return Ok(r),
            Err(request) => request,
        };
        self.collect(roots);
        match self.try_allocate(request) {
            Ok(r) => Ok(r),
            Err(request) => self.grow_and_allocate(request),
        }
    }

    fn reserve(&mut self, size: usize, budget: usize) -> Option<usize> {
        if size > self.config.block_size {
            if self.committed.checked_add(size)? > budget {
                return None;
            }
            return Some(self.commit_block(size, true));
        }
        if let Some(current) = self.current {
            if self.blocks[current].capacity - self.blocks[current].used >= size {
                return Some(current);
            }
        }
        let reusable = self.blocks.iter().position(|b| {
            !b.released && !b.dedicated && b.capacity - b.used >= size
        });
        if let Some(index) = reusable {
            self.current = Some(index);
            return Some(index);
        }
        if self.committed + self.config.block_size > budget {
            return None;
        }
        let index = self.commit_block(self.config.block_size, false);
        self.current = Some(index);
        Some(index)
    }

    fn commit_block(&mut self, capacity: usize, dedicated: bool) -> usize {
        let block = Block {
            capacity,
            used: 0,
            live: 0,
            dedicated,
            released: false,
        };
        self.committed += capacity;
        match self.blocks.iter().position(|b| b.released) {
            Some(index) => {
                self.blocks[index] = block;
                index
            }
            None => {
                self.blocks.push(block);
                self.blocks.len() - 1
            }
        }
    }

    fn place(&mut self, request: Allocation<C>, size: usize, block: usize) -> ObjectRef {
        let (class, body) = match request {
            Allocation::Instance { class, fields } => (class, ObjectBody::Instance(fields)),
            Allocation::Array {
                class,
                kind,
                length,
            } => (
                class,
                ObjectBody::Array {
                    kind,
                    data: ArrayData::new(kind, length),
                },
            ),
            Allocation::Body { class, body } => (class, body),
        };
        self.blocks[block].used += size;
        self.blocks[block].live += size;
        self.used += size;
        self.live_objects += 1;
        let object = HeapObject {
            class,
            body,
            monitor: MonitorState::default(),
            marked: false,
            age: 0,
            hash: self.next_hash(),
            size,
            block,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(object);
                ObjectRef::from_index(index as usize)
            }
            None => {
                self.slots.push(Some(object));
                ObjectRef::from_index(self.slots.len() - 1)
            }
        }
    }

    fn next_hash(&mut self) -> i32 {
        // xorshift32; never yields zero from a non-zero seed
        let mut x = self.hash_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.hash_seed = x;
        (x & 0x7FFF_FFFF) as i32
    }

    /// The object behind `r`, if it is live.
    pub fn get(&self, r: ObjectRef) -> Option<&HeapObject<C>> {
        self.slots.get(r.index())?.as_ref()
    }

    /// Mutable access to the object behind `r`.
    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut HeapObject<C>> {
        self.slots.get_mut(r.index())?.as_mut()
    }

    fn live(&self, r: ObjectRef) -> VmResult<&HeapObject<C>> {
        self.get(r)
            .ok_or_else(|| VmError::Internal(format!("dangling reference {}", r)))
    }

    fn live_mut(&mut self, r: ObjectRef) -> VmResult<&mut HeapObject<C>> {
        self.get_mut(r)
            .ok_or_else(|| VmError::Internal(format!("dangling reference {}", r)))
    }

    /// Class handle of `r`.
    pub fn class_of(&self, r: ObjectRef) -> VmResult<C> {
        Ok(self.live(r)?.class.clone())
    }

    /// Instance field `slot` of `r`.
    pub fn get_field(&self, r: ObjectRef, slot: usize) -> VmResult<Value> {
        self.live(r)?
            .fields()
            .and_then(|f| f.get(slot))
            .copied()
            .ok_or_else(|| VmError::Internal(format!("{} has no field slot {}", r, slot)))
    }

    /// Stores instance field `slot` of `r`.
    pub fn set_field(&mut self, r: ObjectRef, slot: usize, value: Value) -> VmResult<()> {
        let target = self
            .live_mut(r)?
            .fields_mut()
            .and_then(|f| f.get_mut(slot))
            .ok_or_else(|| VmError::Internal(format!("{} has no field slot {}", r, slot)))?;
        *target = value;
        Ok(())
    }

    /// Storage of array `r`.
    pub fn array(&self, r: ObjectRef) -> VmResult<&ArrayData> {
        self.live(r)?
            .array()
            .ok_or_else(|| VmError::Internal(format!("{} is not an array", r)))
    }

    /// Mutable storage of array `r`.
    pub fn array_mut(&mut self, r: ObjectRef) -> VmResult<&mut ArrayData> {
        self.live_mut(r)?
            .array_mut()
            .ok_or_else(|| VmError::Internal(format!("{} is not an array", r)))
    }

    /// Length of array `r`.
    pub fn array_length(&self, r: ObjectRef) -> VmResult<usize> {
        Ok(self.array(r)?.len())
    }

    /// Identity hash code of `r`.
    pub fn identity_hash(&self, r: ObjectRef) -> VmResult<i32> {
        Ok(self.live(r)?.hash)
    }

    /// Monitor of `r`.
    pub fn monitor_mut(&mut self, r: ObjectRef) -> VmResult<&mut MonitorState> {
        Ok(&mut self.live_mut(r)?.monitor)
    }

    /// Copies `len` elements between arrays of the same storage type.
    /// Overlapping copies within one array behave as if staged through a
    /// temporary. Returns false when the ranges or types do not fit.
    pub fn copy_array(
        &mut self,
        src: ObjectRef,
        src_pos: usize,
        dst: ObjectRef,
        dst_pos: usize,
        len: usize,
    ) -> VmResult<bool> {
        let staged = match self.array(src)?.slice(src_pos, len) {
            Some(s) => s,
            None => return Ok(false),
        };
        Ok(self.array_mut(dst)?.write_slice(dst_pos, &staged))
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.live_objects
    }

    /// Bytes held by live objects.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Bytes held by committed blocks.
    pub fn committed_bytes(&self) -> usize {
        self.committed
    }

    /// Current allocation budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of committed blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.released).count()
    }

    /// Snapshot of collector statistics.
    pub fn stats(&self) -> GcStats {
        GcStats {
            used_bytes: self.used,
            committed_bytes: self.committed,
            live_objects: self.live_objects,
            ..self.stats.clone()
        }
    }
}
