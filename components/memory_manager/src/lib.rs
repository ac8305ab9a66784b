//! Object heap and garbage collector
//!
//! Objects are addressed by [`ObjectRef`](core_types::ObjectRef) handles into
//! an arena of slots. Storage is accounted in fixed-size blocks and reclaimed
//! by a stop-the-world mark-sweep collector.
//!
//! # Features
//!
//! - Instance and typed array storage with a header carrying the class
//!   handle, identity hash, monitor and GC metadata
//! - Block accounting with dedicated blocks for oversized objects, growth up
//!   to a configured maximum and `OutOfMemory` beyond it
//! - Iterative marking from any [`RootSet`]
//! - A [`SafepointCoordinator`] that parks all other mutator threads while
//!   one of them collects
//!
//! # Example
//!
//! ```
//! use core_types::Value;
//! use memory_manager::{Allocation, Heap, HeapConfig};
//!
//! let mut heap: Heap<&str> = Heap::new(HeapConfig::default());
//! let kept = heap
//!     .try_allocate(Allocation::Instance { class: "Node", fields: vec![Value::Null] })
//!     .unwrap();
//! let dropped = heap
//!     .try_allocate(Allocation::Instance { class: "Node", fields: vec![Value::Null] })
//!     .unwrap();
//!
//! let summary = heap.collect(&vec![kept]);
//! assert_eq!(summary.reclaimed, 1);
//! assert!(heap.get(kept).is_some());
//! assert!(heap.get(dropped).is_none());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gc;
pub mod heap;
pub mod object;
pub mod safepoint;

// Re-export main types at crate root
pub use gc::{CollectionSummary, RootSet};
pub use heap::{Allocation, GcStats, Heap, HeapConfig, NegativeArraySize};
pub use object::{ArrayData, ElementKind, HeapObject, MonitorState, ObjectBody};
pub use safepoint::{SafepointCoordinator, StopTheWorld};
