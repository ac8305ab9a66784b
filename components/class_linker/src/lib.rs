//! Class loading, linking and initialization
//!
//! This crate turns class-file bytes found on a class path into linked
//! [`RuntimeClass`]es and keeps them in a shared [`ClassRegistry`].
//!
//! # Features
//!
//! - Two loader namespaces, with the application namespace delegating to the
//!   built-in bootstrap classes
//! - Structural verification of every method body before a class is published
//! - Field layout, vtables with final-override checks and interface defaults
//! - Lazy, cached resolution of class, field and method references
//! - Once-only class initialization shared safely between threads
//!
//! # Example
//!
//! ```
//! use class_linker::{ClassRegistry, LoaderId, MemoryClassPath};
//! use std::sync::Arc;
//!
//! let registry = ClassRegistry::new(Arc::new(MemoryClassPath::new())).unwrap();
//! let string = registry.load_class(LoaderId::APPLICATION, "java/lang/String").unwrap();
//! let again = registry.load_class(LoaderId::BOOTSTRAP, "java/lang/String").unwrap();
//! assert!(Arc::ptr_eq(&string, &again));
//! assert_eq!(string.superclass().unwrap().name(), "java/lang/Object");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod class_path;
pub mod constant_pool;
pub mod init;
mod linker;
pub mod registry;
pub mod runtime_class;
mod verify;

// Re-export main types at crate root
pub use class_path::{ClassPath, CompositeClassPath, DirectoryClassPath, MemoryClassPath};
pub use constant_pool::{ResolvedField, RuntimeConstantPool};
pub use init::{initialize, InitDriver};
pub use registry::{find_class_method, find_field, ClassRegistry};
pub use runtime_class::{
    ClassKind, ComponentType, Handler, InitState, LoaderId, MethodCode, RuntimeClass,
    RuntimeField, RuntimeMethod,
};
