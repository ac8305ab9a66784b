//! Class-path resolvers.
//!
//! A [`ClassPath`] maps a binary class name (`java/lang/String`) to the bytes
//! of its class file. `Ok(None)` means "not here", which the loader reports
//! as `NoClassDefFoundError`; an `Err` is an I/O failure while looking.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of class-file bytes.
pub trait ClassPath: Send + Sync + fmt::Debug {
    /// Returns the class-file bytes for `name`, or `None` if this path has no
    /// such class.
    fn find_class(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Class files laid out under a root directory (`root/pkg/Name.class`).
#[derive(Debug, Clone)]
pub struct DirectoryClassPath {
    root: PathBuf,
}

impl DirectoryClassPath {
    /// Creates a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassPath for DirectoryClassPath {
    fn find_class(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        // Names with empty or relative components never map to a file.
        if name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Ok(None);
        }
        let mut path = self.root.clone();
        path.push(format!("{}.class", name));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Class files held in memory, keyed by binary name.
#[derive(Debug, Clone, Default)]
pub struct MemoryClassPath {
    classes: HashMap<String, Arc<[u8]>>,
}

impl MemoryClassPath {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a class.
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.classes.insert(name.into(), bytes.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_class(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// Number of classes held.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no classes are held.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterates the class names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl ClassPath for MemoryClassPath {
    fn find_class(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.classes.get(name).map(|b| b.to_vec()))
    }
}

/// Searches several resolvers in order; the first hit wins.
#[derive(Debug, Default)]
pub struct CompositeClassPath {
    entries: Vec<Arc<dyn ClassPath>>,
}

impl CompositeClassPath {
    /// Creates an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver.
    pub fn push(&mut self, entry: Arc<dyn ClassPath>) {
        self.entries.push(entry);
    }

    /// Parses a `:`-separated list of directories.
    pub fn from_directories<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut cp = Self::new();
        for d in dirs {
            cp.push(Arc::new(DirectoryClassPath::new(d)));
        }
        cp
    }
}

impl ClassPath for CompositeClassPath {
    fn find_class(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        for entry in &self.entries {
            if let Some(bytes) = entry.find_class(name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}
