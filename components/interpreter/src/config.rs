//! Virtual machine configuration.

use memory_manager::HeapConfig;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Default bound on the number of frames per thread
pub const DEFAULT_MAX_FRAMES: usize = 2048;

/// Shared destination for `System.out` / `System.err`.
#[derive(Clone)]
pub struct OutputSink(Arc<Mutex<Box<dyn Write + Send>>>);

impl OutputSink {
    /// Wraps any writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        OutputSink(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// The process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// The process's standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// An in-memory sink and a handle for reading what was written to it.
    pub fn capture() -> (Self, CapturedOutput) {
        let buffer = CapturedOutput::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Writes `text` and flushes.
    pub fn write_str(&self, text: &str) -> io::Result<()> {
        let mut w = self.0.lock();
        w.write_all(text.as_bytes())?;
        w.flush()
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputSink")
    }
}

/// Bytes written to a capturing [`OutputSink`].
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    /// Everything written so far, decoded lossily.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Configuration of a [`Vm`](crate::Vm).
///
/// # Example
///
/// ```
/// use interpreter::{OutputSink, VmConfig};
/// use memory_manager::HeapConfig;
///
/// let (out, captured) = OutputSink::capture();
/// let config = VmConfig::default()
///     .with_heap(HeapConfig::default().with_max_size(64 << 20))
///     .with_max_frames(512)
///     .with_stdout(out);
/// assert_eq!(config.max_frames, 512);
/// assert!(captured.contents().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Heap sizing
    pub heap: HeapConfig,
    /// Frames per thread before `StackOverflowError`
    pub max_frames: usize,
    /// Destination of `System.out`
    pub stdout: OutputSink,
    /// Destination of `System.err` and uncaught-exception reports
    pub stderr: OutputSink,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            max_frames: DEFAULT_MAX_FRAMES,
            stdout: OutputSink::stdout(),
            stderr: OutputSink::stderr(),
        }
    }
}

impl VmConfig {
    /// Sets the heap sizing.
    pub fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }

    /// Sets the frame-depth bound.
    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames.max(1);
        self
    }

    /// Redirects `System.out`.
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Redirects `System.err`.
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }
}
