//! Builds a VM from command-line options and runs a program on it.

use crate::cli::Cli;
use crate::error::{CliError, CliResult};
use class_linker::{ClassPath, CompositeClassPath};
use interpreter::{exit_status, Vm, VmConfig};
use memory_manager::HeapConfig;
use std::sync::Arc;

/// A configured VM launcher
#[derive(Debug, Clone)]
pub struct Launcher {
    config: VmConfig,
    class_path: Arc<dyn ClassPath>,
}

impl Launcher {
    /// Creates a launcher for `class_path` with `config`.
    pub fn new(config: VmConfig, class_path: Arc<dyn ClassPath>) -> Self {
        Self { config, class_path }
    }

    /// Translates parsed options into a launcher.
    ///
    /// # Errors
    /// Returns `CliError::InvalidOption` when the heap sizes contradict each
    /// other or the stack depth is zero.
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let mut heap = HeapConfig::default();
        if let Some(block) = cli.block_size {
            heap = heap.with_block_size(block);
        }
        if let Some(max) = cli.max_heap {
            heap = heap.with_max_size(max);
            if cli.initial_heap.is_none() && heap.initial_size > max {
                heap = heap.with_initial_size(max);
            }
        }
        if let Some(initial) = cli.initial_heap {
            heap = heap.with_initial_size(initial);
        }
        if heap.initial_size > heap.max_size {
            return Err(CliError::InvalidOption(format!(
                "initial heap {} exceeds maximum heap {}",
                heap.initial_size, heap.max_size
            )));
        }

        let mut config = VmConfig::default().with_heap(heap);
        if let Some(frames) = cli.max_frames {
            if frames == 0 {
                return Err(CliError::InvalidOption("max frames must be positive".to_string()));
            }
            config = config.with_max_frames(frames);
        }

        let class_path = CompositeClassPath::from_directories(cli.class_path_entries());
        log::debug!("class path: {}", cli.class_path);
        Ok(Self::new(config, Arc::new(class_path)))
    }

    /// The VM configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Runs `main_class.main(args)` on a fresh VM.
    ///
    /// # Errors
    /// Returns the VM error for load or link failures and for an exception
    /// that escaped `main`; the latter has already been reported on the VM's
    /// standard error.
    pub fn run(&self, main_class: &str, args: &[String]) -> CliResult<()> {
        let vm = Vm::new(self.config.clone(), self.class_path.clone())?;
        let result = vm.run_main(main_class, args);
        log::info!("{} finished; {} collections", main_class, vm.heap_stats().collections);
        vm.shutdown();
        Ok(result?)
    }
}

/// Process exit code for the outcome of [`Launcher::run`].
pub fn exit_code(result: &CliResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(CliError::Vm(e)) => exit_status(&Err(e.clone())),
        Err(CliError::InvalidOption(_)) => 2,
    }
}
