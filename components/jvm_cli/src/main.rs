//! Corten JVM CLI
//!
//! Entry point for the class-file VM. Parses CLI arguments and delegates to
//! the Launcher for execution.

use jvm_cli::{exit_code, Cli, CliError, Launcher};

fn main() {
    let cli = Cli::parse_args();

    // -v raises the level; RUST_LOG overrides
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let result = Launcher::from_cli(&cli).and_then(|launcher| launcher.run(&cli.main_class_name(), &cli.args));
    match &result {
        // Already reported by the VM with its stack trace.
        Err(CliError::Vm(core_types::VmError::UncaughtException { .. })) | Ok(()) => {}
        Err(e) => eprintln!("Error: {}", e),
    }
    std::process::exit(exit_code(&result));
}
