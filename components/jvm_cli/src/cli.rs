//! Command-line arguments

use clap::{ArgAction, Parser};
use std::ffi::OsString;

/// corten-jvm - runs the `main` method of a compiled class
#[derive(Debug, Parser)]
#[command(name = "corten-jvm", version, about, long_about = None)]
pub struct Cli {
    /// Directories searched for class files, separated by ':'
    #[arg(short = 'c', long = "class-path", visible_alias = "cp", value_name = "PATH", default_value = ".")]
    pub class_path: String,

    /// Heap budget before the first growth (e.g. 16m)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub initial_heap: Option<usize>,

    /// Maximum heap size (e.g. 256m)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_heap: Option<usize>,

    /// Size of one heap block (e.g. 256k)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub block_size: Option<usize>,

    /// Frames per thread before StackOverflowError
    #[arg(long, value_name = "FRAMES")]
    pub max_frames: Option<usize>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Class whose main method runs, e.g. com.example.Main
    #[arg(value_name = "CLASS")]
    pub main_class: String,

    /// Arguments passed to main
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Parses the process arguments, accepting the single-dash `-cp` and
    /// `-classpath` spellings.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Log level selected by `-v`.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// The main class in internal form (`com/example/Main`).
    pub fn main_class_name(&self) -> String {
        let name = self.main_class.strip_suffix(".class").unwrap_or(&self.main_class);
        name.replace('.', "/")
    }

    /// Class-path directories in search order.
    pub fn class_path_entries(&self) -> Vec<&str> {
        self.class_path.split(':').filter(|d| !d.is_empty()).collect()
    }
}

/// Rewrites `-cp` and `-classpath` to `--cp` up to the main class name.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut expect_value = false;
    let mut in_program_args = false;
    for (i, arg) in args.into_iter().enumerate() {
        if i == 0 || in_program_args {
            out.push(arg);
            continue;
        }
        if expect_value {
            expect_value = false;
            out.push(arg);
            continue;
        }
        match arg.to_str() {
            Some("-cp") | Some("-classpath") => {
                out.push(OsString::from("--cp"));
                expect_value = true;
            }
            Some(s) if takes_value(s) => {
                out.push(arg);
                expect_value = true;
            }
            Some(s) if s.starts_with('-') => out.push(arg),
            _ => {
                // First positional is the main class; the rest belongs to it.
                in_program_args = true;
                out.push(arg);
            }
        }
    }
    out
}

fn takes_value(flag: &str) -> bool {
    matches!(
        flag,
        "-c" | "--class-path" | "--cp" | "--initial-heap" | "--max-heap" | "--block-size" | "--max-frames"
    )
}

/// Parses a byte count with an optional `k`, `m` or `g` suffix.
pub fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let (digits, scale) = match text.char_indices().last() {
        Some((at, 'k' | 'K')) => (&text[..at], 1usize << 10),
        Some((at, 'm' | 'M')) => (&text[..at], 1 << 20),
        Some((at, 'g' | 'G')) => (&text[..at], 1 << 30),
        _ => (text, 1),
    };
    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", text))?;
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("size '{}' is too large", text))
}
