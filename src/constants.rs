//! Engine Constants
//!
//! Default budgets and limits used by the decoding engine and its script
//! sandbox. Each can be overridden through `EngineConfig`.

use std::time::Duration;

/// Wall-clock budget for one script unit invocation (milliseconds)
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 1000;

/// Maximum iterations of any single loop inside a script unit.
///
/// Applies per loop, so nested loops are bounded only by the wall-clock
/// budget, which kills the worker process.
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 5_000_000;

/// Maximum call depth inside a script unit
pub const DEFAULT_RECURSION_LIMIT: usize = 256;

/// Stack reserved for the interpreter thread inside a script worker
pub const SCRIPT_WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Executable hosting the script worker, looked up next to the current one
pub const SCRIPT_WORKER_BIN: &str = "mioty-decode";

/// Hidden subcommand that runs one script job read from stdin
pub const SCRIPT_WORKER_COMMAND: &str = "script-worker";

/// Overrides the script worker executable path
pub const SCRIPT_WORKER_ENV: &str = "MIOTY_SCRIPT_WORKER";

/// Longest payload dumped to the debug log, in bytes
pub const MAX_LOGGED_PAYLOAD: usize = 64;

/// Window and cap for repeated engine warnings
pub const WARN_THROTTLE_WINDOW: Duration = Duration::from_secs(10);
pub const WARN_THROTTLE_CAP: u32 = 20;

/// Record keys that carry routing metadata rather than measurements
pub const DEFAULT_EXCLUDED_KEYS: &[&str] = &["networkBaseType", "networkSubType"];
