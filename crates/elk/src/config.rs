//! Execution limits and environment configuration.

use std::path::PathBuf;

/// Knobs for one executor instance.
///
/// The call-depth guard fails fast before a frame is pushed, so a runaway
/// recursion surfaces as a runtime error instead of exhausting the host
/// stack. The pipe capacity bounds the per-process line buffer; producers
/// block when it fills, so output is never dropped.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub max_call_depth: usize,
    pub pipe_line_capacity: usize,
    /// Directory exposed by the `scriptPath` built-in.
    pub script_path: PathBuf,
}

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
pub const DEFAULT_PIPE_LINE_CAPACITY: usize = 1024;

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            pipe_line_capacity: DEFAULT_PIPE_LINE_CAPACITY,
            script_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
