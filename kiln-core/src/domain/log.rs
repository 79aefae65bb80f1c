//! Pipeline log domain types

use serde::{Deserialize, Serialize};

/// One executed command of a pipeline run
///
/// Append-only, ordered by `order`, unique per (pipeline_id, order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLog {
    pub pipeline_id: i64,
    pub order: i32,
    pub cmd: String,
    /// Combined stdout and stderr
    pub output: String,
    pub exit_code: i32,
}

/// Removes NUL characters, which Postgres text columns reject
pub fn strip_nul(text: String) -> String {
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text
    }
}
