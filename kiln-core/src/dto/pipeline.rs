//! Pipeline read models

use serde::{Deserialize, Serialize};

use crate::domain::log::PipelineLog;
use crate::domain::pipeline::Pipeline;

/// A pipeline together with its command logs, ordered by `order`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDetails {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub logs: Vec<PipelineLog>,
}
