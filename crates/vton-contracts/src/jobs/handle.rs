use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a submission produced: the finished payload, or a task to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobHandle {
    Immediate { payload: Value },
    Async { task_id: String },
}

impl JobHandle {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Immediate { .. } => None,
            Self::Async { task_id } => Some(task_id.as_str()),
        }
    }
}
