use serde::{Deserialize, Serialize};

/// Queue message asking a worker to (re)build a video's HLS output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessVideoJob {
    pub video_id: String,
}
