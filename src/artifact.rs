use crate::WorkerId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Output of one successful capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureArtifact {
    pub url: String,
    /// PNG bytes of the rendered viewport
    #[serde(skip)]
    pub data: Vec<u8>,
    pub title: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub render_time: Duration,
    pub worker_id: WorkerId,
    /// Produced by a temporary worker outside the managed pool
    pub overflow: bool,
}

impl CaptureArtifact {
    /// `data:image/png;base64,...` form handed back to HTTP clients
    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.data))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
