use serde::{Deserialize, Serialize};

/// In-process telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bounded ring of retained turn records.
    #[serde(default = "d_ring_size")]
    pub ring_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ring_size: d_ring_size(),
        }
    }
}

fn d_ring_size() -> usize {
    100
}
