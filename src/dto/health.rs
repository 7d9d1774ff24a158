use serde::Serialize;
use utoipa::ToSchema;

/// Overall availability reported by `/healthcheck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Room operations are served.
    Ok,
    /// No usable store; room operations answer 503.
    Degraded,
}

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether the last storage probe succeeded.
    pub storage_reachable: bool,
    /// Live realtime connections held by this process.
    pub live_connections: usize,
}

impl HealthResponse {
    /// Combine the degraded flag with the probe result.
    pub fn new(degraded: bool, storage_reachable: bool, live_connections: usize) -> Self {
        let status = if degraded || !storage_reachable {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        Self {
            status,
            storage_reachable,
            live_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_probe_reports_degraded() {
        let body = serde_json::to_value(HealthResponse::new(false, false, 3)).unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["storageReachable"], false);
        assert_eq!(body["liveConnections"], 3);
    }
}
