//! Registered data sources and their health.

use serde::Serialize;

use crate::config::Config;
use crate::traits::SourceConnector;

/// One row of `nlq sources`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub id: i64,
    pub name: String,
    pub dialect: String,
    pub path: String,
    pub read_only: bool,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ping every configured source through `connector`.
pub async fn list_sources(config: &Config, connector: &dyn SourceConnector) -> Vec<SourceStatus> {
    let mut out = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let id = source.data_source_id();
        let (healthy, error) = match connector.ping(id).await {
            Ok(()) => (true, None),
            Err(e) => {
                tracing::warn!(data_source = %id, error = %e, "data source unhealthy");
                (false, Some(e.to_string()))
            }
        };
        out.push(SourceStatus {
            id: source.id,
            name: source.name.clone(),
            dialect: connector.dialect().to_string(),
            path: source.path.display().to_string(),
            read_only: source.read_only,
            healthy,
            error,
        });
    }
    out
}
