//! Sync engine tool surface.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use servis_rpc::{input_schema_for, ErrorCode, Tool, ToolError, ToolServer};

use crate::engine::{SyncEngine, SyncError};
use crate::types::{SyncAlgorithm, SyncGroup};

impl From<SyncError> for ToolError {
    fn from(err: SyncError) -> Self {
        let code = match err {
            SyncError::GroupExists(_) => ErrorCode::AlreadyRegistered,
            SyncError::GroupNotFound(_) => ErrorCode::NotFound,
        };
        ToolError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateSyncGroupParams {
    pub group_id: String,
    pub master_zone_id: String,
    pub slave_zone_ids: Vec<String>,
    pub sync_mode: Option<SyncAlgorithm>,
    pub tolerance_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupIdParams {
    pub group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZoneCompensationParams {
    pub zone_id: String,
    /// Seconds.
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZoneParams {
    pub zone_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZoneIdParams {
    pub zone_id: String,
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|err| ToolError::invalid_params(err.to_string()))
}

/// Register the sync tools onto a server.
pub fn register_tools(server: &mut ToolServer, engine: Arc<SyncEngine>) -> Result<(), ToolError> {
    let eng = engine.clone();
    server.register(Tool::new(
        "create_sync_group",
        "Bind a master zone to slave zones under a sync mode",
        input_schema_for::<CreateSyncGroupParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: CreateSyncGroupParams = parse(params)?;
                engine.add_sync_group(SyncGroup {
                    group_id: p.group_id.clone(),
                    master_zone_id: p.master_zone_id,
                    slave_zone_ids: p.slave_zone_ids,
                    sync_mode: p.sync_mode.unwrap_or_default(),
                    tolerance_seconds: p.tolerance_seconds.unwrap_or(0.05),
                })?;
                Ok(json!({"group_id": p.group_id, "status": "created"}))
            }
        },
    ))?;

    let eng = engine.clone();
    server.register(Tool::new(
        "remove_sync_group",
        "Remove a sync group",
        input_schema_for::<GroupIdParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: GroupIdParams = parse(params)?;
                engine.remove_sync_group(&p.group_id)?;
                Ok(json!({"group_id": p.group_id, "status": "removed"}))
            }
        },
    ))?;

    let eng = engine.clone();
    server.register(Tool::new(
        "set_network_delay",
        "Set network delay compensation for a zone",
        input_schema_for::<ZoneCompensationParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: ZoneCompensationParams = parse(params)?;
                engine.set_network_delay(&p.zone_id, p.value);
                Ok(json!({"zone_id": p.zone_id, "network_delay": p.value}))
            }
        },
    ))?;

    let eng = engine.clone();
    server.register(Tool::new(
        "set_clock_offset",
        "Set clock offset compensation for a zone",
        input_schema_for::<ZoneCompensationParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: ZoneCompensationParams = parse(params)?;
                engine.set_clock_offset(&p.zone_id, p.value);
                Ok(json!({"zone_id": p.zone_id, "clock_offset": p.value}))
            }
        },
    ))?;

    let eng = engine.clone();
    server.register(Tool::new(
        "get_sync_statistics",
        "Synchronization statistics for one zone or all zones",
        input_schema_for::<ZoneParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: ZoneParams = parse(params)?;
                match p.zone_id {
                    Some(zone) => {
                        let stats = engine.statistics_for(&zone).ok_or_else(|| {
                            ToolError::not_found(format!("no statistics for zone '{zone}'"))
                        })?;
                        Ok(serde_json::to_value(stats)
                            .map_err(|err| ToolError::handler(err.to_string()))?)
                    }
                    None => Ok(json!({"zones": engine.all_statistics()})),
                }
            }
        },
    ))?;

    let eng = engine;
    server.register(Tool::new(
        "get_sync_performance",
        "Recent average-quality samples for a zone",
        input_schema_for::<ZoneIdParams>(),
        move |params| {
            let engine = eng.clone();
            async move {
                let p: ZoneIdParams = parse(params)?;
                Ok(json!({"zone_id": p.zone_id, "samples": engine.performance_for(&p.zone_id)}))
            }
        },
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PositionSource, SyncConfig};
    use async_trait::async_trait;

    struct NoPositions;

    #[async_trait]
    impl PositionSource for NoPositions {
        async fn zone_position(&self, _zone_id: &str) -> Option<f64> {
            None
        }
    }

    #[test]
    fn all_sync_tools_register() {
        let engine = Arc::new(SyncEngine::new(SyncConfig::default(), Arc::new(NoPositions)));
        let mut server = ToolServer::new("ai-audio-assistant", "0.1.0");
        register_tools(&mut server, engine).unwrap();
        let names = server.tool_names();
        for expected in [
            "create_sync_group",
            "remove_sync_group",
            "set_network_delay",
            "set_clock_offset",
            "get_sync_statistics",
            "get_sync_performance",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
