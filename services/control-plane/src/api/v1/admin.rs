//! Administrative endpoints. Capability checks happen in the service.

use std::collections::BTreeSet;

use axum::{extract::State, Json};
use corral_id::BackupId;
use serde::Deserialize;
use tracing::error;

use super::jobs::QueryRequest;
use super::RpcReply;
use crate::admin::HostStatuses;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{Quota, ScheduleStatus, ScheduledTask};
use crate::rewrite::RewriteCommand;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub role: String,
    pub quota: Quota,
}

#[derive(Debug, Deserialize)]
pub struct HostsRequest {
    pub hosts: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForceTaskStateRequest {
    pub task_id: String,
    pub status: ScheduleStatus,
}

#[derive(Debug, Deserialize)]
pub struct StageRecoveryRequest {
    pub backup_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RewriteConfigsRequest {
    #[serde(default)]
    pub commands: Vec<RewriteCommand>,
}

pub async fn get_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RoleRequest>,
) -> RpcReply<Quota> {
    let response = state.service().get_quota(&req.role).await;
    RpcReply::new(&ctx, response)
}

pub async fn set_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<SetQuotaRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .set_quota(&req.role, req.quota, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn start_maintenance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<HostsRequest>,
) -> Result<RpcReply<HostStatuses>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().start_maintenance(req.hosts, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn drain_hosts(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<HostsRequest>,
) -> Result<RpcReply<HostStatuses>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().drain_hosts(req.hosts, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn maintenance_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<HostsRequest>,
) -> Result<RpcReply<HostStatuses>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().maintenance_status(req.hosts, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn end_maintenance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<HostsRequest>,
) -> Result<RpcReply<HostStatuses>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().end_maintenance(req.hosts, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn force_task_state(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<ForceTaskStateRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .force_task_state(&req.task_id, req.status, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn perform_backup(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<RpcReply<BackupId>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().perform_backup(session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn list_backups(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<RpcReply<Vec<BackupId>>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().list_backups(session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn stage_recovery(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<StageRecoveryRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .stage_recovery(&req.backup_id, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn query_recovery(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<QueryRequest>,
) -> Result<RpcReply<Vec<ScheduledTask>>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().query_recovery(req.query, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn delete_recovery_tasks(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<QueryRequest>,
) -> Result<RpcReply<usize>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .delete_recovery_tasks(req.query, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn commit_recovery(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().commit_recovery(session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn unload_recovery(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().unload_recovery(session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn snapshot(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().snapshot(session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn rewrite_configs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RewriteConfigsRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    match state.service().rewrite_configs(req.commands, session).await {
        Ok(response) => Ok(RpcReply::new(&ctx, response)),
        Err(err) => {
            error!(request_id = %ctx.request_id, error = %err, "Rewrite batch failed");
            Err(ApiError::internal("fatal_rewrite", err.to_string())
                .with_request_id(ctx.request_id.clone()))
        }
    }
}
