//! Job lifecycle endpoints.

use std::collections::BTreeSet;

use axum::{extract::State, Json};
use corral_id::JobKey;
use serde::Deserialize;

use super::RpcReply;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{JobConfiguration, ScheduledTask, ShardTaskConfig, TaskQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub job: JobConfiguration,
}

#[derive(Debug, Deserialize)]
pub struct JobKeyRequest {
    pub job_key: JobKey,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: TaskQuery,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetJobsRequest {
    #[serde(default)]
    pub owner_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestartShardsRequest {
    pub job_key: JobKey,
    pub shard_ids: BTreeSet<u32>,
}

pub async fn create_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<JobRequest>,
) -> Result<RpcReply<u32>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().create_job(req.job, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn populate_job_config(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<JobRequest>,
) -> RpcReply<Vec<ShardTaskConfig>> {
    let response = state.service().populate_job_config(req.job).await;
    RpcReply::new(&ctx, response)
}

pub async fn start_cron_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<JobKeyRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().start_cron_job(req.job_key, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn get_tasks_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<QueryRequest>,
) -> RpcReply<Vec<ScheduledTask>> {
    let response = state.service().get_tasks_status(req.query).await;
    RpcReply::new(&ctx, response)
}

pub async fn get_jobs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<GetJobsRequest>,
) -> RpcReply<Vec<JobConfiguration>> {
    let response = state.service().get_jobs(req.owner_role.as_deref()).await;
    RpcReply::new(&ctx, response)
}

pub async fn kill_tasks(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<QueryRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().kill_tasks(req.query, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn restart_shards(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RestartShardsRequest>,
) -> Result<RpcReply<()>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .restart_shards(req.job_key, req.shard_ids, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}
