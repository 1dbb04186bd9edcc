//! Rolling update endpoints.

use std::collections::BTreeSet;

use axum::{extract::State, Json};
use corral_id::JobKey;
use serde::Deserialize;

use super::jobs::JobRequest;
use super::RpcReply;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{JobUpdate, UpdateResult, UpdateState};
use crate::service::StartUpdateResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ShardsRequest {
    pub job_key: JobKey,
    pub shard_ids: BTreeSet<u32>,
    pub update_token: String,
}

#[derive(Debug, Deserialize)]
pub struct FinishUpdateRequest {
    pub job_key: JobKey,
    pub update_result: UpdateResult,
    #[serde(default)]
    pub update_token: Option<String>,
}

pub async fn start_update(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<JobRequest>,
) -> Result<RpcReply<StartUpdateResult>, ApiError> {
    let session = ctx.require_session()?;
    let response = state.service().start_update(req.job, session).await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn update_shards(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<ShardsRequest>,
) -> Result<RpcReply<BTreeSet<u32>>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .update_shards(req.job_key, req.shard_ids, &req.update_token, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn rollback_shards(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<ShardsRequest>,
) -> Result<RpcReply<BTreeSet<u32>>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .rollback_shards(req.job_key, req.shard_ids, &req.update_token, session)
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn finish_update(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<FinishUpdateRequest>,
) -> Result<RpcReply<UpdateState>, ApiError> {
    let session = ctx.require_session()?;
    let response = state
        .service()
        .finish_update(
            req.job_key,
            req.update_result,
            req.update_token.as_deref(),
            session,
        )
        .await;
    Ok(RpcReply::new(&ctx, response))
}

pub async fn get_job_updates(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> RpcReply<Vec<JobUpdate>> {
    let response = state.service().get_job_updates().await;
    RpcReply::new(&ctx, response)
}
