//! API v1 routes.
//!
//! Every operation is `POST /v1/<operation>` with a JSON body and answers
//! with the response envelope. The HTTP status mirrors the envelope code.

mod admin;
mod jobs;
mod updates;

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::api::request_context::{RequestContext, REQUEST_ID_HEADER};
use crate::model::{Response, ResponseCode};
use crate::state::AppState;

/// Create v1 API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Jobs
        .route("/create_job", post(jobs::create_job))
        .route("/populate_job_config", post(jobs::populate_job_config))
        .route("/start_cron_job", post(jobs::start_cron_job))
        .route("/get_tasks_status", post(jobs::get_tasks_status))
        .route("/get_jobs", post(jobs::get_jobs))
        .route("/kill_tasks", post(jobs::kill_tasks))
        .route("/restart_shards", post(jobs::restart_shards))
        // Updates
        .route("/start_update", post(updates::start_update))
        .route("/update_shards", post(updates::update_shards))
        .route("/rollback_shards", post(updates::rollback_shards))
        .route("/finish_update", post(updates::finish_update))
        .route("/get_job_updates", post(updates::get_job_updates))
        // Admin
        .route("/get_quota", post(admin::get_quota))
        .route("/set_quota", post(admin::set_quota))
        .route("/start_maintenance", post(admin::start_maintenance))
        .route("/drain_hosts", post(admin::drain_hosts))
        .route("/maintenance_status", post(admin::maintenance_status))
        .route("/end_maintenance", post(admin::end_maintenance))
        .route("/force_task_state", post(admin::force_task_state))
        .route("/perform_backup", post(admin::perform_backup))
        .route("/list_backups", post(admin::list_backups))
        .route("/stage_recovery", post(admin::stage_recovery))
        .route("/query_recovery", post(admin::query_recovery))
        .route("/delete_recovery_tasks", post(admin::delete_recovery_tasks))
        .route("/commit_recovery", post(admin::commit_recovery))
        .route("/unload_recovery", post(admin::unload_recovery))
        .route("/snapshot", post(admin::snapshot))
        .route("/rewrite_configs", post(admin::rewrite_configs))
}

pub(crate) fn status_for(code: ResponseCode) -> StatusCode {
    match code {
        ResponseCode::Ok | ResponseCode::Warning => StatusCode::OK,
        ResponseCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ResponseCode::AuthFailed => StatusCode::UNAUTHORIZED,
        ResponseCode::Error => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// An operation response ready to be sent.
#[derive(Debug)]
pub struct RpcReply<T> {
    request_id: String,
    response: Response<T>,
}

impl<T> RpcReply<T> {
    pub fn new(ctx: &RequestContext, response: Response<T>) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            response,
        }
    }
}

impl<T: Serialize> IntoResponse for RpcReply<T> {
    fn into_response(self) -> HttpResponse {
        let status = status_for(self.response.code);
        let mut response = (status, Json(self.response)).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ResponseCode::Ok, StatusCode::OK)]
    #[case(ResponseCode::Warning, StatusCode::OK)]
    #[case(ResponseCode::InvalidRequest, StatusCode::BAD_REQUEST)]
    #[case(ResponseCode::AuthFailed, StatusCode::UNAUTHORIZED)]
    #[case(ResponseCode::Error, StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_for(#[case] code: ResponseCode, #[case] status: StatusCode) {
        assert_eq!(status_for(code), status);
    }

    #[test]
    fn test_reply_echoes_request_id() {
        let ctx = RequestContext {
            request_id: "req_abc".to_string(),
            session: None,
        };
        let reply = RpcReply::new(&ctx, Response::<()>::warning("partial"));
        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req_abc");
    }
}
