//! Request-scoped context extracted from HTTP requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use corral_id::RequestId;

use crate::api::error::ApiError;
use crate::auth::SessionKey;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub session: Option<SessionKey>,
}

impl RequestContext {
    /// The caller's session, or 401 when the request carried none.
    pub fn require_session(&self) -> Result<&SessionKey, ApiError> {
        self.session.as_ref().ok_or_else(|| {
            ApiError::unauthorized(
                "missing_session",
                "This operation requires an Authorization: Bearer <user>:<token> header",
            )
            .with_request_id(self.request_id.clone())
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Parses `Authorization: Bearer <user>:<token>`.
fn session_from_authorization_header(
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Option<SessionKey>, ApiError> {
    let Some(auth_value) = header_string(headers, AUTHORIZATION_HEADER) else {
        return Ok(None);
    };

    let invalid = |message: &str| {
        ApiError::unauthorized("invalid_authorization", message)
            .with_request_id(request_id.to_string())
    };

    let Some(credentials) = auth_value.trim().strip_prefix("Bearer ") else {
        return Err(invalid("Authorization must be a Bearer token"));
    };
    let Some((user, token)) = credentials.trim().split_once(':') else {
        return Err(invalid("Bearer token must be in the form '<user>:<token>'"));
    };

    let user = user.trim();
    if user.is_empty() {
        return Err(invalid("Bearer token user cannot be empty"));
    }
    Ok(Some(SessionKey::new(user, token.trim())))
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| RequestId::new().to_string());

        let session = session_from_authorization_header(&parts.headers, &request_id)?;

        Ok(Self {
            request_id,
            session,
        })
    }
}
