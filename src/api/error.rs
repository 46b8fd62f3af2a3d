use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::manager::ManagerError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - No authentication credentials provided.
    AuthRequired,
    /// 403 - Credentials provided but invalid.
    AuthInvalid,
    /// 404 - A specific exec session id was not found.
    ExecNotFound(u64),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 404 - Target container could not be resolved.
    ContainerNotFound(String),
    /// 502 - Remote command could not be started.
    LaunchFailed(String),
    /// 503 - Session admission limit reached.
    TooManySessions,
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::ExecNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::LaunchFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::TooManySessions => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired => "auth_required",
            ApiError::AuthInvalid => "auth_invalid",
            ApiError::ExecNotFound(_) => "exec_not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::ContainerNotFound(_) => "container_not_found",
            ApiError::LaunchFailed(_) => "launch_failed",
            ApiError::TooManySessions => "too_many_sessions",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::AuthRequired => {
                "Authentication required. Provide a token via the Authorization header."
                    .to_string()
            }
            ApiError::AuthInvalid => "Invalid authentication token.".to_string(),
            ApiError::ExecNotFound(id) => format!("No exec session exists with id {}.", id),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::ContainerNotFound(detail) => {
                format!("Container could not be resolved: {}.", detail)
            }
            ApiError::LaunchFailed(detail) => {
                format!("Failed to start remote command: {}.", detail)
            }
            ApiError::TooManySessions => {
                "Maximum number of exec sessions reached. Try again later.".to_string()
            }
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Resolution(detail) => ApiError::ContainerNotFound(detail),
            ManagerError::Launch(detail) => ApiError::LaunchFailed(detail),
            ManagerError::NotFound(id) => ApiError::ExecNotFound(id),
            ManagerError::Registry(_) => ApiError::TooManySessions,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    /// Helper: convert an ApiError into a response and extract the status and
    /// parsed JSON body.
    async fn response_parts(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = Body::new(response.into_body())
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn auth_required_status() {
        let (status, _) = response_parts(ApiError::AuthRequired).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_invalid_status() {
        let (status, _) = response_parts(ApiError::AuthInvalid).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn exec_not_found_status_and_code() {
        let (status, json) = response_parts(ApiError::ExecNotFound(7)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "exec_not_found");
    }

    #[tokio::test]
    async fn exec_not_found_includes_id() {
        let (_, json) = response_parts(ApiError::ExecNotFound(42)).await;
        let msg = json["error"]["message"].as_str().unwrap();
        assert_eq!(msg, "No exec session exists with id 42.");
    }

    #[tokio::test]
    async fn invalid_request_status_and_detail() {
        let (status, json) =
            response_parts(ApiError::InvalidRequest("missing field 'cols'".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json["error"]["message"],
            "Invalid request: missing field 'cols'."
        );
    }

    #[tokio::test]
    async fn container_not_found_status() {
        let (status, json) = response_parts(ApiError::ContainerNotFound("tools".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "container_not_found");
    }

    #[tokio::test]
    async fn launch_failed_status() {
        let (status, json) = response_parts(ApiError::LaunchFailed("spdy refused".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "launch_failed");
    }

    #[tokio::test]
    async fn too_many_sessions_status() {
        let (status, json) = response_parts(ApiError::TooManySessions).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "too_many_sessions");
    }

    #[tokio::test]
    async fn internal_error_status() {
        let (status, json) = response_parts(ApiError::InternalError("boom".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "Internal error: boom.");
    }

    #[tokio::test]
    async fn manager_not_found_maps_to_404() {
        let (status, _) = response_parts(ManagerError::NotFound(3).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manager_resolution_maps_to_404() {
        let (status, json) =
            response_parts(ManagerError::Resolution("no such container".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "container_not_found");
    }

    #[tokio::test]
    async fn manager_launch_maps_to_502() {
        let (status, _) = response_parts(ManagerError::Launch("refused".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn response_has_error_wrapper() {
        let (_, json) = response_parts(ApiError::AuthRequired).await;
        assert!(json.get("error").is_some(), "response must have 'error' key");
        assert!(json["error"].get("code").is_some());
        assert!(json["error"].get("message").is_some());
    }

    #[tokio::test]
    async fn response_content_type_is_json() {
        let response = ApiError::ExecNotFound(1).into_response();
        let ct = response
            .headers()
            .get("content-type")
            .expect("response must have content-type header");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
