use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tollgate_core::{ErrorKind, HoldError};

#[derive(Debug)]
pub enum AppError {
    Hold(HoldError),
    Anyhow(anyhow::Error),
}

impl From<HoldError> for AppError {
    fn from(err: HoldError) -> Self {
        AppError::Hold(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Hold(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Persistence => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
                    ErrorKind::AuditWriteFailure => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %err, "Request failed");
                }
                (status, err.user_message().to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (HoldError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (HoldError::SeatsUnavailable { requested: 2, acquired: 0 }, StatusCode::CONFLICT),
            (HoldError::not_found("intent", Uuid::nil()), StatusCode::NOT_FOUND),
            (HoldError::persistence("commit", "io"), StatusCode::SERVICE_UNAVAILABLE),
            (HoldError::AuditWriteFailure("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }
}
