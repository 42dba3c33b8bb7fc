use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use velocity_core::VelocityError;

/// JSON body of every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                success: false,
                error: error.into(),
                details: None,
            },
        }
    }

    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg.to_string())
    }

    /// A failure with nothing cached to fall back on. `details` carries the
    /// debug rendering of the error and is only filled in development.
    pub fn unavailable(err: &VelocityError, development: bool) -> Self {
        let mut app = Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        if development {
            app.body.details = Some(format!("{:?}", err));
        }
        app
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(VelocityError::Request(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_only_in_development() {
        let err = VelocityError::data_source("connection refused");

        let prod = AppError::unavailable(&err, false);
        assert_eq!(prod.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(prod.body.details.is_none());
        let json = serde_json::to_value(&prod.body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("details").is_none());

        let dev = AppError::unavailable(&err, true);
        assert!(dev.body.details.unwrap().contains("DataSource"));
    }
}
