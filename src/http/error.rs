use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::store::{ErrorClass, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidParam {
    pub name: String,
    pub reason: String,
}

/// RFC 7807 problem detail. 4xx bodies say what was wrong; 5xx bodies only
/// carry a generic title, the cause goes to the log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(serialize_with = "status_code")]
    pub status: StatusCode,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid_params: Vec<InvalidParam>,
}

fn status_code<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

const BAD_REQUEST: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.1";
const NOT_FOUND: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.4";
const INTERNAL: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.6.1";
const UNAVAILABLE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.6.4";

impl ApiError {
    pub fn invalid(params: Vec<InvalidParam>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: BAD_REQUEST,
            title: "Request parameters did not validate".into(),
            invalid_params: params,
        }
    }

    pub fn invalid_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::invalid(vec![InvalidParam {
            name: name.into(),
            reason: reason.into(),
        }])
    }

    pub fn not_found(title: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: NOT_FOUND,
            title: title.into(),
            invalid_params: Vec::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind: UNAVAILABLE,
            title: "The server is unavailable".into(),
            invalid_params: Vec::new(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: INTERNAL,
            title: "Internal Server Error".into(),
            invalid_params: Vec::new(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match (err.class(), &err) {
            (_, StoreError::InvalidRequest { field, reason }) => {
                ApiError::invalid_param(*field, reason.clone())
            }
            (_, StoreError::AlreadyExists { .. }) => {
                ApiError::invalid_param("localDate", err.to_string())
            }
            (_, StoreError::LimitExceeded(what)) => ApiError::invalid_param("request", *what),
            (ErrorClass::NotFound, _) => ApiError::not_found(err.to_string()),
            (ErrorClass::Unavailable, _) => {
                tracing::warn!(error = %err, "request failed: store unavailable");
                ApiError::unavailable()
            }
            _ => {
                tracing::error!(error = %err, "request failed: internal error");
                ApiError::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_param("body", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
