use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{service}: {message}")]
    ExternalService { service: &'static str, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn unauthorized() -> Self {
        AppError::Unauthorized("No autorizado".into())
    }

    pub fn user_not_found(id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("Usuario con ID {id} no encontrado"))
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Error interno del servidor".into(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

/// Debug rendering of the error, left in response extensions for `expose_error_stack`.
#[derive(Debug, Clone)]
pub struct ErrorTrace {
    body: ErrorBody,
    trace: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = ?self, %status, "request failed");
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                message: self.public_message(),
                code: self.code(),
                stack: None,
            },
        };
        let trace = ErrorTrace {
            body: body.clone(),
            trace: format!("{self:?}"),
        };

        let mut res = (status, Json(body)).into_response();
        res.extensions_mut().insert(trace);
        res
    }
}

/// Rebuilds error bodies with the error chain attached. Installed outside production only.
pub async fn expose_error_stack(res: Response) -> Response {
    let Some(ErrorTrace { mut body, trace }) = res.extensions().get::<ErrorTrace>().cloned() else {
        return res;
    };
    body.error.stack = Some(trace);
    (res.status(), Json(body)).into_response()
}
