use crate::emit::opcode::SlotType;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Failures raised while defining, verifying or finalizing synthesized types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("type '{0}' is already defined in module '{1}'")]
    DuplicateType(String, String),

    #[error("field '{field}' is already defined on type '{ty}'")]
    DuplicateField { ty: String, field: String },

    #[error("method '{method}' is already defined on type '{ty}'")]
    DuplicateMethod { ty: String, method: String },

    #[error("field '{field}' on type '{ty}' cannot hold {slot:?}")]
    InvalidFieldType { ty: String, field: String, slot: SlotType },

    #[error("type '{0}' already has a type initializer")]
    DuplicateTypeInitializer(String),

    #[error("parameter position {position} is out of range for '{method}'")]
    InvalidParameterPosition { method: String, position: u16 },

    #[error("'{method}' at {offset}: stack underflow")]
    StackUnderflow { method: String, offset: usize },

    #[error("'{method}' at {offset}: expected {expected:?}, found {found:?}")]
    TypeMismatch { method: String, offset: usize, expected: SlotType, found: SlotType },

    #[error("'{method}' at {offset}: argument {index} does not exist")]
    InvalidArgument { method: String, offset: usize, index: u16 },

    #[error("'{method}' at {offset}: unknown field")]
    UnknownField { method: String, offset: usize },

    #[error("'{method}' at {offset}: constructor of an unfinished or foreign type")]
    UnknownConstructor { method: String, offset: usize },

    #[error("'{method}' at {offset}: static fields are only writable from the type initializer")]
    ReadOnlyField { method: String, offset: usize },

    #[error("'{method}' at {offset}: unreachable instruction after ret")]
    UnreachableCode { method: String, offset: usize },

    #[error("'{method}' at {offset}: {remaining} values left on the stack at ret")]
    UnbalancedStack { method: String, offset: usize, remaining: usize },

    #[error("'{0}' does not end with ret")]
    MissingReturn(String),

    #[error("'{0}' was defined by another module")]
    ForeignType(String),

    #[error("method '{method}' not found on type '{ty}'")]
    MethodNotFound { ty: String, method: String },

    #[error("completion type '{0}' does not implement ExecuteAsync(context) -> task")]
    MissingCapability(String),

    #[error("method '{0}' does not match the handler calling convention")]
    SignatureMismatch(String),

    #[error("type initializer of '{0}' failed: {1}")]
    TypeInitializer(String, String),

    #[error("'{method}' at {offset}: invalid operand at runtime")]
    InvalidOperand { method: String, offset: usize },
}

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Code generation error: {0}")]
    Emit(#[from] EmitError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)     => StatusCode::BAD_REQUEST,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _                           => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    pub code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        (status, Json(ErrorResponse { message, code: status.as_u16() })).into_response()
    }
}
