//! routebind synthesizes route handler adapters at runtime.
//!
//! A bind-only adapter resolves one typed argument from the request, stores it in the
//! request's item store and completes without writing a response. Each adapter is
//! emitted into a fresh module as a small verified instruction stream, so the entry
//! point keeps the declared name of the parameter it binds, and is memoized per
//! `(type, parameter)` pair.
//!

pub mod binding;
pub mod cache;
pub mod codegen;
pub mod completion;
pub mod context;
pub mod delegate;
pub mod emit;
pub mod error;
pub mod factory;
pub mod logger;

pub use axum;
pub use axum::response::IntoResponse;
pub use binding::{FromRequestContext, ParameterInfo, ValueType};
pub use cache::{AdapterCache, AdapterKey};
pub use chrono;
pub use codegen::{BIND_ONLY_ITEMS_KEY, DEFAULT_PARAMETER_NAME};
pub use completion::{Completion, CompletionFuture};
pub use context::{Items, RequestContext};
pub use delegate::{HandlerParameter, ParameterSource, RequestDelegate, RequestDelegateFactory};
pub use error::{AppError, EmitError, ErrorResponse};
pub use factory::{create_parameters_object_request_delegate, delegate_cache, get_bind_only_request_delegate};
pub use futures;
pub use http;
pub use once_cell;
pub use serde;
pub use serde_json;
pub use serde_urlencoded;
pub use utoipa;
