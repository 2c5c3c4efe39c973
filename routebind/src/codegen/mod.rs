//! Runtime synthesis of route handlers.
//!
//! Each synthesis defines two types into a fresh [`ModuleBuilder`](crate::emit::ModuleBuilder):
//!
//! ```text
//! sealed class CompletedResult : Completion {
//!     Task ExecuteAsync(RequestContext httpContext) => completed;
//! }
//! sealed class RouteHandler {
//!     static readonly Completion _result = new CompletedResult();
//!     static Completion Execute(TValue <parameter name>, RequestContext httpContext) { <body>; return _result; }
//! }
//! ```
//!
//! Handlers are emitted instead of built from closures so the entry point keeps the
//! declared name of the parameter it serves.

pub mod bind_only;
pub mod completion_type;
pub mod handler_type;

pub use bind_only::{create_bind_only_handler, emit_bind_only_body};
pub use completion_type::generate_completion_type;
pub use handler_type::create_route_handler;

/// Item store key every bind-only handler writes its value under.
pub const BIND_ONLY_ITEMS_KEY: &str = "__CreateBindOnlyRequestDelegate_ValueResult_Key";

/// Name of the value parameter when the parameter identity carries no name.
pub const DEFAULT_PARAMETER_NAME: &str = "value";

pub const CONTEXT_PARAMETER_NAME: &str = "httpContext";
