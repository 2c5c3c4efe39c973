use crate::binding::FromRequestContext;
use crate::codegen::{CONTEXT_PARAMETER_NAME, DEFAULT_PARAMETER_NAME};
use crate::completion::CompletionFuture;
use crate::context::RequestContext;
use crate::emit::CompiledHandler;
use crate::error::ErrorResponse;
use crate::{error, AppError};
use axum::extract::{RawPathParams, Request};
use axum::response::IntoResponse;
use axum::routing::{any, MethodRouter};
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use utoipa::openapi::path::{Parameter, ParameterBuilder, ParameterIn};
use utoipa::openapi::{ContentBuilder, Required, Response, ResponseBuilder, Responses, ResponsesBuilder};
use utoipa::PartialSchema;

type DelegateFn = dyn Fn(&RequestContext) -> Result<CompletionFuture, AppError> + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterSource {
    /// Bound from route values or the query string.
    Request,
    /// The request context itself.
    Context,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerParameter {
    pub name: String,
    pub type_name: &'static str,
    pub source: ParameterSource,
}

/// Request handler shape the pipeline invokes: binds the handler argument from the
/// context, runs the handler and yields the outcome of its completion.
#[derive(Clone)]
pub struct RequestDelegate {
    inner: Arc<DelegateFn>,
    parameters: Arc<[HandlerParameter]>,
}

impl fmt::Debug for RequestDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDelegate").field("parameters", &self.parameters).finish()
    }
}

impl RequestDelegate {
    pub fn invoke(&self, ctx: &RequestContext) -> Result<CompletionFuture, AppError> {
        (self.inner)(ctx)
    }

    pub async fn run(&self, ctx: &RequestContext) -> Result<(), AppError> {
        self.invoke(ctx)?.await?;
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parameters(&self) -> &[HandlerParameter] {
        &self.parameters
    }

    /// Name of the bound value parameter.
    pub fn parameter_name(&self) -> &str {
        self.parameters
            .iter()
            .find(|p| p.source == ParameterSource::Request)
            .map(|p| p.name.as_str())
            .unwrap_or(DEFAULT_PARAMETER_NAME)
    }

    /// OpenAPI description of the request-bound parameters, located in the path when
    /// `path` has a matching `{name}` segment and in the query string otherwise.
    pub fn openapi_parameters(&self, path: &str) -> Vec<Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.source == ParameterSource::Request)
            .map(|p| {
                let location = if path.contains(&format!("{{{}}}", p.name)) { ParameterIn::Path } else { ParameterIn::Query };
                ParameterBuilder::new()
                    .name(p.name.clone())
                    .parameter_in(location)
                    .required(Required::True)
                    .build()
            })
            .collect()
    }

    /// OpenAPI responses of the route. Binding failures and synthesis failures carry an
    /// [`ErrorResponse`] body.
    pub fn openapi_responses(&self) -> Responses {
        ResponsesBuilder::new()
            .response("200", ResponseBuilder::new().description("Value bound").build())
            .response("400", error_response(&format!("Invalid or missing \"{}\"", self.parameter_name())))
            .response("500", error_response("Handler failed"))
            .build()
    }

    /// Serves the delegate as an axum route. `next` sees the context after the
    /// delegate ran and renders the response.
    pub fn into_method_router<S, F, R>(self, next: F) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(&RequestContext) -> R + Clone + Send + Sync + 'static,
        R: IntoResponse,
    {
        any(move |params: RawPathParams, request: Request| {
            let delegate = self.clone();
            let next = next.clone();
            async move {
                match delegate.handle(params, request).await {
                    Ok(ctx) => next(&ctx).into_response(),
                    Err(e) => {
                        error!("{} failed: {}", delegate.parameter_name(), e);
                        e.into_response()
                    }
                }
            }
        })
    }

    async fn handle(&self, params: RawPathParams, request: Request) -> Result<RequestContext, AppError> {
        let mut ctx = RequestContext::from_request(request)?;
        for (name, value) in params.iter() {
            ctx.set_route_value(name, value);
        }
        self.run(&ctx).await?;
        Ok(ctx)
    }
}

fn error_response(description: &str) -> Response {
    ResponseBuilder::new()
        .description(description)
        .content("application/json", ContentBuilder::new().schema(Some(ErrorResponse::schema())).build())
        .build()
}

pub struct RequestDelegateFactory;

impl RequestDelegateFactory {
    /// Adapts a synthesized `(T, RequestContext) -> Completion` handler to a [`RequestDelegate`].
    pub fn create<T: FromRequestContext>(handler: CompiledHandler<T>) -> RequestDelegate {
        let value_name = handler.parameter_name(0).unwrap_or(DEFAULT_PARAMETER_NAME).to_string();
        let context_name = handler.parameter_name(1).unwrap_or(CONTEXT_PARAMETER_NAME).to_string();
        let parameters: Arc<[HandlerParameter]> = Arc::from(vec![
            HandlerParameter { name: value_name.clone(), type_name: type_name::<T>(), source: ParameterSource::Request },
            HandlerParameter { name: context_name, type_name: type_name::<RequestContext>(), source: ParameterSource::Context },
        ]);
        let inner = move |ctx: &RequestContext| -> Result<CompletionFuture, AppError> {
            let value = T::from_request_context(ctx, &value_name)?;
            let completion = handler.invoke(value, ctx)?;
            Ok(completion.execute(ctx))
        };
        RequestDelegate { inner: Arc::new(inner), parameters }
    }
}
