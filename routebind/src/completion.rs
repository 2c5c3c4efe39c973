use crate::context::RequestContext;
use crate::EmitError;
use futures::future::{self, BoxFuture, FutureExt};

/// Outcome token handed back by a completion, resolved once its work is done.
/// Resolves to the error when the completion failed to run.
pub type CompletionFuture = BoxFuture<'static, Result<(), EmitError>>;

/// A unit of work the pipeline executes after a handler returned it.
pub trait Completion: Send + Sync {
    fn execute(&self, ctx: &RequestContext) -> CompletionFuture;
}

/// An outcome that is already finished.
pub fn completed() -> CompletionFuture {
    future::ready(Ok(())).boxed()
}

/// An outcome that already failed.
pub fn failed(err: EmitError) -> CompletionFuture {
    future::ready(Err(err)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_is_ready_without_polling_twice() {
        assert_eq!(completed().now_or_never(), Some(Ok(())));
    }

    #[test]
    fn failed_is_ready_with_the_error() {
        let err = EmitError::MissingReturn("ExecuteAsync".into());
        assert_eq!(failed(err.clone()).now_or_never(), Some(Err(err)));
    }
}
