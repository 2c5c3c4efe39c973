use crate::binding::{FromRequestContext, ParameterInfo};
use crate::cache::{AdapterCache, AdapterKey};
use crate::codegen::create_bind_only_handler;
use crate::delegate::{RequestDelegate, RequestDelegateFactory};
use crate::{info, AppError};
use once_cell::sync::Lazy;

static DELEGATE_CACHE: Lazy<AdapterCache> = Lazy::new(AdapterCache::new);

/// Process-wide cache backing [`get_bind_only_request_delegate`].
pub fn delegate_cache() -> &'static AdapterCache {
    &DELEGATE_CACHE
}

/// Returns a delegate that binds a `T` from the request under the parameter's name
/// and stores it in the context item store under
/// [`BIND_ONLY_ITEMS_KEY`](crate::codegen::BIND_ONLY_ITEMS_KEY).
///
/// Delegates are synthesized once per `(T, parameter)` and reused afterwards.
pub fn get_bind_only_request_delegate<T: FromRequestContext>(parameter: Option<&ParameterInfo>) -> Result<RequestDelegate, AppError> {
    delegate_cache().bind_only::<T>(parameter)
}

/// Delegate binding every member of a parameters object. Not supported yet.
pub fn create_parameters_object_request_delegate<T: FromRequestContext>() -> Result<RequestDelegate, AppError> {
    Err(AppError::NotImplemented("parameters object request delegates"))
}

impl AdapterCache {
    pub fn bind_only<T: FromRequestContext>(&self, parameter: Option<&ParameterInfo>) -> Result<RequestDelegate, AppError> {
        self.get_or_create(AdapterKey::of::<T>(parameter), create_bind_only_request_delegate::<T>)
    }
}

fn create_bind_only_request_delegate<T: FromRequestContext>(key: &AdapterKey) -> Result<RequestDelegate, AppError> {
    info!("Synthesizing bind-only delegate for {} {}", key.value_type().name(), key.parameter_name());
    let handler = create_bind_only_handler::<T>(key.parameter())?;
    Ok(RequestDelegateFactory::create(handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::DEFAULT_PARAMETER_NAME;
    use crate::context::RequestContext;
    use http::Request;
    use serde::Deserialize;

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    struct Foo(u32);

    fn ctx(uri: &str) -> RequestContext {
        RequestContext::from_request(Request::builder().uri(uri).body(()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn binds_an_int_under_the_parameter_name() {
        let cache = AdapterCache::new();
        let age = ParameterInfo::named("get_person", 0, "age");
        let delegate = cache.bind_only::<i32>(Some(&age)).unwrap();
        let ctx = ctx("/?age=42");
        delegate.run(&ctx).await.unwrap();
        assert_eq!(ctx.bound_value::<i32>(), Some(42));
        assert_eq!(delegate.parameter_name(), "age");
    }

    #[tokio::test]
    async fn absent_parameter_binds_under_value() {
        let cache = AdapterCache::new();
        let delegate = cache.bind_only::<String>(None).unwrap();
        assert_eq!(delegate.parameter_name(), DEFAULT_PARAMETER_NAME);
        let ctx = ctx("/?value=hello");
        delegate.run(&ctx).await.unwrap();
        assert_eq!(ctx.bound_value::<String>(), Some("hello".to_string()));
    }

    #[test]
    fn repeated_requests_reuse_the_delegate() {
        let cache = AdapterCache::new();
        let p = ParameterInfo::named("h", 0, "foo");
        let first = cache.bind_only::<Foo>(Some(&p)).unwrap();
        let synthesized = cache.synthesized();
        let second = cache.bind_only::<Foo>(Some(&p)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(cache.synthesized(), synthesized);
    }

    #[test]
    fn distinct_keys_get_distinct_delegates() {
        let cache = AdapterCache::new();
        let x = ParameterInfo::named("h", 0, "x");
        let y = ParameterInfo::named("h", 1, "y");
        let ux = cache.bind_only::<u32>(Some(&x)).unwrap();
        let uy = cache.bind_only::<u32>(Some(&y)).unwrap();
        let sx = cache.bind_only::<String>(Some(&x)).unwrap();
        assert!(!ux.ptr_eq(&uy));
        assert!(!ux.ptr_eq(&sx));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn process_cache_is_shared() {
        let p = ParameterInfo::named("process_cache_is_shared", 0, "id");
        let a = get_bind_only_request_delegate::<u64>(Some(&p)).unwrap();
        let b = get_bind_only_request_delegate::<u64>(Some(&p)).unwrap();
        assert!(a.ptr_eq(&b));
        assert!(delegate_cache().get(&AdapterKey::of::<u64>(Some(&p))).is_some());
    }

    #[test]
    fn parameters_object_delegates_are_not_implemented() {
        let err = create_parameters_object_request_delegate::<Foo>().unwrap_err();
        assert!(matches!(err, AppError::NotImplemented(_)));
        assert_eq!(err.status_code(), http::StatusCode::NOT_IMPLEMENTED);
    }
}
