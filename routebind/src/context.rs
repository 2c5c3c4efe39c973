use crate::codegen::BIND_ONLY_ITEMS_KEY;
use crate::AppError;
use http::request::Parts;
use http::Request;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Type-erased value stored in the item store.
pub type BoxedValue = Arc<dyn Any + Send + Sync>;

/// Per-call keyed side table. Last write for a key wins.
#[derive(Default)]
pub struct Items {
    inner: RwLock<HashMap<Arc<str>, BoxedValue>>,
}

impl Items {
    pub fn insert(&self, key: impl Into<Arc<str>>, value: BoxedValue) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.into(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<BoxedValue> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.get_raw(key).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_set().entries(map.keys()).finish()
    }
}

/// The per-request context every synthesized handler receives as its second argument.
#[derive(Debug)]
pub struct RequestContext {
    parts: Parts,
    route_values: HashMap<String, String>,
    query: HashMap<String, String>,
    items: Items,
}

impl RequestContext {
    pub fn from_parts(parts: Parts) -> Result<Self, AppError> {
        let query = match parts.uri.query() {
            Some(q) => serde_urlencoded::from_str::<Vec<(String, String)>>(q)
                .map_err(|e| AppError::BadRequest(format!("invalid query string: {}", e)))?
                .into_iter()
                .collect(),
            None => HashMap::new(),
        };
        Ok(Self { parts, route_values: HashMap::new(), query, items: Items::default() })
    }

    pub fn from_request<B>(request: Request<B>) -> Result<Self, AppError> {
        let (parts, _body) = request.into_parts();
        Self::from_parts(parts)
    }

    pub fn with_route_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_route_value(name, value);
        self
    }

    pub fn set_route_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.route_values.insert(name.into(), value.into());
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Raw request value for a parameter name, route values shadowing the query string.
    pub fn raw_value(&self, name: &str) -> Option<&str> {
        self.route_values.get(name).or_else(|| self.query.get(name)).map(String::as_str)
    }

    /// Value written by the last bind-only handler that ran against this context.
    pub fn bound_value<T: Clone + 'static>(&self) -> Option<T> {
        self.items.get::<T>(BIND_ONLY_ITEMS_KEY)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        let (parts, _) = Request::new(()).into_parts();
        Self { parts, route_values: HashMap::new(), query: HashMap::new(), items: Items::default() }
    }
}
