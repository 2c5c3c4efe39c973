use crate::context::RequestContext;
use crate::AppError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Static type identity of a bound value.
#[derive(Clone, Copy, Debug)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    pub fn of<T: 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: type_name::<T>() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, generics stripped.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl Hash for ValueType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

/// Identifies one formal parameter of a route handler. The name is optional,
/// as is the case for compiler generated or positional parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParameterInfo {
    member: Arc<str>,
    position: usize,
    name: Option<Arc<str>>,
}

impl ParameterInfo {
    pub fn new(member: impl Into<Arc<str>>, position: usize, name: Option<&str>) -> Self {
        Self { member: member.into(), position, name: name.map(Arc::from) }
    }

    pub fn named(member: impl Into<Arc<str>>, position: usize, name: &str) -> Self {
        Self::new(member, position, Some(name))
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for ParameterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.member, self.position)?;
        if let Some(name) = &self.name {
            write!(f, "({})", name)?;
        }
        Ok(())
    }
}

/// Resolves a handler argument from the request by parameter name.
pub trait FromRequestContext: Sized + Send + Sync + 'static {
    fn from_request_context(ctx: &RequestContext, name: &str) -> Result<Self, AppError>;
}

impl<T> FromRequestContext for T
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn from_request_context(ctx: &RequestContext, name: &str) -> Result<Self, AppError> {
        match ctx.raw_value(name) {
            Some(raw) => parse_raw(raw).map_err(|e| {
                AppError::BadRequest(format!("Failed to bind parameter \"{}\" from \"{}\": {}", name, raw, e))
            }),
            None => serde_json::from_value(Value::Null).map_err(|_| {
                AppError::BadRequest(format!("Required parameter \"{}\" was not provided", name))
            }),
        }
    }
}

// Route and query values are untyped text: numbers and booleans parse as JSON
// literals, anything else binds as a string.
fn parse_raw<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    match serde_json::from_str::<T>(raw) {
        Ok(v) => Ok(v),
        Err(_) => serde_json::from_value(Value::String(raw.to_string())),
    }
}
