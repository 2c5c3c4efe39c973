use crate::binding::{ParameterInfo, ValueType};
use crate::codegen::DEFAULT_PARAMETER_NAME;
use crate::delegate::RequestDelegate;
use crate::{warn, AppError};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdapterKey {
    value_type: ValueType,
    parameter: Option<ParameterInfo>,
}

impl AdapterKey {
    pub fn of<T: 'static>(parameter: Option<&ParameterInfo>) -> Self {
        Self { value_type: ValueType::of::<T>(), parameter: parameter.cloned() }
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn parameter(&self) -> Option<&ParameterInfo> {
        self.parameter.as_ref()
    }

    pub fn parameter_name(&self) -> &str {
        self.parameter.as_ref().and_then(ParameterInfo::name).unwrap_or(DEFAULT_PARAMETER_NAME)
    }
}

/// Memoizes synthesized delegates per key for the lifetime of the cache.
///
/// Synthesis runs outside of any lock, so concurrent first requests for one key may
/// each build a candidate. The first installed candidate wins and every caller gets it.
#[derive(Default)]
pub struct AdapterCache {
    inner: RwLock<HashMap<AdapterKey, RequestDelegate>>,
    synthesized: AtomicUsize,
}

impl AdapterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AdapterKey) -> Option<RequestDelegate> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    pub fn get_or_create<F>(&self, key: AdapterKey, factory: F) -> Result<RequestDelegate, AppError>
    where
        F: FnOnce(&AdapterKey) -> Result<RequestDelegate, AppError>,
    {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        self.synthesized.fetch_add(1, Ordering::Relaxed);
        let candidate = factory(&key)?;

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.entry(key) {
            Entry::Occupied(winner) => {
                warn!("Discarding delegate for {:?} {}, another one was installed first", winner.key().value_type().name(), winner.key().parameter_name());
                Ok(winner.get().clone())
            }
            Entry::Vacant(slot) => Ok(slot.insert(candidate).clone()),
        }
    }

    /// Number of times a factory was run, including candidates lost to a race.
    pub fn synthesized(&self) -> usize {
        self.synthesized.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
