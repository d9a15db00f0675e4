//! Type-indexed service environment.
//!
//! Programs read services with [`Fx::service`](super::Fx::service) or
//! [`Fx::access`](super::Fx::access) and inject them with
//! [`Fx::provide`](super::Fx::provide). Provided services shadow outer ones
//! for the extent of the provided program only.

use crate::types::value::erase;
use crate::types::{Data, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An immutable map from service type to service value.
#[derive(Clone, Default)]
pub struct Env {
    services: Arc<HashMap<TypeId, Value>>,
}

impl Env {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this environment with `service` added (or replaced).
    #[must_use]
    pub fn with<S: Data>(&self, service: S) -> Self {
        let mut services = (*self.services).clone();
        services.insert(TypeId::of::<S>(), erase(service));
        Self {
            services: Arc::new(services),
        }
    }

    /// Returns the service of type `S`, if present.
    #[must_use]
    pub fn get<S: Data>(&self) -> Option<S> {
        self.services
            .get(&TypeId::of::<S>())
            .and_then(|value| value.downcast_ref::<S>())
            .cloned()
    }

    /// Returns true if a service of type `S` is present.
    #[must_use]
    pub fn contains<S: Data>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<S>())
    }

    /// Returns the number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no services are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Layers `inner` over `self`; services in `inner` win.
    #[must_use]
    pub fn union(&self, inner: &Self) -> Self {
        if inner.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return inner.clone();
        }
        let mut services = (*self.services).clone();
        services.extend(inner.services.iter().map(|(k, v)| (*k, Arc::clone(v))));
        Self {
            services: Arc::new(services),
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("services", &self.services.len())
            .finish()
    }
}
