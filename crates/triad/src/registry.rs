//! # Service Registry
//!
//! Hierarchical, type-keyed lookup of shared services.
//!
//! ```text
//!            root  (shared services: config, asset caches, ...)
//!           /  |  \
//!       main  game  render      role scopes: one child per role
//! ```
//!
//! `get` walks from a scope up to the root on a miss, so a role sees its own
//! services first and the shared ones after. Reads run concurrently, writes
//! are serialized by a `parking_lot::RwLock`.
//!
//! Owned resources that must have exactly one holder (channel endpoints) go
//! through `offer`/`claim` instead. A claim only looks at the scope it is
//! called on, never at the parent: a module can only take what was offered to
//! its own role.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Shared = Arc<dyn Any + Send + Sync>;
type Owned = Box<dyn Any + Send>;

/// A scope in the service hierarchy.
pub struct Registry {
    parent: Option<Arc<Registry>>,
    services: RwLock<HashMap<TypeId, Shared>>,
    offers: Mutex<HashMap<TypeId, Owned>>,
}

impl Registry {
    /// Creates an empty root scope.
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            services: RwLock::new(HashMap::new()),
            offers: Mutex::new(HashMap::new()),
        })
    }

    /// Creates an empty scope whose lookups fall back to `self`.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            services: RwLock::new(HashMap::new()),
            offers: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the parent scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Registry>> {
        self.parent.as_ref()
    }

    /// Registers a shared service in this scope, replacing any previous one of
    /// the same type. Returns the replaced service.
    pub fn insert<T: Any + Send + Sync>(&self, service: T) -> Option<Arc<T>> {
        self.insert_arc(Arc::new(service))
    }

    /// Like [`insert`](Self::insert) for an already shared service.
    pub fn insert_arc<T: Any + Send + Sync>(&self, service: Arc<T>) -> Option<Arc<T>> {
        self.services
            .write()
            .insert(TypeId::of::<T>(), service)
            .and_then(|old| old.downcast::<T>().ok())
    }

    /// Looks up a service, walking to the parent scopes on a miss.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let local = self.services.read().get(&TypeId::of::<T>()).cloned();
        match local {
            Some(service) => service.downcast::<T>().ok(),
            None => self.parent.as_ref().and_then(|parent| parent.get::<T>()),
        }
    }

    /// Returns whether a service of type `T` is visible from this scope.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
            || self.parent.as_ref().is_some_and(|parent| parent.contains::<T>())
    }

    /// Offers an owned resource to be claimed once from this scope.
    ///
    /// Returns `false` (and drops `value`) if an unclaimed offer of the same
    /// type is already pending.
    pub fn offer<T: Any + Send>(&self, value: T) -> bool {
        let mut offers = self.offers.lock();
        if offers.contains_key(&TypeId::of::<T>()) {
            return false;
        }
        offers.insert(TypeId::of::<T>(), Box::new(value));
        true
    }

    /// Takes an offered resource. Only this scope is searched.
    #[must_use]
    pub fn claim<T: Any + Send>(&self) -> Option<T> {
        let offered = self.offers.lock().remove(&TypeId::of::<T>())?;
        offered.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Number of unclaimed offers in this scope.
    #[must_use]
    pub fn pending_offers(&self) -> usize {
        self.offers.lock().len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.services.read().len())
            .field("offers", &self.offers.lock().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
