//! Dependency container
//!
//! The `Container` maps dependency keys to resolvers and resolves values
//! through them. It is a cheap handle: clones share one registry.

use crate::storage::ResolverStorage;
use crate::{
    AnyArc, DependencyKey, DiError, Injectable, IntoDependencyKey, Param, Resolver, Result,
    SingletonResolver,
};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Registry of resolvers keyed by [`DependencyKey`].
///
/// Every container resolves `DependencyKey::of::<Container>()` to itself, so
/// code can ask the current container for "the container" like any other
/// dependency.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::{Container, Resolver};
///
/// #[derive(Debug, PartialEq)]
/// struct Database { url: String }
///
/// let container = Container::new();
/// container.singleton(Database { url: "postgres://localhost".into() });
/// container.set("timeout", Resolver::singleton(30u64)).unwrap();
///
/// assert_eq!(container.get::<Database>().unwrap().url, "postgres://localhost");
/// assert_eq!(*container.resolve_as::<u64>("timeout").unwrap(), 30);
/// assert!(container.resolve("missing").is_err());
///
/// let this = container.get::<Container>().unwrap();
/// assert!(Container::ptr_eq(&this, &container));
/// ```
#[derive(Clone)]
pub struct Container {
    /// Resolver storage (lock-free)
    storage: Arc<ResolverStorage>,
}

impl Container {
    /// Create a new container holding only its self reference.
    #[inline]
    pub fn new() -> Self {
        Self::from_storage(ResolverStorage::new())
    }

    /// Create a container with pre-allocated capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(ResolverStorage::with_capacity(capacity + 1))
    }

    fn from_storage(storage: ResolverStorage) -> Self {
        storage.insert(DependencyKey::of::<Container>(), Resolver::Container);

        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            dependencies = storage.len(),
            "Creating DI container"
        );

        Self {
            storage: Arc::new(storage),
        }
    }

    /// Whether two handles refer to the same container.
    #[inline]
    pub fn ptr_eq(a: &Container, b: &Container) -> bool {
        Arc::ptr_eq(&a.storage, &b.storage)
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Install `resolver` for `key`, replacing any previous resolver.
    ///
    /// Fails only if the key cannot be normalized or the resolver can never
    /// produce a value.
    pub fn set(&self, key: impl IntoDependencyKey, resolver: Resolver) -> Result<()> {
        let key = key.into_key()?;
        resolver.validate(&key)?;
        self.install(key, resolver);
        Ok(())
    }

    fn install(&self, key: DependencyKey, resolver: Resolver) {
        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            dependency = %key,
            resolver = resolver.kind(),
            "Registering dependency"
        );

        let _replaced = self.storage.insert(key, resolver);

        #[cfg(feature = "logging")]
        if let Some(previous) = _replaced {
            trace!(
                target: "ambient_injector",
                previous = previous.kind(),
                "Replaced previous resolver"
            );
        }
    }

    /// Register a singleton keyed by its type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ambient_injector::Container;
    ///
    /// struct Config { debug: bool }
    ///
    /// let container = Container::new();
    /// container.singleton(Config { debug: true });
    /// assert!(container.get::<Config>().unwrap().debug);
    /// ```
    #[inline]
    pub fn singleton<T: Injectable>(&self, value: T) {
        self.install(DependencyKey::of::<T>(), Resolver::singleton(value));
    }

    /// Register a type factory keyed by its type; every resolve constructs a
    /// new instance.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ambient_injector::Container;
    /// use std::sync::Arc;
    ///
    /// struct Counter;
    ///
    /// let container = Container::new();
    /// container.transient(|| Counter);
    ///
    /// let a = container.get::<Counter>().unwrap();
    /// let b = container.get::<Counter>().unwrap();
    /// assert!(!Arc::ptr_eq(&a, &b));
    /// ```
    #[inline]
    pub fn transient<T: Injectable, F>(&self, make: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.install(DependencyKey::of::<T>(), Resolver::type_factory(make));
    }

    /// Register a scoped dependency keyed by its type.
    #[inline]
    pub fn scoped<T: Injectable, F>(&self, make: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.install(DependencyKey::of::<T>(), Resolver::scoped(make));
    }

    /// Register a scoped dependency keyed by its type, disposing each
    /// instance when its scope exits.
    #[inline]
    pub fn scoped_with_dispose<T: Injectable, F, D>(&self, make: F, dispose: D)
    where
        F: Fn() -> T + Send + Sync + 'static,
        D: Fn(Arc<T>) + Send + Sync + 'static,
    {
        self.install(
            DependencyKey::of::<T>(),
            Resolver::scoped_with_dispose(make, dispose),
        );
    }

    /// Register a per-thread dependency keyed by its type.
    #[inline]
    pub fn per_thread<T: Injectable, F>(&self, make: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.install(DependencyKey::of::<T>(), Resolver::per_thread(make));
    }

    /// Register a function resolver under `key`.
    #[inline]
    pub fn function<T: Injectable, F>(&self, key: impl IntoDependencyKey, callback: F) -> Result<()>
    where
        F: Fn(&Container, Option<&Param>) -> Result<T> + Send + Sync + 'static,
    {
        self.set(key, Resolver::function(callback))
    }

    /// Add a value under `key` and `param`.
    ///
    /// Extends the existing singleton resolver for `key` (overwriting the
    /// value for the same param), or installs a new singleton resolver when
    /// `key` has none or has a resolver of another kind.
    pub fn add_value<T: Injectable>(
        &self,
        key: impl IntoDependencyKey,
        value: T,
        param: Option<Param>,
    ) -> Result<()> {
        let key = key.into_key()?;

        #[cfg(feature = "logging")]
        trace!(
            target: "ambient_injector",
            dependency = %key,
            param = ?param,
            "Adding singleton value"
        );

        self.storage.upsert(key, |existing| match existing {
            Some(Resolver::Singleton(singleton)) => {
                singleton.add_value(value, param);
                None
            }
            _ => Some(Resolver::Singleton(SingletonResolver::with_value(
                value, param,
            ))),
        });
        Ok(())
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve a dependency.
    ///
    /// Fails with [`DiError::NotFound`] when no resolver is registered for
    /// `key`; errors raised by the resolver propagate unchanged.
    #[inline]
    pub fn resolve(&self, key: impl IntoDependencyKey) -> Result<AnyArc> {
        self.resolve_param(key, None)
    }

    /// Resolve a dependency for `param`.
    #[inline]
    pub fn resolve_with(&self, key: impl IntoDependencyKey, param: impl Into<Param>) -> Result<AnyArc> {
        self.resolve_param(key, Some(&param.into()))
    }

    /// Resolve a dependency with an optional param.
    pub fn resolve_param(&self, key: impl IntoDependencyKey, param: Option<&Param>) -> Result<AnyArc> {
        let key = key.into_key()?;

        #[cfg(feature = "logging")]
        trace!(
            target: "ambient_injector",
            dependency = %key,
            param = ?param,
            "Resolving dependency"
        );

        let Some(resolver) = self.storage.get(&key) else {
            #[cfg(feature = "logging")]
            debug!(
                target: "ambient_injector",
                dependency = %key,
                "Dependency not found in container"
            );
            return Err(DiError::not_found(key));
        };

        resolver.resolve(self, &key, param)
    }

    /// Resolve a dependency and downcast it to `T`.
    #[inline]
    pub fn resolve_as<T: Injectable>(&self, key: impl IntoDependencyKey) -> Result<Arc<T>> {
        let key = key.into_key()?;
        let value = self.resolve_param(&key, None)?;
        downcast(key, value)
    }

    /// Resolve a dependency for `param` and downcast it to `T`.
    #[inline]
    pub fn resolve_as_with<T: Injectable>(
        &self,
        key: impl IntoDependencyKey,
        param: impl Into<Param>,
    ) -> Result<Arc<T>> {
        let key = key.into_key()?;
        let value = self.resolve_param(&key, Some(&param.into()))?;
        downcast(key, value)
    }

    /// Resolve a dependency keyed by its own type.
    #[inline]
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>> {
        self.resolve_as::<T>(DependencyKey::of::<T>())
    }

    /// Resolve a dependency, returning `None` if it is not registered.
    ///
    /// Only absence of the key becomes `None`; every other failure, including
    /// a singleton with no value for the param, is still an error.
    pub fn try_resolve(&self, key: impl IntoDependencyKey) -> Result<Option<AnyArc>> {
        let key = key.into_key()?;
        match self.storage.get(&key) {
            Some(resolver) => resolver.resolve(self, &key, None).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve a dependency keyed by its own type, returning `None` if it is
    /// not registered.
    ///
    /// Same rule as [`Container::try_resolve`]: a type mismatch or a failing
    /// resolver is still an error.
    pub fn try_get<T: Injectable>(&self) -> Result<Option<Arc<T>>> {
        let key = DependencyKey::of::<T>();
        self.try_resolve(&key)?
            .map(|value| downcast(key, value))
            .transpose()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The resolver registered for `key`.
    pub fn get_resolver(&self, key: impl IntoDependencyKey) -> Option<Arc<Resolver>> {
        let key = key.into_key().ok()?;
        self.storage.get(&key)
    }

    /// Check if a resolver is registered for `key`.
    pub fn contains(&self, key: impl IntoDependencyKey) -> bool {
        key.into_key().is_ok_and(|key| self.storage.contains(&key))
    }

    /// Remove the resolver for `key`.
    pub fn remove(&self, key: impl IntoDependencyKey) -> bool {
        key.into_key().is_ok_and(|key| self.storage.remove(&key))
    }

    /// Number of registered keys, including the self reference.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if no keys are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// All registered keys.
    pub fn keys(&self) -> Vec<DependencyKey> {
        self.storage.keys()
    }

    /// Deep-independent copy of this container.
    ///
    /// Later registrations on either container are invisible to the other.
    /// Singleton values are carried over; scoped and per-thread caches start
    /// empty. The copy resolves `Container` to itself.
    pub fn copy(&self) -> Container {
        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            dependencies = self.storage.len(),
            "Copying DI container"
        );

        Self::from_storage(self.storage.snapshot())
    }
}

fn downcast<T: Injectable>(key: DependencyKey, value: AnyArc) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| DiError::type_mismatch::<T>(key))
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("dependencies", &self.storage.len())
            .finish()
    }
}

// =============================================================================
// Container Builder
// =============================================================================

type RegistrationFn = Box<dyn Fn(&Container) -> Result<()> + Send + Sync>;

/// Reusable registration recipe.
///
/// Useful when many containers (one per test, tenant or request) need the
/// same set of dependencies.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::ContainerBuilder;
///
/// #[derive(Clone)]
/// struct AppConfig { name: String }
///
/// struct RequestId(u64);
///
/// let builder = ContainerBuilder::new()
///     .with_singleton(AppConfig { name: "app".into() })
///     .with_scoped(|| RequestId(7));
///
/// let first = builder.build().unwrap();
/// let second = builder.build().unwrap();
/// assert_eq!(first.get::<AppConfig>().unwrap().name, "app");
/// assert_eq!(second.get::<RequestId>().unwrap().0, 7);
/// ```
pub struct ContainerBuilder {
    registrations: Vec<RegistrationFn>,
}

impl ContainerBuilder {
    /// Create a new empty builder.
    #[inline]
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Register a clone of `value` as a singleton keyed by its type.
    pub fn with_singleton<T: Injectable + Clone>(mut self, value: T) -> Self {
        self.registrations.push(Box::new(move |container| {
            container.singleton(value.clone());
            Ok(())
        }));
        self
    }

    /// Register a type factory keyed by its type.
    pub fn with_transient<T, F>(mut self, make: F) -> Self
    where
        T: Injectable,
        F: Fn() -> T + Send + Sync + Clone + 'static,
    {
        self.registrations.push(Box::new(move |container| {
            container.transient(make.clone());
            Ok(())
        }));
        self
    }

    /// Register a scoped dependency keyed by its type.
    pub fn with_scoped<T, F>(mut self, make: F) -> Self
    where
        T: Injectable,
        F: Fn() -> T + Send + Sync + Clone + 'static,
    {
        self.registrations.push(Box::new(move |container| {
            container.scoped(make.clone());
            Ok(())
        }));
        self
    }

    /// Register a per-thread dependency keyed by its type.
    pub fn with_per_thread<T, F>(mut self, make: F) -> Self
    where
        T: Injectable,
        F: Fn() -> T + Send + Sync + Clone + 'static,
    {
        self.registrations.push(Box::new(move |container| {
            container.per_thread(make.clone());
            Ok(())
        }));
        self
    }

    /// Register a resolver under `key`; `resolver` is called once per build.
    pub fn with_resolver<F>(mut self, key: impl Into<String>, resolver: F) -> Self
    where
        F: Fn() -> Resolver + Send + Sync + 'static,
    {
        let key = key.into();
        self.registrations
            .push(Box::new(move |container| container.set(&key, resolver())));
        self
    }

    /// Build a fresh container.
    pub fn build(&self) -> Result<Container> {
        self.apply(Container::new())
    }

    /// Build from a copy of `base`; recipe entries override `base` entries.
    pub fn build_from(&self, base: &Container) -> Result<Container> {
        self.apply(base.copy())
    }

    fn apply(&self, container: Container) -> Result<Container> {
        for register in &self.registrations {
            register(&container)?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            registrations = self.registrations.len(),
            dependencies = container.len(),
            "Built container from recipe"
        );

        Ok(container)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
