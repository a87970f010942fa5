//! Resolver strategies
//!
//! A [`Resolver`] produces the value for one dependency key. The set of
//! strategies is closed: every variant is handled exhaustively in
//! [`Resolver::resolve`].
//!
//! Values are stored type-erased as [`AnyArc`]; the typed constructors wrap
//! the caller's closures so the hot path never touches generics.

use crate::scope::current_scope;
use crate::{Container, DependencyKey, DiError, Injectable, Param, Result, ScopeId};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::sync::Arc;
use std::thread::ThreadId;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Type-erased resolved value.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Type-erased constructor
type MakeFn = Arc<dyn Fn() -> AnyArc + Send + Sync>;

/// Type-erased function resolver callback
type CallbackFn = Arc<dyn Fn(&Container, Option<&Param>) -> Result<AnyArc> + Send + Sync>;

/// Type-erased dispose hook
type DisposeFn = Arc<dyn Fn(AnyArc) + Send + Sync>;

#[inline]
fn erase<T: Injectable, F>(make: F) -> MakeFn
where
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Arc::new(make()) as AnyArc)
}

// =============================================================================
// Singleton Resolver
// =============================================================================

/// Fixed values, one per param.
///
/// Adding a value for a param that already has one overwrites it.
pub struct SingletonResolver {
    values: DashMap<Option<Param>, AnyArc, RandomState>,
}

impl SingletonResolver {
    /// Create an empty singleton resolver.
    #[inline]
    pub fn new() -> Self {
        Self {
            values: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Create with a first value.
    pub fn with_value<T: Injectable>(value: T, param: Option<Param>) -> Self {
        let resolver = Self::new();
        resolver.add_value(value, param);
        resolver
    }

    /// Store `value` under `param`, replacing any previous value.
    #[inline]
    pub fn add_value<T: Injectable>(&self, value: T, param: Option<Param>) {
        self.add_arc(Arc::new(value), param);
    }

    /// Store an already shared value under `param`, replacing any previous value.
    #[inline]
    pub fn add_arc(&self, value: AnyArc, param: Option<Param>) {
        self.values.insert(param, value);
    }

    /// Whether a value exists for `param`.
    #[inline]
    pub fn contains(&self, param: Option<&Param>) -> bool {
        self.values.contains_key(&param.cloned())
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn resolve(&self, key: &DependencyKey, param: Option<&Param>) -> Result<AnyArc> {
        self.values
            .get(&param.cloned())
            .map(|value| Arc::clone(value.value()))
            .ok_or_else(|| DiError::param_not_found(key.clone(), param.cloned()))
    }
}

impl Default for SingletonResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SingletonResolver {
    fn clone(&self) -> Self {
        let values = DashMap::with_capacity_and_hasher(self.values.len(), RandomState::new());
        for entry in self.values.iter() {
            values.insert(entry.key().clone(), Arc::clone(entry.value()));
        }
        Self { values }
    }
}

// =============================================================================
// Function Resolver
// =============================================================================

/// Calls a callback with the container and param on every resolve.
#[derive(Clone)]
pub struct FunctionResolver {
    callback: CallbackFn,
}

impl FunctionResolver {
    /// Create from a typed callback.
    pub fn new<T: Injectable, F>(callback: F) -> Self
    where
        F: Fn(&Container, Option<&Param>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(move |container, param| {
                callback(container, param).map(|value| Arc::new(value) as AnyArc)
            }),
        }
    }

    /// Create from a callback that already returns type-erased values.
    pub fn from_any<F>(callback: F) -> Self
    where
        F: Fn(&Container, Option<&Param>) -> Result<AnyArc> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    #[inline]
    fn resolve(&self, container: &Container, param: Option<&Param>) -> Result<AnyArc> {
        (self.callback)(container, param)
    }
}

// =============================================================================
// Type Factory Resolver
// =============================================================================

/// Constructs a new instance on every resolve.
#[derive(Clone)]
pub struct TypeFactoryResolver {
    make: MakeFn,
    /// Type name for logging
    #[cfg(feature = "logging")]
    type_name: &'static str,
}

impl TypeFactoryResolver {
    /// Create a new type factory resolver
    #[inline]
    pub fn new<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            make: erase(make),
            #[cfg(feature = "logging")]
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Create a new instance
    #[inline]
    pub fn create(&self) -> AnyArc {
        #[cfg(feature = "logging")]
        trace!(
            target: "ambient_injector",
            service = self.type_name,
            "Creating new instance"
        );

        (self.make)()
    }
}

// =============================================================================
// Scoped Resolver
// =============================================================================

/// One instance per scope, disposed when that scope exits.
pub struct ScopedResolver {
    make: MakeFn,
    dispose: Option<DisposeFn>,
    instances: Arc<DashMap<ScopeId, AnyArc, RandomState>>,
    #[cfg(feature = "logging")]
    type_name: &'static str,
}

impl ScopedResolver {
    /// Create a scoped resolver without a dispose hook.
    pub fn new<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            make: erase(make),
            dispose: None,
            instances: Arc::new(DashMap::with_hasher(RandomState::new())),
            #[cfg(feature = "logging")]
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Create a scoped resolver that hands each instance to `dispose` when its
    /// scope exits.
    pub fn with_dispose<T: Injectable, F, D>(make: F, dispose: D) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        D: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let mut resolver = Self::new(make);
        resolver.dispose = Some(Arc::new(move |instance: AnyArc| {
            if let Ok(instance) = instance.downcast::<T>() {
                dispose(instance);
            }
        }));
        resolver
    }

    /// Number of scopes currently holding an instance.
    #[inline]
    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    fn resolve(&self) -> Result<AnyArc> {
        let scope = current_scope();
        let scope_id = scope.id();

        if let Some(instance) = self.instances.get(&scope_id) {
            return Ok(Arc::clone(instance.value()));
        }

        match self.instances.entry(scope_id) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) if scope.is_default() => {
                // The default scope never exits; its instances live with the resolver
                let instance = (self.make)();
                entry.insert(Arc::clone(&instance));
                Ok(instance)
            }
            Entry::Vacant(entry) => {
                let instances = Arc::clone(&self.instances);
                let dispose = self.dispose.clone();
                #[cfg(feature = "logging")]
                let type_name = self.type_name;

                scope.on_exit(move |scope| {
                    let Some((_, instance)) = instances.remove(&scope.id()) else {
                        return;
                    };

                    #[cfg(feature = "logging")]
                    debug!(
                        target: "ambient_injector",
                        service = type_name,
                        scope_id = scope.id().id(),
                        "Disposing scoped instance"
                    );

                    if let Some(dispose) = dispose {
                        dispose(instance);
                    }
                })?;

                #[cfg(feature = "logging")]
                debug!(
                    target: "ambient_injector",
                    service = self.type_name,
                    scope_id = scope_id.id(),
                    "Creating scoped instance"
                );

                let instance = (self.make)();
                entry.insert(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }
}

impl Clone for ScopedResolver {
    /// The clone shares the constructor and dispose hook but starts with no
    /// instances.
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
            dispose: self.dispose.clone(),
            instances: Arc::new(DashMap::with_hasher(RandomState::new())),
            #[cfg(feature = "logging")]
            type_name: self.type_name,
        }
    }
}

// =============================================================================
// Per-Thread Resolver
// =============================================================================

/// One instance per OS thread, kept for the life of the resolver.
pub struct PerThreadResolver {
    make: MakeFn,
    instances: DashMap<ThreadId, AnyArc, RandomState>,
    #[cfg(feature = "logging")]
    type_name: &'static str,
}

impl PerThreadResolver {
    /// Create a new per-thread resolver
    pub fn new<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            make: erase(make),
            instances: DashMap::with_hasher(RandomState::new()),
            #[cfg(feature = "logging")]
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Number of threads holding an instance.
    #[inline]
    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    fn resolve(&self) -> AnyArc {
        let thread_id = std::thread::current().id();

        if let Some(instance) = self.instances.get(&thread_id) {
            return Arc::clone(instance.value());
        }

        let instance = self.instances.entry(thread_id).or_insert_with(|| {
            #[cfg(feature = "logging")]
            debug!(
                target: "ambient_injector",
                service = self.type_name,
                thread = ?thread_id,
                "Creating per-thread instance"
            );

            (self.make)()
        });
        Arc::clone(instance.value())
    }
}

impl Clone for PerThreadResolver {
    /// The clone shares the constructor but starts with no instances.
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
            instances: DashMap::with_hasher(RandomState::new()),
            #[cfg(feature = "logging")]
            type_name: self.type_name,
        }
    }
}

// =============================================================================
// Resolver - closed set of strategies
// =============================================================================

/// Strategy that produces the value for a dependency.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::{Container, Param, Resolver};
///
/// let container = Container::new();
/// container
///     .set(
///         "greeting",
///         Resolver::function(|_, param: Option<&Param>| {
///             Ok(match param {
///                 None => "hi".to_string(),
///                 Some(name) => format!("hi {name}"),
///             })
///         }),
///     )
///     .unwrap();
///
/// assert_eq!(*container.resolve_as::<String>("greeting").unwrap(), "hi");
/// assert_eq!(*container.resolve_as_with::<String>("greeting", "bob").unwrap(), "hi bob");
/// ```
#[derive(Clone)]
pub enum Resolver {
    /// Yields the container being resolved from
    Container,
    /// Fixed values per param
    Singleton(SingletonResolver),
    /// Callback per resolve
    Function(FunctionResolver),
    /// New instance per resolve
    TypeFactory(TypeFactoryResolver),
    /// One instance per scope
    Scoped(ScopedResolver),
    /// One instance per thread
    PerThread(PerThreadResolver),
}

impl Resolver {
    /// Singleton resolver with one unparameterized value.
    #[inline]
    pub fn singleton<T: Injectable>(value: T) -> Self {
        Resolver::Singleton(SingletonResolver::with_value(value, None))
    }

    /// Singleton resolver with one value under `param`.
    #[inline]
    pub fn singleton_for<T: Injectable>(value: T, param: impl Into<Param>) -> Self {
        Resolver::Singleton(SingletonResolver::with_value(value, Some(param.into())))
    }

    /// Function resolver.
    #[inline]
    pub fn function<T: Injectable, F>(callback: F) -> Self
    where
        F: Fn(&Container, Option<&Param>) -> Result<T> + Send + Sync + 'static,
    {
        Resolver::Function(FunctionResolver::new(callback))
    }

    /// Type factory resolver.
    #[inline]
    pub fn type_factory<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Resolver::TypeFactory(TypeFactoryResolver::new(make))
    }

    /// Scoped resolver.
    #[inline]
    pub fn scoped<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Resolver::Scoped(ScopedResolver::new(make))
    }

    /// Scoped resolver with a dispose hook.
    #[inline]
    pub fn scoped_with_dispose<T: Injectable, F, D>(make: F, dispose: D) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        D: Fn(Arc<T>) + Send + Sync + 'static,
    {
        Resolver::Scoped(ScopedResolver::with_dispose(make, dispose))
    }

    /// Per-thread resolver.
    #[inline]
    pub fn per_thread<T: Injectable, F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Resolver::PerThread(PerThreadResolver::new(make))
    }

    /// Short name of the strategy.
    pub fn kind(&self) -> &'static str {
        match self {
            Resolver::Container => "container",
            Resolver::Singleton(_) => "singleton",
            Resolver::Function(_) => "function",
            Resolver::TypeFactory(_) => "type_factory",
            Resolver::Scoped(_) => "scoped",
            Resolver::PerThread(_) => "per_thread",
        }
    }

    /// Reject resolvers that can never produce a value.
    pub(crate) fn validate(&self, key: &DependencyKey) -> Result<()> {
        match self {
            Resolver::Singleton(singleton) if singleton.is_empty() => Err(DiError::InvalidResolver {
                key: key.clone(),
                reason: "singleton resolver has no values".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Produce the value for `key`.
    ///
    /// `container` is the container the key was looked up in, so callbacks
    /// can resolve further dependencies from it.
    pub fn resolve(
        &self,
        container: &Container,
        key: &DependencyKey,
        param: Option<&Param>,
    ) -> Result<AnyArc> {
        match self {
            Resolver::Container => Ok(Arc::new(container.clone()) as AnyArc),
            Resolver::Singleton(r) => r.resolve(key, param),
            Resolver::Function(r) => r.resolve(container, param),
            Resolver::TypeFactory(r) => Ok(r.create()),
            Resolver::Scoped(r) => r.resolve(),
            Resolver::PerThread(r) => Ok(r.resolve()),
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resolver").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scope;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestService {
        id: u32,
    }

    fn key() -> DependencyKey {
        DependencyKey::name("test")
    }

    fn resolve_service(resolver: &Resolver, container: &Container) -> Arc<TestService> {
        resolver
            .resolve(container, &key(), None)
            .unwrap()
            .downcast::<TestService>()
            .unwrap()
    }

    #[test]
    fn test_singleton_same_instance() {
        let container = Container::new();
        let resolver = Resolver::singleton(TestService { id: 42 });

        let a = resolve_service(&resolver, &container);
        let b = resolve_service(&resolver, &container);

        assert_eq!(a.id, 42);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_singleton_params() {
        let container = Container::new();
        let singleton = SingletonResolver::with_value(TestService { id: 0 }, None);
        singleton.add_value(TestService { id: 1 }, Some(Param::from(1)));
        let resolver = Resolver::Singleton(singleton);

        let by_param = resolver
            .resolve(&container, &key(), Some(&Param::from(1)))
            .unwrap()
            .downcast::<TestService>()
            .unwrap();
        assert_eq!(by_param.id, 1);
        assert_eq!(resolve_service(&resolver, &container).id, 0);

        let missing = resolver.resolve(&container, &key(), Some(&Param::from("other")));
        assert!(matches!(
            missing,
            Err(DiError::NotFound { param: Some(Param::Name(_)), .. })
        ));
    }

    #[test]
    fn test_singleton_overwrites_same_param() {
        let singleton = SingletonResolver::new();
        singleton.add_value(TestService { id: 1 }, Some(Param::from("a")));
        singleton.add_value(TestService { id: 2 }, Some(Param::from("a")));

        assert_eq!(singleton.len(), 1);
        let resolver = Resolver::Singleton(singleton);
        let value = resolver
            .resolve(&Container::new(), &key(), Some(&Param::from("a")))
            .unwrap()
            .downcast::<TestService>()
            .unwrap();
        assert_eq!(value.id, 2);
    }

    #[test]
    fn test_empty_singleton_invalid() {
        let resolver = Resolver::Singleton(SingletonResolver::new());
        assert!(matches!(
            resolver.validate(&key()),
            Err(DiError::InvalidResolver { .. })
        ));
        assert!(Resolver::singleton(1u8).validate(&key()).is_ok());
    }

    #[test]
    fn test_function_receives_container_and_param() {
        let container = Container::new();
        container.singleton(TestService { id: 7 });
        let resolver = Resolver::function(|container, param| {
            let base = container.get::<TestService>()?;
            let offset = match param {
                Some(Param::Index(n)) => *n as u32,
                _ => 0,
            };
            Ok(TestService {
                id: base.id + offset,
            })
        });

        assert_eq!(resolve_service(&resolver, &container).id, 7);
        let with_param = resolver
            .resolve(&container, &key(), Some(&Param::from(3)))
            .unwrap()
            .downcast::<TestService>()
            .unwrap();
        assert_eq!(with_param.id, 10);
    }

    #[test]
    fn test_function_error_propagates() {
        let resolver = Resolver::function(|_, _| -> Result<TestService> {
            Err(DiError::creation_failed(key(), "offline"))
        });
        let result = resolver.resolve(&Container::new(), &key(), None);
        assert!(matches!(result, Err(DiError::CreationFailed { .. })));
    }

    #[test]
    fn test_type_factory_new_instances() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let container = Container::new();
        let resolver = Resolver::type_factory(|| TestService {
            id: COUNTER.fetch_add(1, Ordering::SeqCst),
        });

        let a = resolve_service(&resolver, &container);
        let b = resolve_service(&resolver, &container);

        assert_ne!(a.id, b.id);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_scoped_default_scope_registers_no_callbacks() {
        let default = Scope::default_scope();
        let before = default.callback_count();
        let container = Container::new();

        for _ in 0..100 {
            let resolver = Resolver::scoped(|| TestService { id: 0 });
            let instance = Arc::downgrade(&resolve_service(&resolver, &container));
            assert!(instance.upgrade().is_some());

            // Dropping the resolver releases its default-scope instance
            drop(resolver);
            assert!(instance.upgrade().is_none());
        }

        assert!(default.is_default());
        assert_eq!(default.callback_count(), before);
    }

    #[test]
    fn test_scoped_instance_per_scope() {
        let container = Container::new();
        let resolver = Resolver::scoped(|| TestService { id: 0 });

        Scope::run(|_| {
            let outer = resolve_service(&resolver, &container);
            assert!(Arc::ptr_eq(&outer, &resolve_service(&resolver, &container)));

            Scope::run(|_| {
                let inner = resolve_service(&resolver, &container);
                assert!(Arc::ptr_eq(&inner, &resolve_service(&resolver, &container)));
                assert!(!Arc::ptr_eq(&inner, &outer));
            });
        });

        let Resolver::Scoped(scoped) = &resolver else {
            unreachable!()
        };
        assert_eq!(scoped.live_instances(), 0);
    }

    #[test]
    fn test_scoped_dispose_lifo() {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let disposed = Arc::new(Mutex::new(Vec::new()));

        let container = Container::new();
        let resolver = {
            let disposed = Arc::clone(&disposed);
            Resolver::scoped_with_dispose(
                || TestService {
                    id: NEXT.fetch_add(1, Ordering::SeqCst),
                },
                move |instance: Arc<TestService>| disposed.lock().unwrap().push(instance.id),
            )
        };

        let (outer, inner) = Scope::run(|_| {
            let outer = resolve_service(&resolver, &container).id;
            let inner = Scope::run(|_| resolve_service(&resolver, &container).id);
            (outer, inner)
        });

        assert_eq!(*disposed.lock().unwrap(), vec![inner, outer]);
    }

    #[test]
    fn test_scoped_not_disposed_on_resolve() {
        let disposed = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        let resolver = {
            let disposed = Arc::clone(&disposed);
            Resolver::scoped_with_dispose(
                || TestService { id: 1 },
                move |_| {
                    disposed.fetch_add(1, Ordering::SeqCst);
                },
            )
        };

        Scope::run(|_| {
            resolve_service(&resolver, &container);
            resolve_service(&resolver, &container);
            assert_eq!(disposed.load(Ordering::SeqCst), 0);
        });
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_per_thread_instances() {
        let container = Container::new();
        let resolver = Arc::new(Resolver::per_thread(|| TestService { id: 0 }));

        let a = resolve_service(&resolver, &container);
        let b = resolve_service(&resolver, &container);
        assert!(Arc::ptr_eq(&a, &b));

        let other = {
            let resolver = Arc::clone(&resolver);
            let container = container.clone();
            std::thread::spawn(move || resolve_service(&resolver, &container))
                .join()
                .unwrap()
        };
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn test_clone_starts_fresh_caches() {
        let container = Container::new();
        let resolver = Resolver::per_thread(|| TestService { id: 0 });
        let original = resolve_service(&resolver, &container);

        let copy = resolver.clone();
        let copied = resolve_service(&copy, &container);
        assert!(!Arc::ptr_eq(&original, &copied));
    }

    #[test]
    fn test_container_variant_yields_container() {
        let container = Container::new();
        let resolved = Resolver::Container
            .resolve(&container, &key(), None)
            .unwrap()
            .downcast::<Container>()
            .unwrap();
        assert!(Container::ptr_eq(&resolved, &container));
    }
}
