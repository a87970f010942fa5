//! Scope lifetimes
//!
//! A [`Scope`] bounds the lifetime of instances produced by scoped resolvers.
//! It moves through `Created → Active → Exited`; on exit its callbacks run in
//! reverse registration order, which is how scoped instances get disposed.

use crate::context;
use crate::{DiError, Result};
use once_cell::sync::Lazy;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Unique scope identifier.
///
/// Ids come from a process-wide counter and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    #[inline]
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Lifecycle state of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Constructed, not yet entered
    Created,
    /// Entered and not yet exited
    Active,
    /// Exited; terminal
    Exited,
}

type ExitCallback = Box<dyn FnOnce(&Scope) + Send>;

struct Lifecycle {
    state: ScopeState,
    callbacks: Vec<ExitCallback>,
}

struct ScopeInner {
    id: ScopeId,
    lifecycle: Mutex<Lifecycle>,
}

/// A lifetime-bounded execution region.
///
/// Cloning a `Scope` yields another handle to the same scope.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::{Scope, ScopeState};
/// use std::sync::{Arc, Mutex};
///
/// let order = Arc::new(Mutex::new(Vec::new()));
/// let scope = Scope::new();
///
/// {
///     let _guard = scope.enter();
///     for n in 1..=3 {
///         let order = Arc::clone(&order);
///         scope.on_exit(move |_| order.lock().unwrap().push(n)).unwrap();
///     }
/// }
///
/// assert_eq!(scope.state(), ScopeState::Exited);
/// assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

static DEFAULT_SCOPE: Lazy<Scope> = Lazy::new(|| {
    let scope = Scope::new();
    scope.activate();

    #[cfg(feature = "logging")]
    debug!(
        target: "ambient_injector",
        scope_id = scope.id().id(),
        "Default scope activated"
    );

    scope
});

impl Scope {
    /// Create a new scope in the `Created` state.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId::next(),
                lifecycle: Mutex::new(Lifecycle {
                    state: ScopeState::Created,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// The process-wide scope used when no scope has been entered.
    ///
    /// It is always active and never exits.
    pub fn default_scope() -> Scope {
        DEFAULT_SCOPE.clone()
    }

    /// Get the scope identifier.
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScopeState {
        self.lifecycle().state
    }

    /// Whether the scope is currently active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == ScopeState::Active
    }

    /// Whether this is the process-wide default scope, which never exits.
    #[inline]
    pub fn is_default(&self) -> bool {
        Lazy::get(&DEFAULT_SCOPE).is_some_and(|default| default == self)
    }

    /// Number of exit callbacks waiting to run.
    pub fn callback_count(&self) -> usize {
        self.lifecycle().callbacks.len()
    }

    /// Register a callback to run when the scope exits.
    ///
    /// Callbacks run in reverse registration order. Fails with
    /// [`DiError::ScopeExited`] once the scope has exited.
    pub fn on_exit<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Scope) + Send + 'static,
    {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == ScopeState::Exited {
            return Err(DiError::ScopeExited { scope: self.id() });
        }
        lifecycle.callbacks.push(Box::new(callback));

        #[cfg(feature = "logging")]
        trace!(
            target: "ambient_injector",
            scope_id = self.inner.id.id(),
            callbacks = lifecycle.callbacks.len(),
            "Registered scope exit callback"
        );

        Ok(())
    }

    /// Enter the scope, making it current until the guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the scope was already entered. A scope covers exactly one
    /// region; create a new one for every region.
    pub fn enter(&self) -> ScopeGuard {
        self.activate();
        context::push_scope(self.clone());

        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            scope_id = self.inner.id.id(),
            "Entered scope"
        );

        ScopeGuard {
            scope: self.clone(),
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside a fresh scope.
    pub fn run<R>(f: impl FnOnce(&Scope) -> R) -> R {
        let scope = Scope::new();
        let guard = scope.enter();
        f(&guard)
    }

    /// Run a future inside a fresh scope.
    #[cfg(feature = "async")]
    pub async fn run_async<F: std::future::Future>(future: F) -> F::Output {
        Scope::new().scope(future).await
    }

    /// Run a future with this scope as the current scope.
    ///
    /// The scope exits when the future completes, panics or is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the scope was already entered.
    #[cfg(feature = "async")]
    pub async fn scope<F: std::future::Future>(&self, future: F) -> F::Output {
        self.activate();
        let _exit = ExitOnDrop(self.clone());

        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            scope_id = self.inner.id.id(),
            "Entered async scope"
        );

        context::Context::capture()
            .with_scope(self.clone())
            .scope(future)
            .await
    }

    fn activate(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != ScopeState::Created {
            panic!("Cannot enter {}: scope is {:?}", self.inner.id, lifecycle.state);
        }
        lifecycle.state = ScopeState::Active;
    }

    /// Exit the scope and run its callbacks, newest first.
    pub(crate) fn exit(&self) {
        let callbacks = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == ScopeState::Exited {
                return;
            }
            lifecycle.state = ScopeState::Exited;
            std::mem::take(&mut lifecycle.callbacks)
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "ambient_injector",
            scope_id = self.inner.id.id(),
            callbacks = callbacks.len(),
            "Exiting scope"
        );

        for callback in callbacks.into_iter().rev() {
            callback(self);
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Scope {}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.lifecycle();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("state", &lifecycle.state)
            .field("callbacks", &lifecycle.callbacks.len())
            .finish()
    }
}

/// Keeps a scope current while alive; exits the scope when dropped.
///
/// Not `Send`: a guard belongs to the execution that entered the scope.
/// Use [`Scope::scope`] across `.await` points.
pub struct ScopeGuard {
    scope: Scope,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// The guarded scope.
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Deref for ScopeGuard {
    type Target = Scope;

    #[inline]
    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        context::pop_scope(&self.scope);
        self.scope.exit();
    }
}

#[cfg(feature = "async")]
struct ExitOnDrop(Scope);

#[cfg(feature = "async")]
impl Drop for ExitOnDrop {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// The innermost active scope of the calling execution, or the default scope.
pub fn current_scope() -> Scope {
    context::top_scope().unwrap_or_else(Scope::default_scope)
}
