//! Ambient context: the current container and current scope
//!
//! Every execution sees a *frame*: a stack of container overrides and a stack
//! of entered scopes. Synchronous code uses a thread-local frame. With the
//! `async` feature, futures run through [`scope_container`], [`Scope::scope`]
//! or [`Context::scope`] carry a tokio task-local frame that follows the task
//! across worker threads. Sync overrides made inside any other tokio task get
//! a frame of their own keyed by the task id, so tasks interleaved on one
//! thread never observe each other's overrides.
//!
//! Frames are never shared implicitly. Work spawned through [`spawn`] or
//! [`spawn_thread`] starts from a snapshot of the spawning frame, so it sees
//! the same current container and scope as its parent at the moment of spawn.
//! Anything else starts from the process-wide defaults.
//!
//! # Examples
//!
//! ```rust
//! use ambient_injector::{context, Container};
//!
//! let container = Container::new();
//! container.singleton(String::from("request-local"));
//!
//! context::with_container(Some(container), |_| {
//!     let value = context::get::<String>().unwrap();
//!     assert_eq!(*value, "request-local");
//! });
//!
//! // Outside the override the default container is current again
//! assert!(context::get_current().get::<String>().is_err());
//! ```

use crate::{AnyArc, Container, Injectable, IntoDependencyKey, Param, Result, Scope};
use once_cell::sync::Lazy;
#[cfg(feature = "async")]
use ahash::RandomState;
#[cfg(feature = "async")]
use dashmap::DashMap;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Per-execution ambient state.
#[derive(Clone)]
struct Frame {
    containers: Vec<Container>,
    scopes: Vec<Scope>,
}

impl Frame {
    const fn new() -> Self {
        Self {
            containers: Vec::new(),
            scopes: Vec::new(),
        }
    }

    #[cfg(feature = "async")]
    fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.scopes.is_empty()
    }
}

thread_local! {
    static THREAD_FRAME: RefCell<Frame> = const { RefCell::new(Frame::new()) };
}

#[cfg(feature = "async")]
tokio::task_local! {
    /// Task-local frame. Follows the task across thread boundaries in
    /// work-stealing runtimes.
    static TASK_FRAME: RefCell<Frame>;
}

static DEFAULT_CONTAINER: Lazy<RwLock<Container>> = Lazy::new(|| RwLock::new(Container::new()));

/// Frames of tokio tasks that installed sync overrides outside a task-local
/// frame. Tasks sharing a worker thread must not share `THREAD_FRAME`.
/// Entries are removed once their frame is empty again.
#[cfg(feature = "async")]
static TASK_ID_FRAMES: Lazy<DashMap<tokio::task::Id, Frame, RandomState>> =
    Lazy::new(|| DashMap::with_hasher(RandomState::new()));

/// Run `f` against the frame of the calling execution.
///
/// `f` must not call back into user code: the frame stays borrowed.
fn with_frame<R>(f: impl FnOnce(&mut Frame) -> R) -> R {
    #[cfg(feature = "async")]
    {
        if TASK_FRAME.try_with(|_| ()).is_ok() {
            return TASK_FRAME.with(|frame| f(&mut frame.borrow_mut()));
        }
        if let Some(task) = tokio::task::try_id() {
            return with_task_id_frame(task, f);
        }
    }
    THREAD_FRAME.with(|frame| f(&mut frame.borrow_mut()))
}

#[cfg(feature = "async")]
fn with_task_id_frame<R>(task: tokio::task::Id, f: impl FnOnce(&mut Frame) -> R) -> R {
    let result = match TASK_ID_FRAMES.get_mut(&task) {
        Some(mut frame) => f(&mut frame),
        None => {
            let mut frame = Frame::new();
            let result = f(&mut frame);
            if !frame.is_empty() {
                TASK_ID_FRAMES.insert(task, frame);
            }
            return result;
        }
    };
    TASK_ID_FRAMES.remove_if(&task, |_, frame| frame.is_empty());
    result
}

/// Remove the newest entry matching `matches`; stacks unwind LIFO so this is
/// normally the top.
fn remove_last<T>(stack: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> Option<T> {
    stack.iter().rposition(matches).map(|pos| stack.remove(pos))
}

pub(crate) fn push_scope(scope: Scope) {
    with_frame(|frame| frame.scopes.push(scope));
}

pub(crate) fn pop_scope(scope: &Scope) {
    let _removed = with_frame(|frame| remove_last(&mut frame.scopes, |s| s == scope));

    #[cfg(feature = "logging")]
    if _removed.is_none() {
        debug!(
            target: "ambient_injector",
            scope_id = scope.id().id(),
            "Scope guard dropped outside the execution that entered it"
        );
    }
}

pub(crate) fn top_scope() -> Option<Scope> {
    with_frame(|frame| frame.scopes.last().cloned())
}

// =============================================================================
// Current container
// =============================================================================

/// The container current for the calling execution.
///
/// Returns the innermost override, falling back to the process-wide default.
pub fn get_current() -> Container {
    with_frame(|frame| frame.containers.last().cloned()).unwrap_or_else(default_container)
}

/// The process-wide fallback container.
pub fn default_container() -> Container {
    DEFAULT_CONTAINER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replace the process-wide fallback container.
///
/// Affects every execution that has no override of its own.
///
/// ```rust
/// use ambient_injector::{context, Container};
///
/// let app = Container::new();
/// app.singleton(42u32);
/// context::set_default(app.clone());
///
/// let seen = std::thread::spawn(|| *context::get::<u32>().unwrap());
/// assert_eq!(seen.join().unwrap(), 42);
///
/// context::with_container(None, |_| assert!(context::get::<u32>().is_err()));
/// assert!(Container::ptr_eq(&context::get_current(), &app));
/// ```
pub fn set_default(container: Container) {
    #[cfg(feature = "logging")]
    debug!(
        target: "ambient_injector",
        dependencies = container.len(),
        "Replacing default container"
    );

    *DEFAULT_CONTAINER
        .write()
        .unwrap_or_else(PoisonError::into_inner) = container;
}

/// Install a container as current until the returned guard is dropped.
///
/// A fresh container is created when `container` is `None`. The previous
/// current container is restored on every exit path, including `?` returns
/// and panics.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::{context, Container};
///
/// let container = Container::new();
/// {
///     let current = context::use_container(Some(container.clone()));
///     assert!(Container::ptr_eq(&current, &context::get_current()));
/// }
/// assert!(!Container::ptr_eq(&container, &context::get_current()));
/// ```
pub fn use_container(container: Option<Container>) -> ContainerGuard {
    let container = container.unwrap_or_default();
    with_frame(|frame| frame.containers.push(container.clone()));

    #[cfg(feature = "logging")]
    trace!(
        target: "ambient_injector",
        dependencies = container.len(),
        "Container installed as current"
    );

    ContainerGuard {
        container,
        _not_send: PhantomData,
    }
}

/// Run `f` with `container` (or a fresh one) as the current container.
pub fn with_container<R>(container: Option<Container>, f: impl FnOnce(&Container) -> R) -> R {
    let guard = use_container(container);
    f(&guard)
}

/// Run a future with `container` (or a fresh one) as the current container.
///
/// The override covers everything the future awaits and every task started
/// from it through [`spawn`]. It ends when the future completes or is dropped.
#[cfg(feature = "async")]
pub async fn scope_container<F: std::future::Future>(
    container: Option<Container>,
    future: F,
) -> F::Output {
    Context::capture()
        .with_container(container.unwrap_or_default())
        .scope(future)
        .await
}

/// Keeps a container current while alive.
///
/// Not `Send`: the override belongs to the execution that installed it.
/// Use [`scope_container`] across `.await` points.
pub struct ContainerGuard {
    container: Container,
    _not_send: PhantomData<*const ()>,
}

impl ContainerGuard {
    /// The installed container.
    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }
}

impl Deref for ContainerGuard {
    type Target = Container;

    #[inline]
    fn deref(&self) -> &Container {
        &self.container
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let container = &self.container;
        // Dropped after the frame borrow ends
        let _removed =
            with_frame(|frame| remove_last(&mut frame.containers, |c| Container::ptr_eq(c, container)));
    }
}

// =============================================================================
// Resolution sugar
// =============================================================================

/// Resolve a dependency from the current container.
pub fn resolve(key: impl IntoDependencyKey) -> Result<AnyArc> {
    get_current().resolve(key)
}

/// Resolve a parameterized dependency from the current container.
pub fn resolve_with(key: impl IntoDependencyKey, param: impl Into<Param>) -> Result<AnyArc> {
    get_current().resolve_with(key, param)
}

/// Resolve and downcast a dependency from the current container.
pub fn resolve_as<T: Injectable>(key: impl IntoDependencyKey) -> Result<Arc<T>> {
    get_current().resolve_as::<T>(key)
}

/// Resolve a dependency keyed by its own type from the current container.
pub fn get<T: Injectable>() -> Result<Arc<T>> {
    get_current().get::<T>()
}

/// Resolve from the current container, treating a missing key as `None`.
pub fn try_resolve(key: impl IntoDependencyKey) -> Result<Option<AnyArc>> {
    get_current().try_resolve(key)
}

// =============================================================================
// Snapshots and propagation
// =============================================================================

/// Snapshot of the ambient state of an execution.
///
/// Capture it where work is handed off and install it where the work runs
/// to make the child observe the parent's current container and scope.
#[derive(Clone)]
pub struct Context {
    frame: Frame,
}

impl Context {
    /// Snapshot the calling execution's frame.
    pub fn capture() -> Self {
        Self {
            frame: with_frame(|frame| frame.clone()),
        }
    }

    /// A context with no overrides: defaults only.
    pub fn empty() -> Self {
        Self {
            frame: Frame::new(),
        }
    }

    /// The container that is current under this context.
    pub fn current(&self) -> Container {
        self.frame
            .containers
            .last()
            .cloned()
            .unwrap_or_else(default_container)
    }

    /// The scope that is current under this context.
    pub fn current_scope(&self) -> Scope {
        self.frame
            .scopes
            .last()
            .cloned()
            .unwrap_or_else(Scope::default_scope)
    }

    /// This context with `container` pushed as the innermost override.
    pub fn with_container(mut self, container: Container) -> Self {
        self.frame.containers.push(container);
        self
    }

    pub(crate) fn with_scope(mut self, scope: Scope) -> Self {
        self.frame.scopes.push(scope);
        self
    }

    /// Run `f` under this context, restoring the caller's frame afterwards.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        let previous = with_frame(|frame| std::mem::replace(frame, self.frame));
        let _restore = RestoreFrame(Some(previous));
        f()
    }

    /// Run a future under this context.
    #[cfg(feature = "async")]
    pub async fn scope<F: std::future::Future>(self, future: F) -> F::Output {
        TASK_FRAME.scope(RefCell::new(self.frame), future).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("containers", &self.frame.containers.len())
            .field("scopes", &self.frame.scopes.len())
            .finish()
    }
}

struct RestoreFrame(Option<Frame>);

impl Drop for RestoreFrame {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            let _replaced = with_frame(|frame| std::mem::replace(frame, previous));
        }
    }
}

/// Spawn a tokio task that inherits the spawning context.
///
/// Plain `tokio::spawn` starts from the defaults instead.
#[cfg(feature = "async")]
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(Context::capture().scope(future))
}

/// Spawn an OS thread that inherits the spawning context.
pub fn spawn_thread<F, T>(f: F) -> std::thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let context = Context::capture();
    std::thread::spawn(move || context.run(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    fn tenant_container(name: &'static str) -> Container {
        let container = Container::new();
        container.singleton(Tenant(name));
        container
    }

    #[test]
    fn test_override_and_restore() {
        let outer = tenant_container("outer");
        let inner = tenant_container("inner");

        with_container(Some(outer.clone()), |_| {
            assert_eq!(*get::<Tenant>().unwrap(), Tenant("outer"));
            with_container(Some(inner), |_| {
                assert_eq!(*get::<Tenant>().unwrap(), Tenant("inner"));
            });
            assert!(Container::ptr_eq(&get_current(), &outer));
        });
    }

    #[test]
    fn test_fresh_container_when_none() {
        with_container(None, |fresh| {
            assert!(!Container::ptr_eq(fresh, &default_container()));
            assert!(Container::ptr_eq(fresh, &get_current()));
        });
    }

    #[test]
    fn test_restore_on_error_path() {
        fn failing() -> Result<()> {
            let _guard = use_container(Some(tenant_container("failing")));
            resolve("missing")?;
            Ok(())
        }

        let before = get_current();
        assert!(failing().is_err());
        assert!(Container::ptr_eq(&before, &get_current()));
    }

    #[test]
    fn test_restore_on_panic() {
        let before = get_current();
        let result = std::panic::catch_unwind(|| {
            let _guard = use_container(None);
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(Container::ptr_eq(&before, &get_current()));
    }

    #[test]
    fn test_threads_isolated() {
        let barrier = Arc::new(Barrier::new(2));
        let other = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                // The main thread holds its override here
                let seen = get::<Tenant>().is_ok();
                barrier.wait();
                seen
            })
        };

        with_container(Some(tenant_container("main")), |_| {
            barrier.wait();
            barrier.wait();
            assert_eq!(*get::<Tenant>().unwrap(), Tenant("main"));
        });

        assert!(!other.join().unwrap());
    }

    #[test]
    fn test_spawn_thread_inherits() {
        let container = tenant_container("parent");
        let handle = with_container(Some(container), |_| {
            spawn_thread(|| get::<Tenant>().map(|t| t.0))
        });

        assert_eq!(handle.join().unwrap().unwrap(), "parent");
    }

    #[test]
    fn test_spawn_thread_inherits_scope() {
        Scope::run(|scope| {
            let id = scope.id();
            let child = spawn_thread(crate::current_scope).join().unwrap();
            assert_eq!(child.id(), id);
        });
    }

    #[test]
    fn test_context_run_restores() {
        let snapshot = with_container(Some(tenant_container("snap")), |_| Context::capture());

        assert!(get::<Tenant>().is_err());
        let seen = snapshot.run(|| get::<Tenant>().map(|t| t.0));
        assert_eq!(seen.unwrap(), "snap");
        assert!(get::<Tenant>().is_err());
    }

    #[test]
    fn test_try_resolve_missing() {
        with_container(None, |_| {
            assert!(try_resolve("missing").unwrap().is_none());
        });
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scope_container_across_await() {
        let container = tenant_container("task");
        let seen = scope_container(Some(container), async {
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            get::<Tenant>().map(|t| t.0)
        })
        .await;

        assert_eq!(seen.unwrap(), "task");
        assert!(get::<Tenant>().is_err());
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_inherits_and_plain_spawn_does_not() {
        let (inherited, plain) = scope_container(Some(tenant_container("parent")), async {
            let inherited = spawn(async { get::<Tenant>().map(|t| t.0) });
            let plain = tokio::spawn(async { get::<Tenant>().is_ok() });
            (inherited.await.unwrap(), plain.await.unwrap())
        })
        .await;

        assert_eq!(inherited.unwrap(), "parent");
        assert!(!plain);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_sibling_tasks_isolated() {
        let first = spawn(scope_container(Some(tenant_container("first")), async {
            tokio::task::yield_now().await;
            get::<Tenant>().map(|t| t.0)
        }));
        let second = spawn(scope_container(Some(tenant_container("second")), async {
            tokio::task::yield_now().await;
            get::<Tenant>().map(|t| t.0)
        }));

        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert_eq!(second.await.unwrap().unwrap(), "second");
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_sync_override_invisible_to_earlier_sibling() {
        let (ready, signal) = tokio::sync::oneshot::channel::<()>();
        let sibling = tokio::spawn(async move {
            signal.await.unwrap();
            get::<Tenant>().ok().map(|t| t.0)
        });

        let guard = use_container(Some(tenant_container("main")));
        ready.send(()).unwrap();
        let seen = sibling.await.unwrap();

        assert_eq!(get::<Tenant>().unwrap().0, "main");
        drop(guard);
        assert_eq!(seen, None);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_interleaved_local_tasks_keep_own_overrides() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let first = tokio::task::spawn_local(async {
                    let _guard = use_container(Some(tenant_container("first")));
                    let scope = Scope::new();
                    let _entered = scope.enter();
                    tokio::task::yield_now().await;
                    (get::<Tenant>().map(|t| t.0), crate::current_scope() == scope)
                });
                let second = tokio::task::spawn_local(async {
                    tokio::task::yield_now().await;
                    (
                        get::<Tenant>().ok().map(|t| t.0),
                        crate::current_scope().is_default(),
                    )
                });

                let first_id = first.id();
                let (first_tenant, first_scope) = first.await.unwrap();
                assert!(!TASK_ID_FRAMES.contains_key(&first_id));
                let (second_tenant, second_scope) = second.await.unwrap();
                assert_eq!(first_tenant.unwrap(), "first");
                assert!(first_scope);
                assert_eq!(second_tenant, None);
                assert!(second_scope);
            })
            .await;
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_sync_override_inside_task_frame() {
        let seen = scope_container(Some(tenant_container("task")), async {
            let nested = with_container(Some(tenant_container("sync")), |_| {
                get::<Tenant>().map(|t| t.0)
            });
            (nested, get::<Tenant>().map(|t| t.0))
        })
        .await;

        assert_eq!(seen.0.unwrap(), "sync");
        assert_eq!(seen.1.unwrap(), "task");
    }
}
