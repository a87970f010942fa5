//! # Ambient Injector - Dependency Resolution with an Ambient Container
//!
//! A registry that maps dependency keys to resolvers, plus an ambient
//! "current container" that follows the logical flow of execution across
//! threads and async tasks.
//!
//! ## Features
//!
//! - **Lock-free registry** - `DashMap` backed, safe to mutate while resolving
//! - **Keys by name or type** - `"greeting"` or `DependencyKey::of::<Database>()`
//! - **Resolution strategies** - singleton, function, type factory, scoped, per-thread
//! - **Ambient container** - override the current container for a block, a thread or a task
//! - **Scopes** - scoped instances with LIFO exit callbacks
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use ambient_injector::{Container, Resolver};
//!
//! #[derive(Debug)]
//! struct Database {
//!     url: String,
//! }
//!
//! let container = Container::new();
//!
//! // Register by type or by name
//! container.singleton(Database { url: "postgres://localhost".into() });
//! container.set("pool_size", Resolver::singleton(8usize)).unwrap();
//! container
//!     .function("greeting", |_, param| {
//!         Ok(match param {
//!             Some(name) => format!("hi {name}"),
//!             None => "hi".to_string(),
//!         })
//!     })
//!     .unwrap();
//!
//! // Resolve - returns Arc<T> for zero-copy sharing
//! let db = container.get::<Database>().unwrap();
//! assert_eq!(db.url, "postgres://localhost");
//! assert_eq!(*container.resolve_as::<usize>("pool_size").unwrap(), 8);
//! assert_eq!(*container.resolve_as_with::<String>("greeting", "bob").unwrap(), "hi bob");
//! ```
//!
//! ## Ambient Container
//!
//! ```rust
//! use ambient_injector::{Container, context};
//!
//! struct Tenant(&'static str);
//!
//! let acme = Container::new();
//! acme.singleton(Tenant("acme"));
//!
//! context::with_container(Some(acme.clone()), |_| {
//!     // Deep inside the call stack, no container is passed around
//!     assert_eq!(context::get::<Tenant>().unwrap().0, "acme");
//!
//!     // Threads started through the context inherit it
//!     let handle = context::spawn_thread(|| context::get::<Tenant>().unwrap().0);
//!     assert_eq!(handle.join().unwrap(), "acme");
//! });
//!
//! // Outside the block the override is gone
//! assert!(!Container::ptr_eq(&context::get_current(), &acme));
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use ambient_injector::{Container, Scope};
//! use std::sync::Arc;
//!
//! struct RequestContext;
//!
//! let container = Container::new();
//! container.scoped(|| RequestContext);
//!
//! Scope::run(|scope| {
//!     let a = container.get::<RequestContext>().unwrap();
//!     let b = container.get::<RequestContext>().unwrap();
//!     assert!(Arc::ptr_eq(&a, &b));
//!
//!     scope.on_exit(|_| println!("request finished")).unwrap();
//! });
//! ```

mod container;
pub mod context;
mod error;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod resolver;
mod scope;
mod storage;

pub use container::*;
pub use context::{ContainerGuard, Context, get_current, set_default, use_container, with_container};
pub use error::*;
pub use key::*;
pub use resolver::*;
pub use scope::*;

#[cfg(feature = "async")]
pub use context::{scope_container, spawn};
pub use context::spawn_thread;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::context::{self, get_current, with_container};
    pub use crate::{
        AnyArc, Container, ContainerBuilder, DependencyKey, DiError, Injectable, Param, Resolver,
        Result, Scope, current_scope,
    };
    pub use std::sync::Arc;
}
