//! Per-request containers and scopes in an async server
//!
//! Each simulated request runs in its own scope with a tenant-specific
//! container. Handlers deep in the call stack resolve from the ambient
//! context; background work started with `spawn` inherits it.
//!
//! ```bash
//! cargo run --example request_scope
//! ```

use ambient_injector::{Container, ContainerBuilder, Scope, context};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct Tenant {
    name: &'static str,
}

struct Connection {
    id: u64,
    tenant: &'static str,
}

async fn load_profile(user: &str) -> String {
    let tenant = context::get::<Tenant>().unwrap();
    let conn = context::get::<Connection>().unwrap();
    tokio::task::yield_now().await;
    format!("{}/{} via connection {}", tenant.name, user, conn.id)
}

async fn audit(event: String) {
    // Same scope as the request, so the same connection
    let conn = context::get::<Connection>().unwrap();
    println!("  [audit] {event} (connection {} for {})", conn.id, conn.tenant);
}

async fn handle_request(base: &Container, tenant: &'static str, user: &'static str) {
    let container = ContainerBuilder::new()
        .with_singleton(Tenant { name: tenant })
        .build_from(base)
        .unwrap();
    container.scoped_with_dispose(
        move || Connection {
            id: NEXT_CONNECTION.fetch_add(1, Ordering::SeqCst),
            tenant,
        },
        |conn: Arc<Connection>| println!("  [pool] connection {} returned", conn.id),
    );

    context::scope_container(Some(container), async move {
        Scope::new()
            .scope(async move {
                let profile = load_profile(user).await;
                context::spawn(audit(format!("loaded {profile}")))
                    .await
                    .unwrap();
                println!("  [handler] {profile}");
            })
            .await;
    })
    .await;
}

#[tokio::main]
async fn main() {
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    ambient_injector::logging::init_injector_only();

    println!("=== Request Scope Demo ===\n");

    let base = Container::new();
    base.set("service", ambient_injector::Resolver::singleton("profiles"))
        .unwrap();
    context::set_default(base.clone());

    let requests = [("acme", "alice"), ("globex", "bob"), ("acme", "carol")];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|(tenant, user)| {
            let base = base.clone();
            tokio::spawn(async move { handle_request(&base, tenant, user).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    // Outside any request the default container is current
    let service = context::resolve_as::<&str>("service").unwrap();
    println!("\n  [main] {service} served {} requests", requests.len());
    assert!(context::get::<Tenant>().is_err());
}
