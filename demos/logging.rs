//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! RUST_LOG=ambient_injector=trace cargo run --example logging --features logging-pretty
//! ```

use ambient_injector::{Container, Param, Resolver, Scope, context};

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct RequestContext {
    request_id: u64,
}

fn main() {
    // JSON if logging-json is enabled, pretty if logging-pretty is enabled
    ambient_injector::logging::init();

    println!("=== Ambient Injector Logging Demo ===\n");

    // logs: "Creating DI container"
    let container = Container::new();

    // logs: "Registering dependency"
    container.singleton(Database {
        url: "postgres://localhost/mydb".into(),
    });
    container
        .function("greeting", |_, param: Option<&Param>| {
            Ok(match param {
                Some(name) => format!("hi {name}"),
                None => "hi".to_string(),
            })
        })
        .unwrap();
    container.scoped(|| {
        println!("  [App] Request context being created...");
        RequestContext { request_id: 1 }
    });

    // logs: "Resolving dependency" at TRACE
    let _db = container.get::<Database>().unwrap();
    let greeting = container.resolve_as_with::<String>("greeting", "bob").unwrap();
    println!("  [App] {greeting}");

    // logs: "Dependency not found in container"
    assert!(container.resolve("missing").is_err());

    // logs: "Container installed as current"
    context::with_container(Some(container.clone()), |_| {
        // logs: "Entered scope", then "Exiting scope"
        Scope::run(|scope| {
            let _ctx = context::get::<RequestContext>().unwrap();
            scope
                .on_exit(|scope| println!("  [App] {} finished", scope.id()))
                .unwrap();
        });
    });

    // logs: "Copying DI container"
    let copy = container.copy();
    copy.set("greeting", Resolver::singleton(String::from("hello")))
        .unwrap();

    println!("\n=== Demo Complete ===");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
