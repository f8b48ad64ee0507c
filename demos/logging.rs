//! Example demonstrating logging capabilities
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-pretty,logging-json
//! ```
//!
//! Set `RUST_LOG=injector_runtime=trace` to see every pipeline stage.

use injector_runtime::{Container, Lifetime, MetadataBuilder, Parameter, TypeDescriptor};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
}

fn main() {
    injector_runtime::logging::init();

    println!("=== injector-runtime Logging Demo ===\n");

    // "Creating root container"
    let container = Container::new();
    container.add_metadata(
        MetadataBuilder::<UserService>::new()
            .constructor([Parameter::of::<Database>("db")], |mut args| Ok(UserService { db: args.take(0)? }))
            .finish(),
    );

    // "Registering contract"
    container
        .singleton(Database {
            url: "postgres://localhost/mydb".into(),
        })
        .unwrap();
    container
        .register_type(TypeDescriptor::of::<UserService>(), None, None, Some(Lifetime::Hierarchical), Vec::new())
        .unwrap();

    // "Building resolution pipeline" on first use, stage traces at TRACE
    let _users = container.get::<UserService>().unwrap();

    // Failures are logged with their kind before being returned
    assert!(container.try_get::<RequestContext>().is_none());

    // "Creating child container"
    let request = container.create_child_container(Some("request"));
    request
        .singleton(RequestContext {
            request_id: "req-12345".into(),
        })
        .unwrap();
    let _ctx = request.get::<RequestContext>().unwrap();

    // Hierarchical registrations are re-homed into the child
    let _child_users = request.get::<UserService>().unwrap();

    // "Disposing container scope"
    container.dispose();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
}
