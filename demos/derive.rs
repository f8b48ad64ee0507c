//! Example demonstrating the #[derive(Inject)] macro
//!
//! Run with:
//!   cargo run --example derive --features derive

use injector_runtime::{Container, Inject, Lifetime};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct Cache {
    size: usize,
}

trait Logger: Send + Sync {
    fn log(&self, line: &str);
}

struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, line: &str) {
        println!("  [log] {}", line);
    }
}

trait Users: Send + Sync {
    fn describe(&self) -> String;
}

#[derive(Inject)]
#[inject(implements(dyn Users))]
struct UserService {
    #[inject]
    db: Arc<Database>,
    #[inject(name = "sessions")]
    cache: Arc<Cache>,
    #[inject(optional)]
    logger: Option<Arc<dyn Logger>>,
    // Non-injected field uses Default
    request_count: u64,
}

impl Users for UserService {
    fn describe(&self) -> String {
        if let Some(logger) = &self.logger {
            logger.log("describing user service");
        }
        let logging = if self.logger.is_some() { "with logging" } else { "without logging" };
        format!(
            "UserService connected to {} with cache size {} ({}, requests: {})",
            self.db.url, self.cache.size, logging, self.request_count
        )
    }
}

#[derive(Inject)]
struct ApiController {
    #[inject]
    users: Arc<dyn Users>,
    #[inject]
    caches: Vec<Arc<Cache>>,
}

fn main() {
    println!("=== injector-runtime Derive Macro Demo ===\n");

    let container = Container::new();
    container
        .singleton(Database {
            url: "postgres://localhost:5432/myapp".into(),
        })
        .unwrap();
    container.instance_named("sessions", Cache { size: 1024 }).unwrap();
    container.instance_named("pages", Cache { size: 4096 }).unwrap();
    container.map::<dyn Users, UserService>(Lifetime::Transient).unwrap();
    container.register::<ApiController>(Lifetime::Singleton).unwrap();

    // No logger registered yet: the optional field stays None
    let users = container.get_trait::<dyn Users>().unwrap();
    println!("  {}\n", users.describe());

    container.instance_trait::<dyn Logger>(Arc::new(StdoutLogger)).unwrap();
    let users = container.get_trait::<dyn Users>().unwrap();
    println!("  {}\n", users.describe());

    let controller = container.get::<ApiController>().unwrap();
    println!("ApiController sees {} caches", controller.caches.len());
    println!("  {}", controller.users.describe());

    println!("\n=== Demo Complete ===");
    println!("\n#[derive(Inject)] generated `Describe` impls that:");
    println!("  - Resolve #[inject] fields as constructor parameters");
    println!("  - Leave #[inject(optional)] fields None when nothing is registered");
    println!("  - Resolve Vec<Arc<T>> fields from every registration of T");
    println!("  - Use Default::default() for non-injected fields");
}
