//! Tour of the composition runtime
//!
//! Run with:
//!   cargo run --example composition

use injector_runtime::{
    Container, ContainerConfig, Dispose, InjectionArg, InjectionMember, Lifetime, Member, MetadataBuilder, Method,
    Parameter, PipelineStrategy, ResolverOverride, TypeDescriptor,
};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Config {
    url: String,
}

struct Pool {
    config: Arc<Config>,
    open: AtomicUsize,
}

impl Dispose for Pool {
    fn dispose(&self) {
        println!("  closing pool for {} ({} open)", self.config.url, self.open.load(Ordering::SeqCst));
    }
}

trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        1_700_000_000
    }
}

struct RepositoryDef;
struct User;
struct Order;

struct Repository<T> {
    pool: Arc<Pool>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Repository<T> {
    fn entity(&self) -> &'static str {
        std::any::type_name::<T>().rsplit("::").next().unwrap_or_default()
    }
}

#[derive(Default)]
struct Server {
    port: u16,
    clock: Option<Arc<dyn Clock>>,
    started: bool,
}

fn describe_types(container: &Container) {
    let repository = TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>");

    container.add_metadata(
        MetadataBuilder::<Pool>::new()
            .constructor([Parameter::of::<Config>("config")], |mut args| {
                Ok(Pool {
                    config: args.take(0)?,
                    open: AtomicUsize::new(0),
                })
            })
            .disposable()
            .finish(),
    );
    container.add_metadata(
        MetadataBuilder::<SystemClock>::new()
            .constructor([], |_| Ok(SystemClock))
            .implements::<dyn Clock>(|clock| clock)
            .finish(),
    );
    for metadata in [repository_metadata::<User>(&repository), repository_metadata::<Order>(&repository)] {
        container.add_metadata(metadata);
    }
    container.add_metadata(
        MetadataBuilder::<Server>::new()
            .constructor([], |_| Ok(Server::default()))
            .property(Member::of::<Server, u16, _>("port", |server, port| server.port = *port))
            .field(Member::of_trait::<Server, dyn Clock, _>("clock", |server, clock| server.clock = Some(clock)).inject())
            .method(Method::new::<Server, _>("start", [], |server, _| {
                server.started = true;
                Ok(())
            }))
            .finish(),
    );
}

fn repository_metadata<T: 'static>(definition: &TypeDescriptor) -> injector_runtime::TypeMetadata {
    MetadataBuilder::<Repository<T>>::new()
        .closes(definition.clone(), vec![TypeDescriptor::of::<T>()])
        .constructor([Parameter::of::<Pool>("pool")], |mut args| {
            Ok(Repository {
                pool: args.take(0)?,
                _entity: PhantomData,
            })
        })
        .finish()
}

fn main() {
    println!("=== injector-runtime Composition Demo ===\n");

    let container = Container::with_config(ContainerConfig::new().strategy(PipelineStrategy::Specialized));
    describe_types(&container);

    container
        .singleton(Config {
            url: "postgres://localhost/app".into(),
        })
        .unwrap();
    container
        .register_type(TypeDescriptor::of::<Pool>(), None, None, Some(Lifetime::Singleton), Vec::new())
        .unwrap();
    container
        .register_type(
            TypeDescriptor::of_trait::<dyn Clock>(),
            Some(TypeDescriptor::of::<SystemClock>()),
            None,
            Some(Lifetime::ContainerControlled),
            Vec::new(),
        )
        .unwrap();
    container
        .register_type(
            TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>"),
            None,
            None,
            Some(Lifetime::Hierarchical),
            Vec::new(),
        )
        .unwrap();
    container
        .register_type(
            TypeDescriptor::of::<Server>(),
            None,
            None,
            None,
            vec![
                InjectionMember::property_with("port", InjectionArg::value(8080u16)),
                InjectionMember::method("start", []),
            ],
        )
        .unwrap();

    println!("Registrations:");
    for info in container.registrations() {
        println!("  {:?} as {} ({:?})", info.category, info.registered_type, info.lifetime);
    }

    // Open generic closed on demand, shared per container
    let users = container.get::<Repository<User>>().unwrap();
    let orders = container.get::<Repository<Order>>().unwrap();
    users.pool.open.fetch_add(1, Ordering::SeqCst);
    println!("\n{} and {} share one pool: {}", users.entity(), orders.entity(), Arc::ptr_eq(&users.pool, &orders.pool));

    // Members injected after construction
    let server = container.get::<Server>().unwrap();
    println!(
        "Server on port {} started={} clock={}",
        server.port,
        server.started,
        server.clock.as_ref().map(|c| c.now()).unwrap_or_default()
    );

    // Overrides apply to a single call
    let test_config = container
        .get_with::<Pool>(&[ResolverOverride::dependency(Config {
            url: "sqlite::memory:".into(),
        })])
        .unwrap();
    println!("Singleton ignores later overrides: {}", test_config.config.url);

    // A request container re-homes hierarchical registrations
    let request = container.create_child_container(Some("request"));
    let scoped = request.get::<Repository<User>>().unwrap();
    println!("Request gets its own repository: {}", !Arc::ptr_eq(&scoped, &users));

    match container.get::<Repository<String>>() {
        Ok(_) => println!("unexpected"),
        Err(error) => println!("\nExpected failure: {}", error),
    }

    println!("\nDisposing root container:");
    container.dispose();
    println!("Request container disposed too: {}", request.is_disposed());
}
