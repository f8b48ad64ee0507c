#![no_main]

//! Fuzz target for concurrent resolution
//!
//! Threads resolve shared registrations while others register new
//! contracts; shared lifetimes must still build exactly once.

use arbitrary::Arbitrary;
use injector_runtime::{Container, Lifetime, MetadataBuilder, TypeDescriptor};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

struct Shared {
    id: usize,
}

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Get,
    TryGet,
    Contains,
    RegisterNamed(u8, u32),
    ResolveNamed(u8),
}

#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    thread_count: u8,
    ops_per_thread: Vec<ThreadOp>,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);

    let container = Container::new();
    container.add_metadata(
        MetadataBuilder::<Shared>::new()
            .constructor([], move |_| Ok(Shared { id: counter.fetch_add(1, Ordering::SeqCst) }))
            .finish(),
    );
    container
        .register_type(TypeDescriptor::of::<Shared>(), None, None, Some(Lifetime::Singleton), Vec::new())
        .unwrap();

    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops_per_thread;

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = ops.clone();
            thread::spawn(move || {
                for op in ops.into_iter().take(50) {
                    match op {
                        ThreadOp::Get => {
                            assert_eq!(container.get::<Shared>().unwrap().id, 0);
                        }
                        ThreadOp::TryGet => {
                            let _ = container.try_get::<u32>();
                        }
                        ThreadOp::Contains => {
                            assert!(container.contains::<Shared>());
                        }
                        ThreadOp::RegisterNamed(name, value) => {
                            container.instance_named(&format!("value-{}", name % 8), value).unwrap();
                        }
                        ThreadOp::ResolveNamed(name) => {
                            let _ = container.get_named::<u32>(&format!("value-{}", name % 8));
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(built.load(Ordering::SeqCst) <= 1);
});
