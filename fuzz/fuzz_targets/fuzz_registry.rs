#![no_main]

//! Fuzz target for registration and resolution across a container tree
//!
//! Applies arbitrary operation sequences and checks that shared lifetimes
//! keep their identity, that disposal is final, and that nothing panics.

use arbitrary::Arbitrary;
use injector_runtime::{
    Container, ContainerConfig, FaultKind, Lifetime, MetadataBuilder, Parameter, PipelineStrategy, TypeDescriptor,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

struct Leaf {
    value: u32,
}

struct Node {
    leaf: Arc<Leaf>,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum FuzzLifetime {
    Transient,
    Singleton,
    ContainerControlled,
    Hierarchical,
    PerResolve,
    PerThread,
}

impl From<FuzzLifetime> for Lifetime {
    fn from(lifetime: FuzzLifetime) -> Self {
        match lifetime {
            FuzzLifetime::Transient => Lifetime::Transient,
            FuzzLifetime::Singleton => Lifetime::Singleton,
            FuzzLifetime::ContainerControlled => Lifetime::ContainerControlled,
            FuzzLifetime::Hierarchical => Lifetime::Hierarchical,
            FuzzLifetime::PerResolve => Lifetime::PerResolve,
            FuzzLifetime::PerThread => Lifetime::PerThread,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    RegisterLeaf { scope: u8, name: Option<u8>, value: u32 },
    RegisterNode { scope: u8, lifetime: FuzzLifetime },
    ResolveLeaf { scope: u8, name: Option<u8> },
    ResolveNode { scope: u8 },
    CreateChild { scope: u8 },
    Dispose { scope: u8 },
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    interpreted: bool,
    flat_table_limit: u8,
    ops: Vec<Op>,
}

fn leaf_name(name: Option<u8>) -> Option<String> {
    name.map(|n| format!("leaf-{}", n % 16))
}

fuzz_target!(|scenario: Scenario| {
    let strategy = if scenario.interpreted {
        PipelineStrategy::Interpreted
    } else {
        PipelineStrategy::Specialized
    };
    let root = Container::with_config(
        ContainerConfig::new()
            .strategy(strategy)
            .flat_table_limit(scenario.flat_table_limit as usize),
    );
    root.add_metadata(
        MetadataBuilder::<Node>::new()
            .constructor([Parameter::of::<Leaf>("leaf")], |mut args| Ok(Node { leaf: args.take(0)? }))
            .finish(),
    );

    let mut scopes = vec![root.clone()];
    let pick = |scopes: &Vec<Container>, index: u8| scopes[index as usize % scopes.len()].clone();

    for op in scenario.ops.into_iter().take(256) {
        match op {
            Op::RegisterLeaf { scope, name, value } => {
                let container = pick(&scopes, scope);
                let name = leaf_name(name);
                let result = container.register_instance(
                    TypeDescriptor::of::<Leaf>(),
                    name.as_deref(),
                    Arc::new(Leaf { value }),
                    None,
                );
                assert_eq!(result.is_err(), container.is_disposed());
            }
            Op::RegisterNode { scope, lifetime } => {
                let container = pick(&scopes, scope);
                let result = container.register_type(
                    TypeDescriptor::of::<Node>(),
                    None,
                    None,
                    Some(lifetime.into()),
                    Vec::new(),
                );
                assert_eq!(result.is_err(), container.is_disposed());
            }
            Op::ResolveLeaf { scope, name } => {
                let container = pick(&scopes, scope);
                let name = leaf_name(name);
                let first = match &name {
                    Some(name) => container.get_named::<Leaf>(name),
                    None => container.get::<Leaf>(),
                };
                match first {
                    Ok(leaf) => {
                        let again = match &name {
                            Some(name) => container.get_named::<Leaf>(name),
                            None => container.get::<Leaf>(),
                        };
                        let again = again.unwrap();
                        assert!(Arc::ptr_eq(&leaf, &again));
                        assert_eq!(leaf.value, again.value);
                    }
                    Err(error) => {
                        if container.is_disposed() {
                            assert_eq!(error.kind, FaultKind::Disposed);
                        } else {
                            assert_eq!(error.kind, FaultKind::NotRegistered);
                        }
                    }
                }
            }
            Op::ResolveNode { scope } => {
                let container = pick(&scopes, scope);
                if let Ok(node) = container.get::<Node>() {
                    // Registrations are only ever replaced, so the leaf a node
                    // was built with stays resolvable from below its owner
                    assert!(container.get::<Leaf>().is_ok());
                    let _ = node.leaf.value;
                }
            }
            Op::CreateChild { scope } => {
                if scopes.len() < 32 {
                    let child = pick(&scopes, scope).scope();
                    scopes.push(child);
                }
            }
            Op::Dispose { scope } => {
                let container = pick(&scopes, scope);
                container.dispose();
                assert!(container.is_disposed());
            }
        }
    }

    root.dispose();
    assert!(scopes.iter().all(Container::is_disposed));
});
