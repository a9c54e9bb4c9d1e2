//! Registration-time validation and singleton instance management.

mod common;

use common::{descriptor, CountingModule, StaticModule};
use promptloom::descriptor::ModuleId;
use promptloom::registry::{ModuleRegistry, RegistryError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn static_factory(
    content: &str,
) -> impl Fn() -> Arc<dyn promptloom::module::ContentModule> + Send + Sync + 'static {
    let content = content.to_string();
    move || Arc::new(StaticModule::new(content.clone()))
}

#[test]
fn duplicate_module_id_is_rejected() {
    let registry = ModuleRegistry::new();
    registry
        .register(descriptor("header").build(), static_factory("one"))
        .unwrap();

    let err = registry
        .register(descriptor("header").build(), static_factory("two"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateModule { .. }));
    assert_eq!(registry.len(), 1);
}

#[test]
fn second_producer_of_a_key_is_rejected_at_registration() {
    let registry = ModuleRegistry::new();
    registry
        .register(
            descriptor("first").produces(["definition.scope"]).build(),
            static_factory("a"),
        )
        .unwrap();

    let err = registry
        .register(
            descriptor("second").produces(["definition.scope"]).build(),
            static_factory("b"),
        )
        .unwrap_err();

    match err {
        RegistryError::DuplicateKeyProducer { key, existing, incoming } => {
            assert_eq!(key, "definition.scope");
            assert_eq!(existing, ModuleId::new("first"));
            assert_eq!(incoming, ModuleId::new("second"));
        }
        other => panic!("expected duplicate producer, got {other}"),
    }
}

#[test]
fn closing_registration_of_a_cycle_fails_and_names_all_members() {
    // Forward references are fine while the set stays acyclic; the error
    // surfaces at exactly the registration that closes the loop.
    let registry = ModuleRegistry::new();
    registry
        .register(descriptor("a").depends_on(["b"]).build(), static_factory("a"))
        .unwrap();
    registry
        .register(descriptor("b").depends_on(["c"]).build(), static_factory("b"))
        .unwrap();

    let err = registry
        .register(descriptor("c").depends_on(["a"]).build(), static_factory("c"))
        .unwrap_err();

    match err {
        RegistryError::CyclicDependency { unresolved } => {
            assert_eq!(
                unresolved,
                vec![ModuleId::new("a"), ModuleId::new("b"), ModuleId::new("c")]
            );
        }
        other => panic!("expected cycle, got {other}"),
    }
    // The offending descriptor was not registered.
    assert!(!registry.contains(&ModuleId::new("c")));
}

#[test]
fn validate_catches_dangling_dependencies() {
    let registry = ModuleRegistry::new();
    registry
        .register(
            descriptor("needy").depends_on(["missing"]).build(),
            static_factory("n"),
        )
        .unwrap();

    let err = registry.validate().unwrap_err();
    match err {
        RegistryError::UnknownDependency { module, dependency } => {
            assert_eq!(module, ModuleId::new("needy"));
            assert_eq!(dependency, ModuleId::new("missing"));
        }
        other => panic!("expected unknown dependency, got {other}"),
    }
}

#[test]
fn instances_are_created_once_and_shared() {
    let registry = ModuleRegistry::new();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();

    registry
        .register(descriptor("cached").build(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingModule::new(Arc::new(AtomicUsize::new(0)), "x"))
        })
        .unwrap();

    let id = ModuleId::new("cached");
    let first = registry.instance(&id).unwrap();
    let second = registry.instance(&id).unwrap();

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn descriptors_are_returned_in_registration_order() {
    let registry = ModuleRegistry::new();
    for id in ["gamma", "alpha", "beta"] {
        registry
            .register(descriptor(id).build(), static_factory(id))
            .unwrap();
    }

    let order: Vec<String> = registry
        .descriptors()
        .into_iter()
        .map(|d| d.id.as_str().to_string())
        .collect();
    assert_eq!(order, ["gamma", "alpha", "beta"]);
    assert_eq!(registry.registration_index(&ModuleId::new("alpha")), Some(1));
}
