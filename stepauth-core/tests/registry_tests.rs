// tests/registry_tests.rs
use std::sync::Arc;
use mockall::mock;

use stepauth_core::backend::{InMemoryBackend, InMemoryBackendFactory, UserDirectory};
use stepauth_core::challenge::{resolution_slot, BackendFactory, ChallengeDelegate, IdentityBackend};
use stepauth_core::models::{BackendBinding, ChallengeKind, PasswordChallengeInput, SessionKey};
use stepauth_core::test_utils::RecordingHandler;
use stepauth_core::{ClientConfig, Error, SessionRegistry};

mock! {
    Factory {}
    impl BackendFactory for Factory {
        fn create(&self, binding: &BackendBinding) -> Result<Arc<dyn IdentityBackend>, Error>;
    }
}

fn in_memory_registry() -> SessionRegistry {
    let factory = InMemoryBackendFactory::new(Arc::new(UserDirectory::new()));
    SessionRegistry::new(ClientConfig::default(), Arc::new(factory))
}

#[test]
fn test_same_tenant_returns_identical_instance() -> Result<(), Error> {
    let registry = in_memory_registry();
    let first = registry.lookup_or_create(Some("tenantA"))?;
    let second = registry.lookup_or_create(Some("tenantA"))?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.session(), &SessionKey::Named("tenantA".into()));
    Ok(())
}

#[test]
fn test_tenants_have_independent_pending_state() -> Result<(), Error> {
    let registry = in_memory_registry();
    let a = registry.lookup_or_create(Some("tenantA"))?;
    let b = registry.lookup_or_create(Some("tenantB"))?;
    assert!(!Arc::ptr_eq(&a, &b));

    a.register_handler(Arc::new(RecordingHandler::default()))?;
    b.register_handler(Arc::new(RecordingHandler::default()))?;

    let (slot, _receiver) = resolution_slot(ChallengeKind::Password);
    a.on_password_requested(PasswordChallengeInput::default(), slot)?;

    assert!(a.is_pending(ChallengeKind::Password));
    assert!(!b.is_pending(ChallengeKind::Password));
    assert!(matches!(
        b.resolve_password("bob", "pw"),
        Err(Error::NoPendingChallenge(ChallengeKind::Password))
    ));
    assert!(a.is_pending(ChallengeKind::Password));

    assert_eq!(registry.session_names(), vec!["tenantA".to_string(), "tenantB".to_string()]);
    Ok(())
}

#[test]
fn test_default_session_is_separate_from_named() -> Result<(), Error> {
    let registry = in_memory_registry();
    let default = registry.lookup_or_create(None)?;
    let again = registry.lookup_or_create(None)?;
    let named = registry.lookup_or_create(Some("tenantA"))?;

    assert!(Arc::ptr_eq(&default, &again));
    assert!(!Arc::ptr_eq(&default, &named));
    assert_eq!(registry.len(), 2);
    assert!(!default.has_handler());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_lookups_build_one_backend() {
    let mut factory = MockFactory::new();
    factory.expect_create().times(1).returning(|binding| {
        let backend: Arc<dyn IdentityBackend> =
            Arc::new(InMemoryBackend::new(binding.clone(), Arc::new(UserDirectory::new())));
        Ok(backend)
    });
    let registry = Arc::new(SessionRegistry::new(ClientConfig::default(), Arc::new(factory)));

    let mut lookups = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        lookups.push(tokio::spawn(async move { registry.lookup_or_create(Some("tenantA")) }));
    }

    let mut instances = Vec::new();
    for lookup in lookups {
        instances.push(lookup.await.expect("lookup panicked").expect("lookup failed"));
    }
    assert!(instances.iter().all(|o| Arc::ptr_eq(o, &instances[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_teardown_forgets_sessions() -> Result<(), Error> {
    let registry = in_memory_registry();
    let before = registry.lookup_or_create(Some("tenantA"))?;
    assert_eq!(registry.teardown(), 1);

    let after = registry.lookup_or_create(Some("tenantA"))?;
    assert!(!Arc::ptr_eq(&before, &after));
    Ok(())
}
