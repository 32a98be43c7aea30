//! Backend selection is fixed at startup by configuration.

use std::time::Duration;

use pitwall_state::{BackendKind, DatabaseConfig, PrimaryConfig, StateError, StorageRouter};

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn unreachable_primary_is_a_startup_error_not_a_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        primary: Some(PrimaryConfig::new("127.0.0.1", closed_port(), "u", "p")),
        fallback_path: dir.path().join("fallback"),
        ..DatabaseConfig::default()
    };

    let result = tokio::time::timeout(Duration::from_secs(30), StorageRouter::connect(&config))
        .await
        .expect("connect should fail promptly");

    assert!(matches!(result, Err(StateError::Connection(_))));
    assert!(
        !dir.path().join("fallback").exists(),
        "fallback must not be opened when a primary is configured"
    );
}

#[tokio::test]
async fn fallback_selection_is_stable_for_the_router_lifetime() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        fallback_path: dir.path().join("fallback"),
        ..DatabaseConfig::default()
    };

    let router = StorageRouter::connect(&config).await.unwrap();
    let clone = router.clone();
    assert_eq!(router.active(), BackendKind::Fallback);
    assert_eq!(clone.active(), BackendKind::Fallback);
}
