//! ldap3 transport tests that need no directory server.

use std::sync::{Arc, Once};
use std::time::Duration;
use studio_connection::prelude::*;
use studio_connection_ldap::Ldap3SessionFactory;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

fn unreachable_request() -> SessionRequest {
    SessionRequest {
        host: "127.0.0.1".to_string(),
        port: 1,
        encryption_method: EncryptionMethod::None,
        timeout: Duration::from_secs(2),
        validate_certificates: true,
        trust: Arc::new(CertificateTrust::default()),
    }
}

#[tokio::test]
async fn test_connection_refused_is_connect_failed() {
    init_test_logging();
    let Err(err) = Ldap3SessionFactory::new().open(&unreachable_request()).await else {
        panic!("connection to a closed port succeeded");
    };
    assert!(matches!(err, ConnectionError::ConnectFailed { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_bind_through_manager_reports_connect_failure() {
    init_test_logging();
    let logs = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::builder(Arc::new(Ldap3SessionFactory::new()))
        .with_settings(ConnectionCoreSettings::default().with_log_directory(logs.path()))
        .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
        .build()
        .unwrap();
    let connection = manager
        .add_connection(
            ConnectionParameter::new("closed", "127.0.0.1", 1)
                .with_credentials("cn=admin,dc=example,dc=com", "secret")
                .with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
    let monitor = StudioProgressMonitor::new();

    let err = connection.wrapper().bind(&monitor).await.unwrap_err();

    assert!(matches!(err, ConnectionError::ConnectFailed { .. }));
    assert!(monitor.errors_reported());
    assert_eq!(connection.wrapper().state(), ConnectionState::Disconnected);
}
