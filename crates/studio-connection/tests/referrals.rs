//! Referral handling tests for searches and updates.

mod common;

use common::*;
use std::sync::Arc;
use studio_connection::operation::MANAGE_DSA_IT_OID;
use studio_connection::prelude::*;

const BASE: &str = "dc=example,dc=com";
const URL_B: &str = "ldap://b:389/ou=b,dc=example,dc=com";
const URL_C: &str = "ldap://c:389/ou=c,dc=example,dc=com";
const URL_D: &str = "ldap://d:389/ou=d,dc=example,dc=com";

/// Server `a` refers to `b` and `c`; `b` refers further to `d`.
fn referral_tree() -> MockDirectory {
    let directory = MockDirectory::new();
    directory.on_search(
        "a",
        389,
        BASE,
        vec![
            entry("cn=a1,dc=example,dc=com"),
            reference(URL_B),
            reference(URL_C),
            done(),
        ],
    );
    directory.on_search(
        "b",
        389,
        "ou=b,dc=example,dc=com",
        vec![entry("cn=b1,ou=b,dc=example,dc=com"), reference(URL_D), done()],
    );
    directory.on_search(
        "c",
        389,
        "ou=c,dc=example,dc=com",
        vec![entry("cn=c1,ou=c,dc=example,dc=com"), done()],
    );
    directory.on_search(
        "d",
        389,
        "ou=d,dc=example,dc=com",
        vec![entry("cn=d1,ou=d,dc=example,dc=com"), done()],
    );
    directory
}

async fn search_with(
    directory: &MockDirectory,
    handling: ReferralHandlingMethod,
) -> (Arc<ConnectionManager>, ConnectionResult<Vec<StudioSearchResult>>) {
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();
    let request = SearchParameter::new(BASE, "(objectClass=person)")
        .with_referral_handling(handling);
    let results = match connection.wrapper().search(request, &monitor, None).await {
        Ok(enumeration) => enumeration.collect_all().await,
        Err(e) => Err(e),
    };
    (manager, results)
}

#[tokio::test]
async fn test_follow_visits_referrals_depth_first() {
    init_test_logging();
    let directory = referral_tree();

    let (manager, results) = search_with(&directory, ReferralHandlingMethod::Follow).await;
    let results = results.unwrap();

    assert_eq!(
        dns(&results),
        vec![
            "cn=a1,dc=example,dc=com",
            "cn=b1,ou=b,dc=example,dc=com",
            "cn=d1,ou=d,dc=example,dc=com",
            "cn=c1,ou=c,dc=example,dc=com",
        ]
    );
    assert!(!results[0].is_continued_search_result());
    assert!(results[1..].iter().all(|r| r.is_continued_search_result()));
    assert_eq!(results[1].connection().unwrap().host(), "b");
    assert_eq!(results[2].connection().unwrap().host(), "d");
    assert_eq!(manager.connections().len(), 4);
}

#[tokio::test]
async fn test_follow_derives_request_from_url() {
    init_test_logging();
    let directory = referral_tree();

    let (_manager, results) = search_with(&directory, ReferralHandlingMethod::Follow).await;
    results.unwrap();

    let searches = directory.stats("b", 389).searches;
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].base, "ou=b,dc=example,dc=com");
    assert_eq!(searches[0].filter, "(objectClass=person)");
    assert_eq!(searches[0].referral_handling, ReferralHandlingMethod::Follow);
}

#[tokio::test]
async fn test_follow_reuses_existing_connection() {
    init_test_logging();
    let directory = referral_tree();
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let existing_b = manager.add_connection(test_parameter("b")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new(BASE, "(objectClass=person)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let results = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(results[1].connection().unwrap().id(), existing_b.id());
    assert_eq!(manager.connections().len(), 4);
}

#[tokio::test]
async fn test_ignore_returns_only_local_entries() {
    init_test_logging();
    let directory = referral_tree();

    let (_manager, results) = search_with(&directory, ReferralHandlingMethod::Ignore).await;

    assert_eq!(dns(&results.unwrap()), vec!["cn=a1,dc=example,dc=com"]);
    assert!(directory.stats("b", 389).searches.is_empty());
    assert_eq!(directory.total_opens(), 1);
}

#[tokio::test]
async fn test_follow_manually_returns_placeholders() {
    init_test_logging();
    let directory = referral_tree();

    let (_manager, results) =
        search_with(&directory, ReferralHandlingMethod::FollowManually).await;
    let results = results.unwrap();

    assert_eq!(
        dns(&results),
        vec![
            "cn=a1,dc=example,dc=com",
            "ou=b,dc=example,dc=com",
            "ou=c,dc=example,dc=com",
        ]
    );
    let placeholder = &results[1];
    assert!(placeholder.connection().is_none());
    assert!(!placeholder.is_continued_search_result());
    assert!(placeholder.entry().attributes.is_empty());
    assert_eq!(placeholder.continuation_url().unwrap().host, "b");
    assert!(directory.stats("b", 389).searches.is_empty());
}

#[tokio::test]
async fn test_manage_sends_manage_dsa_it() {
    init_test_logging();
    let directory = referral_tree();

    let (_manager, results) = search_with(&directory, ReferralHandlingMethod::Manage).await;

    assert_eq!(results.unwrap().len(), 1);
    let searches = directory.stats("a", 389).searches;
    assert!(searches[0]
        .controls
        .iter()
        .any(|c| c.oid == MANAGE_DSA_IT_OID));
    assert!(directory.stats("b", 389).searches.is_empty());
}

#[tokio::test]
async fn test_search_referral_loop_is_an_error() {
    init_test_logging();
    let directory = MockDirectory::new();
    directory.on_search(
        "a",
        389,
        BASE,
        vec![entry("cn=a1,dc=example,dc=com"), reference(URL_B), done()],
    );
    directory.on_search(
        "b",
        389,
        "ou=b,dc=example,dc=com",
        vec![reference(URL_B), done()],
    );
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new(BASE, "(objectClass=*)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let mut results = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap();

    let first = results.next().await.unwrap().unwrap();
    assert_eq!(first.dn(), "cn=a1,dc=example,dc=com");
    let err = results.next().await.unwrap_err();
    assert!(matches!(err, ConnectionError::ReferralLoop { .. }));
    assert_eq!(monitor.errors().len(), 1);
    assert_eq!(directory.stats("b", 389).searches.len(), 1);
}

#[tokio::test]
async fn test_search_done_referral_is_followed() {
    init_test_logging();
    let directory = MockDirectory::new();
    directory.on_search(
        "a",
        389,
        "ou=b,dc=example,dc=com",
        vec![SearchResponse::Done(OperationResult::referral(vec![
            URL_B.to_string()
        ]))],
    );
    directory.on_search(
        "b",
        389,
        "ou=b,dc=example,dc=com",
        vec![entry("cn=b1,ou=b,dc=example,dc=com"), done()],
    );
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new("ou=b,dc=example,dc=com", "(objectClass=*)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let results = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(dns(&results), vec!["cn=b1,ou=b,dc=example,dc=com"]);
}

#[tokio::test]
async fn test_declined_search_referral_yields_no_results() {
    init_test_logging();
    let directory = referral_tree();
    let logs = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::builder(Arc::new(directory.clone()))
        .with_settings(test_settings(logs.path()))
        .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
        .with_referral_resolver(Arc::new(DecliningResolver))
        .build()
        .unwrap();
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new(BASE, "(objectClass=*)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let results = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(dns(&results), vec!["cn=a1,dc=example,dc=com"]);
    assert!(!monitor.is_cancelled());
}

#[tokio::test]
async fn test_failed_referred_search_is_skipped_without_error() {
    init_test_logging();
    let directory = referral_tree();
    directory.script("b", 389, |s| {
        s.search_faults
            .push_back(ConnectionError::operation_failed(32, "no such object"));
    });
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new(BASE, "(objectClass=*)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let results = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(
        dns(&results),
        vec!["cn=a1,dc=example,dc=com", "cn=c1,ou=c,dc=example,dc=com"]
    );
    assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn test_search_stream_adaptor() {
    use futures_util::StreamExt;

    init_test_logging();
    let directory = referral_tree();
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let request = SearchParameter::new(BASE, "(objectClass=*)")
        .with_referral_handling(ReferralHandlingMethod::Follow);
    let stream = connection
        .wrapper()
        .search(request, &monitor, None)
        .await
        .unwrap()
        .into_stream();
    let results: Vec<_> = stream.collect().await;

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_update_referral_is_chased() {
    init_test_logging();
    let directory = MockDirectory::new();
    directory.script("a", 389, |s| {
        s.update_results.push_back(Ok(OperationResult::referral(vec![
            "ldap://b:389/cn=x,ou=b,dc=example,dc=com".to_string(),
        ])));
    });
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    connection
        .wrapper()
        .modify_entry(
            "cn=x,dc=example,dc=com",
            &[Modification::replace("description", ["moved"])],
            &[],
            &monitor,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        directory.stats("a", 389).updates,
        vec!["modify cn=x,dc=example,dc=com"]
    );
    assert_eq!(
        directory.stats("b", 389).updates,
        vec!["modify cn=x,ou=b,dc=example,dc=com"]
    );
    assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn test_declined_update_referral_cancels() {
    init_test_logging();
    let directory = MockDirectory::new();
    directory.script("a", 389, |s| {
        s.update_results
            .push_back(Ok(OperationResult::referral(vec![URL_B.to_string()])));
    });
    let logs = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::builder(Arc::new(directory.clone()))
        .with_settings(test_settings(logs.path()))
        .with_auth_handler(Arc::new(StoredCredentialsAuthHandler))
        .with_referral_resolver(Arc::new(DecliningResolver))
        .build()
        .unwrap();
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let err = connection
        .wrapper()
        .delete_entry("ou=b,dc=example,dc=com", &[], &monitor, None)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(monitor.is_cancelled());
    assert!(directory.stats("b", 389).updates.is_empty());
}

#[tokio::test]
async fn test_update_referral_loop_is_an_error() {
    init_test_logging();
    let directory = MockDirectory::new();
    directory.script("a", 389, |s| {
        s.update_results
            .push_back(Ok(OperationResult::referral(vec![URL_B.to_string()])));
    });
    directory.script("b", 389, |s| {
        s.update_results
            .push_back(Ok(OperationResult::referral(vec![URL_B.to_string()])));
    });
    let logs = tempfile::tempdir().unwrap();
    let manager = test_manager(&directory, logs.path());
    let connection = manager.add_connection(test_parameter("a")).unwrap();
    let monitor = StudioProgressMonitor::new();

    let entry = Entry::new("ou=b,dc=example,dc=com").with_attribute("ou", ["b"]);
    let err = connection
        .wrapper()
        .create_entry(&entry, &[], &monitor, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectionError::ReferralLoop { .. }));
    assert_eq!(directory.stats("b", 389).updates.len(), 1);
}
