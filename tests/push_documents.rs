use std::collections::BTreeMap;

use serde_json::{json, Value};

use docship::registry::ServerEntry;
use docship::sync::{push, MockDocumentStore, StoreError};

fn entry(url: &str) -> ServerEntry {
    ServerEntry {
        url: url.to_string(),
        auth: None,
    }
}

fn servers(entries: &[(&str, &str)]) -> BTreeMap<String, ServerEntry> {
    entries
        .iter()
        .map(|(name, url)| (name.to_string(), entry(url)))
        .collect()
}

fn status_error(url: &str) -> StoreError {
    StoreError::Status {
        url: url.to_string(),
        status: 502,
        body: "bad gateway".to_string(),
    }
}

#[tokio::test]
async fn existing_documents_get_the_probed_revision_attached() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    store
        .expect_current_revision()
        .returning(|_, _, id| match id {
            "_design/app" => Ok(Some("1-abc123".to_string())),
            _ => Ok(None),
        });
    store
        .expect_bulk_upsert()
        .withf(|_, _, docs| {
            docs.len() == 2
                && docs[0]["_rev"] == json!("1-abc123")
                && docs[1].get("_rev").is_none()
        })
        .return_once(|_, _, _| Ok("[]".to_string()));

    let documents = vec![
        json!({"_id": "_design/app", "language": "javascript"}),
        json!({"_id": "_design/fresh", "language": "javascript"}),
    ];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("local", "http://localhost:5984")]),
    )
    .await;

    assert!(report.any_succeeded());
    // The caller's batch is untouched: revisions only live on the per-server copy.
    assert!(documents[0].get("_rev").is_none());
}

#[tokio::test]
async fn documents_without_an_id_skip_the_probe() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    // No expect_current_revision: a probe would panic the mock.
    store
        .expect_bulk_upsert()
        .withf(|_, _, docs| docs.len() == 1 && docs[0].get("_rev").is_none())
        .return_once(|_, _, _| Ok("[]".to_string()));

    let documents = vec![json!({"note": "server assigns the id"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("local", "http://localhost:5984")]),
    )
    .await;
    assert!(report.any_succeeded());
}

#[tokio::test]
async fn one_unreachable_server_does_not_block_the_other() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    store.expect_current_revision().returning(|_, _, _| Ok(None));
    store
        .expect_bulk_upsert()
        .returning(|server, _, _| match server.url.as_str() {
            "http://dead:5984" => Err(status_error("http://dead:5984/mydb/_bulk_docs")),
            _ => Ok("[{\"ok\":true}]".to_string()),
        });

    let documents = vec![json!({"_id": "_design/app"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("alive", "http://alive:5984"), ("dead", "http://dead:5984")]),
    )
    .await;

    assert_eq!(report.servers.len(), 2);
    let alive = report.servers.iter().find(|o| o.server == "alive").unwrap();
    let dead = report.servers.iter().find(|o| o.server == "dead").unwrap();
    assert!(alive.result.is_ok());
    assert!(dead.result.is_err());
    assert!(report.any_succeeded());
    assert!(!report.all_failed());
}

#[tokio::test]
async fn failed_probe_fails_that_server_but_not_the_next() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    store
        .expect_current_revision()
        .returning(|server, _, _| match server.url.as_str() {
            "http://dead:5984" => Err(status_error("http://dead:5984/mydb/_design/app")),
            _ => Ok(None),
        });
    store
        .expect_bulk_upsert()
        .withf(|server, _, _| server.url != "http://dead:5984")
        .return_once(|_, _, _| Ok("[]".to_string()));

    let documents = vec![json!({"_id": "_design/app"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("alive", "http://alive:5984"), ("dead", "http://dead:5984")]),
    )
    .await;

    assert!(report.any_succeeded());
    assert!(report
        .servers
        .iter()
        .any(|o| o.server == "dead" && o.result.is_err()));
}

#[tokio::test]
async fn ensure_database_failure_is_not_fatal_to_the_upload() {
    let mut store = MockDocumentStore::new();
    store
        .expect_ensure_database()
        .returning(|_, _| Err(status_error("http://localhost:5984/mydb")));
    store.expect_current_revision().returning(|_, _, _| Ok(None));
    store
        .expect_bulk_upsert()
        .return_once(|_, _, _| Ok("[]".to_string()));

    let documents = vec![json!({"_id": "_design/app"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("local", "http://localhost:5984")]),
    )
    .await;
    assert!(report.any_succeeded());
}

#[tokio::test]
async fn all_servers_failing_is_reported_as_such() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    store.expect_current_revision().returning(|_, _, _| Ok(None));
    store
        .expect_bulk_upsert()
        .returning(|_, _, _| Err(status_error("http://dead:5984/mydb/_bulk_docs")));

    let documents = vec![json!({"_id": "_design/app"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("one", "http://dead:5984"), ("two", "http://dead2:5984")]),
    )
    .await;
    assert!(report.all_failed());
}

#[tokio::test]
async fn loose_documents_get_revisions_attached_too() {
    let mut store = MockDocumentStore::new();
    store.expect_ensure_database().returning(|_, _| Ok(()));
    store
        .expect_current_revision()
        .returning(|_, _, _| Ok(Some("7-zzz".to_string())));
    store
        .expect_bulk_upsert()
        .withf(|_, _, docs| docs[0]["_rev"] == Value::String("7-zzz".into()))
        .return_once(|_, _, _| Ok("[]".to_string()));

    let documents = vec![json!({"_id": "page-1", "title": "hello"})];
    let report = push(
        &store,
        &documents,
        "mydb",
        &servers(&[("local", "http://localhost:5984")]),
    )
    .await;
    assert!(report.any_succeeded());
    assert!(documents[0].get("_rev").is_none());
}
