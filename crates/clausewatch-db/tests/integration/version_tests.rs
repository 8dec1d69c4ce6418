use chrono::{TimeDelta, Utc};
use clausewatch_core::models::DocumentType;
use clausewatch_core::traits::VersionStore;
use uuid::Uuid;

use crate::integration::common::{new_version, setup_test_db};

const DOMAIN: &str = "example.com";
const TEXT_V1: &str = "Privacy Policy. We collect your email address.";
const TEXT_V2: &str = "Privacy Policy. We collect your email address and location.";

#[tokio::test]
async fn upsert_and_get_latest() {
    let (db, _container) = setup_test_db().await;
    let repo = db.version_repo();

    let version = new_version(DOMAIN, DocumentType::Privacy, TEXT_V1, 70, Utc::now());
    let id = repo.upsert(&version).await.unwrap();
    assert!(!id.is_nil());

    let latest = repo
        .get_latest(DOMAIN, DocumentType::Privacy)
        .await
        .unwrap()
        .expect("Should find the version");

    assert_eq!(latest.id, id);
    assert_eq!(latest.document_type, DocumentType::Privacy);
    assert_eq!(latest.content_hash, version.content_hash);
    assert_eq!(latest.normalized_text, TEXT_V1);
    assert_eq!(latest.score, 70);
    assert_eq!(latest.word_count, version.word_count);
    assert_eq!(latest.structured_analysis["findings"], serde_json::json!([]));
}

#[tokio::test]
async fn identical_content_updates_instead_of_duplicating() {
    let (db, _container) = setup_test_db().await;
    let repo = db.version_repo();

    let first = new_version(DOMAIN, DocumentType::Privacy, TEXT_V1, 70, Utc::now());
    let id1 = repo.upsert(&first).await.unwrap();

    let mut again = new_version(DOMAIN, DocumentType::Privacy, TEXT_V1, 55, Utc::now());
    again.source_url = "https://example.com/legal/privacy".into();
    let id2 = repo.upsert(&again).await.unwrap();

    assert_eq!(id1, id2);

    let history = repo
        .get_history(DOMAIN, DocumentType::Privacy, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].score, 55);
    assert_eq!(history[0].source_url, "https://example.com/legal/privacy");
}

#[tokio::test]
async fn latest_follows_analyzed_at_and_history_is_newest_first() {
    let (db, _container) = setup_test_db().await;
    let repo = db.version_repo();
    let now = Utc::now();

    let old = repo
        .upsert(&new_version(
            DOMAIN,
            DocumentType::Privacy,
            TEXT_V1,
            70,
            now - TimeDelta::days(10),
        ))
        .await
        .unwrap();
    let new = repo
        .upsert(&new_version(DOMAIN, DocumentType::Privacy, TEXT_V2, 60, now))
        .await
        .unwrap();

    let latest = repo
        .get_latest_version(DOMAIN, DocumentType::Privacy)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, new);

    let history = repo
        .list_versions(DOMAIN, DocumentType::Privacy, 10)
        .await
        .unwrap();
    let ids: Vec<Uuid> = history.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![new, old]);

    let limited = repo
        .list_versions(DOMAIN, DocumentType::Privacy, 1)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn document_types_and_domains_are_isolated() {
    let (db, _container) = setup_test_db().await;
    let repo = db.version_repo();

    repo.upsert(&new_version(DOMAIN, DocumentType::Privacy, TEXT_V1, 70, Utc::now()))
        .await
        .unwrap();
    // Same text under another type is a separate row.
    repo.upsert(&new_version(DOMAIN, DocumentType::Terms, TEXT_V1, 40, Utc::now()))
        .await
        .unwrap();

    let terms = repo
        .get_latest(DOMAIN, DocumentType::Terms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terms.score, 40);

    assert!(
        repo.get_latest("other.org", DocumentType::Privacy)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        repo.get_latest(DOMAIN, DocumentType::Cookies)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn get_by_id_returns_none_for_unknown_id() {
    let (db, _container) = setup_test_db().await;
    let repo = db.version_repo();

    let id = repo
        .upsert(&new_version(DOMAIN, DocumentType::Privacy, TEXT_V1, 70, Utc::now()))
        .await
        .unwrap();

    assert_eq!(repo.get_version_by_id(id).await.unwrap().unwrap().id, id);
    assert!(repo.get_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.health_check().await.unwrap();
}
