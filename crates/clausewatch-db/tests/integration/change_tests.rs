use chrono::{TimeDelta, Utc};
use clausewatch_core::models::{DocumentType, NewChangeRecord};
use clausewatch_core::traits::ChangeStore;
use clausewatch_db::Database;
use uuid::Uuid;

use crate::integration::common::{new_version, setup_test_db};

async fn version_pair(db: &Database, domain: &str) -> (Uuid, Uuid) {
    let repo = db.version_repo();
    let now = Utc::now();
    let previous = repo
        .upsert(&new_version(
            domain,
            DocumentType::Privacy,
            "We collect your email.",
            70,
            now - TimeDelta::days(8),
        ))
        .await
        .unwrap();
    let current = repo
        .upsert(&new_version(
            domain,
            DocumentType::Privacy,
            "We collect and sell your email.",
            45,
            now,
        ))
        .await
        .unwrap();
    (previous, current)
}

fn change(domain: &str, previous: Uuid, current: Uuid) -> NewChangeRecord {
    NewChangeRecord {
        domain: domain.into(),
        document_type: DocumentType::Privacy,
        previous_version_id: previous,
        current_version_id: current,
        previous_score: 70,
        current_score: 45,
        previous_analysis: serde_json::json!({"score": 70, "findings": []}),
        summary: "Policy text changed. Score sharply dropped by 25 (70 -> 45).".into(),
    }
}

#[tokio::test]
async fn record_and_list_change() {
    let (db, _container) = setup_test_db().await;
    let (previous, current) = version_pair(&db, "example.com").await;
    let repo = db.change_repo();

    let recorded = repo
        .record_change(&change("example.com", previous, current))
        .await
        .unwrap();

    assert!(!recorded.id.is_nil());
    assert_eq!(recorded.score_delta, -25);
    assert_eq!(recorded.previous_version_id, previous);
    assert_eq!(recorded.current_version_id, current);
    assert_eq!(recorded.previous_analysis["score"], 70);
    assert!(recorded.dismissed_at.is_none());

    let open = repo.list_changes(None, 10).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, recorded.id);
}

#[tokio::test]
async fn list_filters_by_domain() {
    let (db, _container) = setup_test_db().await;
    let repo = db.change_repo();

    let (p1, c1) = version_pair(&db, "example.com").await;
    let (p2, c2) = version_pair(&db, "other.org").await;
    repo.insert(&change("example.com", p1, c1)).await.unwrap();
    repo.insert(&change("other.org", p2, c2)).await.unwrap();

    let only_other = repo.list_open(Some("other.org"), 10).await.unwrap();
    assert_eq!(only_other.len(), 1);
    assert_eq!(only_other[0].domain, "other.org");

    assert_eq!(repo.list_open(None, 10).await.unwrap().len(), 2);
    assert_eq!(repo.list_open(None, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dismiss_hides_change_once() {
    let (db, _container) = setup_test_db().await;
    let (previous, current) = version_pair(&db, "example.com").await;
    let repo = db.change_repo();

    let recorded = repo
        .insert(&change("example.com", previous, current))
        .await
        .unwrap();

    assert!(repo.dismiss_change(recorded.id).await.unwrap());
    assert!(!repo.dismiss_change(recorded.id).await.unwrap());
    assert!(!repo.dismiss_change(Uuid::new_v4()).await.unwrap());
    assert!(repo.list_changes(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn change_requires_existing_versions() {
    let (db, _container) = setup_test_db().await;
    let repo = db.change_repo();

    let err = repo
        .insert(&change("example.com", Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        clausewatch_core::AppError::PersistenceError(_)
    ));
}
