//! Overlay sessions: staged reads, tombstones, and shadow lifecycle.

mod common;

use bson::{doc, Bson};
use docgate::backend::StoreBackend;
use docgate::command::{DeleteLimit, DeleteStatement, UpdateModification, UpdateStatement};
use docgate::error::DocumentStoreError;
use docgate::overlay::OverlaySession;

use common::{sample_schema, seeded_backend};

#[tokio::test]
async fn test_staged_copy_shadows_base_in_merged_reads() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();
    let session = OverlaySession::open(&store, &indexed).await.unwrap();

    session
        .stage_insert_or_replace(
            "biosample_set",
            vec![doc! {
                "id": "nmdc:bsm-1",
                "type": "nmdc:Biosample",
                "associated_studies": ["nmdc:sty-1"],
                "depth": 9.0
            }],
        )
        .await
        .unwrap();

    let merged = session
        .merge_find("biosample_set", doc! { "id": "nmdc:bsm-1" }, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("depth"), Some(&Bson::Double(9.0)));

    // The base document is untouched.
    let base = store
        .find_documents("biosample_set", &doc! { "id": "nmdc:bsm-1" }, None, 0)
        .await
        .unwrap();
    assert_eq!(base[0].get("depth"), Some(&Bson::Double(1.5)));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_tombstoned_documents_vanish_from_merged_reads() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();
    let session = OverlaySession::open(&store, &indexed).await.unwrap();

    let staged = session
        .stage_deletes(
            "study_set",
            &[DeleteStatement { q: doc! { "id": "nmdc:sty-2" }, limit: DeleteLimit::One }],
        )
        .await
        .unwrap();
    assert_eq!(staged, 1);

    let merged = session
        .merge_find("study_set", doc! {}, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("id"), Some(&Bson::String("nmdc:sty-1".to_string())));

    // Tombstones live in the shadow only.
    let base = store.find_documents("study_set", &doc! {}, None, 0).await.unwrap();
    assert_eq!(base.len(), 2);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_drops_shadow_database() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();

    let session = OverlaySession::open(&store, &indexed).await.unwrap();
    session
        .stage_insert_or_replace(
            "study_set",
            vec![doc! { "id": "nmdc:sty-9", "type": "nmdc:Study" }],
        )
        .await
        .unwrap();
    let names = store.database_names().await;
    assert!(names.iter().any(|name| name.starts_with("overlay-")));

    session.close().await.unwrap();
    let names = store.database_names().await;
    assert!(names.iter().all(|name| !name.starts_with("overlay-")));
}

#[tokio::test]
async fn test_scoped_drops_shadow_when_closure_errors() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();

    let outcome: Result<(), DocumentStoreError> =
        OverlaySession::scoped(&store, &indexed, async |session| {
            session
                .stage_insert_or_replace(
                    "study_set",
                    vec![doc! { "id": "nmdc:sty-9", "type": "nmdc:Study" }],
                )
                .await?;
            Err(DocumentStoreError::Unknown("rehearsal rejected".to_string()))
        })
        .await;
    assert!(matches!(outcome, Err(DocumentStoreError::Unknown(_))));

    let names = store.database_names().await;
    assert!(names.iter().all(|name| !name.starts_with("overlay-")));
}

#[tokio::test]
async fn test_merged_projection_hides_bookkeeping_fields() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();
    let session = OverlaySession::open(&store, &indexed).await.unwrap();

    session
        .stage_deletes(
            "biosample_set",
            &[DeleteStatement { q: doc! { "id": "nmdc:bsm-2" }, limit: DeleteLimit::One }],
        )
        .await
        .unwrap();

    // The merge needs `id` and the tombstone flag internally; a caller who
    // projected neither must not see them.
    let merged = session
        .merge_find("biosample_set", doc! {}, Some(doc! { "depth": 1 }))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("depth"), Some(&Bson::Double(1.5)));
    assert!(merged[0].contains_key("_id"));
    assert!(!merged[0].contains_key("id"));
    assert!(!merged[0].contains_key("_deleted"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_update_staging_copies_each_base_document_once() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let indexed = schema.collections_with_identifier();
    let session = OverlaySession::open(&store, &indexed).await.unwrap();

    // Both statements match nmdc:bsm-1; the shadow's unique `id` index would
    // reject a second copy of it.
    let statements = vec![
        UpdateStatement {
            q: doc! { "id": "nmdc:bsm-1" },
            u: UpdateModification::Document(doc! { "$set": { "depth": 3.0 } }),
            upsert: false,
            multi: false,
        },
        UpdateStatement {
            q: doc! { "associated_studies": "nmdc:sty-1" },
            u: UpdateModification::Document(doc! { "$set": { "name": "renamed" } }),
            upsert: false,
            multi: true,
        },
    ];
    let summary = session.stage_updates("biosample_set", &statements).await.unwrap();
    assert_eq!(summary.matched, 3);
    assert_eq!(summary.modified, 3);

    // Both modifications landed on the single staged copy.
    let merged = session
        .merge_find("biosample_set", doc! { "id": "nmdc:bsm-1" }, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("depth"), Some(&Bson::Double(3.0)));
    assert_eq!(merged[0].get("name"), Some(&Bson::String("renamed".to_string())));

    session.close().await.unwrap();
}
