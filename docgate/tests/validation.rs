//! Candidate-set validation: shape checking and overlay-staged reference
//! resolution against a seeded base store.

mod common;

use std::sync::Arc;

use bson::doc;
use docgate::refindex::ReferenceIndex;
use docgate::schema::SchemaView;
use docgate::validate::SchemaValidator;

use common::{sample_schema, seeded_backend};

fn governed(schema: Arc<SchemaView>) -> SchemaValidator {
    let refs = Arc::new(ReferenceIndex::build(&schema));
    SchemaValidator::new(schema, refs)
}

#[tokio::test]
async fn test_valid_candidate_set_passes() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! {
        "@type": "nmdc:Database",
        "biosample_set": [{
            "id": "nmdc:bsm-3",
            "type": "nmdc:Biosample",
            "associated_studies": ["nmdc:sty-1"],
            "depth": 0.3
        }]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    assert!(outcome.is_ok(), "unexpected errors: {:?}", outcome.errors());
}

#[tokio::test]
async fn test_unknown_collection_is_reported() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! { "widget_set": [{ "id": "w-1" }] };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let errors = outcome.errors().unwrap();
    assert!(errors.messages("widget_set").unwrap()[0].contains("not a known schema collection"));

    let candidate = doc! { "biosample_set": 5 };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let errors = outcome.errors().unwrap();
    assert!(errors.messages("biosample_set").unwrap()[0].contains("must be an array"));
}

#[tokio::test]
async fn test_wrong_type_discriminator_is_reported() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! { "@type": "nmdc:Biosample" };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let errors = outcome.errors().unwrap();
    assert!(errors.messages("@type").unwrap()[0].contains("root class 'Database'"));
}

#[tokio::test]
async fn test_shape_errors_labeled_by_document_id() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! {
        "biosample_set": [{ "id": "nmdc:bsm-9", "type": "nmdc:Biosample", "depth": "deep" }]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let messages = outcome.errors().unwrap().messages("biosample_set").unwrap().to_vec();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.starts_with("'nmdc:bsm-9':")));
    assert!(messages.iter().any(|m| m.contains("'associated_studies' is a required field")));
    assert!(messages.iter().any(|m| m.contains("expected float")));
}

#[tokio::test]
async fn test_dangling_reference_is_detected() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! {
        "biosample_set": [{
            "id": "nmdc:bsm-9",
            "type": "nmdc:Biosample",
            "associated_studies": ["nmdc:sty-404"]
        }]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let messages = outcome.errors().unwrap().messages("biosample_set").unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("'nmdc:sty-404'"));
    assert!(messages[0].contains("study_set"));
}

#[tokio::test]
async fn test_same_collection_batch_references_resolve() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    // nmdc:sty-11 references nmdc:sty-10, which exists only in this batch.
    let candidate = doc! {
        "study_set": [
            { "id": "nmdc:sty-10", "type": "nmdc:Study" },
            { "id": "nmdc:sty-11", "type": "nmdc:Study", "part_of": ["nmdc:sty-10"] }
        ]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    assert!(outcome.is_ok(), "unexpected errors: {:?}", outcome.errors());
}

#[tokio::test]
async fn test_cross_collection_batch_references_do_not_resolve() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    // Each collection's candidates are staged in their own session, so a
    // biosample may not lean on a study that is merely part of the same
    // submission. The study must already exist in the base store.
    let candidate = doc! {
        "study_set": [{ "id": "nmdc:sty-20", "type": "nmdc:Study" }],
        "biosample_set": [{
            "id": "nmdc:bsm-20",
            "type": "nmdc:Biosample",
            "associated_studies": ["nmdc:sty-20"]
        }]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let errors = outcome.errors().unwrap();
    assert!(errors.messages("study_set").is_none());
    assert!(errors.messages("biosample_set").unwrap()[0].contains("'nmdc:sty-20'"));
}

#[tokio::test]
async fn test_duplicate_ids_within_batch_fail_staging() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! {
        "study_set": [
            { "id": "nmdc:sty-30", "type": "nmdc:Study" },
            { "id": "nmdc:sty-30", "type": "nmdc:Study", "name": "the other one" }
        ]
    };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    let messages = outcome.errors().unwrap().messages("study_set").unwrap();
    assert!(messages[0].contains("could not stage candidate documents"));
}

#[tokio::test]
async fn test_empty_candidate_lists_are_accepted() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! { "biosample_set": [], "study_set": [] };
    let outcome = validator.validate_database(&store, &candidate).await.unwrap();
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_verdict_is_deterministic() {
    let schema = sample_schema();
    let store = seeded_backend(&schema).await;
    let validator = governed(schema);

    let candidate = doc! {
        "widget_set": [{ "id": "w-1" }],
        "biosample_set": [
            { "id": "nmdc:bsm-9", "type": "nmdc:Biosample", "associated_studies": ["nmdc:sty-404"] },
            { "id": "nmdc:bsm-10", "type": "nmdc:Biosample", "associated_studies": ["nmdc:sty-405"] }
        ]
    };
    let first = validator.validate_database(&store, &candidate).await.unwrap();
    let second = validator.validate_database(&store, &candidate).await.unwrap();
    assert!(!first.is_ok());
    assert_eq!(first, second);
}
