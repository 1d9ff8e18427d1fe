//! Shared fixtures: a compiled schema and a seeded in-memory store.

use std::sync::Arc;

use bson::doc;
use docgate::backend::StoreBackend;
use docgate::memory::InMemoryBackend;
use docgate::schema::SchemaView;
use serde_json::json;

/// Two governed collections. Studies may nest under other studies, and every
/// biosample must name the studies it belongs to.
pub fn sample_schema() -> Arc<SchemaView> {
    Arc::new(
        SchemaView::from_json(json!({
            "name": "Database",
            "prefix": "nmdc",
            "collections": {
                "biosample_set": ["Biosample"],
                "study_set": ["Study"]
            },
            "classes": {
                "NamedThing": {
                    "fields": {
                        "id": {"type": "string", "required": true, "identifier": true},
                        "name": {"type": "string"},
                        "type": {"type": "string"}
                    }
                },
                "Study": {
                    "parent": "NamedThing",
                    "fields": {
                        "part_of": {
                            "type": "reference", "range": "Study", "multivalued": true
                        }
                    }
                },
                "Biosample": {
                    "parent": "NamedThing",
                    "fields": {
                        "associated_studies": {
                            "type": "reference", "range": "Study",
                            "multivalued": true, "required": true
                        },
                        "depth": {"type": "float"}
                    }
                }
            }
        }))
        .expect("fixture schema is consistent"),
    )
}

/// Fresh in-memory store with unique `id` indexes provisioned and a small
/// reference chain seeded: `nmdc:sty-2` is part of `nmdc:sty-1`, and both
/// biosamples belong to `nmdc:sty-1`.
pub async fn seeded_backend(schema: &SchemaView) -> InMemoryBackend {
    let store = InMemoryBackend::new();
    for collection in schema.collections_with_identifier() {
        store
            .create_unique_index(&collection, "id")
            .await
            .expect("index provisioning on an empty store");
    }
    store
        .insert_documents(
            "study_set",
            vec![
                doc! { "id": "nmdc:sty-1", "type": "nmdc:Study", "name": "soil survey" },
                doc! { "id": "nmdc:sty-2", "type": "nmdc:Study", "part_of": ["nmdc:sty-1"] },
            ],
        )
        .await
        .expect("seed studies");
    store
        .insert_documents(
            "biosample_set",
            vec![
                doc! {
                    "id": "nmdc:bsm-1",
                    "type": "nmdc:Biosample",
                    "associated_studies": ["nmdc:sty-1"],
                    "depth": 1.5
                },
                doc! {
                    "id": "nmdc:bsm-2",
                    "type": "nmdc:Biosample",
                    "associated_studies": ["nmdc:sty-1"]
                },
            ],
        )
        .await
        .expect("seed biosamples");
    store
}
