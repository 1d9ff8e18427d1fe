//! Schema-derived index of which fields may reference which collections.
//!
//! Built once from a [`SchemaView`] and cached as immutable shared state.
//! All subclass resolution happens here at build time: a reference field's
//! allowed target collections are computed from its declared range class plus
//! that class's full subclass closure, mapped to the collections permitted to
//! store those classes. Lookups never walk the class hierarchy.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{FieldKind, SchemaView};

/// Immutable lookup tables for reference resolution.
///
/// Rebuilding is only triggered by an explicit schema-description reload,
/// never by ordinary traffic.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    /// Class name to the names of its reference-holding fields.
    fields_by_class: BTreeMap<String, BTreeSet<String>>,
    /// (class, field) to the collections legally allowed to hold the target.
    targets: BTreeMap<(String, String), BTreeSet<String>>,
    /// Collection name to the (class, field) pairs that may point into it.
    referrers: BTreeMap<String, BTreeSet<(String, String)>>,
}

impl ReferenceIndex {
    /// Derives the index from a schema view.
    pub fn build(schema: &SchemaView) -> Self {
        let mut index = ReferenceIndex::default();
        for class_name in schema.class_names() {
            let Some(fields) = schema.effective_fields(class_name) else {
                continue;
            };
            for (field_name, field) in fields {
                if field.kind != FieldKind::Reference {
                    continue;
                }
                // Ranges are validated at SchemaView construction.
                let Some(range) = field.range.as_deref() else {
                    continue;
                };
                let mut collections = BTreeSet::new();
                if let Some(closure) = schema.subclass_closure(range) {
                    for target_class in closure {
                        if let Some(held_in) = schema.collections_for_class(target_class) {
                            collections.extend(held_in.iter().cloned());
                        }
                    }
                }
                index
                    .fields_by_class
                    .entry(class_name.to_string())
                    .or_default()
                    .insert(field_name.clone());
                for collection in &collections {
                    index
                        .referrers
                        .entry(collection.clone())
                        .or_default()
                        .insert((class_name.to_string(), field_name.clone()));
                }
                index
                    .targets
                    .insert((class_name.to_string(), field_name.clone()), collections);
            }
        }
        index
    }

    /// The reference-holding field names of a class. Empty for classes with
    /// no reference fields.
    pub fn fields_with_references(&self, class_name: &str) -> impl Iterator<Item = &str> {
        self.fields_by_class
            .get(class_name)
            .into_iter()
            .flat_map(|fields| fields.iter().map(String::as_str))
    }

    /// The collections legally allowed to hold the target of a reference
    /// field, or `None` for a field that is not a reference.
    pub fn target_collections(&self, class_name: &str, field_name: &str) -> Option<&BTreeSet<String>> {
        self.targets
            .get(&(class_name.to_string(), field_name.to_string()))
    }

    /// The (class, field) pairs whose references may point into a collection.
    /// Used to find the documents a deletion could leave dangling.
    pub fn referring_fields(&self, collection: &str) -> impl Iterator<Item = (&str, &str)> {
        self.referrers
            .get(collection)
            .into_iter()
            .flat_map(|pairs| pairs.iter().map(|(c, f)| (c.as_str(), f.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_index() -> (SchemaView, ReferenceIndex) {
        let schema = SchemaView::from_json(json!({
            "name": "Database",
            "collections": {
                "biosample_set": ["Biosample"],
                "study_set": ["Study"],
                "activity_set": ["Activity"]
            },
            "classes": {
                "NamedThing": {
                    "fields": {
                        "id": {"type": "string", "required": true, "identifier": true}
                    }
                },
                "Study": {"parent": "NamedThing", "fields": {}},
                "Biosample": {
                    "parent": "NamedThing",
                    "fields": {
                        "associated_studies": {
                            "type": "reference", "range": "Study", "multivalued": true
                        }
                    }
                },
                "Activity": {
                    "parent": "NamedThing",
                    "fields": {
                        "has_input": {
                            "type": "reference", "range": "NamedThing", "multivalued": true
                        }
                    }
                }
            }
        }))
        .unwrap();
        let index = ReferenceIndex::build(&schema);
        (schema, index)
    }

    #[test]
    fn test_fields_with_references() {
        let (_, index) = sample_index();
        let fields: Vec<&str> = index.fields_with_references("Biosample").collect();
        assert_eq!(fields, vec!["associated_studies"]);
        assert_eq!(index.fields_with_references("Study").count(), 0);
    }

    #[test]
    fn test_target_collections_follow_subclass_closure() {
        let (_, index) = sample_index();
        // Range Study maps to study_set only.
        let narrow = index.target_collections("Biosample", "associated_studies").unwrap();
        assert_eq!(narrow.len(), 1);
        assert!(narrow.contains("study_set"));
        // Range NamedThing fans out to every collection holding a subclass.
        let wide = index.target_collections("Activity", "has_input").unwrap();
        assert_eq!(wide.len(), 3);
    }

    #[test]
    fn test_target_collections_none_for_non_reference() {
        let (_, index) = sample_index();
        assert!(index.target_collections("Biosample", "id").is_none());
    }

    #[test]
    fn test_referring_fields_reverse_map() {
        let (_, index) = sample_index();
        let into_studies: Vec<(&str, &str)> = index.referring_fields("study_set").collect();
        assert!(into_studies.contains(&("Biosample", "associated_studies")));
        assert!(into_studies.contains(&("Activity", "has_input")));
        // Nothing references biosample_set except the wide NamedThing range.
        let into_biosamples: Vec<(&str, &str)> = index.referring_fields("biosample_set").collect();
        assert_eq!(into_biosamples, vec![("Activity", "has_input")]);
    }
}
