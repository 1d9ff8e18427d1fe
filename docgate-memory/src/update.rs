//! Update-modification application for the in-memory backend.
//!
//! Implements the modification subset the gateway emits: the operator form
//! with `$set`, `$unset`, `$inc` and `$push` over dotted paths, and the
//! full-replacement form, which preserves the storage identity of the
//! replaced document. Aggregation pipeline updates are rejected. Upsert
//! statements that match nothing synthesize a new document from the
//! filter's equality conditions with the modification applied on top.

use bson::{Bson, Document};

use docgate_core::{
    command::UpdateModification,
    error::{DocumentStoreError, DocumentStoreResult},
    overlay::INTERNAL_ID_FIELD,
};

use crate::evaluator::{is_operator_spec, resolve_path};

/// Applies a modification to one document in place.
pub(crate) fn apply_modification(
    doc: &mut Document,
    modification: &UpdateModification,
) -> DocumentStoreResult<()> {
    let spec = match modification {
        UpdateModification::Document(spec) => spec,
        UpdateModification::Pipeline(_) => return Err(pipeline_unsupported()),
    };
    if !modification.is_operator_form() {
        return replace_document(doc, spec);
    }
    for (op, operand) in spec {
        let Bson::Document(assignments) = operand else {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "'{op}' requires a document of field assignments"
            )));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in assignments {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in assignments {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in assignments {
                    inc_path(doc, path, delta)?;
                }
            }
            "$push" => {
                for (path, value) in assignments {
                    push_path(doc, path, value.clone())?;
                }
            }
            other => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "unsupported update operator '{other}'"
                )));
            }
        }
    }
    Ok(())
}

/// Synthesizes the document an unmatched upsert statement inserts: the
/// filter's equality conditions as a base, with the modification applied on
/// top. A replacement modification is used as-is.
pub(crate) fn synthesize_upsert(
    filter: &Document,
    modification: &UpdateModification,
) -> DocumentStoreResult<Document> {
    let spec = match modification {
        UpdateModification::Document(spec) => spec,
        UpdateModification::Pipeline(_) => return Err(pipeline_unsupported()),
    };
    if !modification.is_operator_form() {
        return Ok(spec.clone());
    }
    let mut doc = Document::new();
    for (path, condition) in filter {
        if path.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(inner) if is_operator_spec(inner) => {
                // Only a bare `$eq` pins a value for the new document.
                if inner.len() == 1 {
                    if let Some(value) = inner.get("$eq") {
                        set_path(&mut doc, path, value.clone())?;
                    }
                }
            }
            value => set_path(&mut doc, path, value.clone())?,
        }
    }
    apply_modification(&mut doc, modification)?;
    Ok(doc)
}

fn replace_document(doc: &mut Document, replacement: &Document) -> DocumentStoreResult<()> {
    let original_id = doc.get(INTERNAL_ID_FIELD).cloned();
    if let (Some(original), Some(replaced)) = (&original_id, replacement.get(INTERNAL_ID_FIELD)) {
        if original != replaced {
            return Err(DocumentStoreError::InvalidDocument(
                "the storage identity of a document cannot be changed".to_string(),
            ));
        }
    }
    *doc = replacement.clone();
    if let Some(id) = original_id {
        if !doc.contains_key(INTERNAL_ID_FIELD) {
            doc.insert(INTERNAL_ID_FIELD, id);
        }
    }
    Ok(())
}

/// Sets a value at a dotted path, creating intermediate documents.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let mut cursor = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            cursor.insert(part, value);
            return Ok(());
        }
        match cursor.get(part) {
            Some(Bson::Document(_)) => {}
            Some(_) => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot create path '{path}': '{part}' is not a document"
                )));
            }
            None => {
                cursor.insert(part, Document::new());
            }
        }
        cursor = match cursor.get_mut(part) {
            Some(Bson::Document(inner)) => inner,
            _ => unreachable!(),
        };
    }
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn inc_path(doc: &mut Document, path: &str, delta: &Bson) -> DocumentStoreResult<()> {
    let updated = match resolve_path(doc, path) {
        None => {
            if as_number(delta).is_none() {
                return Err(non_numeric_inc(path));
            }
            delta.clone()
        }
        Some(current) => add_numbers(current, delta).ok_or_else(|| non_numeric_inc(path))?,
    };
    set_path(doc, path, updated)
}

fn push_path(doc: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match resolve_path(doc, path).cloned() {
        None => set_path(doc, path, Bson::Array(vec![value])),
        Some(Bson::Array(mut items)) => {
            items.push(value);
            set_path(doc, path, Bson::Array(items))
        }
        Some(_) => Err(DocumentStoreError::InvalidDocument(format!(
            "'$push' requires an array at '{path}'"
        ))),
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(n) => Some(Number::Int(*n as i64)),
        Bson::Int64(n) => Some(Number::Int(*n)),
        Bson::Double(n) => Some(Number::Float(*n)),
        _ => None,
    }
}

fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (as_number(current)?, as_number(delta)?) {
        (Number::Int(a), Number::Int(b)) => Some(match a.checked_add(b) {
            Some(sum) => Bson::Int64(sum),
            None => Bson::Double(a as f64 + b as f64),
        }),
        (Number::Int(a), Number::Float(b)) => Some(Bson::Double(a as f64 + b)),
        (Number::Float(a), Number::Int(b)) => Some(Bson::Double(a + b as f64)),
        (Number::Float(a), Number::Float(b)) => Some(Bson::Double(a + b)),
    }
}

fn non_numeric_inc(path: &str) -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(format!("'$inc' requires numeric values at '{path}'"))
}

fn pipeline_unsupported() -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(
        "aggregation pipeline updates are not supported by the in-memory backend".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn operator(spec: Document) -> UpdateModification {
        UpdateModification::Document(spec)
    }

    #[test]
    fn test_set_creates_dotted_path() {
        let mut d = doc! { "id": "bsm-1" };
        apply_modification(&mut d, &operator(doc! { "$set": { "env.medium": "soil" } })).unwrap();
        assert_eq!(d, doc! { "id": "bsm-1", "env": { "medium": "soil" } });
    }

    #[test]
    fn test_set_rejects_non_document_intermediate() {
        let mut d = doc! { "env": "soil" };
        let err = apply_modification(&mut d, &operator(doc! { "$set": { "env.medium": 1 } }));
        assert!(matches!(err, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_unset_removes_nested_field() {
        let mut d = doc! { "a": { "b": 1, "c": 2 } };
        apply_modification(&mut d, &operator(doc! { "$unset": { "a.b": "" } })).unwrap();
        assert_eq!(d, doc! { "a": { "c": 2 } });
        // Unsetting a missing path is a no-op.
        apply_modification(&mut d, &operator(doc! { "$unset": { "x.y": "" } })).unwrap();
        assert_eq!(d, doc! { "a": { "c": 2 } });
    }

    #[test]
    fn test_inc_adds_and_initializes() {
        let mut d = doc! { "count": 2 };
        apply_modification(&mut d, &operator(doc! { "$inc": { "count": 3, "fresh": 1 } }))
            .unwrap();
        assert_eq!(d.get("count"), Some(&Bson::Int64(5)));
        assert_eq!(d.get("fresh"), Some(&Bson::Int32(1)));
    }

    #[test]
    fn test_inc_rejects_non_numeric_target() {
        let mut d = doc! { "name": "x" };
        let err = apply_modification(&mut d, &operator(doc! { "$inc": { "name": 1 } }));
        assert!(matches!(err, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_push_appends_and_creates() {
        let mut d = doc! { "tags": ["a"] };
        apply_modification(&mut d, &operator(doc! { "$push": { "tags": "b", "new": 1 } }))
            .unwrap();
        assert_eq!(d.get("tags"), Some(&Bson::Array(vec!["a".into(), "b".into()])));
        assert_eq!(d.get("new"), Some(&Bson::Array(vec![Bson::Int32(1)])));
    }

    #[test]
    fn test_replacement_preserves_storage_identity() {
        let id = bson::oid::ObjectId::new();
        let mut d = doc! { "_id": id, "id": "bsm-1", "name": "old" };
        apply_modification(
            &mut d,
            &operator(doc! { "id": "bsm-1", "name": "new" }),
        )
        .unwrap();
        assert_eq!(d.get("id"), Some(&Bson::String("bsm-1".into())));
        assert_eq!(d.get("name"), Some(&Bson::String("new".into())));
        assert_eq!(d.get("_id"), Some(&Bson::ObjectId(id)));
    }

    #[test]
    fn test_replacement_rejects_identity_change() {
        let mut d = doc! { "_id": bson::oid::ObjectId::new(), "name": "old" };
        let err = apply_modification(
            &mut d,
            &operator(doc! { "_id": bson::oid::ObjectId::new(), "name": "new" }),
        );
        assert!(matches!(err, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut d = doc! { "a": 1 };
        let err = apply_modification(&mut d, &operator(doc! { "$rename": { "a": "b" } }));
        assert!(matches!(err, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_pipeline_rejected() {
        let mut d = doc! { "a": 1 };
        let err = apply_modification(
            &mut d,
            &UpdateModification::Pipeline(vec![doc! { "$set": { "a": 2 } }]),
        );
        assert!(matches!(err, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_upsert_synthesis_from_equality_filter() {
        let filter = doc! { "id": "bsm-9", "depth": { "$gt": 1 }, "grade": { "$eq": "a" } };
        let synthesized =
            synthesize_upsert(&filter, &operator(doc! { "$set": { "name": "fresh" } })).unwrap();
        assert_eq!(
            synthesized,
            doc! { "id": "bsm-9", "grade": "a", "name": "fresh" }
        );
    }

    #[test]
    fn test_upsert_synthesis_replacement_form() {
        let filter = doc! { "id": "bsm-9" };
        let replacement = operator(doc! { "id": "bsm-10", "name": "fresh" });
        let synthesized = synthesize_upsert(&filter, &replacement).unwrap();
        assert_eq!(synthesized, doc! { "id": "bsm-10", "name": "fresh" });
    }
}
