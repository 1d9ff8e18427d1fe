//! Native filter evaluation for in-memory document matching.
//!
//! This module evaluates the filter-document subset the gateway emits:
//! field-level equality, `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`/`$in`/`$nin`,
//! `$exists`, `$not`, the logical `$and`/`$or`/`$nor`, and dotted field
//! paths. Equality against an array field matches when any element matches
//! (the array-contains rule). Range operators never match across value
//! types. Operators outside the subset are rejected, not ignored.

use bson::{datetime::DateTime, oid::ObjectId, Bson, Document};
use std::{cmp::Ordering, collections::HashMap};

use docgate_core::error::{DocumentStoreError, DocumentStoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// This enum wraps BSON values and provides comparison operations for
/// filtering. It normalizes numeric types to f64 for easy comparison.
///
/// # Note
///
/// This is a private implementation detail used for filter evaluation.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Storage identity value
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => {
                Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>())
            }
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Whether `doc` satisfies `filter`. Top-level pairs combine with implicit
/// AND; an empty filter matches everything.
pub(crate) fn matches(doc: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let hit = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clause_list(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clause_list(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clause_list(key, condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "unsupported query operator '{other}'"
                )));
            }
            path => field_matches(doc, path, condition)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_list<'f>(key: &str, condition: &'f Bson) -> DocumentStoreResult<Vec<&'f Document>> {
    let Bson::Array(items) = condition else {
        return Err(DocumentStoreError::InvalidDocument(format!(
            "'{key}' requires an array of filter documents"
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "'{key}' requires an array of filter documents"
            ))),
        })
        .collect()
}

fn field_matches(doc: &Document, path: &str, condition: &Bson) -> DocumentStoreResult<bool> {
    let value = resolve_path(doc, path);
    match condition {
        Bson::Document(spec) if is_operator_spec(spec) => {
            for (op, operand) in spec {
                if !operator_matches(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        expected => Ok(equality_matches(value, expected)),
    }
}

pub(crate) fn is_operator_spec(spec: &Document) -> bool {
    !spec.is_empty() && spec.keys().all(|k| k.starts_with('$'))
}

fn operator_matches(value: Option<&Bson>, op: &str, operand: &Bson) -> DocumentStoreResult<bool> {
    match op {
        "$eq" => Ok(equality_matches(value, operand)),
        "$ne" => Ok(!equality_matches(value, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => Ok(range_matches(value, op, operand)),
        "$in" => {
            let candidates = operand_list(op, operand)?;
            Ok(candidates.iter().any(|candidate| equality_matches(value, candidate)))
        }
        "$nin" => {
            let candidates = operand_list(op, operand)?;
            Ok(!candidates.iter().any(|candidate| equality_matches(value, candidate)))
        }
        "$exists" => Ok(value.is_some() == truthy(operand)),
        "$not" => {
            let spec = match operand {
                Bson::Document(inner) if is_operator_spec(inner) => inner,
                _ => {
                    return Err(DocumentStoreError::InvalidDocument(
                        "'$not' requires an operator document".to_string(),
                    ));
                }
            };
            for (inner_op, inner_operand) in spec {
                if !operator_matches(value, inner_op, inner_operand)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "unsupported query operator '{other}'"
        ))),
    }
}

fn operand_list<'f>(op: &str, operand: &'f Bson) -> DocumentStoreResult<&'f Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::InvalidDocument(format!(
            "'{op}' requires an array operand"
        ))),
    }
}

/// Equality with the array-contains rule: a present value matches when it
/// equals the expectation or is an array containing an equal element. A
/// missing value matches only a `null` expectation.
fn equality_matches(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            if Comparable::from(actual) == Comparable::from(expected) {
                return true;
            }
            if let Bson::Array(items) = actual {
                return items
                    .iter()
                    .any(|item| Comparable::from(item) == Comparable::from(expected));
            }
            false
        }
    }
}

fn range_matches(value: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    let Some(actual) = value else { return false };
    match Comparable::from(actual).partial_cmp(&Comparable::from(operand)) {
        Some(ordering) => match op {
            "$gt" => ordering == Ordering::Greater,
            "$gte" => ordering == Ordering::Greater || ordering == Ordering::Equal,
            "$lt" => ordering == Ordering::Less,
            "$lte" => ordering == Ordering::Less || ordering == Ordering::Equal,
            _ => unreachable!(),
        },
        // Cross-type comparisons never match.
        None => false,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Resolves a dotted path by walking embedded documents. Array positions are
/// not addressable; a non-document intermediate ends the walk.
pub(crate) fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut cursor = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = cursor.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(inner) => cursor = inner,
            _ => return None,
        }
    }
    None
}
