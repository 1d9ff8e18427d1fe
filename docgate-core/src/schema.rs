//! Compiled schema description and the derived lookups the gateway works from.
//!
//! The gateway does not compile a schema language. It consumes an
//! already-compiled description: the root aggregate class, which collections
//! exist and which classes each may hold, and per-class field definitions
//! including inheritance and reference ranges. [`SchemaView`] wraps the raw
//! description with everything derived from it (effective inherited field
//! maps, the subclass closure, the class-to-collections mapping, and
//! concrete-class resolution for individual documents), computed once at
//! construction and immutable afterwards.
//!
//! The description deserializes from JSON:
//!
//! ```ignore
//! {
//!   "name": "Database",
//!   "prefix": "nmdc",
//!   "collections": { "biosample_set": ["Biosample"] },
//!   "classes": {
//!     "Biosample": {
//!       "fields": {
//!         "id": { "type": "string", "required": true, "identifier": true },
//!         "associated_studies": {
//!           "type": "reference", "range": "Study",
//!           "multivalued": true, "required": true
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Reserved key on a whole-database object naming its aggregate type.
/// Accepted (and ignored) during validation when its value matches the root
/// class name; never a collection.
pub const TYPE_DISCRIMINATOR_KEY: &str = "@type";

/// Field on individual documents carrying their concrete class name,
/// optionally prefixed (`"nmdc:Biosample"`).
pub const CLASS_FIELD: &str = "type";

/// Primitive or reference kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    /// Holds the `id` of another document; `range` names the target class.
    Reference,
}

impl FieldKind {
    fn expects(&self, value: &Bson) -> bool {
        match self {
            FieldKind::String => matches!(value, Bson::String(_)),
            FieldKind::Integer => matches!(value, Bson::Int32(_) | Bson::Int64(_)),
            FieldKind::Float => {
                matches!(value, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_))
            }
            FieldKind::Boolean => matches!(value, Bson::Boolean(_)),
            FieldKind::Object => matches!(value, Bson::Document(_)),
            FieldKind::Reference => matches!(value, Bson::String(_)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Reference => "reference",
        }
    }
}

/// Definition of one field of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// The document must carry this field.
    #[serde(default)]
    pub required: bool,
    /// The value is a list of the declared kind rather than a single value.
    #[serde(default)]
    pub multivalued: bool,
    /// Target class for reference fields.
    #[serde(default)]
    pub range: Option<String>,
    /// Marks the field whose value is unique within a collection.
    #[serde(default)]
    pub identifier: bool,
}

/// Definition of one document class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Parent class this one inherits fields from.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
}

/// The raw compiled schema description, as deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    /// Root aggregate class name (the whole-database object's class).
    pub name: String,
    /// Optional id/type prefix, e.g. `nmdc` in `nmdc:Biosample`.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Collection name to the class names it may hold.
    pub collections: BTreeMap<String, Vec<String>>,
    /// Class name to definition.
    pub classes: BTreeMap<String, ClassDef>,
}

/// Immutable, validated view over a [`SchemaDescription`] with all derived
/// lookups pre-computed.
///
/// Built once at startup and shared by reference (`Arc`); nothing here
/// mutates after construction. Rebuilding is only triggered by an explicit
/// schema-description reload.
#[derive(Debug)]
pub struct SchemaView {
    description: SchemaDescription,
    /// Class name to its fields including everything inherited from
    /// ancestors; own definitions override.
    effective_fields: BTreeMap<String, BTreeMap<String, FieldDef>>,
    /// Class name to itself plus every descendant.
    subclasses: BTreeMap<String, BTreeSet<String>>,
    /// Class name to the collections permitted to hold its instances
    /// (directly or through an allowed ancestor).
    collections_by_class: BTreeMap<String, BTreeSet<String>>,
    /// Concrete classes acceptable per collection: the allowed classes plus
    /// their descendants.
    concrete_by_collection: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaView {
    /// Validates a description and derives the lookup tables.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Initialization`] when the description is
    /// inconsistent: a collection allowing an undefined class, a parent that
    /// does not exist, a parent cycle, or a reference field without a valid
    /// range class.
    pub fn new(description: SchemaDescription) -> DocumentStoreResult<Self> {
        for (class_name, class) in &description.classes {
            if let Some(parent) = &class.parent {
                if !description.classes.contains_key(parent) {
                    return Err(DocumentStoreError::Initialization(format!(
                        "class '{class_name}' names undefined parent '{parent}'"
                    )));
                }
            }
            for (field_name, field) in &class.fields {
                if field.kind == FieldKind::Reference {
                    match &field.range {
                        Some(range) if description.classes.contains_key(range) => {}
                        Some(range) => {
                            return Err(DocumentStoreError::Initialization(format!(
                                "reference field '{class_name}.{field_name}' names undefined range '{range}'"
                            )));
                        }
                        None => {
                            return Err(DocumentStoreError::Initialization(format!(
                                "reference field '{class_name}.{field_name}' declares no range"
                            )));
                        }
                    }
                }
            }
        }
        for (collection, allowed) in &description.collections {
            for class_name in allowed {
                if !description.classes.contains_key(class_name) {
                    return Err(DocumentStoreError::Initialization(format!(
                        "collection '{collection}' allows undefined class '{class_name}'"
                    )));
                }
            }
        }

        let effective_fields = resolve_effective_fields(&description)?;
        let subclasses = resolve_subclass_closure(&description);

        let mut concrete_by_collection: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut collections_by_class: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (collection, allowed) in &description.collections {
            let mut concrete = BTreeSet::new();
            for class_name in allowed {
                if let Some(closure) = subclasses.get(class_name) {
                    concrete.extend(closure.iter().cloned());
                }
            }
            for class_name in &concrete {
                collections_by_class
                    .entry(class_name.clone())
                    .or_default()
                    .insert(collection.clone());
            }
            concrete_by_collection.insert(collection.clone(), concrete);
        }

        Ok(SchemaView {
            description,
            effective_fields,
            subclasses,
            collections_by_class,
            concrete_by_collection,
        })
    }

    /// Deserializes a description from a JSON value and builds the view.
    pub fn from_json(value: serde_json::Value) -> DocumentStoreResult<Self> {
        let description: SchemaDescription = serde_json::from_value(value)?;
        Self::new(description)
    }

    /// The root aggregate class name.
    pub fn root_class_name(&self) -> &str {
        &self.description.name
    }

    /// Whether `value` names the root aggregate class, bare or prefixed.
    pub fn is_root_type_name(&self, value: &str) -> bool {
        self.strip_prefix(value) == self.description.name
    }

    /// Strips the schema prefix (`nmdc:`) from a class or type name if present.
    pub fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        match &self.description.prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(name),
            None => name,
        }
    }

    /// Names of all governed collections.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.description.collections.keys().map(String::as_str)
    }

    /// Whether a collection is governed by the schema.
    pub fn contains_collection(&self, name: &str) -> bool {
        self.description.collections.contains_key(name)
    }

    /// Governed collections whose documents carry a schema identifier field
    /// and therefore enforce `id` uniqueness.
    pub fn collections_with_identifier(&self) -> Vec<String> {
        self.description
            .collections
            .iter()
            .filter(|(_, allowed)| {
                allowed.iter().any(|class_name| {
                    self.effective_fields
                        .get(class_name)
                        .is_some_and(|fields| fields.values().any(|f| f.identifier))
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of all defined classes.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.description.classes.keys().map(String::as_str)
    }

    /// The class definition for `name`, if defined.
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.description.classes.get(name)
    }

    /// A class's fields including inherited ones.
    pub fn effective_fields(&self, class_name: &str) -> Option<&BTreeMap<String, FieldDef>> {
        self.effective_fields.get(class_name)
    }

    /// A class plus all of its descendants.
    pub fn subclass_closure(&self, class_name: &str) -> Option<&BTreeSet<String>> {
        self.subclasses.get(class_name)
    }

    /// The collections permitted to hold instances of a class.
    pub fn collections_for_class(&self, class_name: &str) -> Option<&BTreeSet<String>> {
        self.collections_by_class.get(class_name)
    }

    /// Resolves the concrete class of a document in a collection.
    ///
    /// Uses the document's `type` field (prefix stripped) when present; falls
    /// back to the collection's single acceptable class when there is exactly
    /// one. The error is a validation message, not a store failure.
    pub fn concrete_class_of<'a>(
        &'a self,
        collection: &str,
        doc: &'a Document,
    ) -> Result<&'a str, String> {
        let Some(acceptable) = self.concrete_by_collection.get(collection) else {
            return Err(format!("'{collection}' is not a known schema collection"));
        };
        match doc.get(CLASS_FIELD) {
            Some(Bson::String(declared)) => {
                let class_name = self.strip_prefix(declared);
                if acceptable.contains(class_name) {
                    Ok(class_name)
                } else {
                    Err(format!(
                        "class '{class_name}' is not allowed in collection '{collection}'"
                    ))
                }
            }
            Some(other) => Err(format!(
                "'{CLASS_FIELD}' must be a string naming the document class, got {}",
                bson_type_name(other)
            )),
            None if acceptable.len() == 1 => {
                // Unambiguous without a discriminator.
                Ok(acceptable.iter().next().map(String::as_str).unwrap_or_default())
            }
            None => Err(format!(
                "cannot determine document class: '{CLASS_FIELD}' is missing and \
                 collection '{collection}' allows {} classes",
                acceptable.len()
            )),
        }
    }

    /// Checks one document's shape against its class definition.
    ///
    /// Returns one message per problem: unresolvable class, unknown fields,
    /// missing required fields, arity mismatches, and kind mismatches.
    /// An empty vector means the document is shape-valid.
    pub fn shape_errors(&self, collection: &str, doc: &Document) -> Vec<String> {
        let class_name = match self.concrete_class_of(collection, doc) {
            Ok(name) => name,
            Err(message) => return vec![message],
        };
        let Some(fields) = self.effective_fields.get(class_name) else {
            return vec![format!("class '{class_name}' has no definition")];
        };

        let mut errors = Vec::new();
        for (key, value) in doc {
            if key == CLASS_FIELD && !fields.contains_key(CLASS_FIELD) {
                continue;
            }
            let Some(field) = fields.get(key) else {
                errors.push(format!("'{key}' is not a field of class '{class_name}'"));
                continue;
            };
            check_field_value(class_name, key, field, value, &mut errors);
        }
        for (key, field) in fields {
            if field.required && !doc.contains_key(key) {
                errors.push(format!("'{key}' is a required field of class '{class_name}'"));
            }
        }
        errors
    }

    /// Final defense-in-depth pass: checks a complete candidate set as one
    /// instance of the root aggregate class.
    ///
    /// Every key must be a governed collection (or the reserved `@type`
    /// discriminator naming the root class), every value an array, and every
    /// element must shape-check. Returns one message per problem.
    pub fn aggregate_errors(&self, database: &Document) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, value) in database {
            if key == TYPE_DISCRIMINATOR_KEY {
                match value {
                    Bson::String(name) if self.is_root_type_name(name) => {}
                    other => errors.push(format!(
                        "'{TYPE_DISCRIMINATOR_KEY}' must name the root class '{}', got {}",
                        self.description.name,
                        summarize_bson(other)
                    )),
                }
                continue;
            }
            if !self.contains_collection(key) {
                errors.push(format!(
                    "'{key}' is not a slot of the root class '{}'",
                    self.description.name
                ));
                continue;
            }
            let Bson::Array(entries) = value else {
                errors.push(format!("'{key}' must be an array of documents"));
                continue;
            };
            for (position, entry) in entries.iter().enumerate() {
                let Bson::Document(doc) = entry else {
                    errors.push(format!("{key}[{position}] is not a document"));
                    continue;
                };
                for message in self.shape_errors(key, doc) {
                    errors.push(format!("{key}[{position}]: {message}"));
                }
            }
        }
        errors
    }
}

fn check_field_value(
    class_name: &str,
    key: &str,
    field: &FieldDef,
    value: &Bson,
    errors: &mut Vec<String>,
) {
    if matches!(value, Bson::Null) {
        errors.push(format!("'{key}' of class '{class_name}' must not be null"));
        return;
    }
    if field.multivalued {
        let Bson::Array(items) = value else {
            errors.push(format!(
                "'{key}' of class '{class_name}' is multivalued and must be an array"
            ));
            return;
        };
        for (position, item) in items.iter().enumerate() {
            if !field.kind.expects(item) {
                errors.push(format!(
                    "'{key}[{position}]' of class '{class_name}': expected {}, got {}",
                    field.kind.name(),
                    bson_type_name(item)
                ));
            }
        }
    } else if !field.kind.expects(value) {
        errors.push(format!(
            "'{key}' of class '{class_name}': expected {}, got {}",
            field.kind.name(),
            bson_type_name(value)
        ));
    }
}

fn resolve_effective_fields(
    description: &SchemaDescription,
) -> DocumentStoreResult<BTreeMap<String, BTreeMap<String, FieldDef>>> {
    let mut resolved = BTreeMap::new();
    for class_name in description.classes.keys() {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut cursor = Some(class_name.as_str());
        while let Some(name) = cursor {
            if !visited.insert(name.to_string()) {
                return Err(DocumentStoreError::Initialization(format!(
                    "parent cycle detected at class '{name}'"
                )));
            }
            let class = &description.classes[name];
            chain.push(class);
            cursor = class.parent.as_deref();
        }
        // Ancestors first so that child definitions override.
        let mut fields = BTreeMap::new();
        for class in chain.iter().rev() {
            for (field_name, field) in &class.fields {
                fields.insert(field_name.clone(), field.clone());
            }
        }
        resolved.insert(class_name.clone(), fields);
    }
    Ok(resolved)
}

fn resolve_subclass_closure(description: &SchemaDescription) -> BTreeMap<String, BTreeSet<String>> {
    let mut closure: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for class_name in description.classes.keys() {
        closure
            .entry(class_name.clone())
            .or_default()
            .insert(class_name.clone());
        // Walk up once here; lookups never walk at query time.
        let mut cursor = description.classes[class_name].parent.as_deref();
        while let Some(ancestor) = cursor {
            closure
                .entry(ancestor.to_string())
                .or_default()
                .insert(class_name.clone());
            cursor = description
                .classes
                .get(ancestor)
                .and_then(|class| class.parent.as_deref());
        }
    }
    closure
}

pub(crate) fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "boolean",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::DateTime(_) => "datetime",
        Bson::ObjectId(_) => "objectid",
        _ => "other",
    }
}

fn summarize_bson(value: &Bson) -> String {
    match value {
        Bson::String(s) => format!("'{s}'"),
        other => bson_type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    fn sample_schema() -> SchemaView {
        SchemaView::from_json(json!({
            "name": "Database",
            "prefix": "nmdc",
            "collections": {
                "biosample_set": ["Biosample"],
                "study_set": ["Study"],
                "data_object_set": ["DataObject"]
            },
            "classes": {
                "NamedThing": {
                    "fields": {
                        "id": {"type": "string", "required": true, "identifier": true},
                        "name": {"type": "string"},
                        "type": {"type": "string"}
                    }
                },
                "Study": {"parent": "NamedThing", "fields": {}},
                "Biosample": {
                    "parent": "NamedThing",
                    "fields": {
                        "associated_studies": {
                            "type": "reference", "range": "Study",
                            "multivalued": true, "required": true
                        },
                        "depth": {"type": "float"}
                    }
                },
                "DataObject": {
                    "parent": "NamedThing",
                    "fields": {
                        "was_generated_by": {"type": "reference", "range": "NamedThing"}
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_effective_fields_include_inherited() {
        let schema = sample_schema();
        let fields = schema.effective_fields("Biosample").unwrap();
        assert!(fields.contains_key("id"));
        assert!(fields.contains_key("associated_studies"));
        assert!(fields["id"].identifier);
    }

    #[test]
    fn test_subclass_closure_contains_descendants() {
        let schema = sample_schema();
        let closure = schema.subclass_closure("NamedThing").unwrap();
        assert!(closure.contains("NamedThing"));
        assert!(closure.contains("Biosample"));
        assert!(closure.contains("Study"));
    }

    #[test]
    fn test_collections_for_class_covers_subclass_ranges() {
        let schema = sample_schema();
        // NamedThing instances can live anywhere a subclass is allowed.
        let collections = schema.collections_for_class("Study").unwrap();
        assert!(collections.contains("study_set"));
        assert!(!collections.contains("biosample_set"));
    }

    #[test]
    fn test_concrete_class_via_discriminator_with_prefix() {
        let schema = sample_schema();
        let doc = doc! { "id": "x", "type": "nmdc:Biosample" };
        assert_eq!(schema.concrete_class_of("biosample_set", &doc).unwrap(), "Biosample");
    }

    #[test]
    fn test_concrete_class_falls_back_to_single_allowed() {
        let schema = sample_schema();
        let doc = doc! { "id": "x" };
        assert_eq!(schema.concrete_class_of("study_set", &doc).unwrap(), "Study");
    }

    #[test]
    fn test_concrete_class_rejects_foreign_class() {
        let schema = sample_schema();
        let doc = doc! { "id": "x", "type": "nmdc:Study" };
        let err = schema.concrete_class_of("biosample_set", &doc).unwrap_err();
        assert!(err.contains("not allowed"), "unexpected message: {err}");
    }

    #[test]
    fn test_shape_valid_document_has_no_errors() {
        let schema = sample_schema();
        let doc = doc! {
            "id": "nmdc:bsm-11-abc123",
            "type": "nmdc:Biosample",
            "name": "soil core",
            "associated_studies": ["nmdc:sty-11-34xj1150"],
            "depth": 1.5
        };
        assert!(schema.shape_errors("biosample_set", &doc).is_empty());
    }

    #[test]
    fn test_shape_errors_for_missing_required_and_unknown_field() {
        let schema = sample_schema();
        let doc = doc! { "id": "x", "type": "nmdc:Biosample", "favorite_color": "green" };
        let errors = schema.shape_errors("biosample_set", &doc);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("favorite_color")));
        assert!(errors.iter().any(|e| e.contains("associated_studies")));
    }

    #[test]
    fn test_shape_errors_for_arity_and_kind() {
        let schema = sample_schema();
        let doc = doc! {
            "id": "x",
            "type": "nmdc:Biosample",
            "associated_studies": "nmdc:sty-11-34xj1150",
            "depth": "very deep"
        };
        let errors = schema.shape_errors("biosample_set", &doc);
        assert!(errors.iter().any(|e| e.contains("must be an array")));
        assert!(errors.iter().any(|e| e.contains("expected float")));
    }

    #[test]
    fn test_root_type_name_accepts_bare_and_prefixed() {
        let schema = sample_schema();
        assert!(schema.is_root_type_name("Database"));
        assert!(schema.is_root_type_name("nmdc:Database"));
        assert!(!schema.is_root_type_name("Biosample"));
    }

    #[test]
    fn test_aggregate_errors_flag_unknown_slot() {
        let schema = sample_schema();
        let database = doc! {
            "@type": "nmdc:Database",
            "not_a_collection": [{ "id": "x" }]
        };
        let errors = schema.aggregate_errors(&database);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not_a_collection"));
    }

    #[test]
    fn test_aggregate_errors_empty_for_valid_set() {
        let schema = sample_schema();
        let database = doc! {
            "@type": "Database",
            "study_set": [{ "id": "nmdc:sty-11-34xj1150", "type": "nmdc:Study" }]
        };
        assert!(schema.aggregate_errors(&database).is_empty());
    }

    #[test]
    fn test_collections_with_identifier() {
        let schema = sample_schema();
        let collections = schema.collections_with_identifier();
        assert!(collections.contains(&"biosample_set".to_string()));
        assert!(collections.contains(&"study_set".to_string()));
    }

    #[test]
    fn test_new_rejects_undefined_range() {
        let result = SchemaView::from_json(json!({
            "name": "Database",
            "collections": {"widget_set": ["Widget"]},
            "classes": {
                "Widget": {
                    "fields": {
                        "part": {"type": "reference", "range": "Gadget"}
                    }
                }
            }
        }));
        assert!(matches!(result, Err(DocumentStoreError::Initialization(_))));
    }
}
