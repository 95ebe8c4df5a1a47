//! Arena model for cacheable object graphs
//!
//! Objects and their cross-references are represented as identity-keyed
//! records inside an [`EntityGraph`], never as live pointers: a reference
//! field holds an [`EntityKey`] handle and is dereferenced through the
//! graph only when needed. This bounds every traversal by the set of
//! distinct keys, so cyclic graphs cannot recurse indefinitely.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use super::identity::{EntityKey, Identity, TypeTag};

/// One field value inside an entity record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    /// Link to another entity, by handle. The target record may or may not
    /// be present in the surrounding graph.
    Reference(EntityKey),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityKey> {
        match self {
            FieldValue::Reference(key) => Some(key),
            _ => None,
        }
    }

    /// Collect every reference handle held by this value, recursing into
    /// lists and maps.
    pub fn collect_references(&self, out: &mut Vec<EntityKey>) {
        match self {
            FieldValue::Reference(key) => out.push(key.clone()),
            FieldValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            FieldValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<EntityKey> for FieldValue {
    fn from(v: EntityKey) -> Self {
        FieldValue::Reference(v)
    }
}

/// Snapshot of one persistence-managed object: its type, its derived
/// identity (absent for objects that have not been assigned one yet), and
/// its non-identifier field values.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    type_tag: TypeTag,
    identity: Option<Identity>,
    fields: BTreeMap<String, FieldValue>,
    placeholder: bool,
}

impl EntityRecord {
    /// Create an empty record of the given type with no identity yet.
    pub fn new(type_tag: TypeTag) -> Self {
        Self {
            type_tag,
            identity: None,
            fields: BTreeMap::new(),
            placeholder: false,
        }
    }

    /// Create a record with an identity.
    pub fn with_identity(type_tag: TypeTag, identity: Identity) -> Self {
        Self {
            type_tag,
            identity: Some(identity),
            fields: BTreeMap::new(),
            placeholder: false,
        }
    }

    /// Minimal stand-in for an entity that could not be materialized:
    /// carries only the identity.
    pub fn placeholder(key: &EntityKey) -> Self {
        Self {
            type_tag: key.type_tag.clone(),
            identity: Some(key.identity.clone()),
            fields: BTreeMap::new(),
            placeholder: true,
        }
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// The object's derived identity, when one has been assigned.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Assign or overwrite the identity.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Handle for this record, when it has an identity.
    pub fn key(&self) -> Option<EntityKey> {
        self.identity
            .clone()
            .map(|identity| EntityKey::new(self.type_tag.clone(), identity))
    }

    /// True for identity-only stand-ins produced when a referenced entity
    /// could not be loaded.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Set a field value (builder form).
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field value in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
        self.placeholder = false;
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All non-identifier field values, keyed by field name.
    pub fn field_values(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Reference handles held by any field of this record.
    pub fn references(&self) -> Vec<EntityKey> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            value.collect_references(&mut out);
        }
        out
    }
}

/// Identity-keyed arena of entity records.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    entities: BTreeMap<EntityKey, EntityRecord>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, keyed by its identity. Returns `None` when the
    /// record has no identity yet; such records cannot be addressed and
    /// therefore cannot be cached.
    pub fn insert(&mut self, record: EntityRecord) -> Option<EntityKey> {
        let key = record.key()?;
        self.entities.insert(key.clone(), record);
        Some(key)
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityRecord> {
        self.entities.get(key)
    }

    pub fn entity_mut(&mut self, key: &EntityKey) -> Option<&mut EntityRecord> {
        self.entities.get_mut(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<EntityRecord> {
        self.entities.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Extract the subgraph reachable from `root` by following reference
    /// handles. Handles whose targets are absent from this graph are kept
    /// as dangling references in the copy. Terminates on cycles because
    /// each distinct key is visited once.
    pub fn subgraph(&self, root: &EntityKey) -> EntityGraph {
        let mut out = EntityGraph::new();
        let mut visited: BTreeSet<EntityKey> = BTreeSet::new();
        let mut queue: VecDeque<EntityKey> = VecDeque::new();
        queue.push_back(root.clone());

        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if let Some(record) = self.entities.get(&key) {
                for reference in record.references() {
                    if !visited.contains(&reference) {
                        queue.push_back(reference);
                    }
                }
                out.entities.insert(key, record.clone());
            }
        }
        out
    }

    /// Copy every record of `other` into this graph, replacing records
    /// that share a key.
    pub fn absorb(&mut self, other: EntityGraph) {
        self.entities.extend(other.entities);
    }
}
