//! Object Serializer
//!
//! Translates between the identity-keyed arena model and the JSON wire
//! document stored inside a sealed envelope.
//!
//! Encoding walks reference handles from the root record: the first visit of
//! a referenced record inlines it into the document, any re-encounter (a
//! cycle or a repeated reference) emits a reference stub instead, and a
//! handle whose record is absent from the graph emits a plain stub. The
//! visited set lives for exactly one encode call, so traversal is bounded by
//! the number of distinct keys in the graph.
//!
//! Decoding rebuilds records into the caller's graph. Stubs resolve against
//! records already decoded first, then through the persistence store port,
//! never back through the cache; a target that cannot be found anywhere
//! degrades to an identity-only placeholder rather than failing the decode.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::graph::{EntityGraph, EntityRecord, FieldValue};
use crate::domain::identity::{EntityKey, Identity, TypeTag};
use crate::domain::ports::EntityStore;
use crate::error::{Error, Result};

/// Keys currently being loaded somewhere in the calling chain. Threaded
/// through every internal load so a key never recurses into its own load.
pub type InFlight = HashSet<EntityKey>;

// =============================================================================
// Wire document
// =============================================================================

/// One entity inlined into the wire document.
#[derive(Debug, Serialize, Deserialize)]
struct WireEntity {
    #[serde(rename = "type")]
    type_tag: TypeTag,
    identity: Identity,
    fields: BTreeMap<String, WireValue>,
}

/// Reference stub: a handle to an entity that is not inlined at this
/// position. `circular` marks stubs emitted because the target was already
/// visited earlier in the same encode.
#[derive(Debug, Serialize, Deserialize)]
struct WireRef {
    #[serde(rename = "type")]
    type_tag: TypeTag,
    identity: Identity,
    #[serde(default)]
    circular: bool,
}

impl WireRef {
    fn key(&self) -> EntityKey {
        EntityKey::new(self.type_tag.clone(), self.identity.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    Entity(WireEntity),
    Ref(WireRef),
}

// =============================================================================
// Encode
// =============================================================================

/// Serialize the graph reachable from `root` into a wire document.
pub fn encode(graph: &EntityGraph, root: &EntityKey) -> Result<String> {
    let record = graph
        .entity(root)
        .ok_or_else(|| Error::Codec(format!("root record {root} missing from graph")))?;

    let mut visited: BTreeSet<EntityKey> = BTreeSet::new();
    visited.insert(root.clone());
    let document = encode_record(graph, root, record, &mut visited);
    Ok(serde_json::to_string(&document)?)
}

fn encode_record(
    graph: &EntityGraph,
    key: &EntityKey,
    record: &EntityRecord,
    visited: &mut BTreeSet<EntityKey>,
) -> WireEntity {
    let mut fields = BTreeMap::new();
    for (name, value) in record.field_values() {
        fields.insert(name.clone(), encode_value(graph, value, visited));
    }
    WireEntity {
        type_tag: key.type_tag.clone(),
        identity: key.identity.clone(),
        fields,
    }
}

fn encode_value(
    graph: &EntityGraph,
    value: &FieldValue,
    visited: &mut BTreeSet<EntityKey>,
) -> WireValue {
    match value {
        FieldValue::Null => WireValue::Null,
        FieldValue::Bool(v) => WireValue::Bool(*v),
        FieldValue::Int(v) => WireValue::Int(*v),
        FieldValue::Float(v) => WireValue::Float(*v),
        FieldValue::Text(v) => WireValue::Text(v.clone()),
        FieldValue::Timestamp(v) => WireValue::Timestamp(*v),
        FieldValue::List(items) => WireValue::List(
            items
                .iter()
                .map(|item| encode_value(graph, item, visited))
                .collect(),
        ),
        FieldValue::Map(entries) => WireValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(graph, v, visited)))
                .collect(),
        ),
        FieldValue::Reference(target) => {
            if visited.contains(target) {
                // Cycle or repeat: stub out instead of inlining again.
                WireValue::Ref(WireRef {
                    type_tag: target.type_tag.clone(),
                    identity: target.identity.clone(),
                    circular: true,
                })
            } else if let Some(record) = graph.entity(target) {
                visited.insert(target.clone());
                WireValue::Entity(encode_record(graph, target, record, visited))
            } else {
                // Handle to a record outside the graph.
                WireValue::Ref(WireRef {
                    type_tag: target.type_tag.clone(),
                    identity: target.identity.clone(),
                    circular: false,
                })
            }
        }
    }
}

// =============================================================================
// Decode
// =============================================================================

/// Rebuild a wire document into `graph`, returning the root's key.
///
/// The root's type must match `expected_type`; a mismatch means the entry
/// was stored under the wrong key and is treated as corruption by callers.
/// Unresolvable reference stubs degrade to placeholder records; they never
/// fail the decode.
pub async fn decode(
    payload: &str,
    expected_type: &TypeTag,
    graph: &mut EntityGraph,
    entities: &dyn EntityStore,
    in_flight: &mut InFlight,
) -> Result<EntityKey> {
    let document: WireEntity = serde_json::from_str(payload)
        .map_err(|e| Error::Codec(format!("unparsable wire document: {e}")))?;
    if document.type_tag != *expected_type {
        return Err(Error::Codec(format!(
            "wire document type '{}' does not match requested '{}'",
            document.type_tag, expected_type
        )));
    }

    // Phase one is pure: materialize every inlined record into the graph and
    // collect the stubs that still need a target.
    let mut pending: Vec<WireRef> = Vec::new();
    let root = materialize_entity(document, graph, in_flight, &mut pending);

    // Phase two resolves stubs, graph first, then the store.
    for stub in pending {
        resolve_stub(stub, graph, entities, in_flight).await;
    }
    Ok(root)
}

/// Insert the document's records into the graph, depth first. Returns the
/// root key. Stubs are recorded in `pending` for the resolution phase.
fn materialize_entity(
    document: WireEntity,
    graph: &mut EntityGraph,
    in_flight: &mut InFlight,
    pending: &mut Vec<WireRef>,
) -> EntityKey {
    let key = EntityKey::new(document.type_tag, document.identity);
    // Guard this key while its fields materialize; a self-referential stub
    // must not trigger a store load for it.
    let newly_guarded = in_flight.insert(key.clone());

    let mut record = EntityRecord::with_identity(key.type_tag.clone(), key.identity.clone());
    for (name, value) in document.fields {
        let decoded = materialize_value(value, graph, in_flight, pending);
        record.set_field(name, decoded);
    }
    graph.insert(record);

    if newly_guarded {
        in_flight.remove(&key);
    }
    key
}

fn materialize_value(
    value: WireValue,
    graph: &mut EntityGraph,
    in_flight: &mut InFlight,
    pending: &mut Vec<WireRef>,
) -> FieldValue {
    match value {
        WireValue::Null => FieldValue::Null,
        WireValue::Bool(v) => FieldValue::Bool(v),
        WireValue::Int(v) => FieldValue::Int(v),
        WireValue::Float(v) => FieldValue::Float(v),
        WireValue::Text(v) => FieldValue::Text(v),
        WireValue::Timestamp(v) => FieldValue::Timestamp(v),
        WireValue::List(items) => FieldValue::List(
            items
                .into_iter()
                .map(|item| materialize_value(item, graph, in_flight, pending))
                .collect(),
        ),
        WireValue::Map(entries) => FieldValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, materialize_value(v, graph, in_flight, pending)))
                .collect(),
        ),
        WireValue::Entity(inner) => {
            let key = materialize_entity(inner, graph, in_flight, pending);
            FieldValue::Reference(key)
        }
        WireValue::Ref(stub) => {
            let reference = FieldValue::Reference(stub.key());
            pending.push(stub);
            reference
        }
    }
}

/// Make sure a stub's target exists in the graph, degrading to a placeholder
/// when it cannot be found anywhere.
async fn resolve_stub(
    stub: WireRef,
    graph: &mut EntityGraph,
    entities: &dyn EntityStore,
    in_flight: &mut InFlight,
) {
    let key = stub.key();
    if graph.contains(&key) {
        return;
    }
    if in_flight.contains(&key) {
        // An outer load of this key is in progress; it will supply the real
        // record. Leave a placeholder so the handle dereferences meanwhile.
        graph.insert(EntityRecord::placeholder(&key));
        return;
    }
    if stub.circular {
        // A circular stub's target was inlined elsewhere in the document, so
        // reaching this point means the document is inconsistent. Degrade
        // without consulting the store.
        debug!(key = %key, "circular stub without an inlined target, inserting placeholder");
        graph.insert(EntityRecord::placeholder(&key));
        return;
    }

    in_flight.insert(key.clone());
    let loaded = entities.load_by_identity(&key.type_tag, &key.identity).await;
    in_flight.remove(&key);

    match loaded {
        Ok(Some(record)) => {
            graph.insert(record);
        }
        Ok(None) => {
            graph.insert(EntityRecord::placeholder(&key));
        }
        Err(e) => {
            debug!(key = %key, error = %e, "store lookup for reference stub failed, inserting placeholder");
            graph.insert(EntityRecord::placeholder(&key));
        }
    }
}
