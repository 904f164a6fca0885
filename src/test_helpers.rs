//! Shared fixtures: entity builders and an in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tokio::sync::Notify;

use crate::api::{ApiError, Backend};
use crate::clock::ManualClock;
use crate::model::{EntityId, EntityKind, Geometry, Item, ItemBody, Seat, TableShape};
use crate::store::{EntityStore, SharedStore};

// =============================================================================
// BUILDERS
// =============================================================================

pub fn table(x: f64, y: f64) -> Item {
    Item::draft(
        Geometry { x, y, width: 120.0, height: 120.0, rotation: 0.0 },
        ItemBody::Table { shape: TableShape::Round, seats: 8, label: String::new() },
    )
}

pub fn seat(table_id: EntityId, seat_index: u32) -> Seat {
    Seat::draft(table_id, seat_index, None)
}

/// Wire record of a round table as the backend would list it.
pub fn item_record(id: i64, x: f64, updated_at: i64) -> Value {
    json!({
        "id": id,
        "x": x,
        "y": 0.0,
        "width": 120.0,
        "height": 120.0,
        "rotation": 0.0,
        "kind": "table",
        "shape": "round",
        "seats": 8,
        "label": "",
        "updated_at": updated_at,
    })
}

pub fn guest_record(id: i64, name: &str, note: &str, updated_at: i64) -> Value {
    json!({"id": id, "name": name, "group": null, "menu": null, "note": note, "updated_at": updated_at})
}

pub fn test_store(start_ms: i64) -> (EntityStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    (EntityStore::new(clock.clone()), clock)
}

pub fn shared_store(start_ms: i64) -> (SharedStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    (SharedStore::new(clock.clone()), clock)
}

pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// =============================================================================
// MOCK BACKEND
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(EntityKind),
    Create(EntityKind, Map<String, Value>),
    Update(EntityKind, EntityId, Map<String, Value>),
    Delete(EntityKind, EntityId),
}

/// Holds create responses until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct MockState {
    records: HashMap<EntityKind, BTreeMap<i64, Value>>,
    next_id: i64,
    server_ms: i64,
    calls: Vec<Call>,
    failures: Vec<(EntityKind, Op, ApiError)>,
}

/// In-memory backend that stamps `updated_at` from a settable server clock.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    gate: Mutex<Option<Arc<Gate>>>,
    list_gate: Mutex<Option<Arc<Gate>>>,
}

impl MockBackend {
    pub fn new(first_id: i64) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().next_id = first_id;
        backend
    }

    pub fn set_server_ms(&self, ms: i64) {
        self.state.lock().unwrap().server_ms = ms;
    }

    pub fn seed(&self, kind: EntityKind, record: Value) {
        let id = record["id"].as_i64().unwrap();
        self.state
            .lock()
            .unwrap()
            .records
            .entry(kind)
            .or_default()
            .insert(id, record);
    }

    pub fn unseed(&self, kind: EntityKind, id: i64) {
        if let Some(records) = self.state.lock().unwrap().records.get_mut(&kind) {
            records.remove(&id);
        }
    }

    pub fn record(&self, kind: EntityKind, id: i64) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&kind)
            .and_then(|r| r.get(&id).cloned())
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.state.lock().unwrap().records.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_)))
            .collect()
    }

    /// Fail the next matching call with `error`.
    pub fn fail_next(&self, kind: EntityKind, op: Op, error: ApiError) {
        self.state.lock().unwrap().failures.push((kind, op, error));
    }

    /// Hold every create until `Gate::release` is notified.
    pub fn hold_creates(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn stop_holding(&self) {
        *self.gate.lock().unwrap() = None;
    }

    /// Like `hold_creates`, for list calls.
    pub fn hold_lists(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn begin(&self, kind: EntityKind, op: Op, call: Call) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|(k, o, _)| *k == kind && *o == op) {
            let (_, _, error) = state.failures.remove(pos);
            return Err(error);
        }
        Ok(())
    }
}

fn not_found(kind: EntityKind, id: EntityId) -> ApiError {
    ApiError::Http { status: Some(404), message: format!("{kind} {id} not found"), field_errors: None }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, ApiError> {
        self.begin(kind, Op::List, Call::List(kind))?;
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .get(&kind)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, fields: Map<String, Value>) -> Result<Value, ApiError> {
        self.begin(kind, Op::Create, Call::Create(kind, fields.clone()))?;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let mut record = fields;
        record.insert("id".into(), json!(id));
        record.insert("updated_at".into(), json!(state.server_ms));
        let record = Value::Object(record);
        state.records.entry(kind).or_default().insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, kind: EntityKind, id: EntityId, fields: Map<String, Value>) -> Result<Value, ApiError> {
        self.begin(kind, Op::Update, Call::Update(kind, id, fields.clone()))?;

        let mut state = self.state.lock().unwrap();
        let server_ms = state.server_ms;
        let record = state
            .records
            .get_mut(&kind)
            .and_then(|r| r.get_mut(&id.0))
            .ok_or_else(|| not_found(kind, id))?;
        if let Value::Object(existing) = record {
            existing.extend(fields);
            existing.insert("updated_at".into(), json!(server_ms));
        }
        Ok(record.clone())
    }

    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), ApiError> {
        self.begin(kind, Op::Delete, Call::Delete(kind, id))?;

        let mut state = self.state.lock().unwrap();
        state
            .records
            .get_mut(&kind)
            .and_then(|r| r.remove(&id.0))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, id))
    }
}
