//! Data model: items, seats, guests, and their wire representation.
//!
//! This module defines the three synchronized entity types, the `Entity`
//! trait that lets adapters handle them generically, and the conversion
//! between local entities and backend records.
//!
//! Local entities carry `last_update` (ms since epoch of the newest local or
//! applied server edit). Backend records carry the same fields with
//! `updated_at` in place of `last_update`; outbound payloads never include
//! `id` or `last_update`.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diff::Delta;
use crate::error::SyncError;
use crate::store::{Collection, EntityStore};

/// Local field holding the newest edit timestamp.
pub const LAST_UPDATE: &str = "last_update";
/// Wire field holding the server's edit timestamp.
pub const UPDATED_AT: &str = "updated_at";

// =============================================================================
// IDS AND KINDS
// =============================================================================

/// Entity identifier. Negative values are provisional (client-assigned),
/// positive values are confirmed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    #[must_use]
    pub fn is_provisional(self) -> bool {
        self.0 < 0
    }

    /// Parse a snapshot key back into an id.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse::<i64>().ok().map(Self)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The synchronized entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Item,
    Seat,
    Guest,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Item, EntityKind::Seat, EntityKind::Guest];

    /// REST collection name for this kind.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::Seat => "seats",
            Self::Guest => "guests",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Item => "item",
            Self::Seat => "seat",
            Self::Guest => "guest",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ENTITY TRAIT
// =============================================================================

/// Behavior shared by every synchronized entity type.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn last_update(&self) -> i64;
    fn set_last_update(&mut self, ms: i64);

    fn collection(store: &EntityStore) -> &Collection<Self>;
    fn collection_mut(store: &mut EntityStore) -> &mut Collection<Self>;

    /// Rewrite references to other entities in an outbound payload so no
    /// provisional id leaves the client.
    ///
    /// # Errors
    ///
    /// Returns `MissingMapping` when a referenced entity is not confirmed yet.
    fn translate_refs(_fields: &mut Map<String, Value>, _store: &EntityStore) -> Result<(), SyncError> {
        Ok(())
    }
}

// =============================================================================
// ITEM
// =============================================================================

/// Position, size and rotation of an item in plan coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Clockwise rotation in degrees around the bounding-box center.
    #[serde(default)]
    pub rotation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableShape {
    Round,
    Rect,
}

fn default_font_size() -> f64 {
    14.0
}

/// Kind-specific properties of an item, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemBody {
    /// A guest table with a fixed number of seats.
    Table {
        shape: TableShape,
        seats: u32,
        #[serde(default)]
        label: String,
    },
    /// A straight row of seats (ceremony, theatre layout).
    SeatRow {
        seats: u32,
        #[serde(default)]
        label: String,
    },
    /// A decorative icon (dance floor, stage, exit).
    Icon { icon: String },
    /// A free text label.
    Text {
        text: String,
        #[serde(default = "default_font_size")]
        font_size: f64,
    },
}

impl ItemBody {
    /// Number of seats this item offers; zero for non-seating kinds.
    #[must_use]
    pub fn seat_capacity(&self) -> u32 {
        match self {
            Self::Table { seats, .. } | Self::SeatRow { seats, .. } => *seats,
            Self::Icon { .. } | Self::Text { .. } => 0,
        }
    }
}

/// A visual element of the seating plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: EntityId,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(flatten)]
    pub body: ItemBody,
    #[serde(default)]
    pub last_update: i64,
}

impl Item {
    /// A new item without an id yet; the store assigns a provisional one.
    #[must_use]
    pub fn draft(geometry: Geometry, body: ItemBody) -> Self {
        Self { id: EntityId(0), geometry, body, last_update: 0 }
    }
}

impl Entity for Item {
    const KIND: EntityKind = EntityKind::Item;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn last_update(&self) -> i64 {
        self.last_update
    }

    fn set_last_update(&mut self, ms: i64) {
        self.last_update = ms;
    }

    fn collection(store: &EntityStore) -> &Collection<Self> {
        &store.items
    }

    fn collection_mut(store: &mut EntityStore) -> &mut Collection<Self> {
        &mut store.items
    }
}

// =============================================================================
// SEAT
// =============================================================================

/// Assignment of a guest (or nobody) to one seat of a table item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: EntityId,
    /// The table or seat-row item this seat belongs to.
    pub table_id: EntityId,
    pub seat_index: u32,
    #[serde(default)]
    pub guest_id: Option<EntityId>,
    #[serde(default)]
    pub last_update: i64,
}

impl Seat {
    #[must_use]
    pub fn draft(table_id: EntityId, seat_index: u32, guest_id: Option<EntityId>) -> Self {
        Self { id: EntityId(0), table_id, seat_index, guest_id, last_update: 0 }
    }
}

impl Entity for Seat {
    const KIND: EntityKind = EntityKind::Seat;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn last_update(&self) -> i64 {
        self.last_update
    }

    fn set_last_update(&mut self, ms: i64) {
        self.last_update = ms;
    }

    fn collection(store: &EntityStore) -> &Collection<Self> {
        &store.seats
    }

    fn collection_mut(store: &mut EntityStore) -> &mut Collection<Self> {
        &mut store.seats
    }

    fn translate_refs(fields: &mut Map<String, Value>, store: &EntityStore) -> Result<(), SyncError> {
        translate_ref(fields, "table_id", &store.items)?;
        translate_ref(fields, "guest_id", &store.guests)
    }
}

fn translate_ref<E: Entity>(
    fields: &mut Map<String, Value>,
    field: &str,
    target: &Collection<E>,
) -> Result<(), SyncError> {
    let Some(raw) = fields.get(field).and_then(Value::as_i64) else {
        return Ok(());
    };
    let id = EntityId(raw);
    if !id.is_provisional() {
        return Ok(());
    }
    let confirmed = target
        .ids()
        .get_by_provisional(id)
        .ok_or(SyncError::MissingMapping { kind: E::KIND, id })?;
    fields.insert(field.to_owned(), Value::from(confirmed.0));
    Ok(())
}

// =============================================================================
// GUEST
// =============================================================================

/// A person on the guest list. Only `note` is edited routinely by the client;
/// the other fields are owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub menu: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub last_update: i64,
}

impl Guest {
    #[must_use]
    pub fn draft(name: impl Into<String>) -> Self {
        Self { id: EntityId(0), name: name.into(), group: None, menu: None, note: String::new(), last_update: 0 }
    }
}

impl Entity for Guest {
    const KIND: EntityKind = EntityKind::Guest;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn last_update(&self) -> i64 {
        self.last_update
    }

    fn set_last_update(&mut self, ms: i64) {
        self.last_update = ms;
    }

    fn collection(store: &EntityStore) -> &Collection<Self> {
        &store.guests
    }

    fn collection_mut(store: &mut EntityStore) -> &mut Collection<Self> {
        &mut store.guests
    }
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

/// Outbound create payload: the entity without `id`/`last_update`, with
/// references translated to confirmed ids.
///
/// # Errors
///
/// Returns `Shape` if the entity does not serialize to an object, or
/// `MissingMapping` for an unconfirmed reference.
pub fn to_wire<E: Entity>(entity: &E, store: &EntityStore) -> Result<Map<String, Value>, SyncError> {
    let mut fields = match serde_json::to_value(entity).map_err(|source| SyncError::Shape { kind: E::KIND, source })? {
        Value::Object(map) => map,
        _ => {
            return Err(SyncError::Shape {
                kind: E::KIND,
                source: serde::ser::Error::custom("entity did not serialize to an object"),
            });
        }
    };
    strip_local_fields(&mut fields);
    E::translate_refs(&mut fields, store)?;
    Ok(fields)
}

/// Outbound update payload for a merged partial.
///
/// # Errors
///
/// Returns `MissingMapping` for an unconfirmed reference.
pub fn partial_to_wire<E: Entity>(partial: &Delta, store: &EntityStore) -> Result<Map<String, Value>, SyncError> {
    let mut fields = partial.to_json_map();
    strip_local_fields(&mut fields);
    E::translate_refs(&mut fields, store)?;
    Ok(fields)
}

fn strip_local_fields(fields: &mut Map<String, Value>) {
    fields.remove("id");
    fields.remove(LAST_UPDATE);
}

/// Build a local entity from a backend record.
///
/// # Errors
///
/// Returns `Shape` if the record does not fit the entity schema.
pub fn from_wire<E: Entity>(record: &Value) -> Result<E, SyncError> {
    let mut fields = record.as_object().cloned().unwrap_or_default();
    let updated_at = fields.remove(UPDATED_AT).unwrap_or(Value::from(0));
    fields.insert(LAST_UPDATE.to_owned(), updated_at);
    serde_json::from_value(Value::Object(fields)).map_err(|source| SyncError::Shape { kind: E::KIND, source })
}

/// The server id of a backend record, if it has one.
#[must_use]
pub fn record_id(record: &Value) -> Option<EntityId> {
    record.get("id").and_then(Value::as_i64).map(EntityId)
}

/// The server edit timestamp of a backend record; `0` when missing.
#[must_use]
pub fn record_updated_at(record: &Value) -> i64 {
    record.get(UPDATED_AT).and_then(Value::as_i64).unwrap_or(0)
}
