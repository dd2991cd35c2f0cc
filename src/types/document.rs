//! Backend documents and the typed entities decoded from them.
//!
//! Backends hand over loosely-typed [`Document`]s. The subscription manager
//! decodes every row through [`Entity::decode`] before a binding ever sees it,
//! so pages work with validated structs (or the tagged [`Record`]) instead of
//! untyped maps.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, SyncError};

/// A raw row as stored by the backend: an id plus a JSON field map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new<S: Into<String>>(id: S, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON object literal; non-objects yield no fields.
    pub fn from_json<S: Into<String>>(id: S, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A typed row decoded (and validated) at the subscription boundary.
pub trait Entity: Clone + 'static {
    /// Decode one document read from `collection`.
    fn decode(collection: &str, doc: &Document) -> Result<Self>;
}

impl Entity for Document {
    fn decode(_collection: &str, doc: &Document) -> Result<Self> {
        Ok(doc.clone())
    }
}

fn decode_fields<T: DeserializeOwned>(collection: &str, doc: &Document) -> Result<T> {
    let mut fields = doc.fields.clone();
    fields.insert("id".to_string(), Value::String(doc.id.clone()));
    serde_json::from_value(Value::Object(fields)).map_err(|err| invalid(collection, doc, err))
}

fn invalid(collection: &str, doc: &Document, reason: impl ToString) -> SyncError {
    SyncError::InvalidDocument {
        collection: collection.to_string(),
        id: doc.id.clone(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

/// Scheduled field work shown in task lists and calendars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub plot: Option<String>,
}

impl Task {
    pub const COLLECTION: &'static str = "tasks";
}

impl Entity for Task {
    fn decode(collection: &str, doc: &Document) -> Result<Self> {
        let task: Self = decode_fields(collection, doc)?;
        if task.title.trim().is_empty() {
            return Err(invalid(collection, doc, "title must not be empty"));
        }
        Ok(task)
    }
}

/// A field sensor or controller reporting into the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub battery_pct: Option<f64>,
}

impl Device {
    pub const COLLECTION: &'static str = "devices";
}

impl Entity for Device {
    fn decode(collection: &str, doc: &Document) -> Result<Self> {
        let device: Self = decode_fields(collection, doc)?;
        if let Some(battery) = device.battery_pct {
            if !(0.0..=100.0).contains(&battery) {
                return Err(invalid(
                    collection,
                    doc,
                    format!("battery_pct {battery} outside 0..=100"),
                ));
            }
        }
        Ok(device)
    }
}

/// One weather station observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherSample {
    pub id: String,
    pub station: String,
    pub recorded_at: DateTime<Utc>,
    pub temperature_c: f64,
    #[serde(default)]
    pub humidity_pct: Option<f64>,
    #[serde(default)]
    pub rainfall_mm: Option<f64>,
}

impl WeatherSample {
    pub const COLLECTION: &'static str = "weather";
}

impl Entity for WeatherSample {
    fn decode(collection: &str, doc: &Document) -> Result<Self> {
        let sample: Self = decode_fields(collection, doc)?;
        if let Some(humidity) = sample.humidity_pct {
            if !(0.0..=100.0).contains(&humidity) {
                return Err(invalid(
                    collection,
                    doc,
                    format!("humidity_pct {humidity} outside 0..=100"),
                ));
            }
        }
        if sample.rainfall_mm.is_some_and(|mm| mm < 0.0) {
            return Err(invalid(collection, doc, "rainfall_mm must be non-negative"));
        }
        Ok(sample)
    }
}

/// Tagged variant over every known entity schema, chosen by collection name.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Task(Task),
    Device(Device),
    WeatherSample(WeatherSample),
    /// Rows from collections without a registered schema.
    Other(Document),
}

impl Record {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Task(task) => &task.id,
            Self::Device(device) => &device.id,
            Self::WeatherSample(sample) => &sample.id,
            Self::Other(doc) => &doc.id,
        }
    }
}

impl Entity for Record {
    fn decode(collection: &str, doc: &Document) -> Result<Self> {
        Ok(match collection {
            Task::COLLECTION => Self::Task(Task::decode(collection, doc)?),
            Device::COLLECTION => Self::Device(Device::decode(collection, doc)?),
            WeatherSample::COLLECTION => {
                Self::WeatherSample(WeatherSample::decode(collection, doc)?)
            }
            _ => Self::Other(doc.clone()),
        })
    }
}
