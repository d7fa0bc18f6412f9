//! Entity records compared during conflict resolution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::queue::{EntityType, QueueItem};

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A local or server copy of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub entity_type: EntityType,
    pub modified_at: Option<DateTime<Utc>>,
    pub data: Value,
}

impl EntityRecord {
    /// Local version of the entity a queue item writes
    ///
    /// `modifiedAt` in the payload wins over the item's creation time.
    pub fn from_item(item: &QueueItem) -> Self {
        let modified_at = parse_timestamp(&item.payload, "modifiedAt").or(Some(item.created_at));
        Self {
            id: item.entity_id.clone(),
            entity_type: item.entity_type,
            modified_at,
            data: item.payload.clone(),
        }
    }

    /// Server copy returned with a conflict response
    pub fn from_server_value(entity_type: EntityType, value: Value) -> Self {
        let id = match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let modified_at = parse_timestamp(&value, "modifiedAt")
            .or_else(|| parse_timestamp(&value, "modified_at"))
            .or_else(|| parse_timestamp(&value, "updatedAt"));
        Self { id, entity_type, modified_at, data: value }
    }

    /// Report fields used by duplicate scoring
    pub fn report_fields(&self) -> ReportFields {
        ReportFields::from_value(&self.data)
    }
}

/// The parts of a report that duplicate scoring looks at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFields {
    pub category: Option<String>,
    pub location: Option<GeoPoint>,
    pub title: String,
    pub description: String,
}

impl ReportFields {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let coordinate = |key: &str| value.get(key).and_then(Value::as_f64);

        let location = match (coordinate("latitude"), coordinate("longitude")) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        };

        Self {
            category: text("category"),
            location,
            title: text("title").unwrap_or_default(),
            description: text("description").unwrap_or_default(),
        }
    }

    /// Lowercased, trimmed `title + description`
    pub fn normalized_text(&self) -> String {
        format!("{} {}", self.title.trim(), self.description.trim()).trim().to_lowercase()
    }
}

fn parse_timestamp(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::queue::Operation;

    #[test]
    fn reads_report_fields() {
        let fields = ReportFields::from_value(&json!({
            "category": "roads",
            "latitude": 51.5,
            "longitude": -0.12,
            "title": "  Pothole ",
            "description": "Deep hole on Main St"
        }));
        assert_eq!(fields.category.as_deref(), Some("roads"));
        assert_eq!(fields.location, Some(GeoPoint { latitude: 51.5, longitude: -0.12 }));
        assert_eq!(fields.normalized_text(), "pothole deep hole on main st");
    }

    #[test]
    fn missing_coordinates_mean_no_location() {
        let fields = ReportFields::from_value(&json!({ "latitude": 1.0 }));
        assert!(fields.location.is_none());
        assert_eq!(fields.normalized_text(), "");
    }

    #[test]
    fn local_record_uses_payload_timestamp() {
        let created = Utc::now();
        let item = QueueItem::new(
            EntityType::Report,
            Operation::Create,
            json!({ "localId": "r-1", "modifiedAt": "2024-03-01T10:00:00Z" }),
            created,
        );
        let record = EntityRecord::from_item(&item);
        assert_eq!(record.id, "r-1");
        assert_eq!(record.modified_at.map(|t| t.to_rfc3339()), Some("2024-03-01T10:00:00+00:00".into()));

        let bare = QueueItem::new(EntityType::Task, Operation::Update, json!({}), created);
        assert_eq!(EntityRecord::from_item(&bare).modified_at, Some(created));
    }

    #[test]
    fn server_record_accepts_numeric_ids() {
        let record = EntityRecord::from_server_value(
            EntityType::Report,
            json!({ "id": 42, "updatedAt": "2024-03-01T10:00:01Z" }),
        );
        assert_eq!(record.id, "42");
        assert!(record.modified_at.is_some());
    }
}
