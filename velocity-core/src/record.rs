//! Warehouse rows and their normalized record shape

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One warehouse row keyed by column name, as returned by a [`crate::VelocitySource`].
pub type RawRow = Map<String, Value>;

pub const COL_ID: &str = "id";
pub const COL_PORTAL_ID: &str = "portal_id";
pub const COL_SYNCED: &str = "_fivetran_synced";
pub const COL_VELOCITY_TIER: &str = "property_velocity_tier";
pub const COL_ACTIVE_GPS: &str = "property_active_general_partners_gps";
pub const COL_MONTHS_FUNDRAISING: &str = "property_months_fundraising";
pub const COL_CAPITAL_RAISED: &str = "property_total_capital_raised_usd";

/// Projection requested from the company table, in select order.
pub const COLUMNS: [&str; 7] = [
    COL_ID,
    COL_PORTAL_ID,
    COL_SYNCED,
    COL_VELOCITY_TIER,
    COL_ACTIVE_GPS,
    COL_MONTHS_FUNDRAISING,
    COL_CAPITAL_RAISED,
];

/// A fund manager's company record.
///
/// Every field except `id` may be missing in the warehouse. Missing stays
/// `None`; a stored zero stays `Some(0.0)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityRecord {
    pub id: String,
    pub portal_id: Option<String>,
    pub synced_at: Option<String>,
    pub velocity_tier: Option<String>,
    #[serde(rename = "activeGPs")]
    pub active_gps: Option<f64>,
    pub months_fundraising: Option<f64>,
    #[serde(rename = "capitalRaisedUSD")]
    pub capital_raised_usd: Option<f64>,
}

impl VelocityRecord {
    /// Map a raw warehouse row by column name.
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            id: text_field(row, COL_ID).unwrap_or_default(),
            portal_id: text_field(row, COL_PORTAL_ID),
            synced_at: text_field(row, COL_SYNCED),
            velocity_tier: text_field(row, COL_VELOCITY_TIER),
            active_gps: numeric_field(row, COL_ACTIVE_GPS),
            months_fundraising: numeric_field(row, COL_MONTHS_FUNDRAISING),
            capital_raised_usd: numeric_field(row, COL_CAPITAL_RAISED),
        }
    }
}

/// Strip `{"value": ...}` wrappers some drivers put around typed values.
fn unwrap_value(value: &Value) -> &Value {
    match value {
        Value::Object(obj) => obj.get("value").map(unwrap_value).unwrap_or(value),
        other => other,
    }
}

fn text_field(row: &RawRow, column: &str) -> Option<String> {
    match unwrap_value(row.get(column)?) {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn numeric_field(row: &RawRow, column: &str) -> Option<f64> {
    match unwrap_value(row.get(column)?) {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                warn!(column, value = %s, "ignoring non-numeric warehouse value");
                None
            }
        },
        other => {
            warn!(column, value = %other, "ignoring non-numeric warehouse value");
            None
        }
    }
}
