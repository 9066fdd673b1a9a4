use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::db::SqlParam;
use crate::export::BLOB_KIND;

/// Convert a JSON field from a snapshot into a bindable parameter.
///
/// Tagged blobs decode back to bytes; other objects and arrays are stored
/// as their JSON text. A tagged blob with undecodable data is an error, and
/// so is an integer SQLite cannot hold without rounding.
pub fn json_to_param(value: &Value) -> Result<SqlParam, String> {
    Ok(match value {
        Value::Null => SqlParam::Null,
        Value::Bool(b) => SqlParam::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlParam::Integer(i)
            } else if n.is_u64() {
                return Err(format!("integer {n} does not fit a 64-bit signed column"));
            } else if let Some(f) = n.as_f64() {
                SqlParam::Real(f)
            } else {
                SqlParam::Text(n.to_string())
            }
        }
        Value::String(s) => SqlParam::Text(s.clone()),
        Value::Object(map) if map.get("kind").and_then(Value::as_str) == Some(BLOB_KIND) => {
            let data = map
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| "blob without string data".to_string())?;
            let bytes = BASE64
                .decode(data)
                .map_err(|err| format!("invalid base64 blob: {err}"))?;
            SqlParam::Blob(bytes)
        }
        other => SqlParam::Text(other.to_string()),
    })
}
