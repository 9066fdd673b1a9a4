use std::collections::BTreeMap;

use serde_json::Value;

use crate::export::Row;
use crate::schema::META_KEY;
use crate::{AppError, AppResult};

/// An uploaded snapshot, validated for shape but not against any schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPayload {
    meta: Option<Value>,
    tables: BTreeMap<String, Vec<Row>>,
}

fn shape_error(message: impl Into<String>) -> AppError {
    AppError::validation("PAYLOAD", message)
}

impl ImportPayload {
    /// Accept `{ "<table>": [ {row}, ... ], "meta": {...} }`.
    pub fn from_value(value: Value) -> AppResult<Self> {
        let Value::Object(entries) = value else {
            return Err(shape_error("import body must be a JSON object keyed by table name"));
        };

        let mut payload = ImportPayload::default();
        for (key, entry) in entries {
            if key == META_KEY {
                payload.meta = Some(entry);
                continue;
            }
            let Value::Array(items) = entry else {
                return Err(shape_error(format!("entry {key:?} must be an array of rows"))
                    .with_context("table", key));
            };
            let mut rows = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(row) => rows.push(row),
                    _ => {
                        return Err(shape_error(format!("row {index} of {key:?} is not an object"))
                            .with_context("table", key)
                            .with_context("row", index.to_string()))
                    }
                }
            }
            payload.tables.insert(key, rows);
        }
        Ok(payload)
    }

    pub fn from_slice(bytes: &[u8]) -> AppResult<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|err| {
            AppError::validation("JSON", "request body is not valid JSON").with_cause(err)
        })?;
        Self::from_value(value)
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Tenant recorded by the exporter, if any.
    pub fn source_tenant(&self) -> Option<&str> {
        self.meta.as_ref()?.get("tenantId")?.as_str()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables.iter().map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
