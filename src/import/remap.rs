use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

/// Identifiers taken in one destination table and how file ids were placed there.
#[derive(Debug, Default)]
struct TableIds {
    reserved: HashSet<String>,
    max_integer: Option<i64>,
    assigned: HashMap<String, Value>,
    remapped: usize,
}

impl TableIds {
    fn reserve(&mut self, id: &Value) {
        if let Some(i) = id.as_i64() {
            self.max_integer = Some(self.max_integer.map_or(i, |m| m.max(i)));
        } else if let Some(i) = id.as_str().and_then(|s| s.parse::<i64>().ok()) {
            self.max_integer = Some(self.max_integer.map_or(i, |m| m.max(i)));
        }
        self.reserved.insert(id_key(id));
    }

    fn mint(&mut self, original: &Value) -> Value {
        if original.is_i64() || original.is_u64() {
            let next = self.max_integer.map_or(1, |m| m.saturating_add(1));
            return Value::from(next);
        }
        loop {
            let candidate = Value::from(Uuid::new_v4().to_string());
            if !self.reserved.contains(&id_key(&candidate)) {
                return candidate;
            }
        }
    }
}

/// Comparable form of an identifier: strings as-is, everything else as JSON text.
pub(crate) fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// File identifier to stored identifier, per table, for one commit.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    tables: HashMap<String, TableIds>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark identifiers already present in the destination table.
    pub fn reserve_existing<'a, I>(&mut self, table: &str, ids: I)
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let entry = self.tables.entry(table.to_string()).or_default();
        for id in ids {
            entry.reserve(id);
        }
    }

    /// Identifier to store for a row whose file identifier is `id`.
    ///
    /// The first time an identifier is seen it is kept when free and replaced
    /// with a freshly minted one when taken. Later calls return the same answer.
    pub fn assign(&mut self, table: &str, id: &Value) -> Value {
        let entry = self.tables.entry(table.to_string()).or_default();
        let key = id_key(id);
        if let Some(existing) = entry.assigned.get(&key) {
            return existing.clone();
        }

        let stored = if entry.reserved.contains(&key) {
            entry.remapped += 1;
            entry.mint(id)
        } else {
            id.clone()
        };
        entry.reserve(&stored);
        entry.assigned.insert(key, stored.clone());
        stored
    }

    /// Stored identifier for a file identifier of `table`, if that row was placed.
    pub fn resolve(&self, table: &str, id: &Value) -> Option<&Value> {
        self.tables.get(table)?.assigned.get(&id_key(id))
    }

    /// Number of rows of `table` that received a minted identifier.
    pub fn remapped(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.remapped)
    }
}
