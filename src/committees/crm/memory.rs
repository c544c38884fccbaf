//! In-process CRM store.
//!
//! Holds records per entity and answers `get`, `getcount`, `getsingle` and
//! `create` the way the remote API does, including `{"IN": [...]}` filters and
//! the `option.limit` / `option.sort` options. It backs the `--snapshot` mode
//! and the tests. Every write is appended to a log so callers can check what
//! a run changed.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApiResponse, CrmApi, Entity, Params, Record, RecordExt};
use crate::committees::error::{Result, SyncError};
use crate::committees::model::CrmId;

/// A write that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub entity: Entity,
    pub id: CrmId,
    pub params: Params,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: CrmId,
    tables: BTreeMap<Entity, Vec<Record>>,
}

/// See the module documentation.
#[derive(Debug, Default)]
pub struct InMemoryCrm {
    tables: RefCell<BTreeMap<Entity, Vec<Record>>>,
    next_id: Cell<CrmId>,
    disabled: BTreeSet<Entity>,
    writes: RefCell<Vec<WriteOp>>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            ..Self::default()
        }
    }

    /// Makes every call on `entity` fail as if the API was not installed.
    pub fn without_entity(mut self, entity: Entity) -> Self {
        self.disabled.insert(entity);
        self
    }

    /// Loads a store from a JSON snapshot. A missing file yields an empty
    /// store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let snapshot: Snapshot = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            tables: RefCell::new(snapshot.tables),
            next_id: Cell::new(snapshot.next_id.max(1)),
            ..Self::default()
        })
    }

    /// Writes the current state as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            next_id: self.next_id.get(),
            tables: self.tables.borrow().clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    /// Inserts a record directly, bypassing the write log. Returns its ID.
    pub fn seed(&self, entity: Entity, record: Params) -> CrmId {
        self.insert(entity, record)
    }

    /// All records of one entity, in creation order.
    pub fn records(&self, entity: Entity) -> Vec<Record> {
        self.tables
            .borrow()
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.writes.borrow().clone()
    }

    pub fn writes_to(&self, entity: Entity) -> Vec<WriteOp> {
        self.writes
            .borrow()
            .iter()
            .filter(|write| write.entity == entity)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.borrow_mut().clear();
    }

    fn insert(&self, entity: Entity, mut record: Params) -> CrmId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        record.insert("id".into(), Value::from(id));
        self.tables
            .borrow_mut()
            .entry(entity)
            .or_default()
            .push(record);
        id
    }

    fn select(&self, entity: Entity, params: &Params) -> Vec<Record> {
        let tables = self.tables.borrow();
        let mut selected: Vec<Record> = tables
            .get(&entity)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| matches_filter(record, params))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(Value::String(sort)) = params.get("option.sort") {
            if sort.trim().eq_ignore_ascii_case("id desc") {
                selected.reverse();
            }
        }
        if let Some(limit) = params.int_field("option.limit") {
            if limit > 0 {
                selected.truncate(limit as usize);
            }
        }
        selected
    }

    fn upsert(&self, entity: Entity, params: Params) -> Result<Record> {
        let record = match params.id() {
            Some(id) => {
                let mut tables = self.tables.borrow_mut();
                let existing = tables
                    .get_mut(&entity)
                    .and_then(|records| records.iter_mut().find(|record| record.id() == Some(id)))
                    .ok_or_else(|| SyncError::Api {
                        entity: entity.to_string(),
                        action: "create".into(),
                        message: format!("no record with id {id}"),
                    })?;
                for (key, value) in &params {
                    if key != "id" {
                        existing.insert(key.clone(), value.clone());
                    }
                }
                existing.clone()
            }
            None => {
                let id = self.insert(entity, params.clone());
                let mut record = params.clone();
                record.insert("id".into(), Value::from(id));
                record
            }
        };

        self.writes.borrow_mut().push(WriteOp {
            entity,
            id: record.id().unwrap_or_default(),
            params,
        });
        Ok(record)
    }
}

impl CrmApi for InMemoryCrm {
    fn call(&self, entity: Entity, action: &str, params: Params) -> Result<ApiResponse> {
        if self.disabled.contains(&entity) {
            return Err(SyncError::Api {
                entity: entity.to_string(),
                action: action.to_string(),
                message: format!("API ({entity}, {action}) does not exist"),
            });
        }

        match action {
            "get" => {
                let values = self.select(entity, &params);
                Ok(ApiResponse {
                    count: values.len() as u64,
                    id: single_id(&values),
                    values,
                })
            }
            "getcount" => {
                let mut params = params;
                params.remove("option.limit");
                Ok(ApiResponse {
                    count: self.select(entity, &params).len() as u64,
                    ..ApiResponse::default()
                })
            }
            "getsingle" => {
                let mut values = self.select(entity, &params);
                if values.len() != 1 {
                    return Err(SyncError::Api {
                        entity: entity.to_string(),
                        action: action.to_string(),
                        message: format!("expected one result, found {}", values.len()),
                    });
                }
                let record = values.remove(0);
                Ok(ApiResponse {
                    count: 1,
                    id: record.id(),
                    values: vec![record],
                })
            }
            "create" => {
                let record = self.upsert(entity, params)?;
                Ok(ApiResponse {
                    count: 1,
                    id: record.id(),
                    values: vec![record],
                })
            }
            other => Err(SyncError::Api {
                entity: entity.to_string(),
                action: other.to_string(),
                message: format!("action '{other}' is not supported"),
            }),
        }
    }
}

fn single_id(values: &[Record]) -> Option<CrmId> {
    match values {
        [only] => only.id(),
        _ => None,
    }
}

fn matches_filter(record: &Record, params: &Params) -> bool {
    params
        .iter()
        .filter(|(key, _)| !is_option(key))
        .all(|(key, expected)| {
            let actual = record.get(key);
            match expected {
                Value::Object(operator) => match operator.get("IN") {
                    Some(Value::Array(candidates)) => candidates
                        .iter()
                        .any(|candidate| loose_text(actual) == loose_text(Some(candidate))),
                    _ => false,
                },
                other => loose_text(actual) == loose_text(Some(other)),
            }
        })
}

fn is_option(key: &str) -> bool {
    key.starts_with("option.") || key == "return" || key == "sequential"
}

fn loose_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(flag)) => (if *flag { "1" } else { "0" }).to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
