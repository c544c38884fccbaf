//! Generic access to the CRM data API.
//!
//! Every entity is reached through the same entity/action call taking a flat
//! attribute mapping. [`CrmApi`] is the seam the reconciliation code is
//! written against; [`rest::RestClient`] talks to a live instance,
//! [`memory::InMemoryCrm`] keeps records in process and [`dry_run::DryRun`]
//! forwards reads while only pretending to write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::committees::error::{Result, SyncError};
use crate::committees::model::CrmId;

pub mod dry_run;
pub mod memory;
pub mod rest;

/// A flat attribute mapping passed to or returned from the API.
pub type Record = Map<String, Value>;

/// Parameters of an API call.
pub type Params = Map<String, Value>;

/// Entity types the synchronisation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Contact,
    Relationship,
    RelationshipType,
    Address,
    Phone,
    Email,
    Group,
    GroupContact,
    OptionValue,
    ContactType,
    IdentityTracker,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Contact => "Contact",
            Entity::Relationship => "Relationship",
            Entity::RelationshipType => "RelationshipType",
            Entity::Address => "Address",
            Entity::Phone => "Phone",
            Entity::Email => "Email",
            Entity::Group => "Group",
            Entity::GroupContact => "GroupContact",
            Entity::OptionValue => "OptionValue",
            Entity::ContactType => "ContactType",
            Entity::IdentityTracker => "IdentityTracker",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised answer of an API call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub count: u64,
    pub id: Option<CrmId>,
    pub values: Vec<Record>,
}

/// The CRM data API. Implementors provide [`CrmApi::call`]; the remaining
/// operations are expressed on top of it.
///
/// Calls are synchronous and every call commits on its own.
pub trait CrmApi {
    fn call(&self, entity: Entity, action: &str, params: Params) -> Result<ApiResponse>;

    /// Returns all records matching the parameters.
    fn get(&self, entity: Entity, params: Params) -> Result<Vec<Record>> {
        Ok(self.call(entity, "get", params)?.values)
    }

    /// Counts the records matching the parameters.
    fn get_count(&self, entity: Entity, params: Params) -> Result<u64> {
        Ok(self.call(entity, "getcount", params)?.count)
    }

    /// Returns exactly one record or fails.
    fn get_single(&self, entity: Entity, params: Params) -> Result<Record> {
        let mut values = self.get(entity, params)?;
        match values.len() {
            1 => Ok(values.remove(0)),
            count => Err(SyncError::UnexpectedResponse {
                entity: entity.to_string(),
                action: "getsingle".into(),
                message: format!("expected one record, found {count}"),
            }),
        }
    }

    /// Creates a record, or updates it when `params` carries an `id`.
    fn create(&self, entity: Entity, params: Params) -> Result<Record> {
        let response = self.call(entity, "create", params)?;
        let id = response.id;
        let mut record = response.values.into_iter().next().unwrap_or_default();
        if record.id().is_none() {
            let id = id.ok_or_else(|| SyncError::UnexpectedResponse {
                entity: entity.to_string(),
                action: "create".into(),
                message: "response carries no id".into(),
            })?;
            record.insert("id".into(), Value::from(id));
        }
        Ok(record)
    }
}

impl<T: CrmApi + ?Sized> CrmApi for &T {
    fn call(&self, entity: Entity, action: &str, params: Params) -> Result<ApiResponse> {
        (**self).call(entity, action, params)
    }
}

/// Turns a `json!({...})` object literal into call parameters. Anything other
/// than an object yields an empty mapping.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Typed accessors for the loosely typed records the API returns. Numeric
/// fields often arrive as strings, so both spellings are accepted.
pub trait RecordExt {
    fn id(&self) -> Option<CrmId>;
    fn int_field(&self, key: &str) -> Option<i64>;
    fn text_field(&self, key: &str) -> Option<String>;
    fn flag(&self, key: &str) -> bool;
}

impl RecordExt for Record {
    fn id(&self) -> Option<CrmId> {
        self.int_field("id")
    }

    fn int_field(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    fn text_field(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_i64().unwrap_or(0) != 0,
            Some(Value::String(text)) => !matches!(text.as_str(), "" | "0" | "false"),
            _ => false,
        }
    }
}

/// Interprets a raw response body of the form
/// `{is_error, error_message, count, id, values}`. `values` may be a list or
/// an object keyed by record ID; `getcount` answers with `result`.
pub fn parse_response(entity: Entity, action: &str, body: Value) -> Result<ApiResponse> {
    let Value::Object(mut body) = body else {
        return Err(SyncError::UnexpectedResponse {
            entity: entity.to_string(),
            action: action.to_string(),
            message: "response is not a JSON object".into(),
        });
    };

    if body.flag("is_error") {
        let message = body
            .text_field("error_message")
            .unwrap_or_else(|| "unknown error".into());
        return Err(SyncError::Api {
            entity: entity.to_string(),
            action: action.to_string(),
            message,
        });
    }

    let values: Vec<Record> = match body.remove("values") {
        Some(Value::Array(items)) => items.into_iter().filter_map(into_record).collect(),
        Some(Value::Object(items)) => items.into_iter().filter_map(|(_, v)| into_record(v)).collect(),
        _ => Vec::new(),
    };

    let count = body
        .int_field("result")
        .or_else(|| body.int_field("count"))
        .map(|count| count.max(0) as u64)
        .unwrap_or(values.len() as u64);

    Ok(ApiResponse {
        count,
        id: body.id(),
        values,
    })
}

fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(record) => Some(record),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_values_are_flattened() {
        let response = parse_response(
            Entity::Contact,
            "get",
            json!({
                "is_error": 0,
                "count": 2,
                "values": {
                    "4": {"id": "4", "organization_name": "Ausschuss"},
                    "9": {"id": "9", "organization_name": "Ausschuss"}
                }
            }),
        )
        .unwrap();

        assert_eq!(response.count, 2);
        assert_eq!(response.values.len(), 2);
        assert_eq!(response.values[0].id(), Some(4));
    }

    #[test]
    fn errors_surface_the_message() {
        let error = parse_response(
            Entity::IdentityTracker,
            "getcount",
            json!({"is_error": 1, "error_message": "API (IdentityTracker, getcount) does not exist"}),
        )
        .unwrap_err();

        assert!(matches!(error, SyncError::Api { .. }));
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn getcount_reads_result() {
        let response = parse_response(Entity::OptionValue, "getcount", json!({"is_error": 0, "result": 3})).unwrap();
        assert_eq!(response.count, 3);
    }

    #[test]
    fn record_accessors_accept_strings_and_numbers() {
        let record = params(json!({"id": "17", "contact_id_a": 3, "is_active": "1", "description": ""}));
        assert_eq!(record.id(), Some(17));
        assert_eq!(record.int_field("contact_id_a"), Some(3));
        assert!(record.flag("is_active"));
        assert_eq!(record.text_field("description"), None);
    }
}
