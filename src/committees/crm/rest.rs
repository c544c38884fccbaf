//! REST transport for the CRM data API.
//!
//! Blocking reqwest client, one POST per call. Entity and action travel in
//! the query string, the credentials and the JSON encoded parameters in the
//! form body.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use super::{ApiResponse, CrmApi, Entity, Params, parse_response};
use crate::committees::config::CrmSettings;
use crate::committees::error::{Result, SyncError};

/// Client for a remote CRM instance.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    endpoint: String,
    api_key: String,
    site_key: String,
}

impl RestClient {
    pub fn new(settings: &CrmSettings) -> Result<Self> {
        if settings.url.trim().is_empty() {
            return Err(SyncError::MissingDependency {
                name: "CRM endpoint".into(),
                hint: "set [crm] url in the configuration or pass --crm-url".into(),
            });
        }

        let http = Client::builder()
            .user_agent(format!("committee-sync/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            site_key: settings.site_key.clone(),
        })
    }
}

impl CrmApi for RestClient {
    fn call(&self, entity: Entity, action: &str, params: Params) -> Result<ApiResponse> {
        let mut params = params;
        params.insert("sequential".into(), Value::from(1));
        let json = serde_json::to_string(&Value::Object(params))?;
        debug!(%entity, action, "calling CRM API");

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Requested-With", "XMLHttpRequest")
            .query(&[("entity", entity.as_str()), ("action", action)])
            .form(&[
                ("api_key", self.api_key.as_str()),
                ("key", self.site_key.as_str()),
                ("json", json.as_str()),
            ])
            .send()?
            .error_for_status()?;

        let body: Value = response.json()?;
        parse_response(entity, action, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committees::crm::{RecordExt, params};
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> RestClient {
        RestClient::new(&CrmSettings {
            url: server.url("/civicrm/ajax/rest"),
            api_key: "user-key".into(),
            site_key: "site-key".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn get_sends_entity_and_action() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/civicrm/ajax/rest")
                .query_param("entity", "Contact")
                .query_param("action", "get");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "is_error": 0,
                    "count": 1,
                    "id": 12,
                    "values": [{"id": "12", "organization_name": "Petitionsausschuss"}]
                }));
        });

        let client = client_for(&server);
        let records = client
            .get(Entity::Contact, params(json!({"organization_name": "Petitionsausschuss"})))
            .unwrap();

        mock.assert();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), Some(12));
    }

    #[test]
    fn api_errors_become_sync_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/civicrm/ajax/rest");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"is_error": 1, "error_message": "Mandatory key(s) missing"}));
        });

        let error = client_for(&server)
            .create(Entity::Relationship, params(json!({"contact_id_a": 1})))
            .unwrap_err();

        assert!(matches!(error, SyncError::Api { .. }));
    }

    #[test]
    fn http_failures_abort() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/civicrm/ajax/rest");
            then.status(500);
        });

        let error = client_for(&server)
            .get(Entity::Group, params(json!({"title": "Lobby-Kontakte"})))
            .unwrap_err();

        assert!(matches!(error, SyncError::Http(_)));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let result = RestClient::new(&CrmSettings::default());
        assert!(matches!(result, Err(SyncError::MissingDependency { .. })));
    }
}
