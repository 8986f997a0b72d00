use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::homology::bindings;

/// Whether a write created a fresh item or amended an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub item_id: String,
    pub action: WriteAction,
}

/// One `wbeditentity` payload. `item_id` selects update vs create:
/// `Some` amends that item, `None` mints a new one.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub item_id: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub claims: Vec<Value>,
}

/// Read and write access to the knowledge base. Reads go through the
/// SPARQL query service, writes through the MediaWiki action API.
pub trait WikibaseClient: Send + Sync {
    /// Item whose English label exactly matches `label`. `Ok(None)` when
    /// no item carries the label; with duplicate labels the first
    /// binding wins.
    fn query_item_by_label(&self, label: &str) -> Result<Option<String>, SyncError>;

    /// Item carrying `part_id` as the value of the part-id property.
    fn query_item_by_part_id(
        &self,
        property: &str,
        part_id: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Every property in the instance, label to P-identifier.
    fn list_properties(&self) -> Result<BTreeMap<String, String>, SyncError>;

    fn login(&mut self, username: &str, password: &str) -> Result<(), SyncError>;

    fn write_item(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError>;
}

pub struct WikibaseHttpClient {
    client: Client,
    sparql_endpoint: String,
    api_url: String,
    csrf_token: Option<String>,
}

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Bounded retry wrapper shared by every blocking HTTP seam in the
/// crate. Retries 429/5xx responses and transient transport errors with
/// a linear backoff; anything else is handed back as-is.
pub(crate) fn send_with_retries<F, E>(send: F, on_transport: E) -> Result<Response, SyncError>
where
    F: Fn() -> Result<Response, reqwest::Error>,
    E: Fn(String) -> SyncError,
{
    let mut attempt = 0usize;
    loop {
        match send() {
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    std::thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    std::thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(on_transport(err.to_string()));
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Q-identifier from an entity URI binding such as
/// `http://wikibase.example/entity/Q42`.
fn entity_id(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

impl WikibaseHttpClient {
    pub fn new(sparql_endpoint: &str, api_url: &str) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bioparts-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::WikibaseHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SyncError::WikibaseHttp(err.to_string()))?;
        Ok(Self {
            client,
            sparql_endpoint: sparql_endpoint.to_string(),
            api_url: api_url.to_string(),
            csrf_token: None,
        })
    }

    fn sparql(&self, query: &str) -> Result<Value, SyncError> {
        let response = send_with_retries(
            || {
                self.client
                    .get(&self.sparql_endpoint)
                    .query(&[("query", query), ("format", "json")])
                    .send()
            },
            SyncError::SparqlHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "sparql query failed".to_string());
            return Err(SyncError::SparqlStatus { status, message });
        }
        response
            .json()
            .map_err(|err| SyncError::SparqlHttp(err.to_string()))
    }

    fn api_get(&self, params: &[(&str, &str)]) -> Result<Value, SyncError> {
        let response = send_with_retries(
            || self.client.get(&self.api_url).query(params).send(),
            SyncError::WikibaseHttp,
        )?;
        self.api_json(response)
    }

    fn api_post(&self, form: &[(&str, &str)]) -> Result<Value, SyncError> {
        let owned: Vec<(String, String)> = form
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let response = send_with_retries(
            || self.client.post(&self.api_url).form(&owned).send(),
            SyncError::WikibaseHttp,
        )?;
        self.api_json(response)
    }

    fn api_json(&self, response: Response) -> Result<Value, SyncError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "wikibase api request failed".to_string());
            return Err(SyncError::WikibaseStatus { status, message });
        }
        response
            .json()
            .map_err(|err| SyncError::WikibaseHttp(err.to_string()))
    }

    fn fetch_token(&self, token_type: &str) -> Result<String, SyncError> {
        let body = self.api_get(&[
            ("action", "query"),
            ("meta", "tokens"),
            ("type", token_type),
            ("format", "json"),
        ])?;
        body.get("query")
            .and_then(|v| v.get("tokens"))
            .and_then(|v| v.get(format!("{token_type}token")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SyncError::LoginFailed(format!("no {token_type} token in response")))
    }
}

impl WikibaseClient for WikibaseHttpClient {
    fn query_item_by_label(&self, label: &str) -> Result<Option<String>, SyncError> {
        let query = format!(
            "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
             SELECT ?item WHERE {{ ?item rdfs:label \"{}\"@en . }}",
            escape_literal(label)
        );
        let results = self.sparql(&query)?;
        for binding in bindings(&results) {
            if let Some(url) = binding
                .get("item")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            {
                return Ok(Some(entity_id(url)));
            }
        }
        Ok(None)
    }

    fn query_item_by_part_id(
        &self,
        property: &str,
        part_id: &str,
    ) -> Result<Option<String>, SyncError> {
        let query = format!(
            "SELECT ?item WHERE {{ ?item ?prop \"{}\" .\n\
             FILTER(STRENDS(STR(?prop), \"/prop/direct/{property}\")) }}",
            escape_literal(part_id)
        );
        let results = self.sparql(&query)?;
        for binding in bindings(&results) {
            if let Some(url) = binding
                .get("item")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            {
                return Ok(Some(entity_id(url)));
            }
        }
        Ok(None)
    }

    fn list_properties(&self) -> Result<BTreeMap<String, String>, SyncError> {
        let query = "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
                     PREFIX wikibase: <http://wikiba.se/ontology#>\n\
                     SELECT ?property ?label WHERE {\n\
                       ?property a wikibase:Property ;\n\
                                 rdfs:label ?label .\n\
                     }";
        let results = self.sparql(query)?;
        let mut properties = BTreeMap::new();
        for binding in bindings(&results) {
            let url = binding
                .get("property")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str());
            let label = binding
                .get("label")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str());
            if let (Some(url), Some(label)) = (url, label) {
                properties.insert(label.to_string(), entity_id(url));
            }
        }
        Ok(properties)
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), SyncError> {
        let login_token = self.fetch_token("login")?;
        let body = self.api_post(&[
            ("action", "login"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", &login_token),
            ("format", "json"),
        ])?;
        let result = body
            .get("login")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_str())
            .unwrap_or("no result field");
        if result != "Success" {
            return Err(SyncError::LoginFailed(result.to_string()));
        }
        self.csrf_token = Some(self.fetch_token("csrf")?);
        info!(user = username, "logged in to wikibase");
        Ok(())
    }

    fn write_item(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
        let token = self
            .csrf_token
            .as_deref()
            .ok_or_else(|| SyncError::LoginFailed("write before login".to_string()))?;

        let mut data = serde_json::Map::new();
        if let Some(label) = &request.label {
            data.insert(
                "labels".to_string(),
                serde_json::json!({ "en": { "language": "en", "value": label } }),
            );
        }
        if let Some(description) = &request.description {
            data.insert(
                "descriptions".to_string(),
                serde_json::json!({ "en": { "language": "en", "value": description } }),
            );
        }
        if !request.aliases.is_empty() {
            let aliases: Vec<Value> = request
                .aliases
                .iter()
                .map(|alias| serde_json::json!({ "language": "en", "value": alias }))
                .collect();
            data.insert("aliases".to_string(), serde_json::json!({ "en": aliases }));
        }
        if !request.claims.is_empty() {
            data.insert("claims".to_string(), Value::Array(request.claims.clone()));
        }
        let data = serde_json::to_string(&Value::Object(data))
            .map_err(|err| SyncError::WikibaseHttp(err.to_string()))?;

        let mut form: Vec<(&str, &str)> = vec![
            ("action", "wbeditentity"),
            ("format", "json"),
            ("token", token),
            ("data", &data),
        ];
        let action = match &request.item_id {
            Some(item_id) => {
                form.push(("id", item_id));
                WriteAction::Updated
            }
            None => {
                form.push(("new", "item"));
                WriteAction::Created
            }
        };

        let body = self.api_post(&form)?;
        if let Some(error) = body.get("error") {
            let info = error
                .get("info")
                .and_then(|v| v.as_str())
                .unwrap_or("unspecified error");
            return Err(SyncError::WriteRejected(info.to_string()));
        }
        let item_id = body
            .get("entity")
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SyncError::WriteRejected("no entity id in response".to_string()))?;
        debug!(item = %item_id, ?action, "wrote item");
        Ok(WriteOutcome { item_id, action })
    }
}
