use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::MinerError;
use crate::http::{build_client, default_headers, ensure_success, send_with_retries};
use crate::sheet::{Table, read_csv_table, write_csv_table};

pub const SEARCH_URL: &str = "https://data.bioontology.org/search";
pub const ID_COLUMN: &str = "uberon_id";

pub const GENERIC_LABELS: [&str; 4] = [
    "Uberon",
    "UBERON Terminology",
    "UBERON: anatomical entity",
    "anatomical entity (from UBERON)",
];

pub const DESCRIPTION_COLUMNS: [&str; 5] = [
    "Uberon ID",
    "Preferred Label",
    "Synonyms",
    "Definition",
    "Source Ontology",
];

pub trait BioportalClient: Send + Sync {
    fn search(&self, term: &str) -> Result<Value, MinerError>;
}

#[derive(Clone)]
pub struct BioportalHttpClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl BioportalHttpClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, MinerError> {
        let client = build_client(
            default_headers()?,
            Duration::from_secs(30),
            MinerError::BioportalHttp,
        )?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: SEARCH_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl BioportalClient for BioportalHttpClient {
    fn search(&self, term: &str) -> Result<Value, MinerError> {
        let response = send_with_retries(
            || {
                self.client.get(&self.base_url).query(&[
                    ("q", term),
                    ("apikey", self.api_key.as_str()),
                    ("include", "prefLabel,synonym,definition"),
                    ("display_context", "false"),
                ])
            },
            MinerError::BioportalHttp,
        )?;
        ensure_success(response, &self.base_url, |status, message| {
            MinerError::BioportalStatus { status, message }
        })?
        .json::<Value>()
        .map_err(|err| MinerError::BioportalHttp(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TermDescription {
    pub uberon_id: String,
    pub preferred_label: String,
    pub synonyms: String,
    pub definition: String,
    pub source_ontology: String,
}

impl TermDescription {
    fn cells(&self) -> Vec<String> {
        vec![
            self.uberon_id.clone(),
            self.preferred_label.clone(),
            self.synonyms.clone(),
            self.definition.clone(),
            self.source_ontology.clone(),
        ]
    }
}

pub fn descriptions(id: &str, response: &Value) -> Vec<TermDescription> {
    let Some(collection) = response.get("collection").and_then(Value::as_array) else {
        return Vec::new();
    };
    collection
        .iter()
        .filter_map(|item| {
            let preferred_label = item
                .get("prefLabel")
                .and_then(Value::as_str)
                .unwrap_or("N/A")
                .to_string();
            if GENERIC_LABELS.contains(&preferred_label.as_str()) {
                return None;
            }
            let synonyms = item
                .get("synonym")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let definition = item
                .get("definition")
                .and_then(Value::as_array)
                .and_then(|values| values.first())
                .and_then(Value::as_str)
                .unwrap_or("N/A")
                .to_string();
            let source_ontology = item
                .pointer("/links/ontology")
                .and_then(Value::as_str)
                .unwrap_or("N/A")
                .to_string();
            Some(TermDescription {
                uberon_id: id.to_string(),
                preferred_label,
                synonyms,
                definition,
                source_ontology,
            })
        })
        .collect()
}

pub fn describe_terms<C: BioportalClient>(
    client: &C,
    ids: &[String],
    sink: &dyn ProgressSink,
) -> Vec<TermDescription> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (index, id) in ids.iter().enumerate() {
        sink.event(ProgressEvent {
            message: format!("phase=Query; {id} ({}/{})", index + 1, ids.len()),
            elapsed: None,
        });
        let response = match client.search(id) {
            Ok(response) => response,
            Err(err) => {
                warn!(id, error = %err, "bioportal lookup failed");
                continue;
            }
        };
        for row in descriptions(id, &response) {
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
    }
    rows
}

pub fn description_table(rows: &[TermDescription]) -> Table {
    let mut table = Table::new(DESCRIPTION_COLUMNS);
    for row in rows {
        table.push(row.cells());
    }
    table
}

pub fn describe_csv<C: BioportalClient>(
    client: &C,
    input: &Path,
    output: &Path,
    sink: &dyn ProgressSink,
) -> Result<usize, MinerError> {
    let ids = read_csv_table(input)?
        .column(ID_COLUMN, &input.display().to_string())?
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect::<Vec<_>>();
    let rows = describe_terms(client, &ids, sink);
    write_csv_table(output, &description_table(&rows))?;
    info!(ids = ids.len(), rows = rows.len(), output = %output.display(), "descriptions written");
    Ok(rows.len())
}
