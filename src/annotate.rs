use chrono::Local;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::clickhouse::{
    ColumnDef, ColumnStore, Engine, Row, create_table_ddl, quote_ident, quote_literal,
};
use crate::domain::value_text;
use crate::error::MinerError;
use crate::extract::extract_json_objects;
use crate::llm::{ChatClient, ChatRequest};
use crate::scale_bar::DESCRIPTOR_KEYS;

pub const INFO_KEYS: [&str; 3] = ["pmcid", "id", "type"];
pub const INFO_COLUMNS: [&str; 5] = ["pmcid", "id", "content", "type", "answer"];
pub const VISION_TABLE: &str = "vision_llm";
pub const DEFAULT_ATTEMPTS: usize = 5;

const VERSION_COLUMN: &str = "update_time";
const DETAIL_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationJob {
    ScaleBar,
    BioOnto,
}

struct Source {
    kind: &'static str,
    select: String,
}

impl AnnotationJob {
    pub fn key(&self) -> &'static str {
        match self {
            AnnotationJob::ScaleBar => "scale-bar",
            AnnotationJob::BioOnto => "bio-onto",
        }
    }

    pub fn info_table(&self) -> &'static str {
        match self {
            AnnotationJob::ScaleBar => "scale_bar_all_info",
            AnnotationJob::BioOnto => "bio_onto_all_info",
        }
    }

    pub fn detail_table(&self) -> &'static str {
        match self {
            AnnotationJob::ScaleBar => "scale_bar_meta_all_info",
            AnnotationJob::BioOnto => "bio_onto_entities",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AnnotationJob::ScaleBar => "llama3.1:70b",
            AnnotationJob::BioOnto => "gemma2:27b",
        }
    }

    pub fn detail_columns(&self) -> &'static [&'static str] {
        match self {
            AnnotationJob::ScaleBar => &[
                "pmcid",
                "id",
                "type",
                "descriptor_type",
                "value",
                "units",
                "notes",
                "panel",
            ],
            AnnotationJob::BioOnto => &["pmcid", "id", "type", "entity"],
        }
    }

    fn detail_order_by(&self) -> &'static [&'static str] {
        match self {
            AnnotationJob::ScaleBar => &INFO_KEYS,
            AnnotationJob::BioOnto => &["pmcid", "id", "type", "entity"],
        }
    }

    fn vision_filter(&self) -> String {
        let yes = quote_literal("Yes");
        match self {
            AnnotationJob::ScaleBar => format!("b.micro = {yes}"),
            AnnotationJob::BioOnto => format!("(b.micro = {yes} OR b.schema = {yes})"),
        }
    }

    fn sources(&self) -> Vec<Source> {
        let vision = quote_ident(VISION_TABLE);
        let filter = self.vision_filter();
        let captions = Source {
            kind: "caption",
            select: format!(
                "SELECT a.pmcid AS pmcid, a.graphic AS id, a.caption AS content \
                 FROM `ftu_pub_pmc` AS a INNER JOIN {vision} AS b \
                 ON a.pmcid = b.pmcid AND a.graphic = b.graphic WHERE {filter}"
            ),
        };
        match self {
            AnnotationJob::ScaleBar => vec![
                captions,
                Source {
                    kind: "ref_text",
                    select: format!(
                        "SELECT r.pmcid AS pmcid, f.graphic AS id, r.ref_text AS content \
                         FROM `image_refs` AS r \
                         INNER JOIN `ftu_pub_pmc` AS f ON r.pmcid = f.pmcid AND r.rid = f.figid \
                         INNER JOIN {vision} AS b ON f.pmcid = b.pmcid AND f.graphic = b.graphic \
                         WHERE {filter}"
                    ),
                },
            ],
            AnnotationJob::BioOnto => vec![
                captions,
                Source {
                    kind: "figure_node",
                    select: format!(
                        "SELECT a.pmcid AS pmcid, a.graphic AS id, a.nodes AS content \
                         FROM `image_node_lvm_total` AS a INNER JOIN {vision} AS b \
                         ON a.pmcid = b.pmcid AND a.graphic = b.graphic WHERE {filter}"
                    ),
                },
            ],
        }
    }

    pub fn info_ddl(&self) -> String {
        let mut columns = INFO_COLUMNS.map(ColumnDef::string).to_vec();
        columns.push(ColumnDef::new(VERSION_COLUMN, "DateTime DEFAULT now()"));
        create_table_ddl(
            self.info_table(),
            &columns,
            &Engine::ReplacingMergeTree {
                version: VERSION_COLUMN.to_string(),
            },
            &INFO_KEYS.map(String::from),
        )
    }

    pub fn detail_ddl(&self) -> String {
        let mut columns = self
            .detail_columns()
            .iter()
            .map(|column| ColumnDef::string(*column))
            .collect::<Vec<_>>();
        columns.push(ColumnDef::new(VERSION_COLUMN, "DateTime DEFAULT now()"));
        create_table_ddl(
            self.detail_table(),
            &columns,
            &Engine::MergeTree,
            &self
                .detail_order_by()
                .iter()
                .map(|column| column.to_string())
                .collect::<Vec<_>>(),
        )
    }

    /// One `INSERT … SELECT` per source. Keys already in the info table are
    /// not imported again.
    pub fn import_statements(&self) -> Vec<String> {
        let table = quote_ident(self.info_table());
        self.sources()
            .into_iter()
            .map(|source| {
                let kind = quote_literal(source.kind);
                format!(
                    "INSERT INTO {table} (`pmcid`, `id`, `content`, `type`) \
                     SELECT pmcid, id, content, {kind} AS type FROM ({}) AS src \
                     WHERE (pmcid, id, {kind}) NOT IN (SELECT pmcid, id, type FROM {table})",
                    source.select
                )
            })
            .collect()
    }

    pub fn pending_query(&self) -> String {
        format!(
            "SELECT pmcid, id, type, content FROM {} FINAL WHERE answer = ''",
            quote_ident(self.info_table())
        )
    }

    pub fn answered_query(&self) -> String {
        format!(
            "SELECT pmcid, id, type, answer FROM {} FINAL WHERE answer != ''",
            quote_ident(self.info_table())
        )
    }

    pub fn detail_rows(&self, row: &Row) -> Vec<Vec<String>> {
        let field = |name: &str| row.get(name).cloned().unwrap_or_default();
        let Ok(answer) = serde_json::from_str::<Value>(&field("answer")) else {
            return Vec::new();
        };
        let records = match answer {
            Value::Array(values) => values,
            other => vec![other],
        };
        let key = INFO_KEYS.map(field);
        let mut rows = Vec::new();
        for record in records.iter().filter(|record| record.is_object()) {
            match self {
                AnnotationJob::ScaleBar => {
                    let mut cells = key.to_vec();
                    cells.extend(DESCRIPTOR_KEYS.iter().map(|name| cell_text(record.get(*name))));
                    rows.push(cells);
                }
                AnnotationJob::BioOnto => {
                    let entities = match record.get("entities") {
                        Some(Value::Array(values)) => values.clone(),
                        Some(Value::String(text)) => vec![Value::String(text.clone())],
                        _ => Vec::new(),
                    };
                    for entity in entities {
                        let mut cells = key.to_vec();
                        cells.push(value_text(entity));
                        rows.push(cells);
                    }
                }
            }
        }
        rows
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(value) => value_text(value.clone()),
    }
}

pub fn answer_text(objects: &[Value], reply: &str) -> Result<String, MinerError> {
    if objects.is_empty() {
        return Ok(reply.to_string());
    }
    serde_json::to_string(objects).map_err(|err| MinerError::Json(err.to_string()))
}

pub fn ensure_tables(store: &dyn ColumnStore, job: AnnotationJob) -> Result<(), MinerError> {
    store.execute(&job.info_ddl())?;
    store.execute(&job.detail_ddl())
}

pub fn import_sources(store: &dyn ColumnStore, job: AnnotationJob) -> Result<usize, MinerError> {
    let statements = job.import_statements();
    for statement in &statements {
        store.execute(statement)?;
    }
    info!(job = job.key(), sources = statements.len(), "figure texts imported");
    Ok(statements.len())
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub model: String,
    pub prompt: String,
    pub attempts: usize,
    pub import: bool,
}

impl JobOptions {
    pub fn new(job: AnnotationJob, prompt: impl Into<String>) -> Self {
        Self {
            model: job.default_model().to_string(),
            prompt: prompt.into(),
            attempts: DEFAULT_ATTEMPTS,
            import: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerReport {
    pub pending: usize,
    pub answered: usize,
    pub unparsed: usize,
    pub failed: usize,
    #[serde(skip)]
    pub rows: Vec<Row>,
}

/// Asks the gateway about every row still without an answer. A row is
/// retried until the reply holds a JSON object; after the last attempt the
/// raw reply is stored instead. Rows whose every call failed stay pending.
pub fn answer_pending<C: ChatClient>(
    store: &dyn ColumnStore,
    job: AnnotationJob,
    client: &C,
    options: &JobOptions,
    sink: &dyn ProgressSink,
) -> Result<AnswerReport, MinerError> {
    let pending = store.select_rows(&job.pending_query())?;
    sink.event(ProgressEvent {
        message: format!(
            "phase=Query; {} ({}): {} rows",
            job.key(),
            options.model,
            pending.len()
        ),
        elapsed: None,
    });
    let mut report = AnswerReport {
        pending: pending.len(),
        ..AnswerReport::default()
    };
    let columns = INFO_COLUMNS
        .iter()
        .map(|column| column.to_string())
        .chain([VERSION_COLUMN.to_string()])
        .collect::<Vec<_>>();

    for mut row in pending {
        let request = ChatRequest {
            model: options.model.clone(),
            system_prompt: Some(options.prompt.clone()),
            user: row.get("content").cloned().unwrap_or_default(),
        };
        let mut reply = String::new();
        let mut objects = Vec::new();
        for attempt in 1..=options.attempts.max(1) {
            match client.chat(&request) {
                Ok(text) => {
                    objects = extract_json_objects(&text);
                    reply = text;
                    if !objects.is_empty() {
                        break;
                    }
                }
                Err(err) => warn!(job = job.key(), attempt, error = %err, "gateway call failed"),
            }
        }
        let answer = answer_text(&objects, &reply)?;
        if answer.trim().is_empty() {
            report.failed += 1;
            continue;
        }
        if objects.is_empty() {
            report.unparsed += 1;
        }
        row.insert("answer".to_string(), answer);
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let values = INFO_COLUMNS
            .iter()
            .map(|column| row.get(*column).cloned().unwrap_or_default())
            .chain([stamp])
            .collect::<Vec<_>>();
        store.insert_rows(job.info_table(), &columns, &[values])?;
        report.answered += 1;
        report.rows.push(row);
    }
    info!(
        job = job.key(),
        answered = report.answered,
        unparsed = report.unparsed,
        failed = report.failed,
        "pending rows answered"
    );
    Ok(report)
}

pub fn insert_details(
    store: &dyn ColumnStore,
    job: AnnotationJob,
    rows: &[Row],
) -> Result<usize, MinerError> {
    let details = rows
        .iter()
        .flat_map(|row| job.detail_rows(row))
        .collect::<Vec<_>>();
    let columns = job
        .detail_columns()
        .iter()
        .map(|column| column.to_string())
        .collect::<Vec<_>>();
    for chunk in details.chunks(DETAIL_BATCH) {
        store.insert_rows(job.detail_table(), &columns, chunk)?;
    }
    Ok(details.len())
}

/// Empties the detail table and expands every stored answer into it again.
pub fn rebuild_details(store: &dyn ColumnStore, job: AnnotationJob) -> Result<usize, MinerError> {
    ensure_tables(store, job)?;
    store.execute(&format!(
        "TRUNCATE TABLE IF EXISTS {}",
        quote_ident(job.detail_table())
    ))?;
    let answered = store.select_rows(&job.answered_query())?;
    let inserted = insert_details(store, job, &answered)?;
    info!(job = job.key(), rows = answered.len(), details = inserted, "details rebuilt");
    Ok(inserted)
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateReport {
    pub job: AnnotationJob,
    pub model: String,
    pub imported_sources: usize,
    pub answers: AnswerReport,
    pub details: usize,
}

pub fn run_job<C: ChatClient>(
    store: &dyn ColumnStore,
    job: AnnotationJob,
    client: &C,
    options: &JobOptions,
    sink: &dyn ProgressSink,
) -> Result<AnnotateReport, MinerError> {
    ensure_tables(store, job)?;
    let imported_sources = if options.import {
        import_sources(store, job)?
    } else {
        0
    };
    let answers = answer_pending(store, job, client, options, sink)?;
    let details = insert_details(store, job, &answers.rows)?;
    Ok(AnnotateReport {
        job,
        model: options.model.clone(),
        imported_sources,
        answers,
        details,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn answered(answer: &str) -> Row {
        Row::from([
            ("pmcid".to_string(), "PMC1".to_string()),
            ("id".to_string(), "f1".to_string()),
            ("type".to_string(), "caption".to_string()),
            ("answer".to_string(), answer.to_string()),
        ])
    }

    #[test]
    fn scale_bar_details_take_descriptor_fields() {
        let row = answered(
            r#"[{"Descriptor Type": "scale bar", "Value": 50, "Units": "μm", "Panel": "A"}, "stray"]"#,
        );
        assert_eq!(
            AnnotationJob::ScaleBar.detail_rows(&row),
            vec![vec!["PMC1", "f1", "caption", "scale bar", "50", "μm", "", "A"]]
        );
    }

    #[test]
    fn single_object_answers_are_expanded() {
        let row = answered(r#"{"entities": ["glomerulus", "podocyte"]}"#);
        let rows = AnnotationJob::BioOnto.detail_rows(&row);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["PMC1", "f1", "caption", "podocyte"]);
        assert!(AnnotationJob::BioOnto.detail_rows(&answered("not json")).is_empty());
    }

    #[test]
    fn import_skips_existing_keys() {
        let statements = AnnotationJob::BioOnto.import_statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("'figure_node' AS type"));
        assert!(statements[1].contains("NOT IN (SELECT pmcid, id, type FROM `bio_onto_all_info`)"));
        assert!(statements[0].contains("(b.micro = 'Yes' OR b.schema = 'Yes')"));
    }

    #[test]
    fn raw_reply_kept_when_nothing_parses() {
        assert_eq!(answer_text(&[], "no scale bar").unwrap(), "no scale bar");
        assert_eq!(
            answer_text(&[json!({"Value": "1"})], "ignored").unwrap(),
            r#"[{"Value":"1"}]"#
        );
    }
}
