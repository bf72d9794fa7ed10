use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Local;
use clap::ValueEnum;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::clickhouse::{
    ColumnDef, ColumnStore, Engine, Row, create_table_ddl, quote_ident,
};
use crate::error::MinerError;
use crate::extract::extract_json_objects;
use crate::llm::{ChatClient, ChatRequest};
use crate::scoring::{average_dict_jaccard, entity_jaccard};
use crate::sheet::Table;

pub const KEY_COLUMNS: [&str; 6] = ["text_type", "num", "itype", "pmcid", "content", "prompt"];
const VERSION_COLUMN: &str = "update_time";

#[derive(Debug, Clone)]
pub struct BenchmarkTable {
    pub name: String,
    pub models: Vec<String>,
}

impl BenchmarkTable {
    pub fn new(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            models,
        }
    }

    pub fn columns(&self) -> Vec<String> {
        let mut columns = ["text_type", "num", "itype", "pmcid", "content"]
            .map(String::from)
            .to_vec();
        columns.extend(self.models.iter().map(|model| format!("{model}_runtime")));
        columns.extend(self.models.iter().map(|model| format!("{model}_jaccard")));
        columns.push("answer".to_string());
        columns.push("prompt".to_string());
        columns.extend(self.models.iter().cloned());
        columns
    }

    pub fn create_ddl(&self) -> String {
        let mut columns = self
            .columns()
            .into_iter()
            .map(ColumnDef::string)
            .collect::<Vec<_>>();
        columns.push(ColumnDef::new(VERSION_COLUMN, "DateTime DEFAULT now()"));
        create_table_ddl(
            &self.name,
            &columns,
            &Engine::ReplacingMergeTree {
                version: VERSION_COLUMN.to_string(),
            },
            &KEY_COLUMNS.map(String::from),
        )
    }

    pub fn ensure(&self, store: &dyn ColumnStore) -> Result<(), MinerError> {
        store.execute(&self.create_ddl())
    }

    fn select(&self, condition: &str) -> String {
        let columns = self
            .columns()
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {columns} FROM {} FINAL WHERE {condition}",
            quote_ident(&self.name)
        )
    }

    pub fn pending_query(&self, model: &str) -> String {
        self.select(&format!("{} = '' AND prompt != ''", quote_ident(model)))
    }

    pub fn unscored_query(&self, model: &str) -> String {
        self.select(&format!(
            "{} != '' AND {} = ''",
            quote_ident(model),
            quote_ident(&format!("{model}_jaccard"))
        ))
    }

    pub fn upsert(&self, store: &dyn ColumnStore, rows: &[Row]) -> Result<(), MinerError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut columns = self.columns();
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let values = rows
            .iter()
            .map(|row| {
                let mut values = columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or_default())
                    .collect::<Vec<_>>();
                values.push(stamp.clone());
                values
            })
            .collect::<Vec<_>>();
        columns.push(VERSION_COLUMN.to_string());
        store.insert_rows(&self.name, &columns, &values)
    }
}

pub fn cross_rows(table: &BenchmarkTable, answers: &Table, prompts: &Table) -> Vec<Row> {
    let columns = table.columns();
    let mut rows = Vec::with_capacity(answers.len() * prompts.len());
    for answer_index in 0..answers.len() {
        for prompt_index in 0..prompts.len() {
            let mut row = columns
                .iter()
                .map(|column| (column.clone(), String::new()))
                .collect::<Row>();
            for (position, header) in answers.headers.iter().enumerate() {
                let name = if header == "type" { "text_type" } else { header.as_str() };
                if let Some(slot) = row.get_mut(name) {
                    *slot = answers.cell(answer_index, position).to_string();
                }
            }
            for (position, header) in prompts.headers.iter().enumerate() {
                if let Some(slot) = row.get_mut(header.as_str()) {
                    if slot.is_empty() {
                        *slot = prompts.cell(prompt_index, position).to_string();
                    }
                }
            }
            rows.push(row);
        }
    }
    rows
}

pub fn import(
    store: &dyn ColumnStore,
    table: &BenchmarkTable,
    answers: &Table,
    prompts: &Table,
) -> Result<usize, MinerError> {
    table.ensure(store)?;
    let rows = cross_rows(table, answers, prompts);
    table.upsert(store, &rows)?;
    info!(table = %table.name, rows = rows.len(), "benchmark rows imported");
    Ok(rows.len())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelRunReport {
    pub model: String,
    pub rows: usize,
    pub empty: usize,
}

pub fn query_models<C: ChatClient>(
    store: &dyn ColumnStore,
    table: &BenchmarkTable,
    client: &C,
    models: &BTreeMap<String, String>,
    attempts: usize,
    sink: &dyn ProgressSink,
) -> Result<Vec<ModelRunReport>, MinerError> {
    let mut reports = Vec::new();
    for column in &table.models {
        let Some(model) = models.get(column) else {
            warn!(column, "no model configured for column");
            continue;
        };
        let pending = store.select_rows(&table.pending_query(column))?;
        sink.event(ProgressEvent {
            message: format!("phase=Query; {column} ({model}): {} rows", pending.len()),
            elapsed: None,
        });
        let mut report = ModelRunReport {
            model: column.clone(),
            ..ModelRunReport::default()
        };
        for mut row in pending {
            let started = Instant::now();
            let objects = ask(client, model, &row, attempts);
            if objects.is_empty() {
                report.empty += 1;
            }
            row.insert(
                format!("{column}_runtime"),
                format!("{:.2}", started.elapsed().as_secs_f64()),
            );
            row.insert(
                column.clone(),
                serde_json::to_string(&objects).map_err(|err| MinerError::Json(err.to_string()))?,
            );
            table.upsert(store, &[row])?;
            report.rows += 1;
        }
        info!(column, rows = report.rows, empty = report.empty, "model answered");
        reports.push(report);
    }
    Ok(reports)
}

fn ask<C: ChatClient>(client: &C, model: &str, row: &Row, attempts: usize) -> Vec<Value> {
    let request = ChatRequest {
        model: model.to_string(),
        system_prompt: row.get("prompt").cloned(),
        user: row.get("content").cloned().unwrap_or_default(),
    };
    for attempt in 1..=attempts.max(1) {
        match client.chat(&request) {
            Ok(reply) => {
                let objects = extract_json_objects(&reply);
                if !objects.is_empty() {
                    return objects;
                }
            }
            Err(err) => warn!(model, attempt, error = %err, "gateway call failed"),
        }
    }
    Vec::new()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scorer {
    Entities,
    Record,
}

impl Scorer {
    pub fn score(&self, answer: &str, output: &str) -> f64 {
        let answer = serde_json::from_str::<Value>(answer).unwrap_or(Value::Object(Default::default()));
        let output = serde_json::from_str::<Value>(output).unwrap_or(Value::Array(Vec::new()));
        match self {
            Scorer::Entities => entity_jaccard(&answer, &output),
            Scorer::Record => average_dict_jaccard(&answer, &output),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreReport {
    pub model: String,
    pub rows: usize,
    pub mean: f64,
}

pub fn score(
    store: &dyn ColumnStore,
    table: &BenchmarkTable,
    scorer: Scorer,
    workers: usize,
) -> Result<Vec<ScoreReport>, MinerError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?;
    let mut reports = Vec::new();
    for model in &table.models {
        let rows = store.select_rows(&table.unscored_query(model))?;
        let jaccard_column = format!("{model}_jaccard");
        let scored = pool.install(|| {
            rows.into_par_iter()
                .map(|mut row| {
                    let value = scorer.score(
                        row.get("answer").map(String::as_str).unwrap_or(""),
                        row.get(model).map(String::as_str).unwrap_or(""),
                    );
                    row.insert(jaccard_column.clone(), format!("{value:?}"));
                    (value, row)
                })
                .collect::<Vec<_>>()
        });
        let total = scored.iter().map(|(value, _)| value).sum::<f64>();
        let mean = if scored.is_empty() {
            0.0
        } else {
            total / scored.len() as f64
        };
        let rows = scored.into_iter().map(|(_, row)| row).collect::<Vec<_>>();
        table.upsert(store, &rows)?;
        info!(model, rows = rows.len(), mean, "scored");
        reports.push(ScoreReport {
            model: model.clone(),
            rows: rows.len(),
            mean,
        });
    }
    Ok(reports)
}
