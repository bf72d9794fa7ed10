use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::HeaderValue;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ClickHouseSettings;
use crate::domain::value_text;
use crate::error::MinerError;
use crate::http::{build_client, default_headers, ensure_success, send_with_retries};

pub type Row = BTreeMap<String, String>;

pub trait ColumnStore: Send + Sync {
    fn execute(&self, sql: &str) -> Result<(), MinerError>;
    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), MinerError>;
    fn select_rows(&self, sql: &str) -> Result<Vec<Row>, MinerError>;
}

#[derive(Clone)]
pub struct ClickHouseHttpStore {
    client: Client,
    url: String,
    database: String,
}

impl ClickHouseHttpStore {
    pub fn new(settings: &ClickHouseSettings) -> Result<Self, MinerError> {
        let mut headers = default_headers()?;
        headers.insert(
            "X-ClickHouse-User",
            HeaderValue::from_str(&settings.user)
                .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?,
        );
        if let Some(password) = &settings.password {
            headers.insert(
                "X-ClickHouse-Key",
                HeaderValue::from_str(password)
                    .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?,
            );
        }
        let client = build_client(
            headers,
            Duration::from_secs(300),
            MinerError::ClickHouseHttp,
        )?;
        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            database: settings.database.clone(),
        })
    }

    fn post(&self, query: Option<&str>, body: String) -> Result<String, MinerError> {
        let response = send_with_retries(
            || {
                let mut request = self
                    .client
                    .post(&self.url)
                    .query(&[("database", self.database.as_str())]);
                if let Some(query) = query {
                    request = request.query(&[("query", query)]);
                }
                request.body(body.clone())
            },
            MinerError::ClickHouseHttp,
        )?;
        ensure_success(response, &self.url, |status, message| {
            MinerError::ClickHouseStatus { status, message }
        })?
        .text()
        .map_err(|err| MinerError::ClickHouseHttp(err.to_string()))
    }
}

impl ColumnStore for ClickHouseHttpStore {
    fn execute(&self, sql: &str) -> Result<(), MinerError> {
        debug!(sql, "clickhouse execute");
        self.post(None, sql.to_string()).map(|_| ())
    }

    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), MinerError> {
        if rows.is_empty() {
            return Ok(());
        }
        let query = insert_statement(table, columns);
        self.post(Some(&query), json_each_row(columns, rows)?)
            .map(|_| ())
    }

    fn select_rows(&self, sql: &str) -> Result<Vec<Row>, MinerError> {
        let body = self.post(None, format!("{} FORMAT JSONEachRow", sql.trim_end_matches(';')))?;
        parse_json_each_row(&body)
    }
}

pub fn insert_statement(table: &str, columns: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({columns}) FORMAT JSONEachRow", quote_ident(table))
}

pub fn json_each_row(columns: &[String], rows: &[Vec<String>]) -> Result<String, MinerError> {
    let mut body = String::new();
    for row in rows {
        let object = columns
            .iter()
            .zip(row.iter().map(String::as_str).chain(std::iter::repeat("")))
            .map(|(column, value)| (column.clone(), Value::from(value)))
            .collect::<Map<_, _>>();
        body.push_str(
            &serde_json::to_string(&object).map_err(|err| MinerError::Json(err.to_string()))?,
        );
        body.push('\n');
    }
    Ok(body)
}

pub fn parse_json_each_row(body: &str) -> Result<Vec<Row>, MinerError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let object = serde_json::from_str::<Map<String, Value>>(line)
                .map_err(|err| MinerError::ClickHouseHttp(format!("bad row: {err}")))?;
            Ok(object
                .into_iter()
                .map(|(key, value)| (key, value_text(value)))
                .collect())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engine {
    MergeTree,
    /// Later inserts with the same sort key replace earlier ones.
    ReplacingMergeTree { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, "String")
    }
}

pub fn create_table_ddl(
    table: &str,
    columns: &[ColumnDef],
    engine: &Engine,
    order_by: &[String],
) -> String {
    let columns = columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), column.ty))
        .collect::<Vec<_>>()
        .join(", ");
    let engine = match engine {
        Engine::MergeTree => "MergeTree".to_string(),
        Engine::ReplacingMergeTree { version } => {
            format!("ReplacingMergeTree({})", quote_ident(version))
        }
    };
    let order_by = if order_by.is_empty() {
        "tuple()".to_string()
    } else {
        format!(
            "({})",
            order_by
                .iter()
                .map(|column| quote_ident(column))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({columns}) ENGINE = {engine} ORDER BY {order_by}",
        quote_ident(table)
    )
}

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_ddl_orders_by_key() {
        let ddl = create_table_ddl(
            "donor_test",
            &[ColumnDef::string("pmcid"), ColumnDef::new("update_time", "DateTime DEFAULT now()")],
            &Engine::ReplacingMergeTree {
                version: "update_time".to_string(),
            },
            &["pmcid".to_string()],
        );
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS `donor_test` (`pmcid` String, `update_time` DateTime DEFAULT now()) \
             ENGINE = ReplacingMergeTree(`update_time`) ORDER BY (`pmcid`)"
        );
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(quote_literal("it's"), r"'it\'s'");
        assert_eq!(quote_ident("a`b"), r"`a\`b`");
    }

    #[test]
    fn rows_round_trip_as_text() {
        let columns = vec!["pmcid".to_string(), "num".to_string()];
        let body = json_each_row(&columns, &[vec!["PMC1".to_string()]]).unwrap();
        let rows = parse_json_each_row(&body).unwrap();
        assert_eq!(rows[0]["pmcid"], "PMC1");
        assert_eq!(rows[0]["num"], "");
        let rows = parse_json_each_row("{\"pmcid\":\"PMC1\",\"num\":3}\n").unwrap();
        assert_eq!(rows[0]["num"], "3");
    }
}
