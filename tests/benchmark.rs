use std::collections::BTreeMap;
use std::sync::Mutex;

use ftu_miner::benchmark::{BenchmarkTable, KEY_COLUMNS, Scorer, import, query_models, score};
use ftu_miner::clickhouse::{ColumnStore, Row};
use ftu_miner::error::MinerError;
use ftu_miner::llm::{ChatClient, ChatRequest};
use ftu_miner::output::JsonOutput;
use ftu_miner::sheet::Table;

/// Keeps the latest insert per sort key, like a ReplacingMergeTree read
/// with FINAL. Understands only the two filters the benchmark issues.
#[derive(Default)]
struct MemoryStore {
    ddl: Mutex<Vec<String>>,
    rows: Mutex<BTreeMap<Vec<String>, Row>>,
    inserts: Mutex<usize>,
}

impl ColumnStore for MemoryStore {
    fn execute(&self, sql: &str) -> Result<(), MinerError> {
        self.ddl.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn insert_rows(
        &self,
        _table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), MinerError> {
        *self.inserts.lock().unwrap() += 1;
        let mut stored = self.rows.lock().unwrap();
        for values in rows {
            let row = columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect::<Row>();
            let key = KEY_COLUMNS.iter().map(|column| row[*column].clone()).collect();
            stored.insert(key, row);
        }
        Ok(())
    }

    fn select_rows(&self, sql: &str) -> Result<Vec<Row>, MinerError> {
        let condition = sql.split(" WHERE ").nth(1).unwrap_or("");
        let model = condition.split('`').nth(1).unwrap_or("").to_string();
        let pending = condition.contains("= '' AND prompt != ''");
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| {
                if pending {
                    row[&model].is_empty() && !row["prompt"].is_empty()
                } else {
                    !row[&model].is_empty() && row[&format!("{model}_jaccard")].is_empty()
                }
            })
            .cloned()
            .collect())
    }
}

struct Kidney;

impl ChatClient for Kidney {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError> {
        assert_eq!(request.system_prompt.as_deref(), Some("List the entities."));
        Ok("Sure. {\"entities\": [\"kidney\"]} Hope this helps.".to_string())
    }
}

fn answers() -> Table {
    let mut table = Table::new(["type", "num", "itype", "pmcid", "content", "answer"]);
    table.push(vec![
        "caption".into(),
        "1".into(),
        "figure".into(),
        "PMC1".into(),
        "The renal cortex and nephron.".into(),
        r#"{"entities": ["kidney", "nephron"]}"#.into(),
    ]);
    table.push(vec![
        "caption".into(),
        "2".into(),
        "figure".into(),
        "PMC2".into(),
        "A kidney.".into(),
        r#"{"entities": ["kidney"]}"#.into(),
    ]);
    table
}

fn prompts() -> Table {
    let mut table = Table::new(["prompt"]);
    table.push(vec!["List the entities.".into()]);
    table
}

#[test]
fn import_query_and_score() {
    let store = MemoryStore::default();
    let table = BenchmarkTable::new("bench", vec!["qwen".to_string()]);

    assert_eq!(import(&store, &table, &answers(), &prompts()).unwrap(), 2);
    assert!(store.ddl.lock().unwrap()[0].starts_with("CREATE TABLE IF NOT EXISTS `bench`"));

    let models = BTreeMap::from([("qwen".to_string(), "qwen2.5:72b".to_string())]);
    let reports = query_models(&store, &table, &Kidney, &models, 2, &JsonOutput).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!((reports[0].rows, reports[0].empty), (2, 0));

    for row in store.rows.lock().unwrap().values() {
        assert_eq!(row["qwen"], r#"[{"entities":["kidney"]}]"#);
        assert!(row["qwen_runtime"].parse::<f64>().is_ok());
        assert!(!row["update_time"].is_empty());
    }

    let scores = score(&store, &table, Scorer::Entities, 4).unwrap();
    assert_eq!(scores[0].rows, 2);
    assert_eq!(scores[0].mean, 0.75);

    let again = score(&store, &table, Scorer::Entities, 4).unwrap();
    assert_eq!(again[0].rows, 0);
}

#[test]
fn columns_without_a_model_are_skipped() {
    let store = MemoryStore::default();
    let table = BenchmarkTable::new("bench", vec!["unknown".to_string()]);
    import(&store, &table, &answers(), &prompts()).unwrap();
    let before = *store.inserts.lock().unwrap();

    let reports = query_models(&store, &table, &Kidney, &BTreeMap::new(), 1, &JsonOutput).unwrap();
    assert!(reports.is_empty());
    assert_eq!(*store.inserts.lock().unwrap(), before);
}
