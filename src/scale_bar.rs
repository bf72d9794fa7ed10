use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::MinerError;
use crate::extract::extract_entities_response;
use crate::scoring::key_value_similarity;
use crate::sheet::{Table, decode_text, inner_join, read_table, write_csv_table, write_xlsx_table};

pub const DESCRIPTOR_KEYS: [&str; 5] = ["Descriptor Type", "Value", "Units", "Notes", "Panel"];
pub const STANDARD_UNITS: [&str; 7] = ["m", "cm", "mm", "um", "nm", "angstrom", "pm"];

const BAD_UNITS: [&str; 7] = [
    "not provided",
    "not mentioned",
    "not applicable",
    "none mentioned",
    "not found",
    "not specified",
    "not explicitly mentioned",
];
const BAD_VALUE_UNITS: [&str; 7] = [
    "notprovided",
    "notspecified",
    "notmentioned",
    "notavailable",
    "nonementioned",
    "notfound",
    "unknown",
];
const BAD_VALUES: [&str; 8] = [
    "not provided",
    "not specified",
    "not mentioned",
    "not explicitly mentioned",
    "not available",
    "none mentioned",
    "not found",
    "unknown",
];

static NUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d\s,.\-]+").expect("numeric run pattern"));
static NON_NUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^ \d,.\-]+").expect("non-numeric run pattern"));

pub fn parse_truth(answer: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(answer) {
        Ok(Value::Array(values)) => values,
        Ok(value) => vec![value],
        Err(_) => Vec::new(),
    }
}

pub fn record_similarity(response: &str, answer: &str) -> BTreeMap<String, f64> {
    key_value_similarity(
        &extract_entities_response(response),
        &parse_truth(answer),
        &DESCRIPTOR_KEYS,
    )
}

pub fn similarity_column(key: &str) -> String {
    format!("{key}_similarity")
}

pub fn similarity_table(
    sample: &Table,
    responses: &Table,
    sample_name: &str,
    responses_name: &str,
) -> Result<Table, MinerError> {
    let mut joined = inner_join(
        sample,
        responses,
        ("caption", "content"),
        (sample_name, responses_name),
    )?;
    let answer = joined.index_of("Answer");
    let response = joined.index_of("response");
    let scores = (0..joined.len())
        .map(|row| {
            record_similarity(
                response.map(|column| joined.cell(row, column)).unwrap_or(""),
                answer.map(|column| joined.cell(row, column)).unwrap_or(""),
            )
        })
        .collect::<Vec<_>>();
    joined
        .headers
        .extend(DESCRIPTOR_KEYS.iter().map(|key| similarity_column(key)));
    for (row, scores) in joined.rows.iter_mut().zip(scores) {
        row.extend(
            DESCRIPTOR_KEYS
                .iter()
                .map(|key| format!("{:?}", scores.get(*key).copied().unwrap_or_default())),
        );
    }
    Ok(joined)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimilarityReport {
    pub model: String,
    pub rows: usize,
    pub means: BTreeMap<String, f64>,
    pub output: Option<PathBuf>,
}

/// Scores `<responses_dir>/<model>.xlsx` for each model against the sample
/// and writes `<out_dir>/<model>_similarity.xlsx`. Models without a
/// response file are reported with no output.
pub fn evaluate_models(
    sample_path: &Path,
    responses_dir: &Path,
    models: &[String],
    out_dir: &Path,
) -> Result<Vec<SimilarityReport>, MinerError> {
    let sample = read_table(sample_path)?;
    let sample_name = sample_path.display().to_string();
    info!(rows = sample.len(), sample = %sample_name, "sample loaded");

    let mut reports = Vec::new();
    for model in models {
        let responses_path = responses_dir.join(format!("{model}.xlsx"));
        if !responses_path.exists() {
            warn!(model, path = %responses_path.display(), "no response file");
            reports.push(SimilarityReport {
                model: model.clone(),
                ..SimilarityReport::default()
            });
            continue;
        }
        let responses = read_table(&responses_path)?;
        let table = similarity_table(
            &sample,
            &responses,
            &sample_name,
            &responses_path.display().to_string(),
        )?;
        let output = out_dir.join(format!("{model}_similarity.xlsx"));
        write_xlsx_table(&output, &table)?;

        let means = DESCRIPTOR_KEYS
            .iter()
            .map(|key| {
                let column = table.index_of(&similarity_column(key));
                let total = (0..table.len())
                    .filter_map(|row| {
                        column.and_then(|column| table.cell(row, column).parse::<f64>().ok())
                    })
                    .sum::<f64>();
                let mean = if table.is_empty() {
                    0.0
                } else {
                    total / table.len() as f64
                };
                (key.to_string(), mean)
            })
            .collect();
        info!(model, rows = table.len(), output = %output.display(), "similarity written");
        reports.push(SimilarityReport {
            model: model.clone(),
            rows: table.len(),
            means,
            output: Some(output),
        });
    }
    Ok(reports)
}

pub fn split_value(value: &str) -> (String, String) {
    let units = NUMERIC_RUN.replace_all(value, "").into_owned();
    let number = NON_NUMERIC_RUN.replace_all(value, "").replace(' ', "");
    (number, units)
}

fn is_placeholder(value: &str, placeholders: &[&str]) -> bool {
    let lowered = value.to_lowercase();
    placeholders.contains(&lowered.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct UnitDictionary {
    entries: Vec<(String, HashSet<String>)>,
}

impl UnitDictionary {
    pub fn new(entries: Vec<(String, Vec<String>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(unit, expressions)| {
                    let expressions = expressions
                        .iter()
                        .map(|expression| expression.trim().to_lowercase())
                        .collect();
                    (unit, expressions)
                })
                .collect(),
        }
    }

    /// Reads `<dir>/<unit>.csv` for every standard unit. Each file lists one
    /// spelling per line in its first column, without a header.
    pub fn from_dir(dir: &Path) -> Result<Self, MinerError> {
        let mut entries = Vec::new();
        for unit in STANDARD_UNITS {
            let path = dir.join(format!("{unit}.csv"));
            if !path.exists() {
                return Err(MinerError::MissingInput(path));
            }
            let bytes = fs::read(&path)
                .map_err(|err| MinerError::Filesystem(format!("{}: {err}", path.display())))?;
            let text = decode_text(&bytes);
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(text.as_bytes());
            let mut expressions = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|err| MinerError::Csv(err.to_string()))?;
                if let Some(first) = record.get(0) {
                    expressions.push(first.to_string());
                }
            }
            entries.push((unit.to_string(), expressions));
        }
        Ok(Self::new(entries))
    }

    pub fn standard_unit(&self, value: &str) -> Option<&str> {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(_, expressions)| expressions.contains(&value))
            .map(|(unit, _)| unit.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitCleanReport {
    pub rows: usize,
    pub standardized: usize,
}

fn column_or_insert(table: &mut Table, name: &str) -> usize {
    match table.index_of(name) {
        Some(index) => index,
        None => {
            table.headers.push(name.to_string());
            for row in &mut table.rows {
                row.push(String::new());
            }
            table.headers.len() - 1
        }
    }
}

pub fn clean_values(
    table: &mut Table,
    units: &UnitDictionary,
    source_name: &str,
) -> Result<UnitCleanReport, MinerError> {
    let value_column = table.require_column("value", source_name)?;
    let units_column = table.require_column("units", source_name)?;
    let number_column = column_or_insert(table, "value_new");
    let value_units_column = column_or_insert(table, "value_units");
    let standard_column = column_or_insert(table, "standard_unit");
    let width = table.headers.len();

    let mut report = UnitCleanReport::default();
    for row in &mut table.rows {
        row.resize(width.max(row.len()), String::new());
        let (number, value_units) = if row[value_column].is_empty() {
            (String::new(), String::new())
        } else {
            split_value(&row[value_column])
        };
        row[number_column] = number;
        row[value_units_column] = value_units;

        if is_placeholder(&row[units_column], &BAD_UNITS) {
            row[units_column].clear();
        }
        if is_placeholder(&row[value_units_column], &BAD_VALUE_UNITS) {
            row[value_units_column].clear();
        }
        if is_placeholder(&row[value_column], &BAD_VALUES) {
            row[value_column].clear();
        }

        let standard = units
            .standard_unit(&row[units_column])
            .or_else(|| units.standard_unit(&row[value_units_column]))
            .unwrap_or_default()
            .to_string();
        if !standard.is_empty() {
            report.standardized += 1;
        }
        row[standard_column] = standard;

        if row[number_column].trim().is_empty() {
            row[number_column] = row[value_column].clone();
        }
        report.rows += 1;
    }
    Ok(report)
}

pub fn clean_value_file(
    input: &Path,
    units_dir: &Path,
    output: &Path,
) -> Result<UnitCleanReport, MinerError> {
    let units = UnitDictionary::from_dir(units_dir)?;
    let mut table = read_table(input)?;
    let report = clean_values(&mut table, &units, &input.display().to_string())?;
    write_csv_table(output, &table)?;
    info!(
        rows = report.rows,
        standardized = report.standardized,
        output = %output.display(),
        "scale-bar values cleaned"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_and_units_split() {
        assert_eq!(split_value("10 μm"), ("10".to_string(), "μm".to_string()));
        assert_eq!(split_value("0.5-1 mm"), ("0.5-1".to_string(), "mm".to_string()));
        assert_eq!(split_value("Not provided"), (String::new(), "Notprovided".to_string()));
    }

    #[test]
    fn truth_accepts_single_record() {
        assert_eq!(parse_truth(r#"{"Value": "10"}"#).len(), 1);
        assert_eq!(parse_truth(r#"[{"Value": "10"}, {"Value": "5"}]"#).len(), 2);
        assert!(parse_truth("n/a").is_empty());
    }

    #[test]
    fn per_key_similarity() {
        let response = "```json\n[{\"Descriptor Type\": \"scale bar\", \"Value\": \"10\", \"Units\": \"um\"}]\n```";
        let answer = r#"{"Descriptor Type": "scale bar", "Value": "20", "Units": "um"}"#;
        let scores = record_similarity(response, answer);
        assert_eq!(scores["Descriptor Type"], 1.0);
        assert_eq!(scores["Value"], 0.0);
        assert_eq!(scores["Units"], 1.0);
        assert_eq!(scores["Notes"], 1.0);
        assert_eq!(scores.len(), 5);
    }

    #[test]
    fn unit_lookup_is_trimmed_and_case_blind() {
        let units = UnitDictionary::new(vec![
            ("mm".to_string(), vec!["mm".to_string(), " Millimeter".to_string()]),
            ("um".to_string(), vec!["μm".to_string(), "micron".to_string()]),
        ]);
        assert_eq!(units.standard_unit(" millimeter "), Some("mm"));
        assert_eq!(units.standard_unit("Micron"), Some("um"));
        assert_eq!(units.standard_unit(""), None);
        assert_eq!(units.standard_unit("inch"), None);
    }
}
