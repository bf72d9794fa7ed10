use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use rayon::prelude::*;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::value_text;
use crate::error::MinerError;
use crate::providers::Downloader;
use crate::sheet::{Table, read_xlsx_table, write_xlsx_table};

pub const DUMP_URL: &str = "https://ftp.ebi.ac.uk/pub/databases/spot/ols/latest/ontologies.json.gz";
pub const CHUNK_ROWS: usize = 500;

const CURIE_COLUMN: &str = "curie.value";
const RDFS_LABEL_COLUMN: &str = "http://www.w3.org/2000/01/rdf-schema#label.value";
const LABEL_COLUMN: &str = "label.value";
const DEFINITION_COLUMNS: [&str; 11] = [
    "definition.type",
    "definition.datatype",
    "definition.value",
    "definition.lang",
    "definitionProperty.type",
    "definitionProperty.value",
    "definition",
    "definitionProperty",
    "definition.value.type",
    "definition.value.value",
    "definition.axioms",
];

pub fn flatten(value: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let name = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    match child {
                        Value::Object(inner) if !inner.is_empty() => walk(&name, child, out),
                        Value::Null => out.push((name, String::new())),
                        other => out.push((name, value_text(other.clone()))),
                    }
                }
            }
            Value::Null => {}
            other => out.push((prefix.to_string(), value_text(other.clone()))),
        }
    }
    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}

pub fn normalize(records: &[Value]) -> Table {
    let flattened = records.iter().map(flatten).collect::<Vec<_>>();
    let mut positions = HashMap::new();
    let mut headers = Vec::new();
    for record in &flattened {
        for (key, _) in record {
            if !positions.contains_key(key) {
                positions.insert(key.clone(), headers.len());
                headers.push(key.clone());
            }
        }
    }
    let mut table = Table::new(headers.clone());
    for record in flattened {
        let mut row = vec![String::new(); headers.len()];
        for (key, value) in record {
            if let Some(&position) = positions.get(&key) {
                row[position] = value;
            }
        }
        table.push(row);
    }
    table
}

pub fn part_file(out_dir: &Path, ontology: usize, part: usize) -> PathBuf {
    out_dir.join(format!("classes_output_ontology_{ontology}_part_{part}.xlsx"))
}

pub fn parse_part_name(name: &str) -> Option<(usize, usize)> {
    let rest = name
        .strip_prefix("classes_output_ontology_")?
        .strip_suffix(".xlsx")?;
    let (ontology, part) = rest.split_once("_part_")?;
    Some((ontology.parse().ok()?, part.parse().ok()?))
}

pub fn write_parts(out_dir: &Path, ontology: usize, table: &Table) -> Result<Vec<PathBuf>, MinerError> {
    let mut files = Vec::new();
    for (index, rows) in table.rows.chunks(CHUNK_ROWS).enumerate() {
        let chunk = Table {
            headers: table.headers.clone(),
            rows: rows.to_vec(),
        };
        let path = part_file(out_dir, ontology, index + 1);
        write_xlsx_table(&path, &chunk)?;
        files.push(path);
    }
    Ok(files)
}

struct DumpFile<'a, F> {
    on_ontology: &'a mut F,
}

struct OntologyList<'a, F> {
    on_ontology: &'a mut F,
}

impl<'de, F> DeserializeSeed<'de> for DumpFile<'_, F>
where
    F: FnMut(usize, Value) -> Result<bool, MinerError>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for DumpFile<'_, F>
where
    F: FnMut(usize, Value) -> Result<bool, MinerError>,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an object with an `ontologies` array")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let on_ontology = self.on_ontology;
        while let Some(key) = map.next_key::<String>()? {
            if key == "ontologies" {
                map.next_value_seed(OntologyList {
                    on_ontology: &mut *on_ontology,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

impl<'de, F> DeserializeSeed<'de> for OntologyList<'_, F>
where
    F: FnMut(usize, Value) -> Result<bool, MinerError>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for OntologyList<'_, F>
where
    F: FnMut(usize, Value) -> Result<bool, MinerError>,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an array of ontologies")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let on_ontology = self.on_ontology;
        let mut index = 0;
        while let Some(ontology) = seq.next_element::<Value>()? {
            let more = on_ontology(index, ontology).map_err(de::Error::custom)?;
            index += 1;
            if !more {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                break;
            }
        }
        Ok(())
    }
}

pub fn for_each_ontology<R, F>(reader: R, mut on_ontology: F) -> Result<(), MinerError>
where
    R: Read,
    F: FnMut(usize, Value) -> Result<bool, MinerError>,
{
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    DumpFile {
        on_ontology: &mut on_ontology,
    }
    .deserialize(&mut deserializer)
    .map_err(|err| MinerError::Json(err.to_string()))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub ontologies: usize,
    pub empty: Vec<usize>,
    pub files: Vec<PathBuf>,
}

pub fn export_classes<R: Read>(
    gz: R,
    start: usize,
    end: Option<usize>,
    out_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<ExportReport, MinerError> {
    let mut report = ExportReport::default();
    let reader = BufReader::new(GzDecoder::new(gz));
    for_each_ontology(reader, |index, ontology| {
        if end.is_some_and(|end| index >= end) {
            return Ok(false);
        }
        if index < start {
            return Ok(true);
        }
        report.ontologies += 1;
        let classes = ontology
            .get("classes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if classes.is_empty() {
            info!(ontology = index, "ontology has no classes");
            report.empty.push(index);
            return Ok(true);
        }
        sink.event(ProgressEvent {
            message: format!("phase=Export; ontology {index}: {} classes", classes.len()),
            elapsed: None,
        });
        report
            .files
            .extend(write_parts(out_dir, index, &normalize(classes))?);
        Ok(true)
    })?;
    Ok(report)
}

pub fn fetch_and_export<D: Downloader>(
    downloader: &D,
    url: &str,
    gz_path: &Path,
    start: usize,
    end: Option<usize>,
    out_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<ExportReport, MinerError> {
    if !gz_path.exists() {
        sink.event(ProgressEvent {
            message: format!("phase=Download; {url}"),
            elapsed: None,
        });
        downloader.download(url, gz_path)?;
    }
    let file = File::open(gz_path)
        .map_err(|err| MinerError::Filesystem(format!("{}: {err}", gz_path.display())))?;
    export_classes(file, start, end, out_dir, sink)
}

pub fn clean_part(table: &Table) -> Table {
    let keep = [CURIE_COLUMN, RDFS_LABEL_COLUMN, LABEL_COLUMN]
        .into_iter()
        .chain(DEFINITION_COLUMNS)
        .filter(|column| table.index_of(column).is_some())
        .collect::<Vec<_>>();
    let has_definition = keep
        .iter()
        .any(|column| DEFINITION_COLUMNS.contains(column));

    let mut headers = keep.iter().map(|column| column.to_string()).collect::<Vec<_>>();
    if has_definition && !headers.iter().any(|header| header == "definition") {
        headers.push("definition".to_string());
    }
    let mut cleaned = Table::new(headers.clone());
    for row_index in 0..table.len() {
        let value = |column: &str| {
            table
                .index_of(column)
                .map(|index| table.cell(row_index, index).to_string())
                .unwrap_or_default()
        };
        let rdfs_label = value(RDFS_LABEL_COLUMN);
        let mut row = headers
            .iter()
            .map(|header| match header.as_str() {
                LABEL_COLUMN => {
                    let label = value(LABEL_COLUMN);
                    if label == rdfs_label { String::new() } else { label }
                }
                "definition" => {
                    let merged = DEFINITION_COLUMNS
                        .iter()
                        .filter_map(|column| {
                            let cell = value(column);
                            (!cell.is_empty()).then(|| (column.to_string(), Value::String(cell)))
                        })
                        .collect::<Map<_, _>>();
                    if merged.is_empty() {
                        String::new()
                    } else {
                        Value::Object(merged).to_string()
                    }
                }
                other => value(other),
            })
            .collect::<Vec<_>>();
        row.resize(headers.len(), String::new());
        cleaned.push(row);
    }
    drop_empty_columns(cleaned)
}

fn drop_empty_columns(table: Table) -> Table {
    let keep = (0..table.headers.len())
        .filter(|&column| table.rows.iter().any(|row| !row[column].is_empty()))
        .collect::<Vec<_>>();
    Table {
        headers: keep.iter().map(|&column| table.headers[column].clone()).collect(),
        rows: table
            .rows
            .iter()
            .map(|row| keep.iter().map(|&column| row[column].clone()).collect())
            .collect(),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    pub failed: usize,
}

pub fn clean_parts(
    in_dir: &Path,
    out_dir: &Path,
    start: usize,
    end: usize,
) -> Result<CleanReport, MinerError> {
    let entries = fs::read_dir(in_dir)
        .map_err(|err| MinerError::Filesystem(format!("{}: {err}", in_dir.display())))?;
    let mut parts = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| {
            parse_part_name(name).is_some_and(|(ontology, _)| (start..=end).contains(&ontology))
        })
        .collect::<Vec<_>>();
    parts.sort();

    let outcomes = parts
        .par_iter()
        .map(|name| -> Result<Option<PathBuf>, MinerError> {
            let target = out_dir.join(name);
            if target.exists() {
                return Ok(None);
            }
            let table = read_xlsx_table(&in_dir.join(name))?;
            write_xlsx_table(&target, &clean_part(&table))?;
            Ok(Some(target))
        })
        .collect::<Vec<_>>();

    let mut report = CleanReport::default();
    for (name, outcome) in parts.iter().zip(outcomes) {
        match outcome {
            Ok(Some(path)) => report.written.push(path),
            Ok(None) => report.skipped += 1,
            Err(err) => {
                warn!(part = name, error = %err, "failed to clean part");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
