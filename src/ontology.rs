use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::domain::{requote_python_literal, value_text};
use crate::error::MinerError;
use crate::scoring::{Summary, prf1};
use crate::sheet::{Table, read_csv_table, write_csv_table};

const GREEK: [(char, &str); 14] = [
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('κ', "kappa"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('π', "pi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('τ', "tau"),
    ('φ', "phi"),
    ('ω', "omega"),
];

static PARENTHESISED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("parenthesis pattern"));
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;,/]").expect("separator pattern"));
static OF_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bof\b(.+)$").expect("of-tail pattern"));
static LEADING_ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(the|a|an)\s+").expect("article pattern"));

pub fn normalize_term(term: &str) -> String {
    let term = term.trim();
    if term.is_empty() {
        return String::new();
    }
    let mut spelled = String::with_capacity(term.len());
    for ch in term.nfkd().filter(|ch| !is_combining_mark(*ch)) {
        match GREEK.iter().find(|(letter, _)| *letter == ch) {
            Some((_, name)) => spelled.push_str(name),
            None => spelled.push(ch),
        }
    }
    PARENTHESISED
        .replace_all(&spelled, " ")
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        .collect()
}

pub fn entity_variants(entity: &str) -> Vec<String> {
    let entity = entity.trim();
    if entity.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![entity.to_string()];
    variants.extend(
        SEPARATORS
            .split(entity)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string),
    );
    if let Some(tail) = OF_TAIL.captures(entity).and_then(|captures| captures.get(1)) {
        let tail = LEADING_ARTICLE.replace(tail.as_str().trim(), "");
        let tail = tail.trim();
        if !tail.is_empty() {
            variants.push(tail.to_string());
        }
    }
    let mut seen = HashSet::new();
    variants.retain(|variant| seen.insert(variant.clone()));
    variants
}

pub fn parse_entities(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Vec::new();
    }
    let parsed = serde_json::from_str::<Value>(cell)
        .or_else(|_| serde_json::from_str::<Value>(&requote_python_literal(cell)));
    let Ok(value) = parsed else {
        return vec![cell.to_string()];
    };

    let entities = match value {
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| match item {
                Value::Object(map) => match map.get("entities") {
                    Some(Value::Array(values)) => values.iter().cloned().map(value_text).collect(),
                    Some(Value::String(text)) => split_listing(text),
                    _ => Vec::new(),
                },
                Value::String(text) => vec![text],
                _ => Vec::new(),
            })
            .collect::<Vec<_>>(),
        Value::Object(map) => match map.get("entities") {
            Some(Value::Array(values)) => values.iter().cloned().map(value_text).collect(),
            Some(Value::String(text)) => split_listing(text),
            _ => Vec::new(),
        },
        Value::String(text) => vec![text],
        _ => Vec::new(),
    };
    entities
        .into_iter()
        .map(|entity| entity.trim().to_string())
        .filter(|entity| !entity.is_empty())
        .collect()
}

fn split_listing(text: &str) -> Vec<String> {
    text.split([';', ','])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SynonymIndex {
    terms: HashMap<String, BTreeSet<String>>,
}

impl SynonymIndex {
    pub fn from_csv(path: &Path) -> Result<Self, MinerError> {
        let table = read_csv_table(path)?;
        Self::from_table(&table, &path.display().to_string())
    }

    pub fn from_table(table: &Table, source_name: &str) -> Result<Self, MinerError> {
        let mut id_column = None;
        let mut label_column = None;
        let mut synonym_column = None;
        for (index, header) in table.headers.iter().enumerate() {
            match header.trim().to_lowercase().as_str() {
                "class id" | "classid" | "id" | "iri" => id_column = Some(index),
                "preferred label" | "preferredlabel" | "label" => label_column = Some(index),
                "synonyms" | "synonym" => synonym_column = Some(index),
                _ => {}
            }
        }
        let id_column = id_column.ok_or_else(|| MinerError::MissingColumn {
            column: "Class ID".to_string(),
            source_name: source_name.to_string(),
        })?;
        let label_column = label_column.ok_or_else(|| MinerError::MissingColumn {
            column: "Preferred Label".to_string(),
            source_name: source_name.to_string(),
        })?;

        let mut index = Self::default();
        for row in 0..table.len() {
            let id = table.cell(row, id_column).trim();
            let mut candidates = vec![table.cell(row, label_column).trim()];
            if let Some(column) = synonym_column {
                candidates.extend(table.cell(row, column).split('|').map(str::trim));
            }
            for term in candidates {
                index.insert(term, id);
            }
        }
        info!(terms = index.len(), source = source_name, "synonym index built");
        Ok(index)
    }

    pub fn insert(&mut self, term: &str, id: &str) {
        let key = normalize_term(term);
        if key.is_empty() || id.is_empty() {
            return;
        }
        self.terms.entry(key).or_default().insert(id.to_string());
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn lookup(&self, entities: &[String]) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for entity in entities {
            for variant in entity_variants(entity) {
                if let Some(found) = self.terms.get(&normalize_term(&variant)) {
                    ids.extend(found.iter().cloned());
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub detailed: Table,
    pub summaries: Vec<Summary>,
}

pub fn evaluate(
    index: &SynonymIndex,
    predictions: &Table,
    gt_column: &str,
    model_columns: &[String],
    source_name: &str,
) -> Result<Evaluation, MinerError> {
    let gt_index = predictions.require_column(gt_column, source_name)?;
    let model_indices = model_columns
        .iter()
        .map(|model| predictions.require_column(model, source_name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut detailed = predictions.clone();
    detailed.headers.push("answer_UBERON_IDs".to_string());
    for model in model_columns {
        for suffix in ["UBERON_IDs", "P_id", "R_id", "F1_id", "TP_id", "FP_id", "FN_id"] {
            detailed.headers.push(format!("{model}_{suffix}"));
        }
    }

    let mut per_model = vec![Vec::with_capacity(predictions.len()); model_columns.len()];
    for (row_index, row) in detailed.rows.iter_mut().enumerate() {
        row.resize(predictions.headers.len(), String::new());
        let gold = index.lookup(&parse_entities(predictions.cell(row_index, gt_index)));
        row.push(join_ids(&gold));
        for (position, &column) in model_indices.iter().enumerate() {
            let predicted = index.lookup(&parse_entities(predictions.cell(row_index, column)));
            let prf = prf1(&predicted, &gold);
            row.push(join_ids(&predicted));
            row.extend([
                format!("{:?}", prf.precision),
                format!("{:?}", prf.recall),
                format!("{:?}", prf.f1),
                prf.tp.to_string(),
                prf.fp.to_string(),
                prf.fn_.to_string(),
            ]);
            per_model[position].push(prf);
        }
    }

    let mut summaries = model_columns
        .iter()
        .zip(&per_model)
        .map(|(model, rows)| Summary::from_rows(model.clone(), rows))
        .collect::<Vec<_>>();
    summaries.sort_by(|a, b| a.model.cmp(&b.model));
    Ok(Evaluation {
        detailed,
        summaries,
    })
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(";")
}

pub fn summary_table(summaries: &[Summary]) -> Table {
    let mut table = Table::new([
        "model", "micro_P", "micro_R", "micro_F1", "macro_P", "macro_R", "macro_F1", "TP_total",
        "FP_total", "FN_total", "n_samples",
    ]);
    for summary in summaries {
        table.push(vec![
            summary.model.clone(),
            format!("{:?}", summary.micro_p),
            format!("{:?}", summary.micro_r),
            format!("{:?}", summary.micro_f1),
            format!("{:?}", summary.macro_p),
            format!("{:?}", summary.macro_r),
            format!("{:?}", summary.macro_f1),
            summary.tp_total.to_string(),
            summary.fp_total.to_string(),
            summary.fn_total.to_string(),
            summary.n_samples.to_string(),
        ]);
    }
    table
}

pub fn write_evaluation(out: &Path, evaluation: &Evaluation) -> Result<PathBuf, MinerError> {
    write_csv_table(out, &evaluation.detailed)?;
    let stem = out
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "evaluation".to_string());
    let summary_path = out.with_file_name(format!("{stem}_summary.csv"));
    write_csv_table(&summary_path, &summary_table(&evaluation.summaries))?;
    Ok(summary_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greek_and_spelled_forms_share_a_key() {
        assert_eq!(normalize_term("α-adrenergic receptor"), "alphaadrenergicreceptor");
        assert_eq!(normalize_term("alpha adrenergic receptor"), "alphaadrenergicreceptor");
    }

    #[test]
    fn qualifiers_and_diacritics_are_dropped() {
        assert_eq!(normalize_term("Café (human)"), "cafe");
        assert_eq!(normalize_term("   "), "");
    }

    #[test]
    fn variants_include_of_tail() {
        let variants = entity_variants("cortical region of the collecting duct");
        assert_eq!(
            variants,
            vec!["cortical region of the collecting duct", "collecting duct"]
        );
    }

    #[test]
    fn variants_split_on_separators() {
        assert_eq!(entity_variants("kidney; liver"), vec!["kidney; liver", "kidney", "liver"]);
    }

    #[test]
    fn entity_cells_in_several_shapes() {
        assert_eq!(parse_entities(r#"{"entities": ["kidney"]}"#), vec!["kidney"]);
        assert_eq!(
            parse_entities(r#"[{"entities": ["a"]}, {"entities": ["b"]}]"#),
            vec!["a", "b"]
        );
        assert_eq!(parse_entities("{'entities': ['liver']}"), vec!["liver"]);
        assert_eq!(parse_entities(r#"{"entities": "a; b"}"#), vec!["a", "b"]);
        assert_eq!(parse_entities("renal cortex"), vec!["renal cortex"]);
        assert!(parse_entities("").is_empty());
    }
}
