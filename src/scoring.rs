use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;

use serde::Serialize;
use serde_json::Value;

pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn jaccard_lists(a: &[String], b: &[String]) -> f64 {
    let a = a.iter().collect::<HashSet<_>>();
    let b = b.iter().collect::<HashSet<_>>();
    jaccard(&a, &b)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prf {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl Prf {
    pub fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Self {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            tp,
            fp,
            fn_,
        }
    }
}

pub fn prf1<T: Ord>(pred: &BTreeSet<T>, gold: &BTreeSet<T>) -> Prf {
    let tp = pred.intersection(gold).count();
    let fp = pred.difference(gold).count();
    let fn_ = gold.difference(pred).count();
    Prf::from_counts(tp, fp, fn_)
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Jaccard over the `(key, value)` pairs of two JSON objects; values compare
/// by their canonical JSON text. Non-objects and an empty union score 0.
pub fn dict_jaccard(a: &Value, b: &Value) -> f64 {
    let (Some(a), Some(b)) = (a.as_object(), b.as_object()) else {
        return 0.0;
    };
    let pairs = |map: &serde_json::Map<String, Value>| {
        map.iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect::<HashSet<_>>()
    };
    let (a, b) = (pairs(a), pairs(b));
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    jaccard(&a, &b)
}

pub fn average_dict_jaccard(a: &Value, b: &Value) -> f64 {
    let a = as_list(a);
    let b = as_list(b);
    let mut total = 0.0;
    let mut pairs = 0usize;
    for left in &a {
        for right in &b {
            total += dict_jaccard(left, right);
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        Value::Object(_) => vec![value.clone()],
        _ => Vec::new(),
    }
}

pub fn key_value_similarity(
    extracted: &[Value],
    truth: &[Value],
    keys: &[&str],
) -> BTreeMap<String, f64> {
    let values = |records: &[Value], key: &str| {
        records
            .iter()
            .filter_map(|record| record.as_object()?.get(key))
            .map(Value::to_string)
            .collect::<HashSet<_>>()
    };
    keys.iter()
        .map(|key| {
            let score = jaccard(&values(extracted, key), &values(truth, key));
            (key.to_string(), score)
        })
        .collect()
}

pub fn entity_jaccard(answer: &Value, extracted: &Value) -> f64 {
    let first = match extracted {
        Value::Array(values) => values.first(),
        Value::Object(_) => Some(extracted),
        _ => None,
    };
    let (Some(answer_map), Some(first)) = (answer.as_object(), first) else {
        return 0.0;
    };
    if answer_map.is_empty() {
        return 0.0;
    }
    let entities = |value: &Value| {
        value
            .get("entities")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(entity_text).collect::<HashSet<_>>())
            .unwrap_or_default()
    };
    jaccard(&entities(answer), &entities(first))
}

fn entity_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub model: String,
    pub micro_p: f64,
    pub micro_r: f64,
    pub micro_f1: f64,
    pub macro_p: f64,
    pub macro_r: f64,
    pub macro_f1: f64,
    pub tp_total: usize,
    pub fp_total: usize,
    pub fn_total: usize,
    pub n_samples: usize,
}

impl Summary {
    pub fn from_rows(model: impl Into<String>, rows: &[Prf]) -> Self {
        let tp_total = rows.iter().map(|row| row.tp).sum();
        let fp_total = rows.iter().map(|row| row.fp).sum();
        let fn_total = rows.iter().map(|row| row.fn_).sum();
        let micro = Prf::from_counts(tp_total, fp_total, fn_total);
        let n = rows.len();
        let mean = |pick: fn(&Prf) -> f64| {
            if n == 0 {
                0.0
            } else {
                rows.iter().map(pick).sum::<f64>() / n as f64
            }
        };
        Self {
            model: model.into(),
            micro_p: micro.precision,
            micro_r: micro.recall,
            micro_f1: micro.f1,
            macro_p: mean(|row| row.precision),
            macro_r: mean(|row| row.recall),
            macro_f1: mean(|row| row.f1),
            tp_total,
            fp_total,
            fn_total,
            n_samples: n,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn jaccard_half_and_identity() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a"])), 0.5);
        assert_eq!(jaccard(&set(&["a"]), &set(&["a"])), 1.0);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 1.0);
    }

    #[test]
    fn prf_with_empty_prediction() {
        let gold = BTreeSet::from(["UBERON:1"]);
        let prf = prf1(&BTreeSet::new(), &gold);
        assert_eq!((prf.precision, prf.recall, prf.f1), (0.0, 0.0, 0.0));
        assert_eq!((prf.tp, prf.fp, prf.fn_), (0, 0, 1));
    }

    #[test]
    fn dict_jaccard_counts_items() {
        let a = json!({"age": "3", "sex": "male"});
        let b = json!({"age": "3", "sex": "female"});
        assert!((dict_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(dict_jaccard(&json!({}), &json!({})), 0.0);
    }

    #[test]
    fn average_promotes_single_objects() {
        let answer = json!({"age": "3"});
        let extracted = json!([{"age": "3"}, {"age": "4"}]);
        assert_eq!(average_dict_jaccard(&answer, &extracted), 0.5);
        assert_eq!(average_dict_jaccard(&answer, &json!([])), 0.0);
    }

    #[test]
    fn entity_jaccard_uses_first_object() {
        let answer = json!({"entities": ["kidney", "nephron"]});
        let extracted = json!([{"entities": ["kidney"]}, {"entities": ["nephron"]}]);
        assert_eq!(entity_jaccard(&answer, &extracted), 0.5);
        assert_eq!(entity_jaccard(&json!({}), &extracted), 0.0);
    }

    #[test]
    fn summary_micro_and_macro() {
        let rows = [Prf::from_counts(1, 0, 0), Prf::from_counts(0, 1, 1)];
        let summary = Summary::from_rows("gemma", &rows);
        assert_eq!(summary.micro_p, 0.5);
        assert_eq!(summary.macro_p, 0.5);
        assert_eq!(summary.macro_f1, 0.5);
        assert_eq!(summary.n_samples, 2);
    }
}
