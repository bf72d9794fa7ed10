use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MinerError;

pub const OTHERS: &str = "others";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TagDomain {
    Age,
    Sex,
    Bmi,
    Species,
}

impl TagDomain {
    pub fn key(&self) -> &'static str {
        match self {
            TagDomain::Age => "age",
            TagDomain::Sex => "sex",
            TagDomain::Bmi => "bmi",
            TagDomain::Species => "species",
        }
    }

    pub fn categories(&self) -> &'static [&'static str] {
        match self {
            TagDomain::Age => &["prenatal", "postnatal", "unknown"],
            TagDomain::Sex => &["male", "female", "both male and female", "Hermaphrodite"],
            TagDomain::Bmi => &["Underweight", "Normal weight", "Overweight", "Obesity"],
            TagDomain::Species => &[
                "Homo sapiens",
                "Mus musculus",
                "Rattus norvegicus",
                "Sus scrofa",
                "Gadus morhua",
            ],
        }
    }
}

impl fmt::Display for TagDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TagDomain {
    type Err = MinerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "age" => Ok(TagDomain::Age),
            "sex" => Ok(TagDomain::Sex),
            "bmi" => Ok(TagDomain::Bmi),
            "species" => Ok(TagDomain::Species),
            _ => Err(MinerError::InvalidDomain(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn others() -> Self {
        Self(vec![OTHERS.to_string()])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_others(&self) -> bool {
        self.0.len() == 1 && self.0[0] == OTHERS
    }

    pub fn is_singleton(&self) -> bool {
        self.0.len() == 1
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Parses a stored `json_rs` cell. Older sheets carry Python list
    /// literals (`['male']`), so single quotes are accepted too.
    pub fn parse_cell(cell: &str) -> Result<Self, MinerError> {
        let trimmed = cell.trim();
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            return Ok(Self(values.into_iter().map(value_text).collect()));
        }
        let requoted = requote_python_literal(trimmed);
        serde_json::from_str::<Vec<serde_json::Value>>(&requoted)
            .map(|values| Self(values.into_iter().map(value_text).collect()))
            .map_err(|_| MinerError::InvalidLabels(cell.to_string()))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

pub(crate) fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

pub(crate) fn requote_python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                out.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            '"' if in_single => out.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    Classified,
    /// Every attempt failed; the item carries `["others"]` but is retryable.
    Unresolved,
}

impl ClassificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Classified => "classified",
            ClassificationStatus::Unresolved => "unresolved",
        }
    }
}

impl FromStr for ClassificationStatus {
    type Err = MinerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" | "classified" => Ok(ClassificationStatus::Classified),
            "unresolved" => Ok(ClassificationStatus::Unresolved),
            other => Err(MinerError::InvalidLabels(format!("unknown status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub item: String,
    pub labels: Labels,
    pub status: ClassificationStatus,
}

impl Classification {
    pub fn classified(item: impl Into<String>, labels: Labels) -> Self {
        Self {
            item: item.into(),
            labels,
            status: ClassificationStatus::Classified,
        }
    }

    pub fn unresolved(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            labels: Labels::others(),
            status: ClassificationStatus::Unresolved,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.status == ClassificationStatus::Unresolved
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pmcid(String);

impl Pmcid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pmcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pmcid {
    type Err = MinerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix("PMC").unwrap_or("");
        let is_valid = !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(MinerError::InvalidPmcid(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

pub type RoundNumber = u32;
