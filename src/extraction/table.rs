use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::scoring::UnitFamily;
use crate::model::SectionKind;

pub const DEFAULT_PARAMETER_TABLE: &str = include_str!("../../tables/parameters.json");
pub const DEFAULT_FALLBACK_TABLE: &str = include_str!("../../tables/fallback_patterns.json");

const DEFAULT_COUNT_CEILING: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Float,
    Boolean,
    Enumerated,
    String,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
            ValueType::Enumerated => "enumerated",
            ValueType::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub unit_family: Option<UnitFamily>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Sections the rules run against, in preference order. Empty means all.
    #[serde(default)]
    pub sections: Vec<SectionKind>,
    #[serde(default)]
    pub max_plausible: Option<f64>,
    #[serde(default)]
    pub enum_values: Vec<EnumValue>,
    pub patterns: Vec<String>,
}

impl ParameterSpec {
    pub fn applies_to(&self, kind: SectionKind) -> bool {
        self.sections.is_empty() || self.sections.contains(&kind)
    }

    pub fn plausibility_ceiling(&self) -> Option<f64> {
        self.max_plausible.or_else(|| {
            let name = self.name.to_ascii_lowercase();
            (name.contains("trial") || name.contains("block")).then_some(DEFAULT_COUNT_CEILING)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ParameterTableFile {
    version: String,
    parameters: Vec<ParameterSpec>,
}

#[derive(Debug)]
pub struct CompiledParameter {
    pub spec: ParameterSpec,
    pub rules: Vec<Regex>,
}

#[derive(Debug)]
pub struct ParameterTable {
    version: String,
    entries: Vec<CompiledParameter>,
}

impl ParameterTable {
    pub fn load(path: Option<&Path>, embedded: &str) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read parameter table: {}", path.display()))?;
                Self::from_json_str(&raw, &path.display().to_string())
            }
            None => Self::from_json_str(embedded, "embedded table"),
        }
    }

    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self> {
        let file: ParameterTableFile = serde_json::from_str(raw)
            .with_context(|| format!("failed to parse parameter table: {origin}"))?;

        let mut seen = BTreeSet::<String>::new();
        let mut entries = Vec::with_capacity(file.parameters.len());
        for spec in file.parameters {
            if !seen.insert(spec.name.clone()) {
                bail!("duplicate parameter '{}' in {origin}", spec.name);
            }
            if spec.patterns.is_empty() {
                bail!("parameter '{}' in {origin} has no patterns", spec.name);
            }
            if spec.value_type == ValueType::Enumerated && spec.enum_values.is_empty() {
                bail!("enumerated parameter '{}' in {origin} has no values", spec.name);
            }

            let mut rules = Vec::with_capacity(spec.patterns.len());
            for (index, pattern) in spec.patterns.iter().enumerate() {
                rules.push(Regex::new(&format!("(?i){pattern}")).with_context(|| {
                    format!("failed to compile pattern {index} of '{}' in {origin}", spec.name)
                })?);
            }
            entries.push(CompiledParameter { spec, rules });
        }

        Ok(Self {
            version: file.version,
            entries,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[CompiledParameter] {
        &self.entries
    }

    pub fn section_preferences(&self) -> BTreeMap<String, Vec<SectionKind>> {
        self.entries
            .iter()
            .filter(|entry| !entry.spec.sections.is_empty())
            .map(|entry| (entry.spec.name.clone(), entry.spec.sections.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&CompiledParameter> {
        self.entries.iter().find(|entry| entry.spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                let spec = &entry.spec;
                let mut line = format!("- {} ({})", spec.name, spec.value_type.as_str());
                if !spec.description.is_empty() {
                    line.push_str(": ");
                    line.push_str(&spec.description);
                }
                if !spec.enum_values.is_empty() {
                    let values = spec
                        .enum_values
                        .iter()
                        .map(|value| value.value.as_str())
                        .collect::<Vec<&str>>()
                        .join(" | ");
                    line.push_str(&format!(" [one of: {values}]"));
                }
                line
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}
