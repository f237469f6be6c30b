//! Loads and validates a curriculum YAML document into a [`Curriculum`].
//!
//! The grammar is intentionally loose (a stage can be a plain list of mix
//! entries, or a mapping with its own modifier override), so parsing goes
//! through an intermediate `serde_yaml::Value` tree rather than a single
//! rigid `Deserialize` struct — the same "parse loosely, validate
//! strictly" split the original curriculum loader uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;

use crate::curriculum::{Curriculum, Dataset, MixEntry, Stage};
use crate::modifiers::{
    Modifier, MergeModifier, NoiseModifier, PrefixModifier, RetokenizeModifier, TagModifier,
    TitleCaseModifier, TypoModifier, UpperCaseModifier,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse curriculum YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported curriculum version: {0}")]
    UnsupportedVersion(String),
    #[error("missing required key: {0}")]
    MissingKey(String),
    #[error("key {key} has the wrong type, expected {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("stage {0:?} is not declared in the `stages` list")]
    UnknownStage(String),
    #[error("dataset {0:?} is not declared in the `datasets` map")]
    UnknownDataset(String),
    #[error("malformed mix entry: {0:?}")]
    MalformedMixEntry(String),
    #[error("malformed until clause: {0:?}")]
    MalformedUntilClause(String),
    #[error("unknown modifier: {0:?}")]
    UnknownModifier(String),
    #[error("{modifier} modifier has an invalid value for parameter {name:?}")]
    InvalidParameter { modifier: &'static str, name: String },
    #[error("{modifier} modifier does not accept a parameter named {name:?}")]
    UnknownParameter { modifier: &'static str, name: String },
    #[error("failed to read curriculum file: {0}")]
    Io(#[from] std::io::Error),
}

/// Deserializes a modifier's parameter block (minus `probability`, which is
/// handled separately) into `T`, defaulting absent fields per `T`'s own
/// `Default` impl.
pub fn parse_params<T: DeserializeOwned>(params: &serde_yaml::Mapping, modifier: &'static str) -> Result<T, ConfigError> {
    serde_yaml::from_value(Value::Mapping(params.clone())).map_err(|_| ConfigError::InvalidParameter {
        modifier,
        name: "<params>".to_string(),
    })
}

pub struct CurriculumLoader;

impl CurriculumLoader {
    pub fn load_str(yaml: &str, basepath: &Path) -> Result<Curriculum, ConfigError> {
        let doc: Value = serde_yaml::from_str(yaml)?;
        let version = doc
            .get("version")
            .map(value_to_version_string)
            .unwrap_or_else(|| "1".to_string());
        match version.as_str() {
            "1" => CurriculumV1Loader::load(&doc, basepath),
            other => Err(ConfigError::UnsupportedVersion(other.to_string())),
        }
    }

    pub fn load_file(path: &Path) -> Result<Curriculum, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        let basepath = path.parent().unwrap_or_else(|| Path::new("."));
        Self::load_str(&yaml, basepath)
    }
}

fn value_to_version_string(v: &Value) -> String {
    match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

struct CurriculumV1Loader;

impl CurriculumV1Loader {
    fn load(doc: &Value, basepath: &Path) -> Result<Curriculum, ConfigError> {
        let seed = doc
            .get("seed")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConfigError::MissingKey("seed".to_string()))?;

        let num_fields = doc.get("num_fields").and_then(Value::as_u64).map(|n| n as u32);

        let datasets = Self::load_datasets(doc, basepath)?;
        let stage_order = Self::load_stage_order(doc)?;

        let default_modifiers = match doc.get("modifiers") {
            Some(value) => Arc::new(Self::load_modifiers(value, basepath)?),
            None => Arc::new(Vec::new()),
        };
        crate::modifiers::validate_chain(&default_modifiers);

        let stages = Self::load_stages(doc, basepath, &stage_order, &datasets)?;

        let trainer_command = match doc.get("trainer").and_then(Value::as_str) {
            Some(command) => Some(shell_split(command)),
            None => None,
        };

        Ok(Curriculum {
            seed,
            num_fields,
            datasets,
            stages,
            stage_order,
            modifiers: default_modifiers,
            trainer_command,
        })
    }

    fn load_datasets(doc: &Value, basepath: &Path) -> Result<HashMap<String, Dataset>, ConfigError> {
        let mapping = doc
            .get("datasets")
            .and_then(Value::as_mapping)
            .ok_or_else(|| ConfigError::MissingKey("datasets".to_string()))?;

        let mut datasets = HashMap::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| ConfigError::WrongType {
                    key: "datasets.<key>".to_string(),
                    expected: "string",
                })?
                .to_string();
            let path_str = value.as_str().ok_or_else(|| ConfigError::WrongType {
                key: format!("datasets.{name}"),
                expected: "string",
            })?;
            let path = resolve_path(basepath, path_str);
            datasets.insert(
                name.clone(),
                Dataset {
                    name,
                    files: vec![path],
                },
            );
        }
        Ok(datasets)
    }

    fn load_stage_order(doc: &Value) -> Result<Vec<String>, ConfigError> {
        let list = doc
            .get("stages")
            .and_then(Value::as_sequence)
            .ok_or_else(|| ConfigError::MissingKey("stages".to_string()))?;
        list.iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::WrongType {
                        key: "stages.<entry>".to_string(),
                        expected: "string",
                    })
            })
            .collect()
    }

    fn load_stages(
        doc: &Value,
        basepath: &Path,
        stage_order: &[String],
        datasets: &HashMap<String, Dataset>,
    ) -> Result<HashMap<String, Stage>, ConfigError> {
        let mut stages = HashMap::with_capacity(stage_order.len());
        for name in stage_order {
            let body = doc
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UnknownStage(name.clone()))?;
            let stage = Self::load_stage(body, basepath, name, datasets)?;
            stages.insert(name.clone(), stage);
        }
        Ok(stages)
    }

    fn load_stage(
        body: &Value,
        basepath: &Path,
        name: &str,
        datasets: &HashMap<String, Dataset>,
    ) -> Result<Stage, ConfigError> {
        let (mix_entries, modifiers_value): (&[Value], Option<&Value>) = match body {
            Value::Sequence(seq) => (seq.as_slice(), None),
            Value::Mapping(map) => {
                let mix = map
                    .get("mix")
                    .and_then(Value::as_sequence)
                    .ok_or_else(|| ConfigError::MissingKey(format!("{name}.mix")))?;
                (mix.as_slice(), map.get("modifiers"))
            }
            _ => {
                return Err(ConfigError::WrongType {
                    key: name.to_string(),
                    expected: "list or mapping",
                })
            }
        };

        if mix_entries.is_empty() {
            return Err(ConfigError::MalformedMixEntry(format!("stage {name:?} has no entries")));
        }

        let (until_entry, mix_entries) = mix_entries.split_last().unwrap();
        let until_text = until_entry
            .as_str()
            .ok_or_else(|| ConfigError::MalformedUntilClause(format!("{until_entry:?}")))?;
        let (until_dataset, until_epoch) = parse_until_clause(until_text)?;
        if !datasets.contains_key(&until_dataset) {
            return Err(ConfigError::UnknownDataset(until_dataset));
        }

        let mut mix = Vec::with_capacity(mix_entries.len());
        for entry in mix_entries {
            let text = entry.as_str().ok_or_else(|| ConfigError::MalformedMixEntry(format!("{entry:?}")))?;
            let (dataset_name, weight) = parse_mix_entry(text)?;
            let dataset = datasets
                .get(&dataset_name)
                .cloned()
                .ok_or(ConfigError::UnknownDataset(dataset_name))?;
            mix.push(MixEntry { dataset, weight });
        }

        if !mix.iter().any(|entry| entry.dataset.name == until_dataset && entry.weight > 0.0) {
            return Err(ConfigError::MalformedUntilClause(format!(
                "stage {name:?}: until-dataset {until_dataset:?} must appear in the mix with a positive weight"
            )));
        }

        let modifiers = match modifiers_value {
            Some(value) => {
                let chain = Self::load_modifiers(value, basepath)?;
                crate::modifiers::validate_chain(&chain);
                Some(Arc::new(chain))
            }
            None => None,
        };

        Ok(Stage {
            name: name.to_string(),
            mix,
            until_dataset,
            until_epoch,
            modifiers,
        })
    }

    fn load_modifiers(value: &Value, basepath: &Path) -> Result<Vec<Box<dyn Modifier>>, ConfigError> {
        let list = value.as_sequence().ok_or_else(|| ConfigError::WrongType {
            key: "modifiers".to_string(),
            expected: "list",
        })?;
        list.iter().map(|entry| Self::load_modifier(entry, basepath)).collect()
    }

    fn load_modifier(entry: &Value, basepath: &Path) -> Result<Box<dyn Modifier>, ConfigError> {
        let mapping = entry.as_mapping().ok_or_else(|| ConfigError::WrongType {
            key: "modifiers.<entry>".to_string(),
            expected: "mapping",
        })?;
        if mapping.len() != 1 {
            return Err(ConfigError::WrongType {
                key: "modifiers.<entry>".to_string(),
                expected: "single-key mapping",
            });
        }
        let (name_value, body) = mapping.iter().next().unwrap();
        let name = name_value.as_str().ok_or_else(|| ConfigError::WrongType {
            key: "modifiers.<entry>".to_string(),
            expected: "string key",
        })?;

        let (probability, params) = match body {
            Value::Number(n) => (n.as_f64().unwrap_or(0.0), serde_yaml::Mapping::new()),
            Value::Mapping(map) => {
                let probability = map
                    .get("probability")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ConfigError::MissingKey(format!("{name}.probability")))?;
                let mut rest = map.clone();
                rest.remove("probability");
                (probability, rest)
            }
            _ => {
                return Err(ConfigError::WrongType {
                    key: name.to_string(),
                    expected: "number or mapping",
                })
            }
        };

        build_modifier(name, probability, &params, basepath)
    }
}

fn build_modifier(
    name: &str,
    probability: f64,
    params: &serde_yaml::Mapping,
    _basepath: &Path,
) -> Result<Box<dyn Modifier>, ConfigError> {
    match name {
        "UpperCase" => Ok(Box::new(UpperCaseModifier::new(probability))),
        "TitleCase" => Ok(Box::new(TitleCaseModifier::new(probability))),
        "Prefix" => Ok(Box::new(PrefixModifier::from_params(probability, params)?)),
        "Merge" => Ok(Box::new(MergeModifier::from_params(probability, params)?)),
        "Noise" => Ok(Box::new(NoiseModifier::from_params(probability, params)?)),
        "Typos" => Ok(Box::new(TypoModifier::from_params(probability, params)?)),
        "Tags" => Ok(Box::new(TagModifier::from_params(probability, params)?)),
        "Retokenize" => Ok(Box::new(RetokenizeModifier::from_params(probability, params)?)),
        other => Err(ConfigError::UnknownModifier(other.to_string())),
    }
}

/// Splits a `trainer` command string into argv, honoring single and double
/// quotes but no other shell syntax (no escapes, globs, or substitution).
fn shell_split(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn resolve_path(basepath: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        basepath.join(path)
    }
}

/// `"clean 0.8"` -> `("clean", 0.8)`
fn parse_mix_entry(text: &str) -> Result<(String, f64), ConfigError> {
    let mut parts = text.split_whitespace();
    let dataset = parts.next().ok_or_else(|| ConfigError::MalformedMixEntry(text.to_string()))?;
    let weight_str = parts.next().ok_or_else(|| ConfigError::MalformedMixEntry(text.to_string()))?;
    if parts.next().is_some() {
        return Err(ConfigError::MalformedMixEntry(text.to_string()));
    }
    let weight: f64 = weight_str
        .parse()
        .map_err(|_| ConfigError::MalformedMixEntry(text.to_string()))?;
    // Zero is a valid weight (spec.md \S9: "some callers depend on being
    // able to pass 0.0"); only negative weights are malformed.
    if weight < 0.0 {
        return Err(ConfigError::MalformedMixEntry(text.to_string()));
    }
    Ok((dataset.to_string(), weight))
}

/// `"until clean 2"` -> `("clean", Some(2))`, `"until clean inf"` -> `("clean", None)`
fn parse_until_clause(text: &str) -> Result<(String, Option<u64>), ConfigError> {
    let mut parts = text.split_whitespace();
    let keyword = parts.next().ok_or_else(|| ConfigError::MalformedUntilClause(text.to_string()))?;
    if keyword != "until" {
        return Err(ConfigError::MalformedUntilClause(text.to_string()));
    }
    let dataset = parts.next().ok_or_else(|| ConfigError::MalformedUntilClause(text.to_string()))?;
    let epochs = parts.next().ok_or_else(|| ConfigError::MalformedUntilClause(text.to_string()))?;
    if parts.next().is_some() {
        return Err(ConfigError::MalformedUntilClause(text.to_string()));
    }
    if epochs == "inf" {
        return Ok((dataset.to_string(), None));
    }
    let epochs: u64 = epochs
        .parse()
        .map_err(|_| ConfigError::MalformedUntilClause(text.to_string()))?;
    Ok((dataset.to_string(), Some(epochs)))
}
