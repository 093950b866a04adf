//! Agent configuration trees.
//!
//! A configuration is a map of named leaves. Every leaf is tagged with its
//! kind so that crossover and mutation can be exhaustive matches rather than
//! runtime type inspection:
//!
//! - [`ConfigValue::Numeric`] carries an optional range and step
//! - [`ConfigValue::Boolean`]
//! - [`ConfigValue::Categorical`] carries its allowed choices
//! - [`ConfigValue::Nested`] holds a sub-tree
//!
//! Keys are kept in a `BTreeMap` so iteration order (and therefore seeded
//! mutation) is deterministic.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A numeric hyperparameter with optional bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericParam {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Largest single mutation step; mutation scales to the value otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Round to whole numbers after every change
    #[serde(default)]
    pub integer: bool,
}

impl NumericParam {
    /// Unbounded parameter
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            value,
            min: None,
            max: None,
            step: None,
            integer: false,
        }
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    #[must_use]
    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }

    /// Bring a candidate value inside this parameter's constraints.
    #[must_use]
    pub fn constrain(&self, candidate: f64) -> f64 {
        let mut v = candidate;
        if self.integer {
            v = v.round();
        }
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

/// A choice among a closed set of labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParam {
    pub value: String,
    pub choices: Vec<String>,
}

impl CategoricalParam {
    #[must_use]
    pub fn new(value: impl Into<String>, choices: &[&str]) -> Self {
        Self {
            value: value.into(),
            choices: choices.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// One configuration leaf or sub-tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Numeric(NumericParam),
    Boolean(bool),
    Categorical(CategoricalParam),
    Nested(ConfigTree),
}

impl ConfigValue {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConfigValue::Numeric(_) => "numeric",
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Categorical(_) => "categorical",
            ConfigValue::Nested(_) => "nested",
        }
    }

    /// Plain JSON rendering as handed to agent processes
    #[must_use]
    pub fn to_plain_json(&self) -> Value {
        match self {
            ConfigValue::Numeric(n) if n.integer => {
                #[allow(clippy::cast_possible_truncation)]
                let whole = n.value as i64;
                Value::from(whole)
            }
            ConfigValue::Numeric(n) => Value::from(n.value),
            ConfigValue::Boolean(b) => Value::Bool(*b),
            ConfigValue::Categorical(c) => Value::String(c.value.clone()),
            ConfigValue::Nested(tree) => tree.to_plain_json(),
        }
    }
}

/// An agent's hyperparameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree(BTreeMap<String, ConfigValue>);

impl ConfigTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        self.0.insert(key.into(), value)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_numeric(self, key: impl Into<String>, param: NumericParam) -> Self {
        self.with(key, ConfigValue::Numeric(param))
    }

    #[must_use]
    pub fn with_bool(self, key: impl Into<String>, value: bool) -> Self {
        self.with(key, ConfigValue::Boolean(value))
    }

    #[must_use]
    pub fn with_choice(self, key: impl Into<String>, param: CategoricalParam) -> Self {
        self.with(key, ConfigValue::Categorical(param))
    }

    #[must_use]
    pub fn with_nested(self, key: impl Into<String>, tree: ConfigTree) -> Self {
        self.with(key, ConfigValue::Nested(tree))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.0.get_mut(key)
    }

    /// Look up a dotted path such as `"optimizer.lr"`
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            match current {
                ConfigValue::Nested(tree) => current = tree.0.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Numeric value at a dotted path
    #[must_use]
    pub fn numeric(&self, path: &str) -> Option<f64> {
        match self.get_path(path)? {
            ConfigValue::Numeric(n) => Some(n.value),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ConfigValue)> {
        self.0.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check every leaf against its own constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the dotted path of the
    /// first offending leaf.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_at("")
    }

    fn validate_at(&self, prefix: &str) -> Result<(), ConfigError> {
        for (key, value) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if key.is_empty() || key.contains('.') {
                return Err(ConfigError::invalid(&path, "keys must be non-empty and contain no '.'"));
            }
            match value {
                ConfigValue::Numeric(n) => validate_numeric(&path, n)?,
                ConfigValue::Boolean(_) => {}
                ConfigValue::Categorical(c) => validate_categorical(&path, c)?,
                ConfigValue::Nested(tree) => tree.validate_at(&path)?,
            }
        }
        Ok(())
    }

    /// Build a tree from plain JSON: numbers become unbounded numeric leaves,
    /// strings become single-choice categoricals, objects nest. `null` entries
    /// are treated as absent.
    ///
    /// # Errors
    ///
    /// Arrays and non-object roots are rejected.
    pub fn from_plain_json(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Self::from_plain_map(map, ""),
            other => Err(ConfigError::Malformed(format!(
                "config must be an object, got {other}"
            ))),
        }
    }

    fn from_plain_map(map: &Map<String, Value>, prefix: &str) -> Result<Self, ConfigError> {
        let mut tree = ConfigTree::new();
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            let leaf = match value {
                Value::Null => continue,
                Value::Bool(b) => ConfigValue::Boolean(*b),
                Value::Number(n) => {
                    let v = n
                        .as_f64()
                        .ok_or_else(|| ConfigError::invalid(&path, "number out of range"))?;
                    let mut param = NumericParam::new(v);
                    param.integer = n.is_i64() || n.is_u64();
                    ConfigValue::Numeric(param)
                }
                Value::String(s) => ConfigValue::Categorical(CategoricalParam {
                    value: s.clone(),
                    choices: vec![s.clone()],
                }),
                Value::Object(inner) => ConfigValue::Nested(Self::from_plain_map(inner, &path)?),
                Value::Array(_) => {
                    return Err(ConfigError::invalid(&path, "arrays are not supported"))
                }
            };
            tree.insert(key.clone(), leaf);
        }
        Ok(tree)
    }

    /// Plain JSON object with only the current values
    #[must_use]
    pub fn to_plain_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_plain_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, ConfigValue)> for ConfigTree {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn validate_numeric(path: &str, n: &NumericParam) -> Result<(), ConfigError> {
    if !n.value.is_finite() {
        return Err(ConfigError::invalid(path, "value must be finite"));
    }
    if let (Some(min), Some(max)) = (n.min, n.max) {
        if min > max {
            return Err(ConfigError::invalid(path, format!("min {min} exceeds max {max}")));
        }
    }
    if n.min.is_some_and(|min| n.value < min) || n.max.is_some_and(|max| n.value > max) {
        return Err(ConfigError::invalid(
            path,
            format!("value {} outside its range", n.value),
        ));
    }
    if let Some(step) = n.step {
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::invalid(path, "step must be positive"));
        }
    }
    if n.integer && n.value.fract() != 0.0 {
        return Err(ConfigError::invalid(path, "integer parameter has a fractional value"));
    }
    Ok(())
}

fn validate_categorical(path: &str, c: &CategoricalParam) -> Result<(), ConfigError> {
    if c.choices.is_empty() {
        return Err(ConfigError::invalid(path, "no choices declared"));
    }
    if !c.choices.contains(&c.value) {
        return Err(ConfigError::invalid(
            path,
            format!("`{}` is not one of the declared choices", c.value),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    if !c.choices.iter().all(|choice| seen.insert(choice)) {
        return Err(ConfigError::invalid(path, "duplicate choices"));
    }
    Ok(())
}
