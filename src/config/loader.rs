//! Hydra-style composition: primary file, `defaults` groups, then overrides

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RunConfig;
use crate::error::{DatamodelerError, Result};

const SELF_ENTRY: &str = "_self_";

/// A single command-line override
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    /// `a.b=value`, the key must already exist
    Set { path: Vec<String>, value: Value },
    /// `+a.b=value`, the key must not exist yet
    Add { path: Vec<String>, value: Value },
    /// `group=option`, picks another file for a defaults group
    Group { group: String, option: String },
}

/// Parse `key=value`, `+key=value` or `group=option`.
///
/// A bare key that names one of `groups` selects a group option; every other
/// override sets a value, parsed as YAML.
pub fn parse_override(raw: &str, groups: &[String]) -> Result<Override> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| DatamodelerError::ConfigError(format!("override '{}' is not of the form key=value", raw)))?;

    let (adding, key) = match key.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, key),
    };
    let path: Vec<String> = key.split('.').map(str::to_string).collect();
    if key.is_empty() || path.iter().any(String::is_empty) {
        return Err(DatamodelerError::ConfigError(format!("override '{}' has an empty key", raw)));
    }

    if !adding && path.len() == 1 && groups.iter().any(|g| g == key) {
        return Ok(Override::Group {
            group: key.to_string(),
            option: value.to_string(),
        });
    }

    let value = parse_value(value)?;
    Ok(if adding {
        Override::Add { path, value }
    } else {
        Override::Set { path, value }
    })
}

fn parse_value(raw: &str) -> Result<Value> {
    if raw.is_empty() {
        return Ok(Value::String(String::new()));
    }
    serde_yaml::from_str(raw)
        .map_err(|e| DatamodelerError::ConfigError(format!("cannot parse override value '{}': {}", raw, e)))
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

enum DefaultsEntry {
    SelfEntry,
    Group { group: String, option: Option<String> },
    File(String),
}

/// Composes a run configuration from a config directory
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: PathBuf,
    config_name: String,
}

impl ConfigLoader {
    pub fn new(config_path: impl Into<PathBuf>, config_name: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            config_name: config_name.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Composed tree with `overrides` applied
    pub fn compose(&self, overrides: &[String]) -> Result<Value> {
        let mut primary = read_yaml(&self.config_path.join(format!("{}.yaml", self.config_name)))?;
        let mut defaults = match primary.as_mapping_mut().and_then(|m| m.remove("defaults")) {
            Some(list) => parse_defaults(list)?,
            None => Vec::new(),
        };
        if !defaults.iter().any(|d| matches!(d, DefaultsEntry::SelfEntry)) {
            defaults.push(DefaultsEntry::SelfEntry);
        }

        let groups: Vec<String> = defaults
            .iter()
            .filter_map(|d| match d {
                DefaultsEntry::Group { group, .. } => Some(group.clone()),
                _ => None,
            })
            .collect();
        let overrides = overrides
            .iter()
            .map(|raw| parse_override(raw, &groups))
            .collect::<Result<Vec<_>>>()?;

        for o in &overrides {
            if let Override::Group { group, option } = o {
                for entry in defaults.iter_mut() {
                    if let DefaultsEntry::Group { group: g, option: current } = entry {
                        if g == group {
                            *current = Some(option.clone());
                        }
                    }
                }
            }
        }

        let mut composed = Value::Mapping(Mapping::new());
        let mut primary = Some(primary);
        for entry in defaults {
            match entry {
                DefaultsEntry::SelfEntry => {
                    if let Some(own) = primary.take() {
                        deep_merge(&mut composed, own);
                    }
                }
                DefaultsEntry::Group { group, option: Some(option) } => {
                    let path = self.config_path.join(&group).join(format!("{}.yaml", option));
                    let mut wrapper = Mapping::new();
                    wrapper.insert(Value::String(group), read_yaml(&path)?);
                    deep_merge(&mut composed, Value::Mapping(wrapper));
                }
                DefaultsEntry::Group { option: None, .. } => {}
                DefaultsEntry::File(name) => {
                    let path = self.config_path.join(format!("{}.yaml", name));
                    deep_merge(&mut composed, read_yaml(&path)?);
                }
            }
        }

        for o in overrides {
            apply_override(&mut composed, o)?;
        }
        Ok(composed)
    }

    /// Compose and read the typed configuration
    pub fn load(&self, overrides: &[String]) -> Result<(RunConfig, Value)> {
        let composed = self.compose(overrides)?;
        let config = RunConfig::from_value(composed.clone())?;
        Ok((config, composed))
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(DatamodelerError::ConfigError(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text)?;
    debug!(path = %path.display(), "Read config file");
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

fn parse_defaults(list: Value) -> Result<Vec<DefaultsEntry>> {
    let Value::Sequence(items) = list else {
        return Err(DatamodelerError::ConfigError("'defaults' must be a list".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) if s == SELF_ENTRY => Ok(DefaultsEntry::SelfEntry),
            Value::String(s) => Ok(DefaultsEntry::File(s)),
            Value::Mapping(m) if m.len() == 1 => {
                let (key, value) = m.into_iter().next().ok_or_else(|| {
                    DatamodelerError::ConfigError("empty defaults entry".to_string())
                })?;
                let group = key
                    .as_str()
                    .ok_or_else(|| DatamodelerError::ConfigError("defaults group must be a string".to_string()))?
                    .to_string();
                let option = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => {
                        return Err(DatamodelerError::ConfigError(format!(
                            "defaults option for '{}' must be a name, got {:?}",
                            group, other
                        )))
                    }
                };
                Ok(DefaultsEntry::Group { group, option })
            }
            other => Err(DatamodelerError::ConfigError(format!(
                "unsupported defaults entry {:?}",
                other
            ))),
        })
        .collect()
}

fn apply_override(root: &mut Value, o: Override) -> Result<()> {
    let (path, value, adding) = match o {
        Override::Set { path, value } => (path, value, false),
        Override::Add { path, value } => (path, value, true),
        Override::Group { .. } => return Ok(()),
    };
    let dotted = path.join(".");
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for key in parents {
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| DatamodelerError::ConfigError(format!("cannot override '{}': not a mapping", dotted)))?;
        if adding && !map.contains_key(key.as_str()) {
            map.insert(Value::String(key.clone()), Value::Mapping(Mapping::new()));
        }
        node = map.get_mut(key.as_str()).ok_or_else(|| {
            DatamodelerError::ConfigError(format!("cannot override '{}': key not found, use +{}=...", dotted, dotted))
        })?;
    }

    let map = node
        .as_mapping_mut()
        .ok_or_else(|| DatamodelerError::ConfigError(format!("cannot override '{}': not a mapping", dotted)))?;
    match (adding, map.contains_key(last.as_str())) {
        (false, false) => Err(DatamodelerError::ConfigError(format!(
            "cannot override '{}': key not found, use +{}=...",
            dotted, dotted
        ))),
        (true, true) => Err(DatamodelerError::ConfigError(format!(
            "cannot add '{}': key already exists",
            dotted
        ))),
        _ => {
            map.insert(Value::String(last.clone()), value);
            Ok(())
        }
    }
}
