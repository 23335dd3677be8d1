//! Sweep parameter grid

use crate::error::{DatamodelerError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// One hyperparameter and the candidate values it may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Cartesian grid over named parameters, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSpace {
    parameters: Vec<Parameter>,
}

impl SweepSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter with its candidate values
    pub fn add(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Build from a mapping of `name -> [values]`; a scalar is a one-value list
    pub fn from_mapping(params: &Mapping) -> Result<Self> {
        let mut space = Self::new();
        for (key, value) in params {
            let name = key
                .as_str()
                .ok_or_else(|| DatamodelerError::InvalidParameter {
                    name: "sweep.params".to_string(),
                    value: format!("{:?}", key),
                    reason: "parameter names must be strings".to_string(),
                })?
                .to_string();

            let values = match value {
                Value::Sequence(seq) => seq.clone(),
                other => vec![other.clone()],
            };
            if values.is_empty() {
                return Err(DatamodelerError::InvalidParameter {
                    name: name.clone(),
                    value: "[]".to_string(),
                    reason: "sweep parameter needs at least one candidate".to_string(),
                });
            }
            space.parameters.push(Parameter::new(name, values));
        }
        Ok(space)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Number of grid points
    pub fn len(&self) -> usize {
        if self.parameters.is_empty() {
            return 0;
        }
        self.parameters.iter().map(|p| p.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid point at a flat index; the last parameter varies fastest
    pub fn point(&self, mut index: usize) -> Option<Mapping> {
        if index >= self.len() {
            return None;
        }
        let mut picks = vec![0usize; self.parameters.len()];
        for (slot, parameter) in picks.iter_mut().zip(&self.parameters).rev() {
            let n = parameter.values.len();
            *slot = index % n;
            index /= n;
        }

        let mut point = Mapping::new();
        for (parameter, pick) in self.parameters.iter().zip(picks) {
            point.insert(
                Value::String(parameter.name.clone()),
                parameter.values[pick].clone(),
            );
        }
        Some(point)
    }

    /// Every grid point, in order
    pub fn grid(&self) -> Vec<Mapping> {
        (0..self.len()).filter_map(|i| self.point(i)).collect()
    }
}

/// Overlay `overrides` on top of `base`, key by key
pub fn merge_params(base: &Mapping, overrides: &Mapping) -> Mapping {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
