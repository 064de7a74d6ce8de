use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Callback fired when an option value changes. It lives in the plugin's
/// code, so a module declaring one can never be unmapped.
pub type OptionCallback = fn(name: &str, value: &OptionValue);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OptionKind {
    Bool {
        default: bool,
    },
    Integer {
        default: i64,
        range: Option<(i64, i64)>,
    },
    Float {
        default: f32,
        range: Option<(f32, f32)>,
    },
    String {
        default: Option<String>,
        choices: Vec<String>,
    },
    /// Name of a module providing `capability`, resolved later by the bank.
    Module {
        capability: String,
        default: Option<String>,
    },
}

impl OptionKind {
    pub fn default_value(&self) -> OptionValue {
        match self {
            OptionKind::Bool { default } => OptionValue::Bool(*default),
            OptionKind::Integer { default, .. } => OptionValue::Integer(*default),
            OptionKind::Float { default, .. } => OptionValue::Float(*default),
            OptionKind::String { default, .. } | OptionKind::Module { default, .. } => {
                OptionValue::String(default.clone().unwrap_or_default())
            }
        }
    }

    pub fn validate(&self, name: &str, value: &OptionValue) -> Result<(), OptionError> {
        match (self, value) {
            (OptionKind::Bool { .. }, OptionValue::Bool(_)) => Ok(()),
            (OptionKind::Integer { range, .. }, OptionValue::Integer(v)) => match range {
                Some((min, max)) if v < min || v > max => Err(OptionError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                }),
                _ => Ok(()),
            },
            (OptionKind::Float { range, .. }, OptionValue::Float(v)) => match range {
                Some((min, max)) if v < min || v > max => Err(OptionError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                }),
                _ => Ok(()),
            },
            (OptionKind::String { choices, .. }, OptionValue::String(v)) => {
                if choices.is_empty() || choices.iter().any(|choice| choice == v) {
                    Ok(())
                } else {
                    Err(OptionError::InvalidChoice {
                        name: name.to_string(),
                        value: v.clone(),
                    })
                }
            }
            (OptionKind::Module { .. }, OptionValue::String(_)) => Ok(()),
            _ => Err(OptionError::WrongType {
                name: name.to_string(),
                expected: self.type_name(),
                actual: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            OptionKind::Bool { .. } => "bool",
            OptionKind::Integer { .. } => "integer",
            OptionKind::Float { .. } => "float",
            OptionKind::String { .. } => "string",
            OptionKind::Module { .. } => "module",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f32),
    String(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Integer(_) => "integer",
            OptionValue::Float(_) => "float",
            OptionValue::String(_) => "string",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Integer(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Integer(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

/// The part of an option declaration that survives without the plugin's code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionSpec {
    pub name: String,
    pub text: String,
    pub kind: OptionKind,
    /// Hidden from user-facing configuration listings.
    pub internal: bool,
    /// Never written back to a configuration file.
    pub unsaveable: bool,
    /// Kept for compatibility with old configuration files only.
    pub removed: bool,
}

impl OptionSpec {
    pub fn is_public(&self) -> bool {
        !(self.internal || self.unsaveable || self.removed)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigOption {
    pub spec: OptionSpec,
    pub callback: Option<OptionCallback>,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, text: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            spec: OptionSpec {
                name: name.into(),
                text: text.into(),
                kind,
                internal: false,
                unsaveable: false,
                removed: false,
            },
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: OptionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn internal(mut self) -> Self {
        self.spec.internal = true;
        self
    }

    pub fn unsaveable(mut self) -> Self {
        self.spec.unsaveable = true;
        self
    }

    pub fn removed(mut self) -> Self {
        self.spec.removed = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

#[derive(Debug, Error)]
pub enum OptionError {
    #[error("option `{name}` expected {expected} value but received {actual}")]
    WrongType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("option `{name}` received value {value} outside of range {min}..={max}")]
    OutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },
    #[error("option `{name}` does not accept `{value}`")]
    InvalidChoice { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn integer_range_is_enforced() {
        let kind = OptionKind::Integer {
            default: 5,
            range: Some((0, 10)),
        };
        assert!(kind.validate("depth", &OptionValue::Integer(10)).is_ok());
        assert!(matches!(
            kind.validate("depth", &OptionValue::Integer(11)),
            Err(OptionError::OutOfRange { .. })
        ));
        assert!(matches!(
            kind.validate("depth", &OptionValue::Bool(true)),
            Err(OptionError::WrongType { expected: "integer", .. })
        ));
    }

    #[test]
    fn string_choices_restrict_values() {
        let kind = OptionKind::String {
            default: Some("fast".into()),
            choices: vec!["fast".into(), "slow".into()],
        };
        assert_eq!(kind.default_value(), OptionValue::String("fast".into()));
        assert!(kind.validate("mode", &"slow".into()).is_ok());
        assert!(kind.validate("mode", &"medium".into()).is_err());
    }

    #[test]
    fn flagged_options_are_not_public() {
        let option = ConfigOption::new("secret", "Secret", OptionKind::Bool { default: false });
        assert!(option.spec.is_public());
        assert!(!option.clone().internal().spec.is_public());
        assert!(!option.clone().unsaveable().spec.is_public());
        assert!(!option.removed().spec.is_public());
    }
}
