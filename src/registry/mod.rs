pub mod catalog;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use catalog::default_registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ImageGenerate,
    ImageMutate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Url,
    ImageUrl,
    ImageUrlArray,
    Select,
    Color,
    Boolean,
    Number,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::ImageUrl => "image_url",
            Self::ImageUrlArray => "image_url_array",
            Self::Select => "select",
            Self::Color => "color",
            Self::Boolean => "boolean",
            Self::Number => "number",
        }
    }

    /// Whether `value` is an acceptable default for a field of this type.
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Text | Self::Url | Self::ImageUrl | Self::Select | Self::Color => {
                value.is_string()
            }
            Self::ImageUrlArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            field_type,
            required: false,
            default: None,
            options: None,
            hidden: false,
        }
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::new(FieldType::Text, label)
    }

    pub fn image_url(label: impl Into<String>) -> Self {
        Self::new(FieldType::ImageUrl, label)
    }

    pub fn color(label: impl Into<String>) -> Self {
        Self::new(FieldType::Color, label)
    }

    pub fn boolean(label: impl Into<String>) -> Self {
        Self::new(FieldType::Boolean, label)
    }

    pub fn select(label: impl Into<String>, options: Vec<SelectOption>) -> Self {
        Self {
            options: Some(options),
            ..Self::new(FieldType::Select, label)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Method-specific normalization run after defaults and required checks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArgsNormalizer {
    #[default]
    None,
    /// Two scalar fields that must be non-blank plus a JSON-encoded object
    /// field whose keys are layered into the final argument set.
    JsonExtras {
        backend_field: &'static str,
        prompt_field: &'static str,
        extras_field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodDescriptor {
    #[serde(rename = "name")]
    pub display_name: String,
    pub description: String,
    pub intent: Intent,
    #[serde(rename = "credits")]
    pub credit_weight: f64,
    pub fields: IndexMap<String, FieldSpec>,
    #[serde(skip)]
    pub normalizer: ArgsNormalizer,
}

impl MethodDescriptor {
    pub fn new(
        display_name: impl Into<String>,
        description: impl Into<String>,
        intent: Intent,
        credit_weight: f64,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            description: description.into(),
            intent,
            credit_weight,
            fields: IndexMap::new(),
            normalizer: ArgsNormalizer::None,
        }
    }

    /// Appends a field. A repeated name is kept as a duplicate marker so
    /// registry construction can reject it instead of silently replacing.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        let name = name.into();
        if self.fields.contains_key(name.as_str()) {
            self.fields.insert(format!("{DUPLICATE_FIELD_MARKER}{name}"), spec);
        } else {
            self.fields.insert(name, spec);
        }
        self
    }

    pub fn normalizer(mut self, normalizer: ArgsNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }
}

const DUPLICATE_FIELD_MARKER: &str = "\u{0}dup:";

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate method key '{0}'")]
    DuplicateMethod(String),
    #[error("method '{method}' declares field '{field}' more than once")]
    DuplicateField { method: String, field: String },
    #[error("method '{method}' field '{field}' is required but also declares a default")]
    RequiredWithDefault { method: String, field: String },
    #[error("method '{method}' field '{field}' default does not match type '{field_type}'")]
    DefaultTypeMismatch {
        method: String,
        field: String,
        field_type: &'static str,
    },
    #[error("method '{method}' field '{field}' is a select without options")]
    SelectWithoutOptions { method: String, field: String },
    #[error("method '{method}' field '{field}' declares options but is not a select")]
    OptionsOnNonSelect { method: String, field: String },
    #[error("method '{method}' field '{field}' repeats option value '{value}'")]
    DuplicateOptionValue {
        method: String,
        field: String,
        value: String,
    },
    #[error("method '{method}' credit weight must be a non-negative number")]
    InvalidCreditWeight { method: String },
}

/// Read-only method catalog, populated once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRegistry {
    methods: IndexMap<String, MethodDescriptor>,
}

impl CapabilityRegistry {
    pub fn new(
        entries: impl IntoIterator<Item = (String, MethodDescriptor)>,
    ) -> Result<Self, RegistryError> {
        let mut methods = IndexMap::new();
        for (key, descriptor) in entries {
            validate_descriptor(key.as_str(), &descriptor)?;
            if methods.contains_key(key.as_str()) {
                return Err(RegistryError::DuplicateMethod(key));
            }
            methods.insert(key, descriptor);
        }
        Ok(Self { methods })
    }

    pub fn lookup(&self, method_key: &str) -> Option<&MethodDescriptor> {
        self.methods.get(method_key)
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &MethodDescriptor)> {
        self.methods.iter().map(|(key, d)| (key.as_str(), d))
    }

    pub fn keys(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// The capability manifest: method key → descriptor, in catalog order.
    pub fn manifest(&self) -> Value {
        serde_json::to_value(&self.methods).unwrap_or(Value::Null)
    }
}

fn validate_descriptor(key: &str, descriptor: &MethodDescriptor) -> Result<(), RegistryError> {
    if !descriptor.credit_weight.is_finite() || descriptor.credit_weight < 0.0 {
        return Err(RegistryError::InvalidCreditWeight {
            method: key.to_string(),
        });
    }

    for (name, spec) in descriptor.fields.iter() {
        if let Some(original) = name.strip_prefix(DUPLICATE_FIELD_MARKER) {
            return Err(RegistryError::DuplicateField {
                method: key.to_string(),
                field: original.to_string(),
            });
        }
        if spec.required && spec.default.is_some() {
            return Err(RegistryError::RequiredWithDefault {
                method: key.to_string(),
                field: name.clone(),
            });
        }
        if let Some(default) = spec.default.as_ref() {
            if !spec.field_type.accepts(default) {
                return Err(RegistryError::DefaultTypeMismatch {
                    method: key.to_string(),
                    field: name.clone(),
                    field_type: spec.field_type.as_str(),
                });
            }
        }
        match (spec.field_type, spec.options.as_ref()) {
            (FieldType::Select, None) => {
                return Err(RegistryError::SelectWithoutOptions {
                    method: key.to_string(),
                    field: name.clone(),
                });
            }
            (FieldType::Select, Some(options)) if options.is_empty() => {
                return Err(RegistryError::SelectWithoutOptions {
                    method: key.to_string(),
                    field: name.clone(),
                });
            }
            (FieldType::Select, Some(options)) => {
                let mut seen = BTreeSet::new();
                for option in options {
                    if !seen.insert(option.value.as_str()) {
                        return Err(RegistryError::DuplicateOptionValue {
                            method: key.to_string(),
                            field: name.clone(),
                            value: option.value.clone(),
                        });
                    }
                }
            }
            (_, Some(_)) => {
                return Err(RegistryError::OptionsOnNonSelect {
                    method: key.to_string(),
                    field: name.clone(),
                });
            }
            (_, None) => {}
        }
    }
    Ok(())
}
