use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::{ArgsNormalizer, MethodDescriptor};

pub type Args = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required arguments: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Invalid JSON in field '{field}': {message}")]
    InvalidJson { field: String, message: String },
    #[error("Field '{0}' must not be empty")]
    EmptyRequiredScalar(String),
}

impl ValidationError {
    /// Offending field names, where the failure has them.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::MissingFields(fields) => fields.clone(),
            Self::InvalidJson { field, .. } => vec![field.clone()],
            Self::EmptyRequiredScalar(field) => vec![field.clone()],
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields(_) => "missing_fields",
            Self::InvalidJson { .. } => "invalid_json",
            Self::EmptyRequiredScalar(_) => "empty_required_field",
        }
    }
}

/// Fills defaults, checks required fields, then applies the descriptor's
/// normalizer. The caller's map is never mutated.
pub fn validate(descriptor: &MethodDescriptor, raw_args: &Args) -> Result<Args, ValidationError> {
    let mut args = raw_args.clone();

    for (name, spec) in descriptor.fields.iter() {
        if is_absent(&args, name) {
            if let Some(default) = spec.default.as_ref() {
                args.insert(name.clone(), default.clone());
            }
        }
    }

    let missing = descriptor
        .fields
        .iter()
        .filter(|(name, spec)| spec.required && is_absent(&args, name))
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    match &descriptor.normalizer {
        ArgsNormalizer::None => Ok(args),
        ArgsNormalizer::JsonExtras {
            backend_field,
            prompt_field,
            extras_field,
        } => normalize_json_extras(args, backend_field, prompt_field, extras_field),
    }
}

fn is_absent(args: &Args, name: &str) -> bool {
    matches!(args.get(name), None | Some(Value::Null))
}

fn normalize_json_extras(
    mut args: Args,
    backend_field: &str,
    prompt_field: &str,
    extras_field: &str,
) -> Result<Args, ValidationError> {
    let backend = trimmed_scalar(&args, backend_field)
        .ok_or_else(|| ValidationError::EmptyRequiredScalar(backend_field.to_string()))?;
    let prompt = trimmed_scalar(&args, prompt_field)
        .ok_or_else(|| ValidationError::EmptyRequiredScalar(prompt_field.to_string()))?;

    let extras = match args.shift_remove(extras_field) {
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            match serde_json::from_str::<Value>(raw.as_str()) {
                Ok(Value::Object(parsed)) => parsed,
                Ok(_) => Map::new(),
                Err(error) => {
                    return Err(ValidationError::InvalidJson {
                        field: extras_field.to_string(),
                        message: error.to_string(),
                    })
                }
            }
        }
        Some(Value::Object(parsed)) => parsed,
        _ => Map::new(),
    };

    // Extras override ordinary keys; the backend id and prompt always win.
    for (key, value) in extras {
        args.insert(key, value);
    }
    args.insert(backend_field.to_string(), Value::String(backend));
    args.insert(prompt_field.to_string(), Value::String(prompt));
    Ok(args)
}

fn trimmed_scalar(args: &Args, field: &str) -> Option<String> {
    let value = match args.get(field)? {
        Value::String(value) => value.trim().to_string(),
        Value::Number(value) => value.to_string(),
        Value::Bool(value) => value.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::registry::default_registry;

    fn args(value: Value) -> Args {
        value.as_object().cloned().expect("object literal")
    }

    fn descriptor(key: &str) -> MethodDescriptor {
        default_registry()
            .lookup(key)
            .cloned()
            .expect("method should exist")
    }

    #[test]
    fn injects_defaults_without_touching_caller_args() {
        let raw = args(json!({"prompt": "castle"}));
        let normalized = validate(&descriptor("fluxImageKlein"), &raw).expect("valid");
        assert_eq!(normalized["resolution"], json!("ai_latest"));
        assert!(!raw.contains_key("resolution"));
    }

    #[test]
    fn reports_exactly_the_missing_required_fields() {
        let err = validate(&descriptor("fluxImageEdit"), &args(json!({"prompt": "x"})))
            .expect_err("image_url missing");
        assert_eq!(err, ValidationError::MissingFields(vec![String::from("image_url")]));

        let err = validate(&descriptor("fluxImageEdit"), &Args::new()).expect_err("both missing");
        assert_eq!(err.fields(), vec!["image_url", "prompt"]);
    }

    #[test]
    fn null_counts_as_absent() {
        let err = validate(&descriptor("centeredTextOnWhite"), &args(json!({"text": null})))
            .expect_err("null text");
        assert_eq!(err.fields(), vec!["text"]);
    }

    #[test]
    fn complete_args_never_report_missing_fields() {
        let registry = default_registry();
        for (key, descriptor) in registry.list() {
            let mut raw = Args::new();
            for (name, spec) in descriptor.fields.iter() {
                if spec.required {
                    raw.insert(name.clone(), json!("value"));
                }
            }
            let result = validate(descriptor, &raw);
            assert!(
                !matches!(result, Err(ValidationError::MissingFields(_))),
                "{key} reported missing fields"
            );
        }
    }

    #[test]
    fn json_extras_rejects_blank_model_then_blank_prompt() {
        let err = validate(
            &descriptor("replicate"),
            &args(json!({"model": "  ", "prompt": "x"})),
        )
        .expect_err("blank model");
        assert_eq!(err, ValidationError::EmptyRequiredScalar(String::from("model")));

        let err = validate(
            &descriptor("replicate"),
            &args(json!({"model": "luma/photon", "prompt": ""})),
        )
        .expect_err("blank prompt");
        assert_eq!(err, ValidationError::EmptyRequiredScalar(String::from("prompt")));
    }

    #[test]
    fn json_extras_merges_with_essential_fields_winning() {
        let normalized = validate(
            &descriptor("replicate"),
            &args(json!({
                "model": " luma/photon ",
                "prompt": " a fox ",
                "aspect_ratio": "4:3",
                "input": "{\"aspect_ratio\":\"16:9\",\"model\":\"other\",\"prompt\":\"\",\"steps\":4}"
            })),
        )
        .expect("valid");

        assert_eq!(
            Value::Object(normalized),
            json!({
                "model": "luma/photon",
                "prompt": "a fox",
                "aspect_ratio": "16:9",
                "steps": 4
            })
        );
    }

    #[test]
    fn json_extras_uses_default_and_tolerates_non_objects() {
        let normalized = validate(
            &descriptor("replicate"),
            &args(json!({"model": "prunaai/p-image", "prompt": "x"})),
        )
        .expect("default input applies");
        assert_eq!(normalized["aspect_ratio"], json!("1:1"));
        assert_eq!(normalized["disable_safety_checker"], json!(true));
        assert!(!normalized.contains_key("input"));

        for non_object in ["[1,2]", "null", "42", "\"text\""] {
            let normalized = validate(
                &descriptor("replicate"),
                &args(json!({"model": "m", "prompt": "p", "input": non_object})),
            )
            .expect("non-object extras are ignored");
            assert_eq!(normalized.len(), 2, "{non_object}");
        }
    }

    #[test]
    fn json_extras_reports_parse_failures() {
        let err = validate(
            &descriptor("replicate"),
            &args(json!({"model": "m", "prompt": "p", "input": "{not json"})),
        )
        .expect_err("invalid json");
        assert!(matches!(err, ValidationError::InvalidJson { ref field, .. } if field == "input"));
        assert_eq!(err.code(), "invalid_json");
    }
}
