use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Product details typed into the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdInput {
    pub product_name: String,
    pub target_audience: String,
    /// Free text, one feature per line by convention.
    pub key_features: String,
}

impl AdInput {
    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::ProductName => self.product_name = value,
            Field::TargetAudience => self.target_audience = value,
            Field::KeyFeatures => self.key_features = value,
        }
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::ProductName => &self.product_name,
            Field::TargetAudience => &self.target_audience,
            Field::KeyFeatures => &self.key_features,
        }
    }

    /// First empty field in form order, if any.
    pub fn first_missing(&self) -> Option<Field> {
        Field::ALL.into_iter().find(|f| self.get(*f).is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    ProductName,
    TargetAudience,
    KeyFeatures,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::ProductName, Field::TargetAudience, Field::KeyFeatures];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ProductName => "productName",
            Field::TargetAudience => "targetAudience",
            Field::KeyFeatures => "keyFeatures",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown field: {0}")]
pub struct FieldParseError(pub String);

impl FromStr for Field {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| FieldParseError(s.to_string()))
    }
}

/// The three generated copy variants. Decoding fails on missing or extra keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdCopy {
    pub professional: String,
    pub casual: String,
    pub urgent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Loading,
    Success,
    Error,
}

/// Where a session's generation workflow currently stands.
///
/// A result and an error message can never be held at the same time. The
/// copy inside `Success` is `None` only after the results were cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Idle,
    Loading { request_id: u64 },
    Success { copy: Option<AdCopy> },
    Error { message: String },
}

impl GenerationState {
    pub fn status(&self) -> Status {
        match self {
            GenerationState::Idle => Status::Idle,
            GenerationState::Loading { .. } => Status::Loading,
            GenerationState::Success { .. } => Status::Success,
            GenerationState::Error { .. } => Status::Error,
        }
    }

    pub fn copy(&self) -> Option<&AdCopy> {
        match self {
            GenerationState::Success { copy } => copy.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            GenerationState::Error { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_wire_format() {
        for f in Field::ALL {
            assert_eq!(f.as_str().parse::<Field>(), Ok(f));
            assert_eq!(serde_json::to_value(f).unwrap(), serde_json::json!(f.as_str()));
        }
        assert_eq!(
            "price".parse::<Field>(),
            Err(FieldParseError("price".to_string()))
        );
    }

    #[test]
    fn first_missing_follows_form_order() {
        let mut input = AdInput::default();
        assert_eq!(input.first_missing(), Some(Field::ProductName));
        input.set(Field::ProductName, "ZenFlow".into());
        input.set(Field::KeyFeatures, "Sleep tracking".into());
        assert_eq!(input.first_missing(), Some(Field::TargetAudience));
        input.set(Field::TargetAudience, "busy professionals".into());
        assert_eq!(input.first_missing(), None);
    }

    #[test]
    fn ad_copy_rejects_partial_and_extra_keys() {
        assert!(serde_json::from_str::<AdCopy>(r#"{"professional":"P","casual":"C"}"#).is_err());
        assert!(serde_json::from_str::<AdCopy>("{}").is_err());
        assert!(serde_json::from_str::<AdCopy>(
            r#"{"professional":"P","casual":"C","urgent":"U","bonus":"B"}"#
        )
        .is_err());
    }

    #[test]
    fn generation_state_serializes_flat() {
        let state = GenerationState::Error { message: "boom".into() };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({"status": "error", "message": "boom"})
        );
        assert_eq!(state.status(), Status::Error);
        assert_eq!(state.error(), Some("boom"));
        assert!(state.copy().is_none());
    }
}
