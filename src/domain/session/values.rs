//! Value objects used by the estimation session aggregate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Maximum length for a vote or point value ("13", "?", "1/2", "XL").
pub const MAX_ESTIMATE_LENGTH: usize = 16;

/// Maximum length for a work item title.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum length for a work item description.
pub const MAX_DESCRIPTION_LENGTH: usize = 10_000;

/// Maximum length for a participant display name.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// A vote or final point value.
///
/// Estimates are strings because planning decks mix numbers with symbols
/// such as `?` or `1/2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Estimate(String);

impl Estimate {
    /// Creates a new estimate, trimming surrounding whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(ValidationError::empty_field("value"));
        }
        let len = value.chars().count();
        if len > MAX_ESTIMATE_LENGTH {
            return Err(ValidationError::too_long("value", MAX_ESTIMATE_LENGTH, len));
        }
        Ok(Self(value))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Estimate {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Estimate::new(value)
    }
}

impl From<Estimate> for String {
    fn from(value: Estimate) -> Self {
        value.0
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which kind of collaborative room a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Battle,
    Storyboard,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Battle => "battle",
            SessionKind::Storyboard => "storyboard",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy for deciding when every required voter has voted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoFinishPolicy {
    /// Count participants inside the reconnect grace window as required voters.
    pub counts_disconnected: bool,
}

/// Validates and normalizes a work item title.
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::empty_field("title"));
    }
    let len = title.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(ValidationError::too_long("title", MAX_TITLE_LENGTH, len));
    }
    Ok(title.to_string())
}

/// Validates an optional work item description; blank becomes `None`.
pub fn validate_description(
    description: Option<String>,
) -> Result<Option<String>, ValidationError> {
    match description {
        Some(d) if d.trim().is_empty() => Ok(None),
        Some(d) => {
            let len = d.chars().count();
            if len > MAX_DESCRIPTION_LENGTH {
                return Err(ValidationError::too_long(
                    "description",
                    MAX_DESCRIPTION_LENGTH,
                    len,
                ));
            }
            Ok(Some(d))
        }
        None => Ok(None),
    }
}

/// Validates and normalizes a display name.
pub fn validate_display_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::empty_field("display_name"));
    }
    let len = name.chars().count();
    if len > MAX_DISPLAY_NAME_LENGTH {
        return Err(ValidationError::too_long(
            "display_name",
            MAX_DISPLAY_NAME_LENGTH,
            len,
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_trims_and_accepts_symbols() {
        assert_eq!(Estimate::new(" 13 ").unwrap().as_str(), "13");
        assert_eq!(Estimate::new("?").unwrap().as_str(), "?");
        assert_eq!(Estimate::new("☕").unwrap().as_str(), "☕");
    }

    #[test]
    fn estimate_rejects_empty_and_long_values() {
        assert!(Estimate::new("").is_err());
        assert!(Estimate::new("x".repeat(MAX_ESTIMATE_LENGTH + 1)).is_err());
    }

    #[test]
    fn estimate_deserialization_validates() {
        assert!(serde_json::from_str::<Estimate>(r#""5""#).is_ok());
        assert!(serde_json::from_str::<Estimate>(r#""  ""#).is_err());
    }

    #[test]
    fn session_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionKind::Storyboard).unwrap(),
            r#""storyboard""#
        );
    }

    #[test]
    fn title_is_trimmed_and_required() {
        assert_eq!(validate_title("  Login page ").unwrap(), "Login page");
        assert!(validate_title("   ").is_err());
    }

    #[test]
    fn blank_description_becomes_none() {
        assert_eq!(validate_description(Some("  ".into())).unwrap(), None);
        assert_eq!(
            validate_description(Some("details".into())).unwrap(),
            Some("details".to_string())
        );
    }

    #[test]
    fn display_name_length_is_bounded() {
        assert!(validate_display_name(&"n".repeat(MAX_DISPLAY_NAME_LENGTH)).is_ok());
        assert!(validate_display_name(&"n".repeat(MAX_DISPLAY_NAME_LENGTH + 1)).is_err());
    }
}
