//! Trimmed text types.
//!
//! [`NonEmptyText`] carries free text such as patient names. [`PatientCode`] is the clinic
//! chart number: it is matched against imported rows and shown in listings, so it is kept to
//! a short ASCII alphabet.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Longest accepted patient code, in characters.
pub const MAX_PATIENT_CODE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("text cannot be empty")]
    Empty,
    #[error("text is {len} characters long; at most {max} allowed")]
    TooLong { len: usize, max: usize },
    #[error("character {0:?} not allowed (only ASCII letters, digits, '-' and '_')")]
    InvalidCharacter(char),
}

fn trimmed(input: &str) -> Result<&str, TextError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TextError::Empty);
    }
    Ok(trimmed)
}

/// Text with at least one non-whitespace character, stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        trimmed(input.as_ref()).map(|t| Self(t.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Clinic chart number, e.g. `P-00012`.
///
/// Ordered and compared as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatientCode(String);

impl PatientCode {
    /// Trims the input, then checks length and alphabet.
    ///
    /// # Errors
    ///
    /// - [`TextError::Empty`] for blank input
    /// - [`TextError::TooLong`] past [`MAX_PATIENT_CODE_LEN`]
    /// - [`TextError::InvalidCharacter`] for anything outside `[A-Za-z0-9_-]`
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let code = trimmed(input.as_ref())?;
        let len = code.chars().count();
        if len > MAX_PATIENT_CODE_LEN {
            return Err(TextError::TooLong {
                len,
                max: MAX_PATIENT_CODE_LEN,
            });
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TextError::InvalidCharacter(bad));
        }
        Ok(Self(code.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PatientCode {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PatientCode {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

macro_rules! text_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

text_impls!(NonEmptyText);
text_impls!(PatientCode);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let text = NonEmptyText::new("  Yamada Hanako \n").expect("should accept text");
        assert_eq!(text.as_str(), "Yamada Hanako");
    }

    #[test]
    fn rejects_blank_input() {
        assert!(matches!(NonEmptyText::new("   "), Err(TextError::Empty)));
        assert!(matches!(PatientCode::new(""), Err(TextError::Empty)));
    }

    #[test]
    fn deserialize_rejects_blank_strings() {
        let err = serde_json::from_str::<NonEmptyText>("\"  \"").expect_err("blank must fail");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn accepts_chart_numbers() {
        assert_eq!(PatientCode::new(" P-00012 ").unwrap(), "P-00012");
        assert!(PatientCode::new("chart_9").is_ok());
    }

    #[test]
    fn rejects_long_and_unsafe_codes() {
        assert!(matches!(
            PatientCode::new("9".repeat(33)),
            Err(TextError::TooLong { len: 33, max: 32 })
        ));
        assert!(matches!(
            PatientCode::new("../etc"),
            Err(TextError::InvalidCharacter('.'))
        ));
        assert!(matches!(
            PatientCode::new("山田"),
            Err(TextError::InvalidCharacter('山'))
        ));
        assert!(matches!(
            PatientCode::new("P 001"),
            Err(TextError::InvalidCharacter(' '))
        ));
    }

    #[test]
    fn patient_code_round_trips_through_serde() {
        let code: PatientCode = serde_json::from_str("\"P-7\"").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"P-7\"");
        assert!(serde_json::from_str::<PatientCode>("\"P 7\"").is_err());
    }

    #[test]
    fn display_honours_width() {
        let code = PatientCode::new("A1").unwrap();
        assert_eq!(format!("{code:<4}|"), "A1  |");
    }
}
