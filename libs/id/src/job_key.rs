//! Composite job identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::IdError;

/// Maximum length of any single job key component.
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Identifies a job by owning role, environment and name.
///
/// Deserialization does not validate; keys arriving from callers must go
/// through [`JobKey::validate`] before they are used for a mutation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub role: String,
    pub environment: String,
    pub name: String,
}

impl JobKey {
    pub fn new(
        role: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            environment: environment.into(),
            name: name.into(),
        }
    }

    /// Checks every component against the identifier rules.
    pub fn validate(&self) -> Result<(), IdError> {
        validate_identifier("role", &self.role)?;
        validate_identifier("environment", &self.environment)?;
        validate_identifier("name", &self.name)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// `role/environment/name`, used in messages and logs.
    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.role, self.environment, self.name)
    }
}

impl FromStr for JobKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(role), Some(environment), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdError::InvalidPath(s.to_string()));
        };

        let key = Self::new(role, environment, name);
        key.validate()?;
        Ok(key)
    }
}

/// Validates one identifier: non-blank, bounded, `[A-Za-z0-9_.-]+`.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), IdError> {
    if value.trim().is_empty() {
        return Err(IdError::BlankComponent { field });
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(IdError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
        });
    }

    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(IdError::InvalidCharacter {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_key() {
        let key = JobKey::new("www-data", "prod", "hello_world.v2");
        assert!(key.is_valid());
        assert_eq!(key.path(), "www-data/prod/hello_world.v2");
    }

    #[test]
    fn test_blank_component() {
        let key = JobKey::new("www-data", " ", "hello");
        assert_eq!(
            key.validate(),
            Err(IdError::BlankComponent {
                field: "environment"
            })
        );
    }

    #[test]
    fn test_invalid_characters_in_name() {
        let key = JobKey::new("www-data", "prod", "foo bar");
        assert!(matches!(
            key.validate(),
            Err(IdError::InvalidCharacter { field: "name", .. })
        ));
        assert!(!JobKey::new("r", "e", "foo/bar").is_valid());
    }

    #[test]
    fn test_too_long() {
        let key = JobKey::new("r".repeat(MAX_IDENTIFIER_LENGTH + 1), "prod", "job");
        assert!(matches!(key.validate(), Err(IdError::TooLong { .. })));
    }

    #[test]
    fn test_parse_path() {
        let key: JobKey = "role/devel/job".parse().unwrap();
        assert_eq!(key, JobKey::new("role", "devel", "job"));
        assert!(matches!(
            "role/job".parse::<JobKey>(),
            Err(IdError::InvalidPath(_))
        ));
        assert!(matches!(
            "a/b/c/d".parse::<JobKey>(),
            Err(IdError::InvalidPath(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_identifier_charset_accepted(s in "[A-Za-z0-9_.-]{1,64}") {
            prop_assert!(validate_identifier("name", &s).is_ok());
        }

        #[test]
        fn prop_whitespace_rejected(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let value = format!("{a} {b}");
            prop_assert!(validate_identifier("name", &value).is_err());
        }

        #[test]
        fn prop_display_parse_roundtrip(
            role in "[a-z0-9_-]{1,16}",
            env in "[a-z]{1,8}",
            name in "[a-z0-9.]{1,16}",
        ) {
            let key = JobKey::new(role, env, name);
            let parsed: JobKey = key.to_string().parse().unwrap();
            prop_assert_eq!(key, parsed);
        }
    }
}
