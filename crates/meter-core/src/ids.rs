//! Identifier types for meter.
//!
//! User and billing identifiers are opaque strings issued by external systems
//! (the identity provider and the billing provider). They are validated once at
//! the boundary and carried as newtypes so the three kinds cannot be mixed up.
//!
//! # Macro-based ID Types
//!
//! The `string_id_type!` macro reduces boilerplate for string-backed identifier
//! types, ensuring consistent validation, serialization, parsing and display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted identifier length in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Macro to define an opaque string identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `String` with implementations for:
/// - `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (validated on the way in)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
/// - `AsRef<str>`
///
/// # Example
///
/// ```ignore
/// string_id_type!(MyId, "A custom identifier type.");
/// let id: MyId = "abc".parse().unwrap();
/// assert_eq!(id.as_str(), "abc");
/// ```
macro_rules! string_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, validating its format.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long, or contains
            /// whitespace or control characters.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate(&value)?;
                Ok(Self(value))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the identifier bytes (used for storage keys).
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id_type!(UserId, "A user identifier.\n\nOpaque and stable; issued by the identity provider.");
string_id_type!(
    BillingCustomerId,
    "A billing provider customer identifier (e.g. `cus_...`)."
);
string_id_type!(
    BillingSubscriptionId,
    "A billing provider subscription identifier (e.g. `sub_...`)."
);

fn validate(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > MAX_ID_LEN {
        return Err(IdError::TooLong { len: value.len() });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter);
    }
    Ok(())
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is empty.
    #[error("identifier is empty")]
    Empty,

    /// The input exceeds [`MAX_ID_LEN`].
    #[error("identifier too long: {len} bytes (max {max})", max = MAX_ID_LEN)]
    TooLong {
        /// Length of the rejected input.
        len: usize,
    },

    /// The input contains whitespace or control characters.
    #[error("identifier contains whitespace or control characters")]
    InvalidCharacter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_parse_and_display() {
        let id: UserId = "user_123".parse().unwrap();
        assert_eq!(id.as_str(), "user_123");
        assert_eq!(id.to_string(), "user_123");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(UserId::new(""), Err(IdError::Empty));
    }

    #[test]
    fn rejects_whitespace_and_control() {
        assert_eq!(UserId::new("a b"), Err(IdError::InvalidCharacter));
        assert_eq!(
            BillingCustomerId::new("cus\n1"),
            Err(IdError::InvalidCharacter)
        );
    }

    #[test]
    fn rejects_too_long() {
        let long = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            BillingSubscriptionId::new(long),
            Err(IdError::TooLong { len }) if len == MAX_ID_LEN + 1
        ));
        assert!(UserId::new("x".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(ok.as_str(), "u1");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }

    #[test]
    fn debug_includes_type_name() {
        let id = BillingCustomerId::new("cus_1").unwrap();
        assert_eq!(format!("{id:?}"), "BillingCustomerId(cus_1)");
    }
}
