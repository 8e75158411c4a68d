//! # Identity Newtypes
//!
//! Each identifier is a distinct type; a [`UserId`] cannot be passed where a
//! [`FeatureName`] is expected.
//!
//! UUID-based identifiers ([`TenantId`], [`LicenseId`], [`JobId`]) are valid
//! by construction. String-based identifiers validate at construction and on
//! deserialization (`#[serde(try_from = "String")]`), so an invalid value can
//! never enter the store through a JSON body either.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_identifier!(
    /// An isolated customer account.
    TenantId
);
uuid_identifier!(
    /// A license issued to a tenant.
    LicenseId
);
uuid_identifier!(
    /// A durable archival/restore job record.
    JobId
);

// ---------------------------------------------------------------------------
// String-based identifiers
// ---------------------------------------------------------------------------

const MAX_IDENT_LEN: usize = 128;

fn validate_slug(
    kind: &'static str,
    value: &str,
    extra: &[char],
) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(invalid("must not exceed 128 characters"));
    }
    let ok = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || extra.contains(&c));
    if !ok {
        return Err(invalid("allowed characters are a-z, 0-9 and separators"));
    }
    Ok(())
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $validate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a validated identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                let check: fn(&str) -> Result<(), ValidationError> = $validate;
                check(&value)?;
                Ok(Self(value))
            }

            /// Borrow as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(
    /// Application identifier, e.g. `crm`, `field-ops`.
    AppId,
    |v| validate_slug("app id", v, &['-', '_'])
);

string_identifier!(
    /// Feature flag / catalog feature name, e.g. `advanced_analytics`.
    FeatureName,
    |v| validate_slug("feature name", v, &['-', '_', '.'])
);

string_identifier!(
    /// A user within a tenant. Issued by the identity provider, so only
    /// emptiness, length and control characters are checked.
    UserId,
    |v| {
        let invalid = |reason| ValidationError::InvalidIdentifier {
            kind: "user id",
            value: v.to_string(),
            reason,
        };
        if v.trim().is_empty() {
            return Err(invalid("must not be empty"));
        }
        if v.len() > 256 {
            return Err(invalid("must not exceed 256 characters"));
        }
        if v.chars().any(char::is_control) {
            return Err(invalid("must not contain control characters"));
        }
        Ok(())
    }
);

string_identifier!(
    /// Opaque activation token handed to an application instance.
    ActivationToken,
    |v| {
        if v.len() < 16 || !v.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidIdentifier {
                kind: "activation token",
                value: v.to_string(),
                reason: "expected at least 16 alphanumeric characters",
            });
        }
        Ok(())
    }
);

impl ActivationToken {
    /// Build a token from raw random bytes (hex-encoded).
    pub fn from_random_bytes(bytes: &[u8; 32]) -> Self {
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }
}
