//! Opaque entity identifiers
//!
//! Foreign keys are distinct newtypes per entity kind so that handing an
//! entry id to a book lookup is a type error, not a runtime surprise. Ids
//! are client-generated (millisecond timestamp plus a random alphanumeric
//! suffix) and never change after creation.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generate a new opaque id: epoch millis + 8 random alphanumerics.
fn generate(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}_{}{}", prefix, millis, suffix)
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh client-side id.
            pub fn generate() -> Self {
                Self(generate($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`crate::models::Book`].
    BookId,
    "book"
);
entity_id!(
    /// Identifier of a [`crate::models::Entry`].
    EntryId,
    "entry"
);
entity_id!(
    /// Identifier of a [`crate::models::Category`].
    CategoryId,
    "cat"
);
entity_id!(
    /// Identifier of a locally held pending transaction.
    PendingId,
    "pending"
);

/// Identity of a user, as supplied by the external identity provider.
///
/// The special value `"default"` owns system-provided entities such as the
/// undeletable "Others" category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Owner of system-provided entities visible to every user.
    pub fn default_owner() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
