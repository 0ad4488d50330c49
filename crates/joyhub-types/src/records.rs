//! Persisted device and macro records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A console the hub has paired with before, keyed by its device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    /// Human-readable name chosen by a user.
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A named macro script saved for reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMacro {
    pub content: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}
