//! Credential state and incremental credential updates.
//!
//! A paired session is described by two things:
//!
//! - the **creds** object (identity keys, registration id, account info),
//!   stored as `creds.json`;
//! - a set of **signal keys** (pre-keys, sessions, sender keys, app-state
//!   sync keys), one file per key, named `<category>-<id>.json`.
//!
//! Clients report changes to either as a [`CredentialUpdate`]; the gateway
//! applies them to disk as they arrive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File name of the credential object inside a session directory.
pub const CREDS_FILE: &str = "creds.json";

/// Credential state handed to a protocol client when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// The credential object.  An empty object for a fresh session.
    pub creds: Value,

    /// Signal keys keyed by file stem (`<category>-<id>`).
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

impl AuthState {
    /// State for a session that has never been paired.
    pub fn fresh() -> Self {
        Self {
            creds: Value::Object(serde_json::Map::new()),
            keys: BTreeMap::new(),
        }
    }

    /// `true` when the creds object holds no fields yet.
    pub fn is_fresh(&self) -> bool {
        self.creds.as_object().map_or(true, |obj| obj.is_empty())
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// A change to the stored credential state.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialUpdate {
    /// Partial creds object; fields are merged into the stored one.
    Creds(Value),

    /// Signal-key changes for one category.  `None` deletes the key.
    Keys {
        category: String,
        entries: BTreeMap<String, Option<Value>>,
    },
}

/// Shallow-merges `partial` into `target`.
///
/// When both are objects, every top-level field of `partial` replaces the
/// field of the same name in `target`.  Otherwise `partial` replaces `target`
/// wholesale.
pub fn merge_creds(target: &mut Value, partial: Value) {
    match partial {
        Value::Object(fields) if target.is_object() => {
            if let Some(existing) = target.as_object_mut() {
                existing.extend(fields);
            }
        }
        partial => *target = partial,
    }
}

/// Returns the file name used to store one signal key.
///
/// Ids may contain `/` and `:` (JIDs, device ids), neither of which is safe in
/// a file name; they are replaced by `__` and `-` respectively.
pub fn key_file_name(category: &str, id: &str) -> String {
    let stem = format!("{category}-{id}").replace('/', "__").replace(':', "-");
    format!("{stem}.json")
}
