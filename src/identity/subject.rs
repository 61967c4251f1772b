use serde::{Deserialize, Serialize};

/// Authenticated principal as issued by the identity provider.
/// `id` is also the primary key of the subject's `users` row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub email: String,
    /// Profile metadata supplied at sign-up, kept verbatim.
    #[serde(default)]
    pub metadata: serde_json::Value,
}
