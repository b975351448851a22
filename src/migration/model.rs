use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Provenance tag written into every migrated row.
pub const SOURCE_TABLE: &str = "rhwb_action_requests";

/// Stable surrogate identifier for a person (`runners_profile.runner_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Blank keys are treated as absent.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts a JSON string or number; null, blanks and anything else become `None`.
fn opt_text<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Row of `runners_profile`: the trusted email → identity registry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IdentityRow {
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub runner_id: Option<String>,
}

/// Row of `rhwb_coaches`: maps a coach's login email to the email they run under.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FallbackRow {
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub fs_email_id: Option<String>,
}

/// Row of `rhwb_action_requests` carrying a free-text comment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ActionRequestRow {
    pub id: i64,
    #[serde(default)]
    pub runner_email_id: Option<String>,
    #[serde(default)]
    pub requestor_email_id: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ActionRequestRow {
    /// Columns projected from the source table.
    pub const COLUMNS: [&'static str; 7] = [
        "id",
        "runner_email_id",
        "requestor_email_id",
        "season",
        "comments",
        "action_type",
        "created_at",
    ];

    /// A row is eligible when its comment is present and not blank after trimming.
    pub fn is_eligible(&self) -> bool {
        self.comments
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    pub fn runner_email(&self) -> &str {
        self.runner_email_id.as_deref().unwrap_or("")
    }

    pub fn requestor_email(&self) -> &str {
        self.requestor_email_id.as_deref().unwrap_or("")
    }
}

/// One row of the destination `action_comments` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionComment {
    pub action_request_id: i64,
    pub runner_id: IdentityKey,
    pub requestor_id: IdentityKey,
    pub season: String,
    pub comment: String,
    pub action_type: String,
    pub source_table: &'static str,
}
