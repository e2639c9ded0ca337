use serde::{Deserialize, Deserializer, Serialize};

/// Execution request - the first message on every terminal channel
///
/// Wire format:
/// `{"language": "c", "code": "...", "version": "17" | null, "arguments": ["a", "b"]}`
///
/// `arguments` may be absent or null, both mean "no arguments".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: Vec<String>,
}

impl ExecutionRequest {
    /// Parse the JSON payload of an initialization message
    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Requested version, blank strings count as "use the default"
    pub fn requested_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
