/// Jobs are identified by a v4 UUID allocated at submission time.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Template parameter overrides, as a JSON object.
pub type Parameters = serde_json::Map<String, serde_json::Value>;
