//! Request and response payloads for the REST surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /dashboard/cases/{case_id}/resolve`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub decision: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `GET /dashboard/stats`: per-status counts plus the live TPS.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counts: Map<String, Value>,
    pub tps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stats_response_flattens_counts() {
        let mut counts = Map::new();
        counts.insert("AUTO_APPROVED".into(), json!(12));
        counts.insert("UNDER_INVESTIGATION".into(), json!(3));

        let response = StatsResponse { counts, tps: 40 };
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["AUTO_APPROVED"], json!(12));
        assert_eq!(value["UNDER_INVESTIGATION"], json!(3));
        assert_eq!(value["tps"], json!(40));
    }

    #[test]
    fn test_resolve_request_notes_optional() {
        let request: ResolveRequest =
            serde_json::from_str(r#"{"decision": "APPROVED"}"#).unwrap();
        assert_eq!(request.decision, "APPROVED");
        assert!(request.notes.is_none());
    }
}
