use memory_bridge::{PendingState, TranscriptEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub worker_alive: bool,
    pub evictions: u64,
    pub providers: Vec<String>,
    /// Context fetches currently in flight
    pub pending: Vec<PendingContext>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingContext {
    pub id: String,
    pub query: String,
    pub age_ms: u128,
    pub state: PendingState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryToggleBody {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    /// Conversation URL; used to derive the memory id when none is given
    pub url: String,
    #[serde(default)]
    pub memory_id: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub ok: bool,
    pub memory_id: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
