use axum::extract::State;
use axum::Json;

use crate::models::LlmConfigUpdate;
use crate::state::AppState;

/// Config response with API key redacted
#[derive(serde::Serialize)]
pub struct LlmConfigResponse {
    pub provider: String,
    pub base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub has_api_key: bool,
}

/// GET /api/config - Current LLM config
pub async fn get_config(State(state): State<AppState>) -> Json<LlmConfigResponse> {
    let config = state.llm_config.read();
    Json(LlmConfigResponse {
        provider: config.provider.clone(),
        base_url: config.base_url.clone(),
        chat_model: config.chat_model.clone(),
        temperature: config.temperature,
        has_api_key: config.api_key.is_some(),
    })
}

/// PUT /api/config - Update LLM config
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<LlmConfigUpdate>,
) -> Json<crate::config::LlmConfig> {
    let mut config = state.llm_config.write();

    if let Some(provider) = update.provider {
        config.provider = provider;
    }
    // base_url is immutable at runtime (set via LLM_BASE_URL env var only)
    // to prevent SSRF: an attacker changing it could exfiltrate the API key
    if let Some(chat_model) = update.chat_model {
        config.chat_model = chat_model;
    }
    if let Some(temperature) = update.temperature {
        config.temperature = temperature;
    }
    if let Some(api_key) = update.api_key {
        config.api_key = Some(api_key);
    }

    Json(config.clone())
}
