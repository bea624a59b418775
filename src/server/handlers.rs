use super::AppState;
use crate::core::error::DispatchError;
use crate::dispatch::Dispatcher;
use crate::providers::{InlineData, Message};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

const UNAVAILABLE: &str = "The mirror could not answer right now. Please try again.";
const BLOCKED: &str = "The message was blocked by the provider's content policy.";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    MethodNotAllowed,
    PolicyBlocked,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
            ),
            ApiError::PolicyBlocked => (StatusCode::UNPROCESSABLE_ENTITY, BLOCKED.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageInput {
    Inline(InlineData),
    Base64(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    #[serde(default, alias = "contents")]
    messages: Option<Vec<Message>>,
    #[serde(default, alias = "system_instruction")]
    system_instruction: Option<String>,
    #[serde(default)]
    image: Option<ImageInput>,
}

#[derive(Debug)]
struct ParsedRequest {
    messages: Vec<Message>,
    system_instruction: Option<String>,
    image: Option<InlineData>,
}

fn parse_request(body: &[u8]) -> Result<ParsedRequest, ApiError> {
    let request: CompleteRequest = serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected malformed completion request: {}", e);
        ApiError::BadRequest("Request body must be JSON with a messages array".to_string())
    })?;

    let messages = request
        .messages
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("messages must be a non-empty array".to_string()))?;

    let image = match request.image {
        Some(ImageInput::Inline(data)) if !data.data.is_empty() => Some(data),
        Some(ImageInput::Base64(data)) if !data.is_empty() => {
            Some(InlineData::new("image/jpeg", data))
        }
        _ => None,
    };

    Ok(ParsedRequest {
        messages,
        system_instruction: request.system_instruction,
        image,
    })
}

async fn run(dispatcher: &Dispatcher, body: &[u8]) -> Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let result = dispatcher
        .complete(
            &request.messages,
            request.system_instruction.as_deref(),
            request.image.as_ref(),
        )
        .await;

    match result {
        Ok(completion) => Json(json!({
            "success": true,
            "text": completion.text,
            "modelUsed": completion.model,
        }))
        .into_response(),
        Err(DispatchError::PolicyBlocked { reason }) => {
            warn!("Completion blocked: {}", reason);
            ApiError::PolicyBlocked.into_response()
        }
        Err(DispatchError::EmptyConversation) => {
            ApiError::BadRequest("messages must be a non-empty array".to_string()).into_response()
        }
        Err(e) => {
            error!("Completion failed: {}", e);
            ApiError::Internal(UNAVAILABLE.to_string()).into_response()
        }
    }
}

pub async fn complete(State(state): State<AppState>, body: Bytes) -> Response {
    run(&state.dispatcher, &body).await
}

pub async fn visor(State(state): State<AppState>, body: Bytes) -> Response {
    match &state.visor {
        Some(dispatcher) => run(dispatcher, &body).await,
        None => {
            error!("{} is not set; visor requests cannot be served", super::VISOR_KEY_VAR);
            ApiError::Internal("Visor is not configured".to_string()).into_response()
        }
    }
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
