use crate::core::error::EspejoError;
use crate::providers::base_client::HttpClient;
use crate::providers::gemini::types::*;
use crate::providers::{InlineData, Message, Part, Role, Route, RouteResponse, RouteTransport};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// HTTP transport for `{version}/models/{model}:generateContent`.
#[derive(Clone)]
pub struct GeminiClient {
    client: HttpClient,
}

impl GeminiClient {
    /// A zero `timeout` leaves requests unbounded.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, EspejoError> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        Ok(Self {
            client: HttpClient::new(base_url, timeout, None)?,
        })
    }
}

#[async_trait]
impl RouteTransport for GeminiClient {
    async fn send(
        &self,
        route: &Route<'_>,
        request: &GenerateContentRequest,
    ) -> Result<RouteResponse, EspejoError> {
        let path = format!(
            "{}/models/{}:generateContent",
            route.api_version, route.model
        );
        let response = self
            .client
            .post(&path, &[("key", route.api_key)], request)
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, model = route.model, version = route.api_version, "Gemini replied");
        Ok(RouteResponse { status, body })
    }
}

/// Builds the outbound payload. An image is attached to the last message
/// when that message is the user's, otherwise it travels in a new user turn
/// with `default_caption` as its text.
pub fn build_payload(
    messages: &[Message],
    system_instruction: Option<&str>,
    image: Option<&InlineData>,
    default_caption: &str,
    generation_config: Option<GenerationConfig>,
) -> GenerateContentRequest {
    let mut contents: Vec<GeminiContentPart> = messages.iter().map(GeminiContentPart::from).collect();

    if let Some(image) = image {
        let image_part = GeminiPart::from(&Part::image(image.clone()));
        match contents.last_mut() {
            Some(last) if last.role == Role::User.as_str() => last.parts.push(image_part),
            _ => contents.push(GeminiContentPart {
                role: Role::User.as_str().to_string(),
                parts: vec![
                    image_part,
                    GeminiPart::Text {
                        text: default_caption.to_string(),
                    },
                ],
            }),
        }
    }

    let system_instruction = system_instruction
        .filter(|s| !s.trim().is_empty())
        .map(|text| SystemInstruction {
            parts: vec![GeminiPart::Text {
                text: text.to_string(),
            }],
        });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> InlineData {
        InlineData::new("image/jpeg", "QUJD")
    }

    #[test]
    fn image_joins_the_trailing_user_turn() {
        let messages = vec![
            Message::user("hello"),
            Message::model("hi there"),
            Message::user("earlier"),
            Message::model("sure"),
            Message::user("what is in this picture?"),
        ];
        let payload = build_payload(&messages, None, Some(&image()), "Analyze this image.", None);

        assert_eq!(payload.contents.len(), 5);
        let last = payload.contents.last().unwrap();
        assert_eq!(last.role, "user");
        assert_eq!(last.parts.len(), 2);
        assert!(matches!(&last.parts[0], GeminiPart::Text { text } if text == "what is in this picture?"));
        assert!(matches!(&last.parts[1], GeminiPart::InlineData { inline_data } if inline_data.data == "QUJD"));
    }

    #[test]
    fn image_after_model_turn_gets_its_own_user_turn() {
        let messages = vec![Message::user("hello"), Message::model("hi")];
        let payload = build_payload(&messages, None, Some(&image()), "Analyze this image.", None);

        assert_eq!(payload.contents.len(), 3);
        let last = payload.contents.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(matches!(&last.parts[0], GeminiPart::InlineData { .. }));
        assert!(matches!(&last.parts[1], GeminiPart::Text { text } if text == "Analyze this image."));
    }

    #[test]
    fn system_instruction_serializes_in_snake_case() {
        let payload = build_payload(&[Message::user("hola")], Some("Be kind"), None, "", None);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["system_instruction"]["parts"][0]["text"], "Be kind");
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn blank_system_instruction_is_omitted() {
        let payload = build_payload(&[Message::user("hola")], Some("  "), None, "", None);
        assert!(payload.system_instruction.is_none());
    }

    #[test]
    fn inline_data_uses_wire_field_names() {
        let payload = build_payload(&[Message::user("look")], None, Some(&image()), "", None);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
    }
}
