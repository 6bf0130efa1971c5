//! Request body construction for `/v1/chat/completions`.

use serde::Serialize;

use reel_core::provider::GenerationRequest;
use reel_core::task::GenerationMode;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: MediaUrl },
    VideoUrl { video_url: MediaUrl },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaUrl {
    pub url: String,
}

impl ContentPart {
    fn text(text: &str) -> Self {
        Self::Text {
            text: text.to_string(),
        }
    }

    fn image(url: &str) -> Self {
        Self::ImageUrl {
            image_url: MediaUrl {
                url: url.to_string(),
            },
        }
    }

    fn video(url: &str) -> Self {
        Self::VideoUrl {
            video_url: MediaUrl {
                url: url.to_string(),
            },
        }
    }
}

/// Shape the user message for the request's mode. Requests are validated
/// before this runs; the prompt-only fallbacks cover hand-built requests.
pub fn build_content(request: &GenerationRequest) -> MessageContent {
    let payload = &request.payload;
    let prompt = payload.prompt.as_str();

    match request.mode {
        GenerationMode::TextToVideo => MessageContent::Text(prompt.to_string()),
        GenerationMode::ImageToVideo => match payload.image() {
            Some(image) => {
                MessageContent::Parts(vec![ContentPart::text(prompt), ContentPart::image(image)])
            }
            None => MessageContent::Text(prompt.to_string()),
        },
        GenerationMode::Remix => match payload.remix_source() {
            Some(source) => MessageContent::Text(format!("{source}{prompt}")),
            None => MessageContent::Text(prompt.to_string()),
        },
        GenerationMode::CreateCharacter => match payload.video() {
            Some(video) => MessageContent::Parts(vec![ContentPart::video(video)]),
            None => MessageContent::Text(prompt.to_string()),
        },
        GenerationMode::CharacterToVideo => match payload.video() {
            Some(video) => {
                MessageContent::Parts(vec![ContentPart::video(video), ContentPart::text(prompt)])
            }
            None => MessageContent::Text(prompt.to_string()),
        },
    }
}

pub fn build_request(request: &GenerationRequest) -> ChatRequest {
    ChatRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage {
            role: "user",
            content: build_content(request),
        }],
        stream: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::ids::TaskId;
    use reel_core::task::{Reference, TaskPayload};
    use serde_json::json;

    fn request(mode: GenerationMode, payload: TaskPayload) -> GenerationRequest {
        GenerationRequest {
            task_id: TaskId::new(),
            mode,
            model: "sora-video-landscape-10s".into(),
            payload,
        }
    }

    #[test]
    fn text_to_video_is_plain_prompt() {
        let body = build_request(&request(
            GenerationMode::TextToVideo,
            TaskPayload::text("a cat surfing"),
        ));
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({
                "model": "sora-video-landscape-10s",
                "messages": [{"role": "user", "content": "a cat surfing"}],
                "stream": true
            })
        );
    }

    #[test]
    fn image_to_video_parts_order() {
        let payload = TaskPayload::with_reference("zoom in", Reference::Image("data:image/png;base64,AA".into()));
        let content = build_content(&request(GenerationMode::ImageToVideo, payload));
        assert_eq!(
            serde_json::to_value(content).unwrap(),
            json!([
                {"type": "text", "text": "zoom in"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}}
            ])
        );
    }

    #[test]
    fn image_to_video_without_image_falls_back() {
        let content = build_content(&request(GenerationMode::ImageToVideo, TaskPayload::text("p")));
        assert_eq!(content, MessageContent::Text("p".into()));
    }

    #[test]
    fn remix_prefixes_source() {
        let payload = TaskPayload::with_reference("make it night", Reference::RemixSource("s_abc ".into()));
        let content = build_content(&request(GenerationMode::Remix, payload));
        assert_eq!(content, MessageContent::Text("s_abc make it night".into()));
    }

    #[test]
    fn create_character_ignores_prompt() {
        let payload = TaskPayload::with_reference("Create character from video", Reference::Video("data:video/mp4;base64,BB".into()));
        let content = build_content(&request(GenerationMode::CreateCharacter, payload));
        assert_eq!(
            serde_json::to_value(content).unwrap(),
            json!([{"type": "video_url", "video_url": {"url": "data:video/mp4;base64,BB"}}])
        );
    }

    #[test]
    fn character_to_video_video_then_text() {
        let payload = TaskPayload::with_reference("dance", Reference::Video("v".into()));
        let content = build_content(&request(GenerationMode::CharacterToVideo, payload));
        assert_eq!(
            serde_json::to_value(content).unwrap(),
            json!([
                {"type": "video_url", "video_url": {"url": "v"}},
                {"type": "text", "text": "dance"}
            ])
        );
    }
}
