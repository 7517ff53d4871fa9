use super::*;
use crate::config::ProvidersConfig;

#[test]
fn client_configuration() {
    let config = ProvidersConfig {
        generation_url: "https://llm-host/v1/chat/completions".to_string(),
        generation_model: "test-llm".to_string(),
        api_key: Some("secret".to_string()),
        temperature: 0.2,
        max_tokens: 512,
        ..ProvidersConfig::default()
    };
    let client = HttpGenerationClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-llm");
    assert_eq!(client.endpoint.host_str(), Some("llm-host"));
    assert_eq!(client.api_key.as_deref(), Some("secret"));
    assert!((client.temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(client.max_tokens, 512);
}

#[test]
fn invalid_endpoint_is_a_config_error() {
    let config = ProvidersConfig {
        generation_url: "::nope::".to_string(),
        ..ProvidersConfig::default()
    };

    let result = HttpGenerationClient::new(&config);
    assert!(matches!(result, Err(RagError::Config(_))));
}

#[test]
fn system_message_embeds_the_context() {
    let message = HttpGenerationClient::system_message("EO 14067 concerns digital assets.");

    assert!(message.contains("CONTEXT:\nEO 14067 concerns digital assets."));
    assert!(message.contains("Based solely on the above context"));
    assert!(message.contains("I don't have enough information"));
}

#[test]
fn chat_request_wire_shape() {
    let request = ChatRequest {
        model: "test-llm".to_string(),
        messages: vec![
            ChatTurn {
                role: ChatRole::System,
                content: "sys".to_string(),
            },
            ChatTurn {
                role: ChatRole::User,
                content: "hello".to_string(),
            },
        ],
        temperature: 0.7,
        max_tokens: 800,
    };

    let json = serde_json::to_string(&request).expect("serialize");
    assert!(json.contains("\"role\":\"system\""));
    assert!(json.contains("\"role\":\"user\""));
    assert!(json.contains("\"max_tokens\":800"));
}

#[test]
fn chat_response_parses_with_usage() {
    let json = r#"{
        "choices": [{"message": {"role": "assistant", "content": "Answer text."}}],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
    }"#;

    let response: ChatResponse = serde_json::from_str(json).expect("parse");
    assert_eq!(response.choices[0].message.content, "Answer text.");
    assert_eq!(response.usage.map(|u| u.total_tokens), Some(150));
}

#[test]
fn chat_response_parses_without_usage() {
    let json = r#"{"choices": [{"message": {"content": "Answer."}}]}"#;

    let response: ChatResponse = serde_json::from_str(json).expect("parse");
    assert_eq!(response.choices.len(), 1);
    assert!(response.usage.is_none());
}
