use crate::config::ApiConfig;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat, Stop,
    },
};
use async_trait::async_trait;
use std::time::Duration;

/// Failure of a single chat-completion call
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("response contained no message content")]
    EmptyResponse,

    #[error("environment variable {0} not found")]
    MissingApiKey(String),
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
}

/// A two-message chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub sampling: Sampling,
    /// Ask the service for a JSON object response
    pub json_response: bool,
}

/// Remote chat-completion capability
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Send one request and return the text of the first choice
    async fn complete(&self, request: &ChatRequest) -> Result<String, ClientError>;
}

/// Backend for any OpenAI-compatible chat-completions endpoint
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Option<Duration>,
}

impl OpenAiBackend {
    pub fn new(
        api_endpoint: &str,
        api_key: &str,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            model: model.into(),
            timeout,
        }
    }

    /// Create a backend from config, reading the API key from the configured variable
    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientError> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| ClientError::MissingApiKey(config.env_var_api_key.clone()))?;

        Ok(Self::new(
            &config.api_endpoint,
            &api_key,
            config.model.clone(),
            config.request_timeout_secs.map(Duration::from_secs),
        ))
    }

    /// Build the chat completion request
    fn build_request(&self, request: &ChatRequest) -> Result<CreateChatCompletionRequest, ClientError> {
        let system_message: ChatCompletionRequestMessage =
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()?
                .into();

        let user_message: ChatCompletionRequestMessage =
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.clone())
                .build()?
                .into();

        let sampling = &request.sampling;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages([system_message, user_message])
            .temperature(sampling.temperature)
            .top_p(sampling.top_p)
            .frequency_penalty(sampling.frequency_penalty)
            .presence_penalty(sampling.presence_penalty);

        if !sampling.stop.is_empty() {
            args.stop(Stop::StringArray(sampling.stop.clone()));
        }
        if request.json_response {
            args.response_format(ResponseFormat::JsonObject);
        }

        Ok(args.build()?)
    }

    /// Extract the text of the first choice
    fn extract_content(response: CreateChatCompletionResponse) -> Result<String, ClientError> {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(ClientError::EmptyResponse)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ClientError> {
        let request = self.build_request(request)?;
        let chat = self.client.chat();
        let call = chat.create(request);

        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| ClientError::Timeout(timeout))??,
            None => call.await?,
        };

        Self::extract_content(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn sample_request(json_response: bool) -> ChatRequest {
        ChatRequest {
            system: "Respond in JSON".to_string(),
            user: "Score this".to_string(),
            sampling: Sampling {
                temperature: 0.01,
                top_p: 0.1,
                frequency_penalty: 0.0,
                presence_penalty: 0.0,
                stop: vec![],
            },
            json_response,
        }
    }

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1_700_000_000u32,
            "model": "judge-model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "model": "judge-model",
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": "Respond in JSON" },
                    { "role": "user", "content": "Score this" }
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(r#"{"overall_score": 80}"#))
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&server.url(), "test-key", "judge-model", None);
        let content = backend.complete(&sample_request(true)).await.unwrap();

        assert_eq!(content, r#"{"overall_score": 80}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_empty_content_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(""))
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&server.url(), "test-key", "judge-model", None);
        let result = backend.complete(&sample_request(false)).await;

        assert!(matches!(result, Err(ClientError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_complete_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "bad request", "type": "invalid_request_error", "param": null, "code": null}}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&server.url(), "test-key", "judge-model", None);
        let result = backend.complete(&sample_request(true)).await;

        assert!(matches!(result, Err(ClientError::Api(_))));
    }

    #[tokio::test]
    async fn test_complete_times_out_on_silent_server() {
        // accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(300);
        let backend = OpenAiBackend::new(&format!("http://{addr}"), "test-key", "judge-model", Some(timeout));
        let started = std::time::Instant::now();
        let result = backend.complete(&sample_request(true)).await;

        assert!(matches!(result, Err(ClientError::Timeout(t)) if t == timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[test]
    fn test_from_config_missing_env_var() {
        let config = ApiConfig {
            env_var_api_key: "BENCHJUDGE_TEST_UNSET_KEY".to_string(),
            ..ApiConfig::judge_default()
        };

        unsafe {
            std::env::remove_var(&config.env_var_api_key);
        }

        let result = OpenAiBackend::from_config(&config);
        assert!(matches!(result, Err(ClientError::MissingApiKey(name)) if name == "BENCHJUDGE_TEST_UNSET_KEY"));
    }
}
