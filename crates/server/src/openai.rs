use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shopassist_agent::oracles::{
    ChatMessage, ClassificationOracle, CompletionOracle, Confirmation, ConfirmationOracle,
    ExtractionOracle, ModerationOracle, ModerationVerdict, OracleError, StructuredRecord,
};
use shopassist_core::config::{LlmConfig, LlmProvider};
use shopassist_core::domain::features::Taxonomy;
use shopassist_core::domain::requirement::{Attribute, Level};
use thiserror::Error;
use tracing::debug;

const CHAT_PATH: &str = "/v1/chat/completions";
const MODERATION_PATH: &str = "/v1/moderations";

const CLASSIFICATION_FUNCTION_NAME: &str = "classify_laptop";

const CONFIRMATION_PROMPT: &str = "Verify whether the input contains valid values for GPU \
intensity, display quality, portability, multitasking and processing speed (each must be low, \
medium or high) and a numeric budget. Answer Yes if every value is present and valid, otherwise \
answer No.";

const EXTRACTION_PROMPT: &str = "Extract laptop requirements from the input accurately.";

const MODERATION_PROMPT: &str = "You are a content moderation classifier. Reply with the single \
word flagged if the input contains hateful, harassing, violent, sexual or self-harm content, \
otherwise reply with the single word safe.";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("llm.api_key is required for provider `openai`")]
    MissingApiKey,
    #[error("llm.base_url is required for provider `ollama`")]
    MissingBaseUrl,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// One HTTP client backing every oracle contract against an
/// OpenAI-compatible API. Ollama exposes the same chat endpoint but has no
/// moderation endpoint, so moderation goes through a classifier prompt there.
pub struct OpenAiOracle {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    timeout_ms: u64,
}

impl OpenAiOracle {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = match config.provider {
            LlmProvider::OpenAi => Some(config.api_key.clone().ok_or(ProviderError::MissingApiKey)?),
            LlmProvider::Ollama => config.api_key.clone(),
        };
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(url)) => url.trim_end_matches('/').to_string(),
            (LlmProvider::OpenAi, None) => "https://api.openai.com".to_string(),
            (LlmProvider::Ollama, None) => return Err(ProviderError::MissingBaseUrl),
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key,
            model: config.model.clone(),
            timeout_ms: config.timeout_secs.saturating_mul(1000),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, OracleError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                OracleError::Timeout(self.timeout_ms)
            } else {
                OracleError::Unavailable(format!("request to {path} failed: {error}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("{path} returned HTTP {status}")));
        }

        response
            .json::<R>()
            .await
            .map_err(|error| OracleError::Schema(format!("failed to decode {path} response: {error}")))
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ResponseMessage, OracleError> {
        let response: ChatResponse = self.post(CHAT_PATH, &request).await?;
        debug!(
            event_name = "oracle.http.chat_completed",
            model = %self.model,
            choices = response.choices.len(),
            "chat completion received"
        );
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| OracleError::Schema("chat response carried no choices".to_string()))
    }

    async fn chat_text(
        &self,
        messages: Vec<WireMessage<'_>>,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, OracleError> {
        let message = self
            .chat(ChatRequest {
                model: &self.model,
                messages,
                temperature,
                max_tokens,
                tools: None,
                tool_choice: None,
            })
            .await?;
        message
            .content
            .ok_or_else(|| OracleError::Schema("chat response carried no content".to_string()))
    }

    /// Forces a call to `function` and returns its parsed arguments.
    async fn call_function(
        &self,
        system: &str,
        input: &str,
        function: &Value,
    ) -> Result<StructuredRecord, OracleError> {
        let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
        let message = self
            .chat(ChatRequest {
                model: &self.model,
                messages: vec![WireMessage::new("system", system), WireMessage::new("user", input)],
                temperature: 0.1,
                max_tokens: None,
                tools: Some(json!([{ "type": "function", "function": function }])),
                tool_choice: Some(json!({ "type": "function", "function": { "name": name } })),
            })
            .await?;

        let call = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .find(|call| call.function.name == name)
            .ok_or_else(|| OracleError::Schema(format!("reply did not call `{name}`")))?;
        parse_arguments(&call.function.arguments)
    }
}

#[async_trait]
impl CompletionOracle for OpenAiOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let wire = messages
            .iter()
            .map(|message| WireMessage::new(message.role.as_str(), &message.content))
            .collect();
        self.chat_text(wire, 0.3, Some(300)).await
    }
}

#[async_trait]
impl ModerationOracle for OpenAiOracle {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, OracleError> {
        match self.provider {
            LlmProvider::OpenAi => {
                let response: ModerationResponse =
                    self.post(MODERATION_PATH, &json!({ "input": text })).await?;
                let flagged = response
                    .results
                    .first()
                    .map(|result| result.flagged)
                    .ok_or_else(|| OracleError::Schema("moderation returned no results".into()))?;
                Ok(if flagged { ModerationVerdict::Flagged } else { ModerationVerdict::NotFlagged })
            }
            LlmProvider::Ollama => {
                let reply = self
                    .chat_text(
                        vec![
                            WireMessage::new("system", MODERATION_PROMPT),
                            WireMessage::new("user", text),
                        ],
                        0.0,
                        Some(5),
                    )
                    .await?;
                Ok(if first_word(&reply) == "flagged" {
                    ModerationVerdict::Flagged
                } else {
                    ModerationVerdict::NotFlagged
                })
            }
        }
    }
}

#[async_trait]
impl ConfirmationOracle for OpenAiOracle {
    async fn confirm(&self, assistant_text: &str) -> Result<Confirmation, OracleError> {
        let input = format!("Input: {assistant_text}");
        let reply = self
            .chat_text(
                vec![
                    WireMessage::new("system", CONFIRMATION_PROMPT),
                    WireMessage::new("user", &input),
                ],
                0.1,
                Some(5),
            )
            .await?;
        Ok(parse_confirmation(&reply))
    }
}

#[async_trait]
impl ExtractionOracle for OpenAiOracle {
    async fn extract(&self, text: &str, schema: &Value) -> Result<StructuredRecord, OracleError> {
        self.call_function(EXTRACTION_PROMPT, text, schema).await
    }
}

#[async_trait]
impl ClassificationOracle for OpenAiOracle {
    async fn classify(
        &self,
        description: &str,
        taxonomy: &Taxonomy,
    ) -> Result<StructuredRecord, OracleError> {
        let system = format!(
            "Classify laptop features based on the description. Use only low, medium or high.\n\
             Rules:\n{}",
            taxonomy.render()
        );
        let input = format!("Classify: {description}");
        self.call_function(&system, &input, &classification_function()).await
    }
}

fn classification_function() -> Value {
    let mut properties = Map::new();
    for attribute in Attribute::ALL {
        properties.insert(
            attribute.record_key().to_string(),
            json!({
                "type": "string",
                "enum": Level::ALL.iter().map(|level| level.as_str()).collect::<Vec<_>>(),
            }),
        );
    }
    json!({
        "name": CLASSIFICATION_FUNCTION_NAME,
        "description": "Record the classified feature levels of one laptop",
        "parameters": {
            "type": "object",
            "required": Attribute::ALL.iter().map(|attribute| attribute.record_key()).collect::<Vec<_>>(),
            "properties": properties,
        }
    })
}

fn parse_arguments(arguments: &str) -> Result<StructuredRecord, OracleError> {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(OracleError::Schema("function arguments were not an object".to_string())),
        Err(error) => Err(OracleError::Schema(format!("function arguments were not JSON: {error}"))),
    }
}

fn first_word(reply: &str) -> String {
    reply
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase()
}

fn parse_confirmation(reply: &str) -> Confirmation {
    if first_word(reply) == "yes" {
        Confirmation::Complete
    } else {
        Confirmation::Incomplete
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> WireMessage<'a> {
    fn new(role: &'a str, content: &'a str) -> Self {
        Self { role, content }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some compatible gateways send an explicit `null` here
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use shopassist_agent::oracles::{
        ChatMessage, ClassificationOracle, CompletionOracle, Confirmation, ConfirmationOracle,
        ExtractionOracle, ModerationOracle, ModerationVerdict, OracleError,
    };
    use shopassist_core::config::{LlmConfig, LlmProvider};
    use shopassist_core::domain::features::Taxonomy;

    use super::{parse_confirmation, OpenAiOracle, ProviderError};

    #[derive(Clone)]
    struct FakeApi {
        status: StatusCode,
        chat_reply: Value,
        moderation_reply: Value,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    impl FakeApi {
        fn new(chat_reply: Value) -> Self {
            Self {
                status: StatusCode::OK,
                chat_reply,
                moderation_reply: json!({ "results": [{ "flagged": false }] }),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, headers: &HeaderMap, body: Value) {
            let auth = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((auth, body));
            }
        }

        fn requests(&self) -> Vec<(Option<String>, Value)> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    async fn chat(
        State(api): State<FakeApi>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        api.record(&headers, body);
        (api.status, Json(api.chat_reply.clone()))
    }

    async fn moderations(
        State(api): State<FakeApi>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        api.record(&headers, body);
        (api.status, Json(api.moderation_reply.clone()))
    }

    async fn serve(api: FakeApi) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        let router = Router::new()
            .route("/v1/chat/completions", post(chat))
            .route("/v1/moderations", post(moderations))
            .with_state(api);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    fn config(provider: LlmProvider, base_url: String) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("sk-test".to_string())),
            base_url: Some(base_url),
            model: "gpt-test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            retry_base_delay_ms: 0,
            max_concurrency: 1,
        }
    }

    fn content_reply(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    fn tool_reply(name: &str, arguments: &str) -> Value {
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": name, "arguments": arguments }
                    }]
                }
            }]
        })
    }

    #[tokio::test]
    async fn completion_sends_history_with_bearer_auth() {
        let api = FakeApi::new(content_reply("What is your budget?"));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api.clone()).await))
                .expect("oracle");

        let reply = oracle
            .complete(&[ChatMessage::system("be helpful"), ChatMessage::user("I game")])
            .await
            .expect("completion");

        assert_eq!(reply, "What is your budget?");
        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(requests[0].1["model"], "gpt-test");
        assert_eq!(requests[0].1["messages"][1]["role"], "user");
        assert_eq!(requests[0].1["messages"][1]["content"], "I game");
    }

    #[tokio::test]
    async fn null_tool_calls_on_plain_completions_are_accepted() {
        let api = FakeApi::new(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "Hello there!", "tool_calls": null }
            }]
        }));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api).await))
                .expect("oracle");

        let reply = oracle.complete(&[ChatMessage::user("hi")]).await.expect("completion");

        assert_eq!(reply, "Hello there!");
    }

    #[tokio::test]
    async fn null_tool_calls_on_forced_calls_are_schema_errors() {
        let api = FakeApi::new(json!({
            "choices": [{ "message": { "role": "assistant", "content": "no", "tool_calls": null } }]
        }));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api).await))
                .expect("oracle");
        let schema = json!({ "name": "extract_user_info", "parameters": { "type": "object" } });

        let error = oracle.extract("summary", &schema).await.expect_err("no call");

        assert!(matches!(
            error,
            OracleError::Schema(ref message) if message.contains("extract_user_info")
        ));
    }

    #[tokio::test]
    async fn extraction_forces_the_function_and_parses_arguments() {
        let api = FakeApi::new(tool_reply(
            "extract_user_info",
            r#"{"GPU intensity":"high","Budget":150000}"#,
        ));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api.clone()).await))
                .expect("oracle");
        let schema = json!({ "name": "extract_user_info", "parameters": { "type": "object" } });

        let record = oracle.extract("summary", &schema).await.expect("record");

        assert_eq!(record.get("GPU intensity"), Some(&json!("high")));
        assert_eq!(record.get("Budget"), Some(&json!(150000)));
        let body = &api.requests()[0].1;
        assert_eq!(body["tool_choice"]["function"]["name"], "extract_user_info");
    }

    #[tokio::test]
    async fn malformed_arguments_are_schema_errors() {
        let api = FakeApi::new(tool_reply("classify_laptop", "not json"));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api).await))
                .expect("oracle");

        let error = oracle
            .classify("RTX 4060", &Taxonomy::default())
            .await
            .expect_err("schema error");

        assert!(matches!(error, OracleError::Schema(_)));
    }

    #[tokio::test]
    async fn server_errors_map_to_unavailable() {
        let mut api = FakeApi::new(content_reply("unused"));
        api.status = StatusCode::SERVICE_UNAVAILABLE;
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api).await))
                .expect("oracle");

        let error = oracle.complete(&[ChatMessage::user("hi")]).await.expect_err("503");

        assert!(matches!(error, OracleError::Unavailable(_)));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn openai_moderation_uses_moderation_endpoint() {
        let mut api = FakeApi::new(content_reply("unused"));
        api.moderation_reply = json!({ "results": [{ "flagged": true }] });
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api.clone()).await))
                .expect("oracle");

        let verdict = oracle.moderate("something nasty").await.expect("verdict");

        assert_eq!(verdict, ModerationVerdict::Flagged);
        assert_eq!(api.requests()[0].1["input"], "something nasty");
    }

    #[tokio::test]
    async fn ollama_moderation_goes_through_a_classifier_prompt() {
        let api = FakeApi::new(content_reply("Safe."));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::Ollama, serve(api.clone()).await))
                .expect("oracle");

        let verdict = oracle.moderate("I like thin laptops").await.expect("verdict");

        assert_eq!(verdict, ModerationVerdict::NotFlagged);
        let body = &api.requests()[0].1;
        assert!(body.get("messages").is_some(), "moderated via chat, not /v1/moderations");
    }

    #[tokio::test]
    async fn confirmation_reply_maps_to_enum() {
        let api = FakeApi::new(content_reply("Yes."));
        let oracle =
            OpenAiOracle::from_config(&config(LlmProvider::OpenAi, serve(api).await))
                .expect("oracle");

        assert_eq!(oracle.confirm("summary").await.expect("confirm"), Confirmation::Complete);
        assert_eq!(parse_confirmation("No"), Confirmation::Incomplete);
        assert_eq!(parse_confirmation("  yes, all present"), Confirmation::Complete);
        assert_eq!(parse_confirmation("Not yet"), Confirmation::Incomplete);
    }

    #[test]
    fn provider_requirements_are_enforced() {
        let mut openai = config(LlmProvider::OpenAi, "http://localhost".to_string());
        openai.api_key = None;
        assert!(matches!(OpenAiOracle::from_config(&openai), Err(ProviderError::MissingApiKey)));

        let mut ollama = config(LlmProvider::Ollama, "http://localhost:11434".to_string());
        ollama.base_url = None;
        ollama.api_key = None;
        assert!(matches!(OpenAiOracle::from_config(&ollama), Err(ProviderError::MissingBaseUrl)));
    }
}
