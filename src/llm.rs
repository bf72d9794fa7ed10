use rand::seq::SliceRandom;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};

use crate::config::{ChatSettings, GatewaySettings};
use crate::error::MinerError;
use crate::http::{build_client, default_headers, ensure_success};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    /// Sent as `variables.prompt` on gateways that template the system turn.
    pub system_prompt: Option<String>,
    pub user: String,
}

impl ChatRequest {
    pub fn user(model: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            user: user.into(),
        }
    }
}

pub trait ChatClient: Send + Sync {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError>;
}

impl<T: ChatClient + ?Sized> ChatClient for &T {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError> {
        (**self).chat(request)
    }
}

#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Vec<String>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<String>) -> Result<Self, MinerError> {
        if endpoints.is_empty() {
            return Err(MinerError::ConfigInvalid(
                "chat.endpoints must list at least one host:port".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    pub fn pick(&self) -> &str {
        self.endpoints
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.iter().any(|value| value == endpoint)
    }
}

fn read_json(response: Response, origin: &str) -> Result<Value, MinerError> {
    ensure_success(response, origin, |status, message| MinerError::ChatStatus {
        status,
        message,
    })?
    .json::<Value>()
    .map_err(|err| MinerError::ChatResponse(err.to_string()))
}

#[derive(Clone)]
pub struct OllamaChatClient {
    client: Client,
    pool: EndpointPool,
}

impl OllamaChatClient {
    pub fn new(settings: &ChatSettings) -> Result<Self, MinerError> {
        let pool = EndpointPool::new(settings.endpoints.clone())?;
        let client = build_client(default_headers()?, settings.timeout, MinerError::ChatHttp)?;
        Ok(Self { client, pool })
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn chat_url(endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}/api/chat", endpoint.trim_end_matches('/'))
        } else {
            format!("http://{endpoint}/api/chat")
        }
    }
}

pub fn ollama_payload(request: &ChatRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.user}));
    json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
    })
}

impl ChatClient for OllamaChatClient {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError> {
        let endpoint = self.pool.pick();
        let url = Self::chat_url(endpoint);
        let response = self
            .client
            .post(&url)
            .json(&ollama_payload(request))
            .send()
            .map_err(|err| MinerError::ChatHttp(format!("{endpoint}: {err}")))?;
        let body = read_json(response, endpoint)?;
        Ok(body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[derive(Clone)]
pub struct GatewayChatClient {
    client: Client,
    url: String,
}

impl GatewayChatClient {
    pub fn new(settings: &GatewaySettings) -> Result<Self, MinerError> {
        let url = settings
            .url
            .clone()
            .ok_or_else(|| MinerError::ConfigInvalid("gateway.url is not set".to_string()))?;
        let mut headers = default_headers()?;
        if let Some(key) = &settings.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?,
            );
        }
        let client = build_client(headers, settings.timeout, MinerError::ChatHttp)?;
        Ok(Self { client, url })
    }
}

pub fn gateway_payload(request: &ChatRequest) -> Value {
    json!({
        "messages": [{"content": request.user, "role": "user"}],
        "variables": {
            "model": request.model,
            "prompt": request.system_prompt.clone().unwrap_or_default(),
        },
    })
}

pub fn response_content(body: &Value) -> Option<&str> {
    body.pointer("/data/choices/0/message/content")
        .or_else(|| body.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)
}

impl ChatClient for GatewayChatClient {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError> {
        let response = self
            .client
            .post(&self.url)
            .json(&gateway_payload(request))
            .send()
            .map_err(|err| MinerError::ChatHttp(err.to_string()))?;
        let body = read_json(response, &self.url)?;
        response_content(&body)
            .map(str::to_string)
            .ok_or_else(|| MinerError::ChatResponse(truncate(&body.to_string(), 200)))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
