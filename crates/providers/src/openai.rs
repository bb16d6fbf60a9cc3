use crate::prompt::{build_prompt, parse_response, PromptMode};
use crate::{ClassificationService, ClassifyRequest, Judgement, ProviderError};
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
const MIN_CALL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Keeps successive calls at least `MIN_CALL_INTERVAL` apart.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_CALL_INTERVAL {
                tokio::time::sleep(MIN_CALL_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn chat<T: Serialize + Sync>(
        &self,
        body: &T,
        timeout: Duration,
    ) -> Result<Judgement, ProviderError> {
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        self.pace().await;
        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(ProviderError::RequestFailed(format!(
                "status {} body {:?}",
                status, body
            )));
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::BadResponse("no choices".into()))?;
        debug!(reply = %content, "classification reply");
        parse_response(&content)
    }

    async fn text_request(&self, prompt: String) -> Result<Judgement, ProviderError> {
        #[derive(Serialize)]
        struct ChatMessage {
            role: &'static str,
            content: String,
        }
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage>,
            temperature: f32,
        }

        let body = ChatRequest {
            model: &self.cfg.text_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.3,
        };
        self.chat(&body, self.cfg.timeout).await
    }
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

#[async_trait::async_trait]
impl ClassificationService for OpenAiProvider {
    async fn classify(&self, req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        let prompt = build_prompt(
            req.filename,
            req.destinations,
            req.corrections,
            PromptMode::FilenameOnly,
        );
        self.text_request(prompt).await
    }

    async fn classify_with_content(
        &self,
        req: &ClassifyRequest<'_>,
        content: &str,
    ) -> Result<Judgement, ProviderError> {
        let prompt = build_prompt(
            req.filename,
            req.destinations,
            req.corrections,
            PromptMode::TextContent(content),
        );
        self.text_request(prompt).await
    }

    async fn classify_image(&self, req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        #[derive(Serialize)]
        struct ImageUrl {
            url: String,
            detail: &'static str,
        }
        #[derive(Serialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum Part {
            Text { text: String },
            ImageUrl { image_url: ImageUrl },
        }
        #[derive(Serialize)]
        struct VisionMessage {
            role: &'static str,
            content: Vec<Part>,
        }
        #[derive(Serialize)]
        struct VisionRequest<'a> {
            model: &'a str,
            messages: Vec<VisionMessage>,
            temperature: f32,
            max_tokens: u32,
        }

        let meta = tokio::fs::metadata(req.path).await?;
        if meta.len() > MAX_IMAGE_BYTES {
            return Err(ProviderError::TooLarge {
                actual_mb: meta.len() as f64 / (1024.0 * 1024.0),
                max_mb: MAX_IMAGE_BYTES / (1024 * 1024),
            });
        }
        let bytes = tokio::fs::read(req.path).await?;
        let data_url = format!(
            "data:{};base64,{}",
            image_mime(req.path),
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        let prompt = build_prompt(
            req.filename,
            req.destinations,
            req.corrections,
            PromptMode::Vision,
        );
        let body = VisionRequest {
            model: &self.cfg.vision_model,
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    Part::Text { text: prompt },
                    Part::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url,
                            detail: "low",
                        },
                    },
                ],
            }],
            temperature: 0.3,
            max_tokens: 300,
        };
        // Vision replies take noticeably longer.
        self.chat(&body, self.cfg.timeout * 2).await
    }
}
