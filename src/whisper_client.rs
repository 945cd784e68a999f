// OpenAI Whisper transcription client (verbose_json with timestamps)

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ServiceError;
use crate::services::{classify_http_failure, classify_transport_error, Transcriber};
use crate::types::{Transcript, TranscriptSegment, TranscriptWord};

#[derive(Clone)]
pub struct WhisperClient {
    api_key: String,
    client: Client,
    base_url: String,
    model: String,
    language: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct WhisperSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Deserialize, Debug)]
pub struct WhisperWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Deserialize, Debug)]
pub struct WhisperResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
    #[serde(default)]
    pub words: Vec<WhisperWord>,
}

impl From<WhisperResponse> for Transcript {
    fn from(response: WhisperResponse) -> Self {
        Transcript {
            full_text: response.text.trim().to_string(),
            duration: response.duration,
            segments: response
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    text: s.text.trim().to_string(),
                    start: s.start,
                    end: s.end,
                })
                .collect(),
            words: response
                .words
                .into_iter()
                .map(|w| TranscriptWord {
                    text: w.word,
                    start: w.start,
                    end: w.end,
                })
                .collect(),
        }
    }
}

impl WhisperClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(Duration::from_secs(180))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            language: None,
        }
    }

    /// ISO-639-1 hint, e.g. `ko`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, ServiceError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ServiceError::Failed(format!("cannot read {}: {}", audio_path.display(), e)))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| ServiceError::Failed(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("Whisper API error ({}): {}", status, error_text);
            return Err(classify_http_failure(status.as_u16(), &error_text));
        }

        let body: WhisperResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Failed(format!("Failed to parse transcription: {}", e)))?;
        Ok(body.into())
    }
}
