// Google Cloud Text-to-Speech REST client (SSML input, MP3 output)

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ServiceError;
use crate::services::{classify_http_failure, classify_transport_error, SpeechSynthesizer};

#[derive(Clone)]
pub struct GoogleTtsClient {
    api_key: String,
    client: Client,
    base_url: String,
    language_code: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeRequest {
    pub input: SynthesisInput,
    pub voice: VoiceSelection,
    pub audio_config: AudioConfig,
}

#[derive(Serialize, Debug)]
pub struct SynthesisInput {
    pub ssml: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub language_code: String,
    pub name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    pub audio_encoding: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeResponse {
    pub audio_content: String,
}

/// Wrap narration in `<speak>`. Plain text is escaped; text that already
/// carries SSML tags (e.g. `<break time="500ms"/>`) is passed through.
pub fn to_ssml(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("<speak>") {
        return trimmed.to_string();
    }
    let body = if trimmed.contains('<') {
        trimmed.to_string()
    } else {
        trimmed
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    };
    format!("<speak>{}</speak>", body)
}

impl GoogleTtsClient {
    pub fn new(api_key: String, language_code: impl Into<String>) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: "https://texttospeech.googleapis.com/v1".to_string(),
            language_code: language_code.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build_request(&self, text: &str, voice: &str) -> SynthesizeRequest {
        SynthesizeRequest {
            input: SynthesisInput { ssml: to_ssml(text) },
            voice: VoiceSelection {
                language_code: self.language_code.clone(),
                name: voice.to_string(),
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3".to_string(),
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTtsClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ServiceError> {
        let url = format!("{}/text:synthesize", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.build_request(text, voice))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("Google TTS API error ({}): {}", status, error_text);
            return Err(classify_http_failure(status.as_u16(), &error_text));
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Failed(format!("Failed to parse TTS response: {}", e)))?;
        let audio = STANDARD
            .decode(body.audio_content.as_bytes())
            .map_err(|e| ServiceError::Failed(format!("Invalid audioContent: {}", e)))?;
        if audio.is_empty() {
            return Err(ServiceError::Failed("Google TTS returned empty audio".into()));
        }
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssml_wrapping() {
        assert_eq!(to_ssml("x < y & z"), "<speak>x &lt; y &amp; z</speak>");
        assert_eq!(
            to_ssml("잠깐<break time=\"500ms\"/>다음"),
            "<speak>잠깐<break time=\"500ms\"/>다음</speak>"
        );
        assert_eq!(to_ssml("<speak>done</speak>"), "<speak>done</speak>");
    }

    #[test]
    fn test_request_uses_camel_case() {
        let client = GoogleTtsClient::new("key".into(), "ko-KR");
        let json = serde_json::to_value(client.build_request("hi", "ko-KR-Neural2-C")).unwrap();
        assert_eq!(json["voice"]["languageCode"], "ko-KR");
        assert_eq!(json["voice"]["name"], "ko-KR-Neural2-C");
        assert_eq!(json["audioConfig"]["audioEncoding"], "MP3");
        assert_eq!(json["input"]["ssml"], "<speak>hi</speak>");
    }

    #[test]
    fn test_response_decodes() {
        let body: SynthesizeResponse =
            serde_json::from_str(r#"{"audioContent":"SUQz"}"#).unwrap();
        assert_eq!(STANDARD.decode(body.audio_content).unwrap(), b"ID3".to_vec());
    }
}
