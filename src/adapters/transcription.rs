//! HTTP client for the speech-to-text service.
//!
//! Posts the finished clip as multipart audio plus format metadata and
//! expects `{ text, confidence }` back. Auth: bearer token.

use async_trait::async_trait;
use serde::Deserialize;

use crate::capture::RecordingClip;

use super::{GatewayError, Transcript, TranscriptionGateway};

/// Speech-to-text HTTP client
pub struct HttpTranscriptionClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

/// Response from the transcription service
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl HttpTranscriptionClient {
    /// Create a new client
    pub fn new(endpoint: String, token: String) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables (INTAKE_TRANSCRIBE_ENDPOINT,
    /// INTAKE_TRANSCRIBE_TOKEN)
    pub fn from_env() -> Result<Self, GatewayError> {
        let endpoint = std::env::var("INTAKE_TRANSCRIBE_ENDPOINT").map_err(|_| {
            GatewayError::TranscriptionFailed(
                "INTAKE_TRANSCRIBE_ENDPOINT environment variable required".to_string(),
            )
        })?;
        let token = std::env::var("INTAKE_TRANSCRIBE_TOKEN").unwrap_or_default();
        Ok(Self::new(endpoint, token))
    }
}

#[async_trait]
impl TranscriptionGateway for HttpTranscriptionClient {
    async fn transcribe(&self, clip: &RecordingClip) -> Result<Transcript, GatewayError> {
        let audio_part = reqwest::multipart::Part::bytes(clip.audio.clone())
            .file_name("clip")
            .mime_str(&clip.mime_type)
            .map_err(|e| GatewayError::TranscriptionFailed(format!("bad mime type: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("audio", audio_part)
            .text("mime_type", clip.mime_type.clone())
            .text("duration_ms", clip.duration.as_millis().to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::TranscriptionFailed(format!(
                "{}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if parsed.text.trim().is_empty() {
            return Err(GatewayError::TranscriptionFailed(
                "service returned an empty transcript".to_string(),
            ));
        }

        Ok(Transcript {
            text: parsed.text.trim().to_string(),
            confidence: parsed.confidence,
        })
    }
}
