//! HTTP client for the downstream record store.
//!
//! Two independent operations with no shared transaction: create the
//! subject record, then create the intake submission referencing it. The
//! submission controller owns the ordering and the idempotency keying.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::{GatewayError, PersistenceGateway, SubjectRecord, SubmissionRecord};

/// Record store HTTP client
pub struct HttpPersistenceClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

/// Identifier returned by both create operations
#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: Uuid,
}

impl HttpPersistenceClient {
    /// Create a new client
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables (INTAKE_PERSIST_ENDPOINT,
    /// INTAKE_PERSIST_TOKEN)
    pub fn from_env() -> Result<Self, GatewayError> {
        let base_url = std::env::var("INTAKE_PERSIST_ENDPOINT").map_err(|_| {
            GatewayError::PersistenceFailed(
                "INTAKE_PERSIST_ENDPOINT environment variable required".to_string(),
            )
        })?;
        let token = std::env::var("INTAKE_PERSIST_TOKEN").unwrap_or_default();
        Ok(Self::new(base_url, token))
    }

    async fn post_created<T: serde::Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<Uuid, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::PersistenceFailed(format!(
                "{} {}: {}",
                path,
                status,
                body.trim()
            )));
        }

        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(created.id)
    }
}

#[async_trait]
impl PersistenceGateway for HttpPersistenceClient {
    async fn create_subject(&self, record: &SubjectRecord) -> Result<Uuid, GatewayError> {
        self.post_created("/subjects", record).await
    }

    async fn create_submission(&self, record: &SubmissionRecord) -> Result<Uuid, GatewayError> {
        self.post_created("/submissions", record).await
    }
}
