//! Slot-extraction gateway implementations.
//!
//! `HttpExtractionClient` talks to the language-understanding service.
//! `RuleBasedExtractor` is a deterministic offline fallback used by
//! scripted runs and tests; it only recognises clearly structured values
//! (emails, phone numbers, dates, enumerated options, "my X is Y"
//! phrasings) and leaves everything else to the raw-transcript fallback.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::catalog::DataType;

use super::{
    ExtractedValue, ExtractionGateway, ExtractionRequest, ExtractionResult, FieldSchema,
    GatewayError,
};

/// Language-understanding HTTP client
pub struct HttpExtractionClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

/// Response from the extraction service
#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(rename = "extracted_values", default)]
    values: BTreeMap<String, ExtractedValue>,
}

impl HttpExtractionClient {
    /// Create a new client
    pub fn new(endpoint: String, token: String) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables (INTAKE_EXTRACT_ENDPOINT,
    /// INTAKE_EXTRACT_TOKEN)
    pub fn from_env() -> Result<Self, GatewayError> {
        let endpoint = std::env::var("INTAKE_EXTRACT_ENDPOINT").map_err(|_| {
            GatewayError::ExtractionFailed(
                "INTAKE_EXTRACT_ENDPOINT environment variable required".to_string(),
            )
        })?;
        let token = std::env::var("INTAKE_EXTRACT_TOKEN").unwrap_or_default();
        Ok(Self::new(endpoint, token))
    }
}

#[async_trait]
impl ExtractionGateway for HttpExtractionClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ExtractionFailed(format!(
                "{}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: ExtractResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(ExtractionResult {
            values: parsed.values,
        })
    }
}

/// Deterministic pattern-based extractor, no network required
#[derive(Default)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self
    }

    fn match_field(transcript: &str, field: &FieldSchema) -> Option<ExtractedValue> {
        match field.data_type {
            DataType::Email => find_email(transcript).map(|v| ExtractedValue {
                value: v,
                confidence: Some(0.9),
            }),
            DataType::Phone => find_phone(transcript).map(|v| ExtractedValue {
                value: v,
                confidence: Some(0.85),
            }),
            DataType::Date => find_date(transcript).map(|v| ExtractedValue {
                value: v,
                confidence: Some(0.85),
            }),
            DataType::Enumerated => find_option(transcript, &field.options).map(|v| {
                ExtractedValue {
                    value: v,
                    confidence: Some(0.9),
                }
            }),
            DataType::Text | DataType::LongText => {
                find_labeled_phrase(transcript, &field.label).map(|v| ExtractedValue {
                    value: v,
                    confidence: Some(0.6),
                })
            }
        }
    }
}

#[async_trait]
impl ExtractionGateway for RuleBasedExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, GatewayError> {
        let mut values = BTreeMap::new();

        for field in &request.fields {
            if let Some(found) = Self::match_field(&request.transcript, field) {
                values.insert(field.name.clone(), found);
            }
        }

        Ok(ExtractionResult { values })
    }
}

/// First token containing '@' with a dot in the domain part
fn find_email(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '.'))
        .find(|t| {
            let mut parts = t.splitn(2, '@');
            let local = parts.next().unwrap_or("");
            let domain = parts.next().unwrap_or("");
            !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
        })
        .map(|t| t.to_string())
}

/// Longest run of phone-ish characters with at least 7 digits
fn find_phone(text: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let mut current = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() || ("()-+. ".contains(c) && !current.is_empty()) {
            current.push(c);
        } else {
            consider_phone(&mut best, &current);
            current.clear();
        }
    }
    consider_phone(&mut best, &current);

    best
}

fn consider_phone(best: &mut Option<String>, candidate: &str) {
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    if (7..=15).contains(&digits) {
        let trimmed = candidate.trim().to_string();
        let best_digits = best
            .as_deref()
            .map(|b| b.chars().filter(|c| c.is_ascii_digit()).count())
            .unwrap_or(0);
        if digits > best_digits {
            *best = Some(trimmed);
        }
    }
}

/// A token shaped like YYYY-MM-DD or MM/DD/YYYY
fn find_date(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| c == ',' || c == '.'))
        .find(|t| {
            chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d").is_ok()
                || chrono::NaiveDate::parse_from_str(t, "%m/%d/%Y").is_ok()
        })
        .map(|t| t.to_string())
}

/// Case-insensitive whole-word-ish match of an enumerated option
fn find_option(text: &str, options: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    options
        .iter()
        .find(|opt| lower.contains(&opt.to_lowercase()))
        .cloned()
}

/// "my {label} is X" / "{label} is X" phrasing; captures up to the next
/// sentence boundary. ASCII-lowered so byte offsets stay aligned with
/// the original text.
fn find_labeled_phrase(text: &str, label: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let needle = format!("{} is ", label.to_ascii_lowercase());

    let start = lower.find(&needle)? + needle.len();
    let rest = &text[start..];

    let end = rest
        .find(|c| c == '.' || c == ',' || c == ';' || c == '!' || c == '?')
        .unwrap_or(rest.len());

    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str, label: &str, data_type: DataType, options: &[&str]) -> FieldSchema {
        FieldSchema {
            name: name.to_string(),
            label: label.to_string(),
            data_type,
            required: true,
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_rule_based_email_and_phone() {
        let extractor = RuleBasedExtractor::new();
        let request = ExtractionRequest {
            transcript: "You can reach me at jane.doe@example.com or 555-867-5309".to_string(),
            fields: vec![
                schema("contact_email", "email address", DataType::Email, &[]),
                schema("phone", "phone number", DataType::Phone, &[]),
            ],
            existing: BTreeMap::new(),
        };

        let result = extractor.extract(&request).await.unwrap();
        assert_eq!(result.values["contact_email"].value, "jane.doe@example.com");
        let phone_digits: String = result.values["phone"]
            .value
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        assert_eq!(phone_digits, "5558675309");
    }

    #[tokio::test]
    async fn test_rule_based_enumerated_and_phrase() {
        let extractor = RuleBasedExtractor::new();
        let request = ExtractionRequest {
            transcript: "My insurance plan is PPO and my first name is Jane.".to_string(),
            fields: vec![
                schema("plan_type", "plan type", DataType::Enumerated, &["HMO", "PPO"]),
                schema("first_name", "first name", DataType::Text, &[]),
            ],
            existing: BTreeMap::new(),
        };

        let result = extractor.extract(&request).await.unwrap();
        assert_eq!(result.values["plan_type"].value, "PPO");
        assert_eq!(result.values["first_name"].value, "Jane");
    }

    #[tokio::test]
    async fn test_rule_based_no_match_is_empty() {
        let extractor = RuleBasedExtractor::new();
        let request = ExtractionRequest {
            transcript: "I would rather not say".to_string(),
            fields: vec![schema("contact_email", "email address", DataType::Email, &[])],
            existing: BTreeMap::new(),
        };

        let result = extractor.extract(&request).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_find_date_formats() {
        assert_eq!(
            find_date("I was born on 1990-04-12, in spring"),
            Some("1990-04-12".to_string())
        );
        assert_eq!(
            find_date("on 04/12/1990 I think"),
            Some("04/12/1990".to_string())
        );
        assert_eq!(find_date("sometime in April"), None);
    }
}
