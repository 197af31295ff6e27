//! Overpass interpreter provider
//!
//! POSTs the rendered Overpass QL as the request body and counts the
//! returned `elements`. One call is one network attempt.

use crate::cache::FacilityItem;
use crate::config::RetrySettings;
use crate::fetcher::attempt::{extract_error_type, AttemptError, AttemptErrorType};
use crate::fetcher::{Endpoint, FacilityPayload, FacilityProvider, FacilityQuery};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Overpass JSON response
#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
    /// Set by the interpreter when the query hit a runtime limit
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl From<OverpassElement> for FacilityItem {
    fn from(element: OverpassElement) -> Self {
        let (lat, lon) = match (element.lat, element.lon, element.center) {
            (Some(lat), Some(lon), _) => (Some(lat), Some(lon)),
            (_, _, Some(center)) => (Some(center.lat), Some(center.lon)),
            _ => (None, None),
        };
        FacilityItem {
            id: element.id,
            element_type: element.element_type,
            name: element.tags.and_then(|mut tags| tags.remove("name")),
            lat,
            lon,
        }
    }
}

/// Parse an Overpass JSON body into a payload
pub fn parse_response(body: &str) -> Result<FacilityPayload, AttemptError> {
    let response: OverpassResponse = serde_json::from_str(body)
        .map_err(|e| AttemptError::new(AttemptErrorType::MalformedResponse, e.to_string()))?;

    if let Some(remark) = response.remark.as_deref() {
        if remark.contains("runtime error") {
            return Err(AttemptError::new(AttemptErrorType::ServerRuntime, remark));
        }
    }

    Ok(FacilityPayload {
        items: response.elements.into_iter().map(FacilityItem::from).collect(),
    })
}

/// HTTP provider for Overpass interpreters
#[derive(Debug, Clone)]
pub struct OverpassProvider {
    client: Client,
    user_agent: String,
}

impl OverpassProvider {
    /// Build a provider with the configured timeouts
    pub fn new(settings: &RetrySettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()?;
        Ok(Self::with_client(client, settings.user_agent.clone()))
    }

    /// Use an existing client
    pub fn with_client(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl FacilityProvider for OverpassProvider {
    async fn query(
        &self,
        endpoint: &Endpoint,
        query: &FacilityQuery,
    ) -> Result<FacilityPayload, AttemptError> {
        debug!(endpoint = %endpoint, key = %query.key(), "Sending Overpass query");

        let response = self
            .client
            .post(endpoint.url())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(query.overpass_ql().to_string())
            .send()
            .await
            .map_err(|e| AttemptError::new(extract_error_type(None, Some(&e)), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AttemptError::new(
                extract_error_type(Some(status), None),
                format!("HTTP {}: {}", status.as_u16(), snippet.trim()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::new(extract_error_type(None, Some(&e)), e.to_string()))?;
        parse_response(&body)
    }
}
