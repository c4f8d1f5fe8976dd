use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("Invalid header value: {0}")]
    Header(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_api_key().to_string(),
            timeout: Duration::from_millis(config.storage_timeout_ms),
        }
    }

    fn transport(&self, e: reqwest::Error) -> SupabaseError {
        if e.is_timeout() {
            SupabaseError::Timeout(self.timeout.as_millis() as u64)
        } else {
            SupabaseError::Http(e)
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, SupabaseError> {
        let mut headers = HeaderMap::new();

        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| SupabaseError::Header(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| SupabaseError::Header(e.to_string()))?;

        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    /// `Prefer: return=representation`, so writes echo the affected rows.
    pub fn representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self
            .client
            .request(method, &url)
            .headers(headers)
            .timeout(self.timeout);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await.map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.map_err(|e| self.transport(e))?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => SupabaseError::Auth(error_text),
                404 => SupabaseError::NotFound(error_text),
                409 => SupabaseError::Conflict(error_text),
                _ => SupabaseError::Api { status, body: error_text },
            });
        }

        // DELETE/PATCH without representation come back empty.
        let bytes = response.bytes().await.map_err(|e| self.transport(e))?;
        let parsed = if bytes.is_empty() {
            serde_json::from_value(Value::Array(vec![]))
        } else {
            serde_json::from_slice(&bytes)
        };

        parsed.map_err(|e| SupabaseError::Api {
            status,
            body: format!("unexpected response body: {}", e),
        })
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
