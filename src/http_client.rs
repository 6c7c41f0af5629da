//! Authenticated, GET-only upstream client (C2). A struct-wraps-`reqwest::Client`
//! shape with a strict method surface: one auth header, no other headers, GET
//! only, with status codes mapped onto `IngestError` instead of ad-hoc `anyhow!`.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub get: Option<String>,
    pub parameters: Value,
    pub errors: Value,
    pub results: i64,
    pub response: Value,
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Default)]
pub struct Paging {
    pub current: i64,
    pub total: i64,
}

pub struct ApiResult {
    pub status: u16,
    pub data: Envelope,
    pub headers: HashMap<String, String>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    header_name: &'static str,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout_seconds: f64, api_key_env: &str) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| IngestError::Authentication)?;
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(timeout_seconds))
            .build()
            .map_err(IngestError::from)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            header_name: "x-apisports-key",
            api_key,
        })
    }

    /// The only call this client exposes. `params` becomes the query string.
    /// There is deliberately no way to pass extra headers or another method.
    pub async fn get(&self, endpoint: &str, params: &HashMap<String, String>) -> Result<ApiResult> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .header(self.header_name, &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(IngestError::from)?;

        let status = resp.status();
        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let status_u16 = status.as_u16();

        if status_u16 == 204 {
            return Ok(ApiResult { status: status_u16, data: Envelope::default(), headers });
        }

        if status_u16 == 401 {
            return Err(IngestError::Authentication);
        }
        if status_u16 == 429 {
            return Err(IngestError::RateLimited(format!("429 on {}", endpoint)));
        }
        if status_u16 == 499 {
            return Err(IngestError::Timeout(format!("499 on {}", endpoint)));
        }
        if status.is_server_error() {
            return Err(IngestError::ServerError(format!("{} on {}", status_u16, endpoint)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::UnexpectedStatus { status: status_u16, body });
        }

        let body: Value = resp.json().await.map_err(IngestError::from)?;
        let envelope = Envelope {
            get: body.get("get").and_then(|v| v.as_str()).map(|s| s.to_string()),
            parameters: body.get("parameters").cloned().unwrap_or(Value::Null),
            errors: body.get("errors").cloned().unwrap_or(Value::Null),
            results: body.get("results").and_then(|v| v.as_i64()).unwrap_or(0),
            response: body.get("response").cloned().unwrap_or(Value::Null),
            paging: body.get("paging").map(|p| Paging {
                current: p.get("current").and_then(|v| v.as_i64()).unwrap_or(1),
                total: p.get("total").and_then(|v| v.as_i64()).unwrap_or(1),
            }),
        };

        Ok(ApiResult { status: status_u16, data: envelope, headers })
    }

    /// `/fixtures?ids=a-b-c` batch fetch, capped at 20 ids per the upstream contract.
    pub async fn get_fixtures_by_ids(&self, ids: &[i64]) -> Result<ApiResult> {
        let batch: Vec<_> = ids.iter().take(20).collect();
        let joined = batch.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("-");
        let mut params = HashMap::new();
        params.insert("ids".to_string(), joined);
        self.get("/fixtures", &params).await
    }

    /// Releases the underlying connection pool. `reqwest::Client` has no
    /// explicit close, but this gives callers (and tests) a symmetric async
    /// shutdown point matching the source's `aclose()`.
    pub async fn close(self) {
        drop(self.client);
    }
}

/// `errors.rateLimit` arrives as an HTTP 200 with a poison-pill envelope.
/// Every call site must check this before trusting `response`.
pub fn envelope_has_rate_limit_error(errors: &Value) -> bool {
    match errors {
        Value::Object(map) => map.contains_key("rateLimit"),
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some("rateLimit")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_rate_limit_error_object_shape() {
        assert!(envelope_has_rate_limit_error(&json!({"rateLimit": "too many requests"})));
        assert!(!envelope_has_rate_limit_error(&json!({})));
    }

    #[test]
    fn detects_rate_limit_error_array_shape() {
        assert!(envelope_has_rate_limit_error(&json!(["rateLimit"])));
        assert!(!envelope_has_rate_limit_error(&json!(["token"])));
    }
}
