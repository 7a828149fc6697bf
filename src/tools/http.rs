use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{SecurityPolicy, Tool, ToolError};

/// Performs one HTTP request and returns `{status, body}` as JSON text.
pub struct WebFetch {
    client: reqwest::Client,
    /// When strict, a non-2xx status is a tool failure instead of data.
    strict: bool,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WebFetchInput {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WebFetchOptions {
    strict: Option<bool>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for WebFetch {
    fn default() -> Self {
        Self::new(true)
    }
}

impl WebFetch {
    pub fn new(strict: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            strict,
        }
    }

    pub fn from_options(options: &Value) -> Result<Self, ToolError> {
        let options: WebFetchOptions = serde_json::from_value(options.clone())?;
        Ok(Self::new(options.strict.unwrap_or(true)))
    }
}

#[async_trait]
impl Tool for WebFetch {
    fn name(&self) -> String {
        "web_fetch".into()
    }

    fn description(&self) -> String {
        "Fetches a URL and returns the response status and body".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(WebFetchInput)
    }

    async fn call(&self, args: Value, _policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: WebFetchInput = serde_json::from_value(args)?;
        let url = url::Url::parse(&input.url)?;

        let method: reqwest::Method = input
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| ToolError::ExecutionError(format!("invalid method {}", input.method)))?;

        let mut request = self
            .client
            .request(method, url)
            .timeout(Duration::from_secs(input.timeout_secs));
        for (name, value) in &input.headers {
            request = request.header(name, value);
        }
        if let Some(body) = input.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if self.strict && !(200..300).contains(&status) {
            return Err(ToolError::HttpStatus(status));
        }

        Ok(json!({ "status": status, "body": body }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data")
            .with_status(200)
            .with_body("payload")
            .create_async()
            .await;

        let tool = WebFetch::new(true);
        let out = tool
            .call(
                json!({ "url": format!("{}/data", server.url()) }),
                &SecurityPolicy::default(),
            )
            .await
            .unwrap();

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["body"], "payload");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_strict_rejects_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = WebFetch::new(true)
            .call(
                json!({ "url": format!("{}/missing", server.url()) }),
                &SecurityPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_lenient_returns_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("gone")
            .create_async()
            .await;

        let out = WebFetch::new(false)
            .call(
                json!({ "url": format!("{}/missing", server.url()) }),
                &SecurityPolicy::default(),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], 404);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = WebFetch::default()
            .call(json!({ "url": "not a url" }), &SecurityPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidUrl(_)));
    }
}
