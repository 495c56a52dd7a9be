//! HTTP-backed tool: POSTs the call arguments as JSON to a configured endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

use super::tool::Tool;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool whose handler is a remote HTTP endpoint.
#[derive(Debug)]
pub struct HttpTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    endpoint: String,
    headers: HashMap<String, String>,
    requires_approval: bool,
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            requires_approval: false,
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<serde_json::Value, EngineError> {
        let mut request = self.client.post(&self.endpoint).json(args);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::tool(
                &self.name,
                format!("endpoint returned {status}: {body}"),
            ));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_arguments_and_returns_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lookup"))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({"city": "Tokyo"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 21})))
            .mount(&server)
            .await;

        let tool = HttpTool::new(
            "lookup",
            "Remote lookup",
            json!({"type": "object"}),
            format!("{}/lookup", server.uri()),
        )
        .with_header("x-api-key", "secret");

        let result = tool.execute(&json!({"city": "Tokyo"})).await.unwrap();
        assert_eq!(result, json!({"temp": 21}));
    }

    #[tokio::test]
    async fn non_success_status_is_a_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let tool = HttpTool::new("lookup", "Remote lookup", json!({}), server.uri());
        let err = tool.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolExecution { .. }));
    }
}
