//! HTTP handler: builds a request from a [`CustomToolHandlerConfig::Http`]
//! template, substituting `{{var}}` placeholders from top-level argument
//! keys, and maps the response back per `data_path` (§4.4). Client
//! construction follows the teacher's `client/http.rs`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;
use crate::types::tool::{CustomToolHandlerConfig, HttpAuthConfig};

use super::handler::CustomToolHandler;

pub struct HttpHandler {
    url: String,
    method: String,
    headers: std::collections::HashMap<String, String>,
    auth: Option<HttpAuthConfig>,
    body_template: Option<Value>,
    data_path: Option<String>,
    timeout: Duration,
    retry_count: u32,
    retry_delay: Duration,
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn from_config(config: &CustomToolHandlerConfig) -> Self {
        let CustomToolHandlerConfig::Http {
            url,
            method,
            headers,
            auth,
            body_template,
            data_path,
            timeout_ms,
            retry_count,
            retry_delay_ms,
        } = config
        else {
            panic!("HttpHandler::from_config called with a non-HTTP handler config");
        };

        Self {
            url: url.clone(),
            method: method.clone(),
            headers: headers.clone(),
            auth: auth.clone(),
            body_template: body_template.clone(),
            data_path: data_path.clone(),
            timeout: Duration::from_millis(timeout_ms.unwrap_or(30_000)),
            retry_count: retry_count.unwrap_or(0),
            retry_delay: Duration::from_millis(retry_delay_ms.unwrap_or(0)),
            client: reqwest::Client::new(),
        }
    }

    fn substitute_template(&self, template: &Value, arguments: &Value) -> Value {
        match template {
            Value::String(s) => Value::String(substitute_placeholders(s, arguments)),
            Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), self.substitute_template(v, arguments))).collect()),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.substitute_template(item, arguments)).collect()),
            other => other.clone(),
        }
    }

    async fn execute_once(&self, arguments: &Value) -> Result<Value, GatewayError> {
        let method = reqwest::Method::from_bytes(self.method.as_bytes()).map_err(|_| GatewayError::InvalidParams(format!("unsupported http method '{}'", self.method)))?;
        let mut request = self.client.request(method.clone(), &self.url).timeout(self.timeout);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        request = match &self.auth {
            Some(HttpAuthConfig::Bearer { token }) => request.bearer_auth(token),
            Some(HttpAuthConfig::Basic { username, password }) => request.basic_auth(username, Some(password)),
            Some(HttpAuthConfig::ApiKeyHeader { header_name, value }) => request.header(header_name, value),
            None => request,
        };

        if method == reqwest::Method::GET {
            if let Some(Value::Object(map)) = arguments.as_object().map(|m| Value::Object(m.clone())) {
                let query: Vec<(String, String)> = map.into_iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k, value_to_query_string(&v))).collect();
                request = request.query(&query);
            }
        } else {
            let body = match &self.body_template {
                Some(template) => self.substitute_template(template, arguments),
                None => arguments.clone(),
            };
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|error| GatewayError::Upstream(error.to_string()))?;
        let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or("").to_string();

        if content_type.starts_with("text/") {
            let text = response.text().await.map_err(|error| GatewayError::Upstream(error.to_string()))?;
            return Ok(Value::String(text));
        }

        let body: Value = response.json().await.map_err(|error| GatewayError::Upstream(error.to_string()))?;
        match &self.data_path {
            Some(path) => Ok(extract_data_path(&body, path).unwrap_or(Value::Null)),
            None => Ok(Value::String(serde_json::to_string_pretty(&body).unwrap_or_default())),
        }
    }
}

#[async_trait]
impl CustomToolHandler for HttpHandler {
    async fn invoke(&self, arguments: Value) -> Result<Value, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.execute_once(&arguments).await {
                Ok(result) => return Ok(result),
                Err(error) if attempt < self.retry_count => {
                    attempt += 1;
                    tracing::debug!(%error, attempt, "http custom tool retrying");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn substitute_placeholders(template: &str, arguments: &Value) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_start = &rest[start + 2..];
        if let Some(end) = after_start.find("}}") {
            let key = after_start[..end].trim();
            let replacement = arguments.get(key).map(value_to_query_string).unwrap_or_default();
            output.push_str(&replacement);
            rest = &after_start[end + 2..];
        } else {
            output.push_str("{{");
            rest = after_start;
        }
    }
    output.push_str(rest);
    output
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Dotted-path lookup into a JSON value, e.g. `"data.items"`.
fn extract_data_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_config(method: &str) -> CustomToolHandlerConfig {
        CustomToolHandlerConfig::Http {
            url: "https://example.com/run".to_string(),
            method: method.to_string(),
            headers: Default::default(),
            auth: None,
            body_template: Some(serde_json::json!({"greeting": "hello {{name}}"})),
            data_path: Some("data.value".to_string()),
            timeout_ms: Some(5_000),
            retry_count: Some(0),
            retry_delay_ms: Some(0),
        }
    }

    #[test]
    fn substitutes_placeholders_from_top_level_args() {
        let handler = HttpHandler::from_config(&http_config("POST"));
        let args = serde_json::json!({"name": "Ada"});
        let body = handler.substitute_template(handler.body_template.as_ref().unwrap(), &args);
        assert_eq!(body, serde_json::json!({"greeting": "hello Ada"}));
    }

    #[test]
    fn extract_data_path_navigates_nested_objects() {
        let value = serde_json::json!({"data": {"value": 42}});
        assert_eq!(extract_data_path(&value, "data.value"), Some(serde_json::json!(42)));
        assert_eq!(extract_data_path(&value, "data.missing"), None);
    }
}
