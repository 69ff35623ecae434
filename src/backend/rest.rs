//! REST transport for the remote key-value store.
//!
//! The store exposes Redis-style commands over HTTPS: a command is POSTed
//! as a JSON array (`["SET", "k", "v", "EX", "60"]`) to the base endpoint
//! and answered with `{"result": ...}` or `{"error": "..."}`. Batches go
//! to the `/pipeline` endpoint as an array of commands.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::CacheSettings;
use crate::error::CacheError;

use super::{KvBackend, ScanPage};

/// Keys per DEL command before deletes are split across a pipeline request.
const DEL_CHUNK: usize = 128;

pub struct RestBackend {
    client: reqwest::Client,
    endpoint: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestBackend {
    /// Build a backend from settings, or `None` when it cannot exist.
    ///
    /// Missing credentials, the offline flag, a malformed endpoint URL, and
    /// HTTP client construction failure all yield `None` rather than an
    /// error: the caller is expected to run without a cache.
    pub fn from_settings(settings: &CacheSettings) -> Option<Self> {
        if settings.offline {
            debug!("cache backend disabled: offline build phase");
            return None;
        }

        let (raw_url, token) = match (&settings.rest_url, &settings.rest_token) {
            (Some(url), Some(token)) => (url, token),
            _ => {
                debug!("cache backend disabled: credentials not configured");
                return None;
            }
        };

        let endpoint = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "cache backend disabled: endpoint url is invalid");
                return None;
            }
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "cache backend disabled: http client construction failed");
                return None;
            }
        };

        Some(Self {
            client,
            endpoint,
            token: token.clone(),
        })
    }

    /// Hostname of the configured endpoint, for health reporting.
    pub fn endpoint_host(&self) -> Option<String> {
        self.endpoint.host_str().map(str::to_string)
    }

    async fn command(&self, command: Vec<String>) -> Result<Value, CacheError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await
            .map_err(|err| CacheError::transport(err.to_string()))?;

        let status = response.status();
        let reply: CommandReply = response
            .json()
            .await
            .map_err(|err| CacheError::protocol(err.to_string()))?;

        if let Some(error) = reply.error {
            return Err(CacheError::backend(error));
        }
        if !status.is_success() {
            return Err(CacheError::backend(format!("http status {status}")));
        }
        Ok(reply.result)
    }

    async fn pipeline(&self, commands: Vec<Vec<String>>) -> Result<Vec<Value>, CacheError> {
        let url = pipeline_url(&self.endpoint);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await
            .map_err(|err| CacheError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::backend(format!("http status {status}")));
        }

        let replies: Vec<CommandReply> = response
            .json()
            .await
            .map_err(|err| CacheError::protocol(err.to_string()))?;

        replies
            .into_iter()
            .map(|reply| match reply.error {
                Some(error) => Err(CacheError::backend(error)),
                None => Ok(reply.result),
            })
            .collect()
    }
}

fn pipeline_url(endpoint: &Url) -> String {
    format!("{}/pipeline", endpoint.as_str().trim_end_matches('/'))
}

fn expect_int(value: Value) -> Result<i64, CacheError> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| CacheError::protocol("non-integer numeric reply")),
        other => Err(CacheError::protocol(format!(
            "expected integer reply, got {other}"
        ))),
    }
}

fn expect_string_array(value: Value) -> Result<Vec<String>, CacheError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(CacheError::protocol(format!(
                    "expected string element, got {other}"
                ))),
            })
            .collect(),
        other => Err(CacheError::protocol(format!(
            "expected array reply, got {other}"
        ))),
    }
}

#[async_trait]
impl KvBackend for RestBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.command(vec!["GET".into(), key.into()]).await? {
            Value::Null => Ok(None),
            Value::String(raw) => Ok(Some(raw)),
            other => Err(CacheError::protocol(format!(
                "expected string reply, got {other}"
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        let mut command = vec!["SET".to_string(), key.to_string(), value.to_string()];
        if let Some(ttl) = ttl_secs {
            command.push("EX".to_string());
            command.push(ttl.to_string());
        }
        self.command(command).await.map(|_| ())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let command = vec![
            "SET".to_string(),
            key.to_string(),
            value.to_string(),
            "NX".to_string(),
            "EX".to_string(),
            ttl_secs.to_string(),
        ];
        match self.command(command).await? {
            Value::Null => Ok(false),
            Value::String(_) => Ok(true),
            other => Err(CacheError::protocol(format!(
                "expected SET NX reply, got {other}"
            ))),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        // Large key sets (pattern deletion) go through the pipeline endpoint
        // in chunks so a single request stays a reasonable size.
        if keys.len() > DEL_CHUNK {
            let commands: Vec<Vec<String>> = keys
                .chunks(DEL_CHUNK)
                .map(|batch| {
                    let mut command = vec!["DEL".to_string()];
                    command.extend(batch.iter().cloned());
                    command
                })
                .collect();

            let mut deleted = 0_u64;
            for reply in self.pipeline(commands).await? {
                deleted += expect_int(reply)?.max(0) as u64;
            }
            return Ok(deleted);
        }

        let mut command = vec!["DEL".to_string()];
        command.extend(keys.iter().cloned());
        let deleted = expect_int(self.command(command).await?)?;
        Ok(deleted.max(0) as u64)
    }

    async fn scan(&self, cursor: &str, pattern: &str, count: u64) -> Result<ScanPage, CacheError> {
        let command = vec![
            "SCAN".to_string(),
            cursor.to_string(),
            "MATCH".to_string(),
            pattern.to_string(),
            "COUNT".to_string(),
            count.to_string(),
        ];
        match self.command(command).await? {
            Value::Array(mut parts) if parts.len() == 2 => {
                let keys = expect_string_array(parts.pop().unwrap_or(Value::Null))?;
                let cursor = match parts.pop() {
                    Some(Value::String(cursor)) => cursor,
                    Some(Value::Number(cursor)) => cursor.to_string(),
                    other => {
                        return Err(CacheError::protocol(format!(
                            "expected scan cursor, got {other:?}"
                        )));
                    }
                };
                Ok(ScanPage { cursor, keys })
            }
            other => Err(CacheError::protocol(format!(
                "expected scan reply, got {other}"
            ))),
        }
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let command = if by == 1 {
            vec!["INCR".to_string(), key.to_string()]
        } else {
            vec!["INCRBY".to_string(), key.to_string(), by.to_string()]
        };
        expect_int(self.command(command).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let command = vec!["EXPIRE".to_string(), key.to_string(), ttl_secs.to_string()];
        Ok(expect_int(self.command(command).await?)? == 1)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        expect_int(self.command(vec!["TTL".into(), key.into()]).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let count = expect_int(self.command(vec!["EXISTS".into(), key.into()]).await?)?;
        Ok(count > 0)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut command = vec!["MGET".to_string()];
        command.extend(keys.iter().cloned());
        match self.command(command).await? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Null => Ok(None),
                    Value::String(raw) => Ok(Some(raw)),
                    other => Err(CacheError::protocol(format!(
                        "expected string element, got {other}"
                    ))),
                })
                .collect(),
            other => Err(CacheError::protocol(format!(
                "expected array reply, got {other}"
            ))),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<u64, CacheError> {
        let added = expect_int(
            self.command(vec!["SADD".into(), key.into(), member.into()])
                .await?,
        )?;
        Ok(added.max(0) as u64)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<u64, CacheError> {
        let removed = expect_int(
            self.command(vec!["SREM".into(), key.into(), member.into()])
                .await?,
        )?;
        Ok(removed.max(0) as u64)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        expect_string_array(self.command(vec!["SMEMBERS".into(), key.into()]).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let present = expect_int(
            self.command(vec!["SISMEMBER".into(), key.into(), member.into()])
                .await?,
        )?;
        Ok(present == 1)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        match self.command(vec!["PING".into()]).await? {
            Value::String(reply) if reply == "PONG" => Ok(()),
            other => Err(CacheError::protocol(format!(
                "expected PONG, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_for(url: &str) -> RestBackend {
        let settings = CacheSettings {
            rest_url: Some(url.to_string()),
            rest_token: Some("test-token".to_string()),
            ..CacheSettings::default()
        };
        RestBackend::from_settings(&settings).expect("backend should build")
    }

    #[test]
    fn missing_credentials_yield_no_backend() {
        let settings = CacheSettings::default();
        assert!(RestBackend::from_settings(&settings).is_none());
    }

    #[test]
    fn offline_flag_yields_no_backend() {
        let settings = CacheSettings {
            rest_url: Some("https://kv.example.com".to_string()),
            rest_token: Some("tok".to_string()),
            offline: true,
            ..CacheSettings::default()
        };
        assert!(RestBackend::from_settings(&settings).is_none());
    }

    #[test]
    fn invalid_endpoint_yields_no_backend() {
        let settings = CacheSettings {
            rest_url: Some("not a url".to_string()),
            rest_token: Some("tok".to_string()),
            ..CacheSettings::default()
        };
        assert!(RestBackend::from_settings(&settings).is_none());
    }

    #[test]
    fn pipeline_url_joins_without_double_slash() {
        let endpoint = Url::parse("https://kv.example.com/").unwrap();
        assert_eq!(pipeline_url(&endpoint), "https://kv.example.com/pipeline");
    }

    #[tokio::test]
    async fn get_decodes_result_and_null() {
        let server = httpmock::MockServer::start_async().await;
        let hit = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .json_body(serde_json::json!(["GET", "blog:featured"]));
                then.status(200)
                    .json_body(serde_json::json!({"result": "[1,2,3]"}));
            })
            .await;

        let backend = backend_for(&server.base_url());
        let value = backend.get("blog:featured").await.unwrap();
        assert_eq!(value.as_deref(), Some("[1,2,3]"));
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn get_miss_is_none() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST);
                then.status(200).json_body(serde_json::json!({"result": null}));
            })
            .await;

        let backend = backend_for(&server.base_url());
        assert!(backend.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_sends_expiry_argument() {
        let server = httpmock::MockServer::start_async().await;
        let hit = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .json_body(serde_json::json!(["SET", "k", "v", "EX", "60"]));
                then.status(200).json_body(serde_json::json!({"result": "OK"}));
            })
            .await;

        let backend = backend_for(&server.base_url());
        backend.set("k", "v", Some(60)).await.unwrap();
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn backend_error_surfaces_as_backend_variant() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST);
                then.status(400)
                    .json_body(serde_json::json!({"error": "WRONGTYPE"}));
            })
            .await;

        let backend = backend_for(&server.base_url());
        let err = backend.incr_by("k", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::Backend { .. }));
    }

    #[tokio::test]
    async fn scan_parses_cursor_and_keys() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .json_body(serde_json::json!([
                        "SCAN", "0", "MATCH", "blog:*", "COUNT", "100"
                    ]));
                then.status(200)
                    .json_body(serde_json::json!({"result": ["42", ["blog:a", "blog:b"]]}));
            })
            .await;

        let backend = backend_for(&server.base_url());
        let page = backend.scan("0", "blog:*", 100).await.unwrap();
        assert_eq!(page.cursor, "42");
        assert_eq!(page.keys, vec!["blog:a".to_string(), "blog:b".to_string()]);
    }

    #[tokio::test]
    async fn large_delete_goes_through_the_pipeline() {
        let server = httpmock::MockServer::start_async().await;
        let replies: Vec<serde_json::Value> = vec![
            serde_json::json!({"result": 128}),
            serde_json::json!({"result": 72}),
        ];
        let hit = server
            .mock_async(move |when, then| {
                when.method(httpmock::Method::POST).path("/pipeline");
                then.status(200).json_body(serde_json::json!(replies));
            })
            .await;

        let backend = backend_for(&server.base_url());
        let keys: Vec<String> = (0..200).map(|i| format!("blog:stats:{i}")).collect();
        let deleted = backend.del(&keys).await.unwrap();
        assert_eq!(deleted, 200);
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Nothing listens on this port.
        let settings = CacheSettings {
            rest_url: Some("http://127.0.0.1:1".to_string()),
            rest_token: Some("tok".to_string()),
            request_timeout_ms: 250,
            ..CacheSettings::default()
        };
        let backend = RestBackend::from_settings(&settings).unwrap();
        let err = backend.ping().await.unwrap_err();
        assert!(matches!(err, CacheError::Transport { .. }));
    }
}
