//! Upstash Redis REST client.
//!
//! Speaks the JSON command protocol: each call POSTs a command array
//! (`["GET", key]`, `["SET", key, value, "EX", secs]`) to the database URL
//! with a bearer token, and reads `{"result": ...}` or `{"error": ...}`.

use common::config::SharedCacheConfig;
use common::Error;
use serde::Deserialize;
use tracing::debug;

/// Minimal key/value client for a Redis-over-REST endpoint.
#[derive(Debug, Clone)]
pub struct UpstashClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashClient {
    pub fn new(config: &SharedCacheConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("failed to build Upstash HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// `GET key`. Returns `None` when the key is absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let result = self.command(&["GET", key]).await?;
        match result {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(other) => Ok(Some(other.to_string())),
        }
    }

    /// `SET key value EX secs`.
    pub async fn set_ex(&self, key: &str, value: &str, expire_secs: u64) -> Result<(), Error> {
        let secs = expire_secs.to_string();
        let result = self.command(&["SET", key, value, "EX", &secs]).await?;
        match result {
            Some(serde_json::Value::String(ref s)) if s == "OK" => Ok(()),
            other => Err(Error::SharedCache(format!(
                "unexpected SET reply for {key}: {other:?}"
            ))),
        }
    }

    async fn command(&self, args: &[&str]) -> Result<Option<serde_json::Value>, Error> {
        debug!("Upstash command: {} {}", args[0], args.get(1).unwrap_or(&""));

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| Error::SharedCache(format!("HTTP error: {e}")))?;

        let status = resp.status().as_u16();
        let body: CommandResponse = resp
            .json()
            .await
            .map_err(|e| Error::SharedCache(format!("bad reply (status={status}): {e}")))?;

        if let Some(err) = body.error {
            return Err(Error::SharedCache(format!("{} failed: {}", args[0], err)));
        }
        if !(200..300).contains(&status) {
            return Err(Error::SharedCache(format!("{} returned {}", args[0], status)));
        }

        Ok(body.result)
    }
}
