//! Thin client for the `cortexd` daemon's UNIX-socket JSON-RPC protocol
//! (spec §6), grounded on `original_source/cortex/daemon_client.py`.

use crate::error::{Error, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const DEFAULT_SOCKET_PATH: &str = "/run/cortex/cortex.sock";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(120);
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Client for the request/response protocol described in spec §6:
/// `{"method": ..., "params": {...}}` in, `{"success": bool, "result"|"error": ...}` out.
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout }
    }

    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_SOCKET_PATH)
    }

    async fn send_request(&self, method: &str, params: serde_json::Value, timeout: Duration) -> Result<serde_json::Value> {
        if !self.socket_path.exists() {
            return Err(Error::ExecutionFailure(format!(
                "daemon socket not found at {}; is cortexd running?",
                self.socket_path.display()
            )));
        }

        let request = json!({ "method": method, "params": params });
        let request_bytes = serde_json::to_vec(&request)?;

        let call = async {
            let mut stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| Error::ExecutionFailure(format!("failed to connect to daemon: {e}")))?;
            stream
                .write_all(&request_bytes)
                .await
                .map_err(|e| Error::ExecutionFailure(format!("failed to write to daemon: {e}")))?;
            stream
                .shutdown()
                .await
                .map_err(|e| Error::ExecutionFailure(format!("failed to close write half: {e}")))?;

            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::ExecutionFailure(format!("failed to read from daemon: {e}")))?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_MESSAGE_SIZE {
                    return Err(Error::Internal("daemon response exceeded max message size".to_string()));
                }
                if serde_json::from_slice::<serde_json::Value>(&buf).is_ok() {
                    break;
                }
            }

            if buf.is_empty() {
                return Err(Error::Internal("empty response from daemon".to_string()));
            }

            serde_json::from_slice(&buf).map_err(|e| Error::Internal(format!("invalid JSON response: {e}")))
        };

        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| Error::ExecutionTimeout(timeout.as_secs()))?
    }

    fn check_response(response: serde_json::Value) -> Result<serde_json::Value> {
        if response.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
            Ok(response.get("result").cloned().unwrap_or(json!({})))
        } else {
            let error = response.get("error");
            let message = error.and_then(|e| e.get("message")).and_then(|m| m.as_str()).unwrap_or("unknown error");
            let code = error.and_then(|e| e.get("code")).and_then(|c| c.as_i64()).unwrap_or(-1);
            Err(Error::Internal(format!("daemon error ({code}): {message}")))
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let response = self.send_request(method, params, self.timeout).await?;
        Self::check_response(response)
    }

    pub async fn is_running(&self) -> bool {
        self.send_request("ping", json!({}), self.timeout)
            .await
            .ok()
            .and_then(|r| r.get("success").and_then(|v| v.as_bool()))
            .unwrap_or(false)
    }

    pub async fn ping(&self) -> bool {
        match self.call("ping", json!({})).await {
            Ok(result) => result.get("pong").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn status(&self) -> Result<serde_json::Value> {
        self.call("status", json!({})).await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.call("health", json!({})).await
    }

    pub async fn version(&self) -> Result<serde_json::Value> {
        self.call("version", json!({})).await
    }

    pub async fn alerts(&self, severity: Option<&str>, alert_type: Option<&str>, limit: u32) -> Result<Vec<serde_json::Value>> {
        let mut params = json!({ "limit": limit });
        if let Some(severity) = severity {
            params["severity"] = json!(severity);
        }
        if let Some(alert_type) = alert_type {
            params["type"] = json!(alert_type);
        }
        let result = self.call("alerts", params).await?;
        Ok(result.get("alerts").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> bool {
        self.call("alerts.acknowledge", json!({ "id": alert_id })).await.is_ok()
    }

    pub async fn acknowledge_all_alerts(&self) -> Result<u64> {
        let result = self.call("alerts.acknowledge", json!({ "all": true })).await?;
        Ok(result.get("acknowledged_count").and_then(|v| v.as_u64()).unwrap_or(0))
    }

    pub async fn dismiss_alert(&self, alert_id: &str) -> bool {
        self.call("alerts.dismiss", json!({ "id": alert_id })).await.is_ok()
    }

    pub async fn reload_config(&self) -> bool {
        match self.call("config.reload", json!({})).await {
            Ok(result) => result.get("reloaded").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn get_config(&self) -> Result<serde_json::Value> {
        self.call("config.get", json!({})).await
    }

    /// Requests shutdown; treats connection failure as already-shut-down,
    /// matching the source's tolerant semantics for this one method.
    pub async fn shutdown(&self) -> bool {
        let _ = self.call("shutdown", json!({})).await;
        true
    }

    pub async fn llm_status(&self) -> Result<serde_json::Value> {
        self.call("llm.status", json!({})).await
    }

    pub async fn load_model(&self, model_path: &str) -> Result<serde_json::Value> {
        let response = self.send_request("llm.load", json!({ "model_path": model_path }), MODEL_LOAD_TIMEOUT).await?;
        Self::check_response(response)
    }

    pub async fn unload_model(&self) -> bool {
        match self.call("llm.unload", json!({})).await {
            Ok(result) => result.get("unloaded").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn infer(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        top_p: f64,
        stop: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut params = json!({
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "top_p": top_p,
        });
        if let Some(stop) = stop {
            params["stop"] = json!(stop);
        }
        let response = self.send_request("llm.infer", params, INFERENCE_TIMEOUT).await?;
        Self::check_response(response)
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH, DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_response_extracts_result_on_success() {
        let response = json!({ "success": true, "result": { "pong": true } });
        let result = DaemonClient::check_response(response).unwrap();
        assert_eq!(result, json!({ "pong": true }));
    }

    #[test]
    fn check_response_surfaces_error_message_and_code() {
        let response = json!({ "success": false, "error": { "code": 42, "message": "model not loaded" } });
        let err = DaemonClient::check_response(response).unwrap_err();
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn missing_socket_reports_execution_failure_without_connecting() {
        let client = DaemonClient::new("/nonexistent/cortex-test.sock", Duration::from_millis(200));
        let err = client.status().await.unwrap_err();
        assert!(err.to_string().contains("daemon socket not found"));
    }

    #[tokio::test]
    async fn ping_returns_false_when_daemon_unreachable() {
        let client = DaemonClient::new("/nonexistent/cortex-test.sock", Duration::from_millis(200));
        assert!(!client.ping().await);
        assert!(!client.is_running().await);
    }
}
