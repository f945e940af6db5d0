//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Talks to one page target of a Chromium-family browser. Commands are
//! paired with responses by id; events are fanned out to subscribers.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of `Network.setCookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `Strict`, `Lax` or `None`.
    pub same_site: String,
}

impl CookieParam {
    fn to_params(&self) -> Value {
        json!({
            "name": self.name,
            "value": self.value,
            "domain": self.domain,
            "path": self.path,
            "secure": self.secure,
            "httpOnly": self.http_only,
            "sameSite": self.same_site,
        })
    }
}

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channel).
    event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches responses by id and events by method
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(method) {
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                senders.retain(|tx| {
                                    !matches!(
                                        tx.try_send(params.clone()),
                                        Err(mpsc::error::TrySendError::Closed(_))
                                    )
                                });
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| format!("Failed to send CDP command: {}", e))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(format!("CDP error: {}", error))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err("CDP response channel closed".to_string()),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                ))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners.entry(method.to_string()).or_default().push(tx);
        rx
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "Network", "DOM").
    pub async fn enable_domain(&self, domain: &str) -> Result<(), String> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value, String> {
        let result = self
            .send_command("Page.navigate", json!({"url": url}))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(format!("navigation to {} failed: {}", url, error_text));
        }
        Ok(result)
    }

    /// Evaluate JavaScript in the page context and return the value.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        remote_value(&result)
    }

    /// Evaluate JavaScript and return a handle (objectId) to the result.
    /// The handle and any objects reached from it belong to `object_group`.
    pub async fn evaluate_handle(
        &self,
        expression: &str,
        object_group: &str,
    ) -> Result<Option<String>, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": false,
                    "objectGroup": object_group,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("objectId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Own properties of a remote object as (name, objectId) pairs.
    /// Primitive-valued properties are skipped.
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<(String, String)>, String> {
        let result = self
            .send_command(
                "Runtime.getProperties",
                json!({"objectId": object_id, "ownProperties": true}),
            )
            .await?;
        let props = result
            .get("result")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| {
                        let name = p.get("name")?.as_str()?.to_string();
                        let id = p.get("value")?.get("objectId")?.as_str()?.to_string();
                        Some((name, id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(props)
    }

    pub async fn release_object(&self, object_id: &str) -> Result<(), String> {
        self.send_command("Runtime.releaseObject", json!({"objectId": object_id}))
            .await?;
        Ok(())
    }

    /// Release every remote object in `object_group`.
    pub async fn release_object_group(&self, object_group: &str) -> Result<(), String> {
        self.send_command(
            "Runtime.releaseObjectGroup",
            json!({"objectGroup": object_group}),
        )
        .await?;
        Ok(())
    }

    /// Call a function with `this` bound to a remote object; returns the value.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
    ) -> Result<Value, String> {
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "returnByValue": true,
                }),
            )
            .await?;
        remote_value(&result)
    }

    pub async fn get_box_model(&self, object_id: &str) -> Result<Value, String> {
        self.send_command("DOM.getBoxModel", json!({"objectId": object_id}))
            .await
    }

    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: i32,
    ) -> Result<(), String> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    /// Dispatch a key event. `text` is set on `keyDown` for keys that
    /// produce input, so `Enter` submits forms.
    pub async fn dispatch_key_event(
        &self,
        event_type: &str,
        key: &str,
        code: &str,
        key_code: i32,
        text: Option<&str>,
    ) -> Result<(), String> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
            "windowsVirtualKeyCode": key_code,
            "nativeVirtualKeyCode": key_code,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Insert text into the focused element (bypasses key events).
    pub async fn insert_text(&self, text: &str) -> Result<(), String> {
        self.send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    /// Set a cookie. Returns whether the browser accepted it.
    pub async fn set_cookie(&self, cookie: &CookieParam) -> Result<bool, String> {
        let result = self
            .send_command("Network.setCookie", cookie.to_params())
            .await?;
        Ok(result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }

    /// Cookies visible to the current page.
    pub async fn get_cookies(&self) -> Result<Vec<Value>, String> {
        let result = self.send_command("Network.getCookies", json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn clear_cookies(&self) -> Result<(), String> {
        self.send_command("Network.clearBrowserCookies", json!({}))
            .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

fn check_exception(result: &Value) -> Result<(), String> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("unknown exception");
        return Err(format!("JavaScript exception: {}", text));
    }
    Ok(())
}

/// Unwrap a `Runtime.RemoteObject` returned by value.
fn remote_value(result: &Value) -> Result<Value, String> {
    check_exception(result)?;
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_params() {
        let cookie = CookieParam {
            name: "Session".to_string(),
            value: "u::t".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            same_site: "None".to_string(),
        };
        let params = cookie.to_params();
        assert_eq!(params["value"], "u::t");
        assert_eq!(params["httpOnly"], false);
        assert_eq!(params["sameSite"], "None");
    }

    #[test]
    fn test_remote_value() {
        let ok = json!({"result": {"type": "string", "value": "hello"}});
        assert_eq!(remote_value(&ok).unwrap(), json!("hello"));

        let undefined = json!({"result": {"type": "undefined"}});
        assert_eq!(remote_value(&undefined).unwrap(), Value::Null);

        let thrown = json!({
            "result": {"type": "object"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "TypeError: x"}}
        });
        assert!(remote_value(&thrown).unwrap_err().contains("TypeError"));
    }
}
