// Background-side message relay.
// Receives attention messages, checks for a stored credential and hands an
// upload request to the transport. Nothing is retried or queued.

use log::{debug, info, warn};
use serde_json::{json, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{spawn_local, JsFuture};

use crate::error::EngineError;
use crate::message::{
    AttentionMessage, AudioAttentionPayload, ImageAttentionPayload, TextAttentionPayload,
    AUDIO_MESSAGE_NAME, IMAGE_MESSAGE_NAME, TEXT_MESSAGE_NAME,
};

/// Words per minute assumed when estimating reading time for uploads.
const UPLOAD_READING_WPM: usize = 150;

/// Source of the account credential. Absent means "not linked".
pub trait CredentialStore {
    fn credential(&self) -> Option<String>;
}

/// Sends an upload. Must not block the caller on the network round-trip;
/// only failures to start the request are reported.
pub trait Transport {
    fn send(&self, request: UploadRequest) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Absolute endpoint, server URL joined with the activity path.
    pub endpoint: String,
    pub body: Value,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    /// No credential stored; dropped without retry.
    NoCredential,
    /// Unknown type or missing payload.
    Ignored,
}

pub struct Relay<S, T> {
    server_url: String,
    store: S,
    transport: T,
}

impl<S: CredentialStore, T: Transport> Relay<S, T> {
    pub fn new(server_url: impl Into<String>, store: S, transport: T) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Relay {
            server_url,
            store,
            transport,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn handle(&self, message: &AttentionMessage) -> Result<RelayOutcome, EngineError> {
        let Some(credential) = self.store.credential() else {
            debug!("no credential stored, dropping {}", message.type_name());
            return Ok(RelayOutcome::NoCredential);
        };

        let (path, body) = upload_body(message);
        let request = UploadRequest {
            endpoint: format!("{}{}", self.server_url, path),
            body,
            credential,
        };
        info!("forwarding {} to {}", message.type_name(), request.endpoint);
        self.transport.send(request)?;
        Ok(RelayOutcome::Forwarded)
    }

    /// Entry point for raw `{type, payload}` messages from a content script.
    pub fn handle_json(&self, raw: &str) -> Result<RelayOutcome, EngineError> {
        let value: Value = serde_json::from_str(raw)?;
        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| [TEXT_MESSAGE_NAME, IMAGE_MESSAGE_NAME, AUDIO_MESSAGE_NAME].contains(&t));
        let has_payload = value.get("payload").is_some_and(|p| !p.is_null());
        if !known || !has_payload {
            debug!("ignoring relay message without a known type and payload");
            return Ok(RelayOutcome::Ignored);
        }

        let message: AttentionMessage = serde_json::from_value(value)?;
        self.handle(&message)
    }
}

/// Endpoint path and JSON body for one message.
pub fn upload_body(message: &AttentionMessage) -> (&'static str, Value) {
    match message {
        AttentionMessage::Text(p) => ("/activities/text", text_body(p)),
        AttentionMessage::Image(p) => ("/activities/image", image_body(p)),
        AttentionMessage::Audio(p) => ("/activities/audio", audio_body(p)),
    }
}

fn text_body(p: &TextAttentionPayload) -> Value {
    json!({
        "url": p.url,
        "title": page_title(&p.url),
        "content": p.text,
        "wordCount": p.words_read,
        "readingTime": p.words_read.div_ceil(UPLOAD_READING_WPM),
    })
}

fn image_body(p: &ImageAttentionPayload) -> Value {
    let title = [&p.alt, &p.title]
        .into_iter()
        .find(|s| !s.is_empty())
        .map_or("Untitled Image", String::as_str);
    json!({
        "url": p.src,
        "title": title,
        "description": format!(
            "Viewed on {} for {}ms with {}% confidence",
            p.url, p.hover_duration, p.confidence
        ),
        "width": p.width,
        "height": p.height,
    })
}

fn audio_body(p: &AudioAttentionPayload) -> Value {
    let title = if p.title.is_empty() {
        "Untitled Audio"
    } else {
        p.title.as_str()
    };
    let duration = if p.duration.is_finite() {
        p.duration.round() as i64
    } else {
        0
    };
    json!({
        "url": p.src,
        "title": title,
        "duration": duration,
        "artist": format!("Listened on {}", p.url),
    })
}

/// Hostname plus path, e.g. `news.test/story`. Falls back to the raw string
/// when it does not look like an absolute URL.
pub fn page_title(url: &str) -> String {
    let Some((_, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, "/"),
    };
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    if host.is_empty() {
        return url.to_string();
    }
    format!("{host}{path}")
}

// ============================================================================
// WASM Bindings
// ============================================================================

/// Credential held in memory, set by the host when the account is linked.
#[derive(Debug, Default, Clone)]
pub struct StoredCredential(Option<String>);

impl StoredCredential {
    pub fn set(&mut self, credential: Option<String>) {
        self.0 = credential.filter(|c| !c.is_empty());
    }
}

impl CredentialStore for StoredCredential {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Calls a host function `(endpoint, bodyJson, credential) => Promise`.
/// The promise is driven on the microtask queue and only its failure is logged.
pub struct JsTransport {
    function: js_sys::Function,
}

impl Transport for JsTransport {
    fn send(&self, request: UploadRequest) -> Result<(), EngineError> {
        let body = serde_json::to_string(&request.body)?;
        let result = self
            .function
            .call3(
                &JsValue::NULL,
                &JsValue::from_str(&request.endpoint),
                &JsValue::from_str(&body),
                &JsValue::from_str(&request.credential),
            )
            .map_err(|e| EngineError::Relay(format!("transport threw: {e:?}")))?;

        let endpoint = request.endpoint;
        let promise = js_sys::Promise::resolve(&result);
        spawn_local(async move {
            if let Err(e) = JsFuture::from(promise).await {
                warn!("upload to {endpoint} failed: {e:?}");
            }
        });
        Ok(())
    }
}

/// WASM-exposed relay for the extension's background script.
///
/// ```js
/// const relay = new WasmRelay("https://api.test", (url, body, token) =>
///   fetch(url, { method: "POST", body, headers: { Authorization: `Bearer ${token}` } }));
/// relay.set_credential(token);
/// relay.forward(JSON.stringify(message));
/// ```
#[wasm_bindgen]
pub struct WasmRelay {
    inner: Relay<StoredCredential, JsTransport>,
}

#[wasm_bindgen]
impl WasmRelay {
    #[wasm_bindgen(constructor)]
    pub fn new(server_url: &str, transport: js_sys::Function) -> WasmRelay {
        WasmRelay {
            inner: Relay::new(
                server_url,
                StoredCredential::default(),
                JsTransport {
                    function: transport,
                },
            ),
        }
    }

    /// Pass `undefined` to unlink.
    #[wasm_bindgen]
    pub fn set_credential(&mut self, credential: Option<String>) {
        self.inner.store_mut().set(credential);
    }

    /// Returns true if an upload was started.
    #[wasm_bindgen]
    pub fn forward(&self, message_json: &str) -> Result<bool, JsValue> {
        self.inner
            .handle_json(message_json)
            .map(|outcome| outcome == RelayOutcome::Forwarded)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
