//! The four external capabilities of §6: identity, OCR, PDF rendering, and
//! credit pre-flight. The core treats all of them as opaque — these are
//! traits only, narrowed from the teacher's general-purpose
//! `ProtocolType`/`ConnectionConfig` client shape down to exactly the
//! calls spec.md names. Binaries wire in whatever implementation (HTTP
//! client, stub) fits local dev vs. production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("transient capability failure: {0}")]
    Transient(String),

    #[error("permanent capability failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub user_id: UserId,
    pub auth_provider: String,
}

/// Consumed at websocket handshake and (optionally) per HTTP request by
/// whatever frontend sits in front of this service.
#[async_trait]
pub trait AuthCapability: Send + Sync {
    async fn validate(&self, session_token: &str) -> Result<AuthenticatedIdentity, CapabilityError>;
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub html: String,
    pub page_count: i32,
    pub word_count: i32,
    pub confidence: f64,
    pub page_images: Option<Vec<Vec<u8>>>,
}

/// Invoked once per task attempt by the worker pool (C7). A `Transient`
/// error is retried up to the worker's retry budget; `Permanent` fails
/// the task immediately.
#[async_trait]
pub trait OcrCapability: Send + Sync {
    async fn run(
        &self,
        bytes: &[u8],
        mime: &str,
        config: &crate::domain::ProcessingConfig,
    ) -> Result<OcrOutput, CapabilityError>;
}

/// Invoked by the download/preview service (C9) when a client requests a
/// PDF rendering of edited HTML rather than the stored HTML itself.
#[async_trait]
pub trait PdfRenderCapability: Send + Sync {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, CapabilityError>;
}

/// Pre-flight only (§9 OQ3): called before an upload is accepted. No debit
/// call exists anywhere in this crate; billing reconciliation is out of
/// scope.
#[async_trait]
pub trait CreditCheckCapability: Send + Sync {
    async fn check(&self, user_id: UserId) -> Result<bool, CapabilityError>;
}

/// Allows an upload when no credit-check capability is configured, per
/// spec.md §4.6 ("a credit-check capability (external, may be absent)").
pub struct AlwaysAllowCreditCheck;

#[async_trait]
impl CreditCheckCapability for AlwaysAllowCreditCheck {
    async fn check(&self, _user_id: UserId) -> Result<bool, CapabilityError> {
        Ok(true)
    }
}

/// HTTP-client-backed implementations of the four capabilities, wired in
/// by the server/worker binaries when a real external service is
/// configured. Every call maps a transport-level failure to `Transient`
/// (worth a retry) and any non-2xx response to `Permanent`.
pub struct HttpAuthCapability {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthCapability {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl AuthCapability for HttpAuthCapability {
    async fn validate(&self, session_token: &str) -> Result<AuthenticatedIdentity, CapabilityError> {
        let resp = self
            .client
            .get(format!("{}/validate", self.base_url))
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(|e| CapabilityError::Transient(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CapabilityError::Unauthenticated);
        }
        if !resp.status().is_success() {
            return Err(CapabilityError::Permanent(format!("auth service returned {}", resp.status())));
        }

        resp.json::<AuthenticatedIdentity>()
            .await
            .map_err(|e| CapabilityError::Permanent(e.to_string()))
    }
}

pub struct HttpOcrCapability {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrCapability {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    mime: &'a str,
    config: &'a crate::domain::ProcessingConfig,
    #[serde(with = "base64_bytes")]
    bytes: &'a [u8],
}

#[async_trait]
impl OcrCapability for HttpOcrCapability {
    async fn run(
        &self,
        bytes: &[u8],
        mime: &str,
        config: &crate::domain::ProcessingConfig,
    ) -> Result<OcrOutput, CapabilityError> {
        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .json(&OcrRequest { mime, config, bytes })
            .send()
            .await
            .map_err(|e| CapabilityError::Transient(e.to_string()))?;

        if resp.status().is_server_error() {
            return Err(CapabilityError::Transient(format!("ocr service returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(CapabilityError::Permanent(format!("ocr service returned {}", resp.status())));
        }

        #[derive(Deserialize)]
        struct OcrResponseBody {
            html: String,
            page_count: i32,
            word_count: i32,
            confidence: f64,
        }

        let body: OcrResponseBody = resp.json().await.map_err(|e| CapabilityError::Permanent(e.to_string()))?;
        Ok(OcrOutput {
            html: body.html,
            page_count: body.page_count,
            word_count: body.word_count,
            confidence: body.confidence,
            page_images: None,
        })
    }
}

pub struct HttpPdfRenderCapability {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPdfRenderCapability {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PdfRenderCapability for HttpPdfRenderCapability {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, CapabilityError> {
        let resp = self
            .client
            .post(format!("{}/render", self.base_url))
            .body(html.to_string())
            .header("content-type", "text/html")
            .send()
            .await
            .map_err(|e| CapabilityError::Transient(e.to_string()))?;

        if resp.status().is_server_error() {
            return Err(CapabilityError::Transient(format!("render service returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(CapabilityError::Permanent(format!("render service returned {}", resp.status())));
        }

        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| CapabilityError::Permanent(e.to_string()))
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_allow_credit_check_approves_any_user() {
        let cap = AlwaysAllowCreditCheck;
        assert!(cap.check(UserId::new()).await.unwrap());
    }
}
