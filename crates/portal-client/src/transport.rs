//! HTTP transport for signed portal requests.

use crate::{sign, PortalError, PortalResult};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Fixed timeout for every portal request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The signed envelope every portal endpoint expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedEnvelope {
    pub data: String,
    pub company_id: String,
}

/// Request method for a portal endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalMethod {
    Get,
    Post,
}

/// HTTP client for the tenant portals.
#[derive(Clone)]
pub struct PortalClient {
    client: reqwest::Client,
}

impl Default for PortalClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static settings");
        Self { client }
    }

    /// Sign `payload` for the tenant and send it to `url`.
    ///
    /// Returns the raw response body on HTTP 200. Any non-200 status or
    /// transport failure is an error; this layer never retries.
    pub async fn send<T: Serialize>(
        &self,
        payload: &T,
        url: &str,
        method: PortalMethod,
        secret: &str,
        tenant_id: &str,
    ) -> PortalResult<String> {
        let body = serde_json::to_vec(payload)?;
        let envelope = SignedEnvelope {
            data: sign(&body, secret),
            company_id: tenant_id.to_string(),
        };

        debug!(url, ?method, tenant_id, "Sending portal request");

        let request = match method {
            PortalMethod::Post => self.client.post(url).json(&envelope),
            PortalMethod::Get => self.client.get(url).query(&[
                ("Data", envelope.data.as_str()),
                ("CompanyId", envelope.company_id.as_str()),
            ]),
        };

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(PortalError::RemoteStatus(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_wire_field_names() {
        let envelope = SignedEnvelope {
            data: "abc.def".to_string(),
            company_id: "17".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["Data"], "abc.def");
        assert_eq!(json["CompanyId"], "17");
    }

    #[tokio::test]
    async fn transport_error_on_unreachable_host() {
        let client = PortalClient::new();
        let err = client
            .send(
                &serde_json::json!({}),
                // Reserved TEST-NET-1 address: connection must fail.
                "http://192.0.2.1:9/save_phone_call",
                PortalMethod::Post,
                "secret",
                "17",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Transport(_)));
    }
}
