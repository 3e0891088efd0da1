//! Delivery sink seam.
//!
//! The pipeline only knows how to read the outbox and schedule work;
//! where a record actually goes lives behind `CdrSink` so tests can
//! substitute the portal with an in-process double.

use crate::{PipelineError, PipelineResult};
use cdr_store::CallRecord;
use gateway_config::Tenant;
use portal_client::{PortalClient, PortalMethod};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Portal endpoint a delivered call record lands on.
const SAVE_CALL_ENDPOINT: &str = "save_phone_call";

/// Destination for records leaving the outbox.
pub trait CdrSink: Send + Sync + 'static {
    /// Deliver one record. Ok means the record may be deleted.
    fn deliver(&self, record: &CallRecord) -> impl Future<Output = PipelineResult<()>> + Send;
}

/// The production sink: signed POST to the tenant portal matching the
/// record's country.
pub struct PortalSink {
    portal: Arc<PortalClient>,
    /// Tenants keyed by country code.
    tenants: BTreeMap<String, Tenant>,
    /// Path segment between the portal base URL and the endpoint name.
    api_prefix: String,
}

impl PortalSink {
    pub fn new(
        portal: Arc<PortalClient>,
        tenants: BTreeMap<String, Tenant>,
        api_prefix: String,
    ) -> Self {
        Self {
            portal,
            tenants,
            api_prefix,
        }
    }

    /// Wire payload: the preserved raw PBX fields overlaid with the
    /// classified values the portal actually reads.
    fn payload(record: &CallRecord) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &record.extra {
            map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        map.insert("UniqueId".to_string(), record.unique_id.clone().into());
        map.insert("InnerNumber".to_string(), record.inner_number.clone().into());
        map.insert(
            "OpponentNumber".to_string(),
            record.opponent_number.clone().into(),
        );
        map.insert("CallerId".to_string(), record.caller_id.clone().into());
        map.insert("CallType".to_string(), record.call_type.code().into());
        map.insert("Disposition".to_string(), record.disposition.clone().into());
        map.insert("StartTime".to_string(), record.start_time.clone().into());
        map.insert("BillSec".to_string(), record.billable_seconds.into());
        serde_json::Value::Object(map)
    }
}

impl CdrSink for PortalSink {
    async fn deliver(&self, record: &CallRecord) -> PipelineResult<()> {
        let tenant = self
            .tenants
            .get(&record.country)
            .ok_or_else(|| PipelineError::TenantNotConfigured(record.country.clone()))?;
        let url = format!(
            "{}{}{}",
            tenant.portal_url, self.api_prefix, SAVE_CALL_ENDPOINT
        );

        self.portal
            .send(
                &Self::payload(record),
                &url,
                PortalMethod::Post,
                &tenant.secret,
                &tenant.tenant_id,
            )
            .await?;

        debug!(unique_id = %record.unique_id, country = %record.country, "Call record delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CallRecord {
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("Channel".to_string(), "SIP/1007-a1".to_string());
        CallRecord {
            unique_id: "u1".to_string(),
            inner_number: "1007".to_string(),
            opponent_number: "0501234567".to_string(),
            caller_id: "0501234567".to_string(),
            call_type: cdr_store::CallType::Incoming,
            country: "ua".to_string(),
            tenant_id: "17".to_string(),
            disposition: "ANSWERED".to_string(),
            start_time: "2015-06-01 10:30:00".to_string(),
            billable_seconds: 42,
            extra,
        }
    }

    #[test]
    fn payload_overlays_classified_fields() {
        let payload = PortalSink::payload(&record());
        assert_eq!(payload["Channel"], "SIP/1007-a1");
        assert_eq!(payload["InnerNumber"], "1007");
        assert_eq!(payload["CallType"], 0);
        assert_eq!(payload["BillSec"], 42);
    }

    #[tokio::test]
    async fn unconfigured_country_is_an_error() {
        let sink = PortalSink::new(
            Arc::new(PortalClient::new()),
            BTreeMap::new(),
            String::new(),
        );
        let err = sink.deliver(&record()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TenantNotConfigured(c) if c == "ua"));
    }
}
