//! The Cdr event handler: raw PBX event to persisted call record.

use ami_client::AmiFrame;
use call_routing::{
    classify, normalize_start_time, resolve_country_by_prefix, validate_numbers, CallbackCache,
    Classification, NumberRegistry, Resolution,
};
use cdr_store::{CallRecord, CdrStore, PendingRecording, StoreResult};
use gateway_config::Config;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::recording::recording_file_name;

/// Caller id marker the dial plan sets on portal-initiated calls.
const CRM_CALLER_MARKER: &str = "call_from_CRM";

/// Portal-initiated calls at or below this length are overwhelmingly
/// unanswered ring-throughs; their recordings are noise.
const CRM_MIN_RECORDING_SECS: i64 = 10;

/// Classifies, validates and persists call-detail events.
///
/// Every drop is deliberate and logged at debug; a record that clears
/// all gates is written to the outbox before the event is considered
/// handled. Only persistence failures surface as errors, and those are
/// fatal to the process.
pub struct CdrIngest {
    config: Arc<Config>,
    registry: Arc<NumberRegistry>,
    callbacks: CallbackCache,
    store: Arc<CdrStore>,
}

impl CdrIngest {
    pub fn new(config: Arc<Config>, registry: Arc<NumberRegistry>, store: Arc<CdrStore>) -> Self {
        Self {
            config,
            registry,
            callbacks: CallbackCache::default(),
            store,
        }
    }

    /// Process one Cdr event.
    pub fn handle(&self, frame: &AmiFrame) -> StoreResult<()> {
        let unique_id = frame.get_or_empty("UniqueID");
        if unique_id.is_empty() {
            return Ok(());
        }

        let channel = frame.get_or_empty("Channel");
        let destination_channel = frame.get_or_empty("DestinationChannel");
        let source = frame.get_or_empty("Source");
        let destination = frame.get_or_empty("Destination");
        let caller_id = frame.get_or_empty("CallerID");

        // Local channels are the legs of portal-initiated call-backs
        // and classify through the pairing cache.
        let classification: Classification = if channel.starts_with("Local/") {
            self.callbacks
                .classify_leg(channel, destination_channel, destination)
        } else {
            classify(channel, destination_channel, source, destination, caller_id)
        };

        if !classification.call_type.is_deliverable() {
            debug!(unique_id, call_type = ?classification.call_type, "Record dropped");
            return Ok(());
        }

        let country = match self.registry.resolve(&classification.inner) {
            Resolution::Owned(country) => country,
            Resolution::Ambiguous => {
                match resolve_country_by_prefix(&classification.opponent) {
                    Some(country) => country.to_string(),
                    None => {
                        debug!(unique_id, inner = %classification.inner,
                               "Ambiguous inner number and no usable prefix");
                        return Ok(());
                    }
                }
            }
            Resolution::Unknown => {
                debug!(unique_id, inner = %classification.inner, "Unprovisioned inner number");
                return Ok(());
            }
        };

        let Some(tenant) = self.config.tenants.get(&country) else {
            debug!(unique_id, country = %country, "No tenant configured for country");
            return Ok(());
        };

        if !validate_numbers(&classification.inner, &classification.opponent, &country) {
            debug!(unique_id, inner = %classification.inner,
                   opponent = %classification.opponent, "Implausible number pair");
            return Ok(());
        }

        let Some(start_time) = normalize_start_time(
            frame.get_or_empty("StartTime"),
            self.config.time_zone_offset_hours,
        ) else {
            return Ok(());
        };

        let billable_seconds: i64 = frame
            .get_or_empty("BillableSeconds")
            .parse()
            .unwrap_or_default();

        let mut extra = BTreeMap::new();
        for (key, value) in frame.fields() {
            extra.insert(key.to_string(), value.to_string());
        }

        let record = CallRecord {
            unique_id: unique_id.to_string(),
            inner_number: classification.inner.clone(),
            opponent_number: classification.opponent.clone(),
            caller_id: caller_id.to_string(),
            call_type: classification.call_type,
            country: country.clone(),
            tenant_id: tenant.tenant_id.clone(),
            disposition: frame.get_or_empty("Disposition").to_string(),
            start_time,
            billable_seconds,
            extra,
        };
        self.store.put_cdr(&record)?;

        let short_crm_call = record.caller_id.contains(CRM_CALLER_MARKER)
            && billable_seconds <= CRM_MIN_RECORDING_SECS;
        if record.is_answered()
            && billable_seconds >= self.config.min_recording_secs as i64
            && !short_crm_call
        {
            self.store.add_recording(&PendingRecording {
                unique_id: record.unique_id.clone(),
                file_name: recording_file_name(&self.config.pbx_name, &record.unique_id),
                inner_number: record.inner_number.clone(),
                country,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_routing::{build_snapshot, CallType};
    use gateway_config::{AmiSettings, DeliverySettings, IntervalSettings, Tenant};
    use portal_client::PortalClient;

    fn config() -> Arc<Config> {
        let mut tenants = BTreeMap::new();
        tenants.insert(
            "ua".to_string(),
            Tenant {
                portal_url: "https://my.example.ua/".to_string(),
                tenant_id: "17".to_string(),
                secret: "ua-secret".to_string(),
            },
        );
        Arc::new(Config {
            pbx_name: "office".to_string(),
            log_level: "info".to_string(),
            ami: AmiSettings {
                host: "127.0.0.1:5038".to_string(),
                username: "gw".to_string(),
                secret: "s".to_string(),
            },
            api_prefix: String::new(),
            tenants,
            time_zone_offset_hours: 2,
            outbox_path: ":memory:".to_string(),
            recordings_dir: "/tmp/calls".to_string(),
            min_recording_secs: 1,
            alert_url: None,
            delivery: DeliverySettings::default(),
            intervals: IntervalSettings::default(),
        })
    }

    fn ingest() -> (CdrIngest, Arc<CdrStore>) {
        let registry = Arc::new(NumberRegistry::new(
            Arc::new(PortalClient::new()),
            Vec::new(),
        ));
        registry.install(build_snapshot(&[(
            "ua".to_string(),
            vec!["1007".to_string(), "1234".to_string()],
        )]));
        let store = Arc::new(CdrStore::open_in_memory().unwrap());
        (CdrIngest::new(config(), registry, store.clone()), store)
    }

    fn cdr_event(fields: &[(&str, &str)]) -> AmiFrame {
        let mut all = vec![("Event".to_string(), "Cdr".to_string())];
        all.extend(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        AmiFrame::from_fields(all)
    }

    #[test]
    fn incoming_call_is_persisted() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-1.1"),
            ("Channel", "SIP/trunk-00a1"),
            ("DestinationChannel", "SIP/1007-00b2"),
            ("Source", "0501234567"),
            ("Destination", ""),
            ("CallerID", "0501234567"),
            ("Disposition", "ANSWERED"),
            ("StartTime", "2015-06-01 12:30:00"),
            ("BillableSeconds", "42"),
        ]);
        ingest.handle(&frame).unwrap();

        let record = store.get_cdr("pbx-1.1").unwrap().unwrap();
        assert_eq!(record.call_type, CallType::Incoming);
        assert_eq!(record.inner_number, "1007");
        assert_eq!(record.opponent_number, "0501234567");
        assert_eq!(record.country, "ua");
        assert_eq!(record.tenant_id, "17");
        // Local time shifted back by the configured offset.
        assert_eq!(record.start_time, "2015-06-01 10:30:00");
        assert_eq!(record.extra["Channel"], "SIP/trunk-00a1");

        // Answered and long enough: a recording is registered too.
        assert_eq!(store.recording_count().unwrap(), 1);
        let recording = &store.select_recordings(1).unwrap()[0];
        assert_eq!(recording.file_name, "office-pbx-1.1.wav");
    }

    #[test]
    fn hidden_incoming_end_to_end() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-2.1"),
            ("Channel", "SIP/1234-a"),
            ("DestinationChannel", "SIP/ext-99887-b"),
            ("Source", ""),
            ("Destination", ""),
            ("CallerID", ""),
            ("Disposition", "NO ANSWER"),
            ("StartTime", "2015-06-01 12:30:00"),
            ("BillableSeconds", "0"),
        ]);
        ingest.handle(&frame).unwrap();

        let record = store.get_cdr("pbx-2.1").unwrap().unwrap();
        assert_eq!(record.call_type, CallType::IncomingHidden);
        assert_eq!(record.opponent_number, "xxxx");
        // Unanswered: no recording registered.
        assert_eq!(store.recording_count().unwrap(), 0);
    }

    #[test]
    fn short_crm_call_records_no_audio() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-7.1"),
            ("Channel", "SIP/trunk-00a1"),
            ("DestinationChannel", "SIP/1007-00b2"),
            ("Source", "0501234567"),
            ("CallerID", "call_from_CRM <42>"),
            ("Disposition", "ANSWERED"),
            ("StartTime", "2015-06-01 12:30:00"),
            ("BillableSeconds", "8"),
        ]);
        ingest.handle(&frame).unwrap();

        // The record itself is kept; only the recording is suppressed.
        assert!(store.get_cdr("pbx-7.1").unwrap().is_some());
        assert_eq!(store.recording_count().unwrap(), 0);

        // Past the threshold the call records as usual.
        let frame = cdr_event(&[
            ("UniqueID", "pbx-7.2"),
            ("Channel", "SIP/trunk-00a1"),
            ("DestinationChannel", "SIP/1007-00b2"),
            ("Source", "0501234567"),
            ("CallerID", "call_from_CRM <42>"),
            ("Disposition", "ANSWERED"),
            ("StartTime", "2015-06-01 12:31:00"),
            ("BillableSeconds", "30"),
        ]);
        ingest.handle(&frame).unwrap();
        assert_eq!(store.recording_count().unwrap(), 1);
    }

    #[test]
    fn inner_call_is_dropped() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-3.1"),
            ("Channel", "SIP/1007-a"),
            ("DestinationChannel", "SIP/1007-b"),
            ("Source", "0501234567"),
            ("StartTime", "2015-06-01 12:30:00"),
        ]);
        ingest.handle(&frame).unwrap();
        assert_eq!(store.cdr_count().unwrap(), 0);
    }

    #[test]
    fn unprovisioned_inner_number_is_dropped() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-4.1"),
            ("Channel", "SIP/trunk-a"),
            ("DestinationChannel", "SIP/9999-b"),
            ("Source", "0501234567"),
            ("StartTime", "2015-06-01 12:30:00"),
        ]);
        ingest.handle(&frame).unwrap();
        assert_eq!(store.cdr_count().unwrap(), 0);
    }

    #[test]
    fn unparseable_start_time_is_dropped() {
        let (ingest, store) = ingest();
        let frame = cdr_event(&[
            ("UniqueID", "pbx-5.1"),
            ("Channel", "SIP/trunk-a"),
            ("DestinationChannel", "SIP/1007-b"),
            ("Source", "0501234567"),
            ("StartTime", "not a time"),
        ]);
        ingest.handle(&frame).unwrap();
        assert_eq!(store.cdr_count().unwrap(), 0);
    }

    #[test]
    fn callback_legs_pair_into_one_outgoing_record() {
        let (ingest, store) = ingest();
        let first = cdr_event(&[
            ("UniqueID", "pbx-6.1"),
            ("Channel", "Local/777@callback-0001;1"),
            ("DestinationChannel", "SIP/1007-ab"),
            ("StartTime", "2015-06-01 12:30:00"),
        ]);
        ingest.handle(&first).unwrap();
        assert_eq!(store.cdr_count().unwrap(), 0);

        let second = cdr_event(&[
            ("UniqueID", "pbx-6.2"),
            ("Channel", "Local/777@callback-0001;2"),
            ("DestinationChannel", "SIP/trunk-cd"),
            ("Destination", "0501234567"),
            ("Disposition", "ANSWERED"),
            ("StartTime", "2015-06-01 12:31:00"),
            ("BillableSeconds", "30"),
        ]);
        ingest.handle(&second).unwrap();

        let record = store.get_cdr("pbx-6.2").unwrap().unwrap();
        assert_eq!(record.call_type, CallType::Outgoing);
        assert_eq!(record.inner_number, "1007");
        assert_eq!(record.opponent_number, "0501234567");
    }
}
