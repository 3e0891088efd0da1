//! The Bridge event handler: start recording bridged calls.

use ami_client::{actions, AmiClient, AmiFrame};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Bound on the channel dedup set before it is reset. Channel names
/// embed a per-call sequence number, so the set only grows.
const SEEN_LIMIT: usize = 10_000;

/// File name a call's recording is written under.
pub fn recording_file_name(pbx_name: &str, unique_id: &str) -> String {
    format!("{pbx_name}-{unique_id}.wav")
}

/// Issues one MixMonitor per bridged channel.
pub struct RecordStarter {
    client: AmiClient,
    pbx_name: String,
    recordings_dir: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl RecordStarter {
    pub fn new(client: AmiClient, pbx_name: &str, recordings_dir: &Path) -> Self {
        Self {
            client,
            pbx_name: pbx_name.to_string(),
            recordings_dir: recordings_dir.to_path_buf(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Decide whether this Bridge event starts a new recording.
    /// Returns the channel and target file, or None for repeats and
    /// malformed events.
    fn observe(&self, frame: &AmiFrame) -> Option<(String, String)> {
        let channel = frame.get("Channel1")?.to_string();
        let unique_id = frame.get("Uniqueid1")?;
        if channel.is_empty() || unique_id.is_empty() {
            return None;
        }

        let mut seen = self.seen.lock().unwrap();
        if seen.len() >= SEEN_LIMIT {
            seen.clear();
        }
        if !seen.insert(channel.clone()) {
            return None;
        }

        let file = self
            .recordings_dir
            .join(recording_file_name(&self.pbx_name, unique_id))
            .to_string_lossy()
            .into_owned();
        Some((channel, file))
    }

    /// Process one Bridge event.
    pub async fn handle(&self, frame: &AmiFrame) {
        let Some((channel, file)) = self.observe(frame) else {
            return;
        };
        debug!(channel = %channel, file = %file, "Starting call recording");
        if let Err(e) = actions::mix_monitor(&self.client, &channel, &file).await {
            warn!(channel = %channel, error = %e, "MixMonitor failed");
        }
    }
}
