//! Persistent AMI session with request/response correlation.

use crate::{AmiError, AmiFrame, AmiResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Event classes the gateway subscribes to: call-detail plus
/// bridge/queue agent events.
pub const EVENT_MASK: &str = "call,agent";

/// How long to wait for a correlated response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// AMI connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub username: String,
    pub secret: String,
}

type EventHandler = Arc<dyn Fn(&AmiFrame) + Send + Sync>;

struct ClientInner {
    /// Event name -> handlers, invoked inline on the read loop.
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    /// In-flight requests awaiting a correlated response.
    pending: Mutex<HashMap<String, oneshot::Sender<AmiFrame>>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    next_action_id: AtomicU64,
}

impl ClientInner {
    /// Route an inbound frame to the matching pending request or to the
    /// event registry. A frame goes to exactly one of the two: events
    /// never resolve a correlation, even when they carry our ActionID.
    fn dispatch(&self, frame: AmiFrame) {
        if frame.event_name().is_none() {
            if let Some(id) = frame.action_id().map(str::to_string) {
                let sender = self.pending.lock().unwrap().remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(frame);
                    return;
                }
            }
            debug!(response = ?frame.get("Response"), "Uncorrelated response dropped");
            return;
        }

        let event = frame.event_name().unwrap_or_default().to_string();
        let handlers: Vec<EventHandler> = {
            let registry = self.handlers.lock().unwrap();
            registry.get(&event).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(&frame);
        }
    }

    /// Drop all pending correlations; their awaiters observe
    /// `ConnectionClosed`.
    fn fail_pending(&self) {
        self.pending.lock().unwrap().clear();
    }
}

/// Handle to the AMI session. Cheap to clone; handlers registered on
/// any clone survive reconnects.
#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<ClientInner>,
}

impl Default for AmiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AmiClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClientInner {
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                next_action_id: AtomicU64::new(1),
            }),
        }
    }

    /// Install a handler for every inbound event named `event`.
    /// Multiple handlers per event name may coexist. See the crate docs
    /// for the inline-invocation contract.
    pub fn register_event_handler<F>(&self, event: &str, handler: F)
    where
        F: Fn(&AmiFrame) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Open a TCP session, log in and subscribe to the event mask.
    ///
    /// Returns a receiver that resolves when the session ends. An
    /// `Authentication` error is fatal; IO errors are retryable and the
    /// supervisor keeps trying.
    pub async fn connect(&self, settings: &ConnectSettings) -> AmiResult<oneshot::Receiver<()>> {
        let stream = TcpStream::connect(&settings.host).await?;
        let (read_half, write_half) = stream.into_split();
        *self.inner.writer.lock().await = Some(write_half);

        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(read_loop(self.inner.clone(), read_half, closed_tx));

        let login = AmiFrame::action("Login")
            .with("Username", &settings.username)
            .with("Secret", &settings.secret)
            .with("Events", EVENT_MASK);
        let response = self.send_action(login).await?;
        if !response.is_success() {
            let message = response.get_or_empty("Message").to_string();
            self.disconnect().await;
            return Err(AmiError::Authentication(message));
        }
        Ok(closed_rx)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.writer.lock().await.is_some()
    }

    /// Send an action and await its correlated response.
    ///
    /// The correlation entry is registered before the frame hits the
    /// wire, so a response racing the registration cannot be lost.
    /// Local failures return `Err`; remote application errors arrive in
    /// the response frame itself.
    pub async fn send_action(&self, mut frame: AmiFrame) -> AmiResult<AmiFrame> {
        let action_id = self.next_action_id();
        frame.set("ActionID", &action_id);

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(action_id.clone(), tx);

        if let Err(e) = self.write_frame(&frame).await {
            self.inner.pending.lock().unwrap().remove(&action_id);
            return Err(e);
        }

        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AmiError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&action_id);
                Err(AmiError::ResponseTimeout)
            }
        }
    }

    /// Send an action without awaiting a response. Used for actions
    /// whose results arrive as an event burst (QueueStatus) or that
    /// have no useful response (Logoff).
    pub async fn send_action_no_wait(&self, mut frame: AmiFrame) -> AmiResult<()> {
        let action_id = self.next_action_id();
        frame.set("ActionID", &action_id);
        self.write_frame(&frame).await
    }

    /// Graceful logoff: tell the manager we are leaving, then drop the
    /// write half. The read loop ends when the manager closes.
    pub async fn logoff(&self) -> AmiResult<()> {
        let result = self.send_action_no_wait(AmiFrame::action("Logoff")).await;
        self.disconnect().await;
        result
    }

    pub(crate) async fn disconnect(&self) {
        self.inner.writer.lock().await.take();
        self.inner.fail_pending();
    }

    async fn write_frame(&self, frame: &AmiFrame) -> AmiResult<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(AmiError::NotConnected)?;
        writer.write_all(frame.to_wire().as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn next_action_id(&self) -> String {
        let id = self.inner.next_action_id.fetch_add(1, Ordering::Relaxed);
        format!("gw-{id}")
    }

    #[cfg(test)]
    fn dispatch_for_test(&self, frame: AmiFrame) {
        self.inner.dispatch(frame);
    }

    #[cfg(test)]
    fn register_pending_for_test(&self, action_id: &str) -> oneshot::Receiver<AmiFrame> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(action_id.to_string(), tx);
        rx
    }
}

/// Read frames off the socket and demultiplex them. One instance per
/// session; exits on EOF or transport error.
async fn read_loop(inner: Arc<ClientInner>, read_half: OwnedReadHalf, closed_tx: oneshot::Sender<()>) {
    let mut lines = BufReader::new(read_half).lines();
    let mut block: Vec<(String, String)> = Vec::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    if !block.is_empty() {
                        inner.dispatch(AmiFrame::from_fields(std::mem::take(&mut block)));
                    }
                } else if line == "--END COMMAND--" {
                    inner.dispatch(AmiFrame::from_fields(std::mem::take(&mut block)));
                } else if let Some((key, value)) = line.split_once(':') {
                    block.push((key.trim().to_string(), value.trim().to_string()));
                } else if !block.is_empty() {
                    // Continuation line of a command response.
                    append_output(&mut block, line);
                }
                // Anything else is the login banner; skip it.
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "AMI read failed");
                break;
            }
        }
    }

    inner.fail_pending();
    let _ = closed_tx.send(());
}

fn append_output(block: &mut Vec<(String, String)>, line: &str) {
    if let Some(slot) = block.iter_mut().find(|(k, _)| k == "Output") {
        slot.1.push('\n');
        slot.1.push_str(line);
    } else {
        block.push(("Output".to_string(), line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn dispatch_resolves_pending_response() {
        let client = AmiClient::new();
        let rx = client.register_pending_for_test("gw-9");

        let response = AmiFrame::from_fields(vec![
            ("Response".to_string(), "Success".to_string()),
            ("ActionID".to_string(), "gw-9".to_string()),
        ]);
        client.dispatch_for_test(response);

        let frame = rx.await.unwrap();
        assert!(frame.is_success());
    }

    #[tokio::test]
    async fn dispatch_routes_events_to_handlers_not_pending() {
        let client = AmiClient::new();
        let mut rx = client.register_pending_for_test("gw-3");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_a = seen.clone();
        let seen_b = seen.clone();
        client.register_event_handler("QueueMember", move |_| {
            seen_a.fetch_add(1, Ordering::SeqCst);
        });
        client.register_event_handler("QueueMember", move |_| {
            seen_b.fetch_add(1, Ordering::SeqCst);
        });

        // Event bursts triggered by an action carry its ActionID but
        // must still reach the handlers, not the correlation table.
        let event = AmiFrame::from_fields(vec![
            ("Event".to_string(), "QueueMember".to_string()),
            ("ActionID".to_string(), "gw-3".to_string()),
        ]);
        client.dispatch_for_test(event);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        // The pending correlation is untouched.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_action_without_session_fails_locally() {
        let client = AmiClient::new();
        let err = client.send_action(AmiFrame::action("Ping")).await.unwrap_err();
        assert!(matches!(err, AmiError::NotConnected));
    }

    #[tokio::test]
    async fn failed_session_drops_pending() {
        let client = AmiClient::new();
        let rx = client.register_pending_for_test("gw-1");
        client.disconnect().await;
        assert!(rx.await.is_err());
    }
}
