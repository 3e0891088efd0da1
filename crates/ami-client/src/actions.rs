//! Manager actions used by the gateway.

use crate::{AmiClient, AmiError, AmiFrame, AmiResult};

/// Liveness check.
pub async fn ping(client: &AmiClient) -> AmiResult<AmiFrame> {
    client.send_action(AmiFrame::action("Ping")).await
}

/// Ask for the full queue membership dump. The results arrive as a
/// burst of `QueueMember` events closed by `QueueStatusComplete`, so
/// there is no single response to await.
pub async fn queue_status(client: &AmiClient) -> AmiResult<()> {
    client.send_action_no_wait(AmiFrame::action("QueueStatus")).await
}

/// Join an inner number's SIP peer to a queue.
pub async fn queue_add(client: &AmiClient, queue: &str, number: &str) -> AmiResult<AmiFrame> {
    let interface = format!("SIP/{number}");
    let frame = AmiFrame::action("QueueAdd")
        .with("Queue", queue)
        .with("Interface", &interface)
        .with("StateInterface", &interface);
    client.send_action(frame).await
}

/// Remove an inner number's SIP peer from a queue.
pub async fn queue_remove(client: &AmiClient, queue: &str, number: &str) -> AmiResult<AmiFrame> {
    let frame = AmiFrame::action("QueueRemove")
        .with("Queue", queue)
        .with("Interface", &format!("SIP/{number}"));
    client.send_action(frame).await
}

/// Start recording both legs of a channel into `file`.
pub async fn mix_monitor(client: &AmiClient, channel: &str, file: &str) -> AmiResult<AmiFrame> {
    let frame = AmiFrame::action("MixMonitor")
        .with("Channel", channel)
        .with("File", file)
        .with("Options", "ab");
    client.send_action(frame).await
}

/// Run a CLI command over the manager connection.
pub async fn command(client: &AmiClient, cli_command: &str) -> AmiResult<AmiFrame> {
    let frame = AmiFrame::action("Command").with("Command", cli_command);
    client.send_action(frame).await
}

/// The queue an inner number is statically provisioned to, from AstDB.
///
/// Asterisk answers a `database get` with a `Value: <queue>` line in
/// the command output; only the first line matters.
pub async fn static_queue(client: &AmiClient, number: &str) -> AmiResult<String> {
    let response = command(client, &format!("database get queues {number}")).await?;
    let output = response
        .get("Output")
        .or_else(|| response.get("Value"))
        .unwrap_or_default();
    parse_static_queue(output)
        .ok_or_else(|| AmiError::Protocol(format!("no static queue for {number}")))
}

fn parse_static_queue(output: &str) -> Option<String> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Value:") {
            let queue = value.trim().lines().next().unwrap_or("").to_string();
            if !queue.is_empty() {
                return Some(queue);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_static_queue_takes_value_line() {
        let output = "Value: myqueue1\nDatabase entry found";
        assert_eq!(parse_static_queue(output), Some("myqueue1".to_string()));
    }

    #[test]
    fn parse_static_queue_missing_entry() {
        assert_eq!(parse_static_queue("Database entry not found"), None);
        assert_eq!(parse_static_queue(""), None);
        assert_eq!(parse_static_queue("Value:"), None);
    }
}
