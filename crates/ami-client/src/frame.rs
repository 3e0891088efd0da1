//! AMI wire frame: an ordered set of `Key: Value` fields terminated by a
//! blank line.

/// One AMI frame (action, response or event).
///
/// Field order is preserved so a frame round-trips through
/// parse/serialize, and unknown fields survive for forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiFrame {
    fields: Vec<(String, String)>,
}

impl AmiFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame with the `Action` field set.
    pub fn action(name: &str) -> Self {
        let mut frame = Self::new();
        frame.set("Action", name);
        frame
    }

    pub fn from_fields(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key`, defaulting to the empty string.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Set `key` to `value`, replacing an existing field of the same name.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.fields.push((key.to_string(), value.to_string()));
        }
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Event name, when this frame is an event.
    pub fn event_name(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    /// True for a `Response: Success` frame.
    pub fn is_success(&self) -> bool {
        self.get("Response") == Some("Success")
    }

    /// Serialize for the wire: CRLF-separated fields plus the terminating
    /// blank line.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
