//! Frame codec: chunk reassembly and line classification.
//!
//! The bridge emits bounded-length UTF-8 notifications; anything longer is
//! split across several notifications, each non-final chunk prefixed with
//! `+`. `ContinuationBuffer` holds the one piece of state this module needs
//! (per link) and turns a stream of raw chunks into a stream of `Event`s.
//! Classification never fails: a line matching none of the known shapes
//! becomes `Event::Unclassified` rather than an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::NodeId;

/// A decoded, tagged bridge notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `NODE<id>:DATA:D:<duty>%,V:<v>V,I:<i>mA,P:<p>mW`
    Telemetry(Telemetry),
    /// `ERROR:<rest>`
    Error(String),
    /// `TIMEOUT:<rest>`
    Timeout(String),
    /// `SENT:<rest>` (diagnostic acknowledgement)
    Ack(String),
    /// `MESH_READY...`
    Ready,
    /// Anything matching none of the above; passed through, never dropped.
    Unclassified(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub node: NodeId,
    pub duty_pct: u8,
    pub voltage_v: f64,
    pub current_ma: f64,
    pub power_mw: f64,
}

static NODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^NODE(\d+)$").unwrap());
static SENSOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^D:(\d+)%,V:([\d.]+)V,I:([\d.]+)mA,P:([\d.]+)mW$").unwrap()
});

/// Per-link continuation state for chunked notifications.
///
/// One instance per bridge connection. Cleared on disconnect.
#[derive(Debug, Default)]
pub struct ContinuationBuffer {
    pending: String,
}

impl ContinuationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any partial message. Called on disconnect; never fails.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Feeds one raw notification chunk. Returns `Some(Event)` once a
    /// complete message has been reassembled and classified, or `None`
    /// while still waiting on continuation chunks.
    pub fn feed(&mut self, chunk: &str) -> Option<Event> {
        let chunk = chunk.trim_end();
        if let Some(partial) = chunk.strip_prefix('+') {
            self.pending.push_str(partial);
            return None;
        }

        let whole = if self.pending.is_empty() {
            chunk.to_string()
        } else {
            let mut combined = std::mem::take(&mut self.pending);
            combined.push_str(chunk);
            combined
        };

        Some(classify(whole.trim()))
    }
}

/// Classifies one fully reassembled line. Pure and total: every input maps
/// to some `Event`, even lines that match none of the known shapes.
pub fn classify(line: &str) -> Event {
    if let Some((left, right)) = line.split_once(":DATA:") {
        if let (Some(node_caps), Some(sensor_caps)) =
            (NODE_RE.captures(left), SENSOR_RE.captures(right))
        {
            let node_digits: u8 = node_caps[1].parse().unwrap_or(0);
            if let Ok(node) = NodeId::new(node_digits) {
                return Event::Telemetry(Telemetry {
                    node,
                    duty_pct: sensor_caps[1].parse().unwrap_or(0),
                    voltage_v: sensor_caps[2].parse().unwrap_or(0.0),
                    current_ma: sensor_caps[3].parse().unwrap_or(0.0),
                    power_mw: sensor_caps[4].parse().unwrap_or(0.0),
                });
            }
        }
        return Event::Unclassified(line.to_string());
    }

    if let Some(rest) = line.strip_prefix("ERROR:") {
        return Event::Error(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("TIMEOUT:") {
        return Event::Timeout(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("SENT:") {
        return Event::Ack(rest.to_string());
    }
    if line.starts_with("MESH_READY") {
        return Event::Ready;
    }

    Event::Unclassified(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_whole_telemetry_line() {
        let event = classify("NODE1:DATA:D:50%,V:12.000V,I:100.0mA,P:1200.0mW");
        match event {
            Event::Telemetry(t) => {
                assert_eq!(t.node.get(), 1);
                assert_eq!(t.duty_pct, 50);
                assert_eq!(t.voltage_v, 12.000);
                assert_eq!(t.current_ma, 100.0);
                assert_eq!(t.power_mw, 1200.0);
            }
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn classifies_case_insensitive_units() {
        let event = classify("node3:DATA:d:10%,v:5.0V,i:200.0MA,p:1000.0MW");
        assert!(matches!(event, Event::Telemetry(t) if t.node.get() == 3 && t.duty_pct == 10));
    }

    #[test]
    fn classifies_error_timeout_ack_ready() {
        assert!(matches!(classify("ERROR:bad thing"), Event::Error(s) if s == "bad thing"));
        assert!(matches!(classify("TIMEOUT:node 3"), Event::Timeout(s) if s == "node 3"));
        assert!(matches!(classify("SENT:1:DUTY:50"), Event::Ack(s) if s == "1:DUTY:50"));
        assert!(matches!(classify("MESH_READY rev2"), Event::Ready));
    }

    #[test]
    fn unclassified_is_never_fatal() {
        assert!(matches!(classify("garbage line"), Event::Unclassified(s) if s == "garbage line"));
    }

    #[test]
    fn classification_stable_under_trailing_whitespace() {
        let a = classify("NODE1:DATA:D:50%,V:12.000V,I:100.0mA,P:1200.0mW");
        let b = classify("NODE1:DATA:D:50%,V:12.000V,I:100.0mA,P:1200.0mW   \r\n");
        assert_eq!(a, b);
    }

    /// Reassembly law: any split of a message
    /// with `+` on every non-final piece decodes to one event equivalent to
    /// feeding the message whole.
    #[test]
    fn reassembles_chunked_telemetry() {
        let mut buf = ContinuationBuffer::new();
        assert_eq!(buf.feed("+NODE1:DAT"), None);
        assert_eq!(buf.feed("+A:D:50%,V:12.000V,"), None);
        let event = buf.feed("I:100.0mA,P:1200.0mW").unwrap();

        let whole = classify("NODE1:DATA:D:50%,V:12.000V,I:100.0mA,P:1200.0mW");
        assert_eq!(event, whole);
        assert!(buf.pending.is_empty());
    }

    #[test]
    fn clear_empties_continuation_buffer() {
        let mut buf = ContinuationBuffer::new();
        buf.feed("+partial");
        buf.clear();
        assert!(buf.pending.is_empty());
    }

    #[test]
    fn arbitrary_split_reassembles_identically() {
        let message = "NODE2:DATA:D:75%,V:11.500V,I:300.0mA,P:3450.0mW";
        for split_at in 1..message.len() {
            let mut buf = ContinuationBuffer::new();
            let (first, second) = message.split_at(split_at);
            assert_eq!(buf.feed(&format!("+{first}")), None);
            let event = buf.feed(second).unwrap();
            assert_eq!(event, classify(message));
        }
    }
}
