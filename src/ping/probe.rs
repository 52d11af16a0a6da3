use crate::ping::constants::*;
use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Seconds since the Unix epoch as a float.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Random identifier separating one session's probes from any other traffic
/// in the same chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTag(String);

impl SessionTag {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let tag = (0..SESSION_TAG_LEN)
            .map(|_| SESSION_TAG_ALPHABET[rng.gen_range(0..SESSION_TAG_ALPHABET.len())] as char)
            .collect();
        Self(tag)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outbound probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub tag: SessionTag,
    pub sequence: SequenceNumber,
    pub sent_at: f64,
}

impl Probe {
    pub fn new(tag: SessionTag, sequence: SequenceNumber, sent_at: f64) -> Self {
        Self {
            tag,
            sequence,
            sent_at,
        }
    }

    /// Render as `"{tag} {sent_at:.4} {sequence:>17}"`.
    pub fn encode(&self) -> String {
        format!(
            "{} {:.4} {:>width$}",
            self.tag,
            self.sent_at,
            self.sequence.0,
            width = SEQUENCE_WIDTH
        )
    }
}

/// Fields recovered from a message that has probe shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProbe<'a> {
    pub tag: &'a str,
    pub sent_at: f64,
    pub sequence: SequenceNumber,
}

impl<'a> ParsedProbe<'a> {
    /// Parse message text. Anything that is not exactly three fields with a
    /// float timestamp and an integer sequence is not a probe.
    pub fn parse(text: &'a str) -> Option<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != PROBE_FIELD_COUNT {
            trace!(fields = fields.len(), "Not a probe: wrong field count");
            return None;
        }
        let sent_at = fields[1].parse::<f64>().ok().filter(|t| t.is_finite())?;
        let sequence = fields[2].parse::<u64>().ok()?;
        Some(Self {
            tag: fields[0],
            sent_at,
            sequence: SequenceNumber(sequence),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tag_shape() {
        let tag = SessionTag::generate();
        assert_eq!(tag.as_str().len(), SESSION_TAG_LEN);
        assert!(tag
            .as_str()
            .bytes()
            .all(|b| SESSION_TAG_ALPHABET.contains(&b)));
        assert_ne!(tag, SessionTag::generate());
    }

    #[test]
    fn test_probe_encode_layout() {
        let probe = Probe::new(SessionTag::from("abc"), SequenceNumber(3), 1_700_000_000.0);
        assert_eq!(probe.encode(), "abc 1700000000.0000                 3");
    }

    #[test]
    fn test_parse_zero_padded_sequence() {
        let parsed = ParsedProbe::parse("abc 1700000000.0000 00000000000000003").unwrap();
        assert_eq!(parsed.tag, "abc");
        assert_eq!(parsed.sequence, SequenceNumber(3));
        assert!((parsed.sent_at - 1_700_000_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(ParsedProbe::parse("abc 1700000000.0000").is_none());
        assert!(ParsedProbe::parse("abc 1700000000.0000 3 extra").is_none());
        assert!(ParsedProbe::parse("abc notatime 3").is_none());
        assert!(ParsedProbe::parse("abc 1700000000.0 -3").is_none());
        assert!(ParsedProbe::parse("").is_none());
    }
}
