//! # Topic Router (C4)
//!
//! Builds and validates the three MQTT topics this crate ever publishes or
//! subscribes to (§6 "Topic layout"). No teacher equivalent exists — the
//! teacher's `sync.rs` hardcodes a single broadcast topic string inline —
//! so this is built fresh, in the style of the teacher's other small,
//! single-purpose modules (plain functions over a tiny struct, `CoreError`
//! for anything a caller could get wrong).

use crate::error::CoreError;

/// `+` and `#` are MQTT wildcard characters and are never legal in a
/// published or subscribed concrete topic segment that this crate builds
/// itself; `client_id`/`topic_prefix` come from configuration or a peer's
/// self-reported identity, so they're validated at construction time rather
/// than trusted.
const FORBIDDEN_CHARS: [char; 3] = ['+', '#', '\u{0}'];

/// Collapse runs of consecutive `/` into a single `/` (§4.4: topic segments
/// normalize repeated separators rather than rejecting them).
fn normalize_repeated_slashes(segment: &str) -> String {
    let mut normalized = String::with_capacity(segment.len());
    let mut prev_was_slash = false;
    for c in segment.chars() {
        if c == '/' {
            if prev_was_slash {
                continue;
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        normalized.push(c);
    }
    normalized
}

fn validate_segment(segment: &str, what: &str) -> Result<String, CoreError> {
    let normalized = normalize_repeated_slashes(segment);
    if normalized.is_empty() {
        return Err(CoreError::InvalidRequest(format!("{what} must not be empty")));
    }
    if normalized.contains(FORBIDDEN_CHARS) {
        return Err(CoreError::InvalidRequest(format!(
            "{what} must not contain '+', '#', or NUL"
        )));
    }
    if normalized.starts_with('/') || normalized.ends_with('/') {
        return Err(CoreError::InvalidRequest(format!(
            "{what} must not start or end with '/'"
        )));
    }
    Ok(normalized)
}

/// Topic namespace rooted at an optional prefix, shared by a node's command,
/// response, and replication topics.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    prefix: Option<String>,
}

impl TopicRouter {
    /// `prefix` is an optional namespace segment (e.g. a deployment or
    /// tenant name) shared by every topic this router builds. An empty
    /// string is treated the same as `None`.
    pub fn new(prefix: impl Into<String>) -> Result<Self, CoreError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Ok(Self { prefix: None });
        }
        let normalized = validate_segment(&prefix, "topic prefix")?;
        Ok(Self { prefix: Some(normalized) })
    }

    fn join(&self, segments: &[&str]) -> String {
        match &self.prefix {
            Some(p) => {
                let mut out = String::with_capacity(p.len() + segments.iter().map(|s| s.len() + 1).sum::<usize>());
                out.push_str(p);
                for s in segments {
                    out.push('/');
                    out.push_str(s);
                }
                out
            }
            None => segments.join("/"),
        }
    }

    /// Topic a client publishes commands to, per-client so a node only
    /// receives requests addressed to it.
    pub fn command_topic(&self, client_id: &str) -> Result<String, CoreError> {
        let client_id = validate_segment(client_id, "client id")?;
        Ok(self.join(&[&client_id, "cmd"]))
    }

    /// Topic a client's responses are published on.
    pub fn response_topic(&self, client_id: &str) -> Result<String, CoreError> {
        let client_id = validate_segment(client_id, "client id")?;
        Ok(self.join(&[&client_id, "res"]))
    }

    /// Shared fan-out topic every node publishes replication events to and
    /// subscribes to for inbound events from its peers.
    pub fn replication_topic(&self) -> String {
        self.join(&["replication", "events"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics_under_prefix() {
        let r = TopicRouter::new("merkle_kv").unwrap();
        assert_eq!(r.command_topic("node-a").unwrap(), "merkle_kv/node-a/cmd");
        assert_eq!(r.response_topic("node-a").unwrap(), "merkle_kv/node-a/res");
        assert_eq!(r.replication_topic(), "merkle_kv/replication/events");
    }

    #[test]
    fn empty_prefix_omits_leading_segment() {
        let r = TopicRouter::new("").unwrap();
        assert_eq!(r.command_topic("node-a").unwrap(), "node-a/cmd");
        assert_eq!(r.replication_topic(), "replication/events");
    }

    #[test]
    fn wildcard_characters_rejected_in_client_id() {
        let r = TopicRouter::new("p").unwrap();
        assert!(r.command_topic("node+a").is_err());
        assert!(r.command_topic("node#").is_err());
    }

    #[test]
    fn empty_client_id_rejected() {
        let r = TopicRouter::new("p").unwrap();
        assert!(r.command_topic("").is_err());
    }

    #[test]
    fn leading_or_trailing_slash_rejected() {
        assert!(TopicRouter::new("/p").is_err());
        assert!(TopicRouter::new("p/").is_err());
    }

    #[test]
    fn repeated_slash_is_normalized_not_rejected() {
        let r = TopicRouter::new("a//b").unwrap();
        assert_eq!(r.replication_topic(), "a/b/replication/events");
    }

    #[test]
    fn repeated_slash_in_client_id_is_normalized() {
        let r = TopicRouter::new("p").unwrap();
        assert_eq!(r.command_topic("node//a").unwrap(), "p/node/a/cmd");
    }
}
