//! Outbound encoding and console rendering of envelopes.

use serde::Serialize;
use serde_json::Value;

use super::types::{Envelope, GENERIC_SENDER_LABEL, Identity, Segment};
use crate::error::{Error, Result};

/// Prefix of every message id generated by this adapter.
pub const MESSAGE_ID_PREFIX: &str = "console_msg_";

/// Build an outbound envelope carrying `text` as its single segment.
pub fn encode(text: &str, identity: &Identity) -> Result<Envelope> {
    if text.is_empty() {
        return Err(Error::Encoding("message text is empty".into()));
    }
    Ok(Envelope {
        message_id: format!("{MESSAGE_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()),
        timestamp: now_secs(),
        platform: identity.platform.clone(),
        sender: Some(identity.sender.clone()),
        group: identity.group.clone(),
        segments: vec![Segment::Text(text.to_string())],
    })
}

/// Serialize an envelope to its wire representation.
pub fn to_wire(envelope: &Envelope) -> Result<String> {
    if envelope.segments.is_empty() {
        return Err(Error::Encoding("envelope has no segments".into()));
    }
    let platform = envelope.platform.as_str();
    let wire = WireMessage {
        message_info: WireInfo {
            platform,
            message_id: &envelope.message_id,
            time: envelope.timestamp,
            user_info: envelope.sender.as_ref().map(|s| WireUser {
                platform,
                user_id: &s.user_id,
                user_nickname: &s.nickname,
            }),
            group_info: envelope.group.as_ref().map(|g| WireGroup {
                platform,
                group_id: &g.group_id,
                group_name: &g.group_name,
            }),
        },
        message_segment: WireSegment {
            kind: "seglist",
            data: Value::Array(envelope.segments.iter().map(segment_value).collect()),
        },
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Human-readable text of an envelope for the console.
///
/// Adjacent text segments are joined as-is; a placeholder is always
/// separated from its neighbours by one space.
pub fn render_for_display(envelope: &Envelope) -> String {
    if envelope.segments.is_empty() {
        return "[empty message]".to_string();
    }
    let mut out = String::new();
    let mut previous_text = None;
    for segment in &envelope.segments {
        let is_text = matches!(segment, Segment::Text(_));
        if previous_text.is_some_and(|prev| !(prev && is_text)) {
            out.push(' ');
        }
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Other { kind, .. } => {
                out.push_str("[unsupported content: ");
                out.push_str(kind);
                out.push(']');
            }
        }
        previous_text = Some(is_text);
    }
    out
}

/// Who to show as the author of an inbound envelope.
pub fn display_label(envelope: &Envelope) -> &str {
    match &envelope.sender {
        Some(s) if !s.nickname.is_empty() => &s.nickname,
        Some(s) => &s.user_id,
        None => GENERIC_SENDER_LABEL,
    }
}

fn segment_value(segment: &Segment) -> Value {
    match segment {
        Segment::Text(text) => serde_json::json!({"type": "text", "data": text}),
        Segment::Other { kind, data } => serde_json::json!({"type": kind, "data": data}),
    }
}

#[allow(clippy::cast_precision_loss)]
fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Serialize)]
struct WireMessage<'a> {
    message_info: WireInfo<'a>,
    message_segment: WireSegment,
}

#[derive(Serialize)]
struct WireInfo<'a> {
    platform: &'a str,
    message_id: &'a str,
    time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_info: Option<WireUser<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_info: Option<WireGroup<'a>>,
}

#[derive(Serialize)]
struct WireUser<'a> {
    platform: &'a str,
    user_id: &'a str,
    user_nickname: &'a str,
}

#[derive(Serialize)]
struct WireGroup<'a> {
    platform: &'a str,
    group_id: &'a str,
    group_name: &'a str,
}

#[derive(Serialize)]
struct WireSegment {
    #[serde(rename = "type")]
    kind: &'static str,
    data: Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::envelope::parser::decode;
    use crate::envelope::types::{Group, Sender};

    fn identity(group: Option<Group>) -> Identity {
        Identity {
            platform: "console_adapter".into(),
            sender: Sender {
                user_id: "console_user".into(),
                nickname: "ConsoleUser".into(),
            },
            group,
        }
    }

    fn group() -> Group {
        Group {
            group_id: "1".into(),
            group_name: "ConsoleGroup".into(),
        }
    }

    #[test]
    fn encode_builds_single_text_segment() {
        let env = encode("hello", &identity(None)).unwrap();
        assert!(env.message_id.starts_with(MESSAGE_ID_PREFIX));
        assert_eq!(env.platform, "console_adapter");
        assert_eq!(env.sender.as_ref().unwrap().nickname, "ConsoleUser");
        assert_eq!(env.segments, vec![Segment::Text("hello".into())]);
        assert!(env.timestamp > 1_600_000_000.0);
    }

    #[test]
    fn encode_rejects_empty_text() {
        let err = encode("", &identity(None)).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn message_ids_are_unique() {
        let id = identity(None);
        let ids: HashSet<String> = (0..200)
            .map(|_| encode("x", &id).unwrap().message_id)
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn private_chat_omits_group_info() {
        let env = encode("hi", &identity(None)).unwrap();
        let wire: Value = serde_json::from_str(&to_wire(&env).unwrap()).unwrap();
        assert!(wire["message_info"].get("group_info").is_none());
        assert_eq!(wire["message_info"]["user_info"]["user_id"], "console_user");
        assert_eq!(wire["message_info"]["user_info"]["user_nickname"], "ConsoleUser");
    }

    #[test]
    fn group_chat_carries_group_info() {
        let env = encode("hi", &identity(Some(group()))).unwrap();
        let wire: Value = serde_json::from_str(&to_wire(&env).unwrap()).unwrap();
        let group = &wire["message_info"]["group_info"];
        assert_eq!(group["group_id"], "1");
        assert_eq!(group["group_name"], "ConsoleGroup");
        assert_eq!(group["platform"], "console_adapter");
    }

    #[test]
    fn wire_wraps_text_in_seglist() {
        let env = encode("hi", &identity(None)).unwrap();
        let wire: Value = serde_json::from_str(&to_wire(&env).unwrap()).unwrap();
        assert_eq!(wire["message_segment"]["type"], "seglist");
        assert_eq!(wire["message_segment"]["data"][0]["type"], "text");
        assert_eq!(wire["message_segment"]["data"][0]["data"], "hi");
    }

    #[test]
    fn to_wire_rejects_empty_segments() {
        let mut env = encode("hi", &identity(None)).unwrap();
        env.segments.clear();
        assert!(matches!(to_wire(&env), Err(Error::Encoding(_))));
    }

    #[test]
    fn wire_text_survives_decode() {
        for text in ["hello", "  padded  ", "多字节 文本 ✓", "line \"quoted\" \\ slash", "EXIT now"] {
            let env = encode(text, &identity(Some(group()))).unwrap();
            let decoded = decode(to_wire(&env).unwrap().as_bytes()).unwrap();
            assert_eq!(render_for_display(&decoded), text);
            assert_eq!(decoded.message_id, env.message_id);
            assert_eq!(decoded.group, env.group);
            assert_eq!(decoded.sender, env.sender);
        }
    }

    #[test]
    fn render_uses_placeholder_for_other_kinds() {
        let env = Envelope {
            message_id: String::new(),
            timestamp: 0.0,
            platform: String::new(),
            sender: None,
            group: None,
            segments: vec![
                Segment::Text("look:".into()),
                Segment::Other {
                    kind: "image".into(),
                    data: Value::String("abc".into()),
                },
                Segment::Other {
                    kind: "emoji".into(),
                    data: Value::Null,
                },
            ],
        };
        assert_eq!(
            render_for_display(&env),
            "look: [unsupported content: image] [unsupported content: emoji]"
        );
    }

    #[test]
    fn render_spaces_every_placeholder_boundary() {
        let env = Envelope {
            message_id: String::new(),
            timestamp: 0.0,
            platform: String::new(),
            sender: None,
            group: None,
            segments: vec![
                Segment::Other {
                    kind: "face".into(),
                    data: Value::Null,
                },
                Segment::Text("hel".into()),
                Segment::Text("lo".into()),
                Segment::Other {
                    kind: "image".into(),
                    data: Value::Null,
                },
                Segment::Text("bye".into()),
            ],
        };
        assert_eq!(
            render_for_display(&env),
            "[unsupported content: face] hello [unsupported content: image] bye"
        );
    }

    #[test]
    fn render_empty_segments() {
        let mut env = encode("x", &identity(None)).unwrap();
        env.segments.clear();
        assert_eq!(render_for_display(&env), "[empty message]");
    }

    #[test]
    fn label_prefers_nickname_then_id() {
        let mut env = encode("x", &identity(None)).unwrap();
        assert_eq!(display_label(&env), "ConsoleUser");
        env.sender = Some(Sender {
            user_id: "42".into(),
            nickname: String::new(),
        });
        assert_eq!(display_label(&env), "42");
        env.sender = None;
        assert_eq!(display_label(&env), GENERIC_SENDER_LABEL);
    }
}
