//! Envelope parser for inbound MaimCore frames.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown
//! segment kinds kept for placeholder rendering.

use serde_json::Value;

use super::types::{Envelope, Group, Segment, Sender};
use crate::error::{Error, Result};

/// Content types accepted as the root of `message_segment`. Other kinds are
/// only kept when nested inside a `seglist`.
const CONTENT_TYPES: [&str; 2] = ["seglist", "text"];

/// Decode one raw frame into an envelope.
pub fn decode(raw: &[u8]) -> Result<Envelope> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| Error::MalformedEnvelope(format!("not valid JSON: {e}")))?;
    decode_value(&value)
}

/// Decode an already parsed JSON value into an envelope.
pub fn decode_value(raw: &Value) -> Result<Envelope> {
    if !raw.is_object() {
        return Err(malformed("frame is not a JSON object"));
    }
    let info = raw
        .get("message_info")
        .filter(|v| v.is_object())
        .ok_or_else(|| malformed("missing 'message_info'"))?;
    let segment = raw
        .get("message_segment")
        .filter(|v| v.is_object())
        .ok_or_else(|| malformed("missing 'message_segment'"))?;
    if let Some(kind) = segment.get("type").and_then(Value::as_str)
        && !CONTENT_TYPES.contains(&kind)
    {
        return Err(Error::MalformedEnvelope(format!(
            "unrecognised content type '{kind}'"
        )));
    }

    let mut segments = Vec::new();
    parse_segment(segment, &mut segments)?;

    Ok(Envelope {
        message_id: id_field(info, "message_id").unwrap_or_default(),
        timestamp: info.get("time").and_then(Value::as_f64).unwrap_or(0.0),
        platform: info
            .get("platform")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        sender: info.get("user_info").and_then(parse_sender),
        group: info.get("group_info").and_then(parse_group),
        segments,
    })
}

fn parse_segment(segment: &Value, out: &mut Vec<Segment>) -> Result<()> {
    let kind = segment
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("segment without a string 'type'"))?;
    let data = segment.get("data").unwrap_or(&Value::Null);

    match kind {
        "seglist" => {
            let items = data
                .as_array()
                .ok_or_else(|| malformed("'seglist' data is not an array"))?;
            for item in items {
                parse_segment(item, out)?;
            }
        }
        "text" => {
            let text = data
                .as_str()
                .ok_or_else(|| malformed("'text' segment data is not a string"))?;
            out.push(Segment::Text(text.to_string()));
        }
        other => out.push(Segment::Other {
            kind: other.to_string(),
            data: data.clone(),
        }),
    }
    Ok(())
}

fn parse_sender(user: &Value) -> Option<Sender> {
    let user_id = id_field(user, "user_id")?;
    let nickname = ["user_nickname", "user_cardname"]
        .iter()
        .find_map(|key| user.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or("")
        .to_string();
    Some(Sender { user_id, nickname })
}

fn parse_group(group: &Value) -> Option<Group> {
    Some(Group {
        group_id: id_field(group, "group_id")?,
        group_name: group
            .get("group_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?
            .to_string(),
    })
}

/// Ids arrive as strings from most adapters and as integers from some.
fn id_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn malformed(reason: &str) -> Error {
    Error::MalformedEnvelope(reason.to_string())
}
