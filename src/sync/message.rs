//! sync/message.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::ClientId;

/* ------------ 指令集 ------------ */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Play,
    Pause,
    Seek,
    Sync,
    Error,
    ChangeVideo,
    /// anything the server does not know; never forwarded
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Commands a viewer may send to the rest of the room.
    /// `error` is server-originated only.
    pub fn is_relayable(self) -> bool {
        matches!(
            self,
            Command::Play | Command::Pause | Command::Seek | Command::Sync | Command::ChangeVideo
        )
    }
}

/// One control event as it travels through a room.
///
/// `origin` stays inside the process: the room uses it to skip the sender
/// during broadcast and it is never part of the JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: Command,
    #[serde(skip)]
    pub origin: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Server-side message with no sender; reaches every member.
    pub fn new(kind: Command, time: Option<f64>) -> Self {
        Self { kind, origin: None, time, timestamp: Utc::now() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/* ------------ 收到的原始 frame ------------ */
// a peer-supplied timestamp is ignored; the server stamps on receipt
#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: Command,
    #[serde(default)]
    time: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameErr {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unrecognized command")]
    Unrecognized,
    #[error("command {0:?} cannot be relayed")]
    NotRelayable(Command),
}

/// Parse one text frame from `origin`, stamping it with the receive time.
pub fn parse_frame(raw: &str, origin: ClientId) -> Result<Message, FrameErr> {
    let Inbound { kind, time } = serde_json::from_str(raw)?;
    match kind {
        Command::Unknown => Err(FrameErr::Unrecognized),
        k if !k.is_relayable() => Err(FrameErr::NotRelayable(k)),
        k => Ok(Message { kind: k, origin: Some(origin), time, timestamp: Utc::now() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn seek_frame_is_stamped_by_server() {
        let id = ClientId::new();
        let before = Utc::now();
        let raw = r#"{"type":"seek","time":42.5,"timestamp":"1999-01-01T00:00:00Z"}"#;
        let msg = parse_frame(raw, id).unwrap();

        assert_eq!(msg.kind, Command::Seek);
        assert_eq!(msg.time, Some(42.5));
        assert_eq!(msg.origin, Some(id));
        assert!(msg.timestamp >= before);
    }

    #[test]
    fn origin_never_reaches_the_wire() {
        let msg = parse_frame(r#"{"type":"pause"}"#, ClientId::new()).unwrap();
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let obj = v.as_object().unwrap();

        assert_eq!(obj.len(), 2);
        assert_eq!(obj["type"], "pause");
        assert!(obj.contains_key("timestamp"));
        assert!(!obj.contains_key("time"));
        assert!(!obj.contains_key("origin"));
    }

    #[test]
    fn change_video_uses_kebab_case() {
        let msg = parse_frame(r#"{"type":"change-video"}"#, ClientId::new()).unwrap();
        assert_eq!(msg.kind, Command::ChangeVideo);
        assert!(msg.to_json().unwrap().contains(r#""type":"change-video""#));
    }

    #[test]
    fn bad_frames_are_classified() {
        let id = ClientId::new();
        assert!(matches!(parse_frame(r#"{"type":"rewind"}"#, id), Err(FrameErr::Unrecognized)));
        assert!(matches!(
            parse_frame(r#"{"type":"error"}"#, id),
            Err(FrameErr::NotRelayable(Command::Error))
        ));
        assert!(matches!(parse_frame("not json", id), Err(FrameErr::Malformed(_))));
        assert!(matches!(parse_frame(r#"{"time":1}"#, id), Err(FrameErr::Malformed(_))));
    }
}
