use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::Message;
use crate::types::UserId;

/// Events the client pushes onto the real-time channel.
///
/// Encoded as `{"event": "<name>", "data": <payload>}` JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce the identity bound to this connection
    Join(UserId),

    /// Hand a composed message to the server for persistence and fan-out
    SendMessage(OutgoingMessage),

    Typing {
        sender_id: UserId,
        receiver_id: UserId,
    },

    StopTyping {
        sender_id: UserId,
        receiver_id: UserId,
    },

    /// Everything `sender_id` sent to us is now read
    MarkRead { sender_id: UserId },

    InitiateCall {
        receiver_id: UserId,
        caller_id: UserId,
        caller_name: String,
        #[serde(rename = "callType")]
        call_type: CallKind,
        offer: SessionDescription,
    },

    AcceptCall {
        caller_id: UserId,
        answer: SessionDescription,
    },

    RejectCall { caller_id: UserId },

    IceCandidate {
        receiver_id: UserId,
        candidate: IceCandidate,
    },

    EndCall { receiver_id: UserId },
}

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full snapshot of the tenant's online users
    UpdateOnlineUsers(Vec<UserId>),

    ReceiveMessage(Message),

    UserTyping { sender_id: UserId },

    UserStopTyping { sender_id: UserId },

    /// `reader_id` has read everything we sent them
    MessagesRead { reader_id: UserId },

    CallInitiated {
        caller_id: UserId,
        #[serde(default)]
        caller_name: String,
        #[serde(rename = "callType")]
        call_type: CallKind,
        offer: SessionDescription,
    },

    CallAccepted { answer: SessionDescription },

    CallRejected,

    IceCandidate {
        #[serde(default)]
        sender: Option<UserId>,
        candidate: IceCandidate,
    },

    CallEnded,
}

/// Payload of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub receiver_id: UserId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Call signaling payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
    Screen,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallKind::Voice => "voice",
            CallKind::Video => "video",
            CallKind::Screen => "screen",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CallKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" | "audio" => Ok(CallKind::Voice),
            "video" => Ok(CallKind::Video),
            "screen" => Ok(CallKind::Screen),
            other => Err(ProtocolError::Unexpected(format!("call type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP session description (offer or answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON codec
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(frame)?)
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        decode(frame)
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop_typing",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::InitiateCall { .. } => "initiate_call",
            ClientEvent::AcceptCall { .. } => "accept_call",
            ClientEvent::RejectCall { .. } => "reject_call",
            ClientEvent::IceCandidate { .. } => "ice_candidate",
            ClientEvent::EndCall { .. } => "end_call",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        decode(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UpdateOnlineUsers(_) => "update_online_users",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserStopTyping { .. } => "user_stop_typing",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::CallInitiated { .. } => "call_initiated",
            ServerEvent::CallAccepted { .. } => "call_accepted",
            ServerEvent::CallRejected => "call_rejected",
            ServerEvent::IceCandidate { .. } => "ice_candidate",
            ServerEvent::CallEnded => "call_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_without_attachment() {
        let event = ClientEvent::SendMessage(OutgoingMessage {
            receiver_id: UserId(42),
            message: "hi".into(),
            attachment_url: None,
            attachment_type: None,
            attachment_name: None,
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "send_message");
        assert_eq!(value["data"]["receiver_id"], 42);
        assert_eq!(value["data"]["message"], "hi");
        assert!(value["data"].get("attachment_url").is_none());
    }

    #[test]
    fn test_join_payload_is_bare_user_id() {
        let json = ClientEvent::Join(UserId(7)).to_json().unwrap();
        assert_eq!(json, r#"{"event":"join","data":7}"#);
    }

    #[test]
    fn test_initiate_call_uses_call_type_key() {
        let event = ClientEvent::InitiateCall {
            receiver_id: UserId(2),
            caller_id: UserId(1),
            caller_name: "Ada".into(),
            call_type: CallKind::Screen,
            offer: SessionDescription::offer("v=0"),
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["data"]["callType"], "screen");
        assert_eq!(value["data"]["offer"]["type"], "offer");
    }

    #[test]
    fn test_decode_unit_server_events() {
        assert_eq!(
            ServerEvent::from_json(r#"{"event":"call_rejected"}"#).unwrap(),
            ServerEvent::CallRejected
        );
        assert_eq!(
            ServerEvent::from_json(r#"{"event":"call_ended","data":null}"#).unwrap(),
            ServerEvent::CallEnded
        );
    }

    #[test]
    fn test_decode_online_users() {
        let event = ServerEvent::from_json(r#"{"event":"update_online_users","data":[1,2,3]}"#)
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::UpdateOnlineUsers(vec![UserId(1), UserId(2), UserId(3)])
        );
    }

    #[test]
    fn test_decode_ice_candidate_without_sender() {
        let frame = r#"{"event":"ice_candidate","data":{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}}"#;
        match ServerEvent::from_json(frame).unwrap() {
            ServerEvent::IceCandidate { sender, candidate } => {
                assert!(sender.is_none());
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        assert!(matches!(
            ServerEvent::from_json(r#"{"event":"nope","data":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_call_kind_parse() {
        assert_eq!("video".parse::<CallKind>().unwrap(), CallKind::Video);
        assert_eq!("audio".parse::<CallKind>().unwrap(), CallKind::Voice);
        assert!("fax".parse::<CallKind>().is_err());
    }
}
