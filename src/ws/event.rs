use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{
    ChatMessage, ConnectionRequest, MatchConnection, MatchRequest, Notification, VoiceParticipant,
    VoiceParticipantWithUser,
};

/// Everything the server pushes over `/ws`, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    AuthSuccess { user_id: Uuid, message: String },
    AuthFailed { message: String },
    Welcome { message: String },
    Pong,
    Error { message: String },
    WebrtcError { message: String },

    UserOnline { user_id: Uuid },
    UserOffline { user_id: Uuid },

    MatchRequestCreated { data: MatchRequest, message: String },
    MatchRequestUpdated { data: MatchRequest, message: String },
    MatchRequestDeleted { data: Deleted, message: String },

    MatchConnectionCreated { data: MatchConnection, message: String },
    MatchConnectionUpdated { data: MatchConnection, message: String },
    MatchConnectionDeleted { data: Deleted, message: String },

    ConnectionRequestCreated { data: ConnectionRequest, message: String },
    ConnectionRequestUpdated { data: ConnectionRequest, message: String },
    ConnectionRequestDeleted { data: Deleted, message: String },

    NewMessage { data: ChatMessage, message: String },
    NewNotification { data: Notification, message: String },

    VoiceParticipantJoined { data: VoiceJoined, message: String },
    VoiceParticipantLeft { data: VoiceLeft, message: String },
    VoiceParticipantMuted { data: VoiceMuted, message: String },

    VoiceChannelReady { data: Signal },
    VoiceChannelLeft { data: Signal },
    WebrtcOffer { data: Signal },
    WebrtcAnswer { data: Signal },
    WebrtcIceCandidate { data: Signal },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        use Event::*;
        match self {
            AuthSuccess { .. } => "auth_success",
            AuthFailed { .. } => "auth_failed",
            Welcome { .. } => "welcome",
            Pong => "pong",
            Error { .. } => "error",
            WebrtcError { .. } => "webrtc_error",
            UserOnline { .. } => "user_online",
            UserOffline { .. } => "user_offline",
            MatchRequestCreated { .. } => "match_request_created",
            MatchRequestUpdated { .. } => "match_request_updated",
            MatchRequestDeleted { .. } => "match_request_deleted",
            MatchConnectionCreated { .. } => "match_connection_created",
            MatchConnectionUpdated { .. } => "match_connection_updated",
            MatchConnectionDeleted { .. } => "match_connection_deleted",
            ConnectionRequestCreated { .. } => "connection_request_created",
            ConnectionRequestUpdated { .. } => "connection_request_updated",
            ConnectionRequestDeleted { .. } => "connection_request_deleted",
            NewMessage { .. } => "new_message",
            NewNotification { .. } => "new_notification",
            VoiceParticipantJoined { .. } => "voice_participant_joined",
            VoiceParticipantLeft { .. } => "voice_participant_left",
            VoiceParticipantMuted { .. } => "voice_participant_muted",
            VoiceChannelReady { .. } => "voice_channel_ready",
            VoiceChannelLeft { .. } => "voice_channel_left",
            WebrtcOffer { .. } => "webrtc_offer",
            WebrtcAnswer { .. } => "webrtc_answer",
            WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceJoined {
    pub connection_id: Uuid,
    pub participant: VoiceParticipant,
    pub participants: Vec<VoiceParticipantWithUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceLeft {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub participants: Vec<VoiceParticipantWithUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMuted {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub is_muted: bool,
    pub participants: Vec<VoiceParticipantWithUser>,
}

/// A forwarded signalling message as the target peer receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub connection_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
    pub from_user_id: Uuid,
    pub user_id: Uuid,
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    VoiceChannelReady(SignalRequest),
    VoiceChannelLeft(SignalRequest),
    WebrtcOffer(SignalRequest),
    WebrtcAnswer(SignalRequest),
    WebrtcIceCandidate(SignalRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub target_user_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    VoiceChannelReady,
    VoiceChannelLeft,
    WebrtcOffer,
    WebrtcAnswer,
    WebrtcIceCandidate,
}

impl SignalKind {
    pub fn wrap(self, data: Signal) -> Event {
        use SignalKind::*;
        match self {
            VoiceChannelReady => Event::VoiceChannelReady { data },
            VoiceChannelLeft => Event::VoiceChannelLeft { data },
            WebrtcOffer => Event::WebrtcOffer { data },
            WebrtcAnswer => Event::WebrtcAnswer { data },
            WebrtcIceCandidate => Event::WebrtcIceCandidate { data },
        }
    }
}

impl ClientMessage {
    pub fn into_signal(self) -> Option<(SignalKind, SignalRequest)> {
        use ClientMessage::*;
        match self {
            Ping => None,
            VoiceChannelReady(request) => Some((SignalKind::VoiceChannelReady, request)),
            VoiceChannelLeft(request) => Some((SignalKind::VoiceChannelLeft, request)),
            WebrtcOffer(request) => Some((SignalKind::WebrtcOffer, request)),
            WebrtcAnswer(request) => Some((SignalKind::WebrtcAnswer, request)),
            WebrtcIceCandidate(request) => Some((SignalKind::WebrtcIceCandidate, request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let user_id = Uuid::now_v7();
        let value = serde_json::to_value(Event::UserOnline { user_id }).unwrap();
        assert_eq!(value, json!({ "type": "user_online", "userId": user_id }));

        let value = serde_json::to_value(Event::Pong).unwrap();
        assert_eq!(value, json!({ "type": "pong" }));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let id = Uuid::now_v7();
        let events = [
            Event::Pong,
            Event::WebrtcError { message: "gone".to_owned() },
            Event::MatchRequestDeleted { data: Deleted { id }, message: String::new() },
            Event::WebrtcIceCandidate {
                data: Signal {
                    connection_id: id,
                    offer: None,
                    answer: None,
                    candidate: Some(json!({ "candidate": "c" })),
                    from_user_id: id,
                    user_id: id,
                },
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn signalling_frames_parse() {
        let target = Uuid::now_v7();
        let connection = Uuid::now_v7();
        let frame = json!({
            "type": "webrtc_offer",
            "targetUserId": target,
            "connectionId": connection,
            "offer": { "sdp": "v=0" },
        });

        let message: ClientMessage = serde_json::from_value(frame).unwrap();
        let (kind, request) = message.into_signal().unwrap();
        assert_eq!(kind, SignalKind::WebrtcOffer);
        assert_eq!(request.target_user_id, Some(target));
        assert_eq!(request.connection_id, Some(connection));

        let event = kind.wrap(Signal {
            connection_id: connection,
            offer: request.offer,
            answer: None,
            candidate: None,
            from_user_id: target,
            user_id: target,
        });
        assert_eq!(event.kind(), "webrtc_offer");
    }

    #[test]
    fn ping_is_not_a_signal() {
        let message: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(message, ClientMessage::Ping);
        assert!(message.into_signal().is_none());
    }
}
