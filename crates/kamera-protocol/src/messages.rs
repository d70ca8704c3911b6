use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::IceTarget;

/// Messages sent from client to relay via WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Claim the broadcaster role. Supersedes any previous broadcaster.
    RegisterBroadcaster,

    /// Viewer asks the current broadcaster for an offer
    RequestOffer,

    /// Broadcaster offer addressed to one viewer
    Offer { viewer_id: Uuid, sdp: String },

    /// Viewer answer, always routed to the current broadcaster
    Answer { sdp: String },

    /// ICE candidate for the peer named by `target`
    IceCandidate { candidate: String, target: IceTarget },

    /// Viewer asks the broadcaster to cycle to the next camera
    DeviceSwitchRequest,

    /// Viewer asks the broadcaster to change capture mode.
    /// `None` toggles the current mode.
    ModeSwitchRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low_light: Option<bool>,
    },

    /// Keepalive
    Ping,
}

/// Messages sent from relay to client via WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First message on every connection
    Welcome { connection_id: Uuid },

    /// Acknowledges `register-broadcaster` to the registrant
    BroadcasterRegistered,

    /// Reply to `request-offer` when nobody is broadcasting
    NoBroadcaster,

    /// A viewer wants an offer (broadcaster only)
    PeerJoined { viewer_id: Uuid },

    /// Offer relayed from the broadcaster
    Offer { sdp: String },

    /// Answer relayed from a viewer (broadcaster only)
    Answer { viewer_id: Uuid, sdp: String },

    /// ICE candidate relayed from `from`
    IceCandidate { candidate: String, from: Uuid },

    /// Camera switch requested by some viewer (broadcaster only)
    DeviceSwitchRequest,

    /// Capture mode change requested by some viewer (broadcaster only)
    ModeSwitchRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low_light: Option<bool>,
    },

    /// A viewer connection went away (broadcaster only)
    PeerLeft { viewer_id: Uuid },

    /// A broadcaster registered
    BroadcasterAvailable,

    /// The broadcaster connection went away
    BroadcasterLeft,

    /// Pong response to ping
    Pong,

    /// Error message
    Error { message: String },
}
