use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid ICE target: {0}")]
    InvalidTarget(String),
}

/// Addressee of an ICE candidate.
///
/// Viewers never learn the broadcaster's connection id, so they address it
/// through the `"broadcaster"` alias which the relay resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IceTarget {
    Broadcaster,
    Peer(Uuid),
}

impl fmt::Display for IceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceTarget::Broadcaster => f.write_str("broadcaster"),
            IceTarget::Peer(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for IceTarget {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "broadcaster" {
            return Ok(IceTarget::Broadcaster);
        }
        Uuid::parse_str(s)
            .map(IceTarget::Peer)
            .map_err(|_| ProtocolError::InvalidTarget(s.to_string()))
    }
}

impl TryFrom<String> for IceTarget {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IceTarget> for String {
    fn from(target: IceTarget) -> Self {
        target.to_string()
    }
}

/// Connectivity signal reported by the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl Connectivity {
    /// Signals after which the transport cannot recover on its own
    pub fn is_fatal(self) -> bool {
        matches!(self, Connectivity::Failed | Connectivity::Closed)
    }
}

/// Lifecycle of one peer session, as seen from either side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerState {
    #[default]
    Idle,
    AwaitingRemote,
    Negotiating,
    Live,
    Degraded,
    Closed,
}

impl PeerState {
    /// Apply a transport connectivity signal.
    ///
    /// `Closed` absorbs everything; signals that make no sense for the
    /// current state leave it unchanged.
    pub fn on_connectivity(self, signal: Connectivity) -> PeerState {
        use PeerState::*;

        if self == Closed {
            return Closed;
        }

        match signal {
            Connectivity::Connected | Connectivity::Completed => match self {
                Negotiating | Live | Degraded => Live,
                other => other,
            },
            Connectivity::Disconnected => match self {
                Live => Degraded,
                other => other,
            },
            Connectivity::Failed | Connectivity::Closed => Closed,
            Connectivity::New | Connectivity::Checking => self,
        }
    }

    pub fn is_live(self) -> bool {
        self == PeerState::Live
    }

    pub fn is_closed(self) -> bool {
        self == PeerState::Closed
    }
}

/// Coarse position of a capture device on the handset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FacingClass {
    Front,
    BackMain,
    BackAuxiliary,
    Unknown,
}

impl FacingClass {
    /// Classify a device from its human label alone
    pub fn from_label(label: &str) -> FacingClass {
        let label = label.to_lowercase();
        if label.trim().is_empty() {
            return FacingClass::Unknown;
        }
        if is_front_label(&label) {
            FacingClass::Front
        } else if is_main_label(&label) {
            FacingClass::BackMain
        } else {
            FacingClass::BackAuxiliary
        }
    }
}

fn is_front_label(label: &str) -> bool {
    ["front", "user", "frontal"]
        .iter()
        .any(|marker| label.contains(marker))
}

fn is_main_label(label: &str) -> bool {
    let marked = label.contains("main") || label.contains("primary");
    marked || (!label.contains("wide") && !label.contains("ultra"))
}

/// A capture device as returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSourceDescriptor {
    pub id: String,
    pub human_label: String,
    pub facing_class: FacingClass,
}

impl MediaSourceDescriptor {
    pub fn new(id: impl Into<String>, human_label: impl Into<String>) -> Self {
        let human_label = human_label.into();
        Self {
            id: id.into(),
            facing_class: FacingClass::from_label(&human_label),
            human_label,
        }
    }
}

/// Capture quality trade-off requested by viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    #[default]
    Standard,
    /// Lower resolution and frame rate in exchange for longer exposure
    LowLight,
}

impl CaptureMode {
    /// Resolve a `mode-switch-request` flag against the current mode.
    /// A missing flag toggles.
    pub fn resolve(self, low_light: Option<bool>) -> CaptureMode {
        match low_light {
            Some(true) => CaptureMode::LowLight,
            Some(false) => CaptureMode::Standard,
            None => match self {
                CaptureMode::Standard => CaptureMode::LowLight,
                CaptureMode::LowLight => CaptureMode::Standard,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_target_parses_alias_and_ids() {
        assert_eq!("broadcaster".parse::<IceTarget>(), Ok(IceTarget::Broadcaster));

        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<IceTarget>(), Ok(IceTarget::Peer(id)));

        assert!(matches!(
            "not-a-peer".parse::<IceTarget>(),
            Err(ProtocolError::InvalidTarget(_))
        ));
    }

    #[test]
    fn live_degrades_and_recovers() {
        let state = PeerState::Negotiating.on_connectivity(Connectivity::Checking);
        assert_eq!(state, PeerState::Negotiating);

        let state = state.on_connectivity(Connectivity::Connected);
        assert_eq!(state, PeerState::Live);

        let state = state.on_connectivity(Connectivity::Disconnected);
        assert_eq!(state, PeerState::Degraded);

        let state = state.on_connectivity(Connectivity::Completed);
        assert_eq!(state, PeerState::Live);
    }

    #[test]
    fn fatal_signals_close_from_any_state() {
        for state in [
            PeerState::Idle,
            PeerState::AwaitingRemote,
            PeerState::Negotiating,
            PeerState::Live,
            PeerState::Degraded,
        ] {
            assert_eq!(state.on_connectivity(Connectivity::Failed), PeerState::Closed);
        }
    }

    #[test]
    fn closed_is_terminal() {
        assert_eq!(
            PeerState::Closed.on_connectivity(Connectivity::Connected),
            PeerState::Closed
        );
    }

    #[test]
    fn connected_before_negotiation_is_ignored() {
        assert_eq!(
            PeerState::AwaitingRemote.on_connectivity(Connectivity::Connected),
            PeerState::AwaitingRemote
        );
    }

    #[test]
    fn facing_class_from_label() {
        assert_eq!(FacingClass::from_label("Front Camera"), FacingClass::Front);
        assert_eq!(FacingClass::from_label("User Facing"), FacingClass::Front);
        assert_eq!(FacingClass::from_label("Back Main"), FacingClass::BackMain);
        assert_eq!(FacingClass::from_label("Back Camera"), FacingClass::BackMain);
        assert_eq!(FacingClass::from_label("Back Wide"), FacingClass::BackAuxiliary);
        assert_eq!(
            FacingClass::from_label("Back Ultra Wide Camera"),
            FacingClass::BackAuxiliary
        );
        assert_eq!(
            FacingClass::from_label("Primary Wide Angle"),
            FacingClass::BackMain
        );
        assert_eq!(FacingClass::from_label(""), FacingClass::Unknown);
    }

    #[test]
    fn capture_mode_toggle() {
        assert_eq!(CaptureMode::Standard.resolve(None), CaptureMode::LowLight);
        assert_eq!(CaptureMode::LowLight.resolve(None), CaptureMode::Standard);
        assert_eq!(CaptureMode::LowLight.resolve(Some(true)), CaptureMode::LowLight);
        assert_eq!(CaptureMode::LowLight.resolve(Some(false)), CaptureMode::Standard);
    }
}
