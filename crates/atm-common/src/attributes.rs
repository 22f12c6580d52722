//! Call attribute sets.
//!
//! An [`AttributeSet`] is the bag of parameters negotiated for a call. Each
//! optional information element is wrapped in [`Attr`], which distinguishes
//! "not supplied" from "supplied" and from the listener wildcard "any value".

use crate::cause::Cause;
use crate::types::InterfaceId;
use serde::{Deserialize, Serialize};

/// Shortest LLC header accepted on a multiplexed circuit.
pub const LLC_MIN_LEN: usize = 1;

/// Longest LLC header accepted on a multiplexed circuit.
pub const LLC_MAX_LEN: usize = 8;

/// Presence tag for an information element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attr<T> {
    /// Element not supplied.
    Absent,
    /// Element supplied with a value.
    Present(T),
    /// Any value is acceptable (listeners only).
    Any,
}

impl<T> Default for Attr<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> Attr<T> {
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// The supplied value, if the element is present.
    #[must_use]
    pub const fn present(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent | Self::Any => None,
        }
    }
}

/// Data-plane API family bound to a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiFamily {
    /// Raw frames, optionally LLC multiplexed.
    Bulk,
    /// Connection-oriented session primitives plus data.
    Session,
    /// Sequenced segments with retrieve semantics.
    Segmented,
}

impl ApiFamily {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::Bulk => "bulk",
            ApiFamily::Session => "session",
            ApiFamily::Segmented => "segmented",
        }
    }
}

/// How frames of one connection are distinguished on a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encapsulation {
    /// The circuit carries a single connection.
    Null,
    /// Frames carry an LLC header identifying the connection.
    Llc,
}

/// LLC encapsulation header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Llc {
    pub header: Vec<u8>,
    /// Whether other connections may be multiplexed onto the same circuit.
    pub shareable: bool,
}

impl Llc {
    #[must_use]
    pub fn new(header: impl Into<Vec<u8>>, shareable: bool) -> Self {
        Self {
            header: header.into(),
            shareable,
        }
    }

    /// Header length is within `LLC_MIN_LEN..=LLC_MAX_LEN`.
    #[must_use]
    pub fn has_valid_length(&self) -> bool {
        (LLC_MIN_LEN..=LLC_MAX_LEN).contains(&self.header.len())
    }

    /// Two headers collide when they agree over the shorter length.
    #[must_use]
    pub fn collides_with(&self, other: &Llc) -> bool {
        self.header
            .iter()
            .zip(other.header.iter())
            .all(|(a, b)| a == b)
    }

    /// The frame starts with this header.
    #[must_use]
    pub fn prefixes(&self, frame: &[u8]) -> bool {
        frame.starts_with(&self.header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AalType {
    Aal34,
    Aal5,
}

/// Service-specific convergence sublayer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SscsType {
    Null,
    Assured,
    NonAssured,
    Frame,
}

/// ATM adaptation layer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aal {
    pub kind: AalType,
    pub sscs: SscsType,
    pub forward_max_sdu: u32,
    pub backward_max_sdu: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficDescriptor {
    pub forward_peak_cell_rate: u32,
    pub backward_peak_cell_rate: u32,
    pub best_effort: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BearerClass {
    A,
    C,
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionConfiguration {
    PointToPoint,
    PointToMultipoint,
}

/// Broadband bearer capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bearer {
    pub class: BearerClass,
    pub configuration: ConnectionConfiguration,
    pub clipping: bool,
}

/// Broadband high-layer information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighLayerId(pub Vec<u8>);

/// Broadband low-layer information (layer 2 or layer 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowLayerId(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtmAddress(pub Vec<u8>);

impl AtmAddress {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Party number with optional sub-address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAddress {
    pub address: AtmAddress,
    pub subaddress: Option<AtmAddress>,
}

impl PartyAddress {
    #[must_use]
    pub fn new(address: impl Into<Vec<u8>>) -> Self {
        Self {
            address: AtmAddress(address.into()),
            subaddress: None,
        }
    }

    #[must_use]
    pub fn with_subaddress(mut self, subaddress: impl Into<Vec<u8>>) -> Self {
        self.subaddress = Some(AtmAddress(subaddress.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosClass {
    Unspecified,
    Class1,
    Class2,
    Class3,
    Class4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub forward: QosClass,
    pub backward: QosClass,
}

/// Negotiated parameters of a call.
///
/// Listeners keep a private copy of the set they registered; circuits keep
/// the set agreed with the signaling manager. Once a connection is active its
/// set is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    /// Network interface; `None` on a listener means any interface.
    pub nif: Option<InterfaceId>,
    pub api: Option<ApiFamily>,
    /// Opaque parameter handed to the protocol adapter on init.
    pub api_init: u32,
    pub bhli: Attr<HighLayerId>,
    pub blli_l2: Attr<LowLayerId>,
    pub blli_l3: Attr<LowLayerId>,
    pub llc: Attr<Llc>,
    pub aal: Attr<Aal>,
    pub traffic: Attr<TrafficDescriptor>,
    pub bearer: Attr<Bearer>,
    pub called: Attr<PartyAddress>,
    pub calling: Attr<PartyAddress>,
    pub qos: Attr<Qos>,
    pub cause: Attr<Cause>,
}

impl AttributeSet {
    /// Encapsulation implied by the LLC element.
    #[must_use]
    pub fn encapsulation(&self) -> Encapsulation {
        if self.llc.is_present() {
            Encapsulation::Llc
        } else {
            Encapsulation::Null
        }
    }

    /// The LLC element is present with the shareable flag set.
    #[must_use]
    pub fn is_shareable(&self) -> bool {
        self.llc.present().is_some_and(|llc| llc.shareable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_defaults_to_absent() {
        let attr: Attr<Llc> = Attr::default();
        assert!(attr.is_absent());
        assert!(attr.present().is_none());
    }

    #[test]
    fn test_llc_collision_uses_shorter_length() {
        let short = Llc::new([0xAA, 0xAA], true);
        let long = Llc::new([0xAA, 0xAA, 0x03, 0x00], true);
        let other = Llc::new([0xAA, 0xAB, 0x03], true);

        assert!(short.collides_with(&long));
        assert!(long.collides_with(&short));
        assert!(!short.collides_with(&other));
    }

    #[test]
    fn test_llc_prefixes_frame() {
        let llc = Llc::new([0x01, 0x02], true);
        assert!(llc.prefixes(&[0x01, 0x02, 0xFF]));
        assert!(!llc.prefixes(&[0x01]));
        assert!(!llc.prefixes(&[0x02, 0x01, 0xFF]));
    }

    #[test]
    fn test_llc_length_bounds() {
        assert!(!Llc::new(Vec::new(), true).has_valid_length());
        assert!(Llc::new([0u8; LLC_MIN_LEN], true).has_valid_length());
        assert!(Llc::new([0u8; LLC_MAX_LEN], true).has_valid_length());
        assert!(!Llc::new([0u8; LLC_MAX_LEN + 1], true).has_valid_length());
    }

    #[test]
    fn test_encapsulation_and_shareable() {
        let mut attrs = AttributeSet::default();
        assert_eq!(attrs.encapsulation(), Encapsulation::Null);
        assert!(!attrs.is_shareable());

        attrs.llc = Attr::Present(Llc::new([0x10], false));
        assert_eq!(attrs.encapsulation(), Encapsulation::Llc);
        assert!(!attrs.is_shareable());

        attrs.llc = Attr::Present(Llc::new([0x10], true));
        assert!(attrs.is_shareable());
    }

    #[test]
    fn test_attribute_set_serializes() {
        let attrs = AttributeSet {
            nif: Some(InterfaceId(1)),
            api: Some(ApiFamily::Bulk),
            llc: Attr::Present(Llc::new([0xAA], true)),
            bhli: Attr::Any,
            ..AttributeSet::default()
        };

        let json = serde_json::to_string(&attrs).unwrap();
        let decoded: AttributeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, attrs);
    }
}
