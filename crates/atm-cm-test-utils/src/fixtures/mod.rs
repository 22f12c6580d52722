//! Pre-configured test data fixtures for connection manager testing.
//!
//! Provides:
//! - `CallAttrs` builder for outbound, listener and incoming attribute sets
//! - `test_config()` with small queues and a short tick
//! - Well-known interface, addresses and LLC headers

use atm_cm::config::Config;
use atm_common::{
    Aal, AalType, ApiFamily, Attr, AttributeSet, Bearer, BearerClass, ConnectionConfiguration,
    HighLayerId, InterfaceId, Llc, LowLayerId, PartyAddress, Qos, QosClass, SscsType,
    TrafficDescriptor,
};
use std::time::Duration;
use uuid::Uuid;

/// Interface used by fixtures.
pub const TEST_NIF: InterfaceId = InterfaceId(0);

/// Address of the remote party in outbound calls.
pub const REMOTE_ADDRESS: [u8; 4] = [0x47, 0x00, 0x05, 0x80];

/// Address of the local party in incoming calls.
pub const LOCAL_ADDRESS: [u8; 4] = [0x47, 0x00, 0x05, 0x01];

/// RFC 1483 routed IP header.
pub const LLC_IP: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00];

/// RFC 1483 routed ARP header.
pub const LLC_ARP: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x06];

/// Tick used by `test_config()`.
pub const TEST_TICK: Duration = Duration::from_millis(100);

/// Configuration with a random ID, a short tick and small queues.
#[must_use]
pub fn test_config() -> Config {
    Config {
        cm_id: format!("atmcm-test-{}", &Uuid::new_v4().simple().to_string()[..8]),
        callq_max: 4,
        rcvq_max: 3,
        tick: TEST_TICK,
        mailbox_size: 64,
        ..Config::default()
    }
}

/// Builder for attribute sets used in tests.
#[derive(Debug, Clone)]
pub struct CallAttrs {
    attrs: AttributeSet,
}

impl CallAttrs {
    /// Valid outbound connect on `TEST_NIF`: bulk api, AAL5, best-effort
    /// UBR, class X point-to-point bearer, called party `REMOTE_ADDRESS`.
    #[must_use]
    pub fn outbound() -> Self {
        Self {
            attrs: AttributeSet {
                nif: Some(TEST_NIF),
                api: Some(ApiFamily::Bulk),
                aal: Attr::Present(Aal {
                    kind: AalType::Aal5,
                    sscs: SscsType::Null,
                    forward_max_sdu: 9188,
                    backward_max_sdu: 9188,
                }),
                traffic: Attr::Present(TrafficDescriptor {
                    forward_peak_cell_rate: 0,
                    backward_peak_cell_rate: 0,
                    best_effort: true,
                }),
                bearer: Attr::Present(Bearer {
                    class: BearerClass::X,
                    configuration: ConnectionConfiguration::PointToPoint,
                    clipping: false,
                }),
                called: Attr::Present(PartyAddress::new(REMOTE_ADDRESS)),
                qos: Attr::Present(Qos {
                    forward: QosClass::Unspecified,
                    backward: QosClass::Unspecified,
                }),
                ..AttributeSet::default()
            },
        }
    }

    /// Incoming call as a signaling manager reports it: outbound layout with
    /// `LOCAL_ADDRESS` called and `REMOTE_ADDRESS` calling, no api family.
    #[must_use]
    pub fn incoming() -> Self {
        let mut call = Self::outbound();
        call.attrs.api = None;
        call.attrs.called = Attr::Present(PartyAddress::new(LOCAL_ADDRESS));
        call.attrs.calling = Attr::Present(PartyAddress::new(REMOTE_ADDRESS));
        call
    }

    /// Listener for the bulk api with every element absent (matches any call).
    #[must_use]
    pub fn listener() -> Self {
        Self {
            attrs: AttributeSet {
                api: Some(ApiFamily::Bulk),
                ..AttributeSet::default()
            },
        }
    }

    #[must_use]
    pub fn with_nif(mut self, nif: InterfaceId) -> Self {
        self.attrs.nif = Some(nif);
        self
    }

    #[must_use]
    pub fn with_api(mut self, api: ApiFamily) -> Self {
        self.attrs.api = Some(api);
        self
    }

    #[must_use]
    pub fn with_api_init(mut self, api_init: u32) -> Self {
        self.attrs.api_init = api_init;
        self
    }

    #[must_use]
    pub fn with_llc(mut self, header: &[u8], shareable: bool) -> Self {
        self.attrs.llc = Attr::Present(Llc::new(header, shareable));
        self
    }

    /// Listener wildcard: accept whatever LLC the call carries.
    #[must_use]
    pub fn with_any_llc(mut self) -> Self {
        self.attrs.llc = Attr::Any;
        self
    }

    #[must_use]
    pub fn with_bhli(mut self, bhli: &[u8]) -> Self {
        self.attrs.bhli = Attr::Present(HighLayerId(bhli.to_vec()));
        self
    }

    #[must_use]
    pub fn with_blli(mut self, l2: &[u8], l3: &[u8]) -> Self {
        self.attrs.blli_l2 = Attr::Present(LowLayerId(l2.to_vec()));
        self.attrs.blli_l3 = Attr::Present(LowLayerId(l3.to_vec()));
        self
    }

    #[must_use]
    pub fn with_called(mut self, address: &[u8]) -> Self {
        self.attrs.called = Attr::Present(PartyAddress::new(address));
        self
    }

    #[must_use]
    pub fn with_calling(mut self, address: &[u8]) -> Self {
        self.attrs.calling = Attr::Present(PartyAddress::new(address));
        self
    }

    #[must_use]
    pub fn with_sdu(mut self, forward: u32, backward: u32) -> Self {
        if let Attr::Present(aal) = &mut self.attrs.aal {
            aal.forward_max_sdu = forward;
            aal.backward_max_sdu = backward;
        }
        self
    }

    #[must_use]
    pub fn with_sscs(mut self, sscs: SscsType) -> Self {
        if let Attr::Present(aal) = &mut self.attrs.aal {
            aal.sscs = sscs;
        }
        self
    }

    #[must_use]
    pub fn with_qos(mut self, forward: QosClass, backward: QosClass) -> Self {
        self.attrs.qos = Attr::Present(Qos { forward, backward });
        self
    }

    /// Reserved-rate traffic (not shareable).
    #[must_use]
    pub fn with_peak_cell_rate(mut self, pcr: u32) -> Self {
        self.attrs.traffic = Attr::Present(TrafficDescriptor {
            forward_peak_cell_rate: pcr,
            backward_peak_cell_rate: pcr,
            best_effort: false,
        });
        self
    }

    #[must_use]
    pub fn point_to_multipoint(mut self) -> Self {
        if let Attr::Present(bearer) = &mut self.attrs.bearer {
            bearer.configuration = ConnectionConfiguration::PointToMultipoint;
        }
        self
    }

    #[must_use]
    pub fn without_aal(mut self) -> Self {
        self.attrs.aal = Attr::Absent;
        self
    }

    #[must_use]
    pub fn build(self) -> AttributeSet {
        self.attrs
    }
}

/// `header` with `suffix` appended; handy for building data frames.
#[must_use]
pub fn frame(header: &[u8], suffix: &[u8]) -> bytes::Bytes {
    let mut data = header.to_vec();
    data.extend_from_slice(suffix);
    bytes::Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atm_cm::manager::{validate_connect_attrs, validate_listen_attrs};

    #[test]
    fn test_outbound_fixture_is_valid() {
        validate_connect_attrs(&CallAttrs::outbound().build()).unwrap();
        validate_connect_attrs(&CallAttrs::outbound().with_llc(&LLC_IP, true).build()).unwrap();
    }

    #[test]
    fn test_listener_fixture_is_valid() {
        validate_listen_attrs(&CallAttrs::listener().build()).unwrap();
        validate_listen_attrs(&CallAttrs::listener().with_llc(&LLC_IP, false).build()).unwrap();
    }

    #[test]
    fn test_config_ids_are_unique() {
        assert_ne!(test_config().cm_id, test_config().cm_id);
    }
}
