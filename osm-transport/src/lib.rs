//! Transport adapters. The core never touches a socket or a radio directly
//! (§5 "no core state is read or written by any other task"); each adapter
//! here owns its own buffers and drives [`OsmCore`] through its three public
//! entry points (`on_ca_connected`, `on_fragment`, `tick`).

pub mod tcp;

use osm_core::OsmCore;

/// A BLE GATT stub (§1 Non-goals: the choice of underlying BLE stack is out
/// of scope). Wire bytes inside a characteristic write/notification are
/// identical to the fragment layout (§4.3); only the notification delivery
/// mechanism differs from TCP framing, which the real BLE stack owns.
pub struct BleStub;

impl BleStub {
    /// A write to the RX characteristic: one fragment from the CA.
    /// Returns a value to notify on the TX characteristic, if any.
    pub fn on_rx_write(core: &mut OsmCore, value: &[u8]) -> Option<Vec<u8>> {
        core.on_fragment(value)
    }

    /// A tick driving outbox flushing; returns a value to notify, if any.
    pub fn on_tick(core: &mut OsmCore) -> Option<Vec<u8>> {
        core.tick()
    }
}
