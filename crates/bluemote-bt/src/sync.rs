//! Bridge to the controller-aggregation MCU.
//!
//! Every [`SYNC_PERIOD_MS`] the caller exchanges one 128-byte frame
//! with the MCU: [`BtChip::sync_frame`] builds the outbound status
//! bytes and [`BtChip::apply_frame`] consumes the reply. The reply
//! drives the whole connection lifecycle of each virtual remote, not
//! just its input state.

use tracing::{debug, info};

use bluemote_sync_protocol as proto;
use proto::{HostStatus, DEVICE_COUNT, FRAME_LEN};

use crate::connection::MAX_CONNECTIONS;
use crate::hci;
use crate::wiimote::ConnectRole;
use crate::BtChip;

/// Interval of the MCU exchange; also gives the MCU time to finish the
/// previous transfer.
pub const SYNC_PERIOD_MS: u32 = 15;

/// A freshly reset remote stays invisible to the console this long.
const CONNECTABLE_HOLDOFF_MS: u32 = 500;

/// Delay before a newly attached controller asks the console for a
/// connection.
const CONNECT_HOLDOFF_MS: u32 = 1000;

impl BtChip {
    pub fn sync_due(&self, now_ms: u32) -> bool {
        now_ms.wrapping_sub(self.last_sync_ms) >= SYNC_PERIOD_MS
    }

    /// Builds the outbound frame: one status byte per device, zero
    /// filler for the rest of the transfer.
    pub fn sync_frame(&mut self, now_ms: u32) -> [u8; FRAME_LEN] {
        self.last_sync_ms = now_ms;
        let statuses: [HostStatus; DEVICE_COUNT] = std::array::from_fn(|i| HostStatus {
            rumble: self.devices[i].rumble,
            player: self.devices[i].player_number(),
            connectable: self.devices[i].connectable,
        });
        proto::encode_host_frame(&statuses)
    }

    /// Applies the MCU's reply: attach and detach transitions, the
    /// connect/sync fallback ladder, and the input state of every
    /// attached controller.
    pub fn apply_frame(&mut self, now_ms: u32, frame: &[u8; FRAME_LEN]) {
        for i in 0..MAX_CONNECTIONS {
            let handle = self.devices[i].handle();

            if now_ms.wrapping_sub(self.devices[i].reset_at_ms) >= CONNECTABLE_HOLDOFF_MS {
                self.devices[i].connectable = self.connectable;
            }

            if !proto::device_attached(frame, i) {
                if self.devices[i].connected() {
                    self.queue_event(hci::EVT_DISCONNECTION_COMPLETE, 0, handle);
                    self.devices[i].reset(&mut self.pool, now_ms);
                    self.conns[i].reset();
                    info!(index = i, "wiimote disconnected");
                }
                continue;
            }

            // Ask the console to connect once the controller has been
            // attached long enough.
            if !self.devices[i].connection_requested
                && self.devices[i].connectable
                && now_ms.wrapping_sub(self.devices[i].reset_at_ms) >= CONNECT_HOLDOFF_MS
            {
                self.queue_event(hci::EVT_CONNECTION_REQUEST, 0, handle);
                self.devices[i].connection_requested = true;
                self.devices[i].role = ConnectRole::Auto;
                info!(index = i, "wiimote connecting");
            }

            // Both the link and the channel setup failed: fall back to
            // a simulated sync button press and let the console drive.
            if self.devices[i].hci_connection_failed && self.devices[i].l2cap_connection_failed {
                self.queue_event(hci::EVT_SYNC_BUTTON, 0, handle);
                self.devices[i].hci_connection_failed = false;
                self.devices[i].l2cap_connection_failed = false;
                self.devices[i].role = ConnectRole::Sync;
                info!(index = i, "wiimote syncing");
            }

            // Console terminated an established connection.
            if self.devices[i].connected() && self.devices[i].hci_connection_failed {
                self.devices[i].reset(&mut self.pool, now_ms);
                self.conns[i].reset();
                info!(index = i, "wiimote disconnected");
            }

            match proto::decode_device(frame, i) {
                Ok(input) => self.devices[i].apply_input(&mut self.pool, &input),
                Err(err) => {
                    debug!(index = i, %err, "discarding input slice");
                }
            }
        }
    }
}
