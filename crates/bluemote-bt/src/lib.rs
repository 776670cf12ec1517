//! Emulated Bluetooth controller chip for a Wii console.
//!
//! The chip impersonates the console's internal Broadcom module and
//! presents up to four virtual Wiimotes to an unmodified system. Four
//! layers stack up:
//!
//! * [`hci`]: command and event emulation toward the console's
//!   Bluetooth stack, plus ACL framing.
//! * [`l2cap`]: signaling and the SDP/HID channels per connection.
//! * [`wiimote`]: the report and register engine of each virtual
//!   remote.
//! * [`sync`]: the periodic exchange with the external MCU that
//!   aggregates the physical controllers.
//!
//! Everything is driven by the caller: commands and ACL data are pushed
//! in with [`BtChip::submit_command`] and [`BtChip::receive_acl`],
//! outbound traffic is pulled with [`BtChip::poll_event`] and
//! [`BtChip::poll_acl`], and the MCU exchange runs off
//! [`BtChip::sync_frame`] / [`BtChip::apply_frame`]. Time is passed in
//! as a wrapping millisecond counter.

#![forbid(unsafe_code)]

pub mod connection;
pub mod hci;
pub mod l2cap;
pub mod sync;
pub mod wiimote;

use connection::{Connection, FIRST_HANDLE, MAX_CONNECTIONS};
use hci::{QueuedEvent, EVENT_QUEUE_LEN};
use wiimote::pool::ReportPool;
use wiimote::Wiimote;

pub use bluemote_sync_protocol as sync_protocol;

/// The whole emulated chip.
pub struct BtChip {
    pub(crate) conns: [Connection; MAX_CONNECTIONS],
    pub(crate) devices: [Wiimote; MAX_CONNECTIONS],
    pub(crate) pool: ReportPool,
    pub(crate) counters: l2cap::Counters,

    /// Local name as written by the console; the console setting it to
    /// "Wii" doubles as the ready-to-pair signal.
    pub(crate) local_name: [u8; 248],
    pub(crate) connectable: bool,
    pub(crate) syncing: bool,
    pub(crate) sync_handle: u16,
    pub(crate) auth_handle: u16,
    pub(crate) connection_request_handle: u16,
    /// Armed when we initiated the link; opens the HID control channel
    /// once the console has had a moment to settle.
    pub(crate) deferred_open: Option<(u16, u32)>,

    pub(crate) events: [QueuedEvent; EVENT_QUEUE_LEN],
    pub(crate) evt_head: usize,
    pub(crate) evt_count: usize,

    /// Event currently being drained in 16-byte chunks.
    pub(crate) evt_buf: [u8; 257],
    pub(crate) evt_len: usize,
    pub(crate) evt_off: usize,

    pub(crate) cmd_buf: [u8; 259],
    pub(crate) cmd_len: usize,

    pub(crate) acl_rr: usize,
    pub(crate) last_sync_ms: u32,
}

impl BtChip {
    pub fn new() -> Self {
        BtChip {
            conns: std::array::from_fn(|i| Connection::new(i, hci::REMOTE_ADDR[i])),
            devices: std::array::from_fn(|i| Wiimote::new(FIRST_HANDLE + i as u16)),
            pool: ReportPool::new(),
            counters: l2cap::Counters::new(),
            local_name: hci::default_local_name(),
            connectable: false,
            syncing: false,
            sync_handle: 0,
            auth_handle: 0,
            connection_request_handle: 0,
            deferred_open: None,
            events: [QueuedEvent::default(); EVENT_QUEUE_LEN],
            evt_head: 0,
            evt_count: 0,
            evt_buf: [0; 257],
            evt_len: 0,
            evt_off: 0,
            cmd_buf: [0; 259],
            cmd_len: 0,
            acl_rr: 0,
            last_sync_ms: 0,
        }
    }

    /// HCI Reset: link and device state start over, but events already
    /// queued keep flowing. The console resets twice during boot and
    /// still expects the completions from before the second one.
    pub fn reset(&mut self, now_ms: u32) {
        for i in 0..MAX_CONNECTIONS {
            self.conns[i].reset();
            self.devices[i].reset(&mut self.pool, now_ms);
        }
        self.counters = l2cap::Counters::new();
        self.connectable = false;
        self.deferred_open = None;
    }

    pub fn device_connected(&self, index: usize) -> bool {
        self.devices[index].connected()
    }

    pub fn pool_free_count(&self) -> usize {
        self.pool.free_count()
    }

    pub(crate) fn conn_index(handle: u16) -> Option<usize> {
        let i = handle.checked_sub(FIRST_HANDLE)? as usize;
        (i < MAX_CONNECTIONS).then_some(i)
    }
}

impl Default for BtChip {
    fn default() -> Self {
        Self::new()
    }
}
