//! HCI command and event emulation.
//!
//! The console's stack drives this exactly like the Broadcom module it
//! replaces: commands come in whole, events go out in chunks of at most
//! 16 bytes (the transport's packet size). Completions are queued as
//! (event, opcode, handle) triples and formatted lazily when polled, so
//! a burst of commands never overruns the staging buffer.

use tracing::{debug, warn};

use crate::connection::{ChannelKind, MAX_CONNECTIONS};
use crate::l2cap;
use crate::wiimote::ConnectRole;
use crate::BtChip;

/// Queued events waiting to be formatted.
pub const EVENT_QUEUE_LEN: usize = 16;

/// Transport chunk size for outgoing events.
pub const EVENT_CHUNK: usize = 16;

/// Delay between our Connection Complete and the L2CAP open we
/// initiate, giving the console time to finish link setup.
pub const DEFERRED_OPEN_DELAY_MS: u32 = 100;

/// Largest ACL data fragment sent to the console per poll.
pub const ACL_FRAGMENT_LEN: usize = 27;

/// Addresses the virtual Wiimotes present to the console.
pub const REMOTE_ADDR: [[u8; 6]; 4] = [
    [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x01],
    [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x02],
    [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x03],
    [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x04],
];

/// The chip's own address.
pub const HOST_ADDR: [u8; 6] = [0xA0, 0x35, 0xA3, 0xA3, 0xBD, 0x58];

/// One link key shared by every pairing.
pub const LINK_KEY: [u8; 16] = [
    0x58, 0xB4, 0x81, 0xA1, 0x15, 0x3D, 0xE7, 0xA7, 0x7A, 0xCE, 0x56, 0xD3, 0xEF, 0xE7, 0x0F,
    0x0E,
];

const DEFAULT_LOCAL_NAME: &[u8] = b"BCM2045B2 ROM + EEPROM";
const REMOTE_NAME: &[u8] = b"Nintendo RVL-CNT-01";

pub(crate) fn default_local_name() -> [u8; 248] {
    let mut name = [0u8; 248];
    name[..DEFAULT_LOCAL_NAME.len()].copy_from_slice(DEFAULT_LOCAL_NAME);
    name
}

// Event codes.
const EVT_INQUIRY_COMPLETE: u8 = 0x01;
const EVT_CONNECTION_COMPLETE: u8 = 0x03;
pub(crate) const EVT_CONNECTION_REQUEST: u8 = 0x04;
pub(crate) const EVT_DISCONNECTION_COMPLETE: u8 = 0x05;
const EVT_AUTHENTICATION_COMPLETE: u8 = 0x06;
const EVT_REMOTE_NAME_REQUEST_COMPLETE: u8 = 0x07;
const EVT_REMOTE_FEATURES_COMPLETE: u8 = 0x0B;
const EVT_REMOTE_VERSION_COMPLETE: u8 = 0x0C;
const EVT_COMMAND_COMPLETE: u8 = 0x0E;
const EVT_COMMAND_STATUS: u8 = 0x0F;
const EVT_ROLE_CHANGE: u8 = 0x12;
const EVT_COMPLETED_PACKETS: u8 = 0x13;
const EVT_MODE_CHANGE: u8 = 0x14;
const EVT_RETURN_LINK_KEYS: u8 = 0x15;
const EVT_PIN_CODE_REQUEST: u8 = 0x16;
const EVT_LINK_KEY_REQUEST: u8 = 0x17;
const EVT_LINK_KEY_NOTIFICATION: u8 = 0x18;
const EVT_CLOCK_OFFSET_COMPLETE: u8 = 0x1C;
const EVT_INQUIRY_RESULT_RSSI: u8 = 0x22;
/// Vendor event reporting a sync button press on a virtual remote.
pub(crate) const EVT_SYNC_BUTTON: u8 = 0xFF;

// Opcodes (OGF << 10 | OCF).
const INQUIRY: u16 = 0x0401;
const INQUIRY_CANCEL: u16 = 0x0402;
const CREATE_CONNECTION: u16 = 0x0405;
const DISCONNECT: u16 = 0x0406;
const ACCEPT_CONNECTION_REQUEST: u16 = 0x0409;
const LINK_KEY_REQUEST_REPLY: u16 = 0x040B;
const LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 = 0x040C;
const PIN_CODE_REQUEST_REPLY: u16 = 0x040D;
const CHANGE_CONNECTION_PACKET_TYPE: u16 = 0x040F;
const AUTHENTICATION_REQUESTED: u16 = 0x0411;
const REMOTE_NAME_REQUEST: u16 = 0x0419;
const READ_REMOTE_SUPPORTED_FEATURES: u16 = 0x041B;
const READ_REMOTE_VERSION_INFORMATION: u16 = 0x041D;
const READ_CLOCK_OFFSET: u16 = 0x041F;

const SNIFF_MODE: u16 = 0x0803;
const WRITE_LINK_POLICY_SETTINGS: u16 = 0x080D;
const WRITE_DEFAULT_LINK_POLICY_SETTINGS: u16 = 0x080F;

const SET_EVENT_MASK: u16 = 0x0C01;
const RESET: u16 = 0x0C03;
const SET_EVENT_FILTER: u16 = 0x0C05;
const WRITE_PIN_TYPE: u16 = 0x0C0A;
const READ_STORED_LINK_KEY: u16 = 0x0C0D;
const WRITE_STORED_LINK_KEY: u16 = 0x0C11;
const DELETE_STORED_LINK_KEY: u16 = 0x0C12;
const WRITE_LOCAL_NAME: u16 = 0x0C13;
const READ_LOCAL_NAME: u16 = 0x0C14;
const WRITE_CONNECTION_ACCEPT_TIMEOUT: u16 = 0x0C16;
const WRITE_PAGE_TIMEOUT: u16 = 0x0C18;
const WRITE_SCAN_ENABLE: u16 = 0x0C1A;
const READ_PAGE_SCAN_ACTIVITY: u16 = 0x0C1B;
const WRITE_PAGE_SCAN_ACTIVITY: u16 = 0x0C1C;
const READ_CLASS_OF_DEVICE: u16 = 0x0C23;
const WRITE_CLASS_OF_DEVICE: u16 = 0x0C24;
const READ_VOICE_SETTING: u16 = 0x0C25;
const HOST_BUFFER_SIZE: u16 = 0x0C33;
const WRITE_LINK_SUPERVISION_TIMEOUT: u16 = 0x0C37;
const READ_NUM_SUPPORTED_IAC: u16 = 0x0C38;
const READ_CURRENT_IAC_LAP: u16 = 0x0C39;
const WRITE_INQUIRY_SCAN_TYPE: u16 = 0x0C43;
const WRITE_INQUIRY_MODE: u16 = 0x0C45;
const READ_PAGE_SCAN_TYPE: u16 = 0x0C46;
const WRITE_PAGE_SCAN_TYPE: u16 = 0x0C47;

const READ_LOCAL_VERSION: u16 = 0x1001;
const READ_LOCAL_SUPPORTED_COMMANDS: u16 = 0x1002;
const READ_LOCAL_SUPPORTED_FEATURES: u16 = 0x1003;
const READ_LOCAL_EXTENDED_FEATURES: u16 = 0x1004;
const READ_BUFFER_SIZE: u16 = 0x1005;
const READ_BD_ADDR: u16 = 0x1009;

const VENDOR_4C: u16 = 0xFC4C;
const VENDOR_4F: u16 = 0xFC4F;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueuedEvent {
    pub code: u8,
    pub opcode: u16,
    pub handle: u16,
}

impl BtChip {
    /// Stages an HCI command packet (`opcode` LE, parameter length,
    /// parameters). It is processed on the next [`BtChip::poll_event`].
    pub fn submit_command(&mut self, packet: &[u8]) {
        if packet.len() < 3 || packet.len() > self.cmd_buf.len() {
            warn!(len = packet.len(), "malformed HCI command packet");
            return;
        }
        if self.cmd_len > 0 {
            warn!("HCI command overwritten before it was processed");
        }
        self.cmd_buf[..packet.len()].copy_from_slice(packet);
        self.cmd_len = packet.len();
    }

    /// Produces the next chunk of event traffic into `buf` (which must
    /// hold at least 19 bytes), returning its length. A return of 0
    /// does not mean the chip is idle: formatting a queued event and
    /// processing a staged command both happen on polls that return
    /// nothing, so the caller should poll again while it has credit.
    pub fn poll_event(&mut self, now_ms: u32, buf: &mut [u8]) -> usize {
        let mut len = 0;

        if self.evt_len > self.evt_off {
            let n = (self.evt_len - self.evt_off).min(EVENT_CHUNK);
            buf[..n].copy_from_slice(&self.evt_buf[self.evt_off..self.evt_off + n]);
            self.evt_off += n;
            len = n;
        } else if self.format_pending_event(now_ms) {
            // Drained in chunks starting next poll.
        } else if self
            .deferred_open
            .is_some_and(|(_, t0)| now_ms.wrapping_sub(t0) >= DEFERRED_OPEN_DELAY_MS)
        {
            if let Some((handle, _)) = self.deferred_open.take() {
                if let Some(i) = Self::conn_index(handle) {
                    l2cap::request_connection(&mut self.conns[i], ChannelKind::HidControl);
                }
            }
        } else {
            len = self.completed_packets_event(buf);
        }

        if self.cmd_len > 0 {
            self.process_command(now_ms);
            self.cmd_len = 0;
        }
        len
    }

    /// ACL data from the console. One frame per packet; the console is
    /// not known to fragment toward its own module.
    pub fn receive_acl(&mut self, packet: &[u8]) {
        if packet.len() < 4 {
            return;
        }
        let handle = u16::from_le_bytes([packet[0], packet[1]]) & 0x0FFF;
        let len = u16::from_le_bytes([packet[2], packet[3]]) as usize;
        let Some(payload) = packet.get(4..4 + len) else {
            return;
        };
        let Some(i) = Self::conn_index(handle) else {
            debug!(handle, "ACL data for unknown handle");
            return;
        };
        if payload.is_empty() {
            return;
        }
        l2cap::handle_frame(
            &mut self.conns[i],
            &mut self.devices[i],
            &mut self.pool,
            payload,
        );
        self.conns[i].flushed_packets = self.conns[i].flushed_packets.saturating_add(1);
    }

    /// Produces the next outbound ACL packet into `buf`, round-robining
    /// across connections. Returns 0 when nothing is ready.
    pub fn poll_acl(&mut self, now_ms: u32, buf: &mut [u8]) -> usize {
        for _ in 0..MAX_CONNECTIONS {
            let i = self.acl_rr;
            self.acl_rr = (self.acl_rr + 1) % MAX_CONNECTIONS;

            if self.conns[i].stage_len == 0 {
                let mut frame = [0u8; crate::connection::ACL_STAGE_CAP];
                let n = l2cap::next_frame(
                    &mut self.conns[i],
                    &mut self.devices[i],
                    &mut self.pool,
                    &mut self.counters,
                    now_ms,
                    &mut frame,
                );
                if n > 0 {
                    self.conns[i].stage[..n].copy_from_slice(&frame[..n]);
                    self.conns[i].stage_len = n;
                    self.conns[i].stage_off = 0;
                }
            }

            let conn = &mut self.conns[i];
            if conn.stage_len > conn.stage_off {
                let remaining = conn.stage_len - conn.stage_off;
                let n = remaining.min(ACL_FRAGMENT_LEN);
                // Packet boundary: first fragment or continuation.
                let pb: u16 = if conn.stage_off == 0 { 0x2 } else { 0x1 };
                buf[0..2].copy_from_slice(&(conn.handle | pb << 12).to_le_bytes());
                buf[2..4].copy_from_slice(&(n as u16).to_le_bytes());
                buf[4..4 + n].copy_from_slice(&conn.stage[conn.stage_off..conn.stage_off + n]);
                conn.stage_off += n;
                if conn.stage_off == conn.stage_len {
                    conn.stage_len = 0;
                    conn.stage_off = 0;
                }
                return 4 + n;
            }
        }
        0
    }

    pub(crate) fn queue_event(&mut self, code: u8, opcode: u16, handle: u16) {
        if self.evt_count == EVENT_QUEUE_LEN {
            warn!(code, "event queue full, dropping event");
            return;
        }
        self.events[(self.evt_head + self.evt_count) % EVENT_QUEUE_LEN] = QueuedEvent {
            code,
            opcode,
            handle,
        };
        self.evt_count += 1;
    }

    fn stage_event(&mut self, code: u8, params: &[u8]) {
        self.evt_buf[0] = code;
        self.evt_buf[1] = params.len() as u8;
        self.evt_buf[2..2 + params.len()].copy_from_slice(params);
        self.evt_len = 2 + params.len();
        self.evt_off = 0;
    }

    fn conn_addr(&self, handle: u16) -> [u8; 6] {
        Self::conn_index(handle)
            .map(|i| self.conns[i].bd_addr)
            .unwrap_or_default()
    }

    /// Formats the next queued event into the staging buffer. Returns
    /// false when the queue is empty.
    fn format_pending_event(&mut self, now_ms: u32) -> bool {
        if self.evt_count == 0 {
            return false;
        }
        let evt = self.events[self.evt_head];
        self.evt_head = (self.evt_head + 1) % EVENT_QUEUE_LEN;
        self.evt_count -= 1;

        let handle = evt.handle;
        let addr = self.conn_addr(handle);
        let hb = handle.to_le_bytes();

        match evt.code {
            EVT_COMMAND_COMPLETE => self.stage_command_complete(evt.opcode, handle),
            EVT_COMMAND_STATUS => {
                // The console sends this command with parameters the
                // real module rejects; match its error.
                let status = if evt.opcode == CHANGE_CONNECTION_PACKET_TYPE {
                    0x12
                } else {
                    0x00
                };
                let op = evt.opcode.to_le_bytes();
                self.stage_event(EVT_COMMAND_STATUS, &[status, 1, op[0], op[1]]);
            }
            EVT_INQUIRY_COMPLETE => {
                self.stage_event(EVT_INQUIRY_COMPLETE, &[0x00]);
                self.syncing = false;
            }
            EVT_INQUIRY_RESULT_RSSI => {
                if self.syncing {
                    let mut p = [0u8; 15];
                    p[0] = 0x01;
                    p[1..7].copy_from_slice(&addr);
                    p[7] = 0x01; // page scan repetition mode
                    p[9..12].copy_from_slice(&[0x04, 0x25, 0x00]); // class
                    p[12..14].copy_from_slice(&[0xEA, 0x43]); // clock offset
                    p[14] = 0xBF; // rssi
                    self.stage_event(EVT_INQUIRY_RESULT_RSSI, &p);
                } else {
                    self.stage_event(EVT_INQUIRY_RESULT_RSSI, &[0x00]);
                }
            }
            EVT_CONNECTION_COMPLETE => {
                let mut p = [0u8; 11];
                p[1..3].copy_from_slice(&hb);
                p[3..9].copy_from_slice(&addr);
                p[9] = 0x01; // ACL
                self.stage_event(EVT_CONNECTION_COMPLETE, &p);
                if let Some(i) = Self::conn_index(handle) {
                    if self.devices[i].role == ConnectRole::Auto {
                        self.deferred_open = Some((handle, now_ms));
                    }
                }
            }
            EVT_DISCONNECTION_COMPLETE => {
                // Reason: connection terminated by local host.
                self.stage_event(EVT_DISCONNECTION_COMPLETE, &[0x00, hb[0], hb[1], 0x16]);
                if let Some(i) = Self::conn_index(handle) {
                    self.devices[i].hci_connection_failed = true;
                }
            }
            EVT_CONNECTION_REQUEST => {
                let mut p = [0u8; 10];
                p[0..6].copy_from_slice(&addr);
                p[6..9].copy_from_slice(&[0x04, 0x25, 0x00]); // class
                p[9] = 0x01; // ACL
                self.stage_event(EVT_CONNECTION_REQUEST, &p);
                self.connection_request_handle = handle;
            }
            EVT_ROLE_CHANGE => {
                let mut p = [0u8; 8];
                p[1..7].copy_from_slice(&addr);
                // New role: master.
                self.stage_event(EVT_ROLE_CHANGE, &p);
            }
            EVT_MODE_CHANGE => {
                // Sniff mode, interval 8 slots.
                self.stage_event(EVT_MODE_CHANGE, &[0x00, hb[0], hb[1], 0x02, 0x08, 0x00]);
            }
            EVT_PIN_CODE_REQUEST => self.stage_event(EVT_PIN_CODE_REQUEST, &addr),
            EVT_LINK_KEY_REQUEST => self.stage_event(EVT_LINK_KEY_REQUEST, &addr),
            EVT_RETURN_LINK_KEYS => {
                let mut p = [0u8; 89];
                p[0] = REMOTE_ADDR.len() as u8;
                for (i, remote) in REMOTE_ADDR.iter().enumerate() {
                    p[1 + 22 * i..7 + 22 * i].copy_from_slice(remote);
                    p[7 + 22 * i..23 + 22 * i].copy_from_slice(&LINK_KEY);
                }
                self.stage_event(EVT_RETURN_LINK_KEYS, &p);
            }
            EVT_LINK_KEY_NOTIFICATION => {
                let mut p = [0u8; 23];
                p[0..6].copy_from_slice(&addr);
                p[6..22].copy_from_slice(&LINK_KEY);
                self.stage_event(EVT_LINK_KEY_NOTIFICATION, &p);
            }
            EVT_AUTHENTICATION_COMPLETE => {
                self.stage_event(EVT_AUTHENTICATION_COMPLETE, &[0x00, hb[0], hb[1]]);
            }
            EVT_REMOTE_NAME_REQUEST_COMPLETE => {
                let mut p = [0u8; 255];
                p[1..7].copy_from_slice(&addr);
                p[7..7 + REMOTE_NAME.len()].copy_from_slice(REMOTE_NAME);
                self.stage_event(EVT_REMOTE_NAME_REQUEST_COMPLETE, &p);
            }
            EVT_REMOTE_FEATURES_COMPLETE => {
                let mut p = [0u8; 11];
                p[1..3].copy_from_slice(&hb);
                p[3..11].copy_from_slice(&[0xBC, 0x02, 0x04, 0x38, 0x08, 0x00, 0x00, 0x00]);
                self.stage_event(EVT_REMOTE_FEATURES_COMPLETE, &p);
            }
            EVT_REMOTE_VERSION_COMPLETE => {
                self.stage_event(
                    EVT_REMOTE_VERSION_COMPLETE,
                    &[0x00, hb[0], hb[1], 0x03, 0x0F, 0x00, 0x1C, 0x03],
                );
            }
            EVT_CLOCK_OFFSET_COMPLETE => {
                self.stage_event(
                    EVT_CLOCK_OFFSET_COMPLETE,
                    &[0x00, hb[0], hb[1], 0xE9, 0x43],
                );
            }
            EVT_SYNC_BUTTON => {
                // Only one device can be in the pairing dance at a
                // time; a press arriving while an inquiry is in flight
                // is dropped.
                if !self.syncing {
                    self.stage_event(EVT_SYNC_BUTTON, &[0x08]);
                    self.syncing = true;
                    self.sync_handle = handle;
                } else {
                    return self.format_pending_event(now_ms);
                }
            }
            other => {
                debug!(code = other, "queued event with no formatter");
                return self.format_pending_event(now_ms);
            }
        }
        true
    }

    /// Command Complete parameters are `[allowed_pkts, opcode, status,
    /// command-specific data]`.
    fn stage_command_complete(&mut self, opcode: u16, handle: u16) {
        let mut p = [0u8; 253];
        p[0] = 0x01;
        p[1..3].copy_from_slice(&opcode.to_le_bytes());
        // p[3] is the status, zero for everything we emulate.
        let body = &mut p[4..];

        let len = 4 + match opcode {
            READ_LOCAL_VERSION => {
                body[..8].copy_from_slice(&[0x03, 0xA7, 0x40, 0x03, 0x0F, 0x00, 0x0E, 0x43]);
                8
            }
            READ_LOCAL_SUPPORTED_COMMANDS => {
                body[..17].copy_from_slice(&[
                    0xFF, 0xFF, 0xFF, 0x03, 0xFE, 0xFF, 0xCF, 0xFF, 0xFF, 0xFF, 0xFF, 0x1F,
                    0xF2, 0x0F, 0xF8, 0xFF, 0x3F,
                ]);
                64
            }
            READ_LOCAL_SUPPORTED_FEATURES => {
                body[..8].copy_from_slice(&[0xFF, 0xFF, 0x8D, 0xFE, 0x9B, 0xF9, 0x00, 0x80]);
                8
            }
            READ_LOCAL_EXTENDED_FEATURES => {
                body[0] = 0x01;
                10
            }
            READ_BUFFER_SIZE => {
                body[..7].copy_from_slice(&[0x53, 0x01, 0x40, 0x0A, 0x00, 0x00, 0x00]);
                7
            }
            READ_BD_ADDR => {
                body[..6].copy_from_slice(&HOST_ADDR);
                6
            }
            READ_STORED_LINK_KEY => {
                // Max keys 16, keys read 4.
                body[..4].copy_from_slice(&[0x10, 0x00, 0x04, 0x00]);
                4
            }
            WRITE_STORED_LINK_KEY => {
                body[0] = 0x01; // keys written
                1
            }
            DELETE_STORED_LINK_KEY => {
                // Keys deleted: none.
                2
            }
            READ_LOCAL_NAME => {
                body[..248].copy_from_slice(&self.local_name);
                248
            }
            READ_PAGE_SCAN_ACTIVITY => {
                body[..4].copy_from_slice(&[0x00, 0x01, 0x2C, 0x00]);
                4
            }
            READ_CLASS_OF_DEVICE => 3,
            READ_VOICE_SETTING => {
                body[..2].copy_from_slice(&[0x60, 0x00]);
                2
            }
            READ_NUM_SUPPORTED_IAC => {
                body[0] = 0x01;
                1
            }
            READ_CURRENT_IAC_LAP => {
                // One IAC, the GIAC.
                body[..4].copy_from_slice(&[0x01, 0x33, 0x8B, 0x9E]);
                4
            }
            READ_PAGE_SCAN_TYPE => {
                body[0] = 0x01; // interlaced
                1
            }
            LINK_KEY_REQUEST_REPLY | LINK_KEY_REQUEST_NEGATIVE_REPLY | PIN_CODE_REQUEST_REPLY => {
                body[..6].copy_from_slice(&self.conn_addr(handle));
                6
            }
            WRITE_LINK_POLICY_SETTINGS | WRITE_LINK_SUPERVISION_TIMEOUT => {
                body[..2].copy_from_slice(&handle.to_le_bytes());
                2
            }
            _ => 0,
        };
        self.stage_event(EVT_COMMAND_COMPLETE, &p[..len]);
    }

    /// Number Of Completed Packets, written straight into the caller's
    /// buffer once at least two inbound packets have been consumed.
    fn completed_packets_event(&mut self, buf: &mut [u8]) -> usize {
        let total: u32 = self.conns.iter().map(|c| u32::from(c.flushed_packets)).sum();
        if total < 2 {
            return 0;
        }

        let mut count = 0usize;
        let mut off = 3;
        for conn in &mut self.conns {
            if conn.flushed_packets == 0 {
                continue;
            }
            buf[off..off + 2].copy_from_slice(&conn.handle.to_le_bytes());
            buf[off + 2] = conn.flushed_packets;
            buf[off + 3] = 0;
            conn.flushed_packets = 0;
            count += 1;
            off += 4;
        }
        buf[0] = EVT_COMPLETED_PACKETS;
        buf[1] = (1 + 4 * count) as u8;
        buf[2] = count as u8;
        2 + 1 + 4 * count
    }

    fn process_command(&mut self, now_ms: u32) {
        let opcode = u16::from_le_bytes([self.cmd_buf[0], self.cmd_buf[1]]);
        let plen = self.cmd_buf[2] as usize;
        let end = (3 + plen).min(self.cmd_len);
        let mut params = [0u8; 256];
        params[..end - 3].copy_from_slice(&self.cmd_buf[3..end]);
        let params = &params[..end - 3];

        let handle_param = |p: &[u8]| -> u16 {
            u16::from_le_bytes([
                p.first().copied().unwrap_or(0),
                p.get(1).copied().unwrap_or(0),
            ])
        };
        let handle_from_addr = |conns: &[crate::connection::Connection]| -> u16 {
            conns
                .iter()
                .find(|c| params.len() >= 6 && c.bd_addr == params[..6])
                .map(|c| c.handle)
                .unwrap_or(0)
        };

        match opcode {
            INQUIRY => {
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_INQUIRY_RESULT_RSSI, opcode, self.sync_handle);
                self.queue_event(EVT_INQUIRY_COMPLETE, opcode, 0);
            }
            INQUIRY_CANCEL => self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0),
            CREATE_CONNECTION => {
                let handle = handle_from_addr(&self.conns);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_CONNECTION_COMPLETE, opcode, handle);
            }
            DISCONNECT => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_DISCONNECTION_COMPLETE, opcode, handle);
            }
            ACCEPT_CONNECTION_REQUEST => {
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                // Role switch requested: we become slave, console master.
                if params.get(6) == Some(&0x00) {
                    self.queue_event(EVT_ROLE_CHANGE, opcode, self.connection_request_handle);
                }
                self.queue_event(
                    EVT_CONNECTION_COMPLETE,
                    opcode,
                    self.connection_request_handle,
                );
            }
            LINK_KEY_REQUEST_REPLY => {
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, self.auth_handle);
                self.queue_event(EVT_AUTHENTICATION_COMPLETE, opcode, self.auth_handle);
            }
            LINK_KEY_REQUEST_NEGATIVE_REPLY => {
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, self.auth_handle);
                self.queue_event(EVT_PIN_CODE_REQUEST, opcode, self.auth_handle);
            }
            PIN_CODE_REQUEST_REPLY => {
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, self.auth_handle);
                self.queue_event(EVT_LINK_KEY_NOTIFICATION, opcode, self.auth_handle);
                self.queue_event(EVT_AUTHENTICATION_COMPLETE, opcode, self.auth_handle);
            }
            CHANGE_CONNECTION_PACKET_TYPE => {
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
            }
            AUTHENTICATION_REQUESTED => {
                self.auth_handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_LINK_KEY_REQUEST, opcode, self.auth_handle);
            }
            REMOTE_NAME_REQUEST => {
                let handle = handle_from_addr(&self.conns);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_REMOTE_NAME_REQUEST_COMPLETE, opcode, handle);
            }
            READ_REMOTE_SUPPORTED_FEATURES => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_REMOTE_FEATURES_COMPLETE, opcode, handle);
            }
            READ_REMOTE_VERSION_INFORMATION => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_REMOTE_VERSION_COMPLETE, opcode, handle);
            }
            READ_CLOCK_OFFSET => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_CLOCK_OFFSET_COMPLETE, opcode, handle);
            }
            SNIFF_MODE => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_STATUS, opcode, 0);
                self.queue_event(EVT_MODE_CHANGE, opcode, handle);
            }
            WRITE_LINK_POLICY_SETTINGS | WRITE_LINK_SUPERVISION_TIMEOUT => {
                let handle = handle_param(params);
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, handle);
            }
            RESET => {
                self.reset(now_ms);
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0);
            }
            WRITE_SCAN_ENABLE => {
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0);
                // Page scan enabled with the name set to "Wii" means
                // the console is ready for remotes to connect.
                if params.first() == Some(&0x02)
                    && self.local_name.starts_with(b"Wii")
                    && self.local_name[3] == 0
                {
                    self.connectable = true;
                }
            }
            READ_STORED_LINK_KEY => {
                self.queue_event(EVT_RETURN_LINK_KEYS, opcode, 0);
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0);
            }
            WRITE_LOCAL_NAME => {
                self.local_name = [0; 248];
                let n = params.len().min(248);
                self.local_name[..n].copy_from_slice(&params[..n]);
                self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0);
            }
            WRITE_DEFAULT_LINK_POLICY_SETTINGS
            | SET_EVENT_MASK
            | SET_EVENT_FILTER
            | WRITE_PIN_TYPE
            | WRITE_STORED_LINK_KEY
            | DELETE_STORED_LINK_KEY
            | READ_LOCAL_NAME
            | WRITE_CONNECTION_ACCEPT_TIMEOUT
            | WRITE_PAGE_TIMEOUT
            | READ_PAGE_SCAN_ACTIVITY
            | WRITE_PAGE_SCAN_ACTIVITY
            | READ_CLASS_OF_DEVICE
            | WRITE_CLASS_OF_DEVICE
            | READ_VOICE_SETTING
            | HOST_BUFFER_SIZE
            | READ_NUM_SUPPORTED_IAC
            | READ_CURRENT_IAC_LAP
            | WRITE_INQUIRY_SCAN_TYPE
            | WRITE_INQUIRY_MODE
            | READ_PAGE_SCAN_TYPE
            | WRITE_PAGE_SCAN_TYPE
            | READ_LOCAL_VERSION
            | READ_LOCAL_SUPPORTED_COMMANDS
            | READ_LOCAL_SUPPORTED_FEATURES
            | READ_LOCAL_EXTENDED_FEATURES
            | READ_BUFFER_SIZE
            | READ_BD_ADDR
            | VENDOR_4C
            | VENDOR_4F => self.queue_event(EVT_COMMAND_COMPLETE, opcode, 0),
            other => debug!(opcode = other, "unhandled HCI command"),
        }
    }
}
