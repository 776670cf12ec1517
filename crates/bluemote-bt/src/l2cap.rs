//! L2CAP framing and signaling.
//!
//! Everything runs over basic-mode B-frames. The signaling channel
//! (CID 0x0001) carries connection and configuration PDUs; the dynamic
//! channels carry SDP (accepted but otherwise ignored) and the two HID
//! pipes. Outbound PDUs are queued on the connection and drained one
//! frame per poll, signaling before channel data.

use tracing::{debug, info};

use crate::connection::{ChannelKind, ChannelState, Connection, SignalCmd};
use crate::wiimote::pool::ReportPool;
use crate::wiimote::{ConnectRole, Wiimote};

pub const CID_SIGNALING: u16 = 0x0001;

/// First CID we hand out. Matches what the console allocates for its
/// own side, which keeps traces easy to read.
pub const FIRST_DYNAMIC_CID: u16 = 0x0040;

const CONNECTION_REQUEST: u8 = 0x02;
const CONNECTION_RESPONSE: u8 = 0x03;
const CONFIGURATION_REQUEST: u8 = 0x04;
const CONFIGURATION_RESPONSE: u8 = 0x05;
const DISCONNECTION_REQUEST: u8 = 0x06;
const DISCONNECTION_RESPONSE: u8 = 0x07;

/// Allocators shared by all connections.
pub struct Counters {
    next_cid: u16,
    next_ident: u8,
}

impl Counters {
    pub fn new() -> Self {
        Counters {
            next_cid: FIRST_DYNAMIC_CID,
            next_ident: 1,
        }
    }

    fn alloc_cid(&mut self) -> u16 {
        let cid = self.next_cid;
        self.next_cid = self.next_cid.wrapping_add(1).max(FIRST_DYNAMIC_CID);
        cid
    }

    fn alloc_ident(&mut self) -> u8 {
        let ident = self.next_ident;
        self.next_ident = self.next_ident.wrapping_add(1).max(1);
        ident
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u16(data: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*data.get(off)?, *data.get(off + 1)?]))
}

/// Handles one reassembled ACL payload (a complete B-frame) from the
/// console.
pub fn handle_frame(conn: &mut Connection, dev: &mut Wiimote, pool: &mut ReportPool, data: &[u8]) {
    let Some(len) = read_u16(data, 0) else {
        return;
    };
    let Some(cid) = read_u16(data, 2) else {
        return;
    };
    let Some(payload) = data.get(4..4 + len as usize) else {
        return;
    };

    if cid == CID_SIGNALING {
        handle_signaling(conn, dev, payload);
        return;
    }
    match conn.channel_by_local_cid(cid) {
        Some(ChannelKind::HidInterrupt) => dev.on_output_report(pool, payload),
        // SDP requests and HID control traffic are accepted and ignored;
        // the console never needs an answer on either to pair.
        Some(_) => {}
        None => debug!(handle = conn.handle, cid, "frame on unknown CID"),
    }
}

fn handle_signaling(conn: &mut Connection, dev: &mut Wiimote, pdu: &[u8]) {
    let (Some(&code), Some(&ident)) = (pdu.first(), pdu.get(1)) else {
        return;
    };
    let Some(len) = read_u16(pdu, 2) else {
        return;
    };
    let Some(data) = pdu.get(4..4 + len as usize) else {
        return;
    };

    match code {
        CONNECTION_REQUEST => {
            let (Some(psm), Some(scid)) = (read_u16(data, 0), read_u16(data, 2)) else {
                return;
            };
            let Some(kind) = ChannelKind::from_psm(psm) else {
                debug!(handle = conn.handle, psm, "connection request for unknown PSM");
                return;
            };
            // The CID is allocated when the response is formatted so
            // requests racing in both directions stay consistent.
            let ch = conn.channel_mut(kind);
            ch.remote_cid = scid;
            ch.state = ChannelState::Configuring;
            conn.push_signal(SignalCmd::ConnectionResponse { kind, ident });
        }
        CONNECTION_RESPONSE => {
            let (Some(dcid), Some(scid), Some(result)) =
                (read_u16(data, 0), read_u16(data, 2), read_u16(data, 4))
            else {
                return;
            };
            if result != 0 {
                info!(handle = conn.handle, result, "channel refused by console");
                dev.l2cap_connection_failed = true;
                return;
            }
            let Some(kind) = conn.channel_by_local_cid(scid) else {
                return;
            };
            let ch = conn.channel_mut(kind);
            ch.remote_cid = dcid;
            ch.state = ChannelState::Configuring;
            conn.push_signal(SignalCmd::ConfigRequest { kind });
        }
        CONFIGURATION_REQUEST => {
            let Some(dcid) = read_u16(data, 0) else {
                return;
            };
            let Some(kind) = conn.channel_by_local_cid(dcid) else {
                return;
            };
            conn.push_signal(SignalCmd::ConfigResponse { kind, ident });
        }
        CONFIGURATION_RESPONSE => {
            let Some(scid) = read_u16(data, 0) else {
                return;
            };
            let Some(kind) = conn.channel_by_local_cid(scid) else {
                return;
            };
            conn.channel_mut(kind).state = ChannelState::Active;
            match kind {
                // When we drove the control channel open, chain straight
                // into the interrupt channel.
                ChannelKind::HidControl if dev.role == ConnectRole::Auto => {
                    request_connection(conn, ChannelKind::HidInterrupt);
                }
                ChannelKind::HidInterrupt => {
                    dev.connected = true;
                    info!(handle = conn.handle, "wiimote connected");
                }
                _ => {}
            }
        }
        DISCONNECTION_REQUEST => {
            let (Some(dcid), Some(scid)) = (read_u16(data, 0), read_u16(data, 2)) else {
                return;
            };
            if let Some(kind) = conn.channel_by_local_cid(dcid) {
                conn.channel_mut(kind).state = ChannelState::Inactive;
            }
            conn.push_signal(SignalCmd::DisconnectResponse { ident, dcid, scid });
        }
        DISCONNECTION_RESPONSE => {}
        _ => debug!(handle = conn.handle, code, "unhandled signaling PDU"),
    }
}

/// Starts opening a channel toward the console.
pub fn request_connection(conn: &mut Connection, kind: ChannelKind) {
    conn.channel_mut(kind).state = ChannelState::RequestSent;
    conn.push_signal(SignalCmd::ConnectionRequest { kind });
}

fn put_frame(out: &mut [u8], cid: u16, payload_len: usize) -> usize {
    out[0..2].copy_from_slice(&(payload_len as u16).to_le_bytes());
    out[2..4].copy_from_slice(&cid.to_le_bytes());
    4 + payload_len
}

fn put_signal(out: &mut [u8], code: u8, ident: u8, data: &[u8]) -> usize {
    out[4] = code;
    out[5] = ident;
    out[6..8].copy_from_slice(&(data.len() as u16).to_le_bytes());
    out[8..8 + data.len()].copy_from_slice(data);
    put_frame(out, CID_SIGNALING, 4 + data.len())
}

/// Produces the next outbound B-frame for this connection into `out`,
/// returning its length, or 0 when there is nothing to send. Signaling
/// drains first; otherwise an input report rides the interrupt channel.
pub fn next_frame(
    conn: &mut Connection,
    dev: &mut Wiimote,
    pool: &mut ReportPool,
    counters: &mut Counters,
    now_ms: u32,
    out: &mut [u8],
) -> usize {
    if let Some(cmd) = conn.pop_signal() {
        return format_signal(conn, counters, cmd, out);
    }

    let ch = conn.channel(ChannelKind::HidInterrupt);
    if ch.state != ChannelState::Active {
        return 0;
    }
    let remote_cid = ch.remote_cid;
    let n = dev.next_input_report(pool, now_ms, &mut out[4..]);
    if n == 0 {
        return 0;
    }
    put_frame(out, remote_cid, n)
}

fn format_signal(
    conn: &mut Connection,
    counters: &mut Counters,
    cmd: SignalCmd,
    out: &mut [u8],
) -> usize {
    match cmd {
        SignalCmd::ConnectionRequest { kind } => {
            let cid = counters.alloc_cid();
            conn.channel_mut(kind).local_cid = cid;
            let mut data = [0u8; 4];
            data[0..2].copy_from_slice(&kind.psm().to_le_bytes());
            data[2..4].copy_from_slice(&cid.to_le_bytes());
            put_signal(out, CONNECTION_REQUEST, counters.alloc_ident(), &data)
        }
        SignalCmd::ConnectionResponse { kind, ident } => {
            let cid = counters.alloc_cid();
            let ch = conn.channel_mut(kind);
            ch.local_cid = cid;
            let remote = ch.remote_cid;
            let mut data = [0u8; 8];
            data[0..2].copy_from_slice(&cid.to_le_bytes());
            data[2..4].copy_from_slice(&remote.to_le_bytes());
            // Result and status: success, no further information.
            conn.push_signal(SignalCmd::ConfigRequest { kind });
            put_signal(out, CONNECTION_RESPONSE, ident, &data)
        }
        SignalCmd::ConfigRequest { kind } => {
            let remote = conn.channel(kind).remote_cid;
            let mut data = [0u8; 8];
            data[0..2].copy_from_slice(&remote.to_le_bytes());
            // Flags 0, then an MTU option of 185 bytes.
            data[4..8].copy_from_slice(&[0x01, 0x02, 0xB9, 0x00]);
            put_signal(out, CONFIGURATION_REQUEST, counters.alloc_ident(), &data)
        }
        SignalCmd::ConfigResponse { kind, ident } => {
            let remote = conn.channel(kind).remote_cid;
            let mut data = [0u8; 14];
            data[0..2].copy_from_slice(&remote.to_le_bytes());
            // Flags 0, result success, echo an MTU of 640 and a flush
            // timeout of 0xFFFF.
            data[6..14].copy_from_slice(&[0x01, 0x02, 0x80, 0x02, 0x02, 0x02, 0xFF, 0xFF]);
            put_signal(out, CONFIGURATION_RESPONSE, ident, &data)
        }
        SignalCmd::DisconnectResponse { ident, dcid, scid } => {
            let mut data = [0u8; 4];
            data[0..2].copy_from_slice(&dcid.to_le_bytes());
            data[2..4].copy_from_slice(&scid.to_le_bytes());
            put_signal(out, DISCONNECTION_RESPONSE, ident, &data)
        }
    }
}
