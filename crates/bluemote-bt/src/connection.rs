//! Per-link state: the ACL connection to the console and the four L2CAP
//! channels multiplexed over it.

use tracing::warn;

/// Virtual devices, and therefore ACL connections, the chip exposes.
pub const MAX_CONNECTIONS: usize = 4;

/// Handle assigned to the first connection; the rest follow in order.
pub const FIRST_HANDLE: u16 = 0x000B;

/// Pending signaling commands per connection.
pub const SIGNALING_QUEUE_LEN: usize = 8;

/// Outbound ACL staging capacity: B-frame header plus the largest
/// payload (a 23-byte input report behind a 4-byte HID prefix is
/// smaller than the configuration PDUs).
pub const ACL_STAGE_CAP: usize = 48;

/// The channels a Wii opens to a remote, in the order the connection
/// table tracks them. `Signaling` is the fixed channel; the others are
/// dynamically allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Signaling,
    Sdp,
    HidControl,
    HidInterrupt,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Signaling,
        ChannelKind::Sdp,
        ChannelKind::HidControl,
        ChannelKind::HidInterrupt,
    ];

    pub fn psm(self) -> u16 {
        match self {
            ChannelKind::Signaling => 0x0000,
            ChannelKind::Sdp => 0x0001,
            ChannelKind::HidControl => 0x0011,
            ChannelKind::HidInterrupt => 0x0013,
        }
    }

    pub fn from_psm(psm: u16) -> Option<ChannelKind> {
        match psm {
            0x0001 => Some(ChannelKind::Sdp),
            0x0011 => Some(ChannelKind::HidControl),
            0x0013 => Some(ChannelKind::HidInterrupt),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            ChannelKind::Signaling => 0,
            ChannelKind::Sdp => 1,
            ChannelKind::HidControl => 2,
            ChannelKind::HidInterrupt => 3,
        }
    }
}

/// Lifecycle of a dynamic channel. Peer-initiated channels go
/// `Inactive -> Configuring -> Active`; locally initiated ones pass
/// through `RequestSent` first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Inactive,
    RequestSent,
    Configuring,
    Active,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Channel {
    pub state: ChannelState,
    pub local_cid: u16,
    pub remote_cid: u16,
}

/// A signaling PDU waiting to be sent. Responses carry the identifier
/// of the request they answer; requests get a fresh identifier when
/// formatted.
#[derive(Debug, Clone, Copy)]
pub enum SignalCmd {
    ConnectionRequest {
        kind: ChannelKind,
    },
    ConnectionResponse {
        kind: ChannelKind,
        ident: u8,
    },
    ConfigRequest {
        kind: ChannelKind,
    },
    ConfigResponse {
        kind: ChannelKind,
        ident: u8,
    },
    DisconnectResponse {
        ident: u8,
        dcid: u16,
        scid: u16,
    },
}

pub struct Connection {
    pub handle: u16,
    pub bd_addr: [u8; 6],
    pub channels: [Channel; 4],

    signals: [Option<SignalCmd>; SIGNALING_QUEUE_LEN],
    signal_head: usize,
    signal_len: usize,

    /// Outbound ACL frame being fragmented toward the console.
    pub stage: [u8; ACL_STAGE_CAP],
    pub stage_len: usize,
    pub stage_off: usize,

    /// ACL frames received from the console since the last
    /// Number-Of-Completed-Packets event.
    pub flushed_packets: u8,
}

impl Connection {
    pub fn new(index: usize, bd_addr: [u8; 6]) -> Self {
        let mut conn = Connection {
            handle: FIRST_HANDLE + index as u16,
            bd_addr,
            channels: [Channel::default(); 4],
            signals: [None; SIGNALING_QUEUE_LEN],
            signal_head: 0,
            signal_len: 0,
            stage: [0; ACL_STAGE_CAP],
            stage_len: 0,
            stage_off: 0,
            flushed_packets: 0,
        };
        conn.reset();
        conn
    }

    /// Drops all channel and staging state. The fixed signaling channel
    /// comes back immediately.
    pub fn reset(&mut self) {
        self.channels = [Channel::default(); 4];
        self.channels[0] = Channel {
            state: ChannelState::Active,
            local_cid: 0x0001,
            remote_cid: 0x0001,
        };
        self.signals = [None; SIGNALING_QUEUE_LEN];
        self.signal_head = 0;
        self.signal_len = 0;
        self.stage_len = 0;
        self.stage_off = 0;
        self.flushed_packets = 0;
    }

    pub fn channel(&self, kind: ChannelKind) -> &Channel {
        &self.channels[kind.index()]
    }

    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut Channel {
        &mut self.channels[kind.index()]
    }

    /// Looks up a dynamic channel by our CID.
    pub fn channel_by_local_cid(&self, cid: u16) -> Option<ChannelKind> {
        ChannelKind::ALL[1..]
            .iter()
            .copied()
            .find(|kind| self.channel(*kind).local_cid == cid)
    }

    pub fn push_signal(&mut self, cmd: SignalCmd) {
        if self.signal_len == SIGNALING_QUEUE_LEN {
            warn!(handle = self.handle, "signaling queue full, dropping PDU");
            return;
        }
        let tail = (self.signal_head + self.signal_len) % SIGNALING_QUEUE_LEN;
        self.signals[tail] = Some(cmd);
        self.signal_len += 1;
    }

    pub fn pop_signal(&mut self) -> Option<SignalCmd> {
        if self.signal_len == 0 {
            return None;
        }
        let cmd = self.signals[self.signal_head].take();
        self.signal_head = (self.signal_head + 1) % SIGNALING_QUEUE_LEN;
        self.signal_len -= 1;
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_channel_survives_reset() {
        let mut conn = Connection::new(2, [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x03]);
        assert_eq!(conn.handle, 0x000D);

        conn.channel_mut(ChannelKind::HidInterrupt).state = ChannelState::Active;
        conn.reset();
        assert_eq!(
            conn.channel(ChannelKind::HidInterrupt).state,
            ChannelState::Inactive
        );
        assert_eq!(conn.channel(ChannelKind::Signaling).state, ChannelState::Active);
        assert_eq!(conn.channel(ChannelKind::Signaling).local_cid, 0x0001);
    }

    #[test]
    fn signal_queue_is_fifo_and_bounded() {
        let mut conn = Connection::new(0, [0; 6]);
        for _ in 0..SIGNALING_QUEUE_LEN + 2 {
            conn.push_signal(SignalCmd::ConfigRequest {
                kind: ChannelKind::HidControl,
            });
        }
        let mut drained = 0;
        while conn.pop_signal().is_some() {
            drained += 1;
        }
        assert_eq!(drained, SIGNALING_QUEUE_LEN);
    }
}
