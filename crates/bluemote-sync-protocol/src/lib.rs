#![forbid(unsafe_code)]

//! Wire format for the fixed-size synchronization frame exchanged between
//! the Bluetooth-replacement chip and the controller-aggregation MCU.
//!
//! The two sides talk full-duplex SPI: every exchange shifts one
//! [`FRAME_LEN`]-byte frame in each direction. The chip-to-aggregator
//! direction only uses the first [`DEVICE_COUNT`] bytes (one status byte
//! per virtual device); the aggregator-to-chip direction carries one
//! [`DEVICE_STRIDE`]-byte slice per device with pad state and a per-slice
//! checksum.
//!
//! This crate is the layout reference: pure encode/decode over byte
//! slices, no I/O, no allocation beyond the frame arrays themselves.

/// Total frame length in bytes, both directions.
pub const FRAME_LEN: usize = 128;

/// Number of device slots carried by a frame.
pub const DEVICE_COUNT: usize = 4;

/// Stride of one device's slice within the inbound frame.
pub const DEVICE_STRIDE: usize = 32;

/// Seed added to the byte sum when computing a slice checksum.
pub const CHECKSUM_SEED: u8 = 0x55;

// Offsets within a device slice.
const OFF_STATUS: usize = 0;
const OFF_BUTTONS: usize = 1; // 4 bytes
const OFF_AXES: usize = 5; // 4 bytes
const OFF_ACCEL: usize = 9; // 3 low bytes + packed high bits
const OFF_ACCEL_HI: usize = 12;
const OFF_EXT_ACCEL: usize = 13;
const OFF_EXT_ACCEL_HI: usize = 16;
const OFF_IR: usize = 22; // 2 points, x/y u16 LE each
const OFF_CHECKSUM: usize = 30;

/// Per-device status reported by the chip to the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStatus {
    /// Rumble requested by the console for this device.
    pub rumble: bool,
    /// Player number currently shown on the device LEDs (0 = none).
    pub player: u8,
    /// Whether the console is accepting new connections.
    pub connectable: bool,
}

impl HostStatus {
    /// Encodes the outbound status byte for device slot `index`.
    ///
    /// Layout: `rumble<<7 | player<<4 | connectable<<3 | (index+1)`.
    pub fn encode(&self, index: usize) -> u8 {
        debug_assert!(index < DEVICE_COUNT);
        (u8::from(self.rumble) << 7)
            | ((self.player & 0x07) << 4)
            | (u8::from(self.connectable) << 3)
            | ((index as u8 + 1) & 0x07)
    }
}

/// Builds the full chip-to-aggregator frame. Bytes past the four status
/// bytes are zero filler clocked out to complete the exchange.
pub fn encode_host_frame(statuses: &[HostStatus; DEVICE_COUNT]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    for (i, status) in statuses.iter().enumerate() {
        frame[i] = status.encode(i);
    }
    frame
}

/// Decoded aggregator-to-chip slice for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInput {
    /// Extension kind reported by the aggregator (high nibble of the
    /// status byte): 0 = none, 1 = nunchuk, 2 = classic.
    pub extension: u8,
    /// Raw button bytes (core, system/extension, classic, classic
    /// shoulder). Checksummed.
    pub buttons: [u8; 4],
    /// Raw stick axes: classic LX/LY/RX/RY; the nunchuk stick reuses the
    /// first two bytes unshifted.
    pub axes: [u8; 4],
    /// Wiimote accelerometer, 10-bit unsigned per axis.
    pub accel: [u16; 3],
    /// Nunchuk accelerometer, 10-bit unsigned per axis.
    pub ext_accel: [u16; 3],
    /// Two tracked IR points as (x, y).
    pub ir: [(u16, u16); 2],
}

/// Slice-level decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceError {
    /// The slice checksum did not match the button bytes.
    BadChecksum { expected: u8, actual: u8 },
}

impl core::fmt::Display for SliceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SliceError::BadChecksum { expected, actual } => {
                write!(f, "slice checksum mismatch: expected {expected:#04x}, got {actual:#04x}")
            }
        }
    }
}

impl std::error::Error for SliceError {}

/// Checksum over one device slice: the sum of the four button bytes plus
/// [`CHECKSUM_SEED`], wrapping.
pub fn slice_checksum(buttons: &[u8; 4]) -> u8 {
    buttons
        .iter()
        .fold(CHECKSUM_SEED, |sum, b| sum.wrapping_add(*b))
}

fn slice(frame: &[u8; FRAME_LEN], index: usize) -> &[u8] {
    &frame[index * DEVICE_STRIDE..(index + 1) * DEVICE_STRIDE]
}

/// Whether the aggregator reports a physical pad attached to slot
/// `index`.
///
/// This reads only the status byte and is deliberately usable when the
/// rest of the slice fails its checksum: connection orchestration keys
/// off attachment even for cycles whose input payload is corrupt.
pub fn device_attached(frame: &[u8; FRAME_LEN], index: usize) -> bool {
    (slice(frame, index)[OFF_STATUS] & 0x07) == index as u8 + 1
}

fn unpack_accel(lo: &[u8], hi: u8) -> [u16; 3] {
    [
        u16::from(lo[0]) | (u16::from(hi & 0x03) << 8),
        u16::from(lo[1]) | (u16::from(hi & 0x0C) << 6),
        u16::from(lo[2]) | (u16::from(hi & 0x30) << 4),
    ]
}

fn pack_accel_hi(accel: &[u16; 3]) -> u8 {
    (((accel[0] >> 8) & 0x03) | ((accel[1] >> 8) << 2 & 0x0C) | ((accel[2] >> 8) << 4 & 0x30))
        as u8
}

/// Decodes and checksum-validates device slot `index` of an inbound
/// frame.
pub fn decode_device(frame: &[u8; FRAME_LEN], index: usize) -> Result<DeviceInput, SliceError> {
    let s = slice(frame, index);

    let mut buttons = [0u8; 4];
    buttons.copy_from_slice(&s[OFF_BUTTONS..OFF_BUTTONS + 4]);

    let expected = slice_checksum(&buttons);
    let actual = s[OFF_CHECKSUM];
    if expected != actual {
        return Err(SliceError::BadChecksum { expected, actual });
    }

    let mut axes = [0u8; 4];
    axes.copy_from_slice(&s[OFF_AXES..OFF_AXES + 4]);

    let mut ir = [(0u16, 0u16); 2];
    for (i, point) in ir.iter_mut().enumerate() {
        let at = OFF_IR + i * 4;
        point.0 = u16::from_le_bytes([s[at], s[at + 1]]);
        point.1 = u16::from_le_bytes([s[at + 2], s[at + 3]]);
    }

    Ok(DeviceInput {
        extension: s[OFF_STATUS] >> 4,
        buttons,
        axes,
        accel: unpack_accel(&s[OFF_ACCEL..OFF_ACCEL + 3], s[OFF_ACCEL_HI]),
        ext_accel: unpack_accel(&s[OFF_EXT_ACCEL..OFF_EXT_ACCEL + 3], s[OFF_EXT_ACCEL_HI]),
        ir,
    })
}

/// Encodes device slot `index` of an aggregator-to-chip frame, including
/// a valid checksum. This is the aggregator-side counterpart of
/// [`decode_device`]; the chip crate uses it to build test frames.
pub fn encode_device(
    frame: &mut [u8; FRAME_LEN],
    index: usize,
    attached: bool,
    input: &DeviceInput,
) {
    let base = index * DEVICE_STRIDE;
    let s = &mut frame[base..base + DEVICE_STRIDE];

    s[OFF_STATUS] = if attached {
        ((input.extension & 0x0F) << 4) | (index as u8 + 1)
    } else {
        (input.extension & 0x0F) << 4
    };
    s[OFF_BUTTONS..OFF_BUTTONS + 4].copy_from_slice(&input.buttons);
    s[OFF_AXES..OFF_AXES + 4].copy_from_slice(&input.axes);

    s[OFF_ACCEL] = input.accel[0] as u8;
    s[OFF_ACCEL + 1] = input.accel[1] as u8;
    s[OFF_ACCEL + 2] = input.accel[2] as u8;
    s[OFF_ACCEL_HI] = pack_accel_hi(&input.accel);

    s[OFF_EXT_ACCEL] = input.ext_accel[0] as u8;
    s[OFF_EXT_ACCEL + 1] = input.ext_accel[1] as u8;
    s[OFF_EXT_ACCEL + 2] = input.ext_accel[2] as u8;
    s[OFF_EXT_ACCEL_HI] = pack_accel_hi(&input.ext_accel);

    for (i, point) in input.ir.iter().enumerate() {
        let at = OFF_IR + i * 4;
        s[at..at + 2].copy_from_slice(&point.0.to_le_bytes());
        s[at + 2..at + 4].copy_from_slice(&point.1.to_le_bytes());
    }

    s[OFF_CHECKSUM] = slice_checksum(&input.buttons);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_status_byte_layout() {
        let status = HostStatus {
            rumble: true,
            player: 2,
            connectable: true,
        };
        assert_eq!(status.encode(0), 0x80 | 0x20 | 0x08 | 0x01);

        let idle = HostStatus::default();
        assert_eq!(idle.encode(3), 0x04);
    }

    #[test]
    fn host_frame_is_zero_past_status_bytes() {
        let frame = encode_host_frame(&[HostStatus::default(); DEVICE_COUNT]);
        assert_eq!(&frame[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert!(frame[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn device_roundtrip() {
        let input = DeviceInput {
            extension: 2,
            buttons: [0x03, 0x41, 0x80, 0x05],
            axes: [0x7F, 0x40, 0x20, 0x10],
            accel: [0x201, 0x1FF, 0x263],
            ext_accel: [0x3FF, 0x000, 0x155],
            ir: [(1023, 767), (0, 5)],
        };

        let mut frame = [0u8; FRAME_LEN];
        encode_device(&mut frame, 1, true, &input);

        assert!(device_attached(&frame, 1));
        assert!(!device_attached(&frame, 0));
        assert_eq!(decode_device(&frame, 1).unwrap(), input);
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let input = DeviceInput {
            buttons: [1, 2, 3, 4],
            ..Default::default()
        };
        let mut frame = [0u8; FRAME_LEN];
        encode_device(&mut frame, 0, true, &input);
        frame[2] ^= 0x10; // flip a button bit, keep the stored checksum

        // Attachment is still readable, the payload is not.
        assert!(device_attached(&frame, 0));
        assert!(matches!(
            decode_device(&frame, 0),
            Err(SliceError::BadChecksum { .. })
        ));
    }

    #[test]
    fn accel_high_bits_pack() {
        let input = DeviceInput {
            accel: [0x3FF, 0x2AA, 0x155],
            ..Default::default()
        };
        let mut frame = [0u8; FRAME_LEN];
        encode_device(&mut frame, 0, true, &input);
        assert_eq!(decode_device(&frame, 0).unwrap().accel, [0x3FF, 0x2AA, 0x155]);
    }
}
