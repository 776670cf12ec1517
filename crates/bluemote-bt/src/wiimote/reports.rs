//! Input-report byte layouts and encoders.
//!
//! Every report sent to the console is `a1 <id> <body>` on the HID
//! interrupt channel. The encoders here fill body fragments; report
//! assembly and queueing live in the device module.
//!
//! Layouts:
//!
//! Core buttons, 2 bytes:
//! ```text
//! byte 0: x1 x0 ?  +  ^  v  >  <      (x1 x0 = accel X bits 1:0)
//! byte 1: H  z1 y1 -  A  B  1  2      (y1/z1 = accel Y/Z bit 1)
//! ```
//! The accelerometer bits are only populated by reporting modes that
//! carry the accelerometer.
//!
//! Accelerometer: 3 bytes, the top 8 bits of each 10-bit axis.
//!
//! IR basic (10 bytes): two 5-byte halves, each packing a pair of
//! objects as `x1_lo y1_lo [y1_hi<<6|x1_hi<<4|y2_hi<<2|x2_hi] x2_lo
//! y2_lo`. IR extended (12 bytes): four objects of `x_lo y_lo
//! [y_hi<<6|x_hi<<4|size]`. IR full (9 bytes per object): the extended
//! triple followed by the bounding box (`x_min y_min x_max y_max 0`)
//! and intensity.
//!
//! Extension blocks are 6 bytes; the composite layouts are documented
//! on [`extension`]. Modes carrying more than 6 extension bytes zero
//! the remainder.

use bitflags::bitflags;

use super::pool::Report;
use super::{InputState, IrObject};

bitflags! {
    /// Core button bits in wire order (byte 0 = low byte).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CoreButtons: u16 {
        const LEFT  = 0x0001;
        const RIGHT = 0x0002;
        const DOWN  = 0x0004;
        const UP    = 0x0008;
        const PLUS  = 0x0010;
        const TWO   = 0x0100;
        const ONE   = 0x0200;
        const B     = 0x0400;
        const A     = 0x0800;
        const MINUS = 0x1000;
        const HOME  = 0x8000;
    }
}

bitflags! {
    /// Classic controller button bits in wire order, before the
    /// active-low inversion (byte 4 of the block = low byte).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ClassicButtons: u16 {
        const RT    = 0x0002;
        const PLUS  = 0x0004;
        const HOME  = 0x0008;
        const MINUS = 0x0010;
        const LT    = 0x0020;
        const DOWN  = 0x0040;
        const RIGHT = 0x0080;
        const UP    = 0x0100;
        const LEFT  = 0x0200;
        const ZR    = 0x0400;
        const X     = 0x0800;
        const A     = 0x1000;
        const Y     = 0x2000;
        const B     = 0x4000;
        const ZL    = 0x8000;
    }
}

/// Extension identity nibbles as they appear in report routing.
pub const EXT_KIND_NONE: u8 = 0x00;
pub const EXT_KIND_NUNCHUK: u8 = 0x01;
pub const EXT_KIND_CLASSIC: u8 = 0x02;
pub const EXT_KIND_MOTIONPLUS: u8 = 0x04;
pub const EXT_KIND_MOTIONPLUS_NUNCHUK: u8 = 0x05;
pub const EXT_KIND_MOTIONPLUS_CLASSIC: u8 = 0x07;

pub fn buttons(core: CoreButtons) -> [u8; 2] {
    core.bits().to_le_bytes()
}

/// Writes the accelerometer LSB bits into the two button bytes and the
/// three high bytes after them. `buf[0..2]` must already hold buttons.
pub fn append_accelerometer(buf: &mut [u8], accel: &[u16; 3]) {
    let [x, y, z] = *accel;
    buf[0] |= ((x & 0x03) as u8) << 5;
    buf[1] |= (((y >> 1) & 0x01) as u8) << 5 | (((z >> 1) & 0x01) as u8) << 6;
    buf[2] = (x >> 2) as u8;
    buf[3] = (y >> 2) as u8;
    buf[4] = (z >> 2) as u8;
}

fn basic_pair(a: &IrObject, b: &IrObject, out: &mut [u8]) {
    out[0] = a.x as u8;
    out[1] = a.y as u8;
    out[2] = (((a.y >> 8) & 0x03) as u8) << 6
        | (((a.x >> 8) & 0x03) as u8) << 4
        | (((b.y >> 8) & 0x03) as u8) << 2
        | ((b.x >> 8) & 0x03) as u8;
    out[3] = b.x as u8;
    out[4] = b.y as u8;
}

pub fn ir_basic(objects: &[IrObject; 4], out: &mut [u8]) {
    basic_pair(&objects[0], &objects[1], &mut out[0..5]);
    basic_pair(&objects[2], &objects[3], &mut out[5..10]);
}

fn extended_triple(obj: &IrObject, out: &mut [u8]) {
    out[0] = obj.x as u8;
    out[1] = obj.y as u8;
    out[2] = (((obj.y >> 8) & 0x03) as u8) << 6
        | (((obj.x >> 8) & 0x03) as u8) << 4
        | (obj.size & 0x0F);
}

pub fn ir_extended(objects: &[IrObject; 4], out: &mut [u8]) {
    for (i, obj) in objects.iter().enumerate() {
        extended_triple(obj, &mut out[i * 3..i * 3 + 3]);
    }
}

/// Encodes two objects in the 9-byte full format (18 bytes total), as
/// used by the interleaved reporting modes.
pub fn ir_full_pair(a: &IrObject, b: &IrObject, out: &mut [u8]) {
    for (obj, chunk) in [a, b].into_iter().zip(out.chunks_exact_mut(9)) {
        extended_triple(obj, &mut chunk[0..3]);
        chunk[3] = obj.x_min;
        chunk[4] = obj.y_min;
        chunk[5] = obj.x_max;
        chunk[6] = obj.y_max;
        chunk[7] = 0;
        chunk[8] = obj.intensity;
    }
}

fn nunchuk(input: &InputState, out: &mut [u8]) {
    let n = &input.nunchuk;
    let [ax, ay, az] = n.accel;
    out[0] = n.x;
    out[1] = n.y;
    out[2] = (ax >> 2) as u8;
    out[3] = (ay >> 2) as u8;
    out[4] = (az >> 2) as u8;
    // LSBs plus active-low C/Z.
    out[5] = ((az & 0x03) as u8) << 6
        | ((ay & 0x03) as u8) << 4
        | ((ax & 0x03) as u8) << 2
        | (u8::from(!n.c)) << 1
        | u8::from(!n.z);
}

/// Nunchuk passed through an active MotionPlus. The stick keeps full
/// resolution; the accelerometer axes lose their lowest bit, which
/// makes room for the data-kind marker in byte 5 (bit 1 clear =
/// extension data, bit 0 set = extension connected).
fn nunchuk_passthrough(input: &InputState, out: &mut [u8]) {
    let n = &input.nunchuk;
    let [ax, ay, az] = n.accel;
    out[0] = n.x;
    out[1] = n.y;
    out[2] = (ax >> 2) as u8;
    out[3] = (ay >> 2) as u8;
    out[4] = (((az >> 3) as u8) << 1) | ((ax >> 1) & 0x01) as u8;
    out[5] = (((az >> 1) & 0x03) as u8) << 6
        | (((ay >> 1) & 0x01) as u8) << 4
        | (u8::from(!n.z)) << 3
        | (u8::from(!n.c)) << 2
        | 0x01;
}

fn classic_sticks(input: &InputState, out: &mut [u8]) {
    let c = &input.classic;
    let (lx, ly) = (c.lx & 0x3F, c.ly & 0x3F);
    let (rx, ry) = (c.rx & 0x1F, c.ry & 0x1F);
    out[0] = ((rx >> 3) & 0x03) << 6 | lx;
    out[1] = ((rx >> 1) & 0x03) << 6 | ly;
    out[2] = (rx & 0x01) << 7 | ((c.lt >> 3) & 0x03) << 5 | ry;
    out[3] = (c.lt & 0x07) << 5 | (c.rt & 0x1F);
}

fn classic(input: &InputState, out: &mut [u8]) {
    classic_sticks(input, out);
    // Button bytes are active low; bit 0 of byte 4 always reads 1.
    let wire = !(input.classic.buttons.bits() | 0x0001) | 0x0001;
    out[4..6].copy_from_slice(&wire.to_le_bytes());
}

/// Classic controller passed through an active MotionPlus: the stick
/// bytes lose their LSB to carry the (active-low) d-pad up/left bits,
/// whose normal positions read released; byte 4 bit 0 marks the
/// extension as connected.
fn classic_passthrough(input: &InputState, out: &mut [u8]) {
    let c = &input.classic;
    classic_sticks(input, out);
    out[0] = (out[0] & 0xC0)
        | ((c.lx & 0x3E) >> 1) << 1
        | u8::from(!c.buttons.contains(ClassicButtons::UP));
    out[1] = (out[1] & 0xC0)
        | ((c.ly & 0x3E) >> 1) << 1
        | u8::from(!c.buttons.contains(ClassicButtons::LEFT));
    let masked = c.buttons & !(ClassicButtons::UP | ClassicButtons::LEFT);
    let wire = !(masked.bits()) | 0x0001;
    out[4..6].copy_from_slice(&wire.to_le_bytes());
}

/// MotionPlus gyro block: 14-bit rates split across low bytes and the
/// top bits of bytes 3..=5. Byte 4 bit 0 reports a passthrough
/// extension, byte 5 bit 1 set marks the block as MotionPlus data.
fn motionplus(input: &InputState, ext_present: bool, out: &mut [u8]) {
    let m = &input.motionplus;
    out[0] = m.yaw as u8;
    out[1] = m.roll as u8;
    out[2] = m.pitch as u8;
    out[3] = ((m.yaw >> 8) as u8) << 2 | (u8::from(m.yaw_slow)) << 1 | u8::from(m.pitch_slow);
    out[4] = ((m.roll >> 8) as u8) << 2 | (u8::from(m.roll_slow)) << 1 | u8::from(ext_present);
    out[5] = ((m.pitch >> 8) as u8) << 2 | 0x02;
}

/// Fills a 6-byte extension block for the given identity nibble. For
/// the MotionPlus composite identities, `phase` alternates the block
/// between gyro data and the passed-through extension on successive
/// reports.
pub fn extension(input: &InputState, kind: u8, phase: &mut bool, out: &mut [u8]) {
    match kind {
        EXT_KIND_NUNCHUK => nunchuk(input, out),
        EXT_KIND_CLASSIC => classic(input, out),
        EXT_KIND_MOTIONPLUS => motionplus(input, false, out),
        EXT_KIND_MOTIONPLUS_NUNCHUK => {
            if *phase {
                motionplus(input, true, out);
            } else {
                nunchuk_passthrough(input, out);
            }
            *phase = !*phase;
        }
        EXT_KIND_MOTIONPLUS_CLASSIC => {
            if *phase {
                motionplus(input, true, out);
            } else {
                classic_passthrough(input, out);
            }
            *phase = !*phase;
        }
        _ => {}
    }
}

/// Acknowledgement report 0x22: `a1 22 BB BB <report-id> <result>`.
/// Button bytes are patched in when the report is drained.
pub fn format_ack(rpt: &mut Report, report_id: u8, result: u8) {
    rpt.len = 6;
    rpt.data[0] = 0xA1;
    rpt.data[1] = 0x22;
    rpt.data[4] = report_id;
    rpt.data[5] = result;
}

/// Status report 0x20: `a1 20 BB BB LF 00 00 <battery>` where `LF` is
/// the LED nibble over the flag bits (IR camera, speaker, extension
/// connected, battery low).
pub fn format_status(
    rpt: &mut Report,
    leds: u8,
    low_battery: bool,
    extension_connected: bool,
    speaker_enabled: bool,
    ircam_enabled: bool,
    battery_level: u8,
) {
    rpt.len = 8;
    rpt.data[0] = 0xA1;
    rpt.data[1] = 0x20;
    rpt.data[4] = (leds & 0x0F) << 4
        | (u8::from(ircam_enabled)) << 3
        | (u8::from(speaker_enabled)) << 2
        | (u8::from(extension_connected)) << 1
        | u8::from(low_battery);
    rpt.data[7] = battery_level;
}

/// Memory-read reply 0x21: `a1 21 BB BB SE AA AA <data:16>` where `SE`
/// is `(size-1) << 4 | error` and the address is the low 16 bits of the
/// request offset, big-endian. Error replies carry no data.
pub fn format_mem_reply(rpt: &mut Report, size: u8, error: u8, addr: u16, data: &[u8]) {
    rpt.len = 23;
    rpt.data[0] = 0xA1;
    rpt.data[1] = 0x21;
    rpt.data[4] = (size.wrapping_sub(1) & 0x0F) << 4 | (error & 0x0F);
    rpt.data[5..7].copy_from_slice(&addr.to_be_bytes());
    rpt.data[7..7 + data.len()].copy_from_slice(data);
}
