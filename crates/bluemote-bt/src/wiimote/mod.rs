//! Virtual Wiimote engine: output-report handling, register and EEPROM
//! windows, the extension/MotionPlus plug state machine, and input
//! report assembly.

pub mod crypto;
pub mod eeprom;
pub mod pool;
pub mod reports;

use tracing::warn;

use bluemote_sync_protocol::DeviceInput;

use crypto::ExtCipher;
use pool::ReportPool;
use reports::{ClassicButtons, CoreButtons};

/// Minimum spacing between assembled input reports.
pub const REPORT_MIN_INTERVAL_MS: u32 = 11;

/// Reads of the MotionPlus init-progress bytes flip the progress value
/// to "ready" on the Nth read while the unit is active.
pub const WMP_READY_READ_COUNT: u8 = 5;

const DEFAULT_REPORT_MODE: u8 = 0x30;
const QUEUE_LEN: usize = pool::POOL_SIZE;

/// Accessory plugged into the extension port, as reported by the
/// aggregation MCU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Extension {
    #[default]
    None,
    Nunchuk,
    Classic,
}

impl Extension {
    pub fn from_wire(nibble: u8) -> Extension {
        match nibble {
            1 => Extension::Nunchuk,
            2 => Extension::Classic,
            _ => Extension::None,
        }
    }

    fn report_kind(self) -> u8 {
        match self {
            Extension::None => reports::EXT_KIND_NONE,
            Extension::Nunchuk => reports::EXT_KIND_NUNCHUK,
            Extension::Classic => reports::EXT_KIND_CLASSIC,
        }
    }
}

/// MotionPlus activation state. `Deactivating` is a distinct state the
/// console drives through before the final inactivation write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MotionPlusMode {
    #[default]
    Inactive,
    Active,
    Deactivating,
}

/// How this device establishes its link: `Auto` means the chip asks the
/// console to connect (inbound connection request), `Sync` means the
/// console discovers the device through an inquiry after a simulated
/// sync-button press.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectRole {
    #[default]
    Sync,
    Auto,
}

/// One tracked IR camera point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrObject {
    pub x: u16,
    pub y: u16,
    pub size: u8,
    pub x_min: u8,
    pub y_min: u8,
    pub x_max: u8,
    pub y_max: u8,
    pub intensity: u8,
}

impl IrObject {
    pub const CLEARED: IrObject = IrObject {
        x: 0xFFFF,
        y: 0xFFFF,
        size: 0xFF,
        x_min: 0xFF,
        y_min: 0xFF,
        x_max: 0xFF,
        y_max: 0xFF,
        intensity: 0xFF,
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NunchukState {
    pub x: u8,
    pub y: u8,
    pub c: bool,
    pub z: bool,
    pub accel: [u16; 3],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicState {
    pub buttons: ClassicButtons,
    pub lx: u8,
    pub ly: u8,
    pub rx: u8,
    pub ry: u8,
    pub lt: u8,
    pub rt: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MotionPlusInput {
    pub yaw: u16,
    pub roll: u16,
    pub pitch: u16,
    pub yaw_slow: bool,
    pub roll_slow: bool,
    pub pitch_slow: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct InputState {
    pub buttons: CoreButtons,
    pub accel: [u16; 3],
    pub ir: [IrObject; 4],
    pub nunchuk: NunchukState,
    pub classic: ClassicState,
    pub motionplus: MotionPlusInput,
}

impl Default for InputState {
    fn default() -> Self {
        InputState {
            buttons: CoreButtons::empty(),
            // Resting flat on a table.
            accel: [0x80 << 2, 0x80 << 2, 0x98 << 2],
            ir: [IrObject::CLEARED; 4],
            nunchuk: NunchukState {
                x: 128,
                y: 128,
                accel: [512, 512, 760],
                ..NunchukState::default()
            },
            classic: ClassicState {
                lx: 32,
                ly: 32,
                rx: 15,
                ry: 15,
                ..ClassicState::default()
            },
            motionplus: MotionPlusInput {
                yaw: 0x1F7F,
                roll: 0x1F7F,
                pitch: 0x1F7F,
                yaw_slow: true,
                roll_slow: true,
                pitch_slow: true,
            },
        }
    }
}

// Register block written by the console to reinitialize MotionPlus
// calibration (a write to offset 0xF1), captured from a real unit.
const WMP_RECALIBRATION: [u8; 64] = [
    0xE7, 0x98, 0x31, 0x8A, 0x18, 0x82, 0x37, 0x5E, 0x02, 0x4F, 0x68, 0x47, 0x78, 0xEF, 0xBB,
    0xD7, 0x86, 0xC8, 0x95, 0xBD, 0x20, 0x9B, 0xEB, 0x8B, 0x79, 0x81, 0xDC, 0x61, 0x13, 0x54,
    0x79, 0x4C, 0xB7, 0x26, 0x82, 0x17, 0xE8, 0x0F, 0xA9, 0xB5, 0x45, 0xA0, 0x38, 0x8E, 0x9E,
    0x86, 0x72, 0x55, 0x3D, 0x46, 0x2E, 0x3E, 0x10, 0x1F, 0x8E, 0x0C, 0xF4, 0x04, 0x89, 0x4C,
    0xCA, 0x3E, 0x9F, 0x36,
];

// Post-activation contents of the live MotionPlus register window,
// captured from a real unit (0x20..0x4F, then 0x50..0x8F).
const WMP_ACTIVE_20: [u8; 48] = [
    0x7C, 0x97, 0x7F, 0x0A, 0x7C, 0xA8, 0x33, 0xB7, 0xCC, 0x12, 0x33, 0x08, 0xC8, 0x01, 0x72,
    0xD4, 0x7C, 0x53, 0x87, 0x58, 0x7C, 0x9F, 0x36, 0xB2, 0xC9, 0x34, 0x35, 0xF8, 0x2D, 0x60,
    0xD7, 0xD5, 0x81, 0x80, 0x80, 0x28, 0xB4, 0xB3, 0xB3, 0x26, 0xE3, 0x22, 0x7A, 0xD8, 0x1B,
    0x81, 0x31, 0x86,
];
const WMP_ACTIVE_50: [u8; 64] = [
    0x15, 0x6D, 0xE0, 0x23, 0x20, 0x79, 0xD3, 0x73, 0x01, 0xA9, 0xF0, 0x25, 0xB0, 0xBC, 0xFF,
    0xE1, 0xD8, 0x3F, 0x82, 0x52, 0x75, 0x99, 0xBE, 0xDB, 0xCB, 0x61, 0x60, 0x0F, 0x35, 0xBD,
    0xD4, 0x4D, 0x5C, 0x9F, 0x5D, 0x81, 0x71, 0xDE, 0x22, 0xE6, 0xB9, 0x23, 0xA4, 0x58, 0xB7,
    0x62, 0x33, 0xA4, 0xCD, 0x8B, 0x3A, 0xFE, 0x98, 0xF0, 0xD9, 0x57, 0x0C, 0xE8, 0x27, 0x51,
    0xB6, 0xEA, 0xE5, 0x78,
];

/// One virtual remote.
pub struct Wiimote {
    pub(crate) handle: u16,
    pub(crate) role: ConnectRole,
    pub(crate) connected: bool,
    pub(crate) connection_requested: bool,
    pub(crate) hci_connection_failed: bool,
    pub(crate) l2cap_connection_failed: bool,
    pub(crate) connectable: bool,
    pub(crate) reset_at_ms: u32,

    pub(crate) rumble: bool,
    leds: u8,
    ircam_enabled: bool,
    speaker_enabled: bool,
    low_battery: bool,
    battery_level: u8,

    report_mode: u8,
    continuous: bool,
    report_changed: bool,
    last_report_ms: u32,

    extension: Extension,
    ext_connected: bool,
    ext_report_kind: u8,
    ext_phase: bool,
    encrypted: bool,
    cipher: ExtCipher,
    wmp: MotionPlusMode,
    wmp_reads: u8,

    regs_a2: [u8; 0x0A],
    regs_a4: [u8; 0x100],
    regs_a6: [u8; 0x100],
    regs_b0: [u8; 0x34],

    pub(crate) input: InputState,
    last_buttons: [u8; 4],

    queue: [u8; QUEUE_LEN],
    queue_head: usize,
    queue_len: usize,
}

fn copy_into(region: &mut [u8], off: usize, data: &[u8]) {
    if off >= region.len() {
        return;
    }
    let n = data.len().min(region.len() - off);
    region[off..off + n].copy_from_slice(&data[..n]);
}

fn read_chunk(region: &[u8], off: usize, n: usize) -> [u8; 16] {
    let mut out = [0u8; 16];
    if off < region.len() {
        let avail = n.min(region.len() - off);
        out[..avail].copy_from_slice(&region[off..off + avail]);
    }
    out
}

impl Wiimote {
    pub fn new(handle: u16) -> Self {
        let mut dev = Wiimote {
            handle,
            role: ConnectRole::default(),
            connected: false,
            connection_requested: false,
            hci_connection_failed: false,
            l2cap_connection_failed: false,
            connectable: false,
            reset_at_ms: 0,
            rumble: false,
            leds: 0,
            ircam_enabled: false,
            speaker_enabled: false,
            low_battery: false,
            battery_level: 0xFF,
            report_mode: DEFAULT_REPORT_MODE,
            continuous: false,
            report_changed: false,
            last_report_ms: 0,
            extension: Extension::None,
            ext_connected: false,
            ext_report_kind: reports::EXT_KIND_NONE,
            ext_phase: false,
            encrypted: false,
            cipher: ExtCipher::default(),
            wmp: MotionPlusMode::Inactive,
            wmp_reads: 0,
            regs_a2: [0; 0x0A],
            regs_a4: [0; 0x100],
            regs_a6: [0; 0x100],
            regs_b0: [0; 0x34],
            input: InputState::default(),
            last_buttons: [0; 4],
            queue: [0; QUEUE_LEN],
            queue_head: 0,
            queue_len: 0,
        };
        dev.init_extension();
        dev
    }

    /// Returns the device to its post-power-on state. Queued reports go
    /// back to the pool; the connection handle is the only thing kept.
    pub fn reset(&mut self, pool: &mut ReportPool, now_ms: u32) {
        while let Some(slot) = self.pop_queued() {
            pool.release(slot);
        }
        *self = Wiimote::new(self.handle);
        self.reset_at_ms = now_ms;
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Player number shown on the LEDs, 0 when no single LED is lit.
    pub fn player_number(&self) -> u8 {
        match self.leds {
            0x01 => 1,
            0x02 => 2,
            0x04 => 3,
            0x08 => 4,
            _ => 0,
        }
    }

    // --- report queue ----------------------------------------------

    fn pop_queued(&mut self) -> Option<usize> {
        if self.queue_len == 0 {
            return None;
        }
        let slot = self.queue[self.queue_head] as usize;
        self.queue_head = (self.queue_head + 1) % QUEUE_LEN;
        self.queue_len -= 1;
        Some(slot)
    }

    fn queue_report(&mut self, pool: &mut ReportPool) -> Option<usize> {
        if self.queue_len == QUEUE_LEN {
            warn!(handle = self.handle, "report queue full, dropping report");
            return None;
        }
        match pool.checkout() {
            Ok(slot) => {
                self.queue[(self.queue_head + self.queue_len) % QUEUE_LEN] = slot as u8;
                self.queue_len += 1;
                Some(slot)
            }
            Err(err) => {
                warn!(handle = self.handle, %err, "dropping report");
                None
            }
        }
    }

    fn queue_ack(&mut self, pool: &mut ReportPool, report_id: u8, result: u8) {
        if let Some(slot) = self.queue_report(pool) {
            reports::format_ack(pool.get_mut(slot), report_id, result);
        }
    }

    fn queue_status(&mut self, pool: &mut ReportPool) {
        if let Some(slot) = self.queue_report(pool) {
            reports::format_status(
                pool.get_mut(slot),
                self.leds,
                self.low_battery,
                self.ext_connected,
                self.speaker_enabled,
                self.ircam_enabled,
                self.battery_level,
            );
        }
    }

    fn queue_mem_error(&mut self, pool: &mut ReportPool, error: u8, addr: u16) {
        if let Some(slot) = self.queue_report(pool) {
            reports::format_mem_reply(pool.get_mut(slot), 0x10, error, addr, &[]);
        }
    }

    /// Simulated unplug/replug of the extension: status with the
    /// extension bit cleared, then with it set. The console reacts by
    /// re-reading the identity registers.
    fn replug(&mut self, pool: &mut ReportPool) {
        self.ext_connected = false;
        self.queue_status(pool);
        self.ext_connected = true;
        self.queue_status(pool);
    }

    fn ack_and_replug(&mut self, pool: &mut ReportPool) {
        self.queue_ack(pool, 0x16, 0x00);
        self.replug(pool);
    }

    // --- output reports --------------------------------------------

    /// Handles one HID output frame (`a2 <id> <payload>`) from the
    /// interrupt channel.
    pub fn on_output_report(&mut self, pool: &mut ReportPool, frame: &[u8]) {
        if frame.len() < 3 || frame[0] != 0xA2 {
            return;
        }
        let kind = frame[1];
        let payload = &frame[2..];

        // Every output report carries rumble in bit 0.
        self.rumble = payload[0] & 0x01 != 0;

        match kind {
            0x11 => {
                self.leds = payload[0] >> 4;
                self.queue_ack(pool, kind, 0x00);
            }
            0x12 => {
                if payload.len() < 2 {
                    return;
                }
                self.continuous = payload[0] & 0x04 != 0;
                self.report_mode = payload[1];
                self.queue_ack(pool, kind, 0x00);
            }
            0x13 | 0x1A => {
                self.ircam_enabled = payload[0] & 0x04 != 0;
                self.queue_ack(pool, kind, 0x00);
            }
            0x14 => {
                self.speaker_enabled = payload[0] & 0x04 != 0;
                self.queue_ack(pool, kind, 0x00);
            }
            0x19 => {
                self.speaker_enabled = payload[0] & 0x04 == 0;
                self.queue_ack(pool, kind, 0x00);
            }
            0x15 => self.queue_status(pool),
            0x16 => {
                if payload.len() < 5 {
                    return;
                }
                let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
                let size = (payload[4] as usize).min(16);
                if payload.len() < 5 + size {
                    return;
                }
                let data = &payload[5..5 + size];
                if payload[0] & 0x06 != 0 {
                    self.write_register(pool, offset, data);
                } else {
                    self.write_eeprom(pool, offset, size as u32);
                }
            }
            0x17 => {
                if payload.len() < 6 {
                    return;
                }
                let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
                let size = u16::from_be_bytes([payload[4], payload[5]]);
                if payload[0] & 0x06 != 0 {
                    self.read_register(pool, offset, size);
                } else {
                    self.read_eeprom(pool, offset, size);
                }
            }
            _ => {}
        }
    }

    // --- register and EEPROM windows -------------------------------

    fn write_register(&mut self, pool: &mut ReportPool, offset: u32, data: &[u8]) {
        let off = (offset & 0xFF) as usize;
        // Region select ignores the LSB of the register page.
        match ((offset >> 16) & 0xFE) as u8 {
            0xA2 => copy_into(&mut self.regs_a2, off, data),
            0xB0 => copy_into(&mut self.regs_b0, off, data),
            0xA4 => {
                let live = self.wmp == MotionPlusMode::Active;
                if live {
                    // The extension port "is" the MotionPlus right now.
                    copy_into(&mut self.regs_a6, off, data);
                } else {
                    copy_into(&mut self.regs_a4, off, data);
                }

                if live && off == 0xF0 && data.first() == Some(&0x55) {
                    self.wmp = MotionPlusMode::Deactivating;
                    self.init_extension();
                    self.ack_and_replug(pool);
                    return;
                }
                if live && off == 0xFE && data.first() == Some(&0x00) {
                    self.wmp = MotionPlusMode::Inactive;
                    self.init_extension();
                    self.ack_and_replug(pool);
                    return;
                }
                if off == 0x4C {
                    // Final chunk of the encryption key.
                    let mut key = [0u8; 16];
                    key.copy_from_slice(&self.regs_a4[0x40..0x50]);
                    self.cipher = ExtCipher::derive(&key);
                    self.encrypted = true;
                } else if off == 0xF1 {
                    self.regs_a6[0xF7] = 0x1A;
                    self.regs_a6[0x50..0x90].copy_from_slice(&WMP_RECALIBRATION);
                }
            }
            0xA6 => {
                copy_into(&mut self.regs_a6, off, data);
                if off == 0xFE && data.first().is_some_and(|b| b & 0x04 != 0) {
                    self.wmp = MotionPlusMode::Active;
                    self.ext_report_kind = data[0] & 0x07;
                    self.init_extension();
                    self.ack_and_replug(pool);
                    return;
                }
            }
            _ => {}
        }
        self.queue_ack(pool, 0x16, 0x00);
    }

    fn read_register(&mut self, pool: &mut ReportPool, offset: u32, size: u16) {
        let off = (offset & 0xFF) as usize;
        let region = ((offset >> 16) & 0xFE) as u8;
        let live = self.wmp == MotionPlusMode::Active;

        // Reading the MotionPlus home region while it is live at the
        // extension address faults.
        if region == 0xA6 && live {
            self.queue_mem_error(pool, 0x7, offset as u16);
            return;
        }
        // The console polls the init-progress bytes while waiting for
        // the MotionPlus to come up; report ready after a few reads.
        if region == 0xA4 && live && (off == 0xF6 || off == 0xF7) {
            self.wmp_reads = self.wmp_reads.saturating_add(1);
            if self.wmp_reads == WMP_READY_READ_COUNT {
                self.regs_a6[0xF7] = 0x0E;
            }
        }

        let mut remaining = size as usize;
        let mut chunk_off = off;
        let mut addr = offset as u16;
        while remaining > 0 {
            let n = remaining.min(16);
            let chunk = {
                let image: &[u8] = match region {
                    0xA2 => &self.regs_a2,
                    0xA4 if live => &self.regs_a6,
                    0xA4 => &self.regs_a4,
                    0xA6 => &self.regs_a6,
                    0xB0 => &self.regs_b0,
                    _ => {
                        self.queue_mem_error(pool, 0x8, offset as u16);
                        return;
                    }
                };
                read_chunk(image, chunk_off, n)
            };
            let Some(slot) = self.queue_report(pool) else {
                return;
            };
            reports::format_mem_reply(pool.get_mut(slot), n as u8, 0x0, addr, &chunk[..n]);
            remaining -= n;
            chunk_off += 16;
            addr = addr.wrapping_add(16);
        }
    }

    fn read_eeprom(&mut self, pool: &mut ReportPool, offset: u32, size: u16) {
        if offset + u32::from(size) > eeprom::ADDRESS_LIMIT {
            self.queue_mem_error(pool, 0x8, offset as u16);
            return;
        }

        let mut remaining = size as usize;
        let mut index = offset as usize + eeprom::BLOB_BASE;
        let mut addr = offset as u16;
        while remaining > 0 {
            let n = remaining.min(16);
            let Some(slot) = self.queue_report(pool) else {
                return;
            };
            let chunk = &eeprom::IMAGE[index..index + n];
            reports::format_mem_reply(pool.get_mut(slot), n as u8, 0x0, addr, chunk);
            remaining -= n;
            index += 16;
            addr = addr.wrapping_add(16);
        }
    }

    fn write_eeprom(&mut self, pool: &mut ReportPool, offset: u32, size: u32) {
        if offset + size > eeprom::ADDRESS_LIMIT {
            self.queue_mem_error(pool, 0x8, offset as u16);
            return;
        }
        // The image is ROM; accept and acknowledge without storing.
        self.queue_ack(pool, 0x16, 0x00);
    }

    // --- extension identity ----------------------------------------

    /// Rewrites the identity and calibration windows for the current
    /// extension and MotionPlus state.
    fn init_extension(&mut self) {
        if self.wmp == MotionPlusMode::Active {
            self.regs_a6[0xFC] = 0xA4;
            self.encrypted = false;

            self.regs_a6[0xF0..0xF7].copy_from_slice(&[0x55, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
            self.regs_a6[0x20..0x50].copy_from_slice(&WMP_ACTIVE_20);
            self.regs_a6[0x50..0x90].copy_from_slice(&WMP_ACTIVE_50);

            // Init-progress byte: done.
            self.regs_a6[0xF7] = 0x0C;
            self.regs_a6[0xF8] = 0x00;
            self.regs_a6[0xF9] = 0x00;
        } else {
            self.regs_a6[0xFA] = 0x00;
            self.regs_a6[0xFB] = 0x00;
            self.regs_a6[0xFC] = 0xA6;
            self.regs_a6[0xFD] = 0x20;
            self.regs_a6[0xFF] = 0x05;

            self.regs_a6[0xF7] = 0x0C;
            self.regs_a6[0xF8] = 0xFF;
            self.regs_a6[0xF9] = 0xFF;

            self.ext_report_kind = self.extension.report_kind();

            let identity: [u8; 6] = match self.extension {
                Extension::Nunchuk => [0x00, 0x00, 0xA4, 0x20, 0x00, 0x00],
                Extension::Classic => [0x00, 0x00, 0xA4, 0x20, 0x01, 0x01],
                Extension::None => [0xFF; 6],
            };
            self.regs_a4[0xFA..0x100].copy_from_slice(&identity);
        }
    }

    // --- input reports ---------------------------------------------

    /// Produces the next input report into `buf`, or 0 if none is due.
    /// Queued replies drain first, one per call, with live button state
    /// patched in; otherwise a periodic report in the configured mode
    /// is assembled, subject to the rate limit and, in non-continuous
    /// mode, to the input having changed.
    pub fn next_input_report(
        &mut self,
        pool: &mut ReportPool,
        now_ms: u32,
        buf: &mut [u8],
    ) -> usize {
        if let Some(slot) = self.pop_queued() {
            let rpt = *pool.get(slot);
            pool.release(slot);
            let len = rpt.len as usize;
            buf[..len].copy_from_slice(rpt.bytes());
            buf[2..4].copy_from_slice(&reports::buttons(self.input.buttons));
            self.last_report_ms = now_ms;
            return len;
        }

        if now_ms.wrapping_sub(self.last_report_ms) < REPORT_MIN_INTERVAL_MS {
            return 0;
        }
        if !self.continuous && !self.report_changed {
            return 0;
        }

        let len = self.assemble_periodic(buf);
        self.report_changed = false;
        self.last_report_ms = now_ms;
        len
    }

    fn write_buttons(&self, buf: &mut [u8]) {
        buf[2..4].copy_from_slice(&reports::buttons(self.input.buttons));
    }

    fn write_extension(&mut self, out: &mut [u8]) {
        let mut block = [0u8; 6];
        reports::extension(
            &self.input,
            self.ext_report_kind,
            &mut self.ext_phase,
            &mut block,
        );
        if self.encrypted {
            self.cipher.encrypt(&mut block);
        }
        out[..6].copy_from_slice(&block);
    }

    fn write_interleaved(&mut self, buf: &mut [u8]) {
        let [x, y, z] = self.input.accel;
        if self.report_mode == 0x3E {
            buf[2] |= (((z >> 4) & 0x03) as u8) << 5;
            buf[3] |= (((z >> 6) & 0x03) as u8) << 5;
            buf[4] = (x >> 2) as u8;
            reports::ir_full_pair(&self.input.ir[0], &self.input.ir[1], &mut buf[5..23]);
            self.report_mode = 0x3F;
        } else {
            buf[2] |= ((z & 0x03) as u8) << 5;
            buf[3] |= (((z >> 2) & 0x03) as u8) << 5;
            buf[4] = (y >> 2) as u8;
            reports::ir_full_pair(&self.input.ir[2], &self.input.ir[3], &mut buf[5..23]);
            self.report_mode = 0x3E;
        }
    }

    fn assemble_periodic(&mut self, buf: &mut [u8]) -> usize {
        buf[..23].fill(0);
        buf[0] = 0xA1;
        buf[1] = self.report_mode;
        match self.report_mode {
            0x30 => {
                self.write_buttons(buf);
                4
            }
            0x31 => {
                self.write_buttons(buf);
                reports::append_accelerometer(&mut buf[2..7], &self.input.accel);
                7
            }
            0x32 => {
                self.write_buttons(buf);
                self.write_extension(&mut buf[4..12]);
                12
            }
            0x33 => {
                self.write_buttons(buf);
                reports::append_accelerometer(&mut buf[2..7], &self.input.accel);
                reports::ir_extended(&self.input.ir, &mut buf[7..19]);
                19
            }
            0x34 => {
                self.write_buttons(buf);
                self.write_extension(&mut buf[4..23]);
                23
            }
            0x35 => {
                self.write_buttons(buf);
                reports::append_accelerometer(&mut buf[2..7], &self.input.accel);
                self.write_extension(&mut buf[7..23]);
                23
            }
            0x36 => {
                self.write_buttons(buf);
                reports::ir_basic(&self.input.ir, &mut buf[4..14]);
                self.write_extension(&mut buf[14..23]);
                23
            }
            0x37 => {
                self.write_buttons(buf);
                reports::append_accelerometer(&mut buf[2..7], &self.input.accel);
                reports::ir_basic(&self.input.ir, &mut buf[7..17]);
                self.write_extension(&mut buf[17..23]);
                23
            }
            0x3D => {
                self.write_extension(&mut buf[2..23]);
                23
            }
            0x3E | 0x3F => {
                self.write_buttons(buf);
                self.write_interleaved(buf);
                23
            }
            _ => {
                self.write_buttons(buf);
                4
            }
        }
    }

    // --- aggregated input ------------------------------------------

    /// Applies one checksum-valid input slice from the aggregation MCU.
    pub fn apply_input(&mut self, pool: &mut ReportPool, raw: &DeviceInput) {
        let ext = Extension::from_wire(raw.extension);
        if ext != self.extension {
            self.extension = ext;
            self.init_extension();
            self.replug(pool);
        }

        if raw.buttons != self.last_buttons {
            self.last_buttons = raw.buttons;
            self.report_changed = true;
        }

        let [b1, b2, b3, b4] = raw.buttons;

        let mut core = CoreButtons::empty();
        core.set(CoreButtons::A, b1 & 0x01 != 0);
        core.set(CoreButtons::B, b1 & 0x02 != 0);
        core.set(CoreButtons::ONE, b1 & 0x04 != 0);
        core.set(CoreButtons::TWO, b1 & 0x08 != 0);
        core.set(CoreButtons::UP, b1 & 0x10 != 0);
        core.set(CoreButtons::DOWN, b1 & 0x20 != 0);
        core.set(CoreButtons::RIGHT, b1 & 0x40 != 0);
        core.set(CoreButtons::LEFT, b1 & 0x80 != 0);
        core.set(CoreButtons::PLUS, b2 & 0x01 != 0);
        core.set(CoreButtons::MINUS, b2 & 0x02 != 0);
        core.set(CoreButtons::HOME, b2 & 0x04 != 0);

        let mut classic = ClassicButtons::empty();
        classic.set(ClassicButtons::PLUS, b2 & 0x08 != 0);
        classic.set(ClassicButtons::MINUS, b2 & 0x10 != 0);
        classic.set(ClassicButtons::HOME, b2 & 0x20 != 0);
        classic.set(ClassicButtons::A, b3 & 0x01 != 0);
        classic.set(ClassicButtons::B, b3 & 0x02 != 0);
        classic.set(ClassicButtons::X, b3 & 0x04 != 0);
        classic.set(ClassicButtons::Y, b3 & 0x08 != 0);
        classic.set(ClassicButtons::UP, b3 & 0x10 != 0);
        classic.set(ClassicButtons::DOWN, b3 & 0x20 != 0);
        classic.set(ClassicButtons::RIGHT, b3 & 0x40 != 0);
        classic.set(ClassicButtons::LEFT, b3 & 0x80 != 0);
        classic.set(ClassicButtons::RT, b4 & 0x01 != 0);
        classic.set(ClassicButtons::ZR, b4 & 0x02 != 0);
        classic.set(ClassicButtons::LT, b4 & 0x04 != 0);
        classic.set(ClassicButtons::ZL, b4 & 0x08 != 0);

        // Without a classic controller attached, its right trigger
        // doubles as B so the pad stays usable in core-only games.
        if self.extension != Extension::Classic && classic.contains(ClassicButtons::ZR) {
            core |= CoreButtons::B;
        }

        self.input.buttons = core;
        self.input.classic.buttons = classic;
        self.input.nunchuk.c = b2 & 0x40 != 0;
        self.input.nunchuk.z = b2 & 0x80 != 0;

        self.input.classic.lx = raw.axes[0] >> 2;
        self.input.classic.ly = raw.axes[1] >> 2;
        self.input.classic.rx = raw.axes[2] >> 3;
        self.input.classic.ry = raw.axes[3] >> 3;
        self.input.nunchuk.x = raw.axes[0];
        self.input.nunchuk.y = raw.axes[1];

        self.input.accel = raw.accel;
        self.input.nunchuk.accel = raw.ext_accel;

        for (i, obj) in self.input.ir.iter_mut().enumerate() {
            *obj = IrObject::CLEARED;
            if i < 2 {
                let (x, y) = raw.ir[i];
                obj.x = x;
                obj.y = y;
                obj.size = 8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(dev: &mut Wiimote, pool: &mut ReportPool, bytes: &[u8]) {
        dev.on_output_report(pool, bytes);
    }

    fn drain(dev: &mut Wiimote, pool: &mut ReportPool, now: u32) -> Option<Vec<u8>> {
        let mut buf = [0u8; 32];
        let n = dev.next_input_report(pool, now, &mut buf);
        (n > 0).then(|| buf[..n].to_vec())
    }

    #[test]
    fn led_report_is_acked() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(&mut dev, &mut pool, &[0xA2, 0x11, 0x10]);
        assert_eq!(dev.player_number(), 1);

        let ack = drain(&mut dev, &mut pool, 100).unwrap();
        assert_eq!(ack, vec![0xA1, 0x22, 0x00, 0x00, 0x11, 0x00]);
    }

    #[test]
    fn status_request_reports_leds_and_battery() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(&mut dev, &mut pool, &[0xA2, 0x11, 0x20]);
        drain(&mut dev, &mut pool, 100).unwrap();
        output(&mut dev, &mut pool, &[0xA2, 0x15, 0x00]);

        let status = drain(&mut dev, &mut pool, 200).unwrap();
        assert_eq!(status.len(), 8);
        assert_eq!(status[1], 0x20);
        assert_eq!(status[4] >> 4, 0x02);
        assert_eq!(status[7], 0xFF);
    }

    #[test]
    fn register_write_roundtrips_through_read() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        // Write 4 bytes at a4:0x10.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x16, 0x04, 0xA4, 0x00, 0x10, 0x04, 0xDE, 0xAD, 0xBE, 0xEF],
        );
        let ack = drain(&mut dev, &mut pool, 100).unwrap();
        assert_eq!(&ack[4..6], &[0x16, 0x00]);

        // Read them back.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x04, 0xA4, 0x00, 0x10, 0x00, 0x04],
        );
        let reply = drain(&mut dev, &mut pool, 200).unwrap();
        assert_eq!(reply[1], 0x21);
        assert_eq!(reply[4], 0x30); // size 4, no error
        assert_eq!(&reply[5..7], &[0x00, 0x10]);
        assert_eq!(&reply[7..11], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn eeprom_read_past_window_faults() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x00, 0x00, 0x16, 0xF8, 0x00, 0x10],
        );
        let reply = drain(&mut dev, &mut pool, 100).unwrap();
        assert_eq!(reply[1], 0x21);
        assert_eq!(reply[4] & 0x0F, 0x8);
    }

    #[test]
    fn eeprom_read_chunks_exact_final_size() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        // 32 bytes: two full chunks, both reporting size 16.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x00, 0x00, 0x00, 0x10, 0x00, 0x20],
        );
        let first = drain(&mut dev, &mut pool, 100).unwrap();
        let second = drain(&mut dev, &mut pool, 101).unwrap();
        assert_eq!(first[4], 0xF0);
        assert_eq!(second[4], 0xF0);
        assert_eq!(&first[5..7], &[0x00, 0x10]);
        assert_eq!(&second[5..7], &[0x00, 0x20]);
        assert!(drain(&mut dev, &mut pool, 102).is_none());
    }

    #[test]
    fn motionplus_activation_emits_ack_and_status_pair() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        // Write 0x04 to a6:0xFE.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x16, 0x04, 0xA6, 0x00, 0xFE, 0x01, 0x04],
        );

        let ack = drain(&mut dev, &mut pool, 100).unwrap();
        assert_eq!(ack[1], 0x22);
        let unplugged = drain(&mut dev, &mut pool, 101).unwrap();
        assert_eq!(unplugged[1], 0x20);
        assert_eq!(unplugged[4] & 0x02, 0x00);
        let replugged = drain(&mut dev, &mut pool, 102).unwrap();
        assert_eq!(replugged[1], 0x20);
        assert_eq!(replugged[4] & 0x02, 0x02);

        assert_eq!(dev.wmp, MotionPlusMode::Active);
    }

    #[test]
    fn live_motionplus_redirects_extension_reads() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x16, 0x04, 0xA6, 0x00, 0xFE, 0x01, 0x04],
        );
        while drain(&mut dev, &mut pool, 100).is_some() {}

        // Identity at a4:0xFA now comes from the MotionPlus image.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x04, 0xA4, 0x00, 0xFA, 0x00, 0x06],
        );
        let reply = drain(&mut dev, &mut pool, 200).unwrap();
        assert_eq!(&reply[7..13], &[0x00, 0x00, 0xA4, 0x20, 0x04, 0x05]);

        // Direct reads of the a6 region fault while live.
        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x04, 0xA6, 0x00, 0x00, 0x00, 0x06],
        );
        let fault = drain(&mut dev, &mut pool, 300).unwrap();
        assert_eq!(fault[4] & 0x0F, 0x7);
    }

    #[test]
    fn progress_byte_flips_after_repeated_polls() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x16, 0x04, 0xA6, 0x00, 0xFE, 0x01, 0x04],
        );
        while drain(&mut dev, &mut pool, 100).is_some() {}

        let mut now = 200;
        for _ in 0..WMP_READY_READ_COUNT {
            output(
                &mut dev,
                &mut pool,
                &[0xA2, 0x17, 0x04, 0xA4, 0x00, 0xF7, 0x00, 0x01],
            );
            now += 20;
            drain(&mut dev, &mut pool, now).unwrap();
        }
        assert_eq!(dev.regs_a6[0xF7], 0x0E);
    }

    #[test]
    fn key_write_enables_encryption() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);
        dev.extension = Extension::Nunchuk;
        dev.init_extension();

        let mut report = vec![0xA2, 0x16, 0x04, 0xA4, 0x00, 0x40, 0x0C];
        report.extend_from_slice(&[0x11; 12]);
        output(&mut dev, &mut pool, &report);
        let mut report = vec![0xA2, 0x16, 0x04, 0xA4, 0x00, 0x4C, 0x04];
        report.extend_from_slice(&[0x22; 4]);
        output(&mut dev, &mut pool, &report);
        assert!(dev.encrypted);

        while drain(&mut dev, &mut pool, 100).is_some() {}

        // An encrypted extension block decrypts back to the plain one.
        dev.continuous = true;
        output(&mut dev, &mut pool, &[0xA2, 0x12, 0x04, 0x35]);
        drain(&mut dev, &mut pool, 200).unwrap();
        let encrypted = drain(&mut dev, &mut pool, 220).unwrap();

        let mut plain = [0u8; 6];
        let mut phase = false;
        reports::extension(&dev.input, dev.ext_report_kind, &mut phase, &mut plain);
        let mut block: [u8; 6] = encrypted[7..13].try_into().unwrap();
        dev.cipher.decrypt(&mut block);
        assert_eq!(block, plain);
    }

    #[test]
    fn interleaved_modes_alternate() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);
        dev.continuous = true;
        output(&mut dev, &mut pool, &[0xA2, 0x12, 0x04, 0x3E]);
        drain(&mut dev, &mut pool, 100).unwrap();

        let first = drain(&mut dev, &mut pool, 120).unwrap();
        let second = drain(&mut dev, &mut pool, 140).unwrap();
        let third = drain(&mut dev, &mut pool, 160).unwrap();
        assert_eq!(first[1], 0x3E);
        assert_eq!(second[1], 0x3F);
        assert_eq!(third[1], 0x3E);
        assert_eq!(first.len(), 23);
    }

    #[test]
    fn every_report_mode_assembles_to_its_fixed_length() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);
        dev.continuous = true;

        let expected: [(u8, usize); 11] = [
            (0x30, 4),
            (0x31, 7),
            (0x32, 12),
            (0x33, 19),
            (0x34, 23),
            (0x35, 23),
            (0x36, 23),
            (0x37, 23),
            (0x3D, 23),
            (0x3E, 23),
            (0x3F, 23),
        ];
        let mut now = 100;
        for (mode, len) in expected {
            dev.report_mode = mode;
            let rpt = drain(&mut dev, &mut pool, now).unwrap();
            assert_eq!(rpt.len(), len, "mode {mode:#04X}");
            assert_eq!(rpt[0], 0xA1);
            assert_eq!(rpt[1], mode);
            now += 20;
        }
    }

    #[test]
    fn buttons_with_ext8_mode_carries_the_extension_block() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);
        dev.extension = Extension::Nunchuk;
        dev.init_extension();
        dev.continuous = true;
        dev.report_mode = 0x32;

        let rpt = drain(&mut dev, &mut pool, 100).unwrap();
        assert_eq!(rpt.len(), 12);

        let mut block = [0u8; 6];
        let mut phase = false;
        reports::extension(
            &dev.input,
            reports::EXT_KIND_NUNCHUK,
            &mut phase,
            &mut block,
        );
        assert_eq!(&rpt[4..10], &block);
        assert_eq!(&rpt[10..12], &[0, 0]);
    }

    #[test]
    fn rate_limit_holds_back_periodic_reports() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);
        dev.continuous = true;

        assert!(drain(&mut dev, &mut pool, 20).is_some());
        assert!(drain(&mut dev, &mut pool, 25).is_none());
        assert!(drain(&mut dev, &mut pool, 31).is_some());
    }

    #[test]
    fn non_continuous_mode_waits_for_change() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        assert!(drain(&mut dev, &mut pool, 100).is_none());

        let mut raw = DeviceInput::default();
        raw.buttons = [0x01, 0, 0, 0];
        dev.apply_input(&mut pool, &raw);
        let rpt = drain(&mut dev, &mut pool, 200).unwrap();
        assert_eq!(rpt[1], 0x30);
        assert_eq!(rpt[3] & 0x08, 0x08); // A pressed

        // No further change, no further report.
        assert!(drain(&mut dev, &mut pool, 300).is_none());
    }

    #[test]
    fn reset_returns_queued_slots() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        output(
            &mut dev,
            &mut pool,
            &[0xA2, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40],
        );
        assert!(pool.free_count() < pool::POOL_SIZE);

        dev.reset(&mut pool, 500);
        assert_eq!(pool.free_count(), pool::POOL_SIZE);
        assert_eq!(dev.reset_at_ms, 500);
    }

    #[test]
    fn extension_change_replugs() {
        let mut pool = ReportPool::new();
        let mut dev = Wiimote::new(0x000B);

        let mut raw = DeviceInput::default();
        raw.extension = 1;
        dev.apply_input(&mut pool, &raw);

        let unplugged = drain(&mut dev, &mut pool, 100).unwrap();
        let replugged = drain(&mut dev, &mut pool, 120).unwrap();
        assert_eq!(unplugged[4] & 0x02, 0x00);
        assert_eq!(replugged[4] & 0x02, 0x02);

        // Identity registers now advertise a nunchuk.
        assert_eq!(&dev.regs_a4[0xFA..], &[0x00, 0x00, 0xA4, 0x20, 0x00, 0x00]);
    }
}
