//! Synthesized remote EEPROM image.
//!
//! The console reads accelerometer calibration out of the remote's
//! EEPROM during pairing. The image here is zero-filled except for the
//! two redundant calibration blocks, which hold neutral values (zero-g
//! at 0x80 on each axis, one-g at 0x9A on Z-up orientation).
//!
//! Wire addresses map into the image at an offset of [`BLOB_BASE`]; the
//! addressable window tops out at [`ADDRESS_LIMIT`].

/// Backing image length.
pub const EEPROM_LEN: usize = 0x1770;

/// Wire offset + `BLOB_BASE` indexes the image.
pub const BLOB_BASE: usize = 0x70;

/// Reads or writes with `offset + size` beyond this fail with error 8.
pub const ADDRESS_LIMIT: u32 = 0x16FF;

// Wire addresses of the two calibration copies.
const CAL_FIRST: usize = 0x16 + BLOB_BASE;
const CAL_SECOND: usize = 0x20 + BLOB_BASE;

// Zero-g x/y/z, packed LSBs, one-g x/y/z, packed LSBs, volume.
const CAL_BLOCK: [u8; 9] = [0x80, 0x80, 0x80, 0x00, 0x9A, 0x9A, 0x9A, 0x00, 0x33];

const fn cal_checksum() -> u8 {
    let mut sum = 0x55u8;
    let mut i = 0;
    while i < CAL_BLOCK.len() {
        sum = sum.wrapping_add(CAL_BLOCK[i]);
        i += 1;
    }
    sum
}

const fn build_image() -> [u8; EEPROM_LEN] {
    let mut image = [0u8; EEPROM_LEN];
    let mut i = 0;
    while i < CAL_BLOCK.len() {
        image[CAL_FIRST + i] = CAL_BLOCK[i];
        image[CAL_SECOND + i] = CAL_BLOCK[i];
        i += 1;
    }
    image[CAL_FIRST + CAL_BLOCK.len()] = cal_checksum();
    image[CAL_SECOND + CAL_BLOCK.len()] = cal_checksum();
    image
}

pub static IMAGE: [u8; EEPROM_LEN] = build_image();
