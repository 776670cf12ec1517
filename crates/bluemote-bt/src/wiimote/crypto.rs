//! Extension-register encryption.
//!
//! When the console finishes writing a 16-byte key into the extension
//! register block, the remote derives a pair of 8-entry tables and from
//! then on transforms extension report bytes with
//! `out[i] = (in[i] - ft[i]) ^ sb[i]`.
//!
//! The table derivation here is a deterministic mix of the two key
//! halves, not the remote's real schedule; encrypt/decrypt are exact
//! inverses of each other, which is what the report engine relies on.

#[derive(Clone, Copy, Default)]
pub struct ExtCipher {
    ft: [u8; 8],
    sb: [u8; 8],
}

impl ExtCipher {
    pub fn derive(key: &[u8; 16]) -> Self {
        let mut ft = [0u8; 8];
        let mut sb = [0u8; 8];
        for i in 0..8 {
            ft[i] = key[i].wrapping_add(key[i + 8]);
            sb[i] = key[i] ^ key[i + 8];
        }
        ExtCipher { ft, sb }
    }

    /// Transforms outgoing extension bytes in place. Only the first 6
    /// extension bytes of a report are encrypted.
    pub fn encrypt(&self, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b = b.wrapping_sub(self.ft[i % 8]) ^ self.sb[i % 8];
        }
    }

    pub fn decrypt(&self, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b = (*b ^ self.sb[i % 8]).wrapping_add(self.ft[i % 8]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = [
            0x58, 0xB4, 0x81, 0xA1, 0x15, 0x3D, 0xE7, 0xA7, 0x7A, 0xCE, 0x56, 0xD3, 0xEF, 0xE7,
            0x0F, 0x0E,
        ];
        let cipher = ExtCipher::derive(&key);

        let mut block = [0x80, 0x7F, 0x00, 0xFF, 0x12, 0x34];
        let original = block;
        cipher.encrypt(&mut block);
        assert_ne!(block, original);
        cipher.decrypt(&mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn derivation_is_deterministic() {
        let key = [7u8; 16];
        let a = ExtCipher::derive(&key);
        let b = ExtCipher::derive(&key);
        let mut x = [1u8, 2, 3, 4, 5, 6];
        let mut y = x;
        a.encrypt(&mut x);
        b.encrypt(&mut y);
        assert_eq!(x, y);
    }
}
