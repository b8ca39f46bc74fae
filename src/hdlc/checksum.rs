//! CRC-16 used for header and payload checksums.

use crc::{CRC_16_XMODEM, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Check `data` against a received little-endian checksum.
pub fn verify(data: &[u8], expected: u16) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-16/XMODEM check value
        assert_eq!(checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_verify() {
        let data = [0x14, 0x05, 0x00, 0x0C, 0x00];
        let fcs = checksum(&data);
        assert!(verify(&data, fcs));
        assert!(!verify(&data, fcs ^ 1));
    }

    #[test]
    fn test_empty() {
        assert_eq!(checksum(&[]), 0);
    }
}
