use gateway_protocol::ChecksumType;
use md5::{Digest, Md5};
use sha2::Sha256;

/// CCITT-16 (poly 0x1021, init 0xFFFF). The schema's checksum data model
/// doesn't pin a CRC16 variant; this one is chosen for its ubiquity in
/// serial/telemetry framing.
fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Compute the configured checksum over `payload`, returning it as raw
/// bytes sized to match `ChecksumSpec::length` conventions (big-endian for
/// numeric checksums).
pub fn compute(checksum_type: ChecksumType, payload: &[u8]) -> Vec<u8> {
    match checksum_type {
        ChecksumType::None => Vec::new(),
        ChecksumType::Crc16 => crc16_ccitt(payload).to_be_bytes().to_vec(),
        ChecksumType::Crc32 => crc32fast::hash(payload).to_be_bytes().to_vec(),
        ChecksumType::Md5 => Md5::digest(payload).to_vec(),
        ChecksumType::Sha256 => Sha256::digest(payload).to_vec(),
        ChecksumType::SimpleSum => {
            let sum: u8 = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            vec![sum]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_sum_wraps_mod_256() {
        assert_eq!(compute(ChecksumType::SimpleSum, &[0xFF, 0x02]), vec![0x01]);
    }

    #[test]
    fn crc32_matches_crc32fast_directly() {
        let data = b"hello world";
        assert_eq!(compute(ChecksumType::Crc32, data), crc32fast::hash(data).to_be_bytes().to_vec());
    }
}
