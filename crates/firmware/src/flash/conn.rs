//! Wireless connection settings.
//!
//! Three 0x100-byte records sit directly below the user-config area. Units
//! with successor-platform settings add three 0x200-byte extended records
//! below those; each extended record embeds a base record in its first
//! half.

use byteorder::{ByteOrder, LittleEndian};

use common::util::crc16;

/// Size of one connection record.
pub const CONN_SIZE: usize = 0x100;
/// Size of one extended connection record.
pub const CONN_EX_SIZE: usize = 0x200;
/// Records per block.
pub const CONN_COUNT: usize = 3;
/// Size of the connection block below the user-config area.
pub const CONN_BLOCK: usize = 0x400;
/// Size of the extended connection block below the connection block.
pub const CONN_EX_BLOCK: usize = 0x600;

const SET_TYPE_OFFSET: usize = 0xE7;
const CRC_OFFSET: usize = 0xFE;
const EX_CRC_OFFSET: usize = 0x1FE;

/// A record whose set type is 0xFF has never been configured.
pub fn is_configured(record: &[u8]) -> bool {
    record[SET_TYPE_OFFSET] != 0xFF
}

/// Computes the CRC of a base record (also the first half of an extended
/// record).
pub fn record_crc(record: &[u8]) -> u16 {
    crc16(&record[..CONN_SIZE - 2], 0)
}

pub fn stored_crc(record: &[u8]) -> u16 {
    LittleEndian::read_u16(&record[CRC_OFFSET..])
}

pub fn set_stored_crc(record: &mut [u8], crc: u16) {
    LittleEndian::write_u16(&mut record[CRC_OFFSET..], crc);
}

/// Computes the CRC of the extended half of an extended record.
pub fn record_ex_crc(record: &[u8]) -> u16 {
    crc16(&record[CONN_SIZE..CONN_EX_SIZE - 2], 0)
}

pub fn stored_ex_crc(record: &[u8]) -> u16 {
    LittleEndian::read_u16(&record[EX_CRC_OFFSET..])
}

pub fn set_stored_ex_crc(record: &mut [u8], crc: u16) {
    LittleEndian::write_u16(&mut record[EX_CRC_OFFSET..], crc);
}

/// Security mode of a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Security {
    Open,
    /// WEP with the given key length in bits.
    Wep(u16),
    /// WPA family, named per the stored mode value.
    Wpa(&'static str),
}

/// Decoded display view of one connection record.
#[derive(Clone, Debug)]
pub struct ConnInfo {
    pub configured: bool,
    pub ssid: String,
    pub security: Security,
    pub ip_addr: u32,
    pub gateway: u32,
    pub dns: [u32; 2],
    pub subnet_mask: u8,
    /// Only present on extended records.
    pub mtu: u16,
    /// User id as shown by the online service (scaled by 1000).
    pub dwc_user_id: u64,
}

fn ssid_string(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '?' })
        .collect()
}

/// Decodes a base or extended record for display. `extended` selects the
/// extended interpretation (WPA modes, MTU).
pub fn conn_info(record: &[u8], extended: bool) -> ConnInfo {
    let wep_mode = record[0xE6] & 3;
    let wpa_mode = if extended { record[0x181] } else { 0 };

    let security = if wpa_mode >= 4 {
        let name = match wpa_mode {
            4 => "WPA-PSK (TKIP)",
            5 => "WPA2-PSK (TKIP)",
            6 => "WPA-PSK (AES)",
            _ => "WPA2-PSK (AES)",
        };
        Security::Wpa(name)
    } else {
        match wep_mode {
            0 => Security::Open,
            1 => Security::Wep(40),
            2 => Security::Wep(104),
            _ => Security::Wep(128),
        }
    };

    let id_lo = LittleEndian::read_u32(&record[0xF0..]) as u64;
    let id_hi = (LittleEndian::read_u16(&record[0xF4..]) & 0x7FF) as u64;

    ConnInfo {
        configured: is_configured(record),
        ssid: ssid_string(&record[0x40..0x60]),
        security,
        ip_addr: LittleEndian::read_u32(&record[0xC0..]),
        gateway: LittleEndian::read_u32(&record[0xC4..]),
        dns: [
            LittleEndian::read_u32(&record[0xC8..]),
            LittleEndian::read_u32(&record[0xCC..]),
        ],
        subnet_mask: record[0xD0],
        mtu: if extended { LittleEndian::read_u16(&record[0xEA..]) } else { 0 },
        dwc_user_id: (id_lo | (id_hi << 32)).wrapping_mul(1000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_record() {
        let mut record = vec![0xFFu8; CONN_SIZE];
        assert!(!is_configured(&record));
        record[SET_TYPE_OFFSET] = 0;
        assert!(is_configured(&record));
    }

    #[test]
    fn crc_covers_all_but_the_stored_field() {
        let mut record = vec![0u8; CONN_SIZE];
        record[0x40] = b'n';
        let crc = record_crc(&record);
        set_stored_crc(&mut record, crc);
        assert_eq!(record_crc(&record), stored_crc(&record));

        // the stored CRC itself is outside the summed range
        set_stored_crc(&mut record, 0x1234);
        assert_eq!(record_crc(&record), crc);
    }

    #[test]
    fn ex_crc_covers_the_extended_half() {
        let mut record = vec![0u8; CONN_EX_SIZE];
        record[0x120] = b'p'; // passphrase area
        let crc = record_ex_crc(&record);
        set_stored_ex_crc(&mut record, crc);
        assert_eq!(record_ex_crc(&record), stored_ex_crc(&record));

        // base-half changes do not affect the extended CRC
        record[0x40] = b'x';
        assert_eq!(record_ex_crc(&record), crc);
    }

    #[test]
    fn decode_basic_record() {
        let mut record = vec![0u8; CONN_SIZE];
        record[0x40..0x47].copy_from_slice(b"hotspot");
        record[0xE6] = 2; // WEP 104
        LittleEndian::write_u32(&mut record[0xC0..], 0x0100A8C0); // 192.168.0.1
        record[SET_TYPE_OFFSET] = 1;

        let info = conn_info(&record, false);
        assert!(info.configured);
        assert_eq!(info.ssid, "hotspot");
        assert_eq!(info.security, Security::Wep(104));
        assert_eq!(info.ip_addr, 0x0100A8C0);
    }

    #[test]
    fn decode_extended_record() {
        let mut record = vec![0u8; CONN_EX_SIZE];
        record[0x181] = 7; // WPA2 AES
        LittleEndian::write_u16(&mut record[0xEA..], 1400);
        record[SET_TYPE_OFFSET] = 0;

        let info = conn_info(&record, true);
        assert_eq!(info.security, Security::Wpa("WPA2-PSK (AES)"));
        assert_eq!(info.mtu, 1400);
    }
}
