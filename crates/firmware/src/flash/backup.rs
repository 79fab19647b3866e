//! Settings backup records.
//!
//! `clean` captures the four wipeable regions into a fixed-size record that
//! `restore` can copy back later. Each region is stored at full capacity
//! with a little-endian length prefix counting its valid bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::Error;

/// Capacity of the wireless init area (0x2A..0x200, stored from 0x2A).
pub const WL_CAPACITY: usize = 0x200;
/// Capacity of the connection settings block.
pub const CONN_CAPACITY: usize = 0x400;
/// Capacity of the extended connection settings block.
pub const CONN_EX_CAPACITY: usize = 0x600;
/// Capacity of the user-config area.
pub const USER_CONFIG_CAPACITY: usize = 0x200;

/// Exact size of a serialised backup record.
pub const BACKUP_SIZE: usize =
    2 + WL_CAPACITY + 2 + CONN_CAPACITY + 2 + CONN_EX_CAPACITY + 2 + USER_CONFIG_CAPACITY;

static_assert!(BACKUP_SIZE == 0x1706);

/// An in-memory settings backup.
#[derive(Clone)]
pub struct SettingsBackup {
    pub wl_table: [u8; WL_CAPACITY],
    pub wl_size: u16,
    pub conn: [u8; CONN_CAPACITY],
    pub conn_size: u16,
    pub conn_ex: [u8; CONN_EX_CAPACITY],
    pub conn_ex_size: u16,
    pub user_config: [u8; USER_CONFIG_CAPACITY],
    pub user_config_size: u16,
}

impl Default for SettingsBackup {
    fn default() -> SettingsBackup {
        SettingsBackup {
            wl_table: [0; WL_CAPACITY],
            wl_size: 0,
            conn: [0; CONN_CAPACITY],
            conn_size: 0,
            conn_ex: [0; CONN_EX_CAPACITY],
            conn_ex_size: 0,
            user_config: [0; USER_CONFIG_CAPACITY],
            user_config_size: 0,
        }
    }
}

impl SettingsBackup {
    /// Serialises the record to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BACKUP_SIZE);

        let mut size = [0u8; 2];
        LittleEndian::write_u16(&mut size, self.wl_size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&self.wl_table);

        LittleEndian::write_u16(&mut size, self.conn_size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&self.conn);

        LittleEndian::write_u16(&mut size, self.conn_ex_size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&self.conn_ex);

        LittleEndian::write_u16(&mut size, self.user_config_size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&self.user_config);

        out
    }

    /// Parses a record; the input must be exactly [`BACKUP_SIZE`] bytes.
    pub fn from_bytes(data: &[u8]) -> Result<SettingsBackup, Error> {
        if data.len() != BACKUP_SIZE {
            return Err(Error::InvalidBackup);
        }

        let mut backup = SettingsBackup::default();
        let mut at = 0;

        backup.wl_size = LittleEndian::read_u16(&data[at..]);
        at += 2;
        backup.wl_table.copy_from_slice(&data[at..at + WL_CAPACITY]);
        at += WL_CAPACITY;

        backup.conn_size = LittleEndian::read_u16(&data[at..]);
        at += 2;
        backup.conn.copy_from_slice(&data[at..at + CONN_CAPACITY]);
        at += CONN_CAPACITY;

        backup.conn_ex_size = LittleEndian::read_u16(&data[at..]);
        at += 2;
        backup.conn_ex.copy_from_slice(&data[at..at + CONN_EX_CAPACITY]);
        at += CONN_EX_CAPACITY;

        backup.user_config_size = LittleEndian::read_u16(&data[at..]);
        at += 2;
        backup.user_config.copy_from_slice(&data[at..at + USER_CONFIG_CAPACITY]);

        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialised_size_is_fixed() {
        let backup = SettingsBackup::default();
        assert_eq!(backup.to_bytes().len(), BACKUP_SIZE);
    }

    #[test]
    fn round_trip() {
        let mut backup = SettingsBackup::default();
        backup.wl_size = 0x1D6;
        backup.wl_table[0] = 0xAB;
        backup.conn_size = 0x400;
        backup.conn[0x3FF] = 0xCD;
        backup.user_config_size = 0x200;
        backup.user_config[0x100] = 0xEF;

        let bytes = backup.to_bytes();
        let parsed = SettingsBackup::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.wl_size, 0x1D6);
        assert_eq!(parsed.wl_table[0], 0xAB);
        assert_eq!(parsed.conn[0x3FF], 0xCD);
        assert_eq!(parsed.conn_ex_size, 0);
        assert_eq!(parsed.user_config[0x100], 0xEF);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn wrong_size_is_rejected() {
        assert!(SettingsBackup::from_bytes(&[0u8; 100]).is_err());
        assert!(SettingsBackup::from_bytes(&vec![0u8; BACKUP_SIZE + 1]).is_err());
    }
}
