//! The redundant user-configuration slots.
//!
//! Two 0x100-byte slots hold the owner settings; the console alternates
//! between them on every save. Arbitration picks the slot whose CRC checks
//! out, or the newer save count when both do.

use byteorder::{ByteOrder, LittleEndian};

use common::str::Ucs2;
use common::util::crc16;

use crate::flash::header;

/// Size of one user-config slot.
pub const SLOT_SIZE: usize = 0x100;
/// Size of the whole user-config area (two slots).
pub const AREA_SIZE: usize = 2 * SLOT_SIZE;

/// Size of the base record, including its save count and CRC.
pub const RECORD_SIZE: usize = 0x74;
/// Size of the extended record that follows the base record.
pub const EX_RECORD_SIZE: usize = 0x8C;

/// The only recognised schema version.
pub const VERSION: u8 = 5;

static_assert!(RECORD_SIZE + EX_RECORD_SIZE == SLOT_SIZE);

const SAVE_COUNT_OFFSET: usize = 0x70;
const CRC_OFFSET: usize = 0x72;
const EX_OFFSET: usize = 0x74;
const EX_CRC_OFFSET: usize = 0xFE;
const LANGUAGES_OFFSET: usize = 0x76;

/// Language mask written by clean on Korean units.
pub const LANGUAGES_KOREAN: u16 = 0x00AF;
/// Language mask written by clean elsewhere.
pub const LANGUAGES_DEFAULT: u16 = 0x007E;

/// Computes the CRC of a slot's base record.
pub fn slot_crc(slot: &[u8]) -> u16 {
    crc16(&slot[..RECORD_SIZE - 4], 0xFFFF)
}

/// Computes the CRC of a slot's extended record.
pub fn slot_ex_crc(slot: &[u8]) -> u16 {
    crc16(&slot[EX_OFFSET..EX_OFFSET + EX_RECORD_SIZE - 2], 0xFFFF)
}

pub fn stored_crc(slot: &[u8]) -> u16 {
    LittleEndian::read_u16(&slot[CRC_OFFSET..])
}

pub fn stored_ex_crc(slot: &[u8]) -> u16 {
    LittleEndian::read_u16(&slot[EX_CRC_OFFSET..])
}

pub fn save_count(slot: &[u8]) -> u16 {
    LittleEndian::read_u16(&slot[SAVE_COUNT_OFFSET..]) & 0x7F
}

pub fn version(slot: &[u8]) -> u8 {
    slot[0]
}

pub fn ex_version(slot: &[u8]) -> u8 {
    slot[EX_OFFSET]
}

/// Selects the effective slot within the user-config area.
///
/// The slot whose CRC matches wins; when both match, the save counts are
/// compared modulo 128 and the newer slot wins. `None` means neither slot
/// is intact.
pub fn effective_slot(area: &[u8]) -> Option<usize> {
    let slot0 = &area[..SLOT_SIZE];
    let slot1 = &area[SLOT_SIZE..AREA_SIZE];

    let ok0 = slot_crc(slot0) == stored_crc(slot0);
    let ok1 = slot_crc(slot1) == stored_crc(slot1);

    match (ok0, ok1) {
        (false, false) => None,
        (true, false) => Some(0),
        (false, true) => Some(1),
        (true, true) => {
            if (save_count(slot0) + 1) & 0x7F == save_count(slot1) {
                Some(1)
            } else {
                Some(0)
            }
        }
    }
}

/// Rewrites a slot to factory-fresh contents.
///
/// The save count keeps the slot index so arbitration stays stable, the
/// body is zeroed, and the extended record follows the unit's locale:
/// Korean and Chinese non-Lite units expect the 0xFF fill.
pub fn write_fresh_slot(slot: &mut [u8], index: usize, ipl2_type: u8) {
    for b in slot[..SLOT_SIZE].iter_mut() {
        *b = 0;
    }

    slot[0] = VERSION;
    LittleEndian::write_u16(&mut slot[SAVE_COUNT_OFFSET..], (index & 0x7F) as u16);
    let crc = slot_crc(slot);
    LittleEndian::write_u16(&mut slot[CRC_OFFSET..], crc);

    if header::has_ex_config(ipl2_type) {
        let korean = ipl2_type != header::IPL2_NORMAL && ipl2_type & header::IPL2_KOREAN != 0;
        let chinese = ipl2_type != header::IPL2_NORMAL && ipl2_type & header::IPL2_CHINESE != 0;
        let usg = ipl2_type != header::IPL2_NORMAL && ipl2_type & header::IPL2_USG != 0;

        if korean || (chinese && !usg) {
            for b in slot[EX_OFFSET..EX_OFFSET + EX_RECORD_SIZE].iter_mut() {
                *b = 0xFF;
            }
        }
        slot[EX_OFFSET] = 1; // exVersion
        slot[EX_OFFSET + 1] = 1; // exLanguage, English
        let languages = if korean { LANGUAGES_KOREAN } else { LANGUAGES_DEFAULT };
        LittleEndian::write_u16(&mut slot[LANGUAGES_OFFSET..], languages);

        let ex_crc = slot_ex_crc(slot);
        LittleEndian::write_u16(&mut slot[EX_CRC_OFFSET..], ex_crc);
    } else {
        for b in slot[EX_OFFSET..EX_OFFSET + EX_RECORD_SIZE].iter_mut() {
            *b = 0xFF;
        }
    }
}

/// Favourite colour names, indexed by the stored value.
pub static COLOR_NAMES: [&str; 16] = [
    "Gray", "Brown", "Red", "Pink", "Orange", "Yellow", "Lime", "Green",
    "Dark Green", "Sea Green", "Turquoise", "Blue", "Dark Blue", "Purple",
    "Violet", "Magenta",
];

/// Language names, indexed by the stored value.
pub static LANGUAGE_NAMES: [&str; 8] = [
    "Japanese", "English", "French", "German", "Italian", "Spanish",
    "Chinese", "Korean",
];

/// Decoded owner settings from one slot.
#[derive(Clone, Debug)]
pub struct OwnerInfo {
    pub nickname: Ucs2<10>,
    pub comment: Ucs2<26>,
    pub birthday_month: u8,
    pub birthday_day: u8,
    pub favorite_color: u8,
    /// Base language field (3 bits of the options word).
    pub language: u8,
    /// Extended language field, meaningful only with extended settings.
    pub ex_language: u8,
}

impl OwnerInfo {
    /// The displayable language, depending on whether the unit carries
    /// extended settings.
    pub fn language_name(&self, has_ex_config: bool) -> Option<&'static str> {
        let lang = if has_ex_config {
            self.ex_language
        } else {
            if self.language > 5 {
                return None;
            }
            self.language
        };
        LANGUAGE_NAMES.get(lang as usize).copied()
    }
}

/// Decodes the owner settings stored in a slot.
pub fn owner_info(slot: &[u8]) -> OwnerInfo {
    let mut nickname = [0u16; 10];
    for (i, unit) in nickname.iter_mut().enumerate() {
        *unit = LittleEndian::read_u16(&slot[0x06 + i * 2..]);
    }
    let mut comment = [0u16; 26];
    for (i, unit) in comment.iter_mut().enumerate() {
        *unit = LittleEndian::read_u16(&slot[0x1C + i * 2..]);
    }

    OwnerInfo {
        nickname: Ucs2::new(nickname, slot[0x1A]),
        comment: Ucs2::new(comment, slot[0x50]),
        birthday_month: slot[0x03],
        birthday_day: slot[0x04],
        favorite_color: slot[0x02],
        language: (LittleEndian::read_u16(&slot[0x64..]) & 7) as u8,
        ex_language: slot[EX_OFFSET + 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::header::{IPL2_EXTENDED, IPL2_KOREAN, IPL2_NORMAL, IPL2_USG};

    fn area_with_counts(count0: u16, count1: u16) -> Vec<u8> {
        let mut area = vec![0u8; AREA_SIZE];
        for (i, &count) in [count0, count1].iter().enumerate() {
            let slot = &mut area[i * SLOT_SIZE..(i + 1) * SLOT_SIZE];
            slot[0] = VERSION;
            LittleEndian::write_u16(&mut slot[SAVE_COUNT_OFFSET..], count);
            let crc = slot_crc(slot);
            LittleEndian::write_u16(&mut slot[CRC_OFFSET..], crc);
        }
        area
    }

    #[test]
    fn newer_save_count_wins() {
        assert_eq!(effective_slot(&area_with_counts(5, 6)), Some(1));
        assert_eq!(effective_slot(&area_with_counts(6, 5)), Some(0));
        assert_eq!(effective_slot(&area_with_counts(3, 3)), Some(0));
    }

    #[test]
    fn save_count_wraps_modulo_128() {
        assert_eq!(effective_slot(&area_with_counts(127, 0)), Some(1));
        assert_eq!(effective_slot(&area_with_counts(0, 127)), Some(0));
    }

    #[test]
    fn crc_mismatch_disqualifies() {
        let mut area = area_with_counts(5, 6);
        area[SLOT_SIZE + 0x10] ^= 0xFF; // corrupt slot 1's body
        assert_eq!(effective_slot(&area), Some(0));

        area[0x10] ^= 0xFF; // corrupt slot 0 as well
        assert_eq!(effective_slot(&area), None);
    }

    #[test]
    fn fresh_slot_is_valid() {
        let mut slot = vec![0xA5u8; SLOT_SIZE];
        write_fresh_slot(&mut slot, 1, IPL2_NORMAL);
        assert_eq!(version(&slot), VERSION);
        assert_eq!(save_count(&slot), 1);
        assert_eq!(slot_crc(&slot), stored_crc(&slot));
        // no extended settings on the original model
        assert_eq!(slot[EX_OFFSET], 0xFF);
    }

    #[test]
    fn fresh_slot_extended_locales() {
        let mut slot = vec![0u8; SLOT_SIZE];
        write_fresh_slot(&mut slot, 0, IPL2_EXTENDED | IPL2_USG);
        assert_eq!(ex_version(&slot), 1);
        assert_eq!(LittleEndian::read_u16(&slot[LANGUAGES_OFFSET..]), LANGUAGES_DEFAULT);
        assert_eq!(slot_ex_crc(&slot), stored_ex_crc(&slot));

        let mut slot = vec![0u8; SLOT_SIZE];
        write_fresh_slot(&mut slot, 0, IPL2_EXTENDED | IPL2_USG | IPL2_KOREAN);
        assert_eq!(LittleEndian::read_u16(&slot[LANGUAGES_OFFSET..]), LANGUAGES_KOREAN);
        // sentinel fill shows through the untouched tail
        assert_eq!(slot[EX_OFFSET + 8], 0xFF);
        assert_eq!(slot_ex_crc(&slot), stored_ex_crc(&slot));
    }

    #[test]
    fn owner_info_decodes_strings() {
        let mut slot = vec![0u8; SLOT_SIZE];
        slot[0x02] = 11; // blue
        slot[0x03] = 7;
        slot[0x04] = 21;
        for (i, c) in "Ash".encode_utf16().enumerate() {
            LittleEndian::write_u16(&mut slot[0x06 + i * 2..], c);
        }
        slot[0x1A] = 3;
        LittleEndian::write_u16(&mut slot[0x64..], 1); // English

        let info = owner_info(&slot);
        assert_eq!(info.nickname.to_string_lossy(), "Ash");
        assert_eq!(info.favorite_color, 11);
        assert_eq!(info.language_name(false), Some("English"));
    }
}
