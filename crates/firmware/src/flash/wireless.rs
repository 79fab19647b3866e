//! The wireless RF/BB initialisation table.
//!
//! The table occupies 0x2A..0x200 of the image: identification fields, the
//! MAC address, channel permissions, MAC-layer init registers, baseband
//! init registers, and an RF-chip-specific register file at 0xCE. Its CRC
//! (init 0) covers `table_size` bytes starting at the size field, and must
//! be regenerated after any edit.

use byteorder::{ByteOrder, LittleEndian};
use phf::phf_map;

use common::util::crc16;

const CRC_OFFSET: usize = 0x2A;
const SIZE_OFFSET: usize = 0x2C;
const VENDOR_OFFSET: usize = 0x2E;
const MODULE_OFFSET: usize = 0x2F;
const SERIAL_OFFSET: usize = 0x30;
const MAC_OFFSET: usize = 0x36;
const CHANNEL_OFFSET: usize = 0x3C;
const RF_TYPE_OFFSET: usize = 0x40;
const RF_INIT_COUNT_OFFSET: usize = 0x42;
const MAC_INIT_OFFSET: usize = 0x44;
const BB_INIT_OFFSET: usize = 0x64;
const RF_FILE_OFFSET: usize = 0xCE;

/// End of the wireless area.
pub const TABLE_END: usize = 0x200;
/// Number of baseband init registers.
pub const BB_REG_COUNT: usize = 0x69;
/// Number of MAC-layer init registers.
pub const MAC_REG_COUNT: usize = 16;

pub const RF_TYPE_MAX2822: u8 = 1;
pub const RF_TYPE_RF2958: u8 = 2;
pub const RF_TYPE_MM3156: u8 = 3;
pub const RF_TYPE_TEST: u8 = 4;
pub const RF_TYPE_MTMBBP: u8 = 5;
pub const RF_TYPE_MM3218: u8 = 6;

/// Human-readable RF chip name.
pub fn rf_type_name(ty: u8) -> &'static str {
    match ty {
        RF_TYPE_MAX2822 => "MAX2822",
        RF_TYPE_RF2958 => "RF2958",
        RF_TYPE_MM3156 => "MM3156",
        RF_TYPE_TEST => "TEST",
        RF_TYPE_MTMBBP => "MTMBBP ES1",
        RF_TYPE_MM3218 => "MM3218",
        _ => "(unknown)",
    }
}

/// RF types that shipped in real units.
pub fn is_valid_rf_type(ty: u8) -> bool {
    matches!(ty, 1 | 2 | 3 | 5 | 6)
}

/// Channel mask rule: channels 1..=14 only, at least one allowed.
pub fn is_valid_channel_mask(mask: u16) -> bool {
    mask & 0x8001 == 0 && mask & 0x7FFE != 0
}

pub fn table_size(image: &[u8]) -> u16 {
    LittleEndian::read_u16(&image[SIZE_OFFSET..])
}

pub fn stored_crc(image: &[u8]) -> u16 {
    LittleEndian::read_u16(&image[CRC_OFFSET..])
}

/// Computes the table CRC; `None` when the stored size does not fit the
/// wireless area.
pub fn table_crc(image: &[u8]) -> Option<u16> {
    let size = table_size(image) as usize;
    if SIZE_OFFSET + size > TABLE_END {
        return None;
    }
    Some(crc16(&image[SIZE_OFFSET..SIZE_OFFSET + size], 0))
}

/// Regenerates the stored CRC after an edit.
pub fn update_crc(image: &mut [u8]) {
    if let Some(crc) = table_crc(image) {
        LittleEndian::write_u16(&mut image[CRC_OFFSET..], crc);
    }
}

pub fn vendor(image: &[u8]) -> u8 {
    image[VENDOR_OFFSET]
}

pub fn module_id(image: &[u8]) -> u8 {
    image[MODULE_OFFSET]
}

pub fn serial(image: &[u8]) -> [u8; 6] {
    let mut s = [0; 6];
    s.copy_from_slice(&image[SERIAL_OFFSET..SERIAL_OFFSET + 6]);
    s
}

pub fn mac(image: &[u8]) -> [u8; 6] {
    let mut m = [0; 6];
    m.copy_from_slice(&image[MAC_OFFSET..MAC_OFFSET + 6]);
    m
}

/// Writes a MAC address and regenerates the table CRC.
pub fn set_mac(image: &mut [u8], mac: [u8; 6]) {
    image[MAC_OFFSET..MAC_OFFSET + 6].copy_from_slice(&mac);
    update_crc(image);
}

pub fn allowed_channels(image: &[u8]) -> u16 {
    LittleEndian::read_u16(&image[CHANNEL_OFFSET..])
}

pub fn rf_type(image: &[u8]) -> u8 {
    image[RF_TYPE_OFFSET]
}

pub fn rf_init_count(image: &[u8]) -> u8 {
    image[RF_INIT_COUNT_OFFSET]
}

pub fn mac_init_reg(image: &[u8], index: usize) -> Option<u16> {
    if index >= MAC_REG_COUNT {
        return None;
    }
    Some(LittleEndian::read_u16(&image[MAC_INIT_OFFSET + index * 2..]))
}

// ----- register files

/// Names of the MAC-layer init registers, in table order.
pub static MAC_REG_NAMES: [&str; MAC_REG_COUNT] = [
    "TXPE_OFF_DELAY",
    "TX_DELAY",
    "RX_DELAY",
    "TRX_PE_INTERVAL",
    "RDY_TIMEOUT",
    "RX_TIMEOUT",
    "MULTIACK_DELAY_TIME",
    "CCA_DELAY",
    "TIMEOUT_PARAM",
    "ACK_CCA_TIMEOUT",
    "TSF_TXOFFSET",
    "TSF_RXOFFSET",
    "WAKEUP_CTRL",
    "TBTT_ACT_TIME",
    "TMPTT_ACT_TIME",
    "RF_WAKEUP_TIME",
];

/// Known baseband registers by name.
pub static BB_REGS_BY_NAME: phf::Map<&'static str, u8> = phf_map! {
    "VERSION" => 0x00,
    "MCLK" => 0x01,
    "MODU" => 0x02,
    "SCRAMBLER_INIT_SHORT" => 0x04,
    "SCRAMBLER_INIT_LONG" => 0x05,
    "SCRAMBLER" => 0x06,
    "SYNC_LONG" => 0x07,
    "SYNC_SHORT" => 0x08,
    "TX_PPDU_SIGNAL" => 0x0D,
    "TX_PPDU_SERVICE" => 0x0E,
    "TX_PPDU_LENGTH_H" => 0x0F,
    "TX_PPDU_LENGTH_L" => 0x10,
    "TX_PPDU_CRC_H" => 0x11,
    "TX_PPDU_CRC_L" => 0x12,
    "CCA_MODE" => 0x13,
    "RX_PPDU_SERVICE" => 0x16,
    "RX_PPDU_LENGTH_H" => 0x17,
    "RX_PPDU_LENGTH_L" => 0x18,
    "RX_PPDU_CRC_V_H" => 0x19,
    "RX_PPDU_CRC_V_L" => 0x1A,
    "AGC" => 0x1E,
    "TXVGA_TARGET" => 0x26,
    "ACG_LIMIT" => 0x2E,
    "ED_THRESHOLD" => 0x35,
    "MDR_COUNT_H" => 0x5E,
    "MDR_COUNT_L" => 0x5F,
    "SFD_COUNT_H" => 0x60,
    "SFD_COUNT_L" => 0x61,
    "COUNT_CNT" => 0x62,
};

/// Known RF2958 registers by name (the MAX2822 shares the command format).
pub static RF2958_REGS_BY_NAME: phf::Map<&'static str, u8> = phf_map! {
    "CFG1" => 0x00,
    "IFPLL1" => 0x01,
    "IFPLL2" => 0x02,
    "IFPLL3" => 0x03,
    "RFPLL1" => 0x04,
    "RFPLL2" => 0x05,
    "RFPLL3" => 0x06,
    "RFPLL4" => 0x07,
    "CAL1" => 0x08,
    "TXRX1" => 0x09,
    "PCNT1" => 0x0A,
    "PCNT2" => 0x0B,
    "VCOT1" => 0x0C,
    "TEST" => 0x1B,
    "RST" => 0x1F,
};

/// Known MM3156 registers by name (names hypothesised).
pub static MM3156_REGS_BY_NAME: phf::Map<&'static str, u8> = phf_map! {
    "PC" => 0x01,
    "SC" => 0x02,
    "RC" => 0x03,
    "VER" => 0x06,
    "LNAR" => 0x07,
    "VCO2" => 0x0E,
    "VCO" => 0x0F,
    "PLL" => 0x11,
    "TXAOF1" => 0x18,
    "TXAOF2" => 0x19,
};

fn name_of(map: &phf::Map<&'static str, u8>, regno: u8) -> Option<&'static str> {
    map.entries().find(|&(_, &v)| v == regno).map(|(k, _)| *k)
}

pub fn bb_reg_name(regno: u8) -> Option<&'static str> {
    name_of(&BB_REGS_BY_NAME, regno)
}

pub fn rf_reg_name(ty: u8, regno: u8) -> Option<&'static str> {
    match ty {
        RF_TYPE_RF2958 | RF_TYPE_MAX2822 => name_of(&RF2958_REGS_BY_NAME, regno),
        RF_TYPE_MM3156 => name_of(&MM3156_REGS_BY_NAME, regno),
        _ => None,
    }
}

/// Resolves an RF register name for the image's RF type.
pub fn rf_reg_by_name(ty: u8, name: &str) -> Option<u8> {
    match ty {
        RF_TYPE_RF2958 | RF_TYPE_MAX2822 => RF2958_REGS_BY_NAME.get(name).copied(),
        RF_TYPE_MM3156 => MM3156_REGS_BY_NAME.get(name).copied(),
        _ => None,
    }
}

pub fn bb_reg(image: &[u8], regno: u8) -> Option<u8> {
    if (regno as usize) < BB_REG_COUNT {
        Some(image[BB_INIT_OFFSET + regno as usize])
    } else {
        None
    }
}

/// Writes a baseband init register and regenerates the CRC.
pub fn set_bb_reg(image: &mut [u8], regno: u8, value: u8) -> bool {
    if (regno as usize) >= BB_REG_COUNT {
        return false;
    }
    image[BB_INIT_OFFSET + regno as usize] = value;
    update_crc(image);
    true
}

/// One RF2958-style command: a 5-bit register number, an 18-bit value, and
/// a read/write bit, stored as three little-endian bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RfCommand {
    pub reg: u8,
    pub value: u32,
    pub read_mode: bool,
}

impl RfCommand {
    fn decode(bytes: &[u8]) -> RfCommand {
        let cmd = (bytes[0] as u32) | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16);
        RfCommand {
            reg: ((cmd >> 18) & 0x1F) as u8,
            value: cmd & 0x3FFFF,
            read_mode: cmd & 0x80_0000 != 0,
        }
    }

    fn encode(self) -> [u8; 3] {
        let cmd = ((self.read_mode as u32) << 23) | (((self.reg & 0x1F) as u32) << 18) | (self.value & 0x3FFFF);
        [cmd as u8, (cmd >> 8) as u8, (cmd >> 16) as u8]
    }
}

const RF2958_INIT_MAX: usize = 24;
const RF2958_CHANNEL_BASE: usize = RF_FILE_OFFSET + RF2958_INIT_MAX * 3;
/// Commands per channel in the RF2958 channel file.
pub const RF2958_CHANNEL_SLOTS: usize = 2;
pub const CHANNEL_COUNT: usize = 14;

fn rf2958_init_slice(image: &[u8], index: usize) -> Option<&[u8]> {
    if index >= (rf_init_count(image) as usize).min(RF2958_INIT_MAX) {
        return None;
    }
    Some(&image[RF_FILE_OFFSET + index * 3..])
}

/// Reads the `index`-th RF2958 init command.
pub fn rf2958_init_command(image: &[u8], index: usize) -> Option<RfCommand> {
    rf2958_init_slice(image, index).map(RfCommand::decode)
}

/// Finds the init command addressing `regno`.
pub fn rf2958_find_init_reg(image: &[u8], regno: u8) -> Option<(usize, RfCommand)> {
    (0..(rf_init_count(image) as usize).min(RF2958_INIT_MAX))
        .map(|i| (i, RfCommand::decode(&image[RF_FILE_OFFSET + i * 3..])))
        .find(|&(_, cmd)| cmd.reg == regno)
}

/// Rewrites the value of the init command addressing `regno`, keeping its
/// register number and mode, and regenerates the CRC.
pub fn rf2958_set_init_reg(image: &mut [u8], regno: u8, value: u32) -> bool {
    let (index, mut cmd) = match rf2958_find_init_reg(image, regno) {
        Some(found) => found,
        None => return false,
    };
    cmd.value = value & 0x3FFFF;
    let at = RF_FILE_OFFSET + index * 3;
    image[at..at + 3].copy_from_slice(&cmd.encode());
    update_crc(image);
    true
}

/// Reads one of a channel's RF2958 commands (`channel` in 1..=14).
pub fn rf2958_channel_command(image: &[u8], channel: usize, slot: usize) -> Option<RfCommand> {
    if !(1..=CHANNEL_COUNT).contains(&channel) || slot >= RF2958_CHANNEL_SLOTS {
        return None;
    }
    let at = RF2958_CHANNEL_BASE + ((channel - 1) * RF2958_CHANNEL_SLOTS + slot) * 3;
    Some(RfCommand::decode(&image[at..]))
}

/// Rewrites a channel command addressing `regno`, and regenerates the CRC.
pub fn rf2958_set_channel_reg(image: &mut [u8], channel: usize, regno: u8, value: u32) -> bool {
    for slot in 0..RF2958_CHANNEL_SLOTS {
        if let Some(mut cmd) = rf2958_channel_command(image, channel, slot) {
            if cmd.reg == regno {
                cmd.value = value & 0x3FFFF;
                let at = RF2958_CHANNEL_BASE + ((channel - 1) * RF2958_CHANNEL_SLOTS + slot) * 3;
                image[at..at + 3].copy_from_slice(&cmd.encode());
                update_crc(image);
                return true;
            }
        }
    }
    false
}

const MM3156_INIT_COUNT: usize = 0x29;
/// MM3156 init registers beyond this are read-only table padding.
const MM3156_WRITABLE: u8 = 27;

pub fn mm3156_init_reg(image: &[u8], regno: u8) -> Option<u8> {
    if (regno as usize) < MM3156_INIT_COUNT {
        Some(image[RF_FILE_OFFSET + regno as usize])
    } else {
        None
    }
}

pub fn mm3156_set_init_reg(image: &mut [u8], regno: u8, value: u8) -> bool {
    if regno >= MM3156_WRITABLE {
        return false;
    }
    image[RF_FILE_OFFSET + regno as usize] = value;
    update_crc(image);
    true
}

// ----- MAC address generation

/// OUI used by the original wireless modules; checked by the online
/// service.
pub const OUI_ORIGINAL: [u8; 3] = [0x00, 0x09, 0xBF];
/// OUI used by mid-production modules.
pub const OUI_SECOND: [u8; 3] = [0x00, 0x16, 0x56];

/// OUIs seen on late-production modules.
pub static OUI_LATE: [[u8; 3]; 20] = [
    [0x00, 0x16, 0x56],
    [0x00, 0x17, 0xAB],
    [0x00, 0x19, 0xFD],
    [0x00, 0x1A, 0xE9],
    [0x00, 0x1B, 0x7A],
    [0x00, 0x1B, 0xEA],
    [0x00, 0x1D, 0xBC],
    [0x00, 0x1E, 0xA9],
    [0x00, 0x21, 0x47],
    [0x00, 0x22, 0x4C],
    [0x00, 0x22, 0xAA],
    [0x00, 0x22, 0xD7],
    [0x00, 0x23, 0xCC],
    [0x00, 0x24, 0x1E],
    [0x00, 0x24, 0xF3],
    [0x00, 0x25, 0xA0],
    [0x00, 0x26, 0x59],
    [0x00, 0x27, 0x09],
    [0xE0, 0xE7, 0x51],
    [0xE8, 0x4E, 0xCE],
];

/// Generates a MAC address for the unit's hardware generation.
///
/// `random` supplies the entropy: the low 24 bits become the device part,
/// the high bits pick among the late OUIs where applicable. The core holds
/// no random source; callers provide one.
pub fn generate_mac(ipl2_type: u8, module_id: u8, random: u32) -> [u8; 6] {
    let ty = if ipl2_type == 0xFF { 0 } else { ipl2_type };

    let oui = if ty & crate::flash::header::IPL2_USG == 0 {
        OUI_ORIGINAL
    } else if module_id == 5 {
        OUI_SECOND
    } else {
        OUI_LATE[(random >> 24) as usize % OUI_LATE.len()]
    };

    [
        oui[0],
        oui[1],
        oui[2],
        random as u8,
        (random >> 8) as u8,
        (random >> 16) as u8,
    ]
}

/// Parses a MAC address in any of the common spellings
/// (`AA-BB-CC-DD-EE-FF`, colons, dots, spaces, or bare hex).
pub fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut pos = 0;
    for c in text.chars() {
        if matches!(c, '-' | ':' | ' ' | '.') {
            continue;
        }
        let digit = c.to_digit(16)? as u8;
        if pos >= 12 {
            return None;
        }
        mac[pos / 2] |= digit << (4 - 4 * (pos & 1));
        pos += 1;
    }
    if pos == 12 {
        Some(mac)
    } else {
        None
    }
}

/// Addresses that must not be assigned to a unit.
pub fn mac_warning(mac: [u8; 6]) -> Option<&'static str> {
    if mac == [0xFF; 6] {
        return Some("the broadcast address");
    }
    if mac == [0x03, 0x09, 0xBF, 0x00, 0x00, 0x00] {
        return Some("the MP address");
    }
    if mac == [0x03, 0x09, 0xBF, 0x00, 0x00, 0x03] {
        return Some("the MP ACK address");
    }
    if mac == [0x03, 0x09, 0xBF, 0x00, 0x00, 0x10] {
        return Some("the MP key address");
    }
    if mac[0] & 1 != 0 {
        return Some("a multi-cast address");
    }
    None
}

/// Fields recovered from a scrambled online-service user id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DwcMac {
    /// 0 selects the original OUI, 1 a late one.
    pub vendor: u8,
    /// Non-zero means the id belongs to a different unit family.
    pub unit: u8,
    /// Low 24 bits of the device's MAC address.
    pub mac_low: u32,
}

const DWC_NIBBLE_INV: [u8; 16] = [
    0x7, 0x2, 0x5, 0xA, 0xB, 0x0, 0xD, 0xF, 0xC, 0x1, 0x6, 0x8, 0x4, 0x9, 0x3, 0xE,
];

/// Unscrambles an online-service user id back into MAC address bits.
///
/// Ids pasted from the user interface are scaled by 1000; oversized
/// multiples are unscaled first.
pub fn decode_dwc_id(mut id: u64) -> DwcMac {
    if id % 1000 == 0 && id > 0x7FF_FFFF_FFFF {
        id /= 1000;
    }

    id &= 0x0000_07FF_FFFF_FFFF;
    id ^= 0x0000_6767_6767_6767;
    id &= 0x0000_07FF_FFFF_FFFF;
    id |= (id & 1) << 43;
    id >>= 1;

    // undo the byte shuffle; the top byte is not permuted
    let mut shuffled = 0u64;
    shuffled |= ((id >> 8) & 0xFF) << 0;
    shuffled |= ((id >> 16) & 0xFF) << 8;
    shuffled |= (id & 0xFF) << 16;
    shuffled |= ((id >> 32) & 0xFF) << 24;
    shuffled |= ((id >> 24) & 0xFF) << 32;
    shuffled |= ((id >> 40) & 0xFF) << 40;

    // undo the nibble substitution on the low 40 bits
    id = 0;
    for i in 0..10 {
        id |= (DWC_NIBBLE_INV[((shuffled >> (4 * i)) & 0xF) as usize] as u64) << (4 * i);
    }
    id |= shuffled & 0x0000_0700_0000_0000;

    id ^= 0x0000_D6D6_D6D6_D6D6;
    id &= 0x0000_07FF_FFFF_FFFF;

    DwcMac {
        vendor: ((id >> 2) & 1) as u8,
        unit: (id & 3) as u8,
        mac_low: ((id >> 3) & 0xFF_FFFF) as u32,
    }
}

/// Assembles a MAC address from an OUI and the low 24 bits.
pub fn assemble_mac(oui: [u8; 3], mac_low: u32) -> [u8; 6] {
    [
        oui[0],
        oui[1],
        oui[2],
        (mac_low >> 16) as u8,
        (mac_low >> 8) as u8,
        mac_low as u8,
    ]
}
