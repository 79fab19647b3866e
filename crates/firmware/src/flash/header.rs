use byteorder::{ByteOrder, LittleEndian};

/// Size of the flash header in bytes.
pub const HEADER_SIZE: usize = 0x2A;

/// IPL2 type value on the original hardware model.
pub const IPL2_NORMAL: u8 = 0xFF;
/// Hardware revision uses the CPU-NTR part.
pub const IPL2_CPU_NTR: u8 = 0x80;
/// Extended settings are present.
pub const IPL2_EXTENDED: u8 = 0x40;
/// Revised hardware model.
pub const IPL2_USG: u8 = 0x20;
/// Successor platform.
pub const IPL2_TWL: u8 = 0x10;
/// Korean language pack.
pub const IPL2_KOREAN: u8 = 0x04;
/// Chinese language pack.
pub const IPL2_CHINESE: u8 = 0x02;
/// Extended language support.
pub const IPL2_EXT_LANGUAGE: u8 = 0x01;

/// Returns whether the image carries the extended user settings record.
pub fn has_ex_config(ipl2_type: u8) -> bool {
    ipl2_type != IPL2_NORMAL && ipl2_type & (IPL2_EXTENDED | IPL2_TWL) != 0
}

/// Returns whether the image carries the successor platform's extended
/// connection settings.
pub fn has_twl_settings(ipl2_type: u8) -> bool {
    ipl2_type != IPL2_NORMAL && ipl2_type & IPL2_TWL != 0
}

/// Flash header.
///
/// The first 0x2A bytes of the image. Module addresses are stored as scaled
/// 16-bit words; the accessor methods below apply the scaling.
#[derive(Clone, Copy, Debug)]
pub struct FlashHeader {
    /// ARM9 secondary module ROM address, in 8-byte units.
    pub arm9_secondary_rom_addr: u16, // 0x000
    /// ARM7 secondary module ROM address, in 8-byte units.
    pub arm7_secondary_rom_addr: u16, // 0x002
    /// CRC over the uncompressed ARM9+ARM7 secondary modules.
    pub secondary_crc: u16, // 0x004
    /// CRC over the uncompressed ARM9+ARM7 static modules.
    pub static_crc: u16, // 0x006
    /// Additional cipher key material.
    pub key_word: u32, // 0x008
    /// ARM9 static module ROM address, in scaled 4-byte units.
    pub arm9_static_rom_addr: u16, // 0x00C
    /// ARM9 static module RAM address word.
    pub arm9_static_ram_addr: u16, // 0x00E
    /// ARM7 static module ROM address, in scaled 4-byte units.
    pub arm7_static_rom_addr: u16, // 0x010
    /// ARM7 static module RAM address word.
    pub arm7_static_ram_addr: u16, // 0x012

    // Packed scale word at 0x014, low bits first.
    /// ARM9 static ROM address scale (3 bits).
    pub arm9_rom_scale: u8,
    /// ARM9 static RAM address scale (3 bits).
    pub arm9_ram_scale: u8,
    /// ARM7 static ROM address scale (3 bits).
    pub arm7_rom_scale: u8,
    /// ARM7 static RAM address scale (3 bits).
    pub arm7_ram_scale: u8,
    /// ARM7 static RAM location: main RAM when set, else work RAM.
    pub arm7_main_ram: bool,
    /// Flash capacity exponent over 128 KiB (3 bits, reported only).
    pub flash_capacity: u8,

    /// Resource pack ROM address, in 8-byte units.
    pub resource_rom_addr: u16, // 0x016
    /// Build time, BCD: minute, hour, day, month, year.
    pub timestamp: [u8; 5], // 0x018
    /// IPL2 type byte.
    pub ipl2_type: u8, // 0x01D
    pub pad_1e: u16, // 0x01E
    /// User configuration address, in 8-byte units.
    pub nvram_user_config_addr: u16, // 0x020
    pub field_22: u16, // 0x022
    pub field_24: u16, // 0x024
    /// CRC over the uncompressed resource pack.
    pub resource_crc: u16, // 0x026
    pub field_28: u16, // 0x028
}

impl FlashHeader {
    /// Reads the header from the start of an image buffer.
    pub fn read(buf: &[u8]) -> FlashHeader {
        let scales = LittleEndian::read_u16(&buf[0x14..]);

        FlashHeader {
            arm9_secondary_rom_addr: LittleEndian::read_u16(&buf[0x00..]),
            arm7_secondary_rom_addr: LittleEndian::read_u16(&buf[0x02..]),
            secondary_crc: LittleEndian::read_u16(&buf[0x04..]),
            static_crc: LittleEndian::read_u16(&buf[0x06..]),
            key_word: LittleEndian::read_u32(&buf[0x08..]),
            arm9_static_rom_addr: LittleEndian::read_u16(&buf[0x0C..]),
            arm9_static_ram_addr: LittleEndian::read_u16(&buf[0x0E..]),
            arm7_static_rom_addr: LittleEndian::read_u16(&buf[0x10..]),
            arm7_static_ram_addr: LittleEndian::read_u16(&buf[0x12..]),
            arm9_rom_scale: (scales & 7) as u8,
            arm9_ram_scale: ((scales >> 3) & 7) as u8,
            arm7_rom_scale: ((scales >> 6) & 7) as u8,
            arm7_ram_scale: ((scales >> 9) & 7) as u8,
            arm7_main_ram: scales & (1 << 12) != 0,
            flash_capacity: ((scales >> 13) & 7) as u8,
            resource_rom_addr: LittleEndian::read_u16(&buf[0x16..]),
            timestamp: [buf[0x18], buf[0x19], buf[0x1A], buf[0x1B], buf[0x1C]],
            ipl2_type: buf[0x1D],
            pad_1e: LittleEndian::read_u16(&buf[0x1E..]),
            nvram_user_config_addr: LittleEndian::read_u16(&buf[0x20..]),
            field_22: LittleEndian::read_u16(&buf[0x22..]),
            field_24: LittleEndian::read_u16(&buf[0x24..]),
            resource_crc: LittleEndian::read_u16(&buf[0x26..]),
            field_28: LittleEndian::read_u16(&buf[0x28..]),
        }
    }

    /// Writes the header back to the start of an image buffer.
    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u16(&mut buf[0x00..], self.arm9_secondary_rom_addr);
        LittleEndian::write_u16(&mut buf[0x02..], self.arm7_secondary_rom_addr);
        LittleEndian::write_u16(&mut buf[0x04..], self.secondary_crc);
        LittleEndian::write_u16(&mut buf[0x06..], self.static_crc);
        LittleEndian::write_u32(&mut buf[0x08..], self.key_word);
        LittleEndian::write_u16(&mut buf[0x0C..], self.arm9_static_rom_addr);
        LittleEndian::write_u16(&mut buf[0x0E..], self.arm9_static_ram_addr);
        LittleEndian::write_u16(&mut buf[0x10..], self.arm7_static_rom_addr);
        LittleEndian::write_u16(&mut buf[0x12..], self.arm7_static_ram_addr);

        let scales = (self.arm9_rom_scale as u16 & 7)
            | ((self.arm9_ram_scale as u16 & 7) << 3)
            | ((self.arm7_rom_scale as u16 & 7) << 6)
            | ((self.arm7_ram_scale as u16 & 7) << 9)
            | ((self.arm7_main_ram as u16) << 12)
            | ((self.flash_capacity as u16 & 7) << 13);
        LittleEndian::write_u16(&mut buf[0x14..], scales);

        LittleEndian::write_u16(&mut buf[0x16..], self.resource_rom_addr);
        buf[0x18..0x1D].copy_from_slice(&self.timestamp);
        buf[0x1D] = self.ipl2_type;
        LittleEndian::write_u16(&mut buf[0x1E..], self.pad_1e);
        LittleEndian::write_u16(&mut buf[0x20..], self.nvram_user_config_addr);
        LittleEndian::write_u16(&mut buf[0x22..], self.field_22);
        LittleEndian::write_u16(&mut buf[0x24..], self.field_24);
        LittleEndian::write_u16(&mut buf[0x26..], self.resource_crc);
        LittleEndian::write_u16(&mut buf[0x28..], self.field_28);
    }

    /// ROM byte offset of the ARM9 static module.
    pub fn arm9_static_rom_offset(&self) -> u32 {
        (4 * self.arm9_static_rom_addr as u32) << self.arm9_rom_scale
    }

    /// ROM byte offset of the ARM7 static module.
    pub fn arm7_static_rom_offset(&self) -> u32 {
        (4 * self.arm7_static_rom_addr as u32) << self.arm7_rom_scale
    }

    /// RAM load address of the ARM9 static module.
    pub fn arm9_static_ram_address(&self) -> u32 {
        0x0280_0000u32.wrapping_sub((4 * self.arm9_static_ram_addr as u32) << self.arm9_ram_scale)
    }

    /// RAM load address of the ARM7 static module.
    pub fn arm7_static_ram_address(&self) -> u32 {
        let base = if self.arm7_main_ram { 0x0280_0000u32 } else { 0x0381_0000 };
        base.wrapping_sub((4 * self.arm7_static_ram_addr as u32) << self.arm7_ram_scale)
    }

    /// ROM byte offset of the ARM9 secondary module.
    pub fn arm9_secondary_rom_offset(&self) -> u32 {
        self.arm9_secondary_rom_addr as u32 * 8
    }

    /// ROM byte offset of the ARM7 secondary module.
    pub fn arm7_secondary_rom_offset(&self) -> u32 {
        self.arm7_secondary_rom_addr as u32 * 8
    }

    /// ROM byte offset of the resource pack.
    pub fn resource_rom_offset(&self) -> u32 {
        self.resource_rom_addr as u32 * 8
    }

    /// ROM byte offset of the user configuration area.
    pub fn user_config_offset(&self) -> u32 {
        self.nvram_user_config_addr as u32 * 8
    }

    /// Returns whether the extended user settings record is present.
    pub fn has_ex_config(&self) -> bool {
        has_ex_config(self.ipl2_type)
    }

    /// Returns whether the extended connection settings are present.
    pub fn has_twl_settings(&self) -> bool {
        has_twl_settings(self.ipl2_type)
    }

    /// Flash capacity in bytes.
    pub fn flash_capacity_bytes(&self) -> usize {
        (128 * 1024) << self.flash_capacity
    }

    /// Describes the platform generation and region encoded in the IPL2
    /// type byte.
    pub fn ipl2_description(&self) -> String {
        let mut ty = self.ipl2_type;
        if ty == IPL2_NORMAL {
            ty = 0;
        }

        let model = if ty & IPL2_USG != 0 {
            if ty & IPL2_CPU_NTR != 0 {
                "DS Lite with CPU-NTR"
            } else {
                "DS Lite"
            }
        } else if ty & IPL2_TWL != 0 {
            ty &= !(IPL2_EXT_LANGUAGE | IPL2_CHINESE | IPL2_KOREAN);
            "DSi"
        } else {
            "DS"
        };

        let mut region = "World";
        if ty & IPL2_EXT_LANGUAGE != 0 {
            if ty & IPL2_CHINESE != 0 {
                region = "iQue";
            } else if ty & IPL2_KOREAN != 0 {
                region = "Korea";
            }
        }

        format!("{} ({})", model, region)
    }
}
