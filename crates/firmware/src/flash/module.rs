use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use codec::{ash, lz, Compression};

use crate::flash::encrypt::{Blowfish, DecryptStream};
use crate::flash::header::FlashHeader;
use crate::Error;

/// The five modules referenced by the flash header, in canonical ROM order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleKind {
    Arm9Static,
    Arm7Static,
    Arm9Secondary,
    Arm7Secondary,
    Resources,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 5] = [
        ModuleKind::Arm9Static,
        ModuleKind::Arm7Static,
        ModuleKind::Arm9Secondary,
        ModuleKind::Arm7Secondary,
        ModuleKind::Resources,
    ];

    /// Short name used by the module import/export surface.
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Arm9Static => "arm9",
            ModuleKind::Arm7Static => "arm7",
            ModuleKind::Arm9Secondary => "arm9s",
            ModuleKind::Arm7Secondary => "arm7s",
            ModuleKind::Resources => "rsrc",
        }
    }

    /// Parses a short module name.
    pub fn from_name(name: &str) -> Option<ModuleKind> {
        ModuleKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ModuleKind::Arm9Static => "ARM9 static module",
            ModuleKind::Arm7Static => "ARM7 static module",
            ModuleKind::Arm9Secondary => "ARM9 secondary module",
            ModuleKind::Arm7Secondary => "ARM7 secondary module",
            ModuleKind::Resources => "resources pack",
        }
    }

    /// Static modules are stored LZ-compressed inside the cipher.
    pub fn is_static(self) -> bool {
        matches!(self, ModuleKind::Arm9Static | ModuleKind::Arm7Static)
    }

    /// ROM byte offset per the current header.
    pub fn rom_offset(self, hdr: &FlashHeader) -> u32 {
        match self {
            ModuleKind::Arm9Static => hdr.arm9_static_rom_offset(),
            ModuleKind::Arm7Static => hdr.arm7_static_rom_offset(),
            ModuleKind::Arm9Secondary => hdr.arm9_secondary_rom_offset(),
            ModuleKind::Arm7Secondary => hdr.arm7_secondary_rom_offset(),
            ModuleKind::Resources => hdr.resource_rom_offset(),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A module decoded out of the image.
#[derive(Clone, Debug)]
pub struct ModuleInfo {
    pub kind: ModuleKind,
    /// ROM byte offset of the stored form.
    pub rom_offset: u32,
    /// Stored size, rounded up to the 8-byte granularity.
    pub compressed_size: u32,
    /// RAM load address; zero when unknown (recovered separately for the
    /// secondary modules and resource pack).
    pub ram_addr: u32,
    /// Decoded contents.
    pub data: Vec<u8>,
    pub compression: Compression,
}

/// Decodes a static module: LZ inside the cipher, compressed length learned
/// from how many cipher blocks the decoder consumed.
pub(crate) fn unpack_static(buf: &[u8], kind: ModuleKind) -> Result<ModuleInfo, Error> {
    let hdr = FlashHeader::read(buf);
    let (rom_offset, ram_addr) = match kind {
        ModuleKind::Arm9Static => (hdr.arm9_static_rom_offset(), hdr.arm9_static_ram_address()),
        ModuleKind::Arm7Static => (hdr.arm7_static_rom_offset(), hdr.arm7_static_ram_address()),
        _ => unreachable!("not a static module"),
    };

    if rom_offset as usize >= buf.len() {
        return Err(Error::NotDecodable(kind));
    }

    let cipher = Blowfish::from_header(buf);
    let mut stream = DecryptStream::new(cipher, &buf[rom_offset as usize..]);
    let data = lz::decompress_stream(|| stream.next_byte()).map_err(|err| {
        debug!("{}: {}", kind.name(), err);
        Error::NotDecodable(kind)
    })?;

    Ok(ModuleInfo {
        kind,
        rom_offset,
        compressed_size: ((stream.consumed() + 7) & !7) as u32,
        ram_addr,
        data,
        compression: Compression::Lz,
    })
}

/// Decodes a secondary module or the resource pack: plain LZ when the first
/// byte announces it, otherwise ASH with the stored size word.
pub(crate) fn unpack_overlay(buf: &[u8], kind: ModuleKind) -> Result<ModuleInfo, Error> {
    let hdr = FlashHeader::read(buf);
    let rom_offset = kind.rom_offset(&hdr) as usize;

    if rom_offset > buf.len() || buf.len() - rom_offset < 4 {
        return Err(Error::NotDecodable(kind));
    }

    if buf[rom_offset] == 0x10 {
        if let Ok((data, consumed)) = lz::decompress(&buf[rom_offset..]) {
            return Ok(ModuleInfo {
                kind,
                rom_offset: rom_offset as u32,
                compressed_size: ((consumed + 7) & !7) as u32,
                ram_addr: 0,
                data,
                compression: Compression::Lz,
            });
        }
    }

    if buf.len() - rom_offset < 0xC {
        return Err(Error::NotDecodable(kind));
    }

    let word = LittleEndian::read_u32(&buf[rom_offset..]);
    let stream_len = ((word & 0x00FF_FFFF) >> 2) as usize;
    if stream_len > buf.len() - rom_offset {
        return Err(Error::NotDecodable(kind));
    }

    let data = ash::decompress(&buf[rom_offset..rom_offset + stream_len]).map_err(|err| {
        debug!("{}: {}", kind.name(), err);
        Error::NotDecodable(kind)
    })?;

    Ok(ModuleInfo {
        kind,
        rom_offset: rom_offset as u32,
        compressed_size: ((stream_len + 7) & !7) as u32,
        ram_addr: 0,
        data,
        compression: Compression::Ash,
    })
}

pub(crate) fn unpack(buf: &[u8], kind: ModuleKind) -> Result<ModuleInfo, Error> {
    if kind.is_static() {
        unpack_static(buf, kind)
    } else {
        unpack_overlay(buf, kind)
    }
}
