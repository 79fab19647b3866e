//! High-level image operations.
//!
//! Each operation composes the codecs, the cipher and the config models
//! into one image transform. The rewriting operations stage their results
//! before touching the buffer, so a failure leaves the image unchanged.
//!
//! The cipher is keyed from the first 8 header bytes, which include the
//! secondary module offsets and two of the module CRCs. Any operation that
//! rewrites those fields therefore finalises the header first and encrypts
//! (or re-encrypts) the static modules against the final header, keeping
//! the stored ciphertext decodable against the stored header.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use codec::{ash, lz, pad_to, Compression};
use common::util::crc16;

use crate::flash::backup::{self, SettingsBackup};
use crate::flash::config;
use crate::flash::conn;
use crate::flash::encrypt::Blowfish;
use crate::flash::header::HEADER_SIZE;
use crate::flash::wireless;
use crate::flash::{FlashImage, ModuleKind, ModuleSet};
use crate::Error;

/// Start of the module area.
pub const MODULE_BASE: u32 = 0x200;

/// RAM window reachable by the firmware loader.
fn ram_reachable(addr: u32, size: usize) -> bool {
    addr >= 0x0200_0000
        && addr < 0x0400_0000
        && addr
            .checked_add(size as u32)
            .map_or(false, |end| end < 0x0400_0000)
}

/// CRC over an uncompressed module pair, second continuing the first.
fn pair_crc(first: &[u8], second: &[u8]) -> u16 {
    crc16(second, crc16(first, 0xFFFF))
}

// ----- verify

/// A problem reported by [`verify`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Finding {
    NotDecodable(ModuleKind),
    BadLoadAddress(ModuleKind),
    ChecksumMismatch {
        region: &'static str,
        stored: u16,
        computed: u16,
    },
    BadWirelessTableSize(u16),
    BadRfType(u8),
    BadChannelMask(u16),
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Finding::NotDecodable(kind) => {
                write!(f, "the {} could not be decompressed", kind.description())
            }
            Finding::BadLoadAddress(kind) => {
                write!(f, "invalid load address for the {}", kind.description())
            }
            Finding::ChecksumMismatch { region, stored, computed } => {
                write!(f, "checksum mismatch for the {}: {:04X} (expected {:04X})", region, computed, stored)
            }
            Finding::BadWirelessTableSize(size) => {
                write!(f, "invalid wireless init table size {:#X}", size)
            }
            Finding::BadRfType(ty) => write!(f, "no valid wireless RF type specified ({})", ty),
            Finding::BadChannelMask(mask) => {
                write!(f, "invalid wireless channel specification {:#06X}", mask)
            }
        }
    }
}

/// Checks the integrity of the image: module decodability, static load
/// addresses, module checksums, and the wireless identification fields.
pub fn verify(image: &FlashImage) -> Vec<Finding> {
    let buf = image.bytes();
    let hdr = image.header();
    let set = image.unpack_modules();

    let mut findings = Vec::new();

    for (kind, module) in set.iter() {
        if module.is_none() {
            findings.push(Finding::NotDecodable(kind));
        }
    }

    for &kind in &[ModuleKind::Arm9Static, ModuleKind::Arm7Static] {
        if let Some(m) = set.get(kind) {
            if !ram_reachable(m.ram_addr, m.data.len()) {
                findings.push(Finding::BadLoadAddress(kind));
            }
        }
    }

    if let (Some(a9), Some(a7)) = (&set.arm9_static, &set.arm7_static) {
        let computed = pair_crc(&a9.data, &a7.data);
        if computed != hdr.static_crc {
            findings.push(Finding::ChecksumMismatch {
                region: "static modules",
                stored: hdr.static_crc,
                computed,
            });
        }
    }
    if let (Some(a9), Some(a7)) = (&set.arm9_secondary, &set.arm7_secondary) {
        let computed = pair_crc(&a9.data, &a7.data);
        if computed != hdr.secondary_crc {
            findings.push(Finding::ChecksumMismatch {
                region: "secondary modules",
                stored: hdr.secondary_crc,
                computed,
            });
        }
    }
    if let Some(rsrc) = &set.resources {
        let computed = crc16(&rsrc.data, 0xFFFF);
        if computed != hdr.resource_crc {
            findings.push(Finding::ChecksumMismatch {
                region: "resources pack",
                stored: hdr.resource_crc,
                computed,
            });
        }
    }

    match wireless::table_crc(buf) {
        None => findings.push(Finding::BadWirelessTableSize(wireless::table_size(buf))),
        Some(computed) => {
            let stored = wireless::stored_crc(buf);
            if computed != stored {
                findings.push(Finding::ChecksumMismatch {
                    region: "wireless init table",
                    stored,
                    computed,
                });
            }
        }
    }
    let rf_type = wireless::rf_type(buf);
    if !wireless::is_valid_rf_type(rf_type) {
        findings.push(Finding::BadRfType(rf_type));
    }
    let channels = wireless::allowed_channels(buf);
    if !wireless::is_valid_channel_mask(channels) {
        findings.push(Finding::BadChannelMask(channels));
    }

    findings
}

// ----- fix

/// A field rewritten by [`fix`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Correction {
    pub field: String,
    pub from: u16,
    pub to: u16,
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corrected {} ({:04X} -> {:04X})", self.field, self.from, self.to)
    }
}

/// Offsets of the configuration regions below the user-config area.
struct ConfigRegions {
    user_config: Option<usize>,
    conn: Option<usize>,
    conn_ex: Option<usize>,
}

fn config_regions(image: &FlashImage) -> ConfigRegions {
    let hdr = image.header();
    let ncd = hdr.user_config_offset() as usize;

    let user_config = if ncd < image.size() && ncd + config::AREA_SIZE <= image.size() {
        Some(ncd)
    } else {
        None
    };
    let conn = match user_config {
        Some(ncd) if ncd >= conn::CONN_BLOCK => Some(ncd - conn::CONN_BLOCK),
        _ => None,
    };
    let conn_ex = match conn {
        Some(c) if hdr.has_twl_settings() && c >= conn::CONN_EX_BLOCK => {
            Some(c - conn::CONN_EX_BLOCK)
        }
        _ => None,
    };

    ConfigRegions { user_config, conn, conn_ex }
}

fn decrypt_region(cipher: &Blowfish, region: &mut [u8]) {
    for block in region.chunks_exact_mut(8) {
        cipher.decrypt_block(block);
    }
}

fn encrypt_region(cipher: &Blowfish, region: &mut [u8]) {
    for block in region.chunks_exact_mut(8) {
        cipher.encrypt_block(block);
    }
}

/// Rewrites the module CRC header fields.
///
/// The static and secondary CRCs are part of the cipher key, so the stored
/// static modules are decrypted under the old header and re-encrypted under
/// the new one.
fn apply_module_crcs(
    image: &mut FlashImage,
    set: &ModuleSet,
    static_crc: Option<u16>,
    secondary_crc: Option<u16>,
    resource_crc: Option<u16>,
) {
    let mut hdr = image.header();
    if let Some(crc) = resource_crc {
        hdr.resource_crc = crc;
    }

    if static_crc.is_none() && secondary_crc.is_none() {
        image.write_header(&hdr);
        return;
    }

    let statics: Vec<(usize, usize)> = [&set.arm9_static, &set.arm7_static]
        .iter()
        .filter_map(|m| m.as_ref())
        .map(|m| (m.rom_offset as usize, m.compressed_size as usize))
        .collect();

    let old_cipher = Blowfish::from_header(image.bytes());
    let buf = image.bytes_mut();
    for &(at, size) in &statics {
        decrypt_region(&old_cipher, &mut buf[at..at + size]);
    }

    if let Some(crc) = static_crc {
        hdr.static_crc = crc;
    }
    if let Some(crc) = secondary_crc {
        hdr.secondary_crc = crc;
    }
    image.write_header(&hdr);

    let new_cipher = Blowfish::from_header(image.bytes());
    let buf = image.bytes_mut();
    for &(at, size) in &statics {
        encrypt_region(&new_cipher, &mut buf[at..at + size]);
    }
}

/// Recomputes the three module CRC header fields from the current module
/// contents.
pub fn update_module_checksums(image: &mut FlashImage) {
    let set = image.unpack_modules();

    let static_crc = match (&set.arm9_static, &set.arm7_static) {
        (Some(a9), Some(a7)) => Some(pair_crc(&a9.data, &a7.data)),
        _ => None,
    };
    let secondary_crc = match (&set.arm9_secondary, &set.arm7_secondary) {
        (Some(a9), Some(a7)) => Some(pair_crc(&a9.data, &a7.data)),
        _ => None,
    };
    let resource_crc = set.resources.as_ref().map(|m| crc16(&m.data, 0xFFFF));

    apply_module_crcs(image, &set, static_crc, secondary_crc, resource_crc);
}

/// Recomputes and writes back every checksum in the image: module CRCs,
/// the wireless table CRC, connection settings CRCs, and the user-config
/// CRCs. Returns the corrections applied.
pub fn fix(image: &mut FlashImage) -> Vec<Correction> {
    let mut corrections = Vec::new();
    let hdr = image.header();
    let set = image.unpack_modules();

    // 1-3. module CRCs
    let mut static_crc = None;
    let mut secondary_crc = None;
    let mut resource_crc = None;

    match (&set.arm9_static, &set.arm7_static) {
        (Some(a9), Some(a7)) => {
            let computed = pair_crc(&a9.data, &a7.data);
            if computed != hdr.static_crc {
                static_crc = Some(computed);
                corrections.push(Correction {
                    field: "static module CRC".into(),
                    from: hdr.static_crc,
                    to: computed,
                });
            }
        }
        _ => warn!("could not decompress the static modules"),
    }
    match (&set.arm9_secondary, &set.arm7_secondary) {
        (Some(a9), Some(a7)) => {
            let computed = pair_crc(&a9.data, &a7.data);
            if computed != hdr.secondary_crc {
                secondary_crc = Some(computed);
                corrections.push(Correction {
                    field: "secondary module CRC".into(),
                    from: hdr.secondary_crc,
                    to: computed,
                });
            }
        }
        _ => warn!("could not decompress the secondary modules"),
    }
    match &set.resources {
        Some(rsrc) => {
            let computed = crc16(&rsrc.data, 0xFFFF);
            if computed != hdr.resource_crc {
                resource_crc = Some(computed);
                corrections.push(Correction {
                    field: "resources pack CRC".into(),
                    from: hdr.resource_crc,
                    to: computed,
                });
            }
        }
        None => warn!("could not decompress the resources pack"),
    }

    if static_crc.is_some() || secondary_crc.is_some() || resource_crc.is_some() {
        apply_module_crcs(image, &set, static_crc, secondary_crc, resource_crc);
    }

    // 4. wireless table CRC
    if let Some(computed) = wireless::table_crc(image.bytes()) {
        let stored = wireless::stored_crc(image.bytes());
        if computed != stored {
            wireless::update_crc(image.bytes_mut());
            corrections.push(Correction {
                field: "wireless init CRC".into(),
                from: stored,
                to: computed,
            });
        }
    }

    let regions = config_regions(image);
    let has_ex_config = hdr.has_ex_config();

    // 5. connection settings CRCs
    if let Some(conn_at) = regions.conn {
        for i in 0..conn::CONN_COUNT {
            let at = conn_at + i * conn::CONN_SIZE;
            let record = &image.bytes()[at..at + conn::CONN_SIZE];
            if !conn::is_configured(record) {
                continue;
            }

            let computed = conn::record_crc(record);
            let stored = conn::stored_crc(record);
            if computed != stored {
                conn::set_stored_crc(&mut image.bytes_mut()[at..at + conn::CONN_SIZE], computed);
                corrections.push(Correction {
                    field: format!("connection {} CRC", i + 1),
                    from: stored,
                    to: computed,
                });
            }
        }
    }
    if let Some(ex_at) = regions.conn_ex {
        for i in 0..conn::CONN_COUNT {
            let at = ex_at + i * conn::CONN_EX_SIZE;
            let record = &image.bytes()[at..at + conn::CONN_EX_SIZE];
            if !conn::is_configured(record) {
                continue;
            }

            let computed = conn::record_crc(record);
            let stored = conn::stored_crc(record);
            if computed != stored {
                conn::set_stored_crc(&mut image.bytes_mut()[at..at + conn::CONN_EX_SIZE], computed);
                corrections.push(Correction {
                    field: format!("connection {} CRC", i + 4),
                    from: stored,
                    to: computed,
                });
            }

            let record = &image.bytes()[at..at + conn::CONN_EX_SIZE];
            let computed = conn::record_ex_crc(record);
            let stored = conn::stored_ex_crc(record);
            if computed != stored {
                conn::set_stored_ex_crc(&mut image.bytes_mut()[at..at + conn::CONN_EX_SIZE], computed);
                corrections.push(Correction {
                    field: format!("connection {} extended CRC", i + 4),
                    from: stored,
                    to: computed,
                });
            }
        }
    }

    // 6. user config CRCs
    if let Some(ncd_at) = regions.user_config {
        for i in 0..2 {
            let at = ncd_at + i * config::SLOT_SIZE;

            let slot = &image.bytes()[at..at + config::SLOT_SIZE];
            if config::version(slot) != config::VERSION {
                warn!("user config {}: unsupported version {}", i, config::version(slot));
                continue;
            }

            let computed = config::slot_crc(slot);
            let stored = config::stored_crc(slot);
            if computed != stored {
                let slot = &mut image.bytes_mut()[at..at + config::SLOT_SIZE];
                LittleEndian::write_u16(&mut slot[0x72..], computed);
                corrections.push(Correction {
                    field: format!("user config {} CRC", i),
                    from: stored,
                    to: computed,
                });
            }

            if has_ex_config {
                let ex_version = config::ex_version(&image.bytes()[at..at + config::SLOT_SIZE]);
                if ex_version != 1 {
                    image.bytes_mut()[at + 0x74] = 1;
                    corrections.push(Correction {
                        field: format!("user config {} extended version", i),
                        from: ex_version as u16,
                        to: 1,
                    });
                }

                let slot = &image.bytes()[at..at + config::SLOT_SIZE];
                let computed = config::slot_ex_crc(slot);
                let stored = config::stored_ex_crc(slot);
                if computed != stored {
                    let slot = &mut image.bytes_mut()[at..at + config::SLOT_SIZE];
                    LittleEndian::write_u16(&mut slot[0xFE..], computed);
                    corrections.push(Correction {
                        field: format!("user config {} extended CRC", i),
                        from: stored,
                        to: computed,
                    });
                }
            }
        }
    }

    corrections
}

// ----- compact / import

/// Size change of one module after a repack.
#[derive(Clone, Copy, Debug)]
pub struct CompactEntry {
    pub kind: ModuleKind,
    pub old_size: u32,
    pub new_size: u32,
}

/// Writes a full module layout: offsets from 0x200 in canonical order,
/// header offsets and CRCs, then the (re-encrypted) module bytes.
fn write_layout(
    image: &mut FlashImage,
    mut packs: [Vec<u8>; 5],
    crcs: (u16, u16, u16),
) -> Result<(), Error> {
    let mut offsets = [0u32; 5];
    let mut cur = MODULE_BASE;
    for (offset, pack) in offsets.iter_mut().zip(&packs) {
        *offset = cur;
        cur += pack.len() as u32;
        cur = (cur + 7) & !7;
    }

    let mut hdr = image.header();
    let mut floor = hdr.user_config_offset().saturating_sub(conn::CONN_BLOCK as u32);
    if hdr.has_twl_settings() {
        floor = floor.saturating_sub(conn::CONN_EX_BLOCK as u32);
    }
    let floor = floor.min(image.size() as u32);
    if cur >= floor {
        return Err(Error::OutOfSpace);
    }

    hdr.arm9_static_rom_addr = (offsets[0] / 8) as u16;
    hdr.arm9_rom_scale = 1;
    hdr.arm7_static_rom_addr = (offsets[1] / 8) as u16;
    hdr.arm7_rom_scale = 1;
    hdr.arm9_secondary_rom_addr = (offsets[2] / 8) as u16;
    hdr.arm7_secondary_rom_addr = (offsets[3] / 8) as u16;
    hdr.resource_rom_addr = (offsets[4] / 8) as u16;
    hdr.static_crc = crcs.0;
    hdr.secondary_crc = crcs.1;
    hdr.resource_crc = crcs.2;
    image.write_header(&hdr);

    // the header is final; encrypt the static modules against it
    let cipher = Blowfish::from_header(image.bytes());
    encrypt_region(&cipher, &mut packs[0]);
    encrypt_region(&cipher, &mut packs[1]);

    let buf = image.bytes_mut();
    for (offset, pack) in offsets.iter().zip(&packs) {
        let at = *offset as usize;
        buf[at..at + pack.len()].copy_from_slice(pack);
    }

    Ok(())
}

/// Recompresses every module and repacks them tightly from 0x200.
pub fn compact(image: &mut FlashImage) -> Result<Vec<CompactEntry>, Error> {
    let set = image.unpack_modules();
    let mut modules = Vec::with_capacity(5);
    for kind in ModuleKind::ALL {
        modules.push(set.get(kind).ok_or(Error::NotDecodable(kind))?);
    }

    let packs = [
        pad_to(lz::compress(&modules[0].data), 8),
        pad_to(lz::compress(&modules[1].data), 8),
        pad_to(ash::compress_firmware(&modules[2].data), 8),
        pad_to(ash::compress_firmware(&modules[3].data), 8),
        pad_to(ash::compress_firmware(&modules[4].data), 8),
    ];

    let entries = modules
        .iter()
        .zip(&packs)
        .map(|(m, pack)| CompactEntry {
            kind: m.kind,
            old_size: m.compressed_size,
            new_size: pack.len() as u32,
        })
        .collect();

    let crcs = (
        pair_crc(&modules[0].data, &modules[1].data),
        pair_crc(&modules[2].data, &modules[3].data),
        crc16(&modules[4].data, 0xFFFF),
    );

    write_layout(image, packs, crcs)?;
    Ok(entries)
}

/// How the caller's bytes are packaged for [`import`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportFormat {
    /// Plain binary: compress (and for static modules, encrypt).
    Raw,
    /// Already compressed; static modules still need encrypting.
    Compressed,
    /// Compressed and encrypted with this image's key.
    Encrypted,
}

/// What [`export`] should produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportFormat {
    /// Fully decoded module contents.
    Decompressed,
    /// The stored compressed form, decrypted for static modules.
    Compressed,
    /// The stored bytes exactly as they appear in the image.
    Encrypted,
}

/// Reads the stored form of a module, padded out to its 8-byte size.
fn stored_bytes(image: &FlashImage, rom_offset: u32, compressed_size: u32) -> Vec<u8> {
    let at = rom_offset as usize;
    let end = (at + compressed_size as usize).min(image.size());
    let mut v = image.bytes()[at..end].to_vec();
    v.resize(compressed_size as usize, 0);
    v
}

/// Extracts one module.
pub fn export(image: &FlashImage, kind: ModuleKind, format: ExportFormat) -> Result<Vec<u8>, Error> {
    let info = image.module_info(kind)?;
    match format {
        ExportFormat::Decompressed => Ok(info.data),
        ExportFormat::Encrypted => Ok(stored_bytes(image, info.rom_offset, info.compressed_size)),
        ExportFormat::Compressed => {
            let mut bytes = stored_bytes(image, info.rom_offset, info.compressed_size);
            if kind.is_static() {
                let cipher = Blowfish::from_header(image.bytes());
                decrypt_region(&cipher, &mut bytes);
            }
            Ok(bytes)
        }
    }
}

/// Decodes a compressed module payload for revalidation. Unlike the soft
/// module-locator path, failures here are hard: an import that cannot be
/// decoded is refused with the underlying stream error.
fn decode_compressed(kind: ModuleKind, bytes: &[u8]) -> Result<Vec<u8>, Error> {
    if kind.is_static() {
        let (data, _) = lz::decompress(bytes)?;
        return Ok(data);
    }
    if bytes.first() == Some(&0x10) {
        if let Ok((data, _)) = lz::decompress(bytes) {
            return Ok(data);
        }
    }
    Ok(ash::decompress(bytes)?)
}

/// Replaces one module and repacks the layout.
///
/// All five modules are revalidated: the operation refuses if any module
/// (including the imported payload) cannot be decoded, or if the new
/// layout would cross into the configuration area.
pub fn import(
    image: &mut FlashImage,
    kind: ModuleKind,
    data: &[u8],
    format: ImportFormat,
) -> Result<(), Error> {
    let set = image.unpack_modules();
    let cipher = Blowfish::from_header(image.bytes());

    let mut packs: Vec<Vec<u8>> = Vec::with_capacity(5);
    let mut contents: Vec<Vec<u8>> = Vec::with_capacity(5);

    for k in ModuleKind::ALL {
        if k == kind {
            // placeholder, replaced below
            packs.push(Vec::new());
            contents.push(Vec::new());
            continue;
        }
        let m = set.get(k).ok_or(Error::NotDecodable(k))?;
        let mut stored = stored_bytes(image, m.rom_offset, m.compressed_size);
        if k.is_static() {
            decrypt_region(&cipher, &mut stored);
        }
        packs.push(stored);
        contents.push(m.data.clone());
    }

    let slot = ModuleKind::ALL.iter().position(|&k| k == kind).unwrap_or(0);
    let compressed = match format {
        ImportFormat::Raw => {
            if kind.is_static() {
                pad_to(lz::compress(data), 8)
            } else {
                // keep the module's current compression kind
                let current = set.get(kind).map(|m| m.compression);
                match current {
                    Some(Compression::Ash) | None => pad_to(ash::compress_firmware(data), 8),
                    _ => pad_to(lz::compress(data), 8),
                }
            }
        }
        ImportFormat::Compressed => pad_to(data.to_vec(), 8),
        ImportFormat::Encrypted => {
            let mut bytes = pad_to(data.to_vec(), 8);
            if kind.is_static() {
                decrypt_region(&cipher, &mut bytes);
            }
            bytes
        }
    };

    contents[slot] = decode_compressed(kind, &compressed)?;
    packs[slot] = compressed;

    let crcs = (
        pair_crc(&contents[0], &contents[1]),
        pair_crc(&contents[2], &contents[3]),
        crc16(&contents[4], 0xFFFF),
    );

    let mut iter = packs.into_iter();
    let packs = [
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
    ];
    write_layout(image, packs, crcs)
}

// ----- clean / restore

/// Wipes the wireless init table, connection settings and user
/// configuration, returning a backup of everything erased.
///
/// The user-config slots are rewritten to factory-fresh contents rather
/// than blanked, so the image still arbitrates cleanly.
pub fn clean(image: &mut FlashImage) -> Result<SettingsBackup, Error> {
    let hdr = image.header();
    let regions = config_regions(image);
    let mut saved = SettingsBackup::default();

    let wl_at = HEADER_SIZE;
    let wl_size = wireless::TABLE_END - wl_at;
    saved.wl_size = wl_size as u16;
    saved.wl_table[..wl_size].copy_from_slice(&image.bytes()[wl_at..wireless::TABLE_END]);

    if let Some(ncd_at) = regions.user_config {
        saved.user_config_size = config::AREA_SIZE as u16;
        saved
            .user_config
            .copy_from_slice(&image.bytes()[ncd_at..ncd_at + config::AREA_SIZE]);
    }
    if let Some(conn_at) = regions.conn {
        saved.conn_size = conn::CONN_BLOCK as u16;
        saved
            .conn
            .copy_from_slice(&image.bytes()[conn_at..conn_at + conn::CONN_BLOCK]);
    }
    if let Some(ex_at) = regions.conn_ex {
        saved.conn_ex_size = conn::CONN_EX_BLOCK as u16;
        saved
            .conn_ex
            .copy_from_slice(&image.bytes()[ex_at..ex_at + conn::CONN_EX_BLOCK]);
    }

    let buf = image.bytes_mut();
    for b in buf[wl_at..wireless::TABLE_END].iter_mut() {
        *b = 0xFF;
    }
    if let Some(conn_at) = regions.conn {
        for b in buf[conn_at..conn_at + conn::CONN_BLOCK].iter_mut() {
            *b = 0xFF;
        }
    }
    if let Some(ex_at) = regions.conn_ex {
        for b in buf[ex_at..ex_at + conn::CONN_EX_BLOCK].iter_mut() {
            *b = 0xFF;
        }
    }
    if let Some(ncd_at) = regions.user_config {
        for i in 0..2 {
            let at = ncd_at + i * config::SLOT_SIZE;
            config::write_fresh_slot(&mut buf[at..at + config::SLOT_SIZE], i, hdr.ipl2_type);
        }
    }

    Ok(saved)
}

/// Copies the four backed-up regions back into the image, clamping each
/// copy to the stored length.
pub fn restore(image: &mut FlashImage, saved: &SettingsBackup) -> Result<(), Error> {
    let regions = config_regions(image);

    let wl_at = HEADER_SIZE;
    let n = (saved.wl_size as usize)
        .min(backup::WL_CAPACITY)
        .min(wireless::TABLE_END - wl_at);
    image.bytes_mut()[wl_at..wl_at + n].copy_from_slice(&saved.wl_table[..n]);

    if let Some(ncd_at) = regions.user_config {
        let n = (saved.user_config_size as usize).min(config::AREA_SIZE);
        image.bytes_mut()[ncd_at..ncd_at + n].copy_from_slice(&saved.user_config[..n]);
    }
    if let Some(conn_at) = regions.conn {
        let n = (saved.conn_size as usize).min(conn::CONN_BLOCK);
        image.bytes_mut()[conn_at..conn_at + n].copy_from_slice(&saved.conn[..n]);
    }
    if let Some(ex_at) = regions.conn_ex {
        let n = (saved.conn_ex_size as usize).min(conn::CONN_EX_BLOCK);
        image.bytes_mut()[ex_at..ex_at + n].copy_from_slice(&saved.conn_ex[..n]);
    }

    Ok(())
}

// ----- reporting

/// Digests of one module's stored and decoded forms.
#[derive(Clone, Copy, Debug)]
pub struct ModuleDigests {
    pub compressed: [u8; 16],
    pub uncompressed: [u8; 16],
}

/// MD5 digests over the image and its modules.
pub struct DigestReport {
    pub image: [u8; 16],
    pub modules: Vec<(ModuleKind, Option<ModuleDigests>)>,
}

/// Computes the md5 report.
pub fn md5_report(image: &FlashImage) -> DigestReport {
    let set = image.unpack_modules();

    let modules = set
        .iter()
        .map(|(kind, module)| {
            let digests = module.map(|m| ModuleDigests {
                compressed: md5::compute(stored_bytes(image, m.rom_offset, m.compressed_size)).0,
                uncompressed: md5::compute(&m.data).0,
            });
            (kind, digests)
        })
        .collect();

    DigestReport {
        image: md5::compute(image.bytes()).0,
        modules,
    }
}

/// The effective user configuration and the decoded connection settings.
pub struct UserReport {
    /// Index of the slot that won arbitration.
    pub slot: usize,
    pub owner: config::OwnerInfo,
    pub has_ex_config: bool,
    /// Base connection records, then extended records where present.
    pub connections: Vec<conn::ConnInfo>,
}

/// Reads the effective user configuration.
///
/// `Ok(None)` means neither slot passes its CRC. A recognised slot whose
/// schema version is not 5 is refused.
pub fn user_info(image: &FlashImage) -> Result<Option<UserReport>, Error> {
    let regions = config_regions(image);
    let ncd_at = match regions.user_config {
        Some(at) => at,
        None => return Err(Error::InvalidImage),
    };

    let area = &image.bytes()[ncd_at..ncd_at + config::AREA_SIZE];
    let slot = match config::effective_slot(area) {
        Some(slot) => slot,
        None => return Ok(None),
    };

    let bytes = &area[slot * config::SLOT_SIZE..(slot + 1) * config::SLOT_SIZE];
    let version = config::version(bytes);
    if version != config::VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let mut connections = Vec::new();
    if let Some(conn_at) = regions.conn {
        for i in 0..conn::CONN_COUNT {
            let at = conn_at + i * conn::CONN_SIZE;
            connections.push(conn::conn_info(&image.bytes()[at..at + conn::CONN_SIZE], false));
        }
    }
    if let Some(ex_at) = regions.conn_ex {
        for i in 0..conn::CONN_COUNT {
            let at = ex_at + i * conn::CONN_EX_SIZE;
            connections.push(conn::conn_info(&image.bytes()[at..at + conn::CONN_EX_SIZE], true));
        }
    }

    Ok(Some(UserReport {
        slot,
        owner: config::owner_info(bytes),
        has_ex_config: image.header().has_ex_config(),
        connections,
    }))
}

/// Finds the module loaded at a RAM address, with the offset into it.
pub fn locate_ram_address(image: &FlashImage, addr: u32) -> Option<(ModuleKind, u32)> {
    let set = image.unpack_modules();
    for (kind, module) in set.iter() {
        if let Some(m) = module {
            if m.ram_addr != 0
                && addr >= m.ram_addr
                && (addr - m.ram_addr) < m.data.len() as u32
            {
                return Some((kind, addr - m.ram_addr));
            }
        }
    }
    None
}

/// A named extent of the image address space.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub start: u32,
    pub size: u32,
    pub name: &'static str,
}

/// Maps out the image: header, modules, and configuration areas, sorted by
/// start offset. Modules that fail to decode are omitted.
pub fn memory_map(image: &FlashImage) -> Vec<Region> {
    let hdr = image.header();
    let set = image.unpack_modules();

    let mut regions = vec![Region { start: 0, size: MODULE_BASE, name: "Header" }];
    for (kind, module) in set.iter() {
        if let Some(m) = module {
            regions.push(Region {
                start: m.rom_offset,
                size: m.compressed_size,
                name: match kind {
                    ModuleKind::Arm9Static => "ARM9 Static",
                    ModuleKind::Arm7Static => "ARM7 Static",
                    ModuleKind::Arm9Secondary => "ARM9 Secondary",
                    ModuleKind::Arm7Secondary => "ARM7 Secondary",
                    ModuleKind::Resources => "Resources Pack",
                },
            });
        }
    }

    let ncd = hdr.user_config_offset();
    let conn_size = if hdr.has_twl_settings() {
        (conn::CONN_BLOCK + conn::CONN_EX_BLOCK) as u32
    } else {
        conn::CONN_BLOCK as u32
    };
    if ncd >= conn_size {
        regions.push(Region { start: ncd - conn_size, size: conn_size, name: "Connection Settings" });
    }
    regions.push(Region { start: ncd, size: config::AREA_SIZE as u32, name: "User Configuration" });

    regions.sort_by_key(|r| r.start);
    regions
}
