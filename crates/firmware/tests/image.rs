//! End-to-end tests over synthetic firmware images.

use byteorder::{ByteOrder, LittleEndian};

use codec::{ash, lz, pad_to};
use common::util::crc16;

use firmware::flash::encrypt::Blowfish;
use firmware::flash::header::{FlashHeader, IPL2_EXTENDED, IPL2_USG};
use firmware::flash::ops::{self, ExportFormat, Finding, ImportFormat};
use firmware::flash::{config, conn, wireless, FlashImage, ModuleKind};
use firmware::Error;

const IMAGE_SIZE: usize = 0x40000;
const NCD_OFFSET: usize = 0x3FE00;

/// Deterministic mildly-compressible module content.
fn payload(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        if state & 3 == 0 {
            // a run, to give the compressors something to chew on
            let b = (state >> 8) as u8;
            for _ in 0..(state >> 16 & 0x1F) + 4 {
                out.push(b);
            }
        } else {
            out.push((state >> 24) as u8);
        }
    }
    out.truncate(len);
    out
}

struct Payloads {
    arm9: Vec<u8>,
    arm7: Vec<u8>,
    arm9s: Vec<u8>,
    arm7s: Vec<u8>,
    rsrc: Vec<u8>,
}

fn payloads() -> Payloads {
    Payloads {
        arm9: payload(1, 0x800),
        arm7: payload(2, 0x400),
        arm9s: payload(3, 0x600),
        arm7s: payload(4, 0x200),
        rsrc: payload(5, 0x500),
    }
}

/// Builds a well-formed image: five compressed modules packed from 0x200,
/// valid CRCs, a sane wireless table, and fresh user-config slots.
fn build_image() -> FlashImage {
    let p = payloads();
    let mut buf = vec![0xFFu8; IMAGE_SIZE];

    let packs = [
        pad_to(lz::compress(&p.arm9), 8),
        pad_to(lz::compress(&p.arm7), 8),
        pad_to(ash::compress_firmware(&p.arm9s), 8),
        pad_to(ash::compress_firmware(&p.arm7s), 8),
        pad_to(ash::compress_firmware(&p.rsrc), 8),
    ];

    // scattered with gaps, so a compact actually moves things
    let mut offsets = [0u32; 5];
    let mut cur = 0x200u32;
    for (offset, pack) in offsets.iter_mut().zip(&packs) {
        *offset = cur;
        cur += pack.len() as u32 + 0x40;
    }

    let hdr = FlashHeader {
        arm9_secondary_rom_addr: (offsets[2] / 8) as u16,
        arm7_secondary_rom_addr: (offsets[3] / 8) as u16,
        secondary_crc: crc16(&p.arm7s, crc16(&p.arm9s, 0xFFFF)),
        static_crc: crc16(&p.arm7, crc16(&p.arm9, 0xFFFF)),
        key_word: 0x1234_5678,
        arm9_static_rom_addr: (offsets[0] / 8) as u16,
        // RAM 0x02000000 = 0x02800000 - 0x8000 * (4 << 6)
        arm9_static_ram_addr: 0x8000,
        arm7_static_rom_addr: (offsets[1] / 8) as u16,
        // RAM 0x02380000 = 0x02800000 - 0x4800 * (4 << 6)
        arm7_static_ram_addr: 0x4800,
        arm9_rom_scale: 1,
        arm9_ram_scale: 6,
        arm7_rom_scale: 1,
        arm7_ram_scale: 6,
        arm7_main_ram: true,
        flash_capacity: 1,
        resource_rom_addr: (offsets[4] / 8) as u16,
        timestamp: [0x00, 0x30, 0x12, 0x05, 0x06],
        ipl2_type: IPL2_EXTENDED | IPL2_USG,
        pad_1e: 0,
        nvram_user_config_addr: (NCD_OFFSET / 8) as u16,
        field_22: 0,
        field_24: 0,
        resource_crc: crc16(&p.rsrc, 0xFFFF),
        field_28: 0,
    };
    hdr.write(&mut buf);

    // wireless table
    LittleEndian::write_u16(&mut buf[0x2C..], 0x17C); // table size
    buf[0x2E] = 0x02; // vendor
    buf[0x2F] = 0x05; // module
    buf[0x36..0x3C].copy_from_slice(&[0x00, 0x09, 0xBF, 0x11, 0x22, 0x33]);
    LittleEndian::write_u16(&mut buf[0x3C..], 0x3FFE); // channels 1..=13
    buf[0x40] = 0x02; // RF2958
    buf[0x42] = 0x04;
    wireless::update_crc(&mut buf);

    // user config slots
    for i in 0..2 {
        let at = NCD_OFFSET + i * config::SLOT_SIZE;
        config::write_fresh_slot(&mut buf[at..at + config::SLOT_SIZE], i, hdr.ipl2_type);
    }

    // the header is final: encrypt the static modules against it
    let cipher = Blowfish::from_header(&buf);
    for (i, pack) in packs.iter().enumerate() {
        let mut pack = pack.clone();
        if i < 2 {
            cipher.encrypt(&mut pack).unwrap();
        }
        let at = offsets[i] as usize;
        buf[at..at + pack.len()].copy_from_slice(&pack);
    }

    FlashImage::from_bytes(buf).unwrap()
}

#[test]
fn unpack_round_trips_every_module() {
    let image = build_image();
    let p = payloads();
    let set = image.unpack_modules();

    assert_eq!(set.arm9_static.as_ref().unwrap().data, p.arm9);
    assert_eq!(set.arm7_static.as_ref().unwrap().data, p.arm7);
    assert_eq!(set.arm9_secondary.as_ref().unwrap().data, p.arm9s);
    assert_eq!(set.arm7_secondary.as_ref().unwrap().data, p.arm7s);
    assert_eq!(set.resources.as_ref().unwrap().data, p.rsrc);

    let a9 = set.arm9_static.as_ref().unwrap();
    assert_eq!(a9.rom_offset, 0x200);
    assert_eq!(a9.compressed_size % 8, 0);
    assert_eq!(a9.ram_addr, 0x0200_0000);
    assert_eq!(set.arm7_static.as_ref().unwrap().ram_addr, 0x0238_0000);
}

#[test]
fn verify_accepts_a_well_formed_image() {
    let image = build_image();
    assert_eq!(ops::verify(&image), vec![]);
}

#[test]
fn verify_reports_and_fix_repairs_checksums() {
    let mut image = build_image();

    // resource CRC, wireless CRC, and a user-config CRC
    image.poke(0x26, &[0xAA, 0xAA]).unwrap();
    image.poke(0x2A, &[0x00, 0x00]).unwrap();
    image.poke(NCD_OFFSET as u32 + 0x72, &[0x00, 0x00]).unwrap();

    let findings = ops::verify(&image);
    assert!(findings
        .iter()
        .any(|f| matches!(f, Finding::ChecksumMismatch { region: "resources pack", .. })));
    assert!(findings
        .iter()
        .any(|f| matches!(f, Finding::ChecksumMismatch { region: "wireless init table", .. })));

    let corrections = ops::fix(&mut image);
    assert!(corrections.len() >= 3);
    assert_eq!(ops::verify(&image), vec![]);

    // fixing again finds nothing left to correct
    assert_eq!(ops::fix(&mut image), vec![]);
}

#[test]
fn verify_reports_bad_wireless_fields() {
    let mut image = build_image();
    image.poke(0x40, &[0x04]).unwrap(); // TEST rf type
    image.poke(0x3C, &[0x01, 0x80]).unwrap(); // channels 0 and 15
    wireless::update_crc(image.bytes_mut());

    let findings = ops::verify(&image);
    assert!(findings.contains(&Finding::BadRfType(4)));
    assert!(findings.contains(&Finding::BadChannelMask(0x8001)));
}

#[test]
fn compact_packs_modules_in_order() {
    let mut image = build_image();
    let before = image.unpack_modules();

    let entries = ops::compact(&mut image).unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(ops::verify(&image), vec![]);

    let hdr = image.header();
    let set = image.unpack_modules();
    let mut expected = 0x200u32;
    for kind in ModuleKind::ALL.iter().copied() {
        let m = set.get(kind).unwrap();
        assert_eq!(kind.rom_offset(&hdr), expected, "{}", kind.name());
        assert_eq!(m.rom_offset % 8, 0);
        expected += m.compressed_size;

        // contents are preserved
        assert_eq!(m.data, before.get(kind).unwrap().data);
    }
    assert_eq!(hdr.arm9_rom_scale, 1);
    assert_eq!(hdr.arm7_rom_scale, 1);
}

#[test]
fn compact_is_idempotent() {
    let mut image = build_image();

    ops::compact(&mut image).unwrap();
    let first = image.bytes().to_vec();

    ops::compact(&mut image).unwrap();
    assert_eq!(image.bytes(), &first[..]);
}

#[test]
fn export_import_round_trip_raw() {
    let mut image = build_image();
    let p = payloads();

    let exported = ops::export(&image, ModuleKind::Arm9Secondary, ExportFormat::Decompressed).unwrap();
    assert_eq!(exported, p.arm9s);

    // modify and import back as plain binary
    let mut replacement = exported;
    replacement.extend_from_slice(b"patched tail");
    ops::import(&mut image, ModuleKind::Arm9Secondary, &replacement, ImportFormat::Raw).unwrap();

    assert_eq!(ops::verify(&image), vec![]);
    let set = image.unpack_modules();
    assert_eq!(set.arm9_secondary.as_ref().unwrap().data, replacement);
    // other modules survive the repack
    assert_eq!(set.arm7_static.as_ref().unwrap().data, p.arm7);
    assert_eq!(set.resources.as_ref().unwrap().data, p.rsrc);
}

#[test]
fn export_import_round_trip_compressed() {
    let mut image = build_image();
    let p = payloads();

    let compressed = ops::export(&image, ModuleKind::Resources, ExportFormat::Compressed).unwrap();
    ops::import(&mut image, ModuleKind::Resources, &compressed, ImportFormat::Compressed).unwrap();
    assert_eq!(ops::verify(&image), vec![]);
    assert_eq!(image.unpack_modules().resources.unwrap().data, p.rsrc);
}

#[test]
fn export_import_round_trip_encrypted_static() {
    let mut image = build_image();
    let p = payloads();

    let encrypted = ops::export(&image, ModuleKind::Arm7Static, ExportFormat::Encrypted).unwrap();
    ops::import(&mut image, ModuleKind::Arm7Static, &encrypted, ImportFormat::Encrypted).unwrap();
    assert_eq!(ops::verify(&image), vec![]);
    assert_eq!(image.unpack_modules().arm7_static.unwrap().data, p.arm7);
}

#[test]
fn import_refuses_oversized_modules() {
    let mut image = build_image();
    let before = image.bytes().to_vec();

    // an all-literal LZ stream bigger than the space below the config area
    let huge = payload(99, 0x3F000);
    let mut stream = vec![0x10, 0x00, 0xF0, 0x03];
    for chunk in huge.chunks(8) {
        stream.push(0x00);
        stream.extend_from_slice(chunk);
    }

    let err = ops::import(&mut image, ModuleKind::Resources, &stream, ImportFormat::Compressed);
    assert!(matches!(err, Err(Error::OutOfSpace)));
    // refused import leaves the image untouched
    assert_eq!(image.bytes(), &before[..]);
}

#[test]
fn clean_then_restore_round_trips_the_config_regions() {
    let mut image = build_image();

    // make the regions distinctive first
    image.poke((NCD_OFFSET - conn::CONN_BLOCK) as u32, &[0x5A; 0x40]).unwrap();
    let before = image.bytes().to_vec();

    let saved = ops::clean(&mut image).unwrap();

    // wireless area wiped, user config rewritten fresh and still valid
    assert!(image.bytes()[0x2A..0x200].iter().all(|&b| b == 0xFF));
    let area = &image.bytes()[NCD_OFFSET..NCD_OFFSET + config::AREA_SIZE];
    assert_eq!(config::effective_slot(area), Some(1));
    assert_eq!(ops::fix(&mut image), vec![]);

    // restoring brings the regions back byte-for-byte
    ops::restore(&mut image, &saved).unwrap();
    assert_eq!(image.bytes(), &before[..]);

    // and the record survives serialisation
    let reloaded = firmware::flash::backup::SettingsBackup::from_bytes(&saved.to_bytes()).unwrap();
    ops::clean(&mut image).unwrap();
    ops::restore(&mut image, &reloaded).unwrap();
    assert_eq!(image.bytes(), &before[..]);
}

#[test]
fn user_info_reads_the_effective_slot() {
    let mut image = build_image();

    let report = ops::user_info(&image).unwrap().unwrap();
    // fresh slots carry counts 0 and 1, so slot 1 wins
    assert_eq!(report.slot, 1);
    assert!(report.has_ex_config);
    assert!(report.owner.nickname.is_empty());
    assert_eq!(report.connections.len(), 3); // no successor-platform block

    // corrupt slot 1 and the arbitration falls back to slot 0
    image.poke(NCD_OFFSET as u32 + 0x100 + 0x20, &[0xEE]).unwrap();
    let report = ops::user_info(&image).unwrap().unwrap();
    assert_eq!(report.slot, 0);

    // corrupt both slots and no config is available
    image.poke(NCD_OFFSET as u32 + 0x20, &[0xEE]).unwrap();
    assert!(ops::user_info(&image).unwrap().is_none());
}

#[test]
fn user_info_refuses_unknown_versions() {
    let mut image = build_image();

    // rewrite slot 1 with a bumped schema version and a matching CRC
    let base = NCD_OFFSET + config::SLOT_SIZE;
    image.poke(base as u32, &[9]).unwrap();
    let crc = config::slot_crc(&image.bytes()[base..base + config::SLOT_SIZE]);
    image.poke(base as u32 + 0x72, &crc.to_le_bytes()).unwrap();

    assert!(matches!(
        ops::user_info(&image),
        Err(Error::UnsupportedVersion(9))
    ));
}

#[test]
fn md5_report_covers_all_modules() {
    let image = build_image();
    let report = ops::md5_report(&image);

    assert_eq!(report.modules.len(), 5);
    for (kind, digests) in &report.modules {
        let digests = digests.as_ref().unwrap_or_else(|| panic!("{} missing", kind.name()));
        assert_ne!(digests.compressed, digests.uncompressed);
    }

    // deterministic
    assert_eq!(ops::md5_report(&image).image, report.image);
}

#[test]
fn locate_finds_static_modules() {
    let image = build_image();
    let found = ops::locate_ram_address(&image, 0x0200_0010);
    assert_eq!(found, Some((ModuleKind::Arm9Static, 0x10)));

    assert_eq!(ops::locate_ram_address(&image, 0x0500_0000), None);
}

#[test]
fn memory_map_is_sorted_and_complete() {
    let image = build_image();
    let map = ops::memory_map(&image);

    assert_eq!(map.first().unwrap().name, "Header");
    assert_eq!(map.last().unwrap().name, "User Configuration");
    assert!(map.windows(2).all(|w| w[0].start <= w[1].start));
    assert_eq!(map.len(), 8); // header + 5 modules + connection + user config
}

#[test]
fn mnemonics_expand_to_rom_offsets() {
    let image = build_image();
    assert_eq!(image.expand_mnemonic("$arm9"), Some(0x200));
    assert_eq!(image.expand_mnemonic("$ncd"), Some(NCD_OFFSET as u64));
    assert_eq!(image.expand_mnemonic("$ncd1"), Some(NCD_OFFSET as u64 + 0x100));
    assert_eq!(
        image.expand_mnemonic("$conn0"),
        Some((NCD_OFFSET - conn::CONN_BLOCK) as u64)
    );
    assert_eq!(image.expand_mnemonic("$bogus"), None);
    assert_eq!(image.expand_mnemonic("arm9"), None);
}

#[test]
fn peek_poke_bounds() {
    let mut image = build_image();

    assert_eq!(image.peek(0x200, 4).unwrap().len(), 4);
    assert!(image.peek(IMAGE_SIZE as u32, 1).is_err());

    assert!(!image.is_dirty());
    let n = image.poke((IMAGE_SIZE - 2) as u32, &[1, 2, 3, 4]).unwrap();
    assert_eq!(n, 2); // truncated at the end of the image
    assert!(image.is_dirty());
}

#[test]
fn dirty_tracking_follows_mutation() {
    let mut image = build_image();
    assert!(!image.is_dirty());

    ops::verify(&image);
    assert!(!image.is_dirty());

    ops::compact(&mut image).unwrap();
    assert!(image.is_dirty());
}
