use std::env;
use std::error::Error;
use std::io::{self, Write};
use std::process;

use firmware::flash::{ops, wireless, FlashImage};

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::try_init_custom_env("FWINFO_LOG").unwrap();

    let file = match env::args_os().nth(1) {
        Some(file) => file,
        None => {
            println!("usage: fwinfo <image>");
            process::exit(0);
        }
    };

    let image = match FlashImage::open(file) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("error: {}", err);
            process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut f = stdout.lock();

    firmware_info(&mut f, &image)?;
    writeln!(f)?;
    memory_map(&mut f, &image)?;

    f.flush()?;

    Ok(())
}

fn firmware_info<W: io::Write>(mut f: W, image: &FlashImage) -> io::Result<()> {
    let hdr = image.header();
    let buf = image.bytes();

    writeln!(f, "Firmware Info:")?;
    let ts = hdr.timestamp;
    writeln!(
        f,
        "  Build date            : 20{:02X}/{:02X}/{:02X} {:02X}:{:02X}",
        ts[4], ts[3], ts[2], ts[1], ts[0]
    )?;
    writeln!(f, "  IPL2 type             : {}", hdr.ipl2_description())?;
    writeln!(f, "  Extended settings     : {}", if hdr.has_ex_config() { "yes" } else { "no" })?;
    writeln!(f, "  Flash capacity        : {} KB", hdr.flash_capacity_bytes() / 1024)?;
    writeln!(f)?;

    writeln!(f, "Module Info:              Offset   Size     Address  Uncompressed")?;
    let set = image.unpack_modules();
    for (kind, module) in set.iter() {
        let (size, addr, uncompressed) = match module {
            Some(m) => (m.compressed_size, m.ram_addr, m.data.len() as u32),
            None => (0, 0, 0),
        };
        let offset = kind.rom_offset(&hdr);
        writeln!(
            f,
            "  {:<22}: {:08X} {:08X} {:08X} {:08X}",
            kind.description(),
            offset,
            size,
            addr,
            uncompressed
        )?;
    }
    writeln!(f)?;

    let mac = wireless::mac(buf);
    let channels = wireless::allowed_channels(buf);
    writeln!(f, "Wireless Info:")?;
    writeln!(f, "  RF Type               : {}", wireless::rf_type_name(wireless::rf_type(buf)))?;
    writeln!(
        f,
        "  MAC Address           : {:02X}-{:02X}-{:02X}-{:02X}-{:02X}-{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )?;
    write!(f, "  Allowed Channels      : ")?;
    for ch in 0..16 {
        if channels & (1 << ch) != 0 {
            write!(f, "{} ", ch)?;
        }
    }
    writeln!(f)?;

    Ok(())
}

fn memory_map<W: io::Write>(mut f: W, image: &FlashImage) -> io::Result<()> {
    writeln!(f, "Memory Map:")?;
    for region in ops::memory_map(image) {
        writeln!(
            f,
            "  {:08X}..{:08X}  {}",
            region.start,
            region.start + region.size,
            region.name
        )?;
    }
    Ok(())
}
