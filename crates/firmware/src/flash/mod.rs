use std::fs;
use std::path::Path;

pub mod backup;
pub mod config;
pub mod conn;
pub mod encrypt;
pub mod header;
pub mod module;
pub mod ops;
pub mod scan;
pub mod wireless;

pub use self::header::FlashHeader;
pub use self::module::{ModuleInfo, ModuleKind};

use crate::Error;

/// A loaded firmware image.
///
/// Owns the byte buffer for the session; everything else is decoded out of
/// it on demand. The dirty flag tracks whether the buffer has diverged from
/// its backing file since the last load or save.
pub struct FlashImage {
    buf: Box<[u8]>,
    dirty: bool,
}

impl FlashImage {
    /// Smallest plausible image.
    pub const MIN_SIZE: usize = 4 * 1024;

    /// Loads an image from a file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FlashImage, Error> {
        let bytes = fs::read(path)?;
        FlashImage::from_bytes(bytes)
    }

    /// Wraps an image buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<FlashImage, Error> {
        if bytes.len() < FlashImage::MIN_SIZE {
            return Err(Error::InvalidImage);
        }
        Ok(FlashImage {
            buf: bytes.into_boxed_slice(),
            dirty: false,
        })
    }

    /// Writes the image to a file and clears the dirty flag.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        fs::write(path, &self.buf)?;
        self.dirty = false;
        Ok(())
    }

    /// Size of the image in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the buffer; marks the image dirty.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.buf
    }

    /// Whether the buffer changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Parses the flash header.
    pub fn header(&self) -> FlashHeader {
        FlashHeader::read(&self.buf)
    }

    /// Writes a header back; marks the image dirty.
    pub fn write_header(&mut self, hdr: &FlashHeader) {
        hdr.write(self.bytes_mut());
    }

    /// Reads raw bytes at an absolute offset.
    pub fn peek(&self, addr: u32, len: usize) -> Result<&[u8], Error> {
        let addr = addr as usize;
        if addr >= self.buf.len() || len > self.buf.len() - addr {
            return Err(Error::OutOfBounds);
        }
        Ok(&self.buf[addr..addr + len])
    }

    /// Writes raw bytes at an absolute offset with no invariant
    /// maintenance. Returns how many bytes fit before the end of the
    /// image.
    pub fn poke(&mut self, addr: u32, data: &[u8]) -> Result<usize, Error> {
        let addr = addr as usize;
        if addr >= self.buf.len() {
            return Err(Error::OutOfBounds);
        }
        let n = data.len().min(self.buf.len() - addr);
        self.bytes_mut()[addr..addr + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Decodes one module.
    pub fn module_info(&self, kind: ModuleKind) -> Result<ModuleInfo, Error> {
        module::unpack(&self.buf, kind)
    }

    /// Decodes all five modules and recovers the load addresses the header
    /// does not store. Modules that fail to decode are simply absent.
    pub fn unpack_modules(&self) -> ModuleSet {
        let mut set = ModuleSet {
            arm9_static: module::unpack(&self.buf, ModuleKind::Arm9Static).ok(),
            arm7_static: module::unpack(&self.buf, ModuleKind::Arm7Static).ok(),
            arm9_secondary: module::unpack(&self.buf, ModuleKind::Arm9Secondary).ok(),
            arm7_secondary: module::unpack(&self.buf, ModuleKind::Arm7Secondary).ok(),
            resources: module::unpack(&self.buf, ModuleKind::Resources).ok(),
        };

        let addrs = scan::recover_load_addresses(
            set.arm9_static.as_ref().map(|m| m.data.as_slice()),
            set.arm7_static.as_ref().map(|m| m.data.as_slice()),
        );
        if let Some(m) = set.arm9_secondary.as_mut() {
            m.ram_addr = addrs.arm9_secondary;
        }
        if let Some(m) = set.arm7_secondary.as_mut() {
            m.ram_addr = addrs.arm7_secondary;
        }
        if let Some(m) = set.resources.as_mut() {
            m.ram_addr = addrs.resources;
        }
        set
    }

    /// Expands a `$`-prefixed mnemonic to a ROM offset of the loaded image.
    pub fn expand_mnemonic(&self, name: &str) -> Option<u64> {
        let name = name.strip_prefix('$')?;
        let hdr = self.header();

        let ncd = hdr.user_config_offset() as u64;
        let conn = ncd.checked_sub(conn::CONN_BLOCK as u64);
        let conn_ex = conn.and_then(|c| c.checked_sub(conn::CONN_EX_BLOCK as u64));

        Some(match name.to_ascii_lowercase().as_str() {
            "arm9" => hdr.arm9_static_rom_offset() as u64,
            "arm7" => hdr.arm7_static_rom_offset() as u64,
            "arm9s" => hdr.arm9_secondary_rom_offset() as u64,
            "arm7s" => hdr.arm7_secondary_rom_offset() as u64,
            "rsrc" => hdr.resource_rom_offset() as u64,
            "ncd" | "ncd0" => ncd,
            "ncd1" => ncd + 0x100,
            "conn" | "conn0" => conn?,
            "conn1" => conn? + 0x100,
            "conn2" => conn? + 0x200,
            "connex" | "connex0" => conn_ex?,
            "connex1" => conn_ex? + 0x200,
            "connex2" => conn_ex? + 0x400,
            _ => return None,
        })
    }
}

/// The decode results for all five modules.
pub struct ModuleSet {
    pub arm9_static: Option<ModuleInfo>,
    pub arm7_static: Option<ModuleInfo>,
    pub arm9_secondary: Option<ModuleInfo>,
    pub arm7_secondary: Option<ModuleInfo>,
    pub resources: Option<ModuleInfo>,
}

impl ModuleSet {
    pub fn get(&self, kind: ModuleKind) -> Option<&ModuleInfo> {
        match kind {
            ModuleKind::Arm9Static => self.arm9_static.as_ref(),
            ModuleKind::Arm7Static => self.arm7_static.as_ref(),
            ModuleKind::Arm9Secondary => self.arm9_secondary.as_ref(),
            ModuleKind::Arm7Secondary => self.arm7_secondary.as_ref(),
            ModuleKind::Resources => self.resources.as_ref(),
        }
    }

    /// Iterates the modules in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleKind, Option<&ModuleInfo>)> {
        ModuleKind::ALL.iter().map(move |&k| (k, self.get(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::FlashImage;
    use crate::Error;

    #[test]
    fn rejects_undersized_buffers() {
        assert!(matches!(
            FlashImage::from_bytes(vec![0; 100]),
            Err(Error::InvalidImage)
        ));
        assert!(FlashImage::from_bytes(vec![0; FlashImage::MIN_SIZE]).is_ok());
    }

    #[test]
    fn save_state_tracking() {
        let mut image = FlashImage::from_bytes(vec![0; FlashImage::MIN_SIZE]).unwrap();
        assert!(!image.is_dirty());
        image.bytes_mut()[0x300] = 1;
        assert!(image.is_dirty());
    }
}
