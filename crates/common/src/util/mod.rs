mod crc;

pub use self::crc::crc16;
