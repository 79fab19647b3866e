mod ucs2;

pub use self::ucs2::Ucs2;
