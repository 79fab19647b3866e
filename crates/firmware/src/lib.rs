#[macro_use]
mod macros;

mod error;

pub mod flash;

pub use self::error::Error;
pub use self::flash::FlashImage;
