//! Common types used throughout the console.
pub mod error;

#[cfg(any(test, feature = "test-util"))]
pub mod test;

pub use self::error::Error;

//------------ Response Aliases ----------------------------------------------

pub type ConsoleResult<T> = std::result::Result<T, self::error::Error>;
