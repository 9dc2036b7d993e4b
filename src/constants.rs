//! Console-wide constants.

//------------ Environment Variables -----------------------------------------

/// The environment variable overriding the default log level.
pub const CONFIGTX_ENV_LOG_LEVEL: &str = "CONFIGTX_LOG_LEVEL";

//------------ Refresh Defaults ----------------------------------------------

pub const DEFAULT_REFRESH_SECONDS: u64 = 60;
pub const DEFAULT_QUERIES_REFRESH_SECONDS: u64 = 5;
pub const DEFAULT_SESSIONS_REFRESH_SECONDS: u64 = 10;

/// Change events a receiver may fall behind before missing some.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;
