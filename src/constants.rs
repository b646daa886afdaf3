//! Useful constants.

/// Speed of light \[m/s\].
pub const VEL_C: f64 = 299_792_458.0;

/// The number of subbands the station's polyphase filter produces per band.
pub const NUM_SUBBANDS: u32 = 512;

/// The sampling clock used by all RCU modes except 6 \[Hz\].
pub const CLOCK_200_HZ: f64 = 200e6;

/// The sampling clock used by RCU mode 6 \[Hz\].
pub const CLOCK_160_HZ: f64 = 160e6;

/// The number of bytes in a single complex128 correlation (two little-endian
/// f64s).
pub const BYTES_PER_CORRELATION: u64 = 16;

/// The subband range assumed when the recording doesn't tell us.
pub const DEFAULT_FIRST_SUBBAND: u32 = 51;
pub const DEFAULT_LAST_SUBBAND: u32 = 461;

/// The RCU mode assumed when the recording doesn't tell us.
pub const DEFAULT_RCU_MODE: u8 = 3;

/// The station used when none is specified.
pub const DEFAULT_STATION: &str = "LV614";

/// The number of pixels along each side of a sky image.
pub const DEFAULT_NPIX: usize = 131;

/// XST integrations are 1 second unless told otherwise.
pub const DEFAULT_INTEGRATION_SECONDS: f64 = 1.0;
