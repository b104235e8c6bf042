//! Well-known index groups of the ADS symbol services.

/// Look up a symbol's location, size and type by name. Use with a `ReadWrite`.
pub const SYM_INFOBYNAMEEX: u32 = 0xF009;

/// PLC memory area (%M fields), where most program variables live.
pub const PLC_RW_M: u32 = 0x4020;
