/// Mining reward issued by every coinbase transaction.
pub const SUBSIDY: i32 = 10;

/// Leading zero bits a block hash must carry. Compile-time difficulty; 16
/// keeps mining fast enough for a laptop, 24 is a production-grade setting.
pub const TARGET_BITS: usize = 16;

pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Well-known bootstrap node every fresh node contacts first.
pub const CENTRAL_NODE: &str = "localhost:3000";

pub const NODE_VERSION: i32 = 1;

/// On-wire command field width, NUL-padded ASCII.
pub const CMD_LEN: usize = 12;

/// Bound on every socket connect/read/write.
pub const NET_TIMEOUT_SECS: u64 = 30;

pub const DATA_DIR: &str = "data";
