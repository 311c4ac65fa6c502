pub mod file;
pub mod text;
pub mod time;

pub use file::{ensure_dir, write_atomic};
pub use text::normalize_stock_code;
pub use time::{format_compact_date, parse_compact_date, snapshot_timestamp_slug};
