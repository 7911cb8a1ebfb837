pub mod command;
pub mod core;
pub mod stats;

pub use self::command::FilterCMD;
pub use self::core::FilterBarcodes;
pub use self::stats::FilterStats;
