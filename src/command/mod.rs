pub mod constants;
pub mod filter;
pub mod pipeline;
pub mod splittag;

pub use filter::{FilterBarcodes, FilterCMD};
pub use pipeline::PipelineCMD;
pub use splittag::SplitTagCMD;
