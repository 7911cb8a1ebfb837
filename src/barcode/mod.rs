pub mod correct;
pub mod whitelist;

pub use correct::hamming;
pub use correct::BarcodeCorrector;
pub use correct::CorrectedBarcode;
pub use whitelist::load_well_group;
pub use whitelist::load_whitelists;
pub use whitelist::BarcodeWhitelist;
pub use whitelist::WellGroup;
