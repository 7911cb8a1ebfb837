pub mod bam;
pub mod histogram;

pub use histogram::AcceptanceSet;
pub use histogram::BarcodeHistogram;

///////////////////////////////
/// The type of the cell ID
pub type CellID = String;
