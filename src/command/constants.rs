///////////////////////////////
/// Aux tags of the raw barcode segments, as written by the upstream
/// fixed-position tagger (one tag per combinatorial round)
pub const TAG_BC_ROUND1: &str = "XD";
pub const TAG_BC_ROUND2: &str = "XE";
pub const TAG_BC_ROUND3: &str = "XF";

/// Aux tag for the molecular barcode, written upstream and passed through
pub const TAG_UMI: &str = "XM";

/// Aux tag for the number of low-quality barcode bases, used by the
/// upstream quality filter stage
pub const TAG_BC_QUALITY: &str = "XQ";

///////////////////////////////
/// Aux tags written by the filter: combined corrected barcode sequence,
/// and the well-level cell identity when collapsing is enabled
pub const TAG_CORRECTED_BC: &str = "XC";
pub const TAG_WELL_ID: &str = "XW";

///////////////////////////////
/// Expected files in the barcode whitelist directory
pub const WHITELIST_FILENAMES: [&str; 3] = ["bc_round1.txt", "bc_round2.txt", "bc_round3.txt"];
pub const WELLS_FILENAME: &str = "wells.tsv";

///////////////////////////////
/// Report files written by the filter
pub const FILE_SUMMARY: &str = "filter_summary.tsv";
pub const FILE_BARCODE_RANK: &str = "barcode_rank.tsv";
pub const FILE_BARCODE_HIST: &str = "barcode_hist.tsv";

///////////////////////////////
/// Reads are handed to workers in chunks; sequence numbers on the chunks
/// restore input order downstream
pub const FILTER_CHUNK_SIZE: usize = 1000;
pub const FILTER_CHANNEL_BOUND: usize = 64;
