use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use log::info;
use rust_htslib::bam;
use rust_htslib::bam::Read;

use crate::barcode::hamming;
use crate::fileformat::bam as bamtag;

pub const DEFAULT_PATH_MATCH: &str = "with_specified_tag.bam";
pub const DEFAULT_PATH_REST: &str = "without_specified_tag.bam";

///////////////////////////////
/// Split an archive by the value of a tag. Records whose tag matches the
/// given value (exactly, or within a Hamming tolerance) go to one output;
/// records where the tag is missing or different go to the other
#[derive(Args)]
pub struct SplitTagCMD {
    /// The tag to split by, e.g. XC
    #[arg(long = "tag", value_parser)]
    pub tag: String,

    /// The tag value to select for
    #[arg(long = "value", value_parser)]
    pub value: String,

    /// Maximum Hamming distance between desired and actual tag value.
    /// Values of a different length never match
    #[arg(long = "max-edit-dist", value_parser, default_value_t = 0)]
    pub max_edit_dist: u32,

    /// Input BAM
    #[arg(short = 'i', long = "in", value_parser)]
    pub path_in: PathBuf,

    /// Output for records whose tag matches
    #[arg(long = "out-match", value_parser, default_value = DEFAULT_PATH_MATCH)]
    pub path_match: PathBuf,

    /// Output for records whose tag is missing or does not match
    #[arg(long = "out-rest", value_parser, default_value = DEFAULT_PATH_REST)]
    pub path_rest: PathBuf,

    /// Drop records that do not carry the tag at all
    #[arg(long = "discard-missing")]
    pub discard_missing: bool,
}
impl SplitTagCMD {
    /// Run the commandline option
    pub fn try_execute(&mut self) -> Result<()> {
        if self.tag.len() != 2 {
            bail!("Tag {} is not a two-character BAM tag", self.tag);
        }

        let mut bam_in = bam::Reader::from_path(&self.path_in)
            .with_context(|| format!("Could not open input archive {}", self.path_in.display()))?;
        let header = bam::Header::from_template(bam_in.header());
        let mut out_match = bam::Writer::from_path(&self.path_match, &header, bam::Format::Bam)?;
        let mut out_rest = bam::Writer::from_path(&self.path_rest, &header, bam::Format::Bam)?;

        let mut n_missing: u64 = 0;
        let mut n_rest: u64 = 0;
        let mut n_match: u64 = 0;

        let mut record = bam::Record::new();
        while let Some(r) = bam_in.read(&mut record) {
            r.context("Failed to read input archive")?;

            match bamtag::get_string_tag(&record, &self.tag) {
                None => {
                    if self.discard_missing {
                        n_missing += 1;
                    } else {
                        out_rest.write(&record)?;
                        n_rest += 1;
                    }
                }
                Some(value) => {
                    if tag_matches(value, &self.value, self.max_edit_dist) {
                        out_match.write(&record)?;
                        n_match += 1;
                    } else {
                        out_rest.write(&record)?;
                        n_rest += 1;
                    }
                }
            }
        }

        info!("Processed {} records", n_missing + n_rest + n_match);
        info!("Found {} records without the tag {}", n_missing, self.tag);
        info!(
            "Found {} records where {} != {}",
            n_rest, self.tag, self.value
        );
        info!(
            "Found {} records where {} == {} within a distance of {}",
            n_match, self.tag, self.value, self.max_edit_dist
        );
        Ok(())
    }
}

///////////////////////////////
/// Does an observed tag value match the wanted one?
fn tag_matches(observed: &str, wanted: &str, max_edit_dist: u32) -> bool {
    if max_edit_dist == 0 {
        return observed == wanted;
    }
    if observed.len() != wanted.len() {
        return false;
    }
    hamming(observed.as_bytes(), wanted.as_bytes()) <= max_edit_dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_only_by_default() {
        assert!(tag_matches("ACGT", "ACGT", 0));
        assert!(!tag_matches("ACGA", "ACGT", 0));
    }

    #[test]
    fn match_within_tolerance() {
        assert!(tag_matches("ACGA", "ACGT", 1));
        assert!(!tag_matches("ACAA", "ACGT", 1));
        assert!(tag_matches("ACAA", "ACGT", 2));
    }

    #[test]
    fn different_lengths_never_match() {
        assert!(!tag_matches("ACG", "ACGT", 2));
    }
}
