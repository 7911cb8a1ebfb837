use itertools::Itertools;

use super::whitelist::{BarcodeWhitelist, WellGroup};
use crate::fileformat::CellID;

///////////////////////////////
/// Hamming distance between two equal-length sequences
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as u32
}

impl BarcodeWhitelist {
    ///////////////////////////////
    /// Resolve one observed segment against this whitelist. Returns the
    /// whitelist index if the observation is within one mismatch of exactly
    /// one entry. An observation equidistant from two entries is never
    /// resolved to an arbitrary pick
    pub fn classify(&self, observed: &str) -> Option<usize> {
        if observed.len() != self.bc_length {
            return None;
        }

        //Perform optimistic exact search first; most reads carry an error-free barcode
        if let Some(i) = self.exact(observed) {
            return Some(i);
        }

        //No exact match, so the minimum possible distance is 1.
        //Accept only if a single entry is that close
        self.entries
            .iter()
            .positions(|entry| hamming(observed.as_bytes(), entry.as_bytes()) == 1)
            .exactly_one()
            .ok()
    }
}

///////////////////////////////
/// The outcome of correcting all barcode segments of one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedBarcode {
    /// Whitelist index per barcode round
    pub indices: Vec<usize>,
    /// Combined identity used for counting and cell calling. Per-round
    /// identities joined with _ (avoid : and - in cell IDs)
    pub cell_id: CellID,
    /// Concatenated corrected segment sequences, for the output tag
    pub corrected_seq: String,
    /// True if any segment was remapped to a shared well
    pub collapsed: bool,
}

///////////////////////////////
/// Correction tables for all barcode rounds, plus the optional well
/// mapping. Immutable after construction; shared read-only between worker
/// threads
#[derive(Debug, Clone)]
pub struct BarcodeCorrector {
    pub whitelists: Vec<BarcodeWhitelist>,
    pub wells: Option<WellGroup>,
}

impl BarcodeCorrector {
    pub fn new(whitelists: Vec<BarcodeWhitelist>, wells: Option<WellGroup>) -> BarcodeCorrector {
        BarcodeCorrector { whitelists, wells }
    }

    pub fn num_rounds(&self) -> usize {
        self.whitelists.len()
    }

    pub fn collapsing_enabled(&self) -> bool {
        self.wells.is_some()
    }

    ///////////////////////////////
    /// Correct the observed segments of one read. Returns None as soon as
    /// any segment fails to resolve; a read is never partially corrected
    pub fn correct(&self, observed: &[&str]) -> Option<CorrectedBarcode> {
        debug_assert_eq!(observed.len(), self.whitelists.len());

        let mut indices = Vec::with_capacity(self.whitelists.len());
        for (whitelist, obs) in self.whitelists.iter().zip(observed) {
            indices.push(whitelist.classify(obs)?);
        }

        let mut id_parts: Vec<&str> = Vec::with_capacity(indices.len());
        let mut corrected_seq = String::new();
        let mut collapsed = false;
        for (round, (&i, whitelist)) in indices.iter().zip(&self.whitelists).enumerate() {
            let seq = whitelist.get(i);
            corrected_seq.push_str(seq);

            //The identity of a round is its well if grouped, otherwise the barcode itself
            let part = match &self.wells {
                Some(wells) => match wells.well_for(round, seq) {
                    Some(well) => {
                        collapsed = true;
                        well
                    }
                    None => seq,
                },
                None => seq,
            };
            id_parts.push(part);
        }

        Some(CorrectedBarcode {
            indices,
            cell_id: id_parts.join("_"),
            corrected_seq,
            collapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn whitelist(name: &str, src: &str) -> BarcodeWhitelist {
        BarcodeWhitelist::from_reader(name, Cursor::new(src.to_string())).unwrap()
    }

    #[test]
    fn classify_exact() {
        let wl = whitelist("round1", "AAAA\nCCCC\nGGGG\nTTTT\n");
        assert_eq!(wl.classify("AAAA"), Some(0));
        assert_eq!(wl.classify("TTTT"), Some(3));
    }

    #[test]
    fn classify_one_mismatch() {
        let wl = whitelist("round1", "AAAA\nCCCC\nGGGG\nTTTT\n");
        //One base off from AAAA, two or more from everything else
        assert_eq!(wl.classify("AAAT"), Some(0));
        assert_eq!(wl.classify("CACC"), Some(1));
    }

    #[test]
    fn classify_too_distant() {
        let wl = whitelist("round1", "AAAA\nCCCC\nGGGG\nTTTT\n");
        assert_eq!(wl.classify("AAGG"), None);
        assert_eq!(wl.classify("ACGT"), None);
    }

    #[test]
    fn classify_ambiguous_is_unresolved() {
        //AACC is one mismatch from both AACA and AACG
        let wl = whitelist("round1", "AACA\nAACG\n");
        assert_eq!(wl.classify("AACC"), None);
        //But still resolves an exact observation
        assert_eq!(wl.classify("AACA"), Some(0));
    }

    #[test]
    fn classify_wrong_length() {
        let wl = whitelist("round1", "AAAA\nCCCC\n");
        assert_eq!(wl.classify("AAA"), None);
        assert_eq!(wl.classify("AAAAA"), None);
    }

    fn corrector(wells: Option<WellGroup>) -> BarcodeCorrector {
        let whitelists = vec![
            whitelist("round1", "AAAA\nCCCC\nGGGG\nTTTT\n"),
            whitelist("round2", "AAAA\nCCCC\nGGGG\nTTTT\n"),
            whitelist("round3", "AAAA\nCCCC\nGGGG\nTTTT\n"),
        ];
        BarcodeCorrector::new(whitelists, wells)
    }

    #[test]
    fn correct_full_read() {
        let corr = corrector(None);
        let bc = corr.correct(&["AAAA", "CCCT", "GGGG"]).expect("should resolve");
        assert_eq!(bc.indices, vec![0, 1, 2]);
        assert_eq!(bc.cell_id, "AAAA_CCCC_GGGG");
        assert_eq!(bc.corrected_seq, "AAAACCCCGGGG");
        assert!(!bc.collapsed);
    }

    #[test]
    fn one_bad_segment_rejects_whole_read() {
        let corr = corrector(None);
        //Middle segment two mismatches from every entry
        assert_eq!(corr.correct(&["AAAA", "CCGT", "GGGG"]), None);
    }

    #[test]
    fn collapse_shared_well() {
        let whitelists = vec![
            whitelist("round1", "AAAA\nCCCC\nGGGG\nTTTT\n"),
            whitelist("round2", "AAAA\nCCCC\nGGGG\nTTTT\n"),
            whitelist("round3", "AAAA\nCCCC\nGGGG\nTTTT\n"),
        ];
        let src = "round\tseq\twell\n1\tAAAA\tA1\n1\tCCCC\tA1\n";
        let wells = WellGroup::from_reader(Cursor::new(src), &whitelists).unwrap();
        let corr = BarcodeCorrector::new(whitelists, Some(wells));

        //Both round-1 barcodes of the well map to the same combined identity
        let bc_a = corr.correct(&["AAAA", "GGGG", "TTTT"]).unwrap();
        let bc_b = corr.correct(&["CCCC", "GGGG", "TTTT"]).unwrap();
        assert_eq!(bc_a.cell_id, "A1_GGGG_TTTT");
        assert_eq!(bc_b.cell_id, "A1_GGGG_TTTT");
        assert!(bc_a.collapsed && bc_b.collapsed);

        //The corrected sequences keep the original barcodes apart
        assert_ne!(bc_a.corrected_seq, bc_b.corrected_seq);

        //Ungrouped barcodes keep their own identity
        let bc_c = corr.correct(&["GGGG", "GGGG", "TTTT"]).unwrap();
        assert_eq!(bc_c.cell_id, "GGGG_GGGG_TTTT");
        assert!(!bc_c.collapsed);
    }
}
