use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context};
use log::debug;
use rustc_hash::FxHashMap;

use crate::command::constants::{WELLS_FILENAME, WHITELIST_FILENAMES};

///////////////////////////////
/// One barcode round: the known set of valid sequences for one segment.
/// Entries keep the order of the whitelist file; a hash map supports the
/// exact-match probe during classification.
#[derive(Debug, Clone)]
pub struct BarcodeWhitelist {
    pub name: String,
    pub entries: Vec<String>,
    pub bc_length: usize,
    seq2index: FxHashMap<String, usize>,
}

impl BarcodeWhitelist {
    ///////////////////////////////
    /// Read one whitelist, one barcode per line. All entries must be unique
    /// and of the same length
    pub fn from_reader(name: &str, src: impl Read) -> anyhow::Result<BarcodeWhitelist> {
        let mut entries: Vec<String> = Vec::new();
        let mut seq2index: FxHashMap<String, usize> = FxHashMap::default();

        let reader = BufReader::new(src);
        for line in reader.lines() {
            let line = line?;
            let seq = line.trim();
            if seq.is_empty() {
                continue;
            }
            if let Some(first) = entries.first() {
                if first.len() != seq.len() {
                    bail!(
                        "Whitelist {}: entries of different lengths ({} and {})",
                        name,
                        first,
                        seq
                    );
                }
            }
            if seq2index.insert(seq.to_string(), entries.len()).is_some() {
                bail!("Whitelist {}: duplicate entry {}", name, seq);
            }
            entries.push(seq.to_string());
        }

        if entries.is_empty() {
            bail!("Whitelist {} contains no barcodes", name);
        }
        let bc_length = entries[0].len();
        debug!(
            "Whitelist {}: {} barcodes of length {}",
            name,
            entries.len(),
            bc_length
        );

        Ok(BarcodeWhitelist {
            name: name.to_string(),
            entries,
            bc_length,
            seq2index,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<BarcodeWhitelist> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)
            .with_context(|| format!("Could not open whitelist file {}", path.display()))?;
        BarcodeWhitelist::from_reader(&name, file)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The whitelist sequence at a given index
    pub fn get(&self, index: usize) -> &str {
        &self.entries[index]
    }

    /// Exact lookup of an observed sequence
    pub fn exact(&self, seq: &str) -> Option<usize> {
        self.seq2index.get(seq).copied()
    }
}

///////////////////////////////
/// For serialization: one row in the well mapping TSV file
#[derive(Debug, serde::Deserialize, Eq, PartialEq)]
struct WellCsvFileRow {
    round: usize,
    seq: String,
    well: String,
}

///////////////////////////////
/// Mapping from (barcode round, barcode) to the physical well it came from.
/// Barcodes not listed in the mapping keep their own identity
#[derive(Debug, Clone, Default)]
pub struct WellGroup {
    map: FxHashMap<(usize, String), String>,
}

impl WellGroup {
    ///////////////////////////////
    /// Read the well mapping from a TSV file with columns round, seq, well.
    /// Every referenced barcode must exist in the whitelist of its round
    pub fn from_reader(
        src: impl Read,
        whitelists: &[BarcodeWhitelist],
    ) -> anyhow::Result<WellGroup> {
        let mut map: FxHashMap<(usize, String), String> = FxHashMap::default();

        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(src);
        for result in reader.deserialize() {
            let record: WellCsvFileRow = result?;
            if record.round == 0 || record.round > whitelists.len() {
                bail!(
                    "Well mapping references barcode round {} but there are {} rounds",
                    record.round,
                    whitelists.len()
                );
            }
            let whitelist = &whitelists[record.round - 1];
            if whitelist.exact(&record.seq).is_none() {
                bail!(
                    "Well mapping references barcode {} which is not in the {} whitelist",
                    record.seq,
                    whitelist.name
                );
            }
            map.insert((record.round - 1, record.seq), record.well);
        }

        Ok(WellGroup { map })
    }

    pub fn from_file(path: &Path, whitelists: &[BarcodeWhitelist]) -> anyhow::Result<WellGroup> {
        let file = File::open(path)
            .with_context(|| format!("Could not open well mapping file {}", path.display()))?;
        WellGroup::from_reader(file, whitelists)
    }

    /// The well for a barcode, if it belongs to a grouped well
    pub fn well_for(&self, round: usize, seq: &str) -> Option<&str> {
        self.map.get(&(round, seq.to_string())).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

///////////////////////////////
/// Load the whitelist of every barcode round from a directory
pub fn load_whitelists(dir: &Path) -> anyhow::Result<Vec<BarcodeWhitelist>> {
    let mut whitelists = Vec::with_capacity(WHITELIST_FILENAMES.len());
    for fname in WHITELIST_FILENAMES {
        let path = dir.join(fname);
        if !path.is_file() {
            bail!(
                "Missing whitelist file {} in barcode directory {}",
                fname,
                dir.display()
            );
        }
        whitelists.push(BarcodeWhitelist::from_file(&path)?);
    }
    Ok(whitelists)
}

///////////////////////////////
/// Load the well mapping belonging to a whitelist directory
pub fn load_well_group(
    dir: &Path,
    whitelists: &[BarcodeWhitelist],
) -> anyhow::Result<WellGroup> {
    let path = dir.join(WELLS_FILENAME);
    if !path.is_file() {
        bail!(
            "Well collapsing requested but {} not found in barcode directory {}",
            WELLS_FILENAME,
            dir.display()
        );
    }
    let wells = WellGroup::from_file(&path, whitelists)?;
    if wells.is_empty() {
        bail!("Well mapping file {} contains no entries", path.display());
    }
    Ok(wells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_whitelist() {
        let wl = BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\nCCCC\nGGGG\n"))
            .expect("should parse");
        assert_eq!(wl.len(), 3);
        assert_eq!(wl.bc_length, 4);
        assert_eq!(wl.get(1), "CCCC");
        assert_eq!(wl.exact("GGGG"), Some(2));
        assert_eq!(wl.exact("TTTT"), None);
    }

    #[test]
    fn reject_empty_whitelist() {
        assert!(BarcodeWhitelist::from_reader("round1", Cursor::new("\n\n")).is_err());
    }

    #[test]
    fn reject_nonuniform_lengths() {
        assert!(BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\nCCCCC\n")).is_err());
    }

    #[test]
    fn reject_duplicate_entries() {
        assert!(BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\nAAAA\n")).is_err());
    }

    #[test]
    fn read_well_mapping() {
        let wl = vec![
            BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\nCCCC\n")).unwrap(),
            BarcodeWhitelist::from_reader("round2", Cursor::new("GGGG\nTTTT\n")).unwrap(),
        ];
        let src = "round\tseq\twell\n1\tAAAA\tA1\n1\tCCCC\tA1\n";
        let wells = WellGroup::from_reader(Cursor::new(src), &wl).expect("should parse");
        assert_eq!(wells.len(), 2);
        assert_eq!(wells.well_for(0, "AAAA"), Some("A1"));
        assert_eq!(wells.well_for(0, "GGGG"), None);
        assert_eq!(wells.well_for(1, "GGGG"), None);
    }

    #[test]
    fn reject_well_mapping_with_unknown_barcode() {
        let wl = vec![BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\n")).unwrap()];
        let src = "round\tseq\twell\n1\tTTTT\tA1\n";
        assert!(WellGroup::from_reader(Cursor::new(src), &wl).is_err());
    }

    #[test]
    fn reject_well_mapping_with_bad_round() {
        let wl = vec![BarcodeWhitelist::from_reader("round1", Cursor::new("AAAA\n")).unwrap()];
        let src = "round\tseq\twell\n2\tAAAA\tA1\n";
        assert!(WellGroup::from_reader(Cursor::new(src), &wl).is_err());
    }
}
