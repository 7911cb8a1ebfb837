use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use rustc_hash::{FxHashMap, FxHashSet};

use super::CellID;

///////////////////////////////
/// For serialization: one row in a histogram TSV file
#[derive(Debug, serde::Serialize, serde::Deserialize, Eq, PartialEq)]
struct HistogramCsvRow {
    bc: String,
    cnt: u64,
}

///////////////////////////////
/// For serialization: one row in the rank-frequency TSV file
#[derive(Debug, serde::Serialize, Eq, PartialEq)]
struct RankCsvRow {
    rank: usize,
    bc: String,
    cnt: u64,
}

///////////////////////////////
/// Histogram for cell barcode counting. Also keeps the order in which
/// barcodes were first seen, so that equal counts rank deterministically
#[derive(Debug, Default)]
pub struct BarcodeHistogram {
    counts: FxHashMap<CellID, u64>,
    order: Vec<CellID>,
}

impl BarcodeHistogram {
    pub fn new() -> BarcodeHistogram {
        BarcodeHistogram {
            counts: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    pub fn inc(&mut self, cellid: &CellID) {
        self.inc_by(cellid, 1);
    }

    pub fn inc_by(&mut self, cellid: &CellID, cnt: u64) {
        if let Some(counter) = self.counts.get_mut(cellid) {
            *counter += cnt;
        } else {
            self.counts.insert(cellid.clone(), cnt);
            self.order.push(cellid.clone());
        }
    }

    /// Merge another histogram into this one. Barcodes new to this
    /// histogram are appended in the other histogram's first-seen order
    pub fn add_histogram(&mut self, other: &BarcodeHistogram) {
        for cellid in &other.order {
            self.inc_by(cellid, other.counts[cellid]);
        }
    }

    pub fn num_distinct(&self) -> usize {
        self.order.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count_for(&self, cellid: &CellID) -> u64 {
        self.counts.get(cellid).copied().unwrap_or(0)
    }

    ///////////////////////////////
    /// All distinct barcodes with their counts, sorted by descending
    /// count. The sort is stable, so equal counts keep first-seen order
    pub fn ranked(&self) -> Vec<(CellID, u64)> {
        let mut ranked: Vec<(CellID, u64)> = self
            .order
            .iter()
            .map(|bc| (bc.clone(), self.counts[bc]))
            .collect();
        ranked.sort_by_key(|(_, cnt)| std::cmp::Reverse(*cnt));
        ranked
    }

    pub fn from_file(path: &Path) -> anyhow::Result<BarcodeHistogram> {
        let file = File::open(path)
            .with_context(|| format!("Could not open histogram file {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut hist = BarcodeHistogram::new();
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        for result in reader.deserialize() {
            let record: HistogramCsvRow = result?;
            hist.inc_by(&record.bc, record.cnt);
        }
        Ok(hist)
    }

    /// Write the histogram as a TSV file, in first-seen order
    pub fn write_file(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Could not open histogram file {} for writing", path.display()))?;

        for bc in &self.order {
            writer.serialize(HistogramCsvRow {
                bc: bc.to_string(),
                cnt: self.counts[bc],
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    ///////////////////////////////
    /// Write the descending rank-frequency series. This is the numeric
    /// input for a knee plot of the barcode population
    pub fn write_rank_file(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Could not open rank file {} for writing", path.display()))?;

        for (rank, (bc, cnt)) in self.ranked().into_iter().enumerate() {
            writer.serialize(RankCsvRow {
                rank: rank + 1,
                bc,
                cnt,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

///////////////////////////////
/// The combined barcodes admitted by the top-N cutoff, in rank order
#[derive(Debug)]
pub struct AcceptanceSet {
    pub ranked: Vec<(CellID, u64)>,
    members: FxHashSet<CellID>,
}

impl AcceptanceSet {
    ///////////////////////////////
    /// Rank barcodes by descending count and keep the first num_cells.
    /// Equal counts keep their first-seen order, so the cutoff is
    /// deterministic for a given input
    pub fn from_histogram(hist: &BarcodeHistogram, num_cells: usize) -> AcceptanceSet {
        let mut ranked = hist.ranked();
        ranked.truncate(num_cells);
        let members = ranked.iter().map(|(bc, _)| bc.clone()).collect();
        AcceptanceSet { ranked, members }
    }

    pub fn contains(&self, cellid: &CellID) -> bool {
        self.members.contains(cellid)
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist_from(cells: &[&str]) -> BarcodeHistogram {
        let mut hist = BarcodeHistogram::new();
        for c in cells {
            hist.inc(&c.to_string());
        }
        hist
    }

    #[test]
    fn ranked_by_descending_count() {
        let hist = hist_from(&["b", "a", "a", "c", "a", "c"]);
        assert_eq!(hist.num_distinct(), 3);
        assert_eq!(hist.total(), 6);
        assert_eq!(
            hist.ranked(),
            vec![
                ("a".to_string(), 3),
                ("c".to_string(), 2),
                ("b".to_string(), 1)
            ]
        );
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let hist = hist_from(&["x", "y", "z", "y", "x", "z"]);
        //All counts equal; rank order must be first-seen order
        assert_eq!(
            hist.ranked(),
            vec![
                ("x".to_string(), 2),
                ("y".to_string(), 2),
                ("z".to_string(), 2)
            ]
        );
    }

    #[test]
    fn acceptance_truncates_to_num_cells() {
        let hist = hist_from(&["a", "a", "b", "c"]);
        let accept = AcceptanceSet::from_histogram(&hist, 2);
        assert_eq!(accept.len(), 2);
        assert!(accept.contains(&"a".to_string()));
        assert!(accept.contains(&"b".to_string()));
        assert!(!accept.contains(&"c".to_string()));
    }

    #[test]
    fn acceptance_smaller_population_than_num_cells() {
        let hist = hist_from(&["a", "b"]);
        let accept = AcceptanceSet::from_histogram(&hist, 100);
        assert_eq!(accept.len(), 2);
    }

    #[test]
    fn merge_histograms() {
        let mut a = hist_from(&["x", "y"]);
        let b = hist_from(&["y", "z", "z"]);
        a.add_histogram(&b);
        assert_eq!(a.count_for(&"x".to_string()), 1);
        assert_eq!(a.count_for(&"y".to_string()), 2);
        assert_eq!(a.count_for(&"z".to_string()), 2);
        //New barcodes from the merge rank after existing ties
        assert_eq!(a.ranked()[0].0, "y");
    }
}
