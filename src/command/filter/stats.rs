use std::path::Path;

use anyhow::Context;
use log::info;

///////////////////////////////
/// For serialization: one row in the filter summary TSV file
#[derive(Debug, serde::Serialize, Eq, PartialEq)]
struct SummaryCsvRow<'a> {
    stage: &'a str,
    reads: u64,
}

///////////////////////////////
/// Read counters for every stage of the filter, merged from the
/// per-chunk counts of the worker threads
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub n_total: u64,
    /// Records lacking at least one raw barcode tag
    pub n_missing_tags: u64,
    /// Records where some segment failed whitelist correction
    pub n_unresolvable: u64,
    /// Records where all segments corrected
    pub n_resolved: u64,
    /// Resolved records with at least one well-collapsed segment
    pub n_collapsed: u64,
    /// Resolved records whose combined barcode missed the top-N cutoff
    pub n_below_cutoff: u64,
    /// Records written to the output archive
    pub n_accepted: u64,
}

impl FilterStats {
    pub fn add(&mut self, other: &FilterStats) {
        self.n_total += other.n_total;
        self.n_missing_tags += other.n_missing_tags;
        self.n_unresolvable += other.n_unresolvable;
        self.n_resolved += other.n_resolved;
        self.n_collapsed += other.n_collapsed;
        self.n_below_cutoff += other.n_below_cutoff;
        self.n_accepted += other.n_accepted;
    }

    ///////////////////////////////
    /// Write the per-stage counters as a TSV file
    pub fn write_summary(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| {
                format!("Could not open summary file {} for writing", path.display())
            })?;

        let rows = [
            ("total", self.n_total),
            ("missing_tags", self.n_missing_tags),
            ("unresolvable", self.n_unresolvable),
            ("resolved", self.n_resolved),
            ("well_collapsed", self.n_collapsed),
            ("below_cutoff", self.n_below_cutoff),
            ("accepted", self.n_accepted),
        ];
        for (stage, reads) in rows {
            writer.serialize(SummaryCsvRow { stage, reads })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn log_summary(&self) {
        let pct = |n: u64| {
            if self.n_total == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.n_total as f64
            }
        };
        info!(
            "Processed {} reads: {} resolved ({:.1}%), {} unresolvable, {} missing tags",
            self.n_total,
            self.n_resolved,
            pct(self.n_resolved),
            self.n_unresolvable,
            self.n_missing_tags
        );
        info!(
            "Kept {} reads ({:.1}%); {} resolved reads fell below the cell cutoff; {} were well-collapsed",
            self.n_accepted,
            pct(self.n_accepted),
            self.n_below_cutoff,
            self.n_collapsed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_chunk_stats() {
        let mut total = FilterStats::default();
        let chunk = FilterStats {
            n_total: 10,
            n_missing_tags: 1,
            n_unresolvable: 2,
            n_resolved: 7,
            n_collapsed: 3,
            n_below_cutoff: 2,
            n_accepted: 5,
        };
        total.add(&chunk);
        total.add(&chunk);
        assert_eq!(total.n_total, 20);
        assert_eq!(total.n_resolved, 14);
        assert_eq!(total.n_accepted, 10);
    }
}
