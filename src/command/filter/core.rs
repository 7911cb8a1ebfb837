use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, Sender};
use log::{info, warn};
use rust_htslib::bam;
use rust_htslib::bam::Read;
use rustc_hash::FxHashMap;

use super::stats::FilterStats;
use crate::barcode::{BarcodeCorrector, CorrectedBarcode};
use crate::command::constants::{
    FILE_BARCODE_HIST, FILE_BARCODE_RANK, FILE_SUMMARY, FILTER_CHANNEL_BOUND, FILTER_CHUNK_SIZE,
    TAG_BC_ROUND1, TAG_BC_ROUND2, TAG_BC_ROUND3, TAG_CORRECTED_BC, TAG_WELL_ID,
};
use crate::fileformat::{bam as bamtag, AcceptanceSet, BarcodeHistogram, CellID};

///////////////////////////////
/// Settings for the barcode filtering engine
pub struct FilterBarcodes {
    pub path_in: PathBuf,
    pub path_out: PathBuf,
    pub path_reports: PathBuf,
    pub num_cells: usize,
    pub threads_work: usize,
}

///////////////////////////////
/// Classification outcome for one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCall {
    /// At least one barcode tag is absent from the record
    MissingTags,
    /// All tags present but some segment failed whitelist correction
    Unresolvable,
    /// All segments corrected
    Resolved(CorrectedBarcode),
}

///////////////////////////////
/// Classify one record from its raw barcode segment tags
pub fn classify_record(record: &bam::Record, corrector: &BarcodeCorrector) -> ReadCall {
    let bc1 = bamtag::get_string_tag(record, TAG_BC_ROUND1);
    let bc2 = bamtag::get_string_tag(record, TAG_BC_ROUND2);
    let bc3 = bamtag::get_string_tag(record, TAG_BC_ROUND3);

    match (bc1, bc2, bc3) {
        (Some(bc1), Some(bc2), Some(bc3)) => match corrector.correct(&[bc1, bc2, bc3]) {
            Some(corrected) => ReadCall::Resolved(corrected),
            None => ReadCall::Unresolvable,
        },
        _ => ReadCall::MissingTags,
    }
}

///////////////////////////////
/// Attach the corrected-barcode tags to an accepted record
fn rewrite_record(
    record: &mut bam::Record,
    corrected: &CorrectedBarcode,
    collapsing: bool,
) -> Result<()> {
    bamtag::set_string_tag(record, TAG_CORRECTED_BC, &corrected.corrected_seq)?;
    if collapsing {
        bamtag::set_string_tag(record, TAG_WELL_ID, &corrected.cell_id)?;
    }
    Ok(())
}

/// Temporary output location; the final path only appears once the whole
/// archive has been written
fn tmp_output_path(path_out: &Path) -> PathBuf {
    let mut fname = path_out
        .file_name()
        .map(|f| f.to_os_string())
        .unwrap_or_default();
    fname.push(".tmp");
    path_out.with_file_name(fname)
}

type Chunk = Option<(u64, Vec<bam::Record>)>;

///////////////////////////////
/// Read the input archive in chunks, tagging each chunk with a sequence
/// number. The file is opened on the reader thread itself; one
/// termination signal per worker is sent when done, even on failure
fn spawn_chunk_reader(
    path_in: PathBuf,
    tx: Sender<Chunk>,
    num_workers: usize,
) -> JoinHandle<Result<u64>> {
    std::thread::spawn(move || {
        let result = read_all_chunks(&path_in, &tx);
        for _ in 0..num_workers {
            let _ = tx.send(None);
        }
        result
    })
}

fn read_all_chunks(path_in: &Path, tx: &Sender<Chunk>) -> Result<u64> {
    let mut bam_in = bam::Reader::from_path(path_in)
        .with_context(|| format!("Could not open input archive {}", path_in.display()))?;
    //Extra htslib threads for decompression
    bam_in.set_threads(2)?;

    let mut n_read: u64 = 0;
    let mut seq_no: u64 = 0;
    loop {
        let mut chunk: Vec<bam::Record> = Vec::with_capacity(FILTER_CHUNK_SIZE);
        while chunk.len() < FILTER_CHUNK_SIZE {
            let mut record = bam::Record::new();
            match bam_in.read(&mut record) {
                Some(Ok(())) => {
                    chunk.push(record);
                    n_read += 1;
                    if n_read % 1_000_000 == 0 {
                        info!("read {} reads", n_read);
                    }
                }
                Some(Err(e)) => {
                    return Err(anyhow::Error::new(e).context("Failed to read input archive"))
                }
                None => break,
            }
        }

        if chunk.is_empty() {
            break;
        }
        if tx.send(Some((seq_no, chunk))).is_err() {
            //Receivers are gone; the run is aborting
            break;
        }
        seq_no += 1;
    }
    Ok(n_read)
}

///////////////////////////////
/// Consume out-of-order chunk results in input order. The closure is
/// called exactly once per chunk, in ascending sequence number
fn for_each_in_order<T>(
    rx: Receiver<(u64, T)>,
    mut apply: impl FnMut(T) -> Result<()>,
) -> Result<()> {
    let mut pending: FxHashMap<u64, T> = FxHashMap::default();
    let mut next_seq: u64 = 0;

    while let Ok((seq_no, item)) = rx.recv() {
        pending.insert(seq_no, item);
        while let Some(item) = pending.remove(&next_seq) {
            apply(item)?;
            next_seq += 1;
        }
    }
    Ok(())
}

impl FilterBarcodes {
    ///////////////////////////////
    /// Run the two-pass filter: count combined corrected barcodes, freeze
    /// the top-N acceptance set, then rewrite the archive with only the
    /// accepted, re-tagged reads
    pub fn run(params: &Arc<FilterBarcodes>, corrector: &Arc<BarcodeCorrector>) -> Result<()> {
        info!("Running command: filter");

        //// Pass 1: count combined corrected barcodes
        let hist = Self::count_barcodes(params, corrector)?;
        if hist.num_distinct() == 0 {
            warn!("No read resolved to a whitelist barcode; the output archive will be empty");
        }

        //// Freeze the cutoff
        let accept = Arc::new(AcceptanceSet::from_histogram(&hist, params.num_cells));
        info!(
            "Keeping the {} most frequent of {} distinct barcodes (requested {})",
            accept.len(),
            hist.num_distinct(),
            params.num_cells
        );

        //// Pass 2: rewrite the archive. Publish atomically: write next to
        //// the destination, rename only on success
        let path_tmp_out = tmp_output_path(&params.path_out);
        let stats = match Self::rewrite_archive(params, corrector, &accept, &path_tmp_out) {
            Ok(stats) => stats,
            Err(e) => {
                let _ = fs::remove_file(&path_tmp_out);
                return Err(e);
            }
        };
        fs::rename(&path_tmp_out, &params.path_out).with_context(|| {
            format!(
                "Could not move output archive into place at {}",
                params.path_out.display()
            )
        })?;

        //// Reports
        hist.write_file(&params.path_reports.join(FILE_BARCODE_HIST))?;
        hist.write_rank_file(&params.path_reports.join(FILE_BARCODE_RANK))?;
        stats.write_summary(&params.path_reports.join(FILE_SUMMARY))?;
        stats.log_summary();

        Ok(())
    }

    ///////////////////////////////
    /// Pass 1. Workers classify chunks in parallel; a single consumer
    /// applies the calls in input order, so first-seen order (and with it
    /// the tie-break of the later ranking) is deterministic
    fn count_barcodes(
        params: &Arc<FilterBarcodes>,
        corrector: &Arc<BarcodeCorrector>,
    ) -> Result<BarcodeHistogram> {
        let (tx_chunk, rx_chunk) = crossbeam::channel::bounded::<Chunk>(FILTER_CHANNEL_BOUND);
        let (tx_call, rx_call) =
            crossbeam::channel::bounded::<(u64, Vec<Option<CellID>>)>(FILTER_CHANNEL_BOUND);

        let thread_pool = threadpool::ThreadPool::new(params.threads_work);
        for _ in 0..params.threads_work {
            let rx_chunk = rx_chunk.clone();
            let tx_call = tx_call.clone();
            let corrector = Arc::clone(corrector);

            thread_pool.execute(move || {
                while let Ok(Some((seq_no, chunk))) = rx_chunk.recv() {
                    let calls: Vec<Option<CellID>> = chunk
                        .iter()
                        .map(|record| match classify_record(record, &corrector) {
                            ReadCall::Resolved(corrected) => Some(corrected.cell_id),
                            _ => None,
                        })
                        .collect();
                    let _ = tx_call.send((seq_no, calls));
                }
            });
        }
        //The consumer loop below must see the channel close once all
        //workers are done
        drop(tx_call);

        let reader = spawn_chunk_reader(params.path_in.clone(), tx_chunk, params.threads_work);

        let mut hist = BarcodeHistogram::new();
        let mut n_total: u64 = 0;
        let mut n_resolved: u64 = 0;
        for_each_in_order(rx_call, |calls| {
            for call in calls {
                n_total += 1;
                if let Some(cell_id) = call {
                    n_resolved += 1;
                    hist.inc(&cell_id);
                }
            }
            Ok(())
        })?;

        thread_pool.join();
        let n_read = reader.join().expect("reader thread panicked")?;
        assert_eq!(n_read, n_total);

        info!(
            "Pass 1 done: {} reads, {} resolvable, {} distinct combined barcodes",
            n_total,
            n_resolved,
            hist.num_distinct()
        );
        Ok(hist)
    }

    ///////////////////////////////
    /// Pass 2. Workers classify and re-tag chunks in parallel; the main
    /// thread writes accepted records in input order to the temporary
    /// archive
    fn rewrite_archive(
        params: &Arc<FilterBarcodes>,
        corrector: &Arc<BarcodeCorrector>,
        accept: &Arc<AcceptanceSet>,
        path_tmp_out: &Path,
    ) -> Result<FilterStats> {
        //The reader thread opens its own handle; this one only provides
        //the header template for the output archive
        let header = {
            let bam_in = bam::Reader::from_path(&params.path_in).with_context(|| {
                format!("Could not open input archive {}", params.path_in.display())
            })?;
            bam::Header::from_template(bam_in.header())
        };
        //Single-threaded writing keeps the output bytes identical between
        //runs over the same input
        let mut bam_out = bam::Writer::from_path(path_tmp_out, &header, bam::Format::Bam)
            .with_context(|| {
                format!("Could not create output archive {}", path_tmp_out.display())
            })?;

        let (tx_chunk, rx_chunk) = crossbeam::channel::bounded::<Chunk>(FILTER_CHANNEL_BOUND);
        let (tx_kept, rx_kept) = crossbeam::channel::bounded::<(
            u64,
            (Vec<bam::Record>, FilterStats),
        )>(FILTER_CHANNEL_BOUND);

        let collapsing = corrector.collapsing_enabled();
        let thread_pool = threadpool::ThreadPool::new(params.threads_work);
        for _ in 0..params.threads_work {
            let rx_chunk = rx_chunk.clone();
            let tx_kept = tx_kept.clone();
            let corrector = Arc::clone(corrector);
            let accept = Arc::clone(accept);

            thread_pool.execute(move || {
                while let Ok(Some((seq_no, chunk))) = rx_chunk.recv() {
                    let mut kept: Vec<bam::Record> = Vec::with_capacity(chunk.len());
                    let mut stats = FilterStats::default();

                    for mut record in chunk {
                        stats.n_total += 1;
                        match classify_record(&record, &corrector) {
                            ReadCall::MissingTags => stats.n_missing_tags += 1,
                            ReadCall::Unresolvable => stats.n_unresolvable += 1,
                            ReadCall::Resolved(corrected) => {
                                stats.n_resolved += 1;
                                if corrected.collapsed {
                                    stats.n_collapsed += 1;
                                }
                                if accept.contains(&corrected.cell_id) {
                                    rewrite_record(&mut record, &corrected, collapsing)
                                        .expect("Failed to attach barcode tags");
                                    stats.n_accepted += 1;
                                    kept.push(record);
                                } else {
                                    stats.n_below_cutoff += 1;
                                }
                            }
                        }
                    }
                    let _ = tx_kept.send((seq_no, (kept, stats)));
                }
            });
        }
        drop(tx_kept);

        let reader = spawn_chunk_reader(params.path_in.clone(), tx_chunk, params.threads_work);

        let mut stats = FilterStats::default();
        for_each_in_order(rx_kept, |(kept, chunk_stats)| {
            for record in &kept {
                bam_out
                    .write(record)
                    .context("Failed to write to output archive")?;
            }
            stats.add(&chunk_stats);
            Ok(())
        })?;

        thread_pool.join();
        reader.join().expect("reader thread panicked")?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::{BarcodeWhitelist, WellGroup};
    use crate::fileformat::bam as bamtag;
    use std::io::Cursor;

    fn whitelist(name: &str, src: &str) -> BarcodeWhitelist {
        BarcodeWhitelist::from_reader(name, Cursor::new(src.to_string())).unwrap()
    }

    fn corrector() -> Arc<BarcodeCorrector> {
        let src = "AAAA\nCCCC\nGGGG\nTTTT\n";
        Arc::new(BarcodeCorrector::new(
            vec![
                whitelist("round1", src),
                whitelist("round2", src),
                whitelist("round3", src),
            ],
            None,
        ))
    }

    fn record_with_tags(name: &[u8], tags: &[(&str, &str)]) -> bam::Record {
        let mut record = bam::Record::new();
        record.set(name, None, b"ACGTACGT", &[30; 8]);
        for (tag, value) in tags {
            bamtag::set_string_tag(&mut record, tag, value).unwrap();
        }
        record
    }

    #[test]
    fn classify_record_resolves_tagged_read() {
        let corr = corrector();
        let record = record_with_tags(
            b"r1",
            &[("XD", "AAAA"), ("XE", "CCCC"), ("XF", "GGGT")],
        );
        match classify_record(&record, &corr) {
            ReadCall::Resolved(corrected) => {
                assert_eq!(corrected.cell_id, "AAAA_CCCC_GGGG");
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn classify_record_missing_tag() {
        let corr = corrector();
        let record = record_with_tags(b"r1", &[("XD", "AAAA"), ("XE", "CCCC")]);
        assert_eq!(classify_record(&record, &corr), ReadCall::MissingTags);
    }

    #[test]
    fn classify_record_unresolvable_segment() {
        let corr = corrector();
        //XF is two mismatches from every whitelist entry
        let record = record_with_tags(
            b"r1",
            &[("XD", "AAAA"), ("XE", "CCCC"), ("XF", "GGTT")],
        );
        assert_eq!(classify_record(&record, &corr), ReadCall::Unresolvable);
    }

    #[test]
    fn rewrite_attaches_corrected_tags() {
        let corr = corrector();
        let mut record = record_with_tags(
            b"r1",
            &[("XD", "AAAT"), ("XE", "CCCC"), ("XF", "GGGG")],
        );
        let corrected = match classify_record(&record, &corr) {
            ReadCall::Resolved(c) => c,
            other => panic!("expected resolution, got {:?}", other),
        };
        rewrite_record(&mut record, &corrected, false).unwrap();
        assert_eq!(
            bamtag::get_string_tag(&record, "XC"),
            Some("AAAACCCCGGGG")
        );
        assert_eq!(bamtag::get_string_tag(&record, "XW"), None);

        //The decision and rewrite are deterministic: a second application
        //yields the same tags
        rewrite_record(&mut record, &corrected, false).unwrap();
        assert_eq!(
            bamtag::get_string_tag(&record, "XC"),
            Some("AAAACCCCGGGG")
        );
    }

    #[test]
    fn rewrite_attaches_well_tag_when_collapsing() {
        let src = "AAAA\nCCCC\nGGGG\nTTTT\n";
        let whitelists = vec![
            whitelist("round1", src),
            whitelist("round2", src),
            whitelist("round3", src),
        ];
        let wells = WellGroup::from_reader(
            Cursor::new("round\tseq\twell\n1\tAAAA\tA1\n1\tCCCC\tA1\n"),
            &whitelists,
        )
        .unwrap();
        let corr = Arc::new(BarcodeCorrector::new(whitelists, Some(wells)));

        let mut record = record_with_tags(
            b"r1",
            &[("XD", "CCCC"), ("XE", "GGGG"), ("XF", "TTTT")],
        );
        let corrected = match classify_record(&record, &corr) {
            ReadCall::Resolved(c) => c,
            other => panic!("expected resolution, got {:?}", other),
        };
        rewrite_record(&mut record, &corrected, true).unwrap();
        assert_eq!(
            bamtag::get_string_tag(&record, "XC"),
            Some("CCCCGGGGTTTT")
        );
        assert_eq!(bamtag::get_string_tag(&record, "XW"), Some("A1_GGGG_TTTT"));
    }

    #[test]
    fn in_order_consumption_restores_input_order() {
        let (tx, rx) = crossbeam::channel::unbounded::<(u64, Vec<u64>)>();
        //Chunks arrive out of order
        tx.send((2, vec![4])).unwrap();
        tx.send((0, vec![0, 1])).unwrap();
        tx.send((1, vec![2, 3])).unwrap();
        drop(tx);

        let mut seen: Vec<u64> = Vec::new();
        for_each_in_order(rx, |items| {
            seen.extend(items);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    ///////////////////////////////
    /// End-to-end classification scenario: 500 exact-match reads on one
    /// barcode plus 500 noise reads that are at least two mismatches from
    /// every whitelist entry, with a single-cell cutoff
    #[test]
    fn population_scenario_exact_vs_noise() {
        let corr = corrector();
        let mut hist = BarcodeHistogram::new();
        let mut n_unresolvable = 0;

        //Noise segments: every entry differs in at least two positions
        //from AAAA/CCCC/GGGG/TTTT
        let noise = ["AACC", "CCGG", "GGTT", "TTAA", "ACGT", "CATG", "GTAC", "TGCA"];

        for i in 0..1000 {
            let segments: [&str; 3] = if i % 2 == 0 {
                ["AAAA", "AAAA", "AAAA"]
            } else {
                let n = noise[i % noise.len()];
                [n, n, n]
            };
            match corr.correct(&segments) {
                Some(corrected) => hist.inc(&corrected.cell_id),
                None => n_unresolvable += 1,
            }
        }

        assert_eq!(n_unresolvable, 500);
        assert_eq!(hist.num_distinct(), 1);
        assert_eq!(hist.count_for(&"AAAA_AAAA_AAAA".to_string()), 500);

        let accept = AcceptanceSet::from_histogram(&hist, 1);
        assert_eq!(accept.len(), 1);
        assert!(accept.contains(&"AAAA_AAAA_AAAA".to_string()));
    }

    ///////////////////////////////
    /// Well-collapsing scenario: two barcodes of one well split 300/200
    /// count as a single identity of 500
    #[test]
    fn population_scenario_well_collapse() {
        let src = "AAAA\nCCCC\nGGGG\nTTTT\n";
        let whitelists = vec![
            whitelist("round1", src),
            whitelist("round2", src),
            whitelist("round3", src),
        ];
        let wells = WellGroup::from_reader(
            Cursor::new("round\tseq\twell\n1\tAAAA\tA1\n1\tCCCC\tA1\n"),
            &whitelists,
        )
        .unwrap();
        let corr = BarcodeCorrector::new(whitelists, Some(wells));

        let mut hist = BarcodeHistogram::new();
        for _ in 0..300 {
            let corrected = corr.correct(&["AAAA", "GGGG", "GGGG"]).unwrap();
            hist.inc(&corrected.cell_id);
        }
        for _ in 0..200 {
            let corrected = corr.correct(&["CCCC", "GGGG", "GGGG"]).unwrap();
            hist.inc(&corrected.cell_id);
        }

        assert_eq!(hist.num_distinct(), 1);
        assert_eq!(hist.count_for(&"A1_GGGG_GGGG".to_string()), 500);

        let accept = AcceptanceSet::from_histogram(&hist, 1);
        //Both original barcodes resolve to the one accepted identity
        assert!(accept.contains(&corr.correct(&["AAAA", "GGGG", "GGGG"]).unwrap().cell_id));
        assert!(accept.contains(&corr.correct(&["CCCC", "GGGG", "GGGG"]).unwrap().cell_id));
    }
}
