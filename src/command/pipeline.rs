use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use log::{debug, info};

use super::filter::FilterBarcodes;
use crate::barcode::{load_well_group, load_whitelists, BarcodeCorrector};
use crate::command::constants::{
    TAG_BC_QUALITY, TAG_BC_ROUND1, TAG_BC_ROUND2, TAG_BC_ROUND3, TAG_CORRECTED_BC, TAG_UMI,
};
use crate::utils::{check_executable, determine_thread_count};

///////////////////////////////
/// Fixed positions of the combinatorial rounds in the barcode read (R2).
/// The rounds are ligated in reverse order, so round 1 sits outermost
pub const UMI_BASE_RANGE: &str = "1-10";
pub const ROUND3_BASE_RANGE: &str = "11-18";
pub const ROUND2_BASE_RANGE: &str = "49-56";
pub const ROUND1_BASE_RANGE: &str = "87-94";

/// Barcode bases below this quality count toward the XQ rejection tag
pub const BARCODE_BASE_QUALITY: u32 = 10;

///////////////////////////////
/// Run the whole preprocessing chain: convert, tag, quality-filter, trim,
/// barcode-filter, align, merge, gene-tag and count. Every stage except
/// the barcode filter is an external tool invoked through its usual
/// command line, so any stage can be swapped out or rerun by hand
#[derive(Args)]
pub struct PipelineCMD {
    /// FASTQ with the cDNA read (R1)
    #[arg(long = "r1", value_parser)]
    pub path_r1: PathBuf,

    /// FASTQ with the barcode read (R2)
    #[arg(long = "r2", value_parser)]
    pub path_r2: PathBuf,

    /// Directory for all pipeline products
    #[arg(short = 'o', long = "out-dir", value_parser)]
    pub path_out: PathBuf,

    /// Sample name recorded in the read group
    #[arg(long = "sample", value_parser, default_value = "sample1")]
    pub sample: String,

    /// Directory with the per-round barcode whitelists
    #[arg(long = "barcodes", value_parser)]
    pub path_barcodes: PathBuf,

    /// Expected number of cells
    #[arg(short = 'n', long = "num-cells", value_parser)]
    pub num_cells: usize,

    /// Merge barcodes that originate from the same physical well
    #[arg(long = "collapse-wells")]
    pub collapse_wells: bool,

    /// Directory with the Drop-seq tool wrappers
    #[arg(long = "dropseq-dir", value_parser)]
    pub path_dropseq: PathBuf,

    /// Picard jar file
    #[arg(long = "picard-jar", value_parser)]
    pub picard_jar: PathBuf,

    /// STAR executable
    #[arg(long = "star", value_parser, default_value = "STAR")]
    pub star: String,

    /// STAR genome index directory
    #[arg(long = "genome-dir", value_parser)]
    pub path_genome: PathBuf,

    /// Reference fasta (with sequence dictionary) for merging alignments
    #[arg(long = "reference", value_parser)]
    pub path_reference: PathBuf,

    /// Gene annotation in refFlat format
    #[arg(long = "annotation", value_parser)]
    pub path_annotation: PathBuf,

    //Thread settings
    #[arg(short = '@', value_parser = clap::value_parser!(usize))]
    num_threads_total: Option<usize>,
}
impl PipelineCMD {
    /// Run the commandline option
    pub fn try_execute(&mut self) -> Result<()> {
        let num_threads = determine_thread_count(self.num_threads_total)?;

        //Fail on missing tools before any work is done
        check_executable("java")?;
        check_executable(&self.star)?;
        if !self.path_dropseq.is_dir() {
            bail!(
                "Drop-seq tool directory {} does not exist",
                self.path_dropseq.display()
            );
        }

        fs::create_dir_all(&self.path_out).with_context(|| {
            format!(
                "Could not create output directory {}",
                self.path_out.display()
            )
        })?;

        //Load correction tables up front as well; a bad whitelist should
        //not surface only after the tagging stages have run for hours
        let whitelists = load_whitelists(&self.path_barcodes)?;
        let wells = if self.collapse_wells {
            Some(load_well_group(&self.path_barcodes, &whitelists)?)
        } else {
            None
        };
        let corrector = BarcodeCorrector::new(whitelists, wells);

        let out = |fname: &str| self.path_out.join(fname);

        //// Convert the read pairs to an unaligned BAM
        let path_unaligned = out("unaligned.bam");
        run_stage(
            "FastqToSam",
            self.picard("FastqToSam").args([
                format!("F1={}", self.path_r1.display()),
                format!("F2={}", self.path_r2.display()),
                format!("O={}", path_unaligned.display()),
                format!("SM={}", self.sample),
                "SO=queryname".to_string(),
            ]),
        )?;

        //// Extract the three barcode rounds and the UMI into tags
        let tag_stages = [
            (TAG_BC_ROUND1, ROUND1_BASE_RANGE, "tagged_round1.bam"),
            (TAG_BC_ROUND2, ROUND2_BASE_RANGE, "tagged_round2.bam"),
            (TAG_BC_ROUND3, ROUND3_BASE_RANGE, "tagged_round3.bam"),
            (TAG_UMI, UMI_BASE_RANGE, "tagged_umi.bam"),
        ];
        let mut path_current = path_unaligned;
        for (tag, base_range, fname) in tag_stages {
            let path_next = out(fname);
            run_stage(
                "TagBamWithReadSequenceExtended",
                self.dropseq("TagBamWithReadSequenceExtended").args([
                    format!("INPUT={}", path_current.display()),
                    format!("OUTPUT={}", path_next.display()),
                    format!("SUMMARY={}", out(&format!("{}.summary.txt", fname)).display()),
                    format!("BASE_RANGE={}", base_range),
                    format!("BASE_QUALITY={}", BARCODE_BASE_QUALITY),
                    "BARCODED_READ=2".to_string(),
                    "DISCARD_READ=false".to_string(),
                    format!("TAG_NAME={}", tag),
                    "NUM_BASES_BELOW_QUALITY=1".to_string(),
                ]),
            )?;
            path_current = path_next;
        }

        //// Drop reads with low-quality barcode bases; the barcode filter
        //// assumes quality-passed input
        let path_quality = out("tagged_filtered.bam");
        run_stage(
            "FilterBam",
            self.dropseq("FilterBam").args([
                format!("TAG_REJECT={}", TAG_BC_QUALITY),
                format!("INPUT={}", path_current.display()),
                format!("OUTPUT={}", path_quality.display()),
            ]),
        )?;

        //// Trim adapter and poly-A tails from the cDNA read
        let path_trimmed = out("trimmed.bam");
        run_stage(
            "PolyATrimmer",
            self.dropseq("PolyATrimmer").args([
                format!("INPUT={}", path_quality.display()),
                format!("OUTPUT={}", path_trimmed.display()),
                format!("OUTPUT_SUMMARY={}", out("polya_trimming.summary.txt").display()),
                "MISMATCHES=0".to_string(),
                "NUM_BASES=6".to_string(),
            ]),
        )?;

        //// Correct barcodes and keep the expected cells
        info!("Running stage: barcode filter");
        let path_filtered = out("barcode_filtered.bam");
        let params = FilterBarcodes {
            path_in: path_trimmed,
            path_out: path_filtered.clone(),
            path_reports: out("reports"),
            num_cells: self.num_cells,
            threads_work: num_threads,
        };
        fs::create_dir_all(&params.path_reports)?;
        FilterBarcodes::run(&Arc::new(params), &Arc::new(corrector))?;

        //// Align the accepted reads
        let path_fastq = out("filtered.fastq");
        run_stage(
            "SamToFastq",
            self.picard("SamToFastq").args([
                format!("INPUT={}", path_filtered.display()),
                format!("FASTQ={}", path_fastq.display()),
            ]),
        )?;
        run_stage(
            "STAR",
            Command::new(&self.star).current_dir(&self.path_out).args([
                "--genomeDir".to_string(),
                self.path_genome.display().to_string(),
                "--readFilesIn".to_string(),
                path_fastq.display().to_string(),
                "--runThreadN".to_string(),
                num_threads.to_string(),
                "--outFileNamePrefix".to_string(),
                "star_".to_string(),
            ]),
        )?;

        //// Recover the tags by merging the alignment with the unaligned
        //// filtered reads
        let path_aligned_sorted = out("aligned_sorted.bam");
        run_stage(
            "SortSam",
            self.picard("SortSam").args([
                format!("I={}", out("star_Aligned.out.sam").display()),
                format!("O={}", path_aligned_sorted.display()),
                "SO=queryname".to_string(),
            ]),
        )?;
        let path_merged = out("merged.bam");
        run_stage(
            "MergeBamAlignment",
            self.picard("MergeBamAlignment").args([
                format!("REFERENCE_SEQUENCE={}", self.path_reference.display()),
                format!("UNMAPPED_BAM={}", path_filtered.display()),
                format!("ALIGNED_BAM={}", path_aligned_sorted.display()),
                format!("OUTPUT={}", path_merged.display()),
                "INCLUDE_SECONDARY_ALIGNMENTS=false".to_string(),
                "PAIRED_RUN=false".to_string(),
            ]),
        )?;

        //// Tag reads with the gene they overlap and count
        let path_gene_tagged = out("gene_tagged.bam");
        run_stage(
            "TagReadWithGeneFunction",
            self.dropseq("TagReadWithGeneFunction").args([
                format!("I={}", path_merged.display()),
                format!("O={}", path_gene_tagged.display()),
                format!("ANNOTATIONS_FILE={}", self.path_annotation.display()),
            ]),
        )?;
        run_stage(
            "DigitalExpression",
            self.dropseq("DigitalExpression").args([
                format!("I={}", path_gene_tagged.display()),
                format!("O={}", out("dge.txt.gz").display()),
                format!("SUMMARY={}", out("dge.summary.txt").display()),
                format!("CELL_BARCODE_TAG={}", TAG_CORRECTED_BC),
                format!("MOLECULAR_BARCODE_TAG={}", TAG_UMI),
                format!("NUM_CORE_BARCODES={}", self.num_cells),
            ]),
        )?;

        info!("Pipeline has finished successfully");
        Ok(())
    }

    fn dropseq(&self, tool: &str) -> Command {
        Command::new(self.path_dropseq.join(tool))
    }

    fn picard(&self, tool: &str) -> Command {
        let mut cmd = Command::new("java");
        cmd.arg("-jar").arg(&self.picard_jar).arg(tool);
        cmd
    }
}

///////////////////////////////
/// Run one external stage, failing the pipeline on a non-zero exit
fn run_stage(name: &str, cmd: &mut Command) -> Result<()> {
    info!("Running stage: {}", name);
    debug!("{:?}", cmd);
    let status = cmd
        .status()
        .with_context(|| format!("Failed to start {}", name))?;
    if !status.success() {
        bail!("Stage {} failed with {}", name, status);
    }
    Ok(())
}
