use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use log::info;

use super::core::FilterBarcodes;
use crate::barcode::{load_well_group, load_whitelists, BarcodeCorrector};
use crate::utils::determine_thread_count;

pub const DEFAULT_PATH_IN: &str = "reads_tagged.bam";
pub const DEFAULT_PATH_REPORTS: &str = "reports";

#[derive(Args)]
pub struct FilterCMD {
    /// Input unaligned BAM, tagged with the raw barcode segments
    #[arg(short = 'i', long = "in", value_parser, default_value = DEFAULT_PATH_IN)]
    pub path_in: PathBuf,

    /// Output BAM with accepted, re-tagged reads
    #[arg(short = 'o', long = "out", value_parser)]
    pub path_out: PathBuf,

    /// Directory for the summary and knee-plot report files
    #[arg(long = "out-reports", value_parser, default_value = DEFAULT_PATH_REPORTS)]
    pub path_reports: PathBuf,

    /// Expected number of cells; only that many of the most frequent
    /// barcodes are kept
    #[arg(short = 'n', long = "num-cells", value_parser)]
    pub num_cells: usize,

    /// Directory with the per-round barcode whitelists
    #[arg(long = "barcodes", value_parser)]
    pub path_barcodes: PathBuf,

    /// Merge barcodes that originate from the same physical well
    #[arg(long = "collapse-wells")]
    pub collapse_wells: bool,

    //Thread settings
    #[arg(short = '@', value_parser = clap::value_parser!(usize))]
    num_threads_total: Option<usize>,
}
impl FilterCMD {
    /// Run the commandline option
    pub fn try_execute(&mut self) -> Result<()> {
        if self.num_cells == 0 {
            bail!("--num-cells must be at least 1");
        }
        if !self.path_in.is_file() {
            bail!("Input file {} does not exist", self.path_in.display());
        }

        let num_threads = determine_thread_count(self.num_threads_total)?;
        info!("Using {} worker threads", num_threads);

        //Load all correction tables before touching any read
        let whitelists = load_whitelists(&self.path_barcodes)?;
        let wells = if self.collapse_wells {
            Some(load_well_group(&self.path_barcodes, &whitelists)?)
        } else {
            None
        };
        let corrector = BarcodeCorrector::new(whitelists, wells);

        fs::create_dir_all(&self.path_reports).with_context(|| {
            format!(
                "Could not create report directory {}",
                self.path_reports.display()
            )
        })?;

        let params = FilterBarcodes {
            path_in: self.path_in.clone(),
            path_out: self.path_out.clone(),
            path_reports: self.path_reports.clone(),
            num_cells: self.num_cells,
            threads_work: num_threads,
        };
        FilterBarcodes::run(&Arc::new(params), &Arc::new(corrector))?;

        info!("Filter has finished successfully");
        Ok(())
    }
}
