use std::process::Command;

use anyhow::bail;
use log::{debug, info, warn};

///////////////////////////////
/// Resolve the number of worker threads, using all available cores when
/// not specified
pub fn determine_thread_count(total: Option<usize>) -> anyhow::Result<usize> {
    if let Some(total) = total {
        if total == 0 {
            bail!("Thread count must be at least 1");
        }
        return Ok(total);
    }
    match std::thread::available_parallelism() {
        Ok(total) => Ok(total.get()),
        Err(_) => {
            warn!("Could not autodetect the number of threads available. Setting to 1, but it is better if you specify");
            Ok(1)
        }
    }
}

///////////////////////////////
/// Check that an external program can be started
pub fn check_executable(program: &str) -> anyhow::Result<()> {
    debug!("Checking for {}", program);
    if let Ok(_output) = Command::new(program).output() {
        info!("Found {}", program);
        Ok(())
    } else {
        bail!("{} is either not installed or not in PATH", program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_thread_count_is_kept() {
        assert_eq!(determine_thread_count(Some(7)).unwrap(), 7);
    }

    #[test]
    fn zero_threads_rejected() {
        assert!(determine_thread_count(Some(0)).is_err());
    }
}
