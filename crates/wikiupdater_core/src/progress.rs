use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{msg:>12} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})";

/// Bar over `len` units, or a hidden one when output is quiet.
pub fn progress_bar(len: usize, message: &'static str, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(TEMPLATE)?
            .progress_chars("=> "),
    );
    bar.set_message(message);
    Ok(bar)
}
