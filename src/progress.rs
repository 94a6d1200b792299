use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for `len` steps, or a hidden one when disabled.
pub fn bar(len: u64, enabled: bool) -> Result<ProgressBar> {
    if !enabled {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}
