//! Utility types and constants used throughout memstrings.
//!
//! This module provides:
//! - Constants for procfs access ([`PROC_ROOT`])
//! - Progress reporting utilities ([`NamedProgress`])

mod constants;
mod named_progress;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;

#[cfg(test)]
mod tests {
    use super::NamedProgress;
    use indicatif::ProgressStyle;

    #[test]
    fn test_named_spinner_template() {
        // a broken template would fall back silently, so render one
        let style = ProgressStyle::named_spinner("Scanning regions");
        let bar = indicatif::ProgressBar::hidden().with_style(style);
        bar.inc(3);
        assert_eq!(bar.position(), 3);
    }
}
