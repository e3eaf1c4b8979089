use indicatif::ProgressStyle;

/// Extension trait for creating named progress styles.
pub trait NamedProgress {
    /// Creates a spinner style with a name label.
    ///
    /// # Arguments
    ///
    /// * `name` - Label to display with the spinner
    fn named_spinner(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    fn named_spinner(name: &str) -> Self {
        let mut fmt = name.to_string();
        for _ in 0..(32 - name.len() as i64 - 1) {
            fmt += " ";
        }
        fmt += "{spinner:.cyan} {pos:>6} regions [{elapsed_precise}] {msg}";
        ProgressStyle::default_spinner()
            .template(&fmt)
            .unwrap_or(ProgressStyle::default_spinner())
    }
}
