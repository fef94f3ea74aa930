//! # Utility Functions Module
//!
//! Helpers per costruire le argument list dei tool esterni (ffmpeg, exiftool)
//! senza una cascata di `.to_string()`.

/// Builds an argument vector from heterogeneous `Display` items.
///
/// Each item is converted on its own, so literals, numbers and
/// `Path::display()` values can be mixed freely.
///
/// # Example
/// ```rust
/// use memory_kit::args;
///
/// let crf = 18;
/// let argv = args!["-crf", crf, "-y"];
/// assert_eq!(argv, vec!["-crf", "18", "-y"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        ::std::vec![$(::std::string::ToString::to_string(&$item)),*]
    };
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    #[test]
    fn test_args_macro_mixes_types() {
        let crf: u8 = 18;
        let input = Path::new("staging/no_filters.mp4");
        let result = args!["-i", input.display(), "-crf", crf,];
        assert_eq!(result, vec!["-i", "staging/no_filters.mp4", "-crf", "18"]);
    }
}
