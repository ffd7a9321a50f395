//! Unpack configuration.

/// Settings threaded through [`crate::unpack`].
///
/// ```
/// use mobi_unpack::UnpackOptions;
///
/// let opts = UnpackOptions::default().with_verbose(true);
/// assert!(opts.verbose);
/// assert!(!opts.write_raw_intermediates);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Log the header field dump, EXTH listing and section map at info level.
    pub verbose: bool,
    /// Retain undecoded header and auxiliary section payloads on each book part.
    pub write_raw_intermediates: bool,
}

impl UnpackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_raw_intermediates(mut self, keep: bool) -> Self {
        self.write_raw_intermediates = keep;
        self
    }
}
