//! Engine configuration and heuristic thresholds.
//!
//! Every size ceiling and classification heuristic lives here as a field
//! rather than an inline constant. The kernel-FIT selection heuristics in
//! particular are firmware-specific and must stay tunable per image family.

/// Configuration for resolution and extraction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound for any container size derived from an untrusted header.
    ///
    /// A header-shaped value at a misaligned offset can claim an implausible
    /// size; nothing larger than this is ever allocated or read.
    pub max_container_size: u64,

    /// Upper bound for a speculative read feeding the gzip decoder, used
    /// when the true compressed-stream length is unknown.
    pub max_scan_size: u64,

    /// Image offset at which the wrapper-FIT sweep begins.
    pub kernel_search_start: u64,

    /// A device-tree hit at or after this offset is classified as the
    /// kernel FIT when no declared-size match decides first.
    pub kernel_offset_threshold: u64,

    /// Declared size that directly identifies the kernel FIT among
    /// device-tree hits. Firmware-specific; `None` disables the direct
    /// match and leaves only the offset-threshold fallback.
    pub kernel_fit_size_hint: Option<u64>,

    /// Largest header-declared size accepted for a wrapper-FIT candidate.
    /// Wrappers are metadata-only containers of a few KB.
    pub wrapper_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_container_size: 50 * 1024 * 1024,
            max_scan_size: 16 * 1024 * 1024,
            kernel_search_start: 4 * 1024 * 1024,
            kernel_offset_threshold: 4 * 1024 * 1024,
            kernel_fit_size_hint: None,
            wrapper_max_size: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_container_size, 50 * 1024 * 1024);
        assert_eq!(config.kernel_fit_size_hint, None);
        assert!(config.wrapper_max_size < config.max_container_size);
    }
}
