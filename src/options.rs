//! Global options handed to the incremental core by the driver.

use std::path::PathBuf;

/// Options that decide whether and how incremental analysis runs. The
/// compile-arg vector is kept verbatim: any difference from the cached vector
/// forces a full rebuild.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Full package name being compiled.
    pub package_name: String,
    /// Verbatim compile-argument vector.
    pub compile_args: Vec<String>,
    /// Directory holding cache artefacts (`.cachedast`, `.chir`, `.log`).
    pub cache_dir: PathBuf,
    /// Incremental compilation enabled at all.
    pub enable_incremental: bool,
    /// Mirror the diagnostic log to stdout.
    pub debug_print: bool,
}

impl GlobalOptions {
    /// The canonical standard-library prefix: `VESTA_HOME` when set, otherwise
    /// the directory of the running binary.
    pub fn vesta_home() -> PathBuf {
        if let Ok(home) = std::env::var("VESTA_HOME") {
            return PathBuf::from(home);
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of this package's main cache blob. Package names may contain
    /// dots, so the extension is appended rather than substituted.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", self.package_name, crate::cache::CACHED_AST_EXT))
    }

    /// Path of this package's diagnostic log.
    pub fn log_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", self.package_name, crate::cache::LOG_EXT))
    }
}
