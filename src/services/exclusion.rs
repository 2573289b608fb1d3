//! File exclusion filter for LOC accounting.
//!
//! Shell-glob semantics: `*` stays within a path segment, `**` crosses
//! segments, brace groups expand. Patterns come from the `exclude_globs`
//! setting; invalid ones are skipped at build time with a warning.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// A compiled set of exclusion patterns.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    set: GlobSet,
    pattern_count: usize,
}

impl ExclusionFilter {
    /// Compile a pattern list. Patterns that fail to parse are skipped.
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_count = 0;

        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                // `*` must not cross directory separators; `**` does
                .literal_separator(true)
                .build();
            match glob {
                Ok(glob) => {
                    builder.add(glob);
                    pattern_count += 1;
                }
                Err(e) => {
                    log::warn!("Skipping invalid exclusion glob {:?}: {}", pattern, e);
                }
            }
        }

        let set = builder.build().unwrap_or_else(|e| {
            log::warn!("Failed to build exclusion set: {}; excluding nothing", e);
            GlobSet::empty()
        });

        Self { set, pattern_count }
    }

    /// An empty filter excludes nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            pattern_count: 0,
        }
    }

    /// Whether any usable pattern was configured.
    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }

    /// Decide whether a file path is excluded from LOC accounting.
    pub fn is_excluded(&self, filename: &str) -> bool {
        self.set.is_match(filename)
    }
}
