//! Coverage index input
//!
//! The index maps source lines to the tests that execute them:
//!
//! ```json
//! {
//!   "tests": [{"id": "math::tests::adds", "duration_ms": 12}],
//!   "files": [{"path": "src/math.rs", "lines": {"3": ["math::tests::adds"]}}]
//! }
//! ```
//!
//! Paths are relative to the project root. Producing this file is left to
//! whatever coverage tool the project uses.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MutationError, Result};

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    tests: Vec<RawTest>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    id: String,
    #[serde(default)]
    duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    path: PathBuf,
    #[serde(default)]
    lines: BTreeMap<u32, Vec<String>>,
}

/// Line-to-test mapping plus per-test durations
#[derive(Debug, Default)]
pub struct CoverageIndex {
    durations: HashMap<String, Duration>,
    files: HashMap<PathBuf, BTreeMap<u32, Vec<String>>>,
}

impl CoverageIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MutationError::Coverage {
            file: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| MutationError::Coverage {
            file: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let raw: RawIndex = serde_json::from_str(content)?;
        let durations = raw
            .tests
            .into_iter()
            .filter_map(|t| Some((t.id, Duration::from_millis(t.duration_ms?))))
            .collect();
        let mut files: HashMap<PathBuf, BTreeMap<u32, Vec<String>>> = HashMap::new();
        for file in raw.files {
            let lines = files.entry(normalize(&file.path)).or_default();
            for (line, tests) in file.lines {
                lines.entry(line).or_default().extend(tests);
            }
        }
        Ok(Self { durations, files })
    }

    /// Tests covering any line in `start..=end`, or `None` if the file is
    /// not in the index at all
    pub fn covering_tests(&self, file: &Path, start: usize, end: usize) -> Option<BTreeSet<&str>> {
        let lines = self.files.get(&normalize(file))?;
        let (start, end) = (to_line(start), to_line(end));
        Some(
            lines
                .range(start..=end.max(start))
                .flat_map(|(_, tests)| tests.iter().map(String::as_str))
                .collect(),
        )
    }

    pub fn duration(&self, test: &str) -> Option<Duration> {
        self.durations.get(test).copied()
    }
}

fn to_line(line: usize) -> u32 {
    u32::try_from(line).unwrap_or(u32::MAX)
}

/// Drop `.` components so `./src/a.rs` and `src/a.rs` are the same key
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
