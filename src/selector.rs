//! Test selection per mutant

use std::time::Duration;

use crate::coverage::CoverageIndex;
use crate::generator::Mutant;

/// Tests to run against one mutant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// No test executes the mutated lines; nothing is run
    NotCovered,
    /// Covering tests, fastest first
    Tests(Vec<String>),
    /// No coverage data for the file; run the whole suite
    All,
}

impl TestSelection {
    pub fn tests(&self) -> &[String] {
        match self {
            Self::Tests(tests) => tests,
            Self::NotCovered | Self::All => &[],
        }
    }
}

pub fn select(index: Option<&CoverageIndex>, mutant: &Mutant) -> TestSelection {
    let Some(index) = index else {
        return TestSelection::All;
    };
    let Some(covering) =
        index.covering_tests(&mutant.source_file, mutant.start_line, mutant.end_line)
    else {
        return TestSelection::All;
    };
    if covering.is_empty() {
        return TestSelection::NotCovered;
    }

    let mut tests: Vec<(Option<Duration>, &str)> = covering
        .into_iter()
        .map(|test| (index.duration(test), test))
        .collect();
    // Unknown durations sort after every known one.
    tests.sort_by(|(da, a), (db, b)| match (da, db) {
        (Some(x), Some(y)) => x.cmp(y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    TestSelection::Tests(tests.into_iter().map(|(_, t)| t.to_string()).collect())
}

/// How long the selected tests should take when nothing is wrong.
///
/// Tests without a recorded duration contribute nothing; the configured base
/// timeout absorbs them.
pub fn expected_duration(
    selection: &TestSelection,
    index: Option<&CoverageIndex>,
    baseline: Duration,
) -> Duration {
    match selection {
        TestSelection::NotCovered => Duration::ZERO,
        TestSelection::All => baseline,
        TestSelection::Tests(tests) => tests
            .iter()
            .filter_map(|t| index.and_then(|i| i.duration(t)))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn mutant(file: &str, start_line: usize, end_line: usize) -> Mutant {
        Mutant {
            id: 0,
            mutator_id: "ArithmeticOperator".to_string(),
            source_file: PathBuf::from(file),
            span_start: 0,
            span_end: 1,
            start_line,
            end_line,
            original_text: "+".to_string(),
            mutated_text: "-".to_string(),
            function: None,
            enclosing_type: None,
        }
    }

    fn index() -> CoverageIndex {
        CoverageIndex::from_json(
            r#"{
            "tests": [
                {"id": "t::c", "duration_ms": 30},
                {"id": "t::a", "duration_ms": 10},
                {"id": "t::b", "duration_ms": 10}
            ],
            "files": [{"path": "src/m.rs", "lines": {
                "2": ["t::c", "t::z"],
                "3": ["t::b", "t::a"]
            }}]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_orders_fastest_first_unknown_last() {
        let index = index();
        let selection = select(Some(&index), &mutant("src/m.rs", 2, 3));
        assert_eq!(
            selection,
            TestSelection::Tests(vec![
                "t::a".to_string(),
                "t::b".to_string(),
                "t::c".to_string(),
                "t::z".to_string(),
            ])
        );
        assert_eq!(
            expected_duration(&selection, Some(&index), Duration::from_secs(9)),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_uncovered_lines() {
        let index = index();
        let selection = select(Some(&index), &mutant("src/m.rs", 7, 7));
        assert_eq!(selection, TestSelection::NotCovered);
        assert_eq!(
            expected_duration(&selection, Some(&index), Duration::from_secs(9)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_missing_data_runs_everything() {
        let index = index();
        assert_eq!(select(None, &mutant("src/m.rs", 2, 2)), TestSelection::All);
        let selection = select(Some(&index), &mutant("src/other.rs", 2, 2));
        assert_eq!(selection, TestSelection::All);
        assert_eq!(
            expected_duration(&selection, Some(&index), Duration::from_secs(9)),
            Duration::from_secs(9)
        );
    }
}
