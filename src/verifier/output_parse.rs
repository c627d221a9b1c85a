//! Output-parser contracts for `test_suite`, `test_coverage`, and
//! `lint_pass` (spec §4.3). Authored fresh in the `LazyLock<Regex>`
//! static-compilation idiom used throughout `signals/parser.rs`, since no
//! teacher module parses test/coverage/lint output.

use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestCounts {
    pub passing: u32,
    pub failing: u32,
}

static TESTS_SUMMARY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^tests?:\s*(.+)$").unwrap());
static KEY_VALUE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(passed|passing|failed|failing)\D{0,3}(\d+)").unwrap());
static PASSING_FAILING_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+(passing|failing)").unwrap());
static TAP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)#\s*tests\s+(\d+)[,\s]+#?\s*pass\s+(\d+)(?:[,\s]+#?\s*fail\s+(\d+))?").unwrap());
static GENERIC_TEST_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+(?:tests|specs)\b").unwrap());

/// Extracts pass/fail counts with the priority: explicit "Tests:" summary
/// line, then passing/failing words, then TAP-style counters, then a
/// generic "N tests" fallback (treated as all-passing).
pub fn parse_test_counts(output: &str) -> Option<TestCounts> {
    if let Some(captures) = TESTS_SUMMARY_LINE.captures(output) {
        let rest = &captures[1];
        let mut counts = TestCounts::default();
        let mut found = false;
        for pair in KEY_VALUE_PAIR.captures_iter(rest) {
            found = true;
            let n: u32 = pair[2].parse().unwrap_or(0);
            if pair[1].to_lowercase().starts_with("pass") {
                counts.passing += n;
            } else {
                counts.failing += n;
            }
        }
        if found {
            return Some(counts);
        }
    }

    let mut counts = TestCounts::default();
    let mut found = false;
    for pair in PASSING_FAILING_WORDS.captures_iter(output) {
        found = true;
        let n: u32 = pair[1].parse().unwrap_or(0);
        if pair[2].eq_ignore_ascii_case("passing") {
            counts.passing += n;
        } else {
            counts.failing += n;
        }
    }
    if found {
        return Some(counts);
    }

    if let Some(captures) = TAP_LINE.captures(output) {
        let pass: u32 = captures[2].parse().unwrap_or(0);
        let fail: u32 = captures
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        return Some(TestCounts { passing: pass, failing: fail });
    }

    if let Some(captures) = GENERIC_TEST_COUNT.captures(output) {
        let total: u32 = captures[1].parse().unwrap_or(0);
        return Some(TestCounts { passing: total, failing: 0 });
    }

    None
}

static ISTANBUL_AGGREGATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)all files\s*\|\s*([\d.]+)").unwrap());
static COVERAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)coverage:\s*([\d.]+)%").unwrap());

/// Reads a coverage percentage first from Istanbul-style aggregate table
/// lines, then from any "coverage: N%" pattern.
pub fn parse_coverage(output: &str) -> Option<f64> {
    if let Some(captures) = ISTANBUL_AGGREGATE.captures(output) {
        return captures[1].parse().ok();
    }
    if let Some(captures) = COVERAGE_PATTERN.captures(output) {
        return captures[1].parse().ok();
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LintCounts {
    pub errors: u32,
    pub warnings: u32,
}

static ERROR_WARNING_TUPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((\d+)\s+errors?,\s*(\d+)\s+warnings?\)").unwrap());
static BARE_ERROR_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\berrors?\b").unwrap());
static BARE_WARNING_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bwarnings?\b").unwrap());

/// Prefers "(N errors, M warnings)" tuples; otherwise falls back to
/// counting bare occurrences of the words "error"/"warning".
pub fn parse_lint_counts(output: &str) -> LintCounts {
    if let Some(captures) = ERROR_WARNING_TUPLE.captures(output) {
        return LintCounts {
            errors: captures[1].parse().unwrap_or(0),
            warnings: captures[2].parse().unwrap_or(0),
        };
    }
    LintCounts {
        errors: BARE_ERROR_WORD.find_iter(output).count() as u32,
        warnings: BARE_WARNING_WORD.find_iter(output).count() as u32,
    }
}
