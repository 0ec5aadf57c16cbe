//! Literal multi-pattern intrusion scanner.
//!
//! All patterns are matched in a single pass with an Aho-Corasick automaton
//! built at startup. Matching is case-insensitive through ASCII lowercase
//! normalization applied both at insert time and to each scanned byte;
//! non-ASCII bytes compare as-is. Overlapping matches are all reported.

use serde::Serialize;

/// Sample offsets kept in the verdict detail.
const SAMPLE_OFFSET_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    Sql,
    Script,
    PathTraversal,
    Shell,
}

impl ThreatCategory {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            ThreatCategory::Sql => 0,
            ThreatCategory::Script => 1,
            ThreatCategory::PathTraversal => 2,
            ThreatCategory::Shell => 3,
        }
    }

    fn from_index(i: usize) -> Self {
        match i {
            0 => ThreatCategory::Sql,
            1 => ThreatCategory::Script,
            2 => ThreatCategory::PathTraversal,
            _ => ThreatCategory::Shell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 3,
            Severity::High => 6,
            Severity::Critical => 12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreatPattern {
    pub literal: &'static str,
    pub category: ThreatCategory,
    pub severity: Severity,
}

const fn pattern(
    literal: &'static str,
    category: ThreatCategory,
    severity: Severity,
) -> ThreatPattern {
    ThreatPattern {
        literal,
        category,
        severity,
    }
}

/// The built-in pattern set. Literal substrings only; no regex engine.
pub fn default_patterns() -> Vec<ThreatPattern> {
    use Severity::*;
    use ThreatCategory::*;
    vec![
        // SQL shapes
        pattern("drop table", Sql, Critical),
        pattern("union select", Sql, Critical),
        pattern("or 1=1", Sql, High),
        pattern("and 1=1", Sql, High),
        pattern("--", Sql, Low),
        pattern("/*", Sql, Low),
        pattern("*/", Sql, Low),
        pattern(";--", Sql, Medium),
        pattern("'", Sql, Low),
        pattern("\"", Sql, Low),
        pattern(";", Sql, Low),
        // Script / markup
        pattern("<script", Script, Critical),
        pattern("javascript:", Script, High),
        pattern("onload=", Script, Medium),
        pattern("onerror=", Script, Medium),
        pattern("<iframe", Script, High),
        pattern("<embed", Script, High),
        // Path traversal
        pattern("../", PathTraversal, High),
        pattern("..\\", PathTraversal, High),
        pattern("/etc/passwd", PathTraversal, Critical),
        pattern("c:\\windows", PathTraversal, High),
        pattern("\\\\", PathTraversal, Low),
        // Shell
        pattern("rm -rf", Shell, Critical),
        pattern("; rm ", Shell, Critical),
        pattern("&& rm ", Shell, Critical),
        pattern("| rm ", Shell, Critical),
        pattern("`", Shell, Medium),
        pattern("$(", Shell, Medium),
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdsDetail {
    pub match_count: u64,
    /// Categories with at least one hit, most frequent first.
    pub top_categories: Vec<(ThreatCategory, u64)>,
    /// Start offsets of the first few matches. Never the matched bytes.
    pub sample_offsets: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct IdsVerdict {
    pub passed: bool,
    pub score: u32,
    pub detail: IdsDetail,
}

/// One automaton state. Transitions are kept sparse so total memory stays
/// linear in the summed pattern length.
#[derive(Debug, Default)]
struct Node {
    transitions: Vec<(u8, u32)>,
    fail: u32,
    outputs: Vec<u16>,
}

impl Node {
    fn next(&self, byte: u8) -> Option<u32> {
        self.transitions
            .iter()
            .find(|(b, _)| *b == byte)
            .map(|(_, s)| *s)
    }
}

#[derive(Debug)]
pub struct IdsScanner {
    nodes: Vec<Node>,
    patterns: Vec<ThreatPattern>,
    threshold: u32,
    ceiling: u32,
}

impl IdsScanner {
    pub fn new(threshold: u32, ceiling: u32) -> Self {
        Self::with_patterns(default_patterns(), threshold, ceiling)
    }

    pub fn with_patterns(patterns: Vec<ThreatPattern>, threshold: u32, ceiling: u32) -> Self {
        let mut nodes = vec![Node::default()];

        for (idx, pat) in patterns.iter().enumerate() {
            let mut state = 0u32;
            for &raw in pat.literal.as_bytes() {
                let byte = raw.to_ascii_lowercase();
                state = match nodes[state as usize].next(byte) {
                    Some(next) => next,
                    None => {
                        let next = nodes.len() as u32;
                        nodes.push(Node::default());
                        nodes[state as usize].transitions.push((byte, next));
                        next
                    }
                };
            }
            nodes[state as usize].outputs.push(idx as u16);
        }

        // Failure links via BFS; output links are merged in so every state
        // reports all patterns ending at it, including proper suffixes.
        let mut queue = std::collections::VecDeque::new();
        for &(_, child) in &nodes[0].transitions.clone() {
            nodes[child as usize].fail = 0;
            queue.push_back(child);
        }
        while let Some(u) = queue.pop_front() {
            for (byte, v) in nodes[u as usize].transitions.clone() {
                let mut f = nodes[u as usize].fail;
                let fail_v = loop {
                    if let Some(w) = nodes[f as usize].next(byte) {
                        break w;
                    }
                    if f == 0 {
                        break 0;
                    }
                    f = nodes[f as usize].fail;
                };
                let fail_v = if fail_v == v { 0 } else { fail_v };
                nodes[v as usize].fail = fail_v;
                let inherited = nodes[fail_v as usize].outputs.clone();
                nodes[v as usize].outputs.extend(inherited);
                queue.push_back(v);
            }
        }

        Self {
            nodes,
            patterns,
            threshold,
            ceiling,
        }
    }

    fn step(&self, mut state: u32, byte: u8) -> u32 {
        loop {
            if let Some(next) = self.nodes[state as usize].next(byte) {
                return next;
            }
            if state == 0 {
                return 0;
            }
            state = self.nodes[state as usize].fail;
        }
    }

    /// Single pass over `data`, O(len + total pattern length).
    pub fn scan(&self, data: &[u8]) -> IdsVerdict {
        let mut state = 0u32;
        let mut raw_score: u64 = 0;
        let mut match_count: u64 = 0;
        let mut category_counts = [0u64; ThreatCategory::COUNT];
        let mut sample_offsets = Vec::with_capacity(SAMPLE_OFFSET_CAP);

        for (i, &raw) in data.iter().enumerate() {
            state = self.step(state, raw.to_ascii_lowercase());
            for &pat_idx in &self.nodes[state as usize].outputs {
                let pat = &self.patterns[pat_idx as usize];
                match_count += 1;
                raw_score += u64::from(pat.severity.weight());
                category_counts[pat.category.index()] += 1;
                if sample_offsets.len() < SAMPLE_OFFSET_CAP {
                    sample_offsets.push(i + 1 - pat.literal.len());
                }
            }
        }

        let score = raw_score.min(u64::from(self.ceiling)) as u32;

        let mut top_categories: Vec<(ThreatCategory, u64)> = category_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(i, &count)| (ThreatCategory::from_index(i), count))
            .collect();
        top_categories.sort_by(|a, b| b.1.cmp(&a.1));

        IdsVerdict {
            passed: score <= self.threshold,
            score,
            detail: IdsDetail {
                match_count,
                top_categories,
                sample_offsets,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> IdsScanner {
        IdsScanner::new(5, 100)
    }

    #[test]
    fn test_clean_sequence_scores_zero() {
        let verdict = scanner().scan(b">h1\nACGTACGTACGT\n");
        assert!(verdict.passed);
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.detail.match_count, 0);
        assert!(verdict.detail.top_categories.is_empty());
    }

    #[test]
    fn test_sql_injection_detected_case_insensitive() {
        let verdict = scanner().scan(b"x'; DROP TABLE users;--");
        assert!(!verdict.passed);
        assert!(verdict.score > 5);
        assert_eq!(
            verdict.detail.top_categories.first().map(|(c, _)| *c),
            Some(ThreatCategory::Sql)
        );
    }

    #[test]
    fn test_score_equal_to_threshold_passes() {
        // Five low-severity single quotes: score == threshold.
        let verdict = scanner().scan(b"a'b'c'd'e'");
        assert_eq!(verdict.score, 5);
        assert!(verdict.passed);
    }

    #[test]
    fn test_score_one_over_threshold_fails() {
        let verdict = scanner().scan(b"a'b'c'd'e'f'");
        assert_eq!(verdict.score, 6);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_overlapping_matches_all_reported() {
        // ";--" contains ";" and "--" which must also be reported.
        let verdict = scanner().scan(b"x;--");
        assert_eq!(verdict.detail.match_count, 3);
        assert_eq!(verdict.score, 1 + 1 + 3);
    }

    #[test]
    fn test_sample_offsets_within_input() {
        let input = b"../../etc/passwd";
        let verdict = scanner().scan(input);
        assert!(!verdict.detail.sample_offsets.is_empty());
        for &offset in &verdict.detail.sample_offsets {
            assert!(offset < input.len());
        }
        // First match is the traversal at the very start.
        assert_eq!(verdict.detail.sample_offsets[0], 0);
    }

    #[test]
    fn test_sample_offsets_capped_at_eight() {
        let input = b"';';';';';';';';';';';";
        let verdict = scanner().scan(input);
        assert_eq!(verdict.detail.sample_offsets.len(), 8);
        assert!(verdict.detail.match_count > 8);
    }

    #[test]
    fn test_score_capped_at_ceiling() {
        let input: Vec<u8> = std::iter::repeat(b'\'').take(500).collect();
        let verdict = scanner().scan(&input);
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.detail.match_count, 500);
    }

    #[test]
    fn test_shell_patterns_detected() {
        let verdict = scanner().scan(b"innocuous; rm -rf /");
        assert!(!verdict.passed);
        assert!(verdict
            .detail
            .top_categories
            .iter()
            .any(|(c, _)| *c == ThreatCategory::Shell));
    }

    #[test]
    fn test_script_markup_detected() {
        let verdict = scanner().scan(b"<SCRIPT>alert(1)</script>");
        assert!(!verdict.passed);
        assert!(verdict
            .detail
            .top_categories
            .iter()
            .any(|(c, _)| *c == ThreatCategory::Script));
    }

    #[test]
    fn test_windows_traversal_detected() {
        let verdict = scanner().scan(b"..\\..\\C:\\Windows\\system32");
        assert!(!verdict.passed);
        assert!(verdict
            .detail
            .top_categories
            .iter()
            .any(|(c, _)| *c == ThreatCategory::PathTraversal));
    }

    #[test]
    fn test_non_ascii_bytes_compare_as_is() {
        let verdict = scanner().scan("ACGT\u{00e9}\u{00ff}ACGT".as_bytes());
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn test_match_at_end_of_input() {
        let verdict = scanner().scan(b"harmless prefix then $(");
        assert!(verdict.detail.match_count >= 1);
        let input_len = b"harmless prefix then $(".len();
        assert!(verdict
            .detail
            .sample_offsets
            .iter()
            .all(|&o| o < input_len));
    }
}
