//! Structural validator for uploaded sequence files.
//!
//! The recognized format is decided by the first non-whitespace byte:
//! `>` for FASTA, `@` for FASTQ. Anything else is rejected outright.

use serde::Serialize;

/// Number of alphabet violations recorded before scanning stops.
const VIOLATION_CAP: usize = 32;

/// Header text kept on a violation record, truncated for detail size.
const HEADER_SNIPPET_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceFormat {
    Fasta,
    Fastq,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlphabetViolation {
    /// Zero-based byte offset of the offending character in the input.
    pub offset: usize,
    pub character: char,
    pub record_header: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<SequenceFormat>,
    pub record_count: usize,
    pub violations: Vec<AlphabetViolation>,
    pub truncated: bool,
    /// First structural problem found, e.g. `unknown_format` or a FASTQ
    /// record shape error. Alphabet problems go in `violations` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FormatVerdict {
    pub passed: bool,
    pub detail: FormatDetail,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormatValidator;

impl FormatValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, data: &[u8]) -> FormatVerdict {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'>') => scan_fasta(data),
            Some(b'@') => scan_fastq(data),
            _ => FormatVerdict {
                passed: false,
                detail: FormatDetail {
                    format: None,
                    record_count: 0,
                    violations: vec![],
                    truncated: false,
                    structural: Some("unknown_format".to_string()),
                },
            },
        }
    }
}

/// Iterates lines as `(byte_offset_of_line_start, line_without_newline)`.
/// A trailing `\r` is stripped so CRLF input validates like LF input.
fn lines_with_offsets(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= data.len() {
            return None;
        }
        let line_start = start;
        let rest = &data[start..];
        let (mut line, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => (&rest[..nl], start + nl + 1),
            None => (rest, data.len()),
        };
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        start = next;
        Some((line_start, line))
    })
}

fn is_allowed_base(b: u8) -> bool {
    matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'N' | b'-')
}

fn header_snippet(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.chars().take(HEADER_SNIPPET_LEN).collect()
}

/// Checks one sequence line, appending violations until the cap is reached.
/// Returns false once the cap is hit.
fn check_sequence_line(
    line_start: usize,
    line: &[u8],
    header: &str,
    violations: &mut Vec<AlphabetViolation>,
    truncated: &mut bool,
) -> bool {
    for (i, &b) in line.iter().enumerate() {
        if b.is_ascii_whitespace() || is_allowed_base(b) {
            continue;
        }
        violations.push(AlphabetViolation {
            offset: line_start + i,
            character: b as char,
            record_header: header.to_string(),
        });
        if violations.len() >= VIOLATION_CAP {
            *truncated = true;
            return false;
        }
    }
    true
}

fn scan_fasta(data: &[u8]) -> FormatVerdict {
    let mut record_count = 0;
    let mut violations = Vec::new();
    let mut truncated = false;
    let mut structural: Option<String> = None;
    let mut header: Option<String> = None;
    let mut record_has_sequence = false;

    'lines: for (line_start, line) in lines_with_offsets(data) {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        if line.first() == Some(&b'>') {
            if header.is_some() && !record_has_sequence && structural.is_none() {
                structural = Some("record_without_sequence".to_string());
            }
            record_count += 1;
            header = Some(header_snippet(line));
            record_has_sequence = false;
        } else {
            let Some(ref current) = header else {
                structural = Some("sequence_before_header".to_string());
                break 'lines;
            };
            record_has_sequence = true;
            if !check_sequence_line(line_start, line, current, &mut violations, &mut truncated) {
                break 'lines;
            }
        }
    }

    if header.is_some() && !record_has_sequence && !truncated && structural.is_none() {
        structural = Some("record_without_sequence".to_string());
    }

    let passed = record_count > 0 && violations.is_empty() && structural.is_none();
    FormatVerdict {
        passed,
        detail: FormatDetail {
            format: Some(SequenceFormat::Fasta),
            record_count,
            violations,
            truncated,
            structural,
        },
    }
}

fn scan_fastq(data: &[u8]) -> FormatVerdict {
    let mut record_count = 0;
    let mut violations = Vec::new();
    let mut truncated = false;
    let mut structural: Option<String> = None;
    let mut header = String::new();
    let mut seq_len = 0usize;
    // Position within the four-line record: header, sequence, plus, quality.
    let mut pos = 0u8;

    'lines: for (line_start, line) in lines_with_offsets(data) {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match pos {
            0 => {
                if line.first() != Some(&b'@') {
                    structural = Some("header_missing_at_sign".to_string());
                    break 'lines;
                }
                header = header_snippet(line);
                pos = 1;
            }
            1 => {
                seq_len = line.iter().filter(|b| !b.is_ascii_whitespace()).count();
                if !check_sequence_line(line_start, line, &header, &mut violations, &mut truncated)
                {
                    break 'lines;
                }
                pos = 2;
            }
            2 => {
                if line.first() != Some(&b'+') {
                    structural = Some("separator_missing_plus".to_string());
                    break 'lines;
                }
                pos = 3;
            }
            _ => {
                let qual_len = line.iter().filter(|b| !b.is_ascii_whitespace()).count();
                if qual_len != seq_len {
                    structural = Some("quality_length_mismatch".to_string());
                    break 'lines;
                }
                record_count += 1;
                pos = 0;
            }
        }
    }

    if pos != 0 && !truncated && structural.is_none() {
        structural = Some("incomplete_record".to_string());
    }

    let passed = record_count > 0 && violations.is_empty() && structural.is_none();
    FormatVerdict {
        passed,
        detail: FormatDetail {
            format: Some(SequenceFormat::Fastq),
            record_count,
            violations,
            truncated,
            structural,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_fasta_passes() {
        let verdict = FormatValidator::new().scan(b">h1\nACGTACGTACGT\n");
        assert!(verdict.passed);
        assert_eq!(verdict.detail.format, Some(SequenceFormat::Fasta));
        assert_eq!(verdict.detail.record_count, 1);
        assert!(verdict.detail.violations.is_empty());
    }

    #[test]
    fn test_multi_record_fasta_passes() {
        let verdict = FormatValidator::new().scan(b">a\nACGT\nacgtn-\n>b\nTTTT\n");
        assert!(verdict.passed);
        assert_eq!(verdict.detail.record_count, 2);
    }

    #[test]
    fn test_unknown_format_fails() {
        let verdict = FormatValidator::new().scan(b"ACGTACGT\n");
        assert!(!verdict.passed);
        assert_eq!(verdict.detail.format, None);
        assert_eq!(verdict.detail.structural.as_deref(), Some("unknown_format"));
    }

    #[test]
    fn test_empty_input_is_unknown_format() {
        let verdict = FormatValidator::new().scan(b"  \n\t\n");
        assert!(!verdict.passed);
        assert_eq!(verdict.detail.structural.as_deref(), Some("unknown_format"));
    }

    #[test]
    fn test_alphabet_violations_reported_with_offsets() {
        let verdict = FormatValidator::new().scan(b">h\nACGT!@#\n");
        assert!(!verdict.passed);
        assert_eq!(verdict.detail.violations.len(), 3);
        let first = &verdict.detail.violations[0];
        assert_eq!(first.offset, 7);
        assert_eq!(first.character, '!');
        assert_eq!(first.record_header, ">h");
    }

    #[test]
    fn test_violation_cap_truncates_scan() {
        let mut input = b">h\n".to_vec();
        input.extend(std::iter::repeat(b'!').take(100));
        let verdict = FormatValidator::new().scan(&input);
        assert!(!verdict.passed);
        assert_eq!(verdict.detail.violations.len(), 32);
        assert!(verdict.detail.truncated);
    }

    #[test]
    fn test_header_without_sequence_fails() {
        let verdict = FormatValidator::new().scan(b">only-header\n");
        assert!(!verdict.passed);
        assert_eq!(
            verdict.detail.structural.as_deref(),
            Some("record_without_sequence")
        );
    }

    #[test]
    fn test_clean_fastq_passes() {
        let verdict = FormatValidator::new().scan(b"@r1\nACGT\n+\nIIII\n");
        assert!(verdict.passed);
        assert_eq!(verdict.detail.format, Some(SequenceFormat::Fastq));
        assert_eq!(verdict.detail.record_count, 1);
    }

    #[test]
    fn test_fastq_plus_line_may_repeat_header() {
        let verdict = FormatValidator::new().scan(b"@r1\nACGT\n+r1\nIIII\n");
        assert!(verdict.passed);
    }

    #[test]
    fn test_fastq_quality_length_mismatch_fails() {
        let verdict = FormatValidator::new().scan(b"@r1\nACGT\n+\nII\n");
        assert!(!verdict.passed);
        assert_eq!(
            verdict.detail.structural.as_deref(),
            Some("quality_length_mismatch")
        );
    }

    #[test]
    fn test_fastq_incomplete_record_fails() {
        let verdict = FormatValidator::new().scan(b"@r1\nACGT\n");
        assert!(!verdict.passed);
        assert_eq!(
            verdict.detail.structural.as_deref(),
            Some("incomplete_record")
        );
    }

    #[test]
    fn test_crlf_input_validates() {
        let verdict = FormatValidator::new().scan(b">h\r\nACGT\r\n");
        assert!(verdict.passed);
    }
}
