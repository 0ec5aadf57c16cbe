//! Analysis collaborator seam.
//!
//! The pipeline reads the plaintext once through this trait after persist.
//! Errors here are non-fatal: the stage records a failure but the job still
//! completes.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Analysis failed: {0}")]
pub struct AnalyzeError(pub String);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub record_count: usize,
    pub total_bases: usize,
    pub gc_percent: f64,
    pub distinct_trinucleotides: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_trinucleotide: Option<String>,
}

pub trait Analyzer: Send + Sync {
    fn analyze(&self, plaintext: &[u8]) -> Result<AnalysisSummary, AnalyzeError>;
}

/// Built-in k-mer composition analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct KmerAnalyzer;

impl Analyzer for KmerAnalyzer {
    fn analyze(&self, plaintext: &[u8]) -> Result<AnalysisSummary, AnalyzeError> {
        let mut record_count = 0usize;
        let mut body: Vec<u8> = Vec::new();

        let mut fastq_pos = 0u8;
        let is_fastq = plaintext
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'@');

        for line in plaintext.split(|&b| b == b'\n') {
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            if is_fastq {
                match fastq_pos {
                    0 => record_count += 1,
                    1 => body.extend(line.iter().filter(|b| !b.is_ascii_whitespace())),
                    _ => {}
                }
                fastq_pos = (fastq_pos + 1) % 4;
            } else if line.first() == Some(&b'>') {
                record_count += 1;
            } else {
                body.extend(line.iter().filter(|b| !b.is_ascii_whitespace()));
            }
        }

        if record_count == 0 {
            return Err(AnalyzeError("no sequence records found".to_string()));
        }

        let mut gc = 0usize;
        let mut acgt = 0usize;
        let mut tri_counts = std::collections::HashMap::new();

        for &b in &body {
            match b.to_ascii_uppercase() {
                b'G' | b'C' => {
                    gc += 1;
                    acgt += 1;
                }
                b'A' | b'T' => acgt += 1,
                _ => {}
            }
        }

        for window in body.windows(3) {
            let upper: Vec<u8> = window.iter().map(|b| b.to_ascii_uppercase()).collect();
            if upper.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')) {
                *tri_counts.entry(upper).or_insert(0u64) += 1;
            }
        }

        let top_trinucleotide = tri_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(kmer, _)| String::from_utf8_lossy(kmer).into_owned());

        let gc_percent = if acgt > 0 {
            gc as f64 / acgt as f64 * 100.0
        } else {
            0.0
        };

        Ok(AnalysisSummary {
            record_count,
            total_bases: body.len(),
            gc_percent,
            distinct_trinucleotides: tri_counts.len(),
            top_trinucleotide,
        })
    }
}
