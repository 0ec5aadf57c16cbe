//! Fixed-dimension feature extraction over genomic sequence bodies.
//!
//! The body is the concatenation of sequence lines from all records,
//! truncated to a configured maximum. Ambiguous bases and gaps contribute
//! nothing to the k-mer counts. All features land in [0, 1].

/// Hand-built features before zero padding: 64 trinucleotide frequencies,
/// 16 dinucleotide frequencies, GC fraction, normalized longest homopolymer
/// run, and the four per-base homopolymer maxima.
pub const RAW_FEATURE_COUNT: usize = 64 + 16 + 1 + 1 + 4;

#[derive(Debug, Clone)]
pub struct BodyFeatures {
    pub vector: Vec<f32>,
    /// Bytes of sequence body that went into the vector, post-truncation.
    pub body_length: usize,
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    max_body_bytes: usize,
    dim: usize,
}

fn base_index(b: u8) -> Option<usize> {
    match b.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

impl FeatureExtractor {
    pub fn new(max_body_bytes: usize, dim: usize) -> Self {
        debug_assert!(dim >= RAW_FEATURE_COUNT);
        Self {
            max_body_bytes,
            dim,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Pulls the sequence body out of a FASTA or FASTQ buffer.
    pub fn extract_body(&self, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        let leading = data.iter().find(|b| !b.is_ascii_whitespace());

        match leading {
            Some(b'>') => {
                for line in data.split(|&b| b == b'\n') {
                    if line.first() == Some(&b'>') {
                        continue;
                    }
                    push_line(&mut body, line, self.max_body_bytes);
                    if body.len() >= self.max_body_bytes {
                        break;
                    }
                }
            }
            Some(b'@') => {
                // Four-line records; the sequence is the second line of each.
                let mut pos = 0u8;
                for line in data.split(|&b| b == b'\n') {
                    if line.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    if pos == 1 {
                        push_line(&mut body, line, self.max_body_bytes);
                        if body.len() >= self.max_body_bytes {
                            break;
                        }
                    }
                    pos = (pos + 1) % 4;
                }
            }
            _ => {
                for line in data.split(|&b| b == b'\n') {
                    push_line(&mut body, line, self.max_body_bytes);
                    if body.len() >= self.max_body_bytes {
                        break;
                    }
                }
            }
        }

        body
    }

    pub fn extract(&self, data: &[u8]) -> BodyFeatures {
        let body = self.extract_body(data);
        let mut vector = vec![0f32; self.dim];

        if !body.is_empty() {
            fill_kmer_frequencies(&body, &mut vector);
            fill_composition(&body, &mut vector);
        }

        BodyFeatures {
            vector,
            body_length: body.len(),
        }
    }
}

fn push_line(body: &mut Vec<u8>, line: &[u8], max: usize) {
    for &b in line {
        if body.len() >= max {
            return;
        }
        if !b.is_ascii_whitespace() {
            body.push(b);
        }
    }
}

/// Features 0..64: trinucleotide frequencies. Features 64..80: dinucleotide
/// frequencies. K-mers containing anything outside ACGT are skipped.
fn fill_kmer_frequencies(body: &[u8], vector: &mut [f32]) {
    let mut tri = [0u64; 64];
    let mut tri_total = 0u64;
    let mut di = [0u64; 16];
    let mut di_total = 0u64;

    for window in body.windows(3) {
        if let (Some(a), Some(b), Some(c)) = (
            base_index(window[0]),
            base_index(window[1]),
            base_index(window[2]),
        ) {
            tri[a * 16 + b * 4 + c] += 1;
            tri_total += 1;
        }
    }

    for window in body.windows(2) {
        if let (Some(a), Some(b)) = (base_index(window[0]), base_index(window[1])) {
            di[a * 4 + b] += 1;
            di_total += 1;
        }
    }

    if tri_total > 0 {
        for (i, &count) in tri.iter().enumerate() {
            vector[i] = count as f32 / tri_total as f32;
        }
    }
    if di_total > 0 {
        for (i, &count) in di.iter().enumerate() {
            vector[64 + i] = count as f32 / di_total as f32;
        }
    }
}

/// Feature 80: GC fraction. Feature 81: longest homopolymer run over body
/// length. Features 82..86: per-base (A, C, G, T) homopolymer maxima over
/// body length.
fn fill_composition(body: &[u8], vector: &mut [f32]) {
    let mut base_counts = [0u64; 4];
    let mut per_base_max_run = [0usize; 4];
    let mut longest_run = 0usize;
    let mut current: Option<(usize, usize)> = None;

    for &b in body {
        let idx = base_index(b);
        if let Some(i) = idx {
            base_counts[i] += 1;
        }
        current = match (current, idx) {
            (Some((prev, run)), Some(i)) if prev == i => Some((i, run + 1)),
            (_, Some(i)) => Some((i, 1)),
            (_, None) => None,
        };
        if let Some((i, run)) = current {
            per_base_max_run[i] = per_base_max_run[i].max(run);
            longest_run = longest_run.max(run);
        }
    }

    let len = body.len() as f32;
    let acgt_total: u64 = base_counts.iter().sum();
    if acgt_total > 0 {
        vector[80] = (base_counts[2] + base_counts[1]) as f32 / acgt_total as f32;
    }
    vector[81] = longest_run as f32 / len;
    for (i, &run) in per_base_max_run.iter().enumerate() {
        vector[82 + i] = run as f32 / len;
    }
}
