//! Matrix Market readers.
//!
//! Supports the `coordinate` layout for matrices (`general` and `symmetric`)
//! and the `array` layout for dense vectors. A vector stream without a
//! banner is read as whitespace-separated values.

use crate::error::KError;
use crate::matrix::sparse::CsrMatrix;
use std::io::BufRead;

/// Upper bound on capacity reserved from an untrusted size line.
const RESERVE_LIMIT: usize = 1 << 20;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Symmetry {
    General,
    Symmetric,
}

fn parse_err(line: usize, msg: impl Into<String>) -> KError {
    KError::Parse { line, msg: msg.into() }
}

fn parse_num<N: std::str::FromStr>(
    tok: Option<&str>,
    line: usize,
    what: &str,
) -> Result<N, KError> {
    tok.ok_or_else(|| parse_err(line, format!("missing {what}")))?
        .parse()
        .map_err(|_| parse_err(line, format!("invalid {what}")))
}

/// Read a sparse matrix in Matrix Market coordinate format.
pub fn read_matrix_market<R: BufRead>(reader: R) -> Result<CsrMatrix<f64>, KError> {
    let mut lines = reader.lines().enumerate();
    let (_, banner) = lines.next().ok_or_else(|| parse_err(1, "empty stream"))?;
    let banner = banner?;
    let tokens: Vec<String> = banner.split_whitespace().map(str::to_ascii_lowercase).collect();
    if tokens.len() < 5 || tokens[0] != "%%matrixmarket" || tokens[1] != "matrix" {
        return Err(parse_err(1, "missing %%MatrixMarket matrix banner"));
    }
    if tokens[2] != "coordinate" {
        return Err(parse_err(1, format!("unsupported layout `{}`", tokens[2])));
    }
    if tokens[3] != "real" && tokens[3] != "integer" {
        return Err(parse_err(1, format!("unsupported field `{}`", tokens[3])));
    }
    let symmetry = match tokens[4].as_str() {
        "general" => Symmetry::General,
        "symmetric" => Symmetry::Symmetric,
        other => return Err(parse_err(1, format!("unsupported symmetry `{other}`"))),
    };

    let mut size: Option<(usize, usize, usize)> = None;
    let mut triplets = Vec::new();
    let mut entries = 0usize;
    for (idx, line) in lines {
        let line = line?;
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let mut tok = trimmed.split_whitespace();
        match size {
            None => {
                let m: usize = parse_num(tok.next(), lineno, "row count")?;
                let n: usize = parse_num(tok.next(), lineno, "column count")?;
                let nnz: usize = parse_num(tok.next(), lineno, "entry count")?;
                if nnz > m.saturating_mul(n) {
                    let msg = format!("{nnz} entries do not fit a {m}x{n} matrix");
                    return Err(parse_err(lineno, msg));
                }
                triplets.reserve(nnz.min(RESERVE_LIMIT));
                size = Some((m, n, nnz));
            }
            Some((m, n, _)) => {
                let i: usize = parse_num(tok.next(), lineno, "row index")?;
                let j: usize = parse_num(tok.next(), lineno, "column index")?;
                let v: f64 = parse_num(tok.next(), lineno, "value")?;
                if i == 0 || j == 0 || i > m || j > n {
                    return Err(parse_err(lineno, format!("index ({i}, {j}) out of range")));
                }
                entries += 1;
                triplets.push((i - 1, j - 1, v));
                if symmetry == Symmetry::Symmetric && i != j {
                    triplets.push((j - 1, i - 1, v));
                }
            }
        }
    }
    let (m, n, nnz) = size.ok_or_else(|| parse_err(1, "missing size line"))?;
    if entries != nnz {
        return Err(KError::DimensionMismatch { expected: nnz, found: entries });
    }
    CsrMatrix::from_triplets(m, n, &triplets)
}

/// Read a dense vector, either Matrix Market `array` or bare values.
pub fn read_vector<R: BufRead>(reader: R) -> Result<Vec<f64>, KError> {
    let mut out = Vec::new();
    let mut expected: Option<usize> = None;
    let mut banner = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        let trimmed = line.trim();
        if idx == 0 && trimmed.to_ascii_lowercase().starts_with("%%matrixmarket") {
            if !trimmed.to_ascii_lowercase().contains("array") {
                return Err(parse_err(1, "vectors must use the array layout"));
            }
            banner = true;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        if banner && expected.is_none() {
            let mut tok = trimmed.split_whitespace();
            let m: usize = parse_num(tok.next(), lineno, "row count")?;
            let n: usize = parse_num(tok.next(), lineno, "column count")?;
            if n != 1 {
                return Err(parse_err(lineno, format!("expected one column, found {n}")));
            }
            expected = Some(m);
            out.reserve(m.min(RESERVE_LIMIT));
            continue;
        }
        for tok in trimmed.split_whitespace() {
            out.push(parse_num(Some(tok), lineno, "value")?);
        }
    }
    if let Some(m) = expected {
        if m != out.len() {
            return Err(KError::DimensionMismatch { expected: m, found: out.len() });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_general_coordinate() {
        let src = "%%MatrixMarket matrix coordinate real general\n% comment\n\
                   2 2 3\n1 1 4.0\n2 1 -1\n2 2 3.5\n";
        let a = read_matrix_market(Cursor::new(src)).unwrap();
        assert_eq!(a.nrows(), 2);
        assert_eq!(a.get(1, 0), -1.0);
        assert_eq!(a.get(0, 1), 0.0);
        assert_eq!(a.get(1, 1), 3.5);
    }

    #[test]
    fn mirrors_symmetric_entries() {
        let src = "%%MatrixMarket matrix coordinate real symmetric\n2 2 2\n1 1 2\n2 1 -1\n";
        let a = read_matrix_market(Cursor::new(src)).unwrap();
        assert_eq!(a.get(0, 1), -1.0);
        assert_eq!(a.get(1, 0), -1.0);
        assert_eq!(a.nnz(), 3);
    }

    #[test]
    fn rejects_bad_index() {
        let src = "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n";
        assert!(matches!(read_matrix_market(Cursor::new(src)), Err(KError::Parse { line: 3, .. })));
    }

    #[test]
    fn reads_vectors_with_and_without_banner() {
        let mm = "%%MatrixMarket matrix array real general\n3 1\n1\n2\n3\n";
        assert_eq!(read_vector(Cursor::new(mm)).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(read_vector(Cursor::new("1 2\n3\n")).unwrap(), vec![1.0, 2.0, 3.0]);
        let short = "%%MatrixMarket matrix array real general\n3 1\n1\n";
        assert!(read_vector(Cursor::new(short)).is_err());
    }

    #[test]
    fn oversized_headers_fail_without_allocating() {
        let src =
            "%%MatrixMarket matrix coordinate real general\n1 1 18446744073709551615\n1 1 1.0\n";
        assert!(matches!(read_matrix_market(Cursor::new(src)), Err(KError::Parse { line: 2, .. })));
        let vec_src = "%%MatrixMarket matrix array real general\n18446744073709551615 1\n1\n";
        assert!(matches!(
            read_vector(Cursor::new(vec_src)),
            Err(KError::DimensionMismatch { found: 1, .. })
        ));
    }
}
