//! TSV read/write for dense matrices.
//!
//! Missing dyads are written as `NA` and parsed back to NaN, so a
//! partly observed adjacency round-trips through a plain text file.

use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

/// Read a tab-separated matrix; `NA`/`nan` become NaN.
pub fn read_matrix_tsv(path: &str) -> anyhow::Result<DMatrix<f64>> {
    let reader = BufReader::new(File::open(path)?);

    let mut data: Vec<f64> = Vec::new();
    let mut nrows = 0usize;
    let mut ncols = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<f64> = line
            .split('\t')
            .map(|tok| parse_entry(tok.trim()))
            .collect::<anyhow::Result<_>>()?;

        match ncols {
            None => ncols = Some(row.len()),
            Some(c) => anyhow::ensure!(
                row.len() == c,
                "ragged row in {path}: expected {c} columns, got {}",
                row.len()
            ),
        }
        data.extend(row);
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| anyhow::anyhow!("no data in {path}"))?;
    Ok(DMatrix::from_row_iterator(nrows, ncols, data))
}

/// Write a matrix as tab-separated values; NaN becomes `NA`.
pub fn write_matrix_tsv(mat: &DMatrix<f64>, path: &str) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for i in 0..mat.nrows() {
        let line = mat
            .row(i)
            .iter()
            .map(|&x| {
                if x.is_nan() {
                    "NA".to_string()
                } else {
                    format!("{}", x)
                }
            })
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

fn parse_entry(tok: &str) -> anyhow::Result<f64> {
    if tok.eq_ignore_ascii_case("na") || tok.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    tok.parse::<f64>()
        .map_err(|_| anyhow::anyhow!("cannot parse matrix entry {tok:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adj.tsv");
        let path = path.to_str().unwrap();

        let mut mat = DMatrix::from_element(3, 3, 0.0);
        mat[(0, 1)] = 1.0;
        mat[(1, 0)] = 1.0;
        mat[(0, 2)] = f64::NAN;
        mat[(2, 0)] = f64::NAN;

        write_matrix_tsv(&mat, path).unwrap();
        let back = read_matrix_tsv(path).unwrap();

        assert_eq!(back.shape(), (3, 3));
        for i in 0..3 {
            for j in 0..3 {
                if mat[(i, j)].is_nan() {
                    assert!(back[(i, j)].is_nan());
                } else {
                    assert_eq!(back[(i, j)], mat[(i, j)]);
                }
            }
        }
    }

    #[test]
    fn rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "1\t0\n1\n").unwrap();
        assert!(read_matrix_tsv(path.to_str().unwrap()).is_err());
    }
}
