//! Text input formats of the command line tool.
//!
//! - Data tables: a header line naming the columns, then one row per bin.
//!   Columns are separated by tabs, commas or whitespace; `#` starts a
//!   comment line.
//! - Matrices: MatrixMarket-like coordinate files (`rows cols nnz` header,
//!   then 1-based `row col value` lines). With `symmetric`, off-diagonal
//!   entries are mirrored.
//! - Vectors: one value per line.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use gammafit_linalg::{SparseMatrix, Vector};

/// Numeric table with named columns.
#[derive(Debug, Clone)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Table {
    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
            .ok_or_else(|| anyhow!("Column '{}' not found (have: {})", name, self.names.join(", ")))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else if line.contains(',') {
        line.split(',').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

fn data_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#') && !l.starts_with('%'))
}

/// Read a data table.
pub fn read_table(path: &Path) -> Result<Table> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file: {}", path.display()))?;
    let mut lines = data_lines(&contents);
    let (_, header) = lines
        .next()
        .ok_or_else(|| anyhow!("Empty data file: {}", path.display()))?;
    let names: Vec<String> = split_fields(header).into_iter().map(str::to_string).collect();
    let mut columns = vec![Vec::new(); names.len()];

    for (lineno, line) in lines {
        let fields = split_fields(line);
        if fields.len() != names.len() {
            bail!(
                "{}:{}: expected {} fields, found {}",
                path.display(),
                lineno,
                names.len(),
                fields.len()
            );
        }
        for (col, field) in columns.iter_mut().zip(fields) {
            let v: f64 = field
                .parse()
                .with_context(|| format!("{}:{}: invalid number '{}'", path.display(), lineno, field))?;
            col.push(v);
        }
    }
    Ok(Table { names, columns })
}

/// Read a coordinate-format sparse matrix.
pub fn read_matrix_market(path: &Path, symmetric: bool) -> Result<SparseMatrix> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read matrix: {}", path.display()))?;
    let mut lines = data_lines(&contents);
    let (_, header) = lines
        .next()
        .ok_or_else(|| anyhow!("Empty matrix file: {}", path.display()))?;
    let dims: Vec<usize> = header
        .split_whitespace()
        .map(str::parse::<usize>)
        .collect::<std::result::Result<Vec<usize>, _>>()
        .with_context(|| format!("{}: invalid header '{}'", path.display(), header))?;
    if dims.len() < 2 {
        bail!("{}: header must give rows and columns", path.display());
    }
    let (nrows, ncols) = (dims[0], dims[1]);

    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for (lineno, line) in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            bail!("{}:{}: expected 'row col value'", path.display(), lineno);
        }
        let row: usize = fields[0].parse()?;
        let col: usize = fields[1].parse()?;
        let val: f64 = fields[2].parse()?;
        if row == 0 || col == 0 {
            bail!("{}:{}: indices are 1-based", path.display(), lineno);
        }
        let (row, col) = (row - 1, col - 1);
        rows.push(row);
        cols.push(col);
        vals.push(val);
        if symmetric && row != col {
            rows.push(col);
            cols.push(row);
            vals.push(val);
        }
    }
    let entries = vals.len();
    if let Some(&expected) = dims.get(2) {
        let read = if symmetric {
            rows.iter().zip(&cols).filter(|(r, c)| r <= c).count()
        } else {
            entries
        };
        if read != expected {
            bail!("{}: header announces {} entries, found {}", path.display(), expected, read);
        }
    }
    Ok(SparseMatrix::from_triplets(nrows, ncols, &rows, &cols, &vals)?)
}

/// Read a vector, one value per line.
pub fn read_vector(path: &Path) -> Result<Vector> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read vector: {}", path.display()))?;
    data_lines(&contents)
        .map(|(lineno, l)| {
            l.parse::<f64>()
                .with_context(|| format!("{}:{}: invalid number '{}'", path.display(), lineno, l))
        })
        .collect::<Result<Vec<f64>>>()
        .map(Vector::from)
}
