//! Ground-truth verification.
//!
//! Compares an engine result against an expected result (usually loaded from
//! a truth CSV). Row order is not significant unless the query ordered its
//! output, so both sides are sorted by their rendered cells before cell-wise
//! comparison. Numeric cells compare with relative plus absolute tolerance;
//! everything else compares as text.

use crate::rows::{ResultSet, Value};

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;
const MAX_MISMATCH_ROWS: usize = 5;

/// One reported difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    ColumnCount { actual: usize, expected: usize },
    Columns { actual: Vec<String>, expected: Vec<String> },
    RowCount { actual: usize, expected: usize },
    Cell {
        row: usize,
        column: String,
        actual: String,
        expected: String,
    },
}

/// Outcome of one comparison. At most [`MAX_MISMATCH_ROWS`] differing rows
/// are detailed; `truncated` says whether more existed.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub mismatches: Vec<Mismatch>,
    pub truncated: bool,
    pub compared_rows: usize,
}

impl Verdict {
    pub fn matches(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare a result against the expected rows.
pub fn compare_results(actual: &ResultSet, expected: &ResultSet) -> Verdict {
    let mut verdict = Verdict::default();

    if actual.columns.len() != expected.columns.len() {
        verdict.mismatches.push(Mismatch::ColumnCount {
            actual: actual.columns.len(),
            expected: expected.columns.len(),
        });
        return verdict;
    }
    if actual.columns != expected.columns {
        verdict.mismatches.push(Mismatch::Columns {
            actual: actual.columns.clone(),
            expected: expected.columns.clone(),
        });
        return verdict;
    }
    if actual.row_count() != expected.row_count() {
        verdict.mismatches.push(Mismatch::RowCount {
            actual: actual.row_count(),
            expected: expected.row_count(),
        });
        return verdict;
    }

    let mut left = actual.rows.clone();
    let mut right = expected.rows.clone();
    sort_rows(&mut left);
    sort_rows(&mut right);

    let mut mismatched_rows = 0usize;
    for (i, (a_row, e_row)) in left.iter().zip(right.iter()).enumerate() {
        verdict.compared_rows += 1;
        let mut row_differs = false;
        for (col, (a, e)) in actual.columns.iter().zip(a_row.iter().zip(e_row.iter())) {
            if !cells_match(a, e) {
                row_differs = true;
                if mismatched_rows < MAX_MISMATCH_ROWS {
                    verdict.mismatches.push(Mismatch::Cell {
                        row: i,
                        column: col.clone(),
                        actual: a.render(),
                        expected: e.render(),
                    });
                }
            }
        }
        if row_differs {
            mismatched_rows += 1;
            if mismatched_rows > MAX_MISMATCH_ROWS {
                verdict.truncated = true;
                break;
            }
        }
    }
    verdict
}

fn sort_rows(rows: &mut [Vec<Value>]) {
    rows.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = cell_cmp(x, y);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Ordering used only to pair rows for comparison. Numeric cells order by
/// value so that the same number sorts identically on both sides regardless
/// of how each side rendered it ("3" vs "3.00"); everything else orders by
/// its rendered text.
fn cell_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.render().cmp(&b.render()),
    }
}

fn cells_match(a: &Value, e: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), e.as_f64()) {
        return (x - y).abs() <= ATOL + RTOL * y.abs();
    }
    match (a, e) {
        (Value::Null, Value::Null) => true,
        _ => a.render() == e.render(),
    }
}
