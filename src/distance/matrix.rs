use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult, LoadError};
use crate::utils::normalize_address;

/// Symmetric distance matrix indexed by street address.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
    matrix: Vec<Vec<f64>>,
}

impl DistanceTable {
    /// Build from a full square matrix. Rejects asymmetric, negative,
    /// non-finite or non-zero-diagonal entries.
    pub fn from_matrix(names: Vec<String>, matrix: Vec<Vec<f64>>) -> Result<Self, LoadError> {
        let n = names.len();
        if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
            return Err(LoadError::Table(format!(
                "expected a {n}x{n} matrix for {n} addresses"
            )));
        }

        for i in 0..n {
            if matrix[i][i] != 0.0 {
                return Err(LoadError::Table(format!(
                    "distance from '{}' to itself is {}",
                    names[i], matrix[i][i]
                )));
            }
            for j in 0..i {
                let (a, b) = (matrix[i][j], matrix[j][i]);
                if !a.is_finite() || a < 0.0 || (a - b).abs() > 1e-9 {
                    return Err(LoadError::Table(format!(
                        "distance between '{}' and '{}' must be finite, non-negative and symmetric ({} vs {})",
                        names[i], names[j], a, b
                    )));
                }
            }
        }

        let mut index = HashMap::with_capacity(n);
        for (i, name) in names.iter().enumerate() {
            if index.insert(normalize_address(name), i).is_some() {
                return Err(LoadError::Table(format!("address '{}' listed twice", name)));
            }
        }

        info!("Distance table ready with {} addresses", n);
        Ok(Self {
            names,
            index,
            matrix,
        })
    }

    /// Build from lower-triangle rows (row `i` holds distances to addresses
    /// `0..=i`), mirroring them into a full matrix.
    pub fn from_lower_triangle(names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self, LoadError> {
        let n = names.len();
        if rows.len() != n {
            return Err(LoadError::Table(format!(
                "{} distance rows for {} addresses",
                rows.len(),
                n
            )));
        }

        let mut matrix = vec![vec![0.0; n]; n];
        for (i, row) in rows.iter().enumerate() {
            if row.len() < i + 1 {
                return Err(LoadError::Table(format!(
                    "row {} has {} entries, expected at least {}",
                    i,
                    row.len(),
                    i + 1
                )));
            }
            for (j, &d) in row.iter().take(i + 1).enumerate() {
                matrix[i][j] = d;
                matrix[j][i] = d;
            }
        }
        debug!("Mirrored {} lower-triangle rows", n);

        Self::from_matrix(names, matrix)
    }

    pub fn index_of(&self, address: &str) -> DispatchResult<usize> {
        self.index
            .get(&normalize_address(address))
            .copied()
            .ok_or_else(|| DispatchError::MissingAddress(address.to_string()))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(&normalize_address(address))
    }

    /// Distance between two indices handed out by [`DistanceTable::index_of`].
    pub(crate) fn distance(&self, from: usize, to: usize) -> f64 {
        self.matrix[from][to]
    }

    /// Distance between two indices, or `None` if either is out of range.
    pub fn get(&self, from: usize, to: usize) -> Option<f64> {
        self.matrix.get(from)?.get(to).copied()
    }

    pub fn distance_between(&self, a: &str, b: &str) -> DispatchResult<f64> {
        Ok(self.distance(self.index_of(a)?, self.index_of(b)?))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
