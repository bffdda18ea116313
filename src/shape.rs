//! Shapes of array data managed by the scheduler.

use std::fmt;

/// Represents the shape (dimensions) of an array.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Creates a new shape from dimensions.
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Shape(dims.into())
    }

    /// Creates a scalar shape (empty dimensions).
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the total number of elements. Scalars count as one; a
    /// degenerate shape counts zero.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Returns the size of the i-th dimension.
    pub fn dim(&self, i: usize) -> usize {
        self.0[i]
    }

    /// Returns true if any dimension is zero, i.e. the shape holds no data.
    pub fn is_degenerate(&self) -> bool {
        self.0.iter().any(|&d| d == 0)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(v: &[usize]) -> Self {
        Shape(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(v: [usize; N]) -> Self {
        Shape(v.to_vec())
    }
}

impl From<usize> for Shape {
    fn from(v: usize) -> Self {
        Shape(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basic() {
        let s = Shape::new([2, 3, 4]);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(1), 3);
    }

    #[test]
    fn test_scalar_counts_one_element() {
        assert_eq!(Shape::scalar().numel(), 1);
        assert!(!Shape::scalar().is_degenerate());
    }

    #[test]
    fn test_degenerate_shape() {
        assert!(Shape::new([4, 0, 2]).is_degenerate());
        assert_eq!(Shape::new([4, 0, 2]).numel(), 0);
        assert!(!Shape::new([4, 1, 2]).is_degenerate());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new([4]).to_string(), "(4,)");
        assert_eq!(Shape::new([2, 3]).to_string(), "(2, 3)");
    }
}
