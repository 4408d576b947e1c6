//! Arithmetic and status operations on data arrays.
//!
//! Every operation runs through the element-wise filters, so it honours the
//! status mask and runs on the array's device. `*_assign` forms modify the
//! array in place; the others return a new array and leave `self` untouched.

use crate::array::DataArray;
use crate::core::error::FilterResult;
use crate::filters::elementwise::{BinaryFilter, UnaryFilter};
use crate::filters::operators::{BinaryKernel, UnaryKernel};

/// Right-hand side of a binary operation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    /// The same constant for every component.
    Scalar(f64),
    /// An array of the same shape.
    Array(&'a DataArray),
}

impl From<f64> for Operand<'_> {
    fn from(value: f64) -> Self {
        Operand::Scalar(value)
    }
}

impl<'a> From<&'a DataArray> for Operand<'a> {
    fn from(array: &'a DataArray) -> Self {
        Operand::Array(array)
    }
}

macro_rules! binary_ops {
    ($($kernel:ident => $name:ident, $assign:ident;)*) => {
        $(
            #[doc = concat!("Element-wise `", stringify!($name), "`, returning a new array.")]
            pub fn $name<'a>(&self, rhs: impl Into<Operand<'a>>) -> FilterResult<DataArray> {
                self.binary(BinaryKernel::$kernel, rhs.into())
            }

            #[doc = concat!("Element-wise `", stringify!($name), "` in place.")]
            pub fn $assign<'a>(&mut self, rhs: impl Into<Operand<'a>>) -> FilterResult<()> {
                self.binary_assign(BinaryKernel::$kernel, rhs.into())
            }
        )*
    };
}

#[allow(clippy::should_implement_trait)]
impl DataArray {
    binary_ops! {
        Add => add, add_assign;
        Sub => sub, sub_assign;
        Mul => mul, mul_assign;
        Div => div, div_assign;
        Min => min, min_assign;
        Max => max, max_assign;
    }

    /// Apply a builtin binary kernel, returning a new array.
    pub fn binary(&self, kernel: BinaryKernel, rhs: Operand<'_>) -> FilterResult<DataArray> {
        let mut out = self.clone();
        BinaryFilter::new(kernel).process(&mut out, rhs)?;
        Ok(out)
    }

    /// Apply a builtin binary kernel in place.
    pub fn binary_assign(&mut self, kernel: BinaryKernel, rhs: Operand<'_>) -> FilterResult<()> {
        BinaryFilter::in_place(kernel).process(self, rhs)
    }

    /// Apply a builtin unary kernel in place.
    pub fn unary_assign(&mut self, kernel: UnaryKernel) -> FilterResult<()> {
        UnaryFilter::in_place(kernel).process(self)
    }

    /// Mark every tuple Active.
    pub fn reset_status(&mut self) -> FilterResult<()> {
        self.unary_assign(UnaryKernel::ResetStatus)
    }

    /// Flip the status of every tuple.
    pub fn negate_status(&mut self) -> FilterResult<()> {
        self.unary_assign(UnaryKernel::NegateStatus)
    }
}
