//! Element-wise operators.
//!
//! An operator carries two call shapes: a host functor evaluated per component
//! by the host iterator, and an optional whole-array kernel descriptor that a
//! device backend knows how to run. Operators without a kernel are host-only;
//! filters using them run on the host regardless of the requested platform.

use crate::core::scalar::Status;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which part of the array a unary operator writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelTarget {
    /// Component values, evaluated only on Active tuples.
    Values,
    /// The status byte of every tuple.
    Status,
}

/// Builtin unary kernels, runnable on the host and on device backends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UnaryKernel {
    /// Set every component to a constant.
    Fill {
        /// Value written to each component
        value: f64,
    },
    /// Clamp components into `[lower, upper]`.
    Clamp {
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },
    /// Absolute value.
    Abs,
    /// Mark tuples with a component outside `[lower, upper]` Passive.
    MaskOutside {
        /// Lowest accepted value
        lower: f64,
        /// Highest accepted value
        upper: f64,
    },
    /// Set every tuple Active.
    ResetStatus,
    /// Flip the status of every tuple.
    NegateStatus,
}

/// Builtin binary kernels. The left side is updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryKernel {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division; a zero divisor marks the tuple Passive.
    Div,
    /// Component-wise minimum
    Min,
    /// Component-wise maximum
    Max,
}

impl BinaryKernel {
    /// All builtin binary kernels.
    pub const ALL: [BinaryKernel; 6] = [
        BinaryKernel::Add,
        BinaryKernel::Sub,
        BinaryKernel::Mul,
        BinaryKernel::Div,
        BinaryKernel::Min,
        BinaryKernel::Max,
    ];

    /// Registry id of this kernel.
    pub fn id(&self) -> &'static str {
        match self {
            BinaryKernel::Add => "add",
            BinaryKernel::Sub => "sub",
            BinaryKernel::Mul => "mul",
            BinaryKernel::Div => "div",
            BinaryKernel::Min => "min",
            BinaryKernel::Max => "max",
        }
    }
}

impl UnaryKernel {
    /// Registry id of this kernel.
    pub fn id(&self) -> &'static str {
        match self {
            UnaryKernel::Fill { .. } => "fill",
            UnaryKernel::Clamp { .. } => "clamp",
            UnaryKernel::Abs => "abs",
            UnaryKernel::MaskOutside { .. } => "mask-outside",
            UnaryKernel::ResetStatus => "reset-status",
            UnaryKernel::NegateStatus => "negate-status",
        }
    }
}

/// Unary element-wise operator.
pub trait UnaryOperator: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Which part of the array this operator writes.
    fn target(&self) -> KernelTarget {
        KernelTarget::Values
    }

    /// Transform one component of an Active tuple.
    ///
    /// Setting `status` to Passive discards the returned value and leaves the
    /// component at its previous contents.
    fn apply(&self, value: f64, _status: &mut Status) -> f64 {
        value
    }

    /// Transform the status of one tuple. Used when `target` is `Status`.
    fn apply_status(&self, status: Status) -> Status {
        status
    }

    /// Whole-array form for device backends, if any.
    fn kernel(&self) -> Option<UnaryKernel> {
        None
    }
}

/// Binary element-wise operator `left' = op(left, right)`.
pub trait BinaryOperator: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Combine one left and one right component of an Active tuple pair.
    ///
    /// Setting `status` to Passive discards the returned value.
    fn apply(&self, left: f64, right: f64, status: &mut Status) -> f64;

    /// Whole-array form for device backends, if any.
    fn kernel(&self) -> Option<BinaryKernel> {
        None
    }
}

impl UnaryOperator for UnaryKernel {
    fn name(&self) -> &str {
        self.id()
    }

    fn target(&self) -> KernelTarget {
        match self {
            UnaryKernel::ResetStatus | UnaryKernel::NegateStatus => KernelTarget::Status,
            _ => KernelTarget::Values,
        }
    }

    #[inline]
    fn apply(&self, value: f64, status: &mut Status) -> f64 {
        match *self {
            UnaryKernel::Fill { value: v } => v,
            UnaryKernel::Clamp { lower, upper } => value.max(lower).min(upper),
            UnaryKernel::Abs => value.abs(),
            UnaryKernel::MaskOutside { lower, upper } => {
                if value < lower || value > upper {
                    *status = Status::Passive;
                }
                value
            }
            UnaryKernel::ResetStatus | UnaryKernel::NegateStatus => value,
        }
    }

    #[inline]
    fn apply_status(&self, status: Status) -> Status {
        match self {
            UnaryKernel::ResetStatus => Status::Active,
            UnaryKernel::NegateStatus => status.negate(),
            _ => status,
        }
    }

    fn kernel(&self) -> Option<UnaryKernel> {
        Some(*self)
    }
}

impl BinaryOperator for BinaryKernel {
    fn name(&self) -> &str {
        self.id()
    }

    #[inline]
    fn apply(&self, left: f64, right: f64, status: &mut Status) -> f64 {
        match self {
            BinaryKernel::Add => left + right,
            BinaryKernel::Sub => left - right,
            BinaryKernel::Mul => left * right,
            BinaryKernel::Div => {
                if right == 0.0 {
                    *status = Status::Passive;
                    left
                } else {
                    left / right
                }
            }
            BinaryKernel::Min => left.min(right),
            BinaryKernel::Max => left.max(right),
        }
    }

    fn kernel(&self) -> Option<BinaryKernel> {
        Some(*self)
    }
}

/// Host-only unary operator from a closure.
pub struct HostUnary<F> {
    name: String,
    f: F,
}

impl<F> HostUnary<F>
where
    F: Fn(f64, &mut Status) -> f64 + Send + Sync,
{
    /// Wrap a closure `f(value, &mut status) -> value'`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> UnaryOperator for HostUnary<F>
where
    F: Fn(f64, &mut Status) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: f64, status: &mut Status) -> f64 {
        (self.f)(value, status)
    }
}

/// Host-only binary operator from a closure.
pub struct HostBinary<F> {
    name: String,
    f: F,
}

impl<F> HostBinary<F>
where
    F: Fn(f64, f64, &mut Status) -> f64 + Send + Sync,
{
    /// Wrap a closure `f(left, right, &mut status) -> left'`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> BinaryOperator for HostBinary<F>
where
    F: Fn(f64, f64, &mut Status) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, left: f64, right: f64, status: &mut Status) -> f64 {
        (self.f)(left, right, status)
    }
}

macro_rules! forward_operator {
    ($($ptr:ty),*) => {
        $(
            impl<T: UnaryOperator + ?Sized> UnaryOperator for $ptr {
                fn name(&self) -> &str { (**self).name() }
                fn target(&self) -> KernelTarget { (**self).target() }
                #[inline]
                fn apply(&self, value: f64, status: &mut Status) -> f64 { (**self).apply(value, status) }
                #[inline]
                fn apply_status(&self, status: Status) -> Status { (**self).apply_status(status) }
                fn kernel(&self) -> Option<UnaryKernel> { (**self).kernel() }
            }

            impl<T: BinaryOperator + ?Sized> BinaryOperator for $ptr {
                fn name(&self) -> &str { (**self).name() }
                #[inline]
                fn apply(&self, left: f64, right: f64, status: &mut Status) -> f64 {
                    (**self).apply(left, right, status)
                }
                fn kernel(&self) -> Option<BinaryKernel> { (**self).kernel() }
            }
        )*
    };
}

forward_operator!(&T, Box<T>, Arc<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div_by_zero_goes_passive() {
        let mut status = Status::Active;
        let value = BinaryKernel::Div.apply(7.0, 0.0, &mut status);
        assert_eq!(status, Status::Passive);
        assert_eq!(value, 7.0);

        let mut status = Status::Active;
        assert_eq!(BinaryKernel::Div.apply(7.0, 2.0, &mut status), 3.5);
        assert!(status.is_active());
    }

    #[test]
    fn test_mask_outside() {
        let op = UnaryKernel::MaskOutside {
            lower: 0.0,
            upper: 1.0,
        };
        let mut status = Status::Active;
        op.apply(0.5, &mut status);
        assert!(status.is_active());
        op.apply(1.5, &mut status);
        assert_eq!(status, Status::Passive);
    }

    #[test]
    fn test_status_kernels() {
        assert_eq!(UnaryKernel::NegateStatus.target(), KernelTarget::Status);
        assert_eq!(
            UnaryKernel::NegateStatus.apply_status(Status::Active),
            Status::Passive
        );
        assert_eq!(
            UnaryKernel::ResetStatus.apply_status(Status::Passive),
            Status::Active
        );
        assert_eq!(UnaryKernel::Abs.target(), KernelTarget::Values);
    }

    #[test]
    fn test_closure_is_host_only() {
        let op = HostUnary::new("square", |v, _| v * v);
        let mut status = Status::Active;
        assert_eq!(op.apply(3.0, &mut status), 9.0);
        assert!(op.kernel().is_none());

        let boxed: Box<dyn UnaryOperator> = Box::new(UnaryKernel::Abs);
        assert_eq!(boxed.kernel(), Some(UnaryKernel::Abs));
        let by_ref: &dyn BinaryOperator = &BinaryKernel::Max;
        assert_eq!(by_ref.apply(1.0, 2.0, &mut status), 2.0);
    }

    #[test]
    fn test_kernel_serde() {
        let json = serde_json::to_string(&UnaryKernel::Clamp {
            lower: 0.0,
            upper: 2.0,
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"clamp\""));
        let back: BinaryKernel = serde_json::from_str("\"div\"").unwrap();
        assert_eq!(back, BinaryKernel::Div);
    }
}
