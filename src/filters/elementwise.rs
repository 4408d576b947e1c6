//! Element-wise filters.
//!
//! [`UnaryFilter`] applies a [`UnaryOperator`] to every Active tuple of one
//! array; [`BinaryFilter`] combines an array with a second array of the same
//! shape or with a scalar. Both come in two forms:
//!
//! - in place: the primary input is modifiable and the first output shares
//!   its memory whenever the filter runs on the input's device;
//! - copy: the input is read-only and the output is a new array.
//!
//! On the host the tuples are split into blocks run on the rayon pool. On a
//! device the operator's kernel descriptor is handed to the backend.

use crate::array::iter::{ElementIter, ElementIterMut};
use crate::array::{DataArray, Operand};
use crate::backend::{Backend, KernelArray, KernelOperand};
use crate::core::error::{ArrayError, ArrayResult, FilterError, FilterResult};
use crate::core::platform::{Location, Platform};
use crate::core::registry::registry;
use crate::core::scalar::{ScalarType, Status};
use crate::filters::base::{initialize_default, Filter, FilterCore};
use crate::filters::config::{FilterConfig, HostOptions};
use crate::filters::operators::{BinaryOperator, KernelTarget, UnaryOperator};
use crate::memory::enter;
use log::debug;
use rayon::prelude::*;
use std::sync::Arc;

/// Run a unary operator over one block of tuples.
pub(crate) fn unary_block<Op: UnaryOperator + ?Sized>(op: &Op, it: &mut ElementIterMut<'_>) {
    match op.target() {
        KernelTarget::Status => {
            while !it.is_at_end() {
                let status = op.apply_status(it.status());
                it.set_status(status);
                it.next_tuple();
            }
        }
        KernelTarget::Values => {
            while !it.is_at_end() {
                if !it.status().is_active() {
                    it.next_tuple();
                    continue;
                }
                let mut status = Status::Active;
                let value = op.apply(it.get_component(), &mut status);
                if status.is_active() {
                    it.set_component(value);
                    it.advance();
                } else {
                    it.set_status(Status::Passive);
                    it.next_tuple();
                }
            }
        }
    }
}

/// Right-hand side of a binary block.
pub(crate) enum RightBlock<'a> {
    Scalar(f64),
    Array(ElementIter<'a>),
}

/// Run a binary operator over one block of tuples, updating `left`.
///
/// # Panics
///
/// Panics if an array operand covers a different number of tuples.
pub(crate) fn binary_block<Op: BinaryOperator + ?Sized>(
    op: &Op,
    left: &mut ElementIterMut<'_>,
    right: RightBlock<'_>,
) {
    match right {
        RightBlock::Scalar(value) => {
            while !left.is_at_end() {
                if !left.status().is_active() {
                    left.next_tuple();
                    continue;
                }
                apply_binary(op, left, value);
            }
        }
        RightBlock::Array(mut right) => {
            assert_eq!(
                left.remaining(),
                right.remaining(),
                "operand ranges differ in length"
            );
            while !left.is_at_end() {
                if !left.status().is_active() {
                    left.next_tuple();
                    right.next_tuple();
                    continue;
                }
                if !right.status().is_active() {
                    left.set_status(Status::Passive);
                    left.next_tuple();
                    right.next_tuple();
                    continue;
                }
                if apply_binary(op, left, right.get_component()) {
                    right.advance();
                } else {
                    right.next_tuple();
                }
            }
        }
    }
}

/// Returns false when the operator flagged the tuple Passive and it was skipped.
#[inline]
fn apply_binary<Op: BinaryOperator + ?Sized>(op: &Op, left: &mut ElementIterMut<'_>, right: f64) -> bool {
    let mut status = Status::Active;
    let value = op.apply(left.get_component(), right, &mut status);
    if status.is_active() {
        left.set_component(value);
        left.advance();
        true
    } else {
        left.set_status(Status::Passive);
        left.next_tuple();
        false
    }
}

fn check_element_type(ty: ScalarType, operator: &str) -> ArrayResult<()> {
    if ty.is_scalar() {
        Ok(())
    } else {
        Err(ArrayError::unsupported_type(
            ty,
            format!("by element-wise operator '{}'", operator),
        ))
    }
}

/// Whether `platform` can run an operator with or without a device kernel on `types`.
fn platform_capable(platform: Platform, has_kernel: bool, types: &[ScalarType]) -> bool {
    if platform == Platform::Cpu {
        return true;
    }
    if !has_kernel || types.is_empty() {
        return false;
    }
    match registry().backend(platform) {
        Ok(backend) => types.iter().all(|ty| backend.supports_type(*ty)),
        Err(_) => false,
    }
}

fn kernel_array(array: &DataArray) -> ArrayResult<(&Arc<dyn Backend>, KernelArray<'_>)> {
    let mismatch = || ArrayError::DeviceMismatch {
        expected: array.location(),
        got: Location::HOST,
    };
    let (backend, values) = array.values().device_buffer().ok_or_else(mismatch)?;
    let (_, status) = array.status_memory().device_buffer().ok_or_else(mismatch)?;
    Ok((
        backend,
        KernelArray {
            ty: array.scalar_type(),
            tuples: array.tuples(),
            components: array.components(),
            values,
            status,
        },
    ))
}

fn unary_host<Op: UnaryOperator + ?Sized>(
    op: &Op,
    target: &mut DataArray,
    host: &HostOptions,
) -> ArrayResult<()> {
    let mut view = target.host_view_mut()?;
    let (ty, components, tuples) = (view.scalar_type(), view.components(), view.tuples());
    let tuple_bytes = components * ty.size();
    if tuples == 0 {
        return Ok(());
    }
    if !host.parallel || tuple_bytes == 0 {
        let mut it = view.iter_mut(0..tuples);
        unary_block(op, &mut it);
        return Ok(());
    }

    let block = host.block_len(tuples);
    let (values, status) = view.bytes_mut();
    values
        .par_chunks_mut(block * tuple_bytes)
        .zip(status.par_chunks_mut(block))
        .for_each(|(values, status)| {
            let n = status.len();
            let mut it = ElementIterMut::new(ty, components, values, status, 0..n);
            unary_block(op, &mut it);
        });
    Ok(())
}

fn binary_host<Op: BinaryOperator + ?Sized>(
    op: &Op,
    target: &mut DataArray,
    right: &Right,
    host: &HostOptions,
) -> ArrayResult<()> {
    let mut view = target.host_view_mut()?;
    let (ty, components, tuples) = (view.scalar_type(), view.components(), view.tuples());
    let tuple_bytes = components * ty.size();
    if tuples == 0 {
        return Ok(());
    }
    let sequential = !host.parallel || tuple_bytes == 0;
    let block = if sequential {
        tuples
    } else {
        host.block_len(tuples)
    };
    let (values, status) = view.bytes_mut();

    match right {
        Right::Array(array) => {
            let right_ty = array.scalar_type();
            let right_view = array.host_view()?;
            let (right_values, right_status) = right_view.bytes();
            let run = |((values, status), (right_values, right_status)): (
                (&mut [u8], &mut [u8]),
                (&[u8], &[u8]),
            )| {
                let n = status.len();
                let mut left = ElementIterMut::new(ty, components, values, status, 0..n);
                let right = ElementIter::new(right_ty, components, right_values, right_status, 0..n);
                binary_block(op, &mut left, RightBlock::Array(right));
            };
            if sequential {
                run(((values, status), (right_values, right_status)));
            } else {
                values
                    .par_chunks_mut(block * tuple_bytes)
                    .zip(status.par_chunks_mut(block))
                    .zip(
                        right_values
                            .par_chunks(block * components * right_ty.size())
                            .zip(right_status.par_chunks(block)),
                    )
                    .for_each(run);
            }
        }
        Right::Scalar(value) => {
            let value = *value;
            let run = |(values, status): (&mut [u8], &mut [u8])| {
                let n = status.len();
                let mut left = ElementIterMut::new(ty, components, values, status, 0..n);
                binary_block(op, &mut left, RightBlock::Scalar(value));
            };
            if sequential {
                run((values, status));
            } else {
                values
                    .par_chunks_mut(block * tuple_bytes)
                    .zip(status.par_chunks_mut(block))
                    .for_each(run);
            }
        }
    }
    Ok(())
}

/// Right operand of a binary filter once resident on the execution device.
enum Right {
    Scalar(f64),
    Array(DataArray),
}

/// The array a filter writes: the input itself (in place) or a fresh copy.
fn target_array(core: &FilterCore, in_place: bool) -> FilterResult<DataArray> {
    let input = core.input(0)?;
    let resident = core.device_resident(input)?;
    if in_place || !resident.shares_values_with(input) {
        Ok(resident)
    } else {
        Ok(resident.deep_copy()?)
    }
}

fn no_kernel(operator: &str) -> FilterError {
    FilterError::Config(format!("operator '{}' has no device kernel", operator))
}

/// Filter applying a unary operator to one array.
pub struct UnaryFilter<Op> {
    core: FilterCore,
    op: Op,
    in_place: bool,
}

impl<Op: UnaryOperator> UnaryFilter<Op> {
    /// Create a filter that modifies its input.
    pub fn in_place(op: Op) -> Self {
        Self::build(op, true)
    }

    /// Create a filter that writes a new array.
    pub fn new(op: Op) -> Self {
        Self::build(op, false)
    }

    fn build(op: Op, in_place: bool) -> Self {
        let name = op.name().to_string();
        Self {
            core: FilterCore::new(name, fixed_bounds(FilterConfig::new(), 1)),
            op,
            in_place,
        }
    }

    /// Take platform, device and host options from `config`.
    ///
    /// Input and output bounds are fixed by the filter.
    pub fn with_config(mut self, config: FilterConfig) -> Self {
        *self.core.config_mut() = fixed_bounds(config, 1);
        self
    }

    /// The operator.
    pub fn operator(&self) -> &Op {
        &self.op
    }

    /// Whether this is the in-place form.
    pub fn is_in_place(&self) -> bool {
        self.in_place
    }

    /// Set the single input.
    pub fn set_input(&mut self, array: DataArray) {
        self.core.clear_inputs();
        if self.in_place {
            self.core.add_input_mut(array);
        } else {
            self.core.add_input(Arc::new(array));
        }
    }

    /// Run on `array`, replacing it with the result.
    pub fn process(&mut self, array: &mut DataArray) -> FilterResult<()> {
        self.set_input(array.clone());
        self.run()?;
        *array = self.core.take_output(0)?;
        Ok(())
    }
}

impl<Op: UnaryOperator> Filter for UnaryFilter<Op> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn supports(&self, platform: Platform) -> bool {
        let types: Vec<ScalarType> = self.core.input(0).map(|a| a.scalar_type()).into_iter().collect();
        platform_capable(platform, self.op.kernel().is_some(), &types)
    }

    fn initialize(&mut self) -> FilterResult<()> {
        self.core.check_inputs()?;
        check_element_type(self.core.input(0)?.scalar_type(), self.op.name())?;
        if self.in_place {
            self.core.input_mut(0)?;
        }
        initialize_default(self)
    }

    fn execute(&mut self) -> FilterResult<()> {
        let location = self.core.location()?;
        let mut target = target_array(&self.core, self.in_place)?;

        if location.is_host() {
            debug!("{}: host kernel over {} tuples", self.op.name(), target.tuples());
            unary_host(&self.op, &mut target, &self.core.config().host)?;
        } else if target.len() > 0 {
            let kernel = self.op.kernel().ok_or_else(|| no_kernel(self.op.name()))?;
            debug!("{}: {} kernel over {} tuples", self.op.name(), location, target.tuples());
            let (backend, array) = kernel_array(&target)?;
            let _scope = enter(location)?;
            backend.unary(&kernel, &array)?;
        }

        self.core.push_output(target);
        Ok(())
    }
}

/// Filter combining an array with a second array or a scalar.
pub struct BinaryFilter<Op> {
    core: FilterCore,
    op: Op,
    scalar: Option<f64>,
    in_place: bool,
}

impl<Op: BinaryOperator> BinaryFilter<Op> {
    /// Create a filter that modifies its first input.
    pub fn in_place(op: Op) -> Self {
        Self::build(op, true)
    }

    /// Create a filter that writes a new array.
    pub fn new(op: Op) -> Self {
        Self::build(op, false)
    }

    fn build(op: Op, in_place: bool) -> Self {
        let name = op.name().to_string();
        Self {
            core: FilterCore::new(name, fixed_bounds(FilterConfig::new(), 2)),
            op,
            scalar: None,
            in_place,
        }
    }

    /// Use a scalar right operand instead of a second input.
    pub fn with_scalar(mut self, value: f64) -> Self {
        self.set_scalar(Some(value));
        self
    }

    /// Set or clear the scalar right operand.
    pub fn set_scalar(&mut self, value: Option<f64>) {
        self.scalar = value;
        let config = self.core.config().clone();
        *self.core.config_mut() = fixed_bounds(config, self.arity());
    }

    /// Take platform, device and host options from `config`.
    ///
    /// Input and output bounds are fixed by the filter.
    pub fn with_config(mut self, config: FilterConfig) -> Self {
        let arity = self.arity();
        *self.core.config_mut() = fixed_bounds(config, arity);
        self
    }

    /// The operator.
    pub fn operator(&self) -> &Op {
        &self.op
    }

    /// The scalar right operand, if any.
    pub fn scalar(&self) -> Option<f64> {
        self.scalar
    }

    /// Whether this is the in-place form.
    pub fn is_in_place(&self) -> bool {
        self.in_place
    }

    /// Set the left input and the right operand.
    pub fn set_operands(&mut self, left: DataArray, right: Operand<'_>) {
        self.core.clear_inputs();
        if self.in_place {
            self.core.add_input_mut(left);
        } else {
            self.core.add_input(Arc::new(left));
        }
        match right {
            Operand::Scalar(value) => self.set_scalar(Some(value)),
            Operand::Array(array) => {
                self.set_scalar(None);
                self.core.add_input(Arc::new(array.clone()));
            }
        }
    }

    /// Run on `left` and `right`, replacing `left` with the result.
    pub fn process(&mut self, left: &mut DataArray, right: Operand<'_>) -> FilterResult<()> {
        self.set_operands(left.clone(), right);
        self.run()?;
        *left = self.core.take_output(0)?;
        Ok(())
    }

    fn arity(&self) -> usize {
        if self.scalar.is_some() {
            1
        } else {
            2
        }
    }

    fn operand_types(&self) -> Vec<ScalarType> {
        (0..self.core.num_inputs() as isize)
            .filter_map(|i| self.core.input(i).ok())
            .map(|a| a.scalar_type())
            .collect()
    }
}

impl<Op: BinaryOperator> Filter for BinaryFilter<Op> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn supports(&self, platform: Platform) -> bool {
        platform_capable(platform, self.op.kernel().is_some(), &self.operand_types())
    }

    fn initialize(&mut self) -> FilterResult<()> {
        self.core.check_inputs()?;
        for ty in self.operand_types() {
            check_element_type(ty, self.op.name())?;
        }
        if self.scalar.is_none() {
            let (left, right) = (self.core.input(0)?, self.core.input(1)?);
            if left.tuples() != right.tuples() || left.components() != right.components() {
                return Err(ArrayError::SizeMismatch(format!(
                    "'{}' of {}x{} and {}x{} arrays",
                    self.op.name(),
                    left.tuples(),
                    left.components(),
                    right.tuples(),
                    right.components()
                ))
                .into());
            }
        }
        if self.in_place {
            self.core.input_mut(0)?;
        }
        initialize_default(self)
    }

    fn execute(&mut self) -> FilterResult<()> {
        let location = self.core.location()?;
        let mut target = target_array(&self.core, self.in_place)?;
        let right = match self.scalar {
            Some(value) => Right::Scalar(value),
            None => Right::Array(self.core.device_resident(self.core.input(1)?)?),
        };

        if location.is_host() {
            // both sides of one buffer cannot be locked at once
            let right = match right {
                Right::Array(array)
                    if array.shares_values_with(&target) || array.shares_status_with(&target) =>
                {
                    Right::Array(array.deep_copy()?)
                }
                other => other,
            };
            debug!("{}: host kernel over {} tuples", self.op.name(), target.tuples());
            binary_host(&self.op, &mut target, &right, &self.core.config().host)?;
        } else if target.len() > 0 {
            let kernel = self.op.kernel().ok_or_else(|| no_kernel(self.op.name()))?;
            debug!("{}: {} kernel over {} tuples", self.op.name(), location, target.tuples());
            let (backend, left) = kernel_array(&target)?;
            match &right {
                Right::Scalar(value) => {
                    let _scope = enter(location)?;
                    backend.binary(&kernel, &left, &KernelOperand::Scalar(*value))?;
                }
                Right::Array(array) => {
                    let (_, operand) = kernel_array(array)?;
                    let _scope = enter(location)?;
                    backend.binary(&kernel, &left, &KernelOperand::Array(operand))?;
                }
            }
        }

        self.core.push_output(target);
        Ok(())
    }
}

/// `config` with exactly `inputs` inputs and one output.
fn fixed_bounds(config: FilterConfig, inputs: usize) -> FilterConfig {
    config.with_inputs(inputs, inputs as i64).with_outputs(1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::LoopbackBackend;
    use crate::filters::operators::{BinaryKernel, HostBinary, HostUnary, UnaryKernel};

    fn masked(values: &[f64], passive: &[usize]) -> DataArray {
        let mut array = DataArray::from_f64(ScalarType::F64, values, 1).unwrap();
        for &t in passive {
            array.set_status(t, Status::Passive).unwrap();
        }
        array
    }

    #[test]
    fn test_unary_skips_passive() {
        let mut array = masked(&[-1.0, -2.0, -3.0], &[1]);
        UnaryFilter::in_place(UnaryKernel::Abs).process(&mut array).unwrap();
        assert_eq!(array.to_f64_vec().unwrap(), vec![1.0, -2.0, 3.0]);
        assert_eq!(array.status(1).unwrap(), Status::Passive);
    }

    #[test]
    fn test_in_place_shares_values() {
        let original = DataArray::from_slice(&[1i32, 2, 3], 1).unwrap();
        let mut filter = UnaryFilter::in_place(UnaryKernel::Fill { value: 7.0 });
        filter.set_input(original.clone());
        filter.run().unwrap();
        let output = filter.core().output(0).unwrap();
        assert!(output.shares_values_with(&original));
        assert_eq!(original.to_vec::<i32>().unwrap(), vec![7, 7, 7]);
    }

    #[test]
    fn test_copy_leaves_input() {
        let input = DataArray::from_slice(&[1.0f32, 5.0], 1).unwrap();
        let mut filter = UnaryFilter::new(UnaryKernel::Clamp {
            lower: 0.0,
            upper: 2.0,
        });
        filter.set_input(input.clone());
        filter.run().unwrap();
        let output = filter.core_mut().take_output(0).unwrap();
        assert!(!output.shares_values_with(&input));
        assert_eq!(output.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
        assert_eq!(input.to_vec::<f32>().unwrap(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_operator_can_mask() {
        let mut array = DataArray::from_slice(&[0u8, 50, 200], 1).unwrap();
        UnaryFilter::in_place(UnaryKernel::MaskOutside {
            lower: 10.0,
            upper: 100.0,
        })
        .process(&mut array)
        .unwrap();
        assert_eq!(
            array.status_vec().unwrap(),
            vec![Status::Passive, Status::Active, Status::Passive]
        );
        assert_eq!(array.to_vec::<u8>().unwrap(), vec![0, 50, 200]);
    }

    #[test]
    fn test_status_operators() {
        let mut array = masked(&[1.0, 2.0, 3.0], &[0, 2]);
        UnaryFilter::in_place(UnaryKernel::NegateStatus)
            .process(&mut array)
            .unwrap();
        assert_eq!(
            array.status_vec().unwrap(),
            vec![Status::Active, Status::Passive, Status::Active]
        );
        UnaryFilter::in_place(UnaryKernel::ResetStatus)
            .process(&mut array)
            .unwrap();
        assert_eq!(array.count_active().unwrap(), 3);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let data: Vec<f64> = (0..10_000).map(|i| i as f64 - 5000.0).collect();
        let passive: Vec<usize> = (0..10_000).step_by(7).collect();
        let mut parallel = masked(&data, &passive);
        let mut sequential = parallel.deep_copy().unwrap();
        let op = UnaryKernel::Clamp {
            lower: -100.0,
            upper: 100.0,
        };
        UnaryFilter::in_place(op)
            .with_config(FilterConfig::new().with_min_block(16))
            .process(&mut parallel)
            .unwrap();
        UnaryFilter::in_place(op)
            .with_config(FilterConfig::new().with_parallel(false))
            .process(&mut sequential)
            .unwrap();
        assert!(parallel.same_content(&sequential).unwrap());
    }

    #[test]
    fn test_rejects_composite_types() {
        let array = DataArray::new(2, 1, ScalarType::C64, Platform::Cpu, 0).unwrap();
        let mut filter = UnaryFilter::new(UnaryKernel::Abs);
        filter.set_input(array);
        assert!(matches!(
            filter.run(),
            Err(FilterError::Array(ArrayError::UnsupportedType {
                ty: ScalarType::C64,
                ..
            }))
        ));
    }

    #[test]
    fn test_in_place_requires_modifiable_input() {
        let mut filter = UnaryFilter::in_place(UnaryKernel::Abs);
        filter
            .core_mut()
            .add_input(Arc::new(DataArray::from_slice(&[1i8], 1).unwrap()));
        assert!(matches!(filter.run(), Err(FilterError::Config(_))));
    }

    #[test]
    fn test_empty_array() {
        let mut array = DataArray::default();
        UnaryFilter::in_place(UnaryKernel::Abs).process(&mut array).unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn test_binary_scalar() {
        let mut array = DataArray::from_slice(&[1i32, 2, 3, 4], 1).unwrap();
        BinaryFilter::in_place(BinaryKernel::Add)
            .process(&mut array, Operand::Scalar(10.0))
            .unwrap();
        assert_eq!(array.to_vec::<i32>().unwrap(), vec![11, 12, 13, 14]);
        assert_eq!(array.count_active().unwrap(), 4);
    }

    #[test]
    fn test_binary_status_propagation() {
        let mut left = masked(&[1.0, 2.0, 3.0, 4.0], &[3]);
        let right = masked(&[10.0, 0.0, 5.0, 1.0], &[1]);
        BinaryFilter::in_place(BinaryKernel::Mul)
            .process(&mut left, Operand::Array(&right))
            .unwrap();
        assert_eq!(left.to_f64_vec().unwrap(), vec![10.0, 2.0, 15.0, 4.0]);
        assert_eq!(
            left.status_vec().unwrap(),
            vec![Status::Active, Status::Passive, Status::Active, Status::Passive]
        );
    }

    #[test]
    fn test_divide_by_zero_is_local() {
        let mut left = DataArray::from_slice(&[6.0f32, 4.0, 9.0], 1).unwrap();
        let right = DataArray::from_slice(&[2.0f32, 0.0, 3.0], 1).unwrap();
        BinaryFilter::in_place(BinaryKernel::Div)
            .process(&mut left, Operand::Array(&right))
            .unwrap();
        assert_eq!(left.to_vec::<f32>().unwrap(), vec![3.0, 4.0, 3.0]);
        assert_eq!(left.status(1).unwrap(), Status::Passive);
    }

    #[test]
    fn test_binary_size_mismatch() {
        let mut left = DataArray::from_slice(&[1.0f64, 2.0], 1).unwrap();
        let right = DataArray::from_slice(&[1.0f64, 2.0, 3.0], 1).unwrap();
        let result = BinaryFilter::in_place(BinaryKernel::Add).process(&mut left, Operand::Array(&right));
        assert!(matches!(
            result,
            Err(FilterError::Array(ArrayError::SizeMismatch(_)))
        ));
    }

    #[test]
    fn test_binary_aliased_operands() {
        let mut array = DataArray::from_slice(&[1u16, 2, 3], 1).unwrap();
        let alias = array.clone();
        BinaryFilter::in_place(BinaryKernel::Add)
            .process(&mut array, Operand::Array(&alias))
            .unwrap();
        assert_eq!(array.to_vec::<u16>().unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn test_binary_mixed_types_parallel() {
        let left_data: Vec<i32> = (0..5000).collect();
        let right_data: Vec<f64> = (0..5000).map(|i| i as f64 * 0.5).collect();
        let mut left = DataArray::from_slice(&left_data, 1).unwrap();
        let right = DataArray::from_slice(&right_data, 1).unwrap();
        BinaryFilter::in_place(BinaryKernel::Sub)
            .with_config(FilterConfig::new().with_min_block(64))
            .process(&mut left, Operand::Array(&right))
            .unwrap();
        let out = left.to_vec::<i32>().unwrap();
        assert_eq!(out[0], 0);
        assert_eq!(out[4000], 2000);
    }

    #[test]
    fn test_closure_operators() {
        let mut array = DataArray::from_slice(&[1.0f64, 2.0, 3.0], 1).unwrap();
        let square = HostUnary::new("square", |v: f64, _: &mut Status| v * v);
        UnaryFilter::in_place(square).process(&mut array).unwrap();
        let hypot = HostBinary::new("hypot", |l: f64, r: f64, _: &mut Status| (l + r * r).sqrt());
        BinaryFilter::in_place(hypot)
            .process(&mut array, Operand::Scalar(0.0))
            .unwrap();
        assert_eq!(array.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_device_kernels() {
        LoopbackBackend::install(Platform::Cuda, 2).unwrap();
        let host = masked(&[1.0, -2.0, 3.0], &[2]);
        let mut array = host.to_device(Platform::Cuda, 0).unwrap();
        UnaryFilter::in_place(UnaryKernel::Abs).process(&mut array).unwrap();
        assert_eq!(array.location(), Location::new(Platform::Cuda, 0));
        BinaryFilter::in_place(BinaryKernel::Mul)
            .process(&mut array, Operand::Scalar(2.0))
            .unwrap();
        let other = DataArray::from_f64(ScalarType::F64, &[1.0, 1.0, 1.0], 1).unwrap();
        BinaryFilter::in_place(BinaryKernel::Add)
            .process(&mut array, Operand::Array(&other))
            .unwrap();
        assert_eq!(array.location().platform, Platform::Cuda);
        assert_eq!(array.to_f64_vec().unwrap(), vec![3.0, 5.0, 3.0]);
        assert!(array.status(2).is_err());
        assert_eq!(array.status_vec().unwrap()[2], Status::Passive);
    }

    #[test]
    fn test_in_place_on_other_device_leaves_input() {
        LoopbackBackend::install(Platform::Cuda, 2).unwrap();
        let input = DataArray::from_slice(&[1.0f32, 2.0], 1).unwrap();
        let mut filter = UnaryFilter::in_place(UnaryKernel::Fill { value: 0.0 })
            .with_config(FilterConfig::new().with_platform(Platform::Cuda).with_device(1));
        filter.set_input(input.clone());
        filter.run().unwrap();
        let output = filter.core_mut().take_output(0).unwrap();
        assert_eq!(output.location(), Location::new(Platform::Cuda, 1));
        assert_eq!(output.to_vec::<f32>().unwrap(), vec![0.0, 0.0]);
        assert_eq!(input.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_host_only_operator_falls_back() {
        LoopbackBackend::install(Platform::Cuda, 2).unwrap();
        let negate = HostUnary::new("negate", |v: f64, _: &mut Status| -v);
        let mut filter = UnaryFilter::new(negate)
            .with_config(FilterConfig::new().with_platform(Platform::Cuda).with_device(0));
        filter.set_input(DataArray::from_slice(&[4i16], 1).unwrap());
        filter.run().unwrap();
        assert!(filter.core().location().unwrap().is_host());
        assert_eq!(filter.core().output(0).unwrap().to_vec::<i16>().unwrap(), vec![-4]);
    }
}
