//! End-to-end scenarios over arrays, filters and the platform registry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use voxflow::filters::range_index;
use voxflow::prelude::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn device() {
    LoopbackBackend::install(Platform::Cuda, 2).unwrap();
}

#[test]
fn test_scalar_add_on_host() {
    init();
    let mut a = DataArray::from_slice(&[1i32, 2, 3, 4], 1).unwrap();
    a.add_assign(10.0).unwrap();
    assert_eq!(a.to_vec::<i32>().unwrap(), vec![11, 12, 13, 14]);
    assert_eq!(a.count_active().unwrap(), 4);
    assert!(a.location().is_host());
}

#[test]
fn test_masked_binary_multiply() {
    init();
    let mut a = DataArray::from_slice(&[1i32, 2, 3], 1).unwrap();
    let mut b = DataArray::from_slice(&[10i32, 0, 5], 1).unwrap();
    b.set_status(1, Status::Passive).unwrap();

    a.mul_assign(&b).unwrap();
    assert_eq!(a.to_vec::<i32>().unwrap(), vec![10, 2, 15]);
    assert_eq!(
        a.status_vec().unwrap(),
        vec![Status::Active, Status::Passive, Status::Active]
    );
    assert_eq!(b.to_vec::<i32>().unwrap(), vec![10, 0, 5]);
}

#[test]
fn test_cross_device_copy() {
    init();
    device();
    let a = DataArray::from_slice(&[1.0f64, 2.0], 1).unwrap();
    let b = a
        .copy_with(&CopyOptions::new().to(Platform::Cuda, 0))
        .unwrap();

    assert_eq!(b.location(), Location::new(Platform::Cuda, 0));
    assert_eq!(b.to_f64_vec().unwrap(), vec![1.0, 2.0]);
    assert_eq!(a.to_f64_vec().unwrap(), vec![1.0, 2.0]);
    assert!(a.location().is_host());
    assert!(!a.shares_values_with(&b));
    assert!(!a.shares_status_with(&b));
}

#[test]
fn test_shared_values_divergent_masks() {
    init();
    let a = DataArray::from_slice(&[1.0f32, 2.0, 3.0], 1).unwrap();
    let mut b = DataArray::from_values(a.values().clone()).unwrap();
    assert!(b.shares_values_with(&a));
    assert!(!b.shares_status_with(&a));

    b.set_status(0, Status::Passive).unwrap();
    assert_eq!(a.status(0).unwrap(), Status::Active);
    assert_eq!(b.status(0).unwrap(), Status::Passive);

    // a filter on b skips its Passive tuple even though a sees it Active
    b.unary_assign(UnaryKernel::Fill { value: 99.0 }).unwrap();
    assert_eq!(a.value(0, 0).unwrap(), 1.0);
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 99.0, 99.0]);

    // element writes ignore the mask and land in the shared buffer
    b.set_value(0, 0, 99.0).unwrap();
    assert_eq!(b.status(0).unwrap(), Status::Passive);
    assert_eq!(a.value(0, 0).unwrap(), 99.0);
    assert_eq!(a.status(0).unwrap(), Status::Active);
    assert_eq!(a.count_active().unwrap(), 3);
    assert_eq!(b.count_active().unwrap(), 2);
}

#[test]
fn test_in_place_filter_writes_through_shared_values() {
    init();
    let a = DataArray::from_slice(&[1.0f32, 2.0, 3.0], 1).unwrap();
    let mut b = DataArray::from_values(a.values().clone()).unwrap();

    // only tuple 0 is written through the shared buffer
    b.assign_status(&[Status::Active, Status::Passive, Status::Passive])
        .unwrap();
    b.unary_assign(UnaryKernel::Fill { value: 99.0 }).unwrap();
    assert!(b.shares_values_with(&a));
    assert_eq!(a.value(0, 0).unwrap(), 99.0);
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![99.0, 2.0, 3.0]);
    assert_eq!(a.count_active().unwrap(), 3);
}

#[test]
fn test_saturating_cast() {
    init();
    let unsigned = Memory::from_slice(&[0u8, 127, 255]);
    let signed = unsigned.cast(ScalarType::I8).unwrap();
    assert_eq!(signed.scalar_type(), ScalarType::I8);
    assert_eq!(signed.to_vec::<i8>().unwrap(), vec![0, 127, 127]);

    let wide = Memory::from_slice(&[300i32, -5]);
    assert_eq!(wide.cast(ScalarType::I8).unwrap().to_vec::<i8>().unwrap(), vec![127, -5]);
    assert_eq!(wide.cast(ScalarType::U8).unwrap().to_vec::<u8>().unwrap(), vec![255, 0]);
}

#[test]
fn test_scoped_switch_restoration() {
    init();
    let registry = PlatformRegistry::new();
    registry
        .register_backend(Arc::new(LoopbackBackend::new(Platform::Cuda, 1)))
        .unwrap();
    assert_eq!(registry.active_platform(), Platform::Cpu);

    let failed = (|| -> ArrayResult<()> {
        let scope = registry.enter(Platform::Cuda, 0)?;
        assert_eq!(scope.location(), Location::new(Platform::Cuda, 0));
        assert_eq!(registry.active_platform(), Platform::Cuda);
        Err(ArrayError::backend(Platform::Cuda, "synthetic failure"))
    })();
    assert!(failed.is_err());
    assert_eq!(registry.active_platform(), Platform::Cpu);

    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        let _scope = registry.enter(Platform::Cuda, 0).unwrap();
        panic!("synthetic failure");
    }));
    assert!(unwound.is_err());
    assert_eq!(registry.active_location(), Location::HOST);
}

#[test]
fn test_filter_follows_input_device() {
    init();
    device();
    let a = DataArray::from_slice(&[-1.0f32, 4.0, -9.0], 1)
        .unwrap()
        .to_device(Platform::Cuda, 1)
        .unwrap();
    let mut b = a.clone();
    b.unary_assign(UnaryKernel::Abs).unwrap();
    assert_eq!(b.location(), Location::new(Platform::Cuda, 1));
    assert_eq!(b.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 9.0]);
}

#[test]
fn test_copy_of_copy() {
    init();
    let a = DataArray::from_slice(&[1u16, 2, 3, 4, 5, 6], 2).unwrap();
    let once = a.deep_copy().unwrap();
    let twice = once.deep_copy().unwrap();
    assert!(twice.same_content(&once).unwrap());
    assert!(!twice.shares_values_with(&once));
    assert!(!twice.shares_status_with(&once));
    assert_eq!(twice.tuples(), 3);
    assert_eq!(twice.components(), 2);
}

#[test]
fn test_status_laws() {
    init();
    let mut a = DataArray::from_slice(&[1u8, 2, 3, 4], 1).unwrap();
    a.assign_status(&[Status::Passive, Status::Active, Status::Passive, Status::Active])
        .unwrap();
    let before = a.status_vec().unwrap();

    a.negate_status().unwrap();
    a.negate_status().unwrap();
    assert_eq!(a.status_vec().unwrap(), before);

    a.reset_status().unwrap();
    let once = a.status_vec().unwrap();
    a.reset_status().unwrap();
    assert_eq!(a.status_vec().unwrap(), once);
    assert_eq!(a.count_active().unwrap(), 4);
}

#[test]
fn test_negative_index() {
    assert_eq!(range_index(-1, 4).unwrap(), 3);
    assert_eq!(range_index(-4, 4).unwrap(), 0);
    assert!(matches!(
        range_index(-5, 4),
        Err(ArrayError::OutOfRange { index: -5, len: 4 })
    ));
}

#[test]
fn test_empty_array() {
    init();
    let mut a = DataArray::from_slice::<f32>(&[], 1).unwrap();
    a.add_assign(1.0).unwrap();
    a.reset_status().unwrap();
    assert!(a.is_empty());
    assert_eq!(a.host_view().unwrap().iter_all().remaining(), 0);
}

#[test]
fn test_pipeline_on_image() {
    init();
    let spec = PipelineSpec::from_toml_str(
        r#"
        [[stage]]
        operator = "mask-outside"
        params = { lower = 10.0, upper = 200.0 }

        [[stage]]
        operator = "add"
        params = { scalar = 100.0 }
        "#,
    )
    .unwrap();
    let pipeline = Pipeline::build(&spec, &OperatorRegistry::with_builtins()).unwrap();

    let grid = RegularGrid::new_2d(2, 2);
    let array = DataArray::from_slice(&[5u8, 50, 150, 250], 1).unwrap();
    let mut image = Image::from_array(grid, array).unwrap();
    pipeline.run(&mut image).unwrap();
    assert_eq!(image.to_vec::<u8>().unwrap(), vec![5, 150, 250, 250]);
    assert_eq!(image.count_active().unwrap(), 2);
}
