//! OpenCL device backend.
//!
//! Every OpenCL device visible on the machine becomes one device of the
//! `opencl` platform, in platform then device enumeration order. Buffers are
//! plain byte buffers; element-wise kernels are generated per (operator,
//! element type) pair and compiled on first use.
//!
//! Kernels evaluate in `double` when the device reports `cl_khr_fp64` and in
//! `float` otherwise. Stores go through the saturating `convert_*_sat_rtz`
//! conversions, matching the host conversion rules.

use crate::backend::{check_pattern, Backend, DeviceHandle, KernelArray, KernelOperand};
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::platform::{Location, Platform};
use crate::core::registry::PlatformRegistry;
use crate::core::scalar::ScalarType;
use crate::filters::operators::{BinaryKernel, UnaryKernel};
use log::{debug, trace};
use ocl::core::{DeviceInfo, DeviceInfoResult};
use ocl::{flags, Buffer as ClBuffer, Context, Device, Kernel, Platform as ClPlatform, Program, Queue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn cl_error(e: ocl::Error) -> ArrayError {
    ArrayError::backend(Platform::OpenCl, e)
}

/// One OpenCL device with its own context and in-order queue.
struct ClDevice {
    device: Device,
    context: Context,
    queue: Queue,
    double: bool,
    programs: Mutex<HashMap<String, Program>>,
}

impl ClDevice {
    fn open(platform: ClPlatform, device: Device) -> Result<Self, ocl::Error> {
        let context = Context::builder().platform(platform).devices(device).build()?;
        let queue = Queue::new(&context, device, None)?;
        let extensions = match device.info(DeviceInfo::Extensions) {
            Ok(DeviceInfoResult::Extensions(s)) => s,
            _ => String::new(),
        };
        Ok(Self {
            device,
            context,
            queue,
            double: extensions.contains("cl_khr_fp64"),
            programs: Mutex::new(HashMap::new()),
        })
    }

    fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }

    fn compute_type(&self) -> &'static str {
        if self.double {
            "double"
        } else {
            "float"
        }
    }

    /// Compile `source` once and return its program.
    fn program(&self, name: &str, source: &str) -> ArrayResult<Program> {
        let mut programs = self.programs.lock();
        if let Some(program) = programs.get(name) {
            return Ok(program.clone());
        }
        debug!("Compiling OpenCL kernel {} for {}", name, self.name());
        let program = Program::builder()
            .src(source)
            .devices(self.device)
            .build(&self.context)
            .map_err(cl_error)?;
        programs.insert(name.to_string(), program.clone());
        Ok(program)
    }
}

/// Device backend for the `opencl` platform.
pub struct OpenClBackend {
    devices: Vec<ClDevice>,
    next_id: AtomicU64,
    buffers: Mutex<HashMap<u64, ClBuffer<u8>>>,
}

impl OpenClBackend {
    /// Open every OpenCL device on the machine.
    ///
    /// Fails when no platform exposes a device.
    pub fn probe() -> ArrayResult<Self> {
        let mut devices = Vec::new();
        for platform in ClPlatform::list() {
            let Ok(found) = Device::list_all(platform) else {
                continue;
            };
            for device in found {
                match ClDevice::open(platform, device) {
                    Ok(device) => devices.push(device),
                    Err(e) => debug!("Skipping OpenCL device: {}", e),
                }
            }
        }
        if devices.is_empty() {
            return Err(ArrayError::backend(Platform::OpenCl, "no OpenCL devices found"));
        }
        for (index, device) in devices.iter().enumerate() {
            debug!(
                "OpenCL device {}: {} ({})",
                index,
                device.name(),
                device.compute_type()
            );
        }
        Ok(Self {
            devices,
            next_id: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
        })
    }

    /// Probe the machine and register the backend in the global registry
    /// unless the platform already has one.
    pub fn install() -> ArrayResult<bool> {
        PlatformRegistry::global().register_if_absent(Arc::new(Self::probe()?))
    }

    fn device(&self, index: usize) -> ArrayResult<&ClDevice> {
        self.devices.get(index).ok_or(ArrayError::InvalidDevice {
            platform: Platform::OpenCl,
            device: index as i32,
        })
    }

    fn buffer(&self, handle: &DeviceHandle) -> ArrayResult<ClBuffer<u8>> {
        self.buffers
            .lock()
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| ArrayError::backend(Platform::OpenCl, format!("unknown buffer {}", handle.id)))
    }

    fn check_len(handle: &DeviceHandle, len: usize) -> ArrayResult<()> {
        if handle.bytes != len {
            return Err(ArrayError::backend(
                Platform::OpenCl,
                format!("buffer of {} bytes accessed with {} bytes", handle.bytes, len),
            ));
        }
        Ok(())
    }

    fn launch(
        &self,
        device: &ClDevice,
        source: &KernelSource,
        target: &KernelArray<'_>,
        operand: Option<&KernelArray<'_>>,
        params: [f64; 2],
    ) -> ArrayResult<()> {
        if target.tuples == 0 {
            return Ok(());
        }
        let program = device.program(&source.name, &source.text)?;
        let values = self.buffer(target.values)?;
        let status = self.buffer(target.status)?;
        let tuples = target.tuples as u64;
        let components = target.components as u32;
        let [p0, p1] = params;
        let (f0, f1) = (p0 as f32, p1 as f32);
        let right = match operand {
            Some(array) => Some((self.buffer(array.values)?, self.buffer(array.status)?)),
            None => None,
        };

        let mut builder = Kernel::builder();
        builder
            .program(&program)
            .name(&source.name)
            .queue(device.queue.clone())
            .global_work_size(target.tuples)
            .arg(&values)
            .arg(&status);
        if let Some((right_values, right_status)) = &right {
            builder.arg(right_values).arg(right_status);
        }
        builder.arg(&tuples).arg(&components);
        if device.double {
            builder.arg(&p0).arg(&p1);
        } else {
            builder.arg(&f0).arg(&f1);
        }
        let kernel = builder.build().map_err(cl_error)?;
        unsafe {
            kernel.enq().map_err(cl_error)?;
        }
        device.queue.finish().map_err(cl_error)?;
        trace!("Ran {} over {} tuples", source.name, target.tuples);
        Ok(())
    }
}

impl Backend for OpenClBackend {
    fn platform(&self) -> Platform {
        Platform::OpenCl
    }

    fn name(&self) -> &str {
        "opencl"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn supports_type(&self, ty: ScalarType) -> bool {
        if ty == ScalarType::F64 && !self.devices.iter().all(|d| d.double) {
            return false;
        }
        cl_type(ty).is_some()
    }

    fn allocate(&self, device: usize, bytes: usize) -> ArrayResult<DeviceHandle> {
        let cl = self.device(device)?;
        // zero-sized buffers are invalid in OpenCL
        let buffer = ClBuffer::<u8>::builder()
            .queue(cl.queue.clone())
            .flags(flags::MEM_READ_WRITE)
            .len(bytes.max(1))
            .fill_val(0u8)
            .build()
            .map_err(|e| {
                debug!("opencl/{}: allocation of {} bytes failed: {}", device, bytes, e);
                ArrayError::OutOfMemory {
                    location: Location::new(Platform::OpenCl, device),
                    bytes,
                }
            })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers.lock().insert(id, buffer);
        trace!("opencl/{}: allocated buffer {} ({} bytes)", device, id, bytes);
        Ok(DeviceHandle { device, id, bytes })
    }

    fn release(&self, handle: &DeviceHandle) {
        if self.buffers.lock().remove(&handle.id).is_some() {
            trace!("opencl/{}: released buffer {}", handle.device, handle.id);
        }
    }

    fn upload(&self, dst: &DeviceHandle, src: &[u8]) -> ArrayResult<()> {
        Self::check_len(dst, src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let buffer = self.buffer(dst)?;
        buffer.write(src).enq().map_err(cl_error)
    }

    fn download(&self, src: &DeviceHandle, dst: &mut [u8]) -> ArrayResult<()> {
        Self::check_len(src, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        let buffer = self.buffer(src)?;
        buffer.read(dst).enq().map_err(cl_error)
    }

    fn copy(&self, src: &DeviceHandle, dst: &DeviceHandle) -> ArrayResult<()> {
        Self::check_len(dst, src.bytes)?;
        if src.bytes == 0 {
            return Ok(());
        }
        let (from, to) = (self.buffer(src)?, self.buffer(dst)?);
        from.copy(&to, None, Some(src.bytes)).enq().map_err(cl_error)?;
        self.device(dst.device)?.queue.finish().map_err(cl_error)
    }

    fn fill(&self, dst: &DeviceHandle, pattern: &[u8]) -> ArrayResult<()> {
        check_pattern(Platform::OpenCl, dst.bytes, pattern)?;
        let staged: Vec<u8> = pattern
            .iter()
            .copied()
            .cycle()
            .take(dst.bytes)
            .collect();
        self.upload(dst, &staged)
    }

    fn unary(&self, kernel: &UnaryKernel, target: &KernelArray<'_>) -> ArrayResult<()> {
        let device = self.device(target.values.device)?;
        let source = unary_source(kernel, target.ty, device.compute_type())?;
        let params = match *kernel {
            UnaryKernel::Fill { value } => [value, 0.0],
            UnaryKernel::Clamp { lower, upper } | UnaryKernel::MaskOutside { lower, upper } => {
                [lower, upper]
            }
            _ => [0.0, 0.0],
        };
        self.launch(device, &source, target, None, params)
    }

    fn binary(
        &self,
        kernel: &BinaryKernel,
        target: &KernelArray<'_>,
        operand: &KernelOperand<'_>,
    ) -> ArrayResult<()> {
        let device = self.device(target.values.device)?;
        match operand {
            KernelOperand::Scalar(value) => {
                let source = binary_source(kernel, target.ty, None, device.compute_type())?;
                self.launch(device, &source, target, None, [*value, 0.0])
            }
            KernelOperand::Array(right) => {
                let source =
                    binary_source(kernel, target.ty, Some(right.ty), device.compute_type())?;
                self.launch(device, &source, target, Some(right), [0.0, 0.0])
            }
        }
    }
}

/// Generated kernel source and its entry point.
struct KernelSource {
    name: String,
    text: String,
}

/// OpenCL C name of a plain scalar element type.
fn cl_type(ty: ScalarType) -> Option<&'static str> {
    Some(match ty {
        ScalarType::Binary | ScalarType::U8 => "uchar",
        ScalarType::Status | ScalarType::I8 => "char",
        ScalarType::I16 => "short",
        ScalarType::U16 => "ushort",
        ScalarType::I32 => "int",
        ScalarType::U32 => "uint",
        ScalarType::I64 => "long",
        ScalarType::U64 => "ulong",
        ScalarType::F32 => "float",
        ScalarType::F64 => "double",
        _ => return None,
    })
}

fn unsupported(ty: ScalarType) -> ArrayError {
    ArrayError::unsupported_type(ty, "by the OpenCL backend")
}

/// Expression storing the computed value `y` into an element of `ty`.
fn store_expr(ty: ScalarType, real: &str) -> ArrayResult<String> {
    let cl = cl_type(ty).ok_or_else(|| unsupported(ty))?;
    Ok(match ty {
        ScalarType::Binary | ScalarType::Status => format!("({})(y != 0 ? 1 : 0)", cl),
        ScalarType::F64 => "y".to_string(),
        ScalarType::F32 if real == "double" => {
            "(float)(isnan(y) ? y : clamp(y, (double)-FLT_MAX, (double)FLT_MAX))".to_string()
        }
        ScalarType::F32 => "y".to_string(),
        _ => format!("convert_{}_sat_rtz(y)", cl),
    })
}

fn prelude(real: &str) -> &'static str {
    if real == "double" {
        "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n"
    } else {
        ""
    }
}

/// Build the kernel running `kernel` over arrays of `ty`.
fn unary_source(kernel: &UnaryKernel, ty: ScalarType, real: &str) -> ArrayResult<KernelSource> {
    let cl = cl_type(ty).ok_or_else(|| unsupported(ty))?;
    let name = format!("{}_{}_{}", kernel.id().replace('-', "_"), cl, real);
    let body = match kernel {
        UnaryKernel::ResetStatus => "status[t] = 0;".to_string(),
        UnaryKernel::NegateStatus => "status[t] = status[t] != 0 ? 0 : 1;".to_string(),
        _ => {
            let expr = match kernel {
                UnaryKernel::Fill { .. } => "y = p0;",
                UnaryKernel::Clamp { .. } => "y = fmin(fmax(x, p0), p1);",
                UnaryKernel::Abs => "y = fabs(x);",
                UnaryKernel::MaskOutside { .. } => "if (x < p0 || x > p1) passive = 1; y = x;",
                _ => "y = x;",
            };
            format!(
                r#"if (status[t] != 0) return;
    for (uint c = 0; c < components; ++c) {{
        size_t i = t * components + c;
        {real} x = ({real})values[i];
        {real} y = x;
        int passive = 0;
        {expr}
        if (passive) {{ status[t] = 1; return; }}
        values[i] = {store};
    }}"#,
                real = real,
                expr = expr,
                store = store_expr(ty, real)?,
            )
        }
    };

    let text = format!(
        r#"{prelude}
__kernel void {name}(
    __global {cl}* values,
    __global char* status,
    const ulong tuples,
    const uint components,
    const {real} p0,
    const {real} p1
) {{
    size_t t = get_global_id(0);
    if (t >= tuples) return;
    {body}
}}
"#,
        prelude = prelude(real),
        name = name,
        cl = cl,
        real = real,
        body = body,
    );
    Ok(KernelSource { name, text })
}

/// Build the kernel combining arrays of `ty` with a scalar or with an array of `right`.
fn binary_source(
    kernel: &BinaryKernel,
    ty: ScalarType,
    right: Option<ScalarType>,
    real: &str,
) -> ArrayResult<KernelSource> {
    let cl = cl_type(ty).ok_or_else(|| unsupported(ty))?;
    let expr = match kernel {
        BinaryKernel::Add => "y = a + b;",
        BinaryKernel::Sub => "y = a - b;",
        BinaryKernel::Mul => "y = a * b;",
        BinaryKernel::Div => "if (b == 0) passive = 1; else y = a / b;",
        BinaryKernel::Min => "y = fmin(a, b);",
        BinaryKernel::Max => "y = fmax(a, b);",
    };
    let (name, right_args, right_check, right_load) = match right {
        Some(rty) => {
            let rcl = cl_type(rty).ok_or_else(|| unsupported(rty))?;
            (
                format!("{}_{}_{}_{}", kernel.id(), cl, rcl, real),
                format!(
                    "\n    __global const {}* right,\n    __global const char* right_status,",
                    rcl
                ),
                "if (right_status[t] != 0) { status[t] = 1; return; }",
                format!("({})right[i]", real),
            )
        }
        None => (
            format!("{}_{}_scalar_{}", kernel.id(), cl, real),
            String::new(),
            "",
            "p0".to_string(),
        ),
    };

    let text = format!(
        r#"{prelude}
__kernel void {name}(
    __global {cl}* values,
    __global char* status,{right_args}
    const ulong tuples,
    const uint components,
    const {real} p0,
    const {real} p1
) {{
    size_t t = get_global_id(0);
    if (t >= tuples) return;
    if (status[t] != 0) return;
    {right_check}
    for (uint c = 0; c < components; ++c) {{
        size_t i = t * components + c;
        {real} a = ({real})values[i];
        {real} b = {right_load};
        {real} y = a;
        int passive = 0;
        {expr}
        if (passive) {{ status[t] = 1; return; }}
        values[i] = {store};
    }}
}}
"#,
        prelude = prelude(real),
        name = name,
        cl = cl,
        right_args = right_args,
        real = real,
        right_check = right_check,
        right_load = right_load,
        expr = expr,
        store = store_expr(ty, real)?,
    );
    Ok(KernelSource { name, text })
}

// OpenCL objects are reference counted and thread safe
unsafe impl Send for OpenClBackend {}
unsafe impl Sync for OpenClBackend {}
