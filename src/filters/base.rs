//! Filter base: input/output slots, device selection and the run protocol.
//!
//! A filter runs in three steps on the calling thread:
//! 1. `initialize` checks the input bounds and selects the execution device
//! 2. `execute` does the work and publishes outputs
//! 3. `finalize` post-processes, a no-op by default
//!
//! After `initialize` succeeds every precondition of `execute` holds. A filter
//! that cannot run on the requested platform falls back to the host.

use crate::array::DataArray;
use crate::core::error::{ArrayError, ArrayResult, FilterError, FilterId, FilterResult};
use crate::core::platform::{DeviceId, Location, Platform, ACTIVE_DEVICE};
use crate::core::registry::registry;
use crate::filters::config::{within, FilterConfig};
use log::debug;
use std::sync::Arc;

/// Normalise an index into `[0, n)`. Negative indices count from the end.
pub fn range_index(index: isize, n: usize) -> ArrayResult<usize> {
    let resolved = if index < 0 {
        n as isize + index
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= n {
        return Err(ArrayError::OutOfRange { index, len: n });
    }
    Ok(resolved as usize)
}

/// One input slot.
#[derive(Debug, Clone)]
pub enum FilterInput {
    /// Read-only input shared with the caller.
    Shared(Arc<DataArray>),
    /// Input the filter may modify in place.
    Owned(DataArray),
}

impl FilterInput {
    /// The array in this slot.
    pub fn array(&self) -> &DataArray {
        match self {
            FilterInput::Shared(array) => array,
            FilterInput::Owned(array) => array,
        }
    }
}

/// State common to every filter.
#[derive(Debug)]
pub struct FilterCore {
    id: FilterId,
    name: String,
    config: FilterConfig,
    location: Option<Location>,
    inputs: Vec<FilterInput>,
    outputs: Vec<DataArray>,
}

impl FilterCore {
    /// Create the state of a filter called `name`.
    pub fn new(name: impl Into<String>, config: FilterConfig) -> Self {
        Self {
            id: FilterId::new(),
            name: name.into(),
            config,
            location: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Get the filter instance ID.
    pub fn id(&self) -> FilterId {
        self.id
    }

    /// Get the filter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Get the configuration for editing. Takes effect at the next run.
    pub fn config_mut(&mut self) -> &mut FilterConfig {
        self.location = None;
        &mut self.config
    }

    /// Device chosen by the last `initialize`.
    pub fn location(&self) -> FilterResult<Location> {
        self.location.ok_or(FilterError::NotInitialized(self.id))
    }

    /// Append a read-only input.
    pub fn add_input(&mut self, input: Arc<DataArray>) {
        self.inputs.push(FilterInput::Shared(input));
    }

    /// Append an input the filter may modify.
    pub fn add_input_mut(&mut self, input: DataArray) {
        self.inputs.push(FilterInput::Owned(input));
    }

    /// Replace input `index`.
    pub fn set_input(&mut self, index: isize, input: FilterInput) -> FilterResult<()> {
        let i = self.input_index(index)?;
        self.inputs[i] = input;
        Ok(())
    }

    /// Remove every input.
    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    /// Number of inputs.
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Get input `index`; negative indices count from the end.
    pub fn input(&self, index: isize) -> FilterResult<&DataArray> {
        let i = self.input_index(index)?;
        Ok(self.inputs[i].array())
    }

    /// Get modifiable input `index`.
    pub fn input_mut(&mut self, index: isize) -> FilterResult<&mut DataArray> {
        let i = self.input_index(index)?;
        match &mut self.inputs[i] {
            FilterInput::Owned(array) => Ok(array),
            FilterInput::Shared(_) => Err(FilterError::Config(format!(
                "input {} of filter {} is read-only",
                index, self.id
            ))),
        }
    }

    /// Published outputs.
    pub fn outputs(&self) -> &[DataArray] {
        &self.outputs
    }

    /// Get output `index`; negative indices count from the end.
    pub fn output(&self, index: isize) -> FilterResult<&DataArray> {
        let i = range_index(index, self.outputs.len())?;
        Ok(&self.outputs[i])
    }

    /// Publish an output.
    pub fn push_output(&mut self, output: DataArray) {
        self.outputs.push(output);
    }

    /// Take output `index`, leaving an empty array in its slot.
    pub fn take_output(&mut self, index: isize) -> FilterResult<DataArray> {
        let i = range_index(index, self.outputs.len())?;
        Ok(std::mem::take(&mut self.outputs[i]))
    }

    /// Take every output.
    pub fn take_outputs(&mut self) -> Vec<DataArray> {
        std::mem::take(&mut self.outputs)
    }

    /// Drop every output.
    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
    }

    /// Check the number of inputs against the configured bounds.
    pub fn check_inputs(&self) -> FilterResult<()> {
        let (min, max) = (self.config.min_inputs, self.config.max_inputs);
        if !within(self.inputs.len(), min, max) {
            return Err(FilterError::InputCount {
                filter_id: self.id,
                min,
                max,
                got: self.inputs.len(),
            });
        }
        Ok(())
    }

    /// Check the number of outputs against the configured bounds.
    pub fn check_outputs(&self) -> FilterResult<()> {
        let (min, max) = (self.config.min_outputs, self.config.max_outputs);
        if !within(self.outputs.len(), min, max) {
            return Err(FilterError::OutputCount {
                filter_id: self.id,
                min,
                max,
                got: self.outputs.len(),
            });
        }
        Ok(())
    }

    /// Choose the execution (platform, device).
    ///
    /// - default platform, no inputs: the host
    /// - default platform with inputs: where the first input lives, or the
    ///   active device of that platform when its device is gone
    /// - explicit platform: that platform, device `-1` meaning the active one
    ///
    /// A platform the filter does not support or that is not available falls
    /// back to the host.
    pub fn select_device(&mut self, supports: impl Fn(Platform) -> bool) -> FilterResult<Location> {
        let registry = registry();
        let (platform, device, from_input) = match self.config.platform {
            Platform::Default => match self.inputs.first() {
                None => (Platform::Cpu, 0, false),
                Some(input) => {
                    let location = input.array().location();
                    (location.platform, location.device as DeviceId, true)
                }
            },
            platform => (platform, self.config.device, false),
        };

        let location = if platform == Platform::Cpu {
            Location::HOST
        } else if !supports(platform) || !registry.is_available(platform) {
            debug!(
                "Filter {} '{}' cannot run on {}, using the host",
                self.id, self.name, platform
            );
            Location::HOST
        } else {
            match registry.resolve(platform, device) {
                Ok(location) => location,
                Err(ArrayError::InvalidDevice { .. }) if from_input => {
                    registry.resolve(platform, ACTIVE_DEVICE)?
                }
                Err(e) => return Err(e.into()),
            }
        };

        debug!("Filter {} '{}' runs on {}", self.id, self.name, location);
        self.location = Some(location);
        Ok(location)
    }

    /// View `array` on the filter's device.
    ///
    /// Returns a shallow handle when the array already lives there, otherwise
    /// a migrated copy. The original array is never modified.
    pub fn device_resident(&self, array: &DataArray) -> FilterResult<DataArray> {
        let location = self.location()?;
        Ok(array.to_location(location)?)
    }

    fn input_index(&self, index: isize) -> FilterResult<usize> {
        range_index(index, self.inputs.len()).map_err(|_| FilterError::MissingInput {
            filter_id: self.id,
            index,
        })
    }
}

/// A pipeline stage.
pub trait Filter {
    /// Shared filter state.
    fn core(&self) -> &FilterCore;

    /// Shared filter state for editing.
    fn core_mut(&mut self) -> &mut FilterCore;

    /// Whether the filter can execute on `platform`. The host is always
    /// supported regardless of this answer.
    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Cpu
    }

    /// Check inputs and select the execution device.
    fn initialize(&mut self) -> FilterResult<()> {
        initialize_default(self)
    }

    /// Do the work and publish outputs.
    fn execute(&mut self) -> FilterResult<()>;

    /// Post-process after `execute`.
    fn finalize(&mut self) -> FilterResult<()> {
        Ok(())
    }

    /// Initialize, execute, check outputs and finalize.
    fn run(&mut self) -> FilterResult<()> {
        self.core_mut().clear_outputs();
        self.initialize()?;
        self.execute()?;
        self.core().check_outputs()?;
        self.finalize()
    }
}

/// The default `initialize`: bounds check, then device selection.
pub fn initialize_default<F: Filter + ?Sized>(filter: &mut F) -> FilterResult<()> {
    filter.core().check_inputs()?;
    let supported: Vec<Platform> = Platform::REALIZED
        .into_iter()
        .filter(|p| filter.supports(*p))
        .collect();
    filter
        .core_mut()
        .select_device(|platform| supported.contains(&platform))?;
    Ok(())
}
