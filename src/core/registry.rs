//! Platform registry and the process-wide active (platform, device).
//!
//! The host CPU is always present. Device platforms become available when a
//! [`Backend`] is registered for them. Kernels call backend APIs without
//! passing explicit device handles, so the active pair is implicit context
//! that may only change through an [`ActiveScope`].
//!
//! ```ignore
//! let registry = PlatformRegistry::global();
//! let _scope = registry.enter(Platform::Cuda, 0)?;
//! // backend calls here target cuda/0
//! // the previous pair is restored when `_scope` drops, also on unwind
//! ```

use crate::backend::Backend;
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::platform::{DeviceId, Location, Platform, ACTIVE_DEVICE};
use indexmap::IndexMap;
use log::{debug, warn};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
struct ActiveState {
    platform: Platform,
    devices: IndexMap<Platform, usize>,
}

impl Default for ActiveState {
    fn default() -> Self {
        Self {
            platform: Platform::Cpu,
            devices: IndexMap::new(),
        }
    }
}

/// Registry of compute backends and the active (platform, device).
pub struct PlatformRegistry {
    backends: RwLock<IndexMap<Platform, Arc<dyn Backend>>>,
    active: Mutex<ActiveState>,
    /// Held by every live scope; same-thread scopes nest, other threads wait.
    serial: ReentrantMutex<()>,
}

impl PlatformRegistry {
    /// Create a registry with only the host platform.
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(IndexMap::new()),
            active: Mutex::new(ActiveState::default()),
            serial: ReentrantMutex::new(()),
        }
    }

    /// Get the process-wide registry.
    pub fn global() -> &'static PlatformRegistry {
        static REGISTRY: OnceLock<PlatformRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PlatformRegistry::new)
    }

    /// Register a device backend, replacing any backend of the same platform.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> ArrayResult<()> {
        let platform = backend.platform();
        if !platform.is_device() {
            return Err(ArrayError::UnsupportedPlatform(platform));
        }
        let mut backends = self.backends.write();
        if backends.contains_key(&platform) {
            warn!("Replacing registered {} backend with '{}'", platform, backend.name());
        } else {
            debug!(
                "Registered {} backend '{}' with {} device(s)",
                platform,
                backend.name(),
                backend.device_count()
            );
        }
        backends.insert(platform, backend);
        Ok(())
    }

    /// Register a backend unless its platform already has one.
    ///
    /// Returns whether the backend was registered.
    pub fn register_if_absent(&self, backend: Arc<dyn Backend>) -> ArrayResult<bool> {
        {
            let backends = self.backends.read();
            if backends.contains_key(&backend.platform()) {
                return Ok(false);
            }
        }
        self.register_backend(backend)?;
        Ok(true)
    }

    /// Remove the backend of a device platform.
    ///
    /// Memory already allocated keeps its own reference to the backend.
    pub fn unregister_backend(&self, platform: Platform) -> Option<Arc<dyn Backend>> {
        self.backends.write().shift_remove(&platform)
    }

    /// Get the backend of a device platform.
    pub fn backend(&self, platform: Platform) -> ArrayResult<Arc<dyn Backend>> {
        self.backends
            .read()
            .get(&platform)
            .cloned()
            .ok_or(ArrayError::UnsupportedPlatform(platform))
    }

    /// Check if a platform is present. The host is always present.
    pub fn is_available(&self, platform: Platform) -> bool {
        match platform {
            Platform::Default => true,
            Platform::Cpu => true,
            device => self.device_count(device) > 0,
        }
    }

    /// List the present platforms, host first.
    pub fn available(&self) -> Vec<Platform> {
        Platform::REALIZED
            .into_iter()
            .filter(|p| self.is_available(*p))
            .collect()
    }

    /// Number of devices of a platform.
    pub fn device_count(&self, platform: Platform) -> usize {
        match platform {
            Platform::Default => self.device_count(self.active_platform()),
            Platform::Cpu => 1,
            device => self
                .backends
                .read()
                .get(&device)
                .map(|b| b.device_count())
                .unwrap_or(0),
        }
    }

    /// Get the currently selected platform.
    pub fn active_platform(&self) -> Platform {
        self.active.lock().platform
    }

    /// Get the current device index of a platform.
    pub fn active_device(&self, platform: Platform) -> usize {
        let state = self.active.lock();
        let platform = match platform {
            Platform::Default => state.platform,
            p => p,
        };
        state.devices.get(&platform).copied().unwrap_or(0)
    }

    /// Get the active (platform, device) pair.
    pub fn active_location(&self) -> Location {
        let platform = self.active_platform();
        Location::new(platform, self.active_device(platform))
    }

    /// Resolve a possibly defaulted (platform, device) request to a present location.
    pub fn resolve(&self, platform: Platform, device: DeviceId) -> ArrayResult<Location> {
        let platform = match platform {
            Platform::Default => self.active_platform(),
            p => p,
        };
        if !self.is_available(platform) {
            return Err(ArrayError::UnsupportedPlatform(platform));
        }
        let count = self.device_count(platform);
        let device = match device {
            ACTIVE_DEVICE => self.active_device(platform),
            d if d >= 0 && (d as usize) < count => d as usize,
            d => return Err(ArrayError::InvalidDevice { platform, device: d }),
        };
        Ok(Location::new(platform, device))
    }

    /// Make (platform, device) active until the returned scope drops.
    pub fn enter(&self, platform: Platform, device: DeviceId) -> ArrayResult<ActiveScope<'_>> {
        let serial = self.serial.lock();
        let target = self.resolve(platform, device)?;

        let mut state = self.active.lock();
        let previous = Location::new(
            state.platform,
            state.devices.get(&state.platform).copied().unwrap_or(0),
        );
        let previous_target_device = state.devices.get(&target.platform).copied();
        state.platform = target.platform;
        state.devices.insert(target.platform, target.device);
        drop(state);

        if previous != target {
            debug!("Active device switched {} -> {}", previous, target);
        }
        Ok(ActiveScope {
            registry: self,
            previous,
            target,
            previous_target_device,
            _serial: serial,
        })
    }

    /// Run a closure with (platform, device) active.
    pub fn with_active<R>(
        &self,
        platform: Platform,
        device: DeviceId,
        f: impl FnOnce() -> R,
    ) -> ArrayResult<R> {
        let _scope = self.enter(platform, device)?;
        Ok(f())
    }

    fn restore(&self, scope: &ActiveScope<'_>) {
        let mut state = self.active.lock();
        match scope.previous_target_device {
            Some(device) => {
                state.devices.insert(scope.target.platform, device);
            }
            None => {
                state.devices.shift_remove(&scope.target.platform);
            }
        }
        state.platform = scope.previous.platform;
        state
            .devices
            .insert(scope.previous.platform, scope.previous.device);
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped acquisition of the active (platform, device).
///
/// Restores the previous pair on drop, including during unwinding. Scopes
/// nest on one thread; a scope on another thread waits until this one ends.
#[must_use = "the previous device is restored as soon as the scope drops"]
pub struct ActiveScope<'a> {
    registry: &'a PlatformRegistry,
    previous: Location,
    target: Location,
    previous_target_device: Option<usize>,
    _serial: ReentrantMutexGuard<'a, ()>,
}

impl ActiveScope<'_> {
    /// The pair made active by this scope.
    pub fn location(&self) -> Location {
        self.target
    }

    /// The pair that will be restored.
    pub fn previous(&self) -> Location {
        self.previous
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.registry.restore(self);
        if self.previous != self.target {
            debug!("Active device restored {} -> {}", self.target, self.previous);
        }
    }
}

/// Get the process-wide registry.
pub fn registry() -> &'static PlatformRegistry {
    PlatformRegistry::global()
}
