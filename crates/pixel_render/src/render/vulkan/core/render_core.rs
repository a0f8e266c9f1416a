//! Process-wide GPU context
//!
//! [`RenderCore`] owns the instance, the logical device, the graphics queue and
//! the memory allocator. It is constructed explicitly by the application and
//! shared with every GPU resource through an `Arc`; there is exactly one per
//! process in practice, but nothing global enforces it.

use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use super::allocator::GpuAllocator;
use super::context::{find_memory_type_in, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult};
use crate::config::RendererConfig;
use crate::foundation::{report, Severity};

/// Runs a teardown closure at most once, even under concurrent callers
///
/// The first caller to take the lock while the guarded object is live runs the
/// teardown. A caller that finds the lock held, or the object already torn
/// down, returns immediately.
#[derive(Debug)]
pub struct TeardownGuard {
    lock: Mutex<()>,
    live: AtomicBool,
}

impl TeardownGuard {
    /// Guard for a freshly initialized object
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            live: AtomicBool::new(true),
        }
    }

    /// Whether teardown has not happened yet
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Run `teardown` if this call wins; returns whether it ran
    pub fn run(&self, teardown: impl FnOnce()) -> bool {
        let _held = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return false,
            // A panicking teardown leaves the object in an unknown state; do not retry
            Err(TryLockError::Poisoned(_)) => return false,
        };

        if !self.live.load(Ordering::Acquire) {
            return false;
        }
        teardown();
        self.live.store(false, Ordering::Release);
        true
    }
}

impl Default for TeardownGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance, device, queue and allocator shared by every GPU resource
pub struct RenderCore {
    instance: VulkanInstance,
    physical_device: PhysicalDeviceInfo,
    device: Device,
    graphics_queue: vk::Queue,
    surface_loader: Option<SurfaceLoader>,
    swapchain_loader: Option<SwapchainLoader>,
    allocator: GpuAllocator,
    teardown: TeardownGuard,
}

impl RenderCore {
    /// Initialize the GPU context
    ///
    /// `instance_extensions` come from the window system; pass an empty slice
    /// for a headless core that can only render offscreen.
    pub fn new(config: &RendererConfig, instance_extensions: &[String]) -> VulkanResult<Arc<Self>> {
        let windowed = !instance_extensions.is_empty();
        let instance = VulkanInstance::new(
            &config.application_name,
            instance_extensions,
            config.validation_enabled(),
        )?;

        match Self::create_device(&instance.instance, windowed) {
            Ok((physical_device, device)) => {
                let allocator = match GpuAllocator::new(&instance.instance, &device, physical_device.device) {
                    Ok(allocator) => allocator,
                    Err(e) => {
                        unsafe {
                            device.destroy_device(None);
                            instance.destroy();
                        }
                        return Err(e);
                    }
                };

                let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
                let (surface_loader, swapchain_loader) = if windowed {
                    (
                        Some(SurfaceLoader::new(&instance.entry, &instance.instance)),
                        Some(SwapchainLoader::new(&instance.instance, &device)),
                    )
                } else {
                    (None, None)
                };

                log::info!(
                    "Render core ready on {} ({})",
                    physical_device.name(),
                    if windowed { "windowed" } else { "headless" }
                );

                Ok(Arc::new(Self {
                    instance,
                    physical_device,
                    device,
                    graphics_queue,
                    surface_loader,
                    swapchain_loader,
                    allocator,
                    teardown: TeardownGuard::new(),
                }))
            }
            Err(e) => {
                unsafe { instance.destroy() };
                Err(e)
            }
        }
    }

    fn create_device(instance: &Instance, windowed: bool) -> VulkanResult<(PhysicalDeviceInfo, Device)> {
        let physical_device = PhysicalDeviceInfo::select_suitable_device(instance, windowed)?;

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device.graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let extensions = if windowed {
            vec![SwapchainLoader::name().as_ptr()]
        } else {
            vec![]
        };
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance.create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok((physical_device, device))
    }

    /// Whether [`RenderCore::destroy`] has not run yet
    pub fn is_init(&self) -> bool {
        self.teardown.is_live()
    }

    /// Tear the context down; returns whether this call released it
    ///
    /// Waits for all submitted GPU work, then releases the allocator, the
    /// device and the instance. Concurrent or repeated calls are no-ops. While
    /// other handles to the core are alive the call is refused with a warning
    /// and teardown happens when the last handle is dropped.
    pub fn destroy(self: &Arc<Self>) -> bool {
        let holders = Arc::strong_count(self);
        if holders > 1 && self.is_init() {
            report(
                Severity::Warning,
                format_args!("render core destroy refused: {} other handles still alive", holders - 1),
            );
            return false;
        }
        self.teardown()
    }

    fn teardown(&self) -> bool {
        let ran = self.teardown.run(|| unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {:?}", e);
            }
            self.allocator.release();
            self.device.destroy_device(None);
            self.instance.destroy();
        });

        if ran {
            log::info!("Render core destroyed");
        }
        ran
    }

    /// Vulkan entry point
    pub fn entry(&self) -> &ash::Entry {
        &self.instance.entry
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Logical device
    ///
    /// Wrappers built from a clone of this handle do not keep the core alive;
    /// drop them before [`RenderCore::destroy`].
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Queue used for graphics, transfers and presentation
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Family index of [`RenderCore::graphics_queue`]
    pub fn graphics_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Surface extension loader; `None` on a headless core
    pub fn surface_loader(&self) -> Option<&SurfaceLoader> {
        self.surface_loader.as_ref()
    }

    /// Swapchain extension loader; `None` on a headless core
    pub fn swapchain_loader(&self) -> Option<&SwapchainLoader> {
        self.swapchain_loader.as_ref()
    }

    /// Device memory allocator
    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// Memory type index for `type_filter` with at least `properties`
    ///
    /// Allocations made through [`GpuAllocator`] let VMA choose the memory
    /// type; this lookup serves memory bound by hand, outside the allocator.
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type_in(&self.physical_device.memory_properties, type_filter, properties)
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for RenderCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn teardown_runs_once_in_sequence() {
        let guard = TeardownGuard::new();
        let runs = AtomicUsize::new(0);

        assert!(guard.run(|| { runs.fetch_add(1, Ordering::SeqCst); }));
        assert!(!guard.run(|| { runs.fetch_add(1, Ordering::SeqCst); }));

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guard.is_live());
    }

    #[test]
    fn racing_teardowns_run_once() {
        let guard = Arc::new(TeardownGuard::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    guard.run(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                    })
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ran| ran)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn busy_lock_is_a_noop() {
        let guard = TeardownGuard::new();
        let _held = guard.lock.lock().unwrap();

        assert!(!guard.run(|| panic!("must not run while another teardown holds the lock")));
        assert!(guard.is_live());
    }
}
