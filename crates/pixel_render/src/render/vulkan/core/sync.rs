//! Vulkan synchronization primitives
//!
//! Fences let the CPU wait for the GPU; semaphores order work on the GPU.
//! Every wait blocks without a timeout: a hung driver stalls the frame loop.

use ash::{vk, Device};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::context::{VulkanError, VulkanResult};

/// Block until signaled
pub const WAIT_FOREVER: u64 = u64::MAX;

/// GPU-GPU synchronization primitive
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// GPU-CPU synchronization primitive
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe {
            self.device.wait_for_fences(&[self.fence], true, WAIT_FOREVER)
                .map_err(VulkanError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Wait, then reset
    pub fn wait_and_reset(&self) -> VulkanResult<()> {
        self.wait()?;
        self.reset()
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_ready(&self) -> VulkanResult<bool> {
        unsafe {
            self.device.get_fence_status(self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Semaphores for one frame in flight
pub struct FrameSemaphores {
    /// Signaled when the swapchain image is ready to be drawn into
    pub image_available: Semaphore,
    /// Signaled when rendering finished; presentation waits on it
    pub render_finished: Semaphore,
}

impl FrameSemaphores {
    /// Create the pair
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
        })
    }
}

/// Number of unfinished command buffers referencing a resource
///
/// Every recording command buffer holds one [`InFlightRef`] per use; the
/// resource is in flight until all of them have been released.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    users: Arc<AtomicUsize>,
}

impl InFlight {
    /// Counter with no users
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more user until the returned reference is dropped
    pub fn acquire(&self) -> InFlightRef {
        self.users.fetch_add(1, Ordering::AcqRel);
        InFlightRef {
            users: Arc::clone(&self.users),
        }
    }

    /// Whether any user is still holding a reference
    pub fn is_in_flight(&self) -> bool {
        self.users() > 0
    }

    /// Outstanding references
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }
}

/// One command buffer's use of a resource; releases it on drop
#[derive(Debug)]
pub struct InFlightRef {
    users: Arc<AtomicUsize>,
}

impl Drop for InFlightRef {
    fn drop(&mut self) {
        self.users.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_until_every_user_is_released() {
        let vertices = InFlight::new();
        assert!(!vertices.is_in_flight());

        // Two frame slots draw the same buffer; only the first is waited on
        let slot_0 = vec![vertices.acquire()];
        let slot_1 = vec![vertices.acquire(), vertices.acquire()];
        assert_eq!(vertices.users(), 3);

        drop(slot_0);
        assert!(vertices.is_in_flight());

        drop(slot_1);
        assert!(!vertices.is_in_flight());
    }

    #[test]
    fn clones_share_the_count() {
        let tracker = InFlight::new();
        let shared = tracker.clone();

        let held = shared.acquire();
        assert!(tracker.is_in_flight());
        drop(held);
        assert_eq!(tracker.users(), 0);
    }
}
