//! Device memory sub-allocation
//!
//! Thin layer over the Vulkan Memory Allocator that keeps live counters and
//! a registry of outstanding allocations for diagnostics.

use ash::vk::{self, Handle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard};
use vk_mem::Alloc;

use super::context::{VulkanError, VulkanResult};
use crate::config::ConfigError;

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    /// Host visible, written once front to back (staging, uniforms)
    HostSequentialWrite,
    /// Host visible and cached for reading back GPU results
    HostReadback,
    /// Device local whenever possible
    PreferDevice,
}

impl MemoryStrategy {
    fn create_info(self) -> vk_mem::AllocationCreateInfo {
        let (usage, flags) = match self {
            Self::HostSequentialWrite => (
                vk_mem::MemoryUsage::Auto,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            Self::HostReadback => (
                vk_mem::MemoryUsage::Auto,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ),
            Self::PreferDevice => (
                vk_mem::MemoryUsage::AutoPreferDevice,
                vk_mem::AllocationCreateFlags::empty(),
            ),
        };

        vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        }
    }

    /// Whether the host may map allocations made with this strategy
    pub fn host_visible(self) -> bool {
        !matches!(self, Self::PreferDevice)
    }
}

/// What kind of resource an allocation backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationKind {
    /// `VkBuffer`
    Buffer,
    /// `VkImage`
    Image,
}

/// One outstanding allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Debug name given at creation
    pub name: String,
    /// Backed resource
    pub kind: AllocationKind,
    /// Requested size in bytes
    pub size: u64,
}

/// Snapshot of the allocator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReport {
    /// Live buffer allocations
    pub active_buffers: i32,
    /// Live image allocations
    pub active_images: i32,
    /// Every live allocation, largest first
    pub allocations: Vec<AllocationRecord>,
}

/// Buffer and image allocator backed by VMA
pub struct GpuAllocator {
    raw: Mutex<Option<vk_mem::Allocator>>,
    records: Mutex<HashMap<u64, AllocationRecord>>,
    active_buffers: AtomicI32,
    active_images: AtomicI32,
}

impl GpuAllocator {
    /// Create the allocator for a device
    pub fn new(instance: &ash::Instance, device: &ash::Device, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device);
        let raw = vk_mem::Allocator::new(create_info)
            .map_err(|e| VulkanError::InitializationFailed(format!("memory allocator: {:?}", e)))?;
        log::debug!("GPU allocator created");

        Ok(Self {
            raw: Mutex::new(Some(raw)),
            records: Mutex::new(HashMap::new()),
            active_buffers: AtomicI32::new(0),
            active_images: AtomicI32::new(0),
        })
    }

    fn raw(&self) -> MutexGuard<'_, Option<vk_mem::Allocator>> {
        // The guarded value stays consistent even if a holder panicked
        self.raw.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<u64, AllocationRecord>> {
        self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn released() -> VulkanError {
        VulkanError::invalid("allocator used after the render core was destroyed")
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        strategy: MemoryStrategy,
        name: &str,
    ) -> VulkanResult<(vk::Buffer, vk_mem::Allocation)> {
        let guard = self.raw();
        let raw = guard.as_ref().ok_or_else(Self::released)?;
        let (buffer, allocation) = unsafe {
            raw.create_buffer(info, &strategy.create_info())
                .map_err(VulkanError::Allocation)?
        };

        self.records().insert(buffer.as_raw(), AllocationRecord {
            name: name.to_string(),
            kind: AllocationKind::Buffer,
            size: info.size,
        });
        let active = self.active_buffers.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!("Allocated buffer '{}' ({} bytes), {} active", name, info.size, active);

        Ok((buffer, allocation))
    }

    /// Destroy a buffer and free its memory; null handles are ignored
    pub fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        if buffer == vk::Buffer::null() {
            return;
        }
        let guard = self.raw();
        let Some(raw) = guard.as_ref() else {
            log::warn!("Buffer {:?} outlived the allocator; leaking it", buffer);
            return;
        };

        unsafe { raw.destroy_buffer(buffer, allocation) };
        self.records().remove(&buffer.as_raw());
        self.active_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Create an image and bind freshly allocated memory to it
    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        strategy: MemoryStrategy,
        name: &str,
    ) -> VulkanResult<(vk::Image, vk_mem::Allocation)> {
        let guard = self.raw();
        let raw = guard.as_ref().ok_or_else(Self::released)?;
        let (image, allocation) = unsafe {
            raw.create_image(info, &strategy.create_info())
                .map_err(VulkanError::Allocation)?
        };

        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * u64::from(info.extent.depth);
        self.records().insert(image.as_raw(), AllocationRecord {
            name: name.to_string(),
            kind: AllocationKind::Image,
            size: size * super::image::format_size(info.format),
        });
        self.active_images.fetch_add(1, Ordering::Relaxed);

        Ok((image, allocation))
    }

    /// Destroy an image and free its memory; null handles are ignored
    pub fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        if image == vk::Image::null() {
            return;
        }
        let guard = self.raw();
        let Some(raw) = guard.as_ref() else {
            log::warn!("Image {:?} outlived the allocator; leaking it", image);
            return;
        };

        unsafe { raw.destroy_image(image, allocation) };
        self.records().remove(&image.as_raw());
        self.active_images.fetch_sub(1, Ordering::Relaxed);
    }

    /// Map a host-visible allocation
    ///
    /// Nested maps of the same allocation are not supported.
    pub fn map_memory(&self, allocation: &mut vk_mem::Allocation) -> VulkanResult<*mut u8> {
        let guard = self.raw();
        let raw = guard.as_ref().ok_or_else(Self::released)?;
        unsafe { raw.map_memory(allocation).map_err(VulkanError::Api) }
    }

    /// Unmap an allocation mapped with [`GpuAllocator::map_memory`]
    pub fn unmap_memory(&self, allocation: &mut vk_mem::Allocation) {
        if let Some(raw) = self.raw().as_ref() {
            unsafe { raw.unmap_memory(allocation) };
        }
    }

    /// Make host writes in `offset..offset + size` visible to the device
    pub fn flush(&self, allocation: &vk_mem::Allocation, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let guard = self.raw();
        let raw = guard.as_ref().ok_or_else(Self::released)?;
        unsafe {
            raw.flush_allocation(allocation, offset as _, size as _)
                .map_err(VulkanError::Api)
        }
    }

    /// Make device writes in `offset..offset + size` visible to the host
    pub fn invalidate(&self, allocation: &vk_mem::Allocation, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let guard = self.raw();
        let raw = guard.as_ref().ok_or_else(Self::released)?;
        unsafe {
            raw.invalidate_allocation(allocation, offset as _, size as _)
                .map_err(VulkanError::Api)
        }
    }

    /// Number of live buffer allocations
    pub fn active_buffers(&self) -> i32 {
        self.active_buffers.load(Ordering::Relaxed)
    }

    /// Number of live image allocations
    pub fn active_images(&self) -> i32 {
        self.active_images.load(Ordering::Relaxed)
    }

    /// Snapshot of every outstanding allocation
    pub fn report(&self) -> AllocationReport {
        let mut allocations: Vec<AllocationRecord> = self.records().values().cloned().collect();
        allocations.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));

        AllocationReport {
            active_buffers: self.active_buffers(),
            active_images: self.active_images(),
            allocations,
        }
    }

    /// Write [`GpuAllocator::report`] to `path` as RON
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let report = self.report();
        let text = ron::ser::to_string_pretty(&report, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), text)?;
        log::info!(
            "Dumped {} allocations to {}",
            report.allocations.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Destroy the underlying allocator
    ///
    /// Called by the render core just before the device goes away. Anything
    /// still allocated is reported and leaked.
    pub(crate) fn release(&self) {
        let leaked = self.report();
        if !leaked.allocations.is_empty() {
            log::warn!(
                "{} GPU allocations still alive at teardown: {:?}",
                leaked.allocations.len(),
                leaked.allocations.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
            );
        }
        self.raw().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_to_ron() {
        let report = AllocationReport {
            active_buffers: 1,
            active_images: 0,
            allocations: vec![AllocationRecord {
                name: "quad_vertex_buffer".to_string(),
                kind: AllocationKind::Buffer,
                size: 128,
            }],
        };

        let text = ron::to_string(&report).unwrap();
        let parsed: AllocationReport = ron::from_str(&text).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn device_strategy_is_not_mappable() {
        assert!(MemoryStrategy::HostSequentialWrite.host_visible());
        assert!(MemoryStrategy::HostReadback.host_visible());
        assert!(!MemoryStrategy::PreferDevice.host_visible());
    }
}
