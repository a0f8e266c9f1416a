//! Linear GPU memory: vertex, index, uniform and staging buffers
//!
//! Buffers are created in host-visible memory. Constant buffers are then
//! promoted to device-local memory with [`Buffer::push_to_gpu`], which consumes
//! the host copy and returns the device copy.

use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

use super::allocator::MemoryStrategy;
use super::commands::submit_once;
use super::context::{VulkanError, VulkanResult};
use super::render_core::RenderCore;
use super::sync::InFlight;
use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Mutability of a buffer's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Host visible, rewritable at any time
    Mutable,
    /// Written once at creation, then moved to device-local memory
    Constant,
}

/// Constant buffers can only be filled at creation
pub fn check_initial_data(kind: BufferKind, data: Option<&[u8]>, name: &str) -> VulkanResult<()> {
    match (kind, data) {
        (BufferKind::Constant, None) => Err(VulkanError::ConstantBufferWithoutData {
            name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Reject a write of `len` bytes at `offset` that overflows the buffer or
/// targets memory a pending command buffer still reads
pub fn check_write(
    name: &str,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
    in_flight: bool,
) -> VulkanResult<()> {
    if offset.checked_add(len).map_or(true, |end| end > size) {
        return Err(VulkanError::invalid(format!(
            "write of {} bytes at {} overflows buffer '{}' ({} bytes)",
            len, offset, name, size
        )));
    }
    if in_flight {
        return Err(VulkanError::invalid(format!(
            "buffer '{}' is still referenced by a command buffer in flight",
            name
        )));
    }
    Ok(())
}

/// Allocation name carrying the buffer's role, as shown in allocator reports
pub fn allocation_name(name: &str, usage: vk::BufferUsageFlags) -> String {
    let suffix = if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
        "_index_buffer"
    } else if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
        "_vertex_buffer"
    } else if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
        "_uniform_buffer"
    } else {
        "_buffer"
    };
    format!("{}{}", name, suffix)
}

struct RawBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
}

/// A contiguous region of GPU memory
pub struct Buffer {
    core: Arc<RenderCore>,
    raw: Option<RawBuffer>,
    mapped: Option<NonNull<u8>>,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    kind: BufferKind,
    strategy: MemoryStrategy,
    name: String,
    in_flight: InFlight,
}

impl Buffer {
    /// Create a buffer, optionally filled with `data`
    ///
    /// Constant buffers require `data` and end up in device-local memory;
    /// without it creation fails with a warning-level error and nothing is
    /// allocated.
    pub fn new(
        core: Arc<RenderCore>,
        kind: BufferKind,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
        data: Option<&[u8]>,
    ) -> VulkanResult<Self> {
        check_initial_data(kind, data, name)?;

        let usage = match kind {
            BufferKind::Constant => usage | vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::Mutable => usage,
        };

        let mut buffer = Self::allocate(core, kind, size, usage, name, MemoryStrategy::HostSequentialWrite)?;
        if let Some(data) = data {
            buffer.write(0, data)?;
        }

        match kind {
            BufferKind::Constant => buffer.push_to_gpu(),
            BufferKind::Mutable => Ok(buffer),
        }
    }

    /// Host-visible buffer meant for reading GPU results back
    pub fn new_readback(core: Arc<RenderCore>, size: vk::DeviceSize, name: &str) -> VulkanResult<Self> {
        Self::allocate(
            core,
            BufferKind::Mutable,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryStrategy::HostReadback,
        )
    }

    fn allocate(
        core: Arc<RenderCore>,
        kind: BufferKind,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
        strategy: MemoryStrategy,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::invalid(format!("buffer '{}' has zero size", name)));
        }

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (handle, allocation) = core.allocator().create_buffer(&info, strategy, &allocation_name(name, usage))?;

        Ok(Self {
            core,
            raw: Some(RawBuffer { handle, allocation }),
            mapped: None,
            size,
            offset: 0,
            usage,
            kind,
            strategy,
            name: name.to_string(),
            in_flight: InFlight::new(),
        })
    }

    /// Move the contents into a new device-local buffer
    ///
    /// Blocks until the copy has finished. The returned buffer keeps this
    /// buffer's usage plus both transfer directions; `self` is destroyed.
    pub fn push_to_gpu(self) -> VulkanResult<Self> {
        let usage = self.usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        let gpu = Self::allocate(
            Arc::clone(&self.core),
            self.kind,
            self.size,
            usage,
            &format!("{}_GPU", self.name),
            MemoryStrategy::PreferDevice,
        )?;

        let size = self.size;
        submit_once(&self.core, |cmd| {
            cmd.copy_buffer(&self, &gpu, size);
            Ok(())
        })?;

        log::debug!("Pushed buffer '{}' ({} bytes) to device memory", self.name, size);
        drop(self);
        Ok(gpu)
    }

    /// Overwrite this buffer with the contents of `src`
    pub fn copy_from(&mut self, src: &Self) -> VulkanResult<()> {
        check_write(&self.name, self.size, 0, src.size, self.is_in_flight())?;
        let size = src.size;
        let dst: &Self = self;
        submit_once(&self.core, |cmd| {
            cmd.copy_buffer(src, dst, size);
            Ok(())
        })
    }

    fn raw_mut(&mut self) -> VulkanResult<&mut RawBuffer> {
        self.raw.as_mut().ok_or_else(|| VulkanError::invalid("buffer already destroyed"))
    }

    /// Map the whole buffer; mapping twice returns the existing pointer
    pub fn map(&mut self) -> VulkanResult<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        if !self.strategy.host_visible() {
            return Err(VulkanError::invalid(format!("buffer '{}' is not host visible", self.name)));
        }

        let core = Arc::clone(&self.core);
        let raw = self.raw_mut()?;
        let ptr = core.allocator().map_memory(&mut raw.allocation)?;
        let ptr = NonNull::new(ptr).ok_or_else(|| VulkanError::invalid("allocator returned a null mapping"))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Undo [`Buffer::map`]; unmapped buffers are left alone
    pub fn unmap(&mut self) {
        if self.mapped.take().is_none() {
            return;
        }
        let core = Arc::clone(&self.core);
        if let Some(raw) = self.raw.as_mut() {
            core.allocator().unmap_memory(&mut raw.allocation);
        }
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Copy `data` into the buffer at `offset` and flush it
    ///
    /// Fails without writing while a command buffer that has not finished
    /// references the buffer. A buffer that was not mapped before the call is
    /// unmapped again afterwards.
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let len = data.len() as vk::DeviceSize;
        check_write(&self.name, self.size, offset, len, self.is_in_flight())?;

        let was_mapped = self.is_mapped();
        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        let flushed = self.flush(len, offset);
        if !was_mapped {
            self.unmap();
        }
        flushed
    }

    /// Read the whole buffer back; host-visible buffers only
    pub fn read(&mut self) -> VulkanResult<Vec<u8>> {
        let core = Arc::clone(&self.core);
        {
            let raw = self.raw_mut()?;
            core.allocator().invalidate(&raw.allocation, 0, vk::WHOLE_SIZE)?;
        }

        let was_mapped = self.is_mapped();
        let ptr = self.map()?;
        let mut bytes = vec![0u8; self.size as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), bytes.as_mut_ptr(), bytes.len());
        }
        if !was_mapped {
            self.unmap();
        }
        Ok(bytes)
    }

    /// Make host writes in `offset..offset + size` visible to the device
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        let raw = self.raw.as_ref().ok_or_else(|| VulkanError::invalid("buffer already destroyed"))?;
        self.core.allocator().flush(&raw.allocation, offset, size)
    }

    /// Whether any command buffer that has not finished yet references this buffer
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_in_flight()
    }

    /// Users counter shared with the command buffers recording this buffer
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Whether the buffer still owns GPU memory
    pub fn is_init(&self) -> bool {
        self.raw.is_some()
    }

    /// Unmap and release the buffer; later calls are no-ops
    pub fn destroy(&mut self) {
        self.unmap();
        if let Some(mut raw) = self.raw.take() {
            self.core.allocator().destroy_buffer(raw.handle, &mut raw.allocation);
        }
    }

    /// Render core the buffer was allocated from
    pub fn core(&self) -> &Arc<RenderCore> {
        &self.core
    }

    /// Native handle, null once destroyed
    pub fn handle(&self) -> vk::Buffer {
        self.raw.as_ref().map_or(vk::Buffer::null(), |raw| raw.handle)
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Offset of the data within the buffer
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Mutable or constant
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Vertex data promoted to device memory
pub fn vertex_buffer(core: Arc<RenderCore>, name: &str, vertices: &[u8]) -> VulkanResult<Buffer> {
    Buffer::new(
        core,
        BufferKind::Constant,
        vertices.len() as vk::DeviceSize,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        name,
        Some(vertices),
    )
}

/// `u16` index data promoted to device memory
pub fn index_buffer(core: Arc<RenderCore>, name: &str, indices: &[u16]) -> VulkanResult<Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(indices);
    Buffer::new(
        core,
        BufferKind::Constant,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::INDEX_BUFFER,
        name,
        Some(bytes),
    )
}

/// One persistently mapped uniform buffer per frame in flight
pub struct UniformBuffer {
    buffers: Vec<Buffer>,
}

impl UniformBuffer {
    /// Create `MAX_FRAMES_IN_FLIGHT` buffers of `size` bytes
    pub fn new(core: &Arc<RenderCore>, size: vk::DeviceSize, name: &str) -> VulkanResult<Self> {
        let buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|frame| {
                let mut buffer = Buffer::new(
                    Arc::clone(core),
                    BufferKind::Mutable,
                    size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &format!("{}_{}", name, frame),
                    None,
                )?;
                buffer.map()?;
                Ok(buffer)
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(Self { buffers })
    }

    /// Replace the uniform data for `frame`
    pub fn set_data(&mut self, frame: usize, data: &[u8]) -> VulkanResult<()> {
        let buffer = self.buffers
            .get_mut(frame)
            .ok_or_else(|| VulkanError::invalid(format!("no uniform buffer for frame {}", frame)))?;
        buffer.write(0, data)
    }

    /// Buffer backing `frame`
    pub fn buffer(&self, frame: usize) -> &Buffer {
        &self.buffers[frame % self.buffers.len()]
    }

    /// Size of each buffer
    pub fn size(&self) -> vk::DeviceSize {
        self.buffers.first().map_or(0, Buffer::size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{reported_count, OrReport, Severity};

    #[test]
    fn constant_buffer_without_data_warns_once() {
        let before = reported_count(Severity::Warning);

        let result = check_initial_data(BufferKind::Constant, None, "quad");
        assert!(matches!(result, Err(VulkanError::ConstantBufferWithoutData { .. })));
        assert!(result.or_report("buffer creation").is_none());

        assert_eq!(reported_count(Severity::Warning), before + 1);
    }

    #[test]
    fn other_combinations_are_accepted() {
        let data = [1u8, 2, 3];
        assert!(check_initial_data(BufferKind::Constant, Some(&data), "a").is_ok());
        assert!(check_initial_data(BufferKind::Mutable, None, "b").is_ok());
        assert!(check_initial_data(BufferKind::Mutable, Some(&data), "c").is_ok());
    }

    #[test]
    fn writes_must_fit_the_buffer() {
        assert!(check_write("uniform", 64, 0, 64, false).is_ok());
        assert!(check_write("uniform", 64, 32, 32, false).is_ok());
        assert!(check_write("uniform", 64, 32, 33, false).is_err());
        assert!(check_write("uniform", 64, u64::MAX, 1, false).is_err());
    }

    #[test]
    fn writes_to_buffers_in_flight_are_refused() {
        let vertices = InFlight::new();
        let pending = vertices.acquire();

        let err = check_write("quad", 64, 0, 16, vertices.is_in_flight()).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert_eq!(err.severity(), Severity::Error);

        drop(pending);
        assert!(check_write("quad", 64, 0, 16, vertices.is_in_flight()).is_ok());
    }

    #[test]
    fn allocation_names_carry_the_role() {
        assert_eq!(allocation_name("quad", vk::BufferUsageFlags::VERTEX_BUFFER), "quad_vertex_buffer");
        assert_eq!(
            allocation_name("quad", vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC),
            "quad_index_buffer"
        );
        assert_eq!(allocation_name("staging", vk::BufferUsageFlags::TRANSFER_SRC), "staging_buffer");
    }
}
