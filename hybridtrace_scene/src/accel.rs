use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{command, AllocatedBuffer, VkError, VkResultExt, VulkanContext};
use itertools::Itertools;
use nalgebra_glm as glm;
use vk_mem_erupt as vma;

/// Scratch buffers are over-allocated by this much and their address rounded up.
const SCRATCH_ALIGNMENT: u64 = 256;

/// Disables back-face culling for the instance.
const INSTANCE_TRIANGLE_FACING_CULL_DISABLE: u32 = 0x01;

/// Layout of `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AccelInstance {
    /// Row-major 3×4 object-to-world transform.
    pub transform:                     [f32; 12],
    /// Custom index in the low 24 bits, visibility mask in the high 8.
    pub custom_index_and_mask:         u32,
    /// Hit group offset in the low 24 bits, instance flags in the high 8.
    pub sbt_offset_and_flags:          u32,
    pub acceleration_structure_address: u64,
}

impl AccelInstance {
    pub fn new(transform: &glm::Mat4, custom_index: u32, blas_address: u64) -> Self {
        let mut rows = [0.0; 12];
        for r in 0..3 {
            for c in 0..4 {
                rows[r * 4 + c] = transform[(r, c)];
            }
        }
        Self {
            transform:                      rows,
            custom_index_and_mask:          (custom_index & 0x00ff_ffff) | (0xff << 24),
            sbt_offset_and_flags:           INSTANCE_TRIANGLE_FACING_CULL_DISABLE << 24,
            acceleration_structure_address: blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00ff_ffff
    }

    pub fn mask(&self) -> u32 {
        self.custom_index_and_mask >> 24
    }
}

/// Where one mesh lives inside the shared vertex and index buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshRange {
    pub first_index:   u32,
    pub index_count:   u32,
    pub vertex_offset: u32,
    pub vertex_count:  u32,
}

pub struct AccelerationStructure {
    pub handle:         vk::AccelerationStructureKHR,
    pub device_address: vk::DeviceAddress,
    buffer:             AllocatedBuffer<u8>,
}

impl AccelerationStructure {
    fn create(
        vk_ctx: VulkanContext,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
    ) -> Result<Self, VkError> {
        let buffer_info = vk::BufferCreateInfoBuilder::new()
            .usage(
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = AllocatedBuffer::<u8>::new(vk_ctx.clone(), &buffer_info, vma::MemoryUsage::GpuOnly, size as usize)?;

        let create_info = vk::AccelerationStructureCreateInfoKHRBuilder::new()
            .buffer(buffer.buffer)
            .offset(0)
            .size(size)
            ._type(ty);
        let handle = unsafe {
            vk_ctx
                .device
                .create_acceleration_structure_khr(&create_info, None)
                .check("vkCreateAccelerationStructureKHR")?
        };
        let address_info = vk::AccelerationStructureDeviceAddressInfoKHRBuilder::new().acceleration_structure(handle);
        let device_address = unsafe { vk_ctx.device.get_acceleration_structure_device_address_khr(&address_info) };

        Ok(Self { handle, device_address, buffer })
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_acceleration_structure_khr(self.handle, None);
        }
        self.buffer.destroy();
    }
}

struct Scratch {
    buffer:  AllocatedBuffer<u8>,
    address: vk::DeviceAddress,
}

impl Scratch {
    fn new(vk_ctx: VulkanContext, size: vk::DeviceSize) -> Result<Self, VkError> {
        let buffer = AllocatedBuffer::<u8>::storage(
            vk_ctx,
            (size + SCRATCH_ALIGNMENT) as usize,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        )?;
        let base = buffer.device_address.unwrap_or_default();
        let address = (base + SCRATCH_ALIGNMENT - 1) / SCRATCH_ALIGNMENT * SCRATCH_ALIGNMENT;
        Ok(Self { buffer, address })
    }
}

/// One bottom-level structure per mesh and a top-level structure over every instance.
pub struct SceneAccel {
    pub blases:      Vec<AccelerationStructure>,
    pub tlas:        AccelerationStructure,
    instance_buffer: AllocatedBuffer<AccelInstance>,
}

impl SceneAccel {
    /// Records every build into a single submission. `vertex_stride` is the
    /// size of one vertex in the shared vertex buffer; positions are its first
    /// three floats.
    pub fn build(
        vk_ctx: VulkanContext,
        vertex_buffer: vk::DeviceAddress,
        vertex_stride: u64,
        index_buffer: vk::DeviceAddress,
        meshes: &[MeshRange],
        instances: &[(u32, glm::Mat4)],
    ) -> Result<Self, VkError> {
        let device = vk_ctx.device.clone();

        let blas_geometries = meshes
            .iter()
            .map(|mesh| {
                let triangles = vk::AccelerationStructureGeometryTrianglesDataKHRBuilder::new()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_buffer + mesh.vertex_offset as u64 * vertex_stride,
                    })
                    .vertex_stride(vertex_stride)
                    .max_vertex(mesh.vertex_count.saturating_sub(1))
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_buffer + mesh.first_index as u64 * 4,
                    });
                vk::AccelerationStructureGeometryKHRBuilder::new()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES_KHR)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: *triangles })
                    .flags(vk::GeometryFlagsKHR::OPAQUE_KHR)
            })
            .collect_vec();

        let mut blases = Vec::with_capacity(meshes.len());
        let mut blas_scratch = Vec::with_capacity(meshes.len());
        for (mesh, geometry) in meshes.iter().zip(blas_geometries.iter()) {
            let geometries = [*geometry];
            let build_info = vk::AccelerationStructureBuildGeometryInfoKHRBuilder::new()
                ._type(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL_KHR)
                .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE_KHR)
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD_KHR)
                .geometries(&geometries);
            let sizes = unsafe {
                device.get_acceleration_structure_build_sizes_khr(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE_KHR,
                    &build_info,
                    &[mesh.index_count / 3],
                    None,
                )
            };
            blases.push(AccelerationStructure::create(
                vk_ctx.clone(),
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL_KHR,
                sizes.acceleration_structure_size,
            )?);
            blas_scratch.push(Scratch::new(vk_ctx.clone(), sizes.build_scratch_size)?);
        }

        let instance_data = instances
            .iter()
            .enumerate()
            .map(|(index, (mesh, transform))| {
                AccelInstance::new(transform, index as u32, blases[*mesh as usize].device_address)
            })
            .collect_vec();
        let instance_buffer = {
            let buffer_info = vk::BufferCreateInfoBuilder::new()
                .usage(
                    vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                )
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            AllocatedBuffer::with_data(vk_ctx.clone(), &buffer_info, vma::MemoryUsage::CpuToGpu, &instance_data)?
        };

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHRBuilder::new()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address.unwrap_or_default(),
            });
        let tlas_geometries = [vk::AccelerationStructureGeometryKHRBuilder::new()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES_KHR)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances: *instances_data })
            .flags(vk::GeometryFlagsKHR::OPAQUE_KHR)];
        let tlas_info = vk::AccelerationStructureBuildGeometryInfoKHRBuilder::new()
            ._type(vk::AccelerationStructureTypeKHR::TOP_LEVEL_KHR)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE_KHR)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD_KHR)
            .geometries(&tlas_geometries);
        let tlas_sizes = unsafe {
            device.get_acceleration_structure_build_sizes_khr(
                vk::AccelerationStructureBuildTypeKHR::DEVICE_KHR,
                &tlas_info,
                &[instances.len() as u32],
                None,
            )
        };
        let tlas = AccelerationStructure::create(
            vk_ctx.clone(),
            vk::AccelerationStructureTypeKHR::TOP_LEVEL_KHR,
            tlas_sizes.acceleration_structure_size,
        )?;
        let tlas_scratch = Scratch::new(vk_ctx.clone(), tlas_sizes.build_scratch_size)?;

        let result = command::immediate_submit(vk_ctx, |device, command_buffer| unsafe {
            for (((mesh, geometry), blas), scratch) in
                meshes.iter().zip(blas_geometries.iter()).zip(blases.iter()).zip(blas_scratch.iter())
            {
                let geometries = [*geometry];
                let build_info = vk::AccelerationStructureBuildGeometryInfoKHRBuilder::new()
                    ._type(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL_KHR)
                    .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE_KHR)
                    .mode(vk::BuildAccelerationStructureModeKHR::BUILD_KHR)
                    .dst_acceleration_structure(blas.handle)
                    .geometries(&geometries)
                    .scratch_data(vk::DeviceOrHostAddressKHR { device_address: scratch.address });
                let range = vk::AccelerationStructureBuildRangeInfoKHR {
                    primitive_count:  mesh.index_count / 3,
                    primitive_offset: 0,
                    first_vertex:     0,
                    transform_offset: 0,
                };
                device.cmd_build_acceleration_structures_khr(command_buffer, &[build_info], &[&range as *const _]);
            }

            let blas_ready = vk::MemoryBarrier2Builder::new()
                .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
                .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR);
            device.cmd_pipeline_barrier2(command_buffer, &vk::DependencyInfoBuilder::new().memory_barriers(&[blas_ready]));

            let build_info = vk::AccelerationStructureBuildGeometryInfoKHRBuilder::new()
                ._type(vk::AccelerationStructureTypeKHR::TOP_LEVEL_KHR)
                .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE_KHR)
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD_KHR)
                .dst_acceleration_structure(tlas.handle)
                .geometries(&tlas_geometries)
                .scratch_data(vk::DeviceOrHostAddressKHR { device_address: tlas_scratch.address });
            let range = vk::AccelerationStructureBuildRangeInfoKHR {
                primitive_count:  instances.len() as u32,
                primitive_offset: 0,
                first_vertex:     0,
                transform_offset: 0,
            };
            device.cmd_build_acceleration_structures_khr(command_buffer, &[build_info], &[&range as *const _]);
        });

        blas_scratch.iter().for_each(|scratch| scratch.buffer.destroy());
        tlas_scratch.buffer.destroy();
        result?;

        log::info!("Built {} bottom-level and 1 top-level acceleration structure(s) over {} instance(s)", blases.len(), instances.len());

        Ok(Self { blases, tlas, instance_buffer })
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.tlas.destroy(device);
        self.blases.iter().for_each(|blas| blas.destroy(device));
        self.instance_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_matches_vulkan_layout() {
        assert_eq!(std::mem::size_of::<AccelInstance>(), 64);
        assert_eq!(address_offset(), 56);
    }

    fn address_offset() -> usize {
        let instance = AccelInstance::new(&glm::Mat4::identity(), 0, 0);
        let base = &instance as *const _ as usize;
        &instance.acceleration_structure_address as *const _ as usize - base
    }

    #[test]
    fn transform_is_stored_row_major() {
        let transform = glm::translation(&glm::vec3(1.0, 2.0, 3.0));
        let instance = AccelInstance::new(&transform, 7, 0xdead_beef);
        assert_eq!(instance.transform, [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]);
        assert_eq!(instance.custom_index(), 7);
        assert_eq!(instance.mask(), 0xff);
        assert_eq!(instance.sbt_offset_and_flags >> 24, INSTANCE_TRIANGLE_FACING_CULL_DISABLE);
    }
}
