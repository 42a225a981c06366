#![allow(clippy::no_effect)]

use std::path::Path;

use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    descriptor::SamplerCreateInfo,
    std140::{boolean, ToStd140},
    AllocatedBuffer,
    AllocatedImage,
    DescriptorResource,
    DescriptorSetSchema,
    DescriptorSets,
    VkError,
    VulkanContext,
};
use itertools::Itertools;
use nalgebra_glm as glm;
use std140::*;
use vk_mem_erupt as vma;

use crate::{
    accel::{MeshRange, SceneAccel},
    emitters::{AliasTable, Emitter},
    environment::Environment,
    materials::Material,
    Aabb,
    CameraState,
    Scene,
    SceneError,
};

pub const MAX_TEXTURES: u32 = 1024;

#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct VertexStd140 {
    pub position: vec3,
    pub normal:   vec3,
    pub texcoord: vec2,
    pub tangent:  vec4,
}

#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct MaterialStd140 {
    pub base_color:                 vec4,
    pub emissive:                   vec3,
    pub metallic:                   float,
    pub roughness:                  float,
    pub base_color_texture:         uint,
    pub normal_texture:             uint,
    pub metallic_roughness_texture: uint,
    pub emissive_texture:           uint,
}

#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct InstanceStd140 {
    pub transform:        mat4x4,
    pub normal_transform: mat4x4,
    pub mesh:             uint,
    pub material:         uint,
    pub first_index:      uint,
    pub vertex_offset:    uint,
}

/// Emitter triangle; `p0.w` holds the area.
#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct EmitterStd140 {
    pub p0:       vec4,
    pub p1:       vec4,
    pub p2:       vec4,
    pub radiance: vec4,
}

#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct AliasEntryStd140 {
    pub threshold: float,
    pub alias:     uint,
    pub pdf:       float,
}

/// Per-frame uniforms shared by every pass through the scene descriptor set.
#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct Globals {
    pub view:                    mat4x4,
    pub projection:              mat4x4,
    pub view_projection:         mat4x4,
    pub inverse_view_projection: mat4x4,
    pub prev_view_projection:    mat4x4,
    pub camera_position:         vec4,
    /// Current jitter in xy, previous in zw, both in NDC.
    pub jitter:                  vec4,
    /// Width, height and their reciprocals.
    pub render_extent:           vec4,
    pub scene_min:               vec4,
    pub scene_max:               vec4,
    pub frame_number:            uint,
    pub num_frames:              uint,
    pub emitter_count:           uint,
    pub instance_count:          uint,
    pub jitter_enabled:          boolean,
}

#[derive(Copy, Clone, Debug)]
pub struct FrameGlobals {
    pub frame_number:   u64,
    pub num_frames:     u32,
    pub render_extent:  vk::Extent2D,
    pub jitter_enabled: bool,
}

impl Globals {
    pub fn new(camera: &CameraState, bounds: &Aabb, counts: (u32, u32), frame: FrameGlobals) -> Self {
        let (emitter_count, instance_count) = counts;
        let (width, height) = (frame.render_extent.width.max(1) as f32, frame.render_extent.height.max(1) as f32);
        let point = |p: &glm::Vec3| vec4(p.x, p.y, p.z, 1.0);
        Self {
            view:                    camera.current.view.to_std140(),
            projection:              camera.current.projection.to_std140(),
            view_projection:         camera.current.view_projection.to_std140(),
            inverse_view_projection: camera.current.inverse_view_projection.to_std140(),
            prev_view_projection:    camera.previous.view_projection.to_std140(),
            camera_position:         point(&camera.position),
            jitter:                  vec4(camera.jitter.x, camera.jitter.y, camera.prev_jitter.x, camera.prev_jitter.y),
            render_extent:           vec4(width, height, 1.0 / width, 1.0 / height),
            scene_min:               point(&bounds.min),
            scene_max:               point(&bounds.max),
            frame_number:            uint(frame.frame_number as u32),
            num_frames:              uint(frame.num_frames),
            emitter_count:           uint(emitter_count),
            instance_count:          uint(instance_count),
            jitter_enabled:          boolean(frame.jitter_enabled),
        }
    }
}

fn material_data(material: &Material) -> MaterialStd140 {
    MaterialStd140 {
        base_color:                 material.base_color.to_std140(),
        emissive:                   material.emissive.to_std140(),
        metallic:                   float(material.metallic),
        roughness:                  float(material.roughness),
        base_color_texture:         uint(material.base_color_texture),
        normal_texture:             uint(material.normal_texture),
        metallic_roughness_texture: uint(material.metallic_roughness_texture),
        emissive_texture:           uint(material.emissive_texture),
    }
}

fn emitter_data(emitter: &Emitter) -> EmitterStd140 {
    let point = |p: &glm::Vec3, w: f32| vec4(p.x, p.y, p.z, w);
    EmitterStd140 {
        p0:       point(&emitter.p0, emitter.area()),
        p1:       point(&emitter.p1, 0.0),
        p2:       point(&emitter.p2, 0.0),
        radiance: point(&emitter.intensity, 0.0),
    }
}

/// Ranges of every mesh inside the concatenated vertex and index streams.
pub fn mesh_ranges(scene: &Scene) -> Vec<MeshRange> {
    let mut first_index = 0;
    let mut vertex_offset = 0;
    scene
        .meshes
        .iter()
        .map(|mesh| {
            let range = MeshRange {
                first_index,
                index_count: mesh.indices.len() as u32,
                vertex_offset,
                vertex_count: mesh.vertices.len() as u32,
            };
            first_index += range.index_count;
            vertex_offset += range.vertex_count;
            range
        })
        .collect()
}

/// Every scene resource the passes read, bundled behind one descriptor set per frame-ring slot.
pub struct GpuScene {
    pub vertex_buffer:   AllocatedBuffer<VertexStd140>,
    pub index_buffer:    AllocatedBuffer<u32>,
    pub material_buffer: AllocatedBuffer<MaterialStd140>,
    pub instance_buffer: AllocatedBuffer<InstanceStd140>,
    pub emitter_buffer:  AllocatedBuffer<EmitterStd140>,
    pub alias_buffer:    AllocatedBuffer<AliasEntryStd140>,
    /// One indexed draw per instance, `first_instance` = instance index.
    pub draw_buffer:     AllocatedBuffer<vk::DrawIndexedIndirectCommand>,
    pub globals:         Vec<AllocatedBuffer<Globals>>,
    pub textures:        Vec<AllocatedImage>,
    pub texture_sampler: vk::Sampler,
    pub environment:     Environment,
    pub accel:           SceneAccel,
    pub descriptor_sets: DescriptorSets,
    pub bounds:          Aabb,
    pub instance_count:  u32,
    pub emitter_count:   u32,
}

impl GpuScene {
    pub fn schema() -> DescriptorSetSchema {
        let stages = vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        DescriptorSetSchema::new()
            .binding(vk::DescriptorType::UNIFORM_BUFFER, stages)
            .array(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, MAX_TEXTURES, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::STORAGE_BUFFER, stages)
            .binding(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, stages)
            .binding(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        scene: &Scene,
        envmap: Option<&Path>,
        frame_ring: usize,
    ) -> Result<Self, SceneError> {
        if scene.texture_paths.len() > MAX_TEXTURES as usize {
            return Err(SceneError::malformed(format!(
                "{} textures exceed the bindless limit of {}",
                scene.texture_paths.len(),
                MAX_TEXTURES
            )));
        }

        let ranges = mesh_ranges(scene);
        let geometry_usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        let host_buffer = |usage: vk::BufferUsageFlags| {
            vk::BufferCreateInfoBuilder::new().usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let vertices = scene
            .meshes
            .iter()
            .flat_map(|mesh| mesh.vertices.iter())
            .map(|v| VertexStd140 {
                position: v.position.to_std140(),
                normal:   v.normal.to_std140(),
                texcoord: v.texcoord.to_std140(),
                tangent:  v.tangent.to_std140(),
            })
            .collect_vec();
        let vertex_buffer =
            AllocatedBuffer::with_data(vk_ctx.clone(), &host_buffer(geometry_usage), vma::MemoryUsage::CpuToGpu, &vertices)?;

        let indices = scene.meshes.iter().flat_map(|mesh| mesh.indices.iter().copied()).collect_vec();
        let index_buffer = AllocatedBuffer::with_data(
            vk_ctx.clone(),
            &host_buffer(geometry_usage | vk::BufferUsageFlags::INDEX_BUFFER),
            vma::MemoryUsage::CpuToGpu,
            &indices,
        )?;

        let storage = host_buffer(vk::BufferUsageFlags::STORAGE_BUFFER);
        let materials = scene.materials.iter().map(material_data).collect_vec();
        let material_buffer = AllocatedBuffer::with_data(vk_ctx.clone(), &storage, vma::MemoryUsage::CpuToGpu, &materials)?;

        let instances = scene
            .instances
            .iter()
            .map(|instance| {
                let range = ranges[instance.mesh as usize];
                InstanceStd140 {
                    transform:        instance.transform.to_std140(),
                    normal_transform: glm::transpose(&glm::inverse(&instance.transform)).to_std140(),
                    mesh:             uint(instance.mesh),
                    material:         uint(instance.material),
                    first_index:      uint(range.first_index),
                    vertex_offset:    uint(range.vertex_offset),
                }
            })
            .collect_vec();
        let instance_buffer = AllocatedBuffer::with_data(vk_ctx.clone(), &storage, vma::MemoryUsage::CpuToGpu, &instances)?;

        let emitters = scene.emitters.iter().map(emitter_data).collect_vec();
        let emitter_buffer = AllocatedBuffer::with_data(vk_ctx.clone(), &storage, vma::MemoryUsage::CpuToGpu, &emitters)?;

        let alias_table = AliasTable::new(&scene.emitters.iter().map(Emitter::power).collect_vec());
        let aliases = alias_table
            .entries()
            .iter()
            .map(|entry| AliasEntryStd140 {
                threshold: float(entry.threshold),
                alias:     uint(entry.alias),
                pdf:       float(entry.pdf),
            })
            .collect_vec();
        let alias_buffer = AllocatedBuffer::with_data(vk_ctx.clone(), &storage, vma::MemoryUsage::CpuToGpu, &aliases)?;

        let draws = scene
            .instances
            .iter()
            .enumerate()
            .map(|(i, instance)| {
                let range = ranges[instance.mesh as usize];
                vk::DrawIndexedIndirectCommand {
                    index_count:    range.index_count,
                    instance_count: 1,
                    first_index:    range.first_index,
                    vertex_offset:  range.vertex_offset as i32,
                    first_instance: i as u32,
                }
            })
            .collect_vec();
        let draw_buffer = AllocatedBuffer::with_data(
            vk_ctx.clone(),
            &host_buffer(vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER),
            vma::MemoryUsage::CpuToGpu,
            &draws,
        )?;

        let globals = (0..frame_ring)
            .map(|_| {
                let camera = CameraState::new();
                let frame = FrameGlobals {
                    frame_number:   0,
                    num_frames:     0,
                    render_extent:  vk::Extent2D { width: 1, height: 1 },
                    jitter_enabled: false,
                };
                AllocatedBuffer::uniform(vk_ctx.clone(), Globals::new(&camera, &scene.bounds, (0, 0), frame))
            })
            .collect::<Result<Vec<_>, VkError>>()?;

        let textures = scene
            .texture_paths
            .iter()
            .map(|path| {
                let image = image::open(path)
                    .map_err(|source| SceneError::Image { path: path.clone(), source })?
                    .into_rgba8();
                let extent = vk::Extent3D { width: image.width(), height: image.height(), depth: 1 };
                Ok(AllocatedImage::texture_with_data(
                    vk_ctx.clone(),
                    vk::Format::R8G8B8A8_UNORM,
                    extent,
                    vk::ImageViewType::_2D,
                    1,
                    image.as_raw(),
                )?)
            })
            .collect::<Result<Vec<_>, SceneError>>()?;
        let texture_sampler = SamplerCreateInfo::LINEAR_REPEAT.create(&vk_ctx.device)?;

        let environment = Environment::load(vk_ctx.clone(), envmap)?;

        let accel = SceneAccel::build(
            vk_ctx.clone(),
            vertex_buffer.device_address.unwrap_or_default(),
            std::mem::size_of::<VertexStd140>() as u64,
            index_buffer.device_address.unwrap_or_default(),
            &ranges,
            &scene.instances.iter().map(|instance| (instance.mesh, instance.transform)).collect_vec(),
        )?;

        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), frame_ring as u32)?;
        for (slot, uniform) in globals.iter().enumerate() {
            descriptor_sets.write(&vk_ctx.device, slot, &[
                DescriptorResource::UniformBuffer(uniform.buffer),
                DescriptorResource::SampledImageArray(
                    textures.iter().map(|texture| (texture.view, texture_sampler)).collect(),
                ),
                DescriptorResource::StorageBuffer(instance_buffer.buffer),
                DescriptorResource::StorageBuffer(material_buffer.buffer),
                DescriptorResource::StorageBuffer(vertex_buffer.buffer),
                DescriptorResource::StorageBuffer(index_buffer.buffer),
                DescriptorResource::StorageBuffer(emitter_buffer.buffer),
                DescriptorResource::StorageBuffer(alias_buffer.buffer),
                DescriptorResource::AccelerationStructure(accel.tlas.handle),
                DescriptorResource::SampledImage { view: environment.cube.view, sampler: environment.sampler },
            ]);
        }

        log::info!(
            "Scene bounds {:?} .. {:?}, {} vertices, {} triangles",
            scene.bounds.min.as_slice(),
            scene.bounds.max.as_slice(),
            vertices.len(),
            indices.len() / 3
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            material_buffer,
            instance_buffer,
            emitter_buffer,
            alias_buffer,
            draw_buffer,
            globals,
            textures,
            texture_sampler,
            environment,
            accel,
            descriptor_sets,
            bounds: scene.bounds,
            instance_count: scene.instances.len() as u32,
            emitter_count: scene.emitters.len() as u32,
        })
    }

    pub fn descriptor_set(&self, current_frame: usize) -> vk::DescriptorSet {
        self.descriptor_sets.set(current_frame % self.descriptor_sets.sets.len())
    }

    pub fn update_globals(&self, current_frame: usize, camera: &CameraState, frame: FrameGlobals) -> Result<(), VkError> {
        let globals = Globals::new(camera, &self.bounds, (self.emitter_count, self.instance_count), frame);
        self.globals[current_frame % self.globals.len()].set_data(&[globals])
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.descriptor_sets.destroy(device);
        self.accel.destroy(device);
        self.environment.destroy(device);
        unsafe {
            device.destroy_sampler(self.texture_sampler, None);
        }
        hybridtrace_vk::image::destroy_all(device, &self.textures);
        self.globals.iter().for_each(|buffer| buffer.destroy());
        self.draw_buffer.destroy();
        self.alias_buffer.destroy();
        self.emitter_buffer.destroy();
        self.instance_buffer.destroy();
        self.material_buffer.destroy();
        self.index_buffer.destroy();
        self.vertex_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json as js;

    #[test]
    fn vertex_layout_is_sixty_four_bytes() {
        assert_eq!(std::mem::size_of::<VertexStd140>(), 64);
    }

    #[test]
    fn mesh_ranges_are_contiguous() {
        let description: js::Value = js::from_str(
            r#"{ "meshes": {
                "a": { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]] },
                "b": { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]], "indices": [0, 1, 2, 2, 1, 3] }
            } }"#,
        )
        .unwrap();
        let scene = Scene::from_json(&description, Path::new(".")).unwrap();
        let ranges = mesh_ranges(&scene);
        assert_eq!(ranges[0], MeshRange { first_index: 0, index_count: 3, vertex_offset: 0, vertex_count: 3 });
        assert_eq!(ranges[1], MeshRange { first_index: 3, index_count: 6, vertex_offset: 3, vertex_count: 4 });
    }
}
