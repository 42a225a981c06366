use erupt::{vk, DeviceLoader, ExtendableFrom};
use itertools::Itertools;

use crate::{error::VkResultExt, VkError};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub descriptor_type: vk::DescriptorType,
    pub count:           u32,
    pub stages:          vk::ShaderStageFlags,
    /// Array bindings may leave trailing elements unwritten.
    pub partially_bound: bool,
}

/// Binding layout of one descriptor set, declared once per pass. Binding
/// numbers follow declaration order.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetSchema {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(mut self, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding { descriptor_type, count: 1, stages, partially_bound: false });
        self
    }

    pub fn array(mut self, descriptor_type: vk::DescriptorType, count: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding { descriptor_type, count, stages, partially_bound: true });
        self
    }

    pub fn sampled_images(self, count: usize, stages: vk::ShaderStageFlags) -> Self {
        (0..count).fold(self, |schema, _| schema.binding(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages))
    }

    pub fn storage_images(self, count: usize, stages: vk::ShaderStageFlags) -> Self {
        (0..count).fold(self, |schema, _| schema.binding(vk::DescriptorType::STORAGE_IMAGE, stages))
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Descriptor counts per type needed to allocate `sets` copies of this set.
    pub fn pool_sizes(&self, sets: u32) -> Vec<(vk::DescriptorType, u32)> {
        let mut sizes: Vec<(vk::DescriptorType, u32)> = Vec::new();
        for binding in self.bindings.iter() {
            match sizes.iter_mut().find(|(descriptor_type, _)| *descriptor_type == binding.descriptor_type) {
                Some((_, count)) => *count += binding.count * sets,
                None => sizes.push((binding.descriptor_type, binding.count * sets)),
            }
        }
        sizes
    }

    pub fn create_layout(&self, device: &DeviceLoader) -> Result<vk::DescriptorSetLayout, VkError> {
        let bindings = self
            .bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| {
                vk::DescriptorSetLayoutBindingBuilder::new()
                    .binding(i as u32)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect_vec();
        let binding_flags = self
            .bindings
            .iter()
            .map(|binding| {
                if binding.partially_bound {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect_vec();
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfoBuilder::new().binding_flags(&binding_flags);
        let create_info = vk::DescriptorSetLayoutCreateInfoBuilder::new().bindings(&bindings).extend_from(&mut flags_info);
        unsafe { device.create_descriptor_set_layout(&create_info, None).check("vkCreateDescriptorSetLayout") }
    }
}

/// What gets written into one binding.
#[derive(Clone, Debug)]
pub enum DescriptorResource {
    SampledImage { view: vk::ImageView, sampler: vk::Sampler },
    SampledImageArray(Vec<(vk::ImageView, vk::Sampler)>),
    StorageImage(vk::ImageView),
    UniformBuffer(vk::Buffer),
    StorageBuffer(vk::Buffer),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorResource {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::SampledImage { .. } | Self::SampledImageArray(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            Self::AccelerationStructure(_) => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

enum WriteData {
    Images(Vec<vk::DescriptorImageInfoBuilder<'static>>),
    Buffers(Vec<vk::DescriptorBufferInfoBuilder<'static>>),
    AccelerationStructure(Vec<vk::AccelerationStructureKHR>),
    Skip,
}

/// A layout, its own pool and `count` sets allocated from it.
pub struct DescriptorSets {
    pub layout: vk::DescriptorSetLayout,
    pub pool:   vk::DescriptorPool,
    pub sets:   Vec<vk::DescriptorSet>,
    schema:     DescriptorSetSchema,
}

impl DescriptorSets {
    pub fn new(device: &DeviceLoader, schema: DescriptorSetSchema, count: u32) -> Result<Self, VkError> {
        let layout = schema.create_layout(device)?;

        let sizes = schema
            .pool_sizes(count)
            .into_iter()
            .map(|(descriptor_type, descriptor_count)| {
                vk::DescriptorPoolSizeBuilder::new()._type(descriptor_type).descriptor_count(descriptor_count)
            })
            .collect_vec();
        let pool_info = vk::DescriptorPoolCreateInfoBuilder::new().max_sets(count).pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None).check("vkCreateDescriptorPool")? };

        let layouts = vec![layout; count as usize];
        let allocate_info = vk::DescriptorSetAllocateInfoBuilder::new().descriptor_pool(pool).set_layouts(&layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&allocate_info).check("vkAllocateDescriptorSets")? };

        Ok(Self { layout, pool, sets: sets.to_vec(), schema })
    }

    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    /// Writes `resources` into set `index`, one per binding in schema order.
    /// Empty arrays are skipped.
    pub fn write(&self, device: &DeviceLoader, index: usize, resources: &[DescriptorResource]) {
        debug_assert_eq!(resources.len(), self.schema.bindings().len(), "resource count does not match schema");

        let data = resources
            .iter()
            .zip(self.schema.bindings())
            .map(|(resource, binding)| {
                debug_assert_eq!(resource.descriptor_type(), binding.descriptor_type);
                match resource {
                    DescriptorResource::SampledImage { view, sampler } => WriteData::Images(vec![
                        vk::DescriptorImageInfoBuilder::new()
                            .image_view(*view)
                            .sampler(*sampler)
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                    ]),
                    DescriptorResource::SampledImageArray(images) if images.is_empty() => WriteData::Skip,
                    DescriptorResource::SampledImageArray(images) => WriteData::Images(
                        images
                            .iter()
                            .take(binding.count as usize)
                            .map(|&(view, sampler)| {
                                vk::DescriptorImageInfoBuilder::new()
                                    .image_view(view)
                                    .sampler(sampler)
                                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                            })
                            .collect(),
                    ),
                    DescriptorResource::StorageImage(view) => WriteData::Images(vec![
                        vk::DescriptorImageInfoBuilder::new()
                            .image_view(*view)
                            .image_layout(vk::ImageLayout::GENERAL),
                    ]),
                    DescriptorResource::UniformBuffer(buffer) | DescriptorResource::StorageBuffer(buffer) => {
                        WriteData::Buffers(vec![
                            vk::DescriptorBufferInfoBuilder::new().buffer(*buffer).offset(0).range(vk::WHOLE_SIZE),
                        ])
                    }
                    DescriptorResource::AccelerationStructure(tlas) => WriteData::AccelerationStructure(vec![*tlas]),
                }
            })
            .collect_vec();

        let mut acceleration_structure_writes = data
            .iter()
            .filter_map(|data| match data {
                WriteData::AccelerationStructure(handles) => {
                    Some(vk::WriteDescriptorSetAccelerationStructureKHRBuilder::new().acceleration_structures(handles))
                }
                _ => None,
            })
            .collect_vec();
        let mut acceleration_structure_writes = acceleration_structure_writes.iter_mut();

        let set = self.sets[index];
        let writes = data
            .iter()
            .zip(resources)
            .enumerate()
            .filter_map(|(binding, (data, resource))| {
                let write = vk::WriteDescriptorSetBuilder::new()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .dst_array_element(0)
                    .descriptor_type(resource.descriptor_type());
                match data {
                    WriteData::Images(infos) => Some(write.image_info(infos)),
                    WriteData::Buffers(infos) => Some(write.buffer_info(infos)),
                    WriteData::AccelerationStructure(_) => {
                        let mut write = write.extend_from(acceleration_structure_writes.next()?);
                        write.descriptor_count = 1;
                        Some(write)
                    }
                    WriteData::Skip => None,
                }
            })
            .collect_vec();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SamplerCreateInfo {
    pub address_mode: vk::SamplerAddressMode,
    pub filter:       vk::Filter,
    pub mipmap_mode:  vk::SamplerMipmapMode,
}

impl SamplerCreateInfo {
    pub const LINEAR_CLAMP: Self = Self {
        address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        filter:       vk::Filter::LINEAR,
        mipmap_mode:  vk::SamplerMipmapMode::LINEAR,
    };
    pub const LINEAR_REPEAT: Self = Self {
        address_mode: vk::SamplerAddressMode::REPEAT,
        filter:       vk::Filter::LINEAR,
        mipmap_mode:  vk::SamplerMipmapMode::LINEAR,
    };
    pub const NEAREST_CLAMP: Self = Self {
        address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        filter:       vk::Filter::NEAREST,
        mipmap_mode:  vk::SamplerMipmapMode::NEAREST,
    };

    pub fn create(&self, device: &DeviceLoader) -> Result<vk::Sampler, VkError> {
        let create_info = vk::SamplerCreateInfoBuilder::new()
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .min_filter(self.filter)
            .mag_filter(self.filter)
            .mipmap_mode(self.mipmap_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        unsafe { device.create_sampler(&create_info, None).check("vkCreateSampler") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_bindings_of_same_type() {
        let schema = DescriptorSetSchema::new()
            .storage_images(2, vk::ShaderStageFlags::COMPUTE)
            .sampled_images(3, vk::ShaderStageFlags::COMPUTE)
            .binding(vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)
            .array(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1024, vk::ShaderStageFlags::FRAGMENT);

        let sizes = schema.pool_sizes(2);
        assert!(sizes.contains(&(vk::DescriptorType::STORAGE_IMAGE, 4)));
        assert!(sizes.contains(&(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2054)));
        assert!(sizes.contains(&(vk::DescriptorType::STORAGE_BUFFER, 2)));
        assert_eq!(sizes.len(), 3);
    }

    #[test]
    fn bindings_keep_declaration_order() {
        let schema = DescriptorSetSchema::new()
            .binding(vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL)
            .binding(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, vk::ShaderStageFlags::COMPUTE);
        let types: Vec<_> = schema.bindings().iter().map(|b| b.descriptor_type).collect();
        assert_eq!(types, vec![vk::DescriptorType::UNIFORM_BUFFER, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR]);
        assert!(!schema.bindings()[0].partially_bound);
    }

    #[test]
    fn resources_report_matching_descriptor_types() {
        let resource = DescriptorResource::StorageImage(vk::ImageView::null());
        assert_eq!(resource.descriptor_type(), vk::DescriptorType::STORAGE_IMAGE);
        let resource = DescriptorResource::SampledImageArray(Vec::new());
        assert_eq!(resource.descriptor_type(), vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
