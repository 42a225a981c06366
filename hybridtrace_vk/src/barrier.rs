use std::{collections::HashMap, hash::Hash};

use erupt::{vk, DeviceLoader};

use crate::{AllocatedBuffer, AllocatedImage, PingPong};

/// How a pass is about to touch a resource. Buffers ignore `layout`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub stage:  vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

const fn stages(a: vk::PipelineStageFlags2, b: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::from_bits_truncate(a.bits() | b.bits())
}

const fn accesses(a: vk::AccessFlags2, b: vk::AccessFlags2) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_bits_truncate(a.bits() | b.bits())
}

const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_bits_truncate(
    vk::AccessFlags2::SHADER_WRITE.bits()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.bits()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.bits()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
        | vk::AccessFlags2::TRANSFER_WRITE.bits()
        | vk::AccessFlags2::HOST_WRITE.bits()
        | vk::AccessFlags2::MEMORY_WRITE.bits()
        | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.bits(),
);

impl Access {
    /// Freshly acquired swap-chain image. The acquire semaphore is waited on at
    /// this stage, so the first transition chains after the presentation read.
    pub const ACQUIRED: Self = Self {
        stage:  vk::PipelineStageFlags2::ALL_TRANSFER,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };
    pub const COLOR_ATTACHMENT: Self = Self {
        stage:  vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: accesses(vk::AccessFlags2::COLOR_ATTACHMENT_READ, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    pub const DEPTH_ATTACHMENT: Self = Self {
        stage:  stages(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS),
        access: accesses(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
    };
    /// Indirect-dispatch arguments consumed by `vkCmdDispatchIndirect`.
    pub const INDIRECT_ARGS: Self = Self {
        stage:  vk::PipelineStageFlags2::DRAW_INDIRECT,
        access: vk::AccessFlags2::INDIRECT_COMMAND_READ,
        layout: vk::ImageLayout::UNDEFINED,
    };
    pub const PRESENT: Self = Self {
        stage:  vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
    };
    /// Sampled from compute or fragment shaders.
    pub const SHADER_READ: Self = Self {
        stage:  stages(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        access: vk::AccessFlags2::SHADER_SAMPLED_READ,
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    pub const STORAGE_READ: Self = Self {
        stage:  stages(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        access: vk::AccessFlags2::SHADER_STORAGE_READ,
        layout: vk::ImageLayout::GENERAL,
    };
    pub const STORAGE_READ_WRITE: Self = Self {
        stage:  vk::PipelineStageFlags2::COMPUTE_SHADER,
        access: accesses(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        layout: vk::ImageLayout::GENERAL,
    };
    pub const STORAGE_WRITE: Self = Self {
        stage:  vk::PipelineStageFlags2::COMPUTE_SHADER,
        access: vk::AccessFlags2::SHADER_STORAGE_WRITE,
        layout: vk::ImageLayout::GENERAL,
    };
    pub const TRANSFER_DST: Self = Self {
        stage:  vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_WRITE,
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    };
    pub const TRANSFER_SRC: Self = Self {
        stage:  vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_READ,
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    };
    pub const UNDEFINED: Self = Self {
        stage:  vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };
    pub const VERTEX_READ: Self = Self {
        stage:  stages(vk::PipelineStageFlags2::VERTEX_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        access: vk::AccessFlags2::SHADER_STORAGE_READ,
        layout: vk::ImageLayout::UNDEFINED,
    };

    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    fn without_layout(self) -> Self {
        Self { layout: vk::ImageLayout::UNDEFINED, ..self }
    }
}

/// Whether going from `prev` to `next` needs a dependency at all. Reads that
/// share a layout and are already covered by the previous scope don't.
pub fn needs_barrier(prev: Access, next: Access) -> bool {
    prev.layout != next.layout
        || prev.is_write()
        || next.is_write()
        || !prev.stage.contains(next.stage)
        || !prev.access.contains(next.access)
}

/// Last known access of every tracked resource.
#[derive(Clone, Debug)]
pub struct StateTracker<K> {
    states: HashMap<K, Access>,
}

impl<K: Copy + Eq + Hash> Default for StateTracker<K> {
    fn default() -> Self {
        Self { states: HashMap::new() }
    }
}

impl<K: Copy + Eq + Hash> StateTracker<K> {
    pub fn track(&mut self, key: K, access: Access) {
        self.states.insert(key, access);
    }

    pub fn forget(&mut self, key: K) {
        self.states.remove(&key);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn is_tracked(&self, key: K) -> bool {
        self.states.contains_key(&key)
    }

    pub fn current(&self, key: K) -> Option<Access> {
        self.states.get(&key).copied()
    }

    /// Records `next` as the new state and returns the `(src, dst)` pair of the
    /// dependency to emit, if one is needed.
    pub fn transition(&mut self, key: K, next: Access) -> Option<(Access, Access)> {
        let prev = self.current(key).unwrap_or(Access::UNDEFINED);
        if !needs_barrier(prev, next) {
            // Already covered by the previous read scope.
            return None;
        }
        self.states.insert(key, next);
        Some((prev, next))
    }

    /// Frame-boundary transitions for double-buffered resources: the slot written
    /// under `parity` becomes readable history and the other slot becomes writable.
    pub fn end_frame(&mut self, pairs: &[[K; 2]], parity: usize) -> Vec<(K, Access, Access)> {
        let mut transitions = Vec::with_capacity(pairs.len() * 2);
        for pair in pairs {
            let written = pair[(parity & 1) ^ 1];
            let history = pair[parity & 1];
            if let Some((src, dst)) = self.transition(written, Access::SHADER_READ) {
                transitions.push((written, src, dst));
            }
            if let Some((src, dst)) = self.transition(history, Access::STORAGE_WRITE) {
                transitions.push((history, src, dst));
            }
        }
        transitions
    }

    /// Moves every pair from the boundary state of `parity` back to the parity-0
    /// state. Under an odd parity the history lives in slot 1, so it is copied
    /// into slot 0 between the two barrier batches.
    pub fn rewind(&mut self, pairs: &[[K; 2]], parity: usize) -> Rewind<K> {
        let mut rewind = Rewind { before_copy: Vec::new(), copies: Vec::new(), after_copy: Vec::new() };
        if parity & 1 == 0 {
            return rewind;
        }
        for &[first, second] in pairs {
            for (key, access) in [(second, Access::TRANSFER_SRC), (first, Access::TRANSFER_DST)] {
                if let Some((src, dst)) = self.transition(key, access) {
                    rewind.before_copy.push((key, src, dst));
                }
            }
            rewind.copies.push((second, first));
        }
        for &[first, second] in pairs {
            for (key, access) in [(first, Access::SHADER_READ), (second, Access::STORAGE_WRITE)] {
                if let Some((src, dst)) = self.transition(key, access) {
                    rewind.after_copy.push((key, src, dst));
                }
            }
        }
        rewind
    }

    /// At a frame boundary with `parity` about to be used, every pair has its
    /// read slot in `SHADER_READ_ONLY_OPTIMAL` and its write slot in `GENERAL`.
    pub fn frame_boundary_holds(&self, pairs: &[[K; 2]], parity: usize) -> bool {
        pairs.iter().all(|pair| {
            let layout = |key| self.current(key).map(|access| access.layout);
            layout(pair[parity & 1]) == Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                && layout(pair[(parity & 1) ^ 1]) == Some(vk::ImageLayout::GENERAL)
        })
    }
}

/// Barriers and history copies that bring double-buffered resources back to parity 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewind<K> {
    pub before_copy: Vec<(K, Access, Access)>,
    /// `(source, destination)` pairs.
    pub copies:      Vec<(K, K)>,
    pub after_copy:  Vec<(K, Access, Access)>,
}

/// One region per mip level of `range`, copying an image onto a twin of the same shape.
fn copy_regions(extent: vk::Extent3D, range: vk::ImageSubresourceRange) -> Vec<vk::ImageCopy2Builder<'static>> {
    (range.base_mip_level..range.base_mip_level + range.level_count)
        .map(|mip| {
            let layers = vk::ImageSubresourceLayers {
                aspect_mask:      range.aspect_mask,
                mip_level:        mip,
                base_array_layer: range.base_array_layer,
                layer_count:      range.layer_count,
            };
            vk::ImageCopy2Builder::new().src_subresource(layers).dst_subresource(layers).extent(vk::Extent3D {
                width:  (extent.width >> mip).max(1),
                height: (extent.height >> mip).max(1),
                depth:  (extent.depth >> mip).max(1),
            })
        })
        .collect()
}

/// Collects pending transitions and emits them with one `vkCmdPipelineBarrier2`.
#[derive(Default)]
pub struct BarrierBuilder {
    image_barriers:  Vec<vk::ImageMemoryBarrier2Builder<'static>>,
    buffer_barriers: Vec<vk::BufferMemoryBarrier2Builder<'static>>,
}

impl BarrierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(
        &mut self,
        image: vk::Image,
        subresource_range: vk::ImageSubresourceRange,
        src: Access,
        dst: Access,
    ) -> &mut Self {
        self.image_barriers.push(
            vk::ImageMemoryBarrier2Builder::new()
                .src_stage_mask(src.stage)
                .src_access_mask(src.access)
                .dst_stage_mask(dst.stage)
                .dst_access_mask(dst.access)
                .old_layout(src.layout)
                .new_layout(dst.layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range),
        );
        self
    }

    pub fn buffer(&mut self, buffer: vk::Buffer, src: Access, dst: Access) -> &mut Self {
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier2Builder::new()
                .src_stage_mask(src.stage)
                .src_access_mask(src.access)
                .dst_stage_mask(dst.stage)
                .dst_access_mask(dst.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
        self
    }

    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, device: &DeviceLoader, command_buffer: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfoBuilder::new()
            .image_memory_barriers(&self.image_barriers)
            .buffer_memory_barriers(&self.buffer_barriers);
        unsafe {
            device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
        }
        self.image_barriers.clear();
        self.buffer_barriers.clear();
    }
}

/// Turns the accesses passes declare into the barriers between them.
#[derive(Default)]
pub struct BarrierRecorder {
    images:     StateTracker<vk::Image>,
    ranges:     HashMap<vk::Image, vk::ImageSubresourceRange>,
    extents:    HashMap<vk::Image, vk::Extent3D>,
    buffers:    StateTracker<vk::Buffer>,
    ping_pongs: Vec<[vk::Image; 2]>,
    builder:    BarrierBuilder,
}

impl BarrierRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every tracked resource, e.g. before render targets are recreated.
    pub fn clear(&mut self) {
        self.images.clear();
        self.ranges.clear();
        self.extents.clear();
        self.buffers.clear();
        self.ping_pongs.clear();
        debug_assert!(self.builder.is_empty(), "pending barriers dropped");
    }

    pub fn track_image(&mut self, image: &AllocatedImage, access: Access) {
        self.images.track(image.image, access);
        self.ranges.insert(image.image, image.subresource_range);
        self.extents.insert(image.image, image.extent);
    }

    /// Registers a double-buffered image in the parity-0 boundary state, which is
    /// how pairs are created. Pairs that have been through frames must be brought
    /// back to that state with [`Self::rewind`] before they are tracked again.
    pub fn track_ping_pong(&mut self, images: &PingPong<AllocatedImage>) {
        self.track_image(images.read(0), Access::SHADER_READ);
        self.track_image(images.write(0), Access::STORAGE_WRITE);
        self.ping_pongs.push([images.slot(0).image, images.slot(1).image]);
    }

    /// Brings every tracked pair back to the parity-0 boundary state, keeping
    /// the history by copying it into slot 0. Recorded outside of a frame, with
    /// the device idle, before pairs are recreated or re-tracked.
    pub fn rewind(&mut self, device: &DeviceLoader, command_buffer: vk::CommandBuffer, parity: usize) {
        let rewind = self.images.rewind(&self.ping_pongs, parity);
        for &(image, src, dst) in &rewind.before_copy {
            self.builder.image(image, self.ranges[&image], src, dst);
        }
        self.flush(device, command_buffer);

        for &(src_image, dst_image) in &rewind.copies {
            let regions = copy_regions(self.extents[&src_image], self.ranges[&src_image]);
            let copy_info = vk::CopyImageInfo2Builder::new()
                .src_image(src_image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(dst_image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(&regions);
            unsafe {
                device.cmd_copy_image2(command_buffer, &copy_info);
            }
        }

        for &(image, src, dst) in &rewind.after_copy {
            self.builder.image(image, self.ranges[&image], src, dst);
        }
        self.flush(device, command_buffer);
        debug_assert!(self.images.frame_boundary_holds(&self.ping_pongs, 0));
    }

    pub fn image(&mut self, image: &AllocatedImage, access: Access) -> &mut Self {
        debug_assert!(self.images.is_tracked(image.image), "image used before it was tracked");
        if let Some((src, dst)) = self.images.transition(image.image, access) {
            self.builder.image(image.image, image.subresource_range, src, dst);
        }
        self
    }

    pub fn buffer<T>(&mut self, buffer: &AllocatedBuffer<T>, access: Access) -> &mut Self {
        self.raw_buffer(buffer.buffer, access)
    }

    pub fn raw_buffer(&mut self, buffer: vk::Buffer, access: Access) -> &mut Self {
        if let Some((src, dst)) = self.buffers.transition(buffer, access.without_layout()) {
            self.builder.buffer(buffer, src, dst);
        }
        self
    }

    /// Swap-chain images are not owned by any pass; their state is reset every frame.
    pub fn external_image(
        &mut self,
        image: vk::Image,
        subresource_range: vk::ImageSubresourceRange,
        src: Access,
        dst: Access,
    ) -> &mut Self {
        self.builder.image(image, subresource_range, src, dst);
        self
    }

    /// Barrier on part of an image, such as a single mip, outside the tracked state.
    /// The caller must restore a whole-image state with [`Self::assume`] afterwards.
    pub fn subresource(
        &mut self,
        image: &AllocatedImage,
        subresource_range: vk::ImageSubresourceRange,
        src: Access,
        dst: Access,
    ) -> &mut Self {
        self.builder.image(image.image, subresource_range, src, dst);
        self
    }

    pub fn assume(&mut self, image: &AllocatedImage, access: Access) {
        self.images.track(image.image, access);
    }

    /// Debug check that a resource is where a pass says it left it.
    pub fn expect(&self, image: &AllocatedImage, access: Access) {
        debug_assert_eq!(
            self.images.current(image.image).map(|a| a.layout),
            Some(access.layout),
            "image is not in the layout the pass declared"
        );
    }

    pub fn flush(&mut self, device: &DeviceLoader, command_buffer: vk::CommandBuffer) {
        self.builder.insert(device, command_buffer);
    }

    /// Emits the frame-boundary transitions for every double-buffered image
    /// written under `parity`.
    pub fn end_frame(&mut self, device: &DeviceLoader, command_buffer: vk::CommandBuffer, parity: usize) {
        for (image, src, dst) in self.images.end_frame(&self.ping_pongs, parity) {
            let range = self.ranges[&image];
            self.builder.image(image, range, src, dst);
        }
        self.flush(device, command_buffer);
        debug_assert!(self.images.frame_boundary_holds(&self.ping_pongs, parity ^ 1));
    }

    pub fn frame_boundary_holds(&self, parity: usize) -> bool {
        self.images.frame_boundary_holds(&self.ping_pongs, parity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_images_wait_before_the_blit() {
        assert!(Access::ACQUIRED.stage.contains(Access::TRANSFER_DST.stage));
        assert_ne!(Access::ACQUIRED.stage, vk::PipelineStageFlags2::NONE);
        assert_eq!(Access::ACQUIRED.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn reads_in_same_layout_need_no_barrier() {
        let mut tracker = StateTracker::default();
        tracker.track(1u32, Access::SHADER_READ);
        assert_eq!(tracker.transition(1, Access::SHADER_READ), None);
    }

    #[test]
    fn write_after_write_and_layout_change_need_barriers() {
        let mut tracker = StateTracker::default();
        tracker.track(1u32, Access::STORAGE_WRITE);
        assert_eq!(
            tracker.transition(1, Access::STORAGE_WRITE),
            Some((Access::STORAGE_WRITE, Access::STORAGE_WRITE))
        );
        assert_eq!(tracker.transition(1, Access::SHADER_READ), Some((Access::STORAGE_WRITE, Access::SHADER_READ)));
        assert_eq!(tracker.current(1), Some(Access::SHADER_READ));
    }

    #[test]
    fn untracked_resources_start_undefined() {
        let mut tracker = StateTracker::default();
        assert_eq!(
            tracker.transition(7u32, Access::COLOR_ATTACHMENT),
            Some((Access::UNDEFINED, Access::COLOR_ATTACHMENT))
        );
    }

    #[test]
    fn reads_outside_the_previous_scope_get_a_barrier() {
        let mut tracker = StateTracker::default();
        let compute_read = Access {
            stage:  vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_STORAGE_READ,
            layout: vk::ImageLayout::UNDEFINED,
        };
        tracker.track(3u32, compute_read);
        assert_eq!(tracker.transition(3, Access::INDIRECT_ARGS), Some((compute_read, Access::INDIRECT_ARGS)));
        assert_eq!(tracker.transition(3, Access::INDIRECT_ARGS), None);
        assert_eq!(tracker.current(3), Some(Access::INDIRECT_ARGS));
    }

    #[test]
    fn indirect_arguments_wait_on_shader_writes() {
        let mut tracker = StateTracker::default();
        tracker.track(0u32, Access::STORAGE_READ_WRITE.without_layout());
        let (src, dst) = tracker.transition(0, Access::INDIRECT_ARGS).unwrap();
        assert!(src.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert_eq!(dst.access, vk::AccessFlags2::INDIRECT_COMMAND_READ);
        assert!(dst.stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
    }

    #[test]
    fn frame_boundary_flips_every_pair() {
        let pairs = [[0u32, 1], [2, 3]];
        let mut tracker = StateTracker::default();
        for pair in &pairs {
            tracker.track(pair[0], Access::SHADER_READ);
            tracker.track(pair[1], Access::STORAGE_WRITE);
        }

        let mut parity = 0;
        for _ in 0..6 {
            assert!(tracker.frame_boundary_holds(&pairs, parity));
            // Passes read history and write the other slot.
            for pair in &pairs {
                tracker.transition(pair[parity], Access::SHADER_READ);
                tracker.transition(pair[parity ^ 1], Access::STORAGE_WRITE);
            }
            let transitions = tracker.end_frame(&pairs, parity);
            assert_eq!(transitions.len(), 4);
            for (key, src, dst) in transitions {
                if key == pairs[0][parity ^ 1] || key == pairs[1][parity ^ 1] {
                    assert_eq!((src.layout, dst.layout), (vk::ImageLayout::GENERAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
                } else {
                    assert_eq!((src.layout, dst.layout), (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::GENERAL));
                }
            }
            parity ^= 1;
        }
    }

    /// What `BarrierRecorder::track_ping_pong` records for each pair.
    fn seed(tracker: &mut StateTracker<u32>, pairs: &[[u32; 2]]) {
        for pair in pairs {
            tracker.track(pair[0], Access::SHADER_READ);
            tracker.track(pair[1], Access::STORAGE_WRITE);
        }
    }

    fn run_frame(tracker: &mut StateTracker<u32>, pairs: &[[u32; 2]], parity: usize) {
        for pair in pairs {
            tracker.transition(pair[parity], Access::SHADER_READ);
            tracker.transition(pair[parity ^ 1], Access::STORAGE_WRITE);
        }
        tracker.end_frame(pairs, parity);
    }

    #[test]
    fn retracking_after_an_odd_frame_count_matches_real_layouts() {
        let pairs = [[0u32, 1], [2, 3]];
        let mut tracker = StateTracker::default();
        seed(&mut tracker, &pairs);

        let mut parity = 0;
        for _ in 0..3 {
            run_frame(&mut tracker, &pairs, parity);
            parity ^= 1;
        }
        assert_eq!(parity, 1);
        assert!(tracker.frame_boundary_holds(&pairs, 1));
        // Re-seeding slot 0 as history would now disagree with the GPU.
        assert!(!tracker.frame_boundary_holds(&pairs, 0));

        let rewind = tracker.rewind(&pairs, parity);
        assert_eq!(rewind.copies, vec![(1, 0), (3, 2)]);
        for (key, src, _) in &rewind.before_copy {
            let expected = if key % 2 == 0 { vk::ImageLayout::GENERAL } else { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL };
            assert_eq!(src.layout, expected);
        }
        assert!(tracker.frame_boundary_holds(&pairs, 0));

        // A fresh pair seeded at parity 0 agrees with the rewound ones.
        let mut retracked = StateTracker::default();
        seed(&mut retracked, &pairs);
        for key in 0..4 {
            assert_eq!(
                retracked.current(key).map(|access| access.layout),
                tracker.current(key).map(|access| access.layout)
            );
        }
    }

    #[test]
    fn rewind_is_a_no_op_at_even_parity() {
        let pairs = [[0u32, 1]];
        let mut tracker = StateTracker::default();
        seed(&mut tracker, &pairs);
        run_frame(&mut tracker, &pairs, 0);
        run_frame(&mut tracker, &pairs, 1);
        let rewind = tracker.rewind(&pairs, 0);
        assert!(rewind.before_copy.is_empty() && rewind.copies.is_empty() && rewind.after_copy.is_empty());
        assert!(tracker.frame_boundary_holds(&pairs, 0));
    }

    #[test]
    fn copy_regions_cover_every_mip() {
        let range = vk::ImageSubresourceRange {
            aspect_mask:      vk::ImageAspectFlags::DEPTH,
            base_mip_level:   0,
            level_count:      3,
            base_array_layer: 0,
            layer_count:      1,
        };
        let regions = copy_regions(vk::Extent3D { width: 8, height: 2, depth: 1 }, range);
        let extents: Vec<_> = regions.iter().map(|r| (r.extent.width, r.extent.height, r.dst_subresource.mip_level)).collect();
        assert_eq!(extents, vec![(8, 2, 0), (4, 1, 1), (2, 1, 2)]);
    }

    #[test]
    fn boundary_check_rejects_stale_slots() {
        let pairs = [[0u32, 1]];
        let mut tracker = StateTracker::default();
        tracker.track(0, Access::SHADER_READ);
        tracker.track(1, Access::SHADER_READ);
        assert!(!tracker.frame_boundary_holds(&pairs, 0));
    }
}
