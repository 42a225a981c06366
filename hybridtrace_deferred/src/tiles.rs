use std::ffi::c_void;

use erupt::vk;
use hybridtrace_vk::{Access, AllocatedBuffer, BarrierRecorder, RenderContext, VkError, VulkanContext};

pub const TILE_SIZE: u32 = 8;

/// Dispatch arguments the classifiers start from; `x` counts appended tiles.
const EMPTY_DISPATCH: [u32; 3] = [0, 1, 1];

/// Tile origin in tiles, as the shaders append it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileCoord {
    pub x: i16,
    pub y: i16,
}

pub fn tile_count(extent: vk::Extent2D) -> u32 {
    let (x, y) = hybridtrace_vk::command::dispatch_size(extent, TILE_SIZE, TILE_SIZE);
    x * y
}

/// Splits every tile of `extent` into the list the denoiser filters and the
/// list it passes through, the way the reprojection shaders do.
pub fn classify_tiles(
    extent: vk::Extent2D,
    mut needs_denoise: impl FnMut(TileCoord) -> bool,
) -> (Vec<TileCoord>, Vec<TileCoord>) {
    let (tiles_x, tiles_y) = hybridtrace_vk::command::dispatch_size(extent, TILE_SIZE, TILE_SIZE);
    let mut denoise = Vec::new();
    let mut copy = Vec::new();
    for y in 0..tiles_y {
        for x in 0..tiles_x {
            let tile = TileCoord { x: x as i16, y: y as i16 };
            if needs_denoise(tile) {
                denoise.push(tile);
            } else {
                copy.push(tile);
            }
        }
    }
    (denoise, copy)
}

/// One append-only tile list and the indirect arguments counting it.
pub struct TileList {
    pub tiles: AllocatedBuffer<TileCoord>,
    pub args:  AllocatedBuffer<vk::DispatchIndirectCommand>,
}

impl TileList {
    pub fn new(vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<Self, VkError> {
        let tiles = AllocatedBuffer::storage(
            vk_ctx.clone(),
            tile_count(extent) as usize,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        )?;
        let args = AllocatedBuffer::storage(
            vk_ctx,
            1,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | vk::BufferUsageFlags::INDIRECT_BUFFER,
        )?;
        Ok(Self { tiles, args })
    }

    pub fn tiles_address(&self) -> u64 {
        self.tiles.device_address.unwrap_or_default()
    }

    pub fn args_address(&self) -> u64 {
        self.args.device_address.unwrap_or_default()
    }

    pub fn destroy(&self) {
        self.tiles.destroy();
        self.args.destroy();
    }
}

/// Denoise and copy tile lists filled by a reprojection pass.
pub struct TileLists {
    pub denoise: TileList,
    pub copy:    TileList,
}

impl TileLists {
    pub fn new(vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<Self, VkError> {
        Ok(Self { denoise: TileList::new(vk_ctx.clone(), extent)?, copy: TileList::new(vk_ctx, extent)? })
    }

    pub fn lists(&self) -> [&TileList; 2] {
        [&self.denoise, &self.copy]
    }

    /// Zeroes both counters ahead of classification.
    pub fn reset(&self, ctx: &RenderContext, recorder: &mut BarrierRecorder) {
        for list in self.lists() {
            recorder.buffer(&list.args, Access::TRANSFER_DST);
        }
        recorder.flush(ctx.device, ctx.command_buffer);
        for list in self.lists() {
            unsafe {
                ctx.device.cmd_update_buffer(
                    ctx.command_buffer,
                    list.args.buffer,
                    0,
                    std::mem::size_of_val(&EMPTY_DISPATCH) as vk::DeviceSize,
                    EMPTY_DISPATCH.as_ptr() as *const c_void,
                );
            }
        }
    }

    /// State the classifying shader needs: counters updated atomically, lists appended to.
    pub fn begin_classify(&self, recorder: &mut BarrierRecorder) {
        for list in self.lists() {
            recorder.buffer(&list.args, Access::STORAGE_READ_WRITE).buffer(&list.tiles, Access::STORAGE_WRITE);
        }
    }

    /// State the indirect dispatches need.
    pub fn begin_consume(&self, recorder: &mut BarrierRecorder) {
        for list in self.lists() {
            recorder.buffer(&list.args, Access::INDIRECT_ARGS).buffer(&list.tiles, Access::STORAGE_READ);
        }
    }

    pub fn destroy(&self) {
        self.denoise.destroy();
        self.copy.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_count_rounds_partial_tiles_up() {
        assert_eq!(tile_count(vk::Extent2D { width: 1920, height: 1080 }), 240 * 135);
        assert_eq!(tile_count(vk::Extent2D { width: 960, height: 540 }), 120 * 68);
        assert_eq!(tile_count(vk::Extent2D { width: 1, height: 1 }), 1);
    }

    #[test]
    fn classified_tiles_cover_the_image_exactly_once() {
        let extent = vk::Extent2D { width: 641, height: 359 };
        let (denoise, copy) = classify_tiles(extent, |tile| (tile.x + tile.y) % 3 == 0);
        assert_eq!((denoise.len() + copy.len()) as u32, tile_count(extent));
        assert!(denoise.iter().all(|t| !copy.contains(t)));
    }

    #[test]
    fn tile_coordinates_are_two_packed_shorts() {
        assert_eq!(std::mem::size_of::<TileCoord>(), 4);
        assert_eq!(std::mem::size_of_val(&EMPTY_DISPATCH), 12);
    }
}
