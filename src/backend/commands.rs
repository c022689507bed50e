// Command pool, command buffers and triangle recording

use super::device::VulkanDevice;
use super::error::{Result, VkResultExt};
use ash::vk;

/// Pool bound to the graphics family; buffers are reset individually each frame.
pub fn create_command_pool(device: &VulkanDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_families.graphics)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.device.create_command_pool(&pool_info, None) }.creating("command pool")
}

/// Allocate `count` primary command buffers from `pool`.
pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }.creating("command buffers")
}

/// Everything one frame's command buffer needs to draw.
#[derive(Debug, Clone, Copy)]
pub struct TriangleDraw {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_count: u32,
}

/// Re-record `cmd` with a single render pass that clears and draws.
///
/// The buffer must be in the initial state (freshly allocated or reset).
pub fn record_triangle(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    draw: &TriangleDraw,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder();
    unsafe { device.begin_command_buffer(cmd, &begin_info) }.during("vkBeginCommandBuffer")?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: draw.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(draw.render_pass)
        .framebuffer(draw.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: draw.extent,
        })
        .clear_values(&clear_values);

    let (viewport, scissor) = full_viewport(draw.extent);

    unsafe {
        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
        // Vertices come from gl_VertexIndex, nothing is bound
        device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
    }

    unsafe { device.end_command_buffer(cmd) }.during("vkEndCommandBuffer")
}

/// Viewport and scissor covering the whole of `extent`.
pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_the_extent() {
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        let (viewport, scissor) = full_viewport(extent);

        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1920.0, 1080.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }
}
