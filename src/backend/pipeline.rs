// Graphics pipeline creation
//
// One render pass with a single color attachment (the swapchain image) and
// one fixed-function + vertex/fragment pipeline drawing into it. Vertices are
// generated in the vertex shader, so there is no vertex input state.

use super::commands;
use super::device::VulkanDevice;
use super::error::{Result, VkResultExt};
use super::shader;
use ash::vk;
use std::sync::Arc;

/// Layout, render pass and pipeline, destroyed together.
///
/// Viewport and scissor are dynamic state, so a resize alone never requires
/// a rebuild; only a change of swapchain format does.
pub struct PipelineBundle {
    pub pipeline: vk::Pipeline,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub format: vk::Format,
    device: Arc<VulkanDevice>,
}

impl PipelineBundle {
    /// Build render pass + pipeline for `format` images of size `extent`.
    ///
    /// The shader modules only live for the duration of this call.
    pub fn new(
        device: Arc<VulkanDevice>,
        vertex_code: &[u8],
        fragment_code: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<Self> {
        log::debug!("Create pipeline layout");
        let layout = create_pipeline_layout(&device)?;

        log::debug!("Create render pass");
        let render_pass = match create_render_pass(&device, format) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        log::debug!("Create graphics pipeline");
        let pipeline = create_shader_stages(&device, vertex_code, fragment_code).and_then(
            |(vertex, fragment)| {
                let pipeline =
                    create_graphics_pipeline(&device, render_pass, layout, extent, vertex, fragment);
                unsafe {
                    device.device.destroy_shader_module(vertex, None);
                    device.device.destroy_shader_module(fragment, None);
                }
                pipeline
            },
        );

        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.device.destroy_render_pass(render_pass, None);
                    device.device.destroy_pipeline_layout(layout, None);
                }
                return Err(e);
            }
        };

        log::info!(
            "Created graphics pipeline for {:?} {}x{}",
            format,
            extent.width,
            extent.height
        );

        Ok(Self {
            pipeline,
            render_pass,
            layout,
            format,
            device,
        })
    }

    /// True if this bundle can draw into images of `format`.
    pub fn matches(&self, format: vk::Format) -> bool {
        self.format == format
    }
}

impl Drop for PipelineBundle {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_shader_stages(
    device: &VulkanDevice,
    vertex_code: &[u8],
    fragment_code: &[u8],
) -> Result<(vk::ShaderModule, vk::ShaderModule)> {
    log::debug!("Create vertex shader module");
    let vertex = shader::create_shader_module(device, vertex_code)?;

    log::debug!("Create fragment shader module");
    match shader::create_shader_module(device, fragment_code) {
        Ok(fragment) => Ok((vertex, fragment)),
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vertex, None) };
            Err(e)
        }
    }
}

/// Empty layout: no descriptor sets, no push constants.
fn create_pipeline_layout(device: &VulkanDevice) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    unsafe { device.device.create_pipeline_layout(&layout_info, None) }.creating("pipeline layout")
}

/// Single color attachment: cleared on load, stored, handed to present.
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait until the acquire semaphore wait,
    // which happens at COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }.creating("render pass")
}

fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Initial values only; the real ones are set per frame
    let (viewport, scissor) = commands::full_viewport(extent);

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Opaque: blending off, every channel written
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(color_blend_attachments)
        .blend_constants([0.0; 4]);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| e)
    .creating("graphics pipeline")?;

    Ok(pipelines[0])
}
