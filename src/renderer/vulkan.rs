// Vulkan renderer
//
// Owns the whole GPU side: instance, surface, device, swapchain, pipeline
// and per-frame resources, and drives them through the frame loop.
//
// IMPORTANT: field order in VulkanBackend is the destruction order.

use super::frame_loop::{self, FrameBackend, FrameLoop, FrameStatus};
use super::{Renderer, RendererSettings};
use crate::backend::commands::{self, TriangleDraw};
use crate::backend::error::{RenderError, Result, VkResultExt};
use crate::backend::frames::Frame;
use crate::backend::swapchain::{describe_present_mode, AcquireOutcome, PresentOutcome};
use crate::backend::{
    shader, FrameResources, InstanceContext, PipelineBundle, Surface, Swapchain, VulkanDevice,
};
use crate::window::{NativeWindow, WindowHost};
use ash::vk;
use std::sync::Arc;

pub struct VulkanRenderer {
    frame_loop: FrameLoop,
    backend: VulkanBackend,
}

/// GPU objects the frame loop operates on.
pub struct VulkanBackend {
    settings: RendererSettings,
    vertex_code: Vec<u8>,
    fragment_code: Vec<u8>,
    frames: Option<FrameResources>,
    swapchain: Option<Swapchain>,
    /// Previous swapchain, alive between its replacement and the frame rebuild
    retired_swapchain: Option<Swapchain>,
    pipeline: PipelineBundle,
    device: Arc<VulkanDevice>,
    surface: Surface,
    // Must be last: every handle above was created from it
    _instance: InstanceContext,
}

impl VulkanRenderer {
    pub fn device(&self) -> &VulkanDevice {
        &self.backend.device
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_loop.cursor().frames_in_flight()
    }
}

impl Renderer for VulkanRenderer {
    fn init<W: NativeWindow + ?Sized>(settings: RendererSettings, window: &W) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let instance =
            InstanceContext::new(&settings.app_name, settings.debug, window.raw_display_handle())?;
        let surface = Surface::new(&instance, window)?;
        let device =
            VulkanDevice::select(&instance, &surface, settings.debug, &settings.device_priority)?;

        let size = window.framebuffer_size();
        let swapchain =
            Swapchain::new(device.clone(), &surface, size.x, size.y, None, settings.debug)?;

        let vertex_code = shader::read_shader_file(&settings.vertex_shader)?;
        let fragment_code = shader::read_shader_file(&settings.fragment_shader)?;
        let pipeline = PipelineBundle::new(
            device.clone(),
            &vertex_code,
            &fragment_code,
            swapchain.extent,
            swapchain.format,
        )?;

        let frames = FrameResources::new(device.clone(), &swapchain, pipeline.render_pass)?;
        let frame_loop = FrameLoop::new(frames.count());

        log::info!(
            "Vulkan initialized on {} ({}), present mode {}",
            device.name,
            device.kind.label(),
            describe_present_mode(swapchain.present_mode)
        );

        Ok(Self {
            frame_loop,
            backend: VulkanBackend {
                settings,
                vertex_code,
                fragment_code,
                frames: Some(frames),
                swapchain: Some(swapchain),
                retired_swapchain: None,
                pipeline,
                device,
                surface,
                _instance: instance,
            },
        })
    }

    fn render<W: WindowHost + ?Sized>(&mut self, window: &W) -> Result<FrameStatus> {
        self.frame_loop.draw(&mut self.backend, window)
    }

    fn request_resize(&mut self) {
        self.frame_loop.request_recreate();
    }

    fn wait_idle(&self) -> Result<()> {
        self.backend.device.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Fields drop afterwards in declaration order either way
        if let Err(e) = frame_loop::teardown(&mut self.backend) {
            log::error!("Device did not go idle before teardown: {}", e);
        }
        log::info!("Cleanup complete");
    }
}

impl VulkanBackend {
    fn frames(&self) -> Result<&FrameResources> {
        self.frames.as_ref().ok_or(RenderError::MissingResource("frame resources"))
    }

    fn frame(&self, slot: usize) -> Result<&Frame> {
        self.frames()?
            .frames
            .get(slot)
            .ok_or(RenderError::MissingResource("frame slot"))
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().ok_or(RenderError::MissingResource("swapchain"))
    }
}

impl FrameBackend for VulkanBackend {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        self.frame(slot)?.sync.wait(&self.device.device)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frame(slot)?.sync.image_available;
        self.swapchain()?.acquire_next_image(u64::MAX, semaphore)
    }

    fn reset_frame(&mut self, slot: usize) -> Result<()> {
        let frame = self.frame(slot)?;
        frame.sync.reset(&self.device.device)?;
        unsafe {
            self.device
                .device
                .reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .during("vkResetCommandBuffer")
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let command_buffer = self.frame(slot)?.command_buffer;
        let framebuffer = self.frame(image_index as usize)?.framebuffer;

        let draw = TriangleDraw {
            render_pass: self.pipeline.render_pass,
            framebuffer,
            pipeline: self.pipeline.pipeline,
            extent: self.swapchain()?.extent,
            clear_color: self.settings.clear_color,
            vertex_count: self.settings.vertex_count,
        };

        commands::record_triangle(&self.device.device, command_buffer, &draw)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.frame(slot)?;

        let wait_semaphores = [frame.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.sync.in_flight_fence,
            )
        }
        .during("vkQueueSubmit")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.frame(slot)?.sync.render_finished;
        self.swapchain()?
            .present(self.device.present_queue, image_index, &[render_finished])
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        let old = self.swapchain.take();
        let created = Swapchain::new(
            self.device.clone(),
            &self.surface,
            width,
            height,
            old.as_ref().map(|s| s.swapchain),
            self.settings.debug,
        );

        match created {
            Ok(swapchain) => {
                self.swapchain = Some(swapchain);
                self.retired_swapchain = old;
                Ok(())
            }
            Err(e) => {
                self.swapchain = old;
                Err(e)
            }
        }
    }

    fn destroy_frame_resources(&mut self) {
        self.frames = None;
    }

    fn destroy_retired_swapchain(&mut self) {
        self.retired_swapchain = None;
    }

    fn pipeline_matches_swapchain(&self) -> bool {
        self.swapchain
            .as_ref()
            .map_or(true, |swapchain| self.pipeline.matches(swapchain.format))
    }

    fn rebuild_pipeline(&mut self) -> Result<()> {
        let swapchain = self.swapchain()?;
        let pipeline = PipelineBundle::new(
            self.device.clone(),
            &self.vertex_code,
            &self.fragment_code,
            swapchain.extent,
            swapchain.format,
        )?;
        self.pipeline = pipeline;
        Ok(())
    }

    fn create_frame_resources(&mut self) -> Result<usize> {
        let swapchain = self.swapchain.as_ref().ok_or(RenderError::MissingResource("swapchain"))?;

        let frames = FrameResources::new(self.device.clone(), swapchain, self.pipeline.render_pass)?;
        let count = frames.count();
        self.frames = Some(frames);
        Ok(count)
    }

    fn destroy_swapchain(&mut self) {
        self.retired_swapchain = None;
        self.swapchain = None;
    }
}
