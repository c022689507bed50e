// Per-frame state machine
//
// WaitFence -> Acquire -> Reset -> Record -> Submit -> Present -> advance,
// with Acquire/Present able to divert into swapchain recreation.
//
// The loop only talks to the GPU through FrameBackend, so the ordering
// rules (fence before reuse, new swapchain before old resources go away)
// can be checked against a mock.

use crate::backend::error::Result;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::window::WindowHost;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented.
    Presented,
    /// The swapchain was rebuilt; the frame may have been dropped.
    Recreated,
    /// The window is minimized. No GPU work was issued.
    Suspended,
}

/// Which frame slot the next tick uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    frame_number: usize,
    frames_in_flight: usize,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frame_number: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.frame_number
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn advance(&mut self) {
        self.frame_number = (self.frame_number + 1) % self.frames_in_flight;
    }

    /// Back to slot 0 with a (possibly) new number of frames.
    pub fn reset(&mut self, frames_in_flight: usize) {
        *self = Self::new(frames_in_flight);
    }
}

/// GPU-side operations the frame loop drives. Slots index frames in flight.
pub trait FrameBackend {
    /// Block until the slot's previous submission has completed.
    fn wait_for_fence(&mut self, slot: usize) -> Result<()>;
    /// Acquire the next image, signalling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    /// Reset the slot's fence and command buffer.
    fn reset_frame(&mut self, slot: usize) -> Result<()>;
    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn wait_idle(&mut self) -> Result<()>;

    /// Build a new swapchain from the current one. The current one is kept
    /// alive as retired until `destroy_retired_swapchain`.
    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<()>;
    fn destroy_frame_resources(&mut self);
    fn destroy_retired_swapchain(&mut self);
    /// True if the pipeline can render into the current swapchain's format.
    fn pipeline_matches_swapchain(&self) -> bool;
    fn rebuild_pipeline(&mut self) -> Result<()>;
    /// Build frame resources for the current swapchain, returning how many.
    fn create_frame_resources(&mut self) -> Result<usize>;
    fn destroy_swapchain(&mut self);
}

#[derive(Debug)]
pub struct FrameLoop {
    cursor: FrameCursor,
    recreate_pending: bool,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            cursor: FrameCursor::new(frames_in_flight),
            recreate_pending: false,
        }
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Rebuild the swapchain at the start of the next tick.
    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    /// Run one tick.
    pub fn draw<B, W>(&mut self, backend: &mut B, window: &W) -> Result<FrameStatus>
    where
        B: FrameBackend + ?Sized,
        W: WindowHost + ?Sized,
    {
        if self.recreate_pending && self.recreate(backend, window)? == FrameStatus::Suspended {
            return Ok(FrameStatus::Suspended);
        }

        let slot = self.cursor.current();

        backend.wait_for_fence(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                // Still usable; rebuild once this frame is out
                if suboptimal {
                    self.recreate_pending = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                return self.recreate(backend, window);
            }
        };

        // Only reset once we know something will be submitted against it
        backend.reset_frame(slot)?;
        backend.record_commands(slot, image_index)?;
        backend.submit(slot)?;

        let presented = backend.present(slot, image_index)?;
        self.cursor.advance();

        match presented {
            PresentOutcome::Presented if !self.recreate_pending => Ok(FrameStatus::Presented),
            PresentOutcome::Presented | PresentOutcome::NeedsRecreate => {
                log::debug!("Swapchain needs recreation after present");
                self.recreate(backend, window)
            }
        }
    }

    fn recreate<B, W>(&mut self, backend: &mut B, window: &W) -> Result<FrameStatus>
    where
        B: FrameBackend + ?Sized,
        W: WindowHost + ?Sized,
    {
        if window.is_minimized() {
            self.recreate_pending = true;
            return Ok(FrameStatus::Suspended);
        }

        let size = window.framebuffer_size();
        backend.wait_idle()?;
        // The old chain stays alive until its replacement exists
        backend.create_swapchain(size.x, size.y)?;
        backend.destroy_frame_resources();
        backend.destroy_retired_swapchain();
        // Viewport and scissor are dynamic, so only a format change matters
        if !backend.pipeline_matches_swapchain() {
            log::debug!("Swapchain format changed, rebuilding pipeline");
            backend.rebuild_pipeline()?;
        }
        let frames = backend.create_frame_resources()?;

        self.cursor.reset(frames);
        self.recreate_pending = false;

        log::info!("Recreated swapchain: {}x{}, {} frames", size.x, size.y, frames);

        Ok(FrameStatus::Recreated)
    }
}

/// Release swapchain-dependent resources, then the swapchain itself.
pub fn teardown<B: FrameBackend + ?Sized>(backend: &mut B) -> Result<()> {
    backend.wait_idle()?;
    backend.destroy_frame_resources();
    backend.destroy_swapchain();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fence {
        Signaled,
        Unsignaled,
        Pending,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        CreateSwapchain(u32, u32),
        DestroyFrames,
        DestroyRetired,
        RebuildPipeline,
        CreateFrames(usize),
        DestroySwapchain,
    }

    /// Pretend GPU: submissions complete when their fence is waited on.
    struct MockGpu {
        calls: Vec<Call>,
        fences: Vec<Fence>,
        image_count: usize,
        next_image: u32,
        acquires: usize,
        presents: usize,
        out_of_date_acquires: HashSet<usize>,
        suboptimal_acquires: HashSet<usize>,
        suboptimal_presents: HashSet<usize>,
        /// Format the next swapchain is created with
        surface_format: u32,
        swapchain_format: u32,
        pipeline_format: u32,
        has_retired: bool,
        has_swapchain: bool,
        has_frames: bool,
    }

    impl MockGpu {
        fn new(image_count: usize) -> Self {
            Self {
                calls: Vec::new(),
                fences: vec![Fence::Signaled; image_count],
                image_count,
                next_image: 0,
                acquires: 0,
                presents: 0,
                out_of_date_acquires: HashSet::new(),
                suboptimal_acquires: HashSet::new(),
                suboptimal_presents: HashSet::new(),
                surface_format: 44,
                swapchain_format: 44,
                pipeline_format: 44,
                has_retired: false,
                has_swapchain: true,
                has_frames: true,
            }
        }

        fn submits(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, Call::Submit(_))).count()
        }

        fn position(&self, call: &Call) -> usize {
            self.calls
                .iter()
                .position(|c| c == call)
                .unwrap_or_else(|| panic!("{call:?} never happened"))
        }
    }

    impl FrameBackend for MockGpu {
        fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            match self.fences[slot] {
                Fence::Unsignaled => panic!("slot {slot} waits on a fence nothing will signal"),
                _ => self.fences[slot] = Fence::Signaled,
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            self.acquires += 1;
            if self.out_of_date_acquires.contains(&self.acquires) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal: self.suboptimal_acquires.contains(&self.acquires),
            })
        }

        fn reset_frame(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert_eq!(self.fences[slot], Fence::Signaled, "slot {slot} reset while in use");
            self.fences[slot] = Fence::Unsignaled;
            Ok(())
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert_ne!(self.fences[slot], Fence::Pending, "slot {slot} re-recorded while in flight");
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            assert_eq!(self.fences[slot], Fence::Unsignaled);
            self.fences[slot] = Fence::Pending;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            self.presents += 1;
            if self.suboptimal_presents.contains(&self.presents) {
                Ok(PresentOutcome::NeedsRecreate)
            } else {
                Ok(PresentOutcome::Presented)
            }
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            for fence in &mut self.fences {
                if *fence == Fence::Pending {
                    *fence = Fence::Signaled;
                }
            }
            Ok(())
        }

        fn create_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
            self.calls.push(Call::CreateSwapchain(width, height));
            assert!(self.has_swapchain, "old swapchain destroyed before its replacement");
            self.has_retired = true;
            self.swapchain_format = self.surface_format;
            Ok(())
        }

        fn destroy_frame_resources(&mut self) {
            self.calls.push(Call::DestroyFrames);
            assert!(
                self.fences.iter().all(|f| *f != Fence::Pending),
                "frame resources destroyed while in flight"
            );
            self.has_frames = false;
        }

        fn destroy_retired_swapchain(&mut self) {
            self.calls.push(Call::DestroyRetired);
            assert!(!self.has_frames, "retired swapchain destroyed before its frames");
            self.has_retired = false;
        }

        fn pipeline_matches_swapchain(&self) -> bool {
            self.pipeline_format == self.swapchain_format
        }

        fn rebuild_pipeline(&mut self) -> Result<()> {
            self.calls.push(Call::RebuildPipeline);
            assert!(!self.has_frames, "pipeline rebuilt under live frames");
            self.pipeline_format = self.swapchain_format;
            Ok(())
        }

        fn create_frame_resources(&mut self) -> Result<usize> {
            self.calls.push(Call::CreateFrames(self.image_count));
            assert!(!self.has_retired, "retired swapchain outlived the rebuild");
            assert_eq!(self.pipeline_format, self.swapchain_format, "frames built on a stale pipeline");
            self.fences = vec![Fence::Signaled; self.image_count];
            self.next_image = 0;
            self.has_frames = true;
            Ok(self.image_count)
        }

        fn destroy_swapchain(&mut self) {
            self.calls.push(Call::DestroySwapchain);
            assert!(!self.has_frames, "swapchain destroyed before its frames");
            self.has_swapchain = false;
        }
    }

    struct TestWindow {
        size: Cell<UVec2>,
    }

    impl TestWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: Cell::new(UVec2::new(width, height)),
            }
        }
    }

    impl WindowHost for TestWindow {
        fn framebuffer_size(&self) -> UVec2 {
            self.size.get()
        }
    }

    #[test]
    fn cursor_wraps_around() {
        let mut cursor = FrameCursor::new(3);
        let seen: Vec<_> = (0..7)
            .map(|_| {
                let slot = cursor.current();
                cursor.advance();
                slot
            })
            .collect();
        assert_eq!(seen, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn cursor_never_has_zero_frames() {
        let mut cursor = FrameCursor::new(0);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
        assert_eq!(cursor.frames_in_flight(), 1);
    }

    #[test]
    fn frame_number_is_render_count_mod_frames() {
        let mut gpu = MockGpu::new(3);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(3);

        for n in 1..=10 {
            assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Presented);
            assert_eq!(frame_loop.cursor().current(), n % 3);
        }
        assert_eq!(gpu.submits(), 10);
    }

    #[test]
    fn steps_run_in_order() {
        let mut gpu = MockGpu::new(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(2);

        frame_loop.draw(&mut gpu, &window).unwrap();

        assert_eq!(
            gpu.calls,
            [
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn out_of_date_on_second_frame_recreates_without_submitting() {
        let mut gpu = MockGpu::new(3);
        gpu.out_of_date_acquires.insert(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(3);

        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Presented);
        assert_eq!(frame_loop.cursor().current(), 1);
        let submits_before = gpu.submits();

        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Recreated);

        assert_eq!(gpu.submits(), submits_before);
        assert_eq!(frame_loop.cursor().current(), 0);
        assert!(!gpu.calls.contains(&Call::Reset(1)), "fence reset without a submit");
        assert!(gpu.calls.contains(&Call::CreateSwapchain(800, 600)));
    }

    #[test]
    fn fences_guard_reuse_across_many_frames() {
        // The mock panics if a slot is reset or recorded while in flight
        let mut gpu = MockGpu::new(2);
        gpu.out_of_date_acquires.extend([4, 9]);
        gpu.suboptimal_presents.insert(6);
        let window = TestWindow::new(1280, 720);
        let mut frame_loop = FrameLoop::new(2);

        for _ in 0..20 {
            frame_loop.draw(&mut gpu, &window).unwrap();
        }

        for (i, call) in gpu.calls.iter().enumerate() {
            if let Call::Reset(slot) = call {
                assert_eq!(gpu.calls[i - 2], Call::Wait(*slot));
            }
        }
    }

    #[test]
    fn recreation_builds_new_swapchain_before_destroying_old() {
        let mut gpu = MockGpu::new(3);
        let window = TestWindow::new(1024, 768);
        let mut frame_loop = FrameLoop::new(3);

        frame_loop.draw(&mut gpu, &window).unwrap();
        frame_loop.request_recreate();
        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Presented);

        let idle = gpu.position(&Call::WaitIdle);
        let create = gpu.position(&Call::CreateSwapchain(1024, 768));
        let destroy_frames = gpu.position(&Call::DestroyFrames);
        let destroy_retired = gpu.position(&Call::DestroyRetired);
        let create_frames = gpu.position(&Call::CreateFrames(3));

        assert!(idle < create);
        assert!(create < destroy_frames);
        assert!(destroy_frames < destroy_retired);
        assert!(destroy_retired < create_frames);
        assert!(!frame_loop.is_recreate_pending());
        // Drew on the fresh frames right after rebuilding
        assert_eq!(frame_loop.cursor().current(), 1);
    }

    #[test]
    fn suboptimal_present_resets_cursor() {
        let mut gpu = MockGpu::new(3);
        gpu.suboptimal_presents.insert(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(3);

        frame_loop.draw(&mut gpu, &window).unwrap();
        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Recreated);

        assert_eq!(frame_loop.cursor().current(), 0);
        // The frame itself still went out
        assert_eq!(gpu.submits(), 2);
    }

    #[test]
    fn suboptimal_acquire_draws_then_recreates() {
        let mut gpu = MockGpu::new(3);
        gpu.suboptimal_acquires.insert(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(3);

        frame_loop.draw(&mut gpu, &window).unwrap();
        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Recreated);

        // The acquired image was still rendered and presented
        assert_eq!(gpu.submits(), 2);
        assert!(gpu.calls.contains(&Call::Present(1, 1)));
        assert!(gpu.position(&Call::Present(1, 1)) < gpu.position(&Call::WaitIdle));
        assert_eq!(frame_loop.cursor().current(), 0);
        assert!(!frame_loop.is_recreate_pending());
    }

    #[test]
    fn resize_keeps_pipeline_when_format_is_unchanged() {
        let mut gpu = MockGpu::new(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(2);

        frame_loop.draw(&mut gpu, &window).unwrap();
        window.size.set(UVec2::new(1920, 1080));
        frame_loop.request_recreate();
        frame_loop.draw(&mut gpu, &window).unwrap();

        assert!(gpu.calls.contains(&Call::CreateSwapchain(1920, 1080)));
        assert!(!gpu.calls.contains(&Call::RebuildPipeline));
    }

    #[test]
    fn format_change_rebuilds_pipeline_before_frames() {
        let mut gpu = MockGpu::new(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(2);

        frame_loop.draw(&mut gpu, &window).unwrap();
        gpu.surface_format = 50;
        frame_loop.request_recreate();
        frame_loop.draw(&mut gpu, &window).unwrap();

        let rebuild = gpu.position(&Call::RebuildPipeline);
        assert!(gpu.position(&Call::DestroyRetired) < rebuild);
        assert!(rebuild < gpu.position(&Call::CreateFrames(2)));
    }

    #[test]
    fn minimized_window_suspends_until_restored() {
        let mut gpu = MockGpu::new(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(2);

        frame_loop.draw(&mut gpu, &window).unwrap();

        window.size.set(UVec2::new(0, 0));
        frame_loop.request_recreate();
        let calls_before = gpu.calls.len();

        for _ in 0..5 {
            assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Suspended);
        }
        assert_eq!(gpu.calls.len(), calls_before, "GPU work issued while minimized");
        assert!(frame_loop.is_recreate_pending());

        window.size.set(UVec2::new(640, 480));
        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Presented);
        assert!(gpu.calls.contains(&Call::CreateSwapchain(640, 480)));
        assert!(!frame_loop.is_recreate_pending());
    }

    #[test]
    fn out_of_date_while_minimized_stays_pending() {
        let mut gpu = MockGpu::new(2);
        gpu.out_of_date_acquires.insert(1);
        let window = TestWindow::new(0, 0);
        let mut frame_loop = FrameLoop::new(2);

        assert_eq!(frame_loop.draw(&mut gpu, &window).unwrap(), FrameStatus::Suspended);
        assert!(frame_loop.is_recreate_pending());
        assert_eq!(gpu.submits(), 0);
    }

    #[test]
    fn teardown_destroys_frames_before_swapchain() {
        let mut gpu = MockGpu::new(2);
        let window = TestWindow::new(800, 600);
        let mut frame_loop = FrameLoop::new(2);
        frame_loop.draw(&mut gpu, &window).unwrap();

        teardown(&mut gpu).unwrap();

        let tail = &gpu.calls[gpu.calls.len() - 3..];
        assert_eq!(tail, [Call::WaitIdle, Call::DestroyFrames, Call::DestroySwapchain]);
    }
}
