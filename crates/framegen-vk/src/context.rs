//! Per-swapchain frame generation pipeline.
//!
//! Every application present becomes `frame_gen_count + 1` presents: the
//! generated frames in order, then the original. All ordering between the
//! steps is expressed with semaphores on the GPU. The one CPU wait is the
//! swapchain acquire per generated frame, plus a fence wait when the ring of
//! in-flight slots wraps around before the GPU finished with a slot.

use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;
use framegen_core::ring::FrameRing;
use tracing::{debug, warn};

use crate::copy;
use crate::device::{DeviceDispatch, DeviceState};
use crate::error::{FrameGenError, Result};
use crate::generator::{FrameGenerator, GeneratorContext};
use crate::mini::{CommandBuffer, CommandPool, Fence, Image, Semaphore};

/// Format shared with the generator for history and output images.
pub const SHARED_IMAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

fn shared_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::STORAGE
}

/// Transient objects of one present cycle. Kept alive until the ring comes
/// back around to the slot.
struct RenderPassSlot {
    retire: Fence,
    /// Set once `retire` was handed to a submission.
    fence_armed: bool,
    /// Set once anything of this cycle reached the queue.
    submitted: bool,
    pre_copy: Option<CommandBuffer>,
    /// `[exported to the generator, chained to the next present]`
    pre_copy_semaphores: Vec<Semaphore>,
    pre_copy_submitted: bool,
    render_semaphores: Vec<Semaphore>,
    acquire_semaphores: Vec<Semaphore>,
    post_copies: Vec<CommandBuffer>,
    post_copy_semaphores: Vec<Semaphore>,
    prev_post_copy_semaphores: Vec<Semaphore>,
}

impl RenderPassSlot {
    fn new(dispatch: &Arc<DeviceDispatch>, frame_gen_count: usize) -> Result<Self> {
        Ok(Self {
            retire: Fence::new(dispatch)?,
            fence_armed: false,
            submitted: false,
            pre_copy: None,
            pre_copy_semaphores: Vec::with_capacity(2),
            pre_copy_submitted: false,
            render_semaphores: Vec::with_capacity(frame_gen_count),
            acquire_semaphores: Vec::with_capacity(frame_gen_count),
            post_copies: Vec::with_capacity(frame_gen_count),
            post_copy_semaphores: Vec::with_capacity(frame_gen_count),
            prev_post_copy_semaphores: Vec::with_capacity(frame_gen_count),
        })
    }

    /// Semaphore the next present's capture waits on, if it will be signaled.
    fn chain_semaphore(&self) -> Option<vk::Semaphore> {
        if !self.pre_copy_submitted {
            return None;
        }
        self.pre_copy_semaphores.get(1).map(Semaphore::handle)
    }

    /// True if the GPU may still be using this slot.
    fn in_flight(&self) -> Result<bool> {
        if self.fence_armed {
            Ok(!self.retire.is_signaled()?)
        } else {
            Ok(self.submitted)
        }
    }

    fn wait_retired(&self, dispatch: &DeviceDispatch, queue: vk::Queue) -> Result<()> {
        if self.fence_armed {
            self.retire.wait(u64::MAX)
        } else {
            // A cycle that failed part way never armed its fence.
            unsafe { dispatch.device().queue_wait_idle(queue) }
                .map_err(FrameGenError::vulkan("wait for queue idle"))
        }
    }
}

pub struct SurfaceState {
    dispatch: Arc<DeviceDispatch>,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    frame_gen_count: usize,
    context: Arc<GeneratorContext>,
    pool: Arc<CommandPool>,
    ring: FrameRing<RenderPassSlot>,
    // Declared last so they outlive every recorded copy.
    history: [Image; 2],
    outputs: Vec<Image>,
}

impl SurfaceState {
    /// Create the shared images and the generator context for a swapchain.
    pub fn new(
        device: &DeviceState,
        generator: Arc<dyn FrameGenerator>,
        swapchain: vk::SwapchainKHR,
        extent: vk::Extent2D,
        images: Vec<vk::Image>,
    ) -> Result<Self> {
        let dispatch = &device.dispatch;
        let frame_gen_count = device.frame_gen_count.max(1);

        let (history0, history0_fd) =
            Image::exported(dispatch, extent, SHARED_IMAGE_FORMAT, shared_image_usage())?;
        let (history1, history1_fd) =
            Image::exported(dispatch, extent, SHARED_IMAGE_FORMAT, shared_image_usage())?;

        let mut outputs = Vec::with_capacity(frame_gen_count);
        let mut output_fds = Vec::with_capacity(frame_gen_count);
        for _ in 0..frame_gen_count {
            let (image, fd) =
                Image::exported(dispatch, extent, SHARED_IMAGE_FORMAT, shared_image_usage())?;
            outputs.push(image);
            output_fds.push(fd);
        }

        let context =
            GeneratorContext::create(generator, extent, [history0_fd, history1_fd], output_fds)?;
        let pool = Arc::new(CommandPool::new(dispatch, device.queue_family_index)?);

        debug!(
            "surface state for swapchain {:?}: {}x{}, {} images, {} generated frames",
            swapchain,
            extent.width,
            extent.height,
            images.len(),
            frame_gen_count
        );

        Ok(Self {
            dispatch: Arc::clone(dispatch),
            queue: device.queue,
            swapchain,
            extent,
            images,
            frame_gen_count,
            context,
            pool,
            ring: FrameRing::new(),
            history: [history0, history1],
            outputs,
        })
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn frame_gen_count(&self) -> usize {
        self.frame_gen_count
    }

    /// Number of application presents handled so far.
    pub fn frame(&self) -> u64 {
        self.ring.frame()
    }

    /// Times a ring slot had to be waited on before reuse.
    pub fn ring_stalls(&self) -> u64 {
        self.ring.stalls()
    }

    pub fn context(&self) -> &Arc<GeneratorContext> {
        &self.context
    }

    pub fn history_image(&self, index: usize) -> vk::Image {
        self.history[index % 2].handle()
    }

    pub fn output_image(&self, index: usize) -> Option<vk::Image> {
        self.outputs.get(index).map(Image::handle)
    }

    /// Present `image_index` preceded by the generated frames.
    ///
    /// `queue` is the application's present queue, `p_next` the extension
    /// chain of its present info. Returns true if any present or acquire
    /// reported the swapchain as suboptimal.
    pub fn present(
        &mut self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
        p_next: *const c_void,
    ) -> Result<bool> {
        self.retire_current_slot()?;

        let mut slot = RenderPassSlot::new(&self.dispatch, self.frame_gen_count)?;
        let result = self.run_cycle(&mut slot, queue, wait_semaphores, image_index, p_next);
        if slot.submitted {
            self.ring.commit(slot);
        } else {
            // Nothing reached the GPU; the next present reuses this frame index.
            drop(slot);
        }
        result
    }

    fn retire_current_slot(&mut self) -> Result<()> {
        let Some(old) = self.ring.take_current() else {
            return Ok(());
        };
        if old.in_flight()? {
            self.ring.record_stall();
            warn!(
                "present slot {} still in flight after {} frames, waiting (stall #{})",
                self.ring.current_index(),
                framegen_core::ring::RING_DEPTH,
                self.ring.stalls()
            );
            old.wait_retired(&self.dispatch, self.queue)?;
        }
        Ok(())
    }

    fn run_cycle(
        &self,
        slot: &mut RenderPassSlot,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
        p_next: *const c_void,
    ) -> Result<bool> {
        let swapchain_loader = self.dispatch.swapchain();
        let source = *self
            .images
            .get(image_index as usize)
            .ok_or(FrameGenError::Logic("present image index out of range"))?;

        // 1. capture the rendered frame into the history image
        let (exported, input_fd) = Semaphore::exported(&self.dispatch)?;
        slot.pre_copy_semaphores.push(exported);
        slot.pre_copy_semaphores.push(Semaphore::new(&self.dispatch)?);

        let mut pre_copy = CommandBuffer::new(&self.pool)?;
        pre_copy.begin()?;
        unsafe {
            copy::record_capture(
                pre_copy.device(),
                pre_copy.handle(),
                source,
                self.history[self.ring.history_index()].handle(),
                self.extent,
            );
        }
        pre_copy.end()?;

        // 2. submit it after the application's rendering and the previous capture
        let mut waits = wait_semaphores.to_vec();
        if let Some(previous) = self.ring.previous().and_then(RenderPassSlot::chain_semaphore) {
            waits.push(previous);
        }
        let signals: Vec<vk::Semaphore> =
            slot.pre_copy_semaphores.iter().map(Semaphore::handle).collect();
        pre_copy.submit(
            self.queue,
            &waits,
            vk::PipelineStageFlags::TRANSFER,
            &signals,
            vk::Fence::null(),
        )?;
        slot.pre_copy = Some(pre_copy);
        slot.pre_copy_submitted = true;
        slot.submitted = true;

        // 3. hand the frame to the generator
        let mut output_fds = Vec::with_capacity(self.frame_gen_count);
        for _ in 0..self.frame_gen_count {
            let (semaphore, fd) = Semaphore::exported(&self.dispatch)?;
            slot.render_semaphores.push(semaphore);
            output_fds.push(fd);
        }
        self.context.present(input_fd, output_fds)?;

        let mut suboptimal = false;
        for i in 0..self.frame_gen_count {
            // 4a. acquire a swapchain image for generated frame i
            let acquire = Semaphore::new(&self.dispatch)?;
            let (acquired, acquire_suboptimal) = unsafe {
                swapchain_loader.acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    acquire.handle(),
                    vk::Fence::null(),
                )
            }
            .map_err(FrameGenError::vulkan("acquire next swapchain image"))?;
            suboptimal |= acquire_suboptimal;
            let target = *self
                .images
                .get(acquired as usize)
                .ok_or(FrameGenError::Logic("acquired image index out of range"))?;
            let acquire_handle = acquire.handle();
            slot.acquire_semaphores.push(acquire);

            // 4b. copy the generated frame into it
            slot.post_copy_semaphores.push(Semaphore::new(&self.dispatch)?);
            slot.prev_post_copy_semaphores
                .push(Semaphore::new(&self.dispatch)?);
            let post = slot.post_copy_semaphores[i].handle();
            let prev_post = slot.prev_post_copy_semaphores[i].handle();

            let mut post_copy = CommandBuffer::new(&self.pool)?;
            post_copy.begin()?;
            unsafe {
                copy::record_emit(
                    post_copy.device(),
                    post_copy.handle(),
                    self.outputs[i].handle(),
                    target,
                    self.extent,
                );
            }
            post_copy.end()?;

            let last = i + 1 == self.frame_gen_count;
            let fence = if last {
                slot.retire.handle()
            } else {
                vk::Fence::null()
            };
            post_copy.submit(
                self.queue,
                &[acquire_handle, slot.render_semaphores[i].handle()],
                vk::PipelineStageFlags::TRANSFER,
                &[post, prev_post],
                fence,
            )?;
            slot.post_copies.push(post_copy);
            slot.fence_armed |= last;

            // 4c. present it after the previous generated frame
            let mut present_waits = vec![post];
            if i > 0 {
                present_waits.push(slot.prev_post_copy_semaphores[i - 1].handle());
            }
            let next = if i == 0 { p_next } else { std::ptr::null() };
            suboptimal |= self.queue_present(queue, &present_waits, acquired, next)?;
        }

        // 5. present the original frame last
        let last_prev = slot
            .prev_post_copy_semaphores
            .last()
            .map(Semaphore::handle)
            .ok_or(FrameGenError::Logic("present cycle generated no frames"))?;
        suboptimal |= self.queue_present(queue, &[last_prev], image_index, std::ptr::null())?;

        Ok(suboptimal)
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
        p_next: *const c_void,
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let mut info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        info.p_next = p_next;
        unsafe { self.dispatch.swapchain().queue_present(queue, &info) }
            .map_err(FrameGenError::vulkan("present swapchain image"))
    }
}

impl Drop for SurfaceState {
    fn drop(&mut self) {
        for slot in self.ring.drain() {
            match slot.in_flight() {
                Ok(false) => {}
                Ok(true) | Err(_) => {
                    if let Err(e) = slot.wait_retired(&self.dispatch, self.queue) {
                        warn!("releasing present slot without retiring it: {}", e);
                    }
                }
            }
        }
    }
}
