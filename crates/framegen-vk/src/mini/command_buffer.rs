use std::sync::Arc;

use ash::vk;

use crate::error::{FrameGenError, Result};
use crate::mini::CommandPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Empty,
    Recording,
    Full,
    Submitted,
}

/// One-time-submit primary command buffer.
pub struct CommandBuffer {
    pool: Arc<CommandPool>,
    buffer: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub fn new(pool: &Arc<CommandPool>) -> Result<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { pool.dispatch().device().allocate_command_buffers(&info) }
            .map_err(FrameGenError::vulkan("allocate command buffer"))?;
        let buffer = buffers
            .into_iter()
            .next()
            .ok_or(FrameGenError::Logic("driver returned no command buffer"))?;
        Ok(Self {
            pool: Arc::clone(pool),
            buffer,
            state: CommandBufferState::Empty,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn device(&self) -> &ash::Device {
        self.pool.dispatch().device()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Empty {
            return Err(FrameGenError::Logic("command buffer is not empty"));
        }
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device().begin_command_buffer(self.buffer, &info) }
            .map_err(FrameGenError::vulkan("begin command buffer"))?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(FrameGenError::Logic("command buffer is not recording"));
        }
        unsafe { self.device().end_command_buffer(self.buffer) }
            .map_err(FrameGenError::vulkan("end command buffer"))?;
        self.state = CommandBufferState::Full;
        Ok(())
    }

    /// Submit to `queue`. Every wait semaphore blocks at `wait_stage`.
    pub fn submit(
        &mut self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        wait_stage: vk::PipelineStageFlags,
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        if self.state != CommandBufferState::Full {
            return Err(FrameGenError::Logic("command buffer has not finished recording"));
        }
        let stages = vec![wait_stage; wait_semaphores.len()];
        let buffers = [self.buffer];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&buffers)
            .signal_semaphores(signal_semaphores);
        unsafe { self.device().queue_submit(queue, &[submit], fence) }
            .map_err(FrameGenError::vulkan("submit command buffer"))?;
        self.state = CommandBufferState::Submitted;
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device()
                .free_command_buffers(self.pool.handle(), &[self.buffer])
        };
    }
}
