// A schedulable unit of GPU work
//
// An ExecBuffer pairs one command buffer with the fence that tracks its
// last submission, and enforces the order the two can be used in.
//
// Austin Shafer - 2024

use ash::vk;

use crate::backend::{Command, QueueRole, Submission};
use crate::device::Device;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::Arc;

/// Lifecycle of an ExecBuffer
///
/// ```text
/// Allocated -> Created -> Recording -> Executable -> (submitted) -> Created
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecState {
    /// No GPU objects exist yet
    Allocated,
    /// Command buffer and fence exist, nothing is recorded
    Created,
    /// Between begin_recording and end_recording
    Recording,
    /// Recorded and ready to submit, possibly many times
    Executable,
}

/// A command buffer with a completion fence
pub struct ExecBuffer {
    e_dev: Arc<Device>,
    e_role: QueueRole,
    e_pool: vk::CommandPool,
    e_cbuf: vk::CommandBuffer,
    e_fence: vk::Fence,
    e_state: ExecState,
    /// Submitted, and we haven't seen the fence signal since
    e_pending: bool,
}

impl ExecBuffer {
    /// Make a new ExecBuffer that will allocate from `pool`
    ///
    /// The buffer starts out `Allocated`, call `create` before using it.
    pub fn new(dev: Arc<Device>, pool: vk::CommandPool, role: QueueRole) -> Self {
        Self {
            e_dev: dev,
            e_role: role,
            e_pool: pool,
            e_cbuf: vk::CommandBuffer::null(),
            e_fence: vk::Fence::null(),
            e_state: ExecState::Allocated,
            e_pending: false,
        }
    }

    pub fn state(&self) -> ExecState {
        self.e_state
    }

    /// Has this been submitted without us observing completion
    pub fn is_pending(&self) -> bool {
        self.e_pending
    }

    pub fn cbuf(&self) -> vk::CommandBuffer {
        self.e_cbuf
    }

    pub fn fence(&self) -> vk::Fence {
        self.e_fence
    }

    /// Report a transition attempted from the wrong state
    fn invalid(&self, op: &'static str) -> SquallError {
        log::error!("ExecBuffer: cannot {} while in state {:?}", op, self.e_state);
        SquallError::INVALID_STATE {
            op: op,
            state: self.e_state,
        }
    }

    /// Allocate the command buffer and fence
    ///
    /// The fence starts signaled so the first wait doesn't block.
    pub fn create(&mut self) -> Result<()> {
        if self.e_state != ExecState::Allocated {
            return Err(self.invalid("create"));
        }

        let back = self.e_dev.backend();
        let cbuf = back.allocate_command_buffer(self.e_pool)?;
        let fence = match back.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                back.free_command_buffer(self.e_pool, cbuf);
                return Err(e);
            }
        };

        self.e_cbuf = cbuf;
        self.e_fence = fence;
        self.e_state = ExecState::Created;
        Ok(())
    }

    /// Wait for the last submission of this buffer to complete
    pub fn wait(&mut self, timeout_ns: u64) -> Result<()> {
        if self.e_state == ExecState::Allocated {
            return Err(self.invalid("wait"));
        }

        if !self.e_pending {
            return Ok(());
        }

        match self.e_dev.backend().wait_fence(self.e_fence, timeout_ns) {
            Ok(()) => {
                self.e_pending = false;
                Ok(())
            }
            Err(e) => {
                log::error!("ExecBuffer: fence wait failed: {}", e);
                Err(e)
            }
        }
    }

    /// Start recording commands
    ///
    /// An `Executable` buffer goes back to `Created` first, which means
    /// waiting for its previous submission to retire so we never rewrite a
    /// command buffer the GPU is still reading.
    pub fn begin_recording(&mut self) -> Result<()> {
        match self.e_state {
            ExecState::Created | ExecState::Executable => {}
            _ => return Err(self.invalid("begin recording")),
        }

        self.wait(self.e_dev.fence_timeout())?;
        let back = self.e_dev.backend();
        back.reset_command_buffer(self.e_cbuf)?;
        self.e_state = ExecState::Created;

        back.begin_command_buffer(self.e_cbuf, false)?;
        self.e_state = ExecState::Recording;
        Ok(())
    }

    /// Add a command to the buffer
    pub fn record(&mut self, cmd: Command) -> Result<()> {
        if self.e_state != ExecState::Recording {
            return Err(self.invalid("record"));
        }

        self.e_dev.backend().cmd(self.e_cbuf, &cmd);
        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<()> {
        if self.e_state != ExecState::Recording {
            return Err(self.invalid("end recording"));
        }

        self.e_dev.backend().end_command_buffer(self.e_cbuf)?;
        self.e_state = ExecState::Executable;
        Ok(())
    }

    /// Submit the recorded commands
    ///
    /// The submission waits on every semaphore in `wait` and signals every
    /// one in `signal`. If `blocking` is set this does not return until the
    /// GPU has finished.
    pub fn execute(
        &mut self,
        wait: &[vk::Semaphore],
        signal: &[vk::Semaphore],
        blocking: bool,
    ) -> Result<()> {
        if self.e_state != ExecState::Executable {
            return Err(self.invalid("execute"));
        }

        // A command buffer can't be pending twice
        self.wait(self.e_dev.fence_timeout())?;

        let back = self.e_dev.backend();
        back.reset_fence(self.e_fence)?;

        let stage = match self.e_role {
            QueueRole::Graphics | QueueRole::Present => {
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            }
            QueueRole::Transfer | QueueRole::Compute => vk::PipelineStageFlags::ALL_COMMANDS,
        };
        let wait_stages = vec![stage; wait.len()];

        back.queue_submit(
            self.e_role,
            &Submission {
                cbuf: self.e_cbuf,
                wait: wait,
                wait_stages: wait_stages.as_slice(),
                signal: signal,
                fence: self.e_fence,
            },
        )?;
        self.e_pending = true;

        if blocking {
            self.wait(self.e_dev.fence_timeout())?;
        }

        Ok(())
    }

    /// Free the command buffer and fence, returning to `Allocated`
    pub fn release(&mut self) -> Result<()> {
        if self.e_state == ExecState::Allocated {
            return Err(self.invalid("release"));
        }

        self.wait(self.e_dev.fence_timeout())?;

        let back = self.e_dev.backend();
        back.free_command_buffer(self.e_pool, self.e_cbuf);
        back.destroy_fence(self.e_fence);
        self.e_cbuf = vk::CommandBuffer::null();
        self.e_fence = vk::Fence::null();
        self.e_state = ExecState::Allocated;
        Ok(())
    }
}

impl Drop for ExecBuffer {
    fn drop(&mut self) {
        if self.e_state != ExecState::Allocated {
            if let Err(e) = self.release() {
                log::error!("Leaking ExecBuffer that could not be released: {}", e);
            }
        }
    }
}
