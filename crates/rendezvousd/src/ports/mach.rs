//! Port space backed by the Mach kernel.
//!
//! Rights are moved by `mach_msg` itself, so this space only allocates,
//! releases and forwards messages; names are the task's own port names.

use std::time::Duration;

use mach2::kern_return::{KERN_SUCCESS, kern_return_t};
use mach2::mach_port::{
    mach_port_allocate, mach_port_deallocate, mach_port_insert_right, mach_port_mod_refs,
};
use mach2::message::{
    MACH_MSG_SUCCESS, MACH_MSG_TIMEOUT_NONE, MACH_MSG_TYPE_MAKE_SEND, MACH_RCV_INTERRUPTED,
    MACH_RCV_MSG, MACH_RCV_TIMED_OUT, MACH_RCV_TIMEOUT, MACH_RCV_TOO_LARGE, MACH_SEND_INVALID_DEST, MACH_SEND_MSG,
    mach_msg, mach_msg_header_t, mach_msg_size_t, mach_msg_timeout_t,
};
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE, mach_port_t};
use mach2::traps::mach_task_self;
use rendezvous_wire::{Envelope, PortName, RECEIVE_BUFFER_SIZE};
use tracing::debug;

use super::{MessageBuffer, PORTS_TARGET, PortError, PortSpace, Receipt, Right};

unsafe extern "C" {
    fn mach_msg_destroy(msg: *mut mach_msg_header_t);
}

/// Port space of the current task.
#[derive(Debug, Clone, Copy)]
pub struct MachPortSpace {
    task: mach_port_t,
}

impl MachPortSpace {
    /// Builds a space over the calling task's namespace.
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: `mach_task_self` has no preconditions.
        Self {
            task: unsafe { mach_task_self() },
        }
    }
}

impl Default for MachPortSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn check(code: kern_return_t, error: impl FnOnce(i32) -> PortError) -> Result<(), PortError> {
    if code == KERN_SUCCESS {
        Ok(())
    } else {
        Err(error(code))
    }
}

fn timeout_ms(timeout: Duration) -> mach_msg_timeout_t {
    mach_msg_timeout_t::try_from(timeout.as_millis()).unwrap_or(mach_msg_timeout_t::MAX)
}

impl PortSpace for MachPortSpace {
    fn allocate(&self) -> Result<PortName, PortError> {
        let mut name: mach_port_t = MACH_PORT_NULL;
        // SAFETY: `name` is a valid out pointer for the call.
        let code = unsafe { mach_port_allocate(self.task, MACH_PORT_RIGHT_RECEIVE, &mut name) };
        check(code, |code| PortError::Allocate {
            message: format!("mach_port_allocate returned {code:#x}"),
        })?;
        // SAFETY: `name` holds the receive right just allocated.
        let code = unsafe {
            mach_port_insert_right(self.task, name, name, MACH_MSG_TYPE_MAKE_SEND)
        };
        check(code, |code| PortError::Allocate {
            message: format!("mach_port_insert_right returned {code:#x}"),
        })?;
        let name = PortName::new(name);
        debug!(target: PORTS_TARGET, port = %name, "allocated mach port");
        Ok(name)
    }

    fn release(&self, name: PortName, right: Right) -> Result<(), PortError> {
        // SAFETY: releasing a right the task does not hold returns an error
        // code and has no other effect.
        let code = unsafe {
            match right {
                Right::Receive => {
                    mach_port_mod_refs(self.task, name.raw(), MACH_PORT_RIGHT_RECEIVE, -1)
                }
                Right::Send | Right::SendOnce => mach_port_deallocate(self.task, name.raw()),
            }
        };
        check(code, |_| PortError::InvalidRight { name, right })
    }

    fn receive(
        &self,
        port: PortName,
        buffer: &mut MessageBuffer,
        timeout: Option<Duration>,
    ) -> Result<Receipt, PortError> {
        let (options, wait) = match timeout {
            Some(timeout) => (MACH_RCV_MSG | MACH_RCV_TIMEOUT, timeout_ms(timeout)),
            None => (MACH_RCV_MSG, MACH_MSG_TIMEOUT_NONE),
        };
        let header = buffer.as_mut_slice().as_mut_ptr().cast::<mach_msg_header_t>();
        // SAFETY: the buffer is aligned for the header and holds
        // `RECEIVE_BUFFER_SIZE` bytes.
        let code = unsafe {
            mach_msg(
                header,
                options,
                0,
                RECEIVE_BUFFER_SIZE as mach_msg_size_t,
                port.raw(),
                wait,
                MACH_PORT_NULL,
            )
        };
        match code {
            MACH_MSG_SUCCESS => {
                // SAFETY: a successful receive wrote a header at the front.
                let size = unsafe { (*header).msgh_size };
                Ok(Receipt::Message(size as usize))
            }
            MACH_RCV_TIMED_OUT => Ok(Receipt::TimedOut),
            MACH_RCV_INTERRUPTED => Ok(Receipt::Interrupted),
            MACH_RCV_TOO_LARGE => Ok(Receipt::Dropped),
            code => Err(PortError::Receive { code }),
        }
    }

    fn send(&self, message: &[u8]) -> Result<(), PortError> {
        let envelope = Envelope::read(message)?;
        let mut buffer = MessageBuffer::new();
        let len = buffer.load(message)?;
        let header = buffer.as_mut_slice().as_mut_ptr().cast::<mach_msg_header_t>();
        // SAFETY: the buffer is aligned and holds a complete message of
        // `len` bytes.
        let code = unsafe {
            mach_msg(
                header,
                MACH_SEND_MSG,
                len as mach_msg_size_t,
                0,
                MACH_PORT_NULL,
                MACH_MSG_TIMEOUT_NONE,
                MACH_PORT_NULL,
            )
        };
        match code {
            MACH_MSG_SUCCESS => Ok(()),
            MACH_SEND_INVALID_DEST => Err(PortError::DeadName {
                name: envelope.header.remote_port,
            }),
            code => Err(PortError::Send { code }),
        }
    }

    fn discard(&self, message: &[u8]) {
        let mut buffer = MessageBuffer::new();
        if buffer.load(message).is_err() {
            return;
        }
        // SAFETY: the buffer holds a received message; destroying it
        // releases the rights it carries.
        unsafe {
            mach_msg_destroy(buffer.as_mut_slice().as_mut_ptr().cast::<mach_msg_header_t>());
        }
    }
}
