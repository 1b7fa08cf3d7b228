//! Spawner for the Mach transport.

use std::ffi::{CString, OsString};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::ptr;

use libc::{c_char, c_int, pid_t, posix_spawnattr_t};
use mach2::port::mach_port_t;
use nix::unistd::Pid;
use rendezvous_wire::PortName;

use super::{ChildCommand, SpawnError, Spawner};

/// `TASK_BOOTSTRAP_PORT` from `<mach/task_special_ports.h>`.
const TASK_BOOTSTRAP_PORT: c_int = 4;

unsafe extern "C" {
    fn posix_spawnattr_setspecialport_np(
        attr: *mut posix_spawnattr_t,
        new_port: mach_port_t,
        which: c_int,
    ) -> c_int;
}

/// Starts children with the broker port as their task bootstrap port.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachSpawner;

fn c_string(bytes: Vec<u8>) -> Result<CString, String> {
    CString::new(bytes).map_err(|error| error.to_string())
}

fn environment_strings(command: &ChildCommand) -> Result<Vec<CString>, String> {
    command
        .environment()
        .into_iter()
        .map(|(name, value)| {
            let mut entry = name.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            c_string(entry)
        })
        .collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*mut c_char> {
    strings
        .iter()
        .map(|value| value.as_ptr().cast_mut())
        .chain(std::iter::once(ptr::null_mut()))
        .collect()
}

/// Owns an initialised `posix_spawnattr_t`.
struct SpawnAttributes(posix_spawnattr_t);

impl SpawnAttributes {
    fn new() -> io::Result<Self> {
        let mut attr: posix_spawnattr_t = ptr::null_mut();
        // SAFETY: `attr` is a valid out pointer.
        let code = unsafe { libc::posix_spawnattr_init(&mut attr) };
        if code != 0 {
            return Err(io::Error::from_raw_os_error(code));
        }
        Ok(Self(attr))
    }
}

impl Drop for SpawnAttributes {
    fn drop(&mut self) {
        // SAFETY: the attributes were initialised in `new`.
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.0);
        }
    }
}

impl Spawner for MachSpawner {
    fn spawn(&self, command: &ChildCommand, bootstrap: PortName) -> Result<Pid, SpawnError> {
        let program = command.program();
        let attr_failed = |message: String| SpawnError::AttrFailed {
            program: program.clone(),
            message,
        };
        let path = c_string(program.as_str().as_bytes().to_vec()).map_err(attr_failed)?;
        let argv_strings = std::iter::once(program.as_str())
            .chain(command.arguments().iter().map(String::as_str))
            .map(|arg| c_string(OsString::from(arg).into_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(attr_failed)?;
        let env_strings = environment_strings(command).map_err(attr_failed)?;
        let argv = null_terminated(&argv_strings);
        let envp = null_terminated(&env_strings);

        let mut attributes = SpawnAttributes::new().map_err(|error| attr_failed(error.to_string()))?;
        // SAFETY: `attributes` is initialised and the port name is a send
        // right this task holds.
        let code = unsafe {
            posix_spawnattr_setspecialport_np(
                &mut attributes.0,
                bootstrap.raw(),
                TASK_BOOTSTRAP_PORT,
            )
        };
        if code != 0 {
            return Err(attr_failed(format!(
                "posix_spawnattr_setspecialport_np returned {code}"
            )));
        }

        let mut pid: pid_t = 0;
        // SAFETY: every pointer refers to a live, NUL-terminated buffer and
        // the argument and environment arrays end with a null pointer.
        let code = unsafe {
            libc::posix_spawn(
                &mut pid,
                path.as_ptr(),
                ptr::null(),
                &attributes.0,
                argv.as_ptr(),
                envp.as_ptr(),
            )
        };
        if code != 0 {
            return Err(SpawnError::ExecFailed {
                program: program.clone(),
                source: io::Error::from_raw_os_error(code),
            });
        }
        Ok(Pid::from_raw(pid))
    }
}
