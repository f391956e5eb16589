//! Raw socket calls the async stream types do not expose: descriptor
//! passing over `SCM_RIGHTS`, a non-consuming readiness peek, and the
//! pre-exec setup of a worker process.

use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::ptr;

/// Descriptor number a worker finds its supervisor channel on.
pub const WORKER_CHANNEL_FD: RawFd = 3;

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

/// Room for one `cmsghdr` carrying a handful of descriptors, 8-byte aligned.
type ControlBuffer = [u64; 8];

fn fd_payload_len() -> libc::c_uint {
    mem::size_of::<RawFd>() as libc::c_uint
}

/// Send `bytes`, optionally attaching `fd`. Returns the number of bytes written.
pub(crate) fn send_with_fd(socket: RawFd, bytes: &[u8], fd: Option<RawFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };
    let mut control: ControlBuffer = [0; 8];

    // SAFETY: msghdr is plain old data; every pointer stored in it outlives the call.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = fd {
        // SAFETY: the control buffer is large enough for CMSG_SPACE(sizeof(int))
        // and CMSG_FIRSTHDR is non-null once msg_controllen is set.
        unsafe {
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = libc::CMSG_SPACE(fd_payload_len()) as _;
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fd_payload_len()) as _;
            ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd);
        }
    }

    // SAFETY: msg is fully initialized above.
    let sent = unsafe { libc::sendmsg(socket, &msg, SEND_FLAGS) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Receive into `buf`, collecting at most one attached descriptor.
///
/// Extra descriptors in the same control message are closed.
pub(crate) fn recv_with_fd(socket: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut control: ControlBuffer = [0; 8];

    // SAFETY: see send_with_fd.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = mem::size_of::<ControlBuffer>() as _;

    // SAFETY: msg points at live buffers for the duration of the call.
    let received = unsafe { libc::recvmsg(socket, &mut msg, RECV_FLAGS) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut attached: Option<OwnedFd> = None;
    // SAFETY: the kernel filled msg_control; the CMSG_* walkers stay inside it.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                let header = libc::CMSG_LEN(0) as usize;
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header) / mem::size_of::<RawFd>();
                for i in 0..count {
                    let fd = OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i)));
                    if attached.is_none() {
                        attached = Some(fd);
                    }
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    #[cfg(not(target_os = "linux"))]
    if let Some(fd) = &attached {
        set_cloexec(std::os::fd::AsRawFd::as_raw_fd(fd), true)?;
    }

    Ok((received as usize, attached))
}

/// Whether a frame (or end of stream) is waiting on `socket`, without consuming it.
pub(crate) fn peek_pending(socket: RawFd) -> io::Result<bool> {
    let mut byte = 0u8;
    // SAFETY: one-byte buffer on the stack.
    let n = unsafe {
        libc::recv(
            socket,
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    if n >= 0 {
        // n == 0 means the peer hung up; the next receive reports it.
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(false),
        _ => Err(err),
    }
}

fn set_cloexec(fd: RawFd, enabled: bool) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if enabled {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Claim [`WORKER_CHANNEL_FD`] in a worker process.
pub(crate) fn inherited_channel() -> io::Result<OwnedFd> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(WORKER_CHANNEL_FD, libc::F_GETFD) } < 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no supervisor channel on descriptor {}", WORKER_CHANNEL_FD),
        ));
    }
    set_cloexec(WORKER_CHANNEL_FD, true)?;
    // SAFETY: the descriptor is open and the supervisor handed it to this
    // process for exclusive use.
    Ok(unsafe { OwnedFd::from_raw_fd(WORKER_CHANNEL_FD) })
}

/// Runs in the forked child right before `exec`: moves the worker's channel
/// end to [`WORKER_CHANNEL_FD`] and ignores `SIGINT`. Async-signal-safe.
pub(crate) fn prepare_worker(channel_fd: RawFd) -> io::Result<()> {
    if channel_fd == WORKER_CHANNEL_FD {
        set_cloexec(channel_fd, false)?;
    } else {
        // SAFETY: dup2 onto a fixed slot; the new descriptor does not inherit FD_CLOEXEC.
        if unsafe { libc::dup2(channel_fd, WORKER_CHANNEL_FD) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    // The terminal delivers ^C to the whole process group; only the supervisor reacts.
    // SAFETY: installing SIG_IGN is async-signal-safe and survives exec.
    if unsafe { libc::signal(libc::SIGINT, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
