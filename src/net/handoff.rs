//! Master ↔ worker control channel.
//!
//! # Responsibilities
//! - Create the per-worker `SOCK_SEQPACKET` socket pair
//! - Send a control message with an accepted socket attached (`SCM_RIGHTS`)
//! - Receive control messages and reclaim attached sockets on the worker side
//!
//! # Design Decisions
//! - One packet is one message: seqpacket keeps boundaries, so the descriptor
//!   always travels with the metadata that describes it
//! - Payload is a small JSON envelope; the tag identifies the message kind
//! - Sending consumes the connection. Once `send_connection` returns, the
//!   master's descriptor is closed and only the worker owns the socket

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::net::TcpStream;

/// Tag carried by every connection handoff message.
pub const HANDOFF_TAG: &str = "sticky-session:connection";

/// Tag a worker sends once its server is accepting adopted connections.
pub const READY_TAG: &str = "sticky-session:ready";

/// Largest control payload accepted on the wire.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Envelope exchanged on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<SocketAddr>,
}

impl ControlMessage {
    /// A connection handoff for a client at `remote_addr`.
    pub fn handoff(remote_addr: SocketAddr) -> Self {
        Self {
            tag: HANDOFF_TAG.to_string(),
            remote_addr: Some(remote_addr),
        }
    }

    /// Sent by a worker when it is ready to adopt connections.
    pub fn ready() -> Self {
        Self {
            tag: READY_TAG.to_string(),
            remote_addr: None,
        }
    }

    pub fn is_handoff(&self) -> bool {
        self.tag == HANDOFF_TAG
    }

    pub fn is_ready(&self) -> bool {
        self.tag == READY_TAG
    }
}

/// Error type for control channel operations.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed control message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("control message exceeds {MAX_MESSAGE_LEN} bytes")]
    TooLarge,

    #[error("control channel closed by peer")]
    Closed,

    #[error("handoff queue full")]
    QueueFull,
}

/// A message read from the control channel, with its attached socket if any.
#[derive(Debug)]
pub struct Received {
    pub message: ControlMessage,
    pub connection: Option<OwnedFd>,
}

/// Create a connected pair of control channel endpoints.
///
/// Both ends are close-on-exec and nonblocking. The spawner clears
/// close-on-exec on the child's end only inside that child.
pub fn control_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
            fds.as_mut_ptr(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socketpair succeeded, so both descriptors are open and unowned.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// One end of a master ↔ worker control channel.
///
/// The master sends handoffs and reads readiness notices; the worker does
/// the reverse. Sends and receives may run concurrently from different tasks.
#[derive(Debug)]
pub struct ControlChannel {
    fd: AsyncFd<OwnedFd>,
}

impl ControlChannel {
    /// Wrap a control channel endpoint. Must be called inside a Tokio runtime.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        // SAFETY: `OwnedFd` keeps the descriptor open and unchanged until the
        // `AsyncFd` drops it.
        let fd = unsafe { AsyncFd::register(fd) }?;
        Ok(Self { fd })
    }

    /// Take ownership of an inherited descriptor number.
    ///
    /// Fails if `raw` is not an open descriptor in this process.
    pub fn from_inherited(raw: RawFd) -> io::Result<Self> {
        if unsafe { libc::fcntl(raw, libc::F_GETFD) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the descriptor is open and was handed to this process
        // for exclusive use by the master.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Self::new(fd)
    }

    /// Transfer an accepted connection to the worker.
    ///
    /// The stream is deregistered from this process's reactor without being
    /// read, so every byte the client has sent is still queued in the kernel
    /// when the worker picks the socket up.
    pub async fn send_connection(
        &self,
        connection: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<(), HandoffError> {
        let connection = OwnedFd::from(connection.into_std()?);
        self.send(&ControlMessage::handoff(remote_addr), Some(connection))
            .await
    }

    /// Send a control message, optionally transferring a descriptor with it.
    ///
    /// The attached descriptor is closed in this process once the call
    /// returns, whether or not the send succeeded.
    pub async fn send(
        &self,
        message: &ControlMessage,
        attached: Option<OwnedFd>,
    ) -> Result<(), HandoffError> {
        let payload = serde_json::to_vec(message)?;
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(HandoffError::TooLarge);
        }
        let attached_raw = attached.as_ref().map(AsRawFd::as_raw_fd);

        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| send_packet(inner.as_raw_fd(), &payload, attached_raw)) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if is_disconnect(&e) => return Err(HandoffError::Closed),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive the next message. `Ok(None)` means the peer closed its end.
    ///
    /// Cancel safe: a packet is only consumed by the synchronous read that
    /// also returns it.
    pub async fn recv(&self) -> Result<Option<Received>, HandoffError> {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        loop {
            let mut guard = self.fd.readable().await?;
            let (len, truncated, connection) =
                match guard.try_io(|inner| recv_packet(inner.as_raw_fd(), &mut buf)) {
                    Ok(result) => result?,
                    Err(_would_block) => continue,
                };

            if len == 0 && connection.is_none() {
                return Ok(None);
            }
            if truncated {
                return Err(HandoffError::TooLarge);
            }
            let message = serde_json::from_slice(&buf[..len])?;
            return Ok(Some(Received {
                message,
                connection,
            }));
        }
    }
}

/// Turn a received descriptor back into a Tokio stream.
pub fn into_tcp_stream(fd: OwnedFd) -> io::Result<TcpStream> {
    let stream = std::net::TcpStream::from(fd);
    stream.set_nonblocking(true)?;
    TcpStream::from_std(stream)
}

/// Clear close-on-exec so the descriptor survives into a spawned worker.
///
/// Only calls `fcntl`, so it is safe to use between fork and exec.
pub fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0
        && unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
    {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EPIPE) | Some(libc::ECONNRESET) | Some(libc::ENOTCONN)
    )
}

/// Aligned storage for one `SCM_RIGHTS` control message.
#[repr(C)]
union CmsgBuffer {
    _align: libc::cmsghdr,
    buf: [u8; 64],
}

fn send_packet(sock: RawFd, payload: &[u8], attached: Option<RawFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    let mut cmsg = CmsgBuffer { buf: [0u8; 64] };

    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        if let Some(fd) = attached {
            msg.msg_control = cmsg.buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as _;

            let hdr = libc::CMSG_FIRSTHDR(&msg);
            (*hdr).cmsg_level = libc::SOL_SOCKET;
            (*hdr).cmsg_type = libc::SCM_RIGHTS;
            (*hdr).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            ptr::write_unaligned(libc::CMSG_DATA(hdr) as *mut RawFd, fd);
        }

        let sent = libc::sendmsg(sock, &msg, libc::MSG_NOSIGNAL);
        if sent < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(sent as usize)
        }
    }
}

/// Returns (payload length, payload truncated, attached descriptor).
fn recv_packet(sock: RawFd, buf: &mut [u8]) -> io::Result<(usize, bool, Option<OwnedFd>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut cmsg = CmsgBuffer { buf: [0u8; 64] };

    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg.buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of::<CmsgBuffer>() as _;

        let received = libc::recvmsg(sock, &mut msg, libc::MSG_CMSG_CLOEXEC);
        if received < 0 {
            return Err(io::Error::last_os_error());
        }

        // Take ownership of every descriptor first so none leak, keep the first.
        let mut attached = None;
        let mut hdr = libc::CMSG_FIRSTHDR(&msg);
        while !hdr.is_null() {
            if (*hdr).cmsg_level == libc::SOL_SOCKET && (*hdr).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(hdr) as *const RawFd;
                let header_len = libc::CMSG_LEN(0) as usize;
                let count = ((*hdr).cmsg_len as usize - header_len) / mem::size_of::<RawFd>();
                for i in 0..count {
                    let fd = OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i)));
                    if attached.is_none() {
                        attached = Some(fd);
                    }
                }
            }
            hdr = libc::CMSG_NXTHDR(&msg, hdr);
        }

        let truncated = msg.msg_flags & libc::MSG_TRUNC != 0;
        Ok((received as usize, truncated, attached))
    }
}
