//! Socket setup
//!
//! Listeners are created with raw `libc` calls so the options land before
//! `bind(2)`, then handed to std as a `TcpListener`. Accepted and connected
//! streams are switched to non-blocking mode with `TCP_NODELAY`.

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nbio_core::error::{NetError, Result, TimeoutKind};

#[inline]
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn set_flag(fd: RawFd, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let opt: libc::c_int = 1;
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &opt as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Encode `addr` as a `sockaddr_storage` plus its real length
fn raw_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            // octets are already network order
            sin.sin_addr.s_addr = u32::from_ne_bytes(a.ip().octets());
            // Safety: sockaddr_storage is large and aligned enough for any sockaddr
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin) };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_addr.s6_addr = a.ip().octets();
            sin6.sin6_scope_id = a.scope_id();
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6) };
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Create, configure, bind and listen
///
/// The socket is non-blocking and close-on-exec, with `SO_REUSEADDR`.
/// `reuse_port` adds `SO_REUSEPORT` so several accept runners can each own
/// a listener on the same address.
pub fn bind_listener(addr: &SocketAddr, reuse_port: bool, backlog: i32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = cvt(unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
        )
    })?;
    // Owned from here on so every error path closes it
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
    if reuse_port {
        set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT)?;
    }

    let (storage, len) = raw_sockaddr(addr);
    cvt(unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) })?;
    cvt(unsafe { libc::listen(fd, backlog) })?;

    Ok(TcpListener::from(owned))
}

/// First address `addr` resolves to
pub fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| NetError::Io(io::ErrorKind::InvalidInput, "address resolved to nothing".into()))
}

/// Blocking connect bounded by `timeout`
pub fn connect(addr: &SocketAddr, timeout: Duration) -> Result<TcpStream> {
    TcpStream::connect_timeout(addr, timeout).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NetError::Timeout(TimeoutKind::Connect),
        _ => e.into(),
    })
}

/// Session socket options: non-blocking, no Nagle
pub fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
