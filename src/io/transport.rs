//! Transport resources channels own: anything that reads and writes bytes
//! asynchronously, boxed behind one trait object so channels stay concrete.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::CoreError;

/// Byte-stream transport: the union of the async read/write traits.
pub trait RawIo: AsyncRead + AsyncWrite + Unpin {}

impl<T: AsyncRead + AsyncWrite + Unpin + ?Sized> RawIo for T {}

/// An owned transport handle, released when the owning channel is dropped.
pub type BoxedIo = Box<dyn RawIo>;

/// Where a byte-stream channel gets its bytes.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// One TCP connection.
    Tcp(SocketAddr),
    /// A connected UDP socket; each datagram surfaces as one read.
    Udp { bind: SocketAddr, peer: SocketAddr },
}

impl Endpoint {
    pub async fn open(&self) -> Result<BoxedIo, CoreError> {
        match self {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                Ok(Box::new(stream))
            }
            Endpoint::Udp { bind, peer } => {
                let socket = UdpSocket::bind(bind).await?;
                socket.connect(peer).await?;
                Ok(Box::new(UdpIo { socket }))
            }
        }
    }
}

/// How a byte-stream channel obtains its transport. `Attached` exists for
/// transports opened elsewhere (in-memory pipes in tests, inherited fds).
pub enum StreamSource {
    Remote(Endpoint),
    Attached(BoxedIo),
}

impl StreamSource {
    pub(crate) async fn open(self) -> Result<BoxedIo, CoreError> {
        match self {
            StreamSource::Remote(endpoint) => endpoint.open().await,
            StreamSource::Attached(io) => Ok(io),
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSource::Remote(endpoint) => f.debug_tuple("Remote").field(endpoint).finish(),
            StreamSource::Attached(_) => f.write_str("Attached"),
        }
    }
}

/// Adapts a connected [`UdpSocket`] onto the stream traits: one inbound
/// datagram per read, one outbound datagram per write.
#[derive(Debug)]
pub struct UdpIo {
    socket: UdpSocket,
}

impl UdpIo {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for UdpIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(target_os = "linux")]
pub use socketcan::CanSocket;

/// Raw SocketCAN plumbing. The kernel speaks fixed 16-byte `can_frame`
/// records on this descriptor, which is exactly the wire layout
/// [`crate::io::can::CanFrame`] pins down.
#[cfg(target_os = "linux")]
mod socketcan {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};

    use tokio::io::unix::AsyncFd;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    /// A bound, non-blocking `PF_CAN` raw socket registered with the
    /// reactor.
    #[derive(Debug)]
    pub struct CanSocket {
        fd: AsyncFd<OwnedFd>,
    }

    impl CanSocket {
        /// Open and bind the socket to a CAN network interface ("can0").
        pub fn open(interface: &str) -> io::Result<Self> {
            let raw = unsafe {
                libc::socket(
                    libc::PF_CAN,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    libc::CAN_RAW,
                )
            };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            let owned = unsafe { OwnedFd::from_raw_fd(raw) };

            let ifname = std::ffi::CString::new(interface)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name"))?;
            let ifindex = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
            if ifindex == 0 {
                return Err(io::Error::last_os_error());
            }

            let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
            addr.can_family = libc::AF_CAN as libc::sa_family_t;
            addr.can_ifindex = ifindex as libc::c_int;
            let rc = unsafe {
                libc::bind(
                    owned.as_raw_fd(),
                    &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                fd: AsyncFd::new(owned)?,
            })
        }

        fn raw(&self) -> RawFd {
            self.fd.get_ref().as_raw_fd()
        }
    }

    impl AsyncRead for CanSocket {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            loop {
                let mut guard = match self.fd.poll_read_ready(cx) {
                    Poll::Ready(ready) => ready?,
                    Poll::Pending => return Poll::Pending,
                };
                let mut scratch = [0u8; 16];
                let result = guard.try_io(|inner| {
                    let n = unsafe {
                        libc::read(
                            inner.get_ref().as_raw_fd(),
                            scratch.as_mut_ptr() as *mut libc::c_void,
                            scratch.len(),
                        )
                    };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                });
                match result {
                    Ok(Ok(n)) => {
                        buf.put_slice(&scratch[..n]);
                        return Poll::Ready(Ok(()));
                    }
                    Ok(Err(err)) => return Poll::Ready(Err(err)),
                    Err(_would_block) => continue,
                }
            }
        }
    }

    impl AsyncWrite for CanSocket {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut TaskContext<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            loop {
                let mut guard = match self.fd.poll_write_ready(cx) {
                    Poll::Ready(ready) => ready?,
                    Poll::Pending => return Poll::Pending,
                };
                let result = guard.try_io(|_inner| {
                    let n = unsafe {
                        libc::write(self.raw(), buf.as_ptr() as *const libc::c_void, buf.len())
                    };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                });
                match result {
                    Ok(outcome) => return Poll::Ready(outcome),
                    Err(_would_block) => continue,
                }
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
