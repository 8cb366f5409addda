//! Descriptor passing over unix sockets (`SCM_RIGHTS`).
//!
//! Descriptors ride along with ordinary stream bytes as ancillary data:
//! the sender attaches them to the first `sendmsg` of a message, the
//! receiver collects whatever arrives with each `recvmsg`.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

/// Most descriptors accepted in one `recvmsg`.
pub const MAX_FDS_PER_READ: usize = 16;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

/// One non-blocking `recvmsg` into `data`.
///
/// Returns the byte count and any descriptors that arrived with it.
pub fn recv_with_fds(socket: RawFd, data: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>)> {
    let mut iov = [IoSliceMut::new(data)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_READ]);

    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut cmsg_buffer), RECV_FLAGS)
        .map_err(io::Error::from)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            for raw in received {
                // SAFETY: the kernel installed `raw` in our table for this
                // message; nothing else holds it yet.
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }

    Ok((msg.bytes, fds))
}

/// One non-blocking `sendmsg` carrying `fds` with the first bytes of `slices`.
///
/// Returns the number of bytes written; the descriptors are sent in full
/// whenever at least one byte is.
pub fn send_with_fds(socket: RawFd, slices: &[IoSlice<'_>], fds: &[RawFd]) -> io::Result<usize> {
    let cmsgs = [ControlMessage::ScmRights(fds)];
    sendmsg::<()>(socket, slices, &cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_descriptor_roundtrip_over_socketpair() {
        let (left, right) = UnixStream::pair().unwrap();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"Meow").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let sent = send_with_fds(
            left.as_raw_fd(),
            &[IoSlice::new(b"x")],
            &[file.as_raw_fd()],
        )
        .unwrap();
        assert_eq!(sent, 1);

        let mut data = [0u8; 8];
        let (n, mut fds) = recv_with_fds(right.as_raw_fd(), &mut data).unwrap();
        assert_eq!(n, 1);
        assert_eq!(fds.len(), 1);

        let mut received = std::fs::File::from(fds.remove(0));
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "Meow");
    }

    #[test]
    fn test_plain_bytes_carry_no_descriptors() {
        let (mut left, right) = UnixStream::pair().unwrap();
        left.write_all(b"purr").unwrap();

        let mut data = [0u8; 8];
        let (n, fds) = recv_with_fds(right.as_raw_fd(), &mut data).unwrap();

        assert_eq!(&data[..n], b"purr");
        assert!(fds.is_empty());
    }
}
