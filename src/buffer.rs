use std::io;
use std::os::unix::io::RawFd;

/// Reserved leading space for cheaply prepending a header.
pub const CHEAP_PREPEND: usize = 8;
/// Writable bytes a fresh buffer starts with.
pub const INITIAL_SIZE: usize = 1024;

/// Growable byte buffer for non-blocking socket I/O.
///
/// One contiguous region split by two cursors:
///
/// ```text
/// +-------------------+------------------+------------------+
/// | prependable bytes |  readable bytes  |  writable bytes  |
/// |                   |     (CONTENT)    |                  |
/// +-------------------+------------------+------------------+
/// 0      <=      reader_index  <=  writer_index    <=     size
/// ```
///
/// `reader_index` never drops below [`CHEAP_PREPEND`] except through
/// [`prepend`](Buffer::prepend), and `writer_index` never passes the
/// underlying capacity. Appends that outgrow the writable region first
/// try to reclaim leading slack by sliding the readable content down
/// to the prepend boundary; only when trailing plus leading slack
/// cannot hold the data does the storage actually grow.
///
/// ## Example
///
/// ```rust
/// use weir_io::Buffer;
///
/// let mut buf = Buffer::new();
/// buf.append(b"hello");
/// assert_eq!(buf.readable_bytes(), 5);
/// buf.retrieve(2);
/// assert_eq!(buf.retrieve_all_as_string(), "llo");
/// ```
pub struct Buffer {
    buf: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Self::with_capacity(INITIAL_SIZE)
    }

    /// Creates a buffer with `initial` writable bytes past the prepend
    /// region.
    pub fn with_capacity(initial: usize) -> Buffer {
        Buffer {
            buf: vec![0; CHEAP_PREPEND + initial],
            reader_index: CHEAP_PREPEND,
            writer_index: CHEAP_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.writer_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader_index
    }

    /// Total size of the underlying storage.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Read-only view of the readable region. Does not consume.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.reader_index..self.writer_index]
    }

    /// Consumes `len` readable bytes. Asking for at least everything
    /// that's readable resets the buffer instead. Callers on the
    /// transport path always request at most what [`peek`](Buffer::peek)
    /// showed them, so over-asking is treated as "drain it all" rather
    /// than an error.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.reader_index += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_index = CHEAP_PREPEND;
        self.writer_index = CHEAP_PREPEND;
    }

    /// Copies out at most `len` readable bytes as a string and
    /// consumes them.
    pub fn retrieve_as_string(&mut self, len: usize) -> String {
        let len = len.min(self.readable_bytes());
        let result = String::from_utf8_lossy(&self.peek()[..len]).into_owned();
        self.retrieve(len);
        result
    }

    pub fn retrieve_all_as_string(&mut self) -> String {
        self.retrieve_as_string(self.readable_bytes())
    }

    /// Guarantees at least `len` writable bytes, growing or compacting
    /// as needed.
    pub fn ensure_writable_bytes(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable_bytes(data.len());
        self.buf[self.writer_index..self.writer_index + data.len()].copy_from_slice(data);
        self.writer_index += data.len();
    }

    /// Writes into the reserved leading region, immediately before the
    /// current readable content. This is how a length or type header
    /// gets in front of a payload without shifting the payload bytes.
    ///
    /// # Panics
    ///
    /// Panics if `data` is larger than [`prependable_bytes`](Buffer::prependable_bytes).
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.prependable_bytes(),
            "prepend of {} bytes exceeds the {} prependable",
            data.len(),
            self.prependable_bytes()
        );
        self.reader_index -= data.len();
        self.buf[self.reader_index..self.reader_index + data.len()].copy_from_slice(data);
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + CHEAP_PREPEND {
            self.buf.resize(self.writer_index + len, 0);
        } else {
            // move readable content down to the prepend boundary,
            // reclaiming the slack left by earlier retrieves
            let readable = self.readable_bytes();
            self.buf
                .copy_within(self.reader_index..self.writer_index, CHEAP_PREPEND);
            self.reader_index = CHEAP_PREPEND;
            self.writer_index = CHEAP_PREPEND + readable;
        }
    }

    /// One non-blocking `readv` from `fd` into the writable region,
    /// backed by a 64 KiB stack buffer so a single call can pick up
    /// more than the buffer currently has room for; any spill is
    /// appended afterwards. Returns the byte count (0 means EOF); the
    /// error carries the raw OS errno untouched. Never retries; that
    /// policy belongs to the caller.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extrabuf = [0u8; 65536];
        let writable = self.writable_bytes();
        let iovs = [
            libc::iovec {
                iov_base: unsafe { self.buf.as_mut_ptr().add(self.writer_index) }
                    as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extrabuf.as_mut_ptr() as *mut libc::c_void,
                iov_len: extrabuf.len(),
            },
        ];
        // when the writable region is already huge the spill vector
        // only adds syscall cost
        let iovcnt = if writable < extrabuf.len() { 2 } else { 1 };

        let n = unsafe { libc::readv(fd, iovs.as_ptr(), iovcnt) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.writer_index += n;
        } else {
            self.writer_index = self.buf.len();
            self.append(&extrabuf[..n - writable]);
        }
        Ok(n)
    }

    /// One non-blocking `write` of the readable region to `fd`.
    /// Returns how many bytes the kernel took; the caller decides what
    /// to retrieve and whether to retry. Errors carry the raw OS errno.
    pub fn write_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let n = unsafe {
            libc::write(
                fd,
                self.peek().as_ptr() as *const libc::c_void,
                self.readable_bytes(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn check_invariants(buf: &Buffer) {
        assert!(buf.reader_index <= buf.writer_index);
        assert!(buf.writer_index <= buf.capacity());
        assert!(buf.reader_index >= CHEAP_PREPEND);
        assert_eq!(
            buf.readable_bytes() + buf.writable_bytes() + buf.prependable_bytes(),
            buf.capacity()
        );
    }

    #[test]
    fn starts_empty() {
        let buf = Buffer::new();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.writable_bytes(), INITIAL_SIZE);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
    }

    #[test]
    fn append_peek_retrieve() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.peek(), b"hello");
        check_invariants(&buf);

        buf.retrieve(2);
        assert_eq!(buf.readable_bytes(), 3);
        assert_eq!(buf.peek(), b"llo");
        check_invariants(&buf);

        assert_eq!(buf.retrieve_all_as_string(), "llo");
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
        check_invariants(&buf);
    }

    #[test]
    fn retrieve_past_readable_drains_everything() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        buf.retrieve(1000);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
        check_invariants(&buf);
    }

    #[test]
    fn retrieve_as_string_round_trip() {
        let mut buf = Buffer::new();
        buf.append(b"one two three");
        let head = buf.retrieve_as_string(4);
        assert_eq!(head, "one ");
        assert_eq!(buf.peek(), b"two three");

        buf.append(head.as_bytes());
        assert_eq!(buf.peek(), b"two threeone ");
        check_invariants(&buf);
    }

    #[test]
    fn growth_preserves_content() {
        let mut buf = Buffer::new();
        buf.append(b"keep me");
        let big = vec![0xabu8; INITIAL_SIZE * 2];
        buf.append(&big);

        assert_eq!(&buf.peek()[..7], b"keep me");
        assert_eq!(&buf.peek()[7..], &big[..]);
        check_invariants(&buf);
    }

    #[test]
    fn compaction_avoids_reallocation() {
        let mut buf = Buffer::new();
        buf.append(&vec![b'x'; INITIAL_SIZE]);
        assert_eq!(buf.writable_bytes(), 0);

        // leave a small readable tail with lots of leading slack
        buf.retrieve(INITIAL_SIZE - 16);
        assert_eq!(buf.readable_bytes(), 16);

        let cap_before = buf.capacity();
        buf.append(&vec![b'y'; 700]); // fits only via compaction
        assert_eq!(buf.capacity(), cap_before);
        assert_eq!(buf.readable_bytes(), 716);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
        assert_eq!(&buf.peek()[..16], &[b'x'; 16]);
        check_invariants(&buf);
    }

    #[test]
    fn prepend_uses_reserved_region() {
        let mut buf = Buffer::new();
        buf.append(b"payload");
        buf.prepend(&7u32.to_be_bytes());
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND - 4);
        assert_eq!(&buf.peek()[..4], &7u32.to_be_bytes());
        assert_eq!(&buf.peek()[4..], b"payload");
    }

    #[test]
    fn invariants_hold_across_mixed_sequences() {
        let mut buf = Buffer::new();
        for i in 0..200usize {
            buf.append(&vec![i as u8; (i * 37) % 512 + 1]);
            check_invariants(&buf);
            buf.retrieve((i * 53) % 700);
            check_invariants(&buf);
        }
    }

    #[test]
    fn read_fd_appends_from_socket() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        tx.write_all(b"over the wire").unwrap();
        let mut buf = Buffer::new();
        let n = buf.read_fd(rx.as_raw_fd()).unwrap();
        assert_eq!(n, 13);
        assert_eq!(buf.peek(), b"over the wire");
    }

    #[test]
    fn read_fd_would_block_surfaces_errno() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut buf = Buffer::new();
        let err = buf.read_fd(rx.as_raw_fd()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn read_fd_spills_past_writable_region() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let payload = vec![0x5au8; 100];
        tx.write_all(&payload).unwrap();

        let mut buf = Buffer::with_capacity(16); // tiny writable region
        let n = buf.read_fd(rx.as_raw_fd()).unwrap();
        assert_eq!(n, 100);
        assert_eq!(buf.peek(), &payload[..]);
        check_invariants(&buf);
    }

    #[test]
    fn write_fd_sends_readable_region() {
        let (tx, mut rx) = UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();

        let mut buf = Buffer::new();
        buf.append(b"echo this");
        let n = buf.write_fd(tx.as_raw_fd()).unwrap();
        assert_eq!(n, 9);
        buf.retrieve(n);

        let mut out = [0u8; 9];
        rx.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"echo this");
    }
}
