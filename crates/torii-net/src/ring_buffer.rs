//! Lock-free SPSC byte queue over a doubly-mapped memory region.
//!
//! The backing file is mapped twice into one contiguous virtual range, so
//! `buffer[i]` and `buffer[i + capacity]` are the same byte and a read or
//! write that crosses the end of the ring is still one contiguous span —
//! callers never see the wrap.
//!
//! Exactly one thread may produce and exactly one may consume. The split
//! into [`RingProducer`] and [`RingConsumer`] handles makes the roles
//! unswappable by construction; the two sides proceed in parallel with no
//! locks, coordinating only through the atomic indices.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::NetError;

struct RingInner {
    buffer: *mut u8,
    capacity: usize,
    mask: usize,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
}

// SAFETY: the raw buffer is only touched through the producer/consumer
// handles, which partition it by the index protocol below.
unsafe impl Send for RingInner {}
unsafe impl Sync for RingInner {}

impl RingInner {
    /// Bytes the producer may write without overtaking the consumer.
    fn free(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        read.wrapping_sub(write).wrapping_sub(1) & self.mask
    }

    /// Bytes the consumer may read without overtaking the producer.
    fn available(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        self.capacity.wrapping_sub(read.wrapping_sub(write)) & self.mask
    }
}

impl Drop for RingInner {
    fn drop(&mut self) {
        // SAFETY: `buffer` is the live 2 × capacity mapping created by
        // `map_ring`; nothing else unmaps it.
        unsafe {
            libc::munmap(self.buffer.cast(), self.capacity * 2);
        }
    }
}

/// An SPSC byte ring. Split it to obtain the two endpoint handles.
pub struct RingBuffer {
    inner: Arc<RingInner>,
}

impl RingBuffer {
    /// Allocate a ring with at least `capacity` usable bytes.
    ///
    /// The allocation is rounded up to the next multiple of the system
    /// page size and then to the next power of two. One byte is reserved
    /// to distinguish full from empty, so [`capacity`](Self::capacity)
    /// reports the rounded size minus one.
    ///
    /// # Errors
    ///
    /// Fails with [`NetError::MemoryMap`] if `capacity` is not greater
    /// than one or any step of the double mapping fails; partially
    /// constructed resources are released.
    pub fn with_capacity(capacity: usize) -> Result<Self, NetError> {
        if capacity <= 1 {
            return Err(NetError::MemoryMap(
                "capacity is not greater than one".into(),
            ));
        }

        let page = page_size()?;
        let capacity = capacity.div_ceil(page) * page;
        let capacity = capacity.next_power_of_two();

        let buffer = map_ring(capacity)?;

        Ok(Self {
            inner: Arc::new(RingInner {
                buffer,
                capacity,
                mask: capacity - 1,
                read_index: AtomicUsize::new(0),
                write_index: AtomicUsize::new(0),
            }),
        })
    }

    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity - 1
    }

    /// Split into the producer and consumer endpoints.
    #[must_use]
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                inner: Arc::clone(&self.inner),
            },
            RingConsumer { inner: self.inner },
        )
    }
}

/// The writing endpoint of a [`RingBuffer`]. Owned by exactly one thread.
pub struct RingProducer {
    inner: Arc<RingInner>,
}

impl RingProducer {
    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity - 1
    }

    /// Bytes that may currently be written.
    #[must_use]
    pub fn free(&self) -> usize {
        self.inner.free()
    }

    /// Bytes that may currently be read by the consumer.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.available()
    }

    /// Borrow a contiguous writable span of up to `size` bytes.
    ///
    /// The span may be shorter than requested (down to empty) if the ring
    /// is nearly full. Nothing becomes visible to the consumer until
    /// [`end_write`](Self::end_write) publishes it. No other producer-side
    /// call may intervene between the pair.
    pub fn begin_write(&mut self, size: usize) -> &mut [u8] {
        let clamped = size.min(self.inner.free());
        let write = self.inner.write_index.load(Ordering::Relaxed);

        // SAFETY: only this producer writes [write, write + clamped), the
        // consumer stays out of it by the free() protocol, and the double
        // mapping makes the span contiguous even across the wrap.
        unsafe { std::slice::from_raw_parts_mut(self.inner.buffer.add(write), clamped) }
    }

    /// Publish `size` bytes written into the span from
    /// [`begin_write`](Self::begin_write); `size` is clamped to the free
    /// space observed now. Returns the free bytes remaining after the
    /// publish (the true value may only be larger).
    pub fn end_write(&mut self, size: usize) -> usize {
        let free = self.inner.free();
        let clamped = size.min(free);
        let write = self.inner.write_index.load(Ordering::Relaxed);

        self.inner
            .write_index
            .store(write.wrapping_add(clamped) & self.inner.mask, Ordering::Release);

        free - clamped
    }

    /// Copy as much of `data` as fits and publish it. Returns the number
    /// of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let written = {
            let span = self.begin_write(data.len());
            let written = span.len();
            span.copy_from_slice(&data[..written]);
            written
        };

        self.end_write(written);
        written
    }
}

/// The reading endpoint of a [`RingBuffer`]. Owned by exactly one thread.
pub struct RingConsumer {
    inner: Arc<RingInner>,
}

impl RingConsumer {
    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity - 1
    }

    /// Bytes that may currently be read.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.available()
    }

    /// Bytes that may currently be written by the producer.
    #[must_use]
    pub fn free(&self) -> usize {
        self.inner.free()
    }

    /// Borrow a contiguous readable span of up to `size` bytes.
    ///
    /// The span may be shorter than requested (down to empty) if little
    /// data is available. The bytes are not released to the producer until
    /// [`end_read`](Self::end_read). No other consumer-side call may
    /// intervene between the pair.
    pub fn begin_read(&mut self, size: usize) -> &[u8] {
        let clamped = size.min(self.inner.available());
        let read = self.inner.read_index.load(Ordering::Relaxed);

        // SAFETY: only this consumer reads [read, read + clamped), the
        // producer stays out of it by the available() protocol, and the
        // double mapping makes the span contiguous even across the wrap.
        unsafe { std::slice::from_raw_parts(self.inner.buffer.add(read), clamped) }
    }

    /// Release `size` consumed bytes back to the producer; `size` is
    /// clamped to the bytes observed available now. Returns the bytes
    /// still available after the release (the true value may only be
    /// larger).
    pub fn end_read(&mut self, size: usize) -> usize {
        let available = self.inner.available();
        let clamped = size.min(available);
        let read = self.inner.read_index.load(Ordering::Relaxed);

        self.inner
            .read_index
            .store(read.wrapping_add(clamped) & self.inner.mask, Ordering::Release);

        available - clamped
    }

    /// Copy up to `destination.len()` bytes out of the ring and release
    /// them. Returns the number of bytes read.
    pub fn read(&mut self, destination: &mut [u8]) -> usize {
        let read = {
            let span = self.begin_read(destination.len());
            let read = span.len();
            destination[..read].copy_from_slice(span);
            read
        };

        self.end_read(read);
        read
    }
}

fn page_size() -> Result<usize, NetError> {
    // SAFETY: sysconf with a valid name has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if page <= 0 {
        return Err(NetError::MemoryMap("failed to query the page size".into()));
    }

    Ok(page as usize)
}

/// Map one `capacity`-sized shared-memory file twice, back to back, into a
/// reserved 2 × `capacity` virtual range.
fn map_ring(capacity: usize) -> Result<*mut u8, NetError> {
    let fd = ring_fd()?;

    // SAFETY: raw libc mapping calls; each failure path releases whatever
    // was established before it.
    unsafe {
        if libc::ftruncate(fd, capacity as libc::off_t) != 0 {
            libc::close(fd);
            return Err(map_error("ftruncate"));
        }

        let reservation = libc::mmap(
            std::ptr::null_mut(),
            capacity * 2,
            libc::PROT_NONE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            -1,
            0,
        );

        if reservation == libc::MAP_FAILED {
            libc::close(fd);
            return Err(map_error("address reservation"));
        }

        let base = reservation.cast::<u8>();

        let first = libc::mmap(
            base.cast(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_FIXED | libc::MAP_SHARED,
            fd,
            0,
        );

        if first != base.cast() {
            libc::munmap(base.cast(), capacity * 2);
            libc::close(fd);
            return Err(map_error("first mapping"));
        }

        let second = libc::mmap(
            base.add(capacity).cast(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_FIXED | libc::MAP_SHARED,
            fd,
            0,
        );

        if second != base.add(capacity).cast() {
            libc::munmap(base.cast(), capacity * 2);
            libc::close(fd);
            return Err(map_error("second mapping"));
        }

        if libc::close(fd) != 0 {
            libc::munmap(base.cast(), capacity * 2);
            return Err(map_error("descriptor close"));
        }

        Ok(base)
    }
}

#[cfg(target_os = "linux")]
fn ring_fd() -> Result<libc::c_int, NetError> {
    // SAFETY: the name is a valid NUL-terminated string.
    let fd = unsafe {
        libc::memfd_create(b"torii-ring-buffer\0".as_ptr().cast(), libc::MFD_CLOEXEC)
    };

    if fd < 0 {
        return Err(map_error("memfd_create"));
    }

    Ok(fd)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn ring_fd() -> Result<libc::c_int, NetError> {
    let mut template = *b"/tmp/torii-ring-XXXXXX\0";

    // SAFETY: the template is a valid mutable NUL-terminated path.
    let fd = unsafe { libc::mkstemp(template.as_mut_ptr().cast()) };

    if fd < 0 {
        return Err(map_error("mkstemp"));
    }

    // SAFETY: the template now holds the created path.
    if unsafe { libc::unlink(template.as_ptr().cast()) } != 0 {
        // SAFETY: fd was just created.
        unsafe { libc::close(fd) };
        return Err(map_error("unlink"));
    }

    Ok(fd)
}

fn map_error(stage: &str) -> NetError {
    NetError::MemoryMap(format!(
        "{stage} failed: {}",
        std::io::Error::last_os_error()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_is_rounded_and_reports_one_less() {
        let ring = RingBuffer::with_capacity(1024).unwrap();
        let allocated = ring.capacity() + 1;

        assert!(allocated.is_power_of_two());
        assert!(ring.capacity() >= 4095);
    }

    #[test]
    fn tiny_capacity_is_rejected() {
        assert!(RingBuffer::with_capacity(0).is_err());
        assert!(RingBuffer::with_capacity(1).is_err());
    }

    #[test]
    fn free_plus_available_is_capacity() {
        let ring = RingBuffer::with_capacity(4096).unwrap();
        let capacity = ring.capacity();
        let (mut producer, mut consumer) = ring.split();

        assert_eq!(producer.free() + consumer.available(), capacity);

        producer.write(&[1, 2, 3]);
        assert_eq!(producer.free() + consumer.available(), capacity);
        assert_eq!(consumer.available(), 3);

        let mut sink = [0u8; 2];
        consumer.read(&mut sink);
        assert_eq!(producer.free() + consumer.available(), capacity);
        assert_eq!(sink, [1, 2]);
    }

    #[test]
    fn writes_wrap_transparently() {
        let ring = RingBuffer::with_capacity(4096).unwrap();
        let capacity = ring.capacity();
        let (mut producer, mut consumer) = ring.split();

        // Walk the indices close to the end of the allocation, then write
        // a span that crosses it.
        let step = vec![7u8; capacity - 100];
        let mut sink = vec![0u8; capacity];
        producer.write(&step);
        consumer.read(&mut sink[..step.len()]);

        let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        assert_eq!(producer.write(&data), 200);
        assert_eq!(consumer.read(&mut sink[..200]), 200);
        assert_eq!(&sink[..200], &data[..]);
    }

    #[test]
    fn begin_write_clamps_to_free_space() {
        let ring = RingBuffer::with_capacity(4096).unwrap();
        let capacity = ring.capacity();
        let (mut producer, _consumer) = ring.split();

        let span = producer.begin_write(usize::MAX);
        assert_eq!(span.len(), capacity);
        producer.end_write(capacity);

        assert!(producer.begin_write(1).is_empty());
    }

    #[test]
    fn spsc_byte_stream_round_trip() {
        const TOTAL: usize = 100_000;

        let ring = RingBuffer::with_capacity(1024).unwrap();
        let (mut producer, mut consumer) = ring.split();

        let writer = thread::spawn(move || {
            for i in 0..TOTAL {
                let byte = [i as u8];
                while producer.write(&byte) == 0 {
                    thread::yield_now();
                }
            }
            producer
        });

        let reader = thread::spawn(move || {
            let mut received = Vec::with_capacity(TOTAL);
            let mut chunk = [0u8; 256];

            while received.len() < TOTAL {
                let read = consumer.read(&mut chunk);
                if read == 0 {
                    thread::yield_now();
                }
                received.extend_from_slice(&chunk[..read]);
            }

            (consumer, received)
        });

        writer.join().unwrap();
        let (consumer, received) = reader.join().unwrap();

        assert_eq!(received.len(), TOTAL);
        for (i, &byte) in received.iter().enumerate() {
            assert_eq!(byte, i as u8, "byte {i}");
        }
        assert_eq!(consumer.available(), 0);
    }
}
