//! A bipartite circular byte buffer.
//!
//! Grounded on the single-reservation, two-region discipline of a classic
//! bip-buffer: region `a` holds the oldest committed bytes, region `b`
//! holds bytes that wrapped around the end of the backing array once `a`
//! no longer has room to grow. At most one reservation may be outstanding
//! at a time.

use std::ops::Range;

/// A contiguous free slice returned by [`BipBuffer::reserve`]. The caller
/// writes into `buf[pos .. pos + len]` (or a prefix of it) then calls
/// [`BipBuffer::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub pos: usize,
    pub len: usize,
}

#[derive(Debug)]
pub struct BipBuffer {
    buf: Vec<u8>,
    a: Range<usize>,
    b: Range<usize>,
    reserved: Option<Range<usize>>,
}

impl BipBuffer {
    pub fn new(capacity: usize) -> Self {
        BipBuffer {
            buf: vec![0u8; capacity],
            a: 0..0,
            b: 0..0,
            reserved: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn length(&self) -> usize {
        self.a.len() + self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Bytes free for a future reservation, not counting any reservation
    /// currently outstanding.
    pub fn available(&self) -> usize {
        self.capacity() - self.length() - self.reserved.as_ref().map_or(0, |r| r.len())
    }

    /// The contiguous free run `reserve` would hand out right now, absent
    /// the "open B by wrapping" fallback. Used to decide whether a
    /// compress pass is worth running before growing the buffer.
    pub fn unused_space(&self) -> usize {
        if !self.b.is_empty() {
            self.a.start - self.b.end
        } else {
            self.capacity() - self.a.end
        }
    }

    /// Bytes that a `compress` call would reclaim at the front of the
    /// buffer (the dead space behind region `a`).
    pub fn compress_gain(&self) -> usize {
        self.a.start
    }

    /// Reserve up to `len` contiguous bytes. Returns `None` if no run of
    /// that length is available anywhere in the buffer. At most one
    /// reservation may be outstanding; calling `reserve` again before
    /// `commit` replaces the prior (uncommitted) reservation.
    pub fn reserve(&mut self, len: usize) -> Option<Reservation> {
        let pos = if !self.b.is_empty() {
            let room = self.a.start - self.b.end;
            if room < len {
                return None;
            }
            self.b.end
        } else {
            let tail = self.capacity() - self.a.end;
            if tail >= len {
                self.a.end
            } else if self.a.start >= len {
                0
            } else {
                return None;
            }
        };
        self.reserved = Some(pos..pos + len);
        Some(Reservation { pos, len })
    }

    /// The full write-side slice for the current reservation, for the
    /// caller to blit bytes into directly.
    pub fn reservation_slice(&mut self) -> &mut [u8] {
        let r = self.reserved.clone().expect("no outstanding reservation");
        &mut self.buf[r]
    }

    /// Commit `len` bytes of the outstanding reservation (`len` must be
    /// `<=` the reserved length). Clears the reservation.
    pub fn commit(&mut self, len: usize) {
        let r = self.reserved.take().expect("commit with no outstanding reservation");
        debug_assert!(len <= r.len());
        if len == 0 {
            return;
        }
        if self.a.is_empty() {
            self.a = r.start..r.start + len;
        } else if r.start == self.a.end {
            self.a.end += len;
        } else if self.b.is_empty() {
            self.b = r.start..r.start + len;
        } else {
            self.b.end += len;
        }
    }

    /// The oldest contiguous committed slice, or `None` if the buffer is
    /// empty. Region `a` is always returned ahead of region `b`.
    pub fn peek(&self) -> Option<&[u8]> {
        if !self.a.is_empty() {
            Some(&self.buf[self.a.clone()])
        } else if !self.b.is_empty() {
            Some(&self.buf[self.b.clone()])
        } else {
            None
        }
    }

    /// Discard `len` bytes from the front of the committed data, spanning
    /// the `a`/`b` boundary if needed. Panics if `len > length()`.
    pub fn junk(&mut self, mut len: usize) {
        assert!(len <= self.length(), "junk past committed length");
        while len > 0 {
            if self.a.is_empty() {
                // `a` only empties out when `b` is empty too (junk never
                // overcommits), so reaching here with len > 0 is a bug.
                unreachable!("junk exceeded committed bytes");
            }
            let take = len.min(self.a.len());
            self.a.start += take;
            len -= take;
            if self.a.is_empty() {
                // `b` always starts at 0, so its bytes are already at the
                // front of the array: promoting it to `a` is a pure
                // bookkeeping move, no copy needed.
                self.a = 0..self.b.len();
                self.b = 0..0;
            }
        }
    }

    /// Slide committed bytes down to offset 0, eliminating the dead space
    /// behind region `a`. No-op if there is no outstanding reservation and
    /// `a` already starts at zero. Panics if a reservation is outstanding.
    pub fn compress(&mut self) {
        assert!(self.reserved.is_none(), "cannot compress with an outstanding reservation");
        if self.a.start == 0 {
            return;
        }
        let len = self.length();
        if !self.b.is_empty() {
            // a and b both slide down, concatenated, into one region.
            let a_len = self.a.len();
            let b_len = self.b.len();
            let mut merged = vec![0u8; a_len + b_len];
            merged[..a_len].copy_from_slice(&self.buf[self.a.clone()]);
            merged[a_len..].copy_from_slice(&self.buf[self.b.clone()]);
            self.buf[..merged.len()].copy_from_slice(&merged);
        } else {
            self.buf.copy_within(self.a.clone(), 0);
        }
        self.a = 0..len;
        self.b = 0..0;
    }

    /// Replace the backing storage with a larger buffer, preserving all
    /// committed bytes contiguously from offset 0. `new_capacity` must be
    /// `>= length()`. Panics if a reservation is outstanding.
    pub fn resize(&mut self, new_capacity: usize) {
        assert!(self.reserved.is_none(), "cannot resize with an outstanding reservation");
        assert!(new_capacity >= self.length());
        let mut new_buf = vec![0u8; new_capacity];
        let a_len = self.a.len();
        new_buf[..a_len].copy_from_slice(&self.buf[self.a.clone()]);
        if !self.b.is_empty() {
            new_buf[a_len..a_len + self.b.len()].copy_from_slice(&self.buf[self.b.clone()]);
        }
        let len = self.length();
        self.buf = new_buf;
        self.a = 0..len;
        self.b = 0..0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_start() {
        let b = BipBuffer::new(100);
        assert!(b.is_empty());
        assert_eq!(b.length(), 0);
        assert!(b.peek().is_none());
    }

    #[test]
    fn peek_none_at_zero_capacity() {
        let b = BipBuffer::new(0);
        assert!(b.peek().is_none());
    }

    #[test]
    fn write_read_split() {
        let mut b = BipBuffer::new(16);
        let r = b.reserve(12).unwrap();
        b.reservation_slice()[..12].copy_from_slice(b"Test Foo|Bar");
        assert_eq!(r.pos, 0);
        b.commit(12);
        assert_eq!(b.length(), 12);
        assert_eq!(b.peek().unwrap(), b"Test Foo|Bar");
        b.junk(8);
        assert_eq!(b.peek().unwrap(), b"|Bar");
    }

    #[test]
    fn fill_exact() {
        let mut b = BipBuffer::new(15);
        let input = b"foo bar baz foo";
        b.reserve(15).unwrap();
        b.reservation_slice().copy_from_slice(input);
        b.commit(15);
        assert_eq!(b.peek().unwrap(), &input[..]);
    }

    #[test]
    fn reserve_overflow() {
        let mut b = BipBuffer::new(16);
        assert!(b.reserve(17).is_none());
    }

    #[test]
    fn unused_space_after_wrap() {
        let mut b = BipBuffer::new(16);
        b.reserve(8).unwrap();
        b.reservation_slice().copy_from_slice(&[b'a'; 8]);
        b.commit(8);
        assert_eq!(b.unused_space(), 8);

        // The remaining 8-byte tail after `a` exactly fits this
        // reservation, so it extends `a` rather than wrapping into `b`.
        let r = b.reserve(8).unwrap();
        assert_eq!(r.pos, 8);
        b.reservation_slice().copy_from_slice(&[b'a'; 8]);
        b.commit(8);
        // a is now 0..16, no tail left and b is still empty.
        assert_eq!(b.unused_space(), 0);

        b.junk(8); // drop the first 8 bytes, a becomes 8..16
        // Still no contiguous tail after `a` (a.end == capacity): the
        // 8 bytes now dead in front of `a` are only reclaimable via
        // `compress`, reported separately by `compress_gain` -- they must
        // not be conflated with `unused_space`.
        assert_eq!(b.unused_space(), 0);
        assert_eq!(b.compress_gain(), 8);
    }

    #[test]
    fn compress_reclaims_front_space() {
        let mut b = BipBuffer::new(16);
        b.reserve(10).unwrap();
        b.reservation_slice()[..10].copy_from_slice(&[1; 10]);
        b.commit(10);
        b.junk(6);
        assert_eq!(b.compress_gain(), 6);
        b.compress();
        assert_eq!(b.compress_gain(), 0);
        assert_eq!(b.length(), 4);
        assert_eq!(b.peek().unwrap(), &[1, 1, 1, 1]);
    }

    #[test]
    fn resize_preserves_contents() {
        let mut b = BipBuffer::new(8);
        b.reserve(8).unwrap();
        b.reservation_slice().copy_from_slice(b"abcdefgh");
        b.commit(8);
        b.junk(4);
        b.resize(32);
        assert_eq!(b.capacity(), 32);
        assert_eq!(b.peek().unwrap(), b"efgh");
    }
}
