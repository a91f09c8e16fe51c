//! Byte buffers with position and limit
//!
//! A [`Buffer`] is a cloneable handle to shared storage with the usual
//! `0 <= position <= limit <= capacity` cursor. Transfers only touch
//! `[position, limit)` and advance `position` by the number of bytes
//! actually moved; `limit` is never changed by a transfer.
//!
//! The engine never holds the storage lock across a native call. It
//! snapshots the window, performs the transfer, then commits the result
//! at the position it started from. If the application moved the cursor
//! in the meantime, the commit is clamped to `limit` and logged instead
//! of failing the transfer that already happened.

use std::sync::Arc;

use heapless::Vec as HVec;
use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Storage {
    data: Vec<u8>,
    position: usize,
    limit: usize,
}

/// Shared byte buffer
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Arc<Mutex<Storage>>,
}

/// The cursor moved under an in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct BufferModified {
    pub position: usize,
    pub limit: usize,
    pub requested: usize,
}

impl Buffer {
    /// Zero-filled buffer, position 0, limit at capacity
    pub fn allocate(capacity: usize) -> Self {
        Self::wrap(vec![0; capacity])
    }

    /// Buffer over existing bytes, position 0, limit at capacity
    pub fn wrap(data: Vec<u8>) -> Self {
        let limit = data.len();
        Self {
            inner: Arc::new(Mutex::new(Storage {
                data,
                position: 0,
                limit,
            })),
        }
    }

    /// True if both handles share the same storage
    pub fn ptr_eq(a: &Buffer, b: &Buffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn position(&self) -> usize {
        self.inner.lock().position
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    /// `limit - position`
    pub fn remaining(&self) -> usize {
        let s = self.inner.lock();
        s.limit - s.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Move the cursor; fails if past `limit`
    pub fn set_position(&self, position: usize) -> Result<()> {
        let mut s = self.inner.lock();
        if position > s.limit {
            return Err(Error::InvalidArgument("position past limit"));
        }
        s.position = position;
        Ok(())
    }

    /// Move the limit; the position follows if it would lie beyond it
    pub fn set_limit(&self, limit: usize) -> Result<()> {
        let mut s = self.inner.lock();
        if limit > s.data.len() {
            return Err(Error::InvalidArgument("limit past capacity"));
        }
        s.limit = limit;
        if s.position > limit {
            s.position = limit;
        }
        Ok(())
    }

    /// Limit to the current position, position to zero
    pub fn flip(&self) {
        let mut s = self.inner.lock();
        s.limit = s.position;
        s.position = 0;
    }

    /// Position to zero, limit to capacity
    pub fn clear(&self) {
        let mut s = self.inner.lock();
        s.position = 0;
        s.limit = s.data.len();
    }

    /// Position to zero
    pub fn rewind(&self) {
        self.inner.lock().position = 0;
    }

    /// Relative bulk put
    pub fn put(&self, src: &[u8]) -> Result<()> {
        let mut s = self.inner.lock();
        if src.len() > s.limit - s.position {
            return Err(Error::InvalidArgument("buffer overflow"));
        }
        let start = s.position;
        s.data[start..start + src.len()].copy_from_slice(src);
        s.position += src.len();
        Ok(())
    }

    pub fn put_u8(&self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    /// Relative bulk get
    pub fn get(&self, dst: &mut [u8]) -> Result<()> {
        let mut s = self.inner.lock();
        if dst.len() > s.limit - s.position {
            return Err(Error::InvalidArgument("buffer underflow"));
        }
        let start = s.position;
        dst.copy_from_slice(&s.data[start..start + dst.len()]);
        s.position += dst.len();
        Ok(())
    }

    pub fn get_u8(&self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.get(&mut byte)?;
        Ok(byte[0])
    }

    /// Absolute get, bounded by `limit`
    pub fn get_at(&self, index: usize) -> Result<u8> {
        let s = self.inner.lock();
        if index >= s.limit {
            return Err(Error::InvalidArgument("index past limit"));
        }
        Ok(s.data[index])
    }

    /// Copy of `[position, limit)` without moving the cursor
    pub fn slice(&self) -> Vec<u8> {
        let s = self.inner.lock();
        s.data[s.position..s.limit].to_vec()
    }

    /// Copy of `[0, limit)`
    pub fn to_vec(&self) -> Vec<u8> {
        let s = self.inner.lock();
        s.data[..s.limit].to_vec()
    }

    /// Current position and remaining length, read atomically
    pub(crate) fn cursor(&self) -> (usize, usize) {
        let s = self.inner.lock();
        (s.position, s.limit - s.position)
    }

    /// Position plus a copy of the window
    pub(crate) fn window(&self) -> (usize, Vec<u8>) {
        let s = self.inner.lock();
        (s.position, s.data[s.position..s.limit].to_vec())
    }

    /// Move the position to `new`; `position <= new <= limit` must hold
    pub(crate) fn shift_position(&self, new: usize) -> std::result::Result<(), BufferModified> {
        let mut s = self.inner.lock();
        if new < s.position || new > s.limit {
            return Err(BufferModified {
                position: s.position,
                limit: s.limit,
                requested: new,
            });
        }
        s.position = new;
        Ok(())
    }

    /// Advance to `start + n`, clamping to `limit` if the cursor moved
    pub(crate) fn advance_from(&self, start: usize, n: usize) {
        if let Err(modified) = self.shift_position(start + n) {
            warn!(
                "buffer modified during transfer: position {} limit {} requested {}",
                modified.position,
                modified.limit,
                modified.requested
            );
            let mut s = self.inner.lock();
            s.position = s.limit;
        }
    }

    /// Store `data` at `start` without moving the cursor
    ///
    /// Bytes that would land past `limit` are dropped.
    pub(crate) fn write_at(&self, start: usize, data: &[u8]) {
        let mut s = self.inner.lock();
        let end = (start + data.len()).min(s.limit);
        if start < end {
            let n = end - start;
            s.data[start..end].copy_from_slice(&data[..n]);
        }
    }

    /// Store received data at `start` and advance past it
    pub(crate) fn commit(&self, start: usize, data: &[u8]) {
        self.write_at(start, data);
        self.advance_from(start, data.len());
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::wrap(data)
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::wrap(data.to_vec())
    }
}

/// Big-endian encoding of the `size` low bytes of `value`
pub fn encode_subaddress(value: u32, size: usize) -> Result<HVec<u8, 4>> {
    if !(1..=4).contains(&size) {
        return Err(Error::InvalidArgument("subaddress size must be 1 to 4"));
    }
    let bytes = value.to_be_bytes();
    let mut out = HVec::new();
    for &b in &bytes[4 - size..] {
        out.push(b)
            .map_err(|_| Error::InvalidArgument("subaddress size must be 1 to 4"))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_flip_get() {
        let buf = Buffer::allocate(4);
        buf.put(&[1, 2, 3]).unwrap();
        buf.flip();
        assert_eq!(buf.limit(), 3);
        assert_eq!(buf.get_u8().unwrap(), 1);
        assert_eq!(buf.slice(), vec![2, 3]);
        assert_eq!(buf.position(), 1);
    }

    #[test]
    fn test_overflow_rejected() {
        let buf = Buffer::allocate(2);
        assert!(buf.put(&[1, 2, 3]).is_err());
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_set_limit_pulls_position() {
        let buf = Buffer::allocate(8);
        buf.set_position(6).unwrap();
        buf.set_limit(4).unwrap();
        assert_eq!(buf.position(), 4);
        assert!(buf.set_limit(9).is_err());
        assert!(buf.set_position(5).is_err());
    }

    #[test]
    fn test_clones_share_storage() {
        let a = Buffer::allocate(2);
        let b = a.clone();
        a.put_u8(7).unwrap();
        assert_eq!(b.position(), 1);
        assert!(Buffer::ptr_eq(&a, &b));
        assert!(!Buffer::ptr_eq(&a, &Buffer::allocate(2)));
    }

    #[test]
    fn test_commit_clamps_when_limit_shrinks() {
        let buf = Buffer::allocate(8);
        let (start, window) = buf.window();
        assert_eq!(window.len(), 8);

        // Another thread shrinks the buffer mid-transfer
        buf.set_limit(3).unwrap();
        buf.commit(start, &[9; 6]);

        // Tolerated: position clamped to the new limit
        assert_eq!(buf.position(), 3);
        assert_eq!(buf.to_vec(), vec![9, 9, 9]);
    }

    #[test]
    fn test_shift_position_bounds() {
        let buf = Buffer::allocate(4);
        buf.set_position(2).unwrap();
        assert!(buf.shift_position(1).is_err());
        assert!(buf.shift_position(5).is_err());
        assert!(buf.shift_position(4).is_ok());
    }

    #[test]
    fn test_encode_subaddress() {
        assert_eq!(encode_subaddress(0x10, 1).unwrap().as_slice(), &[0x10]);
        assert_eq!(
            encode_subaddress(0x0001_0203, 3).unwrap().as_slice(),
            &[0x01, 0x02, 0x03]
        );
        // Truncated to the low bytes
        assert_eq!(encode_subaddress(0x1234, 1).unwrap().as_slice(), &[0x34]);
        assert!(encode_subaddress(0, 0).is_err());
        assert!(encode_subaddress(0, 5).is_err());
    }

    proptest! {
        #[test]
        fn prop_cursor_invariant(cap in 0usize..64, pos in 0usize..80, lim in 0usize..80) {
            let buf = Buffer::allocate(cap);
            let _ = buf.set_limit(lim);
            let _ = buf.set_position(pos);
            prop_assert!(buf.position() <= buf.limit());
            prop_assert!(buf.limit() <= buf.capacity());
        }

        #[test]
        fn prop_subaddress_round_trips_low_bytes(value: u32, size in 1usize..=4) {
            let encoded = encode_subaddress(value, size).unwrap();
            prop_assert_eq!(encoded.len(), size);
            let decoded = encoded.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            let mask = (1u64 << (8 * size)) - 1;
            prop_assert_eq!(decoded, value as u64 & mask);
        }

        #[test]
        fn prop_commit_advances_by_count(cap in 1usize..32, pos in 0usize..32, n in 0usize..32) {
            let buf = Buffer::allocate(cap);
            let pos = pos.min(cap);
            buf.set_position(pos).unwrap();
            let n = n.min(cap - pos);
            let (start, _) = buf.window();
            buf.commit(start, &vec![0xAB; n]);
            prop_assert_eq!(buf.position(), pos + n);
            prop_assert_eq!(buf.limit(), cap);
        }
    }
}
