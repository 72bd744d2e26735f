use bitvec::prelude::*;
use log::warn;

/// a bit-per-resource allocation map laid over raw image bytes;
/// a set bit means the resource is in use
#[derive(Debug)]
pub struct Bitmap<'a> {
    bits: &'a mut BitSlice<u8, Lsb0>,
}

impl<'a> Bitmap<'a> {
    /// view the first `len` bits of `bytes` as a bitmap
    /// # Panics
    /// if `bytes` holds fewer than `len` bits
    pub fn new(bytes: &'a mut [u8], len: usize) -> Self {
        let bits = &mut BitSlice::<u8, Lsb0>::from_slice_mut(bytes)[..len];
        Bitmap { bits }
    }

    /// number of tracked resources
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// check if resource `i` is in use
    pub fn get(&self, i: usize) -> bool {
        self.bits.get(i).as_deref().copied().unwrap_or(false)
    }

    pub fn set(&mut self, i: usize) {
        self.bits.set(i, true);
    }

    /// mark resource `i` free
    ///
    /// No double free detection beyond a warning: the caller must only
    /// release what it previously allocated.
    pub fn clear(&mut self, i: usize) {
        if !self.get(i) {
            warn!("clearing bit {i} which is already free");
        }
        self.bits.set(i, false);
    }

    /// first free index at or after `start`
    pub fn first_free(&self, start: usize) -> Option<usize> {
        self.bits
            .get(start..)
            .and_then(|rest| rest.first_zero())
            .map(|p| p + start)
    }

    /// first-fit allocation: claim the first free index at or after `start`
    pub fn allocate(&mut self, start: usize) -> Option<usize> {
        self.first_free(start).map(|index| {
            self.set(index);
            index
        })
    }

    /// calculate the number of free resources
    pub fn count_free(&self) -> usize {
        self.bits.count_zeros()
    }
}

/// check bit `i` of a bitmap without borrowing it mutably
pub fn is_set(bytes: &[u8], i: usize) -> bool {
    BitSlice::<u8, Lsb0>::from_slice(bytes)
        .get(i)
        .as_deref()
        .copied()
        .unwrap_or(false)
}

/// count the set bits among the first `len` bits of `bytes`
pub fn count_used(bytes: &[u8], len: usize) -> usize {
    BitSlice::<u8, Lsb0>::from_slice(bytes)[..len].count_ones()
}
