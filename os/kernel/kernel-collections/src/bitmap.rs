/// A bit-per-unit occupancy vector over borrowed storage.
///
/// The storage is handed in once (the pool bitmaps live in a region the
/// loader reserves) and never resized. Only the first [`len`](Self::len)
/// bits are used; trailing bits of the last byte are never handed out.
pub struct Bitmap<'a> {
    bytes: &'a mut [u8],
    len: usize,
}

impl<'a> Bitmap<'a> {
    /// Wrap `bytes` as a bitmap of `len` bits and clear it.
    ///
    /// ### Panics
    /// If `bytes` cannot hold `len` bits.
    pub fn new(bytes: &'a mut [u8], len: usize) -> Self {
        assert!(len <= bytes.len() * 8, "bitmap storage too small");
        let mut bitmap = Self { bytes, len };
        bitmap.clear();
        bitmap
    }

    /// Number of units tracked.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the backing storage in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Release every unit.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Whether unit `index` is in use.
    ///
    /// ### Panics
    /// If `index` is out of range.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bitmap index {index} out of range");
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    /// Mark unit `index` as used (`true`) or free (`false`).
    ///
    /// ### Panics
    /// If `index` is out of range.
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bitmap index {index} out of range");
        let mask = 1u8 << (index % 8);
        if value {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
    }

    /// Set `count` units starting at `start` to `value`.
    pub fn set_range(&mut self, start: usize, count: usize, value: bool) {
        for index in start..start + count {
            self.set(index, value);
        }
    }

    /// Find the first run of `count` free units and return its start.
    ///
    /// Skips fully used bytes first, then finds the first free bit in the
    /// first byte that has one, and scans forward from there until `count`
    /// consecutive free bits are seen. The bits are not marked; the caller
    /// does that with [`set_range`](Self::set_range).
    #[must_use]
    pub fn alloc(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.len {
            return None;
        }

        let byte = self.bytes.iter().position(|&b| b != 0xFF)?;
        let bit = self.bytes[byte].trailing_ones() as usize;
        let first_free = byte * 8 + bit;
        if first_free >= self.len {
            return None;
        }

        let mut run = 0;
        for index in first_free..self.len {
            if self.test(index) {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                return Some(index + 1 - count);
            }
        }
        None
    }

    /// Number of units in use.
    #[must_use]
    pub fn count_used(&self) -> usize {
        (0..self.len).filter(|&i| self.test(i)).count()
    }

    /// Indices of the units in use, ascending. Empty bytes are skipped whole.
    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes
            .iter()
            .enumerate()
            .filter(|&(_, &byte)| byte != 0)
            .flat_map(|(i, &byte)| {
                (0..8)
                    .filter(move |bit| byte & (1 << bit) != 0)
                    .map(move |bit| i * 8 + bit)
            })
            .take_while(|&index| index < self.len)
    }

    /// Take over the state of `other`.
    ///
    /// ### Panics
    /// If `other` tracks a different number of units.
    pub fn copy_from(&mut self, other: &Bitmap<'_>) {
        assert_eq!(self.len, other.len, "copying a bitmap of {} units", other.len);
        let used = self.len.div_ceil(8);
        self.bytes[..used].copy_from_slice(&other.bytes[..used]);
    }

    /// The raw storage, e.g. for dumping.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

impl core::fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("used", &self.count_used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitmap_is_clear() {
        let mut storage = [0xAAu8; 4];
        let bitmap = Bitmap::new(&mut storage, 32);
        assert_eq!(bitmap.count_used(), 0);
        assert_eq!(bitmap.byte_len(), 4);
        assert!(!bitmap.test(31));
    }

    #[test]
    fn alloc_set_clear_round_trip() {
        let mut storage = [0u8; 4];
        let mut bitmap = Bitmap::new(&mut storage, 32);
        bitmap.set_range(0, 3, true);
        let before: Vec<u8> = bitmap.as_bytes().to_vec();

        let start = bitmap.alloc(5).unwrap();
        assert_eq!(start, 3);
        bitmap.set_range(start, 5, true);
        assert_eq!(bitmap.count_used(), 8);
        bitmap.set_range(start, 5, false);

        assert_eq!(bitmap.as_bytes(), &before[..]);
    }

    #[test]
    fn alloc_skips_full_bytes_and_short_holes() {
        let mut storage = [0u8; 3];
        let mut bitmap = Bitmap::new(&mut storage, 24);
        bitmap.set_range(0, 8, true);
        bitmap.set(10, true);

        assert_eq!(bitmap.alloc(1), Some(8));
        assert_eq!(bitmap.alloc(2), Some(8));
        assert_eq!(bitmap.alloc(3), Some(11));
    }

    #[test]
    fn alloc_fails_when_no_run_fits() {
        let mut storage = [0u8; 1];
        let mut bitmap = Bitmap::new(&mut storage, 6);
        bitmap.set(2, true);
        assert_eq!(bitmap.alloc(4), None);
        assert_eq!(bitmap.alloc(3), Some(3));
        assert_eq!(bitmap.alloc(0), None);
        assert_eq!(bitmap.alloc(7), None);
    }

    #[test]
    fn trailing_bits_are_never_handed_out() {
        let mut storage = [0u8; 1];
        let mut bitmap = Bitmap::new(&mut storage, 4);
        for i in 0..4 {
            assert_eq!(bitmap.alloc(1), Some(i));
            bitmap.set(i, true);
        }
        assert_eq!(bitmap.alloc(1), None);
    }

    #[test]
    fn sequential_allocations_never_overlap() {
        let mut storage = [0u8; 8];
        let mut bitmap = Bitmap::new(&mut storage, 64);
        let mut runs = Vec::new();
        for count in [3, 1, 7, 2, 5] {
            let start = bitmap.alloc(count).unwrap();
            bitmap.set_range(start, count, true);
            runs.push(start..start + count);
        }
        for (i, a) in runs.iter().enumerate() {
            for b in &runs[i + 1..] {
                assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn used_units_skip_empty_bytes() {
        let mut storage = [0u8; 4];
        let mut bitmap = Bitmap::new(&mut storage, 30);
        for i in [1, 7, 20, 29] {
            bitmap.set(i, true);
        }
        assert_eq!(bitmap.iter_used().collect::<Vec<_>>(), [1, 7, 20, 29]);
    }

    #[test]
    fn copy_takes_over_every_unit() {
        let mut from = [0u8; 2];
        let mut source = Bitmap::new(&mut from, 12);
        source.set_range(3, 4, true);
        source.set(11, true);

        let mut to = [0u8; 4];
        let mut copy = Bitmap::new(&mut to, 12);
        copy.set(0, true);
        copy.copy_from(&source);
        assert_eq!(copy.iter_used().collect::<Vec<_>>(), [3, 4, 5, 6, 11]);
        assert_eq!(copy.alloc(4), Some(7));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        let mut storage = [0u8; 1];
        let bitmap = Bitmap::new(&mut storage, 4);
        let _ = bitmap.test(4);
    }
}
