use bitvec::prelude::*;

/// Binarized ridge map, the input handed over by upstream image processing.
/// One bit per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMap {
    width: usize,
    height: usize,
    bits: BitVec<u32, Lsb0>,
}

impl BinaryMap {
    pub fn new(width: usize, height: usize) -> BinaryMap {
        BinaryMap {
            width,
            height,
            bits: bitvec![u32, Lsb0; 0; width * height],
        }
    }

    /// Builds a map from ASCII-art rows; `#` marks a ridge pixel. Intended for
    /// fixtures and small demos.
    pub fn from_text(rows: &[&str]) -> BinaryMap {
        let height = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut map = BinaryMap::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                if c == '#' {
                    map.set(x, y, true);
                }
            }
        }
        map
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn offset(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits[self.offset(x, y)]
    }

    /// Signed-coordinate probe; anything outside the map reads as background.
    #[inline]
    pub fn at(&self, x: isize, y: isize) -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < self.width
            && (y as usize) < self.height
            && self.get(x as usize, y as usize)
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        let offset = self.offset(x, y);
        self.bits.set(offset, value);
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }
}

//
// --- Tests --------------------------------------------------------------------------------------
//
