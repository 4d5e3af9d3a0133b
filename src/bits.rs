use std::fmt;

/// A fixed-width bit vector.
///
/// Storage is least-significant byte first, with bit 0 in the lowest bit of
/// byte 0. Bits above `width` are always zero.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Bits {
    width: usize,
    bytes: Vec<u8>,
}

impl Bits {
    /// An all-zero vector of `width` bits
    pub fn zero(width: usize) -> Self {
        Self {
            width,
            bytes: vec![0; width.div_ceil(8)],
        }
    }

    /// Build a vector from an integer, truncating anything above `width`
    pub fn from_u64(value: u64, width: usize) -> Self {
        Self::from_le_bytes(&value.to_le_bytes(), width)
    }

    /// Build a vector from bytes given least-significant byte first.
    ///
    /// Missing high bytes are zero, surplus bytes and padding bits above
    /// `width` are discarded.
    pub fn from_le_bytes(bytes: &[u8], width: usize) -> Self {
        let mut bits = Self::zero(width);
        let n = bits.bytes.len().min(bytes.len());
        bits.bytes[..n].copy_from_slice(&bytes[..n]);
        bits.mask();
        bits
    }

    /// Build a vector from bytes given most-significant byte first
    pub fn from_be_bytes(bytes: &[u8], width: usize) -> Self {
        let le: Vec<u8> = bytes.iter().rev().copied().collect();
        Self::from_le_bytes(&le, width)
    }

    fn mask(&mut self) {
        let rem = self.width % 8;
        if rem != 0 {
            if let Some(top) = self.bytes.last_mut() {
                *top &= (1u8 << rem) - 1;
            }
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_le_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The vector as exactly `len` bytes, least-significant first, zero padded
    /// or truncated as needed.
    pub fn to_le_bytes_padded(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let n = len.min(self.bytes.len());
        out[..n].copy_from_slice(&self.bytes[..n]);
        out
    }

    /// The vector as bytes, most-significant first
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.bytes.iter().rev().copied().collect()
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.width && (self.bytes[index / 8] >> (index % 8)) & 1 == 1
    }

    pub fn set_bit(&mut self, index: usize, value: bool) {
        if index >= self.width {
            return;
        }
        let mask = 1u8 << (index % 8);
        if value {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
    }

    /// Extract `width` bits starting at bit `offset`. Bits past the end of
    /// this vector read as zero.
    pub fn slice(&self, offset: usize, width: usize) -> Self {
        let mut out = Self::zero(width);
        for i in 0..width {
            out.set_bit(i, self.bit(offset + i));
        }
        out
    }

    /// Overwrite the bits starting at `offset` with `value`
    pub fn splice(&mut self, offset: usize, value: &Self) {
        for i in 0..value.width {
            self.set_bit(offset + i, value.bit(i));
        }
    }

    /// The lowest 64 bits as an integer
    pub fn low_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = self.bytes.len().min(8);
        buf[..n].copy_from_slice(&self.bytes[..n]);
        u64::from_le_bytes(buf)
    }

    /// The value as an integer, or `None` if it does not fit in 64 bits
    pub fn to_u64(&self) -> Option<u64> {
        if self.bytes.iter().skip(8).any(|&b| b != 0) {
            return None;
        }
        Some(self.low_u64())
    }

    /// Bits from the most significant down to bit 0
    pub fn iter_msb_first(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.width).rev().map(move |i| self.bit(i))
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bits<{}>({})", self.width, self)
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        if self.bytes.is_empty() {
            return write!(f, "0");
        }
        for byte in self.bytes.iter().rev() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
