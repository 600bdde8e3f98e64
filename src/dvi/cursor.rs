//! Byte cursor over DVI, VF, PK and TFM buffers
//!
//! All multi-byte quantities in these formats are big-endian. Signed reads
//! sign-extend from the operand width, so a 3-byte `0xFFFFFF` reads as `-1`.

/// Attempt to read past the readable window of a [`ByteCursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
pub struct EndOfData {
    pub offset: usize,
    pub wanted: usize,
}

/// Sequential and random-access reader over a byte slice
///
/// The cursor may be restricted to a window `[start, end)` of the
/// underlying slice; positions are still absolute offsets into the slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    /// Cursor over `data[start..end]`, with `end` clamped to the slice length
    #[must_use]
    pub fn with_window(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data,
            pos: start.min(end),
            end,
        }
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pos >= self.end
    }

    /// Move to an absolute offset; seeking to `end` itself is allowed
    pub fn seek(&mut self, pos: usize) -> Result<(), EndOfData> {
        if pos > self.end {
            return Err(EndOfData {
                offset: pos,
                wanted: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), EndOfData> {
        self.take(n).map(|_| ())
    }

    /// Borrow the next `n` bytes and advance past them
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], EndOfData> {
        if n > self.remaining() {
            return Err(EndOfData {
                offset: self.pos,
                wanted: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, EndOfData> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, EndOfData> {
        self.read_uint(2).map(|v| v as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32, EndOfData> {
        self.read_uint(3)
    }

    pub fn read_u32(&mut self) -> Result<u32, EndOfData> {
        self.read_uint(4)
    }

    pub fn read_i8(&mut self) -> Result<i8, EndOfData> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, EndOfData> {
        self.read_int(2).map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, EndOfData> {
        self.read_int(4)
    }

    /// Unsigned big-endian integer of 1 to 4 bytes
    pub fn read_uint(&mut self, width: usize) -> Result<u32, EndOfData> {
        debug_assert!((1..=4).contains(&width));
        let bytes = self.take(width)?;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Signed big-endian integer of 1 to 4 bytes, sign-extended from `width`
    pub fn read_int(&mut self, width: usize) -> Result<i32, EndOfData> {
        let raw = self.read_uint(width)?;
        let shift = 32 - 8 * width as u32;
        Ok(((raw << shift) as i32) >> shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 0x01);
        assert_eq!(cursor.read_u16().unwrap(), 0x0203);
        assert_eq!(cursor.read_u24().unwrap(), 0x040506);
        assert!(cursor.at_end());
    }

    #[test]
    fn signed_reads_sign_extend_from_operand_width() {
        let data = [0xFF, 0xFF, 0xFF, 0x80, 0x00, 0x7F];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_int(3).unwrap(), -1);
        assert_eq!(cursor.read_int(2).unwrap(), -32768);
        assert_eq!(cursor.read_i8().unwrap(), 127);
    }

    #[test]
    fn four_byte_signed_read() {
        let data = [0xFF, 0xFF, 0xFF, 0xFE];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_i32().unwrap(), -2);
    }

    #[test]
    fn reading_past_window_fails_without_moving() {
        let data = [1, 2, 3, 4, 5];
        let mut cursor = ByteCursor::with_window(&data, 1, 3);
        assert_eq!(cursor.pos(), 1);
        assert_eq!(
            cursor.read_u24(),
            Err(EndOfData {
                offset: 1,
                wanted: 3
            })
        );
        assert_eq!(cursor.pos(), 1);
        assert_eq!(cursor.read_u16().unwrap(), 0x0203);
        assert!(cursor.read_u8().is_err());
    }

    #[test]
    fn seek_is_bounded_by_window_end() {
        let data = [0u8; 8];
        let mut cursor = ByteCursor::with_window(&data, 0, 4);
        assert!(cursor.seek(4).is_ok());
        assert!(cursor.seek(5).is_err());
    }
}
