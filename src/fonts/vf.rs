//! Virtual font index reader
//!
//! Virtual characters are short, so the whole file is read at once: the
//! local font definitions and every character packet. Small packets share
//! one arena buffer, larger ones get a buffer of their own.

use std::path::Path;

use log::{debug, error, warn};

use super::error::FontError;
use crate::dvi::cursor::ByteCursor;
use crate::dvi::document::FontDefRecord;
use crate::dvi::opcodes::{FNT_DEF1, FNT_DEF4, MAX_CHARS_IN_FONT, POST, PRE, VF_ID, VF_LONG_CHAR};

/// Packets up to this size are stored in the shared arena
const ARENA_PACKET_MAX: usize = 20;

/// Location of a macro's byte code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroBytes {
    /// A buffer owned by this macro alone
    Owned(Box<[u8]>),
    /// A span inside the macro table's shared arena
    Arena { offset: usize, len: usize },
}

/// DVI byte code that typesets one virtual character
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macro {
    pub bytes: MacroBytes,
    /// Advance width as a fix_word of the virtual font's design size
    pub advance: i32,
}

/// Character code → macro map of one virtual font
#[derive(Debug, Default)]
pub struct MacroTable {
    arena: Vec<u8>,
    macros: Vec<Option<Macro>>,
}

impl MacroTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            macros: vec![None; MAX_CHARS_IN_FONT],
        }
    }

    /// Store a packet; empty packets leave the entry absent
    pub fn insert(&mut self, code: u8, packet: &[u8], advance: i32) {
        if packet.is_empty() {
            self.macros[code as usize] = None;
            return;
        }
        let bytes = if packet.len() <= ARENA_PACKET_MAX {
            let offset = self.arena.len();
            self.arena.extend_from_slice(packet);
            MacroBytes::Arena {
                offset,
                len: packet.len(),
            }
        } else {
            MacroBytes::Owned(packet.into())
        };
        self.macros[code as usize] = Some(Macro { bytes, advance });
    }

    #[must_use]
    pub fn get(&self, code: u8) -> Option<&Macro> {
        self.macros[code as usize].as_ref()
    }

    /// The byte code of `m`, which must belong to this table
    #[must_use]
    pub fn bytes<'a>(&'a self, m: &'a Macro) -> &'a [u8] {
        match &m.bytes {
            MacroBytes::Owned(buf) => buf,
            MacroBytes::Arena { offset, len } => &self.arena[*offset..*offset + *len],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.macros.iter().filter(|m| m.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parsed virtual font file
#[derive(Debug)]
pub struct VfIndex {
    pub checksum: u32,
    /// Design size as a fix_word in points
    pub design_size: u32,
    /// Local font definitions, in file order
    pub fonts: Vec<FontDefRecord>,
    pub macros: MacroTable,
}

impl VfIndex {
    pub fn open(path: &Path) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &data)
    }

    pub fn parse(name: &str, data: &[u8]) -> Result<Self, FontError> {
        let mut cursor = ByteCursor::new(data);
        if cursor.read_u8()? != PRE || cursor.read_u8()? != VF_ID {
            return Err(FontError::invalid_table(name, "bad VF preamble"));
        }
        let comment_len = cursor.read_u8()? as usize;
        cursor.skip(comment_len)?;
        let checksum = cursor.read_u32()?;
        let design_size = cursor.read_u32()?;

        let mut fonts = Vec::new();
        let mut cmd = cursor.read_u8()?;
        while (FNT_DEF1..=FNT_DEF4).contains(&cmd) {
            fonts.push(FontDefRecord::read(&mut cursor, cmd)?);
            cmd = cursor.read_u8()?;
        }

        let mut macros = MacroTable::new();
        while cmd <= VF_LONG_CHAR {
            let (len, code, width) = if cmd == VF_LONG_CHAR {
                let len = cursor.read_u32()? as usize;
                let code = cursor.read_u32()?;
                let width = cursor.read_i32()?;
                (len, code, width)
            } else {
                let code = u32::from(cursor.read_u8()?);
                let width = cursor.read_u24()? as i32;
                (cmd as usize, code, width)
            };
            let packet = cursor.take(len)?;
            if code as usize >= MAX_CHARS_IN_FONT {
                warn!("Virtual character {code} in font {name} ignored");
            } else {
                macros.insert(code as u8, packet, width);
            }
            cmd = cursor.read_u8()?;
        }
        if cmd != POST {
            error!("Wrong command byte {cmd} found in VF macro list of {name}");
            return Err(FontError::invalid_table(
                name,
                format!("wrong command byte {cmd} in macro list"),
            ));
        }

        debug!(
            "VF {name}: {} local fonts, {} characters",
            fonts.len(),
            macros.len()
        );
        Ok(Self {
            checksum,
            design_size,
            fonts,
            macros,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::VfBuilder;

    #[test]
    fn small_and_large_packets_are_stored_differently() {
        let mut table = MacroTable::new();
        table.insert(1, &[1, 2, 3], 10);
        table.insert(2, &[7; 40], 20);
        let small = table.get(1).unwrap();
        let large = table.get(2).unwrap();
        assert!(matches!(small.bytes, MacroBytes::Arena { .. }));
        assert!(matches!(large.bytes, MacroBytes::Owned(_)));
        assert_eq!(table.bytes(small), &[1, 2, 3]);
        assert_eq!(table.bytes(large).len(), 40);
    }

    #[test]
    fn empty_packet_leaves_entry_absent() {
        let mut table = MacroTable::new();
        table.insert(9, &[], 10);
        assert!(table.get(9).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn parses_fonts_and_packets() {
        let data = VfBuilder::new()
            .font_def(0, "cmr10", 1 << 20, 10 << 20)
            .font_def(3, "cmbx10", 1 << 20, 10 << 20)
            .char_packet(65, 1 << 19, &[65])
            .char_packet(300, 1 << 19, &[66])
            .char_packet(66, 1 << 18, &[0x8F, 0, 0, 0, 5, 66])
            .build();
        let vf = VfIndex::parse("test.vf", &data).unwrap();
        assert_eq!(vf.fonts.len(), 2);
        assert_eq!(vf.fonts[1].number, 3);
        assert_eq!(vf.fonts[1].name, "cmbx10");
        let a = vf.macros.get(65).unwrap();
        assert_eq!(a.advance, 1 << 19);
        assert_eq!(vf.macros.bytes(a), &[65]);
        assert_eq!(vf.macros.len(), 2);
    }

    #[test]
    fn garbage_after_packets_is_rejected() {
        let mut data = VfBuilder::new().char_packet(65, 0, &[65]).build();
        let post = data.iter().rposition(|&b| b != POST).unwrap() + 1;
        data.truncate(post);
        data.push(250);
        assert!(VfIndex::parse("bad.vf", &data).is_err());
    }
}
