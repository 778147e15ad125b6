//! Low-level parsing of SPIR-V binary form.

use crate::spv::{self, Header, HEADER_LEN, MAGIC};
use std::path::Path;
use std::{fs, io};

/// Position and opcode of an instruction, within `ModuleParser::words`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InstPos {
    pub pos: usize,
    pub opcode: u16,
    pub len: usize,
}

pub struct ModuleParser {
    pub header: Header,

    /// The entire module's words (including the header), in native endianness.
    words: Vec<u32>,

    /// Next (instructions') word position in the module.
    next_word: usize,
}

// FIXME(eddyb) stop abusing `io::Error` for error reporting.
pub(crate) fn invalid(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed SPIR-V ({reason})"))
}

impl ModuleParser {
    pub fn read_from_spv_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::read_from_spv_bytes(fs::read(path)?)
    }

    pub fn read_from_spv_bytes(spv_bytes: Vec<u8>) -> io::Result<Self> {
        if spv_bytes.len() % 4 != 0 {
            return Err(invalid("not a multiple of 4 bytes"));
        }
        // HACK: the `Vec<u8>` isn't guaranteed to be aligned for `u32`,
        // so the words have to be copied out (`pod_collect_to_vec` does that).
        Self::read_from_spv_words(bytemuck::pod_collect_to_vec::<u8, u32>(&spv_bytes))
    }

    pub fn read_from_spv_words(mut words: Vec<u32>) -> io::Result<Self> {
        if words.len() < HEADER_LEN {
            return Err(invalid("truncated header"));
        }

        // Check the magic, and swap endianness of all words if we have to.
        {
            let magic = words[0];
            if magic == MAGIC {
                // Nothing to do, all words already match native endianness.
            } else if magic.swap_bytes() == MAGIC {
                for word in &mut words[..] {
                    *word = word.swap_bytes();
                }
            } else {
                return Err(invalid("incorrect magic number"));
            }
        }

        let header = Header::from_words([words[0], words[1], words[2], words[3], words[4]]);

        let [version_reserved_hi, _, _, version_reserved_lo] = header.version.to_be_bytes();
        if (version_reserved_lo, version_reserved_hi) != (0, 0) {
            return Err(invalid(&format!(
                "version 0x{:08x} is not in expected (0.major.minor.0) form",
                header.version
            )));
        }
        if header.schema != 0 {
            return Err(invalid(&format!(
                "unknown instruction schema {} - only 0 is supported",
                header.schema
            )));
        }

        Ok(Self { header, words, next_word: HEADER_LEN })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Borrow the instruction found at `pos` (as previously returned by iteration).
    pub fn inst_at(&self, pos: InstPos) -> spv::Inst<'_> {
        spv::Inst { pos: pos.pos, opcode: pos.opcode, words: &self.words[pos.pos..][..pos.len] }
    }
}

impl Iterator for ModuleParser {
    type Item = io::Result<InstPos>;
    fn next(&mut self) -> Option<Self::Item> {
        let words = &self.words[self.next_word..];
        let &first = words.first()?;

        let (inst_len, opcode) = ((first >> 16) as usize, first as u16);

        // NOTE: unknown opcodes are fine here, the word count is all that
        // is needed to skip over them, it's up to the user to reject them.
        if inst_len == 0 {
            return Some(Err(invalid(&format!("instruction {opcode} has a word count of 0"))));
        }
        if words.len() < inst_len {
            return Some(Err(invalid(&format!("truncated instruction {opcode}"))));
        }

        let pos = InstPos { pos: self.next_word, opcode, len: inst_len };
        self.next_word += inst_len;

        Some(Ok(pos))
    }
}
