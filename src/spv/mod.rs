//! SPIR-V support, mainly translation into the SSA IR ([`lower`]).

// NOTE(eddyb) all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod lower;
pub mod read;

use std::string::FromUtf8Error;

pub const MAGIC: u32 = 0x0723_0203;
pub const HEADER_LEN: usize = 5;

/// SPIR-V ID (an index into the module-wide value table, below `Header::id_bound`).
pub type Id = spirv::Word;

/// The (fixed-size) header every SPIR-V module starts with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    /// All IDs used in the module are less than this bound.
    pub id_bound: u32,
    pub schema: u32,
}

impl Header {
    pub fn from_words(words: [u32; HEADER_LEN]) -> Self {
        let [magic, version, generator, id_bound, schema] = words;
        Self { magic, version, generator, id_bound, schema }
    }

    pub fn version_major_minor(&self) -> (u8, u8) {
        let [_, major, minor, _] = self.version.to_be_bytes();
        (major, minor)
    }
}

/// One SPIR-V instruction, borrowed from the whole module's words.
///
/// `words[0]` is the instruction's own `(word_count << 16) | opcode` word, so
/// that `words[1..]` can be indexed the same way as the operands are numbered
/// in the SPIR-V specification (result type, result ID, then the rest).
#[derive(Copy, Clone, Debug)]
pub struct Inst<'a> {
    /// Position of the instruction (in words, from the start of the module).
    pub pos: usize,
    pub opcode: u16,
    pub words: &'a [u32],
}

impl<'a> Inst<'a> {
    pub fn op(&self) -> Option<spirv::Op> {
        spirv::Op::from_u32(u32::from(self.opcode))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Operand words starting at `idx` (with `words[0]` being the opcode word).
    pub fn from(&self, idx: usize) -> &'a [u32] {
        self.words.get(idx..).unwrap_or(&[])
    }
}

// FIXME(eddyb) pick a "small string" crate, and fine-tune its inline size,
// instead of allocating a whole `String`.
//
/// Decode a single `LiteralString` from the start of `words`, returning it
/// (if valid UTF-8) along with the number of words it occupied.
pub fn decode_literal_string(words: &[u32]) -> Result<(String, usize), FromUtf8Error> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for (i, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return String::from_utf8(bytes).map(|s| (s, i + 1));
            }
            bytes.push(byte);
        }
    }
    // Missing `\0` terminator, take everything as the string.
    String::from_utf8(bytes).map(|s| (s, words.len()))
}

/// Inverse of `decode_literal_string` (always includes at least one `\0`).
pub fn encode_literal_string(s: &str) -> impl Iterator<Item = u32> + '_ {
    let bytes = s.as_bytes();

    // FIXME(eddyb) replace with `array_chunks` once that is stabilized.
    let full_words = bytes.chunks_exact(4).map(|w| [w[0], w[1], w[2], w[3]]);

    let leftover_bytes = &bytes[full_words.len() * 4..];
    let mut last_word = [0; 4];
    last_word[..leftover_bytes.len()].copy_from_slice(leftover_bytes);

    full_words.chain(std::iter::once(last_word)).map(u32::from_le_bytes)
}
