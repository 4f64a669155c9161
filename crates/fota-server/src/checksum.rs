//! Firmware checksums.
//!
//! The default digest reproduces the STM32-style hardware CRC unit used by the
//! device bootloader to validate a flashed image:
//!
//! - polynomial `0x04C11DB7`, register initialised to `0xFFFFFFFF`
//! - input consumed as 32-bit little-endian words, MSB-first shifting
//! - no bit reflection and no final XOR
//! - a trailing partial word (1-3 bytes) is zero-padded on its high-order
//!   bytes before being processed
//!
//! This is not the zlib CRC-32. The conventional CRC-32 and MD5 are kept as
//! alternative strategies for catalogs produced by older tooling.

use clap::ValueEnum;
use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// CRC-32/MPEG-2 generator polynomial (normal form).
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Register value before the first word.
pub const INITIAL: u32 = 0xFFFF_FFFF;

/// Default read size when streaming a file through a checksum.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Feed one 32-bit word through the CRC register.
#[must_use]
pub const fn process_word(crc: u32, word: u32) -> u32 {
    let mut crc = crc ^ word;
    let mut bit = 0;
    while bit < 32 {
        crc = if crc & 0x8000_0000 != 0 {
            (crc << 1) ^ POLYNOMIAL
        } else {
            crc << 1
        };
        bit += 1;
    }
    crc
}

/// Streaming hardware CRC.
///
/// Bytes may arrive in slices of any length; up to three bytes are carried
/// over between calls so the result does not depend on how input is chunked.
#[derive(Debug, Clone)]
pub struct HardwareCrc {
    crc: u32,
    pending: [u8; 4],
    pending_len: usize,
}

impl Default for HardwareCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareCrc {
    /// Create a CRC with the register at [`INITIAL`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            crc: INITIAL,
            pending: [0; 4],
            pending_len: 0,
        }
    }

    /// Feed bytes into the CRC.
    pub fn update(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (4 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < 4 {
                return;
            }
            self.crc = process_word(self.crc, u32::from_le_bytes(self.pending));
            self.pending_len = 0;
        }

        let mut words = data.chunks_exact(4);
        for w in &mut words {
            self.crc = process_word(self.crc, u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        }

        let rest = words.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    /// Pad any trailing bytes and return the raw register value.
    #[must_use]
    pub fn finalize(self) -> u32 {
        if self.pending_len == 0 {
            return self.crc;
        }
        let mut word = [0u8; 4];
        word[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
        process_word(self.crc, u32::from_le_bytes(word))
    }
}

/// Compute the hardware CRC of a byte slice.
#[must_use]
pub fn hardware_crc(data: &[u8]) -> u32 {
    let mut crc = HardwareCrc::new();
    crc.update(data);
    crc.finalize()
}

/// Checksum strategy recorded in the catalog's `checksum` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ChecksumAlgorithm {
    /// STM32-compatible word CRC, 8 lowercase hex digits
    #[default]
    HardwareCrc,
    /// zlib/IEEE CRC-32, 8 lowercase hex digits
    Crc32,
    /// MD5, 32 lowercase hex digits
    Md5,
}

impl ChecksumAlgorithm {
    /// Create a fresh streaming checksummer for this algorithm.
    #[must_use]
    pub fn checksummer(self) -> Checksummer {
        match self {
            Self::HardwareCrc => Checksummer::Hardware(HardwareCrc::new()),
            Self::Crc32 => Checksummer::Crc32(flate2::Crc::new()),
            Self::Md5 => Checksummer::Md5(Md5::new()),
        }
    }

    /// Length of the hex digest produced by this algorithm.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::HardwareCrc | Self::Crc32 => 8,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HardwareCrc => "hardware-crc",
            Self::Crc32 => "crc32",
            Self::Md5 => "md5",
        })
    }
}

/// Streaming checksum over one of the supported algorithms.
pub enum Checksummer {
    /// Hardware CRC state
    Hardware(HardwareCrc),
    /// zlib CRC-32 state
    Crc32(flate2::Crc),
    /// MD5 state
    Md5(Md5),
}

impl Checksummer {
    /// Feed bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Hardware(crc) => crc.update(data),
            Self::Crc32(crc) => crc.update(data),
            Self::Md5(hasher) => hasher.update(data),
        }
    }

    /// Finish and render the digest as lowercase hex.
    #[must_use]
    pub fn finalize(self) -> String {
        match self {
            Self::Hardware(crc) => format!("{:08x}", crc.finalize()),
            Self::Crc32(crc) => format!("{:08x}", crc.sum()),
            Self::Md5(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

impl fmt::Debug for Checksummer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hardware(_) => "Hardware",
            Self::Crc32(_) => "Crc32",
            Self::Md5(_) => "Md5",
        };
        f.debug_tuple("Checksummer").field(&name).finish()
    }
}

/// Checksum everything a reader yields, reading `chunk_size` bytes at a time.
///
/// Returns the hex digest and the number of bytes read.
pub fn checksum_reader<R: Read>(
    mut reader: R,
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
) -> io::Result<(String, u64)> {
    let mut checksummer = algorithm.checksummer();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        checksummer.update(&buf[..n]);
        total += n as u64;
    }

    Ok((checksummer.finalize(), total))
}

/// Checksum a file on disk without loading it into memory.
pub fn checksum_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
) -> io::Result<(String, u64)> {
    checksum_reader(File::open(path)?, algorithm, chunk_size)
}
