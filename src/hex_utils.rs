//! Intel HEX image loading
//!
//! The simulator is programmed by loading an Intel HEX image into
//! memory before execution begins. Each record is a colon, a
//! two-digit record length, a four-digit address, a two-digit record
//! type, the data bytes, and a two-digit checksum. The checksum is
//! read but not verified.
//!
//! Record types 0x00 (data), 0x01 (end of file), 0x02 (extended
//! segment address), 0x03 (start segment address, ignored), 0x04
//! (extended linear address) and 0x05 (start linear address) are
//! consumed. The base-address accumulation for types 0x02 and 0x04
//! shifts the running base left by 8 between data bytes, so only
//! two-byte records produce the conventional `bytes << 4` and
//! `bytes << 16` bases; longer records are accepted with the same
//! arithmetic.

use itertools::Itertools;
use thiserror::Error;

use crate::memory::Memory;

#[derive(Debug, Error)]
pub enum HexError {
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),
    #[error("input line {0} does not start with colon character")]
    MissingColon(usize),
    #[error("input line {0} contains a non-hex character")]
    BadHexDigit(usize),
    #[error("input line {0} is shorter than its record length implies")]
    Truncated(usize),
    #[error("input ended without an end-of-file record")]
    MissingEndOfFile,
}

/// Load a hex image file into memory. On success, returns the start
/// address for execution given by the image (zero if the image
/// contains no start-linear-address record).
pub fn load_hex(memory: &mut Memory, file_name: &str) -> Result<u32, HexError> {
    let image = std::fs::read_to_string(file_name)?;
    load_hex_image(memory, &image)
}

/// Load hex records from a string. See [`load_hex`].
pub fn load_hex_image(memory: &mut Memory, image: &str) -> Result<u32, HexError> {
    let mut start_address = 0u32;
    let mut load_base_address = 0u32;
    let mut byte_count = 0u32;

    for (index, line) in image.lines().enumerate() {
        let line_count = index + 1;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let record = line
            .strip_prefix(':')
            .ok_or(HexError::MissingColon(line_count))?;

        // Decode the whole record into bytes up front: length,
        // address (two bytes), type, data, checksum.
        let bytes = record
            .chars()
            .tuples()
            .map(|(hi, lo)| {
                let hi = hi.to_digit(16)?;
                let lo = lo.to_digit(16)?;
                Some((hi << 4 | lo) as u8)
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or(HexError::BadHexDigit(line_count))?;

        if bytes.len() < 5 {
            return Err(HexError::Truncated(line_count));
        }
        let record_length = usize::from(bytes[0]);
        let record_address = u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
        let record_type = bytes[3];
        if bytes.len() < 4 + record_length + 1 {
            return Err(HexError::Truncated(line_count));
        }
        let data = &bytes[4..4 + record_length];

        match record_type {
            // Data record: write each byte through its byte lane
            0x00 => {
                for (i, byte) in data.iter().enumerate() {
                    let load_address =
                        (load_base_address | record_address).wrapping_add(i as u32);
                    let shift = 8 * (load_address % 4);
                    let load_data = u32::from(*byte) << shift;
                    let load_mask = 0x0000_00ff << shift;
                    memory.write_word(load_address & 0xffff_fffc, load_data, load_mask);
                    byte_count += 1;
                }
            }
            // End of file
            0x01 => {
                log::info!("{byte_count} bytes loaded, start address = {start_address:08x}");
                return Ok(start_address);
            }
            // Extended segment address (sets bits 19:4 of the load base)
            0x02 => {
                load_base_address = 0;
                for byte in data {
                    load_base_address = (load_base_address << 8) | (u32::from(*byte) << 4);
                }
            }
            // Start segment address: ignored
            0x03 => {}
            // Extended linear address (sets the upper halfword of the load base)
            0x04 => {
                load_base_address = 0;
                for byte in data {
                    load_base_address = (load_base_address << 8) | (u32::from(*byte) << 16);
                }
            }
            // Start linear address (sets the execution start address)
            0x05 => {
                start_address = 0;
                for byte in data {
                    start_address = (start_address << 8) | u32::from(*byte);
                }
            }
            // Unrecognised record types are skipped
            _ => {}
        }
    }

    Err(HexError::MissingEndOfFile)
}
