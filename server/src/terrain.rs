//! Flat terrain generation and chunk blob compression
//!
//! A chunk blob is four consecutive arrays over the same block index
//! `y + z * 128 + x * 128 * 16`:
//!
//! | section     | size        | contents                    |
//! |-------------|-------------|-----------------------------|
//! | block types | 32768 bytes | one byte per block          |
//! | metadata    | 16384 bytes | one nibble per block        |
//! | block light | 16384 bytes | one nibble per block        |
//! | sky light   | 16384 bytes | one nibble per block        |
//!
//! Nibbles are packed two per byte; an even index uses the low nibble.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use shared::{CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
use std::io::Write;

pub const BLOCKS_PER_CHUNK: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_DEPTH;
pub const NIBBLE_SECTION_LEN: usize = BLOCKS_PER_CHUNK / 2;

pub const METADATA_OFFSET: usize = BLOCKS_PER_CHUNK;
pub const BLOCK_LIGHT_OFFSET: usize = METADATA_OFFSET + NIBBLE_SECTION_LEN;
pub const SKY_LIGHT_OFFSET: usize = BLOCK_LIGHT_OFFSET + NIBBLE_SECTION_LEN;
pub const CHUNK_BLOB_LEN: usize = SKY_LIGHT_OFFSET + NIBBLE_SECTION_LEN;

pub mod block {
    pub const AIR: u8 = 0;
    pub const STONE: u8 = 1;
    pub const GRASS: u8 = 2;
    pub const DIRT: u8 = 3;
    pub const BEDROCK: u8 = 7;
}

const FULL_SKY_LIGHT: u8 = 15;

/// Index of a chunk-local block in the block-type array.
pub fn block_index(x: usize, y: usize, z: usize) -> usize {
    y + z * CHUNK_HEIGHT + x * CHUNK_HEIGHT * CHUNK_DEPTH
}

pub fn get_nibble(section: &[u8], index: usize) -> u8 {
    let byte = section[index / 2];
    if index % 2 == 0 {
        byte & 0x0F
    } else {
        byte >> 4
    }
}

pub fn set_nibble(section: &mut [u8], index: usize, value: u8) {
    let byte = &mut section[index / 2];
    if index % 2 == 0 {
        *byte = (*byte & 0xF0) | (value & 0x0F);
    } else {
        *byte = (*byte & 0x0F) | ((value & 0x0F) << 4);
    }
}

/// Block type of the flat world at height `y`.
pub fn flat_block(ground_level: usize, y: usize) -> u8 {
    match y {
        0 => block::BEDROCK,
        y if y >= ground_level => block::AIR,
        y if y + 1 == ground_level => block::GRASS,
        y if y + 3 >= ground_level => block::DIRT,
        _ => block::STONE,
    }
}

/// Generates one uncompressed flat chunk blob.
///
/// Every column is identical, so the result does not depend on the chunk
/// coordinate. `ground_level` is clamped to the chunk height.
pub fn generate(ground_level: usize) -> Vec<u8> {
    let ground_level = ground_level.min(CHUNK_HEIGHT);
    let mut blob = vec![0u8; CHUNK_BLOB_LEN];

    let column: Vec<u8> = (0..CHUNK_HEIGHT).map(|y| flat_block(ground_level, y)).collect();

    for x in 0..CHUNK_WIDTH {
        for z in 0..CHUNK_DEPTH {
            let base = block_index(x, 0, z);
            blob[base..base + CHUNK_HEIGHT].copy_from_slice(&column);

            let sky = &mut blob[SKY_LIGHT_OFFSET..];
            for y in ground_level..CHUNK_HEIGHT {
                set_nibble(sky, base + y, FULL_SKY_LIGHT);
            }
        }
    }

    blob
}

/// zlib-compresses a chunk blob for the MapChunk payload.
pub fn compress(blob: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(blob.len() / 8), Compression::default());
    encoder.write_all(blob)?;
    encoder.finish()
}
