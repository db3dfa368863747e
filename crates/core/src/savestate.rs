//! Save state for the SPI controller register file.
//!
//! Captures the five 32-bit registers to a file using bincode serialization
//! with deflate compression. Restoring a state assigns register values only;
//! it never replays transfers or chip-select updates (see
//! [`SpiController::load_state`](crate::SpiController::load_state)).
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "SPIS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Magic bytes identifying an SPI controller save state file.
const MAGIC: &[u8; 4] = b"SPIS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;

/// The controller's register file, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiState {
    pub cr1: u32,
    pub cr2: u32,
    pub sr: u32,
    pub dr: u32,
    pub cs: u32,
}

/// Save state to file with header and deflate compression.
pub fn save_to_file(state: &SpiState, path: &Path) -> Result<(), String> {
    let payload = bincode::serialize(state)
        .map_err(|e| format!("Serialize error: {}", e))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(8 + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);

    std::fs::write(path, &out)
        .map_err(|e| format!("Write error: {}", e))
}

/// Load state from file, verifying magic and version.
pub fn load_from_file(path: &Path) -> Result<SpiState, String> {
    let data = std::fs::read(path)
        .map_err(|e| format!("Read error: {}", e))?;

    if data.len() < 8 {
        return Err("File too small".into());
    }
    if &data[0..4] != MAGIC {
        return Err("Invalid save state file (bad magic)".into());
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(format!("Unsupported save state version {} (expected {})",
            version, FORMAT_VERSION));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[8..])
        .map_err(|e| format!("Decompress error: {:?}", e))?;

    bincode::deserialize(&decompressed)
        .map_err(|e| format!("Deserialize error: {}", e))
}
