use std::fs;
use std::path::{Path, PathBuf};

use ihex::{Reader, Record};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::SystemMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Binary,
    IntelHex,
}

impl ImageFormat {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex") => {
                ImageFormat::IntelHex
            }
            _ => ImageFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub format: ImageFormat,
    /// Bytes written into memory.
    pub size: usize,
    /// One past the highest address written.
    pub end: usize,
    /// Start address record from a HEX file, if any.
    pub start: Option<u32>,
}

/// Copies the image at `path` into `memory` at `base`. Nothing outside
/// `base..base + ceiling` is ever written.
pub fn load_image(
    memory: &mut SystemMemory,
    path: &Path,
    base: usize,
    ceiling: usize,
) -> Result<LoadedImage> {
    let image = match ImageFormat::detect(path) {
        ImageFormat::Binary => load_bin(memory, path, base, ceiling)?,
        ImageFormat::IntelHex => load_hex(memory, path, base, ceiling)?,
    };
    info!("[FIRMWARE] {} loaded, {} bytes at 0x{:08X}", path.display(), image.size, base);
    Ok(image)
}

fn unreadable(path: &Path, source: std::io::Error) -> Error {
    Error::ImageUnreadable { path: path.to_path_buf(), source }
}

fn load_bin(
    memory: &mut SystemMemory,
    path: &Path,
    base: usize,
    ceiling: usize,
) -> Result<LoadedImage> {
    let size = fs::metadata(path).map_err(|e| unreadable(path, e))?.len() as usize;
    if size > ceiling {
        return Err(Error::ImageTooLarge { path: path.to_path_buf(), size, limit: ceiling });
    }
    let bytes = fs::read(path).map_err(|e| unreadable(path, e))?;
    // The file may have grown since the metadata check.
    if bytes.len() > ceiling {
        return Err(Error::ImageTooLarge {
            path: path.to_path_buf(),
            size: bytes.len(),
            limit: ceiling,
        });
    }
    memory.write_block(base, &bytes)?;
    Ok(LoadedImage {
        format: ImageFormat::Binary,
        size: bytes.len(),
        end: base + bytes.len(),
        start: None,
    })
}

struct Chunk {
    address: usize,
    value: Vec<u8>,
}

fn load_hex(
    memory: &mut SystemMemory,
    path: &Path,
    base: usize,
    ceiling: usize,
) -> Result<LoadedImage> {
    let s = fs::read_to_string(path).map_err(|e| unreadable(path, e))?;
    let (chunks, start) = parse_hex(path, &s)?;

    let end = base + ceiling;
    let mut size = 0usize;
    let mut high = base;
    // Check every record before writing any of them.
    for c in &chunks {
        let address = base + c.address;
        let last = address + c.value.len();
        if last > end {
            return Err(Error::ImageOutOfRange {
                path: path.to_path_buf(),
                address: last - 1,
                base,
                end,
            });
        }
        size += c.value.len();
        high = high.max(last);
    }
    if size > ceiling {
        return Err(Error::ImageTooLarge { path: path.to_path_buf(), size, limit: ceiling });
    }

    for c in chunks {
        debug!("[HEX] 0x{:08X} writing {} bytes", base + c.address, c.value.len());
        memory.write_block(base + c.address, &c.value)?;
    }

    Ok(LoadedImage { format: ImageFormat::IntelHex, size, end: high, start })
}

fn parse_hex(path: &Path, s: &str) -> Result<(Vec<Chunk>, Option<u32>)> {
    let malformed = |detail: String| Error::ImageMalformed { path: PathBuf::from(path), detail };

    let mut upper = 0usize;
    let mut start = None;
    let mut chunks = Vec::new();
    for r in Reader::new(s) {
        match r.map_err(|e| malformed(e.to_string()))? {
            Record::Data { offset, value } => {
                chunks.push(Chunk { address: upper + usize::from(offset), value })
            }
            Record::ExtendedLinearAddress(hi) => upper = usize::from(hi) << 16,
            Record::ExtendedSegmentAddress(seg) => upper = usize::from(seg) << 4,
            Record::StartLinearAddress(addr) => start = Some(addr),
            Record::StartSegmentAddress { cs, ip } => {
                start = Some((u32::from(cs) << 4) + u32::from(ip))
            }
            Record::EndOfFile => break,
        }
    }
    Ok((chunks, start))
}
