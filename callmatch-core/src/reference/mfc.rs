//! `.mfc` feature files.
//!
//! ```text
//! offset 0 : u32 LE  num_frames
//! offset 4 : u32 LE  num_coeffs
//! offset 8 : f32 LE  × num_frames × num_coeffs   (row-major)
//! ```
//!
//! No energy column is stored; readers recover it from coefficient 0 when
//! the engine runs with `use_energy`.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::features::Fingerprint;

const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum MfcError {
    #[error("feature file has {0} bytes, header needs 8")]
    MissingHeader(usize),

    #[error("feature file declares zero frames")]
    NoFrames,

    #[error("feature file has {got} coefficients per frame, engine uses {expected}")]
    Coefficients { expected: usize, got: usize },

    #[error("feature file truncated: expected {expected} data bytes, found {got}")]
    Truncated { expected: usize, got: usize },

    #[error("feature file I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a feature file image.
pub fn decode(bytes: &[u8], expected_coeffs: usize, energy_in_c0: bool) -> Result<Fingerprint, MfcError> {
    if bytes.len() < HEADER_LEN {
        return Err(MfcError::MissingHeader(bytes.len()));
    }
    let num_frames = read_u32(&bytes[0..4]) as usize;
    let num_coeffs = read_u32(&bytes[4..8]) as usize;

    if num_frames == 0 {
        return Err(MfcError::NoFrames);
    }
    if num_coeffs != expected_coeffs {
        return Err(MfcError::Coefficients {
            expected: expected_coeffs,
            got: num_coeffs,
        });
    }

    let data = &bytes[HEADER_LEN..];
    let expected = num_frames
        .checked_mul(num_coeffs)
        .and_then(|n| n.checked_mul(4))
        .unwrap_or(usize::MAX);
    if data.len() < expected {
        return Err(MfcError::Truncated {
            expected,
            got: data.len(),
        });
    }

    let coefficients = data[..expected]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Fingerprint::from_flat(num_coeffs, coefficients, energy_in_c0).map_err(|_| MfcError::Coefficients {
        expected: expected_coeffs,
        got: num_coeffs,
    })
}

/// Serialize a fingerprint into a feature file image.
pub fn encode(fingerprint: &Fingerprint) -> Vec<u8> {
    let flat = fingerprint.as_flat();
    let mut out = Vec::with_capacity(HEADER_LEN + flat.len() * 4);
    out.extend_from_slice(&(fingerprint.len() as u32).to_le_bytes());
    out.extend_from_slice(&(fingerprint.num_coeffs() as u32).to_le_bytes());
    for value in flat {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn read_file(path: &Path, expected_coeffs: usize, energy_in_c0: bool) -> Result<Fingerprint, MfcError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode(&bytes, expected_coeffs, energy_in_c0)
}

/// Write via a sibling temp file and rename, so readers never see a
/// half-written feature file.
pub fn write_file(path: &Path, fingerprint: &Fingerprint) -> Result<(), MfcError> {
    let tmp = path.with_extension("mfc.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(&encode(fingerprint))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
