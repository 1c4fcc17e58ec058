//! Minimal NumPy `.npy` codec for little-endian `f64` arrays
//!
//! Format (version 1.0):
//!
//! ```text
//! \x93NUMPY | major | minor | header_len (u16 LE) | header dict | data
//! ```
//!
//! The header is a Python dict literal padded with spaces and terminated by
//! `\n` so that the data starts on a 64-byte boundary. Versions 2.0 and 3.0
//! (u32 header length) are accepted on read.

use crate::storage::NumArray;
use crate::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

fn corrupt(message: impl Into<String>) -> Error {
    Error::StorageError(format!("Invalid .npy data: {}", message.into()))
}

/// Encode a 2-D array (C order, `<f8`).
pub fn encode(array: &NumArray) -> Vec<u8> {
    let (rows, cols) = array.shape();
    let dict = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");

    // magic + version + u16 length + dict + '\n', padded to the alignment
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;

    let mut bytes = Vec::with_capacity(unpadded + padding + array.data().len() * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&u16::try_from(header_len).unwrap_or(u16::MAX).to_le_bytes());
    bytes.extend_from_slice(dict.as_bytes());
    bytes.extend(std::iter::repeat(b' ').take(padding));
    bytes.push(b'\n');
    for value in array.data() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a `<f8` array of rank 1 (as a column vector) or rank 2.
pub fn decode(bytes: &[u8]) -> Result<NumArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(corrupt("missing magic string"));
    }

    let (header_start, header_len) = match bytes[6] {
        1 => (10, usize::from(u16::from_le_bytes([bytes[8], bytes[9]]))),
        2 | 3 => {
            let raw = bytes
                .get(8..12)
                .ok_or_else(|| corrupt("truncated header length"))?;
            let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            (12, usize::try_from(len).map_err(|_| corrupt("header too large"))?)
        }
        major => return Err(corrupt(format!("unsupported version {major}"))),
    };

    let header = bytes
        .get(header_start..header_start + header_len)
        .ok_or_else(|| corrupt("truncated header"))?;
    let header = std::str::from_utf8(header).map_err(|_| corrupt("header is not UTF-8"))?;

    if !header.contains("'descr': '<f8'") {
        return Err(corrupt("only little-endian float64 arrays are supported"));
    }
    if header.contains("'fortran_order': True") {
        return Err(corrupt("Fortran-ordered arrays are not supported"));
    }
    let shape = parse_shape(header)?;

    let (rows, cols) = match shape.as_slice() {
        [n] => (*n, 1),
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(Error::UnsupportedType(format!(
                "{}-d .npy arrays need the labelled array store",
                other.len()
            )))
        }
    };

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| corrupt(format!("shape ({rows}, {cols}) overflows")))?;
    let payload = &bytes[header_start + header_len..];
    if payload.len() != expected {
        return Err(corrupt(format!(
            "expected {expected} data bytes, found {}",
            payload.len()
        )));
    }
    let data = payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect();

    NumArray::new(rows, cols, data)
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let start = header
        .find("'shape':")
        .ok_or_else(|| corrupt("header has no shape"))?;
    let rest = &header[start..];
    let open = rest.find('(').ok_or_else(|| corrupt("malformed shape"))?;
    let close = rest.find(')').ok_or_else(|| corrupt("malformed shape"))?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.parse::<usize>()
                .map_err(|_| corrupt(format!("bad dimension '{dim}'")))
        })
        .collect()
}
