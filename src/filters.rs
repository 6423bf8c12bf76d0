//! Stream filters.
//!
//! Only FlateDecode is implemented in the engine itself; it is the filter
//! the write path emits (object streams, cross-reference streams) and the
//! one the read path must undo. The decode side additionally understands
//! PNG predictors, which cross-reference streams in the wild use routinely.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};
use crate::object::Object;

/// Predictor parameters from a filter's `/DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    /// `/Predictor` value; 1 means none, >= 10 selects the PNG family.
    pub predictor: u8,
    /// `/Columns`, samples per row.
    pub columns: usize,
    /// `/Colors`, components per sample.
    pub colors: usize,
    /// `/BitsPerComponent`.
    pub bits_per_component: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl PredictorParams {
    /// Read predictor parameters from a `/DecodeParms` dictionary value.
    /// Missing entries fall back to the defaults above.
    pub fn from_parms(parms: &Object) -> Self {
        let mut out = Self::default();
        if let Some(dict) = parms.as_dict() {
            if let Some(p) = dict.get("Predictor").and_then(Object::as_integer) {
                out.predictor = p.clamp(1, 15) as u8;
            }
            if let Some(c) = dict.get("Columns").and_then(Object::as_integer) {
                out.columns = c.max(1) as usize;
            }
            if let Some(c) = dict.get("Colors").and_then(Object::as_integer) {
                out.colors = c.max(1) as usize;
            }
            if let Some(b) = dict.get("BitsPerComponent").and_then(Object::as_integer) {
                out.bits_per_component = b.max(1) as usize;
            }
        }
        out
    }

    /// Bytes each sample occupies, rounded up, at least 1.
    fn bytes_per_pixel(&self) -> usize {
        ((self.colors * self.bits_per_component) + 7) / 8
    }

    /// Bytes each predictor row occupies, excluding the tag byte.
    fn bytes_per_row(&self) -> usize {
        ((self.colors * self.bits_per_component * self.columns) + 7) / 8
    }
}

/// Compress with zlib at the default level.
pub fn flate_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress zlib data, then undo the predictor if one applies.
pub fn flate_decode(data: &[u8], params: Option<PredictorParams>) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::syntax(0, format!("corrupt flate stream: {}", e)))?;

    match params {
        Some(p) if p.predictor >= 10 => undo_png_predictor(&raw, &p),
        // Predictor 2 (TIFF) never appears on the streams this engine reads.
        Some(p) if p.predictor > 1 => Err(Error::Unsupported(format!(
            "predictor {}",
            p.predictor
        ))),
        _ => Ok(raw),
    }
}

/// Undo PNG row predictors (filter type byte prefixes each row).
fn undo_png_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let row_len = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();
    if row_len == 0 {
        return Ok(Vec::new());
    }
    if data.len() % (row_len + 1) != 0 {
        return Err(Error::syntax(
            0,
            format!(
                "predictor data length {} is not a multiple of row length {}",
                data.len(),
                row_len + 1
            ),
        ));
    }

    let mut out = Vec::with_capacity(data.len() / (row_len + 1) * row_len);
    let mut prev_row = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();
        match tag {
            0 => {},
            1 => {
                // Sub
                for i in bpp..row_len {
                    row[i] = row[i].wrapping_add(row[i - bpp]);
                }
            },
            2 => {
                // Up
                for i in 0..row_len {
                    row[i] = row[i].wrapping_add(prev_row[i]);
                }
            },
            3 => {
                // Average
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                    let up = prev_row[i] as u16;
                    row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
                }
            },
            4 => {
                // Paeth
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                    row[i] = row[i].wrapping_add(paeth(left, up, up_left));
                }
            },
            other => {
                return Err(Error::syntax(0, format!("unknown PNG filter type {}", other)));
            },
        }
        out.extend_from_slice(&row);
        prev_row = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Decode the body of a parsed stream object according to its `/Filter`.
///
/// Unfiltered bodies come back unchanged. Filter chains other than a single
/// FlateDecode are rejected as unsupported.
pub fn decode_stream_body(
    dict: &std::collections::HashMap<String, Object>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let filter = match dict.get("Filter") {
        None => return Ok(data.to_vec()),
        Some(Object::Name(n)) => n.clone(),
        Some(Object::Array(items)) if items.len() == 1 => match items[0].as_name() {
            Some(n) => n.to_string(),
            None => return Err(Error::syntax(0, "non-name in /Filter array")),
        },
        Some(Object::Array(_)) => {
            return Err(Error::Unsupported("filter chains".to_string()));
        },
        Some(other) => {
            return Err(Error::syntax(0, format!("/Filter of type {}", other.type_name())));
        },
    };

    match filter.as_str() {
        "FlateDecode" => {
            let params = dict.get("DecodeParms").map(PredictorParams::from_parms);
            flate_decode(data, params)
        },
        other => Err(Error::Unsupported(format!("filter {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_flate_round_trip() {
        let data = b"Hello, compressed world! Hello, compressed world!";
        let packed = flate_encode(data).unwrap();
        assert!(packed.len() < data.len());
        let unpacked = flate_decode(&packed, None).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_corrupt_flate_is_syntax_error() {
        let err = flate_decode(b"not zlib at all", None).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_predictor_none_rows() {
        // Two rows of 3 bytes, filter type 0.
        let data = [0, 1, 2, 3, 0, 4, 5, 6];
        let params = PredictorParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        assert_eq!(undo_png_predictor(&data, &params).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_predictor_up_rows() {
        // Row 1 literal, row 2 is deltas against row 1.
        let data = [0, 10, 20, 30, 2, 1, 1, 1];
        let params = PredictorParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        assert_eq!(
            undo_png_predictor(&data, &params).unwrap(),
            vec![10, 20, 30, 11, 21, 31]
        );
    }

    #[test]
    fn test_predictor_sub_row() {
        let data = [1, 10, 5, 5];
        let params = PredictorParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        assert_eq!(undo_png_predictor(&data, &params).unwrap(), vec![10, 15, 20]);
    }

    #[test]
    fn test_predictor_bad_length() {
        let params = PredictorParams {
            predictor: 12,
            columns: 4,
            ..Default::default()
        };
        assert!(undo_png_predictor(&[0, 1, 2], &params).is_err());
    }

    #[test]
    fn test_paeth_reference_values() {
        assert_eq!(paeth(0, 0, 0), 0);
        assert_eq!(paeth(10, 20, 5), 20);
        assert_eq!(paeth(20, 10, 5), 20);
    }

    #[test]
    fn test_decode_stream_body_plain() {
        let dict = HashMap::new();
        assert_eq!(decode_stream_body(&dict, b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_decode_stream_body_flate() {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        let packed = flate_encode(b"body").unwrap();
        assert_eq!(decode_stream_body(&dict, &packed).unwrap(), b"body");
    }

    #[test]
    fn test_decode_stream_body_unknown_filter() {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("DCTDecode"));
        assert!(matches!(
            decode_stream_body(&dict, b"jpeg").unwrap_err(),
            Error::Unsupported(_)
        ));
    }

    #[test]
    fn test_params_from_dict() {
        let mut dict = HashMap::new();
        dict.insert("Predictor".to_string(), Object::Integer(12));
        dict.insert("Columns".to_string(), Object::Integer(5));
        let p = PredictorParams::from_parms(&Object::Dictionary(dict));
        assert_eq!(p.predictor, 12);
        assert_eq!(p.columns, 5);
        assert_eq!(p.colors, 1);
    }
}
