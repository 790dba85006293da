//! Stream decoding for cross-reference and object streams.
//!
//! Only `FlateDecode` is supported, with optional TIFF or PNG predictors
//! from `/DecodeParms`. Content streams are never decoded.

use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};

use super::error::{PdfError, Result};
use super::object::{Dictionary, Object};

/// Predictor parameters from `/DecodeParms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per color component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Read parameters from a `/DecodeParms` dictionary; anything else gives
    /// the defaults.
    pub fn from_object(obj: Option<&Object>) -> Self {
        let Some(dict) = obj.and_then(Object::as_dict) else {
            return Self::default();
        };
        let get = |key: &str, default: i64| dict.get(key).and_then(Object::as_integer).unwrap_or(default);
        let positive = |value: i64| usize::try_from(value).unwrap_or(1).max(1);

        Self {
            predictor: get("Predictor", 1),
            columns: positive(get("Columns", 1)),
            colors: positive(get("Colors", 1)),
            bits_per_component: positive(get("BitsPerComponent", 8)),
        }
    }

    /// Bytes of sample data per row, excluding a PNG tag byte.
    pub fn bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Distance in bytes to the corresponding byte of the previous sample.
    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Decode a stream's data according to its `/Filter` and `/DecodeParms`.
pub fn decode_stream(dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_name()
                    .ok_or_else(|| PdfError::InvalidPdf("/Filter array holds a non-name".to_string()))
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(PdfError::InvalidPdf(format!("invalid /Filter: {}", other.type_name())))
        },
    };

    let parms = dict.get("DecodeParms");
    let mut current = data.to_vec();

    for (i, filter) in filters.iter().enumerate() {
        current = match *filter {
            "FlateDecode" | "Fl" => inflate(&current)?,
            other => return Err(PdfError::UnsupportedFilter(other.to_string())),
        };

        let params = match parms {
            Some(Object::Array(items)) => DecodeParams::from_object(items.get(i)),
            single => DecodeParams::from_object(single),
        };
        current = decode_predictor(&current, &params)?;
    }

    Ok(current)
}

/// Inflate zlib data, falling back to raw deflate for streams with a
/// damaged header. Output produced before a corruption is kept.
fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => return Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("FlateDecode stopped after {} bytes: {}", output.len(), e);
            return Ok(output);
        },
        Err(e) => log::debug!("Zlib decode failed ({}); trying raw deflate", e),
    }

    output.clear();
    match DeflateDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("Raw deflate stopped after {} bytes: {}", output.len(), e);
            Ok(output)
        },
        Err(e) => Err(PdfError::Decode(format!("FlateDecode failed: {}", e))),
    }
}

/// Undo a TIFF or PNG predictor.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(data, params),
        other => Err(PdfError::Decode(format!("unsupported predictor {}", other))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(PdfError::Decode(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }

    let row_len = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let mut output = data.to_vec();
    for row in output.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(output)
}

/// PNG predictors carry a tag byte per row naming that row's algorithm.
fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.bytes_per_row();
    let stride = row_len + 1;
    let bpp = params.bytes_per_pixel();

    if data.len() % stride != 0 {
        return Err(PdfError::Decode(format!(
            "predicted data length {} is not a multiple of row size {}",
            data.len(),
            stride
        )));
    }

    let mut output = Vec::with_capacity(data.len() / stride * row_len);
    let mut previous = vec![0u8; row_len];
    let mut current = vec![0u8; row_len];

    for row in data.chunks(stride) {
        let (tag, encoded) = (row[0], &row[1..]);
        for i in 0..row_len {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };

            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(PdfError::Decode(format!("invalid PNG predictor tag {}", other)))
                },
            };
            current[i] = encoded[i].wrapping_add(predicted);
        }
        output.extend_from_slice(&current);
        std::mem::swap(&mut previous, &mut current);
    }

    Ok(output)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn flate_dict(parms: Option<Object>) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        if let Some(parms) = parms {
            dict.insert("DecodeParms".to_string(), parms);
        }
        dict
    }

    #[test]
    fn test_unfiltered_passes_through() {
        assert_eq!(decode_stream(&Dictionary::new(), b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_flate() {
        let data = b"1 0 2 30 << /Type /Catalog >>".repeat(4);
        assert_eq!(decode_stream(&flate_dict(None), &zlib(&data)).unwrap(), data);
    }

    #[test]
    fn test_flate_array_form() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::Array(vec![Object::name("FlateDecode")]));
        assert_eq!(decode_stream(&dict, &zlib(b"abc")).unwrap(), b"abc");
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of three bytes: [1 2 3] then [4 6 8] encoded as Up
        let predicted = [2, 1, 2, 3, 2, 3, 4, 5];
        let mut parms = Dictionary::new();
        parms.insert("Predictor".to_string(), Object::Integer(12));
        parms.insert("Columns".to_string(), Object::Integer(3));
        let dict = flate_dict(Some(Object::Dictionary(parms)));

        assert_eq!(decode_stream(&dict, &zlib(&predicted)).unwrap(), vec![1, 2, 3, 4, 6, 8]);
    }

    #[test]
    fn test_png_sub_and_paeth() {
        let params = DecodeParams {
            predictor: 15,
            columns: 3,
            ..DecodeParams::default()
        };
        // Sub row [5 5 5] -> 5 10 15; Paeth row with zero deltas copies `up`
        let data = [1, 5, 5, 5, 4, 0, 0, 0];
        assert_eq!(decode_predictor(&data, &params).unwrap(), vec![5, 10, 15, 5, 10, 15]);
    }

    #[test]
    fn test_png_rejects_partial_rows() {
        let params = DecodeParams {
            predictor: 12,
            columns: 4,
            ..DecodeParams::default()
        };
        assert!(decode_predictor(&[2, 0, 0], &params).is_err());
    }

    #[test]
    fn test_tiff_predictor() {
        let params = DecodeParams {
            predictor: 2,
            columns: 3,
            ..DecodeParams::default()
        };
        assert_eq!(decode_predictor(&[1, 1, 1, 2, 2, 2], &params).unwrap(), vec![1, 2, 3, 2, 4, 6]);
    }

    #[test]
    fn test_unsupported_filter() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::name("LZWDecode"));
        match decode_stream(&dict, b"") {
            Err(PdfError::UnsupportedFilter(name)) => assert_eq!(name, "LZWDecode"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
