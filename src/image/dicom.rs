//! 未压缩 DICOM Part-10 像素解码。
//!
//! 支持显式/隐式 VR little endian，带或不带128字节前导，
//! 定长和不定长序列都会被跳过。只取第一帧，并应用 modality rescale
//! （RescaleSlope / RescaleIntercept），CT 数据因此以 HU 表示。

use crate::image::types::{PixelDepth, RawImage, SourceKind};
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::Array3;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const MAX_NESTING: usize = 16;

const TS_IMPLICIT_LE: &str = "1.2.840.10008.1.2";
const TS_EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
const TS_EXPLICIT_BE: &str = "1.2.840.10008.1.2.2";
const TS_DEFLATED: &str = "1.2.840.10008.1.2.1.99";

type Tag = (u16, u16);

const TRANSFER_SYNTAX: Tag = (0x0002, 0x0010);
const SAMPLES_PER_PIXEL: Tag = (0x0028, 0x0002);
const PHOTOMETRIC: Tag = (0x0028, 0x0004);
const PLANAR_CONFIGURATION: Tag = (0x0028, 0x0006);
const NUMBER_OF_FRAMES: Tag = (0x0028, 0x0008);
const ROWS: Tag = (0x0028, 0x0010);
const COLUMNS: Tag = (0x0028, 0x0011);
const BITS_ALLOCATED: Tag = (0x0028, 0x0100);
const BITS_STORED: Tag = (0x0028, 0x0101);
const PIXEL_REPRESENTATION: Tag = (0x0028, 0x0103);
const RESCALE_INTERCEPT: Tag = (0x0028, 0x1052);
const RESCALE_SLOPE: Tag = (0x0028, 0x1053);
const PIXEL_DATA: Tag = (0x7FE0, 0x0010);

const ITEM: Tag = (0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = (0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = (0xFFFE, 0xE0DD);

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// 文件是否带有 Part-10 前导和 `DICM` 标记
pub fn has_dicom_magic(bytes: &[u8]) -> bool {
    bytes.len() >= PREAMBLE_LEN + MAGIC.len() && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == MAGIC
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VrEncoding {
    Explicit,
    Implicit,
}

struct ElementHeader {
    tag: Tag,
    length: u32,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                dicom_error(format!(
                    "truncated data: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn peek_group(&self) -> Option<u16> {
        self.data
            .get(self.pos..self.pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_header(&mut self, encoding: VrEncoding) -> Result<ElementHeader> {
        let tag = (self.read_u16()?, self.read_u16()?);

        // 条目和分隔符永远没有VR
        if tag.0 == 0xFFFE {
            return Ok(ElementHeader {
                tag,
                length: self.read_u32()?,
            });
        }

        let length = match encoding {
            VrEncoding::Implicit => self.read_u32()?,
            VrEncoding::Explicit => {
                let vr = self.take(2)?;
                if has_long_length(vr) {
                    self.take(2)?;
                    self.read_u32()?
                } else {
                    u32::from(self.read_u16()?)
                }
            }
        };

        Ok(ElementHeader { tag, length })
    }

    /// 跳过不定长序列直到序列分隔符
    fn skip_sequence(&mut self, encoding: VrEncoding, depth: usize) -> Result<()> {
        if depth > MAX_NESTING {
            return Err(dicom_error("sequence nesting too deep".to_string()));
        }
        loop {
            let header = self.read_header(encoding)?;
            match header.tag {
                SEQUENCE_DELIMITATION => return Ok(()),
                ITEM if header.length == UNDEFINED_LENGTH => self.skip_item(encoding, depth + 1)?,
                ITEM => {
                    self.take(header.length as usize)?;
                }
                other => {
                    return Err(dicom_error(format!(
                        "unexpected tag ({:04X},{:04X}) inside sequence",
                        other.0, other.1
                    )))
                }
            }
        }
    }

    fn skip_item(&mut self, encoding: VrEncoding, depth: usize) -> Result<()> {
        if depth > MAX_NESTING {
            return Err(dicom_error("item nesting too deep".to_string()));
        }
        loop {
            let header = self.read_header(encoding)?;
            if header.tag == ITEM_DELIMITATION {
                return Ok(());
            }
            if header.length == UNDEFINED_LENGTH {
                self.skip_sequence(encoding, depth + 1)?;
            } else {
                self.take(header.length as usize)?;
            }
        }
    }
}

fn has_long_length(vr: &[u8]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR" | b"UT" | b"UV"
    )
}

fn dicom_error(message: String) -> ExplainError {
    ExplainError::Load(format!("DICOM: {}", message))
}

/// 像素解码需要的属性
#[derive(Debug, Default)]
struct PixelModule<'a> {
    rows: Option<u16>,
    columns: Option<u16>,
    samples_per_pixel: Option<u16>,
    bits_allocated: Option<u16>,
    bits_stored: Option<u16>,
    pixel_representation: Option<u16>,
    planar_configuration: Option<u16>,
    number_of_frames: Option<i64>,
    photometric: Option<String>,
    rescale_slope: Option<f64>,
    rescale_intercept: Option<f64>,
    pixel_data: Option<&'a [u8]>,
}

fn parse_us(value: &[u8]) -> Result<u16> {
    if value.len() < 2 {
        return Err(dicom_error("US value shorter than 2 bytes".to_string()));
    }
    Ok(u16::from_le_bytes([value[0], value[1]]))
}

fn parse_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// DS/IS 可能是多值，取第一个
fn parse_number(value: &[u8]) -> Result<f64> {
    let text = parse_text(value);
    let first = text.split('\\').next().unwrap_or("").trim();
    first
        .parse::<f64>()
        .map_err(|_| dicom_error(format!("invalid numeric string '{}'", first)))
}

/// 解码 DICOM 字节为原始像素
pub fn decode(bytes: &[u8]) -> Result<RawImage> {
    let start = if has_dicom_magic(bytes) {
        PREAMBLE_LEN + MAGIC.len()
    } else if bytes.starts_with(MAGIC) {
        MAGIC.len()
    } else {
        0
    };
    let mut cursor = Cursor::new(bytes, start);

    // 文件元信息（0002组）总是显式VR little endian
    let mut transfer_syntax = None;
    while cursor.peek_group() == Some(0x0002) {
        let header = cursor.read_header(VrEncoding::Explicit)?;
        let value = cursor.take(header.length as usize)?;
        if header.tag == TRANSFER_SYNTAX {
            transfer_syntax = Some(parse_text(value));
        }
    }

    let encoding = match transfer_syntax.as_deref() {
        Some(TS_IMPLICIT_LE) => VrEncoding::Implicit,
        Some(TS_EXPLICIT_LE) => VrEncoding::Explicit,
        Some(TS_EXPLICIT_BE) => {
            return Err(dicom_error("big endian transfer syntax is not supported".to_string()))
        }
        Some(TS_DEFLATED) => {
            return Err(dicom_error("deflated transfer syntax is not supported".to_string()))
        }
        Some(other) => {
            return Err(dicom_error(format!(
                "compressed transfer syntax {} is not supported",
                other
            )))
        }
        None => guess_encoding(bytes, cursor.pos),
    };
    tracing::debug!(
        "DICOM transfer syntax: {:?}, encoding: {:?}",
        transfer_syntax,
        encoding
    );

    let module = read_dataset(&mut cursor, encoding)?;
    pixels_from_module(module)
}

/// 没有元信息时根据第一个元素是否带可读VR判断
fn guess_encoding(bytes: &[u8], pos: usize) -> VrEncoding {
    match bytes.get(pos + 4..pos + 6) {
        Some(vr) if vr.iter().all(|b| b.is_ascii_uppercase()) => VrEncoding::Explicit,
        _ => VrEncoding::Implicit,
    }
}

fn read_dataset<'a>(cursor: &mut Cursor<'a>, encoding: VrEncoding) -> Result<PixelModule<'a>> {
    let mut module = PixelModule::default();

    while !cursor.is_at_end() {
        let header = cursor.read_header(encoding)?;

        if header.length == UNDEFINED_LENGTH {
            if header.tag == PIXEL_DATA {
                return Err(dicom_error("encapsulated pixel data is not supported".to_string()));
            }
            cursor.skip_sequence(encoding, 0)?;
            continue;
        }

        let value = cursor.take(header.length as usize)?;
        match header.tag {
            ROWS => module.rows = Some(parse_us(value)?),
            COLUMNS => module.columns = Some(parse_us(value)?),
            SAMPLES_PER_PIXEL => module.samples_per_pixel = Some(parse_us(value)?),
            BITS_ALLOCATED => module.bits_allocated = Some(parse_us(value)?),
            BITS_STORED => module.bits_stored = Some(parse_us(value)?),
            PIXEL_REPRESENTATION => module.pixel_representation = Some(parse_us(value)?),
            PLANAR_CONFIGURATION => module.planar_configuration = Some(parse_us(value)?),
            NUMBER_OF_FRAMES => module.number_of_frames = Some(parse_number(value)? as i64),
            PHOTOMETRIC => module.photometric = Some(parse_text(value)),
            RESCALE_SLOPE => module.rescale_slope = Some(parse_number(value)?),
            RESCALE_INTERCEPT => module.rescale_intercept = Some(parse_number(value)?),
            PIXEL_DATA => {
                module.pixel_data = Some(value);
                break;
            }
            _ => {}
        }
    }

    Ok(module)
}

fn pixels_from_module(module: PixelModule<'_>) -> Result<RawImage> {
    let rows = module.rows.ok_or_else(|| dicom_error("missing Rows".to_string()))? as usize;
    let columns = module
        .columns
        .ok_or_else(|| dicom_error("missing Columns".to_string()))? as usize;
    let pixel_data = module
        .pixel_data
        .ok_or_else(|| dicom_error("missing PixelData".to_string()))?;
    let bits_allocated = module
        .bits_allocated
        .ok_or_else(|| dicom_error("missing BitsAllocated".to_string()))?;
    let samples = module.samples_per_pixel.unwrap_or(1) as usize;
    let signed = module.pixel_representation.unwrap_or(0) == 1;
    let bits_stored = module.bits_stored.unwrap_or(bits_allocated).min(bits_allocated);

    if samples != 1 && samples != 3 {
        return Err(dicom_error(format!("unsupported SamplesPerPixel {}", samples)));
    }
    let photometric = module
        .photometric
        .clone()
        .unwrap_or_else(|| if samples == 1 { "MONOCHROME2" } else { "RGB" }.to_string());
    match (photometric.as_str(), samples) {
        ("MONOCHROME1", 1) | ("MONOCHROME2", 1) | ("RGB", 3) => {}
        (other, _) => {
            return Err(dicom_error(format!(
                "unsupported photometric interpretation {} with {} samples",
                other, samples
            )))
        }
    }

    let bytes_per_sample = match bits_allocated {
        8 => 1,
        16 => 2,
        32 => 4,
        other => return Err(dicom_error(format!("unsupported BitsAllocated {}", other))),
    };
    if module.number_of_frames.unwrap_or(1) > 1 {
        tracing::debug!(
            "Multi-frame DICOM ({} frames), using first frame",
            module.number_of_frames.unwrap_or(1)
        );
    }

    let sample_count = rows * columns * samples;
    let frame_len = sample_count * bytes_per_sample;
    if pixel_data.len() < frame_len {
        return Err(dicom_error(format!(
            "pixel data has {} bytes, expected at least {}",
            pixel_data.len(),
            frame_len
        )));
    }

    let slope = module.rescale_slope.unwrap_or(1.0);
    let intercept = module.rescale_intercept.unwrap_or(0.0);
    let rescaled = slope != 1.0 || intercept != 0.0;

    let mask: u32 = if bits_stored >= 32 {
        u32::MAX
    } else {
        (1u32 << bits_stored) - 1
    };
    let decode_sample = |index: usize| -> f32 {
        let offset = index * bytes_per_sample;
        let raw = match bytes_per_sample {
            1 => u32::from(pixel_data[offset]),
            2 => u32::from(u16::from_le_bytes([pixel_data[offset], pixel_data[offset + 1]])),
            _ => u32::from_le_bytes([
                pixel_data[offset],
                pixel_data[offset + 1],
                pixel_data[offset + 2],
                pixel_data[offset + 3],
            ]),
        } & mask;
        let value = if signed && bits_stored > 0 && bits_stored < 32 && raw & (1 << (bits_stored - 1)) != 0 {
            i64::from(raw) - (1i64 << bits_stored)
        } else if signed && bits_stored >= 32 {
            i64::from(raw as i32)
        } else {
            i64::from(raw)
        };
        (value as f64 * slope + intercept) as f32
    };

    let planar = module.planar_configuration.unwrap_or(0) == 1 && samples == 3;
    let plane = rows * columns;
    let mut pixels = Array3::<f32>::zeros((rows, columns, samples));
    for r in 0..rows {
        for c in 0..columns {
            for s in 0..samples {
                let index = if planar {
                    s * plane + r * columns + c
                } else {
                    (r * columns + c) * samples + s
                };
                pixels[[r, c, s]] = decode_sample(index);
            }
        }
    }

    let depth = if rescaled {
        PixelDepth::Float32
    } else {
        match (bytes_per_sample, signed) {
            (1, false) => PixelDepth::Uint8,
            (1, true) | (2, true) => PixelDepth::Int16,
            (2, false) => PixelDepth::Uint16,
            _ => PixelDepth::Int32,
        }
    };

    if photometric == "MONOCHROME1" {
        // MONOCHROME1 中数值越大越暗，翻转为常规灰度
        let min = pixels.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = pixels.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        pixels.mapv_inplace(|v| min + max - v);
    }

    tracing::debug!(
        "Decoded DICOM pixels: {}x{}x{}, bits={}, signed={}, slope={}, intercept={}",
        rows,
        columns,
        samples,
        bits_allocated,
        signed,
        slope,
        intercept
    );

    Ok(RawImage::new(pixels, depth, SourceKind::Dicom))
}
