use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding as RsEncoding, UTF_16BE, UTF_16LE, UTF_8};
use thiserror::Error;

/// 文件在磁碟上的行尾樣式。 / Line ending style found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }
}

/// 磁碟上的文字編碼。 / Text encoding found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// 由 `chardetng` 推測出的舊式字碼頁。 / Legacy code page guessed by `chardetng`.
    Legacy(&'static RsEncoding),
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Legacy(encoding) => encoding.name(),
        }
    }

    fn from_rs(encoding: &'static RsEncoding) -> Self {
        if encoding == UTF_8 {
            TextEncoding::Utf8
        } else if encoding == UTF_16LE {
            TextEncoding::Utf16Le
        } else if encoding == UTF_16BE {
            TextEncoding::Utf16Be
        } else {
            TextEncoding::Legacy(encoding)
        }
    }
}

/// 寫回磁碟時需保留的格式資訊。 / Format details preserved when writing back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentFormat {
    pub encoding: TextEncoding,
    pub line_ending: LineEnding,
    pub bom: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("file encoding is not supported or data is invalid")]
    InvalidEncoding,
    #[error("text cannot be represented in target encoding {0}")]
    Unrepresentable(&'static str),
}

/// 解碼後的可編輯文字（行尾已正規化為 `\n`）。 / Editable text with newlines normalised to `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub format: DocumentFormat,
}

/// 將磁碟位元組轉為可編輯文字。 / Turns raw disk bytes into editable text.
pub fn decode(bytes: &[u8]) -> Result<DecodedText, CodecError> {
    let (encoding, bom_len) = match RsEncoding::for_bom(bytes) {
        Some((encoding, len)) => (encoding, len),
        None => (sniff_encoding(bytes), 0),
    };

    let raw = encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .ok_or(CodecError::InvalidEncoding)?;

    Ok(DecodedText {
        format: DocumentFormat {
            encoding: TextEncoding::from_rs(encoding),
            line_ending: detect_line_ending(&raw),
            bom: bom_len > 0,
        },
        text: normalize_newlines(&raw),
    })
}

/// 依原格式將文字轉回位元組。 / Serialises editable text using the remembered format.
pub fn encode(text: &str, format: &DocumentFormat) -> Result<Vec<u8>, CodecError> {
    let text = match format.line_ending {
        LineEnding::Lf => Cow::Borrowed(text),
        other => Cow::Owned(text.replace('\n', other.as_str())),
    };

    match format.encoding {
        TextEncoding::Utf8 => {
            let mut out = Vec::with_capacity(text.len() + 3);
            if format.bom {
                out.extend_from_slice(b"\xEF\xBB\xBF");
            }
            out.extend_from_slice(text.as_bytes());
            Ok(out)
        }
        TextEncoding::Utf16Le => Ok(encode_utf16(&text, format.bom, u16::to_le_bytes)),
        TextEncoding::Utf16Be => Ok(encode_utf16(&text, format.bom, u16::to_be_bytes)),
        TextEncoding::Legacy(encoding) => {
            let (bytes, _, had_errors) = encoding.encode(&text);
            if had_errors {
                return Err(CodecError::Unrepresentable(encoding.name()));
            }
            Ok(bytes.into_owned())
        }
    }
}

fn sniff_encoding(bytes: &[u8]) -> &'static RsEncoding {
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

fn encode_utf16(text: &str, bom: bool, to_bytes: fn(u16) -> [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 2);
    if bom {
        out.extend_from_slice(&to_bytes(0xFEFF));
    }
    for unit in text.encode_utf16() {
        out.extend_from_slice(&to_bytes(unit));
    }
    out
}

/// 以第一個換行記號決定行尾樣式。 / The first newline sentinel decides the style.
fn detect_line_ending(text: &str) -> LineEnding {
    match text.find(|ch: char| ch == '\r' || ch == '\n') {
        Some(idx) if text.as_bytes()[idx] == b'\n' => LineEnding::Lf,
        Some(idx) if text.as_bytes().get(idx + 1) == Some(&b'\n') => LineEnding::CrLf,
        Some(_) => LineEnding::Cr,
        None => LineEnding::Lf,
    }
}

pub(crate) fn normalize_newlines(input: &str) -> String {
    if !input.contains('\r') {
        return input.to_owned();
    }
    input.replace("\r\n", "\n").replace('\r', "\n")
}
