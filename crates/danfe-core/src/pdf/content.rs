//! Positioned text from page content streams.
//!
//! A small interpreter for the text operators of a content stream. It only
//! tracks what is needed to place strings on the page: the graphics state
//! matrix, the text and line matrices, font size and leading. Glyph widths
//! are estimated from the font size since font programs are not read.

use lopdf::content::{Content, Operation};
use lopdf::Object;
use tracing::trace;

use crate::error::PdfError;

/// Average glyph advance as a fraction of the font size.
const GLYPH_ADVANCE: f32 = 0.5;

/// A string shown on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Origin in user space (y grows upwards).
    pub x: f32,
    pub y: f32,
    /// Effective font size after all transforms.
    pub font_size: f32,
    /// Estimated horizontal extent.
    pub width: f32,
}

impl TextRun {
    pub fn x_end(&self) -> f32 {
        self.x + self.width
    }
}

/// 2D affine transform `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix { e: tx, f: ty, ..Self::IDENTITY }
    }

    /// `self × other` in PDF row-vector convention.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

#[derive(Debug, Clone)]
struct TextState {
    ctm: Matrix,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            font_size: 1.0,
            leading: 0.0,
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(&self.tlm);
        self.tm = self.tlm;
    }

    fn show(&mut self, text: String, adjust: f32, runs: &mut Vec<TextRun>) {
        let chars = text.chars().count() as f32;
        let advance = chars * self.font_size * GLYPH_ADVANCE - adjust / 1000.0 * self.font_size;

        let m = self.tm.then(&self.ctm);
        let scale = m.vertical_scale();
        if !text.trim().is_empty() {
            runs.push(TextRun {
                text,
                x: m.e,
                y: m.f,
                font_size: self.font_size * scale,
                width: advance * scale,
            });
        }
        self.tm = Matrix::translate(advance, 0.0).then(&self.tm);
    }
}

/// Decode a PDF string: UTF-16BE when it carries a BOM, Latin-1 otherwise.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn number(op: &Operation, i: usize) -> Option<f32> {
    op.operands.get(i).and_then(|o| o.as_float().ok())
}

fn string_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// Interpret the text operators of a page content stream.
pub fn text_runs(data: &[u8], page: u32) -> Result<Vec<TextRun>, PdfError> {
    let content = Content::decode(data).map_err(|e| PdfError::Content {
        page,
        reason: e.to_string(),
    })?;

    let mut state = TextState::default();
    let mut saved: Vec<Matrix> = Vec::new();
    let mut runs = Vec::new();

    for op in &content.operations {
        match op.operator.as_str() {
            "q" => saved.push(state.ctm),
            "Q" => {
                if let Some(ctm) = saved.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) = (
                    number(op, 0),
                    number(op, 1),
                    number(op, 2),
                    number(op, 3),
                    number(op, 4),
                    number(op, 5),
                ) {
                    state.ctm = Matrix { a, b, c, d, e, f }.then(&state.ctm);
                }
            }
            "BT" => {
                state.tm = Matrix::IDENTITY;
                state.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = number(op, 1) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = number(op, 0) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (number(op, 0), number(op, 1)) {
                    state.next_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (number(op, 0), number(op, 1)) {
                    state.leading = -ty;
                    state.next_line(tx, ty);
                }
            }
            "Tm" => {
                if let (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) = (
                    number(op, 0),
                    number(op, 1),
                    number(op, 2),
                    number(op, 3),
                    number(op, 4),
                    number(op, 5),
                ) {
                    state.tlm = Matrix { a, b, c, d, e, f };
                    state.tm = state.tlm;
                }
            }
            "T*" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
            }
            "Tj" => {
                if let Some(text) = op.operands.first().and_then(string_operand) {
                    state.show(text, 0.0, &mut runs);
                }
            }
            "'" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
                if let Some(text) = op.operands.first().and_then(string_operand) {
                    state.show(text, 0.0, &mut runs);
                }
            }
            "\"" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
                if let Some(text) = op.operands.get(2).and_then(string_operand) {
                    state.show(text, 0.0, &mut runs);
                }
            }
            "TJ" => {
                // Kerned pieces become one run; adjustments only move the pen
                if let Some(Object::Array(items)) = op.operands.first() {
                    let mut text = String::new();
                    let mut adjust = 0.0;
                    for item in items {
                        match item {
                            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                            other => {
                                if let Ok(n) = other.as_float() {
                                    // Large negative gaps are word spaces
                                    if n < -200.0 {
                                        text.push(' ');
                                    }
                                    adjust += n;
                                }
                            }
                        }
                    }
                    state.show(text, adjust, &mut runs);
                }
            }
            _ => {}
        }
    }

    trace!("page {}: {} text runs", page, runs.len());
    Ok(runs)
}
