//! Structural content-stream parsing.
//!
//! A content stream is a flat sequence of operands and operators; this
//! module groups it into the constructs the format implies: paths, text
//! blocks, local graphics states, marked-content sections, and inline
//! images.

pub mod ops;
pub mod parser;

pub use ops::{Operation, PaintMode, Point, Rectangle, SubpathStart, TextPiece};
pub use parser::{Content, InlineImage, parse_content};
