//! Content-stream operations.
//!
//! Every operator in the stream maps onto one [`Operation`] case; operators
//! outside the modeled vocabulary are kept verbatim in
//! [`Operation::Other`] so a rewrite of the stream loses nothing.

use crate::object::Object;

/// A 2D point in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An axis-aligned rectangle as `re` states it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// How a subpath begins: `m` gives a point, `re` gives a whole rectangle
/// (an implicit four-line closed subpath).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubpathStart {
    Point(Point),
    Rectangle(Rectangle),
}

/// The painting operators collapsed into one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintMode {
    /// `S`
    Stroke,
    /// `s`
    CloseStroke,
    /// `f` and the legacy `F`
    Fill,
    /// `f*`
    FillEvenOdd,
    /// `B`
    FillStroke,
    /// `B*`
    FillStrokeEvenOdd,
    /// `b`
    CloseFillStroke,
    /// `b*`
    CloseFillStrokeEvenOdd,
    /// `n`, paints nothing; used to apply a pending clip.
    NoOp,
}

/// One piece of a `TJ` array: bytes to show or a position adjustment in
/// thousandths of an em.
#[derive(Debug, Clone, PartialEq)]
pub enum TextPiece {
    Text(Vec<u8>),
    Adjustment(f64),
}

/// A single content-stream operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `m` or `re`.
    BeginSubpath(SubpathStart),
    /// `l`
    LineTo(Point),
    /// `c`
    CurveTo { c1: Point, c2: Point, end: Point },
    /// `v`, first control point implied by the current point.
    CurveToV { c2: Point, end: Point },
    /// `y`, second control point coincides with the endpoint.
    CurveToY { c1: Point, end: Point },
    /// `h`
    ClosePath,
    /// `W` / `W*`
    SetClip { even_odd: bool },
    /// Painting operator ending a path.
    Paint(PaintMode),

    /// `q`
    SaveState,
    /// `Q`
    RestoreState,
    /// `cm`
    SetMatrix([f64; 6]),
    /// `w`
    SetLineWidth(f64),
    /// `J`
    SetLineCap(i64),
    /// `j`
    SetLineJoin(i64),
    /// `M`
    SetMiterLimit(f64),
    /// `d`
    SetDashPattern { array: Vec<f64>, phase: f64 },
    /// `ri`
    SetRenderingIntent(String),
    /// `i`
    SetFlatness(f64),
    /// `gs`
    ApplyGraphicsState(String),

    /// `BT`
    BeginText,
    /// `ET`
    EndText,
    /// `Tf`
    SetFont { name: String, size: f64 },
    /// `Tj`
    ShowText(Vec<u8>),
    /// `'`
    ShowTextNextLine(Vec<u8>),
    /// `"`
    ShowTextNextLineSpaced {
        word_spacing: f64,
        char_spacing: f64,
        text: Vec<u8>,
    },
    /// `TJ`
    ShowTextAdjusted(Vec<TextPiece>),
    /// `Td`
    MoveText(Point),
    /// `TD`
    MoveTextSetLeading(Point),
    /// `Tm`
    SetTextMatrix([f64; 6]),
    /// `T*`
    NextLine,
    /// `Tc`
    SetCharSpacing(f64),
    /// `Tw`
    SetWordSpacing(f64),
    /// `Tz`
    SetHorizontalScaling(f64),
    /// `TL`
    SetTextLeading(f64),
    /// `Tr`
    SetTextRenderingMode(i64),
    /// `Ts`
    SetTextRise(f64),

    /// `cs`
    SetFillColorSpace(String),
    /// `CS`
    SetStrokeColorSpace(String),
    /// `g`, `rg`, `k`, `sc`, `scn`
    SetFillColor {
        components: Vec<f64>,
        pattern: Option<String>,
    },
    /// `G`, `RG`, `K`, `SC`, `SCN`
    SetStrokeColor {
        components: Vec<f64>,
        pattern: Option<String>,
    },

    /// `BMC` / `BDC`
    BeginMarkedContent {
        tag: String,
        properties: Option<Object>,
    },
    /// `EMC`
    EndMarkedContent,
    /// `MP` / `DP`
    MarkPoint {
        tag: String,
        properties: Option<Object>,
    },

    /// `Do`
    PaintXObject(String),
    /// `sh`
    PaintShading(String),

    /// Anything not modeled above, operands preserved.
    Other {
        operator: String,
        operands: Vec<Object>,
    },
}

fn num(operands: &[Object], i: usize) -> Option<f64> {
    operands.get(i).and_then(Object::as_number)
}

fn int(operands: &[Object], i: usize) -> Option<i64> {
    operands.get(i).and_then(Object::as_integer)
}

fn name(operands: &[Object], i: usize) -> Option<String> {
    operands.get(i).and_then(Object::as_name).map(str::to_string)
}

fn string(operands: &[Object], i: usize) -> Option<Vec<u8>> {
    operands.get(i).and_then(Object::as_string).map(<[u8]>::to_vec)
}

fn point(operands: &[Object], i: usize) -> Option<Point> {
    Some(Point {
        x: num(operands, i)?,
        y: num(operands, i + 1)?,
    })
}

fn matrix(operands: &[Object]) -> Option<[f64; 6]> {
    if operands.len() != 6 {
        return None;
    }
    let mut out = [0.0; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = num(operands, i)?;
    }
    Some(out)
}

fn numbers(operands: &[Object]) -> Option<Vec<f64>> {
    operands.iter().map(Object::as_number).collect()
}

/// `sc`/`scn` style operand list: numbers with an optional trailing pattern
/// name.
fn color(operands: &[Object]) -> Option<(Vec<f64>, Option<String>)> {
    let (pattern, numeric) = match operands.last() {
        Some(Object::Name(n)) => (Some(n.clone()), &operands[..operands.len() - 1]),
        _ => (None, operands),
    };
    Some((numbers(numeric)?, pattern))
}

impl Operation {
    /// Map an operator word and its operands onto an operation.
    ///
    /// Shape mismatches (wrong operand count or type) fall back to
    /// [`Operation::Other`] rather than failing the parse.
    pub fn build(operator: &str, operands: Vec<Object>) -> Operation {
        let built = Self::try_build(operator, &operands);
        built.unwrap_or(Operation::Other {
            operator: operator.to_string(),
            operands,
        })
    }

    fn try_build(operator: &str, operands: &[Object]) -> Option<Operation> {
        use Operation::*;
        let op = match operator {
            "m" => BeginSubpath(SubpathStart::Point(point(operands, 0)?)),
            "re" => BeginSubpath(SubpathStart::Rectangle(Rectangle {
                x: num(operands, 0)?,
                y: num(operands, 1)?,
                width: num(operands, 2)?,
                height: num(operands, 3)?,
            })),
            "l" => LineTo(point(operands, 0)?),
            "c" => CurveTo {
                c1: point(operands, 0)?,
                c2: point(operands, 2)?,
                end: point(operands, 4)?,
            },
            "v" => CurveToV {
                c2: point(operands, 0)?,
                end: point(operands, 2)?,
            },
            "y" => CurveToY {
                c1: point(operands, 0)?,
                end: point(operands, 2)?,
            },
            "h" => ClosePath,
            "W" => SetClip { even_odd: false },
            "W*" => SetClip { even_odd: true },
            "S" => Paint(PaintMode::Stroke),
            "s" => Paint(PaintMode::CloseStroke),
            "f" | "F" => Paint(PaintMode::Fill),
            "f*" => Paint(PaintMode::FillEvenOdd),
            "B" => Paint(PaintMode::FillStroke),
            "B*" => Paint(PaintMode::FillStrokeEvenOdd),
            "b" => Paint(PaintMode::CloseFillStroke),
            "b*" => Paint(PaintMode::CloseFillStrokeEvenOdd),
            "n" => Paint(PaintMode::NoOp),

            "q" => SaveState,
            "Q" => RestoreState,
            "cm" => SetMatrix(matrix(operands)?),
            "w" => SetLineWidth(num(operands, 0)?),
            "J" => SetLineCap(int(operands, 0)?),
            "j" => SetLineJoin(int(operands, 0)?),
            "M" => SetMiterLimit(num(operands, 0)?),
            "d" => SetDashPattern {
                array: operands
                    .first()
                    .and_then(Object::as_array)
                    .and_then(numbers)?,
                phase: num(operands, 1)?,
            },
            "ri" => SetRenderingIntent(name(operands, 0)?),
            "i" => SetFlatness(num(operands, 0)?),
            "gs" => ApplyGraphicsState(name(operands, 0)?),

            "BT" => BeginText,
            "ET" => EndText,
            "Tf" => SetFont {
                name: name(operands, 0)?,
                size: num(operands, 1)?,
            },
            "Tj" => ShowText(string(operands, 0)?),
            "'" => ShowTextNextLine(string(operands, 0)?),
            "\"" => ShowTextNextLineSpaced {
                word_spacing: num(operands, 0)?,
                char_spacing: num(operands, 1)?,
                text: string(operands, 2)?,
            },
            "TJ" => {
                let items = operands.first().and_then(Object::as_array)?;
                let mut pieces = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Object::String(s) => pieces.push(TextPiece::Text(s.clone())),
                        other => pieces.push(TextPiece::Adjustment(other.as_number()?)),
                    }
                }
                ShowTextAdjusted(pieces)
            },
            "Td" => MoveText(point(operands, 0)?),
            "TD" => MoveTextSetLeading(point(operands, 0)?),
            "Tm" => SetTextMatrix(matrix(operands)?),
            "T*" => NextLine,
            "Tc" => SetCharSpacing(num(operands, 0)?),
            "Tw" => SetWordSpacing(num(operands, 0)?),
            "Tz" => SetHorizontalScaling(num(operands, 0)?),
            "TL" => SetTextLeading(num(operands, 0)?),
            "Tr" => SetTextRenderingMode(int(operands, 0)?),
            "Ts" => SetTextRise(num(operands, 0)?),

            "cs" => SetFillColorSpace(name(operands, 0)?),
            "CS" => SetStrokeColorSpace(name(operands, 0)?),
            "g" | "rg" | "k" | "sc" | "scn" => {
                let (components, pattern) = color(operands)?;
                SetFillColor {
                    components,
                    pattern,
                }
            },
            "G" | "RG" | "K" | "SC" | "SCN" => {
                let (components, pattern) = color(operands)?;
                SetStrokeColor {
                    components,
                    pattern,
                }
            },

            "BMC" => BeginMarkedContent {
                tag: name(operands, 0)?,
                properties: None,
            },
            "BDC" => BeginMarkedContent {
                tag: name(operands, 0)?,
                properties: Some(operands.get(1)?.clone()),
            },
            "EMC" => EndMarkedContent,
            "MP" => MarkPoint {
                tag: name(operands, 0)?,
                properties: None,
            },
            "DP" => MarkPoint {
                tag: name(operands, 0)?,
                properties: Some(operands.get(1)?.clone()),
            },

            "Do" => PaintXObject(name(operands, 0)?),
            "sh" => PaintShading(name(operands, 0)?),

            _ => return None,
        };
        Some(op)
    }

    /// Whether the operation takes part in path construction (including the
    /// clip markers that sit between construction and painting).
    pub fn is_path_construction(&self) -> bool {
        matches!(
            self,
            Operation::BeginSubpath(_)
                | Operation::LineTo(_)
                | Operation::CurveTo { .. }
                | Operation::CurveToV { .. }
                | Operation::CurveToY { .. }
                | Operation::ClosePath
                | Operation::SetClip { .. }
        )
    }

    /// Whether the operation paints (and thereby ends) a path.
    pub fn is_painting(&self) -> bool {
        matches!(self, Operation::Paint(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::build(operator, operands)
    }

    #[test]
    fn test_move_to() {
        assert_eq!(
            build("m", vec![Object::Integer(10), Object::Real(2.5)]),
            Operation::BeginSubpath(SubpathStart::Point(Point { x: 10.0, y: 2.5 }))
        );
    }

    #[test]
    fn test_rectangle() {
        let op = build(
            "re",
            vec![
                Object::Integer(100),
                Object::Integer(100),
                Object::Integer(200),
                Object::Integer(200),
            ],
        );
        assert_eq!(
            op,
            Operation::BeginSubpath(SubpathStart::Rectangle(Rectangle {
                x: 100.0,
                y: 100.0,
                width: 200.0,
                height: 200.0,
            }))
        );
        assert!(op.is_path_construction());
    }

    #[test]
    fn test_paint_modes() {
        assert_eq!(build("S", vec![]), Operation::Paint(PaintMode::Stroke));
        assert_eq!(build("f", vec![]), Operation::Paint(PaintMode::Fill));
        assert_eq!(build("F", vec![]), Operation::Paint(PaintMode::Fill));
        assert_eq!(build("b*", vec![]), Operation::Paint(PaintMode::CloseFillStrokeEvenOdd));
        assert!(build("n", vec![]).is_painting());
    }

    #[test]
    fn test_text_adjusted() {
        let op = build(
            "TJ",
            vec![Object::Array(vec![
                Object::text("AB"),
                Object::Integer(-120),
                Object::text("C"),
            ])],
        );
        assert_eq!(
            op,
            Operation::ShowTextAdjusted(vec![
                TextPiece::Text(b"AB".to_vec()),
                TextPiece::Adjustment(-120.0),
                TextPiece::Text(b"C".to_vec()),
            ])
        );
    }

    #[test]
    fn test_color_with_pattern() {
        let op = build(
            "scn",
            vec![Object::Real(0.5), Object::name("P1")],
        );
        assert_eq!(
            op,
            Operation::SetFillColor {
                components: vec![0.5],
                pattern: Some("P1".to_string()),
            }
        );
    }

    #[test]
    fn test_shape_mismatch_falls_back_to_other() {
        let op = build("m", vec![Object::Integer(1)]);
        assert_eq!(
            op,
            Operation::Other {
                operator: "m".to_string(),
                operands: vec![Object::Integer(1)],
            }
        );
    }

    #[test]
    fn test_unknown_operator_preserved() {
        let op = build("XYZ", vec![Object::Integer(9)]);
        match op {
            Operation::Other { operator, operands } => {
                assert_eq!(operator, "XYZ");
                assert_eq!(operands, vec![Object::Integer(9)]);
            },
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_classification() {
        assert!(build("l", vec![Object::Integer(0), Object::Integer(0)]).is_path_construction());
        assert!(build("W", vec![]).is_path_construction());
        assert!(!build("BT", vec![]).is_path_construction());
        assert!(!build("W", vec![]).is_painting());
    }
}
