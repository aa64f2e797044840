//! FILENAME: engine/src/cell.rs
//! PURPOSE: Defines the fundamental data structures for a single spreadsheet cell.
//! CONTEXT: This file contains the `Cell` struct, the `CellValue` enum, and
//! the cell error types. It separates the user's input (the content string)
//! from the calculated result (the value), and implements the content
//! classification rules that decide a cell's kind when its text is set.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use parser::ErrorLiteral;

/// The categories of error a cell can hold.
///
/// Declaration order doubles as the priority order used when sorting error
/// values; `Display` renders the canonical surface forms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CellErrorKind {
    /// A formula doesn't parse successfully ("#ERROR!")
    ParseError,
    /// A cell is part of a circular reference ("#CIRCREF!")
    CircularReference,
    /// A cell reference is invalid in some way ("#REF!")
    BadReference,
    /// Unrecognized function name ("#NAME?")
    BadName,
    /// A value of the wrong type was encountered during evaluation ("#VALUE!")
    TypeError,
    /// A divide-by-zero was encountered during evaluation ("#DIV/0!")
    DivideByZero,
}

impl CellErrorKind {
    /// Resolves a surface form such as "#ref!" (any case) to its kind.
    pub fn from_literal(s: &str) -> Option<Self> {
        ErrorLiteral::from_literal(s).map(CellErrorKind::from)
    }

    /// The canonical surface form, e.g. "#DIV/0!".
    pub fn as_literal(&self) -> &'static str {
        match self {
            CellErrorKind::ParseError => "#ERROR!",
            CellErrorKind::CircularReference => "#CIRCREF!",
            CellErrorKind::BadReference => "#REF!",
            CellErrorKind::BadName => "#NAME?",
            CellErrorKind::TypeError => "#VALUE!",
            CellErrorKind::DivideByZero => "#DIV/0!",
        }
    }
}

impl From<ErrorLiteral> for CellErrorKind {
    fn from(literal: ErrorLiteral) -> Self {
        match literal {
            ErrorLiteral::ParseError => CellErrorKind::ParseError,
            ErrorLiteral::CircularReference => CellErrorKind::CircularReference,
            ErrorLiteral::BadReference => CellErrorKind::BadReference,
            ErrorLiteral::BadName => CellErrorKind::BadName,
            ErrorLiteral::TypeError => CellErrorKind::TypeError,
            ErrorLiteral::DivideByZero => CellErrorKind::DivideByZero,
        }
    }
}

impl std::fmt::Display for CellErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_literal())
    }
}

/// An error value from user input, cell parsing, or evaluation.
///
/// The detail string is a diagnostic for humans and logs. Equality compares
/// the kind only, so re-evaluating a cell to the same error kind is not a
/// value change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellError {
    pub kind: CellErrorKind,
    pub detail: String,
}

impl CellError {
    pub fn new(kind: CellErrorKind, detail: impl Into<String>) -> Self {
        CellError {
            kind,
            detail: detail.into(),
        }
    }
}

impl PartialEq for CellError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for CellError {}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// The calculated result or raw data within a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

impl CellValue {
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn error_kind(&self) -> Option<CellErrorKind> {
        match self {
            CellValue::Error(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// The classification of a cell derived from its content string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    Text,
    Number,
    Boolean,
    Formula,
    ParseError,
}

/// The atomic unit of the spreadsheet.
///
/// `content` is the user's text with outer whitespace stripped; `value` is
/// derived from it at set time for every kind except Formula, whose value is
/// written by the update driver after evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub content: String,
    pub kind: CellKind,
    pub value: CellValue,
}

impl Cell {
    /// Creates a cell from (non-empty) content, classifying it.
    pub fn new(content: &str) -> Self {
        let mut cell = Cell {
            content: String::new(),
            kind: CellKind::Text,
            value: CellValue::Empty,
        };
        cell.set_content(content);
        cell
    }

    /// Replaces the cell's content and re-runs classification.
    pub fn set_content(&mut self, content: &str) {
        self.content = content.trim().to_string();
        self.classify();
    }

    /// Determines the kind and (for non-formula cells) the value from the
    /// content string.
    fn classify(&mut self) {
        // Formula: parse now so a bad formula is pinned to ParseError here
        // and never reaches the evaluator. The previous value is kept until
        // the update driver re-evaluates; a formula that re-evaluates to the
        // same value is not a change.
        if self.content.starts_with('=') {
            match &*parser::parse_cached(&self.content) {
                Ok(_) => {
                    self.kind = CellKind::Formula;
                }
                Err(e) => {
                    self.kind = CellKind::ParseError;
                    self.value = CellValue::Error(CellError::new(
                        CellErrorKind::ParseError,
                        e.message.clone(),
                    ));
                }
            }
            return;
        }

        // Boolean literal
        let upper = self.content.to_ascii_uppercase();
        if upper == "TRUE" || upper == "FALSE" {
            self.kind = CellKind::Boolean;
            self.value = CellValue::Boolean(upper == "TRUE");
            return;
        }

        // Number
        if let Some(number) = parse_decimal_content(&self.content) {
            self.kind = CellKind::Number;
            self.value = CellValue::Number(canonicalize(number));
            return;
        }

        // Error literal entered as plain text keeps Text kind but an error value
        self.kind = CellKind::Text;
        if let Some(kind) = CellErrorKind::from_literal(&upper) {
            self.value = CellValue::Error(CellError::new(kind, "Error from contents"));
        } else if let Some(stripped) = self.content.strip_prefix('\'') {
            // Leading apostrophe is stripped from the value but kept in content
            self.value = CellValue::Text(stripped.to_string());
        } else {
            self.value = CellValue::Text(self.content.clone());
        }
    }
}

/// Trims trailing fractional zeros from a decimal, e.g. 1.50 -> 1.5 and
/// 100.00 -> 100. This is the canonical form stored in cells and produced
/// by every arithmetic operation.
pub fn canonicalize(value: Decimal) -> Decimal {
    value.normalize()
}

/// Parses cell content as a decimal number.
///
/// Any ASCII letter disqualifies the string so that NaN/Infinity/exponent
/// spellings fall through to Text, and underscore digit separators are
/// rejected to match plain decimal syntax.
pub fn parse_decimal_content(content: &str) -> Option<Decimal> {
    let trimmed = content.trim();
    if trimmed.is_empty()
        || trimmed.chars().any(|c| c.is_ascii_alphabetic())
        || trimmed.contains('_')
        || !trimmed.bytes().any(|b| b.is_ascii_digit())
    {
        return None;
    }

    let mut normalized = trimmed.strip_prefix('+').unwrap_or(trimmed).to_string();
    if normalized.starts_with('.') {
        normalized.insert(0, '0');
    } else if normalized.starts_with("-.") {
        normalized.insert(1, '0');
    }
    if normalized.ends_with('.') {
        normalized.push('0');
    }

    normalized.parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_numbers_canonically() {
        let cell = Cell::new("1.500");
        assert_eq!(cell.kind, CellKind::Number);
        assert_eq!(cell.value, CellValue::Number(dec("1.5")));
        assert_eq!(cell.content, "1.500");

        let cell = Cell::new("  007  ");
        assert_eq!(cell.value, CellValue::Number(dec("7")));
        assert_eq!(cell.content, "007");

        let cell = Cell::new("-.5");
        assert_eq!(cell.value, CellValue::Number(dec("-0.5")));
    }

    #[test]
    fn rejects_letterish_numbers() {
        assert_eq!(Cell::new("NaN").kind, CellKind::Text);
        assert_eq!(Cell::new("Infinity").kind, CellKind::Text);
        assert_eq!(Cell::new("1e5").kind, CellKind::Text);
        assert_eq!(Cell::new("1_000").kind, CellKind::Text);
    }

    #[test]
    fn classifies_booleans() {
        let cell = Cell::new("tRuE");
        assert_eq!(cell.kind, CellKind::Boolean);
        assert_eq!(cell.value, CellValue::Boolean(true));
        assert_eq!(Cell::new("FALSE").value, CellValue::Boolean(false));
    }

    #[test]
    fn classifies_error_literals_as_text_kind() {
        let cell = Cell::new("#div/0!");
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(
            cell.value.error_kind(),
            Some(CellErrorKind::DivideByZero)
        );
    }

    #[test]
    fn strips_leading_apostrophe_from_value_only() {
        let cell = Cell::new("'123");
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(cell.value, CellValue::Text("123".to_string()));
        assert_eq!(cell.content, "'123");
    }

    #[test]
    fn classifies_formulas() {
        let cell = Cell::new("=A1+B1");
        assert_eq!(cell.kind, CellKind::Formula);
        assert_eq!(cell.value, CellValue::Empty);

        let cell = Cell::new("=1+");
        assert_eq!(cell.kind, CellKind::ParseError);
        assert_eq!(cell.value.error_kind(), Some(CellErrorKind::ParseError));
    }

    #[test]
    fn error_equality_ignores_detail() {
        let a = CellError::new(CellErrorKind::BadReference, "one thing");
        let b = CellError::new(CellErrorKind::BadReference, "another thing");
        assert_eq!(a, b);
        let c = CellError::new(CellErrorKind::TypeError, "one thing");
        assert_ne!(a, c);
    }

    #[test]
    fn error_kind_order_matches_priority() {
        assert!(CellErrorKind::ParseError < CellErrorKind::CircularReference);
        assert!(CellErrorKind::CircularReference < CellErrorKind::BadReference);
        assert!(CellErrorKind::TypeError < CellErrorKind::DivideByZero);
    }

    #[test]
    fn cell_values_serialize_round_trip() {
        let original = CellValue::Number(dec("1.5"));
        let json = serde_json::to_string(&original).unwrap();
        let back: CellValue = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);

        let cell = Cell::new("=A1+1");
        let json = serde_json::to_string(&cell).unwrap();
        let back: Cell = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, CellKind::Formula);
        assert_eq!(back.content, "=A1+1");
    }

    #[test]
    fn error_literal_roundtrip() {
        for kind in [
            CellErrorKind::ParseError,
            CellErrorKind::CircularReference,
            CellErrorKind::BadReference,
            CellErrorKind::BadName,
            CellErrorKind::TypeError,
            CellErrorKind::DivideByZero,
        ] {
            assert_eq!(CellErrorKind::from_literal(kind.as_literal()), Some(kind));
        }
    }
}
