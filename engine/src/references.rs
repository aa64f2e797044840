//! FILENAME: engine/src/references.rs
//! PURPOSE: Regex machinery for finding and rewriting cell references in formula text.
//! CONTEXT: The dependency graph is populated from the *text* of formulas,
//! not their parse trees, so this module is the single authority on what
//! counts as a reference inside a formula string. It also implements the
//! rewriters used when renaming sheets (with quoting normalization) and when
//! moving/copying/sorting cells (offset shifting that respects $ markers).
//!
//! All matching happens on a masked copy of the formula in which every
//! double-quoted string literal is replaced by dots of equal byte length, so
//! spans line up with the original text and references inside strings are
//! never touched.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::coord::{column_label, column_number, MAX_COLUMN, MAX_ROW};

/// Any character allowed in a sheet name.
const SHEET_CHAR: &str = r"[a-zA-Z0-9.?!,:;@#$%^&*()\-_ ]";

/// Characters allowed at the edges of a sheet name (no space).
const SHEET_EDGE: &str = r"[a-zA-Z0-9.?!,:;@#$%^&*()\-_]";

/// An unquoted sheet name as written in a formula.
const UNQUOTED_SHEET: &str = r"[A-Za-z_][A-Za-z0-9_]*";

/// A cell location in a formula, with optional absolute markers.
const FORM_CELL: &str = r"\$?[A-Za-z]{1,4}\$?[1-9][0-9]{0,3}";

/// Double-quoted string literals (masked before any other matching).
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]+""#).unwrap());

fn ref_pattern() -> String {
    format!(
        "(?:(?P<qsheet>'{e}{c}*{e}'|'{e}')|(?P<usheet>{u}))!(?P<sloc>{f})|(?P<bloc>{f})",
        e = SHEET_EDGE,
        c = SHEET_CHAR,
        u = UNQUOTED_SHEET,
        f = FORM_CELL,
    )
}

/// Any reference in a formula: quoted-sheet, unquoted-sheet, or bare.
static REF: Lazy<Regex> = Lazy::new(|| Regex::new(&ref_pattern()).unwrap());

/// Full-string version of the reference pattern, used by INDIRECT.
static REF_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:{})$", ref_pattern())).unwrap());

/// A sheet-name token followed by '!', not preceded by a word character or
/// a double quote. The separator character is consumed, so the name itself
/// is captured for span-based splicing.
static SHEET_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?:^|[^0-9A-Za-z_"])(?P<name>'{e}{c}*{e}'|'{e}'|{u})!"#,
        e = SHEET_EDGE,
        c = SHEET_CHAR,
        u = UNQUOTED_SHEET,
    ))
    .unwrap()
});

/// Sheet names that must be single-quoted inside formulas.
static NEEDS_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^A-Za-z_]|[^0-9A-Za-z_]").unwrap());

/// A valid sheet name for creation/renaming: single allowed character, or
/// two edge characters with any allowed characters (including spaces)
/// between them. Quotes are excluded by the character classes.
static VALID_SHEET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^(?:{e}{c}*{e}|{e})$",
        e = SHEET_EDGE,
        c = SHEET_CHAR
    ))
    .unwrap()
});

/// Function names with evaluation-time dependencies.
static EVAL_DEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)if|iferror|choose|indirect").unwrap());

/// Replaces every double-quoted string literal with '.' characters of equal
/// byte length, preserving all match offsets.
pub fn mask_string_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev = 0;
    for m in STRING_LITERAL.find_iter(text) {
        out.push_str(&text[prev..m.start()]);
        out.extend(std::iter::repeat('.').take(m.end() - m.start()));
        prev = m.end();
    }
    out.push_str(&text[prev..]);
    out
}

/// Finds all cell references in the formula. Returns bare (local-sheet)
/// locations and (sheet name, location) pairs, with absolute markers
/// stripped from the returned location forms.
pub fn find_refs(formula: &str) -> (Vec<String>, Vec<(String, String)>) {
    find_refs_impl(formula, false)
}

/// Like `find_refs`, but preserves the $ markers in the returned location
/// tokens. Used by the move/copy/sort offset rewriting.
pub fn find_refs_absolute(formula: &str) -> (Vec<String>, Vec<(String, String)>) {
    find_refs_impl(formula, true)
}

fn find_refs_impl(formula: &str, keep_absolute: bool) -> (Vec<String>, Vec<(String, String)>) {
    let masked = mask_string_literals(formula);
    let mut locals = Vec::new();
    let mut sheet_refs = Vec::new();

    for caps in REF.captures_iter(&masked) {
        if let Some(loc) = caps.name("bloc") {
            locals.push(strip_absolute(loc.as_str(), keep_absolute));
        } else if let Some(loc) = caps.name("sloc") {
            let sheet = caps
                .name("qsheet")
                .map(|m| m.as_str().trim_matches('\''))
                .or_else(|| caps.name("usheet").map(|m| m.as_str()))
                .unwrap_or("");
            sheet_refs.push((
                sheet.to_string(),
                strip_absolute(loc.as_str(), keep_absolute),
            ));
        }
    }

    (locals, sheet_refs)
}

fn strip_absolute(location: &str, keep_absolute: bool) -> String {
    if keep_absolute {
        location.to_string()
    } else {
        location.replace('$', "")
    }
}

/// Replaces every occurrence of `old_name` as a sheet-name token (quoted or
/// not, case-insensitive) with `new_name`, and re-normalizes the quoting of
/// every other sheet-name token in the formula.
pub fn replace_sheet_names(formula: &str, old_name: &str, new_name: &str) -> String {
    let masked = mask_string_literals(formula);
    let old_lower = old_name.to_lowercase();

    let mut result = String::with_capacity(formula.len());
    let mut prev = 0;
    for caps in SHEET_TOKEN.captures_iter(&masked) {
        let Some(m) = caps.name("name") else { continue };
        let token = formula[m.start()..m.end()].trim_matches('\'');
        let replacement = if token.to_lowercase() == old_lower {
            new_name
        } else {
            token
        };
        result.push_str(&formula[prev..m.start()]);
        result.push_str(&quote_sheet_name(replacement));
        prev = m.end();
    }
    result.push_str(&formula[prev..]);
    result
}

/// Quotes a sheet name for inclusion in a formula when required. Names
/// matching identifier syntax are emitted bare; everything else is wrapped
/// in single quotes.
pub fn quote_sheet_name(name: &str) -> String {
    let stripped = name.trim_matches('\'');
    if NEEDS_QUOTE.is_match(stripped) {
        format!("'{}'", stripped)
    } else {
        stripped.to_string()
    }
}

/// Shifts the non-absolute axes of every local (sheet-less) reference in
/// the formula by the given offsets. References pushed outside the
/// addressable area become the #REF! literal. Sheet-qualified references
/// are left untouched.
pub fn rewrite_formula_offsets(formula: &str, row_offset: i64, col_offset: i64) -> String {
    let masked = mask_string_literals(formula);

    let mut result = String::with_capacity(formula.len());
    let mut prev = 0;
    for caps in REF.captures_iter(&masked) {
        let Some(m) = caps.name("bloc") else { continue };
        result.push_str(&formula[prev..m.start()]);
        result.push_str(&shift_reference(
            &formula[m.start()..m.end()],
            row_offset,
            col_offset,
        ));
        prev = m.end();
    }
    result.push_str(&formula[prev..]);
    result
}

/// Shifts a single reference token such as "B2", "$B2" or "B$2", honoring
/// its absolute markers. Out-of-bounds results collapse to "#REF!".
fn shift_reference(reference: &str, row_offset: i64, col_offset: i64) -> String {
    let col_absolute = reference.starts_with('$');
    let rest = reference.trim_start_matches('$');
    let label: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let after_label = &rest[label.len()..];
    let row_absolute = after_label.starts_with('$');
    let row_str = after_label.trim_start_matches('$');

    let col = column_number(&label) as i64;
    let row: i64 = match row_str.parse() {
        Ok(r) => r,
        Err(_) => return reference.to_string(),
    };

    let new_col = if col_absolute { col } else { col + col_offset };
    let new_row = if row_absolute { row } else { row + row_offset };

    if new_col < 1 || new_col > MAX_COLUMN as i64 || new_row < 1 || new_row > MAX_ROW as i64 {
        return "#REF!".to_string();
    }

    format!(
        "{}{}{}{}",
        if col_absolute { "$" } else { "" },
        column_label(new_col as u32),
        if row_absolute { "$" } else { "" },
        new_row
    )
}

/// Returns true if the given string is exactly one cell reference of any
/// form. Used by INDIRECT to vet its argument.
pub fn is_ref(text: &str) -> bool {
    REF_FULL.is_match(text)
}

/// Returns true if the (unmasked regions of the) text mention a function
/// with evaluation-time dependencies. A plain case-insensitive search, so
/// any occurrence of "if"/"choose"/"indirect" counts; false positives only
/// cost an extra re-evaluation.
pub fn has_eval_dep(text: &str) -> bool {
    EVAL_DEP.is_match(&mask_string_literals(text))
}

/// Validates a sheet name for creation/renaming: non-empty, no surrounding
/// whitespace, no quotes, only allowed characters.
pub fn is_valid_sheet_name(name: &str) -> bool {
    VALID_SHEET_NAME.is_match(name)
}
