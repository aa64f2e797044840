//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: Evaluates formula parse trees to compute cell values.
//! CONTEXT: After a formula is parsed into an AST, this module walks the
//! tree and computes the final result. It implements the coercion rules,
//! the comparison semantics (including empty-operand defaults and
//! cross-type ordering), error propagation with circular-reference
//! priority, and the lazy functions that choose which argument subtrees to
//! visit.
//!
//! An Evaluator is created per formula-cell evaluation. It holds a shared
//! borrow of the workbook, the identity of the cell being evaluated, and a
//! snapshot of that cell's current graph edges. Whenever a reference is
//! resolved that is not among those edges (only possible under IF /
//! IFERROR / CHOOSE / INDIRECT) it is recorded as a discovery; the update
//! driver drains the discoveries, adds them to the graph as provisional
//! edges, and restarts its pass.

use std::cell::RefCell;
use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use parser::{BinaryOperator, Expression, UnaryOperator, Value};

use crate::cell::{canonicalize, parse_decimal_content, CellError, CellErrorKind, CellValue};
use crate::dependency_graph::CellId;
use crate::workbook::Workbook;

/// The formula evaluator for one cell evaluation.
pub struct Evaluator<'a> {
    workbook: &'a Workbook,
    /// Lowercase name of the sheet owning the formula; bare references
    /// resolve against it.
    sheet_lower: String,
    from_cell: Option<CellId>,
    /// The evaluating cell's out-edges at evaluation start.
    static_edges: Vec<CellId>,
    /// References resolved during evaluation that are not static edges.
    /// RefCell because evaluation holds &self all the way down.
    discovered: RefCell<Vec<CellId>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(workbook: &'a Workbook, sheet_lower: impl Into<String>, from_cell: Option<CellId>) -> Self {
        let static_edges = from_cell
            .as_ref()
            .map(|cell| workbook.graph().dependencies(cell).to_vec())
            .unwrap_or_default();
        Evaluator {
            workbook,
            sheet_lower: sheet_lower.into(),
            from_cell,
            static_edges,
            discovered: RefCell::new(Vec::new()),
        }
    }

    /// Consumes the evaluator, yielding the dependencies discovered during
    /// evaluation (in resolution order).
    pub fn into_discovered(self) -> Vec<CellId> {
        self.discovered.into_inner()
    }

    pub(crate) fn workbook(&self) -> &Workbook {
        self.workbook
    }

    pub(crate) fn current_sheet(&self) -> &str {
        &self.sheet_lower
    }

    /// Evaluates an AST expression and returns the resulting value.
    pub fn evaluate(&self, expr: &Expression) -> CellValue {
        match expr {
            Expression::Literal(value) => eval_literal(value),
            Expression::CellRef { sheet, col, row, .. } => {
                let sheet_lower = sheet
                    .as_deref()
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| self.sheet_lower.clone());
                let location = format!("{}{}", col, row);
                self.resolve_reference(&sheet_lower, &location)
            }
            Expression::BinaryOp { left, op, right } => self.eval_binary(left, *op, right),
            Expression::UnaryOp { op, operand } => self.eval_unary(*op, operand),
            Expression::FunctionCall { name, args } => self.eval_function(name, args),
        }
    }

    /// Resolves a (sheet, location) reference to the referenced cell's
    /// current value. Missing sheets are #REF!; missing cells are Empty.
    ///
    /// When the resolved target is not among the evaluating cell's static
    /// edges, it is recorded for the driver: the edge may exist only
    /// because a lazy function chose this branch.
    pub(crate) fn resolve_reference(&self, sheet_lower: &str, location: &str) -> CellValue {
        if self.from_cell.is_some() {
            let target = (sheet_lower.to_string(), location.to_string());
            if !self.static_edges.contains(&target) && !self.discovered.borrow().contains(&target) {
                log::trace!(
                    "evaluation-time dependency: {:?} -> {}!{}",
                    self.from_cell,
                    sheet_lower,
                    location
                );
                self.discovered.borrow_mut().push(target);
            }
        }

        match self.workbook.sheet_by_lower(sheet_lower) {
            None => CellValue::Error(CellError::new(
                CellErrorKind::BadReference,
                format!("No such sheet: {sheet_lower}"),
            )),
            Some(sheet) => sheet
                .get_cell(location)
                .map(|cell| cell.value.clone())
                .unwrap_or(CellValue::Empty),
        }
    }

    fn eval_binary(&self, left: &Expression, op: BinaryOperator, right: &Expression) -> CellValue {
        use BinaryOperator::*;

        let left_value = self.evaluate(left);
        let right_value = self.evaluate(right);

        match op {
            Add | Subtract | Multiply | Divide => {
                let (a, b) = match (coerce_number(&left_value), coerce_number(&right_value)) {
                    (Ok(a), Ok(b)) => (a, b),
                    (a, b) => return propagate(a.err(), b.err()),
                };
                apply_arithmetic(op, a, b)
            }
            Concat => {
                let (a, b) = match (coerce_text(&left_value), coerce_text(&right_value)) {
                    (Ok(a), Ok(b)) => (a, b),
                    (a, b) => return propagate(a.err(), b.err()),
                };
                CellValue::Text(a + &b)
            }
            Equal | NotEqual | LessThan | GreaterThan | LessEqual | GreaterEqual => {
                if let Some(e) = propagated_error(&[
                    value_error(&left_value),
                    value_error(&right_value),
                ]) {
                    return CellValue::Error(e);
                }
                let (a, b) = fill_empty_defaults(left_value, right_value);
                let ord = compare_values(&a, &b);
                CellValue::Boolean(match op {
                    Equal => ord == Ordering::Equal,
                    NotEqual => ord != Ordering::Equal,
                    LessThan => ord == Ordering::Less,
                    GreaterThan => ord == Ordering::Greater,
                    LessEqual => ord != Ordering::Greater,
                    GreaterEqual => ord != Ordering::Less,
                    _ => false,
                })
            }
        }
    }

    fn eval_unary(&self, op: UnaryOperator, operand: &Expression) -> CellValue {
        let value = self.evaluate(operand);
        match coerce_number(&value) {
            Err(e) => CellValue::Error(e),
            Ok(n) => CellValue::Number(canonicalize(match op {
                UnaryOperator::Plus => n,
                UnaryOperator::Negate => -n,
            })),
        }
    }

    fn eval_function(&self, name: &str, args: &[Expression]) -> CellValue {
        match name {
            "IF" => self.eval_if(args),
            "IFERROR" => self.eval_iferror(args),
            "CHOOSE" => self.eval_choose(args),
            _ => {
                let values: Vec<CellValue> = args.iter().map(|a| self.evaluate(a)).collect();
                // INDIRECT and ISERROR consume error arguments; everyone
                // else propagates them before dispatch.
                if name != "INDIRECT" && name != "ISERROR" {
                    let errors: Vec<Option<&CellError>> = values.iter().map(value_error).collect();
                    if let Some(e) = propagated_error(&errors) {
                        return CellValue::Error(e);
                    }
                }
                self.workbook.func_dir().evaluate(name, &values, self)
            }
        }
    }

    /// IF(cond, then, else?): only the selected branch is visited.
    fn eval_if(&self, args: &[Expression]) -> CellValue {
        if args.len() < 2 || args.len() > 3 {
            return CellValue::Error(CellError::new(
                CellErrorKind::TypeError,
                "IF: invalid number of arguments",
            ));
        }
        let condition = self.evaluate(&args[0]);
        match coerce_boolean(&condition) {
            Err(e) => CellValue::Error(e),
            Ok(true) => self.evaluate(&args[1]),
            Ok(false) => match args.get(2) {
                Some(alternative) => self.evaluate(alternative),
                None => CellValue::Boolean(false),
            },
        }
    }

    /// IFERROR(value, fallback?): consumes errors in its first argument.
    /// Up to three arguments are accepted; only the first two are ever
    /// visited.
    fn eval_iferror(&self, args: &[Expression]) -> CellValue {
        if args.is_empty() || args.len() > 3 {
            return CellValue::Error(CellError::new(
                CellErrorKind::TypeError,
                "IFERROR: invalid number of arguments",
            ));
        }
        let first = self.evaluate(&args[0]);
        if first.is_error() {
            match args.get(1) {
                Some(fallback) => self.evaluate(fallback),
                None => CellValue::Text(String::new()),
            }
        } else {
            first
        }
    }

    /// CHOOSE(index, v1, v2, ...): only the selected argument is visited.
    fn eval_choose(&self, args: &[Expression]) -> CellValue {
        if args.len() < 2 {
            return CellValue::Error(CellError::new(
                CellErrorKind::TypeError,
                "CHOOSE: invalid number of arguments",
            ));
        }
        let index_value = self.evaluate(&args[0]);
        let index = match coerce_number(&index_value) {
            Err(e) => return CellValue::Error(e),
            Ok(n) => n,
        };
        if index != index.trunc() {
            return CellValue::Error(CellError::new(
                CellErrorKind::TypeError,
                "CHOOSE: index is not an integer",
            ));
        }
        match index.to_usize() {
            Some(i) if i >= 1 && i < args.len() => self.evaluate(&args[i]),
            _ => CellValue::Error(CellError::new(
                CellErrorKind::TypeError,
                "CHOOSE: index out of range",
            )),
        }
    }
}

fn eval_literal(value: &Value) -> CellValue {
    match value {
        Value::Number(n) => CellValue::Number(canonicalize(*n)),
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Boolean(b) => CellValue::Boolean(*b),
        Value::Error(literal) => CellValue::Error(CellError::new(
            CellErrorKind::from(*literal),
            "Error from literal",
        )),
    }
}

fn apply_arithmetic(op: BinaryOperator, a: Decimal, b: Decimal) -> CellValue {
    let result = match op {
        BinaryOperator::Add => a.checked_add(b),
        BinaryOperator::Subtract => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Divide => {
            if b.is_zero() {
                return CellValue::Error(CellError::new(
                    CellErrorKind::DivideByZero,
                    "Divided by zero",
                ));
            }
            a.checked_div(b)
        }
        _ => None,
    };
    match result {
        Some(value) => CellValue::Number(canonicalize(value)),
        None => CellValue::Error(CellError::new(CellErrorKind::TypeError, "Numeric overflow")),
    }
}

/// The error an operation should yield for its (left-to-right) operand
/// errors: a circular reference anywhere wins, otherwise the first error.
fn propagated_error(errors: &[Option<&CellError>]) -> Option<CellError> {
    let mut first: Option<&CellError> = None;
    for error in errors.iter().flatten() {
        if error.kind == CellErrorKind::CircularReference {
            return Some((*error).clone());
        }
        if first.is_none() {
            first = Some(error);
        }
    }
    first.cloned()
}

fn propagate(left: Option<CellError>, right: Option<CellError>) -> CellValue {
    let picked = propagated_error(&[left.as_ref(), right.as_ref()]).unwrap_or_else(|| {
        CellError::new(CellErrorKind::TypeError, "Invalid operands")
    });
    CellValue::Error(picked)
}

pub(crate) fn value_error(value: &CellValue) -> Option<&CellError> {
    match value {
        CellValue::Error(e) => Some(e),
        _ => None,
    }
}

/// Coercion to Number: Empty -> 0, Boolean -> 1/0, Text parsed as decimal
/// (one leading apostrophe stripped). Errors pass through.
pub(crate) fn coerce_number(value: &CellValue) -> Result<Decimal, CellError> {
    match value {
        CellValue::Empty => Ok(Decimal::ZERO),
        CellValue::Number(n) => Ok(*n),
        CellValue::Boolean(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
        CellValue::Text(s) => {
            let unquoted = s.strip_prefix('\'').unwrap_or(s);
            parse_decimal_content(unquoted)
                .ok_or_else(|| CellError::new(CellErrorKind::TypeError, "Not numeric"))
        }
        CellValue::Error(e) => Err(e.clone()),
    }
}

/// Coercion to Text: Empty -> "", numbers in canonical decimal form,
/// booleans as TRUE/FALSE. Errors pass through.
pub(crate) fn coerce_text(value: &CellValue) -> Result<String, CellError> {
    match value {
        CellValue::Empty => Ok(String::new()),
        CellValue::Number(n) => Ok(canonicalize(*n).to_string()),
        CellValue::Text(s) => Ok(s.clone()),
        CellValue::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        CellValue::Error(e) => Err(e.clone()),
    }
}

/// Coercion to Boolean: Empty -> false, nonzero numbers true, TRUE/FALSE
/// text in any case. Errors pass through.
pub(crate) fn coerce_boolean(value: &CellValue) -> Result<bool, CellError> {
    match value {
        CellValue::Empty => Ok(false),
        CellValue::Boolean(b) => Ok(*b),
        CellValue::Number(n) => Ok(!n.is_zero()),
        CellValue::Text(s) => match s.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(CellError::new(CellErrorKind::TypeError, "Not boolean")),
        },
        CellValue::Error(e) => Err(e.clone()),
    }
}

/// When exactly one comparison operand is Empty it takes the type default
/// of the other; two Empties compare as numeric zeros.
fn fill_empty_defaults(left: CellValue, right: CellValue) -> (CellValue, CellValue) {
    match (&left, &right) {
        (CellValue::Empty, CellValue::Empty) => {
            (CellValue::Number(Decimal::ZERO), CellValue::Number(Decimal::ZERO))
        }
        (CellValue::Empty, _) => (type_default(&right), right),
        (_, CellValue::Empty) => {
            let default = type_default(&left);
            (left, default)
        }
        _ => (left, right),
    }
}

fn type_default(value: &CellValue) -> CellValue {
    match value {
        CellValue::Text(_) => CellValue::Text(String::new()),
        CellValue::Boolean(_) => CellValue::Boolean(false),
        _ => CellValue::Number(Decimal::ZERO),
    }
}

/// Comparison ordering: same-type values compare naturally (strings
/// case-insensitively, FALSE < TRUE); across types the rank decides,
/// with Number < Text < Boolean.
fn compare_values(left: &CellValue, right: &CellValue) -> Ordering {
    match (left, right) {
        (CellValue::Number(a), CellValue::Number(b)) => a.cmp(b),
        (CellValue::Text(a), CellValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (CellValue::Boolean(a), CellValue::Boolean(b)) => a.cmp(b),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn type_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Text(_) => 1,
        CellValue::Boolean(_) => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Workbook;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn eval(workbook: &Workbook, formula: &str) -> CellValue {
        let expr = parser::parse(formula).unwrap();
        Evaluator::new(workbook, "sheet1", None).evaluate(&expr)
    }

    fn empty_book() -> Workbook {
        let mut wb = Workbook::new();
        wb.new_sheet(Some("Sheet1")).unwrap();
        wb
    }

    #[test]
    fn evaluates_literals() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=5"), CellValue::Number(dec("5")));
        assert_eq!(eval(&wb, "=1.50"), CellValue::Number(dec("1.5")));
        assert_eq!(eval(&wb, "=\"hi\""), CellValue::Text("hi".to_string()));
        assert_eq!(eval(&wb, "=TRUE"), CellValue::Boolean(true));
        assert_eq!(
            eval(&wb, "=#REF!").error_kind(),
            Some(CellErrorKind::BadReference)
        );
    }

    #[test]
    fn arithmetic_and_canonicalization() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=1+2*3"), CellValue::Number(dec("7")));
        assert_eq!(eval(&wb, "=1.5+2.5"), CellValue::Number(dec("4")));
        assert_eq!(eval(&wb, "=10/4"), CellValue::Number(dec("2.5")));
        assert_eq!(eval(&wb, "=-(2+3)"), CellValue::Number(dec("-5")));
        assert_eq!(eval(&wb, "=+7"), CellValue::Number(dec("7")));
    }

    #[test]
    fn division_by_zero() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=1/0").error_kind(),
            Some(CellErrorKind::DivideByZero)
        );
        assert_eq!(
            eval(&wb, "=1/(2-2)").error_kind(),
            Some(CellErrorKind::DivideByZero)
        );
    }

    #[test]
    fn string_coercion_in_arithmetic() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=\"3\"+\"4\""), CellValue::Number(dec("7")));
        assert_eq!(eval(&wb, "=\"'5\"+1"), CellValue::Number(dec("6")));
        assert_eq!(
            eval(&wb, "=\"abc\"+1").error_kind(),
            Some(CellErrorKind::TypeError)
        );
    }

    #[test]
    fn boolean_coercion_in_arithmetic() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=TRUE+TRUE"), CellValue::Number(dec("2")));
        assert_eq!(eval(&wb, "=FALSE*10"), CellValue::Number(dec("0")));
    }

    #[test]
    fn concatenation() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=\"a\"&\"b\""),
            CellValue::Text("ab".to_string())
        );
        assert_eq!(
            eval(&wb, "=1.50&\" kg\""),
            CellValue::Text("1.5 kg".to_string())
        );
        assert_eq!(
            eval(&wb, "=TRUE&\"!\""),
            CellValue::Text("TRUE!".to_string())
        );
    }

    #[test]
    fn comparisons_same_type() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=1<2"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=2<=2"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=\"abc\"=\"ABC\""), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=\"a\"<\"B\""), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=FALSE<TRUE"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=1<>2"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=1==1"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=1!=1"), CellValue::Boolean(false));
    }

    #[test]
    fn comparisons_cross_type_rank() {
        let wb = empty_book();
        // Bool > String > Number regardless of the values involved
        assert_eq!(eval(&wb, "=\"a\">9999"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=FALSE>\"zzz\""), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=TRUE>123"), CellValue::Boolean(true));
    }

    #[test]
    fn comparisons_with_empty_defaults() {
        let mut wb = empty_book();
        wb.set_cell_contents("Sheet1", "B1", Some("0")).unwrap();
        // A1 is empty; it takes the type default of the other side
        assert_eq!(eval(&wb, "=A1=0"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=A1=\"\""), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=A1=FALSE"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=A1=A2"), CellValue::Boolean(true));
    }

    #[test]
    fn empty_reference_coerces_to_zero() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=A1+5"), CellValue::Number(dec("5")));
        assert_eq!(eval(&wb, "=A1&\"x\""), CellValue::Text("x".to_string()));
    }

    #[test]
    fn missing_sheet_is_bad_reference() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=Nope!A1").error_kind(),
            Some(CellErrorKind::BadReference)
        );
    }

    #[test]
    fn error_literals_propagate_through_operators() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=#REF!+1").error_kind(),
            Some(CellErrorKind::BadReference)
        );
        assert_eq!(
            eval(&wb, "=1+#NAME?").error_kind(),
            Some(CellErrorKind::BadName)
        );
        // First error in left-to-right order wins among equals
        assert_eq!(
            eval(&wb, "=#NAME?+#REF!").error_kind(),
            Some(CellErrorKind::BadName)
        );
        // ... but a circular reference dominates regardless of position
        assert_eq!(
            eval(&wb, "=#NAME?+#CIRCREF!").error_kind(),
            Some(CellErrorKind::CircularReference)
        );
    }

    #[test]
    fn if_evaluates_only_selected_branch() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=IF(TRUE, 1, #REF!)"), CellValue::Number(dec("1")));
        assert_eq!(eval(&wb, "=IF(FALSE, #REF!, 2)"), CellValue::Number(dec("2")));
        assert_eq!(eval(&wb, "=IF(FALSE, 1)"), CellValue::Boolean(false));
        assert_eq!(eval(&wb, "=IF(\"true\", 1, 2)"), CellValue::Number(dec("1")));
        assert_eq!(
            eval(&wb, "=IF(\"notabool\", 1, 2)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
        assert_eq!(
            eval(&wb, "=IF(#DIV/0!, 1, 2)").error_kind(),
            Some(CellErrorKind::DivideByZero)
        );
    }

    #[test]
    fn iferror_consumes_errors() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=IFERROR(#REF!, 5)"), CellValue::Number(dec("5")));
        assert_eq!(eval(&wb, "=IFERROR(3, 5)"), CellValue::Number(dec("3")));
        assert_eq!(
            eval(&wb, "=IFERROR(#REF!)"),
            CellValue::Text(String::new())
        );
        // A third argument is tolerated and never visited
        assert_eq!(
            eval(&wb, "=IFERROR(1/0, 5, 99)"),
            CellValue::Number(dec("5"))
        );
        assert_eq!(
            eval(&wb, "=IFERROR(1/0, 5, 99, 100)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
    }

    #[test]
    fn choose_visits_only_selected_argument() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=CHOOSE(1, 7, #DIV/0!)"), CellValue::Number(dec("7")));
        assert_eq!(eval(&wb, "=CHOOSE(2, 7, 9)"), CellValue::Number(dec("9")));
        assert_eq!(
            eval(&wb, "=CHOOSE(0, 7, 9)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
        assert_eq!(
            eval(&wb, "=CHOOSE(3, 7, 9)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
        assert_eq!(
            eval(&wb, "=CHOOSE(1.5, 7, 9)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
    }

    #[test]
    fn eager_function_dispatch() {
        let wb = empty_book();
        assert_eq!(eval(&wb, "=AND(TRUE, 1, \"true\")"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=AND(TRUE, 0)"), CellValue::Boolean(false));
        assert_eq!(eval(&wb, "=OR(FALSE, 1)"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=XOR(TRUE, TRUE, TRUE)"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=NOT(FALSE)"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=EXACT(\"a\", \"A\")"), CellValue::Boolean(false));
        assert_eq!(eval(&wb, "=EXACT(\"a\", \"a\")"), CellValue::Boolean(true));
    }

    #[test]
    fn function_argument_contract_violations() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=NOT(TRUE, TRUE)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
        assert_eq!(
            eval(&wb, "=AND(\"pickle\")").error_kind(),
            Some(CellErrorKind::TypeError)
        );
        assert_eq!(
            eval(&wb, "=VERSION(1)").error_kind(),
            Some(CellErrorKind::TypeError)
        );
    }

    #[test]
    fn unknown_function_is_bad_name() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=NOSUCHFUNC(1)").error_kind(),
            Some(CellErrorKind::BadName)
        );
        // ... unless an argument carries an error, which propagates first
        assert_eq!(
            eval(&wb, "=NOSUCHFUNC(#REF!)").error_kind(),
            Some(CellErrorKind::BadReference)
        );
    }

    #[test]
    fn isblank_and_iserror() {
        let mut wb = empty_book();
        wb.set_cell_contents("Sheet1", "B1", Some("")).unwrap();
        assert_eq!(eval(&wb, "=ISBLANK(A1)"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=ISBLANK(\"\")"), CellValue::Boolean(false));
        assert_eq!(eval(&wb, "=ISERROR(#REF!)"), CellValue::Boolean(true));
        assert_eq!(eval(&wb, "=ISERROR(1)"), CellValue::Boolean(false));
        assert_eq!(eval(&wb, "=ISERROR(1/0)"), CellValue::Boolean(true));
    }

    #[test]
    fn version_returns_crate_version() {
        let wb = empty_book();
        assert_eq!(
            eval(&wb, "=VERSION()"),
            CellValue::Text(crate::VERSION.to_string())
        );
    }

    #[test]
    fn indirect_textual_resolution() {
        let mut wb = empty_book();
        wb.set_cell_contents("Sheet1", "Z1", Some("99")).unwrap();
        assert_eq!(eval(&wb, "=INDIRECT(\"Z1\")"), CellValue::Number(dec("99")));
        assert_eq!(
            eval(&wb, "=INDIRECT(\"Sheet1!Z1\")"),
            CellValue::Number(dec("99"))
        );
        assert_eq!(
            eval(&wb, "=INDIRECT(\"not a ref\")").error_kind(),
            Some(CellErrorKind::BadReference)
        );
        assert_eq!(
            eval(&wb, "=INDIRECT(\"Missing!A1\")").error_kind(),
            Some(CellErrorKind::BadReference)
        );
        // An error value flows straight through
        assert_eq!(
            eval(&wb, "=INDIRECT(1/0)").error_kind(),
            Some(CellErrorKind::DivideByZero)
        );
    }

    #[test]
    fn reference_discovery_under_lazy_functions() {
        let mut wb = empty_book();
        wb.set_cell_contents("Sheet1", "B1", Some("42")).unwrap();
        let expr = parser::parse("=IF(TRUE, B1, C1)").unwrap();
        let from = ("sheet1".to_string(), "A1".to_string());
        let evaluator = Evaluator::new(&wb, "sheet1", Some(from));
        assert_eq!(evaluator.evaluate(&expr), CellValue::Number(dec("42")));
        let discovered = evaluator.into_discovered();
        // Only the visited branch (and the condition-free reference B1)
        // is discovered; C1 was never resolved.
        assert_eq!(
            discovered,
            vec![("sheet1".to_string(), "B1".to_string())]
        );
    }
}
