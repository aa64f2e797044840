//! FILENAME: engine/src/functions.rs
//! PURPOSE: The per-workbook directory of built-in formula functions.
//! CONTEXT: Every function available in formulas is described here by a
//! FuncInfo: its arity bounds, required argument types, repeating-argument
//! type, and implementation. Eager functions receive their arguments
//! already evaluated and coerced; the lazy ones (IF, IFERROR, CHOOSE) are
//! driven directly by the evaluator over unevaluated subtrees and are
//! registered here for their contracts; INDIRECT is contextual because it
//! resolves references and records evaluation-time dependencies.

use std::collections::HashMap;

use crate::cell::{CellError, CellErrorKind, CellValue};
use crate::evaluator::{coerce_boolean, coerce_number, coerce_text, Evaluator};
use crate::references;

/// Argument types a function contract can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Number,
    Text,
    Boolean,
}

type EagerFn = fn(&[CellValue]) -> CellValue;
type ContextualFn = fn(&Evaluator, &[CellValue]) -> CellValue;

enum FuncImpl {
    /// Arguments are evaluated and coerced before the call.
    Eager(EagerFn),
    /// Receives the evaluator along with raw (uncoerced) argument values.
    Contextual(ContextualFn),
    /// Evaluated by the evaluator itself over unevaluated subtrees.
    Lazy,
}

/// The registered properties and implementation of one function.
pub struct FuncInfo {
    /// Maximum argument count, or None for variadic.
    pub arg_limit: Option<usize>,
    pub min_args: usize,
    /// Positional type requirements.
    pub required: &'static [(usize, ArgType)],
    /// Type applied to every position not covered by `required`.
    pub repeat: Option<ArgType>,
    imp: FuncImpl,
}

impl FuncInfo {
    pub fn arity_ok(&self, count: usize) -> bool {
        count >= self.min_args && self.arg_limit.is_none_or(|limit| count <= limit)
    }

    /// Coerces arguments per the contract. None means a coercion failed and
    /// the call must yield #VALUE!.
    fn coerce_args(&self, args: &[CellValue]) -> Option<Vec<CellValue>> {
        let mut converted = args.to_vec();
        for (position, arg_type) in self.required {
            if let Some(slot) = converted.get_mut(*position) {
                *slot = coerce_to(*arg_type, slot)?;
            }
        }
        if let Some(arg_type) = self.repeat {
            for (index, slot) in converted.iter_mut().enumerate() {
                if self.required.iter().any(|(position, _)| *position == index) {
                    continue;
                }
                *slot = coerce_to(arg_type, slot)?;
            }
        }
        Some(converted)
    }
}

fn coerce_to(arg_type: ArgType, value: &CellValue) -> Option<CellValue> {
    match arg_type {
        ArgType::Number => coerce_number(value).ok().map(CellValue::Number),
        ArgType::Text => coerce_text(value).ok().map(CellValue::Text),
        ArgType::Boolean => coerce_boolean(value).ok().map(CellValue::Boolean),
    }
}

/// A directory mapping function names to their properties, requirements,
/// and implementations. One per workbook.
pub struct FuncDir {
    funcs: HashMap<String, FuncInfo>,
}

impl Default for FuncDir {
    fn default() -> Self {
        Self::new()
    }
}

impl FuncDir {
    pub fn new() -> Self {
        let mut funcs = HashMap::new();

        // Boolean functions
        funcs.insert(
            "AND".to_string(),
            FuncInfo {
                arg_limit: None,
                min_args: 1,
                required: &[],
                repeat: Some(ArgType::Boolean),
                imp: FuncImpl::Eager(fn_and),
            },
        );
        funcs.insert(
            "OR".to_string(),
            FuncInfo {
                arg_limit: None,
                min_args: 1,
                required: &[],
                repeat: Some(ArgType::Boolean),
                imp: FuncImpl::Eager(fn_or),
            },
        );
        funcs.insert(
            "XOR".to_string(),
            FuncInfo {
                arg_limit: None,
                min_args: 1,
                required: &[],
                repeat: Some(ArgType::Boolean),
                imp: FuncImpl::Eager(fn_xor),
            },
        );
        funcs.insert(
            "NOT".to_string(),
            FuncInfo {
                arg_limit: Some(1),
                min_args: 1,
                required: &[(0, ArgType::Boolean)],
                repeat: None,
                imp: FuncImpl::Eager(fn_not),
            },
        );

        // String matching
        funcs.insert(
            "EXACT".to_string(),
            FuncInfo {
                arg_limit: Some(2),
                min_args: 2,
                required: &[(0, ArgType::Text), (1, ArgType::Text)],
                repeat: None,
                imp: FuncImpl::Eager(fn_exact),
            },
        );

        // Conditional functions: lazy, driven by the evaluator
        funcs.insert(
            "IF".to_string(),
            FuncInfo {
                arg_limit: Some(3),
                min_args: 2,
                required: &[(0, ArgType::Boolean)],
                repeat: None,
                imp: FuncImpl::Lazy,
            },
        );
        funcs.insert(
            "IFERROR".to_string(),
            FuncInfo {
                arg_limit: Some(3),
                min_args: 1,
                required: &[],
                repeat: None,
                imp: FuncImpl::Lazy,
            },
        );
        funcs.insert(
            "CHOOSE".to_string(),
            FuncInfo {
                arg_limit: None,
                min_args: 2,
                required: &[(0, ArgType::Number)],
                repeat: None,
                imp: FuncImpl::Lazy,
            },
        );

        // Info functions
        funcs.insert(
            "ISBLANK".to_string(),
            FuncInfo {
                arg_limit: Some(1),
                min_args: 1,
                required: &[],
                repeat: None,
                imp: FuncImpl::Eager(fn_isblank),
            },
        );
        funcs.insert(
            "ISERROR".to_string(),
            FuncInfo {
                arg_limit: Some(1),
                min_args: 1,
                required: &[],
                repeat: None,
                imp: FuncImpl::Eager(fn_iserror),
            },
        );
        funcs.insert(
            "VERSION".to_string(),
            FuncInfo {
                arg_limit: Some(0),
                min_args: 0,
                required: &[],
                repeat: None,
                imp: FuncImpl::Eager(fn_version),
            },
        );

        // Indirection
        funcs.insert(
            "INDIRECT".to_string(),
            FuncInfo {
                arg_limit: Some(1),
                min_args: 1,
                required: &[(0, ArgType::Text)],
                repeat: None,
                imp: FuncImpl::Contextual(fn_indirect),
            },
        );

        FuncDir { funcs }
    }

    /// The names of all registered functions, sorted.
    pub fn list_functions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&FuncInfo> {
        self.funcs.get(name)
    }

    /// True for the functions the evaluator must drive over unevaluated
    /// argument subtrees.
    pub fn is_lazy(&self, name: &str) -> bool {
        matches!(
            self.funcs.get(name),
            Some(FuncInfo {
                imp: FuncImpl::Lazy,
                ..
            })
        )
    }

    /// Dispatches a function call with evaluated arguments. Wrong argument
    /// counts and failed coercions yield #VALUE!; unknown names #NAME?.
    pub fn evaluate(&self, name: &str, args: &[CellValue], evaluator: &Evaluator) -> CellValue {
        let Some(info) = self.funcs.get(name) else {
            return CellValue::Error(CellError::new(
                CellErrorKind::BadName,
                format!("Function {name} does not exist"),
            ));
        };

        if !info.arity_ok(args.len()) {
            return invalid_arguments(name);
        }

        match &info.imp {
            FuncImpl::Eager(call) => match info.coerce_args(args) {
                Some(converted) => call(&converted),
                None => invalid_arguments(name),
            },
            FuncImpl::Contextual(call) => call(evaluator, args),
            // Lazy functions are dispatched by the evaluator before this
            // point is reachable.
            FuncImpl::Lazy => invalid_arguments(name),
        }
    }
}

fn invalid_arguments(name: &str) -> CellValue {
    CellValue::Error(CellError::new(
        CellErrorKind::TypeError,
        format!("Invalid arguments for function {name}"),
    ))
}

fn truthy(value: &CellValue) -> bool {
    matches!(value, CellValue::Boolean(true))
}

fn fn_and(args: &[CellValue]) -> CellValue {
    CellValue::Boolean(args.iter().all(truthy))
}

fn fn_or(args: &[CellValue]) -> CellValue {
    CellValue::Boolean(args.iter().any(truthy))
}

fn fn_xor(args: &[CellValue]) -> CellValue {
    CellValue::Boolean(args.iter().filter(|v| truthy(v)).count() % 2 == 1)
}

fn fn_not(args: &[CellValue]) -> CellValue {
    match &args[0] {
        CellValue::Boolean(b) => CellValue::Boolean(!b),
        _ => invalid_arguments("NOT"),
    }
}

fn fn_exact(args: &[CellValue]) -> CellValue {
    match (&args[0], &args[1]) {
        (CellValue::Text(a), CellValue::Text(b)) => CellValue::Boolean(a == b),
        _ => invalid_arguments("EXACT"),
    }
}

fn fn_isblank(args: &[CellValue]) -> CellValue {
    CellValue::Boolean(matches!(args[0], CellValue::Empty))
}

fn fn_iserror(args: &[CellValue]) -> CellValue {
    CellValue::Boolean(args[0].is_error())
}

fn fn_version(_args: &[CellValue]) -> CellValue {
    CellValue::Text(crate::VERSION.to_string())
}

/// INDIRECT(s): parse the string as a reference and evaluate it. An error
/// argument is returned as-is rather than being pattern-matched through its
/// text form; the resolved reference is recorded as an evaluation-time
/// dependency.
fn fn_indirect(evaluator: &Evaluator, args: &[CellValue]) -> CellValue {
    let target = &args[0];
    if let CellValue::Error(e) = target {
        return CellValue::Error(e.clone());
    }

    let text = match coerce_text(target) {
        Ok(text) => text,
        Err(e) => return CellValue::Error(e),
    };
    if !references::is_ref(&text) {
        return CellValue::Error(CellError::new(
            CellErrorKind::BadReference,
            "INDIRECT: invalid reference",
        ));
    }

    let (locals, sheet_refs) = references::find_refs(&text);
    let (sheet_lower, location) = if let Some((sheet, location)) = sheet_refs.first() {
        (sheet.to_lowercase(), location.to_uppercase())
    } else if let Some(location) = locals.first() {
        (
            evaluator.current_sheet().to_string(),
            location.to_uppercase(),
        )
    } else {
        return CellValue::Error(CellError::new(
            CellErrorKind::BadReference,
            "INDIRECT: invalid reference",
        ));
    };

    if evaluator.workbook().sheet_by_lower(&sheet_lower).is_none() {
        return CellValue::Error(CellError::new(
            CellErrorKind::BadReference,
            "INDIRECT: sheet does not exist",
        ));
    }

    evaluator.resolve_reference(&sheet_lower, &location)
}
