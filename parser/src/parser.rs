//! FILENAME: parser/src/parser.rs
//! PURPOSE: Recursive descent parser that converts a stream of Tokens into an AST.
//! CONTEXT: This is the second stage of the parsing pipeline. It takes tokens
//! from the Lexer and builds an Expression tree that can be evaluated.
//!
//! GRAMMAR (binary operators left-associative):
//!   formula        --> "="? expression EOF
//!   expression     --> comparison
//!   comparison     --> concatenation ( ("=" | "<>" | "<" | ">" | "<=" | ">=") concatenation )*
//!   concatenation  --> additive ( "&" additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> unary ( ("*" | "/") unary )*
//!   unary          --> ("+" | "-") unary | primary
//!   primary        --> NUMBER | STRING | BOOLEAN | ERROR | reference
//!                    | function_call | "(" expression ")"
//!   reference      --> [sheet_prefix] cell_ref
//!   sheet_prefix   --> (IDENTIFIER | QUOTED_IDENTIFIER) "!"
//!   cell_ref       --> "$"? COLUMN "$"? ROW
//!   function_call  --> IDENTIFIER "(" arguments? ")"
//!   arguments      --> expression ("," expression)* ","?
//!
//! Cell references are bounds-checked here: 1-4 column letters, row 1-9999
//! with no leading zero. Anything outside that is a parse error, matching
//! the reference grammar used by the rest of the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::ast::{BinaryOperator, Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::token::Token;

/// Parser errors with descriptive messages.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// The Parser struct holds the lexer and current token state.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser from an input string.
    /// Automatically advances to the first token.
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();
        Parser {
            lexer,
            current_token,
        }
    }

    /// Parses the entire input and returns the AST.
    /// Handles the optional leading '=' that indicates a formula.
    pub fn parse(&mut self) -> ParseResult<Expression> {
        // Skip the leading '=' if present (formula indicator)
        if self.current_token == Token::Equals {
            self.advance();
        }

        if self.current_token == Token::EOF {
            return Err(ParseError::new("Empty expression"));
        }

        let expr = self.parse_expression()?;

        // Ensure we consumed all tokens
        if self.current_token != Token::EOF {
            return Err(ParseError::new(format!(
                "Unexpected token after expression: {:?}",
                self.current_token
            )));
        }

        Ok(expr)
    }

    /// Advances to the next token.
    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    /// Checks if the current token matches the expected token.
    /// If it matches, advances and returns Ok. Otherwise returns an error.
    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            )))
        }
    }

    /// Entry point for expression parsing.
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_comparison()
    }

    /// Parses comparison expressions (=, <>, <, >, <=, >=).
    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match &self.current_token {
                Token::Equals => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.advance();
            let right = self.parse_concatenation()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses concatenation expressions (&).
    fn parse_concatenation(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;

        while self.current_token == Token::Ampersand {
            self.advance();
            let right = self.parse_additive()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Concat,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses additive expressions (+ and -).
    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.advance();
            let right = self.parse_multiplicative()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses multiplicative expressions (* and /).
    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match &self.current_token {
                Token::Asterisk => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.advance();
            let right = self.parse_unary()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses unary sign expressions.
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let op = match self.current_token {
            Token::Minus => Some(UnaryOperator::Negate),
            Token::Plus => Some(UnaryOperator::Plus),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expression::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }

        self.parse_primary()
    }

    /// Parses primary expressions (literals, cell refs, function calls, parentheses).
    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match self.current_token.clone() {
            // Dollar sign - start of an absolute reference like $A1 or $A$1
            Token::Dollar => {
                self.advance();
                self.parse_cell_reference(None, true)
            }

            // Number literal
            Token::Number(n) => {
                self.advance();
                Ok(Expression::Literal(Value::Number(n)))
            }

            // String literal
            Token::String(s) => {
                self.advance();
                Ok(Expression::Literal(Value::String(s)))
            }

            // Boolean literal
            Token::Boolean(b) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(b)))
            }

            // Error literal
            Token::Error(e) => {
                self.advance();
                Ok(Expression::Literal(Value::Error(e)))
            }

            // Quoted identifier - must be a sheet reference
            Token::QuotedIdentifier(sheet_name) => {
                self.advance();
                self.expect(Token::Exclamation)?;
                self.parse_sheet_reference(sheet_name)
            }

            // Identifier: could be a cell reference, a function call, or a
            // sheet reference prefix
            Token::Identifier(name) => {
                self.advance();

                // Sheet reference (followed by '!')
                if self.current_token == Token::Exclamation {
                    self.advance();
                    return self.parse_sheet_reference(name);
                }

                // Function call (followed by '(')
                if self.current_token == Token::LParen {
                    return self.parse_function_call(name);
                }

                self.finish_cell_reference(None, name, false)
            }

            // Parenthesized expression
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }

            // Error cases
            Token::EOF => Err(ParseError::new("Unexpected end of expression")),

            Token::Illegal(ch) => Err(ParseError::new(format!("Illegal character: {}", ch))),

            token => Err(ParseError::new(format!("Unexpected token: {:?}", token))),
        }
    }

    /// Parses a reference after a sheet prefix (SheetName! or 'Sheet Name'!).
    fn parse_sheet_reference(&mut self, sheet_name: String) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Dollar => {
                self.advance();
                self.parse_cell_reference(Some(sheet_name), true)
            }
            Token::Identifier(_) => self.parse_cell_reference(Some(sheet_name), false),
            _ => Err(ParseError::new(format!(
                "Expected cell reference after '!', found {:?}",
                self.current_token
            ))),
        }
    }

    /// Parses a cell reference whose identifier is the current token.
    /// `col_absolute` reflects whether a leading $ was already consumed.
    fn parse_cell_reference(
        &mut self,
        sheet: Option<String>,
        col_absolute: bool,
    ) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Identifier(name) => {
                self.advance();
                self.finish_cell_reference(sheet, name, col_absolute)
            }
            _ => Err(ParseError::new(format!(
                "Expected cell reference, found {:?}",
                self.current_token
            ))),
        }
    }

    /// Completes a cell reference from a consumed identifier. The identifier
    /// is either a full location ("A1") or a bare column ("A") followed by an
    /// absolute row marker ($1) -- the lexer splits "A$1" at the dollar sign.
    fn finish_cell_reference(
        &mut self,
        sheet: Option<String>,
        identifier: String,
        col_absolute: bool,
    ) -> ParseResult<Expression> {
        let is_col_only = identifier.chars().all(|c| c.is_ascii_alphabetic());

        if is_col_only {
            if self.current_token != Token::Dollar {
                return Err(ParseError::new(format!(
                    "Cell reference missing row: {}",
                    identifier
                )));
            }
            self.advance(); // consume $

            let row = match self.current_token.clone() {
                Token::Number(n) => {
                    self.advance();
                    decimal_to_row(n)?
                }
                token => {
                    return Err(ParseError::new(format!(
                        "Expected row number after $, found {:?}",
                        token
                    )));
                }
            };

            let col = identifier.to_ascii_uppercase();
            check_column(&col)?;
            return Ok(Expression::CellRef {
                sheet,
                col,
                row,
                col_absolute,
                row_absolute: true,
            });
        }

        let (col, row) = split_cell_reference(&identifier)?;
        Ok(Expression::CellRef {
            sheet,
            col,
            row,
            col_absolute,
            row_absolute: false,
        })
    }

    /// Parses a function call like IF(A1, 2, 3) after the name was consumed.
    /// One trailing empty argument (a comma directly before the closing
    /// parenthesis) is tolerated and dropped.
    fn parse_function_call(&mut self, name: String) -> ParseResult<Expression> {
        let name = name.to_ascii_uppercase();

        // Consume the '('
        self.advance();

        let mut args = Vec::new();

        // Handle empty argument list
        if self.current_token == Token::RParen {
            self.advance();
            return Ok(Expression::FunctionCall { name, args });
        }

        // Parse first argument
        args.push(self.parse_expression()?);

        // Parse remaining arguments separated by commas
        while self.current_token == Token::Comma {
            self.advance();
            if self.current_token == Token::RParen {
                break;
            }
            args.push(self.parse_expression()?);
        }

        // Expect closing ')'
        self.expect(Token::RParen)?;

        Ok(Expression::FunctionCall { name, args })
    }
}

/// Splits a cell reference string like "A1" or "AA100" into column and row
/// parts, enforcing the location bounds.
fn split_cell_reference(identifier: &str) -> ParseResult<(String, u32)> {
    let mut col = String::new();
    let mut row_str = String::new();

    for ch in identifier.chars() {
        if ch.is_ascii_alphabetic() {
            if !row_str.is_empty() {
                return Err(ParseError::new(format!(
                    "Invalid cell reference: {}",
                    identifier
                )));
            }
            col.push(ch.to_ascii_uppercase());
        } else if ch.is_ascii_digit() {
            row_str.push(ch);
        } else {
            return Err(ParseError::new(format!(
                "Invalid character in cell reference: {}",
                ch
            )));
        }
    }

    if col.is_empty() {
        return Err(ParseError::new(format!(
            "Cell reference missing column: {}",
            identifier
        )));
    }
    check_column(&col)?;

    if row_str.is_empty() {
        return Err(ParseError::new(format!(
            "Cell reference missing row: {}",
            identifier
        )));
    }
    if row_str.starts_with('0') {
        return Err(ParseError::new(format!(
            "Row number cannot have a leading zero: {}",
            identifier
        )));
    }

    let row: u32 = row_str
        .parse()
        .map_err(|_| ParseError::new(format!("Invalid row number: {}", identifier)))?;
    check_row(row)?;

    Ok((col, row))
}

fn check_column(col: &str) -> ParseResult<()> {
    if col.len() > 4 {
        return Err(ParseError::new(format!("Column out of range: {}", col)));
    }
    Ok(())
}

fn check_row(row: u32) -> ParseResult<()> {
    if !(1..=9999).contains(&row) {
        return Err(ParseError::new(format!("Row out of range: {}", row)));
    }
    Ok(())
}

/// Converts a row number token to a validated row index.
fn decimal_to_row(n: Decimal) -> ParseResult<u32> {
    if n != n.trunc() {
        return Err(ParseError::new(format!("Invalid row number: {}", n)));
    }
    let row = n
        .to_u32()
        .ok_or_else(|| ParseError::new(format!("Invalid row number: {}", n)))?;
    check_row(row)?;
    Ok(row)
}

/// Convenience function to parse a formula string directly.
pub fn parse(input: &str) -> ParseResult<Expression> {
    let mut parser = Parser::new(input);
    parser.parse()
}

/// Process-wide parse memo, keyed by the exact formula string.
///
/// Formulas repeat heavily across a workbook (filled columns, copied
/// blocks), and the engine re-parses a cell's text on every re-evaluation,
/// so the cache is unbounded by design.
static PARSE_CACHE: Lazy<Mutex<HashMap<String, Arc<ParseResult<Expression>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Parses a formula string through the process-wide memo.
pub fn parse_cached(input: &str) -> Arc<ParseResult<Expression>> {
    let mut cache = PARSE_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(hit) = cache.get(input) {
        return Arc::clone(hit);
    }
    let parsed = Arc::new(parse(input));
    cache.insert(input.to_string(), Arc::clone(&parsed));
    parsed
}
