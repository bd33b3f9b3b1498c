//! Recursive-descent parser for textual type names.
//!
//! Grammar (keywords case-insensitive, whitespace free-form):
//!
//! ```text
//! type   := base ('[' ']')*
//! base   := ARRAY '<' type '>'
//!         | STRUCT '<' field (',' field)* '>'
//!         | DOUBLE PRECISION
//!         | word
//! field  := type | name type
//! name   := word | '"' chars '"'
//! ```
//!
//! Unnamed struct fields are named `f1`, `f2`, ... by position.

use fus_common::{FusError, Result};

use crate::descriptor::{StructField, TypeDescriptor};

pub(crate) fn parse_type(text: &str) -> Result<TypeDescriptor> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    if parser.at_end() {
        return Err(syntax(text, "empty type name"));
    }
    let ty = parser.parse_type()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(syntax(parser.rest(), "unexpected trailing input"));
    }
    Ok(ty)
}

fn syntax(fragment: &str, message: &str) -> FusError {
    FusError::TypeSyntax {
        fragment: fragment.to_string(),
        message: message.to_string(),
    }
}

fn scalar_by_name(upper: &str) -> Option<TypeDescriptor> {
    let ty = match upper {
        "BOOLEAN" | "BOOL" => TypeDescriptor::Boolean,
        "SMALLINT" | "INT2" => TypeDescriptor::Int16,
        "INT" | "INTEGER" | "INT4" => TypeDescriptor::Int32,
        "BIGINT" | "INT8" => TypeDescriptor::Int64,
        "REAL" | "FLOAT4" => TypeDescriptor::Float32,
        "DOUBLE" | "FLOAT8" => TypeDescriptor::Float64,
        "DECIMAL" | "NUMERIC" => TypeDescriptor::Decimal,
        "VARCHAR" | "STRING" | "TEXT" => TypeDescriptor::VarChar,
        "BYTEA" | "BYTES" => TypeDescriptor::Bytes,
        _ => return None,
    };
    Some(ty)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let end = chars
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    /// Look at the next word without consuming it.
    fn peek_word(&mut self) -> Option<&'a str> {
        let saved = self.pos;
        let word = self.word();
        self.pos = saved;
        word
    }

    fn parse_type(&mut self) -> Result<TypeDescriptor> {
        self.skip_ws();
        let start = self.pos;
        let Some(word) = self.word() else {
            return Err(syntax(self.rest(), "expected a type name"));
        };
        let upper = word.to_ascii_uppercase();
        let mut ty = match upper.as_str() {
            "ARRAY" if self.eat('<') => {
                let element = self.parse_type()?;
                if !self.eat('>') {
                    return Err(syntax(&self.input[start..], "expected '>' to close ARRAY<"));
                }
                TypeDescriptor::array(element)
            }
            "STRUCT" if self.eat('<') => self.parse_struct_fields(start)?,
            "ARRAY" | "STRUCT" => {
                return Err(syntax(&self.input[start..], "expected '<' after ARRAY or STRUCT"));
            }
            "DOUBLE" => {
                if self
                    .peek_word()
                    .is_some_and(|w| w.eq_ignore_ascii_case("PRECISION"))
                {
                    self.word();
                }
                TypeDescriptor::Float64
            }
            _ => scalar_by_name(&upper).ok_or_else(|| FusError::UnknownType(word.to_string()))?,
        };

        loop {
            self.skip_ws();
            let suffix_start = self.pos;
            if !self.eat('[') {
                break;
            }
            if !self.eat(']') {
                return Err(syntax(&self.input[suffix_start..], "expected ']' after '['"));
            }
            ty = TypeDescriptor::array(ty);
        }
        Ok(ty)
    }

    fn parse_struct_fields(&mut self, start: usize) -> Result<TypeDescriptor> {
        if self.eat('>') {
            return Err(syntax(&self.input[start..self.pos], "struct needs at least one field"));
        }
        let mut fields = Vec::new();
        loop {
            let position = fields.len() + 1;
            fields.push(self.parse_field(position)?);
            if self.eat(',') {
                continue;
            }
            if self.eat('>') {
                break;
            }
            return Err(syntax(
                &self.input[start..],
                "expected ',' or '>' in STRUCT field list",
            ));
        }
        TypeDescriptor::structure(fields).map_err(|_| {
            syntax(
                &self.input[start..self.pos],
                "duplicate struct field name",
            )
        })
    }

    fn parse_field(&mut self, position: usize) -> Result<StructField> {
        self.skip_ws();
        if self.peek() == Some('"') {
            let name = self.quoted_name()?;
            let ty = self.parse_type()?;
            return Ok(StructField::new(name, ty));
        }

        let saved = self.pos;
        let first = self.word();
        let second = self.peek_word();
        let named = match (first, second) {
            (Some(first), Some(second)) => {
                !(first.eq_ignore_ascii_case("DOUBLE") && second.eq_ignore_ascii_case("PRECISION"))
            }
            _ => false,
        };
        if named {
            let name = first.unwrap_or_default().to_string();
            let ty = self.parse_type()?;
            return Ok(StructField::new(name, ty));
        }

        self.pos = saved;
        let ty = self.parse_type()?;
        Ok(StructField::new(format!("f{position}"), ty))
    }

    fn quoted_name(&mut self) -> Result<String> {
        let start = self.pos;
        // opening quote
        self.pos += 1;
        match self.rest().find('"') {
            Some(end) => {
                let name = self.rest()[..end].to_string();
                self.pos += end + 1;
                if name.is_empty() {
                    return Err(syntax(&self.input[start..self.pos], "empty field name"));
                }
                Ok(name)
            }
            None => Err(syntax(&self.input[start..], "unterminated quoted field name")),
        }
    }
}
