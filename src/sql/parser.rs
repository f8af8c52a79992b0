//! Recursive-descent parser over the token stream.
//!
//! Grammar (one statement per input, nothing may trail it):
//!
//! ```text
//! begin [isolation level (read committed | repeatable read)]
//! commit | abort | show
//! create table <name> (<field> <type>,)+ ( index <field>* )
//! drop table <name>
//! select (* | <field>,+) from <name> [where]
//! insert into <name> values <literal>+
//! update <name> set <field> = <literal> [where]
//! delete from <name> where
//! where  = where <cond> [(and|or) <cond>]
//! cond   = <field> (< | = | >) <literal>
//! type   = int32 | int64 | string
//! ```

use eyre::{Result, WrapErr};

use crate::error::EngineError;

use super::statement::*;
use super::tokenizer::tokenize;

pub fn parse(input: &str) -> Result<Statement> {
    let tokens = tokenize(input)?;
    let mut p = Parser { tokens, pos: 0 };

    let stmt = match p.pop()?.as_str() {
        "begin" => p.parse_begin(),
        "commit" => p.parse_bare(Statement::Commit),
        "abort" => p.parse_bare(Statement::Abort),
        "show" => p.parse_bare(Statement::Show),
        "create" => p.parse_create(),
        "drop" => p.parse_drop(),
        "select" => p.parse_select(),
        "insert" => p.parse_insert(),
        "update" => p.parse_update(),
        "delete" => p.parse_delete(),
        other => Err(EngineError::InvalidCommand)
            .wrap_err_with(|| format!("unknown statement {other:?}")),
    }?;

    if !p.at_end() {
        return Err(EngineError::InvalidCommand)
            .wrap_err_with(|| format!("trailing tokens after statement: {:?}", p.rest()));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn rest(&self) -> &[String] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn pop(&mut self) -> Result<String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(EngineError::InvalidCommand)
            .wrap_err("statement ended unexpectedly")?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: &str) -> Result<()> {
        let got = self.pop()?;
        if got != want {
            return Err(EngineError::InvalidCommand)
                .wrap_err_with(|| format!("expected {want:?}, found {got:?}"));
        }
        Ok(())
    }

    fn pop_name(&mut self) -> Result<String> {
        let token = self.pop()?;
        if !is_name(&token) {
            return Err(EngineError::InvalidCommand)
                .wrap_err_with(|| format!("expected a name, found {token:?}"));
        }
        Ok(token)
    }

    fn parse_bare(&mut self, stmt: Statement) -> Result<Statement> {
        Ok(stmt)
    }

    fn parse_begin(&mut self) -> Result<Statement> {
        if self.at_end() {
            return Ok(Statement::Begin(Begin::default()));
        }
        self.expect("isolation")?;
        self.expect("level")?;
        match self.pop()?.as_str() {
            "read" => {
                self.expect("committed")?;
                Ok(Statement::Begin(Begin {
                    repeatable_read: false,
                }))
            }
            "repeatable" => {
                self.expect("read")?;
                Ok(Statement::Begin(Begin {
                    repeatable_read: true,
                }))
            }
            other => Err(EngineError::InvalidCommand)
                .wrap_err_with(|| format!("unknown isolation level {other:?}")),
        }
    }

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect("table")?;
        let table = self.pop_name()?;

        let mut fields = Vec::new();
        loop {
            if self.peek() == Some("(") {
                break;
            }
            let name = self.pop_name()?;
            let type_name = self.pop()?;
            if !is_type(&type_name) {
                return Err(EngineError::InvalidCommand)
                    .wrap_err_with(|| format!("unknown field type {type_name:?}"));
            }
            fields.push(FieldDef { name, type_name });

            match self.peek() {
                Some(",") => {
                    self.pop()?;
                }
                Some("(") => break,
                None => return Err(EngineError::TableNoIndex.into()),
                Some(other) => {
                    return Err(EngineError::InvalidCommand)
                        .wrap_err_with(|| format!("unexpected token {other:?} in field list"))
                }
            }
        }

        self.expect("(")?;
        self.expect("index")?;
        let mut indexed = Vec::new();
        loop {
            let token = self.pop()?;
            if token == ")" {
                break;
            }
            if !is_name(&token) {
                return Err(EngineError::InvalidCommand)
                    .wrap_err_with(|| format!("expected an index field, found {token:?}"));
            }
            indexed.push(token);
        }

        Ok(Statement::Create(Create {
            table,
            fields,
            indexed,
        }))
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect("table")?;
        let table = self.pop_name()?;
        Ok(Statement::Drop(Drop { table }))
    }

    fn parse_select(&mut self) -> Result<Statement> {
        let mut fields = Vec::new();
        if self.peek() == Some("*") {
            self.pop()?;
            fields.push("*".to_owned());
        } else {
            loop {
                fields.push(self.pop_name()?);
                if self.peek() == Some(",") {
                    self.pop()?;
                } else {
                    break;
                }
            }
        }

        self.expect("from")?;
        let table = self.pop_name()?;
        let where_clause = self.parse_optional_where()?;

        Ok(Statement::Select(Select {
            table,
            fields,
            where_clause,
        }))
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect("into")?;
        let table = self.pop_name()?;
        self.expect("values")?;
        let mut values = Vec::new();
        while !self.at_end() {
            values.push(self.pop()?);
        }
        Ok(Statement::Insert(Insert { table, values }))
    }

    fn parse_update(&mut self) -> Result<Statement> {
        let table = self.pop_name()?;
        self.expect("set")?;
        let field = self.pop_name()?;
        self.expect("=")?;
        let value = self.pop()?;
        let where_clause = self.parse_optional_where()?;
        Ok(Statement::Update(Update {
            table,
            field,
            value,
            where_clause,
        }))
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect("from")?;
        let table = self.pop_name()?;
        let where_clause = Some(self.parse_where()?);
        Ok(Statement::Delete(Delete {
            table,
            where_clause,
        }))
    }

    fn parse_optional_where(&mut self) -> Result<Option<Where>> {
        if self.at_end() {
            return Ok(None);
        }
        Ok(Some(self.parse_where()?))
    }

    fn parse_where(&mut self) -> Result<Where> {
        self.expect("where")?;
        let first = self.parse_condition()?;

        if self.at_end() {
            return Ok(Where { first, rest: None });
        }
        let op = match self.pop()?.as_str() {
            "and" => LogicOp::And,
            "or" => LogicOp::Or,
            other => {
                return Err(EngineError::InvalidLogOp)
                    .wrap_err_with(|| format!("unknown logic operator {other:?}"))
            }
        };
        let second = self.parse_condition()?;
        Ok(Where {
            first,
            rest: Some((op, second)),
        })
    }

    fn parse_condition(&mut self) -> Result<Condition> {
        let field = self.pop_name()?;
        let op = match self.pop()?.as_str() {
            "<" => CompareOp::Lt,
            "=" => CompareOp::Eq,
            ">" => CompareOp::Gt,
            other => {
                return Err(EngineError::InvalidCommand)
                    .wrap_err_with(|| format!("unknown comparison operator {other:?}"))
            }
        };
        let value = self.pop()?;
        Ok(Condition { field, op, value })
    }
}

fn is_name(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !token.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn is_type(token: &str) -> bool {
    matches!(token, "int32" | "int64" | "string")
}
