//! EVENT condition expression language.
//!
//! An expression is a comma-separated conjunction of clauses, each of the
//! form `field op 'literal'`:
//!
//! ```text
//! category == 'deploy', text contains 'failed', context.env != 'dev'
//! ```
//!
//! Fields: `category`, `text`, `context.<key>`. Operators: `==`, `!=`,
//! `starts`, `ends`, `contains`, `matches` (anchored regex). An absent
//! context key never matches. Parse and regex errors surface as
//! [`EvaluationError::Expression`]; the engine logs them and counts the
//! evaluation as false.

use crate::condition::EvaluationError;
use crate::types::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprOp {
    Eq,
    Ne,
    Starts,
    Ends,
    Contains,
    Matches,
}

struct Clause<'a> {
    field: &'a str,
    op: ExprOp,
    literal: String,
}

/// Evaluate an expression against an event payload.
pub fn evaluate(expression: &str, payload: &EventPayload) -> Result<bool, EvaluationError> {
    if expression.trim().is_empty() {
        return Err(EvaluationError::Expression(
            "empty event expression".to_string(),
        ));
    }
    for raw in expression.split(',') {
        let clause = parse_clause(raw)?;
        if !eval_clause(&clause, payload)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn parse_clause(raw: &str) -> Result<Clause<'_>, EvaluationError> {
    let raw = raw.trim();
    let malformed = || {
        EvaluationError::Expression(format!(
            "malformed clause: {:?} (expected \"field op 'literal'\")",
            raw
        ))
    };
    let (field, rest) = raw.split_once(char::is_whitespace).ok_or_else(malformed)?;
    let (op_token, literal_token) = rest
        .trim_start()
        .split_once(char::is_whitespace)
        .ok_or_else(malformed)?;
    let literal_token = literal_token.trim();

    if field.is_empty() || op_token.is_empty() || literal_token.is_empty() {
        return Err(malformed());
    }

    let op = match op_token {
        "==" => ExprOp::Eq,
        "!=" => ExprOp::Ne,
        "starts" => ExprOp::Starts,
        "ends" => ExprOp::Ends,
        "contains" => ExprOp::Contains,
        "matches" => ExprOp::Matches,
        other => {
            return Err(EvaluationError::Expression(format!(
                "unknown operator {:?} in clause {:?}",
                other, raw
            )))
        }
    };

    let literal = literal_token
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| {
            EvaluationError::Expression(format!(
                "literal must be single-quoted in clause {:?}",
                raw
            ))
        })?;

    Ok(Clause {
        field,
        op,
        literal: literal.to_string(),
    })
}

fn eval_clause(clause: &Clause<'_>, payload: &EventPayload) -> Result<bool, EvaluationError> {
    let value: Option<&str> = match clause.field {
        "category" => Some(payload.category.as_str()),
        "text" => Some(payload.text.as_str()),
        field => match field.strip_prefix("context.") {
            Some(key) if !key.is_empty() => payload.context.get(key).map(String::as_str),
            _ => {
                return Err(EvaluationError::Expression(format!(
                    "unknown field {:?} (expected category, text or context.<key>)",
                    field
                )))
            }
        },
    };

    // A missing context key satisfies nothing, `!=` included.
    let Some(value) = value else {
        return Ok(false);
    };

    Ok(match clause.op {
        ExprOp::Eq => value == clause.literal,
        ExprOp::Ne => value != clause.literal,
        ExprOp::Starts => value.starts_with(&clause.literal),
        ExprOp::Ends => value.ends_with(&clause.literal),
        ExprOp::Contains => value.contains(&clause.literal),
        ExprOp::Matches => {
            let re = regex::Regex::new(&format!("^(?:{})$", clause.literal))
                .map_err(|e| EvaluationError::Expression(e.to_string()))?;
            re.is_match(value)
        }
    })
}
