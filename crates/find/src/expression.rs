//! The predicate-expression grammar shared by the top-level `find`
//! expression and the `-meta` primary's nested expressions:
//!
//! ```text
//! Expression => Expression (-a|-and) Atom |
//!               Expression Atom           |   (implicit AND)
//!               Expression (-o|-or)  Atom |
//!               Atom
//! Atom       => (!|-not) Atom             |
//!               '(' Expression ')'        |
//!               Primary
//! ```
//!
//! Operator precedence, high to low: `()`, `-not`, `-and` (including
//! the implicit form), `-or`. Parens and `-not` are enforced by the
//! grammar; binary precedence by an explicit evaluation stack — when a
//! new binary op arrives with precedence ≤ the most recent unresolved
//! op, the stack is reduced by popping `p, op, q` and pushing
//! `op(p, q)`.

use plugin::Error;
use rql::Expr;

/// How a grammar hands its primaries and negation to the expression
/// parser.
pub trait Grammar {
    type Primary;

    /// Parses one primary from the front of `tokens`. Returns a
    /// MatchError when the tokens don't start a primary; a SyntaxError
    /// when they do but are malformed. A primary that is itself an
    /// inner expression may return a predicate alongside a recoverable
    /// error via `Partial`.
    fn parse_primary(&self, tokens: &[String]) -> Result<Partial<Self::Primary>, Error>;

    /// Negates a parsed atom. The default wraps in NOT; grammars whose
    /// atoms carry their own negation semantics override this.
    fn negate(&self, expr: Expr<Self::Primary>) -> Expr<Self::Primary> {
        Expr::not(expr)
    }
}

/// A parse that produced a predicate and possibly stopped early. The
/// error, when present, is recoverable (UnknownToken, or
/// IncompleteOperator, or EmptyExpression): the caller decides whether
/// the leftover tokens belong to an enclosing expression.
#[derive(Debug)]
pub struct Partial<P> {
    pub predicate: Option<Expr<P>>,
    pub rest: Vec<String>,
    pub error: Option<Error>,
}

impl<P> Partial<P> {
    pub fn complete(predicate: Expr<P>, rest: &[String]) -> Self {
        Self {
            predicate: Some(predicate),
            rest: rest.to_vec(),
            error: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum BinaryOp {
    And,
    Or,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::And => 2,
            BinaryOp::Or => 1,
        }
    }

    fn token(&self) -> &'static str {
        match self {
            BinaryOp::And => "-a",
            BinaryOp::Or => "-o",
        }
    }

    fn of(token: &str) -> Option<BinaryOp> {
        match token {
            "-a" | "-and" => Some(BinaryOp::And),
            "-o" | "-or" => Some(BinaryOp::Or),
            _ => None,
        }
    }

    fn combine<P>(&self, left: Expr<P>, right: Expr<P>) -> Expr<P> {
        match self {
            BinaryOp::And => left.combine_and(right),
            BinaryOp::Or => left.combine_or(right),
        }
    }
}

enum StackItem<P> {
    Predicate(Expr<P>),
    Op(BinaryOp, String),
}

struct EvalStack<P> {
    items: Vec<StackItem<P>>,
    most_recent_op: Option<(BinaryOp, String)>,
}

impl<P> EvalStack<P> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            most_recent_op: None,
        }
    }

    fn push_predicate(&mut self, predicate: Expr<P>) {
        if matches!(self.items.last(), Some(StackItem::Predicate(_))) {
            // p1 p2 is p1 -a p2.
            self.push_op(BinaryOp::And, BinaryOp::And.token().to_string());
        }
        self.items.push(StackItem::Predicate(predicate));
    }

    fn push_op(&mut self, op: BinaryOp, token: String) {
        if let Some((recent, _)) = &self.most_recent_op {
            if op.precedence() <= recent.precedence() {
                self.reduce();
            }
        }
        self.most_recent_op = Some((op, token.clone()));
        self.items.push(StackItem::Op(op, token));
    }

    fn reduce(&mut self) {
        while self.items.len() > 1 {
            let Some(StackItem::Predicate(right)) = self.items.pop() else {
                unreachable!("the stack always reduces from a predicate")
            };
            let Some(StackItem::Op(op, _)) = self.items.pop() else {
                unreachable!("predicates are always separated by an op")
            };
            let Some(StackItem::Predicate(left)) = self.items.pop() else {
                unreachable!("an op always follows a predicate")
            };
            self.items.push(StackItem::Predicate(op.combine(left, right)));
        }
    }

    fn top_is_op(&self) -> bool {
        matches!(self.items.last(), Some(StackItem::Op(..)))
    }

    fn top_is_predicate(&self) -> bool {
        matches!(self.items.last(), Some(StackItem::Predicate(_)))
    }
}

pub struct Parser<'g, G> {
    grammar: &'g G,
}

impl<'g, G: Grammar> Parser<'g, G> {
    pub fn new(grammar: &'g G) -> Self {
        Self { grammar }
    }

    /// Parses an expression from `tokens`, stopping at the first token
    /// it cannot claim. See `Partial` for the contract.
    pub fn parse(&self, tokens: &[String]) -> Result<Partial<G::Primary>, Error> {
        self.parse_at_depth(tokens, 0)
    }

    /// Parses exactly one parenthesized expression from the front of
    /// `tokens`, leaving everything after the closing ')' unclaimed.
    pub fn parse_parenthesized_only(
        &self,
        tokens: &[String],
    ) -> Result<Partial<G::Primary>, Error> {
        self.parse_parenthesized(tokens, 0)
    }

    fn parse_at_depth(
        &self,
        tokens: &[String],
        parens: usize,
    ) -> Result<Partial<G::Primary>, Error> {
        let mut tokens = tokens.to_vec();
        let mut stack = EvalStack::new();
        let mut pending: Option<Error> = None;

        loop {
            pending = None;
            let Some(token) = tokens.first().cloned() else {
                break;
            };
            if token == ")" {
                if parens == 0 {
                    pending = Some(Error::IncompleteOperator(
                        "): no beginning '('".to_string(),
                    ));
                }
                // Either way, a parenthesized expression has ended.
                break;
            }

            match self.parse_atom(&tokens, parens) {
                Ok(partial) => match (partial.predicate, partial.error) {
                    (Some(predicate), _) => {
                        // An inner expression may have stopped early;
                        // its leftover tokens get another look at this
                        // level on the next iteration.
                        stack.push_predicate(predicate);
                        tokens = partial.rest;
                        continue;
                    }
                    (None, Some(error)) => {
                        pending = Some(error);
                        break;
                    }
                    (None, None) => unreachable!("a partial has a predicate or an error"),
                },
                // A dangling operator — "! -name foo" inside a meta
                // expression, say — ends this expression; the enclosing
                // grammar gets a shot at the leftover tokens.
                Err(err @ Error::IncompleteOperator(_)) => {
                    pending = Some(err);
                    break;
                }
                Err(err) if !err.is_match_error() => return Err(err),
                Err(_) => {}
            }

            // Not an atom; try a binary op.
            let Some(op) = BinaryOp::of(&token) else {
                pending = Some(Error::UnknownToken(token));
                break;
            };
            tokens.remove(0);
            if stack.most_recent_op.is_none() && !stack.top_is_predicate() {
                return Err(Error::SyntaxError(format!(
                    "{token}: no expression before {token}"
                )));
            }
            if stack.top_is_op() {
                let (_, recent) = stack.most_recent_op.as_ref().expect("an op is on the stack");
                return Err(Error::SyntaxError(format!(
                    "{recent}: no expression after {recent}"
                )));
            }
            stack.push_op(op, token);
        }

        if stack.items.is_empty() {
            let error = pending
                .unwrap_or_else(|| Error::EmptyExpression("empty expression".to_string()));
            return Ok(Partial {
                predicate: None,
                rest: tokens,
                error: Some(error),
            });
        }

        if stack.top_is_op() {
            let (_, recent) = stack.most_recent_op.clone().expect("an op is on the stack");
            if pending.is_none() {
                // "p1 -and" with nothing after it.
                return Err(Error::SyntaxError(format!(
                    "{recent}: no expression after {recent}"
                )));
            }
            // "p1 -and <unclaimed>": hand the op back with the leftover
            // tokens so an enclosing expression can finish the job.
            stack.items.pop();
            tokens.insert(0, recent);
            return Ok(Partial {
                predicate: Some(finish(stack)),
                rest: tokens,
                error: pending,
            });
        }

        Ok(Partial {
            predicate: Some(finish(stack)),
            rest: tokens,
            error: pending,
        })
    }

    fn parse_atom(
        &self,
        tokens: &[String],
        parens: usize,
    ) -> Result<Partial<G::Primary>, Error> {
        let token = &tokens[0];
        if token == "!" || token == "-not" {
            let rest = &tokens[1..];
            let Some(next) = rest.first() else {
                return Err(Error::SyntaxError(format!(
                    "{token}: no following expression"
                )));
            };
            if next == ")" {
                if parens == 0 {
                    return Err(Error::SyntaxError("): no beginning '('".to_string()));
                }
                return Err(Error::SyntaxError(format!(
                    "{token}: no following expression"
                )));
            }
            return match self.parse_atom(rest, parens) {
                Ok(partial) => match partial.predicate {
                    Some(predicate) => Ok(Partial {
                        predicate: Some(self.grammar.negate(predicate)),
                        rest: partial.rest,
                        error: partial.error,
                    }),
                    None => Ok(partial),
                },
                Err(err) if err.is_match_error() => Err(Error::IncompleteOperator(format!(
                    "{token}: no following expression"
                ))),
                Err(err) => Err(err),
            };
        }
        if token == "(" {
            return self.parse_parenthesized(tokens, parens);
        }
        self.grammar.parse_primary(tokens)
    }

    fn parse_parenthesized(
        &self,
        tokens: &[String],
        parens: usize,
    ) -> Result<Partial<G::Primary>, Error> {
        if tokens[0] == ")" {
            return Err(Error::SyntaxError("): no beginning '('".to_string()));
        }
        if tokens[0] != "(" {
            return Err(Error::MatchError("expected an '('".to_string()));
        }
        let inner = self.parse_at_depth(&tokens[1..], parens + 1)?;
        let empty = matches!(&inner.error, Some(Error::EmptyExpression(_)));
        if !empty {
            if let Some(error) = &inner.error {
                let stopped_at_close = inner.rest.first().map(String::as_str) == Some(")");
                let recoverable = matches!(
                    error,
                    Error::IncompleteOperator(_) | Error::UnknownToken(_)
                );
                if !(recoverable && stopped_at_close) {
                    // A hard stop: the error keeps its kind but is no
                    // longer recoverable once it's trapped in parens.
                    return Err(error.clone());
                }
            }
        }
        if inner.rest.first().map(String::as_str) != Some(")") {
            return Err(Error::SyntaxError("(: missing closing ')'".to_string()));
        }
        if empty {
            return Err(Error::SyntaxError("(): empty inner expression".to_string()));
        }
        Ok(Partial {
            predicate: inner.predicate,
            rest: inner.rest[1..].to_vec(),
            error: None,
        })
    }
}

fn finish<P>(mut stack: EvalStack<P>) -> Expr<P> {
    stack.reduce();
    match stack.items.pop() {
        Some(StackItem::Predicate(predicate)) => predicate,
        _ => unreachable!("a reduced, non-empty stack holds one predicate"),
    }
}
