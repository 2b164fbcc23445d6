use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            // point just past the last token so diagnostics land at the end
            None => self
                .tokens
                .last()
                .map(|(_, s)| Span { start: s.end, end: s.end })
                .unwrap_or(Span::UNKNOWN),
        }
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].1
        } else {
            Span::UNKNOWN
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("FS-P001", format!("expected {}, got {}", describe(expected), describe(tok)))),
            None => Err(self.error("FS-P002", format!("expected {}, got end of input", describe(expected)))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("FS-P003", format!("expected identifier, got {}", describe(&tok)))),
            None => Err(self.error("FS-P004", "expected identifier, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Statements ----

    pub fn parse_script(&mut self) -> Result<Script> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_stmt()?);
        }
        Ok(Script { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    break;
                }
                Some(_) => body.push(self.parse_stmt()?),
                None => return Err(self.error("FS-P005", "unclosed block, expected '}'".into())),
            }
        }
        // a trailing terminator after a block is allowed
        self.eat(&Token::Dot);
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        let kind = match self.peek() {
            Some(Token::Set) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::To)?;
                let value = self.parse_expr()?;
                self.expect(&Token::Dot)?;
                StmtKind::Set { name, value }
            }
            Some(Token::Unset) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::Dot)?;
                StmtKind::Unset { name }
            }
            Some(Token::Print) => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&Token::Dot)?;
                StmtKind::Print { value }
            }
            Some(Token::Wait) => {
                self.advance();
                let seconds = self.parse_expr()?;
                self.expect(&Token::Dot)?;
                StmtKind::Wait { seconds }
            }
            Some(Token::Lock) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::To)?;
                let value = self.parse_expr()?;
                self.expect(&Token::Dot)?;
                StmtKind::Lock { name, value }
            }
            Some(Token::Unlock) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::Dot)?;
                StmtKind::Unlock { name }
            }
            Some(Token::Preserve) => {
                self.advance();
                self.expect(&Token::Dot)?;
                StmtKind::Preserve
            }
            Some(Token::If) => return self.parse_if(),
            Some(Token::Until) => {
                self.advance();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::Until { condition, body }
            }
            Some(Token::When) => {
                self.advance();
                let condition = self.parse_expr()?;
                self.expect(&Token::Then)?;
                let body = self.parse_block()?;
                StmtKind::When { condition, body }
            }
            Some(tok) => {
                let tok = tok.clone();
                return Err(self.error("FS-P006", format!("expected a statement, got {}", describe(&tok))));
            }
            None => return Err(self.error("FS-P007", "expected a statement, got end of input".into())),
        };
        Ok(Spanned::new(kind, start.merge(self.prev_span())))
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        let kind = StmtKind::If { condition, then_body, else_body };
        Ok(Spanned::new(kind, start.merge(self.prev_span())))
    }

    // ---- Expressions, lowest precedence first ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.merge(right.span);
        Spanned::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, span)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Self::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let right = self.parse_comparison()?;
            left = Self::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Equals,
                Some(Token::NotEq) => BinOp::NotEquals,
                Some(Token::Lt) => BinOp::LessThan,
                Some(Token::LtEq) => BinOp::LessOrEqual,
                Some(Token::Gt) => BinOp::GreaterThan,
                Some(Token::GtEq) => BinOp::GreaterOrEqual,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Multiply,
                Some(Token::Slash) => BinOp::Divide,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        let start = self.peek_span();
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Spanned::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    /// `^` binds tighter than unary minus and associates to the right.
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::Caret) {
            let exponent = self.parse_unary()?;
            return Ok(Self::binary(BinOp::Power, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        while self.eat(&Token::Colon) {
            let name = self.expect_ident()?;
            let span = expr.span.merge(self.prev_span());
            expr = Spanned::new(ExprKind::Suffix { target: Box::new(expr), name }, span);
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let span = self.peek_span();
        let kind = match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                ExprKind::Number(n)
            }
            Some(Token::Text(s)) => {
                self.advance();
                ExprKind::Text(s)
            }
            Some(Token::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            Some(Token::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Spanned::new(ExprKind::Call { name, args }, span.merge(self.prev_span())));
                }
                ExprKind::Ident(name)
            }
            // builtin names that collide with statement keywords
            Some(Token::Print) if self.tokens.get(self.pos + 1).map(|(t, _)| t) == Some(&Token::LParen) => {
                self.advance();
                self.advance();
                let args = self.parse_args()?;
                let kind = ExprKind::Call { name: "print".into(), args };
                return Ok(Spanned::new(kind, span.merge(self.prev_span())));
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(Spanned::new(inner.node, span.merge(self.prev_span())));
            }
            Some(tok) => {
                return Err(self.error("FS-P008", format!("expected an expression, got {}", describe(&tok))));
            }
            None => return Err(self.error("FS-P009", "expected an expression, got end of input".into())),
        };
        Ok(Spanned::new(kind, span))
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Text(s) => format!("string \"{s}\""),
        Token::Ident(name) => format!("identifier '{name}'"),
        Token::Dot => "'.'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Parse a token stream into a script.
pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Script> {
    Parser::new(tokens).parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_str(source: &str) -> Script {
        parse(lexer::lex(source).unwrap()).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse(lexer::lex(source).unwrap()).unwrap_err()
    }

    fn expr_of(source: &str) -> ExprKind {
        let script = parse_str(&format!("set x to {source}."));
        match &script.statements[0].node {
            StmtKind::Set { value, .. } => value.node.clone(),
            other => panic!("expected set, got {:?}", other),
        }
    }

    #[test]
    fn parse_set_and_print() {
        let script = parse_str("set alt to 100.5. print alt.");
        assert_eq!(script.statements.len(), 2);
        assert!(matches!(
            &script.statements[0].node,
            StmtKind::Set { name, value } if name == "alt" && value.node == ExprKind::Number(100.5)
        ));
        assert!(matches!(&script.statements[1].node, StmtKind::Print { .. }));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        match expr_of("1 + 2 * 3") {
            ExprKind::Binary { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.node, ExprKind::Binary { op: BinOp::Multiply, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn power_is_right_associative_and_beats_negation() {
        match expr_of("-2 ^ 3 ^ 2") {
            ExprKind::Unary { op: UnaryOp::Negate, operand } => match &operand.node {
                ExprKind::Binary { op: BinOp::Power, right, .. } => {
                    assert!(matches!(right.node, ExprKind::Binary { op: BinOp::Power, .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn logical_operators_have_lowest_precedence() {
        match expr_of("a < 1 or b = 2 and not c") {
            ExprKind::Binary { op: BinOp::Or, left, right } => {
                assert!(matches!(left.node, ExprKind::Binary { op: BinOp::LessThan, .. }));
                assert!(matches!(right.node, ExprKind::Binary { op: BinOp::And, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn calls_and_suffixes() {
        match expr_of("vector(1, 2, 3):mag") {
            ExprKind::Suffix { target, name } => {
                assert_eq!(name, "mag");
                assert!(matches!(&target.node, ExprKind::Call { name, args } if name == "vector" && args.len() == 3));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(expr_of("random()"), ExprKind::Call { args, .. } if args.is_empty()));
    }

    #[test]
    fn parse_control_flow() {
        let script = parse_str(
            "if x > 1 { print 1. } else if x > 0 { print 2. } else { print 3. }
             until done { wait 1. }
             when alt > 100 then { print \"high\". preserve. }",
        );
        assert_eq!(script.statements.len(), 3);
        match &script.statements[0].node {
            StmtKind::If { else_body: Some(else_body), .. } => {
                assert!(matches!(&else_body[0].node, StmtKind::If { else_body: Some(_), .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&script.statements[1].node, StmtKind::Until { body, .. } if body.len() == 1));
        assert!(matches!(&script.statements[2].node, StmtKind::When { body, .. } if body.len() == 2));
    }

    #[test]
    fn parse_lock_and_unlock() {
        let script = parse_str("lock steering to heading + 1. unlock steering.");
        assert!(matches!(&script.statements[0].node, StmtKind::Lock { name, .. } if name == "steering"));
        assert!(matches!(&script.statements[1].node, StmtKind::Unlock { name } if name == "steering"));
    }

    #[test]
    fn statement_span_covers_terminator() {
        let script = parse_str("set x to 1.");
        assert_eq!(script.statements[0].span, Span { start: 0, end: 11 });
    }

    #[test]
    fn missing_terminator_is_reported_at_end() {
        let err = parse_err("set x to 1");
        assert_eq!(err.code, "FS-P002");
        assert_eq!(err.span, Span { start: 10, end: 10 });
    }

    #[test]
    fn keyword_cannot_be_a_variable_name() {
        let err = parse_err("set when to 1.");
        assert_eq!(err.code, "FS-P003");
        assert!(err.message.contains("when"));
    }

    #[test]
    fn unclosed_block_is_reported() {
        let err = parse_err("if x { print 1.");
        assert_eq!(err.code, "FS-P005");
    }
}
