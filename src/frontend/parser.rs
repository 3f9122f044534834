use crate::frontend::token::{Token, TokenKind};
use crate::lang::ast::{Block, Expression, Identifier, Program, Statement};

#[derive(Debug)]
pub struct ParserError {
    pub messages: Vec<String>,
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "parse error: {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParserError {}

/// Binding power, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,      // == !=
    LessGreater, // < >
    Sum,         // + -
    Product,     // * /
    Prefix,      // -x !x
    Call,        // f(x)
    Index,       // a[0]
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Slash | TokenKind::Asterisk => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Recursive-descent / Pratt parser over a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<String>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(
                TokenKind::Eof,
                "",
                crate::frontend::token::Span { line: 1, col: 1 },
            ));
        }
        Parser {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ParserError> {
        let mut program = Program::default();

        while !self.cur_is(TokenKind::Eof) {
            if let Some(statement) = self.parse_statement() {
                program.statements.push(statement);
            }
            self.next_token();
        }

        if self.errors.is_empty() {
            Ok(program)
        } else {
            Err(ParserError {
                messages: self.errors,
            })
        }
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek(&self) -> &Token {
        if self.pos + 1 < self.tokens.len() {
            &self.tokens[self.pos + 1]
        } else {
            &self.tokens[self.pos]
        }
    }

    fn next_token(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn cur_is(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn peek_precedence(&self) -> Precedence {
        precedence_of(self.peek().kind)
    }

    fn cur_precedence(&self) -> Precedence {
        precedence_of(self.cur().kind)
    }

    /// Advance when the next token matches, otherwise record an error.
    fn expect_peek(&mut self, kind: TokenKind) -> Option<()> {
        if self.peek_is(kind) {
            self.next_token();
            Some(())
        } else {
            let peek = self.peek();
            self.errors.push(format!(
                "{}:{}: expected '{}', found '{}'",
                peek.span.line, peek.span.col, kind, peek.kind
            ));
            None
        }
    }

    fn cur_identifier(&self) -> Identifier {
        Identifier {
            token: self.cur().clone(),
            name: self.cur().literal.clone(),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.cur().kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Option<Statement> {
        let token = self.cur().clone();

        self.expect_peek(TokenKind::Ident)?;
        let name = self.cur_identifier();

        self.expect_peek(TokenKind::Assign)?;
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;

        while !self.cur_is(TokenKind::Semicolon) && !self.cur_is(TokenKind::Eof) {
            self.next_token();
        }
        Some(Statement::Let { token, name, value })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        let token = self.cur().clone();
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;

        while !self.cur_is(TokenKind::Semicolon) && !self.cur_is(TokenKind::Eof) {
            self.next_token();
        }
        Some(Statement::Return { token, value })
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let token = self.cur().clone();
        let expression = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(TokenKind::Semicolon) {
            self.next_token();
        }
        Some(Statement::Expression { token, expression })
    }

    fn parse_block(&mut self) -> Option<Block> {
        let token = self.cur().clone();
        let mut statements = Vec::new();

        self.next_token();
        while !self.cur_is(TokenKind::RBrace) {
            if self.cur_is(TokenKind::Eof) {
                self.errors.push(format!(
                    "{}:{}: unterminated block, expected '}}'",
                    token.span.line, token.span.col
                ));
                return None;
            }
            if let Some(statement) = self.parse_statement() {
                statements.push(statement);
            }
            self.next_token();
        }
        Some(Block { token, statements })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let mut left = self.parse_prefix()?;

        while !self.peek_is(TokenKind::Semicolon) && precedence < self.peek_precedence() {
            left = match self.peek().kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Slash
                | TokenKind::Asterisk
                | TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt => {
                    self.next_token();
                    self.parse_infix(left)?
                }
                TokenKind::LParen => {
                    self.next_token();
                    self.parse_call(left)?
                }
                TokenKind::LBracket => {
                    self.next_token();
                    self.parse_index(left)?
                }
                _ => return Some(left),
            };
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expression> {
        match self.cur().kind {
            TokenKind::Ident => self.parse_identifier(),
            TokenKind::Int => self.parse_integer_literal(),
            TokenKind::Str => Some(Expression::StringLiteral {
                token: self.cur().clone(),
                value: self.cur().literal.clone(),
            }),
            TokenKind::True | TokenKind::False => Some(Expression::BoolLiteral {
                token: self.cur().clone(),
                value: self.cur_is(TokenKind::True),
            }),
            TokenKind::Bang | TokenKind::Minus => {
                let token = self.cur().clone();
                self.next_token();
                let right = self.parse_expression(Precedence::Prefix)?;
                Some(Expression::Prefix {
                    token,
                    right: Box::new(right),
                })
            }
            TokenKind::LParen => {
                self.next_token();
                let expression = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(TokenKind::RParen)?;
                Some(expression)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Function => self.parse_function(),
            TokenKind::LBracket => {
                let token = self.cur().clone();
                let elements = self.parse_expression_list(TokenKind::RBracket)?;
                Some(Expression::ArrayLiteral { token, elements })
            }
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::For => self.parse_for(),
            other => {
                let span = self.cur().span;
                self.errors.push(format!(
                    "{}:{}: unexpected token '{}'",
                    span.line, span.col, other
                ));
                None
            }
        }
    }

    /// An identifier in value position; also the entry point for plain
    /// assignment (`name = ...`) and the suffix steps (`name++`, `name--`).
    fn parse_identifier(&mut self) -> Option<Expression> {
        let ident = self.cur_identifier();

        if self.peek_is(TokenKind::Assign) {
            self.next_token();
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            Some(Expression::Assign {
                target: Box::new(Expression::Identifier(ident)),
                value: Box::new(value),
            })
        } else if self.peek_is(TokenKind::PlusPlus) || self.peek_is(TokenKind::MinusMinus) {
            self.next_token();
            Some(Expression::Suffix {
                token: self.cur().clone(),
                target: ident,
            })
        } else {
            Some(Expression::Identifier(ident))
        }
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        let token = self.cur().clone();
        match token.literal.parse::<i64>() {
            Ok(value) => Some(Expression::IntegerLiteral { token, value }),
            Err(_) => {
                self.errors.push(format!(
                    "{}:{}: '{}' is not a valid integer",
                    token.span.line, token.span.col, token.literal
                ));
                None
            }
        }
    }

    fn parse_infix(&mut self, left: Expression) -> Option<Expression> {
        let token = self.cur().clone();
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Infix {
            token,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_if(&mut self) -> Option<Expression> {
        let token = self.cur().clone();

        self.expect_peek(TokenKind::LParen)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RParen)?;

        self.expect_peek(TokenKind::LBrace)?;
        let consequence = self.parse_block()?;

        let alternative = if self.peek_is(TokenKind::Else) {
            self.next_token();
            self.expect_peek(TokenKind::LBrace)?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Some(Expression::If {
            token,
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function(&mut self) -> Option<Expression> {
        let token = self.cur().clone();

        let name = if self.peek_is(TokenKind::Ident) {
            self.next_token();
            let name = self.cur_identifier();
            self.expect_peek(TokenKind::LParen)?;
            Some(name)
        } else {
            self.expect_peek(TokenKind::LParen)?;
            None
        };

        let params = self.parse_function_params()?;

        self.expect_peek(TokenKind::LBrace)?;
        let body = self.parse_block()?;

        Some(Expression::FunctionLiteral {
            token,
            name,
            params,
            body,
        })
    }

    fn parse_function_params(&mut self) -> Option<Vec<Identifier>> {
        let mut params = Vec::new();

        if self.peek_is(TokenKind::RParen) {
            self.next_token();
            return Some(params);
        }

        self.expect_peek(TokenKind::Ident)?;
        params.push(self.cur_identifier());

        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.expect_peek(TokenKind::Ident)?;
            params.push(self.cur_identifier());
        }

        self.expect_peek(TokenKind::RParen)?;
        Some(params)
    }

    fn parse_call(&mut self, function: Expression) -> Option<Expression> {
        let token = self.cur().clone();
        let args = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expression::Call {
            token,
            function: Box::new(function),
            args,
        })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expression>> {
        let mut list = Vec::new();

        if self.peek_is(end) {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end)?;
        Some(list)
    }

    /// `base[index]`, and the indexed-assignment form `base[index] = value`.
    fn parse_index(&mut self, left: Expression) -> Option<Expression> {
        let token = self.cur().clone();
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RBracket)?;

        let index_expression = Expression::Index {
            token,
            left: Box::new(left),
            index: Box::new(index),
        };

        if self.peek_is(TokenKind::Assign) {
            self.next_token();
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            return Some(Expression::Assign {
                target: Box::new(index_expression),
                value: Box::new(value),
            });
        }
        Some(index_expression)
    }

    fn parse_hash(&mut self) -> Option<Expression> {
        let token = self.cur().clone();
        let mut pairs = Vec::new();

        while !self.peek_is(TokenKind::RBrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;

            self.expect_peek(TokenKind::Colon)?;
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if !self.peek_is(TokenKind::RBrace) {
                self.expect_peek(TokenKind::Comma)?;
            }
        }
        self.expect_peek(TokenKind::RBrace)?;

        Some(Expression::HashLiteral { token, pairs })
    }

    /// `for (let i = start; condition; step) { body }`
    fn parse_for(&mut self) -> Option<Expression> {
        let token = self.cur().clone();

        self.expect_peek(TokenKind::LParen)?;
        self.expect_peek(TokenKind::Let)?;
        let let_token = self.cur().clone();
        self.expect_peek(TokenKind::Ident)?;
        let name = self.cur_identifier();
        self.expect_peek(TokenKind::Assign)?;
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        let init = Statement::Let {
            token: let_token,
            name,
            value,
        };

        self.expect_peek(TokenKind::Semicolon)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;

        self.expect_peek(TokenKind::Semicolon)?;
        self.next_token();
        let increment = self.parse_expression(Precedence::Lowest)?;

        self.expect_peek(TokenKind::RParen)?;
        self.expect_peek(TokenKind::LBrace)?;
        let body = self.parse_block()?;

        Some(Expression::For {
            token,
            init: Box::new(init),
            condition: Box::new(condition),
            increment: Box::new(increment),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(input: &str) -> Program {
        let tokens = Lexer::new(input).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    fn parse_err(input: &str) -> ParserError {
        let tokens = Lexer::new(input).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap_err()
    }

    fn single_expression(input: &str) -> Expression {
        let mut program = parse(input);
        assert_eq!(program.statements.len(), 1, "want one statement");
        match program.statements.remove(0) {
            Statement::Expression { expression, .. } => expression,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_let_statement() {
        let program = parse("let x = 5;");
        match &program.statements[0] {
            Statement::Let { name, value, .. } => {
                assert_eq!(name.name, "x");
                assert!(matches!(value, Expression::IntegerLiteral { value: 5, .. }));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_return_statement() {
        let program = parse("return 10;");
        assert!(matches!(&program.statements[0], Statement::Return { .. }));
    }

    #[test]
    fn test_operator_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expression = single_expression("1 + 2 * 3;");
        match expression {
            Expression::Infix { token, right, .. } => {
                assert_eq!(token.kind, TokenKind::Plus);
                assert!(matches!(*right, Expression::Infix { .. }));
            }
            other => panic!("expected infix, got {:?}", other),
        }
    }

    #[test]
    fn test_grouped_expression() {
        // (1 + 2) * 3 parses as (1 + 2) * 3
        let expression = single_expression("(1 + 2) * 3;");
        match expression {
            Expression::Infix { token, left, .. } => {
                assert_eq!(token.kind, TokenKind::Asterisk);
                assert!(matches!(*left, Expression::Infix { .. }));
            }
            other => panic!("expected infix, got {:?}", other),
        }
    }

    #[test]
    fn test_prefix_expressions() {
        assert!(matches!(
            single_expression("!true;"),
            Expression::Prefix { .. }
        ));
        assert!(matches!(
            single_expression("-15;"),
            Expression::Prefix { .. }
        ));
    }

    #[test]
    fn test_if_else() {
        let expression = single_expression("if (x < y) { x } else { y }");
        match expression {
            Expression::If {
                consequence,
                alternative,
                ..
            } => {
                assert_eq!(consequence.statements.len(), 1);
                assert_eq!(alternative.unwrap().statements.len(), 1);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_anonymous_function() {
        let expression = single_expression("fun(a, b) { a + b; }");
        match expression {
            Expression::FunctionLiteral { name, params, .. } => {
                assert!(name.is_none());
                let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("expected function literal, got {:?}", other),
        }
    }

    #[test]
    fn test_named_function() {
        let expression = single_expression("fun add(x) { x; }");
        match expression {
            Expression::FunctionLiteral { name, params, .. } => {
                assert_eq!(name.unwrap().name, "add");
                assert_eq!(params.len(), 1);
            }
            other => panic!("expected function literal, got {:?}", other),
        }
    }

    #[test]
    fn test_function_without_params() {
        let expression = single_expression("fun() { 1; }");
        match expression {
            Expression::FunctionLiteral { params, .. } => assert!(params.is_empty()),
            other => panic!("expected function literal, got {:?}", other),
        }
    }

    #[test]
    fn test_call_expression() {
        let expression = single_expression("add(1, 2 * 3);");
        match expression {
            Expression::Call { function, args, .. } => {
                assert!(matches!(*function, Expression::Identifier(_)));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_call() {
        // outer(5)(10) calls the result of outer(5)
        let expression = single_expression("outer(5)(10);");
        match expression {
            Expression::Call { function, args, .. } => {
                assert!(matches!(*function, Expression::Call { .. }));
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_array_literal_and_index() {
        assert!(matches!(
            single_expression("[1, 2, 3];"),
            Expression::ArrayLiteral { .. }
        ));
        match single_expression("arr[1 + 1];") {
            Expression::Index { left, .. } => {
                assert!(matches!(*left, Expression::Identifier(_)));
            }
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_assignment() {
        match single_expression("x = 5;") {
            Expression::Assign { target, .. } => {
                assert!(matches!(*target, Expression::Identifier(_)));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_indexed_assignment() {
        match single_expression("arr[0] = \"test\";") {
            Expression::Assign { target, value } => {
                assert!(matches!(*target, Expression::Index { .. }));
                assert!(matches!(*value, Expression::StringLiteral { .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_suffix_expressions() {
        match single_expression("i++;") {
            Expression::Suffix { token, target } => {
                assert_eq!(token.kind, TokenKind::PlusPlus);
                assert_eq!(target.name, "i");
            }
            other => panic!("expected suffix, got {:?}", other),
        }
        assert!(matches!(
            single_expression("i--;"),
            Expression::Suffix { .. }
        ));
    }

    #[test]
    fn test_hash_literal() {
        match single_expression("{\"a\": 1, \"b\": 2};") {
            Expression::HashLiteral { pairs, .. } => assert_eq!(pairs.len(), 2),
            other => panic!("expected hash, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_hash() {
        match single_expression("{};") {
            Expression::HashLiteral { pairs, .. } => assert!(pairs.is_empty()),
            other => panic!("expected hash, got {:?}", other),
        }
    }

    #[test]
    fn test_for_expression() {
        let expression = single_expression("for (let i = 0; i < 3; i++) { x; }");
        match expression {
            Expression::For {
                init,
                condition,
                increment,
                body,
                ..
            } => {
                assert!(matches!(*init, Statement::Let { .. }));
                assert!(matches!(*condition, Expression::Infix { .. }));
                assert!(matches!(*increment, Expression::Suffix { .. }));
                assert_eq!(body.statements.len(), 1);
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_paren_is_reported() {
        let err = parse_err("if x { 1 }");
        assert!(err.messages[0].contains("expected '('"));
    }

    #[test]
    fn test_unterminated_block_is_reported() {
        let err = parse_err("if (true) { 1");
        assert!(err.to_string().contains("unterminated block"));
    }

    #[test]
    fn test_for_requires_let_initializer() {
        let err = parse_err("for (i = 0; i < 3; i++) { }");
        assert!(err.messages[0].contains("expected 'let'"));
    }

    #[test]
    fn test_error_positions_are_reported() {
        let err = parse_err("let = 5;");
        assert!(err.messages[0].starts_with("1:5:"));
    }
}
