//! Análisis sintáctico.
//!
//! Parser de descenso recursivo sobre la gramática fija de Jack. Cada
//! producción es un método de [`Parser`] que observa a lo sumo un token
//! adelante y nunca retrocede una vez que ha consumido entrada. El resultado
//! es un árbol sintáctico por unidad ([`Class`]) que la fase semántica recorre
//! para generar código de máquina virtual.
//!
//! Las expresiones binarias se asocian estrictamente de izquierda a derecha,
//! sin precedencia de operadores: `1 + 2 * 3` equivale a `(1 + 2) * 3`.

use std::{iter::Peekable, rc::Rc};
use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[derive(Debug)]
pub struct Class {
    pub name: Located<Identifier>,
    pub variables: Vec<ClassVarDec>,
    pub subroutines: Vec<Subroutine>,
}

#[derive(Debug)]
pub struct ClassVarDec {
    pub kind: ClassVarKind,
    pub of: Located<Type>,
    pub names: Vec<Located<Identifier>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassVarKind {
    Static,
    Field,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Char,
    Boolean,
    Class(Identifier),
}

#[derive(Debug)]
pub struct Subroutine {
    pub kind: SubroutineKind,
    pub name: Located<Identifier>,
    pub parameters: Vec<Parameter>,
    pub locals: Vec<VarDec>,
    pub statements: Vec<Statement>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubroutineKind {
    Constructor,
    Function,
    Method,
}

#[derive(Debug)]
pub struct Parameter {
    pub of: Located<Type>,
    pub name: Located<Identifier>,
}

#[derive(Debug)]
pub struct VarDec {
    pub of: Located<Type>,
    pub names: Vec<Located<Identifier>>,
}

#[derive(Debug)]
pub enum Statement {
    Let {
        target: Located<Identifier>,
        index: Option<Located<Expr>>,
        value: Located<Expr>,
    },

    If {
        condition: Located<Expr>,
        body: Vec<Statement>,
        otherwise: Option<Vec<Statement>>,
    },

    While {
        condition: Located<Expr>,
        body: Vec<Statement>,
    },

    Do(Located<Call>),

    Return(Option<Located<Expr>>),
}

#[derive(Debug)]
pub enum Expr {
    Integer(u16),
    String(Rc<str>),
    True,
    False,
    Null,
    This,
    Var(Located<Identifier>),
    Index(Located<Identifier>, Box<Located<Expr>>),
    Call(Call),
    Unary(UnaryOp, Box<Located<Expr>>),
    Binary(Box<Located<Expr>>, BinOp, Box<Located<Expr>>),
}

/// Invocación de subrutina.
///
/// `receiver` es el prefijo antes de `.`, que puede ser una variable
/// (llamada a método) o el nombre de una clase (llamada a función).
#[derive(Debug)]
pub struct Call {
    pub receiver: Option<Located<Identifier>>,
    pub name: Located<Identifier>,
    pub args: Vec<Located<Expr>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Less,
    Greater,
    Equal,
}

impl BinOp {
    fn from_token(token: &Token) -> Option<BinOp> {
        let op = match token {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Times => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Ampersand => BinOp::And,
            Token::Pipe => BinOp::Or,
            Token::Less => BinOp::Less,
            Token::Greater => BinOp::Greater,
            Token::Assign => BinOp::Equal,
            _ => return None,
        };

        Some(op)
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected token {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected token {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier, found {0}")]
    ExpectedId(Token),

    #[error("Expected any of `int`, `char`, `boolean` or a class name, found {0}")]
    ExpectedType(Token),

    #[error("Expected an expression, found {0}")]
    ExpectedExpr(Token),

    #[error("Expected `static`, `field`, `constructor`, `function`, `method` or `}}`, found {0}")]
    ExpectedMember(Token),

    #[error("Unexpected {0} after end of class")]
    TrailingInput(Token),

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

type Parse<T> = Result<T, Located<ParserError>>;

/// Construye el árbol sintáctico de una unidad.
///
/// `start` es la ubicación inicial de la unidad, utilizada para reportar
/// errores en una entrada vacía.
pub fn parse<I>(tokens: I, start: Location) -> Parse<Class>
where
    I: IntoIterator<Item = Located<Token>>,
{
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
        last_known: start,
    };

    parser.class()
}

struct Parser<I: Iterator<Item = Located<Token>>> {
    tokens: Peekable<I>,
    last_known: Location,
}

impl<I: Iterator<Item = Located<Token>>> Parser<I> {
    fn class(&mut self) -> Parse<Class> {
        self.keyword(Keyword::Class)?;
        let name = self.id()?;
        self.expect(Token::OpenCurly)?;

        let mut variables = Vec::new();
        while let Some(kind) = self.class_var_kind() {
            self.next()?;
            variables.push(self.class_var_dec(kind)?);
        }

        let mut subroutines = Vec::new();
        while let Some(kind) = self.subroutine_kind() {
            self.next()?;
            subroutines.push(self.subroutine(kind)?);
        }

        match self.next()?.into_inner() {
            Token::CloseCurly => (),
            found => return self.fail(ParserError::ExpectedMember(found)),
        }

        match self.tokens.next() {
            None => Ok(Class {
                name,
                variables,
                subroutines,
            }),

            Some(token) => {
                let (location, token) = token.split();
                Err(Located::at(ParserError::TrailingInput(token), location))
            }
        }
    }

    fn class_var_kind(&mut self) -> Option<ClassVarKind> {
        match self.peek()? {
            Token::Keyword(Keyword::Static) => Some(ClassVarKind::Static),
            Token::Keyword(Keyword::Field) => Some(ClassVarKind::Field),
            _ => None,
        }
    }

    fn subroutine_kind(&mut self) -> Option<SubroutineKind> {
        match self.peek()? {
            Token::Keyword(Keyword::Constructor) => Some(SubroutineKind::Constructor),
            Token::Keyword(Keyword::Function) => Some(SubroutineKind::Function),
            Token::Keyword(Keyword::Method) => Some(SubroutineKind::Method),
            _ => None,
        }
    }

    fn class_var_dec(&mut self, kind: ClassVarKind) -> Parse<ClassVarDec> {
        let of = self.typ()?;
        let names = self.names()?;

        Ok(ClassVarDec { kind, of, names })
    }

    fn subroutine(&mut self, kind: SubroutineKind) -> Parse<Subroutine> {
        // El tipo de retorno no participa en la generación de código
        if self.is_next(&Token::Keyword(Keyword::Void)) {
            self.next()?;
        } else {
            self.typ()?;
        }

        let name = self.id()?;

        self.expect(Token::OpenParen)?;
        let parameters = self.parameter_list()?;
        self.expect(Token::CloseParen)?;

        self.expect(Token::OpenCurly)?;

        let mut locals = Vec::new();
        while self.is_next(&Token::Keyword(Keyword::Var)) {
            self.next()?;

            let of = self.typ()?;
            let names = self.names()?;
            locals.push(VarDec { of, names });
        }

        let statements = self.statements()?;
        self.expect(Token::CloseCurly)?;

        Ok(Subroutine {
            kind,
            name,
            parameters,
            locals,
            statements,
        })
    }

    fn parameter_list(&mut self) -> Parse<Vec<Parameter>> {
        let mut parameters = Vec::new();
        if self.is_next(&Token::CloseParen) {
            return Ok(parameters);
        }

        loop {
            let of = self.typ()?;
            let name = self.id()?;
            parameters.push(Parameter { of, name });

            if !self.is_next(&Token::Comma) {
                break Ok(parameters);
            }

            self.next()?;
        }
    }

    /// Nombres separados por coma y terminados en `;`.
    fn names(&mut self) -> Parse<Vec<Located<Identifier>>> {
        let mut names = vec![self.id()?];
        while self.is_next(&Token::Comma) {
            self.next()?;
            names.push(self.id()?);
        }

        self.expect(Token::Semicolon)?;
        Ok(names)
    }

    fn statement_block(&mut self) -> Parse<Vec<Statement>> {
        self.expect(Token::OpenCurly)?;
        let statements = self.statements()?;
        self.expect(Token::CloseCurly)?;

        Ok(statements)
    }

    fn statements(&mut self) -> Parse<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            let statement = match self.peek() {
                Some(Token::Keyword(Keyword::Let)) => self.let_statement()?,
                Some(Token::Keyword(Keyword::If)) => self.if_statement()?,
                Some(Token::Keyword(Keyword::While)) => self.while_statement()?,
                Some(Token::Keyword(Keyword::Do)) => self.do_statement()?,
                Some(Token::Keyword(Keyword::Return)) => self.return_statement()?,
                _ => break Ok(statements),
            };

            statements.push(statement);
        }
    }

    fn let_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Let)?;
        let target = self.id()?;

        let index = if self.is_next(&Token::OpenSquare) {
            self.next()?;
            let index = self.expr()?;
            self.expect(Token::CloseSquare)?;

            Some(index)
        } else {
            None
        };

        self.expect(Token::Assign)?;
        let value = self.expr()?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::Let {
            target,
            index,
            value,
        })
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::If)?;
        let condition = self.condition()?;
        let body = self.statement_block()?;

        let otherwise = if self.is_next(&Token::Keyword(Keyword::Else)) {
            self.next()?;
            Some(self.statement_block()?)
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            body,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::While)?;
        let condition = self.condition()?;
        let body = self.statement_block()?;

        Ok(Statement::While { condition, body })
    }

    fn do_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Do)?;

        let (location, name) = self.id()?.split();
        let call = self.call(Located::at(name, location.clone()))?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::Do(Located::at(call, self.since(location))))
    }

    fn return_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Return)?;

        let value = if self.is_next(&Token::Semicolon) {
            None
        } else {
            Some(self.expr()?)
        };

        self.expect(Token::Semicolon)?;
        Ok(Statement::Return(value))
    }

    fn condition(&mut self) -> Parse<Located<Expr>> {
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;

        Ok(condition)
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        let mut lhs = self.term()?;

        while let Some(op) = self.peek().and_then(BinOp::from_token) {
            self.next()?;

            let rhs = self.term()?;
            let location = Location::span(lhs.location().clone(), rhs.location());
            lhs = Located::at(Expr::Binary(Box::new(lhs), op, Box::new(rhs)), location);
        }

        Ok(lhs)
    }

    fn term(&mut self) -> Parse<Located<Expr>> {
        let (location, token) = self.next()?.split();

        let expr = match token {
            Token::IntLiteral(integer) => Expr::Integer(integer),
            Token::StrLiteral(string) => Expr::String(string),
            Token::Keyword(Keyword::True) => Expr::True,
            Token::Keyword(Keyword::False) => Expr::False,
            Token::Keyword(Keyword::Null) => Expr::Null,
            Token::Keyword(Keyword::This) => Expr::This,

            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;

                return Ok(Located::at(inner.into_inner(), self.since(location)));
            }

            Token::Minus => Expr::Unary(UnaryOp::Negate, Box::new(self.term()?)),
            Token::Tilde => Expr::Unary(UnaryOp::Not, Box::new(self.term()?)),

            Token::Id(id) => {
                let name = Located::at(id, location.clone());
                match self.peek() {
                    Some(Token::OpenSquare) => {
                        self.next()?;
                        let index = self.expr()?;
                        self.expect(Token::CloseSquare)?;

                        Expr::Index(name, Box::new(index))
                    }

                    Some(Token::OpenParen | Token::Period) => Expr::Call(self.call(name)?),
                    _ => Expr::Var(name),
                }
            }

            found => return self.fail(ParserError::ExpectedExpr(found)),
        };

        Ok(Located::at(expr, self.since(location)))
    }

    /// Resto de una llamada, luego de su primer identificador.
    fn call(&mut self, first: Located<Identifier>) -> Parse<Call> {
        let (receiver, name) = if self.is_next(&Token::Period) {
            self.next()?;
            (Some(first), self.id()?)
        } else {
            (None, first)
        };

        self.expect(Token::OpenParen)?;
        let args = self.expr_list()?;
        self.expect(Token::CloseParen)?;

        Ok(Call {
            receiver,
            name,
            args,
        })
    }

    fn expr_list(&mut self) -> Parse<Vec<Located<Expr>>> {
        let mut exprs = Vec::new();
        if self.is_next(&Token::CloseParen) {
            return Ok(exprs);
        }

        exprs.push(self.expr()?);
        while self.is_next(&Token::Comma) {
            self.next()?;
            exprs.push(self.expr()?);
        }

        Ok(exprs)
    }

    fn typ(&mut self) -> Parse<Located<Type>> {
        let (location, token) = self.next()?.split();
        let typ = match token {
            Token::Keyword(Keyword::Int) => Type::Int,
            Token::Keyword(Keyword::Char) => Type::Char,
            Token::Keyword(Keyword::Boolean) => Type::Boolean,
            Token::Id(class) => Type::Class(class),

            found => self.fail(ParserError::ExpectedType(found))?,
        };

        Ok(Located::at(typ, location))
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            found => self.fail(ParserError::ExpectedId(found)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.tokens.next() {
            Some(found) => {
                self.last_known = found.location().clone();

                let found = found.into_inner();
                if found == token {
                    Ok(())
                } else {
                    self.fail(ParserError::UnexpectedToken(token, found))
                }
            }

            None => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn is_next(&mut self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(Located::val)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token)
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    /// Rango desde `start` hasta el último token consumido.
    fn since(&self, start: Location) -> Location {
        Location::span(start, &self.last_known)
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse_text(text: &str) -> Parse<Class> {
        let (start, stream) = source::consume(text.as_bytes(), "Test.jack");
        let tokens = Lexer::new(start.clone(), stream).try_exhaustive().unwrap();

        parse(tokens, start)
    }

    fn body(text: &str) -> Vec<Statement> {
        let class = format!("class Test {{ function void f() {{ {} }} }}", text);
        let mut class = parse_text(&class).unwrap();
        class.subroutines.remove(0).statements
    }

    fn returned(text: &str) -> Expr {
        match body(&format!("return {};", text)).remove(0) {
            Statement::Return(Some(expr)) => expr.into_inner(),
            other => panic!("not a return: {:?}", other),
        }
    }

    #[test]
    fn class_structure() {
        let class = parse_text(
            "class Point {
                field int x, y;
                static Point origin;

                constructor Point new(int ax, int ay) {
                    var int unused;
                    let x = ax;
                    let y = ay;
                    return this;
                }

                method void dispose() { do Memory.deAlloc(this); return; }
            }",
        )
        .unwrap();

        assert_eq!(class.name.as_ref().as_ref(), "Point");
        assert_eq!(class.variables.len(), 2);
        assert_eq!(class.variables[0].kind, ClassVarKind::Field);
        assert_eq!(class.variables[0].names.len(), 2);
        assert_eq!(
            class.variables[1].of.val(),
            &Type::Class(Identifier::from("Point"))
        );

        let new = &class.subroutines[0];
        assert_eq!(new.kind, SubroutineKind::Constructor);
        assert_eq!(new.parameters.len(), 2);
        assert_eq!(new.locals[0].names.len(), 1);
        assert_eq!(new.statements.len(), 3);

        let dispose = &class.subroutines[1];
        assert_eq!(dispose.kind, SubroutineKind::Method);
        assert!(matches!(dispose.statements[0], Statement::Do(_)));
        assert!(matches!(dispose.statements[1], Statement::Return(None)));
    }

    #[test]
    fn return_type_is_checked_but_not_kept() {
        let class = parse_text("class A { function Foo f() { return null; } }").unwrap();
        assert_eq!(class.subroutines[0].name.as_ref().as_ref(), "f");

        let error = parse_text("class A { function 5 f() { return; } }").unwrap_err();
        assert!(matches!(error.val(), ParserError::ExpectedType(Token::IntLiteral(5))));
    }

    #[test]
    fn binary_operators_associate_left() {
        match returned("1 + 2 * 3") {
            Expr::Binary(lhs, BinOp::Mul, rhs) => {
                assert!(matches!(
                    lhs.val(),
                    Expr::Binary(_, BinOp::Add, _)
                ));
                assert!(matches!(rhs.val(), Expr::Integer(3)));
            }

            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn parentheses_and_unary() {
        match returned("-(a & ~b)") {
            Expr::Unary(UnaryOp::Negate, inner) => match inner.val() {
                Expr::Binary(_, BinOp::And, rhs) => {
                    assert!(matches!(rhs.val(), Expr::Unary(UnaryOp::Not, _)))
                }

                other => panic!("unexpected inner: {:?}", other),
            },

            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn term_forms() {
        assert!(matches!(returned("a[i + 1]"), Expr::Index(_, _)));
        assert!(matches!(returned("\"hi\""), Expr::String(_)));
        assert!(matches!(returned("null"), Expr::Null));

        match returned("f(1, x)") {
            Expr::Call(call) => {
                assert!(call.receiver.is_none());
                assert_eq!(call.args.len(), 2);
            }

            other => panic!("unexpected tree: {:?}", other),
        }

        match returned("Math.max(a, b)") {
            Expr::Call(call) => {
                assert_eq!(call.receiver.unwrap().as_ref().as_ref(), "Math");
                assert_eq!(call.name.as_ref().as_ref(), "max");
            }

            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn if_with_and_without_else() {
        let statements = body("if (x) { let y = 1; } if (x) { } else { let y = 2; }");
        assert!(matches!(
            &statements[0],
            Statement::If { otherwise: None, body, .. } if body.len() == 1
        ));
        assert!(matches!(
            &statements[1],
            Statement::If { otherwise: Some(otherwise), .. } if otherwise.len() == 1
        ));
    }

    #[test]
    fn missing_semicolon_is_located() {
        let error = parse_text("class A {\n function void f() {\n let x = 1\n }\n}").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::UnexpectedToken(Token::Semicolon, Token::CloseCurly)
        ));
        assert_eq!(error.location().start().line(), 4);
    }

    #[test]
    fn premature_end() {
        let error = parse_text("class A { function void f() { return;").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::MissingToken(Token::CloseCurly)
        ));

        let error = parse_text("").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::MissingToken(Token::Keyword(Keyword::Class))
        ));
    }

    #[test]
    fn bad_expression_and_trailing_input() {
        let error = parse_text("class A { function int f() { return ; ; } }").unwrap_err();
        assert!(matches!(error.val(), ParserError::UnexpectedToken(Token::CloseCurly, _)));

        let error = parse_text("class A { function int f() { return ); } }").unwrap_err();
        assert!(matches!(error.val(), ParserError::ExpectedExpr(Token::CloseParen)));

        let error = parse_text("class A { } class B { }").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::TrailingInput(Token::Keyword(Keyword::Class))
        ));
    }
}
