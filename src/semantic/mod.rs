//! Análisis semántico y generación de código de máquina virtual.
//!
//! Se recorre el árbol de una clase resolviendo cada identificador contra
//! las tablas de [`scope`] y se emite, en orden, la secuencia de
//! instrucciones de la unidad.

use std::collections::HashSet;
use thiserror::Error;

use crate::{
    lex::{Identifier, INT_MAX},
    parse::{self, BinOp, Expr, Statement, SubroutineKind, Type, UnaryOp},
    source::{Located, Location},
    vm::{ArithOp, Instruction, Segment},
};

pub mod scope;

use scope::{Kind, Symbol, Symbols};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Cannot index through `{0}`, which is not a variable in scope")]
    UndefinedAllocation(Identifier),

    #[error("Redefinition of `{0}` in the same scope")]
    Redefinition(Identifier),

    #[error("String literal cannot be represented as Hack characters")]
    BadString,
}

impl parse::Class {
    /// Genera las instrucciones de máquina virtual de la clase.
    pub fn compile(&self) -> Semantic<Vec<Instruction>> {
        let mut context = Context {
            class: self.name.as_ref(),
            symbols: Symbols::new(),
            whiles: 0,
            ifs: 0,
            output: Vec::new(),
        };

        for dec in &self.variables {
            for name in &dec.names {
                context
                    .symbols
                    .define(name, dec.of.as_ref().clone(), dec.kind.into())?;
            }
        }

        let mut seen = HashSet::new();
        for subroutine in &self.subroutines {
            if !seen.insert(subroutine.name.as_ref()) {
                return Err(Located::at(
                    SemanticError::Redefinition(subroutine.name.as_ref().clone()),
                    subroutine.name.location().clone(),
                ));
            }

            context.subroutine(subroutine)?;
        }

        Ok(context.output)
    }
}

struct Context<'a> {
    class: &'a Identifier,
    symbols: Symbols,
    whiles: u32,
    ifs: u32,
    output: Vec<Instruction>,
}

impl Context<'_> {
    fn subroutine(&mut self, subroutine: &parse::Subroutine) -> Semantic<()> {
        self.symbols.start_subroutine();

        if subroutine.kind == SubroutineKind::Method {
            let this = Located::at(Identifier::from("this"), subroutine.name.location().clone());
            let class = Type::Class(self.class.clone());
            self.symbols.define(&this, class, Kind::Argument)?;
        }

        for parameter in &subroutine.parameters {
            let typ = parameter.of.as_ref().clone();
            self.symbols.define(&parameter.name, typ, Kind::Argument)?;
        }

        for dec in &subroutine.locals {
            for name in &dec.names {
                self.symbols.define(name, dec.of.as_ref().clone(), Kind::Local)?;
            }
        }

        let name = format!("{}.{}", self.class, subroutine.name.as_ref());
        let locals = self.symbols.var_count(Kind::Local);
        self.emit(Instruction::Function(name, locals));

        match subroutine.kind {
            SubroutineKind::Constructor => {
                let fields = self.symbols.var_count(Kind::Field);
                self.emit(Instruction::Push(Segment::Constant, fields));
                self.emit(Instruction::Call("Memory.alloc".into(), 1));
                self.emit(Instruction::Pop(Segment::Pointer, 0));
            }

            SubroutineKind::Method => {
                self.emit(Instruction::Push(Segment::Argument, 0));
                self.emit(Instruction::Pop(Segment::Pointer, 0));
            }

            SubroutineKind::Function => (),
        }

        self.statements(&subroutine.statements)
    }

    fn statements(&mut self, statements: &[Statement]) -> Semantic<()> {
        statements
            .iter()
            .try_for_each(|statement| self.statement(statement))
    }

    fn statement(&mut self, statement: &Statement) -> Semantic<()> {
        match statement {
            Statement::Let {
                target,
                index: None,
                value,
            } => {
                self.expr(value)?;
                let (segment, index) = self.variable(target)?;
                self.emit(Instruction::Pop(segment, index));
            }

            // La dirección destino se guarda antes de evaluar el lado
            // derecho, que puede a su vez reasignar `pointer 1`
            Statement::Let {
                target,
                index: Some(index),
                value,
            } => {
                self.element_address(target, index)?;
                self.expr(value)?;

                self.emit(Instruction::Pop(Segment::Temp, 0));
                self.emit(Instruction::Pop(Segment::Pointer, 1));
                self.emit(Instruction::Push(Segment::Temp, 0));
                self.emit(Instruction::Pop(Segment::That, 0));
            }

            Statement::If {
                condition,
                body,
                otherwise,
            } => {
                let k = self.ifs;
                self.ifs += 1;

                let if_true = format!("IF_TRUE{}", k);
                let if_false = format!("IF_FALSE{}", k);

                self.expr(condition)?;
                self.emit(Instruction::IfGoto(if_true.clone()));
                self.emit(Instruction::Goto(if_false.clone()));
                self.emit(Instruction::Label(if_true));
                self.statements(body)?;

                match otherwise {
                    Some(otherwise) => {
                        let if_end = format!("IF_END{}", k);

                        self.emit(Instruction::Goto(if_end.clone()));
                        self.emit(Instruction::Label(if_false));
                        self.statements(otherwise)?;
                        self.emit(Instruction::Label(if_end));
                    }

                    None => self.emit(Instruction::Label(if_false)),
                }
            }

            Statement::While { condition, body } => {
                let k = self.whiles;
                self.whiles += 1;

                let start = format!("WHILE_EXP{}", k);
                let end = format!("WHILE_END{}", k);

                self.emit(Instruction::Label(start.clone()));
                self.expr(condition)?;
                self.emit(Instruction::Arithmetic(ArithOp::Not));
                self.emit(Instruction::IfGoto(end.clone()));
                self.statements(body)?;
                self.emit(Instruction::Goto(start));
                self.emit(Instruction::Label(end));
            }

            Statement::Do(call) => {
                self.call(call.as_ref())?;
                self.emit(Instruction::Pop(Segment::Temp, 0));
            }

            Statement::Return(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.emit(Instruction::Push(Segment::Constant, 0)),
                }

                self.emit(Instruction::Return);
            }
        }

        Ok(())
    }

    fn expr(&mut self, expr: &Located<Expr>) -> Semantic<()> {
        match expr.as_ref() {
            Expr::Integer(integer) => self.emit(Instruction::Push(Segment::Constant, *integer)),

            Expr::String(string) => self.string(string, expr.location())?,

            Expr::True => {
                self.emit(Instruction::Push(Segment::Constant, 1));
                self.emit(Instruction::Arithmetic(ArithOp::Neg));
            }

            Expr::False | Expr::Null => self.emit(Instruction::Push(Segment::Constant, 0)),

            Expr::This => self.emit(Instruction::Push(Segment::Pointer, 0)),

            Expr::Var(name) => {
                let (segment, index) = self.variable(name)?;
                self.emit(Instruction::Push(segment, index));
            }

            Expr::Index(name, index) => {
                self.element_address(name, index)?;
                self.emit(Instruction::Pop(Segment::Pointer, 1));
                self.emit(Instruction::Push(Segment::That, 0));
            }

            Expr::Call(call) => self.call(call)?,

            Expr::Unary(op, operand) => {
                self.expr(operand)?;

                let op = match op {
                    UnaryOp::Negate => ArithOp::Neg,
                    UnaryOp::Not => ArithOp::Not,
                };

                self.emit(Instruction::Arithmetic(op));
            }

            Expr::Binary(lhs, op, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)?;

                let op = match op {
                    BinOp::Add => ArithOp::Add,
                    BinOp::Sub => ArithOp::Sub,
                    BinOp::And => ArithOp::And,
                    BinOp::Or => ArithOp::Or,
                    BinOp::Less => ArithOp::Lt,
                    BinOp::Greater => ArithOp::Gt,
                    BinOp::Equal => ArithOp::Eq,

                    BinOp::Mul => {
                        self.emit(Instruction::Call("Math.multiply".into(), 2));
                        return Ok(());
                    }

                    BinOp::Div => {
                        self.emit(Instruction::Call("Math.divide".into(), 2));
                        return Ok(());
                    }
                };

                self.emit(Instruction::Arithmetic(op));
            }
        }

        Ok(())
    }

    fn call(&mut self, call: &parse::Call) -> Semantic<()> {
        let method = call.name.as_ref();

        let (target, implicit) = match &call.receiver {
            None => {
                self.emit(Instruction::Push(Segment::Pointer, 0));
                (format!("{}.{}", self.class, method), 1)
            }

            Some(receiver) => match self.symbols.resolve(receiver.as_ref()) {
                Some(Symbol {
                    typ: Type::Class(class),
                    kind,
                    index,
                }) => {
                    let target = format!("{}.{}", class, method);
                    let receiver = Instruction::Push(kind.segment(), *index);

                    self.emit(receiver);
                    (target, 1)
                }

                // Nombre de clase, o una variable de tipo primitivo
                _ => (format!("{}.{}", receiver.as_ref(), method), 0),
            },
        };

        for arg in &call.args {
            self.expr(arg)?;
        }

        let args = call.args.len() as u16 + implicit;
        self.emit(Instruction::Call(target, args));

        Ok(())
    }

    fn string(&mut self, string: &str, location: &Location) -> Semantic<()> {
        let bad_string = || Located::at(SemanticError::BadString, location.clone());

        let chars = string
            .chars()
            .map(|c| match u16::try_from(u32::from(c)) {
                Ok(c) if c <= INT_MAX => Ok(c),
                _ => Err(bad_string()),
            })
            .collect::<Semantic<Vec<_>>>()?;

        let length = u16::try_from(chars.len())
            .ok()
            .filter(|length| *length <= INT_MAX)
            .ok_or_else(bad_string)?;

        self.emit(Instruction::Push(Segment::Constant, length));
        self.emit(Instruction::Call("String.new".into(), 1));

        for c in chars {
            self.emit(Instruction::Push(Segment::Constant, c));
            self.emit(Instruction::Call("String.appendChar".into(), 2));
        }

        Ok(())
    }

    /// Deja en la pila la dirección de `name[index]`.
    fn element_address(
        &mut self,
        name: &Located<Identifier>,
        index: &Located<Expr>,
    ) -> Semantic<()> {
        let (segment, base) = match self.symbols.resolve(name.as_ref()) {
            Some(symbol) => (symbol.kind.segment(), symbol.index),
            None => {
                return Err(Located::at(
                    SemanticError::UndefinedAllocation(name.as_ref().clone()),
                    name.location().clone(),
                ))
            }
        };

        self.emit(Instruction::Push(segment, base));
        self.expr(index)?;
        self.emit(Instruction::Arithmetic(ArithOp::Add));

        Ok(())
    }

    fn variable(&self, name: &Located<Identifier>) -> Semantic<(Segment, u16)> {
        match self.symbols.resolve(name.as_ref()) {
            Some(symbol) => Ok((symbol.kind.segment(), symbol.index)),
            None => Err(Located::at(
                SemanticError::Undefined(name.as_ref().clone()),
                name.location().clone(),
            )),
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.output.push(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn compile(text: &str) -> Semantic<Vec<Instruction>> {
        let (start, stream) = source::consume(text.as_bytes(), "Test.jack");
        let tokens = Lexer::new(start.clone(), stream).try_exhaustive().unwrap();

        parse::parse(tokens, start).unwrap().compile()
    }

    fn listing(text: &str) -> Vec<String> {
        compile(text)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Cuerpo de `Test.f`, sin la declaración de función.
    fn body(locals: &str, statements: &str) -> Vec<String> {
        let class = format!(
            "class Test {{ function void f() {{ {} {} }} }}",
            locals, statements
        );

        let mut listing = listing(&class);
        listing.remove(0);
        listing
    }

    #[test]
    fn if_else_listing() {
        let code = body(
            "var int x, y;",
            "if (x > 0) { let y = x + 1; } else { let y = 0; }",
        );

        let expected = [
            "push local 0",
            "push constant 0",
            "gt",
            "if-goto IF_TRUE0",
            "goto IF_FALSE0",
            "label IF_TRUE0",
            "push local 0",
            "push constant 1",
            "add",
            "pop local 1",
            "goto IF_END0",
            "label IF_FALSE0",
            "push constant 0",
            "pop local 1",
            "label IF_END0",
        ];

        assert_eq!(code, expected);
    }

    #[test]
    fn if_without_else_still_has_false_label() {
        let code = body("var boolean b;", "if (b) { let b = false; }");
        assert_eq!(
            code,
            [
                "push local 0",
                "if-goto IF_TRUE0",
                "goto IF_FALSE0",
                "label IF_TRUE0",
                "push constant 0",
                "pop local 0",
                "label IF_FALSE0",
            ]
        );
    }

    #[test]
    fn labels_are_never_reused() {
        let code = listing(
            "class Test {
                function void f() {
                    var int i;
                    while (i < 3) { if (i = 1) { let i = i + 1; } let i = i + 1; }
                    if (true) { while (false) { } }
                    return;
                }

                function void g() {
                    while (true) { } if (false) { } else { }
                    return;
                }
            }",
        );

        let labels: Vec<_> = code
            .iter()
            .filter_map(|line| line.strip_prefix("label "))
            .collect();

        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(labels.len(), unique.len());

        let whiles: HashSet<_> = labels.iter().filter(|l| l.starts_with("WHILE_EXP")).collect();
        let ifs: HashSet<_> = labels.iter().filter(|l| l.starts_with("IF_TRUE")).collect();
        assert_eq!(whiles.len(), 3);
        assert_eq!(ifs.len(), 3);
        assert!(labels.contains(&"WHILE_END2"));
        assert!(labels.contains(&"IF_END2"));
    }

    #[test]
    fn while_loop() {
        let code = body("var int i;", "while (i) { let i = i - 1; }");
        assert_eq!(
            code,
            [
                "label WHILE_EXP0",
                "push local 0",
                "not",
                "if-goto WHILE_END0",
                "push local 0",
                "push constant 1",
                "sub",
                "pop local 0",
                "goto WHILE_EXP0",
                "label WHILE_END0",
            ]
        );
    }

    #[test]
    fn constructor_and_method_prologues() {
        let code = listing(
            "class Point {
                field int x, y;
                static int count;

                constructor Point new(int ax) { let x = ax; let count = 1; return this; }
                method int getX() { return x; }
            }",
        );

        assert_eq!(
            code,
            [
                "function Point.new 0",
                "push constant 2",
                "call Memory.alloc 1",
                "pop pointer 0",
                "push argument 0",
                "pop this 0",
                "push constant 1",
                "pop static 0",
                "push pointer 0",
                "return",
                "function Point.getX 0",
                "push argument 0",
                "pop pointer 0",
                "push this 0",
                "return",
            ]
        );
    }

    #[test]
    fn method_arguments_start_after_this() {
        let code = listing("class A { method int f(int a, int b) { return b; } }");
        assert_eq!(code[3], "push argument 2");
    }

    #[test]
    fn call_classification() {
        let code = listing(
            "class Game {
                field Ball ball;
                method void run() {
                    var int n;
                    do move(1);
                    do ball.bounce(n);
                    do Output.printInt(n);
                    return;
                }
            }",
        );

        assert_eq!(
            &code[3..],
            [
                "push pointer 0",
                "push constant 1",
                "call Game.move 2",
                "pop temp 0",
                "push this 0",
                "push local 0",
                "call Ball.bounce 2",
                "pop temp 0",
                "push local 0",
                "call Output.printInt 1",
                "pop temp 0",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn array_store_stashes_address() {
        let code = body("var Array a, b;", "let a[1] = b[2];");
        assert_eq!(
            code,
            [
                "push local 0",
                "push constant 1",
                "add",
                "push local 1",
                "push constant 2",
                "add",
                "pop pointer 1",
                "push that 0",
                "pop temp 0",
                "pop pointer 1",
                "push temp 0",
                "pop that 0",
            ]
        );
    }

    #[test]
    fn literals_and_operators() {
        let code = body("var int x;", "let x = -(2 * 3) / ~true; let x = \"Hi\"; let x = null;");
        assert_eq!(
            code,
            [
                "push constant 2",
                "push constant 3",
                "call Math.multiply 2",
                "neg",
                "push constant 1",
                "neg",
                "not",
                "call Math.divide 2",
                "pop local 0",
                "push constant 2",
                "call String.new 1",
                "push constant 72",
                "call String.appendChar 2",
                "push constant 105",
                "call String.appendChar 2",
                "pop local 0",
                "push constant 0",
                "pop local 0",
            ]
        );
    }

    #[test]
    fn unresolved_names() {
        let error = compile("class A { function void f() { let x = 1; return; } }").unwrap_err();
        assert!(matches!(error.val(), SemanticError::Undefined(id) if id.as_ref() == "x"));

        let error = compile("class A { function int f() { return y; } }").unwrap_err();
        assert!(matches!(error.val(), SemanticError::Undefined(_)));

        let error = compile("class A { function int f() { return arr[0]; } }").unwrap_err();
        assert!(matches!(error.val(), SemanticError::UndefinedAllocation(_)));

        let error = compile("class A { function void f() { let arr[0] = 1; return; } }").unwrap_err();
        assert!(matches!(error.val(), SemanticError::UndefinedAllocation(_)));
    }

    #[test]
    fn redefinitions() {
        let error = compile("class A { field int x; static int x; }").unwrap_err();
        assert!(matches!(error.val(), SemanticError::Redefinition(_)));

        let error = compile("class A { function void f() { return; } method void f() { return; } }")
            .unwrap_err();
        assert!(matches!(error.val(), SemanticError::Redefinition(id) if id.as_ref() == "f"));
    }
}
