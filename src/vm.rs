//! Conjunto de instrucciones de la máquina virtual de pila.
//!
//! Este es el contrato entre el compilador y el traductor. La forma textual
//! de cada instrucción (ver [`Instruction`]) es el formato de intercambio
//! entre ambas etapas y debe reproducirse exactamente.

use std::{
    fmt::{self, Display},
    io::{self, BufRead},
    str::FromStr,
};

use thiserror::Error;

use crate::source::{self, Located, Location};

/// Cantidad de registros temporales, `R5` a `R12`.
pub const TEMP_SLOTS: u16 = 8;

/// Cantidad de variables estáticas por unidad, direcciones 16 a 255.
pub const STATIC_SLOTS: u16 = 240;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Constant,
    Local,
    Argument,
    This,
    That,
    Pointer,
    Temp,
    Static,
}

impl Segment {
    pub fn as_str(self) -> &'static str {
        use Segment::*;

        match self {
            Constant => "constant",
            Local => "local",
            Argument => "argument",
            This => "this",
            That => "that",
            Pointer => "pointer",
            Temp => "temp",
            Static => "static",
        }
    }

    /// Determina si el índice cae dentro de la ventana fija del segmento.
    ///
    /// Los segmentos con registro base no tienen límite conocido.
    pub fn accepts(self, index: u16) -> bool {
        match self {
            Segment::Pointer => index < 2,
            Segment::Temp => index < TEMP_SLOTS,
            Segment::Static => index < STATIC_SLOTS,
            Segment::Constant => index <= crate::lex::INT_MAX,
            _ => true,
        }
    }
}

impl Display for Segment {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, ()> {
        use Segment::*;

        let segment = match string {
            "constant" => Constant,
            "local" => Local,
            "argument" => Argument,
            "this" => This,
            "that" => That,
            "pointer" => Pointer,
            "temp" => Temp,
            "static" => Static,
            _ => return Err(()),
        };

        Ok(segment)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Neg,
    Eq,
    Gt,
    Lt,
    And,
    Or,
    Not,
}

impl ArithOp {
    pub fn as_str(self) -> &'static str {
        use ArithOp::*;

        match self {
            Add => "add",
            Sub => "sub",
            Neg => "neg",
            Eq => "eq",
            Gt => "gt",
            Lt => "lt",
            And => "and",
            Or => "or",
            Not => "not",
        }
    }

    /// Operaciones que consumen un solo operando.
    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Neg | ArithOp::Not)
    }
}

impl FromStr for ArithOp {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, ()> {
        use ArithOp::*;

        let op = match string {
            "add" => Add,
            "sub" => Sub,
            "neg" => Neg,
            "eq" => Eq,
            "gt" => Gt,
            "lt" => Lt,
            "and" => And,
            "or" => Or,
            "not" => Not,
            _ => return Err(()),
        };

        Ok(op)
    }
}

/// Una instrucción de máquina virtual.
///
/// ```text
/// add | sub | neg | eq | gt | lt | and | or | not
/// push <segment> <index>
/// pop <segment> <index>
/// label <name>
/// goto <name>
/// if-goto <name>
/// function <name> <locals>
/// call <name> <args>
/// return
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Arithmetic(ArithOp),
    Push(Segment, u16),
    Pop(Segment, u16),
    Label(String),
    Goto(String),
    IfGoto(String),
    Function(String, u16),
    Call(String, u16),
    Return,
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match self {
            Arithmetic(op) => fmt.write_str(op.as_str()),
            Push(segment, index) => write!(fmt, "push {} {}", segment, index),
            Pop(segment, index) => write!(fmt, "pop {} {}", segment, index),
            Label(label) => write!(fmt, "label {}", label),
            Goto(label) => write!(fmt, "goto {}", label),
            IfGoto(label) => write!(fmt, "if-goto {}", label),
            Function(name, locals) => write!(fmt, "function {} {}", name, locals),
            Call(name, args) => write!(fmt, "call {} {}", name, args),
            Return => fmt.write_str("return"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum VmError {
    #[error("I/O error")]
    Input(#[from] io::Error),

    #[error("Invalid command `{0}`")]
    InvalidCommand(String),

    #[error("Unknown segment `{0}` for this command")]
    UnknownSegment(String),

    #[error("Command `{0}` takes {1} operand(s), found {2}")]
    Operands(&'static str, usize, usize),

    #[error("Bad index `{0}`, expected an integer in [0, 32767]")]
    BadIndex(String),

    #[error("Bad symbol `{0}`")]
    BadSymbol(String),
}

/// Lee todas las instrucciones de una unidad.
///
/// Se aborta en el primer error, que se acompaña de su número de línea.
pub fn parse<R, S>(reader: R, name: S) -> Result<Vec<Located<Instruction>>, Located<VmError>>
where
    R: BufRead,
    S: Into<String>,
{
    let (source, lines) = source::lines(reader, name);

    let mut instructions = Vec::new();
    for (index, line) in lines.enumerate() {
        let (line, location) = match line {
            Ok(line) => line,
            Err(error) => {
                let location = Location::line_of(&source, index as u32 + 1);
                return Err(Located::at(VmError::Input(error), location));
            }
        };

        match parse_line(&line) {
            Ok(Some(instruction)) => instructions.push(Located::at(instruction, location)),
            Ok(None) => (),
            Err(error) => return Err(Located::at(error, location)),
        }
    }

    Ok(instructions)
}

/// Clasifica una línea de texto.
///
/// Retorna `None` para líneas vacías o que solo contienen comentarios.
pub fn parse_line(line: &str) -> Result<Option<Instruction>, VmError> {
    let line = match line.find("//") {
        Some(comment) => &line[..comment],
        None => line,
    };

    let mut fields = line.split_whitespace();
    let command = match fields.next() {
        Some(command) => command,
        None => return Ok(None),
    };

    let operands: Vec<&str> = fields.collect();
    let arity = |name: &'static str, expected: usize| {
        if operands.len() == expected {
            Ok(())
        } else {
            Err(VmError::Operands(name, expected, operands.len()))
        }
    };

    let instruction = match command {
        "push" | "pop" => {
            let name = if command == "push" { "push" } else { "pop" };
            arity(name, 2)?;

            let segment: Segment = operands[0]
                .parse()
                .map_err(|()| VmError::UnknownSegment(operands[0].to_owned()))?;

            let index = index(operands[1])?;
            let is_pop = command == "pop";
            if !segment.accepts(index) || (is_pop && segment == Segment::Constant) {
                return Err(VmError::UnknownSegment(format!("{} {}", segment, index)));
            }

            if is_pop {
                Instruction::Pop(segment, index)
            } else {
                Instruction::Push(segment, index)
            }
        }

        "label" => {
            arity("label", 1)?;
            Instruction::Label(symbol(operands[0])?)
        }

        "goto" => {
            arity("goto", 1)?;
            Instruction::Goto(symbol(operands[0])?)
        }

        "if-goto" => {
            arity("if-goto", 1)?;
            Instruction::IfGoto(symbol(operands[0])?)
        }

        "function" => {
            arity("function", 2)?;
            Instruction::Function(symbol(operands[0])?, index(operands[1])?)
        }

        "call" => {
            arity("call", 2)?;
            Instruction::Call(symbol(operands[0])?, index(operands[1])?)
        }

        "return" => {
            arity("return", 0)?;
            Instruction::Return
        }

        other => match other.parse::<ArithOp>() {
            Ok(op) => {
                arity(op.as_str(), 0)?;
                Instruction::Arithmetic(op)
            }

            Err(()) => return Err(VmError::InvalidCommand(other.to_owned())),
        },
    };

    Ok(Some(instruction))
}

/// Determina si un nombre es utilizable como símbolo de ensamblador.
pub fn is_symbol(name: &str) -> bool {
    let valid = |c: char| c.is_ascii_alphanumeric() || "_.$:".contains(c);
    match name.chars().next() {
        Some(first) => !first.is_ascii_digit() && name.chars().all(valid),
        None => false,
    }
}

fn symbol(name: &str) -> Result<String, VmError> {
    if is_symbol(name) {
        Ok(name.to_owned())
    } else {
        Err(VmError::BadSymbol(name.to_owned()))
    }
}

fn index(text: &str) -> Result<u16, VmError> {
    match text.parse::<u16>() {
        Ok(index) if index <= crate::lex::INT_MAX => Ok(index),
        _ => Err(VmError::BadIndex(text.to_owned())),
    }
}
