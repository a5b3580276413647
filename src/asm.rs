//! Ensamblador Hack.
//!
//! Convierte ensamblador simbólico en palabras de máquina de 16 bits. El
//! primer recorrido asigna direcciones de ROM a las etiquetas `(LABEL)`;
//! el segundo resuelve cada `@símbolo` contra los símbolos predefinidos,
//! luego contra las etiquetas y, en última instancia, reserva una nueva
//! variable a partir de la dirección 16.

use std::{
    collections::HashMap,
    fmt::Write as _,
    io::{self, BufRead},
};

use thiserror::Error;

use crate::{
    lex::INT_MAX,
    source::{self, Located, Location},
    vm,
};

/// Primera dirección de RAM disponible para variables.
pub const VARIABLE_BASE: u16 = 16;

/// Las variables no pueden invadir la memoria de pantalla.
pub const VARIABLE_LIMIT: u16 = 16384;

/// Capacidad de la memoria de instrucciones.
pub const ROM_SIZE: usize = 1 << 15;

const PREDEFINED: &[(&str, u16)] = &[
    ("SP", 0),
    ("LCL", 1),
    ("ARG", 2),
    ("THIS", 3),
    ("THAT", 4),
    ("R0", 0),
    ("R1", 1),
    ("R2", 2),
    ("R3", 3),
    ("R4", 4),
    ("R5", 5),
    ("R6", 6),
    ("R7", 7),
    ("R8", 8),
    ("R9", 9),
    ("R10", 10),
    ("R11", 11),
    ("R12", 12),
    ("R13", 13),
    ("R14", 14),
    ("R15", 15),
    ("SCREEN", 16384),
    ("KBD", 24576),
];

/// Bits `a c1 c2 c3 c4 c5 c6` de cada cómputo.
const COMPUTATIONS: &[(&str, u16)] = &[
    ("0", 0b0_101010),
    ("1", 0b0_111111),
    ("-1", 0b0_111010),
    ("D", 0b0_001100),
    ("A", 0b0_110000),
    ("!D", 0b0_001101),
    ("!A", 0b0_110001),
    ("-D", 0b0_001111),
    ("-A", 0b0_110011),
    ("D+1", 0b0_011111),
    ("A+1", 0b0_110111),
    ("D-1", 0b0_001110),
    ("A-1", 0b0_110010),
    ("D+A", 0b0_000010),
    ("D-A", 0b0_010011),
    ("A-D", 0b0_000111),
    ("D&A", 0b0_000000),
    ("D|A", 0b0_010101),
    ("M", 0b1_110000),
    ("!M", 0b1_110001),
    ("-M", 0b1_110011),
    ("M+1", 0b1_110111),
    ("M-1", 0b1_110010),
    ("D+M", 0b1_000010),
    ("D-M", 0b1_010011),
    ("M-D", 0b1_000111),
    ("D&M", 0b1_000000),
    ("D|M", 0b1_010101),
];

const JUMPS: &[&str] = &["JGT", "JEQ", "JGE", "JLT", "JNE", "JLE", "JMP"];

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AsmError {
    #[error("I/O error")]
    Input(#[from] io::Error),

    #[error("Unknown computation `{0}`")]
    BadComp(String),

    #[error("Unknown destination `{0}`")]
    BadDest(String),

    #[error("Unknown jump condition `{0}`")]
    BadJump(String),

    #[error("Address `{0}` is out of range, valid range is [0, 32767]")]
    Overflow(String),

    #[error("Bad symbol `{0}`")]
    BadSymbol(String),

    #[error("Label `{0}` is already defined")]
    Redefinition(String),

    #[error("Program does not fit in ROM")]
    RomOverflow,

    #[error("No RAM left for variable `{0}`, variables must stay below SCREEN")]
    VariableOverflow(String),
}

type Asm<T> = Result<T, Located<AsmError>>;

enum Line {
    Address(Address),
    Label(String),
    Compute(u16),
}

enum Address {
    Literal(u16),
    Symbol(String),
}

/// Ensambla una unidad completa.
pub fn assemble<R, S>(reader: R, name: S) -> Asm<Vec<u16>>
where
    R: BufRead,
    S: Into<String>,
{
    let (source, lines) = source::lines(reader, name);

    let mut parsed = Vec::new();
    for (index, line) in lines.enumerate() {
        let (line, location) = line.map_err(|error| {
            let location = Location::line_of(&source, index as u32 + 1);
            Located::at(AsmError::Input(error), location)
        })?;

        match parse_line(&line) {
            Ok(Some(line)) => parsed.push(Located::at(line, location)),
            Ok(None) => (),
            Err(error) => return Err(Located::at(error, location)),
        }
    }

    let mut symbols: HashMap<String, u16> = PREDEFINED
        .iter()
        .map(|&(symbol, address)| (symbol.to_owned(), address))
        .collect();

    let mut rom_address = 0;
    for line in &parsed {
        match line.as_ref() {
            Line::Label(label) => {
                if symbols.insert(label.clone(), rom_address as u16).is_some() {
                    let error = AsmError::Redefinition(label.clone());
                    return Err(Located::at(error, line.location().clone()));
                }
            }

            _ if rom_address >= ROM_SIZE => {
                return Err(Located::at(AsmError::RomOverflow, line.location().clone()))
            }

            _ => rom_address += 1,
        }
    }

    let mut next_variable = VARIABLE_BASE;
    let mut words = Vec::with_capacity(rom_address);

    for line in parsed {
        let (location, line) = line.split();
        let word = match line {
            Line::Label(_) => continue,
            Line::Compute(word) => word,
            Line::Address(Address::Literal(address)) => address,
            Line::Address(Address::Symbol(symbol)) => match symbols.get(&symbol) {
                Some(&address) => address,
                None if next_variable < VARIABLE_LIMIT => {
                    let address = next_variable;
                    next_variable += 1;

                    symbols.insert(symbol, address);
                    address
                }

                None => return Err(Located::at(AsmError::VariableOverflow(symbol), location)),
            },
        };

        words.push(word);
    }

    Ok(words)
}

/// Formato textual `.hack`: una palabra binaria por línea.
pub fn to_hack(words: &[u16]) -> String {
    let mut text = String::with_capacity(words.len() * 17);
    for word in words {
        // Escribir a un String no falla
        let _ = writeln!(text, "{:016b}", word);
    }

    text
}

fn parse_line(line: &str) -> Result<Option<Line>, AsmError> {
    let line = match line.find("//") {
        Some(comment) => &line[..comment],
        None => line,
    };

    let line: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(value) = line.strip_prefix('@') {
        let address = if value.starts_with(|c: char| c.is_ascii_digit()) {
            match value.parse::<u16>() {
                Ok(address) if address <= INT_MAX => Address::Literal(address),
                _ => return Err(AsmError::Overflow(value.to_owned())),
            }
        } else if vm::is_symbol(value) {
            Address::Symbol(value.to_owned())
        } else {
            return Err(AsmError::BadSymbol(value.to_owned()));
        };

        return Ok(Some(Line::Address(address)));
    }

    if let Some(label) = line.strip_prefix('(') {
        return match label.strip_suffix(')') {
            Some(label) if vm::is_symbol(label) => Ok(Some(Line::Label(label.to_owned()))),
            _ => Err(AsmError::BadSymbol(line.clone())),
        };
    }

    compute(&line).map(|word| Some(Line::Compute(word)))
}

/// Codifica `dest=comp;jump`.
fn compute(line: &str) -> Result<u16, AsmError> {
    let (dest, rest) = match line.split_once('=') {
        Some((dest, rest)) => (Some(dest), rest),
        None => (None, line),
    };

    let (comp, jump) = match rest.split_once(';') {
        Some((comp, jump)) => (comp, Some(jump)),
        None => (rest, None),
    };

    let dest = match dest {
        None => 0,
        Some(dest) => {
            let mut bits = 0;
            for register in dest.chars() {
                let bit = match register {
                    'A' => 0b100,
                    'D' => 0b010,
                    'M' => 0b001,
                    _ => return Err(AsmError::BadDest(dest.to_owned())),
                };

                if bits & bit != 0 {
                    return Err(AsmError::BadDest(dest.to_owned()));
                }

                bits |= bit;
            }

            if bits == 0 {
                return Err(AsmError::BadDest(dest.to_owned()));
            }

            bits
        }
    };

    let jump = match jump {
        None => 0,
        Some(jump) => match JUMPS.iter().position(|&known| known == jump) {
            Some(index) => index as u16 + 1,
            None => return Err(AsmError::BadJump(jump.to_owned())),
        },
    };

    let comp = lookup_comp(comp).ok_or_else(|| AsmError::BadComp(comp.to_owned()))?;
    Ok(0b111 << 13 | comp << 6 | dest << 3 | jump)
}

/// Las operaciones conmutativas se aceptan en cualquier orden.
fn lookup_comp(comp: &str) -> Option<u16> {
    let find = |comp: &str| {
        COMPUTATIONS
            .iter()
            .find(|(known, _)| *known == comp)
            .map(|&(_, bits)| bits)
    };

    find(comp).or_else(|| {
        let (op, index) = comp
            .char_indices()
            .skip(1)
            .find(|(_, c)| "+&|".contains(*c))
            .map(|(index, c)| (c, index))?;

        let (lhs, rhs) = (&comp[..index], &comp[index + 1..]);
        find(&format!("{}{}{}", rhs, op, lhs))
    })
}
