//! Direccionamiento de segmentos.

use std::io::Write;

use super::{TranslateError, Translator};
use crate::vm::Segment;

/// Primer registro del segmento `temp`.
const TEMP_BASE: u16 = 5;

/// Forma de acceso a la celda `segment[index]`.
enum Address {
    /// Registro base más desplazamiento.
    Based(&'static str),

    /// Símbolo fijo, sin indirección.
    Direct(String),
}

impl<W: Write> Translator<W> {
    pub(super) fn push(&mut self, segment: Segment, index: u16) -> Result<(), TranslateError> {
        if segment == Segment::Constant && segment.accepts(index) {
            emit!(self, "@{}", index);
            emit!(self; "D=A");
            return self.push_d();
        }

        match self.address(segment, index)? {
            Address::Based(base) => {
                emit!(self, "@{}", index);
                emit!(self; "D=A");
                emit!(self, "@{}", base);
                emit!(self;
                    "A=D+M"
                    "D=M"
                );
            }

            Address::Direct(symbol) => {
                emit!(self, "@{}", symbol);
                emit!(self; "D=M");
            }
        }

        self.push_d()
    }

    pub(super) fn pop(&mut self, segment: Segment, index: u16) -> Result<(), TranslateError> {
        match self.address(segment, index)? {
            // La dirección destino se calcula antes de retirar el valor
            Address::Based(base) => {
                emit!(self, "@{}", index);
                emit!(self; "D=A");
                emit!(self, "@{}", base);
                emit!(self;
                    "D=D+M"
                    "@R13"
                    "M=D"
                );

                self.pop_d()?;
                emit!(self;
                    "@R13"
                    "A=M"
                    "M=D"
                );
            }

            Address::Direct(symbol) => {
                self.pop_d()?;
                emit!(self, "@{}", symbol);
                emit!(self; "M=D");
            }
        }

        Ok(())
    }

    /// Empuja el contenido de `D`.
    pub(super) fn push_d(&mut self) -> Result<(), TranslateError> {
        emit!(self;
            "@SP"
            "A=M"
            "M=D"
            "@SP"
            "M=M+1"
        );

        Ok(())
    }

    /// Retira el tope de la pila hacia `D`.
    pub(super) fn pop_d(&mut self) -> Result<(), TranslateError> {
        emit!(self;
            "@SP"
            "AM=M-1"
            "D=M"
        );

        Ok(())
    }

    fn address(&self, segment: Segment, index: u16) -> Result<Address, TranslateError> {
        if !segment.accepts(index) {
            return Err(TranslateError::UnknownSegment(format!("{} {}", segment, index)));
        }

        let address = match segment {
            Segment::Local => Address::Based("LCL"),
            Segment::Argument => Address::Based("ARG"),
            Segment::This => Address::Based("THIS"),
            Segment::That => Address::Based("THAT"),

            Segment::Pointer if index == 0 => Address::Direct("THIS".to_owned()),
            Segment::Pointer => Address::Direct("THAT".to_owned()),
            Segment::Temp => Address::Direct(format!("R{}", TEMP_BASE + index)),
            Segment::Static => Address::Direct(format!("{}.{}", self.file(), index)),

            // Una constante no tiene dirección, solo se puede empujar
            Segment::Constant => {
                return Err(TranslateError::UnknownSegment(format!("{} {}", segment, index)))
            }
        };

        Ok(address)
    }
}
