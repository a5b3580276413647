//! Convención de llamada y secuencia de arranque.
//!
//! Un marco de llamada consiste de cinco palabras empujadas por `call`,
//! en este orden: dirección de retorno, `LCL`, `ARG`, `THIS` y `THAT` del
//! invocador. El `ARG` del invocado apunta al primer argumento, cinco
//! palabras más los argumentos por debajo de `SP` al momento de llamar.
//! `LCL` del invocado apunta justo después del marco.

use std::io::Write;

use super::{TranslateError, Translator};

/// Dirección inicial de la pila.
pub const STACK_BASE: u16 = 256;

/// Punto de entrada de todo programa.
pub const ENTRY_POINT: &str = "Sys.init";

/// Palabras guardadas en cada marco.
const FRAME_SIZE: u16 = 5;

impl<W: Write> Translator<W> {
    pub(super) fn bootstrap(&mut self) -> Result<(), TranslateError> {
        if self.options.contains(super::TranslateOptions::ANNOTATE) {
            emit!(self; "// bootstrap");
        }

        emit!(self, "@{}", STACK_BASE);
        emit!(self;
            "D=A"
            "@SP"
            "M=D"
        );

        // Sys.init nunca retorna
        self.unit = "Bootstrap".to_owned();
        self.call(ENTRY_POINT, 0)
    }

    /// Etiqueta de entrada y ceros para cada local.
    pub(super) fn function(&mut self, name: &str, locals: u16) -> Result<(), TranslateError> {
        self.function = Some(name.to_owned());
        emit!(self, "({})", name);

        match locals {
            0 => (),

            1 => {
                emit!(self; "D=0");
                self.push_d()?;
            }

            _ => {
                let init = format!("{}$init.{}", name, self.next_label());
                emit!(self, "@{}", locals);
                emit!(self;
                    "D=A"
                    "@R13"
                    "M=D"
                );

                emit!(self, "({})", init);
                emit!(self;
                    "@SP"
                    "A=M"
                    "M=0"
                    "@SP"
                    "M=M+1"
                    "@R13"
                    "MD=M-1"
                );

                emit!(self, "@{}", init);
                emit!(self; "D;JGT");
            }
        }

        Ok(())
    }

    pub(super) fn call(&mut self, name: &str, args: u16) -> Result<(), TranslateError> {
        let k = self.next_label();
        let ret = format!("{}$ret.{}", self.scope(), k);

        emit!(self, "@{}", ret);
        emit!(self; "D=A");
        self.push_d()?;

        for saved in ["LCL", "ARG", "THIS", "THAT"] {
            emit!(self, "@{}", saved);
            emit!(self; "D=M");
            self.push_d()?;
        }

        // ARG = SP - args - 5
        emit!(self; "@SP" "D=M");
        emit!(self, "@{}", u32::from(args) + u32::from(FRAME_SIZE));
        emit!(self;
            "D=D-A"
            "@ARG"
            "M=D"
            "@SP"
            "D=M"
            "@LCL"
            "M=D"
        );

        emit!(self, "@{}", name);
        emit!(self; "0;JMP");
        emit!(self, "({})", ret);

        Ok(())
    }

    /// Restaura el marco del invocador.
    ///
    /// La dirección de retorno se toma antes de escribir el valor de
    /// retorno, ya que con cero argumentos ambos ocupan la misma celda.
    pub(super) fn ret(&mut self) -> Result<(), TranslateError> {
        emit!(self;
            "@LCL"
            "D=M"
            "@R13"
            "M=D"
        );

        emit!(self, "@{}", FRAME_SIZE);
        emit!(self;
            "A=D-A"
            "D=M"
            "@R14"
            "M=D"
        );

        self.pop_d()?;
        emit!(self;
            "@ARG"
            "A=M"
            "M=D"
            "@ARG"
            "D=M+1"
            "@SP"
            "M=D"
        );

        for restored in ["THAT", "THIS", "ARG", "LCL"] {
            emit!(self;
                "@R13"
                "AM=M-1"
                "D=M"
            );

            emit!(self, "@{}", restored);
            emit!(self; "M=D");
        }

        emit!(self;
            "@R14"
            "A=M"
            "0;JMP"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{tests::asm, TranslateOptions};
    use crate::vm::Instruction;

    #[test]
    fn bootstrap_sets_stack_and_calls_entry() {
        let code = asm(TranslateOptions::BOOTSTRAP, &[]);

        assert_eq!(&code[..4], ["@256", "D=A", "@SP", "M=D"]);
        assert_eq!(code[4], "@Bootstrap$ret.0");
        assert!(code.contains(&"@Sys.init".to_owned()));
        assert_eq!(code.last().unwrap(), "(Bootstrap$ret.0)");
    }

    #[test]
    fn return_labels_are_unique_per_call_site() {
        let code = asm(
            TranslateOptions::empty(),
            &[
                Instruction::Function("Main.main".into(), 0),
                Instruction::Call("Math.abs".into(), 1),
                Instruction::Call("Math.abs".into(), 1),
            ],
        );

        assert!(code.contains(&"(Main.main$ret.0)".to_owned()));
        assert!(code.contains(&"(Main.main$ret.1)".to_owned()));
        assert!(code.contains(&"@6".to_owned()));
    }

    #[test]
    fn locals_are_zeroed() {
        let none = asm(
            TranslateOptions::empty(),
            &[Instruction::Function("A.f".into(), 0)],
        );
        assert_eq!(none, ["(A.f)"]);

        let one = asm(
            TranslateOptions::empty(),
            &[Instruction::Function("A.f".into(), 1)],
        );
        assert_eq!(one, ["(A.f)", "D=0", "@SP", "A=M", "M=D", "@SP", "M=M+1"]);

        let many = asm(
            TranslateOptions::empty(),
            &[Instruction::Function("A.f".into(), 3)],
        );
        assert_eq!(&many[..5], ["(A.f)", "@3", "D=A", "@R13", "M=D"]);
        assert!(many.contains(&"(A.f$init.0)".to_owned()));
    }
}
