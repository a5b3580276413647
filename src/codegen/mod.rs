//! Traducción de máquina virtual a ensamblador Hack.
//!
//! Cada instrucción de [`vm`](crate::vm) se expande a una plantilla fija.
//! Todas las plantillas operan sobre el puntero de pila `SP` y los cuatro
//! registros base `LCL`, `ARG`, `THIS` y `THAT`. `R13` y `R14` son
//! registros de trabajo, nunca se preservan entre instrucciones.
//!
//! Las etiquetas de comparación y las direcciones de retorno se derivan de
//! un único contador global, por lo cual un mismo [`Translator`] debe
//! escribir el programa completo.

use std::io::{self, Write};

use bitflags::bitflags;
use thiserror::Error;

use crate::{
    source::Located,
    vm::{ArithOp, Instruction},
};

mod frame;
mod memory;

bitflags! {
    /// Opciones de traducción.
    pub struct TranslateOptions: u32 {
        /// Emitir la secuencia de arranque antes del programa.
        ///
        /// Sin ella el programa inicia en la primera instrucción de la
        /// primera unidad, con `SP` sin inicializar.
        const BOOTSTRAP = 0x01;

        /// Preceder cada plantilla con la instrucción original como comentario.
        const ANNOTATE = 0x02;
    }
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions::BOOTSTRAP
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Unknown segment for this command: `{0}`")]
    UnknownSegment(String),
}

pub struct Translator<W: Write> {
    output: W,
    options: TranslateOptions,
    unit: String,
    function: Option<String>,
    labels: u32,
}

impl<W: Write> Translator<W> {
    /// Inicia la traducción de un programa.
    ///
    /// La secuencia de arranque se emite aquí si así lo indican las opciones.
    pub fn new(output: W, options: TranslateOptions) -> Result<Self, TranslateError> {
        let mut translator = Translator {
            output,
            options,
            unit: String::new(),
            function: None,
            labels: 0,
        };

        if options.contains(TranslateOptions::BOOTSTRAP) {
            translator.bootstrap()?;
        }

        Ok(translator)
    }

    /// Traduce todas las instrucciones de una unidad.
    ///
    /// `name` es el nombre de archivo de la unidad sin extensión. Define el
    /// espacio de variables estáticas hasta la primera declaración de función.
    pub fn unit(
        &mut self,
        name: &str,
        instructions: &[Located<Instruction>],
    ) -> Result<(), Located<TranslateError>> {
        self.unit = name.to_owned();
        self.function = None;

        for instruction in instructions {
            self.translate(instruction.val())
                .map_err(|error| Located::at(error, instruction.location().clone()))?;
        }

        Ok(())
    }

    pub fn translate(&mut self, instruction: &Instruction) -> Result<(), TranslateError> {
        use Instruction::*;

        if self.options.contains(TranslateOptions::ANNOTATE) {
            emit!(self, "// {}", instruction);
        }

        match instruction {
            Arithmetic(op) => self.arithmetic(*op)?,
            Push(segment, index) => self.push(*segment, *index)?,
            Pop(segment, index) => self.pop(*segment, *index)?,

            Label(label) => {
                let label = self.local_label(label);
                emit!(self, "({})", label);
            }

            Goto(label) => {
                let label = self.local_label(label);
                emit!(self, "@{}", label);
                emit!(self; "0;JMP");
            }

            IfGoto(label) => {
                let label = self.local_label(label);
                emit!(self;
                    "@SP"
                    "AM=M-1"
                    "D=M"
                );

                emit!(self, "@{}", label);
                emit!(self; "D;JNE");
            }

            Function(name, locals) => self.function(name, *locals)?,
            Call(name, args) => self.call(name, *args)?,
            Return => self.ret()?,
        }

        Ok(())
    }

    /// Concluye la traducción y retorna la salida.
    pub fn finish(mut self) -> Result<W, TranslateError> {
        self.output.flush()?;
        Ok(self.output)
    }

    fn arithmetic(&mut self, op: ArithOp) -> Result<(), TranslateError> {
        use ArithOp::*;

        match op {
            Neg => self.unary("M=-M"),
            Not => self.unary("M=!M"),
            Add => self.binary("M=D+M"),
            Sub => self.binary("M=M-D"),
            And => self.binary("M=D&M"),
            Or => self.binary("M=D|M"),
            Eq => self.compare("JEQ", false),
            Gt => self.compare("JGT", true),
            Lt => self.compare("JLT", true),
        }
    }

    fn unary(&mut self, operation: &str) -> Result<(), TranslateError> {
        emit!(self;
            "@SP"
            "A=M-1"
        );

        emit!(self, "{}", operation);
        Ok(())
    }

    /// Deja el operando derecho en `D` y direcciona el izquierdo con `A`.
    fn binary(&mut self, operation: &str) -> Result<(), TranslateError> {
        emit!(self;
            "@SP"
            "AM=M-1"
            "D=M"
            "A=A-1"
        );

        emit!(self, "{}", operation);
        Ok(())
    }

    // Verdadero es -1, falso es 0
    fn compare(&mut self, jump: &str, ordered: bool) -> Result<(), TranslateError> {
        let n = self.next_label();

        // La resta con desborde sigue siendo cero solo si son iguales
        if ordered {
            self.difference_sign(n)?;
        } else {
            self.binary("D=M-D")?;
        }

        emit!(self, "@CMP_TRUE.{}", n);
        emit!(self, "D;{}", jump);
        emit!(self;
            "@SP"
            "A=M-1"
            "M=0"
        );

        emit!(self, "@CMP_END.{}", n);
        emit!(self; "0;JMP");
        emit!(self, "(CMP_TRUE.{})", n);
        emit!(self;
            "@SP"
            "A=M-1"
            "M=-1"
        );

        emit!(self, "(CMP_END.{})", n);
        Ok(())
    }

    /// Deja en `D` un valor con el signo de `x - y`, sin desborde.
    ///
    /// `x` queda en `R13` y `y` en `R14`. Solo se resta si ambos tienen el
    /// mismo signo; de lo contrario el signo de `x` decide.
    fn difference_sign(&mut self, n: u32) -> Result<(), TranslateError> {
        emit!(self;
            "@SP"
            "AM=M-1"
            "D=M"
            "@R14"
            "M=D"
            "@SP"
            "A=M-1"
            "D=M"
            "@R13"
            "M=D"
        );

        emit!(self, "@CMP_XNEG.{}", n);
        emit!(self; "D;JLT");

        // x >= 0
        emit!(self; "@R14" "D=M");
        emit!(self, "@CMP_SAME.{}", n);
        emit!(self; "D;JGE" "D=1");
        emit!(self, "@CMP_SIGN.{}", n);
        emit!(self; "0;JMP");

        // x < 0
        emit!(self, "(CMP_XNEG.{})", n);
        emit!(self; "@R14" "D=M");
        emit!(self, "@CMP_SAME.{}", n);
        emit!(self; "D;JLT" "D=-1");
        emit!(self, "@CMP_SIGN.{}", n);
        emit!(self; "0;JMP");

        emit!(self, "(CMP_SAME.{})", n);
        emit!(self;
            "@R14"
            "D=M"
            "@R13"
            "D=M-D"
        );

        emit!(self, "(CMP_SIGN.{})", n);
        Ok(())
    }

    /// Nombre de la función en curso, o de la unidad fuera de toda función.
    fn scope(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.unit)
    }

    /// Prefijo de archivo para variables estáticas.
    fn file(&self) -> &str {
        match &self.function {
            Some(function) => function.split('.').next().unwrap_or(function),
            None => &self.unit,
        }
    }

    fn local_label(&self, label: &str) -> String {
        format!("{}${}", self.scope(), label)
    }

    fn next_label(&mut self) -> u32 {
        let label = self.labels;
        self.labels += 1;
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Segment;

    pub(super) fn asm(options: TranslateOptions, instructions: &[Instruction]) -> Vec<String> {
        let mut translator = Translator::new(Vec::new(), options).unwrap();
        for instruction in instructions {
            translator.translate(instruction).unwrap();
        }

        let output = String::from_utf8(translator.finish().unwrap()).unwrap();
        output.lines().map(str::to_owned).collect()
    }

    #[test]
    fn binary_arithmetic_uses_top_of_stack() {
        let code = asm(
            TranslateOptions::empty(),
            &[Instruction::Arithmetic(ArithOp::Sub)],
        );

        assert_eq!(code, ["@SP", "AM=M-1", "D=M", "A=A-1", "M=M-D"]);
    }

    #[test]
    fn comparison_labels_are_global() {
        let code = asm(
            TranslateOptions::empty(),
            &[
                Instruction::Arithmetic(ArithOp::Eq),
                Instruction::Function("A.f".into(), 0),
                Instruction::Arithmetic(ArithOp::Lt),
            ],
        );

        assert!(code.contains(&"(CMP_TRUE.0)".to_owned()));
        assert!(code.contains(&"(CMP_END.0)".to_owned()));
        assert!(code.contains(&"(CMP_TRUE.1)".to_owned()));
        assert!(code.contains(&"D;JLT".to_owned()));
    }

    #[test]
    fn ordered_comparisons_at_the_extremes() {
        use crate::{asm, cpu::Cpu};

        let max = Instruction::Push(Segment::Constant, 32767);
        let cases = [
            (32767, -1, ArithOp::Gt, -1),
            (-1, 32767, ArithOp::Gt, 0),
            (-2, 32767, ArithOp::Lt, -1),
            (32767, -2, ArithOp::Lt, 0),
            (-32768, 1, ArithOp::Lt, -1),
            (1, -32768, ArithOp::Gt, -1),
            (-5, -3, ArithOp::Lt, -1),
            (5, 3, ArithOp::Gt, -1),
            (3, 3, ArithOp::Gt, 0),
        ];

        for (x, y, op, expected) in cases {
            let mut code = Vec::new();
            for value in [x, y] {
                // Las constantes son no negativas, el resto se construye
                match value {
                    -32768 => code.extend([
                        max.clone(),
                        Instruction::Arithmetic(ArithOp::Neg),
                        Instruction::Push(Segment::Constant, 1),
                        Instruction::Arithmetic(ArithOp::Sub),
                    ]),

                    value if value < 0 => code.extend([
                        Instruction::Push(Segment::Constant, -value as u16),
                        Instruction::Arithmetic(ArithOp::Neg),
                    ]),

                    value => code.push(Instruction::Push(Segment::Constant, value as u16)),
                }
            }

            code.push(Instruction::Arithmetic(op));

            let text = asm(TranslateOptions::empty(), &code).join("\n");
            let mut cpu = Cpu::new(asm::assemble(text.as_bytes(), "Cmp.asm").unwrap());
            cpu.poke(0, 256);
            cpu.run(1000);

            assert_eq!(cpu.peek(0), 257);
            assert_eq!(cpu.peek(256) as i16, expected, "{} {} {}", x, op.as_str(), y);
        }
    }

    #[test]
    fn branch_labels_are_function_scoped() {
        let code = asm(
            TranslateOptions::empty(),
            &[
                Instruction::Function("Main.loop".into(), 0),
                Instruction::Label("TOP".into()),
                Instruction::IfGoto("TOP".into()),
                Instruction::Goto("TOP".into()),
            ],
        );

        assert_eq!(
            code,
            [
                "(Main.loop)",
                "(Main.loop$TOP)",
                "@SP",
                "AM=M-1",
                "D=M",
                "@Main.loop$TOP",
                "D;JNE",
                "@Main.loop$TOP",
                "0;JMP",
            ]
        );
    }

    #[test]
    fn annotations_precede_templates() {
        let code = asm(
            TranslateOptions::ANNOTATE,
            &[Instruction::Push(Segment::Constant, 7)],
        );

        assert_eq!(code[0], "// push constant 7");
        assert_eq!(code[1], "@7");
    }

    #[test]
    fn errors_are_located() {
        use crate::source;

        let (_, lines) = source::lines("pop temp 9\n".as_bytes(), "Bad.vm");
        let location = lines.map(Result::unwrap).next().unwrap().1;

        let instructions = [Located::at(Instruction::Pop(Segment::Temp, 9), location)];
        let mut translator = Translator::new(Vec::new(), TranslateOptions::empty()).unwrap();

        let error = translator.unit("Bad", &instructions).unwrap_err();
        assert!(matches!(error.val(), TranslateError::UnknownSegment(_)));
        assert_eq!(error.location().to_string(), "Bad.vm:1:1");
    }
}
