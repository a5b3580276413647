//! Emulador de la CPU Hack.
//!
//! Ejecuta palabras producidas por [`asm`](crate::asm) sobre 32K de ROM y
//! 32K de RAM, con los registros `A`, `D` y `PC`. Las escrituras a `M`
//! usan el valor previo de `A`, al igual que los saltos.

pub const RAM_SIZE: usize = 1 << 15;

pub struct Cpu {
    rom: Vec<u16>,
    ram: Box<[u16]>,
    a: u16,
    d: u16,
    pc: u16,
}

impl Cpu {
    pub fn new(rom: Vec<u16>) -> Self {
        Cpu {
            rom,
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            a: 0,
            d: 0,
            pc: 0,
        }
    }

    /// Ejecuta una instrucción.
    ///
    /// Retorna `false` si el programa se detuvo, ya sea porque `PC` salió
    /// de la ROM o porque se encontró un ciclo incondicional sobre sí mismo,
    /// la forma usual de terminar un programa Hack.
    pub fn step(&mut self) -> bool {
        let instruction = match self.rom.get(self.pc as usize) {
            Some(&instruction) => instruction,
            None => return false,
        };

        if instruction & 0x8000 == 0 {
            self.a = instruction;
            self.pc += 1;
            return true;
        }

        let address = self.a;
        let y = if instruction & 0x1000 != 0 {
            self.peek(address)
        } else {
            address
        };

        let out = alu(self.d, y, (instruction >> 6) & 0x3f);

        let dest = (instruction >> 3) & 0b111;
        if dest & 0b001 != 0 {
            self.poke(address, out);
        }

        if dest & 0b100 != 0 {
            self.a = out;
        }

        if dest & 0b010 != 0 {
            self.d = out;
        }

        let negative = (out as i16) < 0;
        let zero = out == 0;
        let jump = instruction & 0b111;

        let taken = (jump & 0b100 != 0 && negative)
            || (jump & 0b010 != 0 && zero)
            || (jump & 0b001 != 0 && !negative && !zero);

        if !taken {
            self.pc += 1;
            return true;
        }

        // `(END) @END 0;JMP`
        let spins = address == self.pc
            || (address.wrapping_add(1) == self.pc
                && self.rom.get(address as usize) == Some(&address));

        let halted = jump == 0b111 && spins;
        self.pc = address;

        !halted
    }

    /// Ejecuta hasta detenerse o agotar `cycles` instrucciones.
    ///
    /// Retorna la cantidad de instrucciones ejecutadas.
    pub fn run(&mut self, cycles: u64) -> u64 {
        let mut executed = 0;
        while executed < cycles && self.step() {
            executed += 1;
        }

        executed
    }

    pub fn peek(&self, address: u16) -> u16 {
        self.ram[address as usize % RAM_SIZE]
    }

    pub fn poke(&mut self, address: u16, value: u16) {
        self.ram[address as usize % RAM_SIZE] = value;
    }

    pub fn ram(&self) -> &[u16] {
        &self.ram
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }
}

/// Bits de control `zx nx zy ny f no`.
fn alu(x: u16, y: u16, control: u16) -> u16 {
    let x = if control & 0b100000 != 0 { 0 } else { x };
    let x = if control & 0b010000 != 0 { !x } else { x };
    let y = if control & 0b001000 != 0 { 0 } else { y };
    let y = if control & 0b000100 != 0 { !y } else { y };

    let out = if control & 0b000010 != 0 {
        x.wrapping_add(y)
    } else {
        x & y
    };

    if control & 0b000001 != 0 {
        !out
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    fn cpu(text: &str) -> Cpu {
        Cpu::new(asm::assemble(text.as_bytes(), "Test.asm").unwrap())
    }

    #[test]
    fn alu_table() {
        let (x, y) = (5, 3);
        assert_eq!(alu(x, y, 0b101010), 0);
        assert_eq!(alu(x, y, 0b111111), 1);
        assert_eq!(alu(x, y, 0b111010), u16::MAX);
        assert_eq!(alu(x, y, 0b000010), 8);
        assert_eq!(alu(x, y, 0b010011), 2);
        assert_eq!(alu(x, y, 0b000111), (-2i16) as u16);
        assert_eq!(alu(x, y, 0b000000), 1);
        assert_eq!(alu(x, y, 0b010101), 7);
        assert_eq!(alu(x, y, 0b001111), (-5i16) as u16);
    }

    #[test]
    fn runs_until_halt() {
        let mut cpu = cpu(
            "@6
            D=A
            @7
            D=D+A
            @R0
            M=D
            (END)
            @END
            0;JMP",
        );

        let executed = cpu.run(1000);
        assert_eq!(cpu.peek(0), 13);
        assert_eq!(executed, 7);
        assert_eq!(cpu.pc(), 6);
    }

    #[test]
    fn conditional_loop() {
        // R1 = R0 * 3 por sumas repetidas
        let mut cpu = cpu(
            "@3
            D=A
            @R2
            M=D
            (LOOP)
            @R2
            D=M
            @END
            D;JEQ
            @R0
            D=M
            @R1
            M=D+M
            @R2
            M=M-1
            @LOOP
            0;JMP
            (END)
            @END
            0;JMP",
        );

        cpu.poke(0, 14);
        cpu.run(10_000);
        assert_eq!(cpu.peek(1), 42);
        assert_eq!(cpu.peek(2), 0);
    }

    #[test]
    fn stops_outside_rom() {
        let mut cpu = cpu("@1\nD=A");
        assert_eq!(cpu.run(100), 2);
        assert!(!cpu.step());
    }
}
