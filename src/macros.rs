/// Emite líneas de ensamblador Hack.
///
/// La primera forma escribe una secuencia de líneas fijas, la segunda
/// una sola línea con formato. Ambas propagan errores de E/S con `?`.
macro_rules! emit {
    ($self:expr; $($line:literal)+) => {{
        $(writeln!($self.output, $line)?;)+
    }};

    ($self:expr, $($format:tt)*) => {
        writeln!($self.output, $($format)*)?
    };
}
