//! Compilador de Jack para la computadora Hack.
//!
//! # Front end
//! Cada clase de Jack deriva de un único archivo de código fuente.
//! Este archivo se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens. El flujo de tokens se
//! dispone en un árbol sintáctico por medio de análisis sintáctico en
//! [`parse`]. El árbol es procesado por análisis semántico en
//! [`semantic`], de lo cual se genera código para la máquina virtual de
//! pila descrita en [`vm`], con lo cual concluye la primera etapa.
//!
//! # Back end
//! La segunda etapa lee código de máquina virtual, posiblemente de varias
//! unidades, y lo traduce a ensamblador Hack en [`codegen`]. Es aquí donde
//! se fija la convención de llamada y la disposición de segmentos en RAM.
//! Finalmente, [`asm`] convierte el ensamblador en palabras de máquina
//! que [`cpu`] es capaz de ejecutar.

#[macro_use]
mod macros;

pub mod asm;
pub mod codegen;
pub mod cpu;
pub mod error;
pub mod lex;
pub mod parse;
pub mod semantic;
pub mod source;
pub mod vm;
