//! Tablas de símbolos.

use std::collections::HashMap;

use super::{Semantic, SemanticError};
use crate::{
    lex::Identifier,
    parse::{ClassVarKind, Type},
    source::Located,
    vm::Segment,
};

/// Alcance de un símbolo.
///
/// La búsqueda siempre recorre primero el alcance de subrutina y
/// luego el de clase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Class,
    Subroutine,
}

/// Tipo de almacenamiento de una variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Static,
    Field,
    Argument,
    Local,
}

impl Kind {
    /// Alcance al que pertenece toda variable de este tipo.
    pub fn scope(self) -> Scope {
        match self {
            Kind::Static | Kind::Field => Scope::Class,
            Kind::Argument | Kind::Local => Scope::Subroutine,
        }
    }

    /// Segmento de máquina virtual en el que residen estas variables.
    pub fn segment(self) -> Segment {
        match self {
            Kind::Static => Segment::Static,
            Kind::Field => Segment::This,
            Kind::Argument => Segment::Argument,
            Kind::Local => Segment::Local,
        }
    }
}

impl From<ClassVarKind> for Kind {
    fn from(kind: ClassVarKind) -> Self {
        match kind {
            ClassVarKind::Static => Kind::Static,
            ClassVarKind::Field => Kind::Field,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub typ: Type,
    pub kind: Kind,
    pub index: u16,
}

#[derive(Default)]
struct Table {
    symbols: HashMap<Identifier, Symbol>,
    counts: [u16; 2],
}

impl Table {
    fn clear(&mut self) {
        self.symbols.clear();
        self.counts = [0; 2];
    }
}

/// Par de tablas de una unidad de compilación.
#[derive(Default)]
pub struct Symbols {
    class: Table,
    subroutine: Table,
}

impl Symbols {
    pub fn new() -> Self {
        Default::default()
    }

    /// Define una variable en el alcance que corresponde a su tipo.
    ///
    /// El índice asignado es el siguiente disponible entre las variables
    /// del mismo tipo, comenzando en 0.
    pub fn define(&mut self, name: &Located<Identifier>, typ: Type, kind: Kind) -> Semantic<u16> {
        let table = self.table_mut(kind.scope());
        if table.symbols.contains_key(name.as_ref()) {
            return Err(Located::at(
                SemanticError::Redefinition(name.as_ref().clone()),
                name.location().clone(),
            ));
        }

        let index = table.counts[slot(kind)];
        table.counts[slot(kind)] += 1;

        table
            .symbols
            .insert(name.as_ref().clone(), Symbol { typ, kind, index });

        Ok(index)
    }

    /// Resuelve un nombre, primero en subrutina y luego en clase.
    pub fn resolve(&self, name: &Identifier) -> Option<&Symbol> {
        [Scope::Subroutine, Scope::Class]
            .into_iter()
            .find_map(|scope| self.table(scope).symbols.get(name))
    }

    /// Cantidad de variables de un tipo ya definidas en su alcance.
    pub fn var_count(&self, kind: Kind) -> u16 {
        self.table(kind.scope()).counts[slot(kind)]
    }

    /// Descarta argumentos y variables locales de la subrutina anterior.
    pub fn start_subroutine(&mut self) {
        self.subroutine.clear();
    }

    fn table(&self, scope: Scope) -> &Table {
        match scope {
            Scope::Class => &self.class,
            Scope::Subroutine => &self.subroutine,
        }
    }

    fn table_mut(&mut self, scope: Scope) -> &mut Table {
        match scope {
            Scope::Class => &mut self.class,
            Scope::Subroutine => &mut self.subroutine,
        }
    }
}

fn slot(kind: Kind) -> usize {
    match kind {
        Kind::Static | Kind::Argument => 0,
        Kind::Field | Kind::Local => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn name(id: &str) -> Located<Identifier> {
        let (start, _) = source::consume(id.as_bytes(), "Test.jack");
        Located::at(Identifier::from(id), start)
    }

    #[test]
    fn define_then_resolve() {
        let mut symbols = Symbols::new();
        let point = Type::Class(Identifier::from("Point"));

        assert_eq!(symbols.define(&name("p"), point.clone(), Kind::Field).unwrap(), 0);
        assert_eq!(
            symbols.resolve(&Identifier::from("p")),
            Some(&Symbol {
                typ: point,
                kind: Kind::Field,
                index: 0
            })
        );

        assert!(symbols.resolve(&Identifier::from("q")).is_none());
    }

    #[test]
    fn indices_increase_per_kind() {
        let mut symbols = Symbols::new();

        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let index = symbols.define(&name(id), Type::Int, Kind::Local).unwrap();
            assert_eq!(index as usize, i);
        }

        assert_eq!(symbols.define(&name("x"), Type::Int, Kind::Argument).unwrap(), 0);
        assert_eq!(symbols.define(&name("s"), Type::Int, Kind::Static).unwrap(), 0);
        assert_eq!(symbols.define(&name("t"), Type::Int, Kind::Static).unwrap(), 1);
        assert_eq!(symbols.define(&name("f"), Type::Int, Kind::Field).unwrap(), 0);

        assert_eq!(symbols.var_count(Kind::Local), 3);
        assert_eq!(symbols.var_count(Kind::Argument), 1);
        assert_eq!(symbols.var_count(Kind::Static), 2);
        assert_eq!(symbols.var_count(Kind::Field), 1);
    }

    #[test]
    fn subroutine_reset_keeps_class_scope() {
        let mut symbols = Symbols::new();
        symbols.define(&name("count"), Type::Int, Kind::Static).unwrap();
        symbols.define(&name("x"), Type::Int, Kind::Argument).unwrap();
        symbols.define(&name("y"), Type::Int, Kind::Local).unwrap();

        symbols.start_subroutine();

        assert!(symbols.resolve(&Identifier::from("x")).is_none());
        assert!(symbols.resolve(&Identifier::from("y")).is_none());
        assert_eq!(symbols.var_count(Kind::Argument), 0);
        assert_eq!(symbols.var_count(Kind::Local), 0);
        assert_eq!(symbols.var_count(Kind::Static), 1);

        assert_eq!(symbols.define(&name("z"), Type::Int, Kind::Local).unwrap(), 0);
    }

    #[test]
    fn subroutine_scope_shadows_class_scope() {
        let mut symbols = Symbols::new();
        symbols.define(&name("x"), Type::Int, Kind::Field).unwrap();
        symbols.define(&name("x"), Type::Boolean, Kind::Local).unwrap();

        let x = symbols.resolve(&Identifier::from("x")).unwrap();
        assert_eq!(x.kind, Kind::Local);
        assert_eq!(x.typ, Type::Boolean);
    }

    #[test]
    fn redefinition_in_same_scope() {
        let mut symbols = Symbols::new();
        symbols.define(&name("x"), Type::Int, Kind::Argument).unwrap();

        let error = symbols.define(&name("x"), Type::Int, Kind::Local).unwrap_err();
        assert!(matches!(error.val(), SemanticError::Redefinition(id) if id.as_ref() == "x"));
        assert_eq!(symbols.var_count(Kind::Local), 0);
    }
}
