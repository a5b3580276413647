//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios se descartan durante esta operación. Cada
//! token emitido esta asociado a una ubicación en el código fuente original,
//! lo cual permite rastrear errores en tanto los mismos como constructos
//! más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Los símbolos y las palabras clave se identifican por lo que son y no
//! incluyen lexemas. Los identificadores y las constantes de texto sí
//! incluyen su lexema original, y las constantes enteras se resuelven a su
//! valor.
//!
//! # Reglas importantes del lenguaje
//! - Los comentarios de bloque (`/* ... */` y `/** ... */`) pueden
//!   abarcar varias líneas. Los comentarios de línea (`//`) descartan
//!   el resto de la línea.
//! - Los símbolos son siempre tokens de un solo carácter, aunque estén
//!   pegados a otros tokens (`x);` se separa en `x`, `)`, `;`).
//! - Las constantes de texto no admiten secuencias de escape ni saltos
//!   de línea.
//! - Las constantes enteras deben estar en el rango `[0, 32767]`.
//! - A diferencia de otros lenguajes, Jack distingue mayúsculas de
//!   minúsculas en palabras clave e identificadores.
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error.
//! Esto ocurre en suficiente grado como para reportar más de un error por
//! ejecución, pero no lo suficiente como para permitir el avance a las
//! demás fases de la compilación. Tras un error se descarta el resto de
//! la línea, excepto por un `/*` fuera de comillas, que abre un
//! comentario de bloque como de costumbre.

use crate::source::{InputStream, Located, Location};
use std::{
    borrow::Cow,
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Literal entero máximo, el mayor valor positivo en 16 bits.
pub const INT_MAX: u16 = 32767;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Un término que no es palabra clave, identificador ni constante.
    #[error("Unrecognized token starting with {0:?}")]
    Unrecognized(String),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, 32767]")]
    IntOverflow,

    /// Una constante de texto no se cerró antes del fin de línea.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Un comentario de bloque no se cerró antes del fin de la entrada.
    #[error("Unterminated block comment")]
    UnterminatedComment,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

/// Categoría léxica de un token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Symbol,
    Identifier,
    IntegerConstant,
    StringConstant,
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(u16),

    /// Literal de texto, sin comillas.
    StrLiteral(Rc<str>),

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,

    /// `.`
    Period,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `&`
    Ampersand,

    /// `|`
    Pipe,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `=`
    Assign,

    /// `~`
    Tilde,
}

impl Token {
    /// Categoría léxica.
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Id(_) => TokenKind::Identifier,
            Token::Keyword(_) => TokenKind::Keyword,
            Token::IntLiteral(_) => TokenKind::IntegerConstant,
            Token::StrLiteral(_) => TokenKind::StringConstant,
            _ => TokenKind::Symbol,
        }
    }

    /// Texto literal del token, tal como aparece en el código fuente
    /// (las constantes de texto se presentan sin comillas).
    pub fn literal(&self) -> Cow<'_, str> {
        match self {
            Token::Id(id) => Cow::Borrowed(id.as_ref()),
            Token::Keyword(keyword) => Cow::Borrowed(keyword.as_str()),
            Token::IntLiteral(integer) => Cow::Owned(integer.to_string()),
            Token::StrLiteral(string) => Cow::Borrowed(string),
            symbol => {
                let c = symbol.symbol().unwrap_or_default();
                Cow::Owned(c.to_string())
            }
        }
    }

    /// Representación segura para marcado (`<`, `>` y `&` como entidades).
    pub fn escaped(&self) -> Cow<'_, str> {
        match self {
            Token::Less => Cow::Borrowed("&lt;"),
            Token::Greater => Cow::Borrowed("&gt;"),
            Token::Ampersand => Cow::Borrowed("&amp;"),
            _ => self.literal(),
        }
    }

    /// Carácter de un token de símbolo.
    pub fn symbol(&self) -> Option<char> {
        use Token::*;

        let c = match self {
            OpenCurly => '{',
            CloseCurly => '}',
            OpenParen => '(',
            CloseParen => ')',
            OpenSquare => '[',
            CloseSquare => ']',
            Period => '.',
            Comma => ',',
            Semicolon => ';',
            Plus => '+',
            Minus => '-',
            Times => '*',
            Slash => '/',
            Ampersand => '&',
            Pipe => '|',
            Less => '<',
            Greater => '>',
            Assign => '=',
            Tilde => '~',
            _ => return None,
        };

        Some(c)
    }

    /// Token de símbolo correspondiente a un carácter.
    fn from_symbol(c: char) -> Option<Token> {
        use Token::*;

        let token = match c {
            '{' => OpenCurly,
            '}' => CloseCurly,
            '(' => OpenParen,
            ')' => CloseParen,
            '[' => OpenSquare,
            ']' => CloseSquare,
            '.' => Period,
            ',' => Comma,
            ';' => Semicolon,
            '+' => Plus,
            '-' => Minus,
            '*' => Times,
            '/' => Slash,
            '&' => Ampersand,
            '|' => Pipe,
            '<' => Less,
            '>' => Greater,
            '=' => Assign,
            '~' => Tilde,
            _ => return None,
        };

        Some(token)
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Id(id) => write!(fmt, "identifier `{}`", id),
            Token::Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            Token::IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            Token::StrLiteral(string) => write!(fmt, "string \"{}\"", string),
            symbol => write!(fmt, "`{}`", symbol.literal()),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Class,
    Constructor,
    Function,
    Method,
    Field,
    Static,
    Var,
    Int,
    Char,
    Boolean,
    Void,
    True,
    False,
    Null,
    This,
    Let,
    Do,
    If,
    Else,
    While,
    Return,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("class",       Keyword::Class),
    ("constructor", Keyword::Constructor),
    ("function",    Keyword::Function),
    ("method",      Keyword::Method),
    ("field",       Keyword::Field),
    ("static",      Keyword::Static),
    ("var",         Keyword::Var),
    ("int",         Keyword::Int),
    ("char",        Keyword::Char),
    ("boolean",     Keyword::Boolean),
    ("void",        Keyword::Void),
    ("true",        Keyword::True),
    ("false",       Keyword::False),
    ("null",        Keyword::Null),
    ("this",        Keyword::This),
    ("let",         Keyword::Let),
    ("do",          Keyword::Do),
    ("if",          Keyword::If),
    ("else",        Keyword::Else),
    ("while",       Keyword::While),
    ("return",      Keyword::Return),
];

impl Keyword {
    pub fn as_str(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|&&(_, keyword)| keyword == self)
            .map(|&(name, _)| name)
            .unwrap_or_default()
    }
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis sintáctico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error.
    Error,

    /// Se encontró `/` mientras se descarta una línea con error.
    ErrorSlash,

    /// Constante de texto dentro de una línea con error.
    ///
    /// Evita que un `/*` entre comillas se tome por comentario.
    ErrorStr,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Se encontró `/`.
    ///
    /// Puede tratarse del operador de división o del inicio de un comentario.
    Slash,

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    LineComment,

    /// Comentario de bloque.
    ///
    /// Este estado persiste a través de saltos de línea.
    BlockComment,

    /// Se encontró `*` dentro de un comentario de bloque.
    ///
    /// Si sigue `/`, el comentario termina.
    BlockStar,

    /// Constante entera.
    ///
    /// Este estado incluirá dígitos en el token mientras que
    /// el siguiente carácter sea un dígito.
    Integer(u16),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Constante de texto delimitada por `"`.
    Str(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Reduce la entrada a sea una secuencia conocida de tokens
    /// infalibles o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará
    /// de buscar tokens exitosos y comenzará a acumular solamente
    /// errores. El propósito de esta función es permitir la
    /// recolección de múltiples errores léxicos en una misma ejecución
    /// del compilador.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    drop(tokens);

                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use State::*;

        let mut last_accepted = self.start.clone();
        let token = loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, _))) => Some(*c),
                Some(Err(_)) => match self.source.next() {
                    Some(Err(error)) => break Err(error.into()),
                    _ => None,
                },
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                // Condiciones de error: se descarta la línea donde
                // ocurrió el error. Al llegar al final de la línea
                // el lexer se recupera y reinicia. Un `/*` descartado
                // igualmente abre un comentario de bloque.
                (Error | ErrorSlash | ErrorStr, None) => return Ok(None),
                (Error | ErrorSlash | ErrorStr, Some('\n')) => self.state = Start,
                (Error | ErrorSlash, Some('"')) => self.state = ErrorStr,
                (Error, Some('/')) => self.state = ErrorSlash,
                (Error, Some(_)) => (),
                (ErrorSlash, Some('*')) => self.state = BlockComment,
                (ErrorSlash, Some('/')) => self.state = LineComment,
                (ErrorSlash, Some(_)) => self.state = Error,
                (ErrorStr, Some('"')) => self.state = Error,
                (ErrorStr, Some(_)) => (),

                (Start, None) => return Ok(None),

                // `/` puede iniciar un comentario
                (Start, Some('/')) => self.state = Slash,

                // Símbolos de un carácter
                (Start, Some(c)) if Token::from_symbol(c).is_some() => {
                    if let Some(symbol) = Token::from_symbol(c) {
                        self.state = Complete(symbol);
                    }
                }

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica. No se consume
                // el entero, ya que esta lógica ya está implementada
                // en el respectivo caso para un estado de constante
                // entera para el cual el siguiente carácter es un
                // dígito. Por tanto, la constante es inicialmente cero.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Constantes de texto, sin incluir las comillas
                (Start, Some('"')) => self.state = Str(String::new()),

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Token::Plus)),

                // `//` y `/*` inician comentarios, de lo contrario es división
                (Slash, Some('/')) => self.state = LineComment,
                (Slash, Some('*')) => self.state = BlockComment,
                (Slash, _) => break Ok(Token::Slash),

                // Los comentarios de línea descartan la línea donde ocurren
                (LineComment, Some('\n')) => self.state = Start,
                (LineComment, Some(_)) => (),
                (LineComment, None) => self.state = Start,

                // Los comentarios de bloque terminan solo con `*/`
                (BlockComment, Some('*')) => self.state = BlockStar,
                (BlockComment, Some(_)) => (),
                (BlockStar, Some('/')) => self.state = Start,
                (BlockStar, Some('*')) => (),
                (BlockStar, Some(_)) => self.state = BlockComment,
                (BlockComment | BlockStar, None) => break Err(LexerError::UnterminatedComment),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = digit.to_digit(10).unwrap_or_default() as u16;

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                        .filter(|&n| n <= INT_MAX)
                    {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }

                // Un dígito seguido de letras no es un token válido
                (Integer(integer), Some(c)) if is_word_char(c) => {
                    break Err(LexerError::Unrecognized(format!("{}{}", integer, c)))
                }

                // Si sigue algo que no es un dígito, la constante a terminado
                (Integer(integer), _) => break Ok(Token::IntLiteral(*integer)),

                // Extensión de términos
                (Word(word), Some(c)) if is_word_char(c) => {
                    word.push(c);
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    if let Ok(keyword) = self::Keyword::from_str(word) {
                        break Ok(Token::Keyword(keyword));
                    } else {
                        let word = std::mem::take(word);
                        break Ok(Token::Id(Identifier(Rc::from(word))));
                    }
                }

                // Las constantes de texto se toman textualmente
                (Str(string), Some('"')) => {
                    let string = std::mem::take(string);
                    self.state = Complete(Token::StrLiteral(Rc::from(string)));
                }

                (Str(_), Some('\n')) | (Str(_), None) => {
                    break Err(LexerError::UnterminatedString)
                }

                (Str(string), Some(c)) => string.push(c),
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some(Ok((_, next_position))) = self.source.next() {
                last_accepted = std::mem::replace(&mut self.next, next_position);
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next.clone())))
            }
        }
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn lex(text: &str) -> Result<Vec<Token>, Vec<String>> {
        let (start, stream) = source::consume(text.as_bytes(), "Test.jack");
        Lexer::new(start, stream)
            .try_exhaustive()
            .map(|tokens| tokens.into_iter().map(Located::into_inner).collect())
            .map_err(|errors| errors.iter().map(|e| e.val().to_string()).collect())
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier::from(name))
    }

    #[test]
    fn symbols_split_adjacent_tokens() {
        let tokens = lex("do f(x);").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Do),
                id("f"),
                Token::OpenParen,
                id("x"),
                Token::CloseParen,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn comments_are_stripped() {
        let text = "/** doc\n * more */ let a = b / 2; // tail\n/* one */ x /* two\nlines */ y";
        let tokens = lex(text).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Let),
                id("a"),
                Token::Assign,
                id("b"),
                Token::Slash,
                Token::IntLiteral(2),
                Token::Semicolon,
                id("x"),
                id("y"),
            ]
        );
    }

    #[test]
    fn strings_are_verbatim() {
        let tokens = lex("\"a (b); <c> // d\"").unwrap();
        assert_eq!(tokens, vec![Token::StrLiteral(Rc::from("a (b); <c> // d"))]);
        assert_eq!(tokens[0].kind(), TokenKind::StringConstant);
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let tokens = lex("class Class _tmp while2").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Class),
                id("Class"),
                id("_tmp"),
                id("while2"),
            ]
        );
    }

    #[test]
    fn integer_range() {
        assert_eq!(lex("32767").unwrap(), vec![Token::IntLiteral(32767)]);
        assert_eq!(lex("32768").unwrap_err().len(), 1);
        assert!(lex("12abc").is_err());
    }

    #[test]
    fn errors_are_collected_per_line() {
        let errors = lex("let # = 1;\nlet x = \"open\nlet y = 99999;\n").unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("Bad character '#'"));
        assert!(errors[1].contains("Unterminated string"));
        assert!(errors[2].contains("overflow"));
    }

    #[test]
    fn comment_opened_on_error_line() {
        let errors = lex("let a = #; /* starts here\n # still inside */ let b;\n").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Bad character '#'"));

        // Entre comillas o tras `//` no abre comentario
        let errors = lex("let a = # \"/*\";\nlet b = #; // /*\nlet c;\n").unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn unterminated_comment() {
        let errors = lex("class /* never closed\n").unwrap_err();
        assert_eq!(errors, vec![String::from("Unterminated block comment")]);
    }

    #[test]
    fn markup_escaping() {
        let tokens = lex("< > & + \"<\"").unwrap();
        let escaped: Vec<_> = tokens.iter().map(|t| t.escaped().into_owned()).collect();
        assert_eq!(escaped, vec!["&lt;", "&gt;", "&amp;", "+", "<"]);
        assert!(tokens.iter().take(4).all(|t| t.kind() == TokenKind::Symbol));
    }

    #[test]
    fn locations_span_tokens() {
        let (start, stream) = source::consume("  let\nfoo".as_bytes(), "Test.jack");
        let tokens = Lexer::new(start, stream).try_exhaustive().unwrap();
        assert_eq!(tokens[0].location().to_string(), "Test.jack:[1:3-1:5]");
        assert_eq!(tokens[1].location().start().line(), 2);
    }
}
