use std::collections::BTreeMap;
use std::fmt;

/// Leading character of a variable token.
pub const SIGIL: char = '$';

/// Marks a context-private pointer variable (function or trigger entry).
pub const POINTER_MARKER: char = '*';

/// Separator used in generated trigger pointer names.
pub const TRIGGER_MARKER: char = '-';

/// Control address held by pointer variables and call frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Entry of a lock/function body.
    Function(usize),
    /// Entry of an armed trigger body.
    Trigger(usize),
    /// Return address pushed by a function-pointer call.
    Return(usize),
}

impl Address {
    pub fn ip(self) -> usize {
        match self {
            Address::Function(ip) | Address::Trigger(ip) | Address::Return(ip) => ip,
        }
    }

    /// Shift a part-relative address to its absolute position in a program.
    pub(crate) fn relocate(self, base: usize) -> Self {
        match self {
            Address::Function(ip) => Address::Function(ip + base),
            Address::Trigger(ip) => Address::Trigger(ip + base),
            Address::Return(ip) => Address::Return(ip),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Function(ip) => write!(f, "@fn:{ip}"),
            Address::Trigger(ip) => write!(f, "@trigger:{ip}"),
            Address::Return(ip) => write!(f, "@ret:{ip}"),
        }
    }
}

/// A suffixed value: a type name plus named fields read with `value:suffix`.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Structure {
    pub fn new(type_name: impl Into<String>) -> Self {
        Structure { type_name: type_name.into(), fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_lowercase(), value);
        self
    }

    pub fn suffix(&self, name: &str) -> Option<&Value> {
        self.fields.get(&name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Structure(Structure),
    Address(Address),
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Structure(s) => &s.type_name,
            Value::Address(_) => "address",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Truthiness used by conditional branches.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Structure(_) | Value::Address(_) => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Structure(s) => {
                write!(f, "{}(", s.type_name)?;
                for (i, (k, v)) in s.fields.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, ")")
            }
            Value::Address(a) => write!(f, "{}", a),
        }
    }
}

/// One operand-stack entry. Variable references stay unresolved until they are
/// popped as values, so `Store`-style opcodes can still see the identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Variable(String),
    /// Slot reserved by `Stack::move_pointer`.
    Reserved,
}

impl Operand {
    /// Classify a raw token: sigil-prefixed tokens are variable references,
    /// anything else is a string literal.
    pub fn from_token(token: &str) -> Self {
        if token.starts_with(SIGIL) {
            Operand::Variable(token.to_lowercase())
        } else {
            Operand::Literal(Value::Text(token.to_string()))
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::Text(s)) => write!(f, "{:?}", s),
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Variable(name) => write!(f, "{}", name),
            Operand::Reserved => write!(f, "<reserved>"),
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_with_sigil_is_variable() {
        assert_eq!(Operand::from_token("$Alt"), Operand::Variable("$alt".into()));
        assert_eq!(Operand::from_token("alt"), Operand::Literal(Value::Text("alt".into())));
    }

    #[test]
    fn number_display_drops_integral_fraction() {
        assert_eq!(Value::Number(100.0).to_string(), "100");
        assert_eq!(Value::Number(100.5).to_string(), "100.5");
    }

    #[test]
    fn relocate_keeps_return_addresses() {
        assert_eq!(Address::Trigger(2).relocate(10), Address::Trigger(12));
        assert_eq!(Address::Return(2).relocate(10), Address::Return(2));
    }

    #[test]
    fn structure_suffix_is_case_insensitive() {
        let s = Structure::new("vector").with_field("X", Value::Number(1.0));
        assert_eq!(s.suffix("x"), Some(&Value::Number(1.0)));
    }
}
