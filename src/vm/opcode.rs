use std::fmt;

use super::value::{Address, Operand, Value};
use super::{Cpu, EngineError, EngineResult};

// ── Numeric opcode identities ──────────────────────────────────────

pub(crate) const OP_PUSH: u8 = 0;
pub(crate) const OP_POP: u8 = 1;
pub(crate) const OP_STORE: u8 = 2;
pub(crate) const OP_UNSET: u8 = 3;
pub(crate) const OP_ADD: u8 = 10;
pub(crate) const OP_SUB: u8 = 11;
pub(crate) const OP_MUL: u8 = 12;
pub(crate) const OP_DIV: u8 = 13;
pub(crate) const OP_POW: u8 = 14;
pub(crate) const OP_NEG: u8 = 15;
pub(crate) const OP_NOT: u8 = 16;
pub(crate) const OP_AND: u8 = 17;
pub(crate) const OP_OR: u8 = 18;
pub(crate) const OP_EQ: u8 = 20;
pub(crate) const OP_NE: u8 = 21;
pub(crate) const OP_LT: u8 = 22;
pub(crate) const OP_LE: u8 = 23;
pub(crate) const OP_GT: u8 = 24;
pub(crate) const OP_GE: u8 = 25;
pub(crate) const OP_JMP: u8 = 30;
pub(crate) const OP_BRF: u8 = 31;
pub(crate) const OP_CALL: u8 = 32;
pub(crate) const OP_RET: u8 = 33;
pub(crate) const OP_SUFFIX: u8 = 40;
pub(crate) const OP_WAIT: u8 = 41;
pub(crate) const OP_ADDTRIGGER: u8 = 42;
pub(crate) const OP_REMOVETRIGGER: u8 = 43;
pub(crate) const OP_FLYBYWIRE: u8 = 44;
pub(crate) const OP_NOP: u8 = 50;
pub(crate) const OP_EOF: u8 = 254;
pub(crate) const OP_EOP: u8 = 255;

#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Push(Operand),
    Pop,
    Store(String),
    Unset(String),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Jump(isize),
    BranchFalse(isize),
    /// Destinations carrying the pointer marker call through a pointer
    /// variable; anything else is a builtin.
    Call { destination: String, argc: usize },
    Return,
    GetSuffix(String),
    Wait,
    AddTrigger,
    RemoveTrigger,
    ToggleFlyByWire { name: String, enabled: bool },
    Nop,
    /// End of a function or trigger body. Detected, never executed.
    EndOfFunction,
    /// End of a pushed program. Detected, never executed.
    EndOfProgram,
}

/// An opcode plus the source statement it came from. Every opcode emitted
/// for one statement shares its `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub id: u32,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: Opcode, id: u32, line: u32) -> Self {
        Instruction { op, id, line }
    }

    /// Sentinels carry id 0 so statement skipping never crosses them.
    pub fn sentinel(op: Opcode) -> Self {
        Instruction { op, id: 0, line: 0 }
    }
}

impl Opcode {
    pub fn code(&self) -> u8 {
        match self {
            Opcode::Push(_) => OP_PUSH,
            Opcode::Pop => OP_POP,
            Opcode::Store(_) => OP_STORE,
            Opcode::Unset(_) => OP_UNSET,
            Opcode::Add => OP_ADD,
            Opcode::Sub => OP_SUB,
            Opcode::Mul => OP_MUL,
            Opcode::Div => OP_DIV,
            Opcode::Pow => OP_POW,
            Opcode::Neg => OP_NEG,
            Opcode::Not => OP_NOT,
            Opcode::And => OP_AND,
            Opcode::Or => OP_OR,
            Opcode::Eq => OP_EQ,
            Opcode::Ne => OP_NE,
            Opcode::Lt => OP_LT,
            Opcode::Le => OP_LE,
            Opcode::Gt => OP_GT,
            Opcode::Ge => OP_GE,
            Opcode::Jump(_) => OP_JMP,
            Opcode::BranchFalse(_) => OP_BRF,
            Opcode::Call { .. } => OP_CALL,
            Opcode::Return => OP_RET,
            Opcode::GetSuffix(_) => OP_SUFFIX,
            Opcode::Wait => OP_WAIT,
            Opcode::AddTrigger => OP_ADDTRIGGER,
            Opcode::RemoveTrigger => OP_REMOVETRIGGER,
            Opcode::ToggleFlyByWire { .. } => OP_FLYBYWIRE,
            Opcode::Nop => OP_NOP,
            Opcode::EndOfFunction => OP_EOF,
            Opcode::EndOfProgram => OP_EOP,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Opcode::EndOfFunction | Opcode::EndOfProgram)
    }

    /// Shift part-relative address literals by `base`.
    pub(crate) fn relocate(&mut self, base: usize) {
        if let Opcode::Push(Operand::Literal(Value::Address(address))) = self {
            *address = address.relocate(base);
        }
    }

    /// Run the opcode's effect and return the instruction-pointer delta.
    pub(crate) fn execute(&self, cpu: &mut Cpu) -> EngineResult<isize> {
        match self {
            Opcode::Push(operand) => cpu.push_operand(operand.clone()),
            Opcode::Pop => {
                cpu.pop_operand()?;
            }
            Opcode::Store(name) => {
                let value = cpu.pop_value()?;
                cpu.set_value(name, value);
            }
            Opcode::Unset(name) => {
                cpu.variables_mut().remove(name);
            }
            Opcode::Add => {
                let (left, right) = pop_pair(cpu)?;
                let result = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                    (Value::Text(a), b) => Value::Text(format!("{a}{b}")),
                    (a, Value::Text(b)) => Value::Text(format!("{a}{b}")),
                    (a, b) => return Err(mismatch("add", &a, &b)),
                };
                cpu.push_value(result);
            }
            Opcode::Sub => arithmetic(cpu, "subtract", |a, b| Ok(a - b))?,
            Opcode::Mul => arithmetic(cpu, "multiply", |a, b| Ok(a * b))?,
            Opcode::Div => arithmetic(cpu, "divide", |a, b| {
                if b == 0.0 {
                    Err(EngineError::DivisionByZero)
                } else {
                    Ok(a / b)
                }
            })?,
            Opcode::Pow => arithmetic(cpu, "raise", |a, b| Ok(a.powf(b)))?,
            Opcode::Neg => match cpu.pop_value()? {
                Value::Number(n) => cpu.push_value(Value::Number(-n)),
                other => {
                    return Err(EngineError::InvalidOperandType(format!(
                        "cannot negate {}", other.type_name()
                    )))
                }
            },
            Opcode::Not => {
                let value = cpu.pop_value()?;
                cpu.push_value(Value::Bool(!value.is_truthy()));
            }
            Opcode::And => {
                let (left, right) = pop_pair(cpu)?;
                cpu.push_value(Value::Bool(left.is_truthy() && right.is_truthy()));
            }
            Opcode::Or => {
                let (left, right) = pop_pair(cpu)?;
                cpu.push_value(Value::Bool(left.is_truthy() || right.is_truthy()));
            }
            Opcode::Eq => {
                let (left, right) = pop_pair(cpu)?;
                cpu.push_value(Value::Bool(values_equal(&left, &right)));
            }
            Opcode::Ne => {
                let (left, right) = pop_pair(cpu)?;
                cpu.push_value(Value::Bool(!values_equal(&left, &right)));
            }
            Opcode::Lt => compare(cpu, "<", |o| o.is_lt())?,
            Opcode::Le => compare(cpu, "<=", |o| o.is_le())?,
            Opcode::Gt => compare(cpu, ">", |o| o.is_gt())?,
            Opcode::Ge => compare(cpu, ">=", |o| o.is_ge())?,
            Opcode::Jump(delta) => return Ok(*delta),
            Opcode::BranchFalse(delta) => {
                let condition = cpu.pop_value()?;
                if !condition.is_truthy() {
                    return Ok(*delta);
                }
            }
            Opcode::Call { destination, argc } => return cpu.call(destination, *argc),
            Opcode::Return => return cpu.return_from_call(),
            Opcode::GetSuffix(name) => {
                let value = cpu.pop_value()?;
                let suffix = match &value {
                    Value::Structure(s) => s.suffix(name).cloned(),
                    _ => None,
                };
                match suffix {
                    Some(v) => cpu.push_value(v),
                    None => {
                        return Err(EngineError::InvalidOperandType(format!(
                            "{} has no suffix '{}'", value.type_name(), name
                        )))
                    }
                }
            }
            Opcode::Wait => {
                let seconds = expect_number(cpu.pop_value()?, "wait")?;
                cpu.start_wait(seconds);
            }
            Opcode::AddTrigger => {
                let entry = expect_trigger(cpu.pop_value()?)?;
                cpu.add_trigger(entry);
            }
            Opcode::RemoveTrigger => {
                let entry = expect_trigger(cpu.pop_value()?)?;
                cpu.remove_trigger(entry);
            }
            Opcode::ToggleFlyByWire { name, enabled } => cpu.toggle_fly_by_wire(name, *enabled),
            Opcode::Nop => {}
            Opcode::EndOfFunction | Opcode::EndOfProgram => return Ok(0),
        }
        Ok(1)
    }
}

fn pop_pair(cpu: &mut Cpu) -> EngineResult<(Value, Value)> {
    let right = cpu.pop_value()?;
    let left = cpu.pop_value()?;
    Ok((left, right))
}

fn mismatch(verb: &str, a: &Value, b: &Value) -> EngineError {
    EngineError::InvalidOperandType(format!(
        "cannot {} {} and {}", verb, a.type_name(), b.type_name()
    ))
}

fn arithmetic(
    cpu: &mut Cpu,
    verb: &str,
    apply: impl Fn(f64, f64) -> EngineResult<f64>,
) -> EngineResult<()> {
    let (left, right) = pop_pair(cpu)?;
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            let result = apply(*a, *b)?;
            cpu.push_value(Value::Number(result));
            Ok(())
        }
        _ => Err(mismatch(verb, &left, &right)),
    }
}

fn compare(
    cpu: &mut Cpu,
    symbol: &str,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> EngineResult<()> {
    let (left, right) = pop_pair(cpu)?;
    let ordering = match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        _ => None,
    };
    match ordering {
        Some(o) => {
            cpu.push_value(Value::Bool(test(o)));
            Ok(())
        }
        None => Err(EngineError::InvalidOperandType(format!(
            "cannot compare {} {} {}", left.type_name(), symbol, right.type_name()
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => (x - y).abs() < f64::EPSILON,
        (Value::Text(x), Value::Text(y)) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}

fn expect_number(value: Value, what: &str) -> EngineResult<f64> {
    value.as_number().ok_or_else(|| {
        EngineError::InvalidOperandType(format!("{} expects a number, got {}", what, value.type_name()))
    })
}

fn expect_trigger(value: Value) -> EngineResult<usize> {
    match value {
        Value::Address(Address::Trigger(ip)) => Ok(ip),
        other => Err(EngineError::InvalidOperandType(format!(
            "expected a trigger address, got {}", other.type_name()
        ))),
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Push(operand) => write!(f, "push {operand}"),
            Opcode::Pop => write!(f, "pop"),
            Opcode::Store(name) => write!(f, "store {name}"),
            Opcode::Unset(name) => write!(f, "unset {name}"),
            Opcode::Add => write!(f, "add"),
            Opcode::Sub => write!(f, "sub"),
            Opcode::Mul => write!(f, "mul"),
            Opcode::Div => write!(f, "div"),
            Opcode::Pow => write!(f, "pow"),
            Opcode::Neg => write!(f, "neg"),
            Opcode::Not => write!(f, "not"),
            Opcode::And => write!(f, "and"),
            Opcode::Or => write!(f, "or"),
            Opcode::Eq => write!(f, "eq"),
            Opcode::Ne => write!(f, "ne"),
            Opcode::Lt => write!(f, "lt"),
            Opcode::Le => write!(f, "le"),
            Opcode::Gt => write!(f, "gt"),
            Opcode::Ge => write!(f, "ge"),
            Opcode::Jump(d) => write!(f, "jmp {d:+}"),
            Opcode::BranchFalse(d) => write!(f, "brf {d:+}"),
            Opcode::Call { destination, argc } => write!(f, "call {destination}/{argc}"),
            Opcode::Return => write!(f, "ret"),
            Opcode::GetSuffix(name) => write!(f, "suffix :{name}"),
            Opcode::Wait => write!(f, "wait"),
            Opcode::AddTrigger => write!(f, "addtrigger"),
            Opcode::RemoveTrigger => write!(f, "removetrigger"),
            Opcode::ToggleFlyByWire { name, enabled } => {
                write!(f, "flybywire {name} {}", if *enabled { "on" } else { "off" })
            }
            Opcode::Nop => write!(f, "nop"),
            Opcode::EndOfFunction => write!(f, "eof"),
            Opcode::EndOfProgram => write!(f, "eop"),
        }
    }
}
