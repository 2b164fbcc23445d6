use super::value::Operand;
use super::{EngineError, EngineResult};

/// LIFO operand store for expression evaluation and argument passing.
/// No type checking happens here; opcodes enforce their own contracts.
#[derive(Debug, Default)]
pub struct Stack {
    items: Vec<Operand>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { items: Vec::with_capacity(64) }
    }

    pub fn push(&mut self, operand: Operand) {
        self.items.push(operand);
    }

    pub fn pop(&mut self) -> EngineResult<Operand> {
        self.items.pop().ok_or(EngineError::StackUnderflow)
    }

    pub fn peek(&self) -> Option<&Operand> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Discard (`delta < 0`) or reserve (`delta > 0`) slots at the top.
    pub fn move_pointer(&mut self, delta: isize) -> EngineResult<()> {
        if delta < 0 {
            let count = delta.unsigned_abs();
            if count > self.items.len() {
                return Err(EngineError::StackUnderflow);
            }
            self.items.truncate(self.items.len() - count);
        } else {
            self.items.resize(self.items.len() + delta as usize, Operand::Reserved);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Render the top `count` entries, newest first.
    pub fn dump(&self, count: usize) -> String {
        let mut out = String::new();
        for (depth, operand) in self.items.iter().rev().take(count).enumerate() {
            out.push_str(&format!("{depth:03} {operand}\n"));
        }
        if self.items.len() > count {
            out.push_str(&format!("... {} more\n", self.items.len() - count));
        }
        out
    }
}
