use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::opcode::{Instruction, Opcode};
use super::program::{CodePart, append_parts};
use super::variables::Variable;
use crate::host::BindingManager;

/// One execution unit: an opcode sequence, its instruction pointer and the
/// triggers armed while it runs.
#[derive(Debug)]
pub struct ProgramContext {
    program: Rc<Vec<Instruction>>,
    pub instruction_pointer: usize,
    triggers: Vec<usize>,
    pub silent: bool,
    interpreter: bool,
    fly_by_wire: BTreeMap<String, bool>,
    /// Pointer variables parked here while a context above this one runs.
    saved_pointers: HashMap<String, Variable>,
}

impl ProgramContext {
    pub fn new(program: Vec<Instruction>, silent: bool) -> Self {
        ProgramContext {
            program: Rc::new(program),
            instruction_pointer: 0,
            triggers: Vec::new(),
            silent,
            interpreter: false,
            fly_by_wire: BTreeMap::new(),
            saved_pointers: HashMap::new(),
        }
    }

    /// The permanent bottom context. Starts parked on an `EndOfFunction`.
    pub fn interpreter() -> Self {
        let mut context = ProgramContext::new(vec![Instruction::sentinel(Opcode::EndOfFunction)], false);
        context.interpreter = true;
        context
    }

    pub fn is_interpreter(&self) -> bool {
        self.interpreter
    }

    pub fn program(&self) -> &Rc<Vec<Instruction>> {
        &self.program
    }

    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.program.get(self.instruction_pointer)
    }

    /// Merge new code into this context's address space and continue from it.
    /// Previously linked addresses (armed triggers, lock bodies) stay valid.
    pub fn add_code(&mut self, parts: Vec<CodePart>) -> usize {
        let terminator = if self.interpreter { Opcode::EndOfFunction } else { Opcode::EndOfProgram };
        let program = Rc::make_mut(&mut self.program);
        let entry = append_parts(program, parts, terminator);
        self.instruction_pointer = entry;
        entry
    }

    pub fn triggers(&self) -> &[usize] {
        &self.triggers
    }

    pub fn has_trigger(&self, entry: usize) -> bool {
        self.triggers.contains(&entry)
    }

    pub fn add_trigger(&mut self, entry: usize) {
        if !self.has_trigger(entry) {
            self.triggers.push(entry);
        }
    }

    pub fn remove_trigger(&mut self, entry: usize) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|&t| t != entry);
        self.triggers.len() != before
    }

    pub fn clear_triggers(&mut self) {
        self.triggers.clear();
    }

    /// Opcode listing around the instruction pointer, `context_lines` either side.
    pub fn code_fragment(&self, context_lines: usize) -> Vec<String> {
        let ip = self.instruction_pointer;
        let start = ip.saturating_sub(context_lines);
        let end = (ip + context_lines).min(self.program.len().saturating_sub(1));
        let mut fragment = Vec::new();
        for index in start..=end {
            let Some(instruction) = self.program.get(index) else { break };
            let marker = if index == ip { "->" } else { "  " };
            fragment.push(format!(
                "{marker}{index:04}  L{:<4} {}",
                instruction.line, instruction.op
            ));
        }
        fragment
    }

    pub fn toggle_fly_by_wire(&mut self, name: &str, enabled: bool, bindings: Option<&mut dyn BindingManager>) {
        self.fly_by_wire.insert(name.to_lowercase(), enabled);
        if let Some(bindings) = bindings {
            bindings.toggle_fly_by_wire(name, enabled);
        }
    }

    /// Re-assert every binding this context had switched on.
    pub fn enable_active_fly_by_wire(&self, bindings: Option<&mut dyn BindingManager>) {
        if let Some(bindings) = bindings {
            for (name, _) in self.fly_by_wire.iter().filter(|(_, on)| **on) {
                bindings.toggle_fly_by_wire(name, true);
            }
        }
    }

    /// Release this context's bindings without forgetting them.
    pub fn disable_active_fly_by_wire(&self, bindings: Option<&mut dyn BindingManager>) {
        if let Some(bindings) = bindings {
            for (name, _) in self.fly_by_wire.iter().filter(|(_, on)| **on) {
                bindings.toggle_fly_by_wire(name, false);
            }
        }
    }

    pub fn active_fly_by_wire(&self) -> impl Iterator<Item = &str> {
        self.fly_by_wire.iter().filter(|(_, on)| **on).map(|(name, _)| name.as_str())
    }

    pub(crate) fn save_pointers(&mut self, pointers: HashMap<String, Variable>) {
        self.saved_pointers.extend(pointers);
    }

    pub(crate) fn take_saved_pointers(&mut self) -> HashMap<String, Variable> {
        std::mem::take(&mut self.saved_pointers)
    }
}

/// Stack of contexts. Index 0 is the interpreter and is never popped.
#[derive(Debug)]
pub struct ContextStack {
    contexts: Vec<ProgramContext>,
}

impl ContextStack {
    pub fn new() -> Self {
        ContextStack { contexts: vec![ProgramContext::interpreter()] }
    }

    pub fn reset(&mut self) {
        self.contexts.clear();
        self.contexts.push(ProgramContext::interpreter());
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn current(&self) -> &ProgramContext {
        // index 0 is always present
        &self.contexts[self.contexts.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut ProgramContext {
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }

    pub fn get_mut(&mut self, level: usize) -> Option<&mut ProgramContext> {
        self.contexts.get_mut(level)
    }

    pub fn interpreter_mut(&mut self) -> &mut ProgramContext {
        &mut self.contexts[0]
    }

    pub fn push(&mut self, context: ProgramContext) {
        self.contexts.push(context);
    }

    pub fn pop(&mut self) -> Option<ProgramContext> {
        if self.contexts.len() > 1 {
            self.contexts.pop()
        } else {
            None
        }
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack::new()
    }
}
