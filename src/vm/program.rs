use super::opcode::{Instruction, Opcode};

/// One compiled unit. Address literals inside a part are relative to the
/// start of its `functions` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodePart {
    pub source_name: String,
    /// Function and trigger bodies, each closed by `EndOfFunction` or `Return`.
    pub functions: Vec<Instruction>,
    /// Top-level statements in source order.
    pub main: Vec<Instruction>,
}

impl CodePart {
    pub fn new(source_name: impl Into<String>) -> Self {
        CodePart { source_name: source_name.into(), ..CodePart::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.main.is_empty()
    }
}

/// Append `parts` to `program` as: every main section, the terminator, then
/// every function section (relocated). Function bodies sit past the
/// terminator so sequential flow never falls into them.
///
/// Returns the address of the first appended main opcode.
pub(crate) fn append_parts(program: &mut Vec<Instruction>, parts: Vec<CodePart>, terminator: Opcode) -> usize {
    let entry = program.len();
    let main_len: usize = parts.iter().map(|p| p.main.len()).sum();

    let mut bases = Vec::with_capacity(parts.len());
    let mut next_base = entry + main_len + 1;
    for part in &parts {
        bases.push(next_base);
        next_base += part.functions.len();
    }

    program.reserve(next_base - entry);
    let mut functions = Vec::with_capacity(parts.len());
    for (part, base) in parts.into_iter().zip(bases) {
        for mut instruction in part.main {
            instruction.op.relocate(base);
            program.push(instruction);
        }
        functions.push((part.functions, base));
    }

    program.push(Instruction::sentinel(terminator));

    for (body, base) in functions {
        for mut instruction in body {
            instruction.op.relocate(base);
            program.push(instruction);
        }
    }
    entry
}

/// Links compiled parts into a stand-alone program for `Cpu::push_program`.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    parts: Vec<CodePart>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder { parts: Vec::new() }
    }

    pub fn add(&mut self, parts: impl IntoIterator<Item = CodePart>) -> &mut Self {
        self.parts.extend(parts);
        self
    }

    pub fn build(self) -> Vec<Instruction> {
        if self.parts.iter().all(CodePart::is_empty) {
            return Vec::new();
        }
        let mut program = Vec::new();
        append_parts(&mut program, self.parts, Opcode::EndOfProgram);
        program
    }
}

/// Render an opcode listing, one instruction per line.
pub fn listing(program: &[Instruction]) -> String {
    let mut out = String::new();
    for (index, instruction) in program.iter().enumerate() {
        out.push_str(&format!(
            "{index:04}  L{:<4} #{:<4} {}\n",
            instruction.line, instruction.id, instruction.op
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::{Address, Operand, Value};

    fn ins(op: Opcode) -> Instruction {
        Instruction::new(op, 1, 1)
    }

    fn push_trigger(rel: usize) -> Opcode {
        Opcode::Push(Operand::Literal(Value::Address(Address::Trigger(rel))))
    }

    #[test]
    fn mains_precede_terminator_and_functions() {
        let mut a = CodePart::new("a");
        a.functions = vec![ins(Opcode::Nop), ins(Opcode::EndOfFunction)];
        a.main = vec![ins(push_trigger(0)), ins(Opcode::AddTrigger)];
        let mut b = CodePart::new("b");
        b.functions = vec![ins(Opcode::EndOfFunction)];
        b.main = vec![ins(push_trigger(0))];

        let mut builder = ProgramBuilder::new();
        builder.add([a, b]);
        let program = builder.build();

        // main a (2) + main b (1) + eop + fn a (2) + fn b (1)
        assert_eq!(program.len(), 7);
        assert_eq!(program[3].op, Opcode::EndOfProgram);
        assert_eq!(program[0].op, push_trigger(4));
        assert_eq!(program[2].op, push_trigger(6));
        assert_eq!(program[6].op, Opcode::EndOfFunction);
    }

    #[test]
    fn append_returns_entry_of_new_code() {
        let mut program = vec![Instruction::sentinel(Opcode::EndOfFunction)];
        let mut part = CodePart::new("cmd");
        part.main = vec![ins(Opcode::Nop)];
        let entry = append_parts(&mut program, vec![part], Opcode::EndOfFunction);
        assert_eq!(entry, 1);
        assert_eq!(program.len(), 3);
        assert_eq!(program[2].op, Opcode::EndOfFunction);
    }

    #[test]
    fn empty_parts_build_nothing() {
        let mut builder = ProgramBuilder::new();
        builder.add([CodePart::new("empty")]);
        assert!(builder.build().is_empty());
    }

    #[test]
    fn listing_has_one_line_per_instruction() {
        let program = vec![ins(Opcode::Nop), Instruction::sentinel(Opcode::EndOfProgram)];
        let text = listing(&program);
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().ends_with("eop"));
    }
}
