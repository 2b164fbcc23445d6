//! Turns source text into linkable [`CodePart`]s.
//!
//! Every statement gets a fresh instruction id shared by all of its opcodes,
//! which is what the engine uses to skip a failed interactive statement.
//! Trigger and lock bodies go to the part's function section and are
//! reached through pointer variables.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ast::*;
use crate::host::{CompileOptions, ScriptHandler};
use crate::lexer::{self, LexError};
use crate::parser::{self, ParseError};
use crate::vm::opcode::{Instruction, Opcode};
use crate::vm::program::CodePart;
use crate::vm::value::{Address, Operand, POINTER_MARKER, SIGIL, TRIGGER_MARKER, Value};

/// Lock names that also hand a control channel to the script.
const FLIGHT_CONTROLS: [&str; 4] = ["throttle", "steering", "wheelthrottle", "wheelsteering"];

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{message}")]
    Semantic { message: String, span: Span, enclosing: Option<Span> },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::Lex(e) => Span {
                start: e.position,
                end: e.position + e.snippet.len().max(1),
            },
            CompileError::Parse(e) => e.span,
            CompileError::Semantic { span, .. } => *span,
        }
    }
}

/// The bundled script handler. Remembers declared locks per compile
/// context so later commands in the same context read them as calls.
#[derive(Debug)]
pub struct ScriptCompiler {
    locks: HashMap<String, HashSet<String>>,
    next_id: u32,
}

impl ScriptCompiler {
    pub fn new() -> Self {
        ScriptCompiler { locks: HashMap::new(), next_id: 1 }
    }

    pub fn locks(&self, context: &str) -> impl Iterator<Item = &str> {
        self.locks.get(context).into_iter().flatten().map(String::as_str)
    }
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        ScriptCompiler::new()
    }
}

impl ScriptHandler for ScriptCompiler {
    fn compile(
        &mut self,
        source: &str,
        context: &str,
        options: &CompileOptions,
    ) -> Result<Vec<CodePart>, CompileError> {
        let tokens = lexer::lex(source)?;
        let script = parser::parse(tokens)?;

        // declared locks only stick once the whole unit compiled
        let mut locks = self.locks.get(context).cloned().unwrap_or_default();
        let mut emitter = Emitter {
            part: CodePart::new(context),
            locks: &mut locks,
            next_id: &mut self.next_id,
            map: SourceMap::starting_at(source, options.first_line as usize),
            triggers: Vec::new(),
        };
        let mut main = Vec::new();
        emitter.block(&script.statements, &mut main)?;
        let mut part = emitter.part;
        part.main = main;

        self.locks.insert(context.to_string(), locks);
        debug!(
            context,
            statements = script.statements.len(),
            main = part.main.len(),
            functions = part.functions.len(),
            "compiled"
        );
        Ok(vec![part])
    }

    fn clear_context(&mut self, context: &str) {
        self.locks.remove(context);
    }
}

fn variable(name: &str) -> String {
    format!("{SIGIL}{name}")
}

fn pointer(name: &str) -> String {
    format!("{SIGIL}{name}{POINTER_MARKER}")
}

fn trigger_pointer(id: u32) -> String {
    format!("{SIGIL}when{TRIGGER_MARKER}{id}{POINTER_MARKER}")
}

fn literal(value: Value) -> Opcode {
    Opcode::Push(Operand::Literal(value))
}

/// Statement id and line stamped on each emitted opcode.
#[derive(Clone, Copy)]
struct Site {
    id: u32,
    line: u32,
}

impl Site {
    fn ins(self, op: Opcode) -> Instruction {
        Instruction::new(op, self.id, self.line)
    }
}

/// Point the branch at `at` to `target`.
fn patch(out: &mut [Instruction], at: usize, target: usize) {
    let delta = target as isize - at as isize;
    match &mut out[at].op {
        Opcode::Jump(d) | Opcode::BranchFalse(d) => *d = delta,
        _ => {}
    }
}

struct Emitter<'a> {
    part: CodePart,
    locks: &'a mut HashSet<String>,
    next_id: &'a mut u32,
    map: SourceMap,
    /// `preserve` flag and span of each enclosing `when` body.
    triggers: Vec<(bool, Span)>,
}

impl Emitter<'_> {
    fn site(&mut self, span: Span) -> Site {
        let id = *self.next_id;
        *self.next_id += 1;
        Site { id, line: self.map.line_of(span.start) as u32 }
    }

    fn block(&mut self, statements: &[Stmt], out: &mut Vec<Instruction>) -> Result<(), CompileError> {
        for stmt in statements {
            self.stmt(stmt, out)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt, out: &mut Vec<Instruction>) -> Result<(), CompileError> {
        let at = self.site(stmt.span);
        match &stmt.node {
            StmtKind::Set { name, value } => {
                self.expr(value, at, out);
                out.push(at.ins(Opcode::Store(variable(name))));
            }
            StmtKind::Unset { name } => out.push(at.ins(Opcode::Unset(variable(name)))),
            StmtKind::Print { value } => {
                self.expr(value, at, out);
                out.push(at.ins(Opcode::Call { destination: "print".into(), argc: 1 }));
            }
            StmtKind::Wait { seconds } => {
                if let Some(&(_, when)) = self.triggers.last() {
                    return Err(semantic("wait is not allowed inside a when body", stmt.span, Some(when)));
                }
                self.expr(seconds, at, out);
                out.push(at.ins(Opcode::Wait));
            }
            StmtKind::Lock { name, value } => {
                let mut body = Vec::new();
                self.expr(value, at, &mut body);
                body.push(at.ins(Opcode::Return));
                let entry = self.part.functions.len();
                self.part.functions.extend(body);

                out.push(at.ins(literal(Value::Address(Address::Function(entry)))));
                out.push(at.ins(Opcode::Store(pointer(name))));
                if FLIGHT_CONTROLS.contains(&name.as_str()) {
                    out.push(at.ins(Opcode::ToggleFlyByWire { name: name.clone(), enabled: true }));
                }
                self.locks.insert(name.clone());
            }
            StmtKind::Unlock { name } => {
                out.push(at.ins(Opcode::Unset(pointer(name))));
                if FLIGHT_CONTROLS.contains(&name.as_str()) {
                    out.push(at.ins(Opcode::ToggleFlyByWire { name: name.clone(), enabled: false }));
                }
                self.locks.remove(name);
            }
            StmtKind::Preserve => match self.triggers.last_mut() {
                Some((preserve, _)) => *preserve = true,
                None => return Err(semantic("preserve is only allowed inside a when body", stmt.span, None)),
            },
            StmtKind::If { condition, then_body, else_body } => {
                self.expr(condition, at, out);
                let branch = out.len();
                out.push(at.ins(Opcode::BranchFalse(0)));
                self.block(then_body, out)?;
                match else_body {
                    Some(else_body) => {
                        let jump = out.len();
                        out.push(at.ins(Opcode::Jump(0)));
                        let else_start = out.len();
                        patch(out, branch, else_start);
                        self.block(else_body, out)?;
                        let end = out.len();
                        patch(out, jump, end);
                    }
                    None => {
                        let end = out.len();
                        patch(out, branch, end);
                    }
                }
            }
            StmtKind::Until { condition, body } => {
                let top = out.len();
                self.expr(condition, at, out);
                out.push(at.ins(Opcode::Not));
                let branch = out.len();
                out.push(at.ins(Opcode::BranchFalse(0)));
                self.block(body, out)?;
                let jump = out.len();
                out.push(at.ins(Opcode::Jump(top as isize - jump as isize)));
                let end = out.len();
                patch(out, branch, end);
            }
            StmtKind::When { condition, body } => self.when(condition, body, stmt.span, at, out)?,
        }
        Ok(())
    }

    /// The body runs as a trigger: `condition`, skip to the end when false,
    /// the statements, then disarm itself unless `preserve` was seen.
    fn when(
        &mut self,
        condition: &Expr,
        body: &[Stmt],
        span: Span,
        at: Site,
        out: &mut Vec<Instruction>,
    ) -> Result<(), CompileError> {
        let mut code = Vec::new();
        self.expr(condition, at, &mut code);
        let branch = code.len();
        code.push(at.ins(Opcode::BranchFalse(0)));

        self.triggers.push((false, span));
        let result = self.block(body, &mut code);
        let preserve = self.triggers.pop().is_some_and(|(preserve, _)| preserve);
        result?;

        // nested bodies were appended while compiling ours
        let entry = self.part.functions.len();
        if !preserve {
            code.push(at.ins(literal(Value::Address(Address::Trigger(entry)))));
            code.push(at.ins(Opcode::RemoveTrigger));
        }
        let end = code.len();
        code.push(at.ins(Opcode::EndOfFunction));
        patch(&mut code, branch, end);
        self.part.functions.extend(code);

        let holder = trigger_pointer(at.id);
        out.push(at.ins(literal(Value::Address(Address::Trigger(entry)))));
        out.push(at.ins(Opcode::Store(holder.clone())));
        out.push(at.ins(Opcode::Push(Operand::Variable(holder))));
        out.push(at.ins(Opcode::AddTrigger));
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, at: Site, out: &mut Vec<Instruction>) {
        match &expr.node {
            ExprKind::Number(n) => out.push(at.ins(literal(Value::Number(*n)))),
            ExprKind::Text(s) => out.push(at.ins(literal(Value::Text(s.clone())))),
            ExprKind::Bool(b) => out.push(at.ins(literal(Value::Bool(*b)))),
            ExprKind::Ident(name) => {
                if self.locks.contains(name) {
                    out.push(at.ins(Opcode::Call { destination: pointer(name), argc: 0 }));
                } else {
                    out.push(at.ins(Opcode::Push(Operand::Variable(variable(name)))));
                }
            }
            ExprKind::Call { name, args } => {
                for arg in args {
                    self.expr(arg, at, out);
                }
                out.push(at.ins(Opcode::Call { destination: name.clone(), argc: args.len() }));
            }
            ExprKind::Suffix { target, name } => {
                self.expr(target, at, out);
                out.push(at.ins(Opcode::GetSuffix(name.clone())));
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand, at, out);
                let op = match op {
                    UnaryOp::Negate => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                };
                out.push(at.ins(op));
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(left, at, out);
                self.expr(right, at, out);
                let op = match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Subtract => Opcode::Sub,
                    BinOp::Multiply => Opcode::Mul,
                    BinOp::Divide => Opcode::Div,
                    BinOp::Power => Opcode::Pow,
                    BinOp::Equals => Opcode::Eq,
                    BinOp::NotEquals => Opcode::Ne,
                    BinOp::LessThan => Opcode::Lt,
                    BinOp::LessOrEqual => Opcode::Le,
                    BinOp::GreaterThan => Opcode::Gt,
                    BinOp::GreaterOrEqual => Opcode::Ge,
                    BinOp::And => Opcode::And,
                    BinOp::Or => Opcode::Or,
                };
                out.push(at.ins(op));
            }
        }
    }
}

fn semantic(message: &str, span: Span, enclosing: Option<Span>) -> CompileError {
    CompileError::Semantic { message: message.to_string(), span, enclosing }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_in(compiler: &mut ScriptCompiler, source: &str, context: &str) -> CodePart {
        let mut parts = compiler.compile(source, context, &CompileOptions::new()).unwrap();
        assert_eq!(parts.len(), 1);
        parts.remove(0)
    }

    fn compile(source: &str) -> CodePart {
        compile_in(&mut ScriptCompiler::new(), source, "program")
    }

    fn ops(code: &[Instruction]) -> Vec<Opcode> {
        code.iter().map(|i| i.op.clone()).collect()
    }

    #[test]
    fn set_stores_into_sigil_variable() {
        let part = compile("set Alt to 1 + 2.");
        assert_eq!(
            ops(&part.main),
            vec![
                literal(Value::Number(1.0)),
                literal(Value::Number(2.0)),
                Opcode::Add,
                Opcode::Store("$alt".into()),
            ]
        );
        assert!(part.functions.is_empty());
    }

    #[test]
    fn each_statement_gets_its_own_id() {
        let part = compile("set a to 1.\nprint a.");
        let ids: Vec<u32> = part.main.iter().map(|i| i.id).collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_eq!(ids[2], ids[3]);
        assert!(ids.iter().all(|&id| id > 0));
        assert_eq!(part.main[2].line, 2);
    }

    #[test]
    fn first_line_offsets_reported_lines() {
        let mut compiler = ScriptCompiler::new();
        let options = CompileOptions { first_line: 10 };
        let parts = compiler.compile("print 1.\nprint 2.", "program", &options).unwrap();
        assert_eq!(parts[0].main[0].line, 10);
        assert_eq!(parts[0].main[2].line, 11);
    }

    #[test]
    fn if_else_branches_are_patched() {
        let part = compile("if x { print 1. } else { print 2. }");
        let code = ops(&part.main);
        // push x, brf, push 1, call, jmp, push 2, call
        assert_eq!(code.len(), 7);
        assert_eq!(code[1], Opcode::BranchFalse(4));
        assert_eq!(code[4], Opcode::Jump(3));
    }

    #[test]
    fn if_without_else_branches_past_the_body() {
        let part = compile("if x { print 1. } print 2.");
        let code = ops(&part.main);
        // push x, brf, push 1, call, push 2, call
        assert_eq!(code.len(), 6);
        assert_eq!(code[1], Opcode::BranchFalse(3));
    }

    #[test]
    fn until_loops_back_to_condition() {
        let part = compile("until done { set i to i + 1. }");
        let code = ops(&part.main);
        // push done, not, brf, push i, push 1, add, store, jmp
        assert_eq!(code.len(), 8);
        assert_eq!(code[1], Opcode::Not);
        assert_eq!(code[2], Opcode::BranchFalse(6));
        assert_eq!(code[7], Opcode::Jump(-7));
    }

    #[test]
    fn when_arms_a_trigger_through_a_pointer() {
        let part = compile("when alt > 100 then { print \"high\". }");
        let body = ops(&part.functions);
        assert_eq!(
            body,
            vec![
                Opcode::Push(Operand::Variable("$alt".into())),
                literal(Value::Number(100.0)),
                Opcode::Gt,
                Opcode::BranchFalse(5),
                literal(Value::Text("high".into())),
                Opcode::Call { destination: "print".into(), argc: 1 },
                literal(Value::Address(Address::Trigger(0))),
                Opcode::RemoveTrigger,
                Opcode::EndOfFunction,
            ]
        );
        let id = part.main[0].id;
        let holder = format!("$when-{id}*");
        assert_eq!(
            ops(&part.main),
            vec![
                literal(Value::Address(Address::Trigger(0))),
                Opcode::Store(holder.clone()),
                Opcode::Push(Operand::Variable(holder)),
                Opcode::AddTrigger,
            ]
        );
    }

    #[test]
    fn preserve_keeps_trigger_armed() {
        let part = compile("when x then { preserve. }");
        assert!(!ops(&part.functions).contains(&Opcode::RemoveTrigger));
        assert_eq!(part.functions.last().map(|i| &i.op), Some(&Opcode::EndOfFunction));
    }

    #[test]
    fn nested_when_bodies_get_distinct_entries() {
        let part = compile("when a then { when b then { print 1. } }");
        let entries: Vec<usize> = part
            .functions
            .iter()
            .chain(part.main.iter())
            .filter_map(|i| match &i.op {
                Opcode::Push(Operand::Literal(Value::Address(Address::Trigger(e)))) => Some(*e),
                _ => None,
            })
            .collect();
        // inner body comes first in the function section
        assert!(entries.contains(&0));
        assert!(entries.iter().any(|&e| e > 0));
    }

    #[test]
    fn wait_inside_when_is_rejected() {
        let mut compiler = ScriptCompiler::new();
        let err = compiler
            .compile("when x then { wait 1. }", "program", &CompileOptions::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
        assert!(err.to_string().contains("wait"));
    }

    #[test]
    fn preserve_outside_when_is_rejected() {
        let mut compiler = ScriptCompiler::new();
        let err = compiler.compile("preserve.", "program", &CompileOptions::new()).unwrap_err();
        assert_eq!(err.span(), Span { start: 0, end: 9 });
    }

    #[test]
    fn locks_compile_reads_to_pointer_calls() {
        let mut compiler = ScriptCompiler::new();
        let part = compile_in(&mut compiler, "lock steering to heading + 1.", "interpreter");
        assert_eq!(
            ops(&part.functions),
            vec![
                Opcode::Push(Operand::Variable("$heading".into())),
                literal(Value::Number(1.0)),
                Opcode::Add,
                Opcode::Return,
            ]
        );
        assert_eq!(
            ops(&part.main),
            vec![
                literal(Value::Address(Address::Function(0))),
                Opcode::Store("$steering*".into()),
                Opcode::ToggleFlyByWire { name: "steering".into(), enabled: true },
            ]
        );

        // the lock is remembered for later commands in the same context
        let later = compile_in(&mut compiler, "print steering.", "interpreter");
        assert_eq!(later.main[0].op, Opcode::Call { destination: "$steering*".into(), argc: 0 });

        // other contexts do not see it
        let other = compile_in(&mut compiler, "print steering.", "program");
        assert_eq!(other.main[0].op, Opcode::Push(Operand::Variable("$steering".into())));

        compiler.clear_context("interpreter");
        let cleared = compile_in(&mut compiler, "print steering.", "interpreter");
        assert_eq!(cleared.main[0].op, Opcode::Push(Operand::Variable("$steering".into())));
    }

    #[test]
    fn unlock_forgets_the_lock() {
        let mut compiler = ScriptCompiler::new();
        compile_in(&mut compiler, "lock throttle to 1.", "interpreter");
        let part = compile_in(&mut compiler, "unlock throttle.", "interpreter");
        assert_eq!(
            ops(&part.main),
            vec![
                Opcode::Unset("$throttle*".into()),
                Opcode::ToggleFlyByWire { name: "throttle".into(), enabled: false },
            ]
        );
        assert_eq!(compiler.locks("interpreter").count(), 0);
    }

    #[test]
    fn failed_compile_does_not_record_locks() {
        let mut compiler = ScriptCompiler::new();
        let result = compiler.compile("lock a to 1. preserve.", "interpreter", &CompileOptions::new());
        assert!(result.is_err());
        assert_eq!(compiler.locks("interpreter").count(), 0);
    }

    #[test]
    fn lex_and_parse_errors_carry_spans() {
        let mut compiler = ScriptCompiler::new();
        let lex = compiler.compile("set x to 1;", "program", &CompileOptions::new()).unwrap_err();
        assert!(matches!(lex, CompileError::Lex(_)));
        assert_eq!(lex.span(), Span { start: 10, end: 11 });

        let parse = compiler.compile("set x 1.", "program", &CompileOptions::new()).unwrap_err();
        assert!(matches!(parse, CompileError::Parse(_)));
        assert_eq!(parse.span(), Span { start: 6, end: 7 });
    }
}
