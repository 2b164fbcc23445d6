//! Builtin functions callable from scripts, registered by name at startup.

use std::collections::HashMap;

use crate::vm::value::{Structure, Value};
use crate::vm::{Cpu, EngineError, EngineResult};

/// A builtin receives its arguments in call order. `None` means the call
/// leaves nothing on the stack.
pub type Builtin = fn(&mut Cpu, &[Value]) -> EngineResult<Option<Value>>;

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Builtin>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry { functions: HashMap::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = FunctionRegistry::new();
        registry
            .register("print", print)
            .register("abs", |_, a| unary(a, "abs", f64::abs))
            .register("floor", |_, a| unary(a, "floor", f64::floor))
            .register("ceiling", |_, a| unary(a, "ceiling", f64::ceil))
            .register("round", |_, a| unary(a, "round", f64::round))
            .register("sqrt", |_, a| unary(a, "sqrt", f64::sqrt))
            .register("min", |_, a| binary(a, "min", f64::min))
            .register("max", |_, a| binary(a, "max", f64::max))
            .register("mod", modulo)
            .register("random", random)
            .register("vector", vector);
        registry
    }

    /// Add or replace a builtin. Names are case-insensitive.
    pub fn register(&mut self, name: &str, function: Builtin) -> &mut Self {
        self.functions.insert(name.to_lowercase(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Builtin> {
        self.functions.get(&name.to_lowercase()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn arity(args: &[Value], name: &str, expected: usize) -> EngineResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EngineError::InvalidOperandType(format!(
            "{name} expects {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn number(value: &Value, name: &str) -> EngineResult<f64> {
    value.as_number().ok_or_else(|| {
        EngineError::InvalidOperandType(format!("{name} expects a number, got {}", value.type_name()))
    })
}

fn unary(args: &[Value], name: &str, f: fn(f64) -> f64) -> EngineResult<Option<Value>> {
    arity(args, name, 1)?;
    Ok(Some(Value::Number(f(number(&args[0], name)?))))
}

fn binary(args: &[Value], name: &str, f: fn(f64, f64) -> f64) -> EngineResult<Option<Value>> {
    arity(args, name, 2)?;
    Ok(Some(Value::Number(f(number(&args[0], name)?, number(&args[1], name)?))))
}

fn print(cpu: &mut Cpu, args: &[Value]) -> EngineResult<Option<Value>> {
    arity(args, "print", 1)?;
    cpu.print(&args[0].to_string());
    Ok(None)
}

fn modulo(_: &mut Cpu, args: &[Value]) -> EngineResult<Option<Value>> {
    arity(args, "mod", 2)?;
    let divisor = number(&args[1], "mod")?;
    if divisor == 0.0 {
        return Err(EngineError::DivisionByZero);
    }
    Ok(Some(Value::Number(number(&args[0], "mod")? % divisor)))
}

fn random(_: &mut Cpu, args: &[Value]) -> EngineResult<Option<Value>> {
    arity(args, "random", 0)?;
    Ok(Some(Value::Number(fastrand::f64())))
}

fn vector(_: &mut Cpu, args: &[Value]) -> EngineResult<Option<Value>> {
    arity(args, "vector", 3)?;
    let x = number(&args[0], "vector")?;
    let y = number(&args[1], "vector")?;
    let z = number(&args[2], "vector")?;
    let magnitude = (x * x + y * y + z * z).sqrt();
    Ok(Some(Value::Structure(
        Structure::new("vector")
            .with_field("x", Value::Number(x))
            .with_field("y", Value::Number(y))
            .with_field("z", Value::Number(z))
            .with_field("mag", Value::Number(magnitude)),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::host::{BufferScreen, Host};

    fn cpu() -> (Cpu, BufferScreen) {
        let screen = BufferScreen::new();
        let cpu = Cpu::new(EngineConfig::default(), Host::new().with_screen(screen.clone()));
        (cpu, screen)
    }

    fn call(name: &str, args: &[Value]) -> EngineResult<Option<Value>> {
        let (mut cpu, _) = cpu();
        let registry = FunctionRegistry::with_defaults();
        let f = registry.get(name).unwrap();
        f(&mut cpu, args)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_defaults();
        assert!(registry.get("ABS").is_some());
        assert!(registry.get("nope").is_none());
        assert!(registry.names().contains(&"vector"));
    }

    #[test]
    fn math_builtins() {
        assert_eq!(call("abs", &[Value::Number(-2.5)]).unwrap(), Some(Value::Number(2.5)));
        assert_eq!(call("floor", &[Value::Number(2.7)]).unwrap(), Some(Value::Number(2.0)));
        assert_eq!(call("ceiling", &[Value::Number(2.1)]).unwrap(), Some(Value::Number(3.0)));
        assert_eq!(call("round", &[Value::Number(2.5)]).unwrap(), Some(Value::Number(3.0)));
        assert_eq!(
            call("max", &[Value::Number(1.0), Value::Number(4.0)]).unwrap(),
            Some(Value::Number(4.0))
        );
        assert_eq!(
            call("mod", &[Value::Number(7.0), Value::Number(3.0)]).unwrap(),
            Some(Value::Number(1.0))
        );
    }

    #[test]
    fn wrong_arity_and_types_are_rejected() {
        assert!(matches!(call("abs", &[]), Err(EngineError::InvalidOperandType(_))));
        assert!(matches!(
            call("sqrt", &[Value::Text("x".into())]),
            Err(EngineError::InvalidOperandType(_))
        ));
        assert!(matches!(
            call("mod", &[Value::Number(1.0), Value::Number(0.0)]),
            Err(EngineError::DivisionByZero)
        ));
    }

    #[test]
    fn random_is_in_unit_interval() {
        for _ in 0..32 {
            match call("random", &[]).unwrap() {
                Some(Value::Number(n)) => assert!((0.0..1.0).contains(&n)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn vector_exposes_suffixes() {
        let v = call("vector", &[Value::Number(3.0), Value::Number(4.0), Value::Number(0.0)])
            .unwrap()
            .unwrap();
        match v {
            Value::Structure(s) => {
                assert_eq!(s.suffix("MAG"), Some(&Value::Number(5.0)));
                assert_eq!(s.suffix("y"), Some(&Value::Number(4.0)));
            }
            other => panic!("expected structure, got {:?}", other),
        }
    }

    #[test]
    fn print_writes_to_screen() {
        let (mut cpu, screen) = cpu();
        let result = print(&mut cpu, &[Value::Number(42.0)]).unwrap();
        assert!(result.is_none());
        assert_eq!(screen.lines(), vec!["42"]);
    }
}
