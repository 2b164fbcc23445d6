use std::collections::HashMap;

use super::value::{POINTER_MARKER, SIGIL, TRIGGER_MARKER, Value};
use super::{EngineError, EngineResult};

/// A named mutable cell. Host-bound cells are refreshed by the binding
/// manager and cannot be removed by user code.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Option<Value>,
    bound: bool,
}

impl Variable {
    fn new(name: String) -> Self {
        Variable { name, value: None, bound: false }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_pointer(&self) -> bool {
        is_pointer_name(&self.name)
    }
}

/// Lower-case the name and make sure it carries the variable sigil.
pub fn normalize(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.starts_with(SIGIL) {
        lower
    } else {
        format!("{SIGIL}{lower}")
    }
}

pub fn is_pointer_name(name: &str) -> bool {
    name.contains(POINTER_MARKER)
}

/// True when the name carries any internal marker and must never be persisted.
pub fn has_internal_marker(name: &str) -> bool {
    name.contains(POINTER_MARKER) || name.contains(TRIGGER_MARKER)
}

#[derive(Debug, Default)]
pub struct VariableTable {
    variables: HashMap<String, Variable>,
}

impl VariableTable {
    pub fn new() -> Self {
        VariableTable { variables: HashMap::new() }
    }

    pub fn get_or_create(&mut self, name: &str) -> &mut Variable {
        let key = normalize(name);
        self.variables.entry(key.clone()).or_insert_with(|| Variable::new(key))
    }

    pub fn get(&self, name: &str) -> EngineResult<&Variable> {
        let key = normalize(name);
        self.variables.get(&key).ok_or(EngineError::UndefinedVariable { name: key })
    }

    /// Read a variable's value; a declared but never assigned cell is undefined too.
    pub fn value(&self, name: &str) -> EngineResult<&Value> {
        let variable = self.get(name)?;
        variable
            .value
            .as_ref()
            .ok_or_else(|| EngineError::UndefinedVariable { name: variable.name.clone() })
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.get_or_create(name).value = Some(value);
    }

    /// Create or refresh a host-bound variable.
    pub fn bind(&mut self, name: &str, value: Value) {
        let variable = self.get_or_create(name);
        variable.bound = true;
        variable.value = Some(value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(&normalize(name))
    }

    /// Remove a user variable. Host-bound variables are left untouched.
    /// Returns whether a binding was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = normalize(name);
        match self.variables.get_mut(&key) {
            Some(variable) if !variable.bound => {
                variable.value = None;
                self.variables.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn remove_all(&mut self) {
        self.variables.retain(|_, variable| {
            if variable.bound {
                return true;
            }
            variable.value = None;
            false
        });
    }

    /// Drop every binding including host-bound ones. Only used at boot.
    pub fn clear(&mut self) {
        self.variables.clear();
    }

    /// Move every pointer variable out of the table.
    pub(crate) fn take_pointers(&mut self) -> HashMap<String, Variable> {
        let names: Vec<String> = self.variables.keys().filter(|k| is_pointer_name(k)).cloned().collect();
        names
            .into_iter()
            .filter_map(|name| self.variables.remove_entry(&name))
            .collect()
    }

    pub(crate) fn insert(&mut self, variable: Variable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut table = VariableTable::new();
        table.set("X", Value::Number(1.0));
        assert_eq!(table.value("x").unwrap(), &Value::Number(1.0));
        assert_eq!(table.value("$X").unwrap(), &Value::Number(1.0));
        assert_eq!(table.get("x").unwrap().name, "$x");
    }

    #[test]
    fn missing_variable_is_undefined() {
        let table = VariableTable::new();
        match table.get("nope") {
            Err(EngineError::UndefinedVariable { name }) => assert_eq!(name, "$nope"),
            other => panic!("expected UndefinedVariable, got {:?}", other),
        }
    }

    #[test]
    fn created_but_unset_variable_has_no_value() {
        let mut table = VariableTable::new();
        table.get_or_create("empty");
        assert!(table.contains("empty"));
        assert!(matches!(table.value("empty"), Err(EngineError::UndefinedVariable { .. })));
    }

    #[test]
    fn bound_variables_survive_removal() {
        let mut table = VariableTable::new();
        table.bind("altitude", Value::Number(70.0));
        table.set("a", Value::Number(1.0));
        table.set("b", Value::Text("x".into()));

        assert!(!table.remove("altitude"));
        assert!(table.remove("a"));
        assert!(!table.remove("a"));

        table.remove_all();
        assert_eq!(table.len(), 1);
        assert!(table.get("altitude").unwrap().is_bound());
    }

    #[test]
    fn take_pointers_strips_marked_names() {
        let mut table = VariableTable::new();
        table.set("steering*", Value::Number(0.0));
        table.set("when-3*", Value::Number(0.0));
        table.set("plain", Value::Number(0.0));
        let pointers = table.take_pointers();
        assert_eq!(pointers.len(), 2);
        assert!(pointers.contains_key("$steering*"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn marker_detection() {
        assert!(has_internal_marker("$when-1*"));
        assert!(has_internal_marker("$a-b"));
        assert!(!has_internal_marker("$alt"));
        assert!(!is_pointer_name("$a-b"));
    }
}
