// Function manager (§6): resolves a called name + arity to either a
// built-in or a user-defined function, during rval-evaluator
// construction. Kept as a trait so the crate is testable without a real
// built-in function library (out of scope, per spec.md §1) — the
// `Fmgr` type below is the minimal concrete implementation this crate
// needs to exercise the executor end to end.

use std::collections::HashMap;
use std::rc::Rc;

use crate::cst::UdfDef;
use crate::mlrval::Mlrval;

pub type BuiltinFn = fn(&[Mlrval]) -> Mlrval;

#[derive(Clone)]
pub enum FuncId {
    Builtin(BuiltinFn),
    Udf(Rc<UdfDef>),
}

pub trait FunctionManager {
    /// `None` means no function/UDF with this name and arity exists.
    fn resolve(&self, name: &str, arity: usize) -> Option<FuncId>;
}

fn builtin_abs(args: &[Mlrval]) -> Mlrval {
    match &args[0] {
        Mlrval::Int(i) => Mlrval::Int(i.abs()),
        Mlrval::Float(f) => Mlrval::Float(f.abs()),
        Mlrval::Absent => Mlrval::Absent,
        _ => Mlrval::Error(crate::mlrval::ErrorKind::TypeMismatch),
    }
}

fn builtin_strlen(args: &[Mlrval]) -> Mlrval {
    match &args[0] {
        Mlrval::Str(s) => Mlrval::Int(s.chars().count() as i64),
        Mlrval::Absent => Mlrval::Absent,
        other => Mlrval::Int(other.format().chars().count() as i64),
    }
}

fn builtin_min(args: &[Mlrval]) -> Mlrval {
    args[0].lt(&args[1]).truthy().then(|| args[0].clone()).unwrap_or_else(|| args[1].clone())
}

fn builtin_max(args: &[Mlrval]) -> Mlrval {
    args[0].gt(&args[1]).truthy().then(|| args[0].clone()).unwrap_or_else(|| args[1].clone())
}

/// The reference function manager: a small fixed built-in table plus
/// whatever user-defined functions/subroutines `cst::build` registers
/// from the script's own `func`/`subr` definitions.
#[derive(Default)]
pub struct Fmgr {
    builtins: HashMap<(&'static str, usize), BuiltinFn>,
    udfs: HashMap<String, Rc<UdfDef>>,
}

impl Fmgr {
    pub fn new() -> Fmgr {
        let mut builtins = HashMap::new();
        builtins.insert(("abs", 1), builtin_abs as BuiltinFn);
        builtins.insert(("strlen", 1), builtin_strlen as BuiltinFn);
        builtins.insert(("min", 2), builtin_min as BuiltinFn);
        builtins.insert(("max", 2), builtin_max as BuiltinFn);
        Fmgr { builtins, udfs: HashMap::new() }
    }

    pub fn register_udf(&mut self, name: String, def: Rc<UdfDef>) {
        self.udfs.insert(name, def);
    }

    pub fn lookup_udf(&self, name: &str) -> Option<&Rc<UdfDef>> {
        self.udfs.get(name)
    }

    pub fn into_udfs(self) -> HashMap<String, Rc<UdfDef>> {
        self.udfs
    }
}

impl FunctionManager for Fmgr {
    fn resolve(&self, name: &str, arity: usize) -> Option<FuncId> {
        if let Some(def) = self.udfs.get(name) {
            return (def.params.len() == arity).then(|| FuncId::Udf(def.clone()));
        }
        self.builtins
            .iter()
            .find(|((n, a), _)| *n == name && *a == arity)
            .map(|(_, f)| FuncId::Builtin(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_by_name_and_arity() {
        let fmgr = Fmgr::new();
        assert!(matches!(fmgr.resolve("abs", 1), Some(FuncId::Builtin(_))));
        assert!(fmgr.resolve("abs", 2).is_none());
        assert!(fmgr.resolve("nope", 1).is_none());
    }

    #[test]
    fn abs_and_min_max_builtins() {
        assert_eq!(builtin_abs(&[Mlrval::Int(-3)]), Mlrval::Int(3));
        assert_eq!(builtin_min(&[Mlrval::Int(2), Mlrval::Int(5)]), Mlrval::Int(2));
        assert_eq!(builtin_max(&[Mlrval::Int(2), Mlrval::Int(5)]), Mlrval::Int(5));
    }
}
