// The rval evaluator (§6): the opaque seam that turns a scalar
// right-hand-side AST expression into something that can be asked,
// repeatedly, `process(vars) -> mlrval`. Out of scope per spec.md §1 as
// a *library*; what lives here is the minimal concrete evaluator this
// crate needs to actually run scripts end to end, compiled once at CST
// build time into a small tree of closures-over-data rather than
// re-walking the AST node on every record (the teacher's own vm.rs
// compiles `Insn` once and only interprets opcodes per record; this is
// the same shape one level up).
//
// `free()` from the original interface doesn't need a Rust analogue:
// ownership and `Drop` release an evaluator's state when its owning
// `CstStatement` is dropped.

use std::rc::Rc;

use crate::ast;
use crate::exec::Vars;
use crate::fmgr::{FuncId, FunctionManager};
use crate::mlrval::{Mlrval, TypeInferencing};
use crate::udf;

pub trait Evaluator {
    fn process(&self, vars: &mut Vars) -> Mlrval;
}

/// Build a compiled evaluator for a scalar expression. Every name read
/// here has already been through stack_allocate.rs (so `NameRef::slot()`
/// never panics) and every call site has already been through
/// `cst::build`'s validation pass (so `fmgr.resolve` never fails here).
pub fn build(node: &ast::Node<ast::Expr>, fmgr: &dyn FunctionManager, mode: TypeInferencing) -> Box<dyn Evaluator> {
    Box::new(AstEvaluator { root: compile(node, fmgr, mode) })
}

/// A literal-string evaluator, for contexts (map-literal string keys)
/// that only ever need a constant (§6, `from_string`).
pub fn from_string(text: &str) -> Box<dyn Evaluator> {
    Box::new(AstEvaluator { root: Compiled::Str(text.to_string()) })
}

struct AstEvaluator {
    root: Compiled,
}

impl Evaluator for AstEvaluator {
    fn process(&self, vars: &mut Vars) -> Mlrval {
        eval(&self.root, vars)
    }
}

enum Compiled {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    LocalRead(usize),
    FieldRead(String, TypeInferencing),
    FieldReadIndirect(Box<Compiled>, TypeInferencing),
    OosvarRead(Vec<Compiled>),
    FullSrec(TypeInferencing),
    EnvRead(Box<Compiled>),
    BinOp(ast::BinOp, Box<Compiled>, Box<Compiled>),
    UnOp(ast::UnOp, Box<Compiled>),
    Call(FuncId, Vec<Compiled>),
    MapLit(Vec<(Compiled, Compiled)>),
}

fn compile(node: &ast::Expr, fmgr: &dyn FunctionManager, mode: TypeInferencing) -> Compiled {
    match node {
        ast::Expr::IntLit(i) => Compiled::Int(*i),
        ast::Expr::FloatLit(f) => Compiled::Float(*f),
        ast::Expr::StrLit(s) => Compiled::Str(s.clone()),
        ast::Expr::BoolLit(b) => Compiled::Bool(*b),
        ast::Expr::LocalRead(name_ref) => Compiled::LocalRead(name_ref.slot()),
        ast::Expr::FieldRead(name) => Compiled::FieldRead(name.clone(), mode),
        ast::Expr::FieldReadIndirect(e) => {
            Compiled::FieldReadIndirect(Box::new(compile(e, fmgr, mode)), mode)
        }
        ast::Expr::OosvarRead(keylist) | ast::Expr::FullOosvarRead(keylist) => {
            Compiled::OosvarRead(keylist.iter().map(|k| compile(k, fmgr, mode)).collect())
        }
        ast::Expr::FullSrec => Compiled::FullSrec(mode),
        ast::Expr::EnvRead(e) => Compiled::EnvRead(Box::new(compile(e, fmgr, mode))),
        ast::Expr::BinOp(op, a, b) => {
            Compiled::BinOp(*op, Box::new(compile(a, fmgr, mode)), Box::new(compile(b, fmgr, mode)))
        }
        ast::Expr::UnOp(op, a) => Compiled::UnOp(*op, Box::new(compile(a, fmgr, mode))),
        ast::Expr::Call(name, args) => {
            let compiled_args: Vec<Compiled> = args.iter().map(|a| compile(a, fmgr, mode)).collect();
            let target = fmgr
                .resolve(name, args.len())
                .unwrap_or_else(|| panic!("unresolved call to `{}` survived cst::build validation", name));
            Compiled::Call(target, compiled_args)
        }
        ast::Expr::MapLit(pairs) => Compiled::MapLit(
            pairs.iter().map(|(k, v)| (compile(k, fmgr, mode), compile(v, fmgr, mode))).collect(),
        ),
    }
}

fn eval(node: &Compiled, vars: &mut Vars) -> Mlrval {
    match node {
        Compiled::Int(i) => Mlrval::Int(*i),
        Compiled::Float(f) => Mlrval::Float(*f),
        Compiled::Str(s) => Mlrval::Str(s.clone()),
        Compiled::Bool(b) => Mlrval::Bool(*b),
        Compiled::LocalRead(slot) => vars.locals.current_ref().get(*slot),
        Compiled::FieldRead(name, mode) => match vars.srec.get(name) {
            Some(text) => Mlrval::infer(text, *mode),
            None => Mlrval::Absent,
        },
        Compiled::FieldReadIndirect(name_expr, mode) => {
            let name = eval(name_expr, vars);
            if name.is_absent() || name.is_error() {
                return name;
            }
            match vars.srec.get(&name.format()) {
                Some(text) => Mlrval::infer(text, *mode),
                None => Mlrval::Absent,
            }
        }
        Compiled::OosvarRead(keylist) => {
            let keys = eval_keylist(keylist, vars);
            match keys {
                None => Mlrval::Absent,
                Some(keys) => vars.oosvars.get(&keys),
            }
        }
        Compiled::FullSrec(mode) => {
            let mut map = crate::mlhmmv::Mlhmmv::new();
            for (k, v) in vars.srec.iter() {
                map.put(&[Mlrval::Str(k.clone())], Mlrval::infer(v, *mode));
            }
            Mlrval::Map(map)
        }
        Compiled::EnvRead(name_expr) => {
            let name = eval(name_expr, vars);
            match std::env::var(name.format()) {
                Ok(v) => Mlrval::Str(v),
                Err(_) => Mlrval::Absent,
            }
        }
        Compiled::BinOp(op, a, b) => {
            let lhs = eval(a, vars);
            let rhs = eval(b, vars);
            match op {
                ast::BinOp::Add => lhs.add(&rhs),
                ast::BinOp::Sub => lhs.sub(&rhs),
                ast::BinOp::Mul => lhs.mul(&rhs),
                ast::BinOp::Div => lhs.div(&rhs),
                ast::BinOp::Lt => lhs.lt(&rhs),
                ast::BinOp::Gt => lhs.gt(&rhs),
                ast::BinOp::Lte => lhs.lte(&rhs),
                ast::BinOp::Gte => lhs.gte(&rhs),
                ast::BinOp::Eq => lhs.eq_val(&rhs),
                ast::BinOp::And => lhs.and(&rhs),
                ast::BinOp::Or => lhs.or(&rhs),
            }
        }
        Compiled::UnOp(op, a) => {
            let v = eval(a, vars);
            match op {
                ast::UnOp::Not => v.not(),
                ast::UnOp::Neg => v.neg(),
            }
        }
        Compiled::Call(target, args) => {
            let values: Vec<Mlrval> = args.iter().map(|a| eval(a, vars)).collect();
            match target {
                FuncId::Builtin(f) => f(&values),
                FuncId::Udf(def) => udf::call_func(def, values, vars),
            }
        }
        Compiled::MapLit(pairs) => {
            let mut map = crate::mlhmmv::Mlhmmv::new();
            for (k, v) in pairs {
                let key = eval(k, vars);
                let val = eval(v, vars);
                map.put(&[key], val);
            }
            Mlrval::Map(map)
        }
    }
}

/// Evaluate a keylist; per §4.3.1/§4.3.3 a null (absent or error) key
/// anywhere in the list aborts the whole operation.
pub fn eval_keylist(keylist: &[Compiled], vars: &mut Vars) -> Option<Vec<Mlrval>> {
    let mut out = Vec::with_capacity(keylist.len());
    for k in keylist {
        let v = eval(k, vars);
        if v.is_absent() || v.is_error() {
            return None;
        }
        out.push(v);
    }
    Some(out)
}

/// Same as `eval_keylist`, for the keylists held by `CstStatement`
/// (`cst.rs`) as boxed trait objects rather than `Compiled` nodes.
pub fn eval_keylist_dyn(keylist: &[Box<dyn Evaluator>], vars: &mut Vars) -> Option<Vec<Mlrval>> {
    let mut out = Vec::with_capacity(keylist.len());
    for k in keylist {
        let v = k.process(vars);
        if v.is_absent() || v.is_error() {
            return None;
        }
        out.push(v);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Vars;
    use crate::fmgr::Fmgr;
    use indexmap::IndexMap;

    fn vars() -> Vars {
        Vars::new(IndexMap::new())
    }

    #[test]
    fn arithmetic_compiles_and_evaluates() {
        let fmgr = Fmgr::new();
        let expr: ast::Node<ast::Expr> = Rc::new(ast::Expr::BinOp(
            ast::BinOp::Add,
            Rc::new(ast::Expr::IntLit(1)),
            Rc::new(ast::Expr::IntLit(2)),
        ));
        let ev = build(&expr, &fmgr, TypeInferencing::IntOrFloat);
        assert_eq!(ev.process(&mut vars()), Mlrval::Int(3));
    }

    #[test]
    fn field_read_infers_by_mode() {
        let fmgr = Fmgr::new();
        let mut v = vars();
        v.srec.insert("x".to_string(), "42".to_string());
        let expr: ast::Node<ast::Expr> = Rc::new(ast::Expr::FieldRead("x".to_string()));
        let ev = build(&expr, &fmgr, TypeInferencing::IntOrFloat);
        assert_eq!(ev.process(&mut v), Mlrval::Int(42));
    }

    #[test]
    fn builtin_call_dispatches() {
        let fmgr = Fmgr::new();
        let expr: ast::Node<ast::Expr> =
            Rc::new(ast::Expr::Call("abs".to_string(), vec![Rc::new(ast::Expr::IntLit(-5))]));
        let ev = build(&expr, &fmgr, TypeInferencing::IntOrFloat);
        assert_eq!(ev.process(&mut vars()), Mlrval::Int(5));
    }
}
