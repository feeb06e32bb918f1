// Calling a user-defined function or subroutine (§4.3.6): push a fresh
// frame sized for the callee's own locals, bind its parameters into
// the low slots, run its body, and collect whatever `return` left
// behind. Mirrors the push/exec/pop shape `exec::run_top_level` uses
// for begin/main/end, just with parameter binding added and the frame
// sized per-callee rather than per-top-level-block.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cst::UdfDef;
use crate::error::IoSinkError;
use crate::exec::{exec_block, set_slot, Outputs, Vars};
use crate::frame::Frame;
use crate::mlrval::Mlrval;

/// A function body can never contain emit/emitf/tee/print/dump
/// (cst.rs's `SideEffectInFunction` check enforces this at build time),
/// so `call_func` never needs a real output sink.
struct NullOutputs;

impl Outputs for NullOutputs {
    fn emit_record(&mut self, _fields: IndexMap<String, String>) {}
    fn print_line(&mut self, _text: String, _to_stderr: bool) {}
    fn dump_json(&mut self, _json: Json) {}
    fn tee_record(&mut self, _path: &str, _fields: &IndexMap<String, String>) -> Result<(), IoSinkError> {
        Ok(())
    }
}

fn bind_params(def: &UdfDef, args: Vec<Mlrval>, vars: &mut Vars) {
    vars.locals.push(Frame::new(def.max_var_depth));
    for ((slot, mask), value) in def.params.iter().zip(args) {
        vars.locals.current().declare(*slot, *mask);
        set_slot(vars, *slot, value);
    }
}

pub fn call_func(def: &Rc<UdfDef>, args: Vec<Mlrval>, vars: &mut Vars) -> Mlrval {
    bind_params(def, args, vars);
    let mut sink = NullOutputs;
    exec_block(&def.body.borrow(), vars, &mut sink);
    let result = vars.return_state.take().unwrap_or(Mlrval::Absent);
    vars.locals.pop();
    result
}

pub fn call_subr(def: &Rc<UdfDef>, args: Vec<Mlrval>, vars: &mut Vars, outputs: &mut dyn Outputs) {
    bind_params(def, args, vars);
    exec_block(&def.body.borrow(), vars, outputs);
    vars.return_state.take();
    vars.locals.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::cst::build_program;
    use crate::mlrval::{TypeInferencing, MASK_ANY};
    use std::rc::Rc as StdRc;

    #[test]
    fn function_call_returns_computed_value() {
        // func double(x) { return x + x } ; main: $y = double($x);
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![
                ast::TopLevelBlock::FuncDef {
                    name: "double".into(),
                    params: vec![ast::Param { name_ref: StdRc::new(ast::NameRef::new("x")), mask: MASK_ANY }],
                    ret_mask: MASK_ANY,
                    body: ast::Block::new(vec![StdRc::new(ast::Statement::Return(Some(StdRc::new(ast::Expr::BinOp(
                        ast::BinOp::Add,
                        StdRc::new(ast::Expr::LocalRead(StdRc::new(ast::NameRef::new("x")))),
                        StdRc::new(ast::Expr::LocalRead(StdRc::new(ast::NameRef::new("x")))),
                    )))))]),
                },
                ast::TopLevelBlock::Main(ast::Block::new(vec![StdRc::new(ast::Statement::Assign(
                    ast::AssignTarget::Field("y".into()),
                    StdRc::new(ast::Expr::Call("double".into(), vec![StdRc::new(ast::Expr::FieldRead("x".into()))])),
                ))])),
            ],
        };
        let built = build_program(&program, TypeInferencing::IntOrFloat, false, false, ".".into()).unwrap();
        let mut srec = IndexMap::new();
        srec.insert("x".to_string(), "4".to_string());
        let mut vars = Vars::new(srec);
        let mut outputs = NullOutputs;
        crate::exec::run_top_level(&built.main, built.main_depth, &mut vars, &mut outputs);
        assert_eq!(vars.srec.get("y").unwrap(), "8");
    }

    #[test]
    fn subroutine_call_can_mutate_oosvars() {
        // subr bump() { @total = @total + 1 } ; main: call bump();
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![
                ast::TopLevelBlock::SubrDef {
                    name: "bump".into(),
                    params: vec![],
                    body: ast::Block::new(vec![StdRc::new(ast::Statement::Assign(
                        ast::AssignTarget::Oosvar(vec![StdRc::new(ast::Expr::StrLit("total".into()))]),
                        StdRc::new(ast::Expr::BinOp(
                            ast::BinOp::Add,
                            StdRc::new(ast::Expr::OosvarRead(vec![StdRc::new(ast::Expr::StrLit("total".into()))])),
                            StdRc::new(ast::Expr::IntLit(1)),
                        )),
                    ))]),
                },
                ast::TopLevelBlock::Main(ast::Block::new(vec![StdRc::new(ast::Statement::CallSubr("bump".into(), vec![]))])),
            ],
        };
        let built = build_program(&program, TypeInferencing::IntOrFloat, false, false, ".".into()).unwrap();
        let mut vars = Vars::new(IndexMap::new());
        let mut outputs = NullOutputs;
        crate::exec::run_top_level(&built.main, built.main_depth, &mut vars, &mut outputs);
        crate::exec::run_top_level(&built.main, built.main_depth, &mut vars, &mut outputs);
        assert_eq!(vars.oosvars.get(&[Mlrval::Str("total".into())]), Mlrval::Int(2));
    }
}
