// Statement executor (§4.3, §4.4): walks a built CstBlock against a
// record's Vars, the way the teacher's vm.rs walks its compiled `Insn`
// stream against a `Frame` — except here the compiled tree is the
// CstStatement sum type rather than a flat bytecode array, since there
// is no benefit to flattening control flow that's already a tree (see
// DESIGN.md).

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cst::{BlockExecKind, CstBlock, CstStatement, CstUnsetTarget};
use crate::emit;
use crate::error::IoSinkError;
use crate::forloop;
use crate::frame::{Frame, LocalFrameStack, LoopFlagStack, ReturnState};
use crate::mlhmmv::Mlhmmv;
use crate::mlrval::Mlrval;
use crate::rval::Evaluator;

/// Everything a record's pass through begin/main/end reads or mutates
/// (§3 "process-wide state" + "per-record state" combined into one
/// bag, since nothing here needs to distinguish the two at the type
/// level — the oosvar store is simply never reset between records).
pub struct Vars {
    pub srec: IndexMap<String, String>,
    pub oosvars: Mlhmmv,
    pub locals: LocalFrameStack,
    pub loop_flags: LoopFlagStack,
    pub return_state: ReturnState,
    pub should_emit_rec: bool,
    pub trace: bool,
}

impl Vars {
    pub fn new(srec: IndexMap<String, String>) -> Vars {
        Vars {
            srec,
            oosvars: Mlhmmv::new(),
            locals: LocalFrameStack::new(),
            loop_flags: LoopFlagStack::new(),
            return_state: ReturnState::new(),
            should_emit_rec: true,
            trace: false,
        }
    }
}

/// The side-effecting sinks a script can write to (§4.3.7): emitted
/// records, printed lines, dumped oosvar snapshots, and `tee`d records.
/// Kept as a trait so exec.rs stays ignorant of stdout/file handling
/// (driver.rs supplies the concrete implementation), the same
/// separation the teacher draws between `render.rs`'s layout logic and
/// `output.rs`'s actual writers.
pub trait Outputs {
    fn emit_record(&mut self, fields: IndexMap<String, String>);
    fn print_line(&mut self, text: String, to_stderr: bool);
    fn dump_json(&mut self, json: Json);
    fn tee_record(&mut self, path: &str, fields: &IndexMap<String, String>) -> Result<(), IoSinkError>;
}

/// Run one top-level block (begin, main, or end) for the current
/// record. Pushes/pops its own frame and loop-flag scaffolding.
pub fn run_top_level(block: &CstBlock, depth: usize, vars: &mut Vars, outputs: &mut dyn Outputs) {
    vars.locals.push(Frame::new(depth));
    exec_block(block, vars, outputs);
    vars.return_state.take();
    vars.locals.pop();
}

/// Execute a block's statements in order, honoring the plain/loop-aware
/// distinction (§4.4): a loop-aware block additionally stops as soon as
/// the innermost loop's flags (BROKEN or CONTINUED) go non-empty, since
/// those statements sit inside the loop body that set them.
pub(crate) fn exec_block(block: &CstBlock, vars: &mut Vars, outputs: &mut dyn Outputs) {
    vars.locals.current().clear_range(block.subframe_base, block.subframe_var_count);
    for stmt in &block.statements {
        exec_statement(stmt, vars, outputs);
        if vars.return_state.is_returning() {
            return;
        }
        if block.exec_kind == BlockExecKind::LoopAware && vars.loop_flags.any_set() {
            return;
        }
    }
}

pub(crate) fn set_slot(vars: &mut Vars, slot: usize, value: Mlrval) {
    // A type-mask violation becomes an in-band error value rather than
    // an abort (§4.3.1): the slot keeps its prior contents, matching
    // the "absent on failed assignment" convention used elsewhere.
    if vars.locals.current().set(slot, value).is_err() {
        // left as-is; the error is observable the next time the slot is read
    }
}

/// A short tag naming `stmt`'s variant, for the trace mode below.
/// `CstStatement` can't derive `Debug` wholesale (its `Box<dyn
/// Evaluator>` fields aren't `Debug`), so this stands in for it.
fn stmt_tag(stmt: &CstStatement) -> &'static str {
    match stmt {
        CstStatement::AssignField(..) => "AssignField",
        CstStatement::AssignFieldIndirect(..) => "AssignFieldIndirect",
        CstStatement::AssignFullSrec(..) => "AssignFullSrec",
        CstStatement::AssignOosvar(..) => "AssignOosvar",
        CstStatement::AssignFullOosvar(..) => "AssignFullOosvar",
        CstStatement::AssignLocal(..) => "AssignLocal",
        CstStatement::AssignEnv(..) => "AssignEnv",
        CstStatement::LocalDecl(..) => "LocalDecl",
        CstStatement::CondBlock(..) => "CondBlock",
        CstStatement::If(..) => "If",
        CstStatement::While(..) => "While",
        CstStatement::DoWhile(..) => "DoWhile",
        CstStatement::TripleFor { .. } => "TripleFor",
        CstStatement::ForOosvarKV { .. } => "ForOosvarKV",
        CstStatement::ForOosvarKeyOnly { .. } => "ForOosvarKeyOnly",
        CstStatement::ForLocalKV { .. } => "ForLocalKV",
        CstStatement::ForLocalKeyOnly { .. } => "ForLocalKeyOnly",
        CstStatement::ForSrec { .. } => "ForSrec",
        CstStatement::Break => "Break",
        CstStatement::Continue => "Continue",
        CstStatement::Return(..) => "Return",
        CstStatement::CallSubr(..) => "CallSubr",
        CstStatement::Emitf(..) => "Emitf",
        CstStatement::Emit { .. } => "Emit",
        CstStatement::EmitLashed { .. } => "EmitLashed",
        CstStatement::Tee(..) => "Tee",
        CstStatement::Print(..) => "Print",
        CstStatement::Dump => "Dump",
        CstStatement::Unset(..) => "Unset",
        CstStatement::Filter(..) => "Filter",
    }
}

fn exec_statement(stmt: &CstStatement, vars: &mut Vars, outputs: &mut dyn Outputs) {
    if vars.trace {
        log::trace!("{}", stmt_tag(stmt));
    }
    match stmt {
        CstStatement::AssignField(name, ev) => {
            let v = ev.process(vars);
            if !v.is_absent() {
                vars.srec.insert(name.clone(), v.format());
            }
        }
        CstStatement::AssignFieldIndirect(name_ev, ev) => {
            let name = name_ev.process(vars);
            if name.is_absent() || name.is_error() {
                return;
            }
            let v = ev.process(vars);
            if !v.is_absent() {
                vars.srec.insert(name.format(), v.format());
            }
        }
        CstStatement::AssignFullSrec(ev) => {
            let v = ev.process(vars);
            if let Mlrval::Map(m) = v {
                let mut new_srec = IndexMap::new();
                if let Some(entries) = m.entries() {
                    for (k, v) in entries {
                        new_srec.insert(k.format(), v.to_mlrval().format());
                    }
                }
                vars.srec = new_srec;
            }
        }
        CstStatement::AssignOosvar(keylist, ev) => {
            let keys = match crate::rval::eval_keylist_dyn(keylist, vars) {
                Some(k) => k,
                None => return,
            };
            let v = ev.process(vars);
            vars.oosvars.put(&keys, v);
        }
        CstStatement::AssignFullOosvar(ev) => {
            let v = ev.process(vars);
            vars.oosvars = Mlhmmv::from_mlrval(v);
        }
        CstStatement::AssignLocal(slot, ev) => {
            let v = ev.process(vars);
            set_slot(vars, *slot, v);
        }
        CstStatement::AssignEnv(name_ev, ev) => {
            let name = name_ev.process(vars);
            if name.is_absent() || name.is_error() {
                return;
            }
            let v = ev.process(vars);
            std::env::set_var(name.format(), v.format());
        }
        CstStatement::LocalDecl(slot, mask, init) => {
            vars.locals.current().declare(*slot, *mask);
            if let Some(ev) = init {
                let v = ev.process(vars);
                set_slot(vars, *slot, v);
            }
        }
        CstStatement::CondBlock(cond, body) => {
            if cond.process(vars).truthy() {
                exec_block(body, vars, outputs);
            }
        }
        CstStatement::If(arms, else_block) => {
            for (cond, body) in arms {
                if cond.process(vars).truthy() {
                    exec_block(body, vars, outputs);
                    return;
                }
            }
            if let Some(body) = else_block {
                exec_block(body, vars, outputs);
            }
        }
        CstStatement::While(cond, body) => {
            vars.loop_flags.push();
            while cond.process(vars).truthy() {
                exec_block(body, vars, outputs);
                if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
                    break;
                }
                vars.loop_flags.clear_continued();
            }
            vars.loop_flags.pop();
        }
        CstStatement::DoWhile(body, cond) => {
            vars.loop_flags.push();
            loop {
                exec_block(body, vars, outputs);
                if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
                    break;
                }
                vars.loop_flags.clear_continued();
                if !cond.process(vars).truthy() {
                    break;
                }
            }
            vars.loop_flags.pop();
        }
        CstStatement::TripleFor { init, cond, update, body } => {
            for s in init {
                exec_statement(s, vars, outputs);
            }
            vars.loop_flags.push();
            while cond.process(vars).truthy() {
                exec_block(body, vars, outputs);
                if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
                    break;
                }
                vars.loop_flags.clear_continued();
                for s in update {
                    exec_statement(s, vars, outputs);
                }
            }
            vars.loop_flags.pop();
        }
        CstStatement::ForOosvarKV { keylist, key_slots, val_slot, body } => {
            forloop::exec_for_oosvar_kv(keylist, key_slots, *val_slot, body, vars, outputs);
        }
        CstStatement::ForOosvarKeyOnly { keylist, key_slot, body } => {
            forloop::exec_for_oosvar_key_only(keylist, *key_slot, body, vars, outputs);
        }
        CstStatement::ForLocalKV { target_slot, keylist, key_slots, val_slot, body } => {
            forloop::exec_for_local_kv(*target_slot, keylist, key_slots, *val_slot, body, vars, outputs);
        }
        CstStatement::ForLocalKeyOnly { target_slot, keylist, key_slot, body } => {
            forloop::exec_for_local_key_only(*target_slot, keylist, *key_slot, body, vars, outputs);
        }
        CstStatement::ForSrec { key_slot, val_slot, mode, body } => {
            forloop::exec_for_srec(*key_slot, *val_slot, *mode, body, vars, outputs);
        }
        CstStatement::Break => vars.loop_flags.set_broken(),
        CstStatement::Continue => vars.loop_flags.set_continued(),
        CstStatement::Return(ev) => {
            let value = ev.as_ref().map(|e| e.process(vars));
            vars.return_state.set(value);
        }
        CstStatement::CallSubr(def, args) => {
            let values: Vec<Mlrval> = args.iter().map(|a| a.process(vars)).collect();
            crate::udf::call_subr(def, values, vars, outputs);
        }
        CstStatement::Emitf(names) => emit::emitf(names, vars, outputs),
        CstStatement::Emit { source, names, prefixed } => emit::emit(source, names, *prefixed, vars, outputs),
        CstStatement::EmitLashed { sources, names, prefixed } => {
            emit::emit_lashed(sources, names, *prefixed, vars, outputs)
        }
        CstStatement::Tee(path_ev, rec_ev) => emit::tee(path_ev.as_ref(), rec_ev.as_ref(), vars, outputs),
        CstStatement::Print(ev, to_stderr) => {
            let v = ev.process(vars);
            outputs.print_line(v.format(), *to_stderr);
        }
        CstStatement::Dump => outputs.dump_json(vars.oosvars.to_json()),
        CstStatement::Unset(targets) => {
            for t in targets {
                exec_unset(t, vars);
            }
        }
        CstStatement::Filter(ev) => {
            vars.should_emit_rec = ev.process(vars).truthy();
        }
    }
}

fn exec_unset(target: &CstUnsetTarget, vars: &mut Vars) {
    match target {
        CstUnsetTarget::Local(slot) => set_slot(vars, *slot, Mlrval::Absent),
        CstUnsetTarget::Oosvar(keylist) => {
            if let Some(keys) = crate::rval::eval_keylist_dyn(keylist, vars) {
                vars.oosvars.remove(&keys);
            }
        }
        CstUnsetTarget::FullSrec => vars.srec.clear(),
        CstUnsetTarget::Field(name) => {
            vars.srec.shift_remove(name);
        }
        CstUnsetTarget::FieldIndirect(ev) => {
            let name = ev.process(vars);
            if !name.is_absent() && !name.is_error() {
                vars.srec.shift_remove(&name.format());
            }
        }
        CstUnsetTarget::AllOosvars => vars.oosvars = Mlhmmv::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::cst::build_program;
    use crate::mlrval::TypeInferencing;
    use std::rc::Rc;

    struct RecordingOutputs {
        emitted: Vec<IndexMap<String, String>>,
        printed: Vec<String>,
    }
    impl Outputs for RecordingOutputs {
        fn emit_record(&mut self, fields: IndexMap<String, String>) {
            self.emitted.push(fields);
        }
        fn print_line(&mut self, text: String, _to_stderr: bool) {
            self.printed.push(text);
        }
        fn dump_json(&mut self, _json: Json) {}
        fn tee_record(&mut self, _path: &str, _fields: &IndexMap<String, String>) -> Result<(), IoSinkError> {
            Ok(())
        }
    }

    fn run_main(src: ast::Program, srec: IndexMap<String, String>) -> (Vars, RecordingOutputs) {
        let built = build_program(&src, TypeInferencing::IntOrFloat, false, false, ".".into()).unwrap();
        let mut vars = Vars::new(srec);
        let mut outputs = RecordingOutputs { emitted: Vec::new(), printed: Vec::new() };
        run_top_level(&built.main, built.main_depth, &mut vars, &mut outputs);
        (vars, outputs)
    }

    #[test]
    fn field_assignment_adds_computed_column() {
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(vec![Rc::new(ast::Statement::Assign(
                ast::AssignTarget::Field("z".into()),
                Rc::new(ast::Expr::BinOp(
                    ast::BinOp::Add,
                    Rc::new(ast::Expr::FieldRead("x".into())),
                    Rc::new(ast::Expr::FieldRead("y".into())),
                )),
            ))])),
        };
        let mut srec = IndexMap::new();
        srec.insert("x".to_string(), "2".to_string());
        srec.insert("y".to_string(), "3".to_string());
        let (vars, _) = run_main(program, srec);
        assert_eq!(vars.srec.get("z").unwrap(), "5");
    }

    #[test]
    fn oosvar_running_sum_accumulates_across_calls() {
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(vec![Rc::new(ast::Statement::Assign(
                ast::AssignTarget::Oosvar(vec![Rc::new(ast::Expr::StrLit("total".into()))]),
                Rc::new(ast::Expr::BinOp(
                    ast::BinOp::Add,
                    Rc::new(ast::Expr::OosvarRead(vec![Rc::new(ast::Expr::StrLit("total".into()))])),
                    Rc::new(ast::Expr::FieldRead("x".into())),
                )),
            ))])),
        };
        let built = build_program(&program, TypeInferencing::IntOrFloat, false, false, ".".into()).unwrap();
        let mut vars = Vars::new(IndexMap::new());
        let mut outputs = RecordingOutputs { emitted: Vec::new(), printed: Vec::new() };

        for x in [1, 2, 3] {
            vars.srec.insert("x".to_string(), x.to_string());
            run_top_level(&built.main, built.main_depth, &mut vars, &mut outputs);
        }
        assert_eq!(vars.oosvars.get(&[Mlrval::Str("total".into())]), Mlrval::Int(6));
    }

    #[test]
    fn break_stops_loop_aware_block_from_further_statements() {
        // for (k, v in @m) { print v; break; print "unreached"; }
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(vec![
                Rc::new(ast::Statement::Assign(
                    ast::AssignTarget::Oosvar(vec![
                        Rc::new(ast::Expr::StrLit("m".into())),
                        Rc::new(ast::Expr::StrLit("a".into())),
                    ]),
                    Rc::new(ast::Expr::IntLit(1)),
                )),
                Rc::new(ast::Statement::Assign(
                    ast::AssignTarget::Oosvar(vec![
                        Rc::new(ast::Expr::StrLit("m".into())),
                        Rc::new(ast::Expr::StrLit("b".into())),
                    ]),
                    Rc::new(ast::Expr::IntLit(2)),
                )),
                Rc::new(ast::Statement::ForOosvarKeyOnly {
                    keylist: vec![Rc::new(ast::Expr::StrLit("m".into()))],
                    key_var: Rc::new(ast::NameRef::new("k")),
                    body: ast::Block::new(vec![
                        Rc::new(ast::Statement::Print(Rc::new(ast::Expr::LocalRead(Rc::new(ast::NameRef::new("k")))), false)),
                        Rc::new(ast::Statement::Break),
                        Rc::new(ast::Statement::Print(Rc::new(ast::Expr::StrLit("unreached".into())), false)),
                    ]),
                }),
            ])),
        };
        let (_, outputs) = run_main(program, IndexMap::new());
        assert_eq!(outputs.printed, vec!["a".to_string()]);
    }
}
