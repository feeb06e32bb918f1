// CST builder (§4.2): a context-validating translator from the
// annotated AST (post stack_allocate.rs) into a tree of statement
// variants the executor dispatches over by match, mirroring the
// teacher's `TypeChecker::eval_expr` per-kind recursive-translator
// shape (typechecker.rs) rather than the handler-function-pointer
// shape of the original source (Design Note §9: re-expressed as a sum
// type, dispatched by match).
//
// Every function/subroutine signature (name, params, arity) is known
// before any body is built (a first pass over `program.blocks`), so a
// call site anywhere — including inside another function/subroutine
// body, mutually recursive or not — resolves immediately rather than
// needing a second linking pass.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::ast::{self, Node};
use crate::error::BuildError;
use crate::fmgr::{Fmgr, FunctionManager};
use crate::mlrval::{TypeInferencing, TypeMask};
use crate::rval::{self, Evaluator};
use crate::stack_allocate::allocate_program;

/// Context threaded through CST construction (§4.2). Consulted by the
/// R1-R7 validation rules below.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextFlag {
    InBeginOrEnd = 0b00001,
    InFuncDef = 0b00010,
    InSubrDef = 0b00100,
    InBreakable = 0b01000,
    InMlrFilter = 0b10000,
}

pub type ContextFlags = BitFlags<ContextFlag>;

#[derive(Copy, Clone)]
struct BuildCtx<'a> {
    type_inferencing: TypeInferencing,
    flags: ContextFlags,
    fmgr: &'a Fmgr,
    subrs: &'a HashMap<String, Rc<UdfDef>>,
}

impl<'a> BuildCtx<'a> {
    fn with(&self, extra: ContextFlag) -> BuildCtx<'a> {
        BuildCtx { flags: self.flags | extra, ..*self }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockExecKind {
    /// Stops only when the return flag is set (§4.4).
    Plain,
    /// Also stops when the innermost loop's BROKEN/CONTINUED bit is set
    /// — the one micro-optimization the source is explicit about
    /// preserving (§4.3).
    LoopAware,
}

pub struct CstBlock {
    pub statements: Vec<CstStatement>,
    pub subframe_base: usize,
    pub subframe_var_count: usize,
    pub exec_kind: BlockExecKind,
}

impl CstBlock {
    fn empty() -> CstBlock {
        CstBlock { statements: Vec::new(), subframe_base: 0, subframe_var_count: 0, exec_kind: BlockExecKind::Plain }
    }
}

pub enum CstUnsetTarget {
    Local(usize),
    Oosvar(Vec<Box<dyn Evaluator>>),
    FullSrec,
    Field(String),
    FieldIndirect(Box<dyn Evaluator>),
    AllOosvars,
}

pub enum CstStatement {
    AssignField(String, Box<dyn Evaluator>),
    AssignFieldIndirect(Box<dyn Evaluator>, Box<dyn Evaluator>),
    AssignFullSrec(Box<dyn Evaluator>),
    AssignOosvar(Vec<Box<dyn Evaluator>>, Box<dyn Evaluator>),
    AssignFullOosvar(Box<dyn Evaluator>),
    AssignLocal(usize, Box<dyn Evaluator>),
    AssignEnv(Box<dyn Evaluator>, Box<dyn Evaluator>),
    LocalDecl(usize, TypeMask, Option<Box<dyn Evaluator>>),
    CondBlock(Box<dyn Evaluator>, CstBlock),
    If(Vec<(Box<dyn Evaluator>, CstBlock)>, Option<CstBlock>),
    While(Box<dyn Evaluator>, CstBlock),
    DoWhile(CstBlock, Box<dyn Evaluator>),
    TripleFor { init: Vec<CstStatement>, cond: Box<dyn Evaluator>, update: Vec<CstStatement>, body: CstBlock },
    ForOosvarKV { keylist: Vec<Box<dyn Evaluator>>, key_slots: Vec<usize>, val_slot: usize, body: CstBlock },
    ForOosvarKeyOnly { keylist: Vec<Box<dyn Evaluator>>, key_slot: usize, body: CstBlock },
    ForLocalKV {
        target_slot: usize,
        keylist: Vec<Box<dyn Evaluator>>,
        key_slots: Vec<usize>,
        val_slot: usize,
        body: CstBlock,
    },
    ForLocalKeyOnly { target_slot: usize, keylist: Vec<Box<dyn Evaluator>>, key_slot: usize, body: CstBlock },
    ForSrec { key_slot: usize, val_slot: usize, mode: TypeInferencing, body: CstBlock },
    Break,
    Continue,
    Return(Option<Box<dyn Evaluator>>),
    CallSubr(Rc<UdfDef>, Vec<Box<dyn Evaluator>>),
    Emitf(Vec<String>),
    Emit { source: String, names: Vec<String>, prefixed: bool },
    EmitLashed { sources: Vec<String>, names: Vec<String>, prefixed: bool },
    Tee(Box<dyn Evaluator>, Box<dyn Evaluator>),
    Print(Box<dyn Evaluator>, bool),
    Dump,
    Unset(Vec<CstUnsetTarget>),
    /// Covers both the `filter <expr>` statement form and a filter-mode
    /// script's trailing bare-boolean statement; §4.2's R6/R7 only
    /// constrain where this may appear, not how it runs.
    Filter(Box<dyn Evaluator>),
}

/// A function or subroutine definition, keyed by name in `CstProgram`.
/// `body` is behind a `RefCell` because a call site anywhere in the
/// program needs to resolve and clone this `Rc` before the definition
/// it points to has its own body built (mutual recursion, §4.2).
pub struct UdfDef {
    pub name: String,
    pub params: Vec<(usize, TypeMask)>,
    pub ret_mask: Option<TypeMask>,
    pub is_func: bool,
    pub max_var_depth: usize,
    pub body: RefCell<CstBlock>,
}

pub struct CstProgram {
    pub begin: CstBlock,
    pub begin_depth: usize,
    pub main: CstBlock,
    pub main_depth: usize,
    pub end: CstBlock,
    pub end_depth: usize,
    pub funcs: HashMap<String, Rc<UdfDef>>,
    pub subrs: HashMap<String, Rc<UdfDef>>,
    pub filter_mode: bool,
    pub do_final_filter: bool,
    pub negate_final_filter: bool,
    pub oosvar_flatten_separator: String,
}

pub fn build_program(
    program: &ast::Program,
    type_inferencing: TypeInferencing,
    do_final_filter: bool,
    negate_final_filter: bool,
    oosvar_flatten_separator: String,
) -> Result<CstProgram, BuildError> {
    let depths = allocate_program(program)?;

    let mut fmgr = Fmgr::new();
    let mut subrs_map: HashMap<String, Rc<UdfDef>> = HashMap::new();
    let mut func_stubs: Vec<usize> = Vec::new();
    let mut subr_stubs: Vec<usize> = Vec::new();
    let mut saw_begin = false;
    let mut saw_end = false;

    for (i, block) in program.blocks.iter().enumerate() {
        match block {
            ast::TopLevelBlock::Begin(_) => {
                if saw_begin {
                    return Err(BuildError::DuplicateBlock("begin"));
                }
                saw_begin = true;
            }
            ast::TopLevelBlock::End(_) => {
                if saw_end {
                    return Err(BuildError::DuplicateBlock("end"));
                }
                saw_end = true;
            }
            ast::TopLevelBlock::Main(_) => {}
            ast::TopLevelBlock::FuncDef { name, params, ret_mask, .. } => {
                let param_slots = params.iter().map(|p| (p.name_ref.slot(), p.mask)).collect();
                let def = Rc::new(UdfDef {
                    name: name.clone(),
                    params: param_slots,
                    ret_mask: Some(*ret_mask),
                    is_func: true,
                    max_var_depth: depths[i],
                    body: RefCell::new(CstBlock::empty()),
                });
                fmgr.register_udf(name.clone(), def);
                func_stubs.push(i);
            }
            ast::TopLevelBlock::SubrDef { name, params, .. } => {
                let param_slots = params.iter().map(|p| (p.name_ref.slot(), p.mask)).collect();
                let def = Rc::new(UdfDef {
                    name: name.clone(),
                    params: param_slots,
                    ret_mask: None,
                    is_func: false,
                    max_var_depth: depths[i],
                    body: RefCell::new(CstBlock::empty()),
                });
                subrs_map.insert(name.clone(), def);
                subr_stubs.push(i);
            }
        }
    }

    for i in func_stubs {
        let (name, body) = match &program.blocks[i] {
            ast::TopLevelBlock::FuncDef { name, body, .. } => (name, body),
            _ => unreachable!("func_stubs indices only ever point at FuncDef blocks"),
        };
        let ctx = BuildCtx { type_inferencing, flags: ContextFlag::InFuncDef.into(), fmgr: &fmgr, subrs: &subrs_map };
        let built = build_block(body, ctx)?;
        *fmgr.lookup_udf(name).expect("just registered").body.borrow_mut() = built;
    }

    for i in subr_stubs {
        let (name, body) = match &program.blocks[i] {
            ast::TopLevelBlock::SubrDef { name, body, .. } => (name, body),
            _ => unreachable!("subr_stubs indices only ever point at SubrDef blocks"),
        };
        let ctx = BuildCtx { type_inferencing, flags: ContextFlag::InSubrDef.into(), fmgr: &fmgr, subrs: &subrs_map };
        let built = build_block(body, ctx)?;
        *subrs_map.get(name).expect("just registered").body.borrow_mut() = built;
    }

    let mut begin = CstBlock::empty();
    let mut begin_depth = 0;
    let mut main = CstBlock::empty();
    let mut main_depth = 0;
    let mut end = CstBlock::empty();
    let mut end_depth = 0;

    for (i, block) in program.blocks.iter().enumerate() {
        match block {
            ast::TopLevelBlock::Begin(b) => {
                let ctx =
                    BuildCtx { type_inferencing, flags: ContextFlag::InBeginOrEnd.into(), fmgr: &fmgr, subrs: &subrs_map };
                begin = build_block(b, ctx)?;
                begin_depth = depths[i];
            }
            ast::TopLevelBlock::End(b) => {
                let ctx =
                    BuildCtx { type_inferencing, flags: ContextFlag::InBeginOrEnd.into(), fmgr: &fmgr, subrs: &subrs_map };
                end = build_block(b, ctx)?;
                end_depth = depths[i];
            }
            ast::TopLevelBlock::Main(b) => {
                let flags = if program.filter_mode { ContextFlag::InMlrFilter.into() } else { ContextFlags::empty() };
                let ctx = BuildCtx { type_inferencing, flags, fmgr: &fmgr, subrs: &subrs_map };
                main = build_block(b, ctx)?;
                main_depth = depths[i];
                if program.filter_mode {
                    validate_filter_shape(&main)?;
                }
            }
            _ => {}
        }
    }

    Ok(CstProgram {
        begin,
        begin_depth,
        main,
        main_depth,
        end,
        end_depth,
        funcs: fmgr.into_udfs(),
        subrs: subrs_map,
        filter_mode: program.filter_mode,
        do_final_filter,
        negate_final_filter,
        oosvar_flatten_separator,
    })
}

fn validate_filter_shape(main: &CstBlock) -> Result<(), BuildError> {
    if main.statements.is_empty() {
        return Err(BuildError::FilterMisplaced("a filter-mode script must end in a bare boolean expression".into()));
    }
    let last = main.statements.len() - 1;
    for (i, stmt) in main.statements.iter().enumerate() {
        let is_filter = matches!(stmt, CstStatement::Filter(_));
        if is_filter && i != last {
            return Err(BuildError::FilterMisplaced(
                "filter may only appear as the final statement of a filter-mode script".into(),
            ));
        }
    }
    if !matches!(main.statements[last], CstStatement::Filter(_)) {
        return Err(BuildError::FilterMisplaced("a filter-mode script must end in a bare boolean expression".into()));
    }
    Ok(())
}

fn build_block(block: &Node<ast::Block>, ctx: BuildCtx) -> Result<CstBlock, BuildError> {
    let mut statements = Vec::with_capacity(block.statements.len());
    for s in &block.statements {
        statements.push(build_statement(s, ctx)?);
    }
    let exec_kind =
        if ctx.flags.contains(ContextFlag::InBreakable) { BlockExecKind::LoopAware } else { BlockExecKind::Plain };
    Ok(CstBlock {
        statements,
        subframe_base: block.subframe_base.get(),
        subframe_var_count: block.subframe_var_count.get(),
        exec_kind,
    })
}

fn build_expr_checked(expr: &Node<ast::Expr>, ctx: BuildCtx) -> Result<Box<dyn Evaluator>, BuildError> {
    validate_expr(expr, ctx)?;
    Ok(rval::build(expr, ctx.fmgr, ctx.type_inferencing))
}

fn validate_expr(expr: &ast::Expr, ctx: BuildCtx) -> Result<(), BuildError> {
    match expr {
        ast::Expr::IntLit(_) | ast::Expr::FloatLit(_) | ast::Expr::StrLit(_) | ast::Expr::BoolLit(_) | ast::Expr::LocalRead(_) => {
            Ok(())
        }
        ast::Expr::FieldRead(_) | ast::Expr::FullSrec => {
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                Err(BuildError::SrecAccessInBeginOrEnd)
            } else {
                Ok(())
            }
        }
        ast::Expr::FieldReadIndirect(e) => {
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::SrecAccessInBeginOrEnd);
            }
            validate_expr(e, ctx)
        }
        ast::Expr::OosvarRead(keylist) | ast::Expr::FullOosvarRead(keylist) => {
            keylist.iter().try_for_each(|k| validate_expr(k, ctx))
        }
        ast::Expr::EnvRead(e) => validate_expr(e, ctx),
        ast::Expr::BinOp(_, a, b) => {
            validate_expr(a, ctx)?;
            validate_expr(b, ctx)
        }
        ast::Expr::UnOp(_, a) => validate_expr(a, ctx),
        ast::Expr::Call(name, args) => {
            args.iter().try_for_each(|a| validate_expr(a, ctx))?;
            if ctx.subrs.contains_key(name) {
                return Err(BuildError::SubrCalledAsFunc(name.clone()));
            }
            if ctx.fmgr.resolve(name, args.len()).is_none() {
                return Err(BuildError::UnknownCallable(name.clone()));
            }
            Ok(())
        }
        ast::Expr::MapLit(pairs) => pairs.iter().try_for_each(|(k, v)| {
            validate_expr(k, ctx)?;
            validate_expr(v, ctx)
        }),
    }
}

fn check_no_srec(ctx: BuildCtx) -> Result<(), BuildError> {
    if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
        return Err(BuildError::SrecAccessInBeginOrEnd);
    }
    if ctx.flags.contains(ContextFlag::InFuncDef) {
        return Err(BuildError::SrecWriteInFunc);
    }
    Ok(())
}

fn build_assign(target: &ast::AssignTarget, expr: &Node<ast::Expr>, ctx: BuildCtx) -> Result<CstStatement, BuildError> {
    match target {
        ast::AssignTarget::Field(name) => {
            check_no_srec(ctx)?;
            Ok(CstStatement::AssignField(name.clone(), build_expr_checked(expr, ctx)?))
        }
        ast::AssignTarget::FieldIndirect(name_expr) => {
            check_no_srec(ctx)?;
            let name_ev = build_expr_checked(name_expr, ctx)?;
            Ok(CstStatement::AssignFieldIndirect(name_ev, build_expr_checked(expr, ctx)?))
        }
        ast::AssignTarget::FullSrec => {
            check_no_srec(ctx)?;
            Ok(CstStatement::AssignFullSrec(build_expr_checked(expr, ctx)?))
        }
        ast::AssignTarget::Oosvar(keylist) => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            Ok(CstStatement::AssignOosvar(kev, build_expr_checked(expr, ctx)?))
        }
        ast::AssignTarget::FullOosvar => Ok(CstStatement::AssignFullOosvar(build_expr_checked(expr, ctx)?)),
        ast::AssignTarget::Local(name_ref) => {
            Ok(CstStatement::AssignLocal(name_ref.slot(), build_expr_checked(expr, ctx)?))
        }
        ast::AssignTarget::Env(name_expr) => {
            let name_ev = build_expr_checked(name_expr, ctx)?;
            Ok(CstStatement::AssignEnv(name_ev, build_expr_checked(expr, ctx)?))
        }
    }
}

fn check_no_srec_read_only(ctx: BuildCtx) -> Result<(), BuildError> {
    if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
        Err(BuildError::SrecAccessInBeginOrEnd)
    } else {
        Ok(())
    }
}

fn build_unset_target(t: &ast::UnsetTarget, ctx: BuildCtx) -> Result<CstUnsetTarget, BuildError> {
    match t {
        ast::UnsetTarget::Local(name_ref) => Ok(CstUnsetTarget::Local(name_ref.slot())),
        ast::UnsetTarget::Oosvar(keylist) => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            Ok(CstUnsetTarget::Oosvar(kev))
        }
        ast::UnsetTarget::FullSrec => {
            check_no_srec_read_only(ctx)?;
            Ok(CstUnsetTarget::FullSrec)
        }
        ast::UnsetTarget::Field(name) => {
            check_no_srec_read_only(ctx)?;
            Ok(CstUnsetTarget::Field(name.clone()))
        }
        ast::UnsetTarget::FieldIndirect(e) => {
            check_no_srec_read_only(ctx)?;
            Ok(CstUnsetTarget::FieldIndirect(build_expr_checked(e, ctx)?))
        }
        ast::UnsetTarget::AllOosvars => Ok(CstUnsetTarget::AllOosvars),
    }
}

fn build_statement(stmt: &Node<ast::Statement>, ctx: BuildCtx) -> Result<CstStatement, BuildError> {
    use ast::Statement as S;
    Ok(match stmt.as_ref() {
        S::Assign(target, expr) => build_assign(target, expr, ctx)?,
        S::LocalDecl(name_ref, mask, init) => {
            let init_ev = match init {
                Some(e) => Some(build_expr_checked(e, ctx)?),
                None => None,
            };
            CstStatement::LocalDecl(name_ref.slot(), *mask, init_ev)
        }
        S::CondBlock(cond, body) => {
            let cond_ev = build_expr_checked(cond, ctx)?;
            CstStatement::CondBlock(cond_ev, build_block(body, ctx)?)
        }
        S::If(arms, else_block) => {
            let mut cst_arms = Vec::with_capacity(arms.len());
            for (cond, body) in arms {
                let cond_ev = build_expr_checked(cond, ctx)?;
                cst_arms.push((cond_ev, build_block(body, ctx)?));
            }
            let cst_else = match else_block {
                Some(b) => Some(build_block(b, ctx)?),
                None => None,
            };
            CstStatement::If(cst_arms, cst_else)
        }
        S::While(cond, body) => {
            let cond_ev = build_expr_checked(cond, ctx)?;
            CstStatement::While(cond_ev, build_block(body, ctx.with(ContextFlag::InBreakable))?)
        }
        S::DoWhile(body, cond) => {
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::DoWhile(cst_body, build_expr_checked(cond, ctx)?)
        }
        S::TripleFor { init, cond, update, body } => {
            let cst_init = init.iter().map(|s| build_statement(s, ctx)).collect::<Result<Vec<_>, _>>()?;
            let cond_ev = build_expr_checked(cond, ctx)?;
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            let cst_update = update.iter().map(|s| build_statement(s, ctx)).collect::<Result<Vec<_>, _>>()?;
            CstStatement::TripleFor { init: cst_init, cond: cond_ev, update: cst_update, body: cst_body }
        }
        S::ForOosvarKV { keylist, key_vars, val_var, body } => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            let key_slots = key_vars.iter().map(|kv| kv.slot()).collect();
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::ForOosvarKV { keylist: kev, key_slots, val_slot: val_var.slot(), body: cst_body }
        }
        S::ForOosvarKeyOnly { keylist, key_var, body } => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::ForOosvarKeyOnly { keylist: kev, key_slot: key_var.slot(), body: cst_body }
        }
        S::ForLocalKV { target, keylist, key_vars, val_var, body } => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            let key_slots = key_vars.iter().map(|kv| kv.slot()).collect();
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::ForLocalKV {
                target_slot: target.slot(),
                keylist: kev,
                key_slots,
                val_slot: val_var.slot(),
                body: cst_body,
            }
        }
        S::ForLocalKeyOnly { target, keylist, key_var, body } => {
            let kev = keylist.iter().map(|k| build_expr_checked(k, ctx)).collect::<Result<Vec<_>, _>>()?;
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::ForLocalKeyOnly { target_slot: target.slot(), keylist: kev, key_slot: key_var.slot(), body: cst_body }
        }
        S::ForSrec { key_var, val_var, body } => {
            let cst_body = build_block(body, ctx.with(ContextFlag::InBreakable))?;
            CstStatement::ForSrec {
                key_slot: key_var.slot(),
                val_slot: val_var.slot(),
                mode: ctx.type_inferencing,
                body: cst_body,
            }
        }
        S::Break => {
            if !ctx.flags.contains(ContextFlag::InBreakable) {
                return Err(BuildError::BreakOutsideLoop);
            }
            CstStatement::Break
        }
        S::Continue => {
            if !ctx.flags.contains(ContextFlag::InBreakable) {
                return Err(BuildError::ContinueOutsideLoop);
            }
            CstStatement::Continue
        }
        S::Return(opt) => {
            let has_value = opt.is_some();
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                if !has_value {
                    return Err(BuildError::ReturnShapeMismatch);
                }
            } else if ctx.flags.contains(ContextFlag::InSubrDef) {
                if has_value {
                    return Err(BuildError::ReturnShapeMismatch);
                }
            } else {
                return Err(BuildError::ReturnOutsideCallable);
            }
            let ev = match opt {
                Some(e) => Some(build_expr_checked(e, ctx)?),
                None => None,
            };
            CstStatement::Return(ev)
        }
        S::CallSubr(name, args) => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::CallInFunc);
            }
            let def = match ctx.subrs.get(name) {
                Some(def) => def.clone(),
                None if ctx.fmgr.resolve(name, args.len()).is_some() => {
                    return Err(BuildError::FuncCalledAsSubr(name.clone()))
                }
                None => return Err(BuildError::UnknownCallable(name.clone())),
            };
            if def.params.len() != args.len() {
                return Err(BuildError::Arity { name: name.clone(), expected: def.params.len(), got: args.len() });
            }
            let arg_evs = args.iter().map(|a| build_expr_checked(a, ctx)).collect::<Result<Vec<_>, _>>()?;
            CstStatement::CallSubr(def, arg_evs)
        }
        S::Emitf(names) => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::SrecAccessInBeginOrEnd);
            }
            CstStatement::Emitf(names.clone())
        }
        S::Emit { source, names, prefixed } => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::SrecAccessInBeginOrEnd);
            }
            CstStatement::Emit { source: source.clone(), names: names.clone(), prefixed: *prefixed }
        }
        S::EmitLashed { sources, names, prefixed } => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::SrecAccessInBeginOrEnd);
            }
            CstStatement::EmitLashed { sources: sources.clone(), names: names.clone(), prefixed: *prefixed }
        }
        S::Tee(path, rec) => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::SrecAccessInBeginOrEnd);
            }
            let path_ev = build_expr_checked(path, ctx)?;
            CstStatement::Tee(path_ev, build_expr_checked(rec, ctx)?)
        }
        S::Print(expr, to_stderr) => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            CstStatement::Print(build_expr_checked(expr, ctx)?, *to_stderr)
        }
        S::Dump => {
            if ctx.flags.contains(ContextFlag::InFuncDef) {
                return Err(BuildError::SideEffectInFunction);
            }
            CstStatement::Dump
        }
        S::Unset(targets) => {
            let cst_targets = targets.iter().map(|t| build_unset_target(t, ctx)).collect::<Result<Vec<_>, _>>()?;
            CstStatement::Unset(cst_targets)
        }
        S::FilterBareBool(expr) => {
            if ctx.flags.contains(ContextFlag::InBeginOrEnd) {
                return Err(BuildError::FilterMisplaced("begin/end blocks cannot use filter".into()));
            }
            CstStatement::Filter(build_expr_checked(expr, ctx)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlrval::MASK_ANY;
    use std::rc::Rc as StdRc;

    fn prog(main: Vec<Node<ast::Statement>>) -> ast::Program {
        ast::Program { filter_mode: false, blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(main))] }
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let program = prog(vec![StdRc::new(ast::Statement::Break)]);
        let err = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap_err();
        assert_eq!(err, BuildError::BreakOutsideLoop);
    }

    #[test]
    fn srec_access_in_begin_is_rejected() {
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Begin(ast::Block::new(vec![StdRc::new(ast::Statement::Assign(
                ast::AssignTarget::Field("x".into()),
                StdRc::new(ast::Expr::IntLit(1)),
            ))]))],
        };
        let err = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap_err();
        assert_eq!(err, BuildError::SrecAccessInBeginOrEnd);
    }

    #[test]
    fn unknown_function_call_is_rejected() {
        let program = prog(vec![StdRc::new(ast::Statement::Assign(
            ast::AssignTarget::Field("x".into()),
            StdRc::new(ast::Expr::Call("nope".into(), vec![])),
        ))]);
        let err = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap_err();
        assert_eq!(err, BuildError::UnknownCallable("nope".into()));
    }

    #[test]
    fn simple_srec_assignment_builds() {
        let program = prog(vec![StdRc::new(ast::Statement::Assign(
            ast::AssignTarget::Field("z".into()),
            StdRc::new(ast::Expr::BinOp(
                ast::BinOp::Add,
                StdRc::new(ast::Expr::FieldRead("x".into())),
                StdRc::new(ast::Expr::FieldRead("y".into())),
            )),
        ))]);
        let built = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap();
        assert_eq!(built.main.statements.len(), 1);
    }

    #[test]
    fn local_decl_slot_resolves_through_stack_allocate() {
        let decl = StdRc::new(ast::Statement::LocalDecl(
            StdRc::new(ast::NameRef::new("a")),
            MASK_ANY,
            Some(StdRc::new(ast::Expr::IntLit(1))),
        ));
        let program = prog(vec![decl]);
        let built = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap();
        match &built.main.statements[0] {
            CstStatement::LocalDecl(slot, _, _) => assert_eq!(*slot, 0),
            _ => panic!("expected LocalDecl"),
        }
    }

    #[test]
    fn mutually_recursive_subroutines_link_without_a_second_pass() {
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![
                ast::TopLevelBlock::SubrDef {
                    name: "a".into(),
                    params: vec![],
                    body: ast::Block::new(vec![StdRc::new(ast::Statement::CallSubr("b".into(), vec![]))]),
                },
                ast::TopLevelBlock::SubrDef {
                    name: "b".into(),
                    params: vec![],
                    body: ast::Block::new(vec![StdRc::new(ast::Statement::CallSubr("a".into(), vec![]))]),
                },
                ast::TopLevelBlock::Main(ast::Block::new(vec![StdRc::new(ast::Statement::CallSubr("a".into(), vec![]))])),
            ],
        };
        assert!(build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).is_ok());
    }
}
