// Two-pass local-variable stack allocator (§4.1). Walks each
// already-blocked top-level block (begin/main/end/func/subr) in
// program order, threading a declaration scope chain and a per-block
// slot counter, and annotates every name node's `slot` cell in place.
//
// Slots are reclaimed when a scope pops (sibling blocks reuse the same
// range), so a block's `max_var_depth` is the high-water mark of the
// counter, not the sum of every declaration in the block.

use std::collections::HashMap;

use crate::ast::{self, Block, Expr, NameRef, Node, Program, Statement, TopLevelBlock};
use crate::error::BuildError;

struct Allocator {
    scopes: Vec<HashMap<String, usize>>,
    next_slot: usize,
    max_slot: usize,
}

impl Allocator {
    fn new() -> Allocator {
        Allocator { scopes: vec![HashMap::new()], next_slot: 0, max_slot: 0 }
    }

    fn push_scope(&mut self) -> usize {
        self.scopes.push(HashMap::new());
        self.next_slot
    }

    fn pop_scope(&mut self, mark: usize) -> usize {
        self.scopes.pop();
        let count = self.next_slot - mark;
        self.next_slot = mark;
        count
    }

    fn declare(&mut self, name: &str) -> Result<usize, BuildError> {
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if scope.contains_key(name) {
            return Err(BuildError::Redeclared(name.to_string()));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        scope.insert(name.to_string(), slot);
        Ok(slot)
    }

    fn resolve(&self, name: &str) -> Result<usize, BuildError> {
        for scope in self.scopes.iter().rev() {
            if let Some(&slot) = scope.get(name) {
                return Ok(slot);
            }
        }
        Err(BuildError::Undeclared(name.to_string()))
    }
}

/// Per-block `max_var_depth`, in program order, one entry per top-level
/// block in `program.blocks`.
pub fn allocate_program(program: &Program) -> Result<Vec<usize>, BuildError> {
    let mut depths = Vec::with_capacity(program.blocks.len());
    for block in &program.blocks {
        let mut alloc = Allocator::new();
        match block {
            TopLevelBlock::Begin(body) | TopLevelBlock::Main(body) | TopLevelBlock::End(body) => {
                allocate_block(&mut alloc, body)?;
            }
            TopLevelBlock::FuncDef { params, body, .. }
            | TopLevelBlock::SubrDef { params, body, .. } => {
                for p in params {
                    let slot = alloc.declare(&p.name_ref.name)?;
                    p.name_ref.slot.set(Some(slot));
                }
                allocate_block(&mut alloc, body)?;
            }
        }
        depths.push(alloc.max_slot);
    }
    Ok(depths)
}

fn allocate_block(alloc: &mut Allocator, block: &Node<Block>) -> Result<(), BuildError> {
    let mark = alloc.push_scope();
    for stmt in &block.statements {
        allocate_statement(alloc, stmt)?;
    }
    let count = alloc.pop_scope(mark);
    block.subframe_base.set(mark);
    block.subframe_var_count.set(count);
    Ok(())
}

fn declare_loop_vars(
    alloc: &mut Allocator,
    key_vars: &[Node<NameRef>],
    val_var: Option<&Node<NameRef>>,
) -> Result<(), BuildError> {
    for kv in key_vars {
        let slot = alloc.declare(&kv.name)?;
        kv.slot.set(Some(slot));
    }
    if let Some(vv) = val_var {
        let slot = alloc.declare(&vv.name)?;
        vv.slot.set(Some(slot));
    }
    Ok(())
}

fn allocate_statement(alloc: &mut Allocator, stmt: &Node<Statement>) -> Result<(), BuildError> {
    match stmt.as_ref() {
        Statement::Assign(target, expr) => {
            allocate_target(alloc, target)?;
            allocate_expr(alloc, expr)
        }
        Statement::LocalDecl(name_ref, _mask, init) => {
            if let Some(e) = init {
                allocate_expr(alloc, e)?;
            }
            let slot = alloc.declare(&name_ref.name)?;
            name_ref.slot.set(Some(slot));
            Ok(())
        }
        Statement::CondBlock(cond, body) => {
            allocate_expr(alloc, cond)?;
            allocate_block(alloc, body)
        }
        Statement::If(arms, else_block) => {
            for (cond, body) in arms {
                allocate_expr(alloc, cond)?;
                allocate_block(alloc, body)?;
            }
            if let Some(eb) = else_block {
                allocate_block(alloc, eb)?;
            }
            Ok(())
        }
        Statement::While(cond, body) => {
            allocate_expr(alloc, cond)?;
            allocate_block(alloc, body)
        }
        Statement::DoWhile(body, cond) => {
            allocate_block(alloc, body)?;
            allocate_expr(alloc, cond)
        }
        Statement::TripleFor { init, cond, update, body } => {
            let mark = alloc.push_scope();
            for s in init {
                allocate_statement(alloc, s)?;
            }
            allocate_expr(alloc, cond)?;
            allocate_block(alloc, body)?;
            for s in update {
                allocate_statement(alloc, s)?;
            }
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::ForOosvarKV { keylist, key_vars, val_var, body } => {
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            let mark = alloc.push_scope();
            declare_loop_vars(alloc, key_vars, Some(val_var))?;
            allocate_block(alloc, body)?;
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::ForOosvarKeyOnly { keylist, key_var, body } => {
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            let mark = alloc.push_scope();
            declare_loop_vars(alloc, std::slice::from_ref(key_var), None)?;
            allocate_block(alloc, body)?;
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::ForLocalKV { target, keylist, key_vars, val_var, body } => {
            let slot = alloc.resolve(&target.name)?;
            target.slot.set(Some(slot));
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            let mark = alloc.push_scope();
            declare_loop_vars(alloc, key_vars, Some(val_var))?;
            allocate_block(alloc, body)?;
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::ForLocalKeyOnly { target, keylist, key_var, body } => {
            let slot = alloc.resolve(&target.name)?;
            target.slot.set(Some(slot));
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            let mark = alloc.push_scope();
            declare_loop_vars(alloc, std::slice::from_ref(key_var), None)?;
            allocate_block(alloc, body)?;
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::ForSrec { key_var, val_var, body } => {
            let mark = alloc.push_scope();
            declare_loop_vars(alloc, std::slice::from_ref(key_var), Some(val_var))?;
            allocate_block(alloc, body)?;
            alloc.pop_scope(mark);
            Ok(())
        }
        Statement::Break | Statement::Continue | Statement::Dump => Ok(()),
        Statement::Return(expr) => {
            if let Some(e) = expr {
                allocate_expr(alloc, e)?;
            }
            Ok(())
        }
        Statement::CallSubr(_, args) => {
            for a in args {
                allocate_expr(alloc, a)?;
            }
            Ok(())
        }
        Statement::Emitf(_) | Statement::Emit { .. } | Statement::EmitLashed { .. } => Ok(()),
        Statement::Tee(path, rec) => {
            allocate_expr(alloc, path)?;
            allocate_expr(alloc, rec)
        }
        Statement::Print(expr, _) => allocate_expr(alloc, expr),
        Statement::Unset(targets) => {
            for t in targets {
                allocate_unset_target(alloc, t)?;
            }
            Ok(())
        }
        Statement::FilterBareBool(expr) => allocate_expr(alloc, expr),
    }
}

fn allocate_target(alloc: &mut Allocator, target: &ast::AssignTarget) -> Result<(), BuildError> {
    match target {
        ast::AssignTarget::Field(_) | ast::AssignTarget::FullSrec | ast::AssignTarget::FullOosvar => Ok(()),
        ast::AssignTarget::FieldIndirect(e) => allocate_expr(alloc, e),
        ast::AssignTarget::Oosvar(keylist) => {
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            Ok(())
        }
        ast::AssignTarget::Local(name_ref) => {
            let slot = alloc.resolve(&name_ref.name)?;
            name_ref.slot.set(Some(slot));
            Ok(())
        }
        ast::AssignTarget::Env(e) => allocate_expr(alloc, e),
    }
}

fn allocate_unset_target(alloc: &mut Allocator, target: &ast::UnsetTarget) -> Result<(), BuildError> {
    match target {
        ast::UnsetTarget::FullSrec | ast::UnsetTarget::Field(_) | ast::UnsetTarget::AllOosvars => Ok(()),
        ast::UnsetTarget::FieldIndirect(e) => allocate_expr(alloc, e),
        ast::UnsetTarget::Local(name_ref) => {
            let slot = alloc.resolve(&name_ref.name)?;
            name_ref.slot.set(Some(slot));
            Ok(())
        }
        ast::UnsetTarget::Oosvar(keylist) => {
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            Ok(())
        }
    }
}

fn allocate_expr(alloc: &mut Allocator, expr: &Node<Expr>) -> Result<(), BuildError> {
    match expr.as_ref() {
        Expr::IntLit(_) | Expr::FloatLit(_) | Expr::StrLit(_) | Expr::BoolLit(_) | Expr::FullSrec => Ok(()),
        Expr::LocalRead(name_ref) => {
            let slot = alloc.resolve(&name_ref.name)?;
            name_ref.slot.set(Some(slot));
            Ok(())
        }
        Expr::FieldRead(_) => Ok(()),
        Expr::FieldReadIndirect(e) => allocate_expr(alloc, e),
        Expr::OosvarRead(keylist) | Expr::FullOosvarRead(keylist) => {
            for k in keylist {
                allocate_expr(alloc, k)?;
            }
            Ok(())
        }
        Expr::EnvRead(e) => allocate_expr(alloc, e),
        Expr::BinOp(_, a, b) => {
            allocate_expr(alloc, a)?;
            allocate_expr(alloc, b)
        }
        Expr::UnOp(_, a) => allocate_expr(alloc, a),
        Expr::Call(_, args) => {
            for a in args {
                allocate_expr(alloc, a)?;
            }
            Ok(())
        }
        Expr::MapLit(pairs) => {
            for (k, v) in pairs {
                allocate_expr(alloc, k)?;
                allocate_expr(alloc, v)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlrval::MASK_ANY;
    use std::rc::Rc;

    fn decl(name: &str) -> Node<Statement> {
        Rc::new(Statement::LocalDecl(Rc::new(NameRef::new(name)), MASK_ANY, None))
    }

    fn read(name: &str) -> Node<NameRef> {
        Rc::new(NameRef::new(name))
    }

    #[test]
    fn sibling_scopes_reuse_slots() {
        // { var a } { var b } -- two sibling sub-blocks, each declaring
        // one variable; since they don't overlap, the enclosing block's
        // max_var_depth is 1, not 2.
        let program = Program {
            filter_mode: false,
            blocks: vec![TopLevelBlock::Main(Block::new(vec![
                Rc::new(Statement::CondBlock(Rc::new(Expr::BoolLit(true)), Block::new(vec![decl("a")]))),
                Rc::new(Statement::CondBlock(Rc::new(Expr::BoolLit(true)), Block::new(vec![decl("b")]))),
            ]))],
        };

        let depths = allocate_program(&program).unwrap();
        assert_eq!(depths, vec![1]);
    }

    #[test]
    fn redeclaration_in_same_scope_is_an_error() {
        let program = Program {
            filter_mode: false,
            blocks: vec![TopLevelBlock::Main(Block::new(vec![decl("a"), decl("a")]))],
        };
        assert_eq!(allocate_program(&program), Err(BuildError::Redeclared("a".into())));
    }

    #[test]
    fn use_of_undeclared_name_is_an_error() {
        let program = Program {
            filter_mode: false,
            blocks: vec![TopLevelBlock::Main(Block::new(vec![Rc::new(Statement::Assign(
                ast::AssignTarget::Local(read("missing")),
                Rc::new(Expr::IntLit(1)),
            ))]))],
        };
        assert_eq!(allocate_program(&program), Err(BuildError::Undeclared("missing".into())));
    }

    #[test]
    fn nested_scope_sees_enclosing_declarations() {
        let inner = Rc::new(Statement::Assign(
            ast::AssignTarget::Local(read("a")),
            Rc::new(Expr::IntLit(2)),
        ));
        let program = Program {
            filter_mode: false,
            blocks: vec![TopLevelBlock::Main(Block::new(vec![
                decl("a"),
                Rc::new(Statement::CondBlock(Rc::new(Expr::BoolLit(true)), Block::new(vec![inner]))),
            ]))],
        };
        assert!(allocate_program(&program).is_ok());
    }
}
