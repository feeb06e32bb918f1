// The external AST shape consumed from the parser (§6). Out of scope is
// the Lemon-style parser that produces this tree; in scope is the shape
// itself, annotated in place by stack_allocate.rs and consumed by
// cst.rs's translator.
//
// Follows the teacher's `Node<T> = Rc<T>` convention (ast.rs) so the CST
// can share and outlive AST subtrees without cloning them, and so name
// and block nodes can carry `Cell`-based annotations despite `Rc` being
// immutable through shared references.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::mlrval::TypeMask;

pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;
pub type Map<T> = HashMap<String, Node<T>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// A use or declaration of a local-variable name. `slot` starts
/// unresolved and is filled in by stack_allocate.rs (§4.1); it is a
/// `Cell` because AST nodes are shared via `Rc` and are not otherwise
/// mutable.
#[derive(Debug)]
pub struct NameRef {
    pub name: String,
    pub slot: Cell<Option<usize>>,
}

impl NameRef {
    pub fn new(name: &str) -> NameRef {
        NameRef { name: name.to_string(), slot: Cell::new(None) }
    }

    pub fn slot(&self) -> usize {
        self.slot.get().expect("name ref used before stack-allocate pass")
    }
}

/// A lexical block: a statement list plus the subframe size
/// stack_allocate.rs computes for it (§4.1: "subframe_var_count on each
/// block node").
#[derive(Debug)]
pub struct Block {
    pub statements: Seq<Statement>,
    pub subframe_base: Cell<usize>,
    pub subframe_var_count: Cell<usize>,
}

impl Block {
    pub fn new(statements: Seq<Statement>) -> Node<Block> {
        Rc::new(Block {
            statements,
            subframe_base: Cell::new(0),
            subframe_var_count: Cell::new(0),
        })
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    LocalRead(Node<NameRef>),
    FieldRead(String),
    FieldReadIndirect(Node<Expr>),
    OosvarRead(Seq<Expr>),
    FullSrec,
    FullOosvarRead(Seq<Expr>),
    EnvRead(Node<Expr>),
    BinOp(BinOp, Node<Expr>, Node<Expr>),
    UnOp(UnOp, Node<Expr>),
    Call(String, Seq<Expr>),
    MapLit(Vec<(Node<Expr>, Node<Expr>)>),
}

#[derive(Clone, Debug)]
pub enum AssignTarget {
    Field(String),
    FieldIndirect(Node<Expr>),
    FullSrec,
    Oosvar(Seq<Expr>),
    FullOosvar,
    Local(Node<NameRef>),
    Env(Node<Expr>),
}

#[derive(Clone, Debug)]
pub enum UnsetTarget {
    Local(Node<NameRef>),
    Oosvar(Seq<Expr>),
    FullSrec,
    Field(String),
    FieldIndirect(Node<Expr>),
    AllOosvars,
}

#[derive(Clone, Debug)]
pub enum Statement {
    Assign(AssignTarget, Node<Expr>),
    LocalDecl(Node<NameRef>, TypeMask, Option<Node<Expr>>),
    CondBlock(Node<Expr>, Node<Block>),
    If(Vec<(Node<Expr>, Node<Block>)>, Option<Node<Block>>),
    While(Node<Expr>, Node<Block>),
    DoWhile(Node<Block>, Node<Expr>),
    TripleFor {
        init: Seq<Statement>,
        cond: Node<Expr>,
        update: Seq<Statement>,
        body: Node<Block>,
    },
    ForOosvarKV {
        keylist: Seq<Expr>,
        key_vars: Seq<NameRef>,
        val_var: Node<NameRef>,
        body: Node<Block>,
    },
    ForOosvarKeyOnly {
        keylist: Seq<Expr>,
        key_var: Node<NameRef>,
        body: Node<Block>,
    },
    ForLocalKV {
        target: Node<NameRef>,
        keylist: Seq<Expr>,
        key_vars: Seq<NameRef>,
        val_var: Node<NameRef>,
        body: Node<Block>,
    },
    ForLocalKeyOnly {
        target: Node<NameRef>,
        keylist: Seq<Expr>,
        key_var: Node<NameRef>,
        body: Node<Block>,
    },
    ForSrec {
        key_var: Node<NameRef>,
        val_var: Node<NameRef>,
        body: Node<Block>,
    },
    Break,
    Continue,
    Return(Option<Node<Expr>>),
    CallSubr(String, Seq<Expr>),
    Emitf(Vec<String>),
    Emit { source: String, names: Vec<String>, prefixed: bool },
    EmitLashed { sources: Vec<String>, names: Vec<String>, prefixed: bool },
    Tee(Node<Expr>, Node<Expr>),
    Print(Node<Expr>, bool),
    Dump,
    Unset(Vec<UnsetTarget>),
    FilterBareBool(Node<Expr>),
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name_ref: Node<NameRef>,
    pub mask: TypeMask,
}

#[derive(Debug)]
pub enum TopLevelBlock {
    Begin(Node<Block>),
    Main(Node<Block>),
    End(Node<Block>),
    FuncDef { name: String, params: Vec<Param>, ret_mask: TypeMask, body: Node<Block> },
    SubrDef { name: String, params: Vec<Param>, body: Node<Block> },
}

#[derive(Debug, Default)]
pub struct Program {
    pub blocks: Vec<TopLevelBlock>,
    pub filter_mode: bool,
}
