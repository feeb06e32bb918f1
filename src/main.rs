// Demo binary: builds one small script by hand (no parser in scope,
// §1 Non-goals) and runs it over a couple of in-memory records,
// printing whatever lands in the main stream and the dump side
// channel. Not a CLI surface — just enough to exercise `driver` end to
// end, the same role the teacher's own `main.rs` plays for a demo
// dashboard render with no device path given.

use std::env::args;
use std::rc::Rc;

use indexmap::IndexMap;

use recdsl::ast::{AssignTarget, Block, Expr, Program, Statement, TopLevelBlock};
use recdsl::cst::build_program;
use recdsl::driver::{self, Srec};
use recdsl::mlrval::TypeInferencing;

fn field(name: &str) -> Rc<Expr> {
    Rc::new(Expr::FieldRead(name.to_string()))
}

/// `begin { @count = 0 } $z = $x + $y; @count = @count + 1; end { dump }`
fn demo_program() -> Program {
    Program {
        filter_mode: false,
        blocks: vec![
            TopLevelBlock::Begin(Block::new(vec![Rc::new(Statement::Assign(
                AssignTarget::Oosvar(vec![Rc::new(Expr::StrLit("count".into()))]),
                Rc::new(Expr::IntLit(0)),
            ))])),
            TopLevelBlock::Main(Block::new(vec![
                Rc::new(Statement::Assign(AssignTarget::Field("z".into()), Rc::new(Expr::BinOp(
                    recdsl::ast::BinOp::Add,
                    field("x"),
                    field("y"),
                )))),
                Rc::new(Statement::Assign(
                    AssignTarget::Oosvar(vec![Rc::new(Expr::StrLit("count".into()))]),
                    Rc::new(Expr::BinOp(
                        recdsl::ast::BinOp::Add,
                        Rc::new(Expr::OosvarRead(vec![Rc::new(Expr::StrLit("count".into()))])),
                        Rc::new(Expr::IntLit(1)),
                    )),
                )),
            ])),
            TopLevelBlock::End(Block::new(vec![Rc::new(Statement::Dump)])),
        ],
    }
}

fn demo_records() -> Vec<Srec> {
    let mut rows = Vec::new();
    for (x, y) in [(1, 2), (10, 20), (100, 200)] {
        let mut rec = IndexMap::new();
        rec.insert("x".to_string(), x.to_string());
        rec.insert("y".to_string(), y.to_string());
        rows.push(rec);
    }
    rows
}

fn main() {
    env_logger::init();

    let mode = args().nth(1).unwrap_or_else(|| "intorfloat".to_string());
    let type_inferencing =
        if mode == "string" { TypeInferencing::StringOnly } else { TypeInferencing::IntOrFloat };

    let program = demo_program();
    let built = build_program(&program, type_inferencing, false, false, ".".to_string()).expect("demo script builds");

    log::info!("running demo script over {} records", demo_records().len());
    let sink = driver::run_records(&built, demo_records());

    for rec in &sink.main_stream {
        let fields: Vec<String> = rec.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("{}", fields.join(","));
    }
    for snapshot in &sink.dumped {
        println!("{}", snapshot);
    }
}
