// Record driver (§6 "consumed from the record driver" / "exposed to
// the driver"): a minimal loop running begin once, main once per input
// record, end once, over a built `CstProgram`, plus a concrete
// `exec::Outputs` collecting whatever side-channel output the script
// produces. Record I/O (real readers/writers, a CLI) is out of scope;
// this exists so the crate is runnable and testable end to end the way
// the teacher's own `output::run` drives a renderer over a `ReadSource`.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cst::CstProgram;
use crate::error::IoSinkError;
use crate::exec::{self, Outputs, Vars};

pub type Srec = IndexMap<String, String>;

/// The in-memory stand-in for Miller's writer layer (§6's "writer
/// options stub"): every side-effecting statement's output lands here
/// instead of a real stdout/file, so a test (or the demo binary) can
/// inspect exactly what a script produced.
#[derive(Default)]
pub struct RecordSink {
    pub main_stream: Vec<Srec>,
    pub emitted: Vec<Srec>,
    pub printed: Vec<(String, bool)>,
    pub dumped: Vec<Json>,
    pub tee_streams: HashMap<String, Vec<Srec>>,
}

impl RecordSink {
    pub fn new() -> RecordSink {
        RecordSink::default()
    }
}

impl Outputs for RecordSink {
    fn emit_record(&mut self, fields: IndexMap<String, String>) {
        self.emitted.push(fields);
    }

    fn print_line(&mut self, text: String, to_stderr: bool) {
        self.printed.push((text, to_stderr));
    }

    fn dump_json(&mut self, json: Json) {
        self.dumped.push(json);
    }

    fn tee_record(&mut self, path: &str, fields: &IndexMap<String, String>) -> Result<(), IoSinkError> {
        self.tee_streams.entry(path.to_string()).or_default().push(fields.clone());
        Ok(())
    }
}

/// Whether the just-processed record survives onto the main output
/// stream, per `do_final_filter`/`negate_final_filter` (§6's
/// `cst_alloc` parameters): with final filtering off every record
/// passes; with it on, `should_emit_rec` decides (inverted if
/// `negate_final_filter`, the `put -x` behavior).
fn passes_final_filter(program: &CstProgram, vars: &Vars) -> bool {
    if !program.do_final_filter {
        return true;
    }
    if program.negate_final_filter {
        !vars.should_emit_rec
    } else {
        vars.should_emit_rec
    }
}

/// Run `program` over `records`: begin once, main per record, end once.
/// Returns the sink holding every side-channel output plus the main
/// stream of surviving (possibly script-modified) records.
pub fn run_records(program: &CstProgram, records: impl IntoIterator<Item = Srec>) -> RecordSink {
    let mut vars = Vars::new(IndexMap::new());
    let mut sink = RecordSink::new();

    exec::run_top_level(&program.begin, program.begin_depth, &mut vars, &mut sink);

    for srec in records {
        vars.srec = srec;
        vars.should_emit_rec = true;
        exec::run_top_level(&program.main, program.main_depth, &mut vars, &mut sink);
        if passes_final_filter(program, &vars) {
            sink.main_stream.push(vars.srec.clone());
        }
    }

    exec::run_top_level(&program.end, program.end_depth, &mut vars, &mut sink);
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::cst::build_program;
    use crate::mlrval::TypeInferencing;
    use std::rc::Rc;

    fn field(name: &str) -> Rc<ast::Expr> {
        Rc::new(ast::Expr::FieldRead(name.to_string()))
    }

    #[test]
    fn main_stream_carries_computed_field_across_records() {
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(vec![Rc::new(ast::Statement::Assign(
                ast::AssignTarget::Field("z".into()),
                Rc::new(ast::Expr::BinOp(ast::BinOp::Add, field("x"), field("y"))),
            ))]))],
        };
        let built = build_program(&program, TypeInferencing::IntOrFloat, false, false, ".".into()).unwrap();

        let mut r1 = Srec::new();
        r1.insert("x".into(), "1".into());
        r1.insert("y".into(), "2".into());
        let mut r2 = Srec::new();
        r2.insert("x".into(), "10".into());
        r2.insert("y".into(), "20".into());

        let sink = run_records(&built, vec![r1, r2]);
        assert_eq!(sink.main_stream.len(), 2);
        assert_eq!(sink.main_stream[0].get("z").unwrap(), "3");
        assert_eq!(sink.main_stream[1].get("z").unwrap(), "30");
    }

    #[test]
    fn final_filter_drops_records_that_fail_and_negation_flips_it() {
        // filter-less script, final filter applied as a `put -x`-style
        // post-check: keep only records where x > 5.
        let program = ast::Program {
            filter_mode: false,
            blocks: vec![ast::TopLevelBlock::Main(ast::Block::new(vec![Rc::new(ast::Statement::FilterBareBool(Rc::new(
                ast::Expr::BinOp(ast::BinOp::Gt, field("x"), Rc::new(ast::Expr::IntLit(5))),
            )))]))],
        };
        let built = build_program(&program, TypeInferencing::IntOrFloat, true, false, ".".into()).unwrap();

        let mut r1 = Srec::new();
        r1.insert("x".into(), "1".into());
        let mut r2 = Srec::new();
        r2.insert("x".into(), "10".into());

        let sink = run_records(&built, vec![r1.clone(), r2.clone()]);
        assert_eq!(sink.main_stream.len(), 1);
        assert_eq!(sink.main_stream[0].get("x").unwrap(), "10");

        let built_negated = build_program(&program, TypeInferencing::IntOrFloat, true, true, ".".into()).unwrap();
        let sink_negated = run_records(&built_negated, vec![r1, r2]);
        assert_eq!(sink_negated.main_stream.len(), 1);
        assert_eq!(sink_negated.main_stream[0].get("x").unwrap(), "1");
    }
}
