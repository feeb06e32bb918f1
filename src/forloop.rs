// The for-loop family over nested maps and the full record (§4.3.3,
// §4.3.4): four variants crossing {oosvar, local-map} x {keys-only,
// keys-and-value}, plus the record-scanning for-srec. Each snapshots
// (deep-copies) the collection being walked before the first
// iteration, so mutations the loop body makes to that same collection
// never perturb the walk already in progress.

use crate::cst::CstBlock;
use crate::exec::{exec_block, set_slot, Outputs, Vars};
use crate::mlhmmv::Mlhmmv;
use crate::mlrval::{Mlrval, TypeInferencing};
use crate::rval::{eval_keylist_dyn, Evaluator};

/// Walk `node` `key_slots.len()` levels deep, assigning one key
/// variable per level and `val_slot` to whatever terminal value sits
/// at the bottom. A branch that runs out of levels before
/// `key_slots` is exhausted (the map is shallower than the loop
/// asked for) is simply skipped — not every record's oosvar tree
/// need be uniformly deep. Likewise, a branch that is still a
/// non-terminal submap after all key variables are consumed (the map
/// nests deeper than the loop asked for) is skipped rather than bound
/// as a value: the loop only ever yields scalar leaves.
fn kv_recurse(
    node: &Mlhmmv,
    key_slots: &[usize],
    val_slot: usize,
    depth: usize,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    if depth == key_slots.len() {
        if node.is_terminal() {
            set_slot(vars, val_slot, node.to_mlrval());
            exec_block(body, vars, outputs);
        }
        return;
    }
    let entries = match node.entries() {
        Some(e) => e.map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>(),
        None => return,
    };
    for (k, child) in entries {
        set_slot(vars, key_slots[depth], k);
        kv_recurse(&child, key_slots, val_slot, depth + 1, body, vars, outputs);
        if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
            return;
        }
        vars.loop_flags.clear_continued();
    }
}

fn key_only_walk(node: &Mlhmmv, key_slot: usize, body: &CstBlock, vars: &mut Vars, outputs: &mut dyn Outputs) {
    let keys = match node.keys() {
        Some(k) => k,
        None => return,
    };
    for k in keys {
        set_slot(vars, key_slot, k);
        exec_block(body, vars, outputs);
        if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
            return;
        }
        vars.loop_flags.clear_continued();
    }
}

pub fn exec_for_oosvar_kv(
    keylist: &[Box<dyn Evaluator>],
    key_slots: &[usize],
    val_slot: usize,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    let keys = match eval_keylist_dyn(keylist, vars) {
        Some(k) => k,
        None => return,
    };
    let node = match vars.oosvars.get_node(&keys) {
        Some(n) => n.clone(),
        None => return,
    };
    vars.loop_flags.push();
    kv_recurse(&node, key_slots, val_slot, 0, body, vars, outputs);
    vars.loop_flags.pop();
}

pub fn exec_for_oosvar_key_only(
    keylist: &[Box<dyn Evaluator>],
    key_slot: usize,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    let keys = match eval_keylist_dyn(keylist, vars) {
        Some(k) => k,
        None => return,
    };
    let node = match vars.oosvars.get_node(&keys) {
        Some(n) => n.clone(),
        None => return,
    };
    vars.loop_flags.push();
    key_only_walk(&node, key_slot, body, vars, outputs);
    vars.loop_flags.pop();
}

/// Read the value currently held in `target_slot`, which must be a
/// local map variable, and hand back a deep copy to iterate — or
/// `None` if it isn't (or isn't yet) a map, in which case the loop
/// simply doesn't run.
fn snapshot_local_map(target_slot: usize, vars: &Vars) -> Option<Mlhmmv> {
    match vars.locals.current_ref().get(target_slot) {
        Mlrval::Map(m) => Some(m),
        _ => None,
    }
}

pub fn exec_for_local_kv(
    target_slot: usize,
    keylist: &[Box<dyn Evaluator>],
    key_slots: &[usize],
    val_slot: usize,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    let map = match snapshot_local_map(target_slot, vars) {
        Some(m) => m,
        None => return,
    };
    let keys = match eval_keylist_dyn(keylist, vars) {
        Some(k) => k,
        None => return,
    };
    let node = match map.get_node(&keys) {
        Some(n) => n.clone(),
        None => return,
    };
    vars.loop_flags.push();
    kv_recurse(&node, key_slots, val_slot, 0, body, vars, outputs);
    vars.loop_flags.pop();
}

/// Key-only iteration over a local map variable. Per the resolved
/// reading of the keylist-subscript question: the keylist subscripts
/// the target map exactly once (not once per nesting level, unlike the
/// keys-and-value form above) and the keys taken are whatever sits
/// directly at that one subscripted node.
pub fn exec_for_local_key_only(
    target_slot: usize,
    keylist: &[Box<dyn Evaluator>],
    key_slot: usize,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    let map = match snapshot_local_map(target_slot, vars) {
        Some(m) => m,
        None => return,
    };
    let keys = match eval_keylist_dyn(keylist, vars) {
        Some(k) => k,
        None => return,
    };
    let node = match map.get_node(&keys) {
        Some(n) => n.clone(),
        None => return,
    };
    vars.loop_flags.push();
    key_only_walk(&node, key_slot, body, vars, outputs);
    vars.loop_flags.pop();
}

/// `for (k, v in $*)`: walk the current record's fields in their
/// stored order, snapshotting them up front so an `unset $field`
/// inside the body can't shorten the walk already under way.
pub fn exec_for_srec(
    key_slot: usize,
    val_slot: usize,
    mode: TypeInferencing,
    body: &CstBlock,
    vars: &mut Vars,
    outputs: &mut dyn Outputs,
) {
    let snapshot: Vec<(String, String)> = vars.srec.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.loop_flags.push();
    for (k, v) in snapshot {
        set_slot(vars, key_slot, Mlrval::Str(k));
        set_slot(vars, val_slot, Mlrval::infer(&v, mode));
        exec_block(body, vars, outputs);
        if vars.return_state.is_returning() || vars.loop_flags.is_broken() {
            break;
        }
        vars.loop_flags.clear_continued();
    }
    vars.loop_flags.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::BlockExecKind;
    use crate::frame::Frame;
    use indexmap::IndexMap;
    use serde_json::Value as Json;

    fn s(v: &str) -> Mlrval {
        Mlrval::Str(v.to_string())
    }

    struct RecordingOutputs {
        printed: Vec<String>,
    }
    impl Outputs for RecordingOutputs {
        fn emit_record(&mut self, _fields: IndexMap<String, String>) {}
        fn print_line(&mut self, text: String, _to_stderr: bool) {
            self.printed.push(text);
        }
        fn dump_json(&mut self, _json: Json) {}
        fn tee_record(&mut self, _path: &str, _fields: &IndexMap<String, String>) -> Result<(), crate::error::IoSinkError> {
            Ok(())
        }
    }

    struct LocalRead(usize);
    impl Evaluator for LocalRead {
        fn process(&self, vars: &mut Vars) -> Mlrval {
            vars.locals.current_ref().get(self.0)
        }
    }

    fn print_stmt(slot: usize) -> CstStatement {
        CstStatement::Print(Box::new(LocalRead(slot)), false)
    }

    fn loop_aware_block(statements: Vec<CstStatement>) -> CstBlock {
        CstBlock { statements, subframe_base: 0, subframe_var_count: 0, exec_kind: BlockExecKind::LoopAware }
    }

    fn new_vars_with_frame(slots: usize) -> Vars {
        let mut vars = Vars::new(IndexMap::new());
        vars.locals.push(Frame::new(slots));
        vars
    }

    #[test]
    fn oosvar_kv_skips_branches_still_nonterminal_after_keys_exhausted() {
        // @a["p"]["q"]["x"] = 1; @a["p"]["r"] = 2
        let mut vars = new_vars_with_frame(3);
        vars.oosvars.put(&[s("p"), s("q"), s("x")], Mlrval::Int(1));
        vars.oosvars.put(&[s("p"), s("r")], Mlrval::Int(2));
        let mut outputs = RecordingOutputs { printed: Vec::new() };

        // for ((k1, k2), v in @a) { print k1; print k2; print v }
        let body = loop_aware_block(vec![print_stmt(0), print_stmt(1), print_stmt(2)]);
        exec_for_oosvar_kv(&[], &[0, 1], 2, &body, &mut vars, &mut outputs);

        // Only the "p","r" branch is terminal at depth 2; "p","q" still
        // holds a submap ({"x": 1}) and must be skipped entirely.
        assert_eq!(outputs.printed, vec!["p".to_string(), "r".to_string(), "2".to_string()]);
    }

    #[test]
    fn local_key_only_subscripts_the_target_map_exactly_once() {
        // local map m; m["p"]["x"] = 1; m["p"]["y"] = 2; m["q"] = 5
        let mut vars = new_vars_with_frame(2);
        let mut m = Mlhmmv::new();
        m.put(&[s("p"), s("x")], Mlrval::Int(1));
        m.put(&[s("p"), s("y")], Mlrval::Int(2));
        m.put(&[s("q")], Mlrval::Int(5));
        set_slot(&mut vars, 0, Mlrval::Map(m));
        let mut outputs = RecordingOutputs { printed: Vec::new() };

        // for (k in m["p"]) { print k } — one subscript ("p"), then the
        // keys taken are whatever sits directly at that one node: "x", "y".
        let body = loop_aware_block(vec![print_stmt(1)]);
        let keylist: Vec<Box<dyn Evaluator>> = vec![crate::rval::from_string("p")];
        exec_for_local_key_only(0, &keylist, 1, &body, &mut vars, &mut outputs);

        assert_eq!(outputs.printed, vec!["x".to_string(), "y".to_string()]);
    }
}
