// emit/emitf/emit-lashed/tee (§4.3.7): the statements that turn an
// oosvar (or, for tee, an arbitrary map expression) into output
// records distinct from the main srec stream.

use indexmap::IndexMap;

use crate::exec::{Outputs, Vars};
use crate::mlhmmv::Mlhmmv;
use crate::mlrval::Mlrval;
use crate::rval::Evaluator;

/// `emitf @a, @b, ...`: one record with one field per named oosvar,
/// each a bare scalar (no nesting is walked).
pub fn emitf(names: &[String], vars: &mut Vars, outputs: &mut dyn Outputs) {
    let mut rec = IndexMap::new();
    for name in names {
        let v = vars.oosvars.get(&[Mlrval::Str(name.clone())]);
        rec.insert(name.clone(), v.format());
    }
    outputs.emit_record(rec);
}

/// Flatten whatever sits at a leaf node into field,value pairs. A
/// terminal becomes one field named after its source; a level becomes
/// one field per entry, each name optionally prefixed with the path
/// that got us there (`emitp`'s behavior, §4.3.7).
fn collect_leaf_fields(node: &Mlhmmv, name: &str, prefixed: bool) -> Vec<(String, String)> {
    match node {
        Mlhmmv::Terminal(v) => vec![(name.to_string(), v.format())],
        Mlhmmv::Level(_) => {
            let mut out = Vec::new();
            if let Some(entries) = node.entries() {
                for (k, child) in entries {
                    let child_name = if prefixed { format!("{}:{}", name, k.format()) } else { k.format() };
                    out.extend(collect_leaf_fields(child, &child_name, prefixed));
                }
            }
            out
        }
    }
}

fn emit_recurse(
    node: &Mlhmmv,
    names: &[String],
    depth: usize,
    source: &str,
    prefixed: bool,
    key_fields: &mut Vec<(String, String)>,
    outputs: &mut dyn Outputs,
) {
    if depth == names.len() {
        let mut rec = IndexMap::new();
        for (k, v) in key_fields.iter() {
            rec.insert(k.clone(), v.clone());
        }
        for (k, v) in collect_leaf_fields(node, source, prefixed) {
            rec.insert(k, v);
        }
        outputs.emit_record(rec);
        return;
    }
    if let Some(entries) = node.entries() {
        let entries: Vec<_> = entries.map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, child) in entries {
            key_fields.push((names[depth].clone(), k.format()));
            emit_recurse(&child, names, depth + 1, source, prefixed, key_fields, outputs);
            key_fields.pop();
        }
    }
}

/// `emit @source, "name1", "name2", ...`: walk `@source` `names.len()`
/// levels deep, naming each level's key after the corresponding entry
/// in `names`, and emit one record per leaf.
pub fn emit(source: &str, names: &[String], prefixed: bool, vars: &mut Vars, outputs: &mut dyn Outputs) {
    let node = match vars.oosvars.get_node(&[Mlrval::Str(source.to_string())]) {
        Some(n) => n.clone(),
        None => return,
    };
    let mut key_fields = Vec::new();
    emit_recurse(&node, names, 0, source, prefixed, &mut key_fields, outputs);
}

fn emit_lashed_recurse(
    nodes: &[(&str, &Mlhmmv)],
    names: &[String],
    depth: usize,
    prefixed: bool,
    key_fields: &mut Vec<(String, String)>,
    outputs: &mut dyn Outputs,
) {
    if depth == names.len() {
        let mut rec = IndexMap::new();
        for (k, v) in key_fields.iter() {
            rec.insert(k.clone(), v.clone());
        }
        for &(source, node) in nodes {
            for (k, v) in collect_leaf_fields(node, source, prefixed) {
                rec.insert(k, v);
            }
        }
        outputs.emit_record(rec);
        return;
    }
    let (first_name, first_node) = nodes[0];
    let entries = match first_node.entries() {
        Some(e) => e.map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>(),
        None => return,
    };
    for (k, first_child) in entries {
        let mut children: Vec<(&str, &Mlhmmv)> = Vec::with_capacity(nodes.len());
        children.push((first_name, &first_child));
        let mut all_present = true;
        for &(name, node) in &nodes[1..] {
            match node.get_node(std::slice::from_ref(&k)) {
                Some(child) => children.push((name, child)),
                None => {
                    all_present = false;
                    break;
                }
            }
        }
        if !all_present {
            continue;
        }
        key_fields.push((names[depth].clone(), k.format()));
        emit_lashed_recurse(&children, names, depth + 1, prefixed, key_fields, outputs);
        key_fields.pop();
    }
}

/// `emit (@a, @b), "name1", ...`: walk several oosvars in lock-step,
/// one record per shared key path. Keys are enumerated from the first
/// operand's order only (§4.3.7's pinned policy) — a key path missing
/// from a later operand drops that path from the output entirely
/// rather than emitting a partial record.
pub fn emit_lashed(sources: &[String], names: &[String], prefixed: bool, vars: &mut Vars, outputs: &mut dyn Outputs) {
    let mut nodes: Vec<(&str, Mlhmmv)> = Vec::with_capacity(sources.len());
    for s in sources {
        match vars.oosvars.get_node(&[Mlrval::Str(s.clone())]) {
            Some(n) => nodes.push((s.as_str(), n.clone())),
            None => return,
        }
    }
    let node_refs: Vec<(&str, &Mlhmmv)> = nodes.iter().map(|(s, n)| (*s, n)).collect();
    let mut key_fields = Vec::new();
    emit_lashed_recurse(&node_refs, names, 0, prefixed, &mut key_fields, outputs);
}

/// `tee > path, $*` (or any map expression): write one record to a
/// named side stream, independent of the main output stream.
pub fn tee(path_ev: &dyn Evaluator, rec_ev: &dyn Evaluator, vars: &mut Vars, outputs: &mut dyn Outputs) {
    let path = path_ev.process(vars);
    if path.is_absent() || path.is_error() {
        return;
    }
    let rec_val = rec_ev.process(vars);
    let fields = match rec_val {
        Mlrval::Map(m) => {
            let mut out = IndexMap::new();
            if let Some(entries) = m.entries() {
                for (k, v) in entries {
                    out.insert(k.format(), v.to_mlrval().format());
                }
            }
            out
        }
        _ => return,
    };
    let _ = outputs.tee_record(&path.format(), &fields);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;

    struct RecordingOutputs {
        emitted: Vec<IndexMap<String, String>>,
    }
    impl Outputs for RecordingOutputs {
        fn emit_record(&mut self, fields: IndexMap<String, String>) {
            self.emitted.push(fields);
        }
        fn print_line(&mut self, _text: String, _to_stderr: bool) {}
        fn dump_json(&mut self, _json: Json) {}
        fn tee_record(&mut self, _path: &str, _fields: &IndexMap<String, String>) -> Result<(), crate::error::IoSinkError> {
            Ok(())
        }
    }

    #[test]
    fn emitf_builds_one_record_from_named_oosvars() {
        let mut vars = Vars::new(IndexMap::new());
        vars.oosvars.put(&[Mlrval::Str("count".into())], Mlrval::Int(3));
        let mut outputs = RecordingOutputs { emitted: Vec::new() };
        emitf(&["count".to_string()], &mut vars, &mut outputs);
        assert_eq!(outputs.emitted.len(), 1);
        assert_eq!(outputs.emitted[0].get("count").unwrap(), "3");
    }

    #[test]
    fn emit_walks_nested_map_by_named_levels() {
        let mut vars = Vars::new(IndexMap::new());
        vars.oosvars.put(&[Mlrval::Str("sums".into()), Mlrval::Str("a".into())], Mlrval::Int(10));
        vars.oosvars.put(&[Mlrval::Str("sums".into()), Mlrval::Str("b".into())], Mlrval::Int(20));
        let mut outputs = RecordingOutputs { emitted: Vec::new() };
        emit("sums", &["group".to_string()], false, &mut vars, &mut outputs);
        assert_eq!(outputs.emitted.len(), 2);
        assert_eq!(outputs.emitted[0].get("group").unwrap(), "a");
        assert_eq!(outputs.emitted[0].get("sums").unwrap(), "10");
    }

    #[test]
    fn emit_lashed_drops_a_key_path_missing_from_a_later_operand() {
        let mut vars = Vars::new(IndexMap::new());
        // @sums["a"] = 10; @sums["b"] = 20
        vars.oosvars.put(&[Mlrval::Str("sums".into()), Mlrval::Str("a".into())], Mlrval::Int(10));
        vars.oosvars.put(&[Mlrval::Str("sums".into()), Mlrval::Str("b".into())], Mlrval::Int(20));
        // @counts["a"] = 1  (no "b" entry)
        vars.oosvars.put(&[Mlrval::Str("counts".into()), Mlrval::Str("a".into())], Mlrval::Int(1));
        let mut outputs = RecordingOutputs { emitted: Vec::new() };
        emit_lashed(
            &["sums".to_string(), "counts".to_string()],
            &["group".to_string()],
            false,
            &mut vars,
            &mut outputs,
        );
        // "b" exists in @sums but not @counts, so that key path is
        // dropped entirely rather than emitted with a missing field.
        assert_eq!(outputs.emitted.len(), 1);
        assert_eq!(outputs.emitted[0].get("group").unwrap(), "a");
        assert_eq!(outputs.emitted[0].get("sums").unwrap(), "10");
        assert_eq!(outputs.emitted[0].get("counts").unwrap(), "1");
    }
}
