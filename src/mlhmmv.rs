// Multi-level hash-map value (mlhmmv): a value that is either a
// terminal mlrval or an ordered key->mlhmmv map. Used for both the
// process-wide oosvar store and any local variable declared `map`.
//
// Order matters (§3, §9): iteration must preserve insertion order while
// still giving O(1) lookup, hence `indexmap::IndexMap` rather than the
// teacher's plain `HashMap` (see DESIGN.md).

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as Json};

use crate::mlrval::Mlrval;

#[derive(Clone, Debug, PartialEq)]
pub enum Mlhmmv {
    Terminal(Mlrval),
    Level(IndexMap<Mlrval, Mlhmmv>),
}

impl Mlhmmv {
    pub fn new() -> Mlhmmv {
        Mlhmmv::Level(IndexMap::new())
    }

    pub fn from_mlrval(v: Mlrval) -> Mlhmmv {
        match v {
            Mlrval::Map(m) => m,
            other => Mlhmmv::Terminal(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Mlhmmv::Terminal(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Mlhmmv::Terminal(_) => false,
            Mlhmmv::Level(m) => m.is_empty(),
        }
    }

    /// The node this keylist addresses, if every intermediate level
    /// exists and is itself a map (not a terminal).
    pub fn get_node(&self, keys: &[Mlrval]) -> Option<&Mlhmmv> {
        match keys.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                Mlhmmv::Level(map) => map.get(first).and_then(|child| child.get_node(rest)),
                Mlhmmv::Terminal(_) => None,
            },
        }
    }

    pub fn get_node_mut(&mut self, keys: &[Mlrval]) -> Option<&mut Mlhmmv> {
        match keys.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                Mlhmmv::Level(map) => map.get_mut(first).and_then(|child| child.get_node_mut(rest)),
                Mlhmmv::Terminal(_) => None,
            },
        }
    }

    /// Read as a scalar mlrval per §7's absent-propagation rule: a
    /// missing path is absent, not an error.
    pub fn get(&self, keys: &[Mlrval]) -> Mlrval {
        match self.get_node(keys) {
            None => Mlrval::Absent,
            Some(node) => node.to_mlrval(),
        }
    }

    pub fn to_mlrval(&self) -> Mlrval {
        match self {
            Mlhmmv::Terminal(v) => v.clone(),
            Mlhmmv::Level(_) => Mlrval::Map(self.clone()),
        }
    }

    /// Put, autovivifying intermediate levels. Overwrites a terminal
    /// found where a level is expected.
    pub fn put(&mut self, keys: &[Mlrval], value: Mlrval) {
        match keys.split_first() {
            None => {
                *self = Mlhmmv::from_mlrval(value);
            }
            Some((first, rest)) => {
                if !matches!(self, Mlhmmv::Level(_)) {
                    *self = Mlhmmv::new();
                }
                if let Mlhmmv::Level(map) = self {
                    let child = map.entry(first.clone()).or_insert_with(Mlhmmv::new);
                    child.put(rest, value);
                }
            }
        }
    }

    /// Remove the subtree rooted at the keylist. Empty keylist clears
    /// this node entirely. Returns whether anything was removed.
    pub fn remove(&mut self, keys: &[Mlrval]) -> bool {
        match keys.split_first() {
            None => {
                let had_content = !self.is_empty() || self.is_terminal();
                *self = Mlhmmv::new();
                had_content
            }
            Some((first, rest)) => match self {
                Mlhmmv::Level(map) => {
                    if rest.is_empty() {
                        map.shift_remove(first).is_some()
                    } else {
                        match map.get_mut(first) {
                            Some(child) => child.remove(rest),
                            None => false,
                        }
                    }
                }
                Mlhmmv::Terminal(_) => false,
            },
        }
    }

    /// Ordered entries of this level. `None` if this node is terminal.
    pub fn entries(&self) -> Option<impl Iterator<Item = (&Mlrval, &Mlhmmv)>> {
        match self {
            Mlhmmv::Level(map) => Some(map.iter()),
            Mlhmmv::Terminal(_) => None,
        }
    }

    /// Ordered keys of this level, for the key-only for-loop variant.
    pub fn keys(&self) -> Option<Vec<Mlrval>> {
        match self {
            Mlhmmv::Level(map) => Some(map.keys().cloned().collect()),
            Mlhmmv::Terminal(_) => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Mlhmmv::Terminal(v) => match v {
                Mlrval::Absent => Json::Null,
                Mlrval::Error(kind) => Json::String(format!("(error) {}", kind)),
                Mlrval::Str(s) => Json::String(s.clone()),
                Mlrval::Int(i) => Json::from(*i),
                Mlrval::Float(f) => Json::from(*f),
                Mlrval::Bool(b) => Json::from(*b),
                Mlrval::Map(m) => m.to_json(),
            },
            Mlhmmv::Level(map) => {
                let mut obj = JsonMap::new();
                for (k, v) in map.iter() {
                    obj.insert(k.format(), v.to_json());
                }
                Json::Object(obj)
            }
        }
    }
}

impl Default for Mlhmmv {
    fn default() -> Self {
        Mlhmmv::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Mlrval {
        Mlrval::Str(text.to_string())
    }

    #[test]
    fn put_autovivifies_and_get_round_trips() {
        let mut root = Mlhmmv::new();
        root.put(&[s("p"), s("q")], Mlrval::Int(10));
        root.put(&[s("p"), s("r")], Mlrval::Int(20));
        root.put(&[s("s"), s("t")], Mlrval::Int(30));

        assert_eq!(root.get(&[s("p"), s("q")]), Mlrval::Int(10));
        assert_eq!(root.get(&[s("p"), s("r")]), Mlrval::Int(20));
        assert_eq!(root.get(&[s("missing")]), Mlrval::Absent);
    }

    #[test]
    fn insertion_order_preserved() {
        let mut root = Mlhmmv::new();
        root.put(&[s("p"), s("q")], Mlrval::Int(10));
        root.put(&[s("p"), s("r")], Mlrval::Int(20));
        root.put(&[s("s"), s("t")], Mlrval::Int(30));

        let top_keys = root.keys().unwrap();
        assert_eq!(top_keys, vec![s("p"), s("s")]);
    }

    #[test]
    fn remove_subtree_and_unset_all() {
        let mut root = Mlhmmv::new();
        root.put(&[s("p"), s("q")], Mlrval::Int(10));
        root.put(&[s("s")], Mlrval::Int(1));

        assert!(root.remove(&[s("p"), s("q")]));
        assert_eq!(root.get(&[s("p"), s("q")]), Mlrval::Absent);

        root.remove(&[]);
        assert!(root.is_empty());
    }

    #[test]
    fn deep_copy_is_independent_of_original() {
        let mut root = Mlhmmv::new();
        root.put(&[s("p")], Mlrval::Int(1));
        let copy = root.clone();
        root.put(&[s("p")], Mlrval::Int(2));
        assert_eq!(copy.get(&[s("p")]), Mlrval::Int(1));
        assert_eq!(root.get(&[s("p")]), Mlrval::Int(2));
    }

    #[test]
    fn put_overwrites_terminal_with_level() {
        let mut root = Mlhmmv::new();
        root.put(&[s("a")], Mlrval::Int(1));
        root.put(&[s("a"), s("b")], Mlrval::Int(2));
        assert_eq!(root.get(&[s("a"), s("b")]), Mlrval::Int(2));
    }
}
