/*
 * diff.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Casellario, an SMTP message-processing backend.
 *
 * Casellario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Casellario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Casellario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Reconfiguration diff: which gateways effectively changed between two trees.

use std::collections::BTreeSet;

use super::{split_pipeline, ConfigTree, Section};

/// Result of comparing two configuration trees: gateway names whose processor
/// graph or own group changed, plus gateways added and removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDiff {
    pub changed: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Instance names added, removed, or structurally unequal between two sections.
fn section_delta(old: &Section, new: &Section) -> BTreeSet<String> {
    let mut delta = BTreeSet::new();
    for (alias, group) in new.iter() {
        match old.group(alias) {
            Some(old_group) if old_group == group => {}
            _ => {
                delta.insert(alias.to_string());
            }
        }
    }
    for (alias, _) in old.iter() {
        if new.group(alias).is_none() {
            delta.insert(alias.to_string());
        }
    }
    delta
}

/// True when any entry of the pipeline expression references an instance in `delta`.
/// Entries are resolved through the section's alias map; both the alias and the
/// canonical name count as references.
fn pipeline_touches(expr: &str, section: &Section, delta: &BTreeSet<String>) -> bool {
    split_pipeline(expr).iter().any(|(alias, name)| {
        delta.contains(alias)
            || delta.contains(name)
            || delta.contains(section.canonical(alias))
    })
}

/// Compute the gateway change sets between an old and a new configuration tree.
pub fn diff_trees(old: &ConfigTree, new: &ConfigTree) -> ConfigDiff {
    let processor_delta = section_delta(&old.processors, &new.processors);
    let stream_delta = section_delta(&old.stream_processors, &new.stream_processors);

    let mut diff = ConfigDiff::default();
    let mut old_tracking: BTreeSet<String> =
        old.gateways.aliases().map(str::to_string).collect();

    for (name, group) in new.gateways.iter() {
        let save_expr = group.str("save_process").unwrap_or("");
        let stream_expr = group.str("save_stream").unwrap_or("");
        let touched = pipeline_touches(save_expr, &new.processors, &processor_delta)
            || pipeline_touches(stream_expr, &new.stream_processors, &stream_delta);
        if touched {
            diff.changed.insert(name.to_string());
        }
        match old.gateways.group(name) {
            Some(old_group) => {
                if old_group != group {
                    diff.changed.insert(name.to_string());
                }
                old_tracking.remove(name);
            }
            None => {
                diff.added.insert(name.to_string());
            }
        }
    }

    diff.removed = old_tracking;
    // A gateway cannot be both changed and added.
    for name in &diff.added {
        diff.changed.remove(name);
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;

    fn tree(json: &str) -> ConfigTree {
        ConfigTree::from_json(json).unwrap()
    }

    #[test]
    fn identical_trees_yield_empty_diff() {
        let t = tree(
            r#"{"processors": {"a": {}, "b": {"x": 1}},
                "gateways": {"default": {"save_process": "a|b"}}}"#,
        );
        assert!(diff_trees(&t, &t.clone()).is_empty());
    }

    #[test]
    fn processor_value_change_marks_referencing_gateway() {
        let old = tree(
            r#"{"processors": {"a": {}, "b": {"log_received_mails": true}},
                "gateways": {"default": {"save_process": "A|B"}}}"#,
        );
        let new = tree(
            r#"{"processors": {"a": {}, "b": {"log_received_mails": false}},
                "gateways": {"default": {"save_process": "A|B"}}}"#,
        );
        let d = diff_trees(&old, &new);
        assert_eq!(d.changed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["default"]);
        assert!(d.added.is_empty());
        assert!(d.removed.is_empty());
    }

    #[test]
    fn unreferenced_processor_change_leaves_gateway_alone() {
        let old = tree(
            r#"{"processors": {"a": {}, "c": {"n": 1}},
                "gateways": {"default": {"save_process": "a"}}}"#,
        );
        let new = tree(
            r#"{"processors": {"a": {}, "c": {"n": 2}},
                "gateways": {"default": {"save_process": "a"}}}"#,
        );
        assert!(diff_trees(&old, &new).is_empty());
    }

    #[test]
    fn gateway_added_and_removed() {
        let old = tree(r#"{"gateways": {"gone": {}}}"#);
        let new = tree(r#"{"gateways": {"fresh": {}}}"#);
        let d = diff_trees(&old, &new);
        assert!(d.changed.is_empty());
        assert_eq!(d.added.iter().map(String::as_str).collect::<Vec<_>>(), vec!["fresh"]);
        assert_eq!(d.removed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["gone"]);
    }

    #[test]
    fn gateway_group_change_is_structural() {
        // Same keys and values, different textual order: structurally equal.
        let old = tree(r#"{"gateways": {"g": {"x": 1, "y": 2}}}"#);
        let new = tree(r#"{"gateways": {"g": {"y": 2, "x": 1}}}"#);
        assert!(diff_trees(&old, &new).is_empty());

        let new2 = tree(r#"{"gateways": {"g": {"x": 1, "y": 3}}}"#);
        let d = diff_trees(&old, &new2);
        assert_eq!(d.changed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["g"]);
    }

    #[test]
    fn stream_processor_change_marks_stream_pipeline() {
        let old = tree(
            r#"{"stream_processors": {"chunksaver": {"chunksaver_chunk_size": 16384}},
                "gateways": {"g": {"save_stream": "mimeanalyzer|chunksaver"}}}"#,
        );
        let new = tree(
            r#"{"stream_processors": {"chunksaver": {"chunksaver_chunk_size": 8192}},
                "gateways": {"g": {"save_stream": "mimeanalyzer|chunksaver"}}}"#,
        );
        let d = diff_trees(&old, &new);
        assert_eq!(d.changed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["g"]);
    }

    #[test]
    fn names_match_case_insensitively() {
        let old = tree(
            r#"{"processors": {"Redis": {"redis_expire_seconds": 100}},
                "gateways": {"G1": {"save_process": "REDIS"}}}"#,
        );
        let new = tree(
            r#"{"processors": {"redis": {"redis_expire_seconds": 200}},
                "gateways": {"g1": {"save_process": "Redis"}}}"#,
        );
        let d = diff_trees(&old, &new);
        assert_eq!(d.changed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["g1"]);
    }

    #[test]
    fn aliased_instance_change_reaches_alias_reference() {
        let old = tree(
            r#"{"processors": {"mydb:sql": {"batch": 50}},
                "gateways": {"g": {"save_process": "mydb"}}}"#,
        );
        let new = tree(
            r#"{"processors": {"mydb:sql": {"batch": 10}},
                "gateways": {"g": {"save_process": "mydb"}}}"#,
        );
        let d = diff_trees(&old, &new);
        assert_eq!(d.changed.iter().map(String::as_str).collect::<Vec<_>>(), vec!["g"]);
    }
}
