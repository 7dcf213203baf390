//! Rule engine: glob masks that attach metadata to filesystem nodes.
//!
//! Each config rule carries one or more shell-style masks and a set of field
//! actions.  A rule matches a node when any mask matches the node's full
//! image path, or — for masks not anchored with a leading `/` — its bare
//! name.  The sentinel mask `/` matches exactly the anonymous root, whose
//! path is the empty string.
//!
//! Rules run in declaration order, so later rules override earlier ones via
//! the tree's append rules (ACEs update in place, a fresh Compression leaf
//! replaces the previous one).

use globset::{Glob, GlobMatcher};

use crate::access::UserRole;
use crate::config;
use crate::error::BuildError;
use crate::fwfs::{CompressionType, NodeId, ObjectAttrs, ObjectKind, Tree};

pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    masks: Vec<Mask>,
    readonly: Option<bool>,
    compress: Option<CompressionType>,
    read: Option<UserRole>,
    write: Option<UserRole>,
}

struct Mask {
    pattern: String,
    matcher: GlobMatcher,
}

impl Mask {
    fn matches(&self, path: &str, name: &str) -> bool {
        if self.matcher.is_match(path) {
            return true;
        }
        if !self.pattern.starts_with('/') && self.matcher.is_match(name) {
            return true;
        }
        self.pattern == "/" && path.is_empty()
    }
}

impl RuleSet {
    /// Compile raw config rules.  Bad globs, role names and compression
    /// names all fail here, before any filesystem work starts.
    pub fn compile(raw: &[config::Rule]) -> Result<Self, BuildError> {
        let mut rules = Vec::with_capacity(raw.len());
        for rule in raw {
            let mut masks = Vec::new();
            for pattern in rule.mask.iter() {
                let glob = Glob::new(pattern).map_err(|e| BuildError::Validation {
                    message: format!("invalid mask '{pattern}': {e}"),
                })?;
                masks.push(Mask {
                    pattern: pattern.to_string(),
                    matcher: glob.compile_matcher(),
                });
            }

            let compress = match &rule.compress {
                Some(name) => Some(CompressionType::parse(name).ok_or_else(|| {
                    BuildError::Validation {
                        message: format!("unknown compression type '{name}' in rule"),
                    }
                })?),
                None => None,
            };
            let read = parse_role(rule.read.as_deref())?;
            let write = parse_role(rule.write.as_deref())?;

            rules.push(CompiledRule {
                masks,
                readonly: rule.readonly,
                compress,
                read,
                write,
            });
        }
        Ok(Self { rules })
    }

    /// Apply every matching rule to `node`, in declaration order.
    pub fn apply(&self, tree: &mut Tree, node: NodeId) {
        let path = tree.path(node);
        let name = tree.named(node).name.clone();

        for rule in &self.rules {
            if !rule.masks.iter().any(|m| m.matches(&path, &name)) {
                continue;
            }
            if let Some(readonly) = rule.readonly {
                tree.set_attr(node, ObjectAttrs::READ_ONLY, readonly);
            }
            if let Some(compress) = rule.compress {
                tree.append_compression(node, compress);
            }
            if let Some(role) = rule.read {
                tree.append_ace(node, ObjectKind::ReadAce, role);
            }
            if let Some(role) = rule.write {
                tree.append_ace(node, ObjectKind::WriteAce, role);
            }
        }
    }
}

fn parse_role(name: Option<&str>) -> Result<Option<UserRole>, BuildError> {
    match name {
        None => Ok(None),
        Some(name) => UserRole::parse(name)
            .map(Some)
            .ok_or_else(|| BuildError::Validation {
                message: format!("unknown user role '{name}' in rule"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_set(json: &str) -> RuleSet {
        let raw: Vec<config::Rule> = serde_json::from_str(json).unwrap();
        RuleSet::compile(&raw).unwrap()
    }

    fn sample_tree() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let volume = tree.new_volume("v").unwrap();
        let root = tree.add_directory(volume, "", 0).unwrap();
        let www = tree.add_directory(root, "www", 0).unwrap();
        let file = tree.add_file(www, "app.json", 0).unwrap();
        (tree, root, www, file)
    }

    #[test]
    fn bare_name_mask_matches_anywhere() {
        let rules = rule_set(r#"[{"mask": "*.json", "compress": "gzip"}]"#);
        let (mut tree, _root, _www, file) = sample_tree();
        rules.apply(&mut tree, file);
        assert_eq!(tree.compression(file), CompressionType::Gzip);
    }

    #[test]
    fn anchored_mask_matches_full_path_only() {
        let rules = rule_set(r#"[{"mask": "/www/*", "readonly": true}]"#);
        let (mut tree, root, www, file) = sample_tree();

        rules.apply(&mut tree, file);
        assert!(tree.attrs(file).contains(ObjectAttrs::READ_ONLY));

        // The mask is anchored, so a node merely *named* "www" elsewhere
        // does not match.
        let www2 = tree.add_directory(root, "not-www", 0).unwrap();
        let other = tree.add_file(www2, "www", 0).unwrap();
        rules.apply(&mut tree, other);
        assert!(!tree.attrs(other).contains(ObjectAttrs::READ_ONLY));

        rules.apply(&mut tree, www);
        assert!(!tree.attrs(www).contains(ObjectAttrs::READ_ONLY));
    }

    #[test]
    fn sentinel_mask_matches_root() {
        let rules = rule_set(r#"[{"mask": "/", "read": "user", "write": "admin"}]"#);
        let (mut tree, root, www, _file) = sample_tree();

        rules.apply(&mut tree, root);
        assert!(tree.find_object(root, ObjectKind::ReadAce).is_some());
        assert_eq!(tree.ace_role(root, ObjectKind::ReadAce), UserRole::User);

        // Only the root has the empty path.
        rules.apply(&mut tree, www);
        assert!(tree.find_object(www, ObjectKind::ReadAce).is_none());
    }

    #[test]
    fn later_rules_override_earlier_ones() {
        let rules = rule_set(
            r#"[
                {"mask": "*", "read": "guest"},
                {"mask": "*.json", "read": "admin"}
            ]"#,
        );
        let (mut tree, _root, _www, file) = sample_tree();
        rules.apply(&mut tree, file);
        assert_eq!(tree.ace_role(file, ObjectKind::ReadAce), UserRole::Admin);
    }

    #[test]
    fn inherited_role_not_duplicated() {
        let rules = rule_set(r#"[{"mask": "*.json", "read": "guest"}]"#);
        let (mut tree, root, _www, file) = sample_tree();
        tree.append_ace(root, ObjectKind::ReadAce, UserRole::Guest);

        rules.apply(&mut tree, file);

        assert!(tree.find_object(file, ObjectKind::ReadAce).is_none());
        assert_eq!(tree.ace_role(file, ObjectKind::ReadAce), UserRole::Guest);
    }

    #[test]
    fn readonly_false_clears_bit() {
        let rules = rule_set(
            r#"[
                {"mask": "*", "readonly": true},
                {"mask": "*.json", "readonly": false}
            ]"#,
        );
        let (mut tree, _root, _www, file) = sample_tree();
        rules.apply(&mut tree, file);
        assert!(!tree.attrs(file).contains(ObjectAttrs::READ_ONLY));
    }

    #[test]
    fn star_crosses_directory_separators() {
        let rules = rule_set(r#"[{"mask": "/www*", "readonly": true}]"#);
        let (mut tree, _root, _www, file) = sample_tree();
        rules.apply(&mut tree, file);
        assert!(tree.attrs(file).contains(ObjectAttrs::READ_ONLY));
    }

    #[test]
    fn unknown_compression_rejected_at_compile() {
        let raw: Vec<config::Rule> =
            serde_json::from_str(r#"[{"mask": "*", "compress": "lzma"}]"#).unwrap();
        assert!(matches!(
            RuleSet::compile(&raw),
            Err(BuildError::Validation { .. })
        ));
    }

    #[test]
    fn unknown_role_rejected_at_compile() {
        let raw: Vec<config::Rule> =
            serde_json::from_str(r#"[{"mask": "*", "read": "overlord"}]"#).unwrap();
        assert!(matches!(
            RuleSet::compile(&raw),
            Err(BuildError::Validation { .. })
        ));
    }
}
