use std::collections::HashMap;
use std::fmt;

use crate::error::ConfigError;
use crate::quota::Quota;
use crate::size::ByteSize;

use super::value::FromConfigValue;

/// One section of a parsed configuration.
///
/// Holds scalar entries and named child sections, both in declaration
/// order. Children are owned by their parent; the tree is immutable once
/// the parser hands it out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNode {
	name: String,
	path: String,
	entries: Vec<(String, String)>,
	entry_index: HashMap<String, usize>,
	children: Vec<ConfigNode>,
	child_index: HashMap<String, usize>,
}

impl ConfigNode {
	pub(crate) fn root() -> Self {
		Self::default()
	}

	fn child_of(parent_path: &str, name: &str) -> Self {
		let path = if parent_path.is_empty() {
			name.to_string()
		} else {
			format!("{}.{}", parent_path, name)
		};
		Self { name: name.to_string(), path, ..Self::default() }
	}

	/// Section name; empty for the root.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Dotted path from the root; empty for the root.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Raw value of `key`.
	pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
		self.entry_index
			.get(key)
			.map(|&i| self.entries[i].1.as_str())
			.ok_or_else(|| ConfigError::KeyNotFound {
				section: self.path.clone(),
				key: key.to_string(),
			})
	}

	/// Raw value of `key`, or `default` when absent.
	pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
		self.get(key).unwrap_or(default)
	}

	/// Value of `key` converted to `T`.
	pub fn get_as<T: FromConfigValue>(&self, key: &str) -> Result<T, ConfigError> {
		let raw = self.get(key)?;
		T::from_config_value(raw).ok_or_else(|| ConfigError::InvalidValue {
			section: self.path.clone(),
			key: key.to_string(),
			value: raw.to_string(),
			expected: T::EXPECTED,
		})
	}

	/// Value of `key` converted to `T`, or `fallback`.
	///
	/// A missing entry falls back silently; a malformed one is logged.
	pub fn get_as_or<T: FromConfigValue>(&self, key: &str, fallback: T) -> T {
		match self.get_as(key) {
			Ok(value) => value,
			Err(ConfigError::KeyNotFound { .. }) => fallback,
			Err(err) => {
				tracing::warn!(section = %self.path, %err, "using fallback for config entry");
				fallback
			}
		}
	}

	/// Child section `name`.
	pub fn section(&self, name: &str) -> Result<&ConfigNode, ConfigError> {
		self.child_index
			.get(name)
			.map(|&i| &self.children[i])
			.ok_or_else(|| ConfigError::KeyNotFound {
				section: self.path.clone(),
				key: format!("[{}]", name),
			})
	}

	/// Nested section by dotted path, e.g. `"servers.primary"`.
	pub fn section_path(&self, path: &str) -> Result<&ConfigNode, ConfigError> {
		path.split('.').try_fold(self, |node, name| node.section(name.trim()))
	}

	/// Scalar by dotted path; the last component is the key.
	pub fn lookup(&self, path: &str) -> Result<&str, ConfigError> {
		match path.rsplit_once('.') {
			Some((sections, key)) => self.section_path(sections)?.get(key.trim()),
			None => self.get(path),
		}
	}

	/// Quota of `capacity` whose fraction is the value of `key`.
	pub fn get_quota(&self, key: &str, capacity: ByteSize) -> Result<Quota, ConfigError> {
		let raw = self.get(key)?;
		Quota::parse(capacity, raw).map_err(|source| ConfigError::Quota {
			section: self.path.clone(),
			key: key.to_string(),
			source,
		})
	}

	/// Like [`ConfigNode::get_quota`], returning `fallback` on any failure.
	pub fn get_quota_or(&self, key: &str, capacity: ByteSize, fallback: Quota) -> Quota {
		match self.get_quota(key, capacity) {
			Ok(quota) => quota,
			Err(ConfigError::KeyNotFound { .. }) => fallback,
			Err(err) => {
				tracing::warn!(section = %self.path, %err, "using fallback quota");
				fallback
			}
		}
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.entry_index.contains_key(key)
	}

	pub fn has_section(&self, name: &str) -> bool {
		self.child_index.contains_key(name)
	}

	/// Scalar entries in declaration order.
	pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Child sections in declaration order.
	pub fn sections(&self) -> impl Iterator<Item = &ConfigNode> {
		self.children.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty() && self.children.is_empty()
	}

	pub(crate) fn has_name(&self, name: &str) -> bool {
		self.entry_index.contains_key(name) || self.child_index.contains_key(name)
	}

	/// Inserts an entry. The caller checks for collisions.
	pub(crate) fn insert_entry(&mut self, key: String, value: String) {
		self.entry_index.insert(key.clone(), self.entries.len());
		self.entries.push((key, value));
	}

	/// Returns child `name`, creating it when missing.
	pub(crate) fn child_mut_or_insert(&mut self, name: &str) -> &mut ConfigNode {
		let index = match self.child_index.get(name) {
			Some(&i) => i,
			None => {
				let child = ConfigNode::child_of(&self.path, name);
				self.child_index.insert(name.to_string(), self.children.len());
				self.children.push(child);
				self.children.len() - 1
			}
		};
		&mut self.children[index]
	}

	pub(crate) fn descend_mut(&mut self, path: &[String]) -> &mut ConfigNode {
		path.iter().fold(self, |node, name| node.child_mut_or_insert(name))
	}

	/// Fills in names from `included` that this node does not define.
	///
	/// A child defined here shadows the included child of the same name
	/// as a whole.
	pub(crate) fn merge_shadowed(&mut self, included: ConfigNode) {
		for (key, value) in included.entries {
			if !self.has_name(&key) {
				self.insert_entry(key, value);
			}
		}
		for child in included.children {
			if !self.has_name(&child.name) {
				let mut child = child;
				child.rebase(&self.path);
				self.child_index.insert(child.name.clone(), self.children.len());
				self.children.push(child);
			}
		}
	}

	/// Recomputes paths after moving a subtree under `parent_path`.
	fn rebase(&mut self, parent_path: &str) {
		self.path = if parent_path.is_empty() {
			self.name.clone()
		} else {
			format!("{}.{}", parent_path, self.name)
		};
		let path = self.path.clone();
		for child in &mut self.children {
			child.rebase(&path);
		}
	}

	fn write_section(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if !self.path.is_empty() {
			writeln!(f, "[{}]", self.path)?;
		}
		for (key, value) in &self.entries {
			writeln!(f, "{} = {}", key, value)?;
		}
		for child in &self.children {
			writeln!(f)?;
			child.write_section(f)?;
		}
		Ok(())
	}
}

/// Dumps the tree in the same grammar the parser reads.
impl fmt::Display for ConfigNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.write_section(f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> ConfigNode {
		let mut root = ConfigNode::root();
		root.insert_entry("name".into(), "uplink".into());
		let servers = root.child_mut_or_insert("servers");
		servers.insert_entry("count".into(), "2".into());
		let primary = servers.child_mut_or_insert("primary");
		primary.insert_entry("port".into(), "8080".into());
		root
	}

	#[test]
	fn lookups() {
		let root = sample();
		assert_eq!(root.get("name").unwrap(), "uplink");
		assert_eq!(root.section("servers").unwrap().get_as::<u32>("count").unwrap(), 2);
		assert_eq!(root.section_path("servers.primary").unwrap().path(), "servers.primary");
		assert_eq!(root.lookup("servers.primary.port").unwrap(), "8080");
		assert_eq!(root.get_or("missing", "dflt"), "dflt");
	}

	#[test]
	fn missing_names_fail() {
		let root = sample();
		assert!(matches!(root.get("nope"), Err(ConfigError::KeyNotFound { .. })));
		assert!(matches!(root.section("nope"), Err(ConfigError::KeyNotFound { .. })));
		assert!(matches!(root.lookup("servers.nope.port"), Err(ConfigError::KeyNotFound { .. })));
	}

	#[test]
	fn typed_fallbacks() {
		let mut root = ConfigNode::root();
		root.insert_entry("port".into(), "not a number".into());
		assert!(matches!(root.get_as::<u16>("port"), Err(ConfigError::InvalidValue { .. })));
		assert_eq!(root.get_as_or::<u16>("port", 7), 7);
		assert_eq!(root.get_as_or::<u16>("absent", 9), 9);
	}

	#[test]
	fn merge_keeps_local_names() {
		let mut local = sample();
		let mut included = ConfigNode::root();
		included.insert_entry("name".into(), "other".into());
		included.insert_entry("extra".into(), "1".into());
		included.child_mut_or_insert("servers").insert_entry("count".into(), "9".into());
		included.child_mut_or_insert("clients").insert_entry("count".into(), "3".into());

		local.merge_shadowed(included);
		assert_eq!(local.get("name").unwrap(), "uplink");
		assert_eq!(local.get("extra").unwrap(), "1");
		assert_eq!(local.lookup("servers.count").unwrap(), "2");
		assert_eq!(local.lookup("clients.count").unwrap(), "3");
	}

	#[test]
	fn display_dumps_sections() {
		let dumped = sample().to_string();
		assert!(dumped.starts_with("name = uplink\n"));
		assert!(dumped.contains("[servers]\ncount = 2\n"));
		assert!(dumped.contains("[servers.primary]\nport = 8080\n"));
	}
}
