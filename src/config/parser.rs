use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::node::ConfigNode;

const STRING_SOURCE: &str = "<string>";

/// Kinds of lines in a config source.
#[derive(Debug, PartialEq, Eq)]
enum Record<'a> {
	/// blank or comment-only
	Empty,
	/// `[a.b]`
	Heading(Vec<&'a str>),
	/// `key = value`
	Entry(&'a str, &'a str),
	/// `@include name`
	Include(&'a str),
}

/// Removes everything after the first `#`.
fn remove_comment(line: &str) -> &str {
	match line.find('#') {
		Some(pos) => &line[..pos],
		None => line,
	}
}

fn strip_quotes(s: &str) -> &str {
	s.strip_prefix('"')
		.and_then(|s| s.strip_suffix('"'))
		.unwrap_or(s)
}

fn classify(line: &str) -> Result<Record<'_>, String> {
	let line = remove_comment(line).trim();
	if line.is_empty() {
		return Ok(Record::Empty);
	}
	if let Some(rest) = line.strip_prefix('[') {
		let inner = rest
			.strip_suffix(']')
			.ok_or_else(|| "unterminated section heading".to_string())?;
		let names: Vec<&str> = inner.split('.').map(str::trim).collect();
		if names.iter().any(|n| n.is_empty()) {
			return Err(format!("empty section name in [{}]", inner));
		}
		return Ok(Record::Heading(names));
	}
	if let Some(rest) = line.strip_prefix('@') {
		let (directive, arg) = rest
			.split_once(char::is_whitespace)
			.unwrap_or((rest, ""));
		if directive != "include" {
			return Err(format!("unknown directive @{}", directive));
		}
		let name = strip_quotes(arg.trim());
		if name.is_empty() {
			return Err("@include needs a source name".to_string());
		}
		return Ok(Record::Include(name));
	}
	if let Some((key, value)) = line.split_once('=') {
		let key = key.trim();
		if key.is_empty() {
			return Err("empty key".to_string());
		}
		return Ok(Record::Entry(key, value.trim()));
	}
	Err(format!("expected `key = value`, got {:?}", line))
}

/// Parses configuration text into a [`ConfigNode`] tree.
///
/// Grammar, one record per line:
///
/// ```text
/// # comment
/// key = value
/// [section]
/// [section.child]
/// @include name
/// ```
///
/// `@include` pulls a sub-configuration into the current section. Names
/// resolve first against sources registered with
/// [`ConfigParser::add_source`], then as files relative to the including
/// file or the search directory. Names defined locally always shadow
/// included ones.
#[derive(Debug, Clone, Default)]
pub struct ConfigParser {
	sub_confs: HashMap<String, String>,
	search_dir: Option<PathBuf>,
}

impl ConfigParser {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a named sub-configuration for `@include`.
	pub fn add_source(&mut self, name: impl Into<String>, text: impl Into<String>) {
		self.sub_confs.insert(name.into(), text.into());
	}

	pub fn with_source(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
		self.add_source(name, text);
		self
	}

	/// Directory searched for included files when the including source has none.
	pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.search_dir = Some(dir.into());
		self
	}

	/// Parses `text`.
	pub fn parse_str(&self, text: &str) -> Result<ConfigNode, ConfigError> {
		let mut stack = Vec::new();
		let root = self.parse_unit(STRING_SOURCE, text, None, &mut stack)?;
		tracing::debug!(sections = root.sections().count(), "parsed configuration");
		Ok(root)
	}

	/// Parses a source registered with [`ConfigParser::add_source`].
	pub fn parse_source(&self, name: &str) -> Result<ConfigNode, ConfigError> {
		let mut stack = Vec::new();
		self.resolve(name, None, &mut stack)
	}

	/// Reads and parses the file at `path`.
	pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ConfigNode, ConfigError> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.display().to_string(),
			source,
		})?;
		let key = canonical_key(path);
		let mut stack = vec![key];
		let root = self.parse_unit(&path.display().to_string(), &text, path.parent(), &mut stack)?;
		tracing::debug!(path = %path.display(), sections = root.sections().count(), "parsed configuration file");
		Ok(root)
	}

	fn parse_unit(
		&self,
		source_name: &str,
		text: &str,
		base_dir: Option<&Path>,
		stack: &mut Vec<String>,
	) -> Result<ConfigNode, ConfigError> {
		let mut root = ConfigNode::root();
		let mut current: Vec<String> = Vec::new();
		let mut declared: HashSet<Vec<String>> = HashSet::new();
		let mut includes: Vec<(Vec<String>, String)> = Vec::new();

		for (index, line) in text.lines().enumerate() {
			let line_no = index + 1;
			let record = classify(line).map_err(|reason| ConfigError::Syntax {
				source_name: source_name.to_string(),
				line: line_no,
				reason,
			})?;
			match record {
				Record::Empty => {}
				Record::Heading(names) => {
					let path: Vec<String> = names.into_iter().map(String::from).collect();
					let duplicate = |section: &str, key: &str| ConfigError::DuplicateKey {
						source_name: source_name.to_string(),
						line: line_no,
						section: section.to_string(),
						key: key.to_string(),
					};
					if declared.contains(&path) {
						let (last, parent) = path.split_last().map(|(l, p)| (l.as_str(), p.join("."))).unwrap_or_default();
						return Err(duplicate(&parent, last));
					}
					let mut node = &mut root;
					for name in &path {
						if node.contains_key(name) {
							return Err(duplicate(node.path(), name));
						}
						node = node.child_mut_or_insert(name);
					}
					declared.insert(path.clone());
					current = path;
				}
				Record::Entry(key, value) => {
					let node = root.descend_mut(&current);
					if node.has_name(key) {
						return Err(ConfigError::DuplicateKey {
							source_name: source_name.to_string(),
							line: line_no,
							section: node.path().to_string(),
							key: key.to_string(),
						});
					}
					node.insert_entry(key.to_string(), value.to_string());
				}
				Record::Include(name) => includes.push((current.clone(), name.to_string())),
			}
		}

		for (scope, name) in includes {
			let included = self.resolve(&name, base_dir, stack)?;
			root.descend_mut(&scope).merge_shadowed(included);
		}
		Ok(root)
	}

	/// Parses sub-configuration `name` from a registered source or a file.
	fn resolve(
		&self,
		name: &str,
		base_dir: Option<&Path>,
		stack: &mut Vec<String>,
	) -> Result<ConfigNode, ConfigError> {
		let include_err = |reason: String| ConfigError::Include { name: name.to_string(), reason };

		if let Some(text) = self.sub_confs.get(name) {
			return self.parse_nested(name.to_string(), name, text, base_dir, stack);
		}

		let file = self.find_file(name, base_dir).ok_or_else(|| {
			include_err("no source registered under this name and no such file".into())
		})?;
		let text = std::fs::read_to_string(&file)
			.map_err(|e| include_err(format!("{}: {}", file.display(), e)))?;
		let key = canonical_key(&file);
		self.parse_nested(key, &file.display().to_string(), &text, file.parent(), stack)
	}

	fn parse_nested(
		&self,
		key: String,
		source_name: &str,
		text: &str,
		base_dir: Option<&Path>,
		stack: &mut Vec<String>,
	) -> Result<ConfigNode, ConfigError> {
		if stack.contains(&key) {
			let mut chain = stack.clone();
			chain.push(key);
			return Err(ConfigError::Include {
				name: source_name.to_string(),
				reason: format!("include cycle: {}", chain.join(" -> ")),
			});
		}
		stack.push(key);
		let result = self.parse_unit(source_name, text, base_dir, stack);
		stack.pop();
		result
	}

	fn find_file(&self, name: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
		let path = Path::new(name);
		if path.is_absolute() {
			return path.is_file().then(|| path.to_path_buf());
		}
		base_dir
			.into_iter()
			.chain(self.search_dir.as_deref())
			.map(|dir| dir.join(path))
			.find(|candidate| candidate.is_file())
	}
}

fn canonical_key(path: &Path) -> String {
	std::fs::canonicalize(path)
		.unwrap_or_else(|_| path.to_path_buf())
		.display()
		.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_records() {
		assert_eq!(classify("   # only a comment"), Ok(Record::Empty));
		assert_eq!(classify(""), Ok(Record::Empty));
		assert_eq!(classify("[a . b]"), Ok(Record::Heading(vec!["a", "b"])));
		assert_eq!(classify("Bool Test = 1 # trailing"), Ok(Record::Entry("Bool Test", "1")));
		assert_eq!(classify("empty ="), Ok(Record::Entry("empty", "")));
		assert_eq!(classify("@include \"common\""), Ok(Record::Include("common")));
	}

	#[test]
	fn rejects_malformed_lines() {
		for bad in ["[open", "[]", "[a..b]", "= value", "just words", "@include", "@import x"] {
			assert!(classify(bad).is_err(), "{bad:?} should be rejected");
		}
	}

	#[test]
	fn syntax_error_reports_line() {
		let err = ConfigParser::new().parse_str("a = 1\n\nbroken line\n").unwrap_err();
		match err {
			ConfigError::Syntax { line, source_name, .. } => {
				assert_eq!(line, 3);
				assert_eq!(source_name, STRING_SOURCE);
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn duplicate_section_heading() {
		let err = ConfigParser::new().parse_str("[a]\nx = 1\n[a]\n").unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateKey { ref key, line: 3, .. } if key == "a"));
	}

	#[test]
	fn key_and_section_share_a_name() {
		let err = ConfigParser::new().parse_str("a = 1\n[a]\n").unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateKey { .. }));
	}

	#[test]
	fn implicit_parent_then_explicit_heading() {
		let root = ConfigParser::new().parse_str("[a.b]\nx = 1\n[a]\ny = 2\n").unwrap();
		assert_eq!(root.lookup("a.b.x").unwrap(), "1");
		assert_eq!(root.lookup("a.y").unwrap(), "2");
	}
}
