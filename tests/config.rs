use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use pacewire::{ByteSize, ConfigError, ConfigNode, ConfigParser, Quota};
use proptest::prelude::*;

/// Fresh directory under the system temp dir, removed on drop.
struct TempDir(PathBuf);

impl TempDir {
	fn new(tag: &str) -> Self {
		static NEXT: AtomicUsize = AtomicUsize::new(0);
		let n = NEXT.fetch_add(1, Ordering::Relaxed);
		let dir = std::env::temp_dir().join(format!("pacewire-conf-{}-{}-{}", tag, std::process::id(), n));
		std::fs::create_dir_all(&dir).unwrap();
		Self(dir)
	}

	fn write(&self, name: &str, text: &str) -> PathBuf {
		let path = self.0.join(name);
		std::fs::write(&path, text).unwrap();
		path
	}
}

impl Drop for TempDir {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.0);
	}
}

fn parse(text: &str) -> ConfigNode {
	ConfigParser::new().parse_str(text).unwrap()
}

#[test]
fn nested_sections() {
	let root = parse(
		"# uplink settings\n\
		 name = uplink\n\
		 \n\
		 [servers]\n\
		 count = 2\n\
		 \n\
		 [servers.primary]\n\
		 port = 8080   # main port\n\
		 Bool Test = yes\n\
		 \n\
		 [servers.backup]\n\
		 port = 8081\n\
		 note =\n",
	);

	assert_eq!(root.get("name").unwrap(), "uplink");
	let servers = root.section("servers").unwrap();
	assert_eq!(servers.get_as::<u32>("count").unwrap(), 2);
	let names: Vec<&str> = servers.sections().map(ConfigNode::name).collect();
	assert_eq!(names, ["primary", "backup"]);

	let primary = root.section_path("servers.primary").unwrap();
	assert_eq!(primary.get_as::<u16>("port").unwrap(), 8080);
	assert!(primary.get_as::<bool>("Bool Test").unwrap());
	assert_eq!(root.lookup("servers.backup.note").unwrap(), "");
	assert_eq!(root.lookup("servers.backup.port").unwrap(), "8081");
}

#[test]
fn missing_lookups_fail() {
	let root = parse("[a]\nx = 1\n");
	let err = root.section("b").unwrap_err();
	assert!(matches!(err, ConfigError::KeyNotFound { ref section, .. } if section.is_empty()));
	let err = root.lookup("a.y").unwrap_err();
	assert!(matches!(err, ConfigError::KeyNotFound { ref section, ref key } if section == "a" && key == "y"));
	assert_eq!(root.section("a").unwrap().get_or("y", "fallback"), "fallback");
}

#[test]
fn duplicate_key_in_one_section() {
	let err = ConfigParser::new().parse_str("[a]\nx = 1\ny = 2\nx = 3\n").unwrap_err();
	match err {
		ConfigError::DuplicateKey { line, section, key, .. } => {
			assert_eq!((line, section.as_str(), key.as_str()), (4, "a", "x"));
		}
		other => panic!("unexpected {other:?}"),
	}

	// The same key in different sections is fine.
	let root = parse("x = 1\n[a]\nx = 2\n[b]\nx = 3\n");
	assert_eq!(root.lookup("b.x").unwrap(), "3");
}

#[test]
fn includes_registered_sources() {
	let parser = ConfigParser::new()
		.with_source("limits", "bandwidth = 10 MiB\nquota = 25%\n[extra]\nflag = on\n")
		.with_source("defaults", "backlog = 50\nbandwidth = 1 KiB\n");

	let root = parser
		.parse_str(
			"[server]\n\
			 @include limits\n\
			 @include defaults\n\
			 backlog = 8\n",
		)
		.unwrap();

	let server = root.section("server").unwrap();
	// Local names shadow included ones; the first include wins otherwise.
	assert_eq!(server.get_as::<u32>("backlog").unwrap(), 8);
	assert_eq!(server.get("bandwidth").unwrap(), "10 MiB");
	assert_eq!(server.section("extra").unwrap().path(), "server.extra");

	let capacity: ByteSize = server.get_as("bandwidth").unwrap();
	let quota = server.get_quota("quota", capacity).unwrap();
	assert_eq!(quota.fraction(), 0.25);
	assert_eq!(quota.allotted(), ByteSize::new(10 * 1024 * 1024 / 4));
}

#[test]
fn local_section_shadows_included_section() {
	let parser = ConfigParser::new().with_source("base", "[db]\nhost = db.internal\nport = 5432\n");
	let root = parser.parse_str("@include base\n[db]\nhost = localhost\n").unwrap();

	let db = root.section("db").unwrap();
	assert_eq!(db.get("host").unwrap(), "localhost");
	assert!(!db.contains_key("port"));
}

#[test]
fn missing_include_fails() {
	let err = ConfigParser::new().parse_str("@include nowhere\n").unwrap_err();
	assert!(matches!(err, ConfigError::Include { ref name, .. } if name == "nowhere"));
}

#[test]
fn include_cycle_fails() {
	let parser = ConfigParser::new()
		.with_source("a", "x = 1\n@include b\n")
		.with_source("b", "y = 2\n@include a\n");
	let err = parser.parse_source("a").unwrap_err();
	match err {
		ConfigError::Include { reason, .. } => assert!(reason.contains("cycle"), "{reason}"),
		other => panic!("unexpected {other:?}"),
	}

	let err = ConfigParser::new()
		.with_source("self", "@include self\n")
		.parse_str("@include self\n")
		.unwrap_err();
	assert!(matches!(err, ConfigError::Include { .. }));
}

#[test]
fn files_include_siblings() {
	let dir = TempDir::new("files");
	dir.write("common.conf", "read chunk = 4 KiB\n[tls]\nenabled = no\n");
	let main = dir.write("main.conf", "[client]\n@include common.conf\nconnect = 127.0.0.1:9000\n");

	let root = ConfigParser::new().parse_file(&main).unwrap();
	let client = root.section("client").unwrap();
	assert_eq!(client.get_as::<ByteSize>("read chunk").unwrap(), ByteSize::new(4096));
	assert!(!client.section("tls").unwrap().get_as::<bool>("enabled").unwrap());
	assert_eq!(client.get("connect").unwrap(), "127.0.0.1:9000");
}

#[test]
fn file_cycle_fails() {
	let dir = TempDir::new("cycle");
	dir.write("b.conf", "@include a.conf\n");
	let a = dir.write("a.conf", "@include b.conf\n");

	let err = ConfigParser::new().parse_file(&a).unwrap_err();
	assert!(matches!(err, ConfigError::Include { ref reason, .. } if reason.contains("cycle")));
}

#[test]
fn search_dir_resolves_string_includes() {
	let dir = TempDir::new("search");
	dir.write("shared.conf", "timeout = 30\n");

	let root = ConfigParser::new()
		.search_dir(&dir.0)
		.parse_str("@include shared.conf\n")
		.unwrap();
	assert_eq!(root.get_as::<u32>("timeout").unwrap(), 30);
}

#[test]
fn unreadable_file_is_io_error() {
	let dir = TempDir::new("missing");
	let err = ConfigParser::new().parse_file(dir.0.join("absent.conf")).unwrap_err();
	assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn quota_fallbacks() {
	let root = parse("good = 50%\nbad = 120%\n");
	let capacity = ByteSize::new(1000);
	let fallback = Quota::unlimited(capacity);

	assert_eq!(root.get_quota_or("good", capacity, fallback.clone()).fraction(), 0.5);
	assert_eq!(root.get_quota_or("bad", capacity, fallback.clone()).fraction(), 1.0);
	assert_eq!(root.get_quota_or("absent", capacity, fallback).fraction(), 1.0);
	assert!(matches!(root.get_quota("bad", capacity), Err(ConfigError::Quota { .. })));
}

#[test]
fn dump_parses_back() {
	let text = "name = uplink\n[servers]\ncount = 2\n[servers.primary]\nport = 8080\n";
	let root = parse(text);
	assert_eq!(parse(&root.to_string()), root);
}

proptest! {
	#[test]
	fn entries_keep_declaration_order(
		values in proptest::collection::vec("[a-z0-9 ]{0,12}", 1..16),
	) {
		let text: String = values
			.iter()
			.enumerate()
			.map(|(i, value)| format!("key{} = {}\n", i, value))
			.collect();
		let root = parse(&text);

		let entries: Vec<(&str, &str)> = root.entries().collect();
		prop_assert_eq!(entries.len(), values.len());
		for (i, ((key, value), expected)) in entries.iter().zip(&values).enumerate() {
			prop_assert_eq!(key.to_string(), format!("key{}", i));
			prop_assert_eq!(*value, expected.trim());
		}
	}

	#[test]
	fn garbage_never_panics(text in "[a-z=\\[\\]@#. \n]{0,64}") {
		let _ = ConfigParser::new().parse_str(&text);
	}
}
