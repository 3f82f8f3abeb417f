use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pacewire::{
	ByteSize, Cause, ConfigParser, Endpoint, Family, Job, Kind, Quota, SendOptions, SendReport,
	Shutdown, SocketBase, SocketConfig, SocketError, Stage, State, ThreadSpawner,
};

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

fn temp_path(tag: &str) -> PathBuf {
	static NEXT: AtomicUsize = AtomicUsize::new(0);
	let n = NEXT.fetch_add(1, Ordering::Relaxed);
	std::env::temp_dir().join(format!("pacewire-{}-{}-{}.sock", tag, std::process::id(), n))
}

fn unix_endpoint(tag: &str) -> Endpoint {
	Endpoint::parse(&format!("unix:{}", temp_path(tag).display())).unwrap()
}

/// Listener, client and the accepted side of one connection.
fn connected(family: Family, endpoint: &Endpoint) -> (SocketBase, SocketBase, SocketBase) {
	let mut listener = SocketBase::new(family, Kind::Stream).unwrap();
	listener.set_reuse_addr(true).unwrap();
	listener.bind(endpoint).unwrap();
	listener.listen(pacewire::DEFAULT_BACKLOG).unwrap();

	let target = listener.local_endpoint().cloned().unwrap();
	let mut client = SocketBase::new(family, Kind::Stream).unwrap();
	client.connect(&target).unwrap();
	let conn = listener.accept().unwrap();
	(listener, client, conn)
}

fn unix_pair(tag: &str) -> (SocketBase, SocketBase, SocketBase) {
	connected(Family::Unix, &unix_endpoint(tag))
}

#[test]
fn send_before_connect_is_invalid_state() {
	init_tracing();
	let socket = SocketBase::new(Family::Unix, Kind::Stream).unwrap();

	let err = socket.send_data_sync("hello", &SendOptions::new()).unwrap_err();
	assert_eq!(err.stage(), Stage::Write);
	assert_eq!(err.cause(), &Cause::InvalidState { state: State::Created });

	// The async path reports the same error through the handle.
	let handle = socket.send_data_async("hello", &SendOptions::new(), &ThreadSpawner);
	assert!(handle.is_complete());
	assert_eq!(handle.wait().unwrap_err(), err);
}

#[test]
fn tcp_lifecycle() {
	init_tracing();
	let (mut listener, mut client, mut conn) = connected(Family::Ipv4, &Endpoint::parse("127.0.0.1:0").unwrap());
	assert_eq!(listener.state(), State::Listening);
	assert_eq!(client.state(), State::Connected);
	assert_eq!(conn.state(), State::Connected);
	assert_eq!(conn.peer_endpoint(), client.local_endpoint());

	let report = client.send_data("hello over tcp", &SendOptions::new()).unwrap();
	assert_eq!(report.payload_bytes, 14);
	client.shutdown(Shutdown::Write).unwrap();
	assert_eq!(client.state(), State::Shutdown(Shutdown::Write));

	// Write side is gone, read side still open.
	let err = client.send_data_sync("more", &SendOptions::new()).unwrap_err();
	assert!(err.is_invalid_state());
	assert_eq!(conn.receive_to_end().unwrap(), "hello over tcp");

	conn.send_data_sync("reply", &SendOptions::new()).unwrap();
	conn.shutdown(Shutdown::Both).unwrap();
	assert_eq!(client.receive_to_end().unwrap(), "reply");

	let err = client.shutdown(Shutdown::Read).unwrap_err();
	assert_eq!(err.stage(), Stage::Shutdown);

	for socket in [&mut client, &mut conn, &mut listener] {
		socket.close().unwrap();
		assert_eq!(socket.state(), State::Closed);
		assert!(socket.close().unwrap_err().is_invalid_state());
	}
	let err = client.receive_data().unwrap_err();
	assert_eq!(err.cause(), &Cause::InvalidState { state: State::Closed });

	let closed = SocketError::Write { cause: Cause::InvalidState { state: State::Closed } };
	assert_eq!(client.send_data_sync("late", &SendOptions::new()).unwrap_err(), closed);
	let handle = client.send_data_async("late", &SendOptions::new(), &ThreadSpawner);
	assert_eq!(handle.wait().unwrap_err(), closed);
}

#[test]
fn connect_refused() {
	init_tracing();
	// Bind without listening so the port is ours but refuses connections.
	let mut holder = SocketBase::new(Family::Ipv4, Kind::Stream).unwrap();
	holder.bind(&Endpoint::parse("127.0.0.1:0").unwrap()).unwrap();
	let target = holder.local_endpoint().cloned().unwrap();

	let mut client = SocketBase::new(Family::Ipv4, Kind::Stream).unwrap();
	let err = client.connect(&target).unwrap_err();
	assert_eq!(err.stage(), Stage::Connect);
	assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
	assert_eq!(client.state(), State::Created);
}

#[test]
fn async_records_complete_once() {
	init_tracing();
	let (_listener, mut client, conn) = unix_pair("records");

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	let handle = client.send_data_async_with(
		vec!["alpha", "beta", "gamma"],
		&SendOptions::new(),
		&ThreadSpawner,
		move |result| sink.lock().push(result),
	);
	let report = handle.wait().unwrap();
	assert_eq!(report.payload_bytes, 14);
	assert_eq!(report.wire_bytes, 16);
	assert_eq!(*seen.lock(), vec![handle.wait()]);

	client.shutdown(Shutdown::Write).unwrap();
	let wire = conn.receive_to_end().unwrap();
	let records: Vec<&[u8]> = wire.split(|&b| b == pacewire::RECORD_SEPARATOR).collect();
	assert_eq!(records, [&b"alpha"[..], b"beta", b"gamma"]);
}

#[test]
fn ack_handshake() {
	init_tracing();
	let (_listener, mut client, mut conn) = unix_pair("ack");
	client.set_acknowledge(true);
	conn.set_acknowledge(true);

	let server = std::thread::spawn(move || {
		let first = conn.receive_records().unwrap();
		let second = conn.receive_data().unwrap();
		(first, second)
	});

	client.send_data_sync(vec!["one", "two"], &SendOptions::new()).unwrap();
	client.send_data_sync("three", &SendOptions::new()).unwrap();

	let (first, second) = server.join().unwrap();
	assert_eq!(first, vec![pacewire::Bytes::from("one"), pacewire::Bytes::from("two")]);
	assert_eq!(second, "three");
}

#[test]
fn ack_mismatch_is_reported() {
	init_tracing();
	let (_listener, mut client, conn) = unix_pair("nak");
	client.set_acknowledge(true);

	// The peer answers with something other than ACK.
	let server = std::thread::spawn(move || {
		let data = conn.receive_data().unwrap();
		conn.send_data_sync(&[0x15u8][..], &SendOptions::new()).unwrap();
		data
	});

	let err = client.send_data_sync("ping", &SendOptions::new()).unwrap_err();
	assert_eq!(err.cause(), &Cause::AckMismatch { got: 0x15 });
	assert_eq!(server.join().unwrap(), "ping");
}

#[test]
fn passes_descriptor() {
	init_tracing();
	let (_listener, mut client, conn) = unix_pair("fd");

	let path = temp_path("passed-file");
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(true)
		.open(&path)
		.unwrap();

	let options = SendOptions::new().pass_fd(file.as_fd());
	client.send_data_sync("take this", &options).unwrap();

	let (data, passed) = conn.receive_with_fd().unwrap();
	assert_eq!(data, "take this");
	std::fs::File::from(passed).write_all(b"written through the passed fd").unwrap();

	let mut contents = String::new();
	file.seek(SeekFrom::Start(0)).unwrap();
	file.read_to_string(&mut contents).unwrap();
	assert_eq!(contents, "written through the passed fd");
	std::fs::remove_file(&path).unwrap();

	// Plain data carries no descriptor.
	client.send_data_sync("no fd", &SendOptions::new()).unwrap();
	let err = conn.receive_with_fd().unwrap_err();
	assert_eq!(err.cause(), &Cause::MissingDescriptor);
	client.close().unwrap();
}

#[test]
fn close_cancels_pending_sends() {
	init_tracing();
	let (_listener, mut client, _conn) = unix_pair("cancel");

	// A spawner that never runs what it is given.
	let parked: Mutex<Vec<Job>> = Mutex::new(Vec::new());
	let spawner = |job: Job| parked.lock().push(job);

	let called = Arc::new(AtomicUsize::new(0));
	let counter = called.clone();
	let first = client.send_data_async("never sent", &SendOptions::new(), &spawner);
	let second = client.send_data_async_with("nor this", &SendOptions::new(), &spawner, move |result| {
		assert!(result.is_err());
		counter.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(client.pending_sends(), 2);
	assert!(!first.is_complete());

	client.close().unwrap();
	for handle in [&first, &second] {
		let err = handle.wait_timeout(Duration::from_secs(1)).unwrap().unwrap_err();
		assert_eq!(err, SocketError::Write { cause: Cause::Cancelled });
	}
	assert_eq!(called.load(Ordering::SeqCst), 1);

	// Running the parked jobs afterwards changes nothing.
	for job in parked.lock().drain(..) {
		job.run();
	}
	assert_eq!(called.load(Ordering::SeqCst), 1);
	assert_eq!(first.try_result().unwrap().unwrap_err().cause(), &Cause::Cancelled);
}

/// Device and inode behind `fd`, or `None` once it is closed.
fn identity(fd: RawFd) -> Option<(libc::dev_t, libc::ino_t)> {
	let mut stat: libc::stat = unsafe { std::mem::zeroed() };
	match unsafe { libc::fstat(fd, &mut stat) } {
		0 => Some((stat.st_dev, stat.st_ino)),
		_ => None,
	}
}

#[test]
fn close_wakes_blocked_sender() {
	init_tracing();
	// The accepted side never reads, so a large send fills the buffers and blocks.
	let (_listener, mut client, _conn) = unix_pair("blocked");
	let raw = client.as_raw_fd().unwrap();
	let before = identity(raw).unwrap();

	let handle = client.send_data_async(vec![0u8; 8 << 20], &SendOptions::new(), &ThreadSpawner);
	std::thread::sleep(Duration::from_millis(100));
	assert!(!handle.is_complete());

	client.close().unwrap();
	let err = handle.wait_timeout(Duration::from_secs(5)).expect("send still blocked").unwrap_err();
	assert_eq!(err.stage(), Stage::Write);

	// The worker lets go of the descriptor once its send is woken.
	let deadline = Instant::now() + Duration::from_secs(2);
	while identity(raw) == Some(before) {
		assert!(Instant::now() < deadline, "descriptor still open");
		std::thread::sleep(Duration::from_millis(10));
	}
}

#[test]
fn dropped_job_resolves_as_cancelled() {
	init_tracing();
	let (_listener, client, _conn) = unix_pair("drop-job");
	let handle = client.send_data_async("lost", &SendOptions::new(), &|job: Job| drop(job));
	assert_eq!(handle.wait().unwrap_err().cause(), &Cause::Cancelled);
}

#[test]
fn quota_paces_sends() {
	init_tracing();
	let (_listener, mut client, conn) = unix_pair("pace");
	// 1000 B/s with a 100 byte burst.
	let quota = Arc::new(Quota::new(ByteSize::new(1000), 1.0).unwrap());
	client.set_quota(Some(quota.clone()));

	let start = Instant::now();
	let report: SendReport = client.send_data_sync(vec![b'x'; 600], &SendOptions::new()).unwrap();
	let elapsed = start.elapsed();
	assert!(elapsed >= Duration::from_millis(400), "took {:?}", elapsed);
	assert!(report.chunks >= 6, "{:?}", report);

	client.shutdown(Shutdown::Write).unwrap();
	assert_eq!(conn.receive_to_end().unwrap().len(), 600);
	assert_eq!(Arc::strong_count(&quota), 2);
}

#[test]
fn zero_quota_fails_instead_of_hanging() {
	init_tracing();
	let (_listener, mut client, _conn) = unix_pair("zero");
	client.set_quota(Some(Arc::new(Quota::new(ByteSize::new(1000), 0.0).unwrap())));
	let err = client.send_data_sync("anything", &SendOptions::new()).unwrap_err();
	assert_eq!(err, SocketError::Write { cause: Cause::QuotaExhausted });
}

#[test]
fn accepted_socket_inherits_settings() {
	init_tracing();
	let endpoint = unix_endpoint("inherit");
	let mut listener = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
	let quota = Arc::new(Quota::unlimited(ByteSize::new(1 << 20)));
	listener.set_quota(Some(quota.clone()));
	listener.set_acknowledge(true);
	listener.set_read_chunk(16);
	listener.bind(&endpoint).unwrap();
	listener.listen(4).unwrap();

	let mut client = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
	client.connect(&endpoint).unwrap();
	let conn = listener.accept().unwrap();
	assert!(Arc::ptr_eq(conn.quota().unwrap(), &quota));
	assert!(conn.acknowledge());
	assert_eq!(conn.read_chunk(), 16);
	assert_eq!(listener.state(), State::Listening);
}

#[test]
fn unix_path_removed_on_close() {
	init_tracing();
	let path = temp_path("unlink");
	let endpoint = Endpoint::parse(&format!("unix:{}", path.display())).unwrap();
	{
		let mut listener = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
		listener.bind(&endpoint).unwrap();
		assert!(path.exists());
		listener.close().unwrap();
		assert!(!path.exists());
	}
	{
		// Dropping closes too.
		let mut listener = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
		listener.bind(&endpoint).unwrap();
		assert!(path.exists());
	}
	assert!(!path.exists());
}

#[test]
fn bind_errors() {
	init_tracing();
	let endpoint = unix_endpoint("in-use");
	let mut first = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
	first.bind(&endpoint).unwrap();

	let mut second = SocketBase::new(Family::Unix, Kind::Stream).unwrap();
	let err = second.bind(&endpoint).unwrap_err();
	assert_eq!(err.stage(), Stage::Bind);
	assert_eq!(err.errno(), Some(libc::EADDRINUSE));
	assert_eq!(second.state(), State::Created);

	let err = first.bind(&endpoint).unwrap_err();
	assert_eq!(err.cause(), &Cause::InvalidState { state: State::Bound });

	let mut v6 = SocketBase::new(Family::Ipv6, Kind::Stream).unwrap();
	let err = v6.bind(&endpoint).unwrap_err();
	assert_eq!(err.cause(), &Cause::FamilyMismatch);

	let io: std::io::Error = SocketError::Bind { addr: endpoint.to_string(), cause: Cause::Os { errno: libc::EADDRINUSE } }.into();
	assert_eq!(io.kind(), std::io::ErrorKind::AddrInUse);
}

/// Two Unix datagram sockets connected to each other.
fn datagram_pair(tag: &str) -> (SocketBase, SocketBase) {
	let (a_end, b_end) = (unix_endpoint(&format!("{tag}-a")), unix_endpoint(&format!("{tag}-b")));
	let mut a = SocketBase::new(Family::Unix, Kind::Datagram).unwrap();
	let mut b = SocketBase::new(Family::Unix, Kind::Datagram).unwrap();
	a.bind(&a_end).unwrap();
	b.bind(&b_end).unwrap();
	a.connect(&b_end).unwrap();
	b.connect(&a_end).unwrap();
	(a, b)
}

#[test]
fn connected_datagrams() {
	init_tracing();
	let (mut a, b) = datagram_pair("dgram");

	a.send_data_sync("datagram", &SendOptions::new()).unwrap();
	assert_eq!(b.receive_data().unwrap(), "datagram");

	let err = a.listen(1).unwrap_err();
	assert!(err.is_invalid_state());
}

#[test]
fn sockets_from_configuration() {
	init_tracing();
	let path = temp_path("config");
	let text = format!(
		"[server]\n\
		 bind = unix:{path}\n\
		 backlog = 4\n\
		 read chunk = 512 B\n\
		 acknowledge = on\n\
		 \n\
		 [client]\n\
		 connect = unix:{path}\n\
		 acknowledge = yes\n\
		 bandwidth = 1 MiB\n\
		 quota = 50%\n",
		path = path.display()
	);
	let root = ConfigParser::new().parse_str(&text).unwrap();

	let server_config = SocketConfig::from_node(root.section("server").unwrap()).unwrap();
	let listener = server_config.listen().unwrap();
	assert_eq!(listener.state(), State::Listening);

	let client_config = SocketConfig::from_node(root.section("client").unwrap()).unwrap();
	let client = client_config.connect().unwrap();
	assert_eq!(client.quota().unwrap().rate(), 512.0 * 1024.0);

	let conn = listener.accept().unwrap();
	let server = std::thread::spawn(move || conn.receive_data().unwrap());
	client.send_data_sync("configured", &SendOptions::new()).unwrap();
	assert_eq!(server.join().unwrap(), "configured");
}

#[test]
fn datagrams_are_received_whole() {
	init_tracing();
	let (a, b) = datagram_pair("whole");
	// Larger than the default read chunk.
	a.send_data_sync(vec![b'x'; 2000], &SendOptions::new()).unwrap();
	a.send_data_sync("second", &SendOptions::new()).unwrap();
	a.send_data_sync("", &SendOptions::new()).unwrap();

	let first = b.receive_data().unwrap();
	assert_eq!(first.len(), 2000);
	assert!(first.iter().all(|&x| x == b'x'));
	assert_eq!(b.receive_data().unwrap(), "second");
	assert!(b.receive_to_end().unwrap().is_empty());
}

#[test]
fn paced_datagram_is_one_send() {
	init_tracing();
	let (mut a, b) = datagram_pair("paced");
	// 1000 B/s with a 100 byte burst; 300 bytes go out at once on credit.
	a.set_quota(Some(Arc::new(Quota::new(ByteSize::new(1000), 1.0).unwrap())));

	let start = Instant::now();
	let report = a.send_data_sync(vec![b'y'; 300], &SendOptions::new()).unwrap();
	assert_eq!(report, SendReport { payload_bytes: 300, wire_bytes: 300, chunks: 1 });
	assert!(start.elapsed() >= Duration::from_millis(150), "took {:?}", start.elapsed());
	assert_eq!(b.receive_data().unwrap().len(), 300);
}

#[test]
fn host_name_resolved_on_connect() {
	init_tracing();
	let mut listener = SocketBase::new(Family::Ipv4, Kind::Stream).unwrap();
	listener.bind(&Endpoint::parse("127.0.0.1:0").unwrap()).unwrap();
	listener.listen(1).unwrap();
	let port = listener.local_endpoint().and_then(Endpoint::port).unwrap();

	let target = Endpoint::parse(&format!("localhost:{port}")).unwrap();
	assert_eq!(target.family(), None);
	let mut client = SocketBase::new(Family::Ipv4, Kind::Stream).unwrap();
	client.connect(&target).unwrap();
	assert_eq!(client.peer_endpoint(), listener.local_endpoint());
	listener.accept().unwrap();
}
