use pmsense_core::poll::{PollCycle, PollState};
use pmsense_core::protocol::{
    encode, lookup, CommandName, Connection, ConnectionState, FrameReader, ModeState,
    ParsedReading, ProtocolError, SerialTransport, CATALOG, COMMAND_FRAME_LEN, DATA_REPORT_ID,
    REPLY_ID, TAIL,
};
use pmsense_core::config::SensorConfig;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Mock serial port for testing
///
/// Bytes in `rx` are readable immediately. Each write releases the next
/// queued reply into `rx`, the way a sensor answers a command.
struct MockSerial {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
    timeout: Arc<Mutex<Option<Duration>>>,
    fail_on_send: bool,
    fail_on_read: bool,
    fail_on_clear: bool,
}

impl MockSerial {
    fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            replies: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            timeout: Arc::new(Mutex::new(None)),
            fail_on_send: false,
            fail_on_read: false,
            fail_on_clear: false,
        }
    }

    fn with_stream(bytes: &[u8]) -> Self {
        let mut mock = Self::new();
        mock.rx.extend(bytes);
        mock
    }

    fn with_replies(replies: Vec<Vec<u8>>) -> Self {
        let mut mock = Self::new();
        mock.replies = replies.into();
        mock
    }

    fn sent_log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.sent)
    }

    fn timeout_log(&self) -> Arc<Mutex<Option<Duration>>> {
        Arc::clone(&self.timeout)
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_on_read {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        self.sent.lock().unwrap().extend_from_slice(buf);
        if let Some(reply) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialTransport for MockSerial {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        if self.fail_on_read {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        Ok(self.rx.len() as u32)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        if self.fail_on_clear {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        self.rx.clear();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        *self.timeout.lock().unwrap() = Some(timeout);
        Ok(())
    }
}

fn fast_config() -> SensorConfig {
    let mut config = SensorConfig::for_port("mock");
    config.settle_ms = 0;
    config.response_timeout_ms = 200;
    config.data_timeout_ms = 200;
    config.byte_poll_interval_ms = 1;
    config.open_delay_ms = 0;
    config
}

fn data_frame(pm2_5: i16, pm10: i16) -> Vec<u8> {
    let [a, b] = pm2_5.to_le_bytes();
    let [c, d] = pm10.to_le_bytes();
    vec![0xAA, DATA_REPORT_ID, a, b, c, d, 0x01, 0x02, 0x00, TAIL]
}

fn mode_frame(flag: u8) -> Vec<u8> {
    vec![0xAA, REPLY_ID, 0x02, 0x01, flag, 0x00, 0xFF, 0xFF, 0x00, TAIL]
}

#[test]
fn test_encode_every_catalog_command() {
    for cmd in CATALOG.iter() {
        let frame = encode(cmd);
        assert_eq!(frame.len(), COMMAND_FRAME_LEN);
        assert_eq!(&frame.as_bytes()[..5], &cmd.header);
        assert_eq!(frame.as_bytes()[18], TAIL);
    }
}

#[test]
fn test_unknown_command_is_fatal() {
    let err = lookup("reboot").unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownCommand(_)));
    assert!(err.is_fatal());
    assert!(!ProtocolError::TransportWrite("x".into()).is_fatal());
}

#[test]
fn test_collect_times_out_no_earlier_than_deadline() {
    let mut mock = MockSerial::new();
    let reader = FrameReader::new(Duration::from_millis(5));
    let deadline = Duration::from_millis(150);

    let start = Instant::now();
    let frame = reader.collect(&mut mock, DATA_REPORT_ID, deadline, 10).unwrap();
    assert!(start.elapsed() >= deadline);
    assert!(frame.is_empty());
}

#[test]
fn test_collect_returns_partial_frame_at_deadline() {
    let mut mock = MockSerial::with_stream(&[0xAA, DATA_REPORT_ID, 0x10, 0x00]);
    let reader = FrameReader::new(Duration::from_millis(5));
    let deadline = Duration::from_millis(100);

    let start = Instant::now();
    let frame = reader.collect(&mut mock, DATA_REPORT_ID, deadline, 10).unwrap();
    assert!(start.elapsed() >= deadline);
    assert_eq!(frame, vec![0xAA, DATA_REPORT_ID, 0x10, 0x00]);
}

#[test]
fn test_collect_resynchronizes_on_noise() {
    let valid = data_frame(150, 800);
    let mut stream = vec![0x00, 0xAA, REPLY_ID];
    stream.extend_from_slice(&[0x02, 0x01, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0xAB, 0x33]);
    stream.extend_from_slice(&valid);

    let mut mock = MockSerial::with_stream(&stream);
    let reader = FrameReader::new(Duration::from_millis(1));
    let frame = reader
        .collect(&mut mock, DATA_REPORT_ID, Duration::from_secs(2), 10)
        .unwrap();
    assert_eq!(frame, valid);
}

#[test]
fn test_collect_leaves_following_frame_queued() {
    let first = data_frame(10, 20);
    let second = data_frame(30, 40);
    let mut stream = first.clone();
    stream.extend_from_slice(&second);

    let mut mock = MockSerial::with_stream(&stream);
    let reader = FrameReader::new(Duration::from_millis(1));
    let deadline = Duration::from_millis(500);
    assert_eq!(reader.collect(&mut mock, DATA_REPORT_ID, deadline, 10).unwrap(), first);
    assert_eq!(reader.collect(&mut mock, DATA_REPORT_ID, deadline, 10).unwrap(), second);
}

#[test]
fn test_collect_surfaces_hard_read_errors() {
    let mut mock = MockSerial::new();
    mock.fail_on_read = true;
    let reader = FrameReader::default();
    let result = reader.collect(&mut mock, DATA_REPORT_ID, Duration::from_millis(50), 10);
    assert!(matches!(result, Err(ProtocolError::TransportRead(_))));
}

#[test]
fn test_query_data_round_trip() {
    let mock = MockSerial::with_replies(vec![data_frame(150, 800)]);
    let sent = mock.sent_log();
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let reading = conn.query_data().unwrap();
    assert_eq!(
        reading,
        Some(ParsedReading {
            pm2_5: 15.0,
            pm10: 80.0
        })
    );
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        encode(CommandName::QueryData.command()).as_bytes()
    );
    assert_eq!(conn.counters(), (19, 10, 1, 1));
}

#[test]
fn test_mode_commands() {
    let mock = MockSerial::with_replies(vec![mode_frame(1), mode_frame(0), mode_frame(9)]);
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    assert_eq!(conn.set_query_mode().unwrap(), Some(ModeState::Query));
    assert_eq!(conn.set_active_mode().unwrap(), Some(ModeState::Active));
    assert_eq!(conn.get_report_mode().unwrap(), Some(ModeState::Unknown));
}

#[test]
fn test_firmware_command() {
    let reply = vec![0xAA, REPLY_ID, 0x07, 18, 11, 16, 0xFF, 0xFF, 0x00, TAIL];
    let mock = MockSerial::with_replies(vec![reply]);
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let date = conn.check_firmware().unwrap().unwrap();
    assert_eq!(date.to_string(), "16-11-18");
}

#[test]
fn test_reply_with_wrong_id_is_not_decoded() {
    // A mode ack arriving while a data report is expected never aligns
    let mock = MockSerial::with_replies(vec![mode_frame(1)]);
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));
    assert_eq!(conn.query_data().unwrap(), None);
}

#[test]
fn test_execute_returns_raw_reply() {
    let reply = mode_frame(1);
    let mock = MockSerial::with_replies(vec![reply.clone()]);
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    assert_eq!(conn.execute(CommandName::GetReportMode).unwrap(), reply);
}

#[test]
fn test_execute_named_unknown_writes_nothing() {
    let mock = MockSerial::new();
    let sent = mock.sent_log();
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let err = conn.execute_named("set_sleep").unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownCommand(_)));
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn test_poll_cycle_states() {
    let mock = MockSerial::with_replies(vec![data_frame(1, 2)]);
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let mut cycle = PollCycle::new(CommandName::QueryData);
    assert_eq!(cycle.state(), PollState::Idle);
    assert!(cycle.run(&mut conn).unwrap().is_some());
    assert_eq!(
        cycle.history(),
        &[
            PollState::Idle,
            PollState::AwaitingSettle,
            PollState::ReadingFrame,
            PollState::Decoded
        ]
    );
}

#[test]
fn test_poll_cycle_fails_on_timeout() {
    let mock = MockSerial::new();
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let mut cycle = PollCycle::new(CommandName::GetReportMode);
    assert_eq!(cycle.run(&mut conn).unwrap(), None);
    assert_eq!(cycle.state(), PollState::Failed);
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[test]
fn test_write_failure() {
    let mut mock = MockSerial::new();
    mock.fail_on_send = true;
    let mut conn = Connection::with_transport(fast_config(), Box::new(mock));

    let mut cycle = PollCycle::new(CommandName::SetQueryMode);
    let err = cycle.run(&mut conn).unwrap_err();
    assert!(matches!(err, ProtocolError::TransportWrite(_)));
    assert_eq!(cycle.history(), &[PollState::Idle, PollState::Failed]);
    assert_eq!(conn.state(), ConnectionState::Error);
}

#[test]
fn test_closed_connection() {
    let mut conn = Connection::with_transport(fast_config(), Box::new(MockSerial::new()));
    assert!(conn.is_open());
    conn.close();
    assert!(!conn.is_open());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(matches!(conn.query_data(), Err(ProtocolError::NotConnected)));
}

#[test]
fn test_open_twice() {
    let mut conn = Connection::with_transport(fast_config(), Box::new(MockSerial::new()));
    assert!(matches!(conn.open(), Err(ProtocolError::AlreadyConnected)));
}

#[test]
fn test_open_missing_port() {
    let mut conn = Connection::new(SensorConfig::for_port("/dev/pmsense-does-not-exist"));
    let err = conn.open().unwrap_err();
    assert!(matches!(err, ProtocolError::TransportOpen { .. }));
    assert!(err.is_fatal());
    assert!(!conn.is_open());
}

#[test]
fn test_open_rejects_invalid_config() {
    let mut conn = Connection::new(SensorConfig::default());
    assert!(matches!(conn.open(), Err(ProtocolError::Config(_))));
}

#[test]
fn test_with_transport_applies_io_timeout() {
    let mock = MockSerial::new();
    let timeout = mock.timeout_log();
    let mut config = fast_config();
    config.io_timeout_ms = 250;
    let _conn = Connection::with_transport(config, Box::new(mock));
    assert_eq!(*timeout.lock().unwrap(), Some(Duration::from_millis(250)));
}

#[test]
fn test_attach_drops_stale_input() {
    let mock = MockSerial::with_stream(&[0x42, 0xAA, 0x17]);
    let timeout = mock.timeout_log();
    let mut conn = Connection::new(fast_config());
    conn.attach(Box::new(mock)).unwrap();
    assert!(conn.is_open());
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(*timeout.lock().unwrap(), Some(fast_config().io_timeout()));

    let frame = conn.collect(DATA_REPORT_ID, Duration::from_millis(20)).unwrap();
    assert!(frame.is_empty());
}

#[test]
fn test_attach_clear_failure_is_an_open_failure() {
    let mut mock = MockSerial::new();
    mock.fail_on_clear = true;
    let mut conn = Connection::new(fast_config());
    let err = conn.attach(Box::new(mock)).unwrap_err();
    assert!(matches!(err, ProtocolError::TransportOpen { .. }));
    assert!(err.is_fatal());
    assert!(!conn.is_open());
    assert_eq!(conn.state(), ConnectionState::Error);
}

#[test]
fn test_attach_twice() {
    let mut conn = Connection::with_transport(fast_config(), Box::new(MockSerial::new()));
    let err = conn.attach(Box::new(MockSerial::new())).unwrap_err();
    assert!(matches!(err, ProtocolError::AlreadyConnected));
}
