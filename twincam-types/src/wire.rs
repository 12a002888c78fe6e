//! The ASCII datagram protocol spoken on the sync port.
//!
//! No framing beyond datagram boundaries. The server matches prefixes
//! `READY`, `START`, or a bare decimal integer (the clock-probe echo);
//! anything else draws `ERR`.

/// A datagram arriving at the slave sync server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// `READY` — master asks whether the slave is armed and idle.
    Ready,
    /// `START <delay_us>` — the delay is `None` when missing or not a
    /// decimal integer, which the server answers with `NO`.
    Start(Option<i64>),
    /// A bare decimal integer: clock-probe echo carrying the sender's
    /// monotonic microseconds.
    Echo(i64),
}

impl SyncRequest {
    /// Parse one datagram. `None` means unrecognized (reply `ERR`).
    pub fn parse(datagram: &[u8]) -> Option<SyncRequest> {
        let text = std::str::from_utf8(datagram).ok()?.trim();
        if let Some(rest) = text.strip_prefix("START") {
            return Some(SyncRequest::Start(rest.trim().parse::<i64>().ok()));
        }
        if text.starts_with("READY") {
            return Some(SyncRequest::Ready);
        }
        if let Ok(us) = text.parse::<i64>() {
            return Some(SyncRequest::Echo(us));
        }
        None
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncRequest::Ready => b"READY".to_vec(),
            SyncRequest::Start(Some(delay_us)) => format!("START {delay_us}").into_bytes(),
            SyncRequest::Start(None) => b"START".to_vec(),
            SyncRequest::Echo(us) => us.to_string().into_bytes(),
        }
    }
}

/// A reply datagram from the slave sync server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReply {
    /// `OK` — armed and idle.
    Ok,
    /// `NO` — not prepared, busy, or bad `START`.
    No,
    /// `ACK` — capture launches after the requested delay.
    Ack,
    /// `ERR` — unrecognized request.
    Err,
    /// Clock-probe echo: the slave's monotonic microseconds.
    Time(i64),
}

impl SyncReply {
    pub fn parse(datagram: &[u8]) -> Option<SyncReply> {
        let text = std::str::from_utf8(datagram).ok()?.trim();
        match text {
            "OK" => Some(SyncReply::Ok),
            "NO" => Some(SyncReply::No),
            "ACK" => Some(SyncReply::Ack),
            "ERR" => Some(SyncReply::Err),
            _ => text.parse::<i64>().ok().map(SyncReply::Time),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncReply::Ok => b"OK".to_vec(),
            SyncReply::No => b"NO".to_vec(),
            SyncReply::Ack => b"ACK".to_vec(),
            SyncReply::Err => b"ERR".to_vec(),
            SyncReply::Time(us) => us.to_string().into_bytes(),
        }
    }
}

#[test]
fn parses_control_requests() {
    assert_eq!(SyncRequest::parse(b"READY"), Some(SyncRequest::Ready));
    assert_eq!(SyncRequest::parse(b"READY\n"), Some(SyncRequest::Ready));
    assert_eq!(
        SyncRequest::parse(b"START 50000"),
        Some(SyncRequest::Start(Some(50000)))
    );
    assert_eq!(
        SyncRequest::parse(b"START -3"),
        Some(SyncRequest::Start(Some(-3)))
    );
    assert_eq!(SyncRequest::parse(b"START"), Some(SyncRequest::Start(None)));
    assert_eq!(
        SyncRequest::parse(b"START x"),
        Some(SyncRequest::Start(None))
    );
}

#[test]
fn parses_echo_requests() {
    assert_eq!(
        SyncRequest::parse(b"123456789"),
        Some(SyncRequest::Echo(123456789))
    );
    assert_eq!(SyncRequest::parse(b"hello"), None);
    assert_eq!(SyncRequest::parse(&[0xff, 0xfe]), None);
}

#[test]
fn request_encode_parse_round_trip() {
    for req in [
        SyncRequest::Ready,
        SyncRequest::Start(Some(42)),
        SyncRequest::Echo(7),
    ] {
        assert_eq!(SyncRequest::parse(&req.encode()), Some(req));
    }
}

#[test]
fn parses_replies() {
    assert_eq!(SyncReply::parse(b"OK"), Some(SyncReply::Ok));
    assert_eq!(SyncReply::parse(b"NO"), Some(SyncReply::No));
    assert_eq!(SyncReply::parse(b"ACK"), Some(SyncReply::Ack));
    assert_eq!(SyncReply::parse(b"ERR"), Some(SyncReply::Err));
    assert_eq!(SyncReply::parse(b"99"), Some(SyncReply::Time(99)));
    assert_eq!(SyncReply::parse(b"nope"), None);
}
