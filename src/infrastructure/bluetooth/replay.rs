//! Capture replay
//!
//! Plays back a recorded ring session. One event per line:
//!
//! ```text
//! # comment
//! <millis> connect
//! <millis> ctrl ff
//! <millis> data 0007a1ff...
//! <millis> disconnect
//! ```
//!
//! `<millis>` is the offset from the start of the capture. Hex payloads may
//! use `:` separators as tshark prints them.

use super::{CommandSink, PacketSource};
use crate::domain::models::LinkEvent;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureKind {
    Connect,
    Disconnect,
    Data(Vec<u8>),
    Control(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub offset: Duration,
    pub kind: CaptureKind,
}

fn parse_payload(field: Option<&str>) -> Result<Vec<u8>> {
    let field = field.context("missing hex payload")?;
    let clean = field.replace(':', "");
    hex::decode(&clean).with_context(|| format!("invalid hex payload {:?}", field))
}

fn parse_line(line: &str) -> Result<CaptureRecord> {
    let mut fields = line.split_whitespace();
    let millis: u64 = fields
        .next()
        .context("missing timestamp")?
        .parse()
        .context("invalid timestamp")?;
    let kind = match fields.next().context("missing event kind")? {
        "connect" => CaptureKind::Connect,
        "disconnect" => CaptureKind::Disconnect,
        "data" => CaptureKind::Data(parse_payload(fields.next())?),
        "ctrl" => CaptureKind::Control(parse_payload(fields.next())?),
        other => bail!("unknown event kind {:?}", other),
    };
    if let Some(extra) = fields.next() {
        bail!("unexpected trailing field {:?}", extra);
    }
    Ok(CaptureRecord {
        offset: Duration::from_millis(millis),
        kind,
    })
}

pub fn parse_capture(text: &str) -> Result<Vec<CaptureRecord>> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| parse_line(line).with_context(|| format!("line {}", number)))
        .collect()
}

pub struct ReplaySource {
    records: Vec<CaptureRecord>,
    realtime: bool,
}

impl ReplaySource {
    pub fn new(records: Vec<CaptureRecord>, realtime: bool) -> Self {
        Self { records, realtime }
    }

    pub fn from_path(path: &Path, realtime: bool) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read capture {}", path.display()))?;
        let records = parse_capture(&text)
            .with_context(|| format!("Failed to parse capture {}", path.display()))?;
        info!("Loaded {} capture records from {}", records.len(), path.display());
        Ok(Self::new(records, realtime))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Longest single sleep while pacing, bounds how late a closed receiver is noticed
const PACING_SLICE: Duration = Duration::from_millis(50);

/// Sleep until `due`, returning `false` early once the receiver is gone
fn wait_until(due: Instant, events: &mpsc::UnboundedSender<LinkEvent>) -> bool {
    loop {
        if events.is_closed() {
            return false;
        }
        let now = Instant::now();
        if now >= due {
            return true;
        }
        std::thread::sleep((due - now).min(PACING_SLICE));
    }
}

impl PacketSource for ReplaySource {
    fn pump(&mut self, events: &mpsc::UnboundedSender<LinkEvent>) -> Result<()> {
        let start = Instant::now();

        for record in self.records.drain(..) {
            let due = start + record.offset;
            if self.realtime && !wait_until(due, events) {
                debug!("Event receiver closed, stopping replay");
                break;
            }

            let event = match record.kind {
                CaptureKind::Connect => LinkEvent::Connected,
                CaptureKind::Disconnect => LinkEvent::Disconnected,
                CaptureKind::Data(payload) => LinkEvent::Data {
                    payload,
                    received_at: due,
                },
                CaptureKind::Control(payload) => LinkEvent::Control(payload),
            };

            if events.send(event).is_err() {
                debug!("Event receiver closed, stopping replay");
                break;
            }
        }

        Ok(())
    }
}

/// Command sink for replayed sessions, where there is no device to write to
#[derive(Debug, Default)]
pub struct ReplayCommandSink {
    written: usize,
}

impl ReplayCommandSink {
    pub fn written(&self) -> usize {
        self.written
    }
}

impl CommandSink for ReplayCommandSink {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        self.written += 1;
        info!("Replay: command {} not sent to device", hex::encode(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &str = "\
# ring session
0 connect
5 ctrl ff
20 data 00:05:00:00:00:00:00:00:00:00:00:00:00:00:aa:bb

40 data 0004000000000000000000000000
60 disconnect
";

    #[test]
    fn test_parse_capture() {
        let records = parse_capture(CAPTURE).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].kind, CaptureKind::Connect);
        assert_eq!(records[1].kind, CaptureKind::Control(vec![0xFF]));
        assert_eq!(records[2].offset, Duration::from_millis(20));
        match &records[2].kind {
            CaptureKind::Data(bytes) => {
                assert_eq!(bytes.len(), 16);
                assert_eq!(&bytes[14..], &[0xAA, 0xBB]);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(records[4].kind, CaptureKind::Disconnect);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = parse_capture("0 connect\n10 data zz\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));

        assert!(parse_capture("abc connect").is_err());
        assert!(parse_capture("10 beep").is_err());
        assert!(parse_capture("10 data").is_err());
        assert!(parse_capture("10 connect extra").is_err());
    }

    #[test]
    fn test_pump_delivers_events_in_order() {
        let records = parse_capture(CAPTURE).unwrap();
        let mut source = ReplaySource::new(records, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.pump(&tx).unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], LinkEvent::Connected));
        assert!(matches!(events[1], LinkEvent::Control(ref b) if b == &[0xFF]));

        let (first, second) = match (&events[2], &events[3]) {
            (
                LinkEvent::Data { received_at: a, .. },
                LinkEvent::Data { received_at: b, .. },
            ) => (*a, *b),
            _ => panic!("expected data events"),
        };
        assert_eq!(second - first, Duration::from_millis(20));
        assert!(matches!(events[4], LinkEvent::Disconnected));
    }

    #[test]
    fn test_pump_stops_when_receiver_dropped() {
        let records = parse_capture(CAPTURE).unwrap();
        let mut source = ReplaySource::new(records, false);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(source.pump(&tx).is_ok());
    }

    #[test]
    fn test_realtime_pump_stops_promptly_when_receiver_dropped() {
        let records = parse_capture("0 connect\n600000 disconnect\n").unwrap();
        let mut source = ReplaySource::new(records, true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let pump = std::thread::spawn(move || source.pump(&tx));
        assert!(matches!(rx.blocking_recv(), Some(LinkEvent::Connected)));
        drop(rx);

        pump.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_until_past_deadline_returns_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(wait_until(Instant::now(), &tx));
    }

    #[test]
    fn test_replay_command_sink_counts() {
        let mut sink = ReplayCommandSink::default();
        sink.write_command(&[0xB1]).unwrap();
        assert_eq!(sink.written(), 1);
    }
}
