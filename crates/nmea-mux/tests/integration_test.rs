//! Integration tests for the multiplexer.
//!
//! These tests run real source tasks, and real TCP sockets where a transport
//! is involved, and observe what reaches the forwarders.

use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nmea_core::CacheKey;
use nmea_mux::{
    ChannelSource, DataCache, DerivedComputer, FileSource, Multiplexer, MuxError, SentenceFilter,
    Sink, SinkError, TcpServerSink, TcpSource,
};
use nmea_protocol::{checksum, validate, TalkerId};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

fn nmea(body: &str) -> String {
    format!("${}*{:02X}", body, checksum(body))
}

/// Forwarder keeping every frame in memory.
#[derive(Default)]
struct Capture {
    name: &'static str,
    frames: Mutex<Vec<String>>,
}

impl Capture {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl Sink for Capture {
    fn descriptor(&self) -> Value {
        json!({ "type": "capture", "name": self.name })
    }

    fn write(&self, frame: &[u8]) -> Result<(), SinkError> {
        self.frames
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(frame).trim_end().to_string());
        Ok(())
    }
}

/// Poll `condition` until it holds or five seconds elapse.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met in time");
}

fn derived(cache: &DataCache) -> Arc<DerivedComputer> {
    Arc::new(
        DerivedComputer::new(
            TalkerId::try_from("OS").unwrap(),
            cache.clone(),
            &[Duration::from_secs(600), Duration::from_secs(3_600)],
            0.5,
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_true_wind_through_channel() {
    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_computer(derived(mux.cache())).unwrap();
    mux.add_sink(capture.clone()).unwrap();

    let (source, feed) = ChannelSource::new("instruments");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();

    feed.send(nmea(
        "GPRMC,120000,A,4700.000,N,00730.000,E,6.0000,90.0000,010624,,",
    ));
    feed.send(nmea("IIVHW,,T,,M,6.2,N,,K"));
    feed.send(nmea("IIMWV,45.0,R,12.0,N,A"));

    wait_until(|| mux.statistics().dispatched == 6).await;
    let frames = capture.frames();

    assert!(frames[0].starts_with("$GPRMC,"));
    assert!(frames[1].starts_with("$IIVHW,"));
    assert!(frames[2].starts_with("$OSMWV,74.0,T,8.8,N,A*"));
    assert!(frames[3].starts_with("$OSVWT,73.7,R,8.8,N,"));
    assert!(frames[4].starts_with("$OSMWD,163.7,T,163.7,M,8.8,N,"));
    assert!(frames[5].starts_with("$IIMWV,"));
    assert!(frames.iter().all(|f| validate(f)));

    let tws = mux.cache().get(CacheKey::Tws).and_then(|v| v.as_speed());
    assert!((tws.unwrap() - 8.8).abs() < 0.05);

    let stats = mux.statistics();
    assert_eq!(stats.received, 6);
    assert_eq!(stats.synthesized, 3);
    assert_eq!(stats.dispatched, 6);
    mux.shutdown();
}

#[tokio::test]
async fn test_bad_sentences_are_dropped() {
    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();

    let (source, feed) = ChannelSource::new("noisy");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();

    feed.send("$IIVHW,,T,,M,6.2,N,,K*00");
    feed.send("line noise");
    feed.send(nmea("IIVHW,,T,,M,abc,N,,K"));
    feed.send(nmea("GPGSV,3,1,11"));

    wait_until(|| {
        let stats = mux.statistics();
        stats.rejected == 2 && stats.dispatched == 2
    })
    .await;

    // Undecodable and unsupported sentences still pass through.
    let frames = capture.frames();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].starts_with("$IIVHW,,T,,M,abc"));
    assert!(frames[1].starts_with("$GPGSV"));

    let stats = mux.statistics();
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.undecodable, 1);
    assert!(mux.cache().is_empty());
    mux.shutdown();
}

#[tokio::test]
async fn test_corrupt_field_does_not_stop_the_channel() {
    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();

    let (source, feed) = ChannelSource::new("garbled");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();

    feed.send(nmea(
        "GPRMC,1\u{e9}3456,A,4700.000,N,00730.000,E,6.0,90.0,010624,,",
    ));
    feed.send(nmea("GPRMC,120000,A,4700.000,N,1e20,E,6.0,90.0,010624,,"));
    feed.send(nmea("IIVHW,,T,,M,NaN,N,,K"));
    feed.send(nmea("GPGSV,3,1,11"));

    wait_until(|| mux.statistics().dispatched == 4).await;
    assert!(capture.frames()[3].starts_with("$GPGSV"));

    let stats = mux.statistics();
    assert_eq!(stats.undecodable, 3);
    assert_eq!(stats.rejected, 0);
    assert!(mux.cache().is_empty());
    assert_eq!(mux.sources_status().len(), 1);
    mux.shutdown();
}

#[tokio::test]
async fn test_invalid_utf8_from_tcp_channel() {
    let instrument = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = instrument.local_addr().unwrap().port();

    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();
    mux.add_source(
        Arc::new(TcpSource::new("127.0.0.1", port)),
        SentenceFilter::default(),
    )
    .unwrap();

    let (mut stream, _) = instrument.accept().await.unwrap();
    stream.write_all(b"$GPGSV,3,1,\xff\xfe*00\r\n").await.unwrap();
    let vhw = nmea("IIVHW,,T,,M,6.2,N,,K");
    stream.write_all(format!("{}\r\n", vhw).as_bytes()).await.unwrap();

    wait_until(|| capture.len() == 1).await;
    assert_eq!(capture.frames()[0], vhw);
    assert_eq!(mux.statistics().rejected, 1);
    assert_eq!(mux.sources_status().len(), 1);

    drop(stream);
    mux.shutdown();
}

#[tokio::test]
async fn test_channel_filters() {
    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();

    let (source, feed) = ChannelSource::new("gps");
    let filter = SentenceFilter::new(vec!["GP".into()], vec!["~GSV".into()]);
    mux.add_source(Arc::new(source), filter).unwrap();

    feed.send(nmea("GPGSV,3,1,11"));
    feed.send(nmea("IIVHW,,T,,M,6.2,N,,K"));
    feed.send(nmea("GPVTG,90.0,T,,M,6.0,N,,K"));

    wait_until(|| capture.len() == 1 && mux.statistics().filtered == 2).await;
    assert!(capture.frames()[0].starts_with("$GPVTG"));
    assert_eq!(mux.sources_status()[0]["lines"], 3);
    mux.shutdown();
}

#[tokio::test]
async fn test_duplicate_channel_rejected() {
    let mux = Multiplexer::new(DataCache::default());
    let (a, _feed_a) = ChannelSource::new("same");
    let (b, _feed_b) = ChannelSource::new("same");
    mux.add_source(Arc::new(a), SentenceFilter::default())
        .unwrap();
    let err = mux
        .add_source(Arc::new(b), SentenceFilter::default())
        .unwrap_err();
    assert!(matches!(err, MuxError::Duplicate { kind: "channel", .. }));
    assert_eq!(mux.sources_status().len(), 1);
    mux.shutdown();
}

#[tokio::test]
async fn test_no_write_after_sink_removal() {
    let mux = Multiplexer::new(DataCache::default());
    let removed = Arc::new(Capture::named("removed"));
    let kept = Arc::new(Capture::named("kept"));
    mux.add_sink(removed.clone()).unwrap();
    mux.add_sink(kept.clone()).unwrap();

    let (source, feed) = ChannelSource::new("fast");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();

    // 50 sentences per second.
    let feeder = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(20));
        for i in 0.. {
            interval.tick().await;
            if !feed.send(nmea(&format!("GPGSV,3,1,{}", i))) {
                break;
            }
        }
    });

    wait_until(|| removed.len() >= 10).await;
    mux.remove_sink(&json!({ "type": "capture", "name": "removed" }))
        .unwrap();
    let at_removal = removed.len();
    let kept_at_removal = kept.len();

    let before = mux.statistics().dispatched;
    wait_until(|| mux.statistics().dispatched >= before + 10).await;
    assert_eq!(removed.len(), at_removal);
    // The other forwarder keeps receiving.
    wait_until(|| kept.len() >= kept_at_removal + 10).await;
    assert_eq!(mux.sinks_status().len(), 1);

    mux.shutdown();
    feeder.abort();
}

#[tokio::test]
async fn test_remove_channel_stops_consumption() {
    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();

    let (source, feed) = ChannelSource::new("removable");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();

    feed.send(nmea("GPGSV,3,1,11"));
    wait_until(|| capture.len() == 1).await;

    mux.remove_source(&json!({ "type": "channel", "name": "removable" }))
        .unwrap();
    assert!(mux.sources_status().is_empty());

    feed.send(nmea("GPGSV,3,2,11"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(capture.len(), 1);
    mux.shutdown();
}

#[tokio::test]
async fn test_tcp_forwarder_end_to_end() {
    let mux = Multiplexer::new(DataCache::default());
    let forwarder = Arc::new(TcpServerSink::bind(0).await.unwrap());
    let port = forwarder.local_addr().port();
    mux.add_sink(forwarder.clone()).unwrap();

    let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_until(|| forwarder.client_count() == 1).await;

    let (source, feed) = ChannelSource::new("instruments");
    mux.add_source(Arc::new(source), SentenceFilter::default())
        .unwrap();
    let vhw = nmea("IIVHW,,T,,M,6.2,N,,K");
    feed.send(format!("  {}  ", vhw));

    let mut lines = BufReader::new(client).lines();
    let line = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, Some(vhw));

    mux.shutdown();
    let eof = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(eof, None);
}

#[tokio::test]
async fn test_tcp_channel_removed_on_disconnect() {
    let instrument = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = instrument.local_addr().unwrap().port();

    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();
    mux.add_source(
        Arc::new(TcpSource::new("127.0.0.1", port)),
        SentenceFilter::default(),
    )
    .unwrap();

    let (mut stream, _) = instrument.accept().await.unwrap();
    let body = format!("{}\r\n{}\r\n", nmea("GPGSV,3,1,11"), nmea("IIVHW,,T,,M,6.2,N,,K"));
    stream.write_all(body.as_bytes()).await.unwrap();
    drop(stream);

    wait_until(|| capture.len() == 2).await;
    wait_until(|| mux.sources_status().is_empty()).await;
    assert!(mux.cache().get(CacheKey::Bsp).is_some());
    mux.shutdown();
}

#[tokio::test]
async fn test_file_replay() {
    let path = std::env::temp_dir().join(format!("nmea-mux-replay-{}.nmea", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..5 {
            writeln!(file, "{}", nmea(&format!("GPGSV,5,{},11", i + 1))).unwrap();
        }
    }

    let mux = Multiplexer::new(DataCache::default());
    let capture = Arc::new(Capture::default());
    mux.add_sink(capture.clone()).unwrap();
    mux.add_source(
        Arc::new(FileSource::new(&path).with_pause(Duration::from_millis(1))),
        SentenceFilter::default(),
    )
    .unwrap();

    wait_until(|| capture.len() == 5).await;
    assert!(capture.frames()[4].starts_with("$GPGSV,5,5,"));

    // End of file is not a failure: the channel stays registered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mux.sources_status().len(), 1);

    mux.shutdown();
    std::fs::remove_file(path).ok();
}
