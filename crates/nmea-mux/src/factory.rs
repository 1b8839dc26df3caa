//! Builds components from configuration.
//!
//! Built-in kinds are matched directly. `custom` kinds are looked up by tag
//! in constructor tables filled with the `register_*` methods before
//! [`Factory::build`] is called.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nmea_core::DataCache;
use nmea_protocol::TalkerId;
use serde_json::Value;
use tracing::{info, warn};

use crate::computer::{Computer, DerivedComputer};
use crate::config::{ChannelConfig, ChannelKind, ComputerConfig, ForwarderConfig, MuxConfig};
use crate::multiplexer::{Multiplexer, MuxError};
use crate::sink::{ConsoleSink, FileSink, Sink};
use crate::source::{FileSource, Source, TcpSource};
use crate::tcp::TcpServerSink;

pub type SourceConstructor =
    Box<dyn Fn(&Value) -> Result<Arc<dyn Source>, MuxError> + Send + Sync>;
pub type SinkConstructor = Box<dyn Fn(&Value) -> Result<Arc<dyn Sink>, MuxError> + Send + Sync>;
pub type ComputerConstructor =
    Box<dyn Fn(&Value, &DataCache) -> Result<Arc<dyn Computer>, MuxError> + Send + Sync>;

#[derive(Default)]
pub struct Factory {
    sources: HashMap<String, SourceConstructor>,
    sinks: HashMap<String, SinkConstructor>,
    computers: HashMap<String, ComputerConstructor>,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(
        &mut self,
        tag: impl Into<String>,
        constructor: impl Fn(&Value) -> Result<Arc<dyn Source>, MuxError> + Send + Sync + 'static,
    ) {
        self.sources.insert(tag.into(), Box::new(constructor));
    }

    pub fn register_sink(
        &mut self,
        tag: impl Into<String>,
        constructor: impl Fn(&Value) -> Result<Arc<dyn Sink>, MuxError> + Send + Sync + 'static,
    ) {
        self.sinks.insert(tag.into(), Box::new(constructor));
    }

    pub fn register_computer(
        &mut self,
        tag: impl Into<String>,
        constructor: impl Fn(&Value, &DataCache) -> Result<Arc<dyn Computer>, MuxError>
            + Send
            + Sync
            + 'static,
    ) {
        self.computers.insert(tag.into(), Box::new(constructor));
    }

    pub fn source(&self, config: &ChannelConfig) -> Result<Arc<dyn Source>, MuxError> {
        match &config.kind {
            ChannelKind::File {
                path,
                pause_ms,
                looping,
            } => {
                let mut source = FileSource::new(path).looping(*looping);
                if let Some(ms) = pause_ms {
                    source = source.with_pause(Duration::from_millis(*ms));
                }
                Ok(Arc::new(source))
            }
            ChannelKind::Tcp { host, port } => Ok(Arc::new(TcpSource::new(host.clone(), *port))),
            ChannelKind::Custom { tag, params } => {
                let constructor = self.sources.get(tag).ok_or_else(|| MuxError::UnknownKind {
                    kind: "channel",
                    tag: tag.clone(),
                })?;
                constructor(params)
            }
        }
    }

    /// TCP forwarders bind their port here.
    pub async fn sink(&self, config: &ForwarderConfig) -> Result<Arc<dyn Sink>, MuxError> {
        match config {
            ForwarderConfig::Console => Ok(Arc::new(ConsoleSink::new())),
            ForwarderConfig::File { path, append } => {
                Ok(Arc::new(FileSink::create(path, *append)?))
            }
            ForwarderConfig::Tcp { port } => Ok(Arc::new(TcpServerSink::bind(*port).await?)),
            ForwarderConfig::Custom { tag, params } => {
                let constructor = self.sinks.get(tag).ok_or_else(|| MuxError::UnknownKind {
                    kind: "forwarder",
                    tag: tag.clone(),
                })?;
                constructor(params)
            }
        }
    }

    pub fn computer(
        &self,
        config: &ComputerConfig,
        cache: &DataCache,
    ) -> Result<Arc<dyn Computer>, MuxError> {
        match config {
            ComputerConfig::Derived {
                prefix,
                current_windows,
                min_span_fraction,
                tick_period_ms,
            } => {
                let prefix = TalkerId::try_from(prefix.as_str())?;
                let computer = DerivedComputer::new(
                    prefix,
                    cache.clone(),
                    &ComputerConfig::windows(current_windows),
                    *min_span_fraction,
                )?
                .with_tick_period(Duration::from_millis(*tick_period_ms));
                Ok(Arc::new(computer))
            }
            ComputerConfig::Custom { tag, params } => {
                let constructor = self.computers.get(tag).ok_or_else(|| MuxError::UnknownKind {
                    kind: "computer",
                    tag: tag.clone(),
                })?;
                constructor(params, cache)
            }
        }
    }

    /// Instantiate and register everything in `config`.
    ///
    /// Forwarders and computers are registered before channels so that no
    /// sentence is read before its consumers exist. Only an invalid
    /// configuration fails the build: a unit that cannot be built or
    /// registered is logged and skipped.
    pub async fn build(&self, config: &MuxConfig) -> Result<Multiplexer, MuxError> {
        config.validate()?;
        let mux = Multiplexer::new(DataCache::new(config.cache.clone()));

        for forwarder in &config.forwarders {
            let registered = match self.sink(forwarder).await {
                Ok(sink) => mux.add_sink(sink),
                Err(e) => Err(e),
            };
            if let Err(e) = registered {
                warn!("Skipping forwarder {:?}: {}", forwarder, e);
            }
        }
        for computer in &config.computers {
            let registered = self
                .computer(computer, mux.cache())
                .and_then(|computer| mux.add_computer(computer));
            if let Err(e) = registered {
                warn!("Skipping computer {:?}: {}", computer, e);
            }
        }
        for channel in &config.channels {
            let registered = self
                .source(channel)
                .and_then(|source| mux.add_source(source, channel.filter.clone()));
            if let Err(e) = registered {
                warn!("Skipping channel {:?}: {}", channel.kind, e);
            }
        }

        info!(
            "Multiplexer built: {} channels, {} forwarders, {} computers",
            mux.sources_status().len(),
            mux.sinks_status().len(),
            mux.computers_status().len()
        );
        Ok(mux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SentenceFilter;
    use nmea_core::ConfigError;
    use crate::sink::SinkError;
    use serde_json::json;

    struct Null(String);

    impl Sink for Null {
        fn descriptor(&self) -> Value {
            json!({ "type": "null", "name": self.0 })
        }

        fn write(&self, _frame: &[u8]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn config(value: Value) -> MuxConfig {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_build_registers_everything() {
        let mut factory = Factory::new();
        factory.register_sink("null", |params| {
            let name = params["name"].as_str().unwrap_or("default").to_string();
            Ok(Arc::new(Null(name)) as Arc<dyn Sink>)
        });

        let mux = factory
            .build(&config(json!({
                "forwarders": [
                    { "type": "custom", "tag": "null", "params": { "name": "a" } },
                    { "type": "tcp", "port": 0 }
                ],
                "computers": [{ "type": "derived", "prefix": "OS" }]
            })))
            .await
            .unwrap();

        assert_eq!(mux.sinks_status().len(), 2);
        let computers = mux.computers_status();
        assert_eq!(computers.len(), 1);
        assert_eq!(computers[0]["prefix"], "OS");
        mux.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let factory = Factory::new();
        let forwarder: ForwarderConfig =
            serde_json::from_value(json!({ "type": "custom", "tag": "nope" })).unwrap();
        let err = factory.sink(&forwarder).await.err().unwrap();
        assert!(matches!(err, MuxError::UnknownKind { kind: "forwarder", .. }));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_skipped() {
        let factory = Factory::new();
        let mux = factory
            .build(&config(json!({
                "forwarders": [{ "type": "custom", "tag": "nope" }, { "type": "tcp", "port": 0 }]
            })))
            .await
            .unwrap();
        assert_eq!(mux.sinks_status().len(), 1);
        mux.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_forwarder_is_skipped() {
        let factory = Factory::new();
        let mux = factory
            .build(&config(json!({
                "forwarders": [{ "type": "console" }, { "type": "console" }],
                "computers": [{ "type": "derived", "prefix": "OS" }]
            })))
            .await
            .unwrap();
        let sinks = mux.sinks_status();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0]["type"], "console");
        assert_eq!(mux.computers_status().len(), 1);
        mux.shutdown();
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_the_rest() {
        let mut factory = Factory::new();
        factory.register_source("broken", |_| {
            Err(MuxError::Config(ConfigError::InvalidData("no such device".into())))
        });
        let path = std::env::temp_dir().join(format!("nmea-mux-build-{}.nmea", std::process::id()));
        std::fs::write(&path, "").unwrap();
        let mux = factory
            .build(&config(json!({
                "channels": [
                    { "type": "custom", "tag": "broken" },
                    { "type": "file", "path": path.display().to_string() }
                ]
            })))
            .await
            .unwrap();
        assert_eq!(mux.sources_status().len(), 1);
        assert_eq!(mux.sources_status()[0]["type"], "file");
        mux.shutdown();
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let factory = Factory::new();
        let err = factory
            .build(&config(json!({ "cache": { "bspFactor": 0 } })))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MuxError::Config(_)));
    }

    #[test]
    fn test_file_channel() {
        let factory = Factory::new();
        let channel: ChannelConfig =
            serde_json::from_value(json!({ "type": "file", "path": "a.nmea" })).unwrap();
        let source = factory.source(&channel).unwrap();
        assert_eq!(source.descriptor(), json!({ "type": "file", "path": "a.nmea" }));
        assert_eq!(channel.filter, SentenceFilter::default());
    }
}
