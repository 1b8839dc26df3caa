//! # nmea-mux
//!
//! Real-time NMEA 0183 multiplexer.
//!
//! Sentences read from [`Source`]s are validated, fed to the shared
//! [`DataCache`], handed to every [`Computer`] and finally written to every
//! [`Sink`]. Components can be added and removed while data flows.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nmea_mux::{ChannelSource, ConsoleSink, DataCache, Multiplexer, SentenceFilter};
//!
//! # async fn run() -> Result<(), nmea_mux::MuxError> {
//! let mux = Multiplexer::new(DataCache::default());
//! mux.add_sink(Arc::new(ConsoleSink::new()))?;
//! let (source, feed) = ChannelSource::new("demo");
//! mux.add_source(Arc::new(source), SentenceFilter::default())?;
//! feed.send("$IIVHW,,T,,M,6.2,N,,K*7F");
//! # Ok(())
//! # }
//! ```

pub mod computer;
pub mod config;
pub mod factory;
pub mod filter;
pub mod multiplexer;
pub mod registry;
pub mod sink;
pub mod source;
pub mod tcp;

pub use computer::{Computer, DerivedComputer};
pub use config::{AdminConfig, ChannelConfig, ChannelKind, ComputerConfig, ForwarderConfig, MuxConfig};
pub use factory::Factory;
pub use filter::SentenceFilter;
pub use multiplexer::{Multiplexer, MuxError, StatisticsSnapshot, MAX_REENTRY_DEPTH};
pub use sink::{ConsoleSink, FileSink, Sink, SinkError};
pub use source::{ChannelFeed, ChannelSource, FileSource, Source, TcpSource};
pub use tcp::TcpServerSink;

pub use nmea_core::DataCache;
