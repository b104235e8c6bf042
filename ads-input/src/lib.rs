#[macro_use]
mod logger;

mod config;
mod demux;
mod errors;
mod input;
mod message;
mod poll;
mod registry;
mod symbols;

pub use crate::config::{Config, HostAms, LogLevel, ReadType};
pub use crate::demux::Demultiplexer;
pub use crate::errors::{Error, ErrorKind, Result};
pub use crate::input::{AdsInput, State, IDLE_TIMEOUT};
pub use crate::logger::SessionLogger;
pub use crate::message::{sanitise, Ack, Batch, Message, Update, SYMBOL_NAME};
pub use crate::poll::PollScheduler;
pub use crate::registry::{Subscription, SubscriptionRegistry};
pub use crate::symbols::{SymbolBinding, SymbolResolver};
