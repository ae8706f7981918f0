//! Provider normalization for parley.
//!
//! This crate provides:
//! - A vendor-neutral [`Message`] model with tool calls and attachments
//! - A [`ProviderRegistry`] mapping provider names to adapter families
//! - A [`ModelFactory`] that memoizes adapters per `provider[:model]`
//! - The [`ModelAdapter`] contract with OpenAI, Anthropic, Google and
//!   OpenRouter translators
//! - A [`KeyManager`] rotating API keys by least use, with seed pinning
//! - A [`CacheAnnotator`] for prefix-cache markers
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       ModelFactory                        │
//! │      "provider[:model]" ──▶ ProviderRegistry entry        │
//! │  ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌────────────┐   │
//! │  │  OpenAI  │ │ Anthropic │ │  Google  │ │ OpenRouter │   │
//! │  │ Adapter  │ │  Adapter  │ │ Adapter  │ │  Adapter   │   │
//! │  └──────────┘ └───────────┘ └──────────┘ └────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//!          │                 │                    │
//!          ▼                 ▼                    ▼
//!   ┌────────────┐   ┌───────────────┐   ┌──────────────────┐
//!   │ KeyManager │   │ CacheAnnotator│   │    Transport     │
//!   │ (env keys) │   │   (K = 4)     │   │ (reqwest + SSE)  │
//!   └────────────┘   └───────────────┘   └──────────────────┘
//! ```

mod error;
mod message;

pub mod adapters;
pub mod attachment;
pub mod cache;
pub mod factory;
pub mod keys;
pub mod mock;
pub mod registry;
pub mod transport;

pub use adapters::{ModelAdapter, Reply, SendOptions, TextStream};
pub use cache::CacheAnnotator;
pub use error::{Error, Result};
pub use factory::ModelFactory;
pub use keys::{ApiKey, KeyManager};
pub use message::{FunctionCall, Message, OFFERED_TOOL_PREFIX, Role, ToolCall, ToolSpec, now_seconds};
pub use registry::{AdapterKind, Params, ProviderEntry, ProviderRegistry, ProviderSpec};
