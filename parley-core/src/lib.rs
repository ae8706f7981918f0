//! parley-core: chat sessions on top of parley-models
//!
//! - **Sessions** - [`ChatSession`] owns history, a system prompt and a
//!   default model, and orchestrates send/receive
//! - **Persistence** - [`ChatSession::save`] and [`ChatSession::load`] read
//!   and write a JSON session document
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parley_core::{ChatSession, SendArgs};
//! use parley_models::{KeyManager, ModelFactory, ProviderRegistry};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ProviderRegistry::with_defaults());
//!     let factory = Arc::new(ModelFactory::http(registry, Arc::new(KeyManager::new())));
//!
//!     let mut session = ChatSession::new(factory).with_default_model("openai");
//!     let reply = session.send("Hello!", SendArgs::new()).await?;
//!     println!("{}", reply.collect_text().await?);
//!     session.save("chat.json")?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod session;

pub use error::{Result, SessionError};
pub use session::{ChatSession, ModelRef, SendArgs, UserTurn};
