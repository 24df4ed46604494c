//! # Ouroboros LLM
//!
//! Minimal client for a hosted reasoning backend that returns JSON documents
//! constrained by a response schema.
//!
//! ```rust,no_run
//! use ouroboros_llm::{schema, Client, StructuredRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env()?;
//! let request = StructuredRequest::new(
//!     "Summarise the plan",
//!     "You are a careful planner.",
//!     schema::object(vec![("response", schema::string())], &["response"]),
//! );
//! let value = client.generate_json(&request).await?;
//! println!("{}", value["response"]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod client;
mod config;
mod error;
pub mod schema;

pub use client::{Client, StructuredRequest};
pub use config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT};
pub use error::{LlmError, LlmResult};
