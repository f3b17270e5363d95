//! Service layer module
//!
//! Contains the credential pool, gateway, token cache, streaming decoder and
//! the generation coordinators built on them

pub mod credentials;
pub mod decoder;
pub mod enrichment;
pub mod gateway;
pub mod guard;
pub mod lines;
pub mod markdown;
pub mod prompts;
pub mod remote;
pub mod session;
pub mod store;
pub mod token_cache;

pub use credentials::CredentialPool;
pub use decoder::{JsonObject, PlainText, Snapshot, StreamDecoder};
pub use enrichment::{EnrichmentError, EnrichmentUpdate, SpeciesEnricher};
pub use gateway::{Gateway, GatewayError, LlmStream, RetryDiagnostics, StreamHandle};
pub use session::{GenerationCoordinator, SessionError, TurnOutcome, TurnStatus};
pub use store::{ChatStore, MemoryChatStore};
pub use token_cache::{TokenCache, TokenError, TokenFetcher};
