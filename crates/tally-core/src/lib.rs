//! Tally Core Library
//!
//! Shared functionality for the Tally offline-first personal-finance
//! ledger:
//! - Entity model and tombstone store over key-value local storage
//! - Pattern-keyed read cache with TTL
//! - FX conversion with locked per-book rates and an upstream provider
//! - Pure three-way merge kernel with per-field conflict detection
//! - Sync orchestrator (pull -> merge -> push, auto-sync, listener)
//! - Transaction classifier with semantic, learning, merchant, and
//!   optional LLM signals
//! - Runtime configuration with embedded defaults

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fx;
pub mod ids;
pub mod kv;
pub mod merge;
pub mod models;
pub mod store;
pub mod sync;
pub mod wire;

/// Test utilities including mock FX and LLM servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::ReadCache;
pub use classify::{
    learning::{normalize_merchant, LearningStore, MerchantMapping},
    llm::{build_prompt, LlmPrediction, LlmProvider, MockProvider, OllamaProvider},
    pending::{ingest_hash, ApprovalEdits, PendingQueue},
    semantic, Classifier,
};
pub use config::{
    CacheConfig, ClassifierWeights, CoreConfig, FxConfig, LlmConfig, SyncConfig,
};
pub use error::{Error, Result};
pub use fx::{round_half_even, FxService, HttpRateProvider, RateProvider, StaticRateProvider};
pub use ids::{BookId, CategoryId, EntryId, PendingId, UserId};
pub use merge::{merge_collection, Conflict, MergeContext, MergeOutcome, Mergeable, Versioned};
pub use models::{
    Book, BookPatch, Category, CategoryPatch, Confidence, Entry, EntryPatch, EntityKind,
    IngestSource, ParsedTransaction, PaymentMode, PendingTransaction, Prediction, SyncMeta,
    UserPreferences, OTHERS_CATEGORY_NAME,
};
pub use store::{ChangeEvent, ChangeOp, LedgerStore, NewEntry};
pub use sync::{
    auth::{AuthToken, IdentityProvider, StaticIdentity},
    cloud::{CloudStore, MemoryCloud},
    SyncOrchestrator, SyncReport, SyncStatus,
};
pub use wire::{
    document_from_domain, document_to_domain, ParsedDocument, UserDocument, WireBook,
    WireCategory, WireEntry,
};
