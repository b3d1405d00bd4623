//! `courier-core` — domain foundation for the background worker service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the entity records handlers read and write, and the data-store
//! error model shared by every layer.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Comment, Entity, Keyword, KeywordStatus, NewPost, Post, User, View};
pub use error::{ClassifyWriteError, IntegrityKind, StoreError, StoreResult, WriteErrorClass};
pub use id::{CommentId, PostId, SourceId, UserId};
