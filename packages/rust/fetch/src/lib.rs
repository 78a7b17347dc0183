//! Source acquisition for BookForge: rate-limited API access, the social
//! client, web fetch with cleaning, and the paragraph chunker.

pub mod chunk;
pub mod client;
pub mod fetch;
pub mod html;
pub mod social;

pub use chunk::chunk_text;
pub use client::RateLimitedClient;
pub use fetch::Fetcher;
pub use html::{clean_html, looks_blocked, word_count};
pub use social::{SocialClient, SocialPost, extract_post_id, is_social_url};
