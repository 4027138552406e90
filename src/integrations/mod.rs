//! External service integrations.

pub mod supabase;

pub use supabase::{SupabaseClient, SupabaseConfig};
