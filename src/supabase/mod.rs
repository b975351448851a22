//! Read side: PostgREST access to the Supabase project and page-by-page fetching.
pub mod client;
pub mod paginate;

pub use client::{Filter, SourceError, SupabaseClient, TableQuery, TableSource};
pub use paginate::{fetch_all_as, fetch_all_paginated};
