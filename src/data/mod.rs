//! Data types shared between the cache and its callers

pub mod tag_groups;

pub use tag_groups::{TagGroups, TagGroupsLookupResponse};
