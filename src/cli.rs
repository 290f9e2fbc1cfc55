//! Command-line interface for inspecting and driving the lookup cache
//!
//! This module parses CLI arguments with clap and runs the selected command
//! against a `LookupResponseCache`, writing human-readable output.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheError, Freshness, LookupResponseCache};
use crate::data::{TagGroups, TagGroupsLookupResponse};

/// Error types for CLI argument parsing and command execution
#[derive(Debug, Error)]
pub enum CliError {
    /// A tag group argument was not in `group:tag` form
    #[error("Invalid tag group: '{0}'. Expected GROUP:TAG")]
    InvalidTagGroup(String),

    /// A duration argument was not a non-negative number of seconds
    #[error("Invalid duration: '{0}'. Expected a non-negative number of seconds")]
    InvalidDuration(String),

    /// The requested cache policy was rejected
    #[error(transparent)]
    Config(#[from] CacheError),

    /// Writing output failed
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Tagcache - inspect and manage the cached tag group lookup response
#[derive(Parser, Debug)]
#[command(name = "tagcache")]
#[command(about = "Inspect and manage the cached tag group lookup response")]
#[command(version)]
pub struct Cli {
    /// Directory holding cache state (defaults to the XDG cache directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show the cached response, its age and freshness
    Status,

    /// Record a response for the given tag groups
    ///
    /// Examples:
    ///   tagcache set device:vip device:beta
    ///   tagcache set user:opted_in
    Set {
        /// Tag groups as GROUP:TAG
        #[arg(required = true, value_name = "GROUP:TAG", value_parser = parse_tag_group_arg)]
        tags: Vec<(String, String)>,
    },

    /// Drop the cached response
    Clear,

    /// Show or change the cache policy
    Config {
        /// Seconds before the cached response should be refreshed
        #[arg(long, value_name = "SECS", value_parser = parse_seconds_arg)]
        max_age: Option<Duration>,

        /// Extra seconds the response may still be served after max age
        #[arg(long, value_name = "SECS", value_parser = parse_seconds_arg)]
        stale_read: Option<Duration>,
    },
}

/// Parses a `group:tag` argument
///
/// # Returns
/// * `Ok((group, tag))` if both sides are non-empty
/// * `Err(CliError::InvalidTagGroup)` otherwise
pub fn parse_tag_group_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once(':') {
        Some((group, tag)) if !group.is_empty() && !tag.is_empty() => {
            Ok((group.to_string(), tag.to_string()))
        }
        _ => Err(CliError::InvalidTagGroup(s.to_string())),
    }
}

/// Parses a non-negative, possibly fractional, number of seconds
pub fn parse_seconds_arg(s: &str) -> Result<Duration, CliError> {
    s.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| CliError::InvalidDuration(s.to_string()))
}

fn format_secs(d: Duration) -> String {
    format!("{}s", d.as_secs_f64())
}

fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Fresh => "fresh",
        Freshness::StaleServable => "stale (servable, refresh recommended)",
        Freshness::Unusable => "unusable (refresh required)",
    }
}

fn write_tag_groups(out: &mut impl Write, label: &str, groups: &TagGroups) -> std::io::Result<()> {
    writeln!(out, "{}:", label)?;
    for group in groups.groups() {
        let tags: Vec<&str> = groups
            .tags(group)
            .map(|tags| tags.iter().map(String::as_str).collect())
            .unwrap_or_default();
        writeln!(out, "  {}: {}", group, tags.join(", "))?;
    }
    Ok(())
}

/// Runs a parsed command against `cache`, writing output to `out`
pub fn run(
    command: &Command,
    cache: &LookupResponseCache,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match command {
        Command::Status => {
            let snapshot = cache.snapshot();
            match &snapshot.cached {
                Some(cached) => {
                    writeln!(out, "Created: {}", cached.created_at().to_rfc3339())?;
                    if let Some(age) = snapshot.age {
                        writeln!(out, "Age: {}", format_secs(age))?;
                    }
                    writeln!(out, "Status: {}", cached.payload().status)?;
                    write_tag_groups(out, "Requested", cached.requested_tag_groups())?;
                    write_tag_groups(out, "Response", &cached.payload().tag_groups)?;
                }
                None => writeln!(out, "No cached response")?,
            }
            writeln!(out, "Freshness: {}", freshness_label(snapshot.freshness))?;
        }
        Command::Set { tags } => {
            let groups: TagGroups = tags.iter().cloned().collect();
            cache.set_response(groups.clone(), TagGroupsLookupResponse::ok(groups));
            writeln!(out, "Cached response for {} tag(s)", tags.len())?;
        }
        Command::Clear => {
            cache.clear_response();
            writeln!(out, "Cleared cached response")?;
        }
        Command::Config {
            max_age,
            stale_read,
        } => {
            if let Some(max_age) = max_age {
                cache.set_max_age(*max_age)?;
            }
            if let Some(stale_read) = stale_read {
                cache.set_stale_read_allowance(*stale_read)?;
            }
            writeln!(out, "Max age: {}", format_secs(cache.max_age()))?;
            writeln!(
                out,
                "Stale read allowance: {}",
                format_secs(cache.stale_read_allowance())
            )?;
        }
    }
    Ok(())
}
