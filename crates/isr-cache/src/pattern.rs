//! Route pattern grammar, compilation, and matching (C1, spec §4.1).
//!
//! Patterns are compiled once when a [`CompiledRoutes`] table is built and
//! reused for the lifetime of that table — routes are read-only after
//! construction (§5), so the natural place to memoize compilation is at
//! construction time rather than behind a lazily-populated global cache.
//! Hot-reload scenarios are handled by building a fresh `CompiledRoutes`
//! from the replacement `RouteTable`.

use isr_core::{Error, Result, RouteConfig, RouteTable};
use regex::Regex;

const MAX_PATTERN_LEN: usize = 512;

/// A compiled route entry: regex + source pattern + config (spec §3).
pub struct RouteMatch<'a> {
    pub pattern: &'a str,
    pub config: &'a RouteConfig,
}

struct CompiledPattern {
    source: String,
    regex: Regex,
    config: RouteConfig,
}

/// Patterns compiled once from a [`RouteTable`], preserving its insertion
/// order for first-match-wins precedence.
pub struct CompiledRoutes {
    compiled: Vec<CompiledPattern>,
}

impl CompiledRoutes {
    pub fn compile(routes: &RouteTable) -> Result<Self> {
        let mut compiled = Vec::with_capacity(routes.0.len());
        for (pattern, config) in routes.iter() {
            let regex = compile_pattern(pattern)?;
            compiled.push(CompiledPattern {
                source: pattern.clone(),
                regex,
                config: config.clone(),
            });
        }
        Ok(Self { compiled })
    }

    /// First-match-wins linear scan over the iteration order the routes
    /// were constructed with (§4.1).
    pub fn match_route(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.compiled.iter().find_map(|entry| {
            if entry.regex.is_match(path) {
                Some(RouteMatch {
                    pattern: entry.source.as_str(),
                    config: &entry.config,
                })
            } else {
                None
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Compiles a single route pattern to a regex, enforcing the bounded-size
/// and single-catch-all rules that keep matching ReDoS-safe (§4.1).
///
/// Grammar:
/// - Exact literal segments, regex-escaped.
/// - `[name]` — one non-slash segment.
/// - `[...name]` — one or more segments (at least one character); at most
///   one per pattern.
/// - `:name` — equivalent to `[name]`.
/// - A trailing `*` (only as the pattern's last character) matches anything
///   including empty.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(Error::PatternInvalid {
            pattern: pattern.to_string(),
            reason: format!("pattern length {} exceeds {MAX_PATTERN_LEN}", pattern.len()),
        });
    }
    if !pattern.starts_with('/') {
        return Err(Error::PatternInvalid {
            pattern: pattern.to_string(),
            reason: "pattern must start with '/'".to_string(),
        });
    }

    let (body, trailing_wildcard) = match pattern.strip_suffix('*') {
        Some(stripped) => {
            if stripped.contains('*') {
                return Err(Error::PatternInvalid {
                    pattern: pattern.to_string(),
                    reason: "'*' is only permitted as the final character".to_string(),
                });
            }
            (stripped, true)
        }
        None => {
            if pattern.contains('*') {
                return Err(Error::PatternInvalid {
                    pattern: pattern.to_string(),
                    reason: "'*' is only permitted as the final character".to_string(),
                });
            }
            (pattern, false)
        }
    };

    let remainder = &body[1..]; // strip leading '/'

    let mut catch_all_count = 0usize;
    let segment_fragments: Result<Vec<String>> = if remainder.is_empty() {
        Ok(Vec::new())
    } else {
        remainder
            .split('/')
            .map(|segment| segment_to_regex_fragment(pattern, segment, &mut catch_all_count))
            .collect()
    };
    let segment_fragments = segment_fragments?;

    if catch_all_count > 1 {
        return Err(Error::PatternInvalid {
            pattern: pattern.to_string(),
            reason: "at most one catch-all segment is permitted".to_string(),
        });
    }

    let mut regex_str = String::from("^/");
    regex_str.push_str(&segment_fragments.join("/"));
    if trailing_wildcard {
        regex_str.push_str(".*");
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|e| Error::PatternInvalid {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn segment_to_regex_fragment(
    pattern: &str,
    segment: &str,
    catch_all_count: &mut usize,
) -> Result<String> {
    if let Some(name) = segment.strip_prefix("[...").and_then(|s| s.strip_suffix(']')) {
        validate_segment_name(pattern, name)?;
        *catch_all_count += 1;
        return Ok("(.+)".to_string());
    }
    if let Some(name) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        validate_segment_name(pattern, name)?;
        return Ok("([^/]+)".to_string());
    }
    if let Some(name) = segment.strip_prefix(':') {
        validate_segment_name(pattern, name)?;
        return Ok("([^/]+)".to_string());
    }
    Ok(regex::escape(segment))
}

fn validate_segment_name(pattern: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::PatternInvalid {
            pattern: pattern.to_string(),
            reason: "dynamic segment name must not be empty".to_string(),
        });
    }
    Ok(())
}
