//! String functions implementation for FHIRPath
//!
//! Positions and lengths count Unicode scalar values, not bytes. Regular
//! expressions run in single-line mode (`.` matches newlines) and compiled
//! patterns are kept in a small LRU cache.

use std::num::NonZeroUsize;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::error_code::{FP0051, FP0053, FP0065};
use crate::core::{Collection, FhirPathError, FhirPathValue, Result};
use crate::register_function;

const REGEX_CACHE_SIZE: usize = 128;

/// Thread-safe cache of compiled patterns
pub struct RegexCache {
    cache: Mutex<LruCache<String, Regex>>,
}

impl RegexCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_regex(&self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.cache.lock().get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&format!("(?s){pattern}")).map_err(|e| {
            FhirPathError::evaluation_error(FP0065, format!("Invalid regular expression '{pattern}': {e}"))
        })?;
        self.cache.lock().put(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

static REGEX_CACHE: Lazy<RegexCache> = Lazy::new(RegexCache::default);

fn string(value: impl Into<String>) -> Collection {
    Collection::single(FhirPathValue::String(value.into()))
}

fn boolean(value: bool) -> Collection {
    Collection::single(FhirPathValue::Boolean(value))
}

fn integer(value: usize) -> Collection {
    Collection::single(FhirPathValue::Integer(i64::try_from(value).unwrap_or(i64::MAX)))
}

/// Character index of the first occurrence of `needle`
fn char_index_of(haystack: &str, needle: &str) -> Option<usize> {
    haystack.find(needle).map(|byte| haystack[..byte].chars().count())
}

fn char_last_index_of(haystack: &str, needle: &str) -> Option<usize> {
    haystack.rfind(needle).map(|byte| haystack[..byte].chars().count())
}

fn substring(text: &str, start: i64, length: Option<i64>) -> Option<String> {
    let count = text.chars().count();
    let start = usize::try_from(start).ok().filter(|s| *s < count)?;
    let length = match length {
        Some(length) => usize::try_from(length.max(0)).unwrap_or(usize::MAX),
        None => count,
    };
    Some(text.chars().skip(start).take(length).collect())
}

fn encode(text: &str, format: &str) -> Result<String> {
    match format {
        "base64" => Ok(STANDARD.encode(text)),
        "urlbase64" => Ok(URL_SAFE.encode(text)),
        "hex" => Ok(hex::encode(text)),
        other => Err(FhirPathError::type_error(FP0053, format!("Unsupported encoding '{other}'"))),
    }
}

fn decode(text: &str, format: &str) -> Result<String> {
    let bytes = match format {
        "base64" => STANDARD.decode(text).map_err(|e| e.to_string()),
        "urlbase64" => URL_SAFE.decode(text).map_err(|e| e.to_string()),
        "hex" => hex::decode(text).map_err(|e| e.to_string()),
        other => return Err(FhirPathError::type_error(FP0053, format!("Unsupported encoding '{other}'"))),
    };
    let bytes = bytes.map_err(|e| {
        FhirPathError::evaluation_error(FP0053, format!("Cannot decode '{text}' as {format}: {e}"))
    })?;
    String::from_utf8(bytes)
        .map_err(|e| FhirPathError::evaluation_error(FP0053, format!("Decoded value is not UTF-8: {e}")))
}

/// Input string and first argument, or `None` when either is empty
fn with_argument(ctx: &FunctionContext<'_>) -> Result<Option<(String, String)>> {
    let text = ctx.input_string()?;
    Ok(text.zip(ctx.arg_string(0)))
}

impl FunctionRegistry {
    pub fn register_string_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "indexOf",
            category: FunctionCategory::String,
            description: "Character position of the first occurrence of substring, -1 when absent",
            parameters: ["substring": ParameterKind::String => "Text to find"],
            return_type: "Integer",
            examples: ["'abcdefg'.indexOf('bc')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, needle)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(match char_index_of(&text, &needle) {
                    Some(index) => integer(index),
                    None => Collection::single(FhirPathValue::Integer(-1)),
                })
            }
        )?;

        register_function!(
            self,
            sync "lastIndexOf",
            category: FunctionCategory::String,
            description: "Character position of the last occurrence of substring, -1 when absent",
            parameters: ["substring": ParameterKind::String => "Text to find"],
            return_type: "Integer",
            examples: ["'abcabc'.lastIndexOf('bc')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, needle)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(match char_last_index_of(&text, &needle) {
                    Some(index) => integer(index),
                    None => Collection::single(FhirPathValue::Integer(-1)),
                })
            }
        )?;

        register_function!(
            self,
            sync "substring",
            category: FunctionCategory::String,
            description: "Part of the string starting at start, optionally limited to length characters",
            parameters: ["start": ParameterKind::Integer => "Zero-based start position"],
            optional: ["length": ParameterKind::Integer => "Number of characters"],
            return_type: "String",
            examples: ["'abcdefg'.substring(3)", "'abcdefg'.substring(1, 2)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(text), Some(start)) = (ctx.input_string()?, ctx.arg_integer(0)) else {
                    return Ok(Collection::empty());
                };
                Ok(Collection::from(substring(&text, start, ctx.arg_integer(1)).map(FhirPathValue::String)))
            }
        )?;

        register_function!(
            self,
            sync "startsWith",
            category: FunctionCategory::String,
            description: "Returns true if the input starts with prefix",
            parameters: ["prefix": ParameterKind::String => "Expected prefix"],
            return_type: "Boolean",
            examples: ["'abcdefg'.startsWith('abc')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(with_argument(ctx)?.map_or_else(Collection::empty, |(text, prefix)| boolean(text.starts_with(&prefix))))
            }
        )?;

        register_function!(
            self,
            sync "endsWith",
            category: FunctionCategory::String,
            description: "Returns true if the input ends with suffix",
            parameters: ["suffix": ParameterKind::String => "Expected suffix"],
            return_type: "Boolean",
            examples: ["'abcdefg'.endsWith('efg')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(with_argument(ctx)?.map_or_else(Collection::empty, |(text, suffix)| boolean(text.ends_with(&suffix))))
            }
        )?;

        register_function!(
            self,
            sync "contains",
            category: FunctionCategory::String,
            description: "Returns true if substring occurs in the input",
            parameters: ["substring": ParameterKind::String => "Text to find"],
            return_type: "Boolean",
            examples: ["'abc'.contains('b')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(with_argument(ctx)?.map_or_else(Collection::empty, |(text, needle)| boolean(text.contains(&needle))))
            }
        )?;

        register_function!(
            self,
            sync "upper",
            category: FunctionCategory::String,
            description: "Upper-case form of the input",
            parameters: [],
            return_type: "String",
            examples: ["'abc'.upper()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(ctx.input_string()?.map_or_else(Collection::empty, |s| string(s.to_uppercase())))
            }
        )?;

        register_function!(
            self,
            sync "lower",
            category: FunctionCategory::String,
            description: "Lower-case form of the input",
            parameters: [],
            return_type: "String",
            examples: ["'ABC'.lower()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(ctx.input_string()?.map_or_else(Collection::empty, |s| string(s.to_lowercase())))
            }
        )?;

        register_function!(
            self,
            sync "replace",
            category: FunctionCategory::String,
            description: "Replaces every occurrence of pattern with substitution",
            parameters: [
                "pattern": ParameterKind::String => "Literal text to replace",
                "substitution": ParameterKind::String => "Replacement text"
            ],
            return_type: "String",
            examples: ["'abcdefg'.replace('cde', '123')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(text), Some(pattern), Some(substitution)) =
                    (ctx.input_string()?, ctx.arg_string(0), ctx.arg_string(1))
                else {
                    return Ok(Collection::empty());
                };
                Ok(string(text.replace(&pattern, &substitution)))
            }
        )?;

        register_function!(
            self,
            sync "matches",
            category: FunctionCategory::String,
            description: "Returns true if the regular expression matches anywhere in the input",
            parameters: ["regex": ParameterKind::String => "Regular expression"],
            return_type: "Boolean",
            examples: ["'abc123'.matches('[0-9]+')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, pattern)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(boolean(REGEX_CACHE.get_regex(&pattern)?.is_match(&text)))
            }
        )?;

        register_function!(
            self,
            sync "matchesFull",
            category: FunctionCategory::String,
            description: "Returns true if the regular expression matches the whole input",
            parameters: ["regex": ParameterKind::String => "Regular expression"],
            return_type: "Boolean",
            examples: ["'abc123'.matchesFull('[a-z]+[0-9]+')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, pattern)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(boolean(REGEX_CACHE.get_regex(&format!("^(?:{pattern})$"))?.is_match(&text)))
            }
        )?;

        register_function!(
            self,
            sync "replaceMatches",
            category: FunctionCategory::String,
            description: "Replaces every match of the regular expression; `$1` refers to capture groups",
            parameters: [
                "regex": ParameterKind::String => "Regular expression",
                "substitution": ParameterKind::String => "Replacement text"
            ],
            return_type: "String",
            examples: ["'abc123'.replaceMatches('[0-9]', 'x')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(text), Some(pattern), Some(substitution)) =
                    (ctx.input_string()?, ctx.arg_string(0), ctx.arg_string(1))
                else {
                    return Ok(Collection::empty());
                };
                if pattern.is_empty() {
                    return Ok(string(text));
                }
                let regex = REGEX_CACHE.get_regex(&pattern)?;
                Ok(string(regex.replace_all(&text, substitution.as_str()).into_owned()))
            }
        )?;

        register_function!(
            self,
            sync "length",
            category: FunctionCategory::String,
            description: "Number of characters in the input",
            parameters: [],
            return_type: "Integer",
            examples: ["'abc'.length()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(ctx.input_string()?.map_or_else(Collection::empty, |s| integer(s.chars().count())))
            }
        )?;

        register_function!(
            self,
            sync "toChars",
            category: FunctionCategory::String,
            description: "The input split into single characters",
            parameters: [],
            return_type: "Collection",
            examples: ["'abc'.toChars()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(ctx
                    .input_string()?
                    .map(|s| s.chars().map(|c| FhirPathValue::String(c.to_string())).collect())
                    .unwrap_or_default())
            }
        )?;

        register_function!(
            self,
            sync "split",
            category: FunctionCategory::String,
            description: "Splits the input at every occurrence of separator",
            parameters: ["separator": ParameterKind::String => "Separator text"],
            return_type: "Collection",
            examples: ["'a,b,c'.split(',')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, separator)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                if separator.is_empty() {
                    return Ok(text.chars().map(|c| FhirPathValue::String(c.to_string())).collect());
                }
                Ok(text.split(separator.as_str()).map(FhirPathValue::string).collect())
            }
        )?;

        register_function!(
            self,
            sync "join",
            category: FunctionCategory::String,
            description: "Concatenates the string items of the input",
            parameters: [],
            optional: ["separator": ParameterKind::String => "Text placed between items"],
            return_type: "String",
            examples: ["('a' | 'b').join(',')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let parts = ctx
                    .input
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            FhirPathError::type_error(
                                FP0051,
                                format!("join() expects String items, got {}", item.type_name()),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(string(parts.join(&ctx.arg_string(0).unwrap_or_default())))
            }
        )?;

        register_function!(
            self,
            sync "trim",
            category: FunctionCategory::String,
            description: "The input without leading and trailing whitespace",
            parameters: [],
            return_type: "String",
            examples: ["'  abc  '.trim()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(ctx.input_string()?.map_or_else(Collection::empty, |s| string(s.trim())))
            }
        )?;

        register_function!(
            self,
            sync "encode",
            category: FunctionCategory::String,
            description: "Encodes the input as base64, urlbase64 or hex",
            parameters: ["format": ParameterKind::String => "base64, urlbase64 or hex"],
            return_type: "String",
            examples: ["'test'.encode('base64')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, format)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(string(encode(&text, &format)?))
            }
        )?;

        register_function!(
            self,
            sync "decode",
            category: FunctionCategory::String,
            description: "Decodes a base64, urlbase64 or hex encoded input",
            parameters: ["format": ParameterKind::String => "base64, urlbase64 or hex"],
            return_type: "String",
            examples: ["'dGVzdA=='.decode('base64')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some((text, format)) = with_argument(ctx)? else {
                    return Ok(Collection::empty());
                };
                Ok(string(decode(&text, &format)?))
            }
        )?;

        Ok(())
    }
}
