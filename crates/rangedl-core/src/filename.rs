//! Output filename resolution
//!
//! A filename comes from the `filename` parameter of `Content-Disposition`
//! when the header is present and well formed, otherwise from the last
//! segment of the response URL's path. Whatever the source, the result is
//! reduced to a bare file name so a hostile header can never point outside
//! the output directory.

use crate::error::RangedlError;
use reqwest::header::CONTENT_DISPOSITION;
use std::collections::HashMap;
use url::Url;

/// Resolve the output filename for a response
pub fn filename_from_response(response: &reqwest::Response) -> Result<String, RangedlError> {
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());
    resolve_filename(response.url(), disposition)
}

/// Output filename for a response: the caller's override when given, otherwise
/// whatever the response resolves to. Both pass through the same checks.
pub fn output_filename(
    override_name: Option<&str>,
    response: &reqwest::Response,
) -> Result<String, RangedlError> {
    match override_name {
        Some(name) => sanitize_filename(name),
        None => filename_from_response(response),
    }
}

/// Resolve a filename from the final URL and an optional `Content-Disposition` value
pub fn resolve_filename(
    url: &Url,
    content_disposition: Option<&str>,
) -> Result<String, RangedlError> {
    let from_header = content_disposition
        .and_then(parse_content_disposition)
        .and_then(|(_, mut params)| {
            params
                .remove("filename*")
                .or_else(|| params.remove("filename"))
        });

    let candidate = match from_header {
        Some(name) => name,
        None => urlencoding::decode(url.path())
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| url.path().to_string()),
    };
    sanitize_filename(&candidate)
}

/// Reduce a candidate name to a bare file name, rejecting ones that name nothing
pub fn sanitize_filename(candidate: &str) -> Result<String, RangedlError> {
    if candidate.is_empty() || candidate.ends_with('/') || candidate.contains('\0') {
        return Err(RangedlError::FilenameUnresolvable);
    }

    let name = base_name(candidate);
    if name.is_empty() || name == "." || name == "/" {
        return Err(RangedlError::FilenameUnresolvable);
    }
    Ok(name)
}

/// Lexically clean `"/" + path` and return its last element
fn base_name(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    stack.last().map(|s| s.to_string()).unwrap_or_else(|| "/".to_string())
}

/// Parse a `Content-Disposition` value into its lowercase disposition type and
/// parameters (RFC 2183 syntax, RFC 2231 `name*=charset''value` extended values).
///
/// Returns `None` for malformed values.
pub fn parse_content_disposition(value: &str) -> Option<(String, HashMap<String, String>)> {
    let mut rest = value.trim();
    let type_end = rest.find(';').unwrap_or(rest.len());
    let disposition = rest[..type_end].trim().to_ascii_lowercase();
    if disposition.is_empty() || !disposition.chars().all(is_token_char) {
        return None;
    }
    rest = &rest[type_end..];

    let mut params = HashMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(';')?.trim_start();
        if rest.is_empty() {
            // Tolerate a trailing separator.
            break;
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_ascii_lowercase();
        if key.is_empty() || !key.chars().all(is_token_char) {
            return None;
        }
        rest = rest[eq + 1..].trim_start();

        let (raw, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
            read_quoted(quoted)?
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let token = rest[..end].trim();
            if token.is_empty() {
                return None;
            }
            (token.to_string(), &rest[end..])
        };
        rest = remaining;

        let value = if key.ends_with('*') {
            decode_extended(&raw)?
        } else {
            raw
        };
        if params.insert(key, value).is_some() {
            // Duplicate parameters make the header ambiguous.
            return None;
        }
    }

    Some((disposition, params))
}

/// Read a quoted-string body (opening quote already consumed)
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &input[i + 1..])),
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(escaped);
            }
            other => out.push(other),
        }
    }
    None
}

/// Decode an RFC 2231 extended value such as `UTF-8''na%C3%AFve.txt`
fn decode_extended(raw: &str) -> Option<String> {
    let mut parts = raw.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    if !(charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("us-ascii")) {
        return None;
    }
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}
