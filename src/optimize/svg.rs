//! SVG / SVGZ optimization.
//!
//! Security first, size second. The sanitize rules always apply: `<script>`
//! and `<foreignObject>` subtrees, `on*` event handlers, `data:text/html`
//! URIs, external `<use>` references, CSS `@import` rules and the DOCTYPE
//! (the XXE vector; entities are never expanded, the declaration is
//! simply dropped) all go. Minification follows the config: metadata,
//! descriptive elements, comments and the XML prolog are removed, IDs are
//! shortened, and numeric precision is reduced on aggressive presets.
//!
//! SVGZ inflates, runs the same rewrite, and re-deflates at level 9.

use std::collections::HashMap;
use std::io::{Read, Write};

use async_trait::async_trait;

use crate::config::OptimizationConfig;
use crate::error::{Result, SlimgError};
use crate::format::ImageFormat;
use crate::optimize::{run_codec, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};

pub struct SvgOptimizer;

#[async_trait]
impl Optimizer for SvgOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let is_svgz = data.starts_with(&[0x1F, 0x8B]);
        let fmt = if is_svgz {
            ImageFormat::Svgz
        } else {
            ImageFormat::Svg
        };

        let source = if is_svgz { gunzip(data)? } else { data.to_vec() };
        let text = String::from_utf8_lossy(&source).into_owned();
        let options = RewriteOptions {
            strip_metadata: config.strip_metadata,
            precision: quality::svg_precision(config.quality),
        };

        let rewritten = run_codec("svg", move || Ok(rewrite(&text, &options))).await?;
        let out_bytes = if is_svgz {
            gzip_best(rewritten.as_bytes())?
        } else {
            rewritten.into_bytes()
        };

        Ok(finalize(data, out_bytes, "svg-minify", fmt))
    }
}

/// Sanitize without minifying: the always-on security rewrite alone.
pub fn sanitize_svg(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    rewrite(
        &text,
        &RewriteOptions {
            strip_metadata: false,
            precision: None,
        },
    )
    .into_bytes()
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| SlimgError::UnsupportedFormat(format!("bad gzip stream: {e}")))?;
    Ok(out)
}

fn gzip_best(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[derive(Clone)]
struct RewriteOptions {
    strip_metadata: bool,
    precision: Option<u8>,
}

/// Elements whose whole subtree is removed unconditionally.
const DANGEROUS_ELEMENTS: &[&str] = &["script", "foreignobject"];

/// Elements removed when stripping metadata.
const DESCRIPTIVE_ELEMENTS: &[&str] = &["metadata", "title", "desc"];

/// Attributes whose values get numeric-precision reduction.
const NUMERIC_ATTRS: &[&str] = &[
    "d", "points", "x", "y", "x1", "y1", "x2", "y2", "cx", "cy", "r", "rx", "ry", "width",
    "height", "viewbox",
];

fn rewrite(input: &str, opts: &RewriteOptions) -> String {
    let id_map = if opts.strip_metadata {
        build_id_map(input)
    } else {
        HashMap::new()
    };

    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            let end = input[i..].find('<').map(|p| i + p).unwrap_or(bytes.len());
            let run = &input[i..end];
            // Inter-tag whitespace carries no meaning in SVG.
            if !run.trim().is_empty() {
                out.push_str(run);
            }
            i = end;
            continue;
        }

        let rest = &input[i..];
        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|p| i + p + 3).unwrap_or(bytes.len());
            if !opts.strip_metadata {
                out.push_str(&input[i..end]);
            }
            i = end;
        } else if rest.starts_with("<![CDATA[") {
            let end = rest.find("]]>").map(|p| i + p + 3).unwrap_or(bytes.len());
            out.push_str(&input[i..end]);
            i = end;
        } else if rest.starts_with("<?") {
            let end = rest.find("?>").map(|p| i + p + 2).unwrap_or(bytes.len());
            if !opts.strip_metadata {
                out.push_str(&input[i..end]);
            }
            i = end;
        } else if starts_with_ci(rest, "<!doctype") {
            i = skip_doctype(input, i);
        } else if rest.starts_with("</") {
            let end = rest.find('>').map(|p| i + p + 1).unwrap_or(bytes.len());
            out.push_str(&input[i..end]);
            i = end;
        } else {
            match parse_tag(input, i) {
                Some(tag) => {
                    let local = local_name(&tag.name).to_ascii_lowercase();
                    let dangerous = DANGEROUS_ELEMENTS.contains(&local.as_str());
                    let descriptive =
                        opts.strip_metadata && DESCRIPTIVE_ELEMENTS.contains(&local.as_str());

                    if dangerous || descriptive {
                        i = if tag.self_closing {
                            tag.end
                        } else {
                            skip_subtree(input, tag.end, &tag.name)
                        };
                        continue;
                    }

                    emit_tag(&mut out, &tag, opts, &id_map);

                    if local == "style" && !tag.self_closing {
                        let close = find_ci(input, tag.end, "</style")
                            .unwrap_or(bytes.len());
                        out.push_str(&strip_css_imports(&input[tag.end..close]));
                        i = close;
                    } else {
                        i = tag.end;
                    }
                }
                None => {
                    // Malformed tag: copy the byte and move on.
                    out.push('<');
                    i += 1;
                }
            }
        }
    }
    out
}

struct Tag<'a> {
    name: &'a str,
    attrs: Vec<(&'a str, Option<&'a str>)>,
    self_closing: bool,
    /// Byte offset just past the closing `>`.
    end: usize,
}

/// Parse an open tag starting at `input[start] == '<'`. Quote-aware, so a
/// `>` inside an attribute value does not end the tag.
fn parse_tag(input: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = input.as_bytes();
    let mut i = start + 1;

    let name_start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1;
    }
    if i == name_start || i >= bytes.len() {
        return None;
    }
    let name = &input[name_start..i];

    let mut attrs = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        if bytes[i] == b'>' {
            return Some(Tag {
                name,
                attrs,
                self_closing: false,
                end: i + 1,
            });
        }
        if bytes[i] == b'/' {
            let end = input[i..].find('>').map(|p| i + p + 1)?;
            return Some(Tag {
                name,
                attrs,
                self_closing: true,
                end,
            });
        }

        let attr_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && bytes[i] != b'='
            && bytes[i] != b'>'
            && bytes[i] != b'/'
        {
            i += 1;
        }
        let attr_name = &input[attr_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                return None;
            }
            let value = if bytes[i] == b'"' || bytes[i] == b'\'' {
                let quote = bytes[i];
                let value_start = i + 1;
                let close = input[value_start..]
                    .find(quote as char)
                    .map(|p| value_start + p)?;
                i = close + 1;
                &input[value_start..close]
            } else {
                let value_start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && bytes[i] != b'>'
                    && bytes[i] != b'/'
                {
                    i += 1;
                }
                &input[value_start..i]
            };
            attrs.push((attr_name, Some(value)));
        } else if !attr_name.is_empty() {
            attrs.push((attr_name, None));
        } else {
            i += 1;
        }
    }
}

fn emit_tag(out: &mut String, tag: &Tag<'_>, opts: &RewriteOptions, id_map: &HashMap<String, String>) {
    let tag_local = local_name(&tag.name).to_ascii_lowercase();
    out.push('<');
    out.push_str(tag.name);

    for (name, value) in &tag.attrs {
        let local = local_name(name).to_ascii_lowercase();

        // Event handlers are always dropped.
        if local.starts_with("on") && local.len() > 2 {
            continue;
        }

        let Some(value) = value else {
            out.push(' ');
            out.push_str(name);
            continue;
        };

        if local == "href" {
            let trimmed = value.trim();
            let lower = trimmed.to_ascii_lowercase();
            if lower.starts_with("data:") && lower.contains("text/html") {
                continue;
            }
            if tag_local == "use" && (lower.starts_with("http://") || lower.starts_with("https://"))
            {
                continue;
            }
        }

        let mut rewritten = std::borrow::Cow::Borrowed(*value);
        if !id_map.is_empty() {
            if local == "id" {
                if let Some(short) = id_map.get(*value) {
                    rewritten = std::borrow::Cow::Owned(short.clone());
                }
            } else {
                rewritten = std::borrow::Cow::Owned(rewrite_id_refs(&rewritten, id_map));
            }
        }
        if let Some(precision) = opts.precision {
            if NUMERIC_ATTRS.contains(&local.as_str()) {
                rewritten = std::borrow::Cow::Owned(round_numbers(&rewritten, precision));
            }
        }

        out.push(' ');
        out.push_str(name);
        out.push('=');
        if rewritten.contains('"') {
            out.push('\'');
            out.push_str(&rewritten);
            out.push('\'');
        } else {
            out.push('"');
            out.push_str(&rewritten);
            out.push('"');
        }
    }

    if tag.self_closing {
        out.push_str("/>");
    } else {
        out.push('>');
    }
}

/// Skip past the matching close tag, counting nested same-name elements.
fn skip_subtree(input: &str, mut i: usize, name: &str) -> usize {
    let lname = name.to_ascii_lowercase();
    let mut depth = 1usize;
    let bytes = input.as_bytes();

    while i < bytes.len() {
        let Some(lt) = input[i..].find('<').map(|p| i + p) else {
            return bytes.len();
        };
        let rest = &input[lt..];
        if rest.starts_with("</") {
            let close_name_start = lt + 2;
            if tag_name_matches(input, close_name_start, &lname) {
                depth -= 1;
                let end = input[lt..]
                    .find('>')
                    .map(|p| lt + p + 1)
                    .unwrap_or(bytes.len());
                if depth == 0 {
                    return end;
                }
                i = end;
                continue;
            }
            i = lt + 2;
        } else if tag_name_matches(input, lt + 1, &lname) {
            match parse_tag(input, lt) {
                Some(tag) => {
                    if !tag.self_closing {
                        depth += 1;
                    }
                    i = tag.end;
                }
                None => i = lt + 1,
            }
        } else {
            i = lt + 1;
        }
    }
    bytes.len()
}

fn tag_name_matches(input: &str, at: usize, lname: &str) -> bool {
    let bytes = input.as_bytes();
    let mut end = at;
    while end < bytes.len()
        && !bytes[end].is_ascii_whitespace()
        && bytes[end] != b'>'
        && bytes[end] != b'/'
    {
        end += 1;
    }
    end <= bytes.len() && input[at..end].to_ascii_lowercase() == lname
}

/// Skip a DOCTYPE declaration, including any internal subset in brackets.
fn skip_doctype(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let mut i = start;
    let mut in_subset = false;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => in_subset = true,
            b']' => in_subset = false,
            b'>' if !in_subset => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Collect `id` attribute values in document order and assign short names.
fn build_id_map(input: &str) -> HashMap<String, String> {
    let mut ids = Vec::new();
    let mut i = 0;
    let bytes = input.as_bytes();
    while i < bytes.len() {
        let Some(lt) = input[i..].find('<').map(|p| i + p) else {
            break;
        };
        if input[lt..].starts_with("<!--") {
            i = input[lt..].find("-->").map(|p| lt + p + 3).unwrap_or(bytes.len());
            continue;
        }
        match parse_tag(input, lt) {
            Some(tag) => {
                for (name, value) in &tag.attrs {
                    if local_name(name).eq_ignore_ascii_case("id") {
                        if let Some(v) = value {
                            if !v.is_empty() {
                                ids.push(v.to_string());
                            }
                        }
                    }
                }
                i = tag.end;
            }
            None => i = lt + 1,
        }
    }

    ids.sort();
    ids.dedup();
    ids.into_iter()
        .enumerate()
        .map(|(n, id)| (id, short_name(n)))
        .collect()
}

fn short_name(mut n: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'a' + (n % 26) as u8) as char);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    name
}

/// Rewrite `url(#id)` and `#id` references through the id map.
fn rewrite_id_refs(value: &str, id_map: &HashMap<String, String>) -> String {
    if let Some(rest) = value.strip_prefix('#') {
        if let Some(short) = id_map.get(rest) {
            return format!("#{short}");
        }
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut remaining = value;
    while let Some(pos) = remaining.find("url(#") {
        out.push_str(&remaining[..pos + 5]);
        remaining = &remaining[pos + 5..];
        let close = remaining.find(')').unwrap_or(remaining.len());
        let id = &remaining[..close];
        match id_map.get(id) {
            Some(short) => out.push_str(short),
            None => out.push_str(id),
        }
        remaining = &remaining[close..];
    }
    out.push_str(remaining);
    out
}

fn strip_css_imports(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut remaining = css;
    loop {
        match find_ci(remaining, 0, "@import") {
            Some(at) => {
                out.push_str(&remaining[..at]);
                let after = &remaining[at..];
                let end = after.find(';').map(|p| p + 1).unwrap_or(after.len());
                remaining = &after[end..];
            }
            None => {
                out.push_str(remaining);
                return out;
            }
        }
    }
}

fn round_numbers(value: &str, precision: u8) -> String {
    let mut out = String::with_capacity(value.len());
    let mut num = String::new();

    fn flush(num: &mut String, out: &mut String, precision: u8) {
        if num.is_empty() {
            return;
        }
        let rounded = if num.contains('.') {
            num.parse::<f64>().ok().map(|v| format_number(v, precision))
        } else {
            None
        };
        match rounded {
            Some(s) => out.push_str(&s),
            None => out.push_str(num),
        }
        num.clear();
    }

    for c in value.chars() {
        let numeric = c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && num.is_empty());
        if numeric {
            num.push(c);
        } else if (c == '-' || c == '+') && !num.is_empty() {
            flush(&mut num, &mut out, precision);
            num.push(c);
        } else if c == 'e' || c == 'E' {
            // Leave exponent notation untouched.
            num.push(c);
            out.push_str(&num);
            num.clear();
        } else {
            flush(&mut num, &mut out, precision);
            out.push(c);
        }
    }
    flush(&mut num, &mut out, precision);
    out
}

fn format_number(v: f64, precision: u8) -> String {
    let s = format!("{:.*}", precision as usize, v);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn starts_with_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn find_ci(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    let lower = haystack[from..].to_ascii_lowercase();
    lower.find(&needle.to_ascii_lowercase()).map(|p| from + p)
}
