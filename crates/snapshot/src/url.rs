//! Rewriting of path-like attribute values to absolute form.

use memchr::{memchr, memmem};
use url::Url;

/// Resolve `href` against `base`. Values that cannot be resolved (no base,
/// unparsable base, blank value) pass through unchanged.
pub fn absolute_url(base: Option<&str>, href: &str) -> String {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return href.to_string();
    }
    let Some(base) = base.and_then(|b| Url::parse(b).ok()) else {
        return href.to_string();
    };
    base.join(trimmed)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// True when `href`, resolved against `base`, shares the origin of `base`.
pub fn same_origin(base: Option<&str>, href: &str) -> bool {
    let Some(base) = base.and_then(|b| Url::parse(b).ok()) else {
        return false;
    };
    base.join(href.trim())
        .is_ok_and(|target| target.origin() == base.origin())
}

// input: "a.png 1x, /b.png 2x"
// output: "https://host/dir/a.png 1x, https://host/b.png 2x"
pub fn absolute_srcset(base: Option<&str>, srcset: &str) -> String {
    if srcset.trim().is_empty() {
        return srcset.to_string();
    }
    srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| match candidate.split_once(char::is_whitespace) {
            Some((url, descriptor)) => {
                format!("{} {}", absolute_url(base, url), descriptor.trim())
            }
            None => absolute_url(base, candidate),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrite every relative `url(...)` reference in a CSS fragment.
pub fn absolute_css_urls(base: Option<&str>, css: &str) -> String {
    let Some(base) = base.and_then(|b| Url::parse(b).ok()) else {
        return css.to_string();
    };
    let bytes = css.as_bytes();
    let finder = memmem::Finder::new(b"url(");
    let mut out = String::with_capacity(css.len());
    let mut last = 0;

    for start in finder.find_iter(bytes) {
        if start < last {
            continue;
        }
        let arg_start = start + 4;
        let Some(close) = memchr(b')', &bytes[arg_start..]) else {
            break;
        };
        let arg_end = arg_start + close;
        let raw = &css[arg_start..arg_end];
        let trimmed = raw.trim();
        let (quote, inner) = match trimmed.chars().next() {
            Some(q @ ('"' | '\'')) if trimmed.len() >= 2 && trimmed.ends_with(q) => {
                (Some(q), &trimmed[1..trimmed.len() - 1])
            }
            _ => (None, trimmed),
        };

        out.push_str(&css[last..arg_start]);
        if is_self_contained(inner) {
            out.push_str(raw);
        } else {
            let resolved = base
                .join(inner)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| inner.to_string());
            match quote {
                Some(q) => {
                    out.push(q);
                    out.push_str(&resolved);
                    out.push(q);
                }
                None => out.push_str(&resolved),
            }
        }
        last = arg_end;
    }
    out.push_str(&css[last..]);
    out
}

fn is_self_contained(reference: &str) -> bool {
    reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || Url::parse(reference).is_ok()
}
