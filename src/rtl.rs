//! Right-to-left stylesheet generation.
//!
//! The mirrored stylesheet is derived from the compiled one by rewriting
//! declarations only. Selectors, at-rule preludes and comments are copied as
//! they are, so theme metadata in the header survives. Only declarations that
//! carry a horizontal direction are touched; the rewrite is its own inverse
//! for those and leaves every other declaration byte for byte.

use std::borrow::Cow;
use std::fs;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::Environment;
use crate::error::StyleError;

static SIDES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(left|right)\b").expect("valid regex"));

static DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ltr|rtl)\b").expect("valid regex"));

static CURSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ne|nw|se|sw|e|w)-resize\b").expect("valid regex"));

/// Reads the compiled stylesheet and writes its mirrored variant.
pub fn generate(env: &Environment) -> Result<(), StyleError> {
    let layout = env.layout();
    let source = env.path(&layout.stylesheet);
    let target = env.path(&layout.stylesheet_rtl);

    let css = fs::read_to_string(&source)?;
    fs::write(&target, strip_source_map_url(&flip(&css)))?;

    tracing::info!(path = %target, "generated from {}", layout.stylesheet);
    Ok(())
}

/// The source map belongs to the original stylesheet.
pub(crate) fn strip_source_map_url(css: &str) -> String {
    let mut out: String = css
        .lines()
        .filter(|line| !line.trim_start().starts_with("/*# sourceMappingURL="))
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

/// Mirrors every directional declaration in `css`.
pub fn flip(css: &str) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut start = 0;
    let mut quote = None;
    let mut parens = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];

        if let Some(q) = quote {
            match byte {
                b'\\' => i += 1,
                _ if byte == q => quote = None,
                _ => {}
            }
            i += 1;
            continue;
        }

        match byte {
            b'"' | b'\'' => quote = Some(byte),
            b'(' => parens += 1,
            b')' => parens = parens.saturating_sub(1),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = css[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |offset| i + 2 + offset + 2);

                // comments between statements are copied verbatim
                if css[start..i].trim().is_empty() {
                    out.push_str(&css[start..end]);
                    start = end;
                }

                i = end;
                continue;
            }
            b'{' if parens == 0 => {
                out.push_str(&css[start..=i]);
                start = i + 1;
            }
            b';' | b'}' if parens == 0 => {
                out.push_str(&flip_declaration(&css[start..i]));
                out.push(byte as char);
                start = i + 1;
            }
            _ => {}
        }

        i += 1;
    }

    out.push_str(&flip_declaration(&css[start..]));
    out
}

/// Mirrors a single `property: value` pair, anything else is returned as is.
fn flip_declaration(text: &str) -> Cow<'_, str> {
    let Some(colon) = text.find(':') else {
        return Cow::Borrowed(text);
    };

    let (head, value) = (&text[..colon], &text[colon + 1..]);
    let property = head.trim();

    let is_ident = property
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if property.is_empty() || property.starts_with("--") || !is_ident {
        return Cow::Borrowed(text);
    }

    let lower = property.to_ascii_lowercase();
    let (value, important) = split_important(value);
    let value = flip_value(unprefixed(&lower), value);
    let head = SIDES.replace_all(head, swap_side);

    if let (Cow::Borrowed(_), Cow::Borrowed(_)) = (&head, &value) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(format!("{head}:{value}{important}"))
}

/// Strips a vendor prefix such as `-webkit-`.
fn unprefixed(property: &str) -> &str {
    property
        .strip_prefix('-')
        .and_then(|rest| rest.split_once('-'))
        .map_or(property, |(_, name)| name)
}

fn split_important(value: &str) -> (&str, &str) {
    match value.rfind('!') {
        Some(bang) if value[bang + 1..].trim().eq_ignore_ascii_case("important") => {
            (&value[..bang], &value[bang..])
        }
        _ => (value, ""),
    }
}

fn flip_value<'a>(property: &str, value: &'a str) -> Cow<'a, str> {
    match property {
        "float" | "clear" | "text-align" | "text-align-last" | "background"
        | "background-position" | "background-position-x" | "transform-origin"
        | "perspective-origin" => outside_urls(value, |part| SIDES.replace_all(part, swap_side)),
        "direction" => DIRECTION.replace_all(value, |caps: &Captures| {
            if caps[1].eq_ignore_ascii_case("ltr") {
                "rtl"
            } else {
                "ltr"
            }
        }),
        "margin" | "padding" | "inset" | "border-width" | "border-style" | "border-color"
        | "scroll-margin" | "scroll-padding" => swap_box(value),
        "border-radius" => flip_radius(value),
        "box-shadow" | "text-shadow" => negate_shadows(value),
        "cursor" => CURSOR.replace_all(value, |caps: &Captures| {
            let mirrored = match caps[1].to_ascii_lowercase().as_str() {
                "ne" => "nw",
                "nw" => "ne",
                "se" => "sw",
                "sw" => "se",
                "e" => "w",
                _ => "e",
            };
            format!("{mirrored}-resize")
        }),
        _ => Cow::Borrowed(value),
    }
}

fn swap_side(caps: &Captures) -> &'static str {
    if caps[1].eq_ignore_ascii_case("left") {
        "right"
    } else {
        "left"
    }
}

/// Applies `f` to the parts of `value` outside of `url(...)`.
fn outside_urls<'a, F>(value: &'a str, f: F) -> Cow<'a, str>
where
    F: Fn(&str) -> Cow<'_, str>,
{
    if !value.contains("url(") {
        return match f(value) {
            Cow::Borrowed(_) => Cow::Borrowed(value),
            Cow::Owned(owned) => Cow::Owned(owned),
        };
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("url(") {
        out.push_str(&f(&rest[..open]));
        let close = rest[open..].find(')').map_or(rest.len(), |c| open + c + 1);
        out.push_str(&rest[open..close]);
        rest = &rest[close..];
    }
    out.push_str(&f(rest));

    if out == value {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(out)
    }
}

/// Splits on `separator` outside of parentheses.
fn split_top_level(value: &str, separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && separator(c) => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn words(value: &str) -> Vec<&str> {
    split_top_level(value, char::is_whitespace)
        .into_iter()
        .filter(|word| !word.is_empty())
        .collect()
}

/// Keeps the whitespace around `value` while replacing its content.
fn rewrap(value: &str, content: String) -> String {
    let leading = &value[..value.len() - value.trim_start().len()];
    let trailing = &value[value.trim_end().len()..];
    format!("{leading}{content}{trailing}")
}

/// `top right bottom left` becomes `top left bottom right`.
fn swap_box(value: &str) -> Cow<'_, str> {
    match words(value).as_slice() {
        [top, right, bottom, left] if right != left => {
            Cow::Owned(rewrap(value, format!("{top} {left} {bottom} {right}")))
        }
        _ => Cow::Borrowed(value),
    }
}

fn flip_radius(value: &str) -> Cow<'_, str> {
    let sides: Vec<String> = split_top_level(value, |c| c == '/')
        .into_iter()
        .map(|side| {
            let flipped = match words(side).as_slice() {
                [a, b] => format!("{b} {a}"),
                [a, b, c] => format!("{b} {a} {b} {c}"),
                [a, b, c, d] => format!("{b} {a} {d} {c}"),
                _ => return side.to_string(),
            };
            rewrap(side, flipped)
        })
        .collect();

    let joined = sides.join("/");
    if joined == value {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(joined)
    }
}

fn negate_shadows(value: &str) -> Cow<'_, str> {
    let shadows: Vec<String> = split_top_level(value, |c| c == ',')
        .into_iter()
        .map(|shadow| {
            let mut words = words(shadow)
                .into_iter()
                .map(Cow::Borrowed)
                .collect::<Vec<_>>();

            if let Some(offset) = words.iter_mut().find(|word| is_length(word)) {
                *offset = Cow::Owned(negate(offset));
            }

            rewrap(shadow, words.join(" "))
        })
        .collect();

    let joined = shadows.join(",");
    if joined == value {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(joined)
    }
}

fn is_length(word: &str) -> bool {
    let digits = word.trim_start_matches(['-', '+']);
    digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
}

fn negate(word: &str) -> String {
    let magnitude = word.trim_start_matches(['-', '+']);
    let number: String = magnitude
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if number.parse::<f64>().is_ok_and(|n| n == 0.0) {
        return word.to_string();
    }

    match word.strip_prefix('-') {
        Some(positive) => positive.to_string(),
        None => format!("-{magnitude}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names() {
        let css = ".a {\n  margin-left: 10px;\n  border-top-right-radius: 2px;\n  left: 0;\n}";
        assert_eq!(
            flip(css),
            ".a {\n  margin-right: 10px;\n  border-top-left-radius: 2px;\n  right: 0;\n}"
        );
    }

    #[test]
    fn test_keyword_values() {
        assert_eq!(flip("a{float:left}"), "a{float:right}");
        assert_eq!(flip("a{text-align: right !important;}"), "a{text-align: left !important;}");
        assert_eq!(flip("a{direction:ltr}"), "a{direction:rtl}");
        assert_eq!(flip("a{cursor: ne-resize}"), "a{cursor: nw-resize}");
        assert_eq!(flip("a{cursor: e-resize}"), "a{cursor: w-resize}");
    }

    #[test]
    fn test_urls_untouched() {
        assert_eq!(
            flip("a{background: url(img/left.png) left top no-repeat}"),
            "a{background: url(img/left.png) right top no-repeat}"
        );
    }

    #[test]
    fn test_box_shorthands() {
        assert_eq!(flip("a{margin: 1px 2px 3px 4px}"), "a{margin: 1px 4px 3px 2px}");
        assert_eq!(flip("a{padding: 1px 2px 3px}"), "a{padding: 1px 2px 3px}");
        assert_eq!(
            flip("a{margin: 0 calc(1px + 2px) 0 4px}"),
            "a{margin: 0 4px 0 calc(1px + 2px)}"
        );
    }

    #[test]
    fn test_border_radius() {
        assert_eq!(flip("a{border-radius: 1px 2px}"), "a{border-radius: 2px 1px}");
        assert_eq!(
            flip("a{border-radius: 1px 2px 3px 4px}"),
            "a{border-radius: 2px 1px 4px 3px}"
        );
        assert_eq!(
            flip("a{border-radius: 1px 2px 3px}"),
            "a{border-radius: 2px 1px 2px 3px}"
        );
        assert_eq!(flip("a{border-radius: 5px}"), "a{border-radius: 5px}");
    }

    #[test]
    fn test_shadows() {
        assert_eq!(
            flip("a{box-shadow: 2px 3px 4px rgba(0, 0, 0, .5)}"),
            "a{box-shadow: -2px 3px 4px rgba(0, 0, 0, .5)}"
        );
        assert_eq!(
            flip("a{box-shadow: inset -1px 0 #fff, 0 1px red}"),
            "a{box-shadow: inset 1px 0 #fff, 0 1px red}"
        );
    }

    #[test]
    fn test_comments_and_selectors_untouched() {
        let css = "/*\nTheme Name: Left Align\nVersion: 1.0\n*/\n.left:hover, [dir=\"right\"] { color: red; }";
        assert_eq!(flip(css), css);
    }

    #[test]
    fn test_custom_properties_untouched() {
        let css = ":root { --gap-left: 1px; }";
        assert_eq!(flip(css), css);
    }

    #[test]
    fn test_at_rules() {
        let css = "@import url(\"a;b.css\");\n@media (min-width: 40em) { .a { padding-left: 1em; } }";
        assert_eq!(
            flip(css),
            "@import url(\"a;b.css\");\n@media (min-width: 40em) { .a { padding-right: 1em; } }"
        );
    }

    #[test]
    fn test_flip_is_an_involution() {
        let css = "\
.a {
  margin-left: 1px;
  margin: 1px 2px 3px 4px;
  border-radius: 1px 2px 3px 4px;
  float: left;
  box-shadow: 2px 0 red;
  text-shadow: -1px 1px blue;
  direction: rtl;
}
";
        assert_ne!(flip(css), css);
        assert_eq!(flip(&flip(css)), css);
    }

    #[test]
    fn test_non_directional_declarations_stable() {
        let css = "\
.a {
  color: #333;
  font: 16px/1.5 \"Left Sans\", serif;
  transition: opacity .2s ease-in;
  content: \"right\";
  margin: 0 auto;
}
";
        let once = flip(css);
        assert_eq!(once, css);
        assert_eq!(flip(&once), once);
    }

    #[test]
    fn test_strip_source_map_url() {
        let css = "a{left:0}\n/*# sourceMappingURL=style.css.map */\n";
        assert_eq!(strip_source_map_url(&flip(css)), "a{right:0}\n");
    }
}
