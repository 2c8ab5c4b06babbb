//! Minimal path glob syntax for scope `paths` filters. A pattern is
//! anchored to the whole path, `**` crosses directory separators and
//! `*` does not. Leading and trailing slashes are ignored.

use regex::Regex;

pub fn compile(pattern: &str) -> anyhow::Result<Regex> {
    let trimmed = pattern.trim().trim_matches('/');
    let mut expr = String::from("^");
    for (i, chunk) in trimmed.split("**").enumerate() {
        if i > 0 {
            expr.push_str(".*");
        }
        for (j, part) in chunk.split('*').enumerate() {
            if j > 0 {
                expr.push_str("[^/]*");
            }
            expr.push_str(&regex::escape(part));
        }
    }
    expr.push('$');
    Ok(Regex::new(&expr)?)
}
