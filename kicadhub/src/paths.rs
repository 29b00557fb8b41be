//! Path resolution with a `${BASE_DIR}` placeholder.
//!
//! Settings store library roots and project files relative to a configurable
//! base directory so a whole workspace can move between machines. All
//! operations here are purely lexical: nothing touches the filesystem and
//! nothing fails. Existence checks are the caller's concern.

use std::collections::HashMap;

pub const BASE_DIR_VAR: &str = "${BASE_DIR}";

#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    base: String,
    home: Option<String>,
    vars: HashMap<String, String>,
}

impl PathResolver {
    pub fn new(base: &str) -> Self {
        let home = dirs::home_dir().map(|h| to_forward_slashes(&h.to_string_lossy()));
        let mut resolver = Self {
            base: String::new(),
            home,
            vars: HashMap::new(),
        };
        resolver.base = resolver.normalize_absolute(base);
        resolver
    }

    /// Override the home directory used for `~` expansion.
    pub fn with_home(mut self, home: &str) -> Self {
        self.home = Some(to_forward_slashes(home));
        self
    }

    /// Extra `${NAME}` variables, e.g. `KIPRJMOD` when resolving lib-table URIs.
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), to_forward_slashes(value));
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn resolve(&self, pathlike: &str) -> String {
        let trimmed = pathlike.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let expanded = self.expand_vars(trimmed);
        let expanded = self.expand_home(&expanded);
        let slashed = to_forward_slashes(&expanded);
        if is_absolute(&slashed) || self.base.is_empty() {
            normalize(&slashed)
        } else {
            normalize(&format!("{}/{}", self.base, slashed))
        }
    }

    pub fn relativize(&self, absolute: &str) -> String {
        let resolved = self.resolve(absolute);
        if self.base.is_empty() || resolved.is_empty() {
            return resolved;
        }
        if resolved == self.base {
            return BASE_DIR_VAR.to_string();
        }
        let prefix = if self.base.ends_with('/') {
            self.base.clone()
        } else {
            format!("{}/", self.base)
        };
        match resolved.strip_prefix(&prefix) {
            Some(rest) => format!("{}/{}", BASE_DIR_VAR, rest),
            None => resolved,
        }
    }

    /// Split a `;`-separated list and resolve every non-blank entry.
    pub fn resolve_list(&self, list: &str) -> Vec<String> {
        list.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| self.resolve(s))
            .collect()
    }

    /// Inverse of [`resolve_list`](Self::resolve_list), used when writing settings.
    pub fn join_list<S: AsRef<str>>(&self, paths: &[S]) -> String {
        paths
            .iter()
            .map(|p| self.relativize(p.as_ref()))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(";")
    }

    fn normalize_absolute(&self, base: &str) -> String {
        let trimmed = base.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        normalize(&to_forward_slashes(&self.expand_home(trimmed)))
    }

    fn expand_home(&self, input: &str) -> String {
        match &self.home {
            Some(home) if input == "~" => home.clone(),
            Some(home) if input.starts_with("~/") || input.starts_with("~\\") => {
                format!("{}/{}", home.trim_end_matches('/'), &input[2..])
            }
            _ => input.to_string(),
        }
    }

    fn expand_vars(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            let value = if name == "BASE_DIR" {
                Some(self.base.clone())
            } else {
                self.vars
                    .get(name)
                    .cloned()
                    .or_else(|| std::env::var(name).ok())
            };
            match value {
                Some(v) => out.push_str(&v),
                None => out.push_str(&rest[start..start + 3 + end]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn to_forward_slashes(s: &str) -> String {
    s.replace('\\', "/")
}

fn is_absolute(p: &str) -> bool {
    p.starts_with('/') || has_drive_prefix(p)
}

fn has_drive_prefix(p: &str) -> bool {
    let bytes = p.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexically collapse `.`, `..` and repeated separators.
fn normalize(p: &str) -> String {
    let (prefix, body) = if has_drive_prefix(p) {
        (format!("{}/", &p[..2]), &p[2..])
    } else if p.starts_with('/') {
        ("/".to_string(), p)
    } else {
        (String::new(), p)
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if prefix.is_empty() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        if prefix.is_empty() {
            ".".to_string()
        } else {
            prefix
        }
    } else {
        format!("{}{}", prefix, parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/proj/home").with_home("/home/eng")
    }

    #[test]
    fn test_placeholder_round_trip() {
        let r = resolver();
        assert_eq!(r.resolve("${BASE_DIR}/libs/sym"), "/proj/home/libs/sym");
        assert_eq!(r.relativize("/proj/home/libs/sym"), "${BASE_DIR}/libs/sym");
    }

    #[test]
    fn test_relative_paths_join_base() {
        let r = resolver();
        assert_eq!(r.resolve("libs/./fp/../sym"), "/proj/home/libs/sym");
        assert_eq!(r.resolve("~/kicad"), "/home/eng/kicad");
        assert_eq!(r.resolve("C:\\kicad\\libs"), "C:/kicad/libs");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(resolver().resolve("   "), "");
        assert_eq!(resolver().relativize(""), "");
    }

    #[test]
    fn test_outside_base_is_untouched() {
        let r = resolver();
        assert_eq!(r.relativize("/proj/homework/a"), "/proj/homework/a");
        assert_eq!(r.relativize("/proj/home"), "${BASE_DIR}");
    }

    #[test]
    fn test_resolve_list_drops_blanks() {
        let r = resolver();
        assert_eq!(
            r.resolve_list("${BASE_DIR}/a; ;/b;;c"),
            vec!["/proj/home/a", "/b", "/proj/home/c"]
        );
        assert_eq!(
            r.join_list(&["/proj/home/a", "/b"]),
            "${BASE_DIR}/a;/b"
        );
    }

    #[test]
    fn test_custom_vars() {
        let r = resolver().with_var("KIPRJMOD", "/work/board");
        assert_eq!(r.resolve("${KIPRJMOD}/fp.pretty"), "/work/board/fp.pretty");
        assert_eq!(r.resolve("${NOT_A_VAR_XYZ}/x"), "/proj/home/${NOT_A_VAR_XYZ}/x");
    }

    #[test]
    fn test_resolve_is_idempotent_and_round_trips() {
        let r = resolver();
        let inputs = [
            "${BASE_DIR}/libs/sym",
            "libs/../other",
            "/abs/path/./x",
            "~/kicad/../lib",
            "/proj/home",
            "rel\\win\\style",
        ];
        for input in inputs {
            let once = r.resolve(input);
            assert_eq!(r.resolve(&once), once, "idempotence for {input}");
            assert_eq!(r.resolve(&r.relativize(&once)), once, "round trip for {input}");
        }
    }
}
