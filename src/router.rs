//! Pattern router.
//!
//! Holds three ordered lists of `(filename-glob, path-glob)` pairs, one per
//! routing policy. Matching supports the classic `*` (zero or more) and `?`
//! (exactly one) glob wildcards; an empty pattern matches the filename
//! itself.

/// A routing policy list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Memory,
    Passthrough,
    ZeroCopy,
}

#[derive(Debug, Clone)]
struct Entry {
    filename: String,
    path: String,
}

/// Holds the memory/passthrough/zerocopy pattern lists and the
/// intercommunicator bindings.
#[derive(Debug, Default)]
pub struct Router {
    memory: Vec<Entry>,
    passthrough: Vec<Entry>,
    zerocopy: Vec<Entry>,
    intercomms: Vec<(Entry, usize)>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn set_memory(&mut self, filename: impl Into<String>, path: impl Into<String>) {
        self.memory.push(Entry { filename: filename.into(), path: path.into() });
    }

    pub fn set_passthru(&mut self, filename: impl Into<String>, path: impl Into<String>) {
        self.passthrough.push(Entry { filename: filename.into(), path: path.into() });
    }

    pub fn set_zerocopy(&mut self, filename: impl Into<String>, path: impl Into<String>) {
        self.zerocopy.push(Entry { filename: filename.into(), path: path.into() });
    }

    pub fn set_intercomm(&mut self, filename: impl Into<String>, path: impl Into<String>, intercomm_index: usize) {
        self.intercomms
            .push((Entry { filename: filename.into(), path: path.into() }, intercomm_index));
    }

    fn list(&self, policy: Policy) -> &[Entry] {
        match policy {
            Policy::Memory => &self.memory,
            Policy::Passthrough => &self.passthrough,
            Policy::ZeroCopy => &self.zerocopy,
        }
    }

    /// Whether `(filename, path)` matches any entry of `policy`'s list. In
    /// "partial" mode, a path-glob ending in `*` matches any prefix of
    /// `path` (so an ancestor can be matched before its leaf name is fully
    /// known).
    pub fn match_any(&self, filename: &str, path: &str, policy: Policy, partial: bool) -> bool {
        self.list(policy)
            .iter()
            .any(|e| matches_pattern(&e.filename, filename) && matches_path(&e.path, path, partial))
    }

    /// The first list index (`0` = memory, `1` = passthrough, `2` =
    /// zerocopy) that matches, or `-1` if none does.
    pub fn find_match(&self, filename: &str, path: &str, partial: bool) -> i32 {
        for (i, policy) in [Policy::Memory, Policy::Passthrough, Policy::ZeroCopy].into_iter().enumerate() {
            if self.match_any(filename, path, policy, partial) {
                return i as i32;
            }
        }
        -1
    }

    /// All policies that match `(filename, path)`.
    pub fn find_matches(&self, filename: &str, path: &str, partial: bool) -> Vec<Policy> {
        [Policy::Memory, Policy::Passthrough, Policy::ZeroCopy]
            .into_iter()
            .filter(|&p| self.match_any(filename, path, p, partial))
            .collect()
    }

    /// The intercommunicator index bound to `(filename, path)`, if any.
    pub fn intercomm_for(&self, filename: &str, path: &str) -> Option<usize> {
        self.intercomms
            .iter()
            .find(|(e, _)| matches_pattern(&e.filename, filename) && matches_path(&e.path, path, false))
            .map(|(_, idx)| *idx)
    }
}

/// Match `text` against a glob `pattern` using `*`/`?` wildcards only. An
/// empty pattern matches the filename itself, i.e. matches
/// only when `text == pattern` trivially, which this also covers since
/// `glob_match("", "")` is true and `glob_match("", "x")` is false — callers
/// that want "empty pattern = match this exact filename" pass the filename
/// as both pattern and text, which is how `set_*` is documented to be used
/// when no wildcard is desired.
fn matches_pattern(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }
    glob_match(pattern.as_bytes(), text.as_bytes())
}

fn matches_path(pattern: &str, text: &str, partial: bool) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }
    if partial && pattern.ends_with('*') {
        // A glob ending in `*` matches any prefix of `text`: truncate both
        // pattern and text to the literal prefix before the first wildcard
        // run and require only that much to line up, then let the trailing
        // `*` absorb whatever of `text` exists (including nothing at all).
        return glob_match_partial(pattern.as_bytes(), text.as_bytes());
    }
    glob_match(pattern.as_bytes(), text.as_bytes())
}

/// Classic backtracking glob matcher over `*`/`?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_at(pattern, text, false)
}

/// Like [`glob_match`], but a match of the text against a strict prefix of
/// the pattern (stopping right before we've consumed all of `text`) also
/// counts as success, because `text` may itself be an ancestor path whose
/// descendants would go on to match the rest of `pattern`.
fn glob_match_partial(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_at(pattern, text, true)
}

fn glob_match_at(pattern: &[u8], text: &[u8], partial: bool) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // `*` matches zero or more characters: try consuming 0..=all of
            // `text`.
            if glob_match_at(&pattern[1..], text, partial) {
                return true;
            }
            if !text.is_empty() && glob_match_at(pattern, &text[1..], partial) {
                return true;
            }
            // In partial mode a trailing `*` also matches having run out of
            // text to give it, treating `text` as a not-yet-fully-resolved
            // prefix of whatever the pattern ultimately selects.
            partial && pattern.len() == 1
        }
        (Some(b'?'), Some(_)) => glob_match_at(&pattern[1..], &text[1..], partial),
        (Some(&p), Some(&t)) if p == t => glob_match_at(&pattern[1..], &text[1..], partial),
        (Some(_), None) => partial,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        assert!(matches_pattern("*.h5", "producer.h5"));
        assert!(!matches_pattern("*.h5", "producer.txt"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(matches_pattern("f?.h5", "f1.h5"));
        assert!(!matches_pattern("f?.h5", "f12.h5"));
    }

    #[test]
    fn empty_pattern_matches_only_empty() {
        assert!(matches_pattern("", ""));
        assert!(!matches_pattern("", "x"));
    }

    #[test]
    fn partial_mode_matches_ancestor_of_trailing_star_pattern() {
        assert!(matches_path("/g/*", "/g", true));
        assert!(matches_path("/g/*", "/g/grid", true));
        assert!(!matches_path("/g/*", "/h", true));
    }

    #[test]
    fn non_partial_star_still_matches_zero_width() {
        // `*` matches zero or more characters even outside partial mode.
        assert!(matches_path("/g/*", "/g/", false));
        assert!(matches_path("/g*", "/g", false));
    }

    #[test]
    fn router_find_match_picks_first_matching_policy() {
        let mut r = Router::new();
        r.set_memory("*.h5", "/g/*");
        r.set_passthru("*.h5", "*");
        assert_eq!(r.find_match("run.h5", "/g/grid", true), 0);
        assert_eq!(r.find_match("run.h5", "/other", true), 1);
        assert_eq!(r.find_match("run.h5", "/other", false), 1);
    }

    #[test]
    fn find_matches_returns_every_matching_policy() {
        let mut r = Router::new();
        r.set_memory("*.h5", "*");
        r.set_zerocopy("*.h5", "/particles");
        let matches = r.find_matches("run.h5", "/particles", false);
        assert_eq!(matches, vec![Policy::Memory, Policy::ZeroCopy]);
    }
}
